use std::sync::Arc;

use parking_lot::Mutex;

use crate::bundle_tree::BundleTree;

/// Lifecycle notifications emitted by the bundler facade
#[derive(Clone)]
pub enum BundlerEvent {
  /// A build pass finished successfully; carries the finished bundle tree
  Bundled(Arc<BundleTree>),
  /// A build pass ended, successfully or not
  BuildEnd,
}

type Listener = Box<dyn Fn(&BundlerEvent) + Send + Sync>;

/// Observer registry with synchronous delivery
#[derive(Default)]
pub struct EventEmitter {
  listeners: Mutex<Vec<Listener>>,
}

impl EventEmitter {
  pub fn on(&self, listener: impl Fn(&BundlerEvent) + Send + Sync + 'static) {
    self.listeners.lock().push(Box::new(listener));
  }

  pub fn emit(&self, event: &BundlerEvent) {
    for listener in self.listeners.lock().iter() {
      listener(event);
    }
  }
}
