use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;

use notify::event::ModifyKind;
use notify::EventKind;
use notify::RecursiveMode;
use notify::Watcher as _;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

use satchel_core::plugin::WatchEvent;
use satchel_core::plugin::Watcher;

/// File watcher backed by the platform-native notify backend.
///
/// Events are forwarded into the rebuild controller's channel; metadata-only
/// modifications are dropped since they would trigger endless rebuild loops.
pub struct NotifyWatcher {
  watcher: Mutex<notify::RecommendedWatcher>,
}

impl NotifyWatcher {
  pub fn new(events: UnboundedSender<WatchEvent>) -> anyhow::Result<Self> {
    let watcher =
      notify::recommended_watcher(move |result: Result<notify::Event, notify::Error>| {
        let event = match result {
          Ok(event) => event,
          Err(err) => {
            tracing::warn!("File watcher error: {err}");
            return;
          }
        };

        let make: fn(PathBuf) -> WatchEvent = match event.kind {
          EventKind::Create(_) => WatchEvent::Create,
          EventKind::Modify(ModifyKind::Metadata(_)) => return,
          EventKind::Modify(_) => WatchEvent::Update,
          EventKind::Remove(_) => WatchEvent::Delete,
          _ => return,
        };

        for path in event.paths {
          let _ = events.send(make(path));
        }
      })?;

    Ok(NotifyWatcher {
      watcher: Mutex::new(watcher),
    })
  }
}

impl Watcher for NotifyWatcher {
  fn watch(&self, path: &Path) -> anyhow::Result<()> {
    self
      .watcher
      .lock()
      .watch(path, RecursiveMode::NonRecursive)?;
    Ok(())
  }

  fn unwatch(&self, path: &Path) -> anyhow::Result<()> {
    self.watcher.lock().unwatch(path)?;
    Ok(())
  }

  fn close(&self) {}
}

/// Watcher for tests: events are emitted by hand and only delivered for
/// paths with an active subscription, like a real backend.
pub struct InMemoryWatcher {
  watched: Mutex<HashSet<PathBuf>>,
  events: UnboundedSender<WatchEvent>,
}

impl InMemoryWatcher {
  pub fn new(events: UnboundedSender<WatchEvent>) -> Self {
    InMemoryWatcher {
      watched: Mutex::new(HashSet::new()),
      events,
    }
  }

  pub fn is_watching(&self, path: &Path) -> bool {
    self.watched.lock().contains(path)
  }

  /// Deliver an event if its path is watched; returns whether it was sent
  pub fn emit(&self, event: WatchEvent) -> bool {
    if !self.watched.lock().contains(event.path()) {
      return false;
    }
    self.events.send(event).is_ok()
  }
}

impl Watcher for InMemoryWatcher {
  fn watch(&self, path: &Path) -> anyhow::Result<()> {
    self.watched.lock().insert(path.to_path_buf());
    Ok(())
  }

  fn unwatch(&self, path: &Path) -> anyhow::Result<()> {
    self.watched.lock().remove(path);
    Ok(())
  }

  fn close(&self) {
    self.watched.lock().clear();
  }
}
