use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;

use satchel_core::types::FileType;
use satchel_core::types::Target;

/// Runtime loader modules keyed by bundle type.
///
/// The loaders themselves execute in the output runtime, not here; the
/// registry only records which module backs each type so packagers can
/// reference it.
#[derive(Clone, Default)]
pub struct BundleLoaderRegistry {
  inner: Arc<BundleLoaderInner>,
}

#[derive(Default)]
struct BundleLoaderInner {
  loaders: RwLock<HashMap<FileType, PathBuf>>,
  frozen: AtomicBool,
}

impl BundleLoaderRegistry {
  /// The three built-in loaders, taken from the target-specific directory
  pub fn with_builtins(target: Target) -> Self {
    let registry = BundleLoaderRegistry::default();
    let dir = match target {
      Target::Node => "node",
      Target::Browser | Target::Electron => "browser",
    };

    for (ty, file) in [
      (FileType::Wasm, "wasm-loader.js"),
      (FileType::Css, "css-loader.js"),
      (FileType::Js, "js-loader.js"),
    ] {
      registry
        .inner
        .loaders
        .write()
        .insert(ty, PathBuf::from(format!("loaders/{dir}/{file}")));
    }

    registry
  }

  pub fn register(&self, ty: FileType, module_path: PathBuf) -> anyhow::Result<()> {
    if self.inner.frozen.load(Ordering::SeqCst) {
      return Err(anyhow!(
        "Cannot register bundle loader for '{}' after the worker pool has started",
        ty.extension()
      ));
    }

    self.inner.loaders.write().insert(ty, module_path);
    Ok(())
  }

  pub fn get(&self, ty: &FileType) -> Option<PathBuf> {
    self.inner.loaders.read().get(ty).cloned()
  }

  pub fn freeze(&self) {
    self.inner.frozen.store(true, Ordering::SeqCst);
  }
}
