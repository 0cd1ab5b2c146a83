use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::RwLock;

use satchel_core::types::FileType;
use satchel_core::plugin::PackagerRef;
use satchel_core::plugin::TransformerRef;

use super::RawTransformer;

/// Extension-keyed transformer registry.
///
/// Types with no registered transformer fall back to the raw transformer,
/// which hashes the file without producing generated output; the bundle-tree
/// builder then emits such assets through an opaque bundle.
#[derive(Clone)]
pub struct AssetTypeRegistry {
  inner: Arc<AssetTypeInner>,
}

struct AssetTypeInner {
  transformers: RwLock<HashMap<String, TransformerRef>>,
  fallback: TransformerRef,
  frozen: AtomicBool,
}

impl Default for AssetTypeRegistry {
  fn default() -> Self {
    AssetTypeRegistry {
      inner: Arc::new(AssetTypeInner {
        transformers: RwLock::new(HashMap::new()),
        fallback: Arc::new(RawTransformer::default()),
        frozen: AtomicBool::new(false),
      }),
    }
  }
}

impl AssetTypeRegistry {
  pub fn register(&self, extension: &str, transformer: TransformerRef) -> anyhow::Result<()> {
    if self.inner.frozen.load(Ordering::SeqCst) {
      return Err(anyhow!(
        "Cannot register asset type '{extension}' after the worker pool has started"
      ));
    }

    self
      .inner
      .transformers
      .write()
      .insert(extension.to_string(), transformer);
    Ok(())
  }

  pub fn get(&self, extension: &str) -> TransformerRef {
    self
      .inner
      .transformers
      .read()
      .get(extension)
      .cloned()
      .unwrap_or_else(|| self.inner.fallback.clone())
  }

  pub fn has(&self, extension: &str) -> bool {
    self.inner.transformers.read().contains_key(extension)
  }

  /// Called when the worker pool starts; registrations fail afterwards
  pub fn freeze(&self) {
    self.inner.frozen.store(true, Ordering::SeqCst);
  }
}

/// Type-keyed packager registry
#[derive(Clone, Default)]
pub struct PackagerRegistry {
  inner: Arc<PackagerInner>,
}

#[derive(Default)]
struct PackagerInner {
  packagers: RwLock<HashMap<FileType, PackagerRef>>,
  frozen: AtomicBool,
}

impl PackagerRegistry {
  pub fn add(&self, ty: FileType, packager: PackagerRef) -> anyhow::Result<()> {
    if self.inner.frozen.load(Ordering::SeqCst) {
      return Err(anyhow!(
        "Cannot register packager for '{}' after the worker pool has started",
        ty.extension()
      ));
    }

    self.inner.packagers.write().insert(ty, packager);
    Ok(())
  }

  pub fn has(&self, ty: &FileType) -> bool {
    self.inner.packagers.read().contains_key(ty)
  }

  pub fn get(&self, ty: &FileType) -> Option<PackagerRef> {
    self.inner.packagers.read().get(ty).cloned()
  }

  pub fn freeze(&self) {
    self.inner.frozen.store(true, Ordering::SeqCst);
  }
}
