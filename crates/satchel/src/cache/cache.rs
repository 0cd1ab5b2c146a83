use std::path::Path;

use satchel_core::types::ProcessedAsset;

use super::FsCache;
use super::InMemoryCache;

/// Persistent store of compile results, keyed by canonical asset path.
///
/// The cache has no knowledge of transform options or upstream mtimes, so
/// callers must double-check freshness via `Asset::should_invalidate` before
/// trusting a hit. Write durability is fire-and-forget: failures are logged,
/// never fatal.
pub enum CompileCache {
  Disabled,
  InMemory(InMemoryCache),
  Fs(FsCache),
}

impl CompileCache {
  pub async fn read(&self, path: &Path) -> Option<ProcessedAsset> {
    let result = match self {
      CompileCache::Disabled => return None,
      CompileCache::InMemory(cache) => cache.read(path).await,
      CompileCache::Fs(cache) => cache.read(path).await,
    };

    match result {
      Ok(entry) => entry,
      Err(err) => {
        tracing::warn!("Failed to read cache entry for {}: {err}", path.display());
        None
      }
    }
  }

  pub async fn write(&self, path: &Path, processed: &ProcessedAsset) {
    let result = match self {
      CompileCache::Disabled => return,
      CompileCache::InMemory(cache) => cache.write(path, processed).await,
      CompileCache::Fs(cache) => cache.write(path, processed).await,
    };

    if let Err(err) = result {
      tracing::warn!("Failed to write cache entry for {}: {err}", path.display());
    }
  }

  pub async fn invalidate(&self, path: &Path) {
    let result = match self {
      CompileCache::Disabled => return,
      CompileCache::InMemory(cache) => cache.invalidate(path).await,
      CompileCache::Fs(cache) => cache.invalidate(path).await,
    };

    if let Err(err) = result {
      tracing::warn!(
        "Failed to invalidate cache entry for {}: {err}",
        path.display()
      );
    }
  }
}
