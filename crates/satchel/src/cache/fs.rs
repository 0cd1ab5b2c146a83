use std::path::Path;
use std::path::PathBuf;

use satchel_core::hash::hash_string;
use satchel_core::types::ProcessedAsset;
use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;

/// On-disk cache: one JSON entry per asset under the cache directory, named
/// by the xxh3 of the canonical path so keys stay filename-safe.
pub struct FsCache {
  cache_dir: PathBuf,
  fs: FileSystemRef,
}

impl FsCache {
  pub fn new(cache_dir: PathBuf, fs: FileSystemRef) -> Self {
    FsCache { cache_dir, fs }
  }

  fn entry_path(&self, path: &Path) -> PathBuf {
    self
      .cache_dir
      .join(format!("{}.json", hash_string(path.to_string_lossy())))
  }

  pub async fn read(&self, path: &Path) -> anyhow::Result<Option<ProcessedAsset>> {
    let entry = self.entry_path(path);
    if !self.fs.is_file(&entry) {
      return Ok(None);
    }

    let contents = self.fs.read(&entry)?;
    Ok(Some(serde_json::from_slice(&contents)?))
  }

  pub async fn write(&self, path: &Path, processed: &ProcessedAsset) -> anyhow::Result<()> {
    self.fs.create_dir_all(&self.cache_dir)?;
    let contents = serde_json::to_vec(processed)?;
    self.fs.write(&self.entry_path(path), &contents)?;
    Ok(())
  }

  pub async fn invalidate(&self, path: &Path) -> anyhow::Result<()> {
    let entry = self.entry_path(path);
    if self.fs.is_file(&entry) {
      self.fs.remove_file(&entry)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use satchel_core::types::FileType;
  use satchel_filesystem::InMemoryFileSystem;

  use super::*;

  #[tokio::test]
  async fn entries_survive_under_the_cache_dir() {
    let fs = Arc::new(InMemoryFileSystem::default());
    let cache = FsCache::new(PathBuf::from("/app/.cache"), fs.clone());
    let path = Path::new("/app/entry.js");

    let processed = ProcessedAsset {
      generated: [(FileType::Js, "code".to_string())].into_iter().collect(),
      hash: "0123abcd".into(),
      ..ProcessedAsset::default()
    };

    cache.write(path, &processed).await.unwrap();
    assert_eq!(cache.read(path).await.unwrap(), Some(processed));

    // A second cache over the same directory sees the same entry
    let reopened = FsCache::new(PathBuf::from("/app/.cache"), fs);
    assert!(reopened.read(path).await.unwrap().is_some());

    reopened.invalidate(path).await.unwrap();
    assert_eq!(reopened.read(path).await.unwrap(), None);
  }
}
