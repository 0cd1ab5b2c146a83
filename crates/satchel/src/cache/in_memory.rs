use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use tokio::sync::RwLock;

use satchel_core::types::ProcessedAsset;

#[derive(Default)]
pub struct InMemoryCache {
  store: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryCache {
  pub async fn read(&self, path: &Path) -> anyhow::Result<Option<ProcessedAsset>> {
    Ok(match self.store.read().await.get(path) {
      Some(bytes) => Some(bincode::deserialize(bytes)?),
      None => None,
    })
  }

  pub async fn write(&self, path: &Path, processed: &ProcessedAsset) -> anyhow::Result<()> {
    let bytes = bincode::serialize(processed)?;
    self.store.write().await.insert(path.to_path_buf(), bytes);
    Ok(())
  }

  pub async fn invalidate(&self, path: &Path) -> anyhow::Result<()> {
    self.store.write().await.remove(path);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use satchel_core::types::Dependency;
  use satchel_core::types::FileType;

  use super::*;

  #[tokio::test]
  async fn stores_and_invalidates_entries() {
    let cache = InMemoryCache::default();
    let path = Path::new("/app/entry.js");
    let processed = ProcessedAsset {
      generated: [(FileType::Js, "code".to_string())].into_iter().collect(),
      hash: "cafebabe".into(),
      dependencies: vec![Dependency::new("./a.js")],
      ..ProcessedAsset::default()
    };

    cache.write(path, &processed).await.unwrap();
    assert_eq!(cache.read(path).await.unwrap(), Some(processed));

    cache.invalidate(path).await.unwrap();
    assert_eq!(cache.read(path).await.unwrap(), None);
  }
}
