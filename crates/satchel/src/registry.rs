use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use satchel_core::plugin::Watcher;
use satchel_core::types::Asset;
use satchel_core::types::AssetId;
use satchel_core::types::PackageDescriptor;

/// Deduplicating owner of every `Asset` record, keyed by canonical path.
///
/// Bundles and dependency descriptors refer to assets by `AssetId` only.
/// The registry also tracks which asset subscribes to which watched path:
/// a path stays watched while any asset references it, and the last
/// unsubscribe removes the underlying watcher subscription.
#[derive(Default)]
pub struct AssetRegistry {
  assets: HashMap<AssetId, Asset>,
  by_path: HashMap<PathBuf, AssetId>,
  watched: HashMap<PathBuf, HashSet<AssetId>>,
  next_id: AssetId,
}

impl AssetRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.assets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assets.is_empty()
  }

  pub fn get(&self, id: AssetId) -> Option<&Asset> {
    self.assets.get(&id)
  }

  pub fn get_mut(&mut self, id: AssetId) -> Option<&mut Asset> {
    self.assets.get_mut(&id)
  }

  pub fn asset(&self, id: AssetId) -> &Asset {
    self.assets.get(&id).expect("Missing asset for id")
  }

  pub fn asset_mut(&mut self, id: AssetId) -> &mut Asset {
    self.assets.get_mut(&id).expect("Missing asset for id")
  }

  pub fn by_path(&self, path: &Path) -> Option<AssetId> {
    self.by_path.get(path).copied()
  }

  pub fn ids(&self) -> Vec<AssetId> {
    self.assets.keys().copied().collect()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Asset> {
    self.assets.values()
  }

  /// Return the existing entry for a canonical path or create a new one.
  /// Idempotent per path: the same identity comes back on repeated calls.
  pub fn get_or_create(
    &mut self,
    file_path: PathBuf,
    package: Arc<PackageDescriptor>,
  ) -> (AssetId, bool) {
    if let Some(id) = self.by_path.get(&file_path) {
      return (*id, false);
    }

    let id = self.next_id;
    self.next_id += 1;

    self.by_path.insert(file_path.clone(), id);
    self.assets.insert(id, Asset::new(id, file_path, package));

    (id, true)
  }

  /// Subscribe `subscriber` to changes of `path`. The underlying watcher is
  /// only engaged the first time a path gains a subscriber.
  pub fn watch(&mut self, path: PathBuf, subscriber: AssetId, watcher: Option<&(dyn Watcher + Send + Sync)>) {
    let subscribers = self.watched.entry(path.clone()).or_default();
    let newly_watched = subscribers.is_empty();
    subscribers.insert(subscriber);

    if newly_watched {
      if let Some(watcher) = watcher {
        if let Err(err) = watcher.watch(&path) {
          tracing::warn!("Failed to watch {}: {err}", path.display());
        }
      }
    }
  }

  /// Drop one subscription; the last unwatch removes the underlying
  /// watcher subscription.
  pub fn unwatch(&mut self, path: &Path, subscriber: AssetId, watcher: Option<&(dyn Watcher + Send + Sync)>) {
    let Some(subscribers) = self.watched.get_mut(path) else {
      return;
    };

    subscribers.remove(&subscriber);
    if subscribers.is_empty() {
      self.watched.remove(path);
      if let Some(watcher) = watcher {
        if let Err(err) = watcher.unwatch(path) {
          tracing::warn!("Failed to unwatch {}: {err}", path.display());
        }
      }
    }
  }

  pub fn subscribers(&self, path: &Path) -> Vec<AssetId> {
    self
      .watched
      .get(path)
      .map(|subscribers| subscribers.iter().copied().collect())
      .unwrap_or_default()
  }

  /// Remove an asset and every watch subscription it holds
  pub fn unload(&mut self, id: AssetId, watcher: Option<&(dyn Watcher + Send + Sync)>) -> Option<Asset> {
    let asset = self.assets.remove(&id)?;
    self.by_path.remove(&asset.file_path);

    let paths: Vec<PathBuf> = self
      .watched
      .iter()
      .filter(|(_, subscribers)| subscribers.contains(&id))
      .map(|(path, _)| path.clone())
      .collect();

    for path in paths {
      self.unwatch(&path, id, watcher);
    }

    Some(asset)
  }
}
