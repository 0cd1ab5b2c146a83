use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "camelCase")]
pub enum WatchEvent {
  Create(PathBuf),
  Update(PathBuf),
  Delete(PathBuf),
}

impl WatchEvent {
  pub fn path(&self) -> &Path {
    match self {
      WatchEvent::Create(path) | WatchEvent::Update(path) | WatchEvent::Delete(path) => path,
    }
  }
}

pub type WatcherRef = Arc<dyn Watcher + Send + Sync>;

/// File-watch subscription surface consumed by the asset registry.
///
/// Implementations deliver [`WatchEvent`]s through the channel they were
/// constructed with; the registry only manages which paths are subscribed.
#[automock]
pub trait Watcher: Send + Sync {
  fn watch(&self, path: &Path) -> anyhow::Result<()>;
  fn unwatch(&self, path: &Path) -> anyhow::Result<()>;
  fn close(&self);
}
