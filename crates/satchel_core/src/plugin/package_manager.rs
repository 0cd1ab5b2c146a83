use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use mockall::automock;

/// PackageManager abstraction instance
pub type PackageManagerRef = Arc<dyn PackageManager + Send + Sync>;

/// Installs missing packages when auto-install kicks in during resolution
#[automock]
pub trait PackageManager: Debug {
  fn install(&self, package_name: &str, from: &Path) -> anyhow::Result<()>;
}
