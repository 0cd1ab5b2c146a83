use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::types::PackageDescriptor;

/// Resolver abstraction instance
pub type ResolverRef = Arc<dyn Resolver + Send + Sync>;

/// A successfully resolved specifier
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resolution {
  /// An absolute path to the resolved file
  pub file_path: PathBuf,

  /// The package the resolved file belongs to
  pub package: Arc<PackageDescriptor>,
}

/// Classified resolution failures; the graph loader downcasts to these when
/// deciding whether to auto-install, skip an optional dep, or surface an
/// enriched error.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
  #[error("Cannot find module '{specifier}' from '{from}'")]
  NotFound { specifier: String, from: PathBuf },

  #[error("Ambiguous specifier '{specifier}' from '{from}'")]
  Ambiguous { specifier: String, from: PathBuf },
}

/// Converts a dependency specifier into a file path that will be compiled
#[async_trait]
pub trait Resolver: Debug + Send + Sync {
  /// Determines what the dependency specifier resolves to
  async fn resolve(&self, specifier: &str, parent: &Path) -> anyhow::Result<Resolution>;
}

/// Split a package specifier into its module name and optional subpath,
/// honoring scoped package names.
pub fn get_module_parts(specifier: &str) -> (String, Option<String>) {
  let mut parts = specifier.splitn(3, '/');

  let first = parts.next().unwrap_or_default();
  let module = if first.starts_with('@') {
    match parts.next() {
      Some(second) => format!("{}/{}", first, second),
      None => first.to_string(),
    }
  } else {
    first.to_string()
  };

  let subpath = specifier
    .strip_prefix(&module)
    .and_then(|rest| rest.strip_prefix('/'))
    .filter(|rest| !rest.is_empty())
    .map(String::from);

  (module, subpath)
}
