use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use satchel_filesystem::FileSystemRef;

use crate::types::FileType;
use crate::types::ResolvedOptions;

/// Packager abstraction instance
pub type PackagerRef = Arc<dyn Packager + Send + Sync>;

/// The generated output of one member asset, in bundle order
#[derive(Clone, Debug)]
pub struct PackagedSource {
  pub file_path: PathBuf,
  pub contents: String,
}

pub struct PackageContext {
  pub bundle_name: String,
  pub bundle_type: FileType,
  pub sources: Vec<PackagedSource>,
  /// Set for opaque bundles emitted without a type packager
  pub entry_path: Option<PathBuf>,
  pub options: Arc<ResolvedOptions>,
  pub file_system: FileSystemRef,
}

pub struct PackagedBundle {
  pub contents: Vec<u8>,
}

/// Combines all the assets in a bundle together into an output artifact
///
/// Packagers are also responsible for separating members so concatenation is
/// well-formed for their type.
#[async_trait]
pub trait Packager: Debug + Send + Sync {
  async fn package(&self, ctx: PackageContext) -> anyhow::Result<PackagedBundle>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug)]
  struct TestPackager {}

  #[async_trait]
  impl Packager for TestPackager {
    async fn package(&self, _ctx: PackageContext) -> anyhow::Result<PackagedBundle> {
      todo!()
    }
  }

  #[test]
  fn can_be_dyn() {
    let _packager: Box<dyn Packager> = Box::new(TestPackager {});
  }
}
