use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use mockall::automock;

use satchel_filesystem::FileSystemRef;

use crate::types::PackageDescriptor;
use crate::types::ProcessedAsset;
use crate::types::ResolvedOptions;

/// Transformer abstraction instance
pub type TransformerRef = Arc<dyn Transformer + Send + Sync>;

/// Plain-value inputs handed to a worker; transformers read the source
/// through the file system handle and must not touch coordinator state.
#[derive(Clone)]
pub struct TransformContext {
  pub file_path: PathBuf,
  pub package: Arc<PackageDescriptor>,
  pub options: Arc<ResolvedOptions>,
  pub file_system: FileSystemRef,
}

/// Compiles a single asset and discovers its dependencies
///
/// Transformers run off the coordinator on the worker pool; the orchestration
/// core treats them as a black box producing a [`ProcessedAsset`].
#[automock]
#[async_trait]
pub trait Transformer: Debug + Send + Sync {
  async fn transform(&self, context: TransformContext) -> anyhow::Result<ProcessedAsset>;
}
