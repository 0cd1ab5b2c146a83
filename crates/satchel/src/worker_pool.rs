use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Weak;

use anyhow::Context;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use satchel_core::plugin::TransformContext;
use satchel_core::plugin::TransformerRef;
use satchel_core::types::PackageDescriptor;
use satchel_core::types::ProcessedAsset;
use satchel_core::types::ResolvedOptions;
use satchel_filesystem::FileSystemRef;

/// The pool is shared process-wide: facades acquire a handle through
/// [`WorkerPool::shared`] and the underlying state is torn down when the
/// last handle is dropped.
static SHARED_POOL: Lazy<Mutex<Weak<PoolState>>> = Lazy::new(|| Mutex::new(Weak::new()));

struct PoolState {
  semaphore: Semaphore,
  threads: usize,
}

/// Plain-value inputs for one compile; workers may not touch coordinator
/// state, so everything they need crosses here.
pub struct TransformJob {
  pub file_path: PathBuf,
  pub package: Arc<PackageDescriptor>,
  pub options: Arc<ResolvedOptions>,
  pub transformer: TransformerRef,
  pub file_system: FileSystemRef,
}

/// Fixed-size parallel executor running compiles off the coordinator
#[derive(Clone)]
pub struct WorkerPool {
  state: Arc<PoolState>,
}

impl WorkerPool {
  /// Acquire a reference-counted handle on the process-wide pool, creating
  /// it on first use. `threads` only applies to the creating acquisition.
  pub fn shared(threads: Option<usize>) -> WorkerPool {
    let mut slot = SHARED_POOL.lock();

    if let Some(state) = slot.upgrade() {
      return WorkerPool { state };
    }

    let threads = threads.unwrap_or_else(|| num_cpus::get()).max(1);
    tracing::debug!(%threads, "Starting worker pool");

    let state = Arc::new(PoolState {
      semaphore: Semaphore::new(threads),
      threads,
    });
    *slot = Arc::downgrade(&state);

    WorkerPool { state }
  }

  pub fn threads(&self) -> usize {
    self.state.threads
  }

  /// Dispatch one compile to the pool and await its result.
  ///
  /// Failures propagate with the original error (including any diagnostic
  /// with source location the transformer attached) plus the asset path.
  pub async fn run(&self, job: TransformJob) -> anyhow::Result<ProcessedAsset> {
    let _permit = self
      .state
      .semaphore
      .acquire()
      .await
      .context("Worker pool was shut down")?;

    let file_path = job.file_path.clone();
    let handle = tokio::spawn(async move {
      let context = TransformContext {
        file_path: job.file_path,
        package: job.package,
        options: job.options,
        file_system: job.file_system,
      };
      job.transformer.transform(context).await
    });

    handle
      .await
      .map_err(|err| anyhow::anyhow!("Worker panicked: {err}"))?
      .with_context(|| format!("Failed to compile {}", file_path.display()))
  }

  /// Release this handle; the pool is torn down when the last one goes.
  pub fn end(self) {
    drop(self);
  }
}

#[cfg(test)]
mod tests {
  use satchel_core::plugin::MockTransformer;
  use satchel_core::types::BundlerOptions;
  use satchel_core::types::FileType;
  use satchel_filesystem::InMemoryFileSystem;

  use super::*;

  fn job(transformer: TransformerRef) -> TransformJob {
    let options = BundlerOptions::default().resolve_with_env(PathBuf::from("/app"), None);
    TransformJob {
      file_path: PathBuf::from("/app/entry.js"),
      package: Arc::new(PackageDescriptor::default()),
      options: Arc::new(options),
      transformer,
      file_system: Arc::new(InMemoryFileSystem::default()),
    }
  }

  #[test]
  fn shared_handles_point_at_one_pool() {
    let first = WorkerPool::shared(Some(2));
    let second = WorkerPool::shared(Some(8));

    assert!(Arc::ptr_eq(&first.state, &second.state));
    assert_eq!(second.threads(), first.threads());
  }

  #[tokio::test]
  async fn run_dispatches_to_the_transformer() {
    let mut transformer = MockTransformer::new();
    transformer.expect_transform().returning(|_| {
      Ok(ProcessedAsset {
        generated: [(FileType::Js, "compiled".to_string())].into_iter().collect(),
        hash: "deadbeef".into(),
        ..ProcessedAsset::default()
      })
    });

    let pool = WorkerPool::shared(Some(2));
    let processed = pool.run(job(Arc::new(transformer))).await.unwrap();

    assert_eq!(processed.generated.get(&FileType::Js).unwrap(), "compiled");
  }

  #[tokio::test]
  async fn compile_failures_carry_the_asset_path() {
    let mut transformer = MockTransformer::new();
    transformer
      .expect_transform()
      .returning(|_| Err(anyhow::anyhow!("unexpected token")));

    let pool = WorkerPool::shared(Some(2));
    let err = pool.run(job(Arc::new(transformer))).await.unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("/app/entry.js"));
    assert!(message.contains("unexpected token"));
  }
}
