use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use satchel_core::diagnostic::CodeFrame;
use satchel_core::diagnostic::Diagnostic;
use satchel_core::hash::hash_string;
use satchel_core::plugin::get_module_parts;
use satchel_core::plugin::DelegateRef;
use satchel_core::plugin::PackageManagerRef;
use satchel_core::plugin::Resolution;
use satchel_core::plugin::ResolveError;
use satchel_core::plugin::ResolverRef;
use satchel_core::plugin::WatcherRef;
use satchel_core::types::mtime_ms;
use satchel_core::types::Asset;
use satchel_core::types::AssetId;
use satchel_core::types::Dependency;
use satchel_core::types::ProcessedAsset;
use satchel_core::types::ResolvedOptions;
use satchel_core::types::TrackedFile;
use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;

use crate::cache::CompileCache;
use crate::error::BundlerError;
use crate::plugins::AssetTypeRegistry;
use crate::registry::AssetRegistry;
use crate::worker_pool::TransformJob;
use crate::worker_pool::WorkerPool;

/// All coordinator-owned mutable build state. Mutations happen between
/// suspension points under this lock, which is never held across worker
/// awaits.
#[derive(Default)]
pub struct BuildState {
  pub registry: AssetRegistry,
  pub main_asset: Option<AssetId>,
}

/// Collaborators the loader consumes, wired up by the facade in `start()`
pub struct LoaderContext {
  pub state: Arc<Mutex<BuildState>>,
  pub resolver: ResolverRef,
  pub pool: WorkerPool,
  pub cache: Arc<CompileCache>,
  pub asset_types: AssetTypeRegistry,
  pub package_manager: PackageManagerRef,
  pub delegate: Option<DelegateRef>,
  pub watcher: Option<WatcherRef>,
  pub fs: FileSystemRef,
  pub options: Arc<ResolvedOptions>,
}

/// Recursively resolves dependencies, loads assets through the cache or the
/// worker pool, and wires graph edges into the registry.
pub struct GraphLoader {
  state: Arc<Mutex<BuildState>>,
  resolver: ResolverRef,
  pool: WorkerPool,
  cache: Arc<CompileCache>,
  asset_types: AssetTypeRegistry,
  package_manager: PackageManagerRef,
  delegate: Option<DelegateRef>,
  watcher: Option<WatcherRef>,
  fs: FileSystemRef,
  options: Arc<ResolvedOptions>,
}

impl GraphLoader {
  pub fn new(ctx: LoaderContext) -> Arc<Self> {
    Arc::new(GraphLoader {
      state: ctx.state,
      resolver: ctx.resolver,
      pool: ctx.pool,
      cache: ctx.cache,
      asset_types: ctx.asset_types,
      package_manager: ctx.package_manager,
      delegate: ctx.delegate,
      watcher: ctx.watcher,
      fs: ctx.fs,
      options: ctx.options,
    })
  }

  /// Resolve a specifier and return the registry entry for the resulting
  /// canonical path, creating and watch-subscribing it on first sight.
  pub async fn resolve_asset(&self, specifier: &str, parent: &Path) -> anyhow::Result<AssetId> {
    let resolution = self.resolver.resolve(specifier, parent).await?;
    let canonical = self
      .fs
      .canonicalize(&resolution.file_path)
      .unwrap_or(resolution.file_path);

    let mut state = self.state.lock().await;
    let (asset_id, created) = state
      .registry
      .get_or_create(canonical.clone(), resolution.package);

    if created {
      let watcher = self.watcher.clone();
      state
        .registry
        .watch(canonical, asset_id, watcher.as_deref());
    }

    Ok(asset_id)
  }

  /// Resolve, load and return a snapshot of one asset; the public
  /// `getAsset` surface of the facade.
  pub async fn get_asset(self: &Arc<Self>, name: &str, parent: &Path) -> anyhow::Result<Asset> {
    let asset_id = self.resolve_asset(name, parent).await?;
    self.process_asset(asset_id, false).await?;

    let state = self.state.lock().await;
    Ok(state.registry.asset(asset_id).clone())
  }

  /// Load one asset and, recursively, its whole dependency subtree.
  ///
  /// The `processed` flag is set before any suspension point so concurrent
  /// arrivals at a shared dependency collapse to one compile.
  pub fn process_asset(
    self: &Arc<Self>,
    asset_id: AssetId,
    is_rebuild: bool,
  ) -> BoxFuture<'static, anyhow::Result<()>> {
    let this = self.clone();

    async move {
      let (file_path, package) = {
        let mut state = this.state.lock().await;
        let Some(asset) = state.registry.get_mut(asset_id) else {
          return Ok(());
        };

        if is_rebuild {
          asset.invalidate();
        } else if asset.processed {
          return Ok(());
        }

        asset.processed = true;
        (asset.file_path.clone(), asset.package.clone())
      };

      if is_rebuild {
        this.cache.invalidate(&file_path).await;
      }

      let started = Instant::now();

      let mut processed: Option<ProcessedAsset> = None;
      if let Some(entry) = this.cache.read(&file_path).await {
        if !Asset::should_invalidate(&entry.cache_data, &this.fs) {
          tracing::debug!(path = %file_path.display(), "Compile cache hit");
          processed = Some(entry);
        }
      }

      let processed = match processed {
        Some(processed) => processed,
        None => {
          let extension = file_path
            .extension()
            .map(|ext| ext.to_string_lossy().to_string())
            .unwrap_or_default();
          let transformer = this.asset_types.get(&extension);

          let mut result = this
            .pool
            .run(TransformJob {
              file_path: file_path.clone(),
              package: package.clone(),
              options: this.options.clone(),
              transformer,
              file_system: this.fs.clone(),
            })
            .await?;

          // Record the source's own mtime so cache hits can be re-validated
          if let Ok(modified) = this.fs.modified(&file_path) {
            result.cache_data.invalidate_on_file_change.push(TrackedFile {
              path: file_path.clone(),
              mtime_ms: mtime_ms(modified),
            });
          }

          this.cache.write(&file_path, &result).await;
          result
        }
      };

      let dependencies: Vec<Dependency> = {
        let mut state = this.state.lock().await;
        let Some(asset) = state.registry.get_mut(asset_id) else {
          return Ok(());
        };

        asset.generated = processed.generated.clone();
        asset.hash = Some(if processed.hash.is_empty() {
          hash_string(file_path.to_string_lossy())
        } else {
          processed.hash.clone()
        });
        asset.cache_data = processed.cache_data.clone();
        asset.build_time = started.elapsed();

        let implicit = this
          .delegate
          .as_ref()
          .map(|delegate| delegate.get_implicit_dependencies(state.registry.asset(asset_id)))
          .unwrap_or_default();

        let dependencies: Vec<Dependency> = processed
          .dependencies
          .iter()
          .cloned()
          .chain(implicit)
          .collect();

        let asset = state.registry.asset_mut(asset_id);
        asset.dependencies.clear();
        asset.dep_assets.clear();
        for dep in &dependencies {
          asset.dependencies.insert(dep.specifier.clone(), dep.clone());
        }

        dependencies
      };

      for dep in dependencies {
        if dep.included_in_parent {
          // Edits to the inlined file retrigger the parent; no child asset
          let dep_path = this.included_dep_path(&dep.specifier, &file_path);
          let mut state = this.state.lock().await;
          let watcher = this.watcher.clone();
          state.registry.watch(dep_path, asset_id, watcher.as_deref());
          continue;
        }

        let Some(resolution) = this.resolve_dep(&dep, &file_path).await? else {
          continue;
        };

        let canonical = this
          .fs
          .canonicalize(&resolution.file_path)
          .unwrap_or(resolution.file_path);

        let child_id = {
          let mut state = this.state.lock().await;
          let (child_id, created) = state
            .registry
            .get_or_create(canonical.clone(), resolution.package);
          if created {
            let watcher = this.watcher.clone();
            state.registry.watch(canonical, child_id, watcher.as_deref());
          }
          state
            .registry
            .asset_mut(asset_id)
            .dep_assets
            .insert(dep.specifier.clone(), child_id);
          child_id
        };

        this.process_asset(child_id, false).await?;
      }

      Ok(())
    }
    .boxed()
  }

  fn included_dep_path(&self, specifier: &str, parent: &Path) -> PathBuf {
    let path = Path::new(specifier);
    let joined = if path.is_absolute() {
      path.to_path_buf()
    } else {
      parent
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .join(path)
    };
    self.fs.canonicalize(&joined).unwrap_or(joined)
  }

  /// Resolve one dependency edge, classifying failures: optional deps
  /// silently vanish, missing packages may be auto-installed, and anything
  /// surfaced is enriched with a code frame when the declaration site is
  /// known.
  async fn resolve_dep(
    &self,
    dep: &Dependency,
    parent_path: &Path,
  ) -> anyhow::Result<Option<Resolution>> {
    let err = match self.resolver.resolve(&dep.specifier, parent_path).await {
      Ok(resolution) => return Ok(Some(resolution)),
      Err(err) => err,
    };

    let not_found = matches!(
      err.downcast_ref::<ResolveError>(),
      Some(ResolveError::NotFound { .. })
    );
    if !not_found {
      return Err(self.throw_dep_error(err, dep, parent_path));
    }

    if dep.is_local_specifier() {
      if dep.optional {
        return Ok(None);
      }

      let absolute = self.local_dep_path(&dep.specifier, parent_path);
      let err = anyhow!(BundlerError::ResolveNotFound {
        specifier: dep.specifier.clone(),
        from: absolute,
      });
      return Err(self.throw_dep_error(err, dep, parent_path));
    }

    let inside_node_modules = parent_path
      .components()
      .any(|component| component.as_os_str() == "node_modules");

    if self.options.autoinstall && !self.options.production && !inside_node_modules {
      let (module, _) = get_module_parts(&dep.specifier);
      tracing::info!(%module, "Installing missing dependency");

      if let Err(install_err) = self.package_manager.install(&module, parent_path) {
        return Err(anyhow!(BundlerError::InstallFailed {
          module,
          reason: format!("{install_err:#}"),
        }));
      }

      match self.resolver.resolve(&dep.specifier, parent_path).await {
        Ok(resolution) => return Ok(Some(resolution)),
        Err(retry_err) => {
          if dep.optional {
            return Ok(None);
          }
          return Err(self.throw_dep_error(retry_err, dep, parent_path));
        }
      }
    }

    if dep.optional {
      return Ok(None);
    }

    Err(self.throw_dep_error(err, dep, parent_path))
  }

  fn local_dep_path(&self, specifier: &str, parent_path: &Path) -> PathBuf {
    let joined = if let Some(rooted) = specifier.strip_prefix('~') {
      self
        .options
        .project_root
        .join(rooted.strip_prefix('/').unwrap_or(rooted))
    } else if let Some(rooted) = specifier.strip_prefix('/') {
      self.options.project_root.join(rooted)
    } else {
      parent_path
        .parent()
        .unwrap_or_else(|| Path::new("/"))
        .join(specifier)
    };
    self.fs.canonicalize(&joined).unwrap_or(joined)
  }

  /// Attach a code-frame-annotated message when the declaration site is
  /// known, then surface the error.
  fn throw_dep_error(
    &self,
    err: anyhow::Error,
    dep: &Dependency,
    parent_path: &Path,
  ) -> anyhow::Error {
    let Some(loc) = dep.loc else {
      return err;
    };
    let Ok(code) = self.fs.read_to_string(parent_path) else {
      return err;
    };

    let frame = CodeFrame::new(code, Some(parent_path.to_path_buf()), loc);
    anyhow::Error::new(Diagnostic::new(format!("{err:#}")).with_code_frame(frame))
  }
}
