use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;

use satchel_core::plugin::DelegateRef;
use satchel_core::plugin::PackageManagerRef;
use satchel_core::plugin::PackagerRef;
use satchel_core::plugin::ResolverRef;
use satchel_core::plugin::TransformerRef;
use satchel_core::plugin::WatchEvent;
use satchel_core::plugin::WatcherRef;
use satchel_core::types::Asset;
use satchel_core::types::AssetId;
use satchel_core::types::BundlerOptions;
use satchel_core::types::FileType;
use satchel_core::types::ResolvedOptions;
use satchel_dev_server::LiveReloadServer;
use satchel_dev_server::Router;
use satchel_dev_server::ServerHandle;
use satchel_dev_server::UpdatedAsset;
use satchel_filesystem::FileSystem;
use satchel_filesystem::FileSystemRef;
use satchel_filesystem::OsFileSystem;

use crate::build_queue::BuildQueue;
use crate::bundle_tree::BundleTree;
use crate::cache::CompileCache;
use crate::cache::FsCache;
use crate::error::BundlerError;
use crate::events::BundlerEvent;
use crate::events::EventEmitter;
use crate::graph_loader::BuildState;
use crate::graph_loader::GraphLoader;
use crate::graph_loader::LoaderContext;
use crate::plugins::AssetTypeRegistry;
use crate::plugins::BundleLoaderRegistry;
use crate::plugins::CssPackager;
use crate::plugins::CssTransformer;
use crate::plugins::JsPackager;
use crate::plugins::JsTransformer;
use crate::plugins::NpmInstaller;
use crate::plugins::PackagerRegistry;
use crate::plugins::PathResolver;
use crate::rebuild::run_rebuild_loop;
use crate::watcher::NotifyWatcher;
use crate::worker_pool::WorkerPool;

/// Collaborator overrides for embedding and tests; unset fields get the
/// OS-backed defaults.
#[derive(Default)]
pub struct BundlerInit {
  pub fs: Option<FileSystemRef>,
  pub resolver: Option<ResolverRef>,
  pub package_manager: Option<PackageManagerRef>,
  pub cache: Option<CompileCache>,
  pub delegate: Option<DelegateRef>,
  pub watcher: Option<WatcherRef>,
  pub watch_events: Option<UnboundedReceiver<WatchEvent>>,
}

/// Handles acquired by `start()` and released by `stop()`
#[derive(Default)]
struct RuntimeState {
  pool: Option<WorkerPool>,
  loader: Option<Arc<GraphLoader>>,
  watcher: Option<WatcherRef>,
  live_reload: Option<LiveReloadServer>,
  rebuild_task: Option<tokio::task::JoinHandle<()>>,
  server: Option<ServerHandle>,
  ready_txs: Vec<tokio::sync::watch::Sender<bool>>,
  initial_built: bool,
}

struct BundlerInner {
  entry: PathBuf,
  options: Arc<ResolvedOptions>,
  fs: FileSystemRef,
  resolver: ResolverRef,
  package_manager: PackageManagerRef,
  delegate: Option<DelegateRef>,
  asset_types: AssetTypeRegistry,
  packagers: PackagerRegistry,
  bundle_loaders: BundleLoaderRegistry,
  cache: Arc<CompileCache>,
  state: Arc<Mutex<BuildState>>,
  queue: Arc<BuildQueue>,
  events: EventEmitter,
  /// Serializes build passes: re-entries wait for `build_end`, then retry
  build_lock: Mutex<()>,
  pending: AtomicBool,
  errored: AtomicBool,
  started: AtomicBool,
  runtime: parking_lot::Mutex<RuntimeState>,
  injected_watcher: Option<WatcherRef>,
  injected_watch_events: parking_lot::Mutex<Option<UnboundedReceiver<WatchEvent>>>,
  bundle_hashes: parking_lot::Mutex<HashMap<String, String>>,
  name_map: parking_lot::Mutex<HashMap<String, String>>,
  last_update: parking_lot::Mutex<Vec<UpdatedAsset>>,
  last_tree: parking_lot::Mutex<Option<Arc<BundleTree>>>,
}

/// The public bundler surface: ties the worker pool, cache, registry,
/// queue, graph loader and bundle-tree builder together and emits
/// `bundled` / `build_end` lifecycle events.
#[derive(Clone)]
pub struct Bundler {
  inner: Arc<BundlerInner>,
}

impl Bundler {
  pub fn new(
    entry: impl Into<PathBuf>,
    options: BundlerOptions,
    init: BundlerInit,
  ) -> anyhow::Result<Bundler> {
    let fs: FileSystemRef = init.fs.unwrap_or_else(|| Arc::new(OsFileSystem));
    let project_root = fs.cwd()?;
    let options = Arc::new(options.resolve(project_root.clone()));

    let entry: PathBuf = entry.into();
    let entry = if entry.is_absolute() {
      entry
    } else {
      project_root.join(entry)
    };

    let resolver: ResolverRef = init
      .resolver
      .unwrap_or_else(|| Arc::new(PathResolver::new(fs.clone(), project_root.clone())));
    let package_manager: PackageManagerRef = init
      .package_manager
      .unwrap_or_else(|| Arc::new(NpmInstaller::new(project_root)));

    let cache = Arc::new(init.cache.unwrap_or_else(|| {
      if options.cache {
        CompileCache::Fs(FsCache::new(options.cache_dir.clone(), fs.clone()))
      } else {
        CompileCache::Disabled
      }
    }));

    let asset_types = AssetTypeRegistry::default();
    for ext in ["js", "mjs", "cjs", "jsx", "ts", "tsx"] {
      asset_types.register(ext, Arc::new(JsTransformer::default()))?;
    }
    asset_types.register("css", Arc::new(CssTransformer::default()))?;

    let packagers = PackagerRegistry::default();
    packagers.add(FileType::Js, Arc::new(JsPackager::default()))?;
    packagers.add(FileType::Css, Arc::new(CssPackager::default()))?;

    let bundle_loaders = BundleLoaderRegistry::with_builtins(options.target);

    let threads = options.threads.unwrap_or_else(num_cpus::get).max(1);

    Ok(Bundler {
      inner: Arc::new(BundlerInner {
        entry,
        options,
        fs,
        resolver,
        package_manager,
        delegate: init.delegate,
        asset_types,
        packagers,
        bundle_loaders,
        cache,
        state: Arc::new(Mutex::new(BuildState::default())),
        queue: Arc::new(BuildQueue::new(threads)),
        events: EventEmitter::default(),
        build_lock: Mutex::new(()),
        pending: AtomicBool::new(false),
        errored: AtomicBool::new(false),
        started: AtomicBool::new(false),
        runtime: parking_lot::Mutex::new(RuntimeState::default()),
        injected_watcher: init.watcher,
        injected_watch_events: parking_lot::Mutex::new(init.watch_events),
        bundle_hashes: parking_lot::Mutex::new(HashMap::new()),
        name_map: parking_lot::Mutex::new(HashMap::new()),
        last_update: parking_lot::Mutex::new(Vec::new()),
        last_tree: parking_lot::Mutex::new(None),
      }),
    })
  }

  pub fn options(&self) -> &ResolvedOptions {
    &self.inner.options
  }

  pub fn on(&self, listener: impl Fn(&BundlerEvent) + Send + Sync + 'static) {
    self.inner.events.on(listener);
  }

  pub fn pending(&self) -> bool {
    self.inner.pending.load(Ordering::SeqCst)
  }

  pub fn errored(&self) -> bool {
    self.inner.errored.load(Ordering::SeqCst)
  }

  pub fn bundle_hashes(&self) -> HashMap<String, String> {
    self.inner.bundle_hashes.lock().clone()
  }

  pub fn name_map(&self) -> HashMap<String, String> {
    self.inner.name_map.lock().clone()
  }

  /// The update delta of the most recent build pass
  pub fn last_update(&self) -> Vec<UpdatedAsset> {
    self.inner.last_update.lock().clone()
  }

  pub fn last_tree(&self) -> Option<Arc<BundleTree>> {
    self.inner.last_tree.lock().clone()
  }

  /// Register a transformer for an extension. Fails once the worker pool
  /// has started.
  pub fn add_asset_type(&self, extension: &str, transformer: TransformerRef) -> anyhow::Result<()> {
    self.inner.asset_types.register(extension, transformer)
  }

  /// Register a packager for a bundle type. Fails once the worker pool has
  /// started.
  pub fn add_packager(&self, ty: FileType, packager: PackagerRef) -> anyhow::Result<()> {
    self.inner.packagers.add(ty, packager)
  }

  /// Register a runtime bundle loader module. Fails once the worker pool
  /// has started.
  pub fn add_bundle_loader(&self, ty: FileType, module_path: PathBuf) -> anyhow::Result<()> {
    self.inner.bundle_loaders.register(ty, module_path)
  }

  /// Resolve and load one asset through the public surface
  pub async fn get_asset(&self, name: &str, parent: Option<&Path>) -> anyhow::Result<Asset> {
    self.start().await?;
    let loader = self.loader()?;
    let default_parent = self.inner.entry.clone();
    loader.get_asset(name, parent.unwrap_or(&default_parent)).await
  }

  /// Acquire the worker pool, watcher and live-reload server. Idempotent;
  /// called lazily by the first `bundle()`.
  pub async fn start(&self) -> anyhow::Result<()> {
    if self.inner.started.swap(true, Ordering::SeqCst) {
      return Ok(());
    }

    self.inner.asset_types.freeze();
    self.inner.packagers.freeze();
    self.inner.bundle_loaders.freeze();

    let options = &self.inner.options;
    let pool = WorkerPool::shared(options.threads);

    let (watcher, watch_events) = if options.watch {
      match (
        self.inner.injected_watcher.clone(),
        self.inner.injected_watch_events.lock().take(),
      ) {
        (Some(watcher), events) => (Some(watcher), events),
        (None, _) => {
          let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
          let watcher: WatcherRef = Arc::new(NotifyWatcher::new(tx)?);
          (Some(watcher), Some(rx))
        }
      }
    } else {
      (None, None)
    };

    let live_reload = if options.hmr {
      Some(LiveReloadServer::start(options.hmr_port).await?)
    } else {
      None
    };

    let loader = GraphLoader::new(LoaderContext {
      state: self.inner.state.clone(),
      resolver: self.inner.resolver.clone(),
      pool: pool.clone(),
      cache: self.inner.cache.clone(),
      asset_types: self.inner.asset_types.clone(),
      package_manager: self.inner.package_manager.clone(),
      delegate: self.inner.delegate.clone(),
      watcher: watcher.clone(),
      fs: self.inner.fs.clone(),
      options: self.inner.options.clone(),
    });

    let rebuild_task = watch_events.map(|events| {
      let weak = Arc::downgrade(&self.inner);
      tokio::spawn(run_rebuild_loop(
        events,
        self.inner.state.clone(),
        self.inner.queue.clone(),
        move || {
          let weak = weak.clone();
          Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
              return;
            };
            if let Err(err) = (Bundler { inner }).bundle().await {
              tracing::error!("Rebuild failed: {err:#}");
            }
          }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        },
      ))
    });

    let mut runtime = self.inner.runtime.lock();
    runtime.pool = Some(pool);
    runtime.loader = Some(loader);
    runtime.watcher = watcher;
    runtime.live_reload = live_reload;
    runtime.rebuild_task = rebuild_task;

    Ok(())
  }

  /// Release the pool, watcher, live-reload and dev server handles
  pub fn stop(&self) {
    let mut runtime = self.inner.runtime.lock();

    if let Some(task) = runtime.rebuild_task.take() {
      task.abort();
    }
    if let Some(watcher) = runtime.watcher.take() {
      watcher.close();
    }
    if let Some(live_reload) = runtime.live_reload.take() {
      live_reload.stop();
    }
    if let Some(server) = runtime.server.take() {
      server.stop();
    }
    runtime.loader = None;
    if let Some(pool) = runtime.pool.take() {
      pool.end();
    }

    self.inner.started.store(false, Ordering::SeqCst);
  }

  fn loader(&self) -> anyhow::Result<Arc<GraphLoader>> {
    self
      .inner
      .runtime
      .lock()
      .loader
      .clone()
      .ok_or_else(|| anyhow!(BundlerError::InternalInvariant("loader not started".into())))
  }

  /// Run one build pass: load the graph, rebuild the bundle tree, rewrite
  /// references, package, and unload orphans.
  ///
  /// Only one pass is ever in flight; concurrent calls wait for the active
  /// pass to end and then run. In watch mode a failed pass resolves to
  /// `None` and the watcher continues; otherwise the error propagates.
  pub async fn bundle(&self) -> anyhow::Result<Option<Arc<BundleTree>>> {
    let _guard = self.inner.build_lock.lock().await;
    self.inner.pending.store(true, Ordering::SeqCst);
    self.inner.errored.store(false, Ordering::SeqCst);

    let result = self.bundle_inner().await;

    if let Err(err) = &result {
      self.inner.errored.store(true, Ordering::SeqCst);
      tracing::error!("Build failed: {err:#}");
      let runtime = self.inner.runtime.lock();
      if let Some(live_reload) = &runtime.live_reload {
        live_reload.emit_error(format!("{err:#}"));
      }
    }

    self.inner.pending.store(false, Ordering::SeqCst);
    self.inner.events.emit(&BundlerEvent::BuildEnd);

    if !self.inner.options.watch && self.inner.options.kill_workers {
      self.stop();
    }

    match result {
      Ok(tree) => Ok(Some(tree)),
      Err(err) => {
        let options = &self.inner.options;
        let live_reload_active = self.inner.runtime.lock().live_reload.is_some();

        if options.production || !options.watch {
          Err(err)
        } else if options.is_test_env() && !live_reload_active {
          Err(err)
        } else {
          // Development watch mode: fail gracefully, keep watching
          Ok(None)
        }
      }
    }
  }

  async fn bundle_inner(&self) -> anyhow::Result<Arc<BundleTree>> {
    self.start().await?;
    let loader = self.loader()?;
    self.notify_build_started();

    let initial = { self.inner.state.lock().await.main_asset.is_none() };
    if initial {
      self.inner.fs.create_dir_all(&self.inner.options.out_dir)?;

      let entry = self.inner.entry.to_string_lossy().to_string();
      let resolve_from = self.inner.options.project_root.join("index");
      let main_asset = loader.resolve_asset(&entry, &resolve_from).await?;

      self.inner.state.lock().await.main_asset = Some(main_asset);
      self.inner.queue.add(main_asset, false);
    }

    let drained = self
      .inner
      .queue
      .run({
        let loader = loader.clone();
        move |asset_id, is_rebuild| loader.process_asset(asset_id, is_rebuild)
      })
      .await?;

    let mut state = self.inner.state.lock().await;
    let main_asset = state
      .main_asset
      .ok_or_else(|| anyhow!(BundlerError::InternalInvariant("no main asset".into())))?;

    // Assets the previous tree pass left unplaced, plus everything loaded
    // in this drain
    let mut changed: HashSet<AssetId> = state
      .registry
      .iter()
      .filter(|asset| asset.parent_bundle.is_none())
      .map(|asset| asset.id)
      .collect();
    changed.extend(drained);

    for asset_id in state.registry.ids() {
      state.registry.asset_mut(asset_id).invalidate_bundle();
    }

    let tree = BundleTree::build(
      &mut state.registry,
      &self.inner.packagers,
      main_asset,
      self.inner.options.out_file.as_deref(),
    );

    let name_map = tree.bundle_name_map(&state.registry, self.inner.options.content_hash);
    for asset_id in &changed {
      if let Some(asset) = state.registry.get_mut(*asset_id) {
        asset.replace_bundle_names(&name_map);
      }
    }

    let updated: Vec<UpdatedAsset> = changed
      .iter()
      .filter_map(|asset_id| state.registry.get(*asset_id))
      .map(|asset| UpdatedAsset {
        path: asset.file_path.clone(),
        output: asset
          .generated
          .iter()
          .map(|(ty, contents)| (ty.extension().to_string(), contents.clone()))
          .collect(),
        hash: asset.hash.clone(),
      })
      .collect();
    *self.inner.last_update.lock() = updated.clone();

    if !initial {
      let runtime = self.inner.runtime.lock();
      if let Some(live_reload) = &runtime.live_reload {
        live_reload.emit_update(updated);
      }
    }

    let prev_hashes = self.inner.bundle_hashes.lock().clone();
    let new_hashes = tree
      .package(
        &state.registry,
        &self.inner.packagers,
        &self.inner.fs,
        &self.inner.options,
        &name_map,
        &prev_hashes,
      )
      .await?;
    *self.inner.bundle_hashes.lock() = new_hashes;
    *self.inner.name_map.lock() = name_map;

    // Unload assets the tree pass no longer reaches
    let orphaned: Vec<AssetId> = state
      .registry
      .iter()
      .filter(|asset| asset.parent_bundle.is_none())
      .map(|asset| asset.id)
      .collect();
    if !orphaned.is_empty() {
      let watcher = self.inner.runtime.lock().watcher.clone();
      for asset_id in orphaned {
        if let Some(asset) = state.registry.unload(asset_id, watcher.as_deref()) {
          tracing::debug!(path = %asset.file_path.display(), "Unloaded orphaned asset");
        }
      }
    }

    drop(state);

    let tree = Arc::new(tree);
    *self.inner.last_tree.lock() = Some(tree.clone());
    self.inner.events.emit(&BundlerEvent::Bundled(tree.clone()));
    self.notify_build_finished();

    Ok(tree)
  }

  fn notify_build_started(&self) {
    let runtime = self.inner.runtime.lock();
    if let Some(server) = &runtime.server {
      server.on_build_started();
    }
    for tx in &runtime.ready_txs {
      let _ = tx.send(false);
    }
  }

  fn notify_build_finished(&self) {
    let mut runtime = self.inner.runtime.lock();
    runtime.initial_built = true;
    if let Some(server) = &runtime.server {
      server.on_build_finished();
    }
    for tx in &runtime.ready_txs {
      let _ = tx.send(true);
    }
  }

  /// An axum router serving the output directory, gated on build readiness
  pub fn middleware(&self) -> Router {
    let mut runtime = self.inner.runtime.lock();
    let (tx, rx) = tokio::sync::watch::channel(runtime.initial_built);
    runtime.ready_txs.push(tx);
    satchel_dev_server::serve_dir_router(&self.inner.options.out_dir, rx)
  }

  /// Start the development HTTP server over the output directory
  pub async fn serve(&self, port: u16, https: bool) -> anyhow::Result<u16> {
    if https {
      tracing::warn!("HTTPS termination is delegated to a fronting proxy; serving plain HTTP");
    }

    let handle = satchel_dev_server::run_server(satchel_dev_server::Options {
      dist_dir: self.inner.options.out_dir.clone(),
      port,
    })
    .await?;
    let port = handle.port();

    let mut runtime = self.inner.runtime.lock();
    if runtime.initial_built {
      handle.on_build_finished();
    }
    runtime.server = Some(handle);

    Ok(port)
  }
}
