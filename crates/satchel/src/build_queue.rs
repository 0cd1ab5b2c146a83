use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use indexmap::IndexMap;
use parking_lot::Mutex;

use satchel_core::types::AssetId;

#[derive(Default)]
struct QueueState {
  /// Assets awaiting processing, with the strongest rebuild flag seen
  queued: IndexMap<AssetId, bool>,
  /// Everything queued or processed within the active run
  seen: HashSet<AssetId>,
  processed: HashSet<AssetId>,
  running: bool,
}

/// Bounded-concurrency queue draining assets through `process_asset`.
///
/// `add` is idempotent per asset within one run: repeated calls while a run
/// is active collapse into it. Ordering among sibling tasks is unspecified;
/// a task that recursively loads its deps completes only when its whole
/// subtree is loaded.
pub struct BuildQueue {
  state: Mutex<QueueState>,
  max_concurrent: usize,
}

impl BuildQueue {
  pub fn new(max_concurrent: usize) -> Self {
    BuildQueue {
      state: Mutex::new(QueueState::default()),
      max_concurrent: max_concurrent.max(1),
    }
  }

  pub fn add(&self, asset: AssetId, is_rebuild: bool) {
    let mut state = self.state.lock();

    if state.running && state.seen.contains(&asset) {
      // Collapsed into the active run
      return;
    }

    state.seen.insert(asset);
    let flag = state.queued.entry(asset).or_insert(is_rebuild);
    *flag |= is_rebuild;
  }

  pub fn is_running(&self) -> bool {
    self.state.lock().running
  }

  /// Drain the queue and resolve with the set of assets processed in this
  /// drain. Only one run may be in flight at a time.
  pub async fn run<F>(&self, process: F) -> anyhow::Result<HashSet<AssetId>>
  where
    F: Fn(AssetId, bool) -> BoxFuture<'static, anyhow::Result<()>>,
  {
    {
      let mut state = self.state.lock();
      debug_assert!(!state.running, "BuildQueue::run re-entered while active");
      state.running = true;
      state.processed.clear();
      state.seen = state.queued.keys().copied().collect();
    }

    let mut in_flight = FuturesUnordered::new();
    let result = loop {
      loop {
        if in_flight.len() >= self.max_concurrent {
          break;
        }
        let next = {
          let mut state = self.state.lock();
          let next = state.queued.shift_remove_index(0);
          if let Some((asset, _)) = &next {
            state.processed.insert(*asset);
          }
          next
        };
        match next {
          Some((asset, is_rebuild)) => {
            let task = process(asset, is_rebuild);
            in_flight.push(async move { (asset, task.await) });
          }
          None => break,
        }
      }

      if in_flight.is_empty() {
        break Ok(());
      }

      if let Some((asset, task_result)) = in_flight.next().await {
        if let Err(err) = task_result {
          tracing::debug!(asset, "Build task failed");
          break Err(err);
        }
      }
    };

    let mut state = self.state.lock();
    state.running = false;
    state.queued.clear();
    state.seen.clear();
    let processed = std::mem::take(&mut state.processed);

    result.map(|_| processed)
  }
}
