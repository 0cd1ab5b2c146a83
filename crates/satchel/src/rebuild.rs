use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio::time::Instant;

use satchel_core::plugin::WatchEvent;

use crate::build_queue::BuildQueue;
use crate::graph_loader::BuildState;

/// Changes are coalesced for this long before a rebuild kicks off
pub const REBUILD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watcher-driven debounced scheduler.
///
/// Each change event queues the subscribed assets for rebuild and re-arms a
/// single timer; when the timer fires, one build pass runs for however many
/// changes accumulated. A change arriving mid-build queues and schedules
/// another pass after the active one clears; the in-flight build is never
/// cancelled.
pub async fn run_rebuild_loop<F, Fut>(
  mut events: UnboundedReceiver<WatchEvent>,
  state: Arc<Mutex<BuildState>>,
  queue: Arc<BuildQueue>,
  rebuild: F,
) where
  F: Fn() -> Fut,
  Fut: Future<Output = ()>,
{
  let mut deadline: Option<Instant> = None;

  loop {
    tokio::select! {
      event = events.recv() => {
        let Some(event) = event else {
          break;
        };

        let subscribers = {
          let state = state.lock().await;
          state.registry.subscribers(event.path())
        };
        if subscribers.is_empty() {
          continue;
        }

        tracing::info!(path = %event.path().display(), "File changed");
        for asset_id in subscribers {
          queue.add(asset_id, true);
        }
        deadline = Some(Instant::now() + REBUILD_DEBOUNCE);
      }
      _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
        deadline = None;
        rebuild().await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::path::Path;
  use std::path::PathBuf;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;

  use satchel_core::types::PackageDescriptor;
  use tokio::sync::mpsc;

  use super::*;

  #[tokio::test]
  async fn coalesces_bursts_of_changes_into_one_build() {
    let state = Arc::new(Mutex::new(BuildState::default()));
    let asset_id = {
      let mut state = state.lock().await;
      let (id, _) = state.registry.get_or_create(
        PathBuf::from("/app/a.js"),
        Arc::new(PackageDescriptor::default()),
      );
      state.registry.watch(PathBuf::from("/app/a.js"), id, None);
      id
    };

    let queue = Arc::new(BuildQueue::new(2));
    let builds = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();

    let loop_handle = tokio::spawn(run_rebuild_loop(rx, state.clone(), queue.clone(), {
      let builds = builds.clone();
      move || {
        let builds = builds.clone();
        async move {
          builds.fetch_add(1, Ordering::SeqCst);
        }
      }
    }));

    for _ in 0..3 {
      tx.send(WatchEvent::Update(PathBuf::from("/app/a.js"))).unwrap();
    }
    // Changes for unwatched paths are ignored
    tx.send(WatchEvent::Update(PathBuf::from("/app/unknown.js"))).unwrap();

    tokio::time::sleep(REBUILD_DEBOUNCE * 3).await;
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    // The changed asset was queued exactly once, flagged as a rebuild
    use futures::FutureExt;
    let processed = queue
      .run(|_, is_rebuild| {
        assert!(is_rebuild);
        async { Ok(()) }.boxed()
      })
      .await
      .unwrap();
    assert_eq!(processed.len(), 1);
    assert!(processed.contains(&asset_id));

    drop(tx);
    let _ = loop_handle.await;
  }

  #[tokio::test]
  async fn a_later_change_rearms_the_timer() {
    let state = Arc::new(Mutex::new(BuildState::default()));
    {
      let mut state = state.lock().await;
      let (id, _) = state.registry.get_or_create(
        PathBuf::from("/app/a.js"),
        Arc::new(PackageDescriptor::default()),
      );
      state.registry.watch(PathBuf::from("/app/a.js"), id, None);
      assert_eq!(state.registry.subscribers(Path::new("/app/a.js")), vec![id]);
    }

    let queue = Arc::new(BuildQueue::new(2));
    let builds = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::unbounded_channel();

    let loop_handle = tokio::spawn(run_rebuild_loop(rx, state, queue, {
      let builds = builds.clone();
      move || {
        let builds = builds.clone();
        async move {
          builds.fetch_add(1, Ordering::SeqCst);
        }
      }
    }));

    tx.send(WatchEvent::Update(PathBuf::from("/app/a.js"))).unwrap();
    tokio::time::sleep(REBUILD_DEBOUNCE / 2).await;
    tx.send(WatchEvent::Update(PathBuf::from("/app/a.js"))).unwrap();
    tokio::time::sleep(REBUILD_DEBOUNCE / 2).await;

    // Still within the re-armed window
    assert_eq!(builds.load(Ordering::SeqCst), 0);

    tokio::time::sleep(REBUILD_DEBOUNCE * 2).await;
    assert_eq!(builds.load(Ordering::SeqCst), 1);

    drop(tx);
    let _ = loop_handle.await;
  }
}
