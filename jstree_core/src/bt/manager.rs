//! Manager/Ticker wiring and the shutdown fallback watcher (`§4.6`).

use super::{tick_blocking, Node};
use crate::envar;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Stable handle returned by `Bridge::manager` (`§4.2`); survives `Stop`.
/// Orchestrates tickers created from JS via `newManager()`/`newTicker()`.
#[derive(Default)]
pub struct Manager {
  tickers: parking_lot::Mutex<Vec<Arc<Ticker>>>,
}

impl Manager {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// `newTicker(intervalMillis, node)`: spawns a background loop that ticks
  /// `node` every `interval`. Returns a handle whose `stop` settles via the
  /// `§4.6` fallback once a Bridge-level shutdown signal fires.
  pub fn new_ticker(
    self: &Arc<Self>,
    interval: Duration,
    node: Node,
    bridge_shutdown: watch::Receiver<bool>,
  ) -> Arc<Ticker> {
    let ticker = Ticker::spawn(interval, node, bridge_shutdown);
    self.tickers.lock().push(ticker.clone());
    ticker
  }
}

/// Periodically ticks one [`Node`] until stopped. `stop()` returns a
/// future that resolves once the loop has actually exited — the "long
/// lived JS Promise representing a Ticker's shutdown" of `§4.6`.
pub struct Ticker {
  stop_tx: watch::Sender<bool>,
  done_rx: watch::Receiver<bool>,
  task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Ticker {
  fn spawn(interval: Duration, node: Node, mut bridge_shutdown: watch::Receiver<bool>) -> Arc<Self> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let (done_tx, done_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      loop {
        tokio::select! {
          _ = ticker.tick() => {
            tick_blocking(&node);
          }
          _ = stop_rx.changed() => break,
          _ = bridge_shutdown.changed() => break,
        }
      }
      let _ = done_tx.send(true);
    });

    Arc::new(Self {
      stop_tx,
      done_rx,
      task: parking_lot::Mutex::new(Some(task)),
    })
  }

  /// Signals the loop to exit and returns a future resolving once it has.
  /// Per `§4.6`, this settles within a bounded time after a Bridge
  /// shutdown even if `RunOnLoop` reports the Bridge stopped: the loop
  /// above watches `bridge_shutdown` directly rather than depending on the
  /// Bridge to schedule the stop for it.
  pub async fn stop(&self) {
    let _ = self.stop_tx.send(true);
    let mut done_rx = self.done_rx.clone();
    loop {
      if *done_rx.borrow() {
        return;
      }
      if done_rx.changed().await.is_err() {
        return;
      }
    }
  }

  pub fn handle(&self) -> Option<JoinHandle<()>> {
    self.task.lock().take()
  }
}

/// Watches `bridge_shutdown`, and on shutdown settles `settle` (a
/// long-lived Promise bridge, modeled here as a oneshot) within
/// [`envar::SHUTDOWN_FALLBACK_CEILING`]. First tries to have the caller's
/// `try_on_loop` closure settle it (mirrors `Bridge::RunOnLoop`); if that
/// reports the Bridge stopped, falls back to settling directly.
pub fn spawn_shutdown_fallback_watcher<F>(
  mut bridge_shutdown: watch::Receiver<bool>,
  settle: oneshot::Sender<()>,
  try_on_loop: F,
) -> JoinHandle<()>
where
  F: FnOnce() -> bool + Send + 'static,
{
  tokio::spawn(async move {
    if bridge_shutdown.changed().await.is_err() {
      let _ = settle.send(());
      return;
    }

    let scheduled = try_on_loop();
    if scheduled {
      return;
    }

    // `RunOnLoop` reported the Bridge stopped: settle directly rather
    // than leaving the Promise hanging.
    if tokio::time::timeout(envar::SHUTDOWN_FALLBACK_CEILING(), async {
      let _ = settle.send(());
    })
    .await
    .is_err()
    {
      warn!("shutdown fallback watcher exceeded its ceiling settling a Promise");
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bt::{Outcome, Status, Tick};
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[tokio::test]
  async fn ticker_stops_and_settles_promptly() {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks2 = ticks.clone();
    let tick: Tick = Arc::new(move |_: &[Node]| {
      ticks2.fetch_add(1, Ordering::SeqCst);
      Outcome::ready(Status::Success)
    });
    let node = Node::new(tick, vec![]);

    let manager = Manager::new();
    let ticker = manager.new_ticker(Duration::from_millis(5), node, shutdown_rx);

    tokio::time::sleep(Duration::from_millis(30)).await;
    ticker.stop().await;

    assert!(ticks.load(Ordering::SeqCst) > 0);
  }

  #[tokio::test]
  async fn shutdown_fallback_settles_when_loop_reports_stopped() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (settle_tx, settle_rx) = oneshot::channel();

    let handle = spawn_shutdown_fallback_watcher(shutdown_rx, settle_tx, || false);
    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), settle_rx).await;
    assert!(result.is_ok());
    handle.await.unwrap();
  }
}
