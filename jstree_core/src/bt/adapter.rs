//! Non-blocking JS leaf adapter (`§4.3`): polls a JS-backed async call
//! across ticks instead of blocking the ticking thread.

use super::{Node, Outcome, Status, Tick};

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Abstracts the one JS call a [`JSLeafAdapter`] is bound to. Kept generic
/// over the JS layer so the BT core has no direct dependency on `v8`;
/// `crate::js` provides the concrete implementation that resolves a
/// function once from the `osm:bt` module or caller and invokes it on the
/// Event Loop.
pub trait JsLeafFn: Send + Sync {
  fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  Idle,
  Running,
}

struct Shared {
  generation: AtomicU64,
  // Set by the spawned task once it completes, if its generation is still
  // current. `None` means "no result arrived yet for this generation".
  slot: Mutex<Option<(u64, Result<Status, String>)>>,
}

/// Converts an async JS function into a BT leaf. One activation (one JS
/// call) is outstanding at a time; `tick` serializes concurrent callers
/// and never blocks (`§4.3`).
pub struct JSLeafAdapter<F: JsLeafFn + 'static> {
  callable: Arc<F>,
  shared: Arc<Shared>,
  phase: Mutex<Phase>,
  /// The error from the most recently completed activation, if it failed.
  /// Exposed so hosts can attach it out-of-band alongside the `failure`
  /// status (`§7`).
  last_error: Mutex<Option<String>>,
}

impl<F: JsLeafFn + 'static> JSLeafAdapter<F> {
  pub fn new(callable: F) -> Arc<Self> {
    Arc::new(Self {
      callable: Arc::new(callable),
      shared: Arc::new(Shared {
        generation: AtomicU64::new(0),
        slot: Mutex::new(None),
      }),
      phase: Mutex::new(Phase::Idle),
      last_error: Mutex::new(None),
    })
  }

  /// Increments the generation and returns to `Idle`, discarding any
  /// pending result. A resolution from a prior generation that arrives
  /// after this call is silently dropped (`§3` stale-generation rule).
  pub fn cancel(&self) {
    self.shared.generation.fetch_add(1, Ordering::SeqCst);
    *self.shared.slot.lock() = None;
    *self.phase.lock() = Phase::Idle;
  }

  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().clone()
  }

  fn tick_once(self: &Arc<Self>) -> Status {
    let mut phase = self.phase.lock();
    match *phase {
      Phase::Idle => {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let shared = self.shared.clone();
        let callable = self.callable.clone();
        tokio::spawn(async move {
          let result = callable.invoke().await;
          if shared.generation.load(Ordering::SeqCst) == generation {
            *shared.slot.lock() = Some((generation, result));
          }
          // Else: stale generation, discard per `§3`.
        });
        *phase = Phase::Running;
        Status::Running
      }
      Phase::Running => {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let mut slot = self.shared.slot.lock();
        match slot.take() {
          Some((gen, result)) if gen == generation => {
            *phase = Phase::Idle;
            match result {
              Ok(status) => {
                *self.last_error.lock() = None;
                status
              }
              Err(message) => {
                *self.last_error.lock() = Some(message);
                Status::Failure
              }
            }
          }
          Some(_stale) => Status::Running,
          None => Status::Running,
        }
      }
    }
  }

  /// Returns a `Tick` closure suitable for building a [`Node`] via
  /// `bt::Node::new`. Matches `createLeafNode` in `§4.5`.
  pub fn as_tick(self: Arc<Self>) -> Tick {
    Arc::new(move |_children: &[Node]| -> Outcome { Outcome::ready(self.tick_once()) })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicBool;

  struct Immediate(Status);
  impl JsLeafFn for Immediate {
    fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
      let status = self.0;
      Box::pin(async move { Ok(status) })
    }
  }

  #[tokio::test]
  async fn first_tick_returns_running_then_settles() {
    let adapter = JSLeafAdapter::new(Immediate(Status::Success));
    let tick = adapter.clone().as_tick();
    let node = Node::new(tick, vec![]);

    let first = match node.tick() {
      Outcome::Ready(s) => s,
      Outcome::Pending(_) => panic!("adapter must answer synchronously"),
    };
    assert_eq!(first, Status::Running);

    tokio::task::yield_now().await;
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let second = match node.tick() {
      Outcome::Ready(s) => s,
      Outcome::Pending(_) => panic!("adapter must answer synchronously"),
    };
    assert_eq!(second, Status::Success);
  }

  struct NeverResolves(#[allow(dead_code)] AtomicBool);
  impl JsLeafFn for NeverResolves {
    fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
      Box::pin(std::future::pending())
    }
  }

  #[tokio::test]
  async fn cancel_discards_late_resolution() {
    let adapter = JSLeafAdapter::new(Immediate(Status::Success));
    let tick = adapter.clone().as_tick();
    let node = Node::new(tick, vec![]);

    // Kick off an activation, then cancel before it would ever settle
    // (the mock resolves immediately, but we cancel before polling again).
    let _ = node.tick();
    adapter.cancel();

    // A stale resolution landing in the slot post-cancel must not be
    // observed: re-activating starts a fresh generation.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let status = match node.tick() {
      Outcome::Ready(s) => s,
      Outcome::Pending(_) => panic!("adapter must answer synchronously"),
    };
    assert_eq!(status, Status::Running);
  }
}
