//! Blocking JS leaf (`§4.4`): invokes a JS function and blocks the
//! ticking thread until it settles, trading interleaving for simplicity.

use super::{Node, Outcome, Status, Tick};
use crate::error::BridgeError;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::watch;

/// Abstracts the one JS call a [`BlockingJSLeaf`] is bound to, and the
/// Bridge shutdown signal it must race against.
pub trait BlockingJsLeafFn: Send + Sync {
  fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>>;

  /// Fires once the owning Bridge has stopped, per `§4.4`'s requirement
  /// that a blocking tick never hangs past shutdown.
  fn shutdown(&self) -> watch::Receiver<bool>;
}

/// Invokes a JS function and blocks until it resolves or the Bridge
/// shuts down. Not reusable after that happens — callers must construct a
/// fresh instance to retry (`§4.4`).
pub struct BlockingJSLeaf<F: BlockingJsLeafFn + 'static> {
  callable: Arc<F>,
  spent: std::sync::atomic::AtomicBool,
}

impl<F: BlockingJsLeafFn + 'static> BlockingJSLeaf<F> {
  pub fn new(callable: F) -> Arc<Self> {
    Arc::new(Self {
      callable: Arc::new(callable),
      spent: std::sync::atomic::AtomicBool::new(false),
    })
  }

  async fn run(&self) -> Result<Status, BridgeError> {
    use std::sync::atomic::Ordering;
    if self.spent.swap(true, Ordering::SeqCst) {
      return Err(BridgeError::ShutdownError);
    }

    let mut shutdown = self.callable.shutdown();
    let invoke = self.callable.invoke();
    tokio::pin!(invoke);

    tokio::select! {
      biased;
      result = &mut invoke => result.map_err(|message| BridgeError::RuntimeError {
        name: "BlockingJSLeaf".to_string(),
        message,
      }),
      _ = shutdown.changed() => Err(BridgeError::ShutdownError),
    }
  }

  /// Returns a `Tick` suitable for building a [`Node`]. Matches
  /// `createBlockingLeafNode` in `§4.5`: the returned node's tick always
  /// resolves via a future (it must block on the JS Promise), so composing
  /// this into `sequence`/`fallback` forces those onto the async path too.
  pub fn as_tick(self: Arc<Self>) -> Tick {
    Arc::new(move |_children: &[Node]| -> Outcome {
      let this = self.clone();
      Outcome::Pending(Box::pin(async move {
        match this.run().await {
          Ok(status) => status,
          // A first-writer-wins race (panic + late resolution) or a
          // Bridge shutdown both surface as `failure` per `§7`.
          Err(_) => Status::Failure,
        }
      }))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Mock {
    status: Status,
    shutdown_tx: watch::Sender<bool>,
  }

  impl BlockingJsLeafFn for Mock {
    fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
      let status = self.status;
      Box::pin(async move { Ok(status) })
    }

    fn shutdown(&self) -> watch::Receiver<bool> {
      self.shutdown_tx.subscribe()
    }
  }

  #[tokio::test]
  async fn round_trip_returns_resolved_status() {
    let (tx, _rx) = watch::channel(false);
    let leaf = BlockingJSLeaf::new(Mock {
      status: Status::Success,
      shutdown_tx: tx,
    });
    let tick = leaf.as_tick();
    let node = Node::new(tick, vec![]);
    let status = match node.tick() {
      Outcome::Pending(fut) => fut.await,
      Outcome::Ready(_) => panic!("blocking leaf always resolves via future"),
    };
    assert_eq!(status, Status::Success);
  }

  #[tokio::test]
  async fn shutdown_yields_failure_instead_of_hanging() {
    struct Hangs(watch::Sender<bool>);
    impl BlockingJsLeafFn for Hangs {
      fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
        Box::pin(std::future::pending())
      }
      fn shutdown(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
      }
    }

    let (tx, _rx) = watch::channel(false);
    let leaf = BlockingJSLeaf::new(Hangs(tx.clone()));
    let tick = leaf.as_tick();
    let node = Node::new(tick, vec![]);

    let outcome = node.tick();
    tx.send(true).unwrap();
    let status = match outcome {
      Outcome::Pending(fut) => fut.await,
      Outcome::Ready(_) => panic!("blocking leaf always resolves via future"),
    };
    assert_eq!(status, Status::Failure);
  }
}
