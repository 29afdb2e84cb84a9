//! Glue between `osm:bt`'s `createLeafNode`/`createBlockingLeafNode`/
//! `node(tick, ...children)` and `crate::bt::adapter`/`crate::bt::blocking`.
//!
//! This module only needs the ability to schedule work back onto the
//! Event Loop thread, not the concrete `Bridge` type — `Bridge` hands us
//! that ability as a pair of type-erased closures so `crate::js` does not
//! need to depend on `crate::bridge` (which already depends on
//! `crate::js`).

use super::{JsFunction, LeafCallId};
use crate::bt::adapter::JsLeafFn;
use crate::bt::blocking::BlockingJsLeafFn;
use crate::bt::{Node, Outcome, Status, Tick};
use crate::error::BridgeResult;

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type StartFn =
  Arc<dyn Fn(JsFunction, Vec<Node>) -> BridgeResult<LeafCallId> + Send + Sync>;
type PollFn = Arc<dyn Fn(LeafCallId) -> BridgeResult<Option<Result<Status, String>>> + Send + Sync>;

/// Installed once onto [`super::JsRuntimeState`] by whichever `Bridge`
/// owns this runtime, so JS-constructed leaves can be ticked later from
/// any host thread.
#[derive(Clone)]
pub struct LeafScheduler {
  pub start: StartFn,
  pub poll: PollFn,
  pub shutdown: watch::Receiver<bool>,
}

/// Interval between polls while waiting for a JS leaf's Promise to
/// settle. Short enough that non-blocking leaves feel responsive without
/// busy-looping the loop thread with poll jobs.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn clone_function(func: &JsFunction) -> JsFunction {
  JsFunction {
    func: func.func.clone(),
  }
}

/// Drives one JS function call (with its node's children as the sole
/// argument) to completion through a [`LeafScheduler`]. Shared by
/// `createLeafNode` (`crate::bt::adapter`, empty children),
/// `createBlockingLeafNode` (`crate::bt::blocking`, empty children), and
/// the generic `node(tick, ...children)` constructor (non-empty
/// children).
pub struct SchedulerLeafCall {
  scheduler: LeafScheduler,
  func: JsFunction,
  children: Vec<Node>,
}

impl SchedulerLeafCall {
  pub fn new(scheduler: LeafScheduler, func: JsFunction, children: Vec<Node>) -> Self {
    Self {
      scheduler,
      func,
      children,
    }
  }

  fn call(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
    let scheduler = self.scheduler.clone();
    let func = clone_function(&self.func);
    let children = self.children.clone();
    Box::pin(async move {
      let id = (scheduler.start)(func, children).map_err(|e| e.to_string())?;
      loop {
        match (scheduler.poll)(id) {
          Ok(Some(result)) => return result,
          Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
          Err(e) => return Err(e.to_string()),
        }
      }
    })
  }
}

impl JsLeafFn for SchedulerLeafCall {
  fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
    self.call()
  }
}

impl BlockingJsLeafFn for SchedulerLeafCall {
  fn invoke(&self) -> Pin<Box<dyn Future<Output = Result<Status, String>> + Send>> {
    self.call()
  }

  fn shutdown(&self) -> watch::Receiver<bool> {
    self.scheduler.shutdown.clone()
  }
}

/// Backs `node(tick, ...children)`'s sync fast path (`§8`): unlike
/// [`crate::bt::adapter::JSLeafAdapter`], which always answers `running`
/// on its first activation, this calls the JS function once per tick and
/// only falls back to a polled future once it has actually observed a
/// pending Promise. A plain synchronous return makes the whole tick
/// synchronous too.
pub struct SyncLeaf {
  scheduler: LeafScheduler,
  func: JsFunction,
  children: Vec<Node>,
  last_error: Mutex<Option<String>>,
}

impl SyncLeaf {
  pub fn new(scheduler: LeafScheduler, func: JsFunction, children: Vec<Node>) -> Arc<Self> {
    Arc::new(Self {
      scheduler,
      func,
      children,
      last_error: Mutex::new(None),
    })
  }

  pub fn last_error(&self) -> Option<String> {
    self.last_error.lock().clone()
  }

  fn record(&self, result: &Result<Status, String>) -> Status {
    match result {
      Ok(status) => {
        *self.last_error.lock() = None;
        *status
      }
      Err(message) => {
        *self.last_error.lock() = Some(message.clone());
        Status::Failure
      }
    }
  }

  pub fn as_tick(self: Arc<Self>) -> Tick {
    Arc::new(move |_children: &[Node]| -> Outcome {
      let id = match (self.scheduler.start)(clone_function(&self.func), self.children.clone()) {
        Ok(id) => id,
        Err(e) => {
          *self.last_error.lock() = Some(e.to_string());
          return Outcome::ready(Status::Failure);
        }
      };
      match (self.scheduler.poll)(id) {
        Ok(Some(result)) => Outcome::ready(self.record(&result)),
        Ok(None) => {
          let scheduler = self.scheduler.clone();
          let this = self.clone();
          Outcome::Pending(Box::pin(async move {
            loop {
              match (scheduler.poll)(id) {
                Ok(Some(result)) => return this.record(&result),
                Ok(None) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => {
                  *this.last_error.lock() = Some(e.to_string());
                  return Status::Failure;
                }
              }
            }
          }))
        }
        Err(e) => {
          *self.last_error.lock() = Some(e.to_string());
          Outcome::ready(Status::Failure)
        }
      }
    })
  }
}
