//! The Bridge (`§4.2`): the concurrency adapter between N host threads and
//! one cooperatively-scheduled JS Event Loop.

pub mod msg;

use crate::blackboard::BlackboardArc;
use crate::bt::manager::Manager;
use crate::bt::Node;
use crate::envar;
use crate::error::{BridgeError, BridgeResult};
use crate::js::leaf::LeafScheduler;
use crate::js::{JsFunction, JsRuntime, JsRuntimeOptions, JsValue, LeafCallId, PromiseBridge};
use msg::{LoopJob, ToLoopMessage};

use parking_lot::{Mutex, RwLock};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

thread_local! {
  /// Set to the running `JsRuntime` for the duration of one job's
  /// execution on the Event Loop thread, so a reentrant
  /// `RunOnLoopSync`/`TryRunOnLoopSync` call from inside that job can run
  /// inline instead of deadlocking on itself.
  static CURRENT_RUNTIME: Cell<*mut JsRuntime> = const { Cell::new(std::ptr::null_mut()) };
}

/// The host-side adapter that owns scheduling into and out of the JS
/// runtime (`§3`, `§4.2`).
pub struct Bridge {
  sender: Mutex<Option<std::sync::mpsc::Sender<ToLoopMessage>>>,
  stopped: AtomicBool,
  shutdown_tx: watch::Sender<bool>,
  loop_thread_id: Arc<OnceLock<ThreadId>>,
  sync_timeout: RwLock<Duration>,
  /// Whether this Bridge created the Event Loop and is therefore
  /// responsible for terminating it in `stop` (`§4.2` construction modes).
  owned: bool,
  loop_handle: Mutex<Option<JoinHandle<()>>>,
  manager: Arc<Manager>,
}

impl Bridge {
  /// Owned-loop construction: the Bridge spawns and owns the Event Loop
  /// thread, and `stop` terminates it.
  pub fn new_owned(options: JsRuntimeOptions) -> Arc<Self> {
    let (tx, rx) = std::sync::mpsc::channel::<ToLoopMessage>();
    let loop_thread_id = Arc::new(OnceLock::new());
    let (shutdown_tx, _shutdown_rx) = watch::channel(false);

    // `JSLeafAdapter`/`BlockingJSLeaf` use ambient `tokio::spawn` from
    // whatever thread ticks them, which includes this one whenever a
    // script calls `bt.tick(node)` directly rather than through a
    // `Manager`-driven ticker. Entering the caller's runtime for the
    // lifetime of the loop thread keeps that `tokio::spawn` valid there
    // too; a host that constructs a Bridge outside any tokio runtime gets
    // none of this (matches `install_js_scheduling`'s own fallback).
    let tokio_handle = tokio::runtime::Handle::try_current().ok();

    let thread_id_cell = loop_thread_id.clone();
    let handle = thread::Builder::new()
      .name("jstree-event-loop".to_string())
      .spawn(move || {
        let _ = thread_id_cell.set(thread::current().id());
        let _guard = tokio_handle.as_ref().map(|h| h.enter());
        run_event_loop(rx, options);
      })
      .expect("failed to spawn jstree event loop thread");

    let bridge = Arc::new(Self {
      sender: Mutex::new(Some(tx)),
      stopped: AtomicBool::new(false),
      shutdown_tx,
      loop_thread_id,
      sync_timeout: RwLock::new(envar::SYNC_CALL_TIMEOUT()),
      owned: true,
      loop_handle: Mutex::new(Some(handle)),
      manager: Manager::new(),
    });
    bridge.install_js_scheduling();
    bridge
  }

  /// Shared-loop construction: wraps an already-running loop. `stop` never
  /// closes `sender`'s real channel (only this Bridge's clone of it) and
  /// never joins a thread it does not own.
  pub fn new_shared(
    sender: std::sync::mpsc::Sender<ToLoopMessage>,
    loop_thread_id: Arc<OnceLock<ThreadId>>,
    manager: Arc<Manager>,
  ) -> Arc<Self> {
    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let bridge = Arc::new(Self {
      sender: Mutex::new(Some(sender)),
      stopped: AtomicBool::new(false),
      shutdown_tx,
      loop_thread_id,
      sync_timeout: RwLock::new(envar::SYNC_CALL_TIMEOUT()),
      owned: false,
      loop_handle: Mutex::new(None),
      manager,
    });
    bridge.install_js_scheduling();
    bridge
  }

  /// Wires the `osm:bt` bindings (`binding.rs`) to this Bridge's own
  /// scheduling so JS-constructed leaves and `tick(node)` can cross back
  /// onto the Event Loop thread from any host thread. Skipped (with a
  /// debug log) when constructed outside a tokio runtime — host
  /// embeddings that never touch JS leaves or async ticks don't need one.
  fn install_js_scheduling(self: &Arc<Self>) {
    let handle = match tokio::runtime::Handle::try_current() {
      Ok(handle) => handle,
      Err(_) => {
        debug!("bridge constructed without a tokio runtime; JS leaf scheduling disabled");
        return;
      }
    };

    let start_bridge = self.clone();
    let poll_bridge = self.clone();
    let scheduler = LeafScheduler {
      start: Arc::new(move |func: JsFunction, children: Vec<Node>| -> BridgeResult<LeafCallId> {
        start_bridge.run_on_loop_sync(move |rt| rt.call_leaf(&func, &children))
      }),
      poll: Arc::new(move |id: LeafCallId| poll_bridge.run_on_loop_sync(move |rt| rt.poll_leaf(id))),
      shutdown: self.done(),
    };

    let run_on_loop_bridge = self.clone();
    let promise_bridge = PromiseBridge {
      handle,
      run_on_loop: Arc::new(move |job| run_on_loop_bridge.run_on_loop(job)),
    };

    let manager = self.manager();
    let bridge_shutdown = self.done();

    let _ = self.run_on_loop_sync(move |rt| {
      rt.set_leaf_scheduler(scheduler);
      rt.set_promise_bridge(promise_bridge);
      rt.set_manager_context(manager, bridge_shutdown);
    });
  }

  fn is_on_loop_thread(&self) -> bool {
    match self.loop_thread_id.get() {
      Some(id) => thread::current().id() == *id,
      None => false,
    }
  }

  /// `Done()`: a receiver that observes `true` exactly once, when the
  /// Bridge has fully stopped. Cloning the receiver fans it out to an
  /// arbitrary number of observers without per-observer allocation.
  pub fn done(&self) -> watch::Receiver<bool> {
    self.shutdown_tx.subscribe()
  }

  pub fn is_stopped(&self) -> bool {
    self.stopped.load(Ordering::SeqCst)
  }

  pub fn manager(&self) -> Arc<Manager> {
    self.manager.clone()
  }

  pub fn set_timeout(&self, d: Duration) {
    *self.sync_timeout.write() = d;
  }

  pub fn get_timeout(&self) -> Duration {
    *self.sync_timeout.read()
  }

  /// `RunOnLoop(fn)`: enqueues `job`; returns `false` iff the Bridge is
  /// stopped. The `sender` mutex makes the stopped-check and the enqueue
  /// atomic with respect to `stop`'s flag transition (`§4.2`): a caller
  /// either observes the sender already gone, or its send happens while
  /// `stop` cannot yet have taken the sender away.
  pub fn run_on_loop(&self, job: LoopJob) -> bool {
    let guard = self.sender.lock();
    match guard.as_ref() {
      Some(tx) => tx.send(ToLoopMessage::Run(job)).is_ok(),
      None => false,
    }
  }

  /// `RunOnLoopSync(fn)`: schedules `fn(rt)` and blocks until it returns
  /// or the synchronous-call timeout elapses. Runs inline, without
  /// scheduling, if the caller is already on the Event Loop thread.
  pub fn run_on_loop_sync<T, F>(&self, f: F) -> BridgeResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut JsRuntime) -> T + Send + 'static,
  {
    if self.is_on_loop_thread() {
      return Ok(CURRENT_RUNTIME.with(|cell| {
        let ptr = cell.get();
        debug_assert!(!ptr.is_null(), "on loop thread without a running job");
        // SAFETY: `ptr` is only non-null while `run_event_loop` is
        // executing the job that owns it, which is exactly the window in
        // which this reentrant call can run.
        f(unsafe { &mut *ptr })
      }));
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let job: LoopJob = Box::new(move |rt| {
      let _ = tx.send(f(rt));
    });

    if !self.run_on_loop(job) {
      return Err(BridgeError::NotRunningError);
    }

    let timeout = self.get_timeout();
    match rx.recv_timeout(timeout) {
      Ok(result) => Ok(result),
      Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(BridgeError::TimeoutError(timeout)),
      Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::ShutdownError),
    }
  }

  /// `TryRunOnLoopSync(currentVM, fn)`: like `run_on_loop_sync`, but if
  /// the caller is on the Event Loop thread and already holds a runtime
  /// handle, uses it directly instead of consulting the thread-local.
  /// `current_vm` is ignored when the caller is off the loop thread (see
  /// `SPEC_FULL.md`'s Open Question decision on this parameter).
  pub fn try_run_on_loop_sync<T, F>(
    &self,
    current_vm: Option<&mut JsRuntime>,
    f: F,
  ) -> BridgeResult<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut JsRuntime) -> T + Send + 'static,
  {
    if self.is_on_loop_thread() {
      if let Some(rt) = current_vm {
        return Ok(f(rt));
      }
    }
    self.run_on_loop_sync(f)
  }

  /// `LoadScript(name, source)`: compiles and evaluates on the Event Loop.
  pub fn load_script(
    &self,
    name: impl Into<String>,
    source: impl Into<String>,
  ) -> BridgeResult<()> {
    let name = name.into();
    let source = source.into();
    self.run_on_loop_sync(move |rt| rt.load_script(&name, &source))?
  }

  pub fn set_global(&self, name: impl Into<String>, value: JsValue) -> BridgeResult<()> {
    let name = name.into();
    self.run_on_loop_sync(move |rt| rt.set_global(&name, value))
  }

  /// `GetGlobal(name) → (value, exists)`. `exists=false` means absent or
  /// `undefined`; `exists=true, value=Null` means present-and-null.
  pub fn get_global(&self, name: impl Into<String>) -> BridgeResult<(JsValue, bool)> {
    let name = name.into();
    self.run_on_loop_sync(move |rt| rt.get_global(&name))
  }

  pub fn get_callable(&self, name: impl Into<String>) -> BridgeResult<JsFunction> {
    let name = name.into();
    self.run_on_loop_sync(move |rt| rt.get_callable(&name))?
  }

  /// Reads `name` off the global object and unwraps it as a `bt.Node`
  /// handle built by the script at load time.
  pub fn get_root_node(&self, name: impl Into<String>) -> BridgeResult<Node> {
    let name = name.into();
    self.run_on_loop_sync(move |rt| rt.get_root_node(&name))?
  }

  pub fn expose_blackboard(&self, name: impl Into<String>, bb: BlackboardArc) -> BridgeResult<()> {
    let name = name.into();
    self.run_on_loop_sync(move |rt| rt.expose_blackboard(&name, bb))
  }

  /// `Stop()`: idempotent. Transitions to stopped, closes the shutdown
  /// signal, and — only in owned mode — terminates the Event Loop thread.
  /// Waits for the task channel to drain first, so a callback accepted
  /// just before `stop` is guaranteed to run before `Done()` fires (a
  /// deliberate strengthening recorded in `SPEC_FULL.md`'s Open Question
  /// decisions).
  pub fn stop(&self) {
    if self.stopped.swap(true, Ordering::SeqCst) {
      return;
    }

    let sender = self.sender.lock().take();
    drop(sender);

    if self.owned {
      if let Some(handle) = self.loop_handle.lock().take() {
        if handle.join().is_err() {
          warn!("jstree event loop thread panicked during shutdown");
        }
      }
    }

    let _ = self.shutdown_tx.send(true);
    debug!(owned = self.owned, "bridge stopped");
  }
}

fn run_event_loop(rx: std::sync::mpsc::Receiver<ToLoopMessage>, options: JsRuntimeOptions) {
  let mut rt = JsRuntime::new(options);
  rt.init_environment();

  while let Ok(ToLoopMessage::Run(job)) = rx.recv() {
    let ptr: *mut JsRuntime = &mut rt;
    CURRENT_RUNTIME.with(|cell| cell.set(ptr));
    job(&mut rt);
    CURRENT_RUNTIME.with(|cell| cell.set(std::ptr::null_mut()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn run_on_loop_sync_round_trips() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge
      .load_script("t.js", "globalThis.answer = 42;")
      .unwrap();
    let (value, exists) = bridge.get_global("answer").unwrap();
    assert!(exists);
    assert!(matches!(value, JsValue::Number(n) if n == 42.0));
    bridge.stop();
  }

  #[test]
  fn get_global_distinguishes_absent_from_null() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge
      .load_script("t.js", "globalThis.k = null; globalThis.u = undefined;")
      .unwrap();

    let (value, exists) = bridge.get_global("k").unwrap();
    assert!(exists);
    assert!(matches!(value, JsValue::Null));

    let (_, exists) = bridge.get_global("u").unwrap();
    assert!(!exists);

    let (_, exists) = bridge.get_global("never_set").unwrap();
    assert!(!exists);

    bridge.stop();
  }

  #[test]
  fn stop_is_idempotent() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge.stop();
    bridge.stop();
    assert!(bridge.is_stopped());
  }

  #[test]
  fn run_on_loop_rejects_after_stop() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge.stop();
    let scheduled = bridge.run_on_loop(Box::new(|_rt| {}));
    assert!(!scheduled);
  }

  #[test]
  fn concurrent_run_on_loop_races_one_stop() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    const THREADS: usize = 8;
    const CALLS_PER_THREAD: usize = 50;

    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    let successful = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..THREADS)
      .map(|_| {
        let bridge = bridge.clone();
        let successful = successful.clone();
        let rejected = rejected.clone();
        std::thread::spawn(move || {
          for _ in 0..CALLS_PER_THREAD {
            match bridge.run_on_loop_sync(|rt| {
              rt.set_global("touched", JsValue::Bool(true));
            }) {
              Ok(()) => successful.fetch_add(1, Ordering::SeqCst),
              Err(_) => rejected.fetch_add(1, Ordering::SeqCst),
            };
          }
        })
      })
      .collect();

    let stopper = {
      let bridge = bridge.clone();
      std::thread::spawn(move || bridge.stop())
    };

    for worker in workers {
      worker.join().unwrap();
    }
    stopper.join().unwrap();

    assert!(bridge.is_stopped());
    assert_eq!(
      successful.load(Ordering::SeqCst) + rejected.load(Ordering::SeqCst),
      THREADS * CALLS_PER_THREAD
    );
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn sync_composite_takes_fast_path_without_a_promise() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge
      .load_script(
        "t.js",
        r#"
        globalThis.ok = bt.tick(
          bt.sequence(bt.node(() => "success"), bt.node(() => "success"))
        );
        globalThis.bad = bt.tick(
          bt.sequence(bt.node(() => "failure"), bt.node(() => "success"))
        );
        "#,
      )
      .unwrap();

    let (ok, exists) = bridge.get_global("ok").unwrap();
    assert!(exists);
    assert_eq!(ok, JsValue::String("success".to_string()));

    let (bad, exists) = bridge.get_global("bad").unwrap();
    assert!(exists);
    assert_eq!(bad, JsValue::String("failure".to_string()));

    bridge.stop();
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn blocking_leaf_round_trip_settles_in_one_tick() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge
      .load_script(
        "t.js",
        r#"
        globalThis.n = bt.createBlockingLeafNode(async () => bt.success);
        "#,
      )
      .unwrap();

    let node = bridge.get_root_node("n").unwrap();
    let status = bridge
      .run_on_loop_sync(move |_rt| crate::bt::tick_blocking(&node))
      .unwrap();
    assert_eq!(status, crate::bt::Status::Success);

    bridge.stop();
  }

  #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
  async fn non_blocking_leaf_is_running_then_success_across_ticks() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    bridge
      .load_script(
        "t.js",
        r#"
        globalThis.n = bt.createLeafNode(async () => bt.success);
        "#,
      )
      .unwrap();

    let node = bridge.get_root_node("n").unwrap();

    let first = {
      let node = node.clone();
      bridge.run_on_loop_sync(move |_rt| node.tick()).unwrap()
    };
    let first = match first {
      crate::bt::Outcome::Ready(status) => status,
      crate::bt::Outcome::Pending(_) => panic!("createLeafNode must answer synchronously"),
    };
    assert_eq!(first, crate::bt::Status::Running);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = {
      let node = node.clone();
      bridge.run_on_loop_sync(move |_rt| node.tick()).unwrap()
    };
    let second = match second {
      crate::bt::Outcome::Ready(status) => status,
      crate::bt::Outcome::Pending(_) => panic!("createLeafNode must answer synchronously"),
    };
    assert_eq!(second, crate::bt::Status::Success);

    bridge.stop();
  }

  #[test]
  fn reentrant_try_run_on_loop_sync_does_not_deadlock() {
    let bridge = Bridge::new_owned(JsRuntimeOptions::default());
    let inner_bridge = bridge.clone();
    bridge
      .run_on_loop_sync(move |rt| {
        let result = inner_bridge.try_run_on_loop_sync(Some(rt), |rt2| {
          rt2.set_global("reentrant", JsValue::Bool(true));
          1
        });
        assert_eq!(result.unwrap(), 1);
      })
      .unwrap();
    let (value, exists) = bridge.get_global("reentrant").unwrap();
    assert!(exists);
    assert!(matches!(value, JsValue::Bool(true)));
    bridge.stop();
  }
}
