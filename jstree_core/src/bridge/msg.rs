//! Messages exchanged between host threads and the Event Loop thread.
//!
//! Mirrors the master/jsrt channel pattern used throughout the bridge:
//! host threads never touch the `v8` isolate directly, they only ever
//! hand a boxed job to the loop and (optionally) wait on a completion
//! channel for its result.

use crate::js::JsRuntime;

/// A unit of work to run on the Event Loop thread. Built from a
/// `FnOnce(&mut JsRuntime)` closure captured by `Bridge::run_on_loop`/
/// `run_on_loop_sync`; the closure is `Send` so it can cross threads, but
/// it is only ever invoked on the loop thread.
pub type LoopJob = Box<dyn FnOnce(&mut JsRuntime) + Send + 'static>;

/// Messages sent from host threads to the Event Loop thread.
pub enum ToLoopMessage {
  Run(LoopJob),
}
