//! JS runtime wrapper: a `v8` isolate plus the `osm:bt` bindings (`§4.2`,
//! `§4.5`).
//!
//! Everything here is only ever touched from the Event Loop thread (see
//! `crate::bridge::run_event_loop`); the types are not `Sync` and mostly
//! not `Send` either, by design — the `Bridge` is the only thing allowed
//! to smuggle work across onto this thread.

pub mod binding;
pub mod convert;
pub mod leaf;

use crate::blackboard::BlackboardArc;
use crate::bt::{Node, Status};
use crate::error::{BridgeError, BridgeResult};

use std::cell::RefCell;
use std::collections::HashMap as StdHashMap;
use std::rc::Rc;
use std::sync::Once;

/// Options accepted by [`JsRuntime::new`]. Intentionally small: the
/// system embeds one runtime per Bridge, not a general-purpose JS host.
#[derive(Debug, Default, Clone)]
pub struct JsRuntimeOptions {
  pub v8_flags: Vec<String>,
}

/// A host-side view of a JS value, used at the `SetGlobal`/`GetGlobal`
/// boundary (`§4.2`). Deliberately does not cover arrays/objects —
/// structured data crosses the boundary through the Blackboard or through
/// `osm:bt`'s own node/tick plumbing instead.
#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
  Null,
  Undefined,
  Bool(bool),
  Number(f64),
  String(String),
}

/// A resolved, callable JS value (`GetCallable`). Holds a persistent
/// handle so it outlives the `HandleScope` it was looked up in.
pub struct JsFunction {
  pub(crate) func: v8::Global<v8::Function>,
}

/// Identifies one in-flight call to a JS leaf function across repeated
/// polls (`crate::bridge` drives this by resubmitting `poll_leaf` jobs
/// until it settles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafCallId(u64);

enum LeafCallState {
  Pending(v8::Global<v8::Promise>),
  Settled(Result<Status, String>),
}

pub(crate) struct JsRuntimeState {
  context: v8::Global<v8::Context>,
  pending_leaf_calls: StdHashMap<u64, LeafCallState>,
  next_leaf_call_id: u64,
  /// Installed once by the owning `Bridge` right after construction, so
  /// `createLeafNode`/`createBlockingLeafNode` (`binding.rs`) can wire up
  /// leaves that tick from any host thread.
  leaf_scheduler: Option<leaf::LeafScheduler>,
  /// Installed once by the owning `Bridge`, so `tick(node)` (`binding.rs`)
  /// can turn a [`crate::bt::Outcome::Pending`] into a real `Promise`
  /// instead of blocking the Event Loop thread on it.
  promise_bridge: Option<PromiseBridge>,
  /// The Bridge's single `Manager` and its shutdown signal, installed once
  /// so `newTicker(intervalMillis, node)` (`binding.rs`) can hand new
  /// tickers a way to stop in step with the Bridge (`§4.6`).
  manager_context: Option<(std::sync::Arc<crate::bt::manager::Manager>, tokio::sync::watch::Receiver<bool>)>,
}

/// Lets a native v8 callback spawn a Rust future off the Event Loop
/// thread and get notified back on it once the future resolves, so it
/// can settle a `v8::PromiseResolver` it created before returning.
#[derive(Clone)]
pub struct PromiseBridge {
  pub handle: tokio::runtime::Handle,
  /// Schedules a job back onto the Event Loop thread. Mirrors
  /// `crate::bridge::Bridge::run_on_loop` without naming that type (see
  /// `js/leaf.rs` for why this crate avoids depending on `crate::bridge`).
  pub run_on_loop: std::sync::Arc<dyn Fn(Box<dyn FnOnce(&mut JsRuntime) + Send>) -> bool + Send + Sync>,
}

fn init_v8_platform() {
  static V8_INIT: Once = Once::new();
  V8_INIT.call_once(|| {
    let platform = v8::new_default_platform(0, false).make_shared();
    v8::V8::initialize_platform(platform);
    v8::V8::initialize();
  });
}

/// One JS execution context bound to one `v8` isolate. Owned exclusively
/// by the Event Loop thread.
pub struct JsRuntime {
  isolate: v8::OwnedIsolate,
  state: Rc<RefCell<JsRuntimeState>>,
}

impl JsRuntime {
  pub fn new(options: JsRuntimeOptions) -> Self {
    init_v8_platform();
    if !options.v8_flags.is_empty() {
      v8::V8::set_flags_from_string(&options.v8_flags.join(" "));
    }

    let mut isolate = v8::Isolate::new(v8::CreateParams::default());
    let context = {
      let scope = &mut v8::HandleScope::new(&mut isolate);
      let context = binding::create_new_context(scope);
      v8::Global::new(scope, context)
    };

    let state = Rc::new(RefCell::new(JsRuntimeState {
      context,
      pending_leaf_calls: StdHashMap::new(),
      next_leaf_call_id: 1,
      leaf_scheduler: None,
      promise_bridge: None,
      manager_context: None,
    }));

    // `binding.rs`'s native function callbacks retrieve this slot to reach
    // back into host state (the leaf scheduler, pending calls) without
    // capturing anything in a closure (`v8::FunctionTemplate` callbacks
    // are plain function pointers).
    isolate.set_slot(state.clone());

    JsRuntime { isolate, state }
  }

  /// Installs the `osm:bt` surface (`§4.5`) as `globalThis.bt`.
  pub fn init_environment(&mut self) {
    let scope = &mut self.handle_scope();
    binding::install_bt_module(scope);
  }

  /// Called once by the owning `Bridge`, immediately after construction,
  /// to give `createLeafNode`/`createBlockingLeafNode` a way to schedule
  /// JS calls from whatever host thread later ticks the resulting node.
  pub fn set_leaf_scheduler(&mut self, scheduler: leaf::LeafScheduler) {
    self.state.borrow_mut().leaf_scheduler = Some(scheduler);
  }

  pub(crate) fn leaf_scheduler(&self) -> Option<leaf::LeafScheduler> {
    self.state.borrow().leaf_scheduler.clone()
  }

  /// Called once by the owning `Bridge`, immediately after construction,
  /// so `tick(node)` (`binding.rs`) can settle a `Promise` for a pending
  /// outcome from off-thread.
  pub fn set_promise_bridge(&mut self, bridge: PromiseBridge) {
    self.state.borrow_mut().promise_bridge = Some(bridge);
  }

  pub(crate) fn promise_bridge(&self) -> Option<PromiseBridge> {
    self.state.borrow().promise_bridge.clone()
  }

  /// Called once by the owning `Bridge`, so `newTicker` (`binding.rs`) can
  /// create tickers bound to the Bridge's manager and shutdown signal.
  pub fn set_manager_context(
    &mut self,
    manager: std::sync::Arc<crate::bt::manager::Manager>,
    bridge_shutdown: tokio::sync::watch::Receiver<bool>,
  ) {
    self.state.borrow_mut().manager_context = Some((manager, bridge_shutdown));
  }

  pub(crate) fn manager_context(
    &self,
  ) -> Option<(std::sync::Arc<crate::bt::manager::Manager>, tokio::sync::watch::Receiver<bool>)> {
    self.state.borrow().manager_context.clone()
  }

  fn handle_scope(&mut self) -> v8::HandleScope<'_> {
    let context = self.state.borrow().context.clone();
    v8::HandleScope::with_context(&mut self.isolate, context)
  }

  /// `LoadScript(name, source)` (`§4.2`).
  pub fn load_script(&mut self, name: &str, source: &str) -> BridgeResult<()> {
    let scope = &mut self.handle_scope();
    let tc_scope = &mut v8::TryCatch::new(scope);

    let src = v8::String::new(tc_scope, source).ok_or_else(|| BridgeError::CompileError {
      name: name.to_string(),
      message: "source is not representable as a v8 string".to_string(),
    })?;
    let origin = convert::script_origin(tc_scope, name);

    let script = match v8::Script::compile(tc_scope, src, Some(&origin)) {
      Some(script) => script,
      None => {
        return Err(BridgeError::CompileError {
          name: name.to_string(),
          message: convert::exception_message(tc_scope),
        });
      }
    };

    match script.run(tc_scope) {
      Some(_) => Ok(()),
      None => Err(BridgeError::RuntimeError {
        name: name.to_string(),
        message: convert::exception_message(tc_scope),
      }),
    }
  }

  pub fn set_global(&mut self, name: &str, value: JsValue) {
    let scope = &mut self.handle_scope();
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).unwrap();
    let v8_value = convert::to_v8(scope, &value);
    global.set(scope, key.into(), v8_value);
  }

  /// `GetGlobal(name) → (value, exists)`; `undefined` is treated as absent
  /// (`§4.2`).
  pub fn get_global(&mut self, name: &str) -> (JsValue, bool) {
    let scope = &mut self.handle_scope();
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).unwrap();
    match global.get(scope, key.into()) {
      Some(value) if !value.is_undefined() => (convert::from_v8(scope, value), true),
      _ => (JsValue::Undefined, false),
    }
  }

  pub fn get_callable(&mut self, name: &str) -> BridgeResult<JsFunction> {
    let scope = &mut self.handle_scope();
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).unwrap();
    let value = global.get(scope, key.into());

    let value = match value {
      Some(value) if !value.is_undefined() => value,
      _ => return Err(BridgeError::NotFoundError(name.to_string())),
    };

    let func = v8::Local::<v8::Function>::try_from(value)
      .map_err(|_| BridgeError::NotCallableError(name.to_string()))?;
    Ok(JsFunction {
      func: v8::Global::new(scope, func),
    })
  }

  /// Reads `name` off the global object and unwraps it as a `bt.Node`
  /// handle, for CLI-style entry points that build a tree at script load
  /// time and hand it back as a plain global rather than through a
  /// leaf/tick call (`jstree_cli` uses this).
  pub fn get_root_node(&mut self, name: &str) -> BridgeResult<Node> {
    let scope = &mut self.handle_scope();
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).unwrap();
    let value = match global.get(scope, key.into()) {
      Some(value) if !value.is_undefined() => value,
      _ => return Err(BridgeError::NotFoundError(name.to_string())),
    };
    binding::unwrap_node(scope, value).ok_or_else(|| BridgeError::NotCallableError(name.to_string()))
  }

  pub fn expose_blackboard(&mut self, name: &str, bb: BlackboardArc) {
    let scope = &mut self.handle_scope();
    let object = binding::build_blackboard_object(scope, bb);
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name).unwrap();
    global.set(scope, key.into(), object.into());
  }

  /// Calls `func(children)` once, where `children` is a JS array of
  /// wrapped node handles (empty for `createLeafNode`/
  /// `createBlockingLeafNode`, the node's own children for the generic
  /// `node(tick, ...children)` constructor), and classifies the result: a
  /// direct status string settles immediately, a `Promise` is tracked
  /// under a new [`LeafCallId`] for [`Self::poll_leaf`] to drive to
  /// completion.
  pub fn call_leaf(&mut self, func: &JsFunction, children: &[Node]) -> LeafCallId {
    let state_rc = self.state.clone();
    let scope = &mut self.handle_scope();
    let tc_scope = &mut v8::TryCatch::new(scope);

    let recv = v8::undefined(tc_scope).into();
    let local_func = v8::Local::new(tc_scope, &func.func);
    let children_array = binding::wrap_nodes(tc_scope, children);

    let result = match local_func.call(tc_scope, recv, &[children_array.into()]) {
      Some(value) => classify_leaf_result(tc_scope, value),
      None => LeafCallState::Settled(Err(convert::exception_message(tc_scope))),
    };

    let mut state = state_rc.borrow_mut();
    let id = state.next_leaf_call_id;
    state.next_leaf_call_id += 1;
    state.pending_leaf_calls.insert(id, result);
    LeafCallId(id)
  }

  /// Pumps the microtask queue once and checks whether `id`'s call has
  /// settled. Returns `None` while still pending.
  pub fn poll_leaf(&mut self, id: LeafCallId) -> Option<Result<Status, String>> {
    let state_rc = self.state.clone();
    let scope = &mut self.handle_scope();
    scope.perform_microtask_checkpoint();

    let mut state = state_rc.borrow_mut();
    let entry = state.pending_leaf_calls.get(&id.0)?;
    match entry {
      LeafCallState::Settled(result) => {
        let result = result.clone();
        state.pending_leaf_calls.remove(&id.0);
        Some(result)
      }
      LeafCallState::Pending(promise) => {
        let promise = v8::Local::new(scope, promise);
        match promise.state() {
          v8::PromiseState::Pending => None,
          v8::PromiseState::Fulfilled => {
            let value = promise.result(scope);
            let status = convert::status_from_v8(scope, value)
              .ok_or_else(|| "JS leaf resolved with a non-status value".to_string());
            drop(state);
            let mut state = state_rc.borrow_mut();
            state.pending_leaf_calls.remove(&id.0);
            Some(status)
          }
          v8::PromiseState::Rejected => {
            let value = promise.result(scope);
            let message = value.to_rust_string_lossy(scope);
            drop(state);
            let mut state = state_rc.borrow_mut();
            state.pending_leaf_calls.remove(&id.0);
            Some(Err(message))
          }
        }
      }
    }
  }
}

fn classify_leaf_result(
  scope: &mut v8::TryCatch<v8::HandleScope>,
  value: v8::Local<v8::Value>,
) -> LeafCallState {
  if value.is_promise() {
    let promise = v8::Local::<v8::Promise>::try_from(value).unwrap();
    LeafCallState::Pending(v8::Global::new(scope, promise))
  } else {
    match convert::status_from_v8(scope, value) {
      Some(status) => LeafCallState::Settled(Ok(status)),
      None => LeafCallState::Settled(Err(
        "JS leaf function must return a bt status string or a Promise of one".to_string(),
      )),
    }
  }
}
