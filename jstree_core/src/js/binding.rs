//! The `osm:bt` surface (`§4.5`): everything exposed as `globalThis.bt`,
//! plus the Blackboard accessor object (`§4.1`).
//!
//! Native v8 `Function` callbacks are plain function pointers — they
//! cannot capture Rust closures — so every callback here reaches back
//! into host state through the `Rc<RefCell<JsRuntimeState>>` stashed in
//! the isolate's slot (`JsRuntime::new`) rather than through captures.

use super::leaf::{SchedulerLeafCall, SyncLeaf};
use super::{convert, JsFunction, JsRuntimeState};
use crate::blackboard::{BlackboardArc, Value as BbValue};
use crate::bt::adapter::JSLeafAdapter;
use crate::bt::blocking::BlockingJSLeaf;
use crate::bt::manager::{Manager, Ticker};
use crate::bt::{self, Node, Outcome, Status};
use crate::prelude::HashMap;

use compact_str::CompactString;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn state_slot<'s>(scope: &mut v8::HandleScope<'s>) -> Rc<RefCell<JsRuntimeState>> {
  scope
    .get_slot::<Rc<RefCell<JsRuntimeState>>>()
    .expect("JsRuntimeState slot missing; JsRuntime::new must set it before running any script")
    .clone()
}

fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
  let message = v8::String::new(scope, message).unwrap();
  let exception = v8::Exception::type_error(scope, message);
  scope.throw_exception(exception);
}

// --- Node wrapping -----------------------------------------------------
//
// A Node handle is an opaque object with one internal field holding a
// `v8::External` over a raw `Box::into_raw(Box<Node>)` pointer. The Box is
// intentionally never freed: wiring a GC finalizer means guessing at a
// `rusty_v8`-version-specific weak-callback signature, so this trades a
// per-node leak (one node lives for the lifetime of the isolate) for
// simplicity. Acceptable for a tree that's built once at startup and
// ticked for the life of the process.

fn wrapped_object_template<'s>(scope: &mut v8::HandleScope<'s>) -> v8::Local<'s, v8::ObjectTemplate> {
  let template = v8::ObjectTemplate::new(scope);
  template.set_internal_field_count(1);
  template
}

pub fn wrap_node<'s>(scope: &mut v8::HandleScope<'s>, node: Node) -> v8::Local<'s, v8::Value> {
  let template = wrapped_object_template(scope);
  let obj = template.new_instance(scope).unwrap();
  let ptr = Box::into_raw(Box::new(node));
  let external = v8::External::new(scope, ptr as *mut std::ffi::c_void);
  obj.set_internal_field(0, external.into());
  obj.into()
}

pub fn wrap_nodes<'s>(scope: &mut v8::HandleScope<'s>, nodes: &[Node]) -> v8::Local<'s, v8::Value> {
  let array = v8::Array::new(scope, nodes.len() as i32);
  for (i, node) in nodes.iter().enumerate() {
    let wrapped = wrap_node(scope, node.clone());
    array.set_index(scope, i as u32, wrapped);
  }
  array.into()
}

pub(crate) fn unwrap_node(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Node> {
  let obj = value.to_object(scope)?;
  if obj.internal_field_count() < 1 {
    return None;
  }
  let field = obj.get_internal_field(scope, 0)?;
  let external = v8::Local::<v8::External>::try_from(field).ok()?;
  let ptr = external.value() as *const Node;
  if ptr.is_null() {
    return None;
  }
  // SAFETY: `ptr` was produced by `wrap_node`'s `Box::into_raw` and is
  // never freed for the lifetime of the isolate.
  Some(unsafe { (*ptr).clone() })
}

fn unwrap_ticker(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Arc<Ticker>> {
  let obj = value.to_object(scope)?;
  if obj.internal_field_count() < 1 {
    return None;
  }
  let field = obj.get_internal_field(scope, 0)?;
  let external = v8::Local::<v8::External>::try_from(field).ok()?;
  let ptr = external.value() as *const Arc<Ticker>;
  if ptr.is_null() {
    return None;
  }
  // SAFETY: same leak-instead-of-finalize tradeoff as `unwrap_node`.
  Some(unsafe { (*ptr).clone() })
}

fn wrap_ticker<'s>(scope: &mut v8::HandleScope<'s>, ticker: Arc<Ticker>) -> v8::Local<'s, v8::Object> {
  let template = wrapped_object_template(scope);
  let obj = template.new_instance(scope).unwrap();
  let ptr = Box::into_raw(Box::new(ticker));
  let external = v8::External::new(scope, ptr as *mut std::ffi::c_void);
  obj.set_internal_field(0, external.into());

  let stop_fn = v8::Function::builder(ticker_stop_callback)
    .data(obj.into())
    .build(scope)
    .unwrap();
  let key = v8::String::new(scope, "stop").unwrap();
  obj.set(scope, key.into(), stop_fn.into());
  obj
}

fn unwrap_manager(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Arc<Manager>> {
  let obj = value.to_object(scope)?;
  if obj.internal_field_count() < 1 {
    return None;
  }
  let field = obj.get_internal_field(scope, 0)?;
  let external = v8::Local::<v8::External>::try_from(field).ok()?;
  let ptr = external.value() as *const Arc<Manager>;
  if ptr.is_null() {
    return None;
  }
  // SAFETY: same leak-instead-of-finalize tradeoff as `unwrap_node`.
  Some(unsafe { (*ptr).clone() })
}

/// `bt.newManager()` (`§4.5`, `§4.6`): a standalone [`Manager`] a script can
/// spawn its own tickers on, independent of the one the host installed via
/// `Bridge::manager`/`newTicker`. Shares the Bridge's shutdown signal so its
/// tickers still settle `stop()` promptly on `Bridge::Stop`.
fn wrap_manager<'s>(scope: &mut v8::HandleScope<'s>, manager: Arc<Manager>) -> v8::Local<'s, v8::Object> {
  let template = wrapped_object_template(scope);
  let obj = template.new_instance(scope).unwrap();
  let ptr = Box::into_raw(Box::new(manager));
  let external = v8::External::new(scope, ptr as *mut std::ffi::c_void);
  obj.set_internal_field(0, external.into());

  let new_ticker_fn = v8::Function::builder(manager_new_ticker_callback)
    .data(obj.into())
    .build(scope)
    .unwrap();
  let key = v8::String::new(scope, "newTicker").unwrap();
  obj.set(scope, key.into(), new_ticker_fn.into());
  obj
}

fn manager_new_ticker_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let receiver = match args.data() {
    data if !data.is_undefined() => data,
    _ => {
      throw_type_error(scope, "newTicker() called without a receiver");
      return;
    }
  };
  let manager = match unwrap_manager(scope, receiver) {
    Some(m) => m,
    None => {
      throw_type_error(scope, "newTicker() called on a non-Manager receiver");
      return;
    }
  };
  let interval_millis = args.get(0).number_value(scope).unwrap_or(0.0);
  let node = match unwrap_node(scope, args.get(1)) {
    Some(n) => n,
    None => {
      throw_type_error(scope, "argument 1 must be a bt.Node");
      return;
    }
  };

  let state = state_slot(scope);
  let bridge_shutdown = match state.borrow().manager_context.clone() {
    Some((_, shutdown)) => shutdown,
    None => {
      throw_type_error(scope, "no manager installed on this runtime");
      return;
    }
  };

  let ticker = manager.new_ticker(Duration::from_millis(interval_millis.max(0.0) as u64), node, bridge_shutdown);
  let wrapped = wrap_ticker(scope, ticker);
  rv.set(wrapped.into());
}

fn new_manager_callback(
  scope: &mut v8::HandleScope,
  _args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let manager = Manager::new();
  let wrapped = wrap_manager(scope, manager);
  rv.set(wrapped.into());
}

// --- Promises for pending outcomes --------------------------------------
//
// `tick(node)` and `ticker.stop()` are the only two operations that can
// produce a genuine async result from a JS callback. Both route through
// the `PromiseBridge` installed by `Bridge` so the settling happens back
// on the Event Loop thread instead of blocking it.

fn settle_status_promise<'s>(
  scope: &mut v8::HandleScope<'s>,
  state: &Rc<RefCell<JsRuntimeState>>,
  fut: bt::StatusFuture,
) -> Option<v8::Local<'s, v8::Value>> {
  let bridge = state.borrow().promise_bridge.clone();
  let bridge = match bridge {
    Some(b) => b,
    None => {
      throw_type_error(
        scope,
        "tick() produced a pending result but no async runtime is available",
      );
      return None;
    }
  };

  let resolver = v8::PromiseResolver::new(scope)?;
  let promise = resolver.get_promise(scope);
  let global_resolver = v8::Global::new(scope, resolver);
  let run_on_loop = bridge.run_on_loop.clone();

  bridge.handle.spawn(async move {
    let status = fut.await;
    let _ = run_on_loop(Box::new(move |rt| {
      let scope = &mut rt.handle_scope();
      let resolver = v8::Local::new(scope, &global_resolver);
      let js_status = convert::status_to_v8(scope, status);
      resolver.resolve(scope, js_status);
    }));
  });

  Some(promise.into())
}

// --- bt.node / bt.createLeafNode / bt.createBlockingLeafNode -----------

fn require_function<'s>(
  scope: &mut v8::HandleScope<'s>,
  value: v8::Local<'s, v8::Value>,
  index: usize,
) -> Option<JsFunction> {
  let func = v8::Local::<v8::Function>::try_from(value).ok()?;
  let _ = index;
  Some(JsFunction {
    func: v8::Global::new(scope, func),
  })
}

fn collect_children(
  scope: &mut v8::HandleScope,
  args: &v8::FunctionCallbackArguments,
  start: i32,
) -> Result<Vec<Node>, usize> {
  let mut children = Vec::new();
  for i in start..args.length() {
    let value = args.get(i);
    match unwrap_node(scope, value) {
      Some(node) => children.push(node),
      None => return Err(i as usize),
    }
  }
  Ok(children)
}

/// `bt.node(tick, ...children)`: builds a native node whose tick calls
/// `tick(children)` in JS on every activation. Takes the sync fast path
/// when the call settles without returning a Promise; only falls back to
/// polling across ticks once it has actually seen one (`§4.5`, `§8` sync
/// fast path). Distinct from `createLeafNode`, which always answers
/// `running` on its first activation regardless.
fn node_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let tick_arg = args.get(0);
  let func = match require_function(scope, tick_arg, 0) {
    Some(f) => f,
    None => {
      throw_type_error(scope, "argument 0 must be callable");
      return;
    }
  };

  let children = match collect_children(scope, &args, 1) {
    Ok(c) => c,
    Err(index) => {
      throw_type_error(scope, &format!("argument {index} must be a bt.Node"));
      return;
    }
  };

  let state = state_slot(scope);
  let scheduler = match state.borrow().leaf_scheduler.clone() {
    Some(s) => s,
    None => {
      throw_type_error(scope, "no leaf scheduler installed on this runtime");
      return;
    }
  };

  let leaf = SyncLeaf::new(scheduler, func, children.clone());
  let node = Node::new(leaf.as_tick(), children);
  let wrapped = wrap_node(scope, node);
  rv.set(wrapped);
}

/// `bt.createLeafNode(tick)`: a non-blocking leaf that always answers
/// `running` on its first activation and is polled to completion across
/// subsequent ticks, independent of how quickly `tick` itself settles.
/// Unlike `bt.node`, it never takes the sync fast path (`§4.3`).
fn create_leaf_node_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let tick_arg = args.get(0);
  let func = match require_function(scope, tick_arg, 0) {
    Some(f) => f,
    None => {
      throw_type_error(scope, "argument 0 must be callable");
      return;
    }
  };

  let state = state_slot(scope);
  let scheduler = match state.borrow().leaf_scheduler.clone() {
    Some(s) => s,
    None => {
      throw_type_error(scope, "no leaf scheduler installed on this runtime");
      return;
    }
  };

  let call = SchedulerLeafCall::new(scheduler, func, Vec::new());
  let adapter = JSLeafAdapter::new(call);
  let node = Node::new(adapter.as_tick(), Vec::new());
  let wrapped = wrap_node(scope, node);
  rv.set(wrapped);
}

/// `bt.createBlockingLeafNode(tick)` (`§4.4`): blocks the ticking thread
/// until `tick()` settles or the Bridge shuts down.
fn create_blocking_leaf_node_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let tick_arg = args.get(0);
  let func = match require_function(scope, tick_arg, 0) {
    Some(f) => f,
    None => {
      throw_type_error(scope, "argument 0 must be callable");
      return;
    }
  };

  let state = state_slot(scope);
  let scheduler = match state.borrow().leaf_scheduler.clone() {
    Some(s) => s,
    None => {
      throw_type_error(scope, "no leaf scheduler installed on this runtime");
      return;
    }
  };

  let call = SchedulerLeafCall::new(scheduler, func, Vec::new());
  let leaf = BlockingJSLeaf::new(call);
  let node = Node::new(leaf.as_tick(), Vec::new());
  let wrapped = wrap_node(scope, node);
  rv.set(wrapped);
}

// --- composites and decorators ------------------------------------------

fn composite_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
  build: fn(Vec<Node>) -> Node,
) {
  let children = match collect_children(scope, &args, 0) {
    Ok(c) => c,
    Err(index) => {
      throw_type_error(scope, &format!("argument {index} must be a bt.Node"));
      return;
    }
  };
  let node = build(children);
  let wrapped = wrap_node(scope, node);
  rv.set(wrapped);
}

fn sequence_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  composite_callback(scope, args, rv, bt::sequence);
}

fn fallback_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  composite_callback(scope, args, rv, bt::fallback);
}

fn fork_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  composite_callback(scope, args, rv, bt::fork);
}

/// Decorators (`not`/`async`/`memorize`) take an existing `bt.Node` rather
/// than a bare JS tick function: JS has no way to name a `Tick`
/// independent of the Node it was built into, so the decorated Tick
/// simply re-invokes the wrapped node's own tick and the resulting node
/// keeps the same children for introspection purposes.
fn decorator_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
  decorate: fn(bt::Tick) -> bt::Tick,
) {
  let inner = match unwrap_node(scope, args.get(0)) {
    Some(n) => n,
    None => {
      throw_type_error(scope, "argument 0 must be a bt.Node");
      return;
    }
  };
  let children = inner.children().to_vec();
  let tick: bt::Tick = {
    let inner = inner.clone();
    Arc::new(move |_children: &[Node]| -> Outcome { inner.tick() })
  };
  let decorated = decorate(tick);
  let node = Node::new(decorated, children);
  let wrapped = wrap_node(scope, node);
  rv.set(wrapped);
}

fn not_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  decorator_callback(scope, args, rv, bt::not);
}

fn async_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  decorator_callback(scope, args, rv, bt::async_);
}

fn memorize_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, rv: v8::ReturnValue) {
  decorator_callback(scope, args, rv, bt::memorize);
}

/// `bt.tick(node)`: ticks synchronously if possible, else returns a
/// `Promise` settling once the underlying future resolves (`§4.5`).
fn tick_callback(scope: &mut v8::HandleScope, args: v8::FunctionCallbackArguments, mut rv: v8::ReturnValue) {
  let node = match unwrap_node(scope, args.get(0)) {
    Some(n) => n,
    None => {
      throw_type_error(scope, "argument 0 must be a bt.Node");
      return;
    }
  };

  match node.tick() {
    Outcome::Ready(status) => {
      let value = convert::status_to_v8(scope, status);
      rv.set(value);
    }
    Outcome::Pending(fut) => {
      let state = state_slot(scope);
      if let Some(promise) = settle_status_promise(scope, &state, fut) {
        rv.set(promise);
      }
    }
  }
}

/// `bt.newTicker(intervalMillis, node)` (`§4.6`): spawns a background loop
/// on the Bridge's manager. Returns a handle with a `.stop()` method
/// returning a `Promise` that settles once the loop has exited.
fn new_ticker_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let interval_millis = args.get(0).number_value(scope).unwrap_or(0.0);
  let node = match unwrap_node(scope, args.get(1)) {
    Some(n) => n,
    None => {
      throw_type_error(scope, "argument 1 must be a bt.Node");
      return;
    }
  };

  let state = state_slot(scope);
  let (manager, bridge_shutdown) = match state.borrow().manager_context.clone() {
    Some(ctx) => ctx,
    None => {
      throw_type_error(scope, "no manager installed on this runtime");
      return;
    }
  };

  let ticker = manager.new_ticker(Duration::from_millis(interval_millis.max(0.0) as u64), node, bridge_shutdown);
  let wrapped = wrap_ticker(scope, ticker);
  rv.set(wrapped.into());
}

fn ticker_stop_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let receiver = match args.data() {
    data if !data.is_undefined() => data,
    _ => {
      throw_type_error(scope, "stop() called without a receiver");
      return;
    }
  };
  let ticker = match unwrap_ticker(scope, receiver) {
    Some(t) => t,
    None => {
      throw_type_error(scope, "stop() called on a non-Ticker receiver");
      return;
    }
  };

  let state = state_slot(scope);
  let bridge = state.borrow().promise_bridge.clone();
  let bridge = match bridge {
    Some(b) => b,
    None => {
      throw_type_error(scope, "no async runtime available to await stop()");
      return;
    }
  };

  let resolver = match v8::PromiseResolver::new(scope) {
    Some(r) => r,
    None => return,
  };
  let promise = resolver.get_promise(scope);
  let global_resolver = v8::Global::new(scope, resolver);
  let run_on_loop = bridge.run_on_loop.clone();

  bridge.handle.spawn(async move {
    ticker.stop().await;
    let _ = run_on_loop(Box::new(move |rt| {
      let scope = &mut rt.handle_scope();
      let resolver = v8::Local::new(scope, &global_resolver);
      let undef = v8::undefined(scope);
      resolver.resolve(scope, undef.into());
    }));
  });

  rv.set(promise.into());
}

// --- module/context setup ------------------------------------------------

type Callback = fn(&mut v8::HandleScope, v8::FunctionCallbackArguments, v8::ReturnValue);

fn set_fn(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str, callback: Callback) {
  let key = v8::String::new(scope, name).unwrap();
  let func = v8::Function::new(scope, callback).unwrap();
  obj.set(scope, key.into(), func.into());
}

fn set_str(scope: &mut v8::HandleScope, obj: v8::Local<v8::Object>, name: &str, value: &str) {
  let key = v8::String::new(scope, name).unwrap();
  let val = v8::String::new(scope, value).unwrap();
  obj.set(scope, key.into(), val.into());
}

pub fn create_new_context<'s>(scope: &mut v8::HandleScope<'s, ()>) -> v8::Local<'s, v8::Context> {
  v8::Context::new(scope)
}

/// Installs `globalThis.bt` with every operation in `§4.5`: `selector` is
/// the documented alias of `fallback`; `newManager()` hands out standalone
/// `Manager`s independent of the one the Bridge installs for `newTicker`;
/// `Blackboard` is a JS-callable constructor mirroring `§4.1`.
pub fn install_bt_module(scope: &mut v8::HandleScope) {
  let bt = v8::Object::new(scope);

  set_str(scope, bt, "running", Status::Running.as_str());
  set_str(scope, bt, "success", Status::Success.as_str());
  set_str(scope, bt, "failure", Status::Failure.as_str());

  set_fn(scope, bt, "node", node_callback);
  set_fn(scope, bt, "createLeafNode", create_leaf_node_callback);
  set_fn(scope, bt, "createBlockingLeafNode", create_blocking_leaf_node_callback);
  set_fn(scope, bt, "sequence", sequence_callback);
  set_fn(scope, bt, "fallback", fallback_callback);
  set_fn(scope, bt, "selector", fallback_callback);
  set_fn(scope, bt, "fork", fork_callback);
  set_fn(scope, bt, "not", not_callback);
  set_fn(scope, bt, "async", async_callback);
  set_fn(scope, bt, "memorize", memorize_callback);
  set_fn(scope, bt, "tick", tick_callback);
  set_fn(scope, bt, "newTicker", new_ticker_callback);
  set_fn(scope, bt, "newManager", new_manager_callback);
  set_fn(scope, bt, "Blackboard", blackboard_constructor_callback);

  let global = scope.get_current_context().global(scope);
  let key = v8::String::new(scope, "bt").unwrap();
  global.set(scope, key.into(), bt.into());
}

// --- Blackboard exposure (`§4.1`) ---------------------------------------

fn bb_value_to_v8<'s>(scope: &mut v8::HandleScope<'s>, value: &BbValue) -> v8::Local<'s, v8::Value> {
  match value {
    BbValue::Null => v8::null(scope).into(),
    BbValue::Bool(b) => v8::Boolean::new(scope, *b).into(),
    BbValue::Number(n) => v8::Number::new(scope, *n).into(),
    BbValue::String(s) => v8::String::new(scope, s).unwrap().into(),
    BbValue::Array(items) => {
      let items = items.read();
      let array = v8::Array::new(scope, items.len() as i32);
      for (i, item) in items.iter().enumerate() {
        let v = bb_value_to_v8(scope, item);
        array.set_index(scope, i as u32, v);
      }
      array.into()
    }
    BbValue::Object(entries) => {
      let entries = entries.read();
      let obj = v8::Object::new(scope);
      for (k, v) in entries.iter() {
        let key = v8::String::new(scope, k).unwrap();
        let val = bb_value_to_v8(scope, v);
        obj.set(scope, key.into(), val);
      }
      obj.into()
    }
  }
}

fn bb_value_from_v8(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> BbValue {
  if value.is_null() {
    BbValue::Null
  } else if value.is_boolean() {
    BbValue::Bool(value.boolean_value(scope))
  } else if value.is_number() {
    BbValue::Number(value.number_value(scope).unwrap_or(f64::NAN))
  } else if value.is_array() {
    let array = v8::Local::<v8::Array>::try_from(value).unwrap();
    let len = array.length();
    let mut items = Vec::with_capacity(len as usize);
    for i in 0..len {
      if let Some(item) = array.get_index(scope, i) {
        items.push(bb_value_from_v8(scope, item));
      }
    }
    BbValue::array(items)
  } else if value.is_object() && !value.is_function() {
    let obj = value.to_object(scope).unwrap();
    let keys = obj.get_own_property_names(scope, Default::default()).unwrap();
    let mut entries = HashMap::default();
    for i in 0..keys.length() {
      if let Some(key) = keys.get_index(scope, i) {
        let key_str = key.to_rust_string_lossy(scope);
        if let Some(v) = obj.get(scope, key) {
          entries.insert(CompactString::from(key_str), bb_value_from_v8(scope, v));
        }
      }
    }
    BbValue::object(entries)
  } else {
    BbValue::String(CompactString::from(value.to_rust_string_lossy(scope)))
  }
}

fn blackboard_get_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let key = args.get(0).to_rust_string_lossy(scope);
  match bb.get(&key) {
    Some(value) => {
      let v = bb_value_to_v8(scope, &value);
      rv.set(v);
    }
    None => rv.set(v8::undefined(scope).into()),
  }
}

fn blackboard_has_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let key = args.get(0).to_rust_string_lossy(scope);
  rv.set(v8::Boolean::new(scope, bb.has(&key)).into());
}

fn blackboard_set_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let key = args.get(0).to_rust_string_lossy(scope);
  let value = bb_value_from_v8(scope, args.get(1));
  bb.set(key, value);
}

fn blackboard_delete_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let key = args.get(0).to_rust_string_lossy(scope);
  rv.set(v8::Boolean::new(scope, bb.delete(&key)).into());
}

fn blackboard_clear_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  _rv: v8::ReturnValue,
) {
  if let Some(bb) = bb_from_data(scope, &args) {
    bb.clear();
  }
}

fn blackboard_keys_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let keys = bb.keys();
  let array = v8::Array::new(scope, keys.len() as i32);
  for (i, key) in keys.iter().enumerate() {
    let v = v8::String::new(scope, key).unwrap();
    array.set_index(scope, i as u32, v.into());
  }
  rv.set(array.into());
}

fn blackboard_len_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  rv.set(v8::Number::new(scope, bb.len() as f64).into());
}

fn blackboard_is_empty_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  rv.set(v8::Boolean::new(scope, bb.is_empty()).into());
}

fn blackboard_snapshot_callback(
  scope: &mut v8::HandleScope,
  args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = match bb_from_data(scope, &args) {
    Some(bb) => bb,
    None => return,
  };
  let snapshot = bb.snapshot();
  let obj = v8::Object::new(scope);
  for (k, v) in snapshot.iter() {
    let key = v8::String::new(scope, k).unwrap();
    let val = bb_value_to_v8(scope, v);
    obj.set(scope, key.into(), val);
  }
  rv.set(obj.into());
}

fn bb_from_data(scope: &mut v8::HandleScope, args: &v8::FunctionCallbackArguments) -> Option<BlackboardArc> {
  let data = args.data();
  if data.is_undefined() {
    return None;
  }
  let obj = data.to_object(scope)?;
  if obj.internal_field_count() < 1 {
    return None;
  }
  let field = obj.get_internal_field(scope, 0)?;
  let external = v8::Local::<v8::External>::try_from(field).ok()?;
  let ptr = external.value() as *const BlackboardArc;
  if ptr.is_null() {
    return None;
  }
  // SAFETY: same leak-instead-of-finalize tradeoff as `unwrap_node`; the
  // backing `Arc` clone below keeps the data alive regardless.
  Some(unsafe { (*ptr).clone() })
}

/// Builds the method-bound accessor object exposed by
/// `Bridge::expose_blackboard` (`§4.1` `ExposeToJS`).
pub fn build_blackboard_object<'s>(scope: &mut v8::HandleScope<'s>, bb: BlackboardArc) -> v8::Local<'s, v8::Object> {
  let template = wrapped_object_template(scope);
  let obj = template.new_instance(scope).unwrap();
  let ptr = Box::into_raw(Box::new(bb));
  let external = v8::External::new(scope, ptr as *mut std::ffi::c_void);
  obj.set_internal_field(0, external.into());
  let data: v8::Local<v8::Value> = obj.into();

  let get_fn = v8::Function::builder(blackboard_get_callback).data(data).build(scope).unwrap();
  let has_fn = v8::Function::builder(blackboard_has_callback).data(data).build(scope).unwrap();
  let set_fn = v8::Function::builder(blackboard_set_callback).data(data).build(scope).unwrap();
  let delete_fn = v8::Function::builder(blackboard_delete_callback).data(data).build(scope).unwrap();
  let clear_fn = v8::Function::builder(blackboard_clear_callback).data(data).build(scope).unwrap();
  let keys_fn = v8::Function::builder(blackboard_keys_callback).data(data).build(scope).unwrap();
  let len_fn = v8::Function::builder(blackboard_len_callback).data(data).build(scope).unwrap();
  let is_empty_fn = v8::Function::builder(blackboard_is_empty_callback).data(data).build(scope).unwrap();
  let snapshot_fn = v8::Function::builder(blackboard_snapshot_callback).data(data).build(scope).unwrap();

  let get_key = v8::String::new(scope, "get").unwrap();
  let has_key = v8::String::new(scope, "has").unwrap();
  let set_key = v8::String::new(scope, "set").unwrap();
  let delete_key = v8::String::new(scope, "delete").unwrap();
  let clear_key = v8::String::new(scope, "clear").unwrap();
  let keys_key = v8::String::new(scope, "keys").unwrap();
  let len_key = v8::String::new(scope, "len").unwrap();
  let is_empty_key = v8::String::new(scope, "isEmpty").unwrap();
  let snapshot_key = v8::String::new(scope, "snapshot").unwrap();

  obj.set(scope, get_key.into(), get_fn.into());
  obj.set(scope, has_key.into(), has_fn.into());
  obj.set(scope, set_key.into(), set_fn.into());
  obj.set(scope, delete_key.into(), delete_fn.into());
  obj.set(scope, clear_key.into(), clear_fn.into());
  obj.set(scope, keys_key.into(), keys_fn.into());
  obj.set(scope, len_key.into(), len_fn.into());
  obj.set(scope, is_empty_key.into(), is_empty_fn.into());
  obj.set(scope, snapshot_key.into(), snapshot_fn.into());

  obj
}

/// `new bt.Blackboard()` (`§4.1`, `§4.5`): a fresh, JS-owned board with the
/// same accessor shape as [`build_blackboard_object`]/`ExposeToJS`. Unlike
/// `Bridge::expose_blackboard`, nothing outside the script holds a
/// reference to it unless the host explicitly asked for one.
fn blackboard_constructor_callback(
  scope: &mut v8::HandleScope,
  _args: v8::FunctionCallbackArguments,
  mut rv: v8::ReturnValue,
) {
  let bb = crate::blackboard::Blackboard::shared();
  let obj = build_blackboard_object(scope, bb);
  rv.set(obj.into());
}
