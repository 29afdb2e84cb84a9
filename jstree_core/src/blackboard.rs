//! Thread-safe key/value store shared by host and JS leaves (`§4.1`).
//!
//! Values are boxed so that multiple snapshots can alias nested arrays and
//! objects: [`Blackboard::snapshot`] is documented as a shallow copy, and
//! [`Value::Array`]/[`Value::Object`] therefore wrap their contents behind
//! `Arc<RwLock<_>>` rather than cloning them.

use crate::prelude::*;
use crate::{rlock, wlock};

use compact_str::CompactString;
use parking_lot::RwLock;
use std::sync::Arc;

/// A Blackboard-resident value. Mirrors the shape of JSON.
#[derive(Debug, Clone)]
pub enum Value {
  Null,
  Bool(bool),
  Number(f64),
  String(CompactString),
  Array(Arc<RwLock<Vec<Value>>>),
  Object(Arc<RwLock<HashMap<CompactString, Value>>>),
}

impl Value {
  pub fn array(items: Vec<Value>) -> Self {
    Value::Array(Arc::new(RwLock::new(items)))
  }

  pub fn object(entries: HashMap<CompactString, Value>) -> Self {
    Value::Object(Arc::new(RwLock::new(entries)))
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Number(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(CompactString::from(v))
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(CompactString::from(v))
  }
}

#[derive(Debug, Default)]
struct Inner {
  // Lazily initialized on first write, per `§4.1 Set`.
  map: Option<HashMap<CompactString, Value>>,
}

/// Thread-safe key/value store shared by host and JS leaves.
///
/// Guarantees (`§4.1`):
/// - concurrent readers see a consistent snapshot (single `RwLock`, no
///   reader starves writers indefinitely since acquisitions are bounded by
///   [`crate::envar::MUTEX_TIMEOUT`]);
/// - [`has`](Blackboard::has) and [`get`](Blackboard::get) agree with
///   [`set`](Blackboard::set)/[`delete`](Blackboard::delete) from the
///   calling thread's own perspective;
/// - [`snapshot`](Blackboard::snapshot) is a shallow copy: `Array`/`Object`
///   entries are aliased, not deep-copied.
#[derive(Debug, Default)]
pub struct Blackboard {
  inner: RwLock<Inner>,
}

pub type BlackboardArc = Arc<Blackboard>;

impl Blackboard {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn shared() -> BlackboardArc {
    Arc::new(Self::new())
  }

  /// Returns the value at `key`, or `None` if the key is absent. A key set
  /// to [`Value::Null`] is present, not absent — callers must check both.
  pub fn get(&self, key: &str) -> Option<Value> {
    let inner = rlock!(self.inner);
    inner.map.as_ref().and_then(|m| m.get(key).cloned())
  }

  pub fn has(&self, key: &str) -> bool {
    let inner = rlock!(self.inner);
    inner.map.as_ref().is_some_and(|m| m.contains_key(key))
  }

  pub fn set(&self, key: impl Into<CompactString>, value: Value) {
    let mut inner = wlock!(self.inner);
    inner
      .map
      .get_or_insert_with(HashMap::default)
      .insert(key.into(), value);
  }

  pub fn delete(&self, key: &str) -> bool {
    let mut inner = wlock!(self.inner);
    inner.map.as_mut().is_some_and(|m| m.remove(key).is_some())
  }

  pub fn clear(&self) {
    let mut inner = wlock!(self.inner);
    if let Some(m) = inner.map.as_mut() {
      m.clear();
    }
  }

  pub fn len(&self) -> usize {
    let inner = rlock!(self.inner);
    inner.map.as_ref().map_or(0, |m| m.len())
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// All present keys. Order is whatever the backing map yields and is not
  /// guaranteed to be stable across calls (`§4.1`: "`Keys() → ordered? no`").
  pub fn keys(&self) -> Vec<CompactString> {
    let inner = rlock!(self.inner);
    inner.map.as_ref().map_or_else(Vec::new, |m| m.keys().cloned().collect())
  }

  /// Shallow copy of the whole map: `Array`/`Object` entries alias their
  /// backing storage, so mutating them through the returned map is visible
  /// through the live board and vice versa.
  pub fn snapshot(&self) -> HashMap<CompactString, Value> {
    let inner = rlock!(self.inner);
    inner.map.clone().unwrap_or_default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_then_has_and_get_agree() {
    let bb = Blackboard::new();
    bb.set("k", Value::from(1.0));
    assert!(bb.has("k"));
    matches!(bb.get("k"), Some(Value::Number(n)) if n == 1.0);
  }

  #[test]
  fn null_is_present_not_absent() {
    let bb = Blackboard::new();
    bb.set("k", Value::Null);
    assert!(bb.has("k"));
    assert!(matches!(bb.get("k"), Some(Value::Null)));
  }

  #[test]
  fn missing_key_is_absent() {
    let bb = Blackboard::new();
    assert!(!bb.has("missing"));
    assert!(bb.get("missing").is_none());
  }

  #[test]
  fn delete_makes_key_absent_again() {
    let bb = Blackboard::new();
    bb.set("k", Value::from(true));
    assert!(bb.delete("k"));
    assert!(!bb.has("k"));
    assert!(!bb.delete("k"));
  }

  #[test]
  fn snapshot_aliases_nested_array() {
    let bb = Blackboard::new();
    bb.set("arr", Value::array(vec![Value::from(1.0)]));
    let snap = bb.snapshot();
    if let Some(Value::Array(items)) = snap.get("arr") {
      items.write().push(Value::from(2.0));
    } else {
      panic!("expected array");
    }
    if let Some(Value::Array(items)) = bb.get("arr") {
      assert_eq!(items.read().len(), 2);
    } else {
      panic!("expected array");
    }
  }

  #[test]
  fn keys_lists_every_present_key() {
    let bb = Blackboard::new();
    bb.set("a", Value::from(1.0));
    bb.set("b", Value::from(2.0));
    let mut keys = bb.keys();
    keys.sort();
    assert_eq!(keys, vec![CompactString::from("a"), CompactString::from("b")]);
  }

  #[test]
  fn clear_empties_the_board() {
    let bb = Blackboard::new();
    bb.set("a", Value::from(1.0));
    bb.set("b", Value::from(2.0));
    bb.clear();
    assert_eq!(bb.len(), 0);
    assert!(bb.is_empty());
  }
}
