//! Conversions between host values and `v8` values.

use super::JsValue;
use crate::bt::Status;

pub fn to_v8<'s>(
  scope: &mut v8::HandleScope<'s>,
  value: &JsValue,
) -> v8::Local<'s, v8::Value> {
  match value {
    JsValue::Null => v8::null(scope).into(),
    JsValue::Undefined => v8::undefined(scope).into(),
    JsValue::Bool(b) => v8::Boolean::new(scope, *b).into(),
    JsValue::Number(n) => v8::Number::new(scope, *n).into(),
    JsValue::String(s) => v8::String::new(scope, s)
      .expect("string value did not fit in v8 string limits")
      .into(),
  }
}

pub fn from_v8(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> JsValue {
  if value.is_null() {
    JsValue::Null
  } else if value.is_undefined() {
    JsValue::Undefined
  } else if value.is_boolean() {
    JsValue::Bool(value.boolean_value(scope))
  } else if value.is_number() {
    JsValue::Number(value.number_value(scope).unwrap_or(f64::NAN))
  } else {
    JsValue::String(value.to_rust_string_lossy(scope))
  }
}

/// Converts a host [`Status`] to the JS string literal it's represented
/// as when crossing the boundary (`§3`).
pub fn status_to_v8<'s>(
  scope: &mut v8::HandleScope<'s>,
  status: Status,
) -> v8::Local<'s, v8::Value> {
  v8::String::new(scope, status.as_str()).unwrap().into()
}

/// Parses a JS value expected to be one of the three status string
/// literals. Returns `None` if it is not a recognized status string.
pub fn status_from_v8(scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> Option<Status> {
  if !value.is_string() {
    return None;
  }
  Status::from_str(&value.to_rust_string_lossy(scope))
}

pub fn exception_message(tc_scope: &mut v8::TryCatch<v8::HandleScope>) -> String {
  match tc_scope.exception() {
    Some(exception) => {
      if let Some(message) = exception.to_object(tc_scope).and_then(|obj| {
        let key = v8::String::new(tc_scope, "message")?;
        obj.get(tc_scope, key.into())
      }) {
        message.to_rust_string_lossy(tc_scope)
      } else {
        exception.to_rust_string_lossy(tc_scope)
      }
    }
    None => "unknown JS error".to_string(),
  }
}

pub fn script_origin<'s>(
  scope: &mut v8::HandleScope<'s>,
  name: &str,
) -> v8::ScriptOrigin<'s> {
  let name = v8::String::new(scope, name).unwrap();
  v8::ScriptOrigin::new(
    scope,
    name.into(),
    0,
    0,
    false,
    0,
    None,
    false,
    false,
    false,
    None,
  )
}
