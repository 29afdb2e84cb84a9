//! Errors and results.

use thiserror::Error as ThisError;

// anyhow {

/// [`anyhow::Error`]
pub type AnyErr = anyhow::Error;

/// [`anyhow::Result`] with `T` if ok, [`AnyErr`] if error.
pub type AnyResult<T> = anyhow::Result<T>;

// anyhow }

// std::io {

/// [`std::io::Error`]
pub type IoErr = std::io::Error;

/// [`std::io::Result`] with `T` if ok.
pub type IoResult<T> = std::io::Result<T>;

// std::io }

/// Bridge/runtime error taxonomy, see `§7 ERROR HANDLING DESIGN`.
///
/// These are *kinds*, not wrapper types: each variant owns just enough
/// context to render a useful message and to let callers match on the
/// failure mode without downcasting through `anyhow`.
#[derive(Debug, Clone, ThisError)]
pub enum BridgeError {
  #[error("compile error in {name}: {message}")]
  CompileError { name: String, message: String },

  #[error("runtime error in {name}: {message}")]
  RuntimeError { name: String, message: String },

  #[error("not found: {0}")]
  NotFoundError(String),

  #[error("not callable: {0}")]
  NotCallableError(String),

  #[error("synchronous call timed out after {0:?}")]
  TimeoutError(std::time::Duration),

  #[error("bridge is not running")]
  NotRunningError,

  #[error("bridge shut down while waiting for result")]
  ShutdownError,
}

/// [`std::result::Result`] with `T` if ok, [`BridgeError`] if error.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// gRPC builtin protocol error: malformed method path, unknown service or
/// method.
#[derive(Debug, Clone, ThisError)]
pub enum ProtocolError {
  #[error("malformed method path: {0}, expected /package.Service/Method")]
  MalformedMethodPath(String),

  #[error("unknown service: {0}")]
  UnknownService(String),

  #[error("unknown method: {service}.{method}")]
  UnknownMethod { service: String, method: String },

  #[error("invalid file descriptor set: {0}")]
  InvalidDescriptorSet(String),
}

/// gRPC call failure surfaced to JS as `{ name: "GrpcError", code, message }`.
#[derive(Debug, Clone, ThisError)]
#[error("grpc error {code}: {message}")]
pub struct RpcError {
  pub code: i32,
  pub message: String,
}

/// Argument/schema validation error, e.g. a non-`Node` child passed to
/// `node(tick, ...children)`.
#[derive(Debug, Clone, ThisError)]
pub enum ValidationError {
  #[error("argument {index} must be callable")]
  NotCallable { index: usize },

  #[error("argument {index} must be a bt.Node")]
  NotANode { index: usize },
}
