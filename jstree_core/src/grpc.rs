//! gRPC builtin exposed to scripts (`§4.8`, `§6.2`).
//!
//! Services are registered process-wide from a base64-encoded
//! `FileDescriptorSet`; `invoke` resolves a `/package.Service/Method`
//! path against the registry and round-trips the call through
//! `prost-reflect`'s `DynamicMessage` rather than generated code, since
//! the set of services is only known at script-run time.

use crate::error::{ProtocolError, RpcError};

use base64::Engine;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prost::bytes::BufMut;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, MethodDescriptor};
use serde_json::Value as JsonValue;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::Status as TonicStatus;

/// Status constants exposed to scripts, values exactly as `§6.2`.
pub mod status {
  pub const OK: i32 = 0;
  pub const CANCELLED: i32 = 1;
  pub const UNKNOWN: i32 = 2;
  pub const INVALID_ARGUMENT: i32 = 3;
  pub const DEADLINE_EXCEEDED: i32 = 4;
  pub const NOT_FOUND: i32 = 5;
  pub const ALREADY_EXISTS: i32 = 6;
  pub const PERMISSION_DENIED: i32 = 7;
  pub const RESOURCE_EXHAUSTED: i32 = 8;
  pub const FAILED_PRECONDITION: i32 = 9;
  pub const ABORTED: i32 = 10;
  pub const OUT_OF_RANGE: i32 = 11;
  pub const UNIMPLEMENTED: i32 = 12;
  pub const INTERNAL: i32 = 13;
  pub const UNAVAILABLE: i32 = 14;
  pub const DATA_LOSS: i32 = 15;
  pub const UNAUTHENTICATED: i32 = 16;
}

fn code_to_int(code: tonic::Code) -> i32 {
  use tonic::Code::*;
  match code {
    Ok => status::OK,
    Cancelled => status::CANCELLED,
    Unknown => status::UNKNOWN,
    InvalidArgument => status::INVALID_ARGUMENT,
    DeadlineExceeded => status::DEADLINE_EXCEEDED,
    NotFound => status::NOT_FOUND,
    AlreadyExists => status::ALREADY_EXISTS,
    PermissionDenied => status::PERMISSION_DENIED,
    ResourceExhausted => status::RESOURCE_EXHAUSTED,
    FailedPrecondition => status::FAILED_PRECONDITION,
    Aborted => status::ABORTED,
    OutOfRange => status::OUT_OF_RANGE,
    Unimplemented => status::UNIMPLEMENTED,
    Internal => status::INTERNAL,
    Unavailable => status::UNAVAILABLE,
    DataLoss => status::DATA_LOSS,
    Unauthenticated => status::UNAUTHENTICATED,
  }
}

impl From<TonicStatus> for RpcError {
  fn from(status: TonicStatus) -> Self {
    RpcError {
      code: code_to_int(status.code()),
      message: status.message().to_string(),
    }
  }
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
  #[error(transparent)]
  Protocol(#[from] ProtocolError),
  #[error("invalid base64 file descriptor set: {0}")]
  InvalidEncoding(#[from] base64::DecodeError),
  #[error("malformed file descriptor set bytes: {0}")]
  MalformedBytes(#[from] prost::DecodeError),
  #[error("invalid file descriptor set: {0}")]
  InvalidDescriptor(#[from] prost_reflect::DescriptorError),
}

/// Process-wide table of services, keyed by fully-qualified name, built
/// up across one or more base64 `FileDescriptorSet` registrations.
pub struct ServiceRegistry {
  pool: RwLock<DescriptorPool>,
}

static REGISTRY: Lazy<ServiceRegistry> = Lazy::new(ServiceRegistry::new);

pub fn registry() -> &'static ServiceRegistry {
  &REGISTRY
}

impl ServiceRegistry {
  fn new() -> Self {
    ServiceRegistry {
      pool: RwLock::new(DescriptorPool::new()),
    }
  }

  /// Decodes and merges a base64-encoded `FileDescriptorSet` into the
  /// registry, making every service/method it declares resolvable by
  /// `invoke`'s method path.
  pub fn register_base64(&self, encoded: &str) -> Result<(), RegistryError> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let set = prost_types::FileDescriptorSet::decode(bytes.as_slice())?;
    let mut pool = self.pool.write();
    pool.add_file_descriptor_set(set)?;
    Ok(())
  }

  fn method(&self, method_path: &str) -> Result<MethodDescriptor, RegistryError> {
    let (service_name, method_name) = parse_method_path(method_path)?;
    let pool = self.pool.read();
    let service = pool
      .get_service_by_name(service_name)
      .ok_or_else(|| RegistryError::from(ProtocolError::UnknownService(service_name.to_string())))?;
    service
      .methods()
      .find(|m| m.name() == method_name)
      .ok_or_else(|| {
        ProtocolError::UnknownMethod {
          service: service_name.to_string(),
          method: method_name.to_string(),
        }
        .into()
      })
  }
}

/// Splits `/package.Service/Method` into its service and method parts.
fn parse_method_path(method_path: &str) -> Result<(&str, &str), RegistryError> {
  let trimmed = method_path.strip_prefix('/').unwrap_or(method_path);
  trimmed
    .rsplit_once('/')
    .filter(|(service, method)| !service.is_empty() && !method.is_empty())
    .ok_or_else(|| ProtocolError::MalformedMethodPath(method_path.to_string()).into())
}

#[derive(Debug, Clone, Default)]
pub struct DialOptions {
  pub insecure: bool,
  pub authority: Option<String>,
}

/// A dialed connection plus the method resolver needed to invoke on it.
/// `§6.2`'s `dial`/`invoke` split into two calls maps onto this and
/// `invoke_on`: `dial` builds one `GrpcConnection`, `invoke` (exposed to
/// scripts as a method on it) resolves and performs the call.
pub struct GrpcConnection {
  channel: Channel,
}

/// Connects lazily: this never blocks on an actual TCP handshake, it
/// only validates the target URI and configuration, matching `dial`'s
/// synchronous-from-script feel even though the underlying transport is
/// async.
pub fn dial(target: &str, opts: &DialOptions) -> Result<GrpcConnection, tonic::transport::Error> {
  let mut endpoint = Endpoint::from_shared(target.to_string())?;
  if let Some(authority) = &opts.authority {
    if let Ok(uri) = authority.parse() {
      endpoint = endpoint.origin(uri);
    }
  }
  // `insecure` is the only transport mode wired up: no TLS config is
  // ever attached, so a non-insecure dial to a TLS endpoint fails at
  // connect time rather than silently downgrading.
  let _ = opts.insecure;
  let channel = endpoint.connect_lazy();
  Ok(GrpcConnection { channel })
}

impl GrpcConnection {
  /// Resolves `method_path`, converts `request` (plain JS-shaped JSON)
  /// into the method's input type via proto-JSON, issues the RPC, and
  /// converts the dynamic response back to plain JSON.
  pub async fn invoke(&self, method_path: &str, request: JsonValue) -> Result<JsonValue, RpcError> {
    let method = registry()
      .method(method_path)
      .map_err(|e| RpcError { code: status::UNIMPLEMENTED, message: e.to_string() })?;

    let input_message = DynamicMessage::deserialize(method.input(), request)
      .map_err(|e| RpcError { code: status::INVALID_ARGUMENT, message: e.to_string() })?;

    let path = tonic::codegen::http::uri::PathAndQuery::try_from(normalize_path(method_path))
      .map_err(|e| RpcError { code: status::INVALID_ARGUMENT, message: e.to_string() })?;

    let mut client = Grpc::new(self.channel.clone());
    client
      .ready()
      .await
      .map_err(|e| RpcError { code: status::UNAVAILABLE, message: e.to_string() })?;

    let codec = DynamicCodec { output: method.output() };
    let response = client
      .unary(tonic::Request::new(input_message), path, codec)
      .await
      .map_err(RpcError::from)?;

    serde_json::to_value(response.into_inner())
      .map_err(|e| RpcError { code: status::INTERNAL, message: e.to_string() })
  }
}

fn normalize_path(method_path: &str) -> String {
  if method_path.starts_with('/') {
    method_path.to_string()
  } else {
    format!("/{method_path}")
  }
}

/// A `tonic::codec::Codec` over `DynamicMessage`, since the concrete
/// message types are only known via reflection at call time and can't
/// satisfy `prost::Message + Default` the way `tonic::codec::ProstCodec`
/// requires.
#[derive(Clone)]
struct DynamicCodec {
  output: MessageDescriptor,
}

impl Codec for DynamicCodec {
  type Encode = DynamicMessage;
  type Decode = DynamicMessage;
  type Encoder = DynamicEncoder;
  type Decoder = DynamicDecoder;

  fn encoder(&mut self) -> Self::Encoder {
    DynamicEncoder
  }

  fn decoder(&mut self) -> Self::Decoder {
    DynamicDecoder { output: self.output.clone() }
  }
}

struct DynamicEncoder;

impl Encoder for DynamicEncoder {
  type Item = DynamicMessage;
  type Error = TonicStatus;

  fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
    item
      .encode(&mut dst.writer())
      .map_err(|e| TonicStatus::internal(format!("failed to encode request: {e}")))
  }
}

struct DynamicDecoder {
  output: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
  type Item = DynamicMessage;
  type Error = TonicStatus;

  fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
    let mut message = DynamicMessage::new(self.output.clone());
    message
      .merge(src)
      .map_err(|e| TonicStatus::internal(format!("failed to decode response: {e}")))?;
    Ok(Some(message))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_method_path() {
    assert_eq!(
      parse_method_path("/pkg.Greeter/SayHello").unwrap(),
      ("pkg.Greeter", "SayHello")
    );
  }

  #[test]
  fn rejects_malformed_method_path() {
    assert!(parse_method_path("not-a-path").is_err());
    assert!(parse_method_path("/only-service/").is_err());
  }

  #[test]
  fn status_codes_match_table() {
    assert_eq!(status::OK, 0);
    assert_eq!(status::NOT_FOUND, 5);
    assert_eq!(status::UNAUTHENTICATED, 16);
  }

  #[test]
  fn grpc_error_carries_code_and_message() {
    let err = RpcError { code: status::NOT_FOUND, message: "thing not found".to_string() };
    assert_eq!(err.code, 5);
    assert_eq!(err.message, "thing not found");
  }

  #[test]
  fn tonic_not_found_status_maps_to_rpc_error_five() {
    let status = TonicStatus::not_found("thing not found");
    let err: RpcError = status.into();
    assert_eq!(err.code, 5);
    assert_eq!(err.message, "thing not found");
  }

  #[test]
  fn unknown_method_is_unknown_service() {
    let err = registry().method("/pkg.NoSuchService/Method").unwrap_err();
    assert!(matches!(err, RegistryError::Protocol(ProtocolError::UnknownService(_))));
  }
}
