use tonic::Request;
use tonic::metadata::{Ascii, MetadataMap, MetadataValue};

use crate::resilient::CallContext;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wrap `message` in a request carrying the context's request id and deadline.
///
/// Requests without an id get a fresh v4 UUID so agent logs stay correlatable.
pub fn outgoing_request<T>(ctx: &CallContext, message: T) -> Request<T> {
  let mut request = Request::new(message);

  let request_id = ctx
    .request_id
    .clone()
    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
  match request_id.parse::<MetadataValue<Ascii>>() {
    Ok(value) => {
      request.metadata_mut().insert(REQUEST_ID_HEADER, value);
    }
    Err(_) => {
      tracing::debug!(target: "grpc_client", request_id = %request_id, "Request id is not a valid header value");
    }
  }

  if let Some(remaining) = ctx.remaining() {
    request.set_timeout(remaining);
  }

  request
}

/// Read the request id from incoming metadata.
pub fn request_id(metadata: &MetadataMap) -> Option<String> {
  metadata
    .get(REQUEST_ID_HEADER)
    .and_then(|v| v.to_str().ok())
    .map(String::from)
}
