pub mod config;

pub use config::ChannelConfig;

use crate::error::{GrpcError, GrpcResult};
use tonic::transport::{Channel, Endpoint};

/// Turn a discovered `host:port` address into an endpoint URI.
///
/// Addresses that already carry a scheme are returned unchanged.
pub fn endpoint_uri(address: &str) -> String {
  if address.contains("://") {
    address.to_string()
  } else {
    format!("http://{address}")
  }
}

/// Creates a lazy gRPC channel that connects on first request.
///
/// Returns immediately; the connection is established by the first RPC and
/// re-established by tonic after failures. Must be called inside a tokio
/// runtime.
pub fn create_channel_lazy(address: &str, config: &ChannelConfig) -> GrpcResult<Channel> {
  let uri = endpoint_uri(address);

  let endpoint = Endpoint::from_shared(uri.clone()).map_err(|e| {
    tracing::error!(target: "grpc_client", addr = %uri, error = ?e, "Invalid URI");
    GrpcError::InvalidUri {
      uri: uri.clone(),
      source: e,
    }
  })?;

  tracing::debug!(
    target: "grpc_client",
    addr = %uri,
    "Creating lazy gRPC channel (connects on first request)"
  );

  Ok(config.apply_to_endpoint(endpoint).connect_lazy())
}
