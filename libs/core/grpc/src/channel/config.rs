use std::time::Duration;

use core_config::{ConfigError, FromEnv, env_duration_ms, env_parse};
use tonic::transport::Endpoint;

/// HTTP/2 and TCP settings for channels to agents and filter services.
///
/// Per-call deadlines come from [`CallContext`](crate::CallContext), so there
/// is no channel-wide request timeout here.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
  pub connect_timeout: Duration,
  pub http2_keep_alive_interval: Option<Duration>,
  pub keep_alive_timeout: Duration,
  pub keep_alive_while_idle: bool,
  pub initial_window_size: Option<u32>,
  pub http2_adaptive_window: bool,
  pub tcp_nodelay: bool,
  pub tcp_keepalive: Option<Duration>,
  /// Maximum decoded message size accepted from the destination.
  pub max_message_size: usize,
}

impl Default for ChannelConfig {
  fn default() -> Self {
    Self {
      connect_timeout: Duration::from_secs(3),
      http2_keep_alive_interval: Some(Duration::from_secs(30)),
      keep_alive_timeout: Duration::from_secs(10),
      keep_alive_while_idle: true,
      initial_window_size: Some(1024 * 1024), // 1MB
      http2_adaptive_window: true,
      tcp_nodelay: true,
      tcp_keepalive: Some(Duration::from_secs(30)),
      max_message_size: 16 * 1024 * 1024, // 16MB
    }
  }
}

impl ChannelConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
    self.connect_timeout = timeout;
    self
  }

  pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
    self.http2_keep_alive_interval = interval;
    self
  }

  pub fn with_max_message_size(mut self, size: usize) -> Self {
    self.max_message_size = size;
    self
  }

  pub(crate) fn apply_to_endpoint(&self, mut endpoint: Endpoint) -> Endpoint {
    if let Some(interval) = self.http2_keep_alive_interval {
      endpoint = endpoint
        .http2_keep_alive_interval(interval)
        .keep_alive_timeout(self.keep_alive_timeout)
        .keep_alive_while_idle(self.keep_alive_while_idle);
    }

    endpoint = endpoint.connect_timeout(self.connect_timeout);

    if let Some(size) = self.initial_window_size {
      endpoint = endpoint
        .initial_connection_window_size(size)
        .initial_stream_window_size(size);
    }

    endpoint
      .http2_adaptive_window(self.http2_adaptive_window)
      .tcp_nodelay(self.tcp_nodelay)
      .tcp_keepalive(self.tcp_keepalive)
  }
}

impl FromEnv for ChannelConfig {
  /// - `GRPC_CONNECT_TIMEOUT_MS` (default 3000)
  /// - `GRPC_KEEPALIVE_MS` (default 30000, `0` disables keep-alive pings)
  /// - `GRPC_MAX_MESSAGE_BYTES` (default 16MB)
  fn from_env() -> Result<Self, ConfigError> {
    let defaults = Self::default();
    let keep_alive = env_duration_ms("GRPC_KEEPALIVE_MS", Duration::from_secs(30))?;

    Ok(Self {
      connect_timeout: env_duration_ms("GRPC_CONNECT_TIMEOUT_MS", defaults.connect_timeout)?,
      http2_keep_alive_interval: (!keep_alive.is_zero()).then_some(keep_alive),
      max_message_size: env_parse("GRPC_MAX_MESSAGE_BYTES", defaults.max_message_size)?,
      ..defaults
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_config() {
    let config = ChannelConfig::default();
    assert_eq!(config.connect_timeout, Duration::from_secs(3));
    assert_eq!(config.initial_window_size, Some(1024 * 1024));
    assert!(config.tcp_nodelay);
    assert!(config.http2_adaptive_window);
  }

  #[test]
  fn test_from_env_overrides() {
    temp_env::with_vars(
      [
        ("GRPC_CONNECT_TIMEOUT_MS", Some("750")),
        ("GRPC_KEEPALIVE_MS", Some("0")),
        ("GRPC_MAX_MESSAGE_BYTES", Some("1024")),
      ],
      || {
        let config = ChannelConfig::from_env().unwrap();
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.http2_keep_alive_interval, None);
        assert_eq!(config.max_message_size, 1024);
      },
    );
  }

  #[test]
  fn test_from_env_rejects_garbage() {
    temp_env::with_var("GRPC_CONNECT_TIMEOUT_MS", Some("soon"), || {
      assert!(ChannelConfig::from_env().is_err());
    });
  }
}
