use crate::{ConfigError, FromEnv, env_or_default, env_parse};
use std::net::{Ipv4Addr, SocketAddr};

/// Listen address for one server surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// "host:port", as accepted by `TcpListener::bind`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Parsed socket address; fails for host names.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address().parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "HOST".to_string(),
            details: e.to_string(),
        })
    }
}

impl FromEnv for ServerConfig {
    /// - HOST: defaults to 0.0.0.0
    /// - PORT: defaults to 8080
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse("PORT", 8080u16)?;
        Ok(Self { host, port })
    }
}

impl ServerConfig {
    /// gRPC listen address.
    ///
    /// - GRPC_HOST: defaults to 0.0.0.0
    /// - GRPC_PORT: defaults to 8081
    pub fn grpc_from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("GRPC_HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse("GRPC_PORT", 8081u16)?;
        Ok(Self { host, port })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED.to_string(), 8080)
    }
}
