//! # gRPC Client Library
//!
//! Client-side plumbing shared by everything that talks to index agents and
//! filter services.
//!
//! ## Features
//!
//! - **Lazy channels**: [`create_channel_lazy`] with HTTP/2 and TCP tuning from [`ChannelConfig`]
//! - **Backoff**: [`BackoffPolicy`], exponential with jitter and hard caps
//! - **Circuit breaking**: [`CircuitBreaker`], rolling failure window and a single HalfOpen trial
//! - **Resilient calls**: [`ResilientClient`] combines both around one destination
//! - **Metadata**: request-id and deadline propagation via [`outgoing_request`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use grpc_client::{BackoffPolicy, CallContext, ChannelConfig, CircuitBreakerConfig};
//! use grpc_client::{ResilientClient, create_channel_lazy, outgoing_request};
//!
//! let channel = create_channel_lazy("10.0.0.7:8081", &ChannelConfig::default())?;
//! let resilient = ResilientClient::new(
//!     "10.0.0.7:8081",
//!     BackoffPolicy::default(),
//!     CircuitBreakerConfig::default(),
//! );
//!
//! let ctx = CallContext::new().with_timeout(Duration::from_millis(500));
//! let reply = resilient
//!     .call(&ctx, || {
//!         let mut client = AgentClient::new(channel.clone());
//!         let request = outgoing_request(&ctx, message.clone());
//!         async move { client.search(request).await }
//!     })
//!     .await?;
//! ```

pub mod backoff;
pub mod channel;
pub mod circuit_breaker;
pub mod error;
pub mod metadata;
pub mod resilient;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelConfig, create_channel_lazy, endpoint_uri};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{CallError, GrpcError, GrpcResult, is_retryable};
pub use metadata::{REQUEST_ID_HEADER, outgoing_request};
pub use resilient::{CallContext, ResilientClient};
