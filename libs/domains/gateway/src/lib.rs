//! Gateway Domain Library
//!
//! Routes vector index operations across a dynamic set of shard agents.
//!
//! # Architecture
//!
//! ```text
//!      HTTP / WebSocket / gRPC (handlers)
//!                       │
//!              ┌────────▼────────┐      ┌──────────────┐
//!              │ GatewayService  │─────▶│ FilterChain  │──▶ filter services
//!              │ (fan-out/merge) │      └──────────────┘
//!              └────────┬────────┘
//!                       │ current MembershipSnapshot
//!       ┌───────────────▼──────────────┐      ┌─────────────┐
//!       │ ConnectionRegistry<Dispatch> │◀─────│ Discoverer  │◀── MembershipSource
//!       └───────────────┬──────────────┘      └─────────────┘   (static / DNS)
//!                       │ one GrpcAgent per address
//!                       ▼
//!             ResilientClient (backoff + circuit breaker) ──▶ agents
//! ```
//!
//! # Features
//!
//! - **Discovery**: polled membership with debounced removal and atomic snapshots
//! - **Writes**: fan-out with a configurable [`WriteQuorum`]
//! - **Search**: union, dedupe by lowest distance, global top-K, partial-failure warnings
//! - **Filters**: ordered ingress and egress filter stages
//! - **Streams**: bounded, order-preserving [`StreamProxy`]

pub mod agent;
pub mod config;
pub(crate) mod conversions;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod merge;
pub mod metrics;
pub mod models;
pub mod registry;
pub mod service;
pub mod stream;

// Re-export commonly used types
pub use agent::{Dispatchable, GrpcAgent};
pub use config::{FilterTargets, GatewayConfig, MembershipConfig, WriteQuorum};
pub use discovery::{
    Discoverer, DiscovererConfig, DnsMembership, HostResolver, LookupError, Member,
    MembershipEvent, MembershipSnapshot, MembershipSource, StaticMembership, SystemResolver,
};
pub use error::{GatewayError, GatewayResult};
pub use filter::{FilterChain, FilterService, GrpcFilter};
pub use handlers::{GatewayGrpc, GatewayState, router};
pub use merge::merge_ranked;
pub use metrics::{GatewayMetrics, init_metrics, render_metrics};
pub use models::*;
pub use registry::{ConnectionRegistry, Connector};
pub use service::GatewayService;
pub use stream::StreamProxy;
