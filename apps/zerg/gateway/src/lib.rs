//! Vector Search Gateway
//!
//! Fronts a sharded vector index: every agent holds part of the index, the
//! gateway fans each request out to all of them and merges the answers.
//!
//! ## Architecture
//!
//! ```text
//! Client (HTTP / WebSocket / gRPC)
//!   ↓
//! router + GatewayGrpc (domain_gateway::handlers)
//!   ↓
//! GatewayService ── FilterChain ──> filter services (gRPC)
//!   ↓
//! ConnectionRegistry ── GrpcAgent ──> agents (gRPC)
//!   ↑
//! Discoverer (static list or DNS, polled)
//! ```
//!
//! ## Modules
//!
//! - `server`: startup, background tasks and graceful shutdown

pub mod server;

pub use server::run;
