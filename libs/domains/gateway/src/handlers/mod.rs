//! Client surfaces of the gateway.
//!
//! Over HTTP, unary and batch operations are JSON over `POST`; streaming
//! operations run over a WebSocket at `/stream/{operation}`, one JSON request
//! per message and one JSON [`StreamResponse`](crate::models::StreamResponse)
//! per message, in request order. [`GatewayGrpc`] serves the same operations
//! as the agent gRPC API.

mod admin;
mod grpc;
mod rest;
mod ws;

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::metrics::metrics_middleware;
use crate::service::GatewayService;
use crate::stream::StreamProxy;

pub use grpc::GatewayGrpc;
pub use rest::{BatchRequest, BatchResponse};
pub use ws::StreamOperation;

/// Shared by every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub service: Arc<GatewayService>,
    pub streams: StreamProxy,
}

impl GatewayState {
    pub fn new(service: Arc<GatewayService>) -> Self {
        let streams = StreamProxy::new(service.config().stream_concurrency);
        Self { service, streams }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        // Unary
        .route("/insert", post(rest::insert))
        .route("/update", post(rest::update))
        .route("/upsert", post(rest::upsert))
        .route("/remove", post(rest::remove))
        .route("/remove/timestamp", post(rest::remove_by_timestamp))
        .route("/search", post(rest::search))
        .route("/search/id", post(rest::search_by_id))
        .route("/linear/search", post(rest::linear_search))
        .route("/linear/search/id", post(rest::linear_search_by_id))
        .route("/exists/{id}", get(rest::exists))
        .route("/object/{id}", get(rest::get_object))
        .route("/object/insert", post(rest::insert_object))
        .route("/object/search", post(rest::search_object))
        // Batches
        .route("/multi/insert", post(rest::multi_insert))
        .route("/multi/update", post(rest::multi_update))
        .route("/multi/upsert", post(rest::multi_upsert))
        .route("/multi/remove", post(rest::multi_remove))
        .route("/multi/search", post(rest::multi_search))
        .route("/multi/search/id", post(rest::multi_search_by_id))
        .route("/multi/linear/search", post(rest::multi_linear_search))
        .route(
            "/multi/linear/search/id",
            post(rest::multi_linear_search_by_id),
        )
        // Streams
        .route("/stream/{operation}", get(ws::stream))
        // Admin
        .route("/health", get(admin::health))
        .route("/ready", get(admin::ready))
        .route("/agents", get(admin::agents))
        .route("/metrics", get(admin::metrics))
        .route_layer(middleware::from_fn(metrics_middleware))
        .with_state(state)
}
