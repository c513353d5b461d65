use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::json;

use super::GatewayState;
use crate::metrics::render_metrics;
use crate::models::AgentStatus;

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub agents: usize,
    pub generation: u64,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Ready once discovery knows at least one agent.
pub async fn ready(State(state): State<GatewayState>) -> impl IntoResponse {
    let snapshot = state.service.snapshot();
    let body = ReadyResponse {
        ready: !snapshot.is_empty(),
        agents: snapshot.len(),
        generation: snapshot.generation,
    };
    let status = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

pub async fn agents(State(state): State<GatewayState>) -> Json<Vec<AgentStatus>> {
    Json(state.service.agent_statuses())
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        render_metrics(),
    )
}
