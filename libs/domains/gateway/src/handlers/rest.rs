//! JSON handlers for unary and batch operations.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::GatewayState;
use crate::error::GatewayResult;
use crate::models::{
    InsertObjectRequest, Locations, ObjectId, RemoveByTimestampRequest, RemoveRequest,
    SearchByIdRequest, SearchObjectRequest, SearchOutcome, SearchRequest, VectorObject,
    VectorRequest,
};

// ===== Request/Response DTOs =====

/// Body of every `/multi/*` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest<T> {
    pub requests: Vec<T>,
}

/// Responses in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse<T> {
    pub responses: Vec<T>,
}

impl<T> From<Vec<T>> for BatchResponse<T> {
    fn from(responses: Vec<T>) -> Self {
        Self { responses }
    }
}

// ===== Unary =====

pub async fn insert(
    State(state): State<GatewayState>,
    Json(request): Json<VectorRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.insert(request).await?))
}

pub async fn update(
    State(state): State<GatewayState>,
    Json(request): Json<VectorRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.update(request).await?))
}

pub async fn upsert(
    State(state): State<GatewayState>,
    Json(request): Json<VectorRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.upsert(request).await?))
}

pub async fn remove(
    State(state): State<GatewayState>,
    Json(request): Json<RemoveRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.remove(request).await?))
}

pub async fn remove_by_timestamp(
    State(state): State<GatewayState>,
    Json(request): Json<RemoveByTimestampRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.remove_by_timestamp(request).await?))
}

/// Partial results come back as `200` with a `warnings` list.
pub async fn search(
    State(state): State<GatewayState>,
    Json(request): Json<SearchRequest>,
) -> GatewayResult<Json<SearchOutcome>> {
    Ok(Json(state.service.search(request).await?))
}

pub async fn search_by_id(
    State(state): State<GatewayState>,
    Json(request): Json<SearchByIdRequest>,
) -> GatewayResult<Json<SearchOutcome>> {
    Ok(Json(state.service.search_by_id(request).await?))
}

pub async fn linear_search(
    State(state): State<GatewayState>,
    Json(request): Json<SearchRequest>,
) -> GatewayResult<Json<SearchOutcome>> {
    Ok(Json(state.service.linear_search(request).await?))
}

pub async fn linear_search_by_id(
    State(state): State<GatewayState>,
    Json(request): Json<SearchByIdRequest>,
) -> GatewayResult<Json<SearchOutcome>> {
    Ok(Json(state.service.linear_search_by_id(request).await?))
}

pub async fn exists(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> GatewayResult<Json<ObjectId>> {
    Ok(Json(state.service.exists(&id).await?))
}

pub async fn get_object(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> GatewayResult<Json<VectorObject>> {
    Ok(Json(state.service.get_object(&id).await?))
}

pub async fn insert_object(
    State(state): State<GatewayState>,
    Json(request): Json<InsertObjectRequest>,
) -> GatewayResult<Json<Locations>> {
    Ok(Json(state.service.insert_object(request).await?))
}

pub async fn search_object(
    State(state): State<GatewayState>,
    Json(request): Json<SearchObjectRequest>,
) -> GatewayResult<Json<SearchOutcome>> {
    Ok(Json(state.service.search_object(request).await?))
}

// ===== Batches =====

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_insert(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<VectorRequest>>,
) -> GatewayResult<Json<BatchResponse<Locations>>> {
    let responses = state.service.multi_insert(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_update(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<VectorRequest>>,
) -> GatewayResult<Json<BatchResponse<Locations>>> {
    let responses = state.service.multi_update(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_upsert(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<VectorRequest>>,
) -> GatewayResult<Json<BatchResponse<Locations>>> {
    let responses = state.service.multi_upsert(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_remove(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<RemoveRequest>>,
) -> GatewayResult<Json<BatchResponse<Locations>>> {
    let responses = state.service.multi_remove(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_search(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<SearchRequest>>,
) -> GatewayResult<Json<BatchResponse<SearchOutcome>>> {
    let responses = state.service.multi_search(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_search_by_id(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<SearchByIdRequest>>,
) -> GatewayResult<Json<BatchResponse<SearchOutcome>>> {
    let responses = state.service.multi_search_by_id(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_linear_search(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<SearchRequest>>,
) -> GatewayResult<Json<BatchResponse<SearchOutcome>>> {
    let responses = state.service.multi_linear_search(batch.requests).await?;
    Ok(Json(responses.into()))
}

#[instrument(skip_all, fields(count = batch.requests.len()))]
pub async fn multi_linear_search_by_id(
    State(state): State<GatewayState>,
    Json(batch): Json<BatchRequest<SearchByIdRequest>>,
) -> GatewayResult<Json<BatchResponse<SearchOutcome>>> {
    let responses = state
        .service
        .multi_linear_search_by_id(batch.requests)
        .await?;
    Ok(Json(responses.into()))
}
