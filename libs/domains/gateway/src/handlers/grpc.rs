//! gRPC implementation of the agent API, served over the whole agent set.
//!
//! Clients talk to the gateway exactly as they would to a single agent.
//! Writes answer with one location per object: the names of every agent that
//! took the write joined with `,`, and all of their ips. Searches carry the
//! agents that did not contribute in `warnings`. Per-request filter targets
//! are HTTP-only; the configured filters always apply.

use std::future::{Future, ready};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::Map;
use rpc::agent::v1 as pb;
use rpc::agent::v1::agent_server::Agent;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use super::GatewayState;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    Locations, RemoveByTimestampRequest, RemoveRequest, SearchByIdRequest, SearchConfig,
    SearchOutcome, SearchRequest, StreamResponse, StreamStatus, TimestampCondition, VectorObject,
    VectorRequest, WriteConfig,
};
use crate::service::GatewayService;
use crate::stream::StreamProxy;

/// Proxied responses mapped onto their wire message.
pub type RelayStream<Resp, Out> =
    Map<ReceiverStream<StreamResponse<Resp>>, fn(StreamResponse<Resp>) -> Result<Out, Status>>;

pub struct GatewayGrpc {
    service: Arc<GatewayService>,
    streams: StreamProxy,
}

impl GatewayGrpc {
    pub fn new(state: GatewayState) -> Self {
        Self {
            service: state.service,
            streams: state.streams,
        }
    }

    /// Answer every request of `requests` through the stream proxy, in order.
    ///
    /// A transport error on the inbound side ends the input; items already
    /// accepted are still answered.
    fn relay<Req, Resp, Out, F, Fut>(
        &self,
        operation: &'static str,
        requests: Streaming<Req>,
        call: F,
        wire: fn(StreamResponse<Resp>) -> Result<Out, Status>,
    ) -> RelayStream<Resp, Out>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: Fn(Arc<GatewayService>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Resp>> + Send + 'static,
    {
        info!(operation, "Stream opened");
        let requests = requests
            .take_while(|item| ready(item.is_ok()))
            .filter_map(|item| ready(item.ok()));
        let service = self.service.clone();
        let call = Arc::new(call);
        self.streams
            .proxy(operation, requests, move |request| {
                let (service, call) = (service.clone(), call.clone());
                async move { call(service, request).await }
            })
            .map(wire)
    }
}

impl From<GatewayState> for GatewayGrpc {
    fn from(state: GatewayState) -> Self {
        Self::new(state)
    }
}

// ===== Inbound conversions =====

fn write_request(
    vector: Option<pb::Vector>,
    skip_strict_exist_check: bool,
    timestamp: i64,
) -> GatewayResult<VectorRequest> {
    let vector = vector.ok_or_else(|| GatewayError::InvalidArgument("vector is required".into()))?;
    // Zero means unset; the request's timestamp wins over the vector's.
    let timestamp = [timestamp, vector.timestamp].into_iter().find(|ts| *ts != 0);
    Ok(VectorRequest {
        vector: VectorObject::from(vector),
        config: WriteConfig {
            skip_strict_exist_check,
            timestamp,
            filters: Vec::new(),
        },
    })
}

impl TryFrom<pb::InsertRequest> for VectorRequest {
    type Error = GatewayError;

    fn try_from(r: pb::InsertRequest) -> Result<Self, Self::Error> {
        write_request(r.vector, r.skip_strict_exist_check, r.timestamp)
    }
}

impl TryFrom<pb::UpdateRequest> for VectorRequest {
    type Error = GatewayError;

    fn try_from(r: pb::UpdateRequest) -> Result<Self, Self::Error> {
        write_request(r.vector, r.skip_strict_exist_check, r.timestamp)
    }
}

impl TryFrom<pb::UpsertRequest> for VectorRequest {
    type Error = GatewayError;

    fn try_from(r: pb::UpsertRequest) -> Result<Self, Self::Error> {
        write_request(r.vector, r.skip_strict_exist_check, r.timestamp)
    }
}

impl TryFrom<pb::RemoveRequest> for RemoveRequest {
    type Error = GatewayError;

    fn try_from(r: pb::RemoveRequest) -> Result<Self, Self::Error> {
        let id = r
            .id
            .map(|id| id.id)
            .ok_or_else(|| GatewayError::InvalidArgument("id is required".into()))?;
        Ok(Self {
            id,
            config: WriteConfig {
                skip_strict_exist_check: r.skip_strict_exist_check,
                timestamp: (r.timestamp != 0).then_some(r.timestamp),
                filters: Vec::new(),
            },
        })
    }
}

/// A missing config means defaults. The timeout arrives in nanoseconds.
fn search_config(config: Option<pb::SearchConfig>) -> SearchConfig {
    let Some(config) = config else {
        return SearchConfig::default();
    };
    SearchConfig {
        request_id: config.request_id,
        num: config.num,
        min_num: config.min_num,
        radius: config.radius,
        epsilon: config.epsilon,
        timeout_ms: u64::try_from(config.timeout)
            .ok()
            .filter(|ns| *ns > 0)
            .map(|ns| ns.div_ceil(1_000_000)),
        ..SearchConfig::default()
    }
}

impl From<pb::SearchRequest> for SearchRequest {
    fn from(r: pb::SearchRequest) -> Self {
        Self {
            vector: r.vector,
            config: search_config(r.config),
        }
    }
}

impl From<pb::SearchIdRequest> for SearchByIdRequest {
    fn from(r: pb::SearchIdRequest) -> Self {
        Self {
            id: r.id,
            config: search_config(r.config),
        }
    }
}

impl From<pb::RemoveByTimestampRequest> for RemoveByTimestampRequest {
    fn from(r: pb::RemoveByTimestampRequest) -> Self {
        Self {
            timestamps: r
                .timestamps
                .into_iter()
                .map(TimestampCondition::from)
                .collect(),
        }
    }
}

fn convert_all<T, U>(items: Vec<T>) -> GatewayResult<Vec<U>>
where
    U: TryFrom<T, Error = GatewayError>,
{
    items.into_iter().map(U::try_from).collect()
}

// ===== Outbound conversions =====

fn merged_location(locations: Locations) -> pb::Location {
    let mut merged = pb::Location::default();
    for location in locations.locations {
        if merged.uuid.is_empty() {
            merged.uuid = location.uuid;
        }
        if !merged.name.is_empty() {
            merged.name.push(',');
        }
        merged.name.push_str(&location.name);
        merged.ips.extend(location.ips);
    }
    merged
}

fn search_response(outcome: SearchOutcome) -> pb::SearchResponse {
    pb::SearchResponse {
        request_id: outcome.response.request_id,
        results: outcome.response.results.iter().map(pb::Distance::from).collect(),
        warnings: outcome.warnings.iter().map(ToString::to_string).collect(),
    }
}

fn status_message(status: StreamStatus) -> pb::Status {
    pb::Status {
        code: status.code as i32,
        message: status.message,
    }
}

fn stream_location(response: StreamResponse<Locations>) -> Result<pb::StreamLocation, Status> {
    use pb::stream_location::Payload;
    let payload = match response {
        StreamResponse::Response(locations) => Payload::Location(merged_location(locations)),
        StreamResponse::Error(status) => Payload::Status(status_message(status)),
    };
    Ok(pb::StreamLocation {
        payload: Some(payload),
    })
}

fn stream_search(
    response: StreamResponse<SearchOutcome>,
) -> Result<pb::StreamSearchResponse, Status> {
    use pb::stream_search_response::Payload;
    let payload = match response {
        StreamResponse::Response(outcome) => Payload::Response(search_response(outcome)),
        StreamResponse::Error(status) => Payload::Status(status_message(status)),
    };
    Ok(pb::StreamSearchResponse {
        payload: Some(payload),
    })
}

fn stream_vector(response: StreamResponse<VectorObject>) -> Result<pb::StreamVector, Status> {
    use pb::stream_vector::Payload;
    let payload = match response {
        StreamResponse::Response(object) => Payload::Vector(pb::Vector::from(&object)),
        StreamResponse::Error(status) => Payload::Status(status_message(status)),
    };
    Ok(pb::StreamVector {
        payload: Some(payload),
    })
}

fn locations_response(responses: Vec<Locations>) -> pb::Locations {
    pb::Locations {
        locations: responses.into_iter().map(merged_location).collect(),
    }
}

fn search_responses(outcomes: Vec<SearchOutcome>) -> pb::SearchResponses {
    pb::SearchResponses {
        responses: outcomes.into_iter().map(search_response).collect(),
    }
}

#[async_trait]
impl Agent for GatewayGrpc {
    async fn insert(
        &self,
        request: Request<pb::InsertRequest>,
    ) -> Result<Response<pb::Location>, Status> {
        let request = VectorRequest::try_from(request.into_inner())?;
        let locations = self.service.insert(request).await?;
        Ok(Response::new(merged_location(locations)))
    }

    async fn update(
        &self,
        request: Request<pb::UpdateRequest>,
    ) -> Result<Response<pb::Location>, Status> {
        let request = VectorRequest::try_from(request.into_inner())?;
        let locations = self.service.update(request).await?;
        Ok(Response::new(merged_location(locations)))
    }

    async fn upsert(
        &self,
        request: Request<pb::UpsertRequest>,
    ) -> Result<Response<pb::Location>, Status> {
        let request = VectorRequest::try_from(request.into_inner())?;
        let locations = self.service.upsert(request).await?;
        Ok(Response::new(merged_location(locations)))
    }

    async fn remove(
        &self,
        request: Request<pb::RemoveRequest>,
    ) -> Result<Response<pb::Location>, Status> {
        let request = RemoveRequest::try_from(request.into_inner())?;
        let locations = self.service.remove(request).await?;
        Ok(Response::new(merged_location(locations)))
    }

    async fn remove_by_timestamp(
        &self,
        request: Request<pb::RemoveByTimestampRequest>,
    ) -> Result<Response<pb::Locations>, Status> {
        let removed = self
            .service
            .remove_by_timestamp(request.into_inner().into())
            .await?;
        Ok(Response::new(pb::Locations {
            locations: removed
                .locations
                .into_iter()
                .map(pb::Location::from)
                .collect(),
        }))
    }

    async fn search(
        &self,
        request: Request<pb::SearchRequest>,
    ) -> Result<Response<pb::SearchResponse>, Status> {
        let outcome = self.service.search(request.into_inner().into()).await?;
        Ok(Response::new(search_response(outcome)))
    }

    async fn search_by_id(
        &self,
        request: Request<pb::SearchIdRequest>,
    ) -> Result<Response<pb::SearchResponse>, Status> {
        let outcome = self
            .service
            .search_by_id(request.into_inner().into())
            .await?;
        Ok(Response::new(search_response(outcome)))
    }

    async fn linear_search(
        &self,
        request: Request<pb::SearchRequest>,
    ) -> Result<Response<pb::SearchResponse>, Status> {
        let outcome = self
            .service
            .linear_search(request.into_inner().into())
            .await?;
        Ok(Response::new(search_response(outcome)))
    }

    async fn linear_search_by_id(
        &self,
        request: Request<pb::SearchIdRequest>,
    ) -> Result<Response<pb::SearchResponse>, Status> {
        let outcome = self
            .service
            .linear_search_by_id(request.into_inner().into())
            .await?;
        Ok(Response::new(search_response(outcome)))
    }

    async fn exists(
        &self,
        request: Request<pb::ObjectId>,
    ) -> Result<Response<pb::ObjectId>, Status> {
        let found = self.service.exists(&request.into_inner().id).await?;
        Ok(Response::new(pb::ObjectId { id: found.id }))
    }

    async fn get_object(
        &self,
        request: Request<pb::ObjectId>,
    ) -> Result<Response<pb::Vector>, Status> {
        let object = self.service.get_object(&request.into_inner().id).await?;
        Ok(Response::new(pb::Vector::from(&object)))
    }

    async fn multi_insert(
        &self,
        request: Request<pb::MultiInsertRequest>,
    ) -> Result<Response<pb::Locations>, Status> {
        let requests = convert_all(request.into_inner().requests)?;
        let responses = self.service.multi_insert(requests).await?;
        Ok(Response::new(locations_response(responses)))
    }

    async fn multi_update(
        &self,
        request: Request<pb::MultiUpdateRequest>,
    ) -> Result<Response<pb::Locations>, Status> {
        let requests = convert_all(request.into_inner().requests)?;
        let responses = self.service.multi_update(requests).await?;
        Ok(Response::new(locations_response(responses)))
    }

    async fn multi_upsert(
        &self,
        request: Request<pb::MultiUpsertRequest>,
    ) -> Result<Response<pb::Locations>, Status> {
        let requests = convert_all(request.into_inner().requests)?;
        let responses = self.service.multi_upsert(requests).await?;
        Ok(Response::new(locations_response(responses)))
    }

    async fn multi_remove(
        &self,
        request: Request<pb::MultiRemoveRequest>,
    ) -> Result<Response<pb::Locations>, Status> {
        let requests = convert_all(request.into_inner().requests)?;
        let responses = self.service.multi_remove(requests).await?;
        Ok(Response::new(locations_response(responses)))
    }

    async fn multi_search(
        &self,
        request: Request<pb::MultiSearchRequest>,
    ) -> Result<Response<pb::SearchResponses>, Status> {
        let requests = request.into_inner().requests.into_iter().map(Into::into).collect();
        let outcomes = self.service.multi_search(requests).await?;
        Ok(Response::new(search_responses(outcomes)))
    }

    async fn multi_search_by_id(
        &self,
        request: Request<pb::MultiSearchIdRequest>,
    ) -> Result<Response<pb::SearchResponses>, Status> {
        let requests = request.into_inner().requests.into_iter().map(Into::into).collect();
        let outcomes = self.service.multi_search_by_id(requests).await?;
        Ok(Response::new(search_responses(outcomes)))
    }

    async fn multi_linear_search(
        &self,
        request: Request<pb::MultiSearchRequest>,
    ) -> Result<Response<pb::SearchResponses>, Status> {
        let requests = request.into_inner().requests.into_iter().map(Into::into).collect();
        let outcomes = self.service.multi_linear_search(requests).await?;
        Ok(Response::new(search_responses(outcomes)))
    }

    async fn multi_linear_search_by_id(
        &self,
        request: Request<pb::MultiSearchIdRequest>,
    ) -> Result<Response<pb::SearchResponses>, Status> {
        let requests = request.into_inner().requests.into_iter().map(Into::into).collect();
        let outcomes = self.service.multi_linear_search_by_id(requests).await?;
        Ok(Response::new(search_responses(outcomes)))
    }

    type StreamInsertStream = RelayStream<Locations, pb::StreamLocation>;

    async fn stream_insert(
        &self,
        request: Request<Streaming<pb::InsertRequest>>,
    ) -> Result<Response<Self::StreamInsertStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_insert",
            request.into_inner(),
            |service, request: pb::InsertRequest| async move {
                service.insert(VectorRequest::try_from(request)?).await
            },
            stream_location,
        )))
    }

    type StreamUpdateStream = RelayStream<Locations, pb::StreamLocation>;

    async fn stream_update(
        &self,
        request: Request<Streaming<pb::UpdateRequest>>,
    ) -> Result<Response<Self::StreamUpdateStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_update",
            request.into_inner(),
            |service, request: pb::UpdateRequest| async move {
                service.update(VectorRequest::try_from(request)?).await
            },
            stream_location,
        )))
    }

    type StreamUpsertStream = RelayStream<Locations, pb::StreamLocation>;

    async fn stream_upsert(
        &self,
        request: Request<Streaming<pb::UpsertRequest>>,
    ) -> Result<Response<Self::StreamUpsertStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_upsert",
            request.into_inner(),
            |service, request: pb::UpsertRequest| async move {
                service.upsert(VectorRequest::try_from(request)?).await
            },
            stream_location,
        )))
    }

    type StreamRemoveStream = RelayStream<Locations, pb::StreamLocation>;

    async fn stream_remove(
        &self,
        request: Request<Streaming<pb::RemoveRequest>>,
    ) -> Result<Response<Self::StreamRemoveStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_remove",
            request.into_inner(),
            |service, request: pb::RemoveRequest| async move {
                service.remove(RemoveRequest::try_from(request)?).await
            },
            stream_location,
        )))
    }

    type StreamSearchStream = RelayStream<SearchOutcome, pb::StreamSearchResponse>;

    async fn stream_search(
        &self,
        request: Request<Streaming<pb::SearchRequest>>,
    ) -> Result<Response<Self::StreamSearchStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_search",
            request.into_inner(),
            |service, request: pb::SearchRequest| async move {
                service.search(request.into()).await
            },
            stream_search,
        )))
    }

    type StreamSearchByIDStream = RelayStream<SearchOutcome, pb::StreamSearchResponse>;

    async fn stream_search_by_id(
        &self,
        request: Request<Streaming<pb::SearchIdRequest>>,
    ) -> Result<Response<Self::StreamSearchByIDStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_search_by_id",
            request.into_inner(),
            |service, request: pb::SearchIdRequest| async move {
                service.search_by_id(request.into()).await
            },
            stream_search,
        )))
    }

    type StreamLinearSearchStream = RelayStream<SearchOutcome, pb::StreamSearchResponse>;

    async fn stream_linear_search(
        &self,
        request: Request<Streaming<pb::SearchRequest>>,
    ) -> Result<Response<Self::StreamLinearSearchStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_linear_search",
            request.into_inner(),
            |service, request: pb::SearchRequest| async move {
                service.linear_search(request.into()).await
            },
            stream_search,
        )))
    }

    type StreamLinearSearchByIDStream = RelayStream<SearchOutcome, pb::StreamSearchResponse>;

    async fn stream_linear_search_by_id(
        &self,
        request: Request<Streaming<pb::SearchIdRequest>>,
    ) -> Result<Response<Self::StreamLinearSearchByIDStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_linear_search_by_id",
            request.into_inner(),
            |service, request: pb::SearchIdRequest| async move {
                service.linear_search_by_id(request.into()).await
            },
            stream_search,
        )))
    }

    type StreamGetObjectStream = RelayStream<VectorObject, pb::StreamVector>;

    async fn stream_get_object(
        &self,
        request: Request<Streaming<pb::ObjectId>>,
    ) -> Result<Response<Self::StreamGetObjectStream>, Status> {
        Ok(Response::new(self.relay(
            "stream_get_object",
            request.into_inner(),
            |service, request: pb::ObjectId| async move { service.get_object(&request.id).await },
            stream_vector,
        )))
    }
}
