//! Typed handle to one agent.
//!
//! [`Dispatchable`] has one method per agent operation; the gateway only ever
//! talks to agents through it. [`GrpcAgent`] delegates each method to the
//! generated tonic client, wrapped in the agent's own [`ResilientClient`].

use std::sync::Arc;

use async_trait::async_trait;
use grpc_client::{
    BackoffPolicy, CallContext, CallError, ChannelConfig, CircuitBreakerConfig, CircuitState,
    ResilientClient, create_channel_lazy, outgoing_request,
};
use rpc::agent::v1 as pb;
use rpc::agent::v1::agent_client::AgentClient;
use tonic::Code;
use tonic::transport::Channel;

use crate::conversions::{
    insert_request, ranked_from_response, remove_by_timestamp_request, remove_request,
    search_config_to_proto, update_request,
};
use crate::models::{
    Location, RankedItem, SearchConfig, TimestampCondition, VectorObject, WriteOptions,
};
use crate::registry::Connector;

#[async_trait]
pub trait Dispatchable: Send + Sync {
    fn address(&self) -> &str;

    fn circuit_state(&self) -> CircuitState;

    async fn insert(
        &self,
        ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError>;

    async fn update(
        &self,
        ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError>;

    async fn remove(
        &self,
        ctx: &CallContext,
        id: &str,
        opts: WriteOptions,
    ) -> Result<Location, CallError>;

    /// Locations of every object this agent removed.
    async fn remove_by_timestamp(
        &self,
        ctx: &CallContext,
        conditions: &[TimestampCondition],
    ) -> Result<Vec<Location>, CallError>;

    async fn search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError>;

    async fn search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError>;

    /// Exhaustive search over every stored vector.
    async fn linear_search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError>;

    async fn linear_search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError>;

    /// `false` when the agent answers `NotFound`.
    async fn exists(&self, ctx: &CallContext, id: &str) -> Result<bool, CallError>;

    /// `None` when the agent answers `NotFound`.
    async fn get_object(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<Option<VectorObject>, CallError>;
}

pub struct GrpcAgent {
    client: AgentClient<Channel>,
    resilient: ResilientClient,
}

impl GrpcAgent {
    pub fn new(client: AgentClient<Channel>, resilient: ResilientClient) -> Self {
        Self { client, resilient }
    }

    /// Build an agent handle over a lazy channel; nothing is dialed until the
    /// first call.
    pub fn connect_lazy(
        address: &str,
        channel: &ChannelConfig,
        policy: BackoffPolicy,
        breaker: CircuitBreakerConfig,
    ) -> grpc_client::GrpcResult<Self> {
        let client = AgentClient::new(create_channel_lazy(address, channel)?)
            .max_decoding_message_size(channel.max_message_size);
        Ok(Self::new(
            client,
            ResilientClient::new(address, policy, breaker),
        ))
    }

    /// Connector for the agent [`ConnectionRegistry`](crate::registry::ConnectionRegistry).
    pub fn connector(
        channel: ChannelConfig,
        policy: BackoffPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Connector<dyn Dispatchable> {
        Arc::new(move |address: &str| {
            let agent = GrpcAgent::connect_lazy(address, &channel, policy.clone(), breaker.clone())?;
            Ok(Arc::new(agent) as Arc<dyn Dispatchable>)
        })
    }
}

fn not_found_as<T>(result: Result<T, CallError>, missing: T) -> Result<T, CallError> {
    match result {
        Err(err) if err.code() == Code::NotFound => Ok(missing),
        other => other,
    }
}

fn search_request(ctx: &CallContext, vector: &[f32], config: &SearchConfig) -> pb::SearchRequest {
    let request_id = ctx.request_id.clone().unwrap_or_default();
    pb::SearchRequest {
        vector: vector.to_vec(),
        config: Some(search_config_to_proto(config, &request_id, ctx.remaining())),
    }
}

fn search_id_request(ctx: &CallContext, id: &str, config: &SearchConfig) -> pb::SearchIdRequest {
    let request_id = ctx.request_id.clone().unwrap_or_default();
    pb::SearchIdRequest {
        id: id.to_string(),
        config: Some(search_config_to_proto(config, &request_id, ctx.remaining())),
    }
}

#[async_trait]
impl Dispatchable for GrpcAgent {
    fn address(&self) -> &str {
        self.resilient.target()
    }

    fn circuit_state(&self) -> CircuitState {
        self.resilient.circuit_state()
    }

    async fn insert(
        &self,
        ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        let message = insert_request(object, opts);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.insert(request).await }
            })
            .await
            .map(|response| response.into_inner().into())
    }

    async fn update(
        &self,
        ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        let message = update_request(object, opts);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.update(request).await }
            })
            .await
            .map(|response| response.into_inner().into())
    }

    async fn remove(
        &self,
        ctx: &CallContext,
        id: &str,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        let message = remove_request(id, opts);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.remove(request).await }
            })
            .await
            .map(|response| response.into_inner().into())
    }

    async fn remove_by_timestamp(
        &self,
        ctx: &CallContext,
        conditions: &[TimestampCondition],
    ) -> Result<Vec<Location>, CallError> {
        let message = remove_by_timestamp_request(conditions);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.remove_by_timestamp(request).await }
            })
            .await
            .map(|response| {
                response
                    .into_inner()
                    .locations
                    .into_iter()
                    .map(Location::from)
                    .collect()
            })
    }

    async fn search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        let message = search_request(ctx, vector, config);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.search(request).await }
            })
            .await
            .map(|response| ranked_from_response(response.into_inner()))
    }

    async fn search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        let message = search_id_request(ctx, id, config);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.search_by_id(request).await }
            })
            .await
            .map(|response| ranked_from_response(response.into_inner()))
    }

    async fn linear_search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        let message = search_request(ctx, vector, config);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.linear_search(request).await }
            })
            .await
            .map(|response| ranked_from_response(response.into_inner()))
    }

    async fn linear_search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        let message = search_id_request(ctx, id, config);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.linear_search_by_id(request).await }
            })
            .await
            .map(|response| ranked_from_response(response.into_inner()))
    }

    async fn exists(&self, ctx: &CallContext, id: &str) -> Result<bool, CallError> {
        let message = pb::ObjectId { id: id.to_string() };
        let result = self
            .resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.exists(request).await }
            })
            .await
            .map(|_| true);
        not_found_as(result, false)
    }

    async fn get_object(
        &self,
        ctx: &CallContext,
        id: &str,
    ) -> Result<Option<VectorObject>, CallError> {
        let message = pb::ObjectId { id: id.to_string() };
        let result = self
            .resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.get_object(request).await }
            })
            .await
            .map(|response| Some(VectorObject::from(response.into_inner())));
        not_found_as(result, None)
    }
}
