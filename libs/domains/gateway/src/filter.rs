//! Ingress and egress filter chains.

use std::sync::Arc;

use async_trait::async_trait;
use grpc_client::{
    BackoffPolicy, CallContext, CallError, ChannelConfig, CircuitBreakerConfig, ResilientClient,
    create_channel_lazy, outgoing_request,
};
use rpc::agent::v1 as pb;
use rpc::filter::v1 as filter_pb;
use rpc::filter::v1::filter_client::FilterClient;
use tonic::transport::Channel;
use tracing::debug;

use crate::conversions::{distance_list, ranked_from_list};
use crate::error::{GatewayError, GatewayResult};
use crate::models::{ObjectBlob, RankedItem, VectorObject};
use crate::registry::{ConnectionRegistry, Connector};

/// One remote filter stage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FilterService: Send + Sync {
    async fn filter_vector(
        &self,
        ctx: &CallContext,
        object: VectorObject,
    ) -> Result<VectorObject, CallError>;

    async fn filter_distances(
        &self,
        ctx: &CallContext,
        items: Vec<RankedItem>,
    ) -> Result<Vec<RankedItem>, CallError>;

    /// Turn a raw object into a vector.
    async fn vectorize(
        &self,
        ctx: &CallContext,
        blob: ObjectBlob,
    ) -> Result<VectorObject, CallError>;
}

pub struct GrpcFilter {
    client: FilterClient<Channel>,
    resilient: ResilientClient,
}

impl GrpcFilter {
    pub fn connect_lazy(
        address: &str,
        channel: &ChannelConfig,
        policy: BackoffPolicy,
        breaker: CircuitBreakerConfig,
    ) -> grpc_client::GrpcResult<Self> {
        let client = FilterClient::new(create_channel_lazy(address, channel)?)
            .max_decoding_message_size(channel.max_message_size);
        Ok(Self {
            client,
            resilient: ResilientClient::new(address, policy, breaker),
        })
    }

    pub fn connector(
        channel: ChannelConfig,
        policy: BackoffPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Connector<dyn FilterService> {
        Arc::new(move |address: &str| {
            let filter =
                GrpcFilter::connect_lazy(address, &channel, policy.clone(), breaker.clone())?;
            Ok(Arc::new(filter) as Arc<dyn FilterService>)
        })
    }
}

#[async_trait]
impl FilterService for GrpcFilter {
    async fn filter_vector(
        &self,
        ctx: &CallContext,
        object: VectorObject,
    ) -> Result<VectorObject, CallError> {
        let message = pb::Vector::from(&object);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.filter_vector(request).await }
            })
            .await
            .map(|response| response.into_inner().into())
    }

    async fn filter_distances(
        &self,
        ctx: &CallContext,
        items: Vec<RankedItem>,
    ) -> Result<Vec<RankedItem>, CallError> {
        let message = distance_list(&items);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.filter_distance(request).await }
            })
            .await
            .map(|response| ranked_from_list(response.into_inner()))
    }

    async fn vectorize(
        &self,
        ctx: &CallContext,
        blob: ObjectBlob,
    ) -> Result<VectorObject, CallError> {
        let message = filter_pb::Object::from(&blob);
        self.resilient
            .call(ctx, || {
                let mut client = self.client.clone();
                let request = outgoing_request(ctx, message.clone());
                async move { client.gen_vector(request).await }
            })
            .await
            .map(|response| response.into_inner().into())
    }
}

/// A value that can flow through a filter stage.
#[async_trait]
pub trait FilterPayload: Sized + Send {
    async fn run_stage(
        self,
        ctx: &CallContext,
        filter: &dyn FilterService,
    ) -> Result<Self, CallError>;
}

#[async_trait]
impl FilterPayload for VectorObject {
    async fn run_stage(
        self,
        ctx: &CallContext,
        filter: &dyn FilterService,
    ) -> Result<Self, CallError> {
        filter.filter_vector(ctx, self).await
    }
}

#[async_trait]
impl FilterPayload for Vec<RankedItem> {
    async fn run_stage(
        self,
        ctx: &CallContext,
        filter: &dyn FilterService,
    ) -> Result<Self, CallError> {
        filter.filter_distances(ctx, self).await
    }
}

/// Runs filter stages strictly in order; the first failing stage aborts.
#[derive(Clone)]
pub struct FilterChain {
    registry: Arc<ConnectionRegistry<dyn FilterService>>,
}

fn connect_error(address: &str, err: grpc_client::GrpcError) -> CallError {
    CallError::Status {
        target: address.to_string(),
        status: tonic::Status::internal(err.to_string()),
        attempts: 0,
    }
}

impl FilterChain {
    pub fn new(registry: Arc<ConnectionRegistry<dyn FilterService>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry<dyn FilterService>> {
        &self.registry
    }

    fn stage(&self, stage: usize, address: &str) -> GatewayResult<Arc<dyn FilterService>> {
        self.registry
            .get(address)
            .map_err(|err| GatewayError::Filter {
                stage,
                address: address.to_string(),
                source: connect_error(address, err),
            })
    }

    /// Pass `payload` through every target in order. No targets, no calls.
    pub async fn apply<P: FilterPayload>(
        &self,
        ctx: &CallContext,
        targets: &[String],
        mut payload: P,
    ) -> GatewayResult<P> {
        for (stage, address) in targets.iter().enumerate() {
            let filter = self.stage(stage, address)?;
            payload = payload
                .run_stage(ctx, filter.as_ref())
                .await
                .map_err(|source| GatewayError::Filter {
                    stage,
                    address: address.clone(),
                    source,
                })?;
            debug!(stage, address = %address, "Filter stage passed");
        }
        Ok(payload)
    }

    pub async fn vectorize(
        &self,
        ctx: &CallContext,
        address: &str,
        blob: ObjectBlob,
    ) -> GatewayResult<VectorObject> {
        let filter = self.stage(0, address)?;
        filter
            .vectorize(ctx, blob)
            .await
            .map_err(|source| GatewayError::Filter {
                stage: 0,
                address: address.to_string(),
                source,
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tonic::Code;

    /// Chain over in-memory filters keyed by address; unknown addresses fail to connect.
    pub(crate) fn chain_with(filters: Vec<(&str, Arc<dyn FilterService>)>) -> FilterChain {
        let filters: HashMap<String, Arc<dyn FilterService>> = filters
            .into_iter()
            .map(|(address, filter)| (address.to_string(), filter))
            .collect();
        let connector: Connector<dyn FilterService> = Arc::new(move |address: &str| {
            filters
                .get(address)
                .cloned()
                .ok_or_else(|| grpc_client::GrpcError::InvalidConfig(format!("no filter {address}")))
        });
        FilterChain::new(Arc::new(ConnectionRegistry::new("filters", connector)))
    }

    fn appending(tag: f32, log: Arc<Mutex<Vec<f32>>>) -> Arc<dyn FilterService> {
        let mut mock = MockFilterService::new();
        mock.expect_filter_vector().returning(move |_, mut object| {
            log.lock().unwrap().push(tag);
            object.vector.push(tag);
            Ok(object)
        });
        Arc::new(mock)
    }

    fn failing(code: Code) -> Arc<dyn FilterService> {
        let mut mock = MockFilterService::new();
        mock.expect_filter_vector().returning(move |_, _| {
            Err(CallError::Status {
                target: "f".into(),
                status: tonic::Status::new(code, "rejected"),
                attempts: 1,
            })
        });
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_empty_chain_is_identity() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let connector: Connector<dyn FilterService> = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(grpc_client::GrpcError::InvalidConfig("unused".into()))
        });
        let chain = FilterChain::new(Arc::new(ConnectionRegistry::new("filters", connector)));

        let object = VectorObject::new("1", vec![0.5]);
        let out = chain
            .apply(&CallContext::new(), &[], object.clone())
            .await
            .unwrap();
        assert_eq!(out, object);
        assert_eq!(connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(vec![
            ("f1", appending(1.0, log.clone())),
            ("f2", appending(2.0, log.clone())),
        ]);
        let targets = vec!["f2".to_string(), "f1".to_string()];

        let out = chain
            .apply(&CallContext::new(), &targets, VectorObject::new("1", vec![]))
            .await
            .unwrap();
        assert_eq!(out.vector, vec![2.0, 1.0]);
        assert_eq!(*log.lock().unwrap(), vec![2.0, 1.0]);
    }

    #[tokio::test]
    async fn test_failure_aborts_with_stage_and_address() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_with(vec![
            ("ok", appending(1.0, log.clone())),
            ("bad", failing(Code::InvalidArgument)),
            ("never", appending(3.0, log.clone())),
        ]);
        let targets: Vec<String> = ["ok", "bad", "never"].map(String::from).to_vec();

        let err = chain
            .apply(&CallContext::new(), &targets, VectorObject::new("1", vec![]))
            .await
            .unwrap_err();
        match &err {
            GatewayError::Filter { stage, address, .. } => {
                assert_eq!(*stage, 1);
                assert_eq!(address, "bad");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(*log.lock().unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_unconnectable_stage_is_internal() {
        let chain = chain_with(vec![]);
        let err = chain
            .apply(
                &CallContext::new(),
                &["ghost".to_string()],
                VectorObject::new("1", vec![]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Filter { stage: 0, .. }));
        assert_eq!(err.code(), Code::Internal);
    }

    #[tokio::test]
    async fn test_distance_chain() {
        let mut mock = MockFilterService::new();
        mock.expect_filter_distances()
            .returning(|_, items| Ok(items.into_iter().filter(|i| i.distance < 0.5).collect()));
        let chain = chain_with(vec![("cut", Arc::new(mock) as Arc<dyn FilterService>)]);

        let items = vec![RankedItem::new("a", 0.1), RankedItem::new("b", 0.9)];
        let out = chain
            .apply(&CallContext::new(), &["cut".to_string()], items)
            .await
            .unwrap();
        assert_eq!(out, vec![RankedItem::new("a", 0.1)]);
    }

    #[tokio::test]
    async fn test_vectorize() {
        let mut mock = MockFilterService::new();
        mock.expect_vectorize()
            .returning(|_, blob| Ok(VectorObject::new(blob.id, vec![blob.object.len() as f32])));
        let chain = chain_with(vec![("vec", Arc::new(mock) as Arc<dyn FilterService>)]);

        let blob = ObjectBlob {
            id: "img".into(),
            object: vec![1, 2, 3],
        };
        let out = chain
            .vectorize(&CallContext::new(), "vec", blob)
            .await
            .unwrap();
        assert_eq!(out, VectorObject::new("img", vec![3.0]));
    }
}
