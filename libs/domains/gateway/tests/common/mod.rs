//! In-memory agents and gateway wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use domain_gateway::*;
use grpc_client::{CallContext, CallError, CircuitState, GrpcError};

/// Agent holding its objects in memory. Distance is squared euclidean.
pub struct MemoryAgent {
    pub address: String,
    down: bool,
    pub objects: Mutex<HashMap<String, VectorObject>>,
}

impl MemoryAgent {
    pub fn up(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            down: false,
            objects: Mutex::new(HashMap::new()),
        })
    }

    pub fn down(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: address.to_string(),
            down: true,
            objects: Mutex::new(HashMap::new()),
        })
    }

    fn check(&self) -> Result<(), CallError> {
        if self.down {
            return Err(CallError::Status {
                target: self.address.clone(),
                status: tonic::Status::unavailable("connection refused"),
                attempts: 3,
            });
        }
        Ok(())
    }

    fn location(&self, id: &str) -> Location {
        Location {
            name: self.address.clone(),
            uuid: id.to_string(),
            ips: vec![self.address.clone()],
        }
    }

    pub fn insert_stamped(&self, id: &str, vector: Vec<f32>, timestamp: i64) {
        let mut object = VectorObject::new(id, vector);
        object.timestamp = timestamp;
        self.objects.lock().unwrap().insert(id.to_string(), object);
    }

    fn rank(&self, query: &[f32]) -> Vec<RankedItem> {
        self.objects
            .lock()
            .unwrap()
            .values()
            .map(|object| {
                let distance = object
                    .vector
                    .iter()
                    .zip(query)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                RankedItem::new(object.id.clone(), distance)
            })
            .collect()
    }
}

#[async_trait]
impl Dispatchable for MemoryAgent {
    fn address(&self) -> &str {
        &self.address
    }

    fn circuit_state(&self) -> CircuitState {
        if self.down {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    async fn insert(
        &self,
        _ctx: &CallContext,
        object: &VectorObject,
        _opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.check()?;
        self.objects
            .lock()
            .unwrap()
            .insert(object.id.clone(), object.clone());
        Ok(self.location(&object.id))
    }

    async fn update(
        &self,
        ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.insert(ctx, object, opts).await
    }

    async fn remove(
        &self,
        _ctx: &CallContext,
        id: &str,
        _opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.check()?;
        self.objects.lock().unwrap().remove(id);
        Ok(self.location(id))
    }

    async fn remove_by_timestamp(
        &self,
        _ctx: &CallContext,
        conditions: &[TimestampCondition],
    ) -> Result<Vec<Location>, CallError> {
        self.check()?;
        let mut objects = self.objects.lock().unwrap();
        let mut matched: Vec<String> = objects
            .values()
            .filter(|object| {
                conditions
                    .iter()
                    .all(|condition| satisfies(condition, object.timestamp))
            })
            .map(|object| object.id.clone())
            .collect();
        if matched.is_empty() {
            return Err(CallError::Status {
                target: self.address.clone(),
                status: tonic::Status::not_found("no object matched"),
                attempts: 1,
            });
        }
        matched.sort();
        for id in &matched {
            objects.remove(id);
        }
        Ok(matched.iter().map(|id| self.location(id)).collect())
    }

    async fn search(
        &self,
        _ctx: &CallContext,
        vector: &[f32],
        _config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.check()?;
        Ok(self.rank(vector))
    }

    async fn linear_search(
        &self,
        ctx: &CallContext,
        vector: &[f32],
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.search(ctx, vector, config).await
    }

    async fn linear_search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.search_by_id(ctx, id, config).await
    }

    async fn search_by_id(
        &self,
        ctx: &CallContext,
        id: &str,
        config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        match self.get_object(ctx, id).await? {
            Some(object) => self.search(ctx, &object.vector, config).await,
            None => Ok(Vec::new()),
        }
    }

    async fn exists(&self, ctx: &CallContext, id: &str) -> Result<bool, CallError> {
        Ok(self.get_object(ctx, id).await?.is_some())
    }

    async fn get_object(
        &self,
        _ctx: &CallContext,
        id: &str,
    ) -> Result<Option<VectorObject>, CallError> {
        self.check()?;
        Ok(self.objects.lock().unwrap().get(id).cloned())
    }
}

fn satisfies(condition: &TimestampCondition, timestamp: i64) -> bool {
    match condition.operator {
        TimestampOperator::Eq => timestamp == condition.timestamp,
        TimestampOperator::Ne => timestamp != condition.timestamp,
        TimestampOperator::Ge => timestamp >= condition.timestamp,
        TimestampOperator::Gt => timestamp > condition.timestamp,
        TimestampOperator::Le => timestamp <= condition.timestamp,
        TimestampOperator::Lt => timestamp < condition.timestamp,
    }
}

fn no_filters() -> FilterChain {
    let connector: Connector<dyn FilterService> = Arc::new(|address: &str| {
        Err(GrpcError::InvalidConfig(format!("no filter at {address}")))
    });
    FilterChain::new(Arc::new(ConnectionRegistry::new("filters", connector)))
}

/// Gateway state over `agents`, with one discovery poll already done when
/// `discover` is set.
pub async fn gateway_state(agents: &[Arc<MemoryAgent>], discover: bool) -> GatewayState {
    let by_address: HashMap<String, Arc<MemoryAgent>> = agents
        .iter()
        .map(|agent| (agent.address.clone(), agent.clone()))
        .collect();
    let addresses: Vec<String> = by_address.keys().cloned().collect();
    let connector: Connector<dyn Dispatchable> = Arc::new(move |address: &str| {
        by_address
            .get(address)
            .cloned()
            .map(|agent| agent as Arc<dyn Dispatchable>)
            .ok_or_else(|| GrpcError::InvalidConfig(format!("unknown agent {address}")))
    });

    let config = GatewayConfig {
        membership: MembershipConfig::Static(addresses),
        ..GatewayConfig::default()
    };
    let discoverer = Discoverer::new(
        config.membership_source(),
        DiscovererConfig::default(),
        config.backoff.clone(),
        config.breaker.clone(),
    );
    if discover {
        discoverer.poll_once().await.unwrap();
    }

    let service = GatewayService::new(
        config,
        Arc::new(ConnectionRegistry::new("agents", connector)),
        no_filters(),
        discoverer.snapshots(),
    );
    GatewayState::new(Arc::new(service))
}

pub async fn gateway(agents: &[Arc<MemoryAgent>], discover: bool) -> Router {
    router(gateway_state(agents, discover).await)
}
