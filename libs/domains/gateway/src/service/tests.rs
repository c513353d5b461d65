use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use grpc_client::{CallError, CircuitState};

use super::*;
use crate::config::WriteQuorum;
use crate::filter::tests::chain_with;
use crate::filter::{FilterService, MockFilterService};
use crate::models::{Agent, TimestampCondition, TimestampOperator, WriteConfig};
use crate::registry::Connector;

/// In-memory agent with injectable latency and failures.
pub(crate) struct FakeAgent {
    address: String,
    delay: Duration,
    failure: Option<Code>,
    lookup_failure: Option<Code>,
    results: Vec<RankedItem>,
    objects: Mutex<HashMap<String, VectorObject>>,
    pub writes: Mutex<Vec<(&'static str, String, WriteOptions)>>,
    pub searches: Mutex<Vec<&'static str>>,
    pub calls: AtomicUsize,
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

impl FakeAgent {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            delay: Duration::ZERO,
            failure: None,
            lookup_failure: None,
            results: Vec::new(),
            objects: Mutex::new(HashMap::new()),
            writes: Mutex::new(Vec::new()),
            searches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every call fails with `code`.
    pub fn failing(mut self, code: Code) -> Self {
        self.failure = Some(code);
        self
    }

    /// Only `exists` and `get_object` fail with `code`.
    pub fn failing_lookups(mut self, code: Code) -> Self {
        self.lookup_failure = Some(code);
        self
    }

    pub fn with_object(self, id: &str, vector: Vec<f32>) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(id.to_string(), VectorObject::new(id, vector));
        self
    }

    pub fn with_stamped_object(self, id: &str, timestamp: i64) -> Self {
        let mut object = VectorObject::new(id, vec![1.0]);
        object.timestamp = timestamp;
        self.objects.lock().unwrap().insert(id.to_string(), object);
        self
    }

    pub fn with_results(mut self, results: &[(&str, f32)]) -> Self {
        self.results = results
            .iter()
            .map(|(id, d)| RankedItem::new(*id, *d))
            .collect();
        self
    }

    pub fn written(&self) -> Vec<(&'static str, String, WriteOptions)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn searched(&self) -> Vec<&'static str> {
        self.searches.lock().unwrap().clone()
    }

    async fn ranked(&self, kind: &'static str) -> Result<Vec<RankedItem>, CallError> {
        self.enter(false).await?;
        self.searches.lock().unwrap().push(kind);
        Ok(self.results.clone())
    }

    fn error(&self, code: Code) -> CallError {
        CallError::Status {
            target: self.address.clone(),
            status: tonic::Status::new(code, "injected failure"),
            attempts: 1,
        }
    }

    async fn enter(&self, lookup: bool) -> Result<(), CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match (self.failure, self.lookup_failure) {
            (Some(code), _) => Err(self.error(code)),
            (None, Some(code)) if lookup => Err(self.error(code)),
            _ => Ok(()),
        }
    }

    fn location(&self, id: &str) -> Location {
        Location {
            name: self.address.clone(),
            uuid: id.to_string(),
            ips: vec![self.address.clone()],
        }
    }

    fn store(&self, op: &'static str, object: &VectorObject, opts: WriteOptions) {
        self.writes
            .lock()
            .unwrap()
            .push((op, object.id.clone(), opts));
        self.objects
            .lock()
            .unwrap()
            .insert(object.id.clone(), object.clone());
    }
}

#[async_trait]
impl Dispatchable for FakeAgent {
    fn address(&self) -> &str {
        &self.address
    }

    fn circuit_state(&self) -> CircuitState {
        CircuitState::Closed
    }

    async fn insert(
        &self,
        _ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.enter(false).await?;
        self.store("insert", object, opts);
        Ok(self.location(&object.id))
    }

    async fn update(
        &self,
        _ctx: &CallContext,
        object: &VectorObject,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.enter(false).await?;
        self.store("update", object, opts);
        Ok(self.location(&object.id))
    }

    async fn remove(
        &self,
        _ctx: &CallContext,
        id: &str,
        opts: WriteOptions,
    ) -> Result<Location, CallError> {
        self.enter(false).await?;
        self.writes
            .lock()
            .unwrap()
            .push(("remove", id.to_string(), opts));
        self.objects.lock().unwrap().remove(id);
        Ok(self.location(id))
    }

    async fn remove_by_timestamp(
        &self,
        _ctx: &CallContext,
        conditions: &[TimestampCondition],
    ) -> Result<Vec<Location>, CallError> {
        self.enter(false).await?;
        let mut objects = self.objects.lock().unwrap();
        let mut matched: Vec<String> = objects
            .values()
            .filter(|o| conditions.iter().all(|c| satisfies(c, o.timestamp)))
            .map(|o| o.id.clone())
            .collect();
        if matched.is_empty() {
            return Err(self.error(Code::NotFound));
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
        _vector: &[f32],
        _config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.ranked("search").await
    }

    async fn search_by_id(
        &self,
        _ctx: &CallContext,
        _id: &str,
        _config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.ranked("search_by_id").await
    }

    async fn linear_search(
        &self,
        _ctx: &CallContext,
        _vector: &[f32],
        _config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.ranked("linear_search").await
    }

    async fn linear_search_by_id(
        &self,
        _ctx: &CallContext,
        _id: &str,
        _config: &SearchConfig,
    ) -> Result<Vec<RankedItem>, CallError> {
        self.ranked("linear_search_by_id").await
    }

    async fn exists(&self, _ctx: &CallContext, id: &str) -> Result<bool, CallError> {
        self.enter(true).await?;
        Ok(self.objects.lock().unwrap().contains_key(id))
    }

    async fn get_object(
        &self,
        _ctx: &CallContext,
        id: &str,
    ) -> Result<Option<VectorObject>, CallError> {
        self.enter(true).await?;
        Ok(self.objects.lock().unwrap().get(id).cloned())
    }
}

pub(crate) fn agents(fakes: Vec<FakeAgent>) -> Vec<Arc<dyn Dispatchable>> {
    fakes
        .into_iter()
        .map(|fake| Arc::new(fake) as Arc<dyn Dispatchable>)
        .collect()
}

fn snapshot_of(fakes: &[Arc<FakeAgent>]) -> Arc<MembershipSnapshot> {
    let mut agents: Vec<Agent> = fakes
        .iter()
        .map(|fake| Agent {
            address: fake.address.clone(),
            pod_identity: fake.address.clone(),
            last_seen: Utc::now(),
            missed_polls: 0,
        })
        .collect();
    agents.sort_by(|a, b| a.address.cmp(&b.address));
    Arc::new(MembershipSnapshot {
        generation: 1,
        agents,
        polled_at: Utc::now(),
    })
}

pub(crate) fn service_with_filters(
    fakes: &[Arc<FakeAgent>],
    config: GatewayConfig,
    filters: Vec<(&str, Arc<dyn FilterService>)>,
) -> GatewayService {
    let by_address: HashMap<String, Arc<FakeAgent>> = fakes
        .iter()
        .map(|fake| (fake.address.clone(), fake.clone()))
        .collect();
    let connector: Connector<dyn Dispatchable> = Arc::new(move |address: &str| {
        by_address
            .get(address)
            .cloned()
            .map(|fake| fake as Arc<dyn Dispatchable>)
            .ok_or_else(|| grpc_client::GrpcError::InvalidConfig(format!("unknown agent {address}")))
    });
    let (_tx, membership) = watch::channel(snapshot_of(fakes));
    GatewayService::new(
        config,
        Arc::new(ConnectionRegistry::new("agents", connector)),
        chain_with(filters),
        membership,
    )
}

pub(crate) fn service(fakes: &[Arc<FakeAgent>]) -> GatewayService {
    service_with_filters(fakes, GatewayConfig::default(), vec![])
}

fn search_request(num: u32) -> SearchRequest {
    SearchRequest {
        vector: vec![0.1, 0.2],
        config: SearchConfig::default().with_num(num),
    }
}

fn skip_check() -> WriteConfig {
    WriteConfig {
        skip_strict_exist_check: true,
        ..WriteConfig::default()
    }
}

fn vector_request(id: &str, config: WriteConfig) -> VectorRequest {
    VectorRequest {
        vector: VectorObject::new(id, vec![1.0, 2.0]),
        config,
    }
}

// =============================================================================
// Search
// =============================================================================

#[tokio::test]
async fn test_search_merges_and_warns_about_failed_agent() {
    let a = Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.1), ("2", 0.5)]));
    let b = Arc::new(FakeAgent::new("b:1").with_results(&[("2", 0.3), ("3", 0.4)]));
    let c = Arc::new(FakeAgent::new("c:1").failing(Code::Unavailable));
    let svc = service(&[a, b, c]);

    let outcome = svc.search(search_request(2)).await.unwrap();

    assert_eq!(
        outcome.response.results,
        vec![RankedItem::new("1", 0.1), RankedItem::new("2", 0.3)]
    );
    assert!(outcome.is_partial());
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].address, "c:1");
    assert_eq!(outcome.warnings[0].code, Code::Unavailable);
    assert!(!outcome.response.request_id.is_empty());
}

#[tokio::test]
async fn test_search_fails_only_when_every_agent_fails() {
    let svc = service(&[
        Arc::new(FakeAgent::new("a:1").failing(Code::Unavailable)),
        Arc::new(FakeAgent::new("b:1").failing(Code::Internal)),
    ]);

    let err = svc.search(search_request(5)).await.unwrap_err();
    match &err {
        GatewayError::AllAgentsFailed { failures, .. } => {
            let addresses: Vec<_> = failures.iter().map(|f| f.address.as_str()).collect();
            assert_eq!(addresses, ["a:1", "b:1"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.code(), Code::Unavailable);
}

#[tokio::test(start_paused = true)]
async fn test_search_deadline_with_no_answers() {
    let svc = service(&[Arc::new(
        FakeAgent::new("a:1").with_delay(Duration::from_secs(30)),
    )]);
    let mut request = search_request(5);
    request.config.timeout_ms = Some(100);

    let err = svc.search(request).await.unwrap_err();
    assert!(matches!(err, GatewayError::DeadlineExceeded(_)));
}

#[tokio::test(start_paused = true)]
async fn test_search_returns_what_arrived_before_deadline() {
    let svc = service(&[
        Arc::new(FakeAgent::new("fast:1").with_results(&[("1", 0.2)])),
        Arc::new(
            FakeAgent::new("slow:1")
                .with_results(&[("0", 0.0)])
                .with_delay(Duration::from_secs(30)),
        ),
    ]);
    let mut request = search_request(5);
    request.config.timeout_ms = Some(100);

    let outcome = svc.search(request).await.unwrap();
    assert_eq!(outcome.response.results, vec![RankedItem::new("1", 0.2)]);
    assert_eq!(outcome.warnings[0].address, "slow:1");
    assert_eq!(outcome.warnings[0].code, Code::DeadlineExceeded);
}

#[tokio::test]
async fn test_agent_not_found_is_an_empty_answer() {
    let svc = service(&[
        Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.2)])),
        Arc::new(FakeAgent::new("b:1").failing(Code::NotFound)),
    ]);
    let outcome = svc.search(search_request(5)).await.unwrap();
    assert_eq!(outcome.response.results.len(), 1);
    assert!(!outcome.is_partial());
}

#[tokio::test]
async fn test_search_with_no_hits_is_empty_success() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let outcome = svc.search(search_request(5)).await.unwrap();
    assert!(outcome.response.results.is_empty());
}

#[tokio::test]
async fn test_search_keeps_request_id() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let mut request = search_request(5);
    request.config.request_id = "req-42".into();
    let outcome = svc.search(request).await.unwrap();
    assert_eq!(outcome.response.request_id, "req-42");
}

#[tokio::test]
async fn test_search_validation() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);

    let err = svc.search(search_request(0)).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let mut empty = search_request(3);
    empty.vector.clear();
    assert_eq!(svc.search(empty).await.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_search_min_num() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.2)]))]);
    let mut request = search_request(5);
    request.config.min_num = 2;

    let err = svc.search(request).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::InsufficientResults { required: 2, found: 1 }
    ));
}

#[tokio::test]
async fn test_search_without_agents() {
    let svc = service(&[]);
    let err = svc.search(search_request(5)).await.unwrap_err();
    assert!(matches!(err, GatewayError::NoAgents));
    assert!(!svc.is_ready());
}

#[tokio::test]
async fn test_search_filters_run_around_dispatch() {
    let mut ingress = MockFilterService::new();
    ingress.expect_filter_vector().returning(|_, mut object| {
        object.vector = vec![9.0];
        Ok(object)
    });
    let mut egress = MockFilterService::new();
    egress
        .expect_filter_distances()
        .returning(|_, items| Ok(items.into_iter().filter(|i| i.id != "2").collect()));

    let mut config = GatewayConfig::default();
    config.filters.search = vec!["in".into()];
    config.filters.distance = vec!["out".into()];
    let svc = service_with_filters(
        &[Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.1), ("2", 0.2)]))],
        config,
        vec![
            ("in", Arc::new(ingress) as Arc<dyn FilterService>),
            ("out", Arc::new(egress) as Arc<dyn FilterService>),
        ],
    );

    let outcome = svc.search(search_request(5)).await.unwrap();
    assert_eq!(outcome.response.results, vec![RankedItem::new("1", 0.1)]);
}

#[tokio::test]
async fn test_search_by_id_uses_stored_vector() {
    let a = Arc::new(
        FakeAgent::new("a:1")
            .with_object("x", vec![0.5])
            .with_results(&[("y", 0.2)]),
    );
    let svc = service(&[a.clone()]);

    let outcome = svc
        .search_by_id(SearchByIdRequest {
            id: "x".into(),
            config: SearchConfig::default(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.response.results, vec![RankedItem::new("y", 0.2)]);
    // get_object then search
    assert_eq!(a.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_search_by_id_not_found() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let err = svc
        .search_by_id(SearchByIdRequest {
            id: "missing".into(),
            config: SearchConfig::default(),
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_search_by_id_falls_back_to_agents() {
    let svc = service(&[Arc::new(
        FakeAgent::new("a:1")
            .failing_lookups(Code::Unavailable)
            .with_results(&[("z", 0.3)]),
    )]);
    let outcome = svc
        .search_by_id(SearchByIdRequest {
            id: "x".into(),
            config: SearchConfig::default(),
        })
        .await
        .unwrap();
    assert_eq!(outcome.response.results, vec![RankedItem::new("z", 0.3)]);
}

#[tokio::test]
async fn test_linear_search_merges_like_search() {
    let a = Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.4)]));
    let b = Arc::new(FakeAgent::new("b:1").with_results(&[("2", 0.1), ("3", 0.9)]));
    let svc = service(&[a.clone(), b.clone()]);

    let outcome = svc.linear_search(search_request(2)).await.unwrap();
    assert_eq!(
        outcome.response.results,
        vec![RankedItem::new("2", 0.1), RankedItem::new("1", 0.4)]
    );
    assert_eq!(a.searched(), ["linear_search"]);
    assert_eq!(b.searched(), ["linear_search"]);
}

#[tokio::test]
async fn test_linear_search_by_id_uses_stored_vector_then_falls_back() {
    let stored = Arc::new(
        FakeAgent::new("a:1")
            .with_object("x", vec![0.5])
            .with_results(&[("y", 0.2)]),
    );
    let svc = service(&[stored.clone()]);
    let request = SearchByIdRequest {
        id: "x".into(),
        config: SearchConfig::default(),
    };
    svc.linear_search_by_id(request.clone()).await.unwrap();
    assert_eq!(stored.searched(), ["linear_search"]);

    let unreachable = Arc::new(
        FakeAgent::new("a:1")
            .failing_lookups(Code::Unavailable)
            .with_results(&[("z", 0.3)]),
    );
    let svc = service(&[unreachable.clone()]);
    let outcome = svc.linear_search_by_id(request).await.unwrap();
    assert_eq!(outcome.response.results, vec![RankedItem::new("z", 0.3)]);
    assert_eq!(unreachable.searched(), ["linear_search_by_id"]);
}

#[tokio::test]
async fn test_multi_linear_search_keeps_order() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1").with_results(&[("1", 0.1)]))]);
    let mut second = search_request(1);
    second.config.request_id = "second".into();
    let mut first = search_request(1);
    first.config.request_id = "first".into();

    let outcomes = svc.multi_linear_search(vec![first, second]).await.unwrap();
    let ids: Vec<_> = outcomes
        .iter()
        .map(|o| o.response.request_id.as_str())
        .collect();
    assert_eq!(ids, ["first", "second"]);
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_remove_by_timestamp_merges_locations_by_uuid() {
    let a = Arc::new(
        FakeAgent::new("a:1")
            .with_stamped_object("old", 10)
            .with_stamped_object("new", 50),
    );
    let b = Arc::new(FakeAgent::new("b:1").with_stamped_object("old", 10));
    let c = Arc::new(FakeAgent::new("c:1").with_stamped_object("new", 50));
    let svc = service(&[a, b, c]);

    let locations = svc
        .remove_by_timestamp(RemoveByTimestampRequest {
            timestamps: vec![TimestampCondition {
                timestamp: 20,
                operator: TimestampOperator::Lt,
            }],
        })
        .await
        .unwrap();

    assert_eq!(locations.locations.len(), 1);
    let merged = &locations.locations[0];
    assert_eq!(merged.uuid, "old");
    let mut names: Vec<_> = merged.name.split(',').collect();
    names.sort();
    assert_eq!(names, ["a:1", "b:1"]);
    assert_eq!(merged.ips.len(), 2);
}

#[tokio::test]
async fn test_remove_by_timestamp_nothing_matched() {
    let svc = service(&[
        Arc::new(FakeAgent::new("a:1").with_stamped_object("x", 10)),
        Arc::new(FakeAgent::new("b:1")),
    ]);
    let err = svc
        .remove_by_timestamp(RemoveByTimestampRequest {
            timestamps: vec![TimestampCondition {
                timestamp: 100,
                operator: TimestampOperator::Gt,
            }],
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_remove_by_timestamp_requires_conditions_and_quorum() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let err = svc
        .remove_by_timestamp(RemoveByTimestampRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let svc = service(&[
        Arc::new(FakeAgent::new("a:1").with_stamped_object("x", 10)),
        Arc::new(FakeAgent::new("b:1").failing(Code::Unavailable)),
    ]);
    let err = svc
        .remove_by_timestamp(RemoveByTimestampRequest {
            timestamps: vec![TimestampCondition {
                timestamp: 10,
                operator: TimestampOperator::Eq,
            }],
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GatewayError::QuorumNotMet {
            required: 2,
            succeeded: 1,
            ..
        }
    ));
}

#[tokio::test]
async fn test_write_quorum_over_every_subset() {
    let quorums = [
        WriteQuorum::All,
        WriteQuorum::Majority,
        WriteQuorum::AtLeast(1),
    ];
    for quorum in quorums {
        for mask in 0u8..8 {
            let fakes: Vec<Arc<FakeAgent>> = (0..3)
                .map(|i| {
                    let fake = FakeAgent::new(format!("agent-{i}:1"));
                    Arc::new(if mask & (1 << i) != 0 {
                        fake
                    } else {
                        fake.failing(Code::Unavailable)
                    })
                })
                .collect();
            let config = GatewayConfig {
                write_quorum: quorum,
                ..GatewayConfig::default()
            };
            let svc = service_with_filters(&fakes, config, vec![]);

            let succeeded = mask.count_ones() as usize;
            let result = svc.insert(vector_request("obj", skip_check())).await;
            if succeeded >= quorum.required(3) {
                let locations = result.unwrap();
                assert_eq!(locations.locations.len(), succeeded, "{quorum:?} mask {mask:03b}");
            } else {
                match result.unwrap_err() {
                    GatewayError::QuorumNotMet {
                        failures,
                        succeeded: ok,
                        ..
                    } => {
                        assert_eq!(ok, succeeded);
                        assert_eq!(failures.len(), 3 - succeeded);
                    }
                    other => panic!("{quorum:?} mask {mask:03b}: {other:?}"),
                }
            }
        }
    }
}

#[tokio::test]
async fn test_insert_error_names_every_failed_agent() {
    let svc = service(&[
        Arc::new(FakeAgent::new("a:1")),
        Arc::new(FakeAgent::new("b:1").failing(Code::Unavailable)),
        Arc::new(FakeAgent::new("c:1").failing(Code::ResourceExhausted)),
    ]);
    let err = svc
        .insert(vector_request("obj", skip_check()))
        .await
        .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("b:1"), "{message}");
    assert!(message.contains("c:1"), "{message}");
    assert!(!message.contains("a:1"), "{message}");
}

#[tokio::test]
async fn test_insert_forwards_skip_and_timestamp() {
    let a = Arc::new(FakeAgent::new("a:1"));
    let svc = service(&[a.clone()]);

    svc.insert(vector_request("new", WriteConfig::default()))
        .await
        .unwrap();
    let config = WriteConfig {
        timestamp: Some(77),
        ..skip_check()
    };
    svc.insert(vector_request("other", config)).await.unwrap();

    let writes = a.written();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|(_, _, opts)| opts.skip_strict_exist_check));
    assert!(writes[0].2.timestamp > 0);
    assert_eq!(writes[1].2.timestamp, 77);
}

#[tokio::test]
async fn test_strict_exist_checks() {
    let a = Arc::new(FakeAgent::new("a:1"));
    let b = Arc::new(FakeAgent::new("b:1").with_object("held", vec![1.0]));
    let svc = service(&[a.clone(), b]);

    let err = svc
        .insert(vector_request("held", WriteConfig::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::AlreadyExists(ref id) if id == "held"));

    let err = svc
        .update(vector_request("ghost", WriteConfig::default()))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = svc
        .remove(RemoveRequest {
            id: "ghost".into(),
            config: WriteConfig::default(),
        })
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    assert!(a.written().is_empty());
}

#[tokio::test]
async fn test_remove_fans_out() {
    let a = Arc::new(FakeAgent::new("a:1").with_object("x", vec![1.0]));
    let b = Arc::new(FakeAgent::new("b:1"));
    let svc = service(&[a.clone(), b.clone()]);

    let locations = svc
        .remove(RemoveRequest {
            id: "x".into(),
            config: WriteConfig::default(),
        })
        .await
        .unwrap();
    assert_eq!(locations.locations.len(), 2);
    assert_eq!(a.written()[0].0, "remove");
    assert_eq!(b.written()[0].0, "remove");
}

#[tokio::test]
async fn test_upsert_picks_insert_or_update() {
    let a = Arc::new(FakeAgent::new("a:1").with_object("old", vec![1.0]));
    let svc = service(&[a.clone()]);

    svc.upsert(vector_request("old", WriteConfig::default()))
        .await
        .unwrap();
    svc.upsert(vector_request("new", WriteConfig::default()))
        .await
        .unwrap();

    let ops: Vec<_> = a.written().into_iter().map(|(op, id, _)| (op, id)).collect();
    assert_eq!(
        ops,
        vec![("update", "old".to_string()), ("insert", "new".to_string())]
    );
}

#[tokio::test]
async fn test_insert_validation() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let mut request = vector_request("x", skip_check());
    request.vector.vector.clear();
    assert_eq!(svc.insert(request).await.unwrap_err().code(), Code::InvalidArgument);

    let request = vector_request(" ", skip_check());
    assert_eq!(svc.insert(request).await.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_insert_filter_failure_aborts_before_dispatch() {
    let mut filter = MockFilterService::new();
    filter.expect_filter_vector().returning(|_, _| {
        Err(CallError::Status {
            target: "f:1".into(),
            status: tonic::Status::invalid_argument("bad vector"),
            attempts: 1,
        })
    });
    let mut config = GatewayConfig::default();
    config.filters.insert = vec!["f:1".into()];
    let a = Arc::new(FakeAgent::new("a:1"));
    let svc = service_with_filters(
        &[a.clone()],
        config,
        vec![("f:1", Arc::new(filter) as Arc<dyn FilterService>)],
    );

    let err = svc
        .insert(vector_request("x", skip_check()))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Filter { stage: 0, .. }));
    assert_eq!(a.calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Lookups, objects, batches
// =============================================================================

#[tokio::test]
async fn test_exists_and_get_object() {
    let svc = service(&[
        Arc::new(FakeAgent::new("a:1")),
        Arc::new(FakeAgent::new("b:1").with_object("x", vec![3.0])),
    ]);

    assert_eq!(svc.exists("x").await.unwrap(), ObjectId { id: "x".into() });
    assert!(svc.exists("y").await.unwrap_err().is_not_found());
    assert_eq!(svc.get_object("x").await.unwrap().vector, vec![3.0]);
    assert!(svc.get_object("y").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_lookup_when_every_agent_fails() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1").failing(Code::Unavailable))]);
    let err = svc.exists("x").await.unwrap_err();
    assert!(matches!(err, GatewayError::AllAgentsFailed { .. }));
}

#[tokio::test]
async fn test_insert_object_runs_vectorizer() {
    let mut vectorizer = MockFilterService::new();
    vectorizer
        .expect_vectorize()
        .returning(|_, blob| Ok(VectorObject::new("ignored", vec![blob.object.len() as f32])));
    let mut config = GatewayConfig::default();
    config.filters.vectorizer = Some("vec:1".into());
    let a = Arc::new(FakeAgent::new("a:1"));
    let svc = service_with_filters(
        &[a.clone()],
        config,
        vec![("vec:1", Arc::new(vectorizer) as Arc<dyn FilterService>)],
    );

    svc.insert_object(InsertObjectRequest {
        object: ObjectBlob {
            id: "img-1".into(),
            object: vec![0, 1, 2, 3],
        },
        config: WriteConfig::default(),
        vectorizer: None,
    })
    .await
    .unwrap();

    let writes = a.written();
    assert_eq!(writes[0].1, "img-1");
    let stored = svc.get_object("img-1").await.unwrap();
    assert_eq!(stored.vector, vec![4.0]);
}

#[tokio::test]
async fn test_object_operations_need_a_vectorizer() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let err = svc
        .search_object(SearchObjectRequest {
            object: vec![1],
            config: SearchConfig::default(),
            vectorizer: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_multi_insert_keeps_order() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1"))]);
    let requests = (0..5)
        .map(|i| vector_request(&format!("obj-{i}"), skip_check()))
        .collect();

    let responses = svc.multi_insert(requests).await.unwrap();
    let ids: Vec<_> = responses
        .iter()
        .map(|l| l.locations[0].uuid.as_str())
        .collect();
    assert_eq!(ids, ["obj-0", "obj-1", "obj-2", "obj-3", "obj-4"]);
}

#[tokio::test]
async fn test_multi_insert_reports_failed_indexes() {
    let svc = service(&[Arc::new(FakeAgent::new("a:1").with_object("dup", vec![1.0]))]);
    let requests = vec![
        vector_request("fresh", WriteConfig::default()),
        vector_request("dup", WriteConfig::default()),
        vector_request("", WriteConfig::default()),
    ];

    match svc.multi_insert(requests).await.unwrap_err() {
        GatewayError::BatchFailed { failures, .. } => {
            let indexes: Vec<_> = failures.iter().map(|f| (f.index, f.code)).collect();
            assert_eq!(
                indexes,
                vec![(1, Code::AlreadyExists), (2, Code::InvalidArgument)]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_agent_statuses() {
    let svc = service(&[Arc::new(FakeAgent::new("b:1")), Arc::new(FakeAgent::new("a:1"))]);
    assert!(svc.is_ready());

    svc.search(search_request(1)).await.unwrap();
    let statuses = svc.agent_statuses();
    let view: Vec<_> = statuses
        .iter()
        .map(|s| (s.agent.address.as_str(), s.circuit.as_deref()))
        .collect();
    assert_eq!(view, vec![("a:1", Some("closed")), ("b:1", Some("closed"))]);
}
