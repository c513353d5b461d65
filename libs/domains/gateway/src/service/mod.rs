//! Gateway operations over the sharded agent set.
//!
//! ```text
//! request ──> ingress filters ──> fan-out to every agent ──> merge / quorum ──> egress filters
//! ```
//!
//! Writes succeed when the configured [`WriteQuorum`](crate::config::WriteQuorum)
//! of agents accepted them. Searches succeed when at least one agent answered
//! and carry a warning for every agent that did not.

mod fanout;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use grpc_client::CallContext;
use tokio::sync::watch;
use tonic::Code;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::agent::Dispatchable;
use crate::config::GatewayConfig;
use crate::discovery::MembershipSnapshot;
use crate::error::{GatewayError, GatewayResult};
use crate::filter::FilterChain;
use crate::merge::merge_ranked;
use crate::metrics::GatewayMetrics;
use crate::models::{
    AgentFailure, AgentStatus, InsertObjectRequest, ItemFailure, Location, Locations, ObjectBlob,
    ObjectId, RankedItem, RemoveByTimestampRequest, RemoveRequest, SearchByIdRequest,
    SearchConfig, SearchObjectRequest, SearchOutcome, SearchRequest, SearchResponse, VectorObject,
    VectorRequest, WriteOptions,
};
use crate::registry::ConnectionRegistry;

use fanout::{DispatchResult, Fanout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Insert,
    Update,
}

impl WriteKind {
    fn operation(&self) -> &'static str {
        match self {
            WriteKind::Insert => "insert",
            WriteKind::Update => "update",
        }
    }
}

/// Approximate index search or exhaustive scan on the agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchMode {
    Ann,
    Linear,
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn require_id(id: &str) -> GatewayResult<()> {
    if id.trim().is_empty() {
        return Err(GatewayError::InvalidArgument("id must not be empty".into()));
    }
    Ok(())
}

fn validate_object(object: &VectorObject) -> GatewayResult<()> {
    require_id(&object.id)?;
    if object.vector.is_empty() {
        return Err(GatewayError::InvalidArgument(format!(
            "vector for {} must not be empty",
            object.id
        )));
    }
    Ok(())
}

fn validate_search_config(config: &SearchConfig) -> GatewayResult<()> {
    if config.num == 0 {
        return Err(GatewayError::InvalidArgument("num must be at least 1".into()));
    }
    if config.min_num > config.num {
        return Err(GatewayError::InvalidArgument(format!(
            "min_num ({}) must not exceed num ({})",
            config.min_num, config.num
        )));
    }
    Ok(())
}

/// One location per removed object: agent names joined with `,`, ips
/// concatenated, in first-seen order.
fn merge_locations(locations: Vec<Location>) -> Vec<Location> {
    let mut merged: Vec<Location> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for location in locations {
        match index.get(&location.uuid) {
            Some(&at) => {
                let existing = &mut merged[at];
                existing.name = format!("{},{}", existing.name, location.name);
                existing.ips.extend(location.ips);
            }
            None => {
                index.insert(location.uuid.clone(), merged.len());
                merged.push(location);
            }
        }
    }
    merged
}

/// Configured targets first, then the ones the request adds.
fn chain(configured: &[String], extra: &[String]) -> Vec<String> {
    configured.iter().chain(extra).cloned().collect()
}

pub struct GatewayService {
    config: GatewayConfig,
    agents: Arc<ConnectionRegistry<dyn Dispatchable>>,
    filters: FilterChain,
    membership: watch::Receiver<Arc<MembershipSnapshot>>,
    fanout: Fanout,
}

impl GatewayService {
    pub fn new(
        config: GatewayConfig,
        agents: Arc<ConnectionRegistry<dyn Dispatchable>>,
        filters: FilterChain,
        membership: watch::Receiver<Arc<MembershipSnapshot>>,
    ) -> Self {
        let fanout = Fanout::new(config.fanout_concurrency, config.agent_timeout);
        Self {
            config,
            agents,
            filters,
            membership,
            fanout,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.membership.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        !self.snapshot().is_empty()
    }

    /// Known agents with the circuit state of their connection, if one exists yet.
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        let circuits = self.agents.circuit_states();
        self.snapshot()
            .agents
            .iter()
            .map(|agent| AgentStatus {
                circuit: circuits.get(&agent.address).cloned(),
                agent: agent.clone(),
            })
            .collect()
    }

    fn write_context(&self) -> CallContext {
        CallContext::new()
            .with_timeout(self.config.write_timeout)
            .with_request_id(new_request_id())
    }

    fn read_context(&self, config: Option<&SearchConfig>) -> CallContext {
        let timeout = config
            .and_then(|c| c.timeout_ms)
            .map(std::time::Duration::from_millis)
            .unwrap_or(self.config.search_timeout);
        let request_id = config
            .map(|c| c.request_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_request_id);
        CallContext::new()
            .with_timeout(timeout)
            .with_request_id(request_id)
    }

    /// Connections for every agent in the current snapshot, plus the agents
    /// that could not be connected.
    fn resolve_agents(&self) -> GatewayResult<(Vec<Arc<dyn Dispatchable>>, Vec<AgentFailure>)> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return Err(GatewayError::NoAgents);
        }
        let mut agents = Vec::with_capacity(snapshot.len());
        let mut failures = Vec::new();
        for address in snapshot.addresses() {
            match self.agents.get(&address) {
                Ok(agent) => agents.push(agent),
                Err(err) => failures.push(AgentFailure::new(address, Code::Internal, err.to_string())),
            }
        }
        Ok((agents, failures))
    }

    async fn observe<T, Fut>(&self, operation: &'static str, fut: Fut) -> GatewayResult<T>
    where
        Fut: Future<Output = GatewayResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        GatewayMetrics::record_operation(operation, result.is_ok(), started.elapsed());
        if let Err(err) = &result {
            debug!(operation, error = %err, "Operation failed");
        }
        result
    }

    // =========================================================================
    // Existence and lookup
    // =========================================================================

    async fn object_exists(&self, ctx: &CallContext, id: &str) -> GatewayResult<bool> {
        let (agents, mut failures) = self.resolve_agents()?;
        let id = id.to_string();
        let outcome = self
            .fanout
            .first_match(ctx, agents, move |agent, ctx| {
                let id = id.clone();
                async move {
                    agent
                        .exists(&ctx, &id)
                        .await
                        .map(|found| found.then_some(()))
                }
            })
            .await;

        if outcome.found.is_some() {
            return Ok(true);
        }
        failures.extend(outcome.failures);
        if outcome.answered == 0 {
            return Err(GatewayError::AllAgentsFailed {
                operation: "exists",
                failures,
            });
        }
        if !failures.is_empty() {
            warn!(failed = failures.len(), "Existence check missing some agents");
        }
        Ok(false)
    }

    async fn lookup_object(&self, ctx: &CallContext, id: &str) -> GatewayResult<VectorObject> {
        let (agents, mut failures) = self.resolve_agents()?;
        let key = id.to_string();
        let outcome = self
            .fanout
            .first_match(ctx, agents, move |agent, ctx| {
                let key = key.clone();
                async move { agent.get_object(&ctx, &key).await }
            })
            .await;

        if let Some(object) = outcome.found {
            return Ok(object);
        }
        failures.extend(outcome.failures);
        if outcome.answered == 0 {
            return Err(GatewayError::AllAgentsFailed {
                operation: "get_object",
                failures,
            });
        }
        Err(GatewayError::NotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn exists(&self, id: &str) -> GatewayResult<ObjectId> {
        self.observe("exists", async {
            require_id(id)?;
            let ctx = self.read_context(None);
            if self.object_exists(&ctx, id).await? {
                Ok(ObjectId { id: id.to_string() })
            } else {
                Err(GatewayError::NotFound(id.to_string()))
            }
        })
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_object(&self, id: &str) -> GatewayResult<VectorObject> {
        self.observe("get_object", async {
            require_id(id)?;
            let ctx = self.read_context(None);
            self.lookup_object(&ctx, id).await
        })
        .await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn settle_write(
        &self,
        operation: &'static str,
        total: usize,
        results: Vec<DispatchResult<Location>>,
        mut failures: Vec<AgentFailure>,
    ) -> GatewayResult<Locations> {
        let mut locations = Vec::with_capacity(results.len());
        for result in results {
            match result.outcome {
                Ok(location) => locations.push(location),
                Err(failure) => failures.push(failure),
            }
        }
        failures.sort_by(|a, b| a.address.cmp(&b.address));
        GatewayMetrics::record_agent_failures(operation, &failures);

        let required = self.config.write_quorum.required(total);
        if locations.len() >= required {
            if !failures.is_empty() {
                let failed: Vec<String> = failures.iter().map(ToString::to_string).collect();
                warn!(
                    operation,
                    required,
                    succeeded = locations.len(),
                    failed = %failed.join(", "),
                    "Write quorum met with failed agents"
                );
            }
            return Ok(Locations { locations });
        }

        Err(GatewayError::QuorumNotMet {
            operation,
            required,
            succeeded: locations.len(),
            failures,
        })
    }

    async fn write_vector(&self, kind: WriteKind, request: VectorRequest) -> GatewayResult<Locations> {
        validate_object(&request.vector)?;
        let ctx = self.write_context();

        let configured = match kind {
            WriteKind::Insert => &self.config.filters.insert,
            WriteKind::Update => &self.config.filters.update,
        };
        let targets = chain(configured, &request.config.filters);
        let mut object = self.filters.apply(&ctx, &targets, request.vector).await?;
        validate_object(&object)?;

        let timestamp = request.config.timestamp.unwrap_or_else(now_nanos);
        object.timestamp = timestamp;

        if !request.config.skip_strict_exist_check {
            let exists = self.object_exists(&ctx, &object.id).await?;
            match kind {
                WriteKind::Insert if exists => {
                    return Err(GatewayError::AlreadyExists(object.id));
                }
                WriteKind::Update if !exists => {
                    return Err(GatewayError::NotFound(object.id));
                }
                _ => {}
            }
        }

        // Checked once here; agents must not repeat it.
        let opts = WriteOptions {
            skip_strict_exist_check: true,
            timestamp,
        };
        let (agents, failures) = self.resolve_agents()?;
        let total = agents.len() + failures.len();
        let object = Arc::new(object);
        let results = self
            .fanout
            .broadcast(&ctx, agents, move |agent, ctx| {
                let object = object.clone();
                async move {
                    match kind {
                        WriteKind::Insert => agent.insert(&ctx, &object, opts).await,
                        WriteKind::Update => agent.update(&ctx, &object, opts).await,
                    }
                }
            })
            .await;

        self.settle_write(kind.operation(), total, results, failures)
    }

    #[instrument(skip(self, request), fields(id = %request.vector.id))]
    pub async fn insert(&self, request: VectorRequest) -> GatewayResult<Locations> {
        self.observe("insert", self.write_vector(WriteKind::Insert, request))
            .await
    }

    #[instrument(skip(self, request), fields(id = %request.vector.id))]
    pub async fn update(&self, request: VectorRequest) -> GatewayResult<Locations> {
        self.observe("update", self.write_vector(WriteKind::Update, request))
            .await
    }

    /// Update when the object exists anywhere, insert otherwise.
    #[instrument(skip(self, request), fields(id = %request.vector.id))]
    pub async fn upsert(&self, mut request: VectorRequest) -> GatewayResult<Locations> {
        self.observe("upsert", async {
            validate_object(&request.vector)?;
            let ctx = self.write_context();
            let kind = if self.object_exists(&ctx, &request.vector.id).await? {
                WriteKind::Update
            } else {
                WriteKind::Insert
            };
            request.config.skip_strict_exist_check = true;
            self.write_vector(kind, request).await
        })
        .await
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    pub async fn remove(&self, request: RemoveRequest) -> GatewayResult<Locations> {
        self.observe("remove", async {
            require_id(&request.id)?;
            let ctx = self.write_context();
            let timestamp = request.config.timestamp.unwrap_or_else(now_nanos);

            if !request.config.skip_strict_exist_check
                && !self.object_exists(&ctx, &request.id).await?
            {
                return Err(GatewayError::NotFound(request.id));
            }

            let opts = WriteOptions {
                skip_strict_exist_check: true,
                timestamp,
            };
            let (agents, failures) = self.resolve_agents()?;
            let total = agents.len() + failures.len();
            let id = request.id.clone();
            let results = self
                .fanout
                .broadcast(&ctx, agents, move |agent, ctx| {
                    let id = id.clone();
                    async move { agent.remove(&ctx, &id, opts).await }
                })
                .await;

            self.settle_write("remove", total, results, failures)
        })
        .await
    }

    /// Remove every object whose timestamp satisfies all conditions.
    ///
    /// An agent answering `NotFound` removed nothing but still counts toward
    /// the write quorum. Fails with `NotFound` when no agent removed anything.
    #[instrument(skip(self, request), fields(conditions = request.timestamps.len()))]
    pub async fn remove_by_timestamp(
        &self,
        request: RemoveByTimestampRequest,
    ) -> GatewayResult<Locations> {
        self.observe("remove_by_timestamp", async {
            if request.timestamps.is_empty() {
                return Err(GatewayError::InvalidArgument(
                    "at least one timestamp condition is required".into(),
                ));
            }
            let ctx = self.write_context();
            let (agents, mut failures) = self.resolve_agents()?;
            let total = agents.len() + failures.len();
            let conditions = Arc::new(request.timestamps);
            let results = self
                .fanout
                .broadcast(&ctx, agents, move |agent, ctx| {
                    let conditions = conditions.clone();
                    async move { agent.remove_by_timestamp(&ctx, &conditions).await }
                })
                .await;

            let mut answered = 0;
            let mut removed = Vec::new();
            for result in results {
                match result.outcome {
                    Ok(locations) => {
                        answered += 1;
                        removed.extend(locations);
                    }
                    Err(failure) if failure.code == Code::NotFound => answered += 1,
                    Err(failure) => failures.push(failure),
                }
            }
            failures.sort_by(|a, b| a.address.cmp(&b.address));
            GatewayMetrics::record_agent_failures("remove_by_timestamp", &failures);

            let required = self.config.write_quorum.required(total);
            if answered < required {
                return Err(GatewayError::QuorumNotMet {
                    operation: "remove_by_timestamp",
                    required,
                    succeeded: answered,
                    failures,
                });
            }
            if !failures.is_empty() {
                warn!(
                    required,
                    answered,
                    failed = failures.len(),
                    "Remove by timestamp missing some agents"
                );
            }

            let locations = merge_locations(removed);
            if locations.is_empty() {
                return Err(GatewayError::NotFound(
                    "no object matched the timestamp conditions".into(),
                ));
            }
            Ok(Locations { locations })
        })
        .await
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Fan a search out and keep every agent's partial result.
    ///
    /// An agent answering `NotFound` contributes an empty list. Fails only
    /// when no agent contributed.
    async fn gather<F, Fut>(
        &self,
        ctx: &CallContext,
        op: F,
    ) -> GatewayResult<(Vec<Vec<RankedItem>>, Vec<AgentFailure>)>
    where
        F: Fn(Arc<dyn Dispatchable>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<RankedItem>, grpc_client::CallError>> + Send + 'static,
    {
        let (agents, mut failures) = self.resolve_agents()?;
        let results = self.fanout.broadcast(ctx, agents, op).await;

        let mut partials = Vec::with_capacity(results.len());
        for result in results {
            match result.outcome {
                Ok(items) => partials.push(items),
                Err(failure) if failure.code == Code::NotFound => partials.push(Vec::new()),
                Err(failure) => failures.push(failure),
            }
        }
        failures.sort_by(|a, b| a.address.cmp(&b.address));
        GatewayMetrics::record_agent_failures("search", &failures);

        if partials.is_empty() {
            if failures.iter().all(|f| f.code == Code::DeadlineExceeded) {
                return Err(GatewayError::DeadlineExceeded(format!(
                    "no agent answered the search within the deadline ({} agents)",
                    failures.len()
                )));
            }
            return Err(GatewayError::AllAgentsFailed {
                operation: "search",
                failures,
            });
        }
        if !failures.is_empty() {
            GatewayMetrics::record_partial_search();
            warn!(
                answered = partials.len(),
                failed = failures.len(),
                "Search answered without every agent"
            );
        }
        Ok((partials, failures))
    }

    /// Merge, run egress filters and enforce `min_num`.
    async fn finish_search(
        &self,
        ctx: &CallContext,
        config: &SearchConfig,
        partials: Vec<Vec<RankedItem>>,
        warnings: Vec<AgentFailure>,
    ) -> GatewayResult<SearchOutcome> {
        let merged = merge_ranked(partials, config.num as usize);
        let targets = chain(&self.config.filters.distance, &config.egress_filters);
        let results = self.filters.apply(ctx, &targets, merged).await?;

        if results.len() < config.min_num as usize {
            return Err(GatewayError::InsufficientResults {
                required: config.min_num as usize,
                found: results.len(),
            });
        }

        Ok(SearchOutcome {
            response: SearchResponse {
                request_id: ctx.request_id.clone().unwrap_or_default(),
                results,
            },
            warnings,
        })
    }

    async fn search_vector(
        &self,
        ctx: &CallContext,
        mode: SearchMode,
        vector: Vec<f32>,
        config: SearchConfig,
    ) -> GatewayResult<SearchOutcome> {
        validate_search_config(&config)?;
        if vector.is_empty() {
            return Err(GatewayError::InvalidArgument("vector must not be empty".into()));
        }

        let targets = chain(&self.config.filters.search, &config.ingress_filters);
        let request_id = ctx.request_id.clone().unwrap_or_default();
        let filtered = self
            .filters
            .apply(ctx, &targets, VectorObject::new(request_id, vector))
            .await?;

        let vector = Arc::new(filtered.vector);
        let agent_config = Arc::new(config.clone());
        let (partials, warnings) = self
            .gather(ctx, move |agent, ctx| {
                let (vector, config) = (vector.clone(), agent_config.clone());
                async move {
                    match mode {
                        SearchMode::Ann => agent.search(&ctx, &vector, &config).await,
                        SearchMode::Linear => agent.linear_search(&ctx, &vector, &config).await,
                    }
                }
            })
            .await?;

        self.finish_search(ctx, &config, partials, warnings).await
    }

    #[instrument(skip(self, request), fields(num = request.config.num))]
    pub async fn search(&self, request: SearchRequest) -> GatewayResult<SearchOutcome> {
        self.observe("search", async {
            let ctx = self.read_context(Some(&request.config));
            self.search_vector(&ctx, SearchMode::Ann, request.vector, request.config)
                .await
        })
        .await
    }

    /// Exhaustive search; results merge the same way as [`Self::search`].
    #[instrument(skip(self, request), fields(num = request.config.num))]
    pub async fn linear_search(&self, request: SearchRequest) -> GatewayResult<SearchOutcome> {
        self.observe("linear_search", async {
            let ctx = self.read_context(Some(&request.config));
            self.search_vector(&ctx, SearchMode::Linear, request.vector, request.config)
                .await
        })
        .await
    }

    /// Search with the stored vector of `request.id`.
    ///
    /// When the vector cannot be fetched for any reason other than `NotFound`,
    /// falls back to the agents' own search-by-id.
    async fn search_stored(
        &self,
        mode: SearchMode,
        request: SearchByIdRequest,
    ) -> GatewayResult<SearchOutcome> {
        require_id(&request.id)?;
        validate_search_config(&request.config)?;
        let ctx = self.read_context(Some(&request.config));

        match self.lookup_object(&ctx, &request.id).await {
            Ok(object) => {
                self.search_vector(&ctx, mode, object.vector, request.config)
                    .await
            }
            Err(err) if err.is_not_found() => Err(err),
            Err(err) => {
                warn!(error = %err, "Vector lookup failed, falling back to agent search by id");
                let id = Arc::new(request.id.clone());
                let agent_config = Arc::new(request.config.clone());
                let (partials, warnings) = self
                    .gather(&ctx, move |agent, ctx| {
                        let (id, config) = (id.clone(), agent_config.clone());
                        async move {
                            match mode {
                                SearchMode::Ann => agent.search_by_id(&ctx, &id, &config).await,
                                SearchMode::Linear => {
                                    agent.linear_search_by_id(&ctx, &id, &config).await
                                }
                            }
                        }
                    })
                    .await?;
                self.finish_search(&ctx, &request.config, partials, warnings)
                    .await
            }
        }
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    pub async fn search_by_id(&self, request: SearchByIdRequest) -> GatewayResult<SearchOutcome> {
        self.observe("search_by_id", self.search_stored(SearchMode::Ann, request))
            .await
    }

    #[instrument(skip(self, request), fields(id = %request.id))]
    pub async fn linear_search_by_id(
        &self,
        request: SearchByIdRequest,
    ) -> GatewayResult<SearchOutcome> {
        self.observe(
            "linear_search_by_id",
            self.search_stored(SearchMode::Linear, request),
        )
        .await
    }

    // =========================================================================
    // Objects
    // =========================================================================

    fn vectorizer<'a>(&'a self, requested: &'a Option<String>) -> GatewayResult<&'a str> {
        requested
            .as_deref()
            .or(self.config.filters.vectorizer.as_deref())
            .ok_or_else(|| GatewayError::InvalidArgument("no vectorizer configured".into()))
    }

    #[instrument(skip(self, request), fields(id = %request.object.id))]
    pub async fn insert_object(&self, request: InsertObjectRequest) -> GatewayResult<Locations> {
        self.observe("insert_object", async {
            require_id(&request.object.id)?;
            let target = self.vectorizer(&request.vectorizer)?;
            let ctx = self.write_context();
            let id = request.object.id.clone();
            let mut vector = self.filters.vectorize(&ctx, target, request.object).await?;
            vector.id = id;
            self.write_vector(
                WriteKind::Insert,
                VectorRequest {
                    vector,
                    config: request.config,
                },
            )
            .await
        })
        .await
    }

    #[instrument(skip(self, request))]
    pub async fn search_object(&self, request: SearchObjectRequest) -> GatewayResult<SearchOutcome> {
        self.observe("search_object", async {
            let target = self.vectorizer(&request.vectorizer)?;
            let ctx = self.read_context(Some(&request.config));
            let blob = ObjectBlob {
                id: ctx.request_id.clone().unwrap_or_default(),
                object: request.object,
            };
            let vector = self.filters.vectorize(&ctx, target, blob).await?;
            self.search_vector(&ctx, SearchMode::Ann, vector.vector, request.config)
                .await
        })
        .await
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Run `f` over every item, at most `fanout_concurrency` at a time.
    /// Results keep input order; any failed item fails the batch.
    async fn batch<Req, Resp, F, Fut>(
        &self,
        operation: &'static str,
        requests: Vec<Req>,
        f: F,
    ) -> GatewayResult<Vec<Resp>>
    where
        F: Fn(Req) -> Fut,
        Fut: Future<Output = GatewayResult<Resp>>,
    {
        let results: Vec<GatewayResult<Resp>> = stream::iter(requests)
            .map(f)
            .buffered(self.config.fanout_concurrency)
            .collect()
            .await;

        let mut responses = Vec::with_capacity(results.len());
        let mut failures = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(response) => responses.push(response),
                Err(err) => failures.push(ItemFailure {
                    index,
                    code: err.code(),
                    message: err.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(responses)
        } else {
            warn!(operation, failed = failures.len(), "Batch items failed");
            Err(GatewayError::BatchFailed { operation, failures })
        }
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_insert(&self, requests: Vec<VectorRequest>) -> GatewayResult<Vec<Locations>> {
        self.batch("multi_insert", requests, |r| self.insert(r)).await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_update(&self, requests: Vec<VectorRequest>) -> GatewayResult<Vec<Locations>> {
        self.batch("multi_update", requests, |r| self.update(r)).await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_upsert(&self, requests: Vec<VectorRequest>) -> GatewayResult<Vec<Locations>> {
        self.batch("multi_upsert", requests, |r| self.upsert(r)).await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_remove(&self, requests: Vec<RemoveRequest>) -> GatewayResult<Vec<Locations>> {
        self.batch("multi_remove", requests, |r| self.remove(r)).await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_search(
        &self,
        requests: Vec<SearchRequest>,
    ) -> GatewayResult<Vec<SearchOutcome>> {
        self.batch("multi_search", requests, |r| self.search(r)).await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_search_by_id(
        &self,
        requests: Vec<SearchByIdRequest>,
    ) -> GatewayResult<Vec<SearchOutcome>> {
        self.batch("multi_search_by_id", requests, |r| self.search_by_id(r))
            .await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_linear_search(
        &self,
        requests: Vec<SearchRequest>,
    ) -> GatewayResult<Vec<SearchOutcome>> {
        self.batch("multi_linear_search", requests, |r| self.linear_search(r))
            .await
    }

    #[instrument(skip(self, requests), fields(count = requests.len()))]
    pub async fn multi_linear_search_by_id(
        &self,
        requests: Vec<SearchByIdRequest>,
    ) -> GatewayResult<Vec<SearchOutcome>> {
        self.batch("multi_linear_search_by_id", requests, |r| {
            self.linear_search_by_id(r)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests;
