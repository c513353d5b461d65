//! Agent membership.
//!
//! The [`Discoverer`] polls a [`MembershipSource`] on an interval and keeps
//! the live agent set. An agent is evicted only after it has been missing for
//! `debounce` consecutive polls, so one flaky lookup never drops a healthy
//! agent. Every change is published twice: the whole set as an
//! `Arc<MembershipSnapshot>` on a `watch` channel, and the individual
//! additions and removals on a `broadcast` channel.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use grpc_client::{BackoffPolicy, CallContext, CircuitBreakerConfig, ResilientClient};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use trust_dns_resolver::TokioAsyncResolver;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::ResolveErrorKind;

use crate::error::{GatewayError, GatewayResult};
use crate::models::Agent;

/// One agent as reported by a membership source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub address: String,
    pub pod_identity: String,
}

impl Member {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            pod_identity: address.clone(),
            address,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn list_members(&self) -> Result<Vec<Member>, tonic::Status>;

    /// Human readable source description for logs.
    fn describe(&self) -> String;
}

/// Fixed agent list.
#[derive(Debug, Clone)]
pub struct StaticMembership {
    members: Vec<Member>,
}

impl StaticMembership {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            members: addresses.into_iter().map(Member::new).collect(),
        }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn list_members(&self) -> Result<Vec<Member>, tonic::Status> {
        Ok(self.members.clone())
    }

    fn describe(&self) -> String {
        format!("static({} agents)", self.members.len())
    }
}

/// Why a host lookup returned no addresses.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// The name exists in no zone, or has no address records.
    #[error("no address records")]
    NoRecords,
    #[error("{0}")]
    Unavailable(String),
}

/// Host name to IP addresses.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, LookupError>;
}

/// Resolver configured from the system resolv.conf.
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        let inner = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|err| {
            warn!(error = %err, "System resolver config unreadable, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { inner }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, LookupError> {
        match self.inner.lookup_ip(host).await {
            Ok(found) => Ok(found.iter().collect()),
            Err(err) => match err.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Err(LookupError::NoRecords),
                _ => Err(LookupError::Unavailable(err.to_string())),
            },
        }
    }
}

/// Resolves a headless-service name; every resolved address is one agent.
///
/// A name with no records is an empty membership, not a failed poll: a
/// headless service with zero ready endpoints answers NXDOMAIN.
pub struct DnsMembership {
    name: String,
    resolver: Arc<dyn HostResolver>,
}

impl DnsMembership {
    /// `name` is `host:port`.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_resolver(name, Arc::new(SystemResolver::new()))
    }

    pub fn with_resolver(name: impl Into<String>, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            name: name.into(),
            resolver,
        }
    }

    fn split_name(&self) -> Result<(&str, u16), tonic::Status> {
        let invalid = || tonic::Status::invalid_argument(format!("{} is not host:port", self.name));
        let (host, port) = self.name.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse().map_err(|_| invalid())?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        Ok((host, port))
    }
}

#[async_trait]
impl MembershipSource for DnsMembership {
    async fn list_members(&self) -> Result<Vec<Member>, tonic::Status> {
        let (host, port) = self.split_name()?;
        let ips = match self.resolver.lookup(host).await {
            Ok(ips) => ips,
            Err(LookupError::NoRecords) => {
                debug!(name = %self.name, "Name has no records, membership is empty");
                Vec::new()
            }
            Err(LookupError::Unavailable(reason)) => {
                return Err(tonic::Status::unavailable(format!(
                    "resolving {}: {reason}",
                    self.name
                )));
            }
        };

        let mut addresses: Vec<String> = ips
            .into_iter()
            .map(|ip| SocketAddr::new(ip, port).to_string())
            .collect();
        addresses.sort();
        addresses.dedup();
        Ok(addresses.into_iter().map(Member::new).collect())
    }

    fn describe(&self) -> String {
        format!("dns({})", self.name)
    }
}

/// Immutable view of the agent set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipSnapshot {
    /// Bumped on every published change.
    pub generation: u64,
    /// Sorted by address.
    pub agents: Vec<Agent>,
    pub polled_at: DateTime<Utc>,
}

impl MembershipSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            agents: Vec::new(),
            polled_at: Utc::now(),
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.address.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Added(String),
    Removed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscovererConfig {
    pub interval: Duration,
    /// Consecutive missed polls before eviction; never less than 2.
    pub debounce: u32,
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            debounce: 2,
        }
    }
}

/// What one successful poll changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub generation: u64,
}

const EVENT_CAPACITY: usize = 256;

pub struct Discoverer {
    source: Arc<dyn MembershipSource>,
    client: ResilientClient,
    config: DiscovererConfig,
    known: Mutex<BTreeMap<String, Agent>>,
    snapshots: watch::Sender<Arc<MembershipSnapshot>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl Discoverer {
    pub fn new(
        source: Arc<dyn MembershipSource>,
        config: DiscovererConfig,
        policy: BackoffPolicy,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        let (snapshots, _) = watch::channel(Arc::new(MembershipSnapshot::empty()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            source,
            client: ResilientClient::new("membership", policy, breaker),
            config: DiscovererConfig {
                debounce: config.debounce.max(2),
                ..config
            },
            known: Mutex::new(BTreeMap::new()),
            snapshots,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    pub fn snapshots(&self) -> watch::Receiver<Arc<MembershipSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn agent_count(&self) -> usize {
        self.snapshots.borrow().len()
    }

    fn known(&self) -> MutexGuard<'_, BTreeMap<String, Agent>> {
        self.known
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Poll the source once and publish any change.
    ///
    /// On failure the previous snapshot stays in place.
    pub async fn poll_once(&self) -> GatewayResult<PollOutcome> {
        let ctx = CallContext::new().with_timeout(self.config.interval);
        let members = match self
            .client
            .call(&ctx, || {
                let source = self.source.clone();
                async move { source.list_members().await }
            })
            .await
        {
            Ok(members) => members,
            Err(err) => {
                counter!("gateway_discovery_errors_total").increment(1);
                warn!(error = %err, "Membership poll failed, keeping last snapshot");
                return Err(GatewayError::Discovery(err));
            }
        };

        let now = Utc::now();
        let mut outcome = PollOutcome::default();
        let mut changed = false;

        let snapshot = {
            let mut known = self.known();
            let present: BTreeMap<String, Member> = members
                .into_iter()
                .map(|m| (m.address.clone(), m))
                .collect();

            known.retain(|address, agent| {
                if present.contains_key(address) {
                    return true;
                }
                agent.missed_polls += 1;
                changed = true;
                if agent.missed_polls >= self.config.debounce {
                    outcome.removed.push(address.clone());
                    false
                } else {
                    debug!(address = %address, missed = agent.missed_polls, "Agent missing from poll");
                    true
                }
            });

            for (address, member) in present {
                match known.get_mut(&address) {
                    Some(agent) => {
                        if agent.missed_polls != 0 || agent.pod_identity != member.pod_identity {
                            changed = true;
                        }
                        agent.missed_polls = 0;
                        agent.pod_identity = member.pod_identity;
                        agent.last_seen = now;
                    }
                    None => {
                        outcome.added.push(address.clone());
                        changed = true;
                        known.insert(
                            address.clone(),
                            Agent {
                                address,
                                pod_identity: member.pod_identity,
                                last_seen: now,
                                missed_polls: 0,
                            },
                        );
                    }
                }
            }

            if !changed {
                outcome.generation = self.snapshots.borrow().generation;
                return Ok(outcome);
            }

            MembershipSnapshot {
                generation: self.snapshots.borrow().generation + 1,
                agents: known.values().cloned().collect(),
                polled_at: now,
            }
        };

        outcome.generation = snapshot.generation;
        gauge!("gateway_agents").set(snapshot.len() as f64);
        self.snapshots.send_replace(Arc::new(snapshot));

        for address in &outcome.added {
            info!(address = %address, "Agent added");
            counter!("gateway_membership_events_total", "kind" => "added").increment(1);
            // No receivers is fine.
            let _ = self.events.send(MembershipEvent::Added(address.clone()));
        }
        for address in &outcome.removed {
            info!(address = %address, "Agent removed");
            counter!("gateway_membership_events_total", "kind" => "removed").increment(1);
            let _ = self.events.send(MembershipEvent::Removed(address.clone()));
        }

        Ok(outcome)
    }

    /// Poll every interval until `shutdown` flips. Poll errors never stop the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            source = %self.source.describe(),
            interval_ms = self.config.interval.as_millis() as u64,
            debounce = self.config.debounce,
            "Discovery loop started"
        );

        let mut ticker = interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Discovery loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    // Failures are already logged and counted.
                    let _ = self.poll_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn discoverer(source: Arc<dyn MembershipSource>) -> Discoverer {
        Discoverer::new(
            source,
            DiscovererConfig {
                interval: Duration::from_secs(1),
                debounce: 2,
            },
            BackoffPolicy::no_retry(),
            CircuitBreakerConfig::default().with_failure_threshold(100),
        )
    }

    /// Source that answers with the scripted results in order, then repeats the last.
    fn scripted(polls: Vec<Result<Vec<&'static str>, tonic::Code>>) -> Arc<dyn MembershipSource> {
        let mut polls: VecDeque<_> = polls.into();
        let mut last = Ok(Vec::new());
        let mut mock = MockMembershipSource::new();
        mock.expect_list_members().returning(move || {
            if let Some(next) = polls.pop_front() {
                last = next;
            }
            match &last {
                Ok(addresses) => Ok(addresses.iter().map(|a| Member::new(*a)).collect()),
                Err(code) => Err(tonic::Status::new(*code, "lookup failed")),
            }
        });
        mock.expect_describe().returning(|| "scripted".to_string());
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_first_poll_adds_everyone() {
        let d = discoverer(scripted(vec![Ok(vec!["b:1", "a:1"])]));
        let mut events = d.subscribe();

        let outcome = d.poll_once().await.unwrap();
        assert_eq!(outcome.added, ["a:1", "b:1"]);
        assert_eq!(outcome.generation, 1);
        assert_eq!(d.snapshot().addresses(), ["a:1", "b:1"]);
        assert_eq!(d.agent_count(), 2);
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::Added("a:1".into()));
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::Added("b:1".into()));
    }

    #[tokio::test]
    async fn test_single_miss_is_not_evicted() {
        let d = discoverer(scripted(vec![
            Ok(vec!["a:1", "b:1"]),
            Ok(vec!["a:1"]),
            Ok(vec!["a:1", "b:1"]),
        ]));
        let mut events = d.subscribe();

        d.poll_once().await.unwrap();
        let missed = d.poll_once().await.unwrap();
        assert!(missed.removed.is_empty());
        assert_eq!(d.snapshot().addresses(), ["a:1", "b:1"]);
        assert_eq!(d.snapshot().agents[1].missed_polls, 1);

        let back = d.poll_once().await.unwrap();
        assert!(back.added.is_empty());
        assert_eq!(d.snapshot().agents[1].missed_polls, 0);

        // Only the two initial additions were announced.
        assert!(matches!(events.recv().await, Ok(MembershipEvent::Added(_))));
        assert!(matches!(events.recv().await, Ok(MembershipEvent::Added(_))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_eviction_after_debounce_fires_once() {
        let d = discoverer(scripted(vec![
            Ok(vec!["a:1", "b:1"]),
            Ok(vec!["a:1"]),
            Ok(vec!["a:1"]),
            Ok(vec!["a:1"]),
        ]));
        d.poll_once().await.unwrap();
        let mut events = d.subscribe();

        assert!(d.poll_once().await.unwrap().removed.is_empty());
        assert_eq!(d.poll_once().await.unwrap().removed, ["b:1"]);
        assert!(d.poll_once().await.unwrap().removed.is_empty());

        assert_eq!(d.snapshot().addresses(), ["a:1"]);
        assert_eq!(events.recv().await.unwrap(), MembershipEvent::Removed("b:1".into()));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_snapshot() {
        let d = discoverer(scripted(vec![
            Ok(vec!["a:1"]),
            Err(tonic::Code::Unavailable),
            Err(tonic::Code::Unavailable),
            Err(tonic::Code::Unavailable),
        ]));
        d.poll_once().await.unwrap();
        let before = d.snapshot();

        for _ in 0..3 {
            let err = d.poll_once().await.unwrap_err();
            assert!(matches!(err, GatewayError::Discovery(_)));
        }
        assert!(Arc::ptr_eq(&before, &d.snapshot()));
        assert_eq!(d.snapshot().addresses(), ["a:1"]);
    }

    #[tokio::test]
    async fn test_unchanged_poll_does_not_publish() {
        let d = discoverer(scripted(vec![Ok(vec!["a:1"])]));
        d.poll_once().await.unwrap();
        let snapshots = d.snapshots();

        let outcome = d.poll_once().await.unwrap();
        assert_eq!(outcome.generation, 1);
        assert!(!snapshots.has_changed().unwrap());
    }

    #[test]
    fn test_debounce_floor() {
        let d = Discoverer::new(
            Arc::new(StaticMembership::new(vec![])),
            DiscovererConfig {
                interval: Duration::from_secs(1),
                debounce: 1,
            },
            BackoffPolicy::no_retry(),
            CircuitBreakerConfig::default(),
        );
        assert_eq!(d.config.debounce, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_polls_until_shutdown() {
        let d = Arc::new(discoverer(Arc::new(StaticMembership::new(vec![
            "a:1".into(),
        ]))));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut snapshots = d.snapshots();

        let handle = tokio::spawn(d.clone().run(shutdown_rx));
        snapshots.changed().await.unwrap();
        assert_eq!(snapshots.borrow().addresses(), ["a:1"]);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_static_membership() {
        let source = StaticMembership::new(vec!["a:1".into(), "b:1".into()]);
        let members = source.list_members().await.unwrap();
        assert_eq!(members, vec![Member::new("a:1"), Member::new("b:1")]);
        assert_eq!(source.describe(), "static(2 agents)");
    }

    fn resolver(answers: Vec<Result<Vec<&'static str>, LookupError>>) -> Arc<dyn HostResolver> {
        let mut answers: VecDeque<_> = answers.into();
        let mut last = Err(LookupError::NoRecords);
        let mut mock = MockHostResolver::new();
        mock.expect_lookup().returning(move |_| {
            if let Some(next) = answers.pop_front() {
                last = next;
            }
            last.clone().map(|ips| ips.iter().map(|ip| ip.parse().unwrap()).collect())
        });
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_dns_membership_pairs_ips_with_port() {
        let source = DnsMembership::with_resolver(
            "agents.default.svc:8081",
            resolver(vec![Ok(vec!["10.0.0.2", "10.0.0.1", "10.0.0.2"])]),
        );
        let members = source.list_members().await.unwrap();
        assert_eq!(
            members,
            vec![Member::new("10.0.0.1:8081"), Member::new("10.0.0.2:8081")]
        );
        assert_eq!(source.describe(), "dns(agents.default.svc:8081)");
    }

    #[tokio::test]
    async fn test_dns_membership_no_records_is_empty() {
        let source = DnsMembership::with_resolver(
            "agents.default.svc:8081",
            resolver(vec![Err(LookupError::NoRecords)]),
        );
        assert!(source.list_members().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dns_membership_resolver_failure_is_unavailable() {
        let source = DnsMembership::with_resolver(
            "agents.default.svc:8081",
            resolver(vec![Err(LookupError::Unavailable("timed out".into()))]),
        );
        let err = source.list_members().await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
        assert!(err.message().contains("timed out"));
    }

    #[tokio::test]
    async fn test_dns_membership_rejects_name_without_port() {
        let source = DnsMembership::with_resolver("missing-port", resolver(vec![]));
        let err = source.list_members().await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_dns_membership_ipv6_host() {
        let source = DnsMembership::with_resolver("[::1]:8081", resolver(vec![Ok(vec!["::1"])]));
        let members = source.list_members().await.unwrap();
        assert_eq!(members, vec![Member::new("[::1]:8081")]);
    }

    #[tokio::test]
    async fn test_vanished_dns_name_evicts_after_debounce() {
        let source = DnsMembership::with_resolver(
            "agents.default.svc:8081",
            resolver(vec![
                Ok(vec!["10.0.0.1", "10.0.0.2"]),
                Err(LookupError::NoRecords),
                Err(LookupError::NoRecords),
            ]),
        );
        let d = discoverer(Arc::new(source));
        d.poll_once().await.unwrap();
        assert_eq!(d.agent_count(), 2);

        let first = d.poll_once().await.unwrap();
        assert!(first.removed.is_empty());
        assert_eq!(d.agent_count(), 2);

        let second = d.poll_once().await.unwrap();
        assert_eq!(second.removed, ["10.0.0.1:8081", "10.0.0.2:8081"]);
        assert!(d.snapshot().is_empty());
    }
}
