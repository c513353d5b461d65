use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use core_config::{
    ConfigError, FromEnv, ServerConfig, env_duration_ms, env_list, env_optional, env_parse,
};
use grpc_client::{BackoffPolicy, ChannelConfig, CircuitBreakerConfig};

use crate::discovery::{DnsMembership, MembershipSource, StaticMembership};

/// How many agents must accept a write for it to succeed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteQuorum {
    #[default]
    All,
    Majority,
    AtLeast(usize),
}

impl WriteQuorum {
    /// Successes required out of `total` agents.
    ///
    /// `AtLeast(n)` is not clamped: asking for more agents than exist fails.
    pub fn required(&self, total: usize) -> usize {
        match self {
            WriteQuorum::All => total,
            WriteQuorum::Majority => total / 2 + 1,
            WriteQuorum::AtLeast(n) => *n,
        }
    }
}

impl FromStr for WriteQuorum {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(WriteQuorum::All),
            "majority" => Ok(WriteQuorum::Majority),
            other => match other.parse::<usize>() {
                Ok(0) => Err("quorum must be at least 1".to_string()),
                Ok(n) => Ok(WriteQuorum::AtLeast(n)),
                Err(_) => Err(format!("expected all, majority or a number, got '{other}'")),
            },
        }
    }
}

/// Where agent membership comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipConfig {
    Static(Vec<String>),
    /// Headless-service `host:port`; every resolved address is one agent.
    Dns(String),
}

/// Filter services used by each operation, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterTargets {
    pub insert: Vec<String>,
    pub update: Vec<String>,
    pub search: Vec<String>,
    pub distance: Vec<String>,
    pub vectorizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub grpc: ServerConfig,
    pub membership: MembershipConfig,
    pub discovery_interval: Duration,
    pub discovery_debounce: u32,
    pub backoff: BackoffPolicy,
    pub breaker: CircuitBreakerConfig,
    pub channel: ChannelConfig,
    pub fanout_concurrency: usize,
    pub stream_concurrency: usize,
    pub search_timeout: Duration,
    pub write_timeout: Duration,
    pub agent_timeout: Duration,
    pub write_quorum: WriteQuorum,
    pub filters: FilterTargets,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            grpc: ServerConfig::new(std::net::Ipv4Addr::UNSPECIFIED.to_string(), 8081),
            membership: MembershipConfig::Static(Vec::new()),
            discovery_interval: Duration::from_secs(2),
            discovery_debounce: 2,
            backoff: BackoffPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            channel: ChannelConfig::default(),
            fanout_concurrency: 32,
            stream_concurrency: 16,
            search_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            agent_timeout: Duration::from_secs(1),
            write_quorum: WriteQuorum::All,
            filters: FilterTargets::default(),
        }
    }
}

impl GatewayConfig {
    pub fn membership_source(&self) -> Arc<dyn MembershipSource> {
        match &self.membership {
            MembershipConfig::Static(addresses) => {
                Arc::new(StaticMembership::new(addresses.clone()))
            }
            MembershipConfig::Dns(name) => Arc::new(DnsMembership::new(name.clone())),
        }
    }
}

fn backoff_from_env(defaults: &BackoffPolicy) -> Result<BackoffPolicy, ConfigError> {
    let policy = BackoffPolicy {
        initial: env_duration_ms("GATEWAY_BACKOFF_INITIAL_MS", defaults.initial)?,
        max_delay: env_duration_ms("GATEWAY_BACKOFF_MAX_MS", defaults.max_delay)?,
        multiplier: env_parse("GATEWAY_BACKOFF_MULTIPLIER", defaults.multiplier)?,
        jitter: env_parse("GATEWAY_BACKOFF_JITTER", defaults.jitter)?,
        max_attempts: env_parse("GATEWAY_BACKOFF_MAX_ATTEMPTS", defaults.max_attempts)?,
        max_elapsed: env_duration_ms("GATEWAY_BACKOFF_MAX_ELAPSED_MS", defaults.max_elapsed)?,
    };
    policy.validate().map_err(|e| ConfigError::Invalid {
        key: "GATEWAY_BACKOFF_*".to_string(),
        details: e.to_string(),
    })?;
    Ok(policy)
}

fn breaker_from_env(
    defaults: &CircuitBreakerConfig,
) -> Result<CircuitBreakerConfig, ConfigError> {
    Ok(CircuitBreakerConfig {
        failure_threshold: env_parse("GATEWAY_BREAKER_FAILURES", defaults.failure_threshold)?,
        window: env_duration_ms("GATEWAY_BREAKER_WINDOW_MS", defaults.window)?,
        open_timeout: env_duration_ms("GATEWAY_BREAKER_OPEN_MS", defaults.open_timeout)?,
        max_open_timeout: env_duration_ms(
            "GATEWAY_BREAKER_MAX_OPEN_MS",
            defaults.max_open_timeout,
        )?,
    })
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key: key.to_string(),
            details: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}

impl FromEnv for GatewayConfig {
    /// Every knob has a default except membership: one of `GATEWAY_AGENT_DNS`
    /// or `GATEWAY_AGENTS` should be set, otherwise the gateway starts with
    /// no agents and `/ready` stays 503.
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let membership = match env_optional("GATEWAY_AGENT_DNS") {
            Some(name) => MembershipConfig::Dns(name),
            None => MembershipConfig::Static(env_list("GATEWAY_AGENTS")),
        };

        let write_quorum = match env_optional("GATEWAY_WRITE_QUORUM") {
            Some(raw) => raw.parse().map_err(|details| ConfigError::ParseError {
                key: "GATEWAY_WRITE_QUORUM".to_string(),
                details,
            })?,
            None => defaults.write_quorum,
        };

        Ok(Self {
            server: ServerConfig::from_env()?,
            grpc: ServerConfig::grpc_from_env()?,
            membership,
            discovery_interval: env_duration_ms(
                "GATEWAY_DISCOVERY_INTERVAL_MS",
                defaults.discovery_interval,
            )?,
            discovery_debounce: env_parse("GATEWAY_DISCOVERY_DEBOUNCE", defaults.discovery_debounce)?
                .max(2),
            backoff: backoff_from_env(&defaults.backoff)?,
            breaker: breaker_from_env(&defaults.breaker)?,
            channel: ChannelConfig::from_env()?,
            fanout_concurrency: positive(
                "GATEWAY_FANOUT_CONCURRENCY",
                env_parse("GATEWAY_FANOUT_CONCURRENCY", defaults.fanout_concurrency)?,
            )?,
            stream_concurrency: positive(
                "GATEWAY_STREAM_CONCURRENCY",
                env_parse("GATEWAY_STREAM_CONCURRENCY", defaults.stream_concurrency)?,
            )?,
            search_timeout: env_duration_ms("GATEWAY_SEARCH_TIMEOUT_MS", defaults.search_timeout)?,
            write_timeout: env_duration_ms("GATEWAY_WRITE_TIMEOUT_MS", defaults.write_timeout)?,
            agent_timeout: env_duration_ms("GATEWAY_AGENT_TIMEOUT_MS", defaults.agent_timeout)?,
            write_quorum,
            filters: FilterTargets {
                insert: env_list("GATEWAY_INSERT_FILTERS"),
                update: env_list("GATEWAY_UPDATE_FILTERS"),
                search: env_list("GATEWAY_SEARCH_FILTERS"),
                distance: env_list("GATEWAY_DISTANCE_FILTERS"),
                vectorizer: env_optional("GATEWAY_VECTORIZER"),
            },
        })
    }
}
