use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// A stored vector with its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorObject {
    pub id: String,
    pub vector: Vec<f32>,
    /// Write timestamp in nanoseconds. Zero means "let the gateway decide".
    #[serde(default)]
    pub timestamp: i64,
}

impl VectorObject {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            timestamp: 0,
        }
    }
}

/// Where a write landed on one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub uuid: String,
    #[serde(default)]
    pub ips: Vec<String>,
}

/// Locations of every agent that accepted a write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locations {
    pub locations: Vec<Location>,
}

/// One search hit.
///
/// Ordered by `distance` ascending, then `id` ascending. Distances compare
/// with `f32::total_cmp`, so the order is total even for NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: String,
    pub distance: f32,
}

impl RankedItem {
    pub fn new(id: impl Into<String>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
        }
    }
}

impl PartialEq for RankedItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedItem {}

impl PartialOrd for RankedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn default_num() -> u32 {
    10
}

/// Per-request search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Correlation id echoed in the response. Generated when empty.
    #[serde(default)]
    pub request_id: String,
    /// Global top-K.
    #[serde(default = "default_num")]
    pub num: u32,
    /// Fewer merged results than this fails the search.
    #[serde(default)]
    pub min_num: u32,
    #[serde(default = "default_radius")]
    pub radius: f32,
    #[serde(default = "default_epsilon")]
    pub epsilon: f32,
    /// Operation deadline; the configured search timeout applies when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra ingress filters, run after the configured ones.
    #[serde(default)]
    pub ingress_filters: Vec<String>,
    /// Extra egress filters, run after the configured ones.
    #[serde(default)]
    pub egress_filters: Vec<String>,
}

fn default_radius() -> f32 {
    -1.0
}

fn default_epsilon() -> f32 {
    0.1
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            num: default_num(),
            min_num: 0,
            radius: default_radius(),
            epsilon: default_epsilon(),
            timeout_ms: None,
            ingress_filters: Vec::new(),
            egress_filters: Vec::new(),
        }
    }
}

impl SearchConfig {
    pub fn with_num(mut self, num: u32) -> Self {
        self.num = num;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub config: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchByIdRequest {
    pub id: String,
    #[serde(default)]
    pub config: SearchConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub request_id: String,
    pub results: Vec<RankedItem>,
}

/// A merged search result plus the agents that did not contribute to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    #[serde(flatten)]
    pub response: SearchResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<AgentFailure>,
}

impl SearchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Per-request write parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Skip the existence check that guards insert (must not exist) and
    /// update/remove (must exist).
    #[serde(default)]
    pub skip_strict_exist_check: bool,
    /// Nanoseconds; defaults to the time the gateway received the request.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Extra ingress filters, run after the configured ones.
    #[serde(default)]
    pub filters: Vec<String>,
}

/// Insert, update and upsert share one request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRequest {
    pub vector: VectorObject,
    #[serde(default)]
    pub config: WriteConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub id: String,
    #[serde(default)]
    pub config: WriteConfig,
}

/// Comparison between an object's write timestamp and a condition's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampOperator {
    #[default]
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampCondition {
    /// Nanoseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub operator: TimestampOperator,
}

/// Removes every object whose timestamp satisfies all conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveByTimestampRequest {
    pub timestamps: Vec<TimestampCondition>,
}

/// Options forwarded to agents with every write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub skip_strict_exist_check: bool,
    pub timestamp: i64,
}

/// Raw object handed to a vectorizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectBlob {
    pub id: String,
    pub object: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertObjectRequest {
    pub object: ObjectBlob,
    #[serde(default)]
    pub config: WriteConfig,
    /// Overrides the configured vectorizer.
    #[serde(default)]
    pub vectorizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchObjectRequest {
    pub object: Vec<u8>,
    #[serde(default)]
    pub config: SearchConfig,
    #[serde(default)]
    pub vectorizer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

/// Why one agent did not contribute to a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentFailure {
    pub address: String,
    #[serde(serialize_with = "serialize_code")]
    pub code: tonic::Code,
    pub message: String,
    pub retryable: bool,
}

impl AgentFailure {
    pub fn new(address: impl Into<String>, code: tonic::Code, message: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            code,
            message: message.into(),
            retryable: grpc_client::is_retryable(code),
        }
    }

    pub fn from_call(address: impl Into<String>, err: &grpc_client::CallError) -> Self {
        Self {
            address: address.into(),
            code: err.code(),
            message: err.message(),
            retryable: err.is_retryable(),
        }
    }
}

impl std::fmt::Display for AgentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:?}: {})", self.address, self.code, self.message)
    }
}

pub(crate) fn serialize_code<S: Serializer>(code: &tonic::Code, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("{code:?}"))
}

/// One item of a batch that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub index: usize,
    #[serde(serialize_with = "serialize_code")]
    pub code: tonic::Code,
    pub message: String,
}

/// Per-item status carried on response streams instead of ending the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    #[serde(serialize_with = "serialize_code")]
    pub code: tonic::Code,
    pub message: String,
}

/// One message on a response stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamResponse<T> {
    Response(T),
    Error(StreamStatus),
}

impl<T> StreamResponse<T> {
    pub fn is_error(&self) -> bool {
        matches!(self, StreamResponse::Error(_))
    }

    pub fn response(self) -> Option<T> {
        match self {
            StreamResponse::Response(value) => Some(value),
            StreamResponse::Error(_) => None,
        }
    }
}

/// Live agent as tracked by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Agent {
    pub address: String,
    pub pod_identity: String,
    pub last_seen: DateTime<Utc>,
    /// Consecutive polls this agent was missing from.
    pub missed_polls: u32,
}

/// Agent plus its circuit state, for the admin endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentStatus {
    #[serde(flatten)]
    pub agent: Agent,
    pub circuit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranked_item_orders_by_distance_then_id() {
        let mut items = vec![
            RankedItem::new("b", 0.2),
            RankedItem::new("a", 0.2),
            RankedItem::new("c", 0.1),
        ];
        items.sort();
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
    }

    #[test]
    fn test_ranked_item_nan_sorts_last() {
        let mut items = vec![RankedItem::new("nan", f32::NAN), RankedItem::new("x", 1.0)];
        items.sort();
        assert_eq!(items[0].id, "x");
    }

    #[test]
    fn test_search_config_defaults_from_json() {
        let config: SearchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SearchConfig::default());
        assert_eq!(config.num, 10);
        assert_eq!(config.timeout_ms, None);
    }

    #[test]
    fn test_stream_response_json_shape() {
        let ok: StreamResponse<ObjectId> = StreamResponse::Response(ObjectId { id: "1".into() });
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"response": {"id": "1"}})
        );

        let err: StreamResponse<ObjectId> = StreamResponse::Error(StreamStatus {
            code: tonic::Code::NotFound,
            message: "missing".into(),
        });
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"error": {"code": "NotFound", "message": "missing"}})
        );
    }

    #[test]
    fn test_timestamp_condition_operator_defaults_to_eq() {
        let request: RemoveByTimestampRequest = serde_json::from_value(serde_json::json!({
            "timestamps": [{"timestamp": 5}, {"timestamp": 9, "operator": "lt"}]
        }))
        .unwrap();
        assert_eq!(request.timestamps[0].operator, TimestampOperator::Eq);
        assert_eq!(request.timestamps[1].operator, TimestampOperator::Lt);
    }

    #[test]
    fn test_search_outcome_hides_empty_warnings() {
        let outcome = SearchOutcome {
            response: SearchResponse {
                request_id: "r".into(),
                results: vec![RankedItem::new("1", 0.5)],
            },
            warnings: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["request_id"], "r");
        assert!(json.get("warnings").is_none());
    }
}
