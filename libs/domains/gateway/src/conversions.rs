//! Conversions between domain models and agent/filter wire messages.

use rpc::agent::v1 as pb;
use rpc::filter::v1 as filter_pb;

use crate::models::{
    Location, ObjectBlob, RankedItem, SearchConfig, TimestampCondition, TimestampOperator,
    VectorObject, WriteOptions,
};

impl From<pb::Vector> for VectorObject {
    fn from(v: pb::Vector) -> Self {
        Self {
            id: v.id,
            vector: v.vector,
            timestamp: v.timestamp,
        }
    }
}

impl From<&VectorObject> for pb::Vector {
    fn from(v: &VectorObject) -> Self {
        Self {
            id: v.id.clone(),
            vector: v.vector.clone(),
            timestamp: v.timestamp,
        }
    }
}

impl From<pb::Location> for Location {
    fn from(l: pb::Location) -> Self {
        Self {
            name: l.name,
            uuid: l.uuid,
            ips: l.ips,
        }
    }
}

impl From<Location> for pb::Location {
    fn from(l: Location) -> Self {
        Self {
            name: l.name,
            uuid: l.uuid,
            ips: l.ips,
        }
    }
}

impl From<TimestampOperator> for pb::timestamp_condition::Operator {
    fn from(op: TimestampOperator) -> Self {
        use pb::timestamp_condition::Operator;
        match op {
            TimestampOperator::Eq => Operator::Eq,
            TimestampOperator::Ne => Operator::Ne,
            TimestampOperator::Ge => Operator::Ge,
            TimestampOperator::Gt => Operator::Gt,
            TimestampOperator::Le => Operator::Le,
            TimestampOperator::Lt => Operator::Lt,
        }
    }
}

impl From<pb::timestamp_condition::Operator> for TimestampOperator {
    fn from(op: pb::timestamp_condition::Operator) -> Self {
        use pb::timestamp_condition::Operator;
        match op {
            Operator::Eq => TimestampOperator::Eq,
            Operator::Ne => TimestampOperator::Ne,
            Operator::Ge => TimestampOperator::Ge,
            Operator::Gt => TimestampOperator::Gt,
            Operator::Le => TimestampOperator::Le,
            Operator::Lt => TimestampOperator::Lt,
        }
    }
}

impl From<&TimestampCondition> for pb::TimestampCondition {
    fn from(c: &TimestampCondition) -> Self {
        Self {
            timestamp: c.timestamp,
            operator: pb::timestamp_condition::Operator::from(c.operator) as i32,
        }
    }
}

impl From<pb::TimestampCondition> for TimestampCondition {
    fn from(c: pb::TimestampCondition) -> Self {
        Self {
            timestamp: c.timestamp,
            operator: c.operator().into(),
        }
    }
}

impl From<pb::Distance> for RankedItem {
    fn from(d: pb::Distance) -> Self {
        Self {
            id: d.id,
            distance: d.distance,
        }
    }
}

impl From<&RankedItem> for pb::Distance {
    fn from(r: &RankedItem) -> Self {
        Self {
            id: r.id.clone(),
            distance: r.distance,
        }
    }
}

/// Search parameters sent to agents.
///
/// Agents always get the gateway-wide `num`; `min_num` is enforced after the
/// merge, so agents receive zero. The timeout is the time left on the branch
/// deadline, in nanoseconds.
pub(crate) fn search_config_to_proto(
    config: &SearchConfig,
    request_id: &str,
    remaining: Option<std::time::Duration>,
) -> pb::SearchConfig {
    pb::SearchConfig {
        request_id: request_id.to_string(),
        num: config.num,
        radius: config.radius,
        epsilon: config.epsilon,
        timeout: remaining
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default(),
        min_num: 0,
    }
}

pub(crate) fn insert_request(object: &VectorObject, opts: WriteOptions) -> pb::InsertRequest {
    pb::InsertRequest {
        vector: Some(object.into()),
        skip_strict_exist_check: opts.skip_strict_exist_check,
        timestamp: opts.timestamp,
    }
}

pub(crate) fn update_request(object: &VectorObject, opts: WriteOptions) -> pb::UpdateRequest {
    pb::UpdateRequest {
        vector: Some(object.into()),
        skip_strict_exist_check: opts.skip_strict_exist_check,
        timestamp: opts.timestamp,
    }
}

pub(crate) fn remove_request(id: &str, opts: WriteOptions) -> pb::RemoveRequest {
    pb::RemoveRequest {
        id: Some(pb::ObjectId { id: id.to_string() }),
        skip_strict_exist_check: opts.skip_strict_exist_check,
        timestamp: opts.timestamp,
    }
}

pub(crate) fn remove_by_timestamp_request(
    conditions: &[TimestampCondition],
) -> pb::RemoveByTimestampRequest {
    pb::RemoveByTimestampRequest {
        timestamps: conditions.iter().map(pb::TimestampCondition::from).collect(),
    }
}

pub(crate) fn ranked_from_response(response: pb::SearchResponse) -> Vec<RankedItem> {
    response.results.into_iter().map(RankedItem::from).collect()
}

pub(crate) fn distance_list(items: &[RankedItem]) -> filter_pb::DistanceList {
    filter_pb::DistanceList {
        distances: items.iter().map(pb::Distance::from).collect(),
    }
}

pub(crate) fn ranked_from_list(list: filter_pb::DistanceList) -> Vec<RankedItem> {
    list.distances.into_iter().map(RankedItem::from).collect()
}

impl From<&ObjectBlob> for filter_pb::Object {
    fn from(blob: &ObjectBlob) -> Self {
        Self {
            id: blob.id.clone(),
            object: blob.object.clone(),
        }
    }
}
