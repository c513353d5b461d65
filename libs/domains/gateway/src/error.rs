use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use grpc_client::CallError;
use serde_json::json;
use thiserror::Error;
use tonic::Code;

use crate::models::{AgentFailure, ItemFailure};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("No agents available")]
    NoAgents,

    #[error("Filter stage {stage} ({address}) failed: {source}")]
    Filter {
        stage: usize,
        address: String,
        #[source]
        source: CallError,
    },

    #[error("{operation}: quorum not met, {succeeded} of {required} required agents succeeded; failed: {}", join(.failures))]
    QuorumNotMet {
        operation: &'static str,
        required: usize,
        succeeded: usize,
        failures: Vec<AgentFailure>,
    },

    #[error("{operation}: all agents failed: {}", join(.failures))]
    AllAgentsFailed {
        operation: &'static str,
        failures: Vec<AgentFailure>,
    },

    #[error("{operation}: {} of the batch items failed", .failures.len())]
    BatchFailed {
        operation: &'static str,
        failures: Vec<ItemFailure>,
    },

    #[error("Insufficient results: found {found}, required {required}")]
    InsufficientResults { required: usize, found: usize },

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("Membership poll failed: {0}")]
    Discovery(#[source] CallError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

fn join(failures: &[AgentFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The shared code when every failure agrees, otherwise `fallback`.
fn common_code<I: IntoIterator<Item = Code>>(codes: I, fallback: Code) -> Code {
    let mut codes = codes.into_iter();
    match codes.next() {
        Some(first) if codes.all(|c| c == first) => first,
        _ => fallback,
    }
}

impl GatewayError {
    pub fn code(&self) -> Code {
        match self {
            GatewayError::InvalidArgument(_) => Code::InvalidArgument,
            GatewayError::NotFound(_) => Code::NotFound,
            GatewayError::AlreadyExists(_) => Code::AlreadyExists,
            GatewayError::NoAgents => Code::Unavailable,
            GatewayError::Filter { source, .. } => match source.code() {
                Code::InvalidArgument => Code::InvalidArgument,
                Code::Unavailable | Code::DeadlineExceeded => Code::Unavailable,
                _ => Code::Internal,
            },
            GatewayError::QuorumNotMet { failures, .. }
            | GatewayError::AllAgentsFailed { failures, .. } => {
                common_code(failures.iter().map(|f| f.code), Code::Unavailable)
            }
            GatewayError::BatchFailed { failures, .. } => {
                common_code(failures.iter().map(|f| f.code), Code::Internal)
            }
            GatewayError::InsufficientResults { .. } => Code::NotFound,
            GatewayError::DeadlineExceeded(_) => Code::DeadlineExceeded,
            GatewayError::Discovery(_) => Code::Unavailable,
            GatewayError::Internal(_) => Code::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }

    fn details(&self) -> serde_json::Value {
        match self {
            GatewayError::QuorumNotMet {
                required,
                succeeded,
                failures,
                ..
            } => json!({
                "required": required,
                "succeeded": succeeded,
                "failures": failures,
            }),
            GatewayError::AllAgentsFailed { failures, .. } => json!({ "failures": failures }),
            GatewayError::BatchFailed { failures, .. } => json!({ "failures": failures }),
            GatewayError::Filter { stage, address, .. } => {
                json!({ "stage": stage, "address": address })
            }
            _ => serde_json::Value::Null,
        }
    }
}

impl From<GatewayError> for tonic::Status {
    fn from(err: GatewayError) -> Self {
        tonic::Status::new(err.code(), err.to_string())
    }
}

pub(crate) fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::InvalidArgument | Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.code();
        let body = json!({
            "error": format!("{code:?}"),
            "message": self.to_string(),
            "details": self.details(),
        });
        (http_status(code), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(address: &str, code: Code) -> AgentFailure {
        AgentFailure::new(address, code, "boom")
    }

    #[test]
    fn test_quorum_error_names_every_failed_agent() {
        let err = GatewayError::QuorumNotMet {
            operation: "insert",
            required: 3,
            succeeded: 1,
            failures: vec![
                failure("10.0.0.2:8081", Code::Unavailable),
                failure("10.0.0.3:8081", Code::Internal),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("10.0.0.2:8081"));
        assert!(message.contains("10.0.0.3:8081"));
        assert_eq!(err.code(), Code::Unavailable);
    }

    #[test]
    fn test_uniform_failures_keep_their_code() {
        let err = GatewayError::AllAgentsFailed {
            operation: "insert",
            failures: vec![
                failure("a", Code::AlreadyExists),
                failure("b", Code::AlreadyExists),
            ],
        };
        assert_eq!(err.code(), Code::AlreadyExists);
        let status: tonic::Status = err.into();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(
            GatewayError::InvalidArgument("x".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::NoAgents.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::DeadlineExceeded("search".into())
                .into_response()
                .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
