use std::time::Duration;
use thiserror::Error;
use tonic::Code;

pub type GrpcResult<T> = Result<T, GrpcError>;

/// Errors that can occur while building channels and resilience policies
#[derive(Error, Debug)]
pub enum GrpcError {
  /// Invalid URI provided for connection
  #[error("Invalid URI '{uri}': {source}")]
  InvalidUri {
    uri: String,
    #[source]
    source: tonic::transport::Error,
  },

  /// Invalid configuration
  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),
}

impl From<GrpcError> for tonic::Status {
  fn from(err: GrpcError) -> Self {
    match err {
      GrpcError::InvalidUri { .. } | GrpcError::InvalidConfig(_) => {
        tonic::Status::invalid_argument(err.to_string())
      }
    }
  }
}

/// Outcome of a failed [`ResilientClient::call`](crate::ResilientClient::call).
#[derive(Error, Debug)]
pub enum CallError {
  /// The destination's circuit is open; no network attempt was made.
  #[error("circuit open for {target}")]
  CircuitOpen {
    target: String,
    retry_after: Option<Duration>,
  },

  /// The destination answered with an error status (after retries if retryable).
  #[error("{target} returned {:?}: {} (attempts: {attempts})", .status.code(), .status.message())]
  Status {
    target: String,
    status: tonic::Status,
    attempts: u32,
  },

  /// The call deadline elapsed.
  #[error("{target}: deadline exceeded (attempts: {attempts})")]
  DeadlineExceeded { target: String, attempts: u32 },
}

impl CallError {
  pub fn target(&self) -> &str {
    match self {
      CallError::CircuitOpen { target, .. }
      | CallError::Status { target, .. }
      | CallError::DeadlineExceeded { target, .. } => target,
    }
  }

  pub fn code(&self) -> Code {
    match self {
      CallError::CircuitOpen { .. } => Code::Unavailable,
      CallError::Status { status, .. } => status.code(),
      CallError::DeadlineExceeded { .. } => Code::DeadlineExceeded,
    }
  }

  /// Whether the failure was transient from the caller's point of view.
  pub fn is_retryable(&self) -> bool {
    match self {
      CallError::CircuitOpen { .. } | CallError::DeadlineExceeded { .. } => true,
      CallError::Status { status, .. } => is_retryable(status.code()),
    }
  }

  pub fn is_circuit_open(&self) -> bool {
    matches!(self, CallError::CircuitOpen { .. })
  }

  /// Message reported by the destination, or a description of the local failure.
  pub fn message(&self) -> String {
    match self {
      CallError::Status { status, .. } => status.message().to_string(),
      other => other.to_string(),
    }
  }
}

impl From<CallError> for tonic::Status {
  fn from(err: CallError) -> Self {
    match err {
      CallError::Status { status, .. } => status,
      CallError::CircuitOpen { .. } => tonic::Status::unavailable(err.to_string()),
      CallError::DeadlineExceeded { .. } => tonic::Status::deadline_exceeded(err.to_string()),
    }
  }
}

/// Status codes worth retrying against the same destination.
pub fn is_retryable(code: Code) -> bool {
  matches!(
    code,
    Code::Unavailable
      | Code::DeadlineExceeded
      | Code::ResourceExhausted
      | Code::Aborted
      | Code::Internal
  )
}
