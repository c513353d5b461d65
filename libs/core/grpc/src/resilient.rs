//! Retry-with-backoff plus circuit breaking around calls to one destination.
//!
//! ```rust,ignore
//! use grpc_client::{BackoffPolicy, CallContext, CircuitBreakerConfig, ResilientClient};
//!
//! let client = ResilientClient::new(
//!     "agent-0:8081",
//!     BackoffPolicy::default(),
//!     CircuitBreakerConfig::default(),
//! );
//! let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
//! let reply = client
//!     .call(&ctx, || {
//!         let mut rpc = rpc.clone();
//!         async move { rpc.search(req.clone()).await }
//!     })
//!     .await?;
//! ```
//!
//! Cancellation is future-drop: dropping the call future aborts the in-flight
//! attempt or backoff sleep immediately.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

use crate::backoff::BackoffPolicy;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::{CallError, is_retryable};

/// Per-call deadline and correlation id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
  pub deadline: Option<Instant>,
  pub request_id: Option<String>,
}

impl CallContext {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
    self.request_id = Some(request_id.into());
    self
  }

  /// Child context whose deadline is the earlier of this one and `now + timeout`.
  pub fn narrowed(&self, timeout: Duration) -> Self {
    let candidate = Instant::now() + timeout;
    let deadline = match self.deadline {
      Some(current) => current.min(candidate),
      None => candidate,
    };
    Self {
      deadline: Some(deadline),
      request_id: self.request_id.clone(),
    }
  }

  pub fn remaining(&self) -> Option<Duration> {
    self
      .deadline
      .map(|deadline| deadline.saturating_duration_since(Instant::now()))
  }

  pub fn is_expired(&self) -> bool {
    self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
  }
}

/// Wraps every call to one destination with retry and a circuit breaker.
///
/// Owns its breaker; nothing is shared between destinations.
#[derive(Debug)]
pub struct ResilientClient {
  target: String,
  policy: BackoffPolicy,
  breaker: CircuitBreaker,
}

impl ResilientClient {
  pub fn new(
    target: impl Into<String>,
    policy: BackoffPolicy,
    breaker: CircuitBreakerConfig,
  ) -> Self {
    let target = target.into();
    Self {
      breaker: CircuitBreaker::new(target.clone(), breaker),
      target,
      policy,
    }
  }

  pub fn target(&self) -> &str {
    &self.target
  }

  pub fn policy(&self) -> &BackoffPolicy {
    &self.policy
  }

  pub fn circuit_state(&self) -> CircuitState {
    self.breaker.state()
  }

  /// Run `op` until it succeeds, fails permanently or the retry budget runs out.
  ///
  /// - Retryable status codes are retried with backoff and count against the breaker.
  /// - Any other status is returned at once; the destination answered, so the
  ///   breaker treats it as reachable. Like a success, it clears the failure
  ///   window of a Closed breaker.
  /// - No attempt starts after `ctx.deadline`, each attempt is bounded by it and
  ///   no backoff sleep crosses it.
  pub async fn call<T, F, Fut>(&self, ctx: &CallContext, mut op: F) -> Result<T, CallError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, tonic::Status>>,
  {
    let started = Instant::now();
    let mut attempts = 0u32;

    loop {
      if ctx.is_expired() {
        return Err(CallError::DeadlineExceeded {
          target: self.target.clone(),
          attempts,
        });
      }

      let ticket = match self.breaker.acquire() {
        Ok(ticket) => ticket,
        Err(rejected) => {
          self.record_attempt("rejected");
          return Err(CallError::CircuitOpen {
            target: self.target.clone(),
            retry_after: rejected.retry_after,
          });
        }
      };
      attempts += 1;

      let result = match ctx.deadline {
        Some(deadline) => match timeout_at(deadline, op()).await {
          Ok(result) => result,
          Err(_) => {
            ticket.failure();
            self.record_attempt("deadline");
            return Err(CallError::DeadlineExceeded {
              target: self.target.clone(),
              attempts,
            });
          }
        },
        None => op().await,
      };

      let status = match result {
        Ok(value) => {
          ticket.success();
          self.record_attempt("success");
          return Ok(value);
        }
        Err(status) => status,
      };

      if !is_retryable(status.code()) {
        ticket.success();
        self.record_attempt("permanent");
        return Err(self.status_error(status, attempts));
      }

      ticket.failure();
      self.record_attempt("transient");

      if attempts >= self.policy.max_attempts {
        return Err(self.status_error(status, attempts));
      }

      let delay = self.policy.delay(attempts - 1);
      if started.elapsed() + delay > self.policy.max_elapsed {
        return Err(self.status_error(status, attempts));
      }
      if ctx.deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
        return Err(self.status_error(status, attempts));
      }

      debug!(
        destination = %self.target,
        attempt = attempts,
        code = ?status.code(),
        delay_ms = delay.as_millis() as u64,
        request_id = ctx.request_id.as_deref().unwrap_or(""),
        "Retrying after transient failure"
      );
      sleep(delay).await;
    }
  }

  fn status_error(&self, status: tonic::Status, attempts: u32) -> CallError {
    CallError::Status {
      target: self.target.clone(),
      status,
      attempts,
    }
  }

  fn record_attempt(&self, outcome: &'static str) {
    counter!(
      "gateway_client_attempts_total",
      "target" => self.target.clone(),
      "state" => self.breaker.state().as_str(),
      "outcome" => outcome
    )
    .increment(1);
  }
}
