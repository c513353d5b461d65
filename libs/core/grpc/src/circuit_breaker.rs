//! Per-destination circuit breaker.
//!
//! ```text
//! ┌─────────┐  failures in window >= threshold  ┌────────┐
//! │ CLOSED  │ ────────────────────────────────> │  OPEN  │ <─┐
//! └─────────┘                                   └────────┘   │
//!      ^                                            │        │ trial failed
//!      │                          open period over  │        │ (period doubles)
//!      │        trial succeeded  ┌─────────────┐    │        │
//!      └──────────────────────── │ HALF-OPEN   │ <──┘        │
//!                                │ (one trial) │ ────────────┘
//!                                └─────────────┘
//! ```
//!
//! All state lives behind one mutex so the HalfOpen trial slot is handed out
//! to exactly one caller. The lock is never held across an await point.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
  /// Requests flow normally.
  Closed,
  /// Requests fail fast without touching the network.
  Open,
  /// One trial request decides whether to close or reopen.
  HalfOpen,
}

impl CircuitState {
  pub fn as_str(&self) -> &'static str {
    match self {
      CircuitState::Closed => "closed",
      CircuitState::Open => "open",
      CircuitState::HalfOpen => "half_open",
    }
  }
}

impl std::fmt::Display for CircuitState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
  /// Failures inside `window` that open the circuit.
  pub failure_threshold: u32,
  /// Rolling window for counting failures.
  pub window: Duration,
  /// First open period.
  pub open_timeout: Duration,
  /// Upper bound for the open period after repeated failed trials.
  pub max_open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 5,
      window: Duration::from_secs(10),
      open_timeout: Duration::from_secs(1),
      max_open_timeout: Duration::from_secs(30),
    }
  }
}

impl CircuitBreakerConfig {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
    self.failure_threshold = threshold.max(1);
    self
  }

  pub fn with_window(mut self, window: Duration) -> Self {
    self.window = window;
    self
  }

  pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
    self.open_timeout = timeout;
    self
  }

  pub fn with_max_open_timeout(mut self, timeout: Duration) -> Self {
    self.max_open_timeout = timeout;
    self
  }

  fn open_period(&self, reopen_count: u32) -> Duration {
    let factor = 2u32.saturating_pow(reopen_count.min(16));
    self
      .open_timeout
      .saturating_mul(factor)
      .min(self.max_open_timeout.max(self.open_timeout))
  }
}

#[derive(Debug)]
struct BreakerInner {
  state: CircuitState,
  failures: VecDeque<Instant>,
  open_until: Instant,
  reopen_count: u32,
  trial_in_flight: bool,
}

/// Rejection returned by [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
  /// Time until the circuit may admit a trial; `None` while a trial is running.
  pub retry_after: Option<Duration>,
}

/// Thread-safe circuit breaker for one destination.
#[derive(Debug)]
pub struct CircuitBreaker {
  name: String,
  config: CircuitBreakerConfig,
  inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
  pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
    Self {
      name: name.into(),
      config,
      inner: Mutex::new(BreakerInner {
        state: CircuitState::Closed,
        failures: VecDeque::new(),
        open_until: Instant::now(),
        reopen_count: 0,
        trial_in_flight: false,
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn state(&self) -> CircuitState {
    self.lock().state
  }

  fn lock(&self) -> MutexGuard<'_, BreakerInner> {
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Ask for permission to run one attempt.
  ///
  /// The returned ticket must be resolved with [`Ticket::success`] or
  /// [`Ticket::failure`]. Dropping a HalfOpen trial ticket unresolved frees
  /// the trial slot for the next caller.
  pub fn acquire(&self) -> Result<Ticket<'_>, Rejected> {
    let mut inner = self.lock();
    let now = Instant::now();

    match inner.state {
      CircuitState::Closed => Ok(Ticket::new(self, false)),
      CircuitState::Open => {
        if now >= inner.open_until {
          inner.trial_in_flight = true;
          self.transition(&mut inner, CircuitState::HalfOpen);
          Ok(Ticket::new(self, true))
        } else {
          Err(Rejected {
            retry_after: Some(inner.open_until - now),
          })
        }
      }
      CircuitState::HalfOpen => {
        if inner.trial_in_flight {
          Err(Rejected { retry_after: None })
        } else {
          inner.trial_in_flight = true;
          Ok(Ticket::new(self, true))
        }
      }
    }
  }

  fn on_success(&self, trial: bool) {
    let mut inner = self.lock();
    match inner.state {
      CircuitState::Closed => inner.failures.clear(),
      CircuitState::HalfOpen if trial => {
        inner.trial_in_flight = false;
        inner.failures.clear();
        inner.reopen_count = 0;
        self.transition(&mut inner, CircuitState::Closed);
      }
      // late results from attempts admitted before the circuit opened
      _ => {}
    }
  }

  fn on_failure(&self, trial: bool) {
    let mut inner = self.lock();
    let now = Instant::now();
    match inner.state {
      CircuitState::Closed => {
        inner.failures.push_back(now);
        while let Some(oldest) = inner.failures.front() {
          if now.duration_since(*oldest) > self.config.window {
            inner.failures.pop_front();
          } else {
            break;
          }
        }
        if inner.failures.len() as u32 >= self.config.failure_threshold {
          inner.failures.clear();
          inner.reopen_count = 0;
          inner.open_until = now + self.config.open_period(0);
          self.transition(&mut inner, CircuitState::Open);
        }
      }
      CircuitState::HalfOpen if trial => {
        inner.trial_in_flight = false;
        inner.reopen_count = inner.reopen_count.saturating_add(1);
        inner.open_until = now + self.config.open_period(inner.reopen_count);
        self.transition(&mut inner, CircuitState::Open);
      }
      _ => {}
    }
  }

  fn on_abandoned(&self) {
    let mut inner = self.lock();
    if inner.state == CircuitState::HalfOpen {
      inner.trial_in_flight = false;
    }
  }

  fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
    let from = inner.state;
    inner.state = to;
    match to {
      CircuitState::Open => warn!(
        destination = %self.name,
        from = %from,
        open_for_ms = inner.open_until.saturating_duration_since(Instant::now()).as_millis() as u64,
        "Circuit breaker opened"
      ),
      _ => info!(destination = %self.name, from = %from, to = %to, "Circuit breaker transition"),
    }
    counter!(
      "gateway_circuit_transitions_total",
      "target" => self.name.clone(),
      "state" => to.as_str()
    )
    .increment(1);
  }
}

/// Permission for one attempt, handed out by [`CircuitBreaker::acquire`].
#[must_use = "resolve the ticket with success() or failure()"]
pub struct Ticket<'a> {
  breaker: &'a CircuitBreaker,
  trial: bool,
  resolved: bool,
}

impl<'a> Ticket<'a> {
  fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
    Self {
      breaker,
      trial,
      resolved: false,
    }
  }

  /// Whether this is the single HalfOpen trial.
  pub fn is_trial(&self) -> bool {
    self.trial
  }

  pub fn success(mut self) {
    self.resolved = true;
    self.breaker.on_success(self.trial);
  }

  pub fn failure(mut self) {
    self.resolved = true;
    self.breaker.on_failure(self.trial);
  }
}

impl Drop for Ticket<'_> {
  fn drop(&mut self) {
    if !self.resolved && self.trial {
      self.breaker.on_abandoned();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn breaker(threshold: u32) -> CircuitBreaker {
    CircuitBreaker::new(
      "test",
      CircuitBreakerConfig::new()
        .with_failure_threshold(threshold)
        .with_window(Duration::from_secs(10))
        .with_open_timeout(Duration::from_millis(100))
        .with_max_open_timeout(Duration::from_millis(350)),
    )
  }

  fn fail(breaker: &CircuitBreaker) {
    breaker.acquire().expect("admitted").failure();
  }

  #[tokio::test(start_paused = true)]
  async fn test_opens_after_threshold() {
    let cb = breaker(3);
    fail(&cb);
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Closed);
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Open);

    let rejected = cb.acquire().err().expect("rejected");
    assert_eq!(rejected.retry_after, Some(Duration::from_millis(100)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_success_resets_failure_count() {
    let cb = breaker(2);
    fail(&cb);
    cb.acquire().expect("admitted").success();
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Closed);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failures_outside_window_expire() {
    let cb = breaker(2);
    fail(&cb);
    tokio::time::advance(Duration::from_secs(11)).await;
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Closed);
  }

  #[tokio::test(start_paused = true)]
  async fn test_half_open_admits_single_trial() {
    let cb = breaker(1);
    fail(&cb);
    tokio::time::advance(Duration::from_millis(100)).await;

    let trial = cb.acquire().expect("trial admitted");
    assert!(trial.is_trial());
    assert_eq!(cb.state(), CircuitState::HalfOpen);

    for _ in 0..10 {
      let rejected = cb.acquire().err().expect("only one trial");
      assert_eq!(rejected.retry_after, None);
    }

    trial.success();
    assert_eq!(cb.state(), CircuitState::Closed);
    assert!(cb.acquire().is_ok());
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_trial_reopens_with_growing_period() {
    let cb = breaker(1);
    fail(&cb);

    tokio::time::advance(Duration::from_millis(100)).await;
    cb.acquire().expect("trial").failure();
    assert_eq!(cb.state(), CircuitState::Open);
    assert_eq!(
      cb.acquire().err().and_then(|r| r.retry_after),
      Some(Duration::from_millis(200))
    );

    tokio::time::advance(Duration::from_millis(200)).await;
    cb.acquire().expect("trial").failure();
    // 400ms is capped by max_open_timeout
    assert_eq!(
      cb.acquire().err().and_then(|r| r.retry_after),
      Some(Duration::from_millis(350))
    );

    tokio::time::advance(Duration::from_millis(350)).await;
    cb.acquire().expect("trial").success();
    assert_eq!(cb.state(), CircuitState::Closed);

    // back to the initial open period after recovery
    fail(&cb);
    assert_eq!(
      cb.acquire().err().and_then(|r| r.retry_after),
      Some(Duration::from_millis(100))
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_trial_frees_slot() {
    let cb = breaker(1);
    fail(&cb);
    tokio::time::advance(Duration::from_millis(100)).await;

    let trial = cb.acquire().expect("trial");
    drop(trial);
    assert_eq!(cb.state(), CircuitState::HalfOpen);
    assert!(cb.acquire().expect("slot freed").is_trial());
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_results_ignored_while_open() {
    let cb = breaker(1);
    let early = cb.acquire().expect("admitted");
    fail(&cb);
    assert_eq!(cb.state(), CircuitState::Open);
    early.success();
    assert_eq!(cb.state(), CircuitState::Open);
  }
}
