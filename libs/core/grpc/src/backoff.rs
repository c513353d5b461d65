use std::time::Duration;

use crate::error::{GrpcError, GrpcResult};

/// Exponential backoff with jitter.
///
/// The un-jittered delay before retry `n` (0-based) is
/// `initial * multiplier^n`, capped at `max_delay`. Jitter scales that by a
/// random factor in `[1 - jitter, 1 + jitter]` and the result is clamped to
/// `max_delay` again, so the cap holds after jitter too.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
  pub initial: Duration,
  pub multiplier: f64,
  /// Fraction in `[0, 1]`.
  pub jitter: f64,
  pub max_delay: Duration,
  /// Total attempts including the first one.
  pub max_attempts: u32,
  /// Retrying stops once the next sleep would cross this budget.
  pub max_elapsed: Duration,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      initial: Duration::from_millis(10),
      multiplier: 2.0,
      jitter: 0.1,
      max_delay: Duration::from_secs(1),
      max_attempts: 3,
      max_elapsed: Duration::from_secs(5),
    }
  }
}

impl BackoffPolicy {
  pub fn new() -> Self {
    Self::default()
  }

  /// Single attempt, no retries.
  pub fn no_retry() -> Self {
    Self {
      max_attempts: 1,
      ..Self::default()
    }
  }

  pub fn with_initial(mut self, initial: Duration) -> Self {
    self.initial = initial;
    self
  }

  pub fn with_multiplier(mut self, multiplier: f64) -> Self {
    self.multiplier = multiplier;
    self
  }

  pub fn with_jitter(mut self, jitter: f64) -> Self {
    self.jitter = jitter;
    self
  }

  pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
    self.max_delay = max_delay;
    self
  }

  pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
    self.max_elapsed = max_elapsed;
    self
  }

  pub fn validate(&self) -> GrpcResult<()> {
    if self.max_attempts == 0 {
      return Err(GrpcError::InvalidConfig("max_attempts must be at least 1".into()));
    }
    if !self.multiplier.is_finite() || self.multiplier < 1.0 {
      return Err(GrpcError::InvalidConfig(format!(
        "multiplier must be >= 1.0, got {}",
        self.multiplier
      )));
    }
    if !(0.0..=1.0).contains(&self.jitter) {
      return Err(GrpcError::InvalidConfig(format!(
        "jitter must be within [0, 1], got {}",
        self.jitter
      )));
    }
    if self.initial > self.max_delay {
      return Err(GrpcError::InvalidConfig(
        "initial delay must not exceed max_delay".into(),
      ));
    }
    Ok(())
  }

  /// Delay before retry `retry` without jitter.
  pub fn base_delay(&self, retry: u32) -> Duration {
    let exp = self.multiplier.powi(retry.min(i32::MAX as u32) as i32);
    let nanos = self.initial.as_nanos() as f64 * exp;
    if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
      return self.max_delay;
    }
    Duration::from_nanos(nanos.round() as u64)
  }

  /// Jittered delay before retry `retry`.
  pub fn delay(&self, retry: u32) -> Duration {
    self.delay_with_sample(retry, rand::random::<f64>())
  }

  /// Jittered delay using `sample` in `[0, 1)` as the random source.
  pub fn delay_with_sample(&self, retry: u32, sample: f64) -> Duration {
    let base = self.base_delay(retry).as_nanos() as f64;
    let factor = 1.0 + self.jitter * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
    let jittered = (base * factor).max(0.0).round() as u64;
    Duration::from_nanos(jittered).min(self.max_delay)
  }
}
