//! Circuit breaker state machine over a sliding window of call records
//! (spec §4.7).

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
  Closed,
  Open,
  HalfOpen,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
  #[error("circuit is open")]
  CircuitOpen,
  #[error("half-open probe limit exceeded")]
  HalfOpenLimitExceeded,
  #[error("operation timed out")]
  RequestTimeout,
}

#[derive(Debug, Clone, Copy)]
struct CallRecord {
  timestamp: Instant,
  is_success: bool,
  duration: Duration,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
  pub failure_threshold: f64,
  pub minimum_requests: usize,
  pub window_duration: Duration,
  pub reset_timeout: Duration,
  pub half_open_max_requests: usize,
  pub half_open_success_threshold: f64,
  /// When set, a slow-call rate above this threshold also trips the
  /// breaker (spec §4.7: "OR `slow_call_rate > slow_call_rate_threshold`
  /// when configured").
  pub slow_call_rate_threshold: Option<f64>,
  pub slow_call_duration: Duration,
}

impl Default for CircuitBreakerConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 0.5,
      minimum_requests: 10,
      window_duration: Duration::from_secs(60),
      reset_timeout: Duration::from_secs(30),
      half_open_max_requests: 5,
      half_open_success_threshold: 0.6,
      slow_call_rate_threshold: None,
      slow_call_duration: Duration::from_secs(1),
    }
  }
}

struct Inner {
  state: BreakerState,
  opened_at: Option<Instant>,
  records: VecDeque<CallRecord>,
  half_open_probes: usize,
}

/// State-change callback: `(from, to)`.
pub type StateChangeCallback = Arc<dyn Fn(BreakerState, BreakerState) + Send + Sync>;

pub struct CircuitBreaker {
  config: CircuitBreakerConfig,
  inner: Mutex<Inner>,
  callbacks: Mutex<Vec<StateChangeCallback>>,
}

impl CircuitBreaker {
  pub fn new(config: CircuitBreakerConfig) -> Self {
    Self {
      config,
      inner: Mutex::new(Inner {
        state: BreakerState::Closed,
        opened_at: None,
        records: VecDeque::new(),
        half_open_probes: 0,
      }),
      callbacks: Mutex::new(Vec::new()),
    }
  }

  pub fn state(&self) -> BreakerState {
    self.inner.lock().state
  }

  pub fn on_state_change(&self, callback: StateChangeCallback) {
    self.callbacks.lock().push(callback);
  }

  fn transition(&self, inner: &mut Inner, to: BreakerState) {
    if inner.state == to {
      return;
    }
    let from = inner.state;
    inner.state = to;
    if to == BreakerState::Open {
      inner.opened_at = Some(Instant::now());
    }
    if to == BreakerState::HalfOpen {
      inner.half_open_probes = 0;
    }
    let callbacks = self.callbacks.lock().clone();
    for cb in callbacks {
      cb(from, to);
    }
  }

  fn prune(&self, inner: &mut Inner) {
    let cutoff = Instant::now() - self.config.window_duration;
    while let Some(front) = inner.records.front() {
      if front.timestamp < cutoff {
        inner.records.pop_front();
      } else {
        break;
      }
    }
  }

  fn failure_rate(&self, inner: &Inner) -> f64 {
    if inner.records.is_empty() {
      return 0.0;
    }
    let failures = inner.records.iter().filter(|r| !r.is_success).count();
    failures as f64 / inner.records.len() as f64
  }

  fn success_rate(&self, inner: &Inner) -> f64 {
    1.0 - self.failure_rate(inner)
  }

  fn slow_call_rate(&self, inner: &Inner) -> f64 {
    if inner.records.is_empty() {
      return 0.0;
    }
    let slow = inner
      .records
      .iter()
      .filter(|r| r.duration >= self.config.slow_call_duration)
      .count();
    slow as f64 / inner.records.len() as f64
  }

  /// Evaluates transitions and either admits or rejects the call, as seen
  /// at the start of `execute`.
  fn admit(&self) -> Result<(), CircuitBreakerError> {
    let mut inner = self.inner.lock();
    self.prune(&mut inner);

    match inner.state {
      BreakerState::Closed => {
        let total = inner.records.len();
        if total >= self.config.minimum_requests {
          let failure_rate = self.failure_rate(&inner);
          let slow_trip = self
            .config
            .slow_call_rate_threshold
            .map(|t| self.slow_call_rate(&inner) > t)
            .unwrap_or(false);
          if failure_rate > self.config.failure_threshold || slow_trip {
            self.transition(&mut inner, BreakerState::Open);
            return Err(CircuitBreakerError::CircuitOpen);
          }
        }
        Ok(())
      }
      BreakerState::Open => {
        let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
        if opened_at.elapsed() >= self.config.reset_timeout {
          self.transition(&mut inner, BreakerState::HalfOpen);
          inner.half_open_probes += 1;
          Ok(())
        } else {
          Err(CircuitBreakerError::CircuitOpen)
        }
      }
      BreakerState::HalfOpen => {
        if inner.half_open_probes >= self.config.half_open_max_requests {
          Err(CircuitBreakerError::HalfOpenLimitExceeded)
        } else {
          inner.half_open_probes += 1;
          Ok(())
        }
      }
    }
  }

  fn record(&self, is_success: bool, duration: Duration) {
    let mut inner = self.inner.lock();
    inner.records.push_back(CallRecord {
      timestamp: Instant::now(),
      is_success,
      duration,
    });
    self.prune(&mut inner);

    match inner.state {
      BreakerState::HalfOpen => {
        if !is_success {
          self.transition(&mut inner, BreakerState::Open);
        } else if self.success_rate(&inner) >= self.config.half_open_success_threshold {
          inner.half_open_probes = 0;
          self.transition(&mut inner, BreakerState::Closed);
        }
      }
      BreakerState::Closed => {
        let total = inner.records.len();
        if total >= self.config.minimum_requests
          && self.failure_rate(&inner) > self.config.failure_threshold
        {
          self.transition(&mut inner, BreakerState::Open);
        }
      }
      BreakerState::Open => {}
    }
  }

  pub fn trip(&self) {
    let mut inner = self.inner.lock();
    self.transition(&mut inner, BreakerState::Open);
  }

  pub fn reset(&self) {
    let mut inner = self.inner.lock();
    inner.records.clear();
    inner.half_open_probes = 0;
    self.transition(&mut inner, BreakerState::Closed);
  }

  /// Runs `op`, gating on breaker state and recording the outcome.
  pub async fn execute<F, T, E>(&self, op: F) -> Result<T, BreakerOutcome<E>>
  where
    F: Future<Output = Result<T, E>>,
  {
    self.admit().map_err(BreakerOutcome::Breaker)?;
    let start = Instant::now();
    let result = op.await;
    self.record(result.is_ok(), start.elapsed());
    result.map_err(BreakerOutcome::Operation)
  }

  /// Races `op` against a timeout. On cancellation (the timeout wins), no
  /// side effect is recorded on the window (spec §5).
  pub async fn execute_with_timeout<F, T, E>(
    &self,
    timeout: Duration,
    op: F,
  ) -> Result<T, BreakerOutcome<E>>
  where
    F: Future<Output = Result<T, E>>,
  {
    self.admit().map_err(BreakerOutcome::Breaker)?;
    let start = Instant::now();
    match tokio::time::timeout(timeout, op).await {
      Ok(result) => {
        self.record(result.is_ok(), start.elapsed());
        result.map_err(BreakerOutcome::Operation)
      }
      Err(_) => Err(BreakerOutcome::Breaker(CircuitBreakerError::RequestTimeout)),
    }
  }
}

#[derive(Debug, Error)]
pub enum BreakerOutcome<E> {
  #[error(transparent)]
  Breaker(#[from] CircuitBreakerError),
  #[error("operation failed")]
  Operation(E),
}

/// Process-wide registry mapping a name to a shared breaker instance.
/// Policies are fixed at creation time (spec §3, §4.7).
#[derive(Default)]
pub struct CircuitBreakerRegistry {
  breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
  pub fn new() -> Self {
    Self {
      breakers: DashMap::new(),
    }
  }

  pub fn get_or_insert(
    &self,
    name: &str,
    config: impl FnOnce() -> CircuitBreakerConfig,
  ) -> Arc<CircuitBreaker> {
    self
      .breakers
      .entry(name.to_string())
      .or_insert_with(|| Arc::new(CircuitBreaker::new(config())))
      .clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn opens_after_minimum_requests_and_failure_threshold() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
      failure_threshold: 0.5,
      minimum_requests: 4,
      ..Default::default()
    });

    for ok in [true, true, false, false] {
      let _ = breaker
        .execute(async move {
          if ok {
            Ok::<_, ()>(())
          } else {
            Err(())
          }
        })
        .await;
    }
    // 5th call, after 2 successes and 2 failures (50%, not > threshold yet)
    // fails once more, pushing failure rate over 0.5.
    let _ = breaker.execute(async { Err::<(), ()>(()) }).await;

    let result = breaker.execute(async { Ok::<_, ()>(()) }).await;
    assert!(matches!(
      result,
      Err(BreakerOutcome::Breaker(CircuitBreakerError::CircuitOpen))
    ));
  }

  #[tokio::test]
  async fn half_open_closes_on_success_reopens_on_failure() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
      failure_threshold: 0.1,
      minimum_requests: 1,
      reset_timeout: Duration::from_millis(10),
      half_open_success_threshold: 1.0,
      ..Default::default()
    });
    breaker.trip();
    assert_eq!(breaker.state(), BreakerState::Open);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = breaker.execute(async { Ok::<_, ()>(()) }).await;
    assert!(result.is_ok());
    assert_eq!(breaker.state(), BreakerState::Closed);
  }

  #[tokio::test]
  async fn cancellation_records_nothing() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig {
      minimum_requests: 1,
      ..Default::default()
    });
    // A future that never resolves; execute_with_timeout's own timeout
    // wins the race. Per spec §5, cancellation of `execute` must leave no
    // trace on the window: no success, no failure.
    let before = breaker.inner.lock().records.len();
    let result = breaker
      .execute_with_timeout(Duration::from_millis(5), std::future::pending::<Result<(), ()>>())
      .await;
    assert!(matches!(
      result,
      Err(BreakerOutcome::Breaker(CircuitBreakerError::RequestTimeout))
    ));
    let after = breaker.inner.lock().records.len();
    assert_eq!(after, before);
  }

  #[test]
  fn registry_returns_shared_instance() {
    let registry = CircuitBreakerRegistry::new();
    let a = registry.get_or_insert("svc", CircuitBreakerConfig::default);
    let b = registry.get_or_insert("svc", CircuitBreakerConfig::default);
    assert!(Arc::ptr_eq(&a, &b));
  }
}
