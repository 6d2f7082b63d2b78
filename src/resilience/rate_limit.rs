//! Five independent rate-limiting algorithms sharing a common contract
//! (spec §4.6). Each limiter is a single-writer actor guarded by a
//! [`parking_lot::Mutex`] since none of its operations need to suspend
//! except `acquire`'s poll loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RateLimitError {
  #[error("rate limit exceeded, retry after {retry_after:?}")]
  RateLimitExceeded { retry_after: Option<Duration> },
  #[error("acquire timed out waiting for a permit")]
  AcquireTimeout,
  #[error("cost {cost} exceeds capacity {capacity}")]
  CostTooHigh { cost: f64, capacity: f64 },
}

/// Current state of a limiter, as observed at `get_current_rate()` time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateInfo {
  pub available: f64,
  pub capacity: f64,
  pub estimated_recovery: Option<Duration>,
}

impl RateInfo {
  pub fn utilization(&self) -> f64 {
    if self.capacity <= 0.0 {
      0.0
    } else {
      (self.capacity - self.available) / self.capacity
    }
  }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
  fn try_acquire(&self, cost: f64) -> bool;

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError>;

  fn get_current_rate(&self) -> RateInfo;

  fn reset(&self);
}

/// Polls `try_acquire` until it succeeds or `timeout` elapses, sleeping
/// between attempts. Shared by every limiter below except
/// [`ConcurrentSemaphore`], which has genuine waiters instead of polling.
async fn poll_acquire<F: Fn(f64) -> bool>(
  cost: f64,
  capacity: f64,
  timeout: Option<Duration>,
  try_acquire: F,
) -> Result<bool, RateLimitError> {
  if cost > capacity {
    return Err(RateLimitError::CostTooHigh { cost, capacity });
  }
  let deadline = timeout.map(|d| Instant::now() + d);
  loop {
    if try_acquire(cost) {
      return Ok(true);
    }
    if let Some(deadline) = deadline {
      if Instant::now() >= deadline {
        return Err(RateLimitError::AcquireTimeout);
      }
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
}

struct TokenBucketState {
  tokens: f64,
  last_refill: Instant,
}

/// Accumulates tokens at `refill_rate` per second, up to `capacity`.
pub struct TokenBucket {
  capacity: f64,
  refill_rate: f64,
  state: Mutex<TokenBucketState>,
}

impl TokenBucket {
  pub fn new(capacity: f64, refill_rate: f64) -> Self {
    Self {
      capacity,
      refill_rate,
      state: Mutex::new(TokenBucketState {
        tokens: capacity,
        last_refill: Instant::now(),
      }),
    }
  }

  fn refill(&self, state: &mut TokenBucketState) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_refill).as_secs_f64();
    state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
    state.last_refill = now;
  }
}

#[async_trait]
impl RateLimiter for TokenBucket {
  fn try_acquire(&self, cost: f64) -> bool {
    if cost > self.capacity {
      return false;
    }
    let mut state = self.state.lock();
    self.refill(&mut state);
    if state.tokens >= cost {
      state.tokens -= cost;
      true
    } else {
      false
    }
  }

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError> {
    poll_acquire(cost, self.capacity, timeout, |c| self.try_acquire(c)).await
  }

  fn get_current_rate(&self) -> RateInfo {
    let mut state = self.state.lock();
    self.refill(&mut state);
    let recovery = if state.tokens >= self.capacity || self.refill_rate <= 0.0 {
      None
    } else {
      Some(Duration::from_secs_f64(
        (self.capacity - state.tokens) / self.refill_rate,
      ))
    };
    RateInfo {
      available: state.tokens,
      capacity: self.capacity,
      estimated_recovery: recovery,
    }
  }

  fn reset(&self) {
    let mut state = self.state.lock();
    state.tokens = self.capacity;
    state.last_refill = Instant::now();
  }
}

struct LeakyBucketState {
  water: f64,
  last_leak: Instant,
}

/// Incoming cost adds water; the bucket drains at `leak_rate` per second.
pub struct LeakyBucket {
  capacity: f64,
  leak_rate: f64,
  state: Mutex<LeakyBucketState>,
}

impl LeakyBucket {
  pub fn new(capacity: f64, leak_rate: f64) -> Self {
    Self {
      capacity,
      leak_rate,
      state: Mutex::new(LeakyBucketState {
        water: 0.0,
        last_leak: Instant::now(),
      }),
    }
  }

  fn leak(&self, state: &mut LeakyBucketState) {
    let now = Instant::now();
    let elapsed = now.duration_since(state.last_leak).as_secs_f64();
    state.water = (state.water - elapsed * self.leak_rate).max(0.0);
    state.last_leak = now;
  }
}

#[async_trait]
impl RateLimiter for LeakyBucket {
  fn try_acquire(&self, cost: f64) -> bool {
    if cost > self.capacity {
      return false;
    }
    let mut state = self.state.lock();
    self.leak(&mut state);
    if state.water + cost <= self.capacity {
      state.water += cost;
      true
    } else {
      false
    }
  }

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError> {
    poll_acquire(cost, self.capacity, timeout, |c| self.try_acquire(c)).await
  }

  fn get_current_rate(&self) -> RateInfo {
    let mut state = self.state.lock();
    self.leak(&mut state);
    let available = self.capacity - state.water;
    let recovery = if state.water <= 0.0 || self.leak_rate <= 0.0 {
      None
    } else {
      Some(Duration::from_secs_f64(state.water / self.leak_rate))
    };
    RateInfo {
      available,
      capacity: self.capacity,
      estimated_recovery: recovery,
    }
  }

  fn reset(&self) {
    let mut state = self.state.lock();
    state.water = 0.0;
    state.last_leak = Instant::now();
  }
}

struct FixedWindowState {
  count: f64,
  window_start: Instant,
}

/// Resets its counter whole-window at a time.
pub struct FixedWindow {
  window: Duration,
  max: f64,
  state: Mutex<FixedWindowState>,
}

impl FixedWindow {
  pub fn new(window: Duration, max: f64) -> Self {
    Self {
      window,
      max,
      state: Mutex::new(FixedWindowState {
        count: 0.0,
        window_start: Instant::now(),
      }),
    }
  }

  fn maybe_reset(&self, state: &mut FixedWindowState) {
    if state.window_start.elapsed() >= self.window {
      state.count = 0.0;
      state.window_start = Instant::now();
    }
  }
}

#[async_trait]
impl RateLimiter for FixedWindow {
  fn try_acquire(&self, cost: f64) -> bool {
    if cost > self.max {
      return false;
    }
    let mut state = self.state.lock();
    self.maybe_reset(&mut state);
    if state.count + cost <= self.max {
      state.count += cost;
      true
    } else {
      false
    }
  }

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError> {
    poll_acquire(cost, self.max, timeout, |c| self.try_acquire(c)).await
  }

  fn get_current_rate(&self) -> RateInfo {
    let mut state = self.state.lock();
    self.maybe_reset(&mut state);
    let remaining = self.window.saturating_sub(state.window_start.elapsed());
    RateInfo {
      available: self.max - state.count,
      capacity: self.max,
      estimated_recovery: if state.count >= self.max {
        Some(remaining)
      } else {
        None
      },
    }
  }

  fn reset(&self) {
    let mut state = self.state.lock();
    state.count = 0.0;
    state.window_start = Instant::now();
  }
}

/// Keeps individual event timestamps within a moving interval.
pub struct SlidingWindow {
  window: Duration,
  max: f64,
  timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
  pub fn new(window: Duration, max: f64) -> Self {
    Self {
      window,
      max,
      timestamps: Mutex::new(VecDeque::new()),
    }
  }

  fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
    while let Some(front) = timestamps.front() {
      if now.duration_since(*front) > self.window {
        timestamps.pop_front();
      } else {
        break;
      }
    }
  }
}

#[async_trait]
impl RateLimiter for SlidingWindow {
  fn try_acquire(&self, cost: f64) -> bool {
    let cost_count = cost.round() as usize;
    if cost > self.max {
      return false;
    }
    let now = Instant::now();
    let mut timestamps = self.timestamps.lock();
    self.prune(&mut timestamps, now);
    if timestamps.len() as f64 + cost <= self.max {
      for _ in 0..cost_count.max(1) {
        timestamps.push_back(now);
      }
      true
    } else {
      false
    }
  }

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError> {
    poll_acquire(cost, self.max, timeout, |c| self.try_acquire(c)).await
  }

  fn get_current_rate(&self) -> RateInfo {
    let now = Instant::now();
    let mut timestamps = self.timestamps.lock();
    self.prune(&mut timestamps, now);
    let available = self.max - timestamps.len() as f64;
    let recovery = timestamps.front().map(|oldest| {
      self.window.saturating_sub(now.duration_since(*oldest))
    });
    RateInfo {
      available,
      capacity: self.max,
      estimated_recovery: if available <= 0.0 { recovery } else { None },
    }
  }

  fn reset(&self) {
    self.timestamps.lock().clear();
  }
}

/// Admits up to `max_concurrent` units of cost at once; excess callers
/// enqueue as waiters and are woken FIFO as capacity frees up.
pub struct ConcurrentSemaphore {
  max_concurrent: f64,
  inner: Mutex<SemaphoreState>,
  notify: tokio::sync::Notify,
}

struct SemaphoreState {
  current: f64,
  /// Bumped by `reset()` so in-flight waiters can tell a wake-up was a
  /// forced reset rather than capacity freeing up.
  reset_count: u64,
}

impl ConcurrentSemaphore {
  pub fn new(max_concurrent: f64) -> Self {
    Self {
      max_concurrent,
      inner: Mutex::new(SemaphoreState {
        current: 0.0,
        reset_count: 0,
      }),
      notify: tokio::sync::Notify::new(),
    }
  }

  pub fn release(&self, cost: f64) {
    let mut state = self.inner.lock();
    state.current = (state.current - cost).max(0.0);
    drop(state);
    self.notify.notify_waiters();
  }
}

#[async_trait]
impl RateLimiter for ConcurrentSemaphore {
  fn try_acquire(&self, cost: f64) -> bool {
    if cost > self.max_concurrent {
      return false;
    }
    let mut state = self.inner.lock();
    if state.current + cost <= self.max_concurrent {
      state.current += cost;
      true
    } else {
      false
    }
  }

  async fn acquire(
    &self,
    cost: f64,
    timeout: Option<Duration>,
  ) -> Result<bool, RateLimitError> {
    if cost > self.max_concurrent {
      return Err(RateLimitError::CostTooHigh {
        cost,
        capacity: self.max_concurrent,
      });
    }
    let reset_at_start = self.inner.lock().reset_count;
    let deadline_fut = async {
      loop {
        if self.try_acquire(cost) {
          return Ok(true);
        }
        self.notify.notified().await;
        if self.inner.lock().reset_count != reset_at_start {
          return Err(RateLimitError::AcquireTimeout);
        }
      }
    };
    match timeout {
      Some(d) => match tokio::time::timeout(d, deadline_fut).await {
        Ok(result) => result,
        Err(_) => Err(RateLimitError::AcquireTimeout),
      },
      None => deadline_fut.await,
    }
  }

  fn get_current_rate(&self) -> RateInfo {
    let state = self.inner.lock();
    RateInfo {
      available: self.max_concurrent - state.current,
      capacity: self.max_concurrent,
      estimated_recovery: None,
    }
  }

  fn reset(&self) {
    let mut state = self.inner.lock();
    state.current = 0.0;
    state.reset_count += 1;
    drop(state);
    // Every pending waiter observes the bumped reset_count and fails with
    // AcquireTimeout rather than silently re-enqueuing (spec §4.6).
    self.notify.notify_waiters();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_bucket_example_from_spec() {
    let bucket = TokenBucket::new(5.0, 5.0);
    assert!(bucket.try_acquire(3.0));
    assert!(!bucket.try_acquire(3.0));
  }

  #[test]
  fn token_bucket_refills_over_time() {
    let bucket = TokenBucket::new(5.0, 5.0);
    assert!(bucket.try_acquire(5.0));
    std::thread::sleep(Duration::from_millis(450));
    // ~2.25 tokens should have refilled.
    assert!(bucket.try_acquire(2.0));
  }

  #[test]
  fn cost_exceeding_capacity_always_fails() {
    let bucket = TokenBucket::new(5.0, 1.0);
    assert!(!bucket.try_acquire(10.0));
  }

  #[test]
  fn leaky_bucket_admits_up_to_capacity() {
    let bucket = LeakyBucket::new(10.0, 1.0);
    assert!(bucket.try_acquire(6.0));
    assert!(bucket.try_acquire(4.0));
    assert!(!bucket.try_acquire(1.0));
  }

  #[test]
  fn fixed_window_resets_after_window() {
    let window = FixedWindow::new(Duration::from_millis(50), 2.0);
    assert!(window.try_acquire(2.0));
    assert!(!window.try_acquire(1.0));
    std::thread::sleep(Duration::from_millis(60));
    assert!(window.try_acquire(1.0));
  }

  #[test]
  fn sliding_window_tracks_individual_events() {
    let limiter = SlidingWindow::new(Duration::from_millis(50), 2.0);
    assert!(limiter.try_acquire(1.0));
    assert!(limiter.try_acquire(1.0));
    assert!(!limiter.try_acquire(1.0));
    std::thread::sleep(Duration::from_millis(60));
    assert!(limiter.try_acquire(1.0));
  }

  #[tokio::test]
  async fn semaphore_releases_wake_waiters() {
    let sem = std::sync::Arc::new(ConcurrentSemaphore::new(1.0));
    assert!(sem.try_acquire(1.0));
    let sem2 = sem.clone();
    let waiter = tokio::spawn(async move { sem2.acquire(1.0, Some(Duration::from_secs(1))).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    sem.release(1.0);
    assert_eq!(waiter.await.unwrap(), Ok(true));
  }

  #[tokio::test]
  async fn semaphore_acquire_respects_timeout() {
    let sem = ConcurrentSemaphore::new(1.0);
    assert!(sem.try_acquire(1.0));
    let result = sem.acquire(1.0, Some(Duration::from_millis(20))).await;
    assert_eq!(result, Err(RateLimitError::AcquireTimeout));
  }
}
