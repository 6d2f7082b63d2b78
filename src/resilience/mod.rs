//! Resilience engine: rate limiting, circuit breaking, error
//! classification and monitoring, heartbeats, and fallback strategies
//! (spec §4.6-§4.12).

pub mod circuit_breaker;
pub mod error_classifier;
pub mod error_rate_monitor;
pub mod fallback;
pub mod heartbeat;
pub mod rate_limit;

pub use circuit_breaker::{
  BreakerOutcome, BreakerState, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
  CircuitBreakerRegistry,
};
pub use error_classifier::{
  Category, ClassifiableError, ErrorClassification, Recoverability, Severity,
};
pub use error_rate_monitor::{
  AlertLevel, ErrorRateMonitor, ErrorRateMonitorConfig, ErrorRateMonitorRegistry, Trend,
};
pub use fallback::{FallbackContext, FallbackError, FallbackHandler, FallbackStrategy};
pub use heartbeat::{
  HeartbeatConfig, HeartbeatManager, HeartbeatState, HeartbeatStatistics, HeartbeatTransport,
};
pub use rate_limit::{
  ConcurrentSemaphore, FixedWindow, LeakyBucket, RateInfo, RateLimitError, RateLimiter,
  SlidingWindow, TokenBucket,
};
