//! Ordered fallback strategies with optional retries (spec §4.12).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum FallbackError {
  #[error("operation failed and no fallback strategy produced a value: {0}")]
  Exhausted(String),
}

#[derive(Debug, Clone)]
pub struct FallbackContext {
  pub operation_name: String,
  pub attempt_count: u32,
}

/// A strategy invoked with `(error, context)` once the wrapped operation
/// has failed.
#[async_trait]
pub trait FallbackStrategy: Send + Sync {
  async fn resolve(
    &self,
    error: &str,
    ctx: &FallbackContext,
  ) -> Result<Bytes, FallbackError>;
}

pub struct DefaultValue(pub Bytes);

#[async_trait]
impl FallbackStrategy for DefaultValue {
  async fn resolve(&self, _error: &str, _ctx: &FallbackContext) -> Result<Bytes, FallbackError> {
    Ok(self.0.clone())
  }
}

/// Returns a cached value keyed by operation name, if fresh.
pub struct CacheStrategy {
  cache: Arc<crate::cache::CacheEngine>,
  max_age: Duration,
}

impl CacheStrategy {
  pub fn new(cache: Arc<crate::cache::CacheEngine>, max_age: Duration) -> Self {
    Self { cache, max_age }
  }
}

#[async_trait]
impl FallbackStrategy for CacheStrategy {
  async fn resolve(&self, _error: &str, ctx: &FallbackContext) -> Result<Bytes, FallbackError> {
    match self.cache.get(&ctx.operation_name) {
      Some(entry) if entry.created_at.elapsed() <= self.max_age => Ok(entry.data),
      _ => Err(FallbackError::Exhausted(format!(
        "no fresh cached value for `{}`",
        ctx.operation_name
      ))),
    }
  }
}

/// Invokes an alternate, degraded-service provider.
pub struct DegradedService<F> {
  provider: F,
}

impl<F> DegradedService<F> {
  pub fn new(provider: F) -> Self {
    Self { provider }
  }
}

#[async_trait]
impl<F, Fut> FallbackStrategy for DegradedService<F>
where
  F: Fn(FallbackContext) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Bytes, FallbackError>> + Send,
{
  async fn resolve(&self, _error: &str, ctx: &FallbackContext) -> Result<Bytes, FallbackError> {
    (self.provider)(ctx.clone()).await
  }
}

/// Tries strategies in order until one succeeds.
pub struct Chain {
  strategies: Vec<Arc<dyn FallbackStrategy>>,
}

impl Chain {
  pub fn new(strategies: Vec<Arc<dyn FallbackStrategy>>) -> Self {
    Self { strategies }
  }
}

#[async_trait]
impl FallbackStrategy for Chain {
  async fn resolve(&self, error: &str, ctx: &FallbackContext) -> Result<Bytes, FallbackError> {
    for strategy in &self.strategies {
      if let Ok(value) = strategy.resolve(error, ctx).await {
        return Ok(value);
      }
    }
    Err(FallbackError::Exhausted(format!(
      "all {} chained strategies failed",
      self.strategies.len()
    )))
  }
}

/// Dispatches on the error to a predicate-selected strategy, or a default.
pub struct Conditional {
  predicate: Box<dyn Fn(&str) -> bool + Send + Sync>,
  when_true: Arc<dyn FallbackStrategy>,
  default: Arc<dyn FallbackStrategy>,
}

impl Conditional {
  pub fn new(
    predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    when_true: Arc<dyn FallbackStrategy>,
    default: Arc<dyn FallbackStrategy>,
  ) -> Self {
    Self {
      predicate: Box::new(predicate),
      when_true,
      default,
    }
  }
}

#[async_trait]
impl FallbackStrategy for Conditional {
  async fn resolve(&self, error: &str, ctx: &FallbackContext) -> Result<Bytes, FallbackError> {
    if (self.predicate)(error) {
      self.when_true.resolve(error, ctx).await
    } else {
      self.default.resolve(error, ctx).await
    }
  }
}

pub struct FallbackHandler {
  strategy: Arc<dyn FallbackStrategy>,
  operation_name: String,
}

impl FallbackHandler {
  pub fn new(operation_name: impl Into<String>, strategy: Arc<dyn FallbackStrategy>) -> Self {
    Self {
      strategy,
      operation_name: operation_name.into(),
    }
  }

  pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, FallbackError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    T: TryFromFallback,
  {
    match op().await {
      Ok(value) => Ok(value),
      Err(error) => {
        let ctx = FallbackContext {
          operation_name: self.operation_name.clone(),
          attempt_count: 1,
        };
        let bytes = self.strategy.resolve(&error.to_string(), &ctx).await?;
        Ok(T::from_fallback(bytes))
      }
    }
  }

  pub async fn execute_with_retries<F, Fut, T, E>(
    &self,
    max_retries: u32,
    delay: Duration,
    mut op: F,
  ) -> Result<T, FallbackError>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    T: TryFromFallback,
  {
    let mut last_error = String::new();
    let mut attempt = 0;
    loop {
      attempt += 1;
      match op().await {
        Ok(value) => return Ok(value),
        Err(error) => {
          last_error = error.to_string();
          if attempt > max_retries {
            break;
          }
          sleep(delay).await;
        }
      }
    }
    let ctx = FallbackContext {
      operation_name: self.operation_name.clone(),
      attempt_count: attempt,
    };
    let bytes = self.strategy.resolve(&last_error, &ctx).await?;
    Ok(T::from_fallback(bytes))
  }
}

/// Lets [`FallbackHandler`] hand back whatever byte-ish type the strategy
/// produced without every call site matching on `Bytes` directly.
pub trait TryFromFallback {
  fn from_fallback(bytes: Bytes) -> Self;
}

impl TryFromFallback for Bytes {
  fn from_fallback(bytes: Bytes) -> Self {
    bytes
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn default_value_is_returned_on_failure() {
    let handler = FallbackHandler::new(
      "op",
      Arc::new(DefaultValue(Bytes::from_static(b"fallback"))),
    );
    let result: Result<Bytes, FallbackError> = handler
      .execute(|| async { Err::<Bytes, &str>("boom") })
      .await;
    assert_eq!(result.unwrap().as_ref(), b"fallback");
  }

  #[tokio::test]
  async fn chain_tries_until_one_succeeds() {
    struct AlwaysFails;
    #[async_trait]
    impl FallbackStrategy for AlwaysFails {
      async fn resolve(&self, _e: &str, _c: &FallbackContext) -> Result<Bytes, FallbackError> {
        Err(FallbackError::Exhausted("nope".into()))
      }
    }
    let chain = Chain::new(vec![
      Arc::new(AlwaysFails),
      Arc::new(DefaultValue(Bytes::from_static(b"second"))),
    ]);
    let ctx = FallbackContext {
      operation_name: "op".into(),
      attempt_count: 1,
    };
    let result = chain.resolve("err", &ctx).await.unwrap();
    assert_eq!(result.as_ref(), b"second");
  }

  #[tokio::test]
  async fn retries_then_falls_back() {
    let handler = FallbackHandler::new(
      "op",
      Arc::new(DefaultValue(Bytes::from_static(b"fallback"))),
    );
    let attempts = std::sync::atomic::AtomicU32::new(0);
    let result: Result<Bytes, FallbackError> = handler
      .execute_with_retries(2, Duration::from_millis(1), || {
        attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        async { Err::<Bytes, &str>("boom") }
      })
      .await;
    assert_eq!(result.unwrap().as_ref(), b"fallback");
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
  }
}
