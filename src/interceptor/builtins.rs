//! Built-in interceptors (spec §4.5) and the adapter that lets an
//! [`InterceptorChain`] run as a single [`Middleware`] stage.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::cache::CacheEngine;
use crate::middleware::{Middleware, MiddlewareContext, MiddlewareError};

use super::{Interceptor, InterceptorChain, InterceptorResult};

/// Logs every payload that passes through at debug level; never modifies
/// it.
pub struct Logging {
  name: String,
}

impl Logging {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

#[async_trait]
impl Interceptor for Logging {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, ctx: &mut MiddlewareContext) -> InterceptorResult {
    debug!(
      interceptor = %self.name,
      connection_id = %ctx.connection_id,
      bytes = data.len(),
      "payload observed"
    );
    InterceptorResult::Passthrough(data)
  }
}

/// Rejects payloads outside `[min_size, max_size]`, or failing a custom
/// predicate.
pub struct Validation {
  name: String,
  min_size: usize,
  max_size: usize,
  predicate: Option<Box<dyn Fn(&[u8]) -> bool + Send + Sync>>,
}

impl Validation {
  pub fn new(name: impl Into<String>, min_size: usize, max_size: usize) -> Self {
    Self {
      name: name.into(),
      min_size,
      max_size,
      predicate: None,
    }
  }

  pub fn with_predicate(mut self, predicate: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
    self.predicate = Some(Box::new(predicate));
    self
  }
}

#[async_trait]
impl Interceptor for Validation {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    if data.len() < self.min_size || data.len() > self.max_size {
      return InterceptorResult::Rejected(format!(
        "payload size {} outside [{}, {}]",
        data.len(),
        self.min_size,
        self.max_size
      ));
    }
    if let Some(predicate) = &self.predicate {
      if !predicate(&data) {
        return InterceptorResult::Rejected("failed custom validation predicate".into());
      }
    }
    InterceptorResult::Passthrough(data)
  }
}

/// Applies a pure transformation function to the payload.
pub struct Transform<F> {
  name: String,
  transform: F,
}

impl<F> Transform<F>
where
  F: Fn(Bytes) -> Bytes + Send + Sync,
{
  pub fn new(name: impl Into<String>, transform: F) -> Self {
    Self {
      name: name.into(),
      transform,
    }
  }
}

#[async_trait]
impl<F> Interceptor for Transform<F>
where
  F: Fn(Bytes) -> Bytes + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    InterceptorResult::Passthrough((self.transform)(data))
  }
}

/// Delays the payload by a fixed duration before passing it along.
pub struct Throttle {
  name: String,
  delay: Duration,
}

impl Throttle {
  pub fn new(name: impl Into<String>, delay: Duration) -> Self {
    Self {
      name: name.into(),
      delay,
    }
  }
}

#[async_trait]
impl Interceptor for Throttle {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    InterceptorResult::Delayed(self.delay, data)
  }
}

/// Dispatches to one of two interceptors based on a context predicate.
pub struct Conditional {
  name: String,
  predicate: Box<dyn Fn(&MiddlewareContext) -> bool + Send + Sync>,
  when_true: Arc<dyn Interceptor>,
  when_false: Arc<dyn Interceptor>,
}

impl Conditional {
  pub fn new(
    name: impl Into<String>,
    predicate: impl Fn(&MiddlewareContext) -> bool + Send + Sync + 'static,
    when_true: Arc<dyn Interceptor>,
    when_false: Arc<dyn Interceptor>,
  ) -> Self {
    Self {
      name: name.into(),
      predicate: Box::new(predicate),
      when_true,
      when_false,
    }
  }
}

#[async_trait]
impl Interceptor for Conditional {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, ctx: &mut MiddlewareContext) -> InterceptorResult {
    if (self.predicate)(ctx) {
      self.when_true.intercept(data, ctx).await
    } else {
      self.when_false.intercept(data, ctx).await
    }
  }
}

type SignFuture = Pin<Box<dyn Future<Output = Bytes> + Send>>;

/// Appends an asynchronously computed signature to the payload.
pub struct Signature {
  name: String,
  sign: Arc<dyn Fn(Bytes) -> SignFuture + Send + Sync>,
}

impl Signature {
  pub fn new(
    name: impl Into<String>,
    sign: impl Fn(Bytes) -> SignFuture + Send + Sync + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      sign: Arc::new(sign),
    }
  }
}

#[async_trait]
impl Interceptor for Signature {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    let signature = (self.sign)(data.clone()).await;
    let mut signed = Vec::with_capacity(data.len() + signature.len());
    signed.extend_from_slice(&data);
    signed.extend_from_slice(&signature);
    InterceptorResult::Passthrough(Bytes::from(signed))
  }
}

/// Rejects payloads whose trailing `signature_len` bytes don't match the
/// expected signature over the rest of the payload.
pub struct Verify {
  name: String,
  signature_len: usize,
  verify: Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>,
}

impl Verify {
  pub fn new(
    name: impl Into<String>,
    signature_len: usize,
    verify: impl Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      signature_len,
      verify: Arc::new(verify),
    }
  }
}

#[async_trait]
impl Interceptor for Verify {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    if data.len() < self.signature_len {
      return InterceptorResult::Rejected("payload shorter than expected signature".into());
    }
    let split = data.len() - self.signature_len;
    let (body, signature) = data.split_at(split);
    if (self.verify)(body, signature) {
      InterceptorResult::Passthrough(Bytes::copy_from_slice(body))
    } else {
      InterceptorResult::Rejected("signature mismatch".into())
    }
  }
}

/// Records retry hints in metadata for a downstream caller to act on,
/// based on a pluggable policy over the payload it just saw. Never rejects
/// or transforms the payload itself — it only annotates `ctx.metadata`
/// with `retry.should_retry` and, when the policy supplies one,
/// `retry.delay_ms` (spec §4.5's "Retry-marker").
pub struct RetryMarker {
  name: String,
  policy: Arc<dyn Fn(&[u8]) -> Option<Duration> + Send + Sync>,
}

impl RetryMarker {
  pub fn new(
    name: impl Into<String>,
    policy: impl Fn(&[u8]) -> Option<Duration> + Send + Sync + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      policy: Arc::new(policy),
    }
  }
}

#[async_trait]
impl Interceptor for RetryMarker {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    let mut metadata = HashMap::new();
    match (self.policy)(&data) {
      Some(delay) => {
        metadata.insert("retry.should_retry".to_string(), "true".to_string());
        metadata.insert(
          "retry.delay_ms".to_string(),
          delay.as_millis().to_string(),
        );
      }
      None => {
        metadata.insert("retry.should_retry".to_string(), "false".to_string());
      }
    }
    InterceptorResult::Modified(data, metadata)
  }
}

/// Parses the payload with a pluggable parse function and stores the
/// result under `ctx.metadata["parsed"]` for downstream interceptors;
/// rejects the chain if parsing fails (spec §4.5's "Parser").
pub struct Parser {
  name: String,
  parse: Arc<dyn Fn(&[u8]) -> Result<String, String> + Send + Sync>,
}

impl Parser {
  pub fn new(
    name: impl Into<String>,
    parse: impl Fn(&[u8]) -> Result<String, String> + Send + Sync + 'static,
  ) -> Self {
    Self {
      name: name.into(),
      parse: Arc::new(parse),
    }
  }
}

#[async_trait]
impl Interceptor for Parser {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
    match (self.parse)(&data) {
      Ok(parsed) => {
        let mut metadata = HashMap::new();
        metadata.insert("parsed".to_string(), parsed);
        InterceptorResult::Modified(data, metadata)
      }
      Err(reason) => InterceptorResult::Rejected(reason),
    }
  }
}

/// Serves cached responses keyed by an application-provided, stable key
/// (`ctx.metadata["cache.key"]`). The key must not include a timestamp —
/// doing so would make every lookup miss (spec §9 Open Questions).
pub struct Cache {
  name: String,
  cache: Arc<CacheEngine>,
  ttl: Option<Duration>,
}

impl Cache {
  pub fn new(name: impl Into<String>, cache: Arc<CacheEngine>, ttl: Option<Duration>) -> Self {
    Self {
      name: name.into(),
      cache,
      ttl,
    }
  }
}

#[async_trait]
impl Interceptor for Cache {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, ctx: &mut MiddlewareContext) -> InterceptorResult {
    let Some(key) = ctx.metadata.get("cache.key").cloned() else {
      return InterceptorResult::Passthrough(data);
    };
    if let Some(entry) = self.cache.get(&key) {
      let mut metadata = HashMap::new();
      metadata.insert("cache.hit".to_string(), "true".to_string());
      return InterceptorResult::Modified(entry.data, metadata);
    }
    self.cache.set(key, data.clone(), self.ttl);
    InterceptorResult::Passthrough(data)
  }
}

/// Rejects a response whose `response.timestamp` metadata is more than
/// `max_age` past the paired request's `request.timestamp`.
pub struct TimeoutCheck {
  name: String,
  max_age: Duration,
}

impl TimeoutCheck {
  pub fn new(name: impl Into<String>, max_age: Duration) -> Self {
    Self {
      name: name.into(),
      max_age,
    }
  }
}

#[async_trait]
impl Interceptor for TimeoutCheck {
  fn name(&self) -> &str {
    &self.name
  }

  async fn intercept(&self, data: Bytes, ctx: &mut MiddlewareContext) -> InterceptorResult {
    let request_ts = ctx.metadata.get("request.timestamp").and_then(|s| s.parse::<f64>().ok());
    let response_ts = ctx.metadata.get("response.timestamp").and_then(|s| s.parse::<f64>().ok());
    match (request_ts, response_ts) {
      (Some(req), Some(resp)) if resp - req > self.max_age.as_secs_f64() => {
        InterceptorResult::Rejected("response exceeded max age".into())
      }
      _ => InterceptorResult::Passthrough(data),
    }
  }
}

/// Adapts an [`InterceptorChain`] to run as a single [`Middleware`] stage
/// inside a [`crate::middleware::MiddlewarePipeline`].
pub struct InterceptorMiddleware {
  name: String,
  priority: i32,
  chain: InterceptorChain,
}

impl InterceptorMiddleware {
  pub fn new(name: impl Into<String>, priority: i32, chain: InterceptorChain) -> Self {
    Self {
      name: name.into(),
      priority,
      chain,
    }
  }
}

#[async_trait]
impl Middleware for InterceptorMiddleware {
  fn name(&self) -> &str {
    &self.name
  }

  fn priority(&self) -> i32 {
    self.priority
  }

  async fn handle_outgoing(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    self
      .chain
      .run_request(data, ctx)
      .await
      .map_err(|e| MiddlewareError::new(&self.name, e))
  }

  async fn handle_incoming(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    self
      .chain
      .run_response(data, ctx)
      .await
      .map_err(|e| MiddlewareError::new(&self.name, e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::strategy::Lru;
  use crate::cache::CacheConfig;
  use crate::transport::Endpoint;

  fn ctx() -> MiddlewareContext {
    MiddlewareContext::new("c1", Endpoint::WebSocket { url: "ws://x".into() })
  }

  #[tokio::test]
  async fn validation_rejects_oversized_payload() {
    let validation = Validation::new("size", 0, 4);
    let mut c = ctx();
    let result = validation.intercept(Bytes::from_static(b"toolong"), &mut c).await;
    assert!(matches!(result, InterceptorResult::Rejected(_)));
  }

  #[tokio::test]
  async fn transform_applies_function() {
    let transform = Transform::new("upper", |data: Bytes| Bytes::from(data.to_ascii_uppercase()));
    let mut c = ctx();
    let result = transform.intercept(Bytes::from_static(b"ab"), &mut c).await;
    match result {
      InterceptorResult::Passthrough(data) => assert_eq!(data.as_ref(), b"AB"),
      _ => panic!("expected passthrough"),
    }
  }

  #[tokio::test]
  async fn verify_rejects_on_signature_mismatch() {
    let verify = Verify::new("verify", 1, |body, sig| sig == [body.len() as u8]);
    let mut c = ctx();
    let good = verify.intercept(Bytes::from_static(&[1, 2, 3, 3]), &mut c).await;
    assert!(matches!(good, InterceptorResult::Passthrough(_)));
    let bad = verify.intercept(Bytes::from_static(&[1, 2, 3, 9]), &mut c).await;
    assert!(matches!(bad, InterceptorResult::Rejected(_)));
  }

  #[tokio::test]
  async fn cache_interceptor_serves_second_lookup_from_cache() {
    let cache = Arc::new(CacheEngine::new(CacheConfig::default(), Arc::new(Lru)));
    let interceptor = Cache::new("cache", cache, None);
    let mut c = ctx();
    c.metadata.insert("cache.key".to_string(), "k".to_string());

    let first = interceptor.intercept(Bytes::from_static(b"first"), &mut c).await;
    assert!(matches!(first, InterceptorResult::Passthrough(_)));

    let second = interceptor.intercept(Bytes::from_static(b"second"), &mut c).await;
    match second {
      InterceptorResult::Modified(data, metadata) => {
        assert_eq!(data.as_ref(), b"first");
        assert_eq!(metadata.get("cache.hit").map(String::as_str), Some("true"));
      }
      _ => panic!("expected cache hit"),
    }
  }

  #[tokio::test]
  async fn retry_marker_annotates_metadata() {
    let marker = RetryMarker::new("retry", |data: &[u8]| {
      if data == b"fail" {
        Some(Duration::from_millis(250))
      } else {
        None
      }
    });
    let mut c = ctx();
    let result = marker.intercept(Bytes::from_static(b"fail"), &mut c).await;
    match result {
      InterceptorResult::Modified(_, metadata) => {
        assert_eq!(metadata.get("retry.should_retry").map(String::as_str), Some("true"));
        assert_eq!(metadata.get("retry.delay_ms").map(String::as_str), Some("250"));
      }
      _ => panic!("expected modified"),
    }
  }

  #[tokio::test]
  async fn parser_rejects_on_failure() {
    let parser = Parser::new("parser", |data: &[u8]| {
      std::str::from_utf8(data)
        .map(|s| s.to_string())
        .map_err(|e| e.to_string())
    });
    let mut c = ctx();
    let ok = parser.intercept(Bytes::from_static(b"hello"), &mut c).await;
    match ok {
      InterceptorResult::Modified(_, metadata) => {
        assert_eq!(metadata.get("parsed").map(String::as_str), Some("hello"));
      }
      _ => panic!("expected modified"),
    }
    let bad = parser.intercept(Bytes::from_static(&[0xff, 0xfe]), &mut c).await;
    assert!(matches!(bad, InterceptorResult::Rejected(_)));
  }

  #[tokio::test]
  async fn timeout_check_rejects_stale_response() {
    let check = TimeoutCheck::new("timeout", Duration::from_secs(1));
    let mut c = ctx();
    c.metadata.insert("request.timestamp".to_string(), "100.0".to_string());
    c.metadata.insert("response.timestamp".to_string(), "102.0".to_string());
    let result = check.intercept(Bytes::from_static(b"x"), &mut c).await;
    assert!(matches!(result, InterceptorResult::Rejected(_)));
  }

  #[tokio::test]
  async fn interceptor_middleware_runs_request_chain() {
    let mut chain = InterceptorChain::new();
    chain.add_request(Arc::new(Validation::new("size", 0, 10)));
    let middleware = InterceptorMiddleware::new("interceptors", 0, chain);
    let mut c = ctx();
    let out = middleware
      .handle_outgoing(Bytes::from_static(b"ok"), &mut c)
      .await
      .unwrap();
    assert_eq!(out.as_ref(), b"ok");
  }
}
