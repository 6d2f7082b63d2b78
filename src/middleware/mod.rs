//! Ordered, priority-sorted middleware pipeline (spec §4.4).
//!
//! Outgoing traversal runs middlewares in ascending priority order;
//! incoming traversal runs the same chain in descending (LIFO) order, so
//! that a middleware which transforms outgoing bytes (e.g. encrypt) is
//! mirrored by its own incoming pass (decrypt) running last-in-first-out
//! relative to the rest of the chain.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::transport::Endpoint;

/// Per-traversal context threaded through every middleware invocation.
/// `metadata` is the inter-middleware / interceptor communication channel
/// (spec §4.4).
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
  pub connection_id: String,
  pub endpoint: Endpoint,
  pub timestamp: SystemTime,
  pub metadata: HashMap<String, String>,
}

impl MiddlewareContext {
  pub fn new(connection_id: impl Into<String>, endpoint: Endpoint) -> Self {
    Self {
      connection_id: connection_id.into(),
      endpoint,
      timestamp: SystemTime::now(),
      metadata: HashMap::new(),
    }
  }
}

#[derive(Debug, Error)]
#[error("middleware `{name}` failed: {cause}")]
pub struct MiddlewareError {
  pub name: String,
  pub cause: String,
}

impl MiddlewareError {
  pub fn new(name: impl Into<String>, cause: impl std::fmt::Display) -> Self {
    Self {
      name: name.into(),
      cause: cause.to_string(),
    }
  }
}

/// A single stage of the pipeline. Implementations may suspend (spec §5);
/// the pipeline invokes each middleware to completion before moving to the
/// next, never interleaving them.
#[async_trait]
pub trait Middleware: Send + Sync {
  fn name(&self) -> &str;

  /// Lower runs earlier on the outgoing path, later on the incoming path.
  fn priority(&self) -> i32;

  async fn handle_outgoing(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    let _ = ctx;
    Ok(data)
  }

  async fn handle_incoming(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    let _ = ctx;
    Ok(data)
  }

  async fn on_connect(&self, _ctx: &mut MiddlewareContext) {}
  async fn on_disconnect(&self, _ctx: &mut MiddlewareContext) {}

  /// Invoked with the triggering error before it propagates out of the
  /// pipeline.
  async fn on_error(&self, _error: &MiddlewareError, _ctx: &mut MiddlewareContext) {}
}

/// Ordered chain of middlewares, kept sorted by ascending priority.
#[derive(Default)]
pub struct MiddlewarePipeline {
  middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
  pub fn new() -> Self {
    Self {
      middlewares: Vec::new(),
    }
  }

  pub fn add(&mut self, middleware: Arc<dyn Middleware>) {
    let pos = self
      .middlewares
      .partition_point(|m| m.priority() <= middleware.priority());
    self.middlewares.insert(pos, middleware);
  }

  pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
    &self.middlewares
  }

  /// Ascending priority order.
  pub async fn run_outgoing(
    &self,
    mut data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    for middleware in self.middlewares.iter() {
      data = match middleware.handle_outgoing(data, ctx).await {
        Ok(d) => d,
        Err(err) => {
          middleware.on_error(&err, ctx).await;
          return Err(err);
        }
      };
    }
    Ok(data)
  }

  /// Descending (LIFO) priority order.
  pub async fn run_incoming(
    &self,
    mut data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    for middleware in self.middlewares.iter().rev() {
      data = match middleware.handle_incoming(data, ctx).await {
        Ok(d) => d,
        Err(err) => {
          middleware.on_error(&err, ctx).await;
          return Err(err);
        }
      };
    }
    Ok(data)
  }

  pub async fn on_connect(&self, ctx: &mut MiddlewareContext) {
    for middleware in self.middlewares.iter() {
      middleware.on_connect(ctx).await;
    }
  }

  pub async fn on_disconnect(&self, ctx: &mut MiddlewareContext) {
    for middleware in self.middlewares.iter().rev() {
      middleware.on_disconnect(ctx).await;
    }
  }
}

/// Wraps `inner` so both directions short-circuit to identity whenever
/// `predicate(ctx)` is false.
pub struct WhenMiddleware<P> {
  inner: Arc<dyn Middleware>,
  predicate: P,
}

impl<P> WhenMiddleware<P>
where
  P: Fn(&MiddlewareContext) -> bool + Send + Sync,
{
  pub fn new(inner: Arc<dyn Middleware>, predicate: P) -> Self {
    Self { inner, predicate }
  }
}

#[async_trait]
impl<P> Middleware for WhenMiddleware<P>
where
  P: Fn(&MiddlewareContext) -> bool + Send + Sync,
{
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn priority(&self) -> i32 {
    self.inner.priority()
  }

  async fn handle_outgoing(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    if (self.predicate)(ctx) {
      self.inner.handle_outgoing(data, ctx).await
    } else {
      Ok(data)
    }
  }

  async fn handle_incoming(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    if (self.predicate)(ctx) {
      self.inner.handle_incoming(data, ctx).await
    } else {
      Ok(data)
    }
  }

  async fn on_connect(&self, ctx: &mut MiddlewareContext) {
    if (self.predicate)(ctx) {
      self.inner.on_connect(ctx).await;
    }
  }

  async fn on_disconnect(&self, ctx: &mut MiddlewareContext) {
    if (self.predicate)(ctx) {
      self.inner.on_disconnect(ctx).await;
    }
  }

  async fn on_error(&self, error: &MiddlewareError, ctx: &mut MiddlewareContext) {
    self.inner.on_error(error, ctx).await;
  }
}

/// `compose(a, b)`: outgoing runs a then b; incoming runs b then a; the
/// composed priority is `min(a.priority, b.priority)` (spec §4.4).
pub struct ComposedMiddleware {
  name: String,
  priority: i32,
  a: Arc<dyn Middleware>,
  b: Arc<dyn Middleware>,
}

pub fn compose(a: Arc<dyn Middleware>, b: Arc<dyn Middleware>) -> ComposedMiddleware {
  let priority = a.priority().min(b.priority());
  let name = format!("{}+{}", a.name(), b.name());
  ComposedMiddleware { name, priority, a, b }
}

#[async_trait]
impl Middleware for ComposedMiddleware {
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
    let data = self.a.handle_outgoing(data, ctx).await?;
    self.b.handle_outgoing(data, ctx).await
  }

  async fn handle_incoming(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, MiddlewareError> {
    let data = self.b.handle_incoming(data, ctx).await?;
    self.a.handle_incoming(data, ctx).await
  }

  async fn on_connect(&self, ctx: &mut MiddlewareContext) {
    self.a.on_connect(ctx).await;
    self.b.on_connect(ctx).await;
  }

  async fn on_disconnect(&self, ctx: &mut MiddlewareContext) {
    self.b.on_disconnect(ctx).await;
    self.a.on_disconnect(ctx).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Upper;

  #[async_trait]
  impl Middleware for Upper {
    fn name(&self) -> &str {
      "upper"
    }
    fn priority(&self) -> i32 {
      10
    }
    async fn handle_outgoing(
      &self,
      data: Bytes,
      _ctx: &mut MiddlewareContext,
    ) -> Result<Bytes, MiddlewareError> {
      Ok(Bytes::from(data.to_ascii_uppercase()))
    }
    async fn handle_incoming(
      &self,
      data: Bytes,
      _ctx: &mut MiddlewareContext,
    ) -> Result<Bytes, MiddlewareError> {
      Ok(Bytes::from(data.to_ascii_lowercase()))
    }
  }

  struct Reverse;

  #[async_trait]
  impl Middleware for Reverse {
    fn name(&self) -> &str {
      "reverse"
    }
    fn priority(&self) -> i32 {
      20
    }
    async fn handle_outgoing(
      &self,
      data: Bytes,
      _ctx: &mut MiddlewareContext,
    ) -> Result<Bytes, MiddlewareError> {
      let mut v = data.to_vec();
      v.reverse();
      Ok(Bytes::from(v))
    }
    async fn handle_incoming(
      &self,
      data: Bytes,
      _ctx: &mut MiddlewareContext,
    ) -> Result<Bytes, MiddlewareError> {
      let mut v = data.to_vec();
      v.reverse();
      Ok(Bytes::from(v))
    }
  }

  fn ctx() -> MiddlewareContext {
    MiddlewareContext::new("c1", Endpoint::WebSocket { url: "ws://x".into() })
  }

  #[tokio::test]
  async fn empty_pipeline_is_identity() {
    let pipeline = MiddlewarePipeline::new();
    let mut c = ctx();
    let out = pipeline
      .run_outgoing(Bytes::from_static(b"hi"), &mut c)
      .await
      .unwrap();
    assert_eq!(out.as_ref(), b"hi");
  }

  #[tokio::test]
  async fn outgoing_ascending_incoming_descending() {
    let mut pipeline = MiddlewarePipeline::new();
    pipeline.add(Arc::new(Reverse));
    pipeline.add(Arc::new(Upper));

    let mut c = ctx();
    // outgoing: Upper (pri 10) then Reverse (pri 20): "ab" -> "AB" -> "BA"
    let out = pipeline
      .run_outgoing(Bytes::from_static(b"ab"), &mut c)
      .await
      .unwrap();
    assert_eq!(out.as_ref(), b"BA");

    // incoming: Reverse (pri 20) then Upper (pri 10, lowercases): "BA" -> "AB" -> "ab"
    let back = pipeline.run_incoming(out, &mut c).await.unwrap();
    assert_eq!(back.as_ref(), b"ab");
  }

  #[tokio::test]
  async fn when_short_circuits_to_identity() {
    let wrapped = WhenMiddleware::new(Arc::new(Upper), |_: &MiddlewareContext| false);
    let mut c = ctx();
    let out = wrapped
      .handle_outgoing(Bytes::from_static(b"ab"), &mut c)
      .await
      .unwrap();
    assert_eq!(out.as_ref(), b"ab");
  }

  #[tokio::test]
  async fn compose_priority_is_min() {
    let composed = compose(Arc::new(Upper), Arc::new(Reverse));
    assert_eq!(composed.priority(), 10);
  }
}
