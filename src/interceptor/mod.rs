//! Request/response interceptor chains (spec §4.5). Composes as a single
//! middleware from the pipeline's point of view via
//! [`crate::interceptor::builtins::InterceptorMiddleware`].

pub mod builtins;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::middleware::MiddlewareContext;

#[derive(Debug, Clone)]
pub enum InterceptorResult {
  Passthrough(Bytes),
  Modified(Bytes, HashMap<String, String>),
  Rejected(String),
  Delayed(Duration, Bytes),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InterceptorError {
  #[error("request rejected: {0}")]
  RequestRejected(String),
  #[error("response rejected: {0}")]
  ResponseRejected(String),
  #[error("interceptor chain timed out")]
  Timeout,
  #[error("invalid interceptor result: {0}")]
  Invalid(String),
}

/// One stage of a request or response chain. Each interceptor runs to
/// completion before the next begins — there is no parallelism within a
/// single chain traversal (spec §4.5).
#[async_trait]
pub trait Interceptor: Send + Sync {
  fn name(&self) -> &str;

  async fn intercept(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> InterceptorResult;
}

/// Two ordered sequences: request interceptors run on outgoing data,
/// response interceptors run on incoming data.
#[derive(Default)]
pub struct InterceptorChain {
  request: Vec<Arc<dyn Interceptor>>,
  response: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
  pub fn new() -> Self {
    Self {
      request: Vec::new(),
      response: Vec::new(),
    }
  }

  pub fn add_request(&mut self, interceptor: Arc<dyn Interceptor>) {
    self.request.push(interceptor);
  }

  pub fn add_response(&mut self, interceptor: Arc<dyn Interceptor>) {
    self.response.push(interceptor);
  }

  pub async fn run_request(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, InterceptorError> {
    Self::run(&self.request, data, ctx, true).await
  }

  pub async fn run_response(
    &self,
    data: Bytes,
    ctx: &mut MiddlewareContext,
  ) -> Result<Bytes, InterceptorError> {
    Self::run(&self.response, data, ctx, false).await
  }

  async fn run(
    chain: &[Arc<dyn Interceptor>],
    mut data: Bytes,
    ctx: &mut MiddlewareContext,
    is_request: bool,
  ) -> Result<Bytes, InterceptorError> {
    for interceptor in chain {
      match interceptor.intercept(data, ctx).await {
        InterceptorResult::Passthrough(d) => data = d,
        InterceptorResult::Modified(d, metadata) => {
          ctx.metadata.extend(metadata);
          data = d;
        }
        InterceptorResult::Rejected(reason) => {
          return Err(if is_request {
            InterceptorError::RequestRejected(reason)
          } else {
            InterceptorError::ResponseRejected(reason)
          });
        }
        InterceptorResult::Delayed(duration, d) => {
          tokio::time::sleep(duration).await;
          data = d;
        }
      }
    }
    Ok(data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::transport::Endpoint;

  struct Upper;

  #[async_trait]
  impl Interceptor for Upper {
    fn name(&self) -> &str {
      "upper"
    }
    async fn intercept(&self, data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
      InterceptorResult::Passthrough(Bytes::from(data.to_ascii_uppercase()))
    }
  }

  struct AlwaysReject;

  #[async_trait]
  impl Interceptor for AlwaysReject {
    fn name(&self) -> &str {
      "reject"
    }
    async fn intercept(&self, _data: Bytes, _ctx: &mut MiddlewareContext) -> InterceptorResult {
      InterceptorResult::Rejected("nope".into())
    }
  }

  fn ctx() -> MiddlewareContext {
    MiddlewareContext::new("c1", Endpoint::WebSocket { url: "ws://x".into() })
  }

  #[tokio::test]
  async fn chain_applies_interceptors_in_order() {
    let mut chain = InterceptorChain::new();
    chain.add_request(Arc::new(Upper));
    let mut c = ctx();
    let out = chain.run_request(Bytes::from_static(b"ab"), &mut c).await.unwrap();
    assert_eq!(out.as_ref(), b"AB");
  }

  #[tokio::test]
  async fn rejection_aborts_the_chain() {
    let mut chain = InterceptorChain::new();
    chain.add_request(Arc::new(AlwaysReject));
    chain.add_request(Arc::new(Upper));
    let mut c = ctx();
    let err = chain
      .run_request(Bytes::from_static(b"ab"), &mut c)
      .await
      .unwrap_err();
    assert_eq!(err, InterceptorError::RequestRejected("nope".into()));
  }
}
