//! Per-connection orchestration: wires the frame codec, message
//! assembler, middleware pipeline, circuit breaker and heartbeat manager
//! around a single [`Connection`] (spec §3, §5).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::frame::{self, OpCode, WebSocketFrame};
use crate::fragment::{AssembledOutput, MessageAssembler};
use crate::middleware::{Middleware, MiddlewareContext, MiddlewareError, MiddlewarePipeline};
use crate::resilience::circuit_breaker::{BreakerOutcome, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::heartbeat::{HeartbeatConfig, HeartbeatManager, HeartbeatTransport};
use crate::transport::{Connection, ConnectionState, DisconnectReason, Endpoint, TransportError};

#[derive(Debug, Error)]
pub enum ConnectionError {
  #[error(transparent)]
  Transport(#[from] TransportError),
  #[error(transparent)]
  Frame(#[from] crate::error::FrameError),
  #[error(transparent)]
  Assembler(#[from] crate::error::AssemblerError),
  #[error(transparent)]
  Middleware(#[from] MiddlewareError),
  #[error("circuit breaker rejected the call: {0}")]
  BreakerOpen(String),
  #[error("connection is not in a writable state: {0:?}")]
  NotWritable(ConnectionState),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
  pub max_payload_size: usize,
  pub heartbeat: HeartbeatConfig,
  pub circuit_breaker: CircuitBreakerConfig,
  /// Whether large frames are written as a separate header/payload pair
  /// instead of being copied into the reused write buffer (the teacher's
  /// `set_writev`).
  pub vectored: bool,
  /// Payload size above which `vectored` (if enabled) kicks in (the
  /// teacher's `writev_threshold`, default 1024 matches it).
  pub writev_threshold: usize,
}

impl Default for ConnectionConfig {
  fn default() -> Self {
    Self {
      max_payload_size: 16 * 1024 * 1024,
      heartbeat: HeartbeatConfig::default(),
      circuit_breaker: CircuitBreakerConfig::default(),
      vectored: true,
      writev_threshold: 1024,
    }
  }
}

/// Bridges [`HeartbeatManager`]'s probe bytes onto the WebSocket transport
/// as Ping frames.
struct PingTransport<C> {
  transport: Arc<C>,
}

#[async_trait]
impl<C> HeartbeatTransport for PingTransport<C>
where
  C: Connection + 'static,
{
  async fn send_probe(&self, probe: Vec<u8>) -> Result<(), String> {
    let frame = WebSocketFrame::ping(probe);
    let encoded = frame::encode(&frame);
    self
      .transport
      .send(&encoded, None)
      .await
      .map_err(|e| e.to_string())
  }
}

/// One side of a live WebSocket connection: owns the frame codec state,
/// the message assembler, the middleware pipeline and the resilience
/// components layered around `transport`. All of its mutable state is
/// single-writer, matching the actor model in spec §5 — callers must not
/// call `poll_message` concurrently from more than one task.
pub struct ConnectionShell<C: Connection + 'static> {
  transport: Arc<C>,
  endpoint: Endpoint,
  connection_id: String,
  config: ConnectionConfig,
  pipeline: MiddlewarePipeline,
  breaker: Arc<CircuitBreaker>,
  heartbeat: Arc<HeartbeatManager>,
  assembler: Mutex<MessageAssembler>,
  read_buf: Mutex<Vec<u8>>,
  /// Reused across non-vectored sends, mirroring the teacher's
  /// `WriteHalf::write_buffer` (`lib.rs`'s `Vec::with_capacity(2)`).
  write_buffer: Mutex<BytesMut>,
}

impl<C: Connection + 'static> ConnectionShell<C> {
  pub fn new(
    connection_id: impl Into<String>,
    endpoint: Endpoint,
    transport: Arc<C>,
    pipeline: MiddlewarePipeline,
    config: ConnectionConfig,
  ) -> Self {
    let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));
    let heartbeat = Arc::new(HeartbeatManager::new(config.heartbeat.clone()));
    Self {
      transport,
      endpoint,
      connection_id: connection_id.into(),
      config,
      pipeline,
      breaker,
      heartbeat,
      assembler: Mutex::new(MessageAssembler::new()),
      read_buf: Mutex::new(Vec::new()),
      write_buffer: Mutex::new(BytesMut::with_capacity(16)),
    }
  }

  /// Starts a [`ConnectionShellBuilder`], matching the builder-style
  /// construction used across the pack for server/connection setup.
  pub fn builder() -> ConnectionShellBuilder<C> {
    ConnectionShellBuilder::new()
  }

  pub fn state(&self) -> ConnectionState {
    self.transport.state()
  }

  pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
    &self.breaker
  }

  pub fn heartbeat(&self) -> &Arc<HeartbeatManager> {
    &self.heartbeat
  }

  /// Consumes the shell and returns the underlying transport, mirroring the
  /// teacher's `WebSocket::into_inner`. The transport is held as `Arc<C>`
  /// rather than owned directly, since a running heartbeat manager may also
  /// be holding a clone of it; callers that need sole ownership should stop
  /// the heartbeat first and check `Arc::strong_count`.
  pub fn into_inner(self) -> Arc<C> {
    self.transport
  }

  fn ctx(&self) -> MiddlewareContext {
    MiddlewareContext::new(self.connection_id.clone(), self.endpoint.clone())
  }

  /// Starts the heartbeat manager against this connection's transport.
  pub fn start_heartbeat(&self) {
    self.heartbeat.start(Arc::new(PingTransport {
      transport: self.transport.clone(),
    }));
  }

  pub async fn send_text(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
    self.send_frame(WebSocketFrame::text(Bytes::from(text.into()))).await
  }

  pub async fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), ConnectionError> {
    self.send_frame(WebSocketFrame::binary(data.into())).await
  }

  pub async fn send_close(&self, code: u16, reason: &str) -> Result<(), ConnectionError> {
    self.send_frame(WebSocketFrame::close(code, reason)).await
  }

  async fn send_frame(&self, mut frame: WebSocketFrame) -> Result<(), ConnectionError> {
    let state = self.transport.state();
    if state != ConnectionState::Connected {
      return Err(ConnectionError::NotWritable(state));
    }

    let mut ctx = self.ctx();
    let payload = self
      .pipeline
      .run_outgoing(frame.payload.clone(), &mut ctx)
      .await?;
    frame.payload = payload;
    frame.mask_for_client();

    let transport = &self.transport;
    let result = if self.config.vectored && frame.payload.len() > self.config.writev_threshold {
      // Large payload: write the header and the masked payload as two
      // separate sends instead of copying the payload into the shared
      // write buffer (the teacher's `frame.writev(&mut write_half.stream)`
      // branch; `Connection::send` has no scatter-gather call of its own,
      // so two sends are the closest equivalent this trait boundary allows).
      let header = frame::encode_header(&frame);
      let payload = frame::mask_payload(&frame);
      self
        .breaker
        .execute(async move {
          transport.send(&header, None).await?;
          transport.send(&payload, None).await
        })
        .await
    } else {
      let encoded = {
        let mut buf = self.write_buffer.lock();
        buf.clear();
        frame::encode_into(&frame, &mut buf);
        buf.to_vec()
      };
      self
        .breaker
        .execute(async move { transport.send(&encoded, None).await })
        .await
    };

    result.map_err(|outcome| match outcome {
      BreakerOutcome::Breaker(e) => ConnectionError::BreakerOpen(e.to_string()),
      BreakerOutcome::Operation(e) => ConnectionError::Transport(e),
    })
  }

  /// Reads one assembled message (or close) off the wire, automatically
  /// answering Pings with Pongs and feeding Pongs to the heartbeat
  /// manager. Returns `Ok(None)` when a control frame was fully handled
  /// internally and the caller should poll again.
  pub async fn poll_message(&self) -> Result<Option<AssembledOutput>, ConnectionError> {
    loop {
      if let Some(output) = self.try_decode_buffered().await? {
        return Ok(Some(output));
      }

      let chunk = self.transport.receive(None).await?;
      if chunk.is_empty() {
        debug!(connection_id = %self.connection_id, "peer closed the connection");
        self.transport.disconnect(DisconnectReason::RemoteClosed);
        return Ok(None);
      }
      self.read_buf.lock().extend_from_slice(&chunk);
    }
  }

  async fn try_decode_buffered(&self) -> Result<Option<AssembledOutput>, ConnectionError> {
    loop {
      let next_frame = {
        let mut buf = self.read_buf.lock();
        let decoded = frame::decode_with_limit(&buf, self.config.max_payload_size);
        match decoded {
          Ok((frame, consumed)) => {
            buf.drain(..consumed);
            frame
          }
          Err(crate::error::FrameError::IncompleteFrame) => return Ok(None),
          Err(e) => return Err(e.into()),
        }
      };

      match next_frame.opcode {
        OpCode::Ping => {
          let pong = WebSocketFrame::pong(next_frame.payload);
          let encoded = frame::encode(&pong);
          if let Err(e) = self.transport.send(&encoded, None).await {
            warn!(connection_id = %self.connection_id, error = %e, "failed to answer ping");
          }
          continue;
        }
        OpCode::Pong => {
          self.heartbeat.record_response();
          continue;
        }
        _ => {}
      }

      let output = self.assembler.lock().process_frame(next_frame)?;
      if let Some(output) = output {
        return Ok(Some(output));
      }
    }
  }
}

/// Builds a [`ConnectionShell`] one field at a time, matching the
/// builder-style construction `maker_web::Server::builder()` uses for
/// server/connection setup in the example pack.
pub struct ConnectionShellBuilder<C: Connection + 'static> {
  connection_id: Option<String>,
  endpoint: Option<Endpoint>,
  transport: Option<Arc<C>>,
  pipeline: MiddlewarePipeline,
  config: ConnectionConfig,
}

impl<C: Connection + 'static> Default for ConnectionShellBuilder<C> {
  fn default() -> Self {
    Self {
      connection_id: None,
      endpoint: None,
      transport: None,
      pipeline: MiddlewarePipeline::new(),
      config: ConnectionConfig::default(),
    }
  }
}

impl<C: Connection + 'static> ConnectionShellBuilder<C> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn connection_id(mut self, connection_id: impl Into<String>) -> Self {
    self.connection_id = Some(connection_id.into());
    self
  }

  pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
    self.endpoint = Some(endpoint);
    self
  }

  pub fn transport(mut self, transport: Arc<C>) -> Self {
    self.transport = Some(transport);
    self
  }

  pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
    self.pipeline.add(middleware);
    self
  }

  pub fn config(mut self, config: ConnectionConfig) -> Self {
    self.config = config;
    self
  }

  /// Builds the shell.
  ///
  /// # Panics
  ///
  /// Panics if `connection_id`, `endpoint` or `transport` were never set —
  /// these have no sensible default.
  pub fn build(self) -> ConnectionShell<C> {
    let connection_id = self
      .connection_id
      .expect("ConnectionShellBuilder requires connection_id(..)");
    let endpoint = self
      .endpoint
      .expect("ConnectionShellBuilder requires endpoint(..)");
    let transport = self
      .transport
      .expect("ConnectionShellBuilder requires transport(..)");
    ConnectionShell::new(connection_id, endpoint, transport, self.pipeline, self.config)
  }
}
