//! The transport capability this crate consumes (spec §1, §6). The actual
//! byte-level I/O is deliberately out of scope; only the interface matters.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Opaque, application-supplied TLS configuration. NexusKit never inspects
/// its contents — it is threaded straight through to the transport layer.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
  pub server_name: Option<String>,
  pub insecure_skip_verify: bool,
}

/// Immutable connection target, fixed at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
  Tcp { host: String, port: u16 },
  Tls { host: String, port: u16, tls: TlsConfigKey },
  WebSocket { url: String },
  Http { url: String },
}

/// [`TlsConfig`] doesn't implement `Eq` (floats/opaque blobs in richer
/// configs would break it); this newtype lets [`Endpoint`] stay comparable
/// by comparing only the fields that affect routing identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfigKey {
  pub server_name: Option<String>,
}

impl From<&TlsConfig> for TlsConfigKey {
  fn from(config: &TlsConfig) -> Self {
    Self {
      server_name: config.server_name.clone(),
    }
  }
}

/// Connection lifecycle state. Transitions are monotonic; only the
/// connection owner mutates this (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
  Idle,
  Connecting,
  Connected,
  Disconnecting,
  Disconnected,
  Failed,
}

impl ConnectionState {
  /// Whether `self -> next` is a legal monotonic transition.
  pub fn can_transition_to(self, next: ConnectionState) -> bool {
    use ConnectionState::*;
    matches!(
      (self, next),
      (Idle, Connecting)
        | (Connecting, Connected)
        | (Connecting, Failed)
        | (Connected, Disconnecting)
        | (Connected, Failed)
        | (Disconnecting, Disconnected)
        | (Failed, Idle)
        | (Disconnected, Idle)
    )
  }
}

/// Reason a connection was torn down, passed to [`Connection::disconnect`]
/// and to lifecycle callbacks.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
  Requested,
  Error(String),
  Timeout,
  RemoteClosed,
}

#[derive(Debug, Error)]
pub enum TransportError {
  /// The initial connect attempt didn't complete in time (spec §4.8's
  /// "connect-timeout"). Distinct from [`TransportError::RequestTimeout`]
  /// because the two carry different classifications.
  #[error("connection attempt timed out")]
  ConnectTimeout,
  /// A request/response round-trip on an already-established connection
  /// didn't complete in time (spec §4.8's "request-timeout").
  #[error("operation timed out")]
  RequestTimeout,
  #[error("connection reset by peer")]
  ConnectionReset,
  #[error("broken pipe")]
  BrokenPipe,
  #[error("connection refused")]
  ConnectionRefused,
  #[error("dns resolution failed: {0}")]
  DnsFailure(String),
  #[error("network unreachable")]
  NetworkUnreachable,
  #[error("tls error: {0}")]
  Tls(String),
  #[error("operation was cancelled")]
  Cancelled,
  #[error("io error: {0}")]
  Io(String),
}

/// The capability NexusKit consumes from the (excluded) transport layer.
/// Implementors own the actual socket; NexusKit only calls these four
/// methods.
#[async_trait]
pub trait Connection: Send + Sync {
  async fn send(&self, bytes: &[u8], timeout: Option<Duration>) -> Result<(), TransportError>;
  async fn receive(&self, timeout: Option<Duration>) -> Result<Vec<u8>, TransportError>;
  fn state(&self) -> ConnectionState;
  fn disconnect(&self, reason: DisconnectReason);
}
