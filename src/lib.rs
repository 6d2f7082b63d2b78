//! NexusKit: a transport-agnostic client-side networking toolkit.
//!
//! The crate is organized around a small codec core (RFC 6455 framing,
//! fragmentation, handshake) wrapped by an extensible pipeline
//! ([`middleware`], [`interceptor`]) and a resilience engine
//! ([`resilience`], [`cache`]). [`connection::ConnectionShell`] ties all
//! of it together around an application-supplied [`transport::Connection`].
//!
//! Byte-level I/O is out of scope: NexusKit consumes whatever transport
//! the application provides and never opens a socket itself (spec §1).

pub mod cache;
pub mod close;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod interceptor;
pub mod mask;
pub mod middleware;
pub mod options;
pub mod resilience;
pub mod transport;

pub use close::CloseCode;
pub use connection::{ConnectionConfig, ConnectionError, ConnectionShell, ConnectionShellBuilder};
pub use error::WebSocketError;
pub use fragment::{AssembledOutput, MessageAssembler, MessageType, WebSocketMessage};
pub use frame::{OpCode, WebSocketFrame};
pub use interceptor::{Interceptor, InterceptorChain, InterceptorResult};
pub use middleware::{Middleware, MiddlewareContext, MiddlewarePipeline};
pub use options::{OptionMap, OptionValue};
pub use transport::{Connection, ConnectionState, Endpoint, TlsConfig, TransportError};

#[cfg(test)]
mod tests {
  /// Every public type here must be `Send + Sync` so a `ConnectionShell`
  /// can be shared across the tasks that read and write it concurrently
  /// (spec §5).
  fn assert_send_sync<T: Send + Sync>() {}

  #[test]
  fn core_types_are_send_sync() {
    assert_send_sync::<crate::middleware::MiddlewarePipeline>();
    assert_send_sync::<crate::interceptor::InterceptorChain>();
    assert_send_sync::<crate::resilience::CircuitBreaker>();
    assert_send_sync::<crate::resilience::HeartbeatManager>();
    assert_send_sync::<crate::cache::CacheEngine>();
  }
}
