//! Maps any transport/domain error onto a classification tuple (spec §4.8).
//! Resilience components consult only the classification, never the raw
//! error type (spec §7).

use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverability {
  Recoverable,
  Transient,
  Permanent,
  Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
  Trace,
  Debug,
  Info,
  Warning,
  Error,
  Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  Network,
  Connection,
  Authentication,
  Protocol,
  Timeout,
  ResourceLimit,
  Configuration,
  Unknown,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
  pub recoverability: Recoverability,
  pub severity: Severity,
  pub category: Category,
  pub should_retry: bool,
  pub suggested_retry_delay: Option<Duration>,
  pub should_trigger_breaker: bool,
  pub should_alert: bool,
  pub description: String,
}

/// Domain-level errors this classifier recognizes, beyond the raw
/// [`TransportError`] the excluded transport layer can surface. Includes
/// the handshake/protocol/auth cases named in spec §4.8 that don't map
/// cleanly onto a transport failure.
#[derive(Debug, Clone)]
pub enum ClassifiableError {
  Transport(TransportError),
  AuthenticationFailed,
  InvalidCredentials,
  HeartbeatTimeout,
  ProtocolError(String),
  InvalidMessage(String),
  BufferOverflow,
  Cancelled,
}

fn classification(
  recoverability: Recoverability,
  severity: Severity,
  category: Category,
  should_retry: bool,
  retry_delay: Option<Duration>,
  should_trigger_breaker: bool,
  should_alert: bool,
  description: &str,
) -> ErrorClassification {
  ErrorClassification {
    recoverability,
    severity,
    category,
    should_retry,
    suggested_retry_delay: retry_delay,
    should_trigger_breaker,
    should_alert,
    description: description.to_string(),
  }
}

/// The built-in classification table (spec §4.8). Pure function: no shared
/// state, callable from any task.
pub fn classify(error: &ClassifiableError) -> ErrorClassification {
  use Category::*;
  use Recoverability::*;
  use Severity::*;

  match error {
    ClassifiableError::Transport(TransportError::NetworkUnreachable) => classification(
      Transient, Warning, Network, true, Some(Duration::from_millis(500)), false, false,
      "network unreachable",
    ),
    ClassifiableError::Transport(TransportError::ConnectionReset) => classification(
      Recoverable, Warning, Connection, true, Some(Duration::from_millis(500)), true, false,
      "connection reset by peer",
    ),
    ClassifiableError::Transport(TransportError::BrokenPipe) => classification(
      Recoverable, Warning, Connection, true, Some(Duration::from_millis(500)), true, false,
      "broken pipe",
    ),
    ClassifiableError::Transport(TransportError::ConnectionRefused) => classification(
      Recoverable, Warning, Connection, true, Some(Duration::from_secs(1)), true, false,
      "connection refused",
    ),
    ClassifiableError::Transport(TransportError::ConnectTimeout) => classification(
      Recoverable, Warning, Connection, true, Some(Duration::from_secs(1)), true, false,
      "connection attempt timed out",
    ),
    ClassifiableError::Transport(TransportError::RequestTimeout) => classification(
      Transient, Warning, Timeout, true, Some(Duration::from_secs(1)), true, false,
      "request timed out",
    ),
    ClassifiableError::Transport(TransportError::DnsFailure(_)) => classification(
      Recoverable, Warning, Network, true, Some(Duration::from_secs(2)), true, false,
      "dns resolution failed",
    ),
    ClassifiableError::Transport(TransportError::Tls(_)) => classification(
      Permanent, Error, Configuration, false, None, false, true,
      "tls handshake failed",
    ),
    ClassifiableError::Transport(TransportError::Cancelled) => classification(
      Permanent, Info, Unknown, false, None, false, false,
      "operation cancelled",
    ),
    ClassifiableError::Transport(TransportError::Io(_)) => classification(
      Transient, Warning, Network, true, Some(Duration::from_millis(500)), false, false,
      "transport i/o error",
    ),
    ClassifiableError::AuthenticationFailed | ClassifiableError::InvalidCredentials => {
      classification(
        Permanent, Error, Authentication, false, None, false, true,
        "authentication failed",
      )
    }
    ClassifiableError::HeartbeatTimeout => classification(
      Transient, Warning, Timeout, true, Some(Duration::from_secs(1)), true, false,
      "heartbeat timed out",
    ),
    ClassifiableError::ProtocolError(msg) | ClassifiableError::InvalidMessage(msg) => {
      classification(
        Permanent,
        Error,
        Protocol,
        false,
        None,
        false,
        false,
        &format!("protocol error: {msg}"),
      )
    }
    ClassifiableError::BufferOverflow => classification(
      Transient, Warning, ResourceLimit, true, Some(Duration::from_millis(200)), false, false,
      "buffer overflow",
    ),
    ClassifiableError::Cancelled => classification(
      Permanent, Info, Unknown, false, None, false, false, "operation cancelled",
    ),
  }
}

/// A pluggable classifier an application may register ahead of the default
/// table.
pub trait CustomClassifier: Send + Sync {
  fn classify(&self, error: &ClassifiableError) -> Option<ErrorClassification>;
}

/// Consults an ordered list of custom classifiers first; the first one
/// that returns `Some` wins, otherwise falls back to [`classify`] (spec
/// §4.8).
#[derive(Default)]
pub struct CompositeClassifier {
  custom: Vec<Box<dyn CustomClassifier>>,
}

impl CompositeClassifier {
  pub fn new() -> Self {
    Self { custom: Vec::new() }
  }

  pub fn register(&mut self, classifier: Box<dyn CustomClassifier>) {
    self.custom.push(classifier);
  }

  pub fn classify(&self, error: &ClassifiableError) -> ErrorClassification {
    for classifier in &self.custom {
      if let Some(result) = classifier.classify(error) {
        return result;
      }
    }
    classify(error)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auth_failure_is_permanent_and_alerts() {
    let c = classify(&ClassifiableError::AuthenticationFailed);
    assert_eq!(c.recoverability, Recoverability::Permanent);
    assert!(!c.should_retry);
    assert!(c.should_alert);
  }

  #[test]
  fn connect_timeout_is_recoverable_connection_and_trips_breaker() {
    let c = classify(&ClassifiableError::Transport(TransportError::ConnectTimeout));
    assert_eq!(c.recoverability, Recoverability::Recoverable);
    assert_eq!(c.category, Category::Connection);
    assert!(c.should_retry);
    assert!(c.should_trigger_breaker);
  }

  #[test]
  fn request_timeout_is_transient_timeout_and_trips_breaker() {
    let c = classify(&ClassifiableError::Transport(TransportError::RequestTimeout));
    assert_eq!(c.recoverability, Recoverability::Transient);
    assert_eq!(c.category, Category::Timeout);
    assert!(c.should_retry);
    assert!(c.should_trigger_breaker);
  }

  #[test]
  fn cancellation_is_permanent_unknown_no_retry() {
    let c = classify(&ClassifiableError::Cancelled);
    assert_eq!(c.recoverability, Recoverability::Permanent);
    assert_eq!(c.category, Category::Unknown);
    assert!(!c.should_retry);
  }

  struct AlwaysNetwork;
  impl CustomClassifier for AlwaysNetwork {
    fn classify(&self, _error: &ClassifiableError) -> Option<ErrorClassification> {
      Some(classification(
        Recoverability::Transient,
        Severity::Info,
        Category::Network,
        true,
        None,
        false,
        false,
        "overridden",
      ))
    }
  }

  #[test]
  fn composite_prefers_custom_classifier() {
    let mut composite = CompositeClassifier::new();
    composite.register(Box::new(AlwaysNetwork));
    let result = composite.classify(&ClassifiableError::AuthenticationFailed);
    assert_eq!(result.description, "overridden");
  }
}
