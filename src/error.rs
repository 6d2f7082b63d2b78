//! Low-level error taxonomy: frame codec, handshake and assembler errors.
//!
//! These are the "ring 1" errors of the design (spec §7). They carry no
//! opinion about recoverability; [`crate::resilience::error_classifier`]
//! maps them onto a [`crate::resilience::ErrorClassification`] before they
//! reach application code.

use thiserror::Error;

/// Errors produced by [`crate::frame`]'s encode/decode pair.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
  /// The buffer did not contain a complete frame. The caller should read
  /// more bytes and retry; no assumption may be made about how many bytes
  /// of the buffer were consumed.
  #[error("incomplete frame, need more bytes")]
  IncompleteFrame,

  #[error("invalid opcode {0:#x}")]
  InvalidOpcode(u8),

  #[error("invalid mask key")]
  InvalidMaskKey,

  #[error("control frame payload exceeds 125 bytes")]
  ControlFrameTooLarge,

  #[error("control frames must not be fragmented")]
  FragmentedControlFrame,

  #[error("reserved bits set without a negotiated extension")]
  ReservedBitsNotZero,

  #[error("text payload is not valid UTF-8")]
  InvalidUtf8Text,

  #[error("invalid close code {0}")]
  InvalidCloseCode(u16),

  #[error("frame payload of {0} bytes exceeds the configured maximum")]
  FrameTooLarge(usize),
}

/// Errors from [`crate::fragment::MessageAssembler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblerError {
  #[error("received a data frame while a message was already in progress")]
  UnexpectedDataFrame,

  #[error("received a continuation frame with no message in progress")]
  UnexpectedContinuationFrame,

  #[error("permessage-deflate inflate failed")]
  DecompressionFailed,

  #[error(transparent)]
  Frame(#[from] FrameError),
}

/// Errors from [`crate::handshake`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
  #[error("server responded with status {0}, expected 101")]
  UnexpectedStatus(u16),

  #[error("missing or invalid Upgrade header")]
  InvalidUpgradeHeader,

  #[error("missing or invalid Connection header")]
  InvalidConnectionHeader,

  #[error("Sec-WebSocket-Accept did not match the expected value")]
  InvalidAcceptKey,

  #[error("malformed HTTP response during handshake: {0}")]
  MalformedResponse(String),

  #[error("handshake response was incomplete")]
  Incomplete,
}

/// Umbrella error returned by the public connection-facing APIs once a
/// lower-ring error has been classified. Kept separate from
/// [`crate::resilience::ErrorClassification`] itself so call sites can still
/// match on the concrete cause.
#[derive(Debug, Error)]
pub enum WebSocketError {
  #[error(transparent)]
  Frame(#[from] FrameError),

  #[error(transparent)]
  Assembler(#[from] AssemblerError),

  #[error(transparent)]
  Handshake(#[from] HandshakeError),

  #[error("connection is closed")]
  ConnectionClosed,

  #[error("i/o error: {0}")]
  Io(String),
}
