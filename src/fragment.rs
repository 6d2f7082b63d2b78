//! Assembles fragmented frames into complete messages (spec §4.2).

use bytes::{Bytes, BytesMut};

use crate::close::CloseCode;
use crate::error::{AssemblerError, FrameError};
use crate::frame::{OpCode, WebSocketFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
  Text,
  Binary,
}

/// A complete, reassembled application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketMessage {
  pub kind: MessageType,
  pub data: Bytes,
  pub compressed: bool,
}

/// A control frame that slipped through the assembler untouched (Ping/Pong
/// return `None` from [`MessageAssembler::process_frame`] — the connection
/// layer handles those directly — but Close is surfaced as a message so
/// callers can read the close code/reason uniformly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseMessage {
  pub payload: Bytes,
}

pub enum AssembledOutput {
  Message(WebSocketMessage),
  Close(CloseMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InProgress {
  None,
  Text,
  Binary,
}

/// Single-writer actor: all operations on one assembler are serialized by
/// construction (owned exclusively by one [`crate::connection::ConnectionShell`]).
pub struct MessageAssembler {
  current: InProgress,
  fragments: BytesMut,
  compressed: bool,
}

impl Default for MessageAssembler {
  fn default() -> Self {
    Self::new()
  }
}

impl MessageAssembler {
  pub fn new() -> Self {
    Self {
      current: InProgress::None,
      fragments: BytesMut::new(),
      compressed: false,
    }
  }

  /// Clears in-progress fragmentation state. Called when the connection
  /// enters `Disconnected`.
  pub fn reset(&mut self) {
    self.current = InProgress::None;
    self.fragments.clear();
    self.compressed = false;
  }

  pub fn process_frame(
    &mut self,
    frame: WebSocketFrame,
  ) -> Result<Option<AssembledOutput>, AssemblerError> {
    if frame.opcode.is_control() {
      // Control frames pass through without disturbing an in-progress
      // fragmented data message; fin=true is already guaranteed by the
      // frame codec (FrameError::FragmentedControlFrame otherwise).
      return Ok(match frame.opcode {
        OpCode::Close => {
          Self::validate_close_code(&frame.payload)?;
          Some(AssembledOutput::Close(CloseMessage {
            payload: frame.payload,
          }))
        }
        OpCode::Ping | OpCode::Pong => None,
        _ => unreachable!("is_control() only covers Close/Ping/Pong"),
      });
    }

    match frame.opcode {
      OpCode::Text | OpCode::Binary => {
        if self.current != InProgress::None {
          return Err(AssemblerError::UnexpectedDataFrame);
        }
        self.current = if frame.opcode == OpCode::Text {
          InProgress::Text
        } else {
          InProgress::Binary
        };
        self.compressed = frame.rsv1;

        if frame.fin {
          let kind = self.take_kind();
          let data = frame.payload;
          self.reset();
          Ok(Some(self.finish(kind, data)?))
        } else {
          self.fragments.extend_from_slice(&frame.payload);
          Ok(None)
        }
      }
      OpCode::Continuation => {
        if self.current == InProgress::None {
          return Err(AssemblerError::UnexpectedContinuationFrame);
        }
        self.fragments.extend_from_slice(&frame.payload);
        if frame.fin {
          let kind = self.take_kind();
          let data = self.fragments.split().freeze();
          self.reset();
          Ok(Some(self.finish(kind, data)?))
        } else {
          Ok(None)
        }
      }
      _ => unreachable!("control frames handled above"),
    }
  }

  /// Validates the optional 2-byte status code carried by a Close frame's
  /// payload (RFC 6455 §7.4, spec §6). An empty payload (no status code)
  /// is valid; a 1-byte payload can never contain a complete code and is
  /// rejected; a reserved or out-of-range code is rejected.
  fn validate_close_code(payload: &[u8]) -> Result<(), AssemblerError> {
    if payload.is_empty() {
      return Ok(());
    }
    if payload.len() < 2 {
      return Err(AssemblerError::Frame(FrameError::InvalidCloseCode(0)));
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    if !CloseCode::from(code).is_allowed() {
      return Err(AssemblerError::Frame(FrameError::InvalidCloseCode(code)));
    }
    Ok(())
  }

  fn take_kind(&self) -> MessageType {
    match self.current {
      InProgress::Text => MessageType::Text,
      InProgress::Binary => MessageType::Binary,
      InProgress::None => unreachable!(),
    }
  }

  fn finish(
    &self,
    kind: MessageType,
    data: Bytes,
  ) -> Result<AssembledOutput, AssemblerError> {
    let data = if self.compressed {
      inflate_payload(&data)?
    } else {
      data
    };
    if kind == MessageType::Text && std::str::from_utf8(&data).is_err() {
      return Err(AssemblerError::Frame(crate::error::FrameError::InvalidUtf8Text));
    }
    Ok(AssembledOutput::Message(WebSocketMessage {
      kind,
      data,
      compressed: self.compressed,
    }))
  }
}

/// Inflates a permessage-deflate payload (RFC 7692 §7.2.2): the sender
/// strips the trailing `00 00 ff ff` before transmission, so it has to be
/// restored before handing the raw deflate stream to the inflater.
fn inflate_payload(data: &[u8]) -> Result<Bytes, AssemblerError> {
  let mut input = Vec::with_capacity(data.len() + 4);
  input.extend_from_slice(data);
  input.extend_from_slice(&[0x00, 0x00, 0xff, 0xff]);
  miniz_oxide::inflate::decompress_to_vec(&input)
    .map(Bytes::from)
    .map_err(|_| AssemblerError::DecompressionFailed)
}
