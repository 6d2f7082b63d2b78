//! RFC 6455 WebSocket frame codec.
//!
//! [`encode`]/[`decode`] are pure functions: no I/O. [`encode_into`],
//! [`encode_header`] and [`mask_payload`] split the same encoding into
//! pieces [`crate::connection`] recombines for its write-buffer-reuse and
//! vectored-write heuristics (the teacher crate's `write_buffer`/`writev`).

use bytes::{Bytes, BytesMut};

use crate::error::FrameError;
use crate::mask::{apply_mask, generate_mask_key};

/// Frame opcode, per RFC 6455 §5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
  Continuation,
  Text,
  Binary,
  Close,
  Ping,
  Pong,
}

impl OpCode {
  pub fn is_control(self) -> bool {
    matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
  }

  fn to_bits(self) -> u8 {
    match self {
      OpCode::Continuation => 0x0,
      OpCode::Text => 0x1,
      OpCode::Binary => 0x2,
      OpCode::Close => 0x8,
      OpCode::Ping => 0x9,
      OpCode::Pong => 0xA,
    }
  }

  fn from_bits(bits: u8) -> Result<Self, FrameError> {
    match bits {
      0x0 => Ok(OpCode::Continuation),
      0x1 => Ok(OpCode::Text),
      0x2 => Ok(OpCode::Binary),
      0x8 => Ok(OpCode::Close),
      0x9 => Ok(OpCode::Ping),
      0xA => Ok(OpCode::Pong),
      other => Err(FrameError::InvalidOpcode(other)),
    }
  }
}

/// A single WebSocket frame. See spec §3 for the field invariants; they are
/// enforced by [`encode`]/[`decode`], not by this type's constructors, so
/// that a decoded frame can always be re-encoded bytewise identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketFrame {
  pub fin: bool,
  pub rsv1: bool,
  pub rsv2: bool,
  pub rsv3: bool,
  pub opcode: OpCode,
  pub masked: bool,
  pub mask_key: Option<[u8; 4]>,
  pub payload: Bytes,
}

impl WebSocketFrame {
  pub fn text(payload: impl Into<Bytes>) -> Self {
    Self {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Text,
      masked: false,
      mask_key: None,
      payload: payload.into(),
    }
  }

  pub fn binary(payload: impl Into<Bytes>) -> Self {
    Self {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Binary,
      masked: false,
      mask_key: None,
      payload: payload.into(),
    }
  }

  pub fn close(code: u16, reason: &str) -> Self {
    let mut payload = BytesMut::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    Self {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Close,
      masked: false,
      mask_key: None,
      payload: payload.freeze(),
    }
  }

  pub fn ping(payload: impl Into<Bytes>) -> Self {
    Self {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Ping,
      masked: false,
      mask_key: None,
      payload: payload.into(),
    }
  }

  pub fn pong(payload: impl Into<Bytes>) -> Self {
    Self {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Pong,
      masked: false,
      mask_key: None,
      payload: payload.into(),
    }
  }

  /// Masks this frame as a client frame would be, generating a fresh key
  /// from a cryptographically uniform source.
  pub fn mask_for_client(&mut self) {
    let key = generate_mask_key();
    self.mask_key = Some(key);
    self.masked = true;
  }
}

/// Encodes `frame` onto the wire, per spec §4.1.
///
/// # Panics
///
/// Panics if `frame` violates a control-frame invariant (fin=false or
/// payload > 125 bytes on a control opcode) — this is an invariant
/// violation in the caller, not a recoverable codec error (spec §9).
pub fn encode(frame: &WebSocketFrame) -> BytesMut {
  let mut out = BytesMut::with_capacity(frame.payload.len() + 14);
  encode_into(frame, &mut out);
  out
}

/// Like [`encode`], but appends onto a caller-owned buffer instead of
/// allocating a fresh one. The connection shell reuses one such buffer
/// across sends the way the teacher's `WriteHalf::write_buffer` does,
/// avoiding a fresh allocation per frame.
pub fn encode_into(frame: &WebSocketFrame, out: &mut BytesMut) {
  encode_header_into(frame, out);
  if frame.masked {
    let key = frame.mask_key.expect("masked frame must carry a mask key");
    let mut payload = frame.payload.to_vec();
    apply_mask(&mut payload, key);
    out.extend_from_slice(&payload);
  } else {
    out.extend_from_slice(&frame.payload);
  }
}

/// Encodes everything but the payload: fin/rsv/opcode byte, length prefix,
/// and mask key if present. Paired with [`mask_payload`] by the connection
/// shell's vectored-write path, which sends the two pieces as separate
/// writes instead of copying the (possibly large) payload into the same
/// buffer as the header.
pub fn encode_header(frame: &WebSocketFrame) -> BytesMut {
  let mut out = BytesMut::with_capacity(14);
  encode_header_into(frame, &mut out);
  out
}

fn encode_header_into(frame: &WebSocketFrame, out: &mut BytesMut) {
  if frame.opcode.is_control() {
    assert!(frame.fin, "control frames must have fin=true");
    assert!(
      frame.payload.len() <= 125,
      "control frame payload must be <= 125 bytes"
    );
  }

  let byte0 = (frame.fin as u8) << 7
    | (frame.rsv1 as u8) << 6
    | (frame.rsv2 as u8) << 5
    | (frame.rsv3 as u8) << 4
    | frame.opcode.to_bits();
  out.extend_from_slice(&[byte0]);

  let mask_bit = if frame.masked { 0x80 } else { 0x00 };
  let len = frame.payload.len();
  if len < 126 {
    out.extend_from_slice(&[mask_bit | len as u8]);
  } else if len <= 0xFFFF {
    out.extend_from_slice(&[mask_bit | 126]);
    out.extend_from_slice(&(len as u16).to_be_bytes());
  } else {
    out.extend_from_slice(&[mask_bit | 127]);
    out.extend_from_slice(&(len as u64).to_be_bytes());
  }

  if frame.masked {
    let key = frame.mask_key.expect("masked frame must carry a mask key");
    out.extend_from_slice(&key);
  }
}

/// Masks `frame`'s payload for the wire, independent of the header. Returns
/// the payload unchanged if `frame.masked` is false.
pub fn mask_payload(frame: &WebSocketFrame) -> Vec<u8> {
  let mut payload = frame.payload.to_vec();
  if let Some(key) = frame.mask_key {
    apply_mask(&mut payload, key);
  }
  payload
}

/// Decodes a single frame from the front of `buf`.
///
/// On success returns the frame and the number of bytes consumed from
/// `buf`. On [`FrameError::IncompleteFrame`], no bytes should be considered
/// consumed — the caller must read more and retry with a larger buffer.
pub fn decode(buf: &[u8]) -> Result<(WebSocketFrame, usize), FrameError> {
  decode_with_limit(buf, usize::MAX)
}

/// Like [`decode`], but rejects frames whose payload exceeds `max_payload`
/// with [`FrameError::FrameTooLarge`] as soon as the length prefix is known
/// (i.e. before the payload itself has necessarily arrived).
pub fn decode_with_limit(
  buf: &[u8],
  max_payload: usize,
) -> Result<(WebSocketFrame, usize), FrameError> {
  if buf.len() < 2 {
    return Err(FrameError::IncompleteFrame);
  }

  let byte0 = buf[0];
  let byte1 = buf[1];

  let fin = byte0 & 0b1000_0000 != 0;
  let rsv1 = byte0 & 0b0100_0000 != 0;
  let rsv2 = byte0 & 0b0010_0000 != 0;
  let rsv3 = byte0 & 0b0001_0000 != 0;
  let opcode = OpCode::from_bits(byte0 & 0b0000_1111)?;

  let masked = byte1 & 0b1000_0000 != 0;
  let length_code = byte1 & 0x7F;

  let mut offset = 2usize;
  let payload_len: usize = match length_code {
    126 => {
      if buf.len() < offset + 2 {
        return Err(FrameError::IncompleteFrame);
      }
      let len = u16::from_be_bytes(buf[offset..offset + 2].try_into().unwrap()) as usize;
      offset += 2;
      len
    }
    127 => {
      if buf.len() < offset + 8 {
        return Err(FrameError::IncompleteFrame);
      }
      let len = u64::from_be_bytes(buf[offset..offset + 8].try_into().unwrap()) as usize;
      offset += 8;
      len
    }
    n => n as usize,
  };

  if opcode.is_control() {
    if !fin {
      return Err(FrameError::FragmentedControlFrame);
    }
    if payload_len > 125 {
      return Err(FrameError::ControlFrameTooLarge);
    }
  }

  if payload_len > max_payload {
    return Err(FrameError::FrameTooLarge(payload_len));
  }

  let mask_key = if masked {
    if buf.len() < offset + 4 {
      return Err(FrameError::IncompleteFrame);
    }
    let key: [u8; 4] = buf[offset..offset + 4].try_into().unwrap();
    offset += 4;
    Some(key)
  } else {
    None
  };

  if buf.len() < offset + payload_len {
    return Err(FrameError::IncompleteFrame);
  }

  let mut payload = buf[offset..offset + payload_len].to_vec();
  offset += payload_len;

  if let Some(key) = mask_key {
    apply_mask(&mut payload, key);
  }

  Ok((
    WebSocketFrame {
      fin,
      rsv1,
      rsv2,
      rsv3,
      opcode,
      masked,
      mask_key,
      payload: Bytes::from(payload),
    },
    offset,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encodes_single_byte_unmasked_text_frame() {
    let frame = WebSocketFrame::text(Bytes::from_static(&[0x41]));
    assert_eq!(encode(&frame).as_ref(), &[0x81, 0x01, 0x41]);
  }

  #[test]
  fn decodes_single_byte_unmasked_text_frame() {
    let (frame, consumed) = decode(&[0x81, 0x01, 0x41]).unwrap();
    assert_eq!(consumed, 3);
    assert_eq!(frame.opcode, OpCode::Text);
    assert!(frame.fin);
    assert_eq!(frame.payload.as_ref(), &[0x41]);
  }

  #[test]
  fn masked_hello_matches_rfc_example() {
    let mut frame = WebSocketFrame::text(Bytes::from_static(b"Hello"));
    frame.masked = true;
    frame.mask_key = Some([0x37, 0xfa, 0x21, 0x3d]);
    let encoded = encode(&frame);
    assert_eq!(
      encoded.as_ref(),
      &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
    );
  }

  #[test]
  fn round_trips_masked_frames() {
    let mut frame = WebSocketFrame::binary(Bytes::from_static(&[1, 2, 3, 4, 5]));
    frame.masked = true;
    frame.mask_key = Some([9, 8, 7, 6]);
    let encoded = encode(&frame);
    let (decoded, consumed) = decode(&encoded).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(decoded, frame);
  }

  #[test]
  fn rejects_invalid_opcode() {
    // reserved opcode 0x3 with fin set, zero-length payload
    let err = decode(&[0x83, 0x00]).unwrap_err();
    assert_eq!(err, FrameError::InvalidOpcode(0x3));
  }

  #[test]
  fn rejects_fragmented_control_frame() {
    let err = decode(&[0x09, 0x00]).unwrap_err();
    assert_eq!(err, FrameError::FragmentedControlFrame);
  }

  #[test]
  fn rejects_oversized_control_frame() {
    let mut buf = vec![0x89, 126, 0, 126];
    buf.extend(std::iter::repeat(0u8).take(126));
    let err = decode(&buf).unwrap_err();
    assert_eq!(err, FrameError::ControlFrameTooLarge);
  }

  #[test]
  fn incomplete_buffer_signals_retry() {
    assert_eq!(decode(&[0x81]), Err(FrameError::IncompleteFrame));
    assert_eq!(decode(&[0x81, 0x05, 0x01, 0x02]), Err(FrameError::IncompleteFrame));
  }

  #[test]
  fn fragmented_binary_message_frames_carry_continuation() {
    let f1 = WebSocketFrame {
      fin: false,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Binary,
      masked: false,
      mask_key: None,
      payload: Bytes::from_static(&[0x01, 0x02]),
    };
    let f2 = WebSocketFrame {
      opcode: OpCode::Continuation,
      ..f1.clone()
    };
    assert_eq!(f1.opcode, OpCode::Binary);
    assert_eq!(f2.opcode, OpCode::Continuation);
  }

  #[test]
  fn header_and_masked_payload_recombine_to_the_same_bytes_as_encode() {
    let mut frame = WebSocketFrame::binary(Bytes::from_static(&[1, 2, 3, 4, 5]));
    frame.masked = true;
    frame.mask_key = Some([9, 8, 7, 6]);

    let whole = encode(&frame);
    let mut split = encode_header(&frame);
    split.extend_from_slice(&mask_payload(&frame));
    assert_eq!(whole.as_ref(), split.as_ref());
  }

  #[test]
  #[should_panic]
  fn encoding_oversized_control_frame_panics() {
    let frame = WebSocketFrame {
      fin: true,
      rsv1: false,
      rsv2: false,
      rsv3: false,
      opcode: OpCode::Ping,
      masked: false,
      mask_key: None,
      payload: Bytes::from(vec![0u8; 200]),
    };
    let _ = encode(&frame);
  }
}
