//! Minimal HTTP/1.1 plumbing, scoped to what the WebSocket handshake and
//! chunked-body parsing need (spec §1: the full HTTP/1.1 codec is out of
//! scope). Request line/header formatting follows spec §6.

use std::collections::HashMap;

use crate::error::HandshakeError;

/// Default `User-Agent` sent on the handshake request.
pub const USER_AGENT: &str = "NexusKit/1.0";

/// A parsed HTTP/1.1 response status line + headers (no body).
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  /// Header keys are lower-cased for case-insensitive lookup (spec §4.3).
  pub headers: HashMap<String, String>,
}

impl HttpResponse {
  pub fn header(&self, name: &str) -> Option<&str> {
    self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
  }
}

/// Builds the raw bytes of an HTTP/1.1 GET request with the given path,
/// host and extra headers, matching the request-line/header format in
/// spec §6.
pub fn build_request(
  host: &str,
  path: &str,
  headers: &[(&str, &str)],
) -> Vec<u8> {
  let mut out = format!("GET {path} HTTP/1.1\r\n");
  out.push_str(&format!("Host: {host}\r\n"));
  for (name, value) in headers {
    out.push_str(&format!("{name}: {value}\r\n"));
  }
  out.push_str(&format!("User-Agent: {USER_AGENT}\r\n"));
  out.push_str("\r\n");
  out.into_bytes()
}

/// Parses a full HTTP/1.1 response (status line + headers) from `buf`.
/// Returns the parsed response and the byte offset of the first byte after
/// the header block (where any body, e.g. the upgraded WebSocket stream,
/// begins).
pub fn parse_response(buf: &[u8]) -> Result<(HttpResponse, usize), HandshakeError> {
  let mut headers = [httparse::EMPTY_HEADER; 64];
  let mut response = httparse::Response::new(&mut headers);

  match response.parse(buf) {
    Ok(httparse::Status::Complete(offset)) => {
      let status = response.code.ok_or_else(|| {
        HandshakeError::MalformedResponse("missing status code".into())
      })?;
      let mut map = HashMap::new();
      for header in response.headers.iter() {
        let value = String::from_utf8_lossy(header.value).into_owned();
        map.insert(header.name.to_ascii_lowercase(), value);
      }
      Ok((
        HttpResponse {
          status,
          headers: map,
        },
        offset,
      ))
    }
    Ok(httparse::Status::Partial) => Err(HandshakeError::Incomplete),
    Err(e) => Err(HandshakeError::MalformedResponse(e.to_string())),
  }
}

/// Parses a chunked-transfer-encoded body from `buf`, per spec §6: hex
/// chunk size, CRLF, chunk bytes, CRLF, terminating on a zero-size chunk.
/// Returns the concatenated decoded body once the terminating chunk has
/// been seen, or `None` if `buf` doesn't yet contain it.
pub fn parse_chunked_body(buf: &[u8]) -> Option<Vec<u8>> {
  let mut out = Vec::new();
  let mut pos = 0usize;

  loop {
    let line_end = find_crlf(&buf[pos..])? + pos;
    let size_line = std::str::from_utf8(&buf[pos..line_end]).ok()?;
    let size_str = size_line.split(';').next().unwrap_or(size_line).trim();
    let size = usize::from_str_radix(size_str, 16).ok()?;
    pos = line_end + 2;

    if size == 0 {
      // Trailing CRLF after the zero chunk.
      return Some(out);
    }

    if buf.len() < pos + size + 2 {
      return None;
    }
    out.extend_from_slice(&buf[pos..pos + size]);
    pos += size + 2; // chunk bytes + trailing CRLF
  }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
  buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_101_switching_protocols() {
    let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
    let (resp, offset) = parse_response(raw).unwrap();
    assert_eq!(resp.status, 101);
    assert_eq!(resp.header("upgrade"), Some("websocket"));
    assert_eq!(offset, raw.len());
  }

  #[test]
  fn parses_chunked_body() {
    let raw = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
    let body = parse_chunked_body(raw).unwrap();
    assert_eq!(body, b"Wikipedia");
  }

  #[test]
  fn incomplete_chunked_body_returns_none() {
    let raw = b"4\r\nWik";
    assert!(parse_chunked_body(raw).is_none());
  }
}
