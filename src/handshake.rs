//! Client-side WebSocket handshake (spec §4.3): HTTP/1.1 Upgrade request,
//! Sec-WebSocket-Accept derivation and response validation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::error::HandshakeError;
use crate::http::{self, HttpResponse};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generates a fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
  let mut key = [0u8; 16];
  rand::thread_rng().fill_bytes(&mut key);
  BASE64.encode(key)
}

/// Derives the expected `Sec-WebSocket-Accept` value for a given client key,
/// per RFC 6455 §1.3: `base64(sha1(key || GUID))`.
pub fn accept_key_for(client_key: &str) -> String {
  let mut hasher = Sha1::new();
  hasher.update(client_key.as_bytes());
  hasher.update(WEBSOCKET_GUID.as_bytes());
  BASE64.encode(hasher.finalize())
}

/// Extra, optional parameters for [`build_client_request`].
#[derive(Debug, Clone, Default)]
pub struct HandshakeOptions<'a> {
  pub protocols: Option<&'a str>,
  pub extensions: Option<&'a str>,
  pub extra_headers: &'a [(&'a str, &'a str)],
}

/// Builds the raw client request bytes and returns them alongside the
/// `Sec-WebSocket-Key` that was generated, so the caller can validate the
/// eventual response against it.
pub fn build_client_request(
  host: &str,
  path: &str,
  options: &HandshakeOptions<'_>,
) -> (Vec<u8>, String) {
  let key = generate_key();

  let mut headers: Vec<(&str, &str)> = vec![
    ("Upgrade", "websocket"),
    ("Connection", "Upgrade"),
    ("Sec-WebSocket-Key", key.as_str()),
    ("Sec-WebSocket-Version", "13"),
  ];
  if let Some(protocols) = options.protocols {
    headers.push(("Sec-WebSocket-Protocol", protocols));
  }
  if let Some(extensions) = options.extensions {
    headers.push(("Sec-WebSocket-Extensions", extensions));
  }
  headers.extend_from_slice(options.extra_headers);

  (http::build_request(host, path, &headers), key)
}

/// Validates a parsed server response against the client key used to build
/// the request, per spec §4.3. Any failure yields a distinct
/// [`HandshakeError`] variant.
pub fn validate_server_response(
  response: &HttpResponse,
  client_key: &str,
) -> Result<(), HandshakeError> {
  if response.status != 101 {
    return Err(HandshakeError::UnexpectedStatus(response.status));
  }

  let upgrade_ok = response
    .header("upgrade")
    .map(|v| v.eq_ignore_ascii_case("websocket"))
    .unwrap_or(false);
  if !upgrade_ok {
    return Err(HandshakeError::InvalidUpgradeHeader);
  }

  let connection_ok = response
    .header("connection")
    .map(|v| v.to_ascii_lowercase().contains("upgrade"))
    .unwrap_or(false);
  if !connection_ok {
    return Err(HandshakeError::InvalidConnectionHeader);
  }

  let expected = accept_key_for(client_key);
  let actual = response.header("sec-websocket-accept").unwrap_or("");
  if actual != expected {
    return Err(HandshakeError::InvalidAcceptKey);
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn derives_rfc_example_accept_key() {
    assert_eq!(
      accept_key_for("dGhlIHNhbXBsZSBub25jZQ=="),
      "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
    );
  }

  fn ok_response(key: &str) -> HttpResponse {
    let mut headers = HashMap::new();
    headers.insert("upgrade".to_string(), "websocket".to_string());
    headers.insert("connection".to_string(), "Upgrade".to_string());
    headers.insert(
      "sec-websocket-accept".to_string(),
      accept_key_for(key),
    );
    HttpResponse {
      status: 101,
      headers,
    }
  }

  #[test]
  fn validates_well_formed_response() {
    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let response = ok_response(key);
    assert!(validate_server_response(&response, key).is_ok());
  }

  #[test]
  fn flipping_a_bit_of_accept_key_fails() {
    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    let mut response = ok_response(key);
    let mut accept = response.headers.get("sec-websocket-accept").unwrap().clone();
    // flip the first character
    let mut chars: Vec<char> = accept.chars().collect();
    chars[0] = if chars[0] == 's' { 't' } else { 's' };
    accept = chars.into_iter().collect();
    response.headers.insert("sec-websocket-accept".to_string(), accept);

    assert_eq!(
      validate_server_response(&response, key),
      Err(HandshakeError::InvalidAcceptKey)
    );
  }

  #[test]
  fn rejects_non_101_status() {
    let response = HttpResponse {
      status: 200,
      headers: HashMap::new(),
    };
    assert_eq!(
      validate_server_response(&response, "key"),
      Err(HandshakeError::UnexpectedStatus(200))
    );
  }

  #[test]
  fn generated_key_is_16_bytes_base64() {
    use base64::Engine as _;
    let key = generate_key();
    let decoded = BASE64.decode(key).unwrap();
    assert_eq!(decoded.len(), 16);
  }
}
