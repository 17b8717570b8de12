//! The HTTP upgrade handshake: key derivation, header validation, and the
//! minimal request/response wire format needed to bootstrap a WebSocket.
//!
//! Full HTTP parsing is out of scope; this module only handles the GET
//! request line plus headers, using `httparse` for the wire grammar and
//! `http` for the in-memory representation.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::Engine as _;
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use sha1_smol::Sha1;

use crate::error::HandshakeError;

/// The magic GUID appended to a client's nonce before hashing, per RFC 6455 §1.3.
const GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const MAX_HEADERS: usize = 64;

/// Compute `Sec-WebSocket-Accept` from a client's `Sec-WebSocket-Key`.
pub fn derive_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(GUID.as_bytes());
    BASE64.encode(hasher.digest().bytes())
}

/// Generate a fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub fn generate_key() -> String {
    let bytes: [u8; 16] = rand::random();
    BASE64.encode(bytes)
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn connection_has_upgrade_token(headers: &HeaderMap) -> bool {
    header_str(headers, http::header::CONNECTION)
        .map(|v| v.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade")))
        .unwrap_or(false)
}

fn upgrade_is_websocket(headers: &HeaderMap) -> bool {
    header_str(headers, http::header::UPGRADE)
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Fails unless `Upgrade: websocket` is present AND `Connection` contains the
/// `upgrade` token (tolerating the Firefox form `keep-alive, upgrade`).
pub fn check_upgrade(headers: &HeaderMap) -> Result<(), HandshakeError> {
    if !upgrade_is_websocket(headers) {
        return Err(HandshakeError::MissingUpgradeHeader);
    }
    if !connection_has_upgrade_token(headers) {
        return Err(HandshakeError::MissingConnectionHeader);
    }
    Ok(())
}

/// True iff this looks like a WebSocket upgrade: a GET request (or a 101
/// response), `Connection` carrying the `upgrade` token (not merely
/// `keep-alive`), and `Upgrade: websocket` (case-insensitive).
pub fn is_upgrade(method: Option<&Method>, status: Option<StatusCode>, headers: &HeaderMap) -> bool {
    let method_ok = match (method, status) {
        (Some(m), _) => *m == Method::GET,
        (None, Some(s)) => s == StatusCode::SWITCHING_PROTOCOLS,
        (None, None) => false,
    };
    if !method_ok {
        return false;
    }
    let connection_is_bare_keep_alive = header_str(headers, http::header::CONNECTION)
        .map(|v| v.trim().eq_ignore_ascii_case("keep-alive"))
        .unwrap_or(false);
    if connection_is_bare_keep_alive {
        return false;
    }
    connection_has_upgrade_token(headers) && upgrade_is_websocket(headers)
}

/// Whether `requested` appears (case-sensitively, per RFC 6455) in `supported`.
pub fn hasprotocol(requested: &str, supported: &[String]) -> bool {
    supported.iter().any(|p| p == requested)
}

/// Decode and length-check a `Sec-WebSocket-Key` header value.
pub fn validate_key(key: &str) -> Result<(), HandshakeError> {
    let decoded = BASE64
        .decode(key)
        .map_err(|_| HandshakeError::MalformedKey)?;
    if decoded.len() != 16 {
        return Err(HandshakeError::MalformedKey);
    }
    Ok(())
}

/// Build the client's upgrade request line + headers as raw bytes to write to the transport.
pub fn build_client_request(
    host: &str,
    path_and_query: &str,
    key: &str,
    subprotocol: Option<&str>,
) -> Vec<u8> {
    let mut req = Vec::new();
    req.extend_from_slice(format!("GET {path_and_query} HTTP/1.1\r\n").as_bytes());
    req.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
    req.extend_from_slice(b"Upgrade: websocket\r\n");
    req.extend_from_slice(b"Connection: Upgrade\r\n");
    req.extend_from_slice(format!("Sec-WebSocket-Key: {key}\r\n").as_bytes());
    req.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");
    if let Some(proto) = subprotocol {
        req.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
    }
    req.extend_from_slice(b"\r\n");
    req
}

/// Build the server's 101 Switching Protocols response.
pub fn build_switching_protocols(accept_key: &str, subprotocol: Option<&str>) -> Vec<u8> {
    let mut resp = Vec::new();
    resp.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    resp.extend_from_slice(b"Upgrade: websocket\r\n");
    resp.extend_from_slice(b"Connection: Upgrade\r\n");
    resp.extend_from_slice(format!("Sec-WebSocket-Accept: {accept_key}\r\n").as_bytes());
    if let Some(proto) = subprotocol {
        resp.extend_from_slice(format!("Sec-WebSocket-Protocol: {proto}\r\n").as_bytes());
    }
    resp.extend_from_slice(b"\r\n");
    resp
}

/// Build a rejection response, optionally carrying extra headers (e.g.
/// `Sec-WebSocket-Version` on a version mismatch, or the echoed
/// `Sec-WebSocket-Protocol` on an unsupported subprotocol).
pub fn build_rejection(status: u16, reason: &str, extra_headers: &[(&str, &str)]) -> Vec<u8> {
    let mut resp = Vec::new();
    resp.extend_from_slice(format!("HTTP/1.1 {status} {reason}\r\n").as_bytes());
    for (name, value) in extra_headers {
        resp.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    resp.extend_from_slice(b"\r\n");
    resp
}

/// Parse a full HTTP request (request line + headers, terminated by `\r\n\r\n`)
/// out of `buf`. Returns the parsed request and the byte offset just past the
/// blank line, or `None` if more data is needed.
pub fn parse_request(buf: &[u8]) -> Result<Option<(Request<()>, usize)>, HandshakeError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_storage);
    let status = parsed
        .parse(buf)
        .map_err(|e| HandshakeError::MalformedHttp(e.to_string()))?;

    let offset = match status {
        httparse::Status::Complete(off) => off,
        httparse::Status::Partial => return Ok(None),
    };

    let method = parsed
        .method
        .ok_or_else(|| HandshakeError::MalformedHttp("missing method".into()))?;
    let path = parsed
        .path
        .ok_or_else(|| HandshakeError::MalformedHttp("missing path".into()))?;

    let mut builder = Request::builder().method(method).uri(path);
    for header in parsed.headers.iter() {
        if header.name.is_empty() {
            continue;
        }
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HandshakeError::MalformedHttp(format!("bad header value for {}", header.name)))?;
        builder = builder.header(header.name, value);
    }
    let request = builder
        .body(())
        .map_err(|e| HandshakeError::MalformedHttp(e.to_string()))?;
    Ok(Some((request, offset)))
}

/// Parse a full HTTP response out of `buf`. Returns the parsed response and
/// the byte offset just past the blank line, or `None` if more data is needed.
pub fn parse_response(buf: &[u8]) -> Result<Option<(Response<()>, usize)>, HandshakeError> {
    let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_storage);
    let status = parsed
        .parse(buf)
        .map_err(|e| HandshakeError::MalformedHttp(e.to_string()))?;

    let offset = match status {
        httparse::Status::Complete(off) => off,
        httparse::Status::Partial => return Ok(None),
    };

    let code = parsed
        .code
        .ok_or_else(|| HandshakeError::MalformedHttp("missing status code".into()))?;
    let mut builder = Response::builder().status(code);
    for header in parsed.headers.iter() {
        if header.name.is_empty() {
            continue;
        }
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| HandshakeError::MalformedHttp(format!("bad header value for {}", header.name)))?;
        builder = builder.header(header.name, value);
    }
    let response = builder
        .body(())
        .map_err(|e| HandshakeError::MalformedHttp(e.to_string()))?;
    Ok(Some((response, offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_example() {
        // RFC 6455 §1.3 worked example.
        assert_eq!(
            derive_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn generated_keys_are_16_bytes_decoded_and_distinct() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1, k2);
        assert_eq!(BASE64.decode(&k1).unwrap().len(), 16);
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn is_upgrade_true_for_get_with_correct_headers() {
        let h = headers(&[("Upgrade", "websocket"), ("Connection", "Upgrade")]);
        assert!(is_upgrade(Some(&Method::GET), None, &h));
    }

    #[test]
    fn is_upgrade_false_for_bare_keep_alive() {
        let h = headers(&[("Upgrade", "websocket"), ("Connection", "keep-alive")]);
        assert!(!is_upgrade(Some(&Method::GET), None, &h));
    }

    #[test]
    fn is_upgrade_true_for_firefox_style_connection_header() {
        let h = headers(&[("Upgrade", "websocket"), ("Connection", "keep-alive, Upgrade")]);
        assert!(is_upgrade(Some(&Method::GET), None, &h));
    }

    #[test]
    fn check_upgrade_rejects_missing_headers() {
        let h = headers(&[("Upgrade", "websocket")]);
        assert_eq!(check_upgrade(&h), Err(HandshakeError::MissingConnectionHeader));
    }

    #[test]
    fn validate_key_rejects_wrong_length() {
        let short = BASE64.encode([0u8; 4]);
        assert_eq!(validate_key(&short), Err(HandshakeError::MalformedKey));
    }

    #[test]
    fn parse_request_roundtrip() {
        let wire = build_client_request("example.com", "/chat", "dGhlIHNhbXBsZSBub25jZQ==", Some("chat"));
        let (req, offset) = parse_request(&wire).unwrap().unwrap();
        assert_eq!(offset, wire.len());
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri().path(), "/chat");
        assert_eq!(
            req.headers().get("Sec-WebSocket-Key").unwrap(),
            "dGhlIHNhbXBsZSBub25jZQ=="
        );
        assert!(is_upgrade(Some(req.method()), None, req.headers()));
    }

    #[test]
    fn parse_response_roundtrip() {
        let wire = build_switching_protocols("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=", None);
        let (resp, offset) = parse_response(&wire).unwrap().unwrap();
        assert_eq!(offset, wire.len());
        assert_eq!(resp.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(
            resp.headers().get("Sec-WebSocket-Accept").unwrap(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn hasprotocol_matches_exact_name() {
        let supported = vec!["chat".to_string(), "soap".to_string()];
        assert!(hasprotocol("chat", &supported));
        assert!(!hasprotocol("xmpp", &supported));
    }
}
