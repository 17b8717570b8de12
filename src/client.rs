//! Client side of the handshake: URL parsing, request construction, and
//! response verification, bootstrapping a [`WebSocket`] over any duplex
//! stream the caller hands in (plain TCP, or an already-TLS-wrapped stream
//! for `wss://`, since this crate carries no TLS stack of its own).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ClientConfig;
use crate::connection::{Role, WebSocket};
use crate::error::{HandshakeError, WsError};
use crate::handshake;

const MAX_RESPONSE_HEAD_BYTES: usize = 16 * 1024;

/// A parsed `ws://`/`wss://` URL, reduced to what the handshake needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub path_and_query: String,
    pub tls: bool,
}

/// Parse and validate a WebSocket URL: scheme must be `ws` or `wss`, and
/// fragments (which have no meaning over the wire) are rejected outright.
pub fn parse_ws_url(url: &str) -> Result<WsUrl, HandshakeError> {
    if url.contains('#') {
        return Err(HandshakeError::FragmentNotAllowed);
    }
    let uri: http::Uri = url
        .parse()
        .map_err(|_| HandshakeError::MalformedHttp(format!("not a valid URL: {url}")))?;

    let tls = match uri.scheme_str() {
        Some("ws") => false,
        Some("wss") => true,
        Some(other) => return Err(HandshakeError::UnsupportedScheme(other.to_string())),
        None => return Err(HandshakeError::MalformedHttp("URL is missing a scheme".into())),
    };
    let host = uri
        .host()
        .ok_or_else(|| HandshakeError::MalformedHttp("URL is missing a host".into()))?
        .to_string();
    let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });
    let path_and_query = uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    Ok(WsUrl { host, port, path_and_query, tls })
}

async fn read_response_head<S>(io: &mut S) -> Result<http::Response<()>, WsError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        if let Some((response, _offset)) = handshake::parse_response(&buf).map_err(WsError::Handshake)? {
            return Ok(response);
        }
        let mut chunk = [0u8; 1024];
        let n = io.read(&mut chunk).await.map_err(WsError::Transport)?;
        if n == 0 {
            return Err(WsError::Handshake(HandshakeError::MalformedHttp(
                "connection closed before response headers completed".into(),
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(WsError::Handshake(HandshakeError::MalformedHttp(
                "response headers exceeded the maximum size".into(),
            )));
        }
    }
}

/// Perform the client handshake over an already-connected duplex stream and
/// hand back an open [`WebSocket`]. `io` should already be the correctly
/// scheme'd transport: a plain `TcpStream` for `ws://`, or a TLS stream the
/// caller has already completed for `wss://` (`config.tls_config` is
/// metadata only; this crate does not drive a TLS handshake itself).
pub async fn open<S>(mut io: S, url: &str, config: ClientConfig) -> Result<WebSocket<S>, WsError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let parsed = parse_ws_url(url).map_err(WsError::Handshake)?;
    let key = handshake::generate_key();
    let request = handshake::build_client_request(
        &parsed.host,
        &parsed.path_and_query,
        &key,
        config.subprotocol.as_deref(),
    );
    io.write_all(&request).await.map_err(WsError::Transport)?;

    let response = read_response_head(&mut io).await?;
    if response.status() != http::StatusCode::SWITCHING_PROTOCOLS {
        return Err(WsError::Handshake(HandshakeError::NotUpgraded(response.status().as_u16())));
    }
    handshake::check_upgrade(response.headers()).map_err(WsError::Handshake)?;

    let accept = response
        .headers()
        .get("Sec-WebSocket-Accept")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| WsError::Handshake(HandshakeError::MalformedHttp("missing Sec-WebSocket-Accept".into())))?;
    if accept != handshake::derive_accept_key(&key) {
        return Err(WsError::Handshake(HandshakeError::AcceptKeyMismatch));
    }

    tracing::debug!(host = %parsed.host, path = %parsed.path_and_query, "websocket client handshake complete");
    Ok(WebSocket::new(io, Role::Client, config.read_timeout, config.chunk_size))
}

/// Convenience entry point for the common case: dial a plain TCP connection
/// and perform the handshake over it. `wss://` URLs are rejected here since
/// this crate has no TLS stack; wrap the stream yourself and call
/// [`open`] directly.
pub async fn connect(url: &str, config: ClientConfig) -> Result<WebSocket<TcpStream>, WsError> {
    let parsed = parse_ws_url(url).map_err(WsError::Handshake)?;
    if parsed.tls {
        return Err(WsError::Handshake(HandshakeError::MalformedHttp(
            "wss:// requires a pre-established TLS stream; use client::open".into(),
        )));
    }
    let stream = TcpStream::connect((parsed.host.as_str(), parsed.port))
        .await
        .map_err(WsError::Transport)?;
    open(stream, url, config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_ws_url() {
        let parsed = parse_ws_url("ws://example.com/chat?x=1").unwrap();
        assert_eq!(parsed.host, "example.com");
        assert_eq!(parsed.port, 80);
        assert_eq!(parsed.path_and_query, "/chat?x=1");
        assert!(!parsed.tls);
    }

    #[test]
    fn parses_wss_url_with_explicit_port() {
        let parsed = parse_ws_url("wss://example.com:9443/socket").unwrap();
        assert_eq!(parsed.port, 9443);
        assert!(parsed.tls);
    }

    #[test]
    fn rejects_fragment() {
        let err = parse_ws_url("ws://example.com/chat#room").unwrap_err();
        assert_eq!(err, HandshakeError::FragmentNotAllowed);
    }

    #[test]
    fn rejects_non_ws_scheme() {
        let err = parse_ws_url("http://example.com/chat").unwrap_err();
        assert_eq!(err, HandshakeError::UnsupportedScheme("http".into()));
    }

    #[tokio::test]
    async fn open_completes_over_an_in_memory_pipe() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);

        let server_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let (request, offset) = loop {
                if let Some(parsed) = handshake::parse_request(&buf).unwrap() {
                    break parsed;
                }
                let mut chunk = [0u8; 1024];
                let n = server_io.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            };
            let _ = offset;
            let key = request.headers().get("Sec-WebSocket-Key").unwrap().to_str().unwrap();
            let accept = handshake::derive_accept_key(key);
            let response = handshake::build_switching_protocols(&accept, None);
            server_io.write_all(&response).await.unwrap();
            server_io
        });

        let ws = open(client_io, "ws://example.com/chat", ClientConfig::default()).await.unwrap();
        assert_eq!(ws.role(), Role::Client);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn open_rejects_mismatched_accept_key() {
        let (client_io, mut server_io) = tokio::io::duplex(8192);

        tokio::spawn(async move {
            let mut buf = Vec::new();
            loop {
                if handshake::parse_request(&buf).unwrap().is_some() {
                    break;
                }
                let mut chunk = [0u8; 1024];
                let n = server_io.read(&mut chunk).await.unwrap();
                buf.extend_from_slice(&chunk[..n]);
            }
            let bogus_accept = handshake::derive_accept_key("not-the-real-key");
            let response = handshake::build_switching_protocols(&bogus_accept, None);
            server_io.write_all(&response).await.unwrap();
        });

        let err = open(client_io, "ws://example.com/chat", ClientConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WsError::Handshake(HandshakeError::AcceptKeyMismatch)));
    }
}
