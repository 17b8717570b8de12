//! The WebSocket server: accepts TCP connections, performs the upgrade
//! handshake, and hands completed [`WebSocket`] handles back to the caller.
//!
//! The accept loop races new TCP accepts against a `JoinSet` of in-flight
//! handshakes, so a slow client's handshake never blocks new connections from
//! being accepted, and publishes a diagnostics channel instead of printing
//! straight to stdout.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::config::ServerConfig;
use crate::connection::{Role, WebSocket};
use crate::error::{HandshakeError, WsError};
use crate::handshake;

const MAX_REQUEST_HEAD_BYTES: usize = 16 * 1024;

/// Out-of-band diagnostics for handshake outcomes and accept failures.
/// Consumed independently of the handle returned by `accept`; a server that
/// never reads this channel still functions, it just can't observe rejections.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    HandshakeCompleted { path: String },
    HandshakeRejected { reason: String },
    AcceptFailed { detail: String },
}

type HandshakeOutcome = Option<(WebSocket<TcpStream>, http::Request<()>)>;

pub struct WebSocketServer {
    listener: TcpListener,
    futures: JoinSet<HandshakeOutcome>,
    config: Arc<ServerConfig>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
}

impl WebSocketServer {
    /// Bind a listening socket. Returns the server plus the receiving end of
    /// its diagnostics channel.
    pub async fn bind(
        addr: impl tokio::net::ToSocketAddrs,
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok((
            WebSocketServer {
                listener,
                futures: JoinSet::new(),
                config: Arc::new(config),
                events_tx,
            },
            events_rx,
        ))
    }

    /// Accept the next successfully upgraded connection, discarding the
    /// upgrade request. Prefer [`WebSocketServer::accept_with_request`] when
    /// the handler needs to inspect headers (origin checks, cookies, path
    /// routing) before trusting the connection.
    pub async fn accept(&mut self) -> WebSocket<TcpStream> {
        let (ws, _request) = self.accept_with_request().await;
        ws
    }

    /// Accept the next successfully upgraded connection along with the
    /// parsed HTTP request that initiated it.
    pub async fn accept_with_request(&mut self) -> (WebSocket<TcpStream>, http::Request<()>) {
        loop {
            if self.futures.is_empty() {
                self.spawn_next_handshake().await;
                continue;
            }
            select! {
                accepted = self.listener.accept() => {
                    self.handle_accept(accepted);
                }
                finished = self.futures.join_next() => {
                    if let Some(Ok(Some(outcome))) = finished {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn spawn_next_handshake(&mut self) {
        match self.listener.accept().await {
            Ok((socket, _peer)) => self.spawn_handshake(socket),
            Err(e) => {
                let _ = self.events_tx.send(ServerEvent::AcceptFailed { detail: e.to_string() });
            }
        }
    }

    fn handle_accept(&mut self, accepted: std::io::Result<(TcpStream, std::net::SocketAddr)>) {
        match accepted {
            Ok((socket, _peer)) => self.spawn_handshake(socket),
            Err(e) => {
                let _ = self.events_tx.send(ServerEvent::AcceptFailed { detail: e.to_string() });
            }
        }
    }

    fn spawn_handshake(&mut self, socket: TcpStream) {
        let config = Arc::clone(&self.config);
        let events_tx = self.events_tx.clone();
        self.futures.spawn(Self::handshake(socket, config, events_tx));
    }

    async fn handshake(
        mut socket: TcpStream,
        config: Arc<ServerConfig>,
        events_tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> HandshakeOutcome {
        match Self::try_handshake(&mut socket, &config).await {
            Ok(request) => {
                let path = request.uri().path().to_string();
                tracing::debug!(path = %path, "websocket handshake complete");
                let _ = events_tx.send(ServerEvent::HandshakeCompleted { path });
                let ws = WebSocket::new(socket, Role::Server, config.read_timeout, config.chunk_size);
                Some((ws, request))
            }
            Err(e) => {
                tracing::warn!(error = %e, "websocket handshake rejected");
                let _ = events_tx.send(ServerEvent::HandshakeRejected { reason: e.to_string() });
                None
            }
        }
    }

    async fn read_request_head(socket: &mut TcpStream) -> Result<http::Request<()>, WsError> {
        let mut buf = Vec::new();
        loop {
            if let Some((request, _offset)) = handshake::parse_request(&buf)
                .map_err(WsError::Handshake)?
            {
                return Ok(request);
            }
            let mut chunk = [0u8; 1024];
            let n = socket.read(&mut chunk).await.map_err(WsError::Transport)?;
            if n == 0 {
                return Err(WsError::Handshake(HandshakeError::MalformedHttp(
                    "connection closed before request headers completed".into(),
                )));
            }
            buf.extend_from_slice(&chunk[..n]);
            if buf.len() > MAX_REQUEST_HEAD_BYTES {
                return Err(WsError::Handshake(HandshakeError::MalformedHttp(
                    "request headers exceeded the maximum size".into(),
                )));
            }
        }
    }

    async fn reject(socket: &mut TcpStream, status: u16, reason: &str, extra: &[(&str, &str)]) {
        let response = handshake::build_rejection(status, reason, extra);
        let _ = socket.write_all(&response).await;
    }

    async fn try_handshake(socket: &mut TcpStream, config: &ServerConfig) -> Result<http::Request<()>, WsError> {
        let request = Self::read_request_head(socket).await?;

        if !handshake::is_upgrade(Some(request.method()), None, request.headers()) {
            Self::reject(socket, 400, "Bad Request", &[]).await;
            return Err(WsError::Handshake(HandshakeError::MissingUpgradeHeader));
        }
        if let Err(e) = handshake::check_upgrade(request.headers()) {
            Self::reject(socket, 400, "Bad Request", &[]).await;
            return Err(WsError::Handshake(e));
        }

        let version = request
            .headers()
            .get("Sec-WebSocket-Version")
            .and_then(|v| v.to_str().ok());
        if version != Some("13") {
            Self::reject(socket, 400, "Bad Request", &[("Sec-WebSocket-Version", "13")]).await;
            return Err(WsError::Handshake(HandshakeError::UnsupportedVersion));
        }

        let key = match request.headers().get("Sec-WebSocket-Key").and_then(|v| v.to_str().ok()) {
            Some(key) => key.to_string(),
            None => {
                Self::reject(socket, 400, "Bad Request", &[]).await;
                return Err(WsError::Handshake(HandshakeError::MissingKey));
            }
        };
        if let Err(e) = handshake::validate_key(&key) {
            Self::reject(socket, 400, "Bad Request", &[]).await;
            return Err(WsError::Handshake(e));
        }

        let requested_protocol = request
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let negotiated = match requested_protocol {
            Some(ref proto) if !config.subprotocols.is_empty() => {
                if handshake::hasprotocol(proto, &config.subprotocols) {
                    Some(proto.clone())
                } else {
                    Self::reject(socket, 400, "Bad Request", &[("Sec-WebSocket-Protocol", proto)]).await;
                    return Err(WsError::Handshake(HandshakeError::UnsupportedSubprotocol(proto.clone())));
                }
            }
            _ => None,
        };

        let accept_key = handshake::derive_accept_key(&key);
        let response = handshake::build_switching_protocols(&accept_key, negotiated.as_deref());
        socket.write_all(&response).await.map_err(WsError::Transport)?;

        Ok(request)
    }
}
