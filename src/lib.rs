//! A WebSocket protocol engine implementing RFC 6455 for both client and
//! server roles: handshake, frame codec, connection state machine, message
//! assembler, and a session façade on top.
//!
//! The transport is anything implementing
//! `tokio::io::{AsyncRead, AsyncWrite} + Unpin + Send`: plain TCP, TLS, or
//! an in-memory pipe for tests. TLS itself, extensions (permessage-deflate),
//! and multiplexing are out of scope.

pub mod assembler;
pub mod client;
pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod server;

pub use assembler::{AssembledEvent, Assembler};
pub use client::{connect, open, parse_ws_url, WsUrl};
pub use close::{Close, CloseCode};
pub use config::{ClientConfig, RateLimit, ServerConfig, TlsConfig};
pub use connection::{ConnState, Role, WebSocket};
pub use error::{HandshakeError, PolicyError, ProtocolError, WsError};
pub use frame::{Frame, OpCode};
pub use message::Message;
pub use server::{ServerEvent, WebSocketServer};
