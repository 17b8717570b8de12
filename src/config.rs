//! Tunables shared by clients and servers: read deadlines, simple rate
//! limiting, write-side fragmentation, and a TLS slot left for the caller
//! to wire up.

use std::time::Duration;

/// A permissive token-bucket description: `count` events per `per`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub per: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        RateLimit {
            count: 10,
            per: Duration::from_secs(1),
        }
    }
}

/// Opaque slot for a caller-supplied TLS client config. This crate does not
/// depend on a TLS implementation; wiring one in is left to the embedder,
/// who connects over it before handing the stream to [`crate::client::open`].
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub server_name_override: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a read may block before the connection is treated as dead
    /// (recorded as close code 1006). Applies uniformly to the open
    /// connection and to the closing handshake's final read.
    pub read_timeout: Duration,
    pub rate_limit: RateLimit,
    /// If set, outbound messages larger than this are fragmented into
    /// chunks of this size. `None` sends every message as one frame.
    pub chunk_size: Option<usize>,
    pub tls_config: Option<TlsConfig>,
    pub subprotocols: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            read_timeout: Duration::from_secs(180),
            rate_limit: RateLimit::default(),
            chunk_size: None,
            tls_config: None,
            subprotocols: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub read_timeout: Duration,
    pub chunk_size: Option<usize>,
    pub tls_config: Option<TlsConfig>,
    pub subprotocol: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            read_timeout: Duration::from_secs(180),
            chunk_size: None,
            tls_config: None,
            subprotocol: None,
        }
    }
}
