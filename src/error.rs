//! Error taxonomy for the protocol engine.
//!
//! Every fallible operation in this crate returns [`WsError`] rather than a
//! boxed `dyn Error`, so callers can match on the specific failure mode
//! instead of stringly-typed diagnostics.

use thiserror::Error;

/// Top-level error type returned by handshake, framing, and session operations.
#[derive(Debug, Error)]
pub enum WsError {
    /// The HTTP upgrade exchange was malformed, rejected, or failed key verification.
    /// No [`crate::connection::WebSocket`] handle is produced when this is returned.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// A frame or sequence of frames violated RFC 6455 framing rules.
    /// The connection enters `Closed` with the close code carried by the variant.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer (or local user code) violated an application-level policy,
    /// such as sending an oversized message.
    #[error("policy violation: {0}")]
    Policy(#[from] PolicyError),

    /// The underlying transport failed to read or write.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// I/O was attempted on a handle that is not in the `Open` state.
    #[error("websocket is not open (state: {0})")]
    Closed(&'static str),

    /// Caller-supplied argument was invalid (bad URL, oversized control payload, ...).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl WsError {
    /// The close code this error implies, if any, per RFC 6455 §7.4.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WsError::Protocol(p) => Some(p.close_code()),
            WsError::Policy(p) => Some(p.close_code()),
            WsError::Transport(_) => Some(1006),
            _ => None,
        }
    }
}

/// Failures during the HTTP upgrade handshake.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing or invalid `Upgrade: websocket` header")]
    MissingUpgradeHeader,
    #[error("missing or invalid `Connection: Upgrade` header")]
    MissingConnectionHeader,
    #[error("unsupported `Sec-WebSocket-Version`: expected 13")]
    UnsupportedVersion,
    #[error("missing `Sec-WebSocket-Key` header")]
    MissingKey,
    #[error("`Sec-WebSocket-Key` did not base64-decode to 16 bytes")]
    MalformedKey,
    #[error("`Sec-WebSocket-Accept` value did not match the expected derivation")]
    AcceptKeyMismatch,
    #[error("requested subprotocol `{0}` is not supported by this server")]
    UnsupportedSubprotocol(String),
    #[error("URL scheme must be `ws` or `wss`, got `{0}`")]
    UnsupportedScheme(String),
    #[error("URL fragments (`#...`) are not allowed in a WebSocket URL")]
    FragmentNotAllowed,
    #[error("malformed HTTP request or response: {0}")]
    MalformedHttp(String),
    #[error("server responded with status {0}, handshake not upgraded")]
    NotUpgraded(u16),
}

/// Failures while decoding or validating wire frames, per RFC 6455 §5.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("reserved bits (RSV1-3) were set without a negotiated extension")]
    ReservedBitsSet,
    #[error("reserved opcode {0:#x} is not supported")]
    ReservedOpcode(u8),
    #[error("a server received an unmasked frame")]
    UnmaskedFrameFromClient,
    #[error("a client received a masked frame")]
    MaskedFrameFromServer,
    #[error("control frames must not be fragmented")]
    FragmentedControlFrame,
    #[error("control frame payload exceeds 125 bytes")]
    ControlFrameTooBig,
    #[error("received a CONTINUATION frame with no message in progress")]
    UnexpectedContinuation,
    #[error("received a data frame while a fragmented message was in progress")]
    ExpectedContinuation,
    #[error("close frame payload must be empty or at least 2 bytes, got {0}")]
    InvalidCloseLength(usize),
    #[error("text message was not valid UTF-8")]
    InvalidUtf8,
    #[error("8-byte extended payload length had its high bit set")]
    PayloadLengthOverflow,
}

impl ProtocolError {
    /// The close code this violation mandates, per RFC 6455 §7.4.
    pub fn close_code(&self) -> u16 {
        match self {
            ProtocolError::InvalidUtf8 => 1007,
            _ => 1002,
        }
    }
}

/// Application-level policy violations (not RFC framing violations).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("message of {0} bytes exceeds the configured maximum")]
    MessageTooLarge(usize),
    #[error("message rejected by application policy")]
    Rejected,
}

impl PolicyError {
    /// The close code this violation mandates, per RFC 6455 §7.4.
    pub fn close_code(&self) -> u16 {
        match self {
            PolicyError::MessageTooLarge(_) => 1009,
            PolicyError::Rejected => 1008,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_close_codes() {
        assert_eq!(ProtocolError::InvalidUtf8.close_code(), 1007);
        assert_eq!(ProtocolError::ReservedBitsSet.close_code(), 1002);
        assert_eq!(ProtocolError::UnexpectedContinuation.close_code(), 1002);
    }

    #[test]
    fn policy_error_close_codes() {
        assert_eq!(PolicyError::MessageTooLarge(10).close_code(), 1009);
        assert_eq!(PolicyError::Rejected.close_code(), 1008);
    }

    #[test]
    fn ws_error_forwards_close_code() {
        let e: WsError = ProtocolError::InvalidUtf8.into();
        assert_eq!(e.close_code(), Some(1007));
        let e = WsError::Closed("Open");
        assert_eq!(e.close_code(), None);
    }
}
