//! Close codes and the terminal [`Close`] value, per RFC 6455 §7.4.

use std::fmt;

/// Status code carried by a CLOSE frame, explaining why an endpoint is closing.
///
/// Codes 1000-1015 have assigned meanings; codes 3000-3999 are reserved for
/// libraries/frameworks and 4000-4999 for private use. 1005, 1006, and 1015
/// are reserved for local use and MUST NOT appear on the wire (see
/// [`CloseCode::is_sendable`]).
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CloseCode {
    /// Normal closure; the purpose for which the connection was established has been fulfilled.
    Normal,
    /// An endpoint is "going away", e.g. a server shutting down or a browser navigating away.
    GoingAway,
    /// The endpoint is terminating the connection due to a protocol error.
    ProtocolError,
    /// The endpoint received a data type it cannot accept.
    UnsupportedData,
    /// Reserved; indicates that no status code was present in the frame. Never sent on the wire.
    NoStatusReceived,
    /// Reserved; the connection was closed abnormally without a closing frame. Never sent on the wire.
    AbnormalClosure,
    /// The endpoint received data that was not consistent with the message type (e.g. non-UTF-8 text).
    InvalidFramePayloadData,
    /// The endpoint received a message that violates its policy.
    PolicyViolation,
    /// The endpoint received a message that is too big to process.
    MessageTooBig,
    /// The client expected the server to negotiate an extension that it did not return.
    MandatoryExtension,
    /// The server encountered an unexpected condition.
    InternalError,
    /// Reserved; TLS handshake failure. Never sent on the wire.
    TlsHandshake,
    /// Any other IANA-registered, library-reserved, or private-use code.
    Other(u16),
}

impl CloseCode {
    /// Whether this code is legal to place in an outbound CLOSE frame.
    ///
    /// `NoStatusReceived`, `AbnormalClosure`, and `TlsHandshake` are synthetic
    /// codes used only to describe a *local* observation; a CLOSE frame that
    /// would carry one of them MUST substitute 1000 instead.
    pub fn is_sendable(self) -> bool {
        !matches!(
            self,
            CloseCode::NoStatusReceived | CloseCode::AbnormalClosure | CloseCode::TlsHandshake
        )
    }

    /// The code to actually place on the wire, substituting 1000 for the non-sendable codes.
    pub fn for_wire(self) -> CloseCode {
        if self.is_sendable() {
            self
        } else {
            CloseCode::Normal
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        use CloseCode::*;
        match code {
            Normal => 1000,
            GoingAway => 1001,
            ProtocolError => 1002,
            UnsupportedData => 1003,
            NoStatusReceived => 1005,
            AbnormalClosure => 1006,
            InvalidFramePayloadData => 1007,
            PolicyViolation => 1008,
            MessageTooBig => 1009,
            MandatoryExtension => 1010,
            InternalError => 1011,
            TlsHandshake => 1015,
            Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> CloseCode {
        use CloseCode::*;
        match code {
            1000 => Normal,
            1001 => GoingAway,
            1002 => ProtocolError,
            1003 => UnsupportedData,
            1005 => NoStatusReceived,
            1006 => AbnormalClosure,
            1007 => InvalidFramePayloadData,
            1008 => PolicyViolation,
            1009 => MessageTooBig,
            1010 => MandatoryExtension,
            1011 => InternalError,
            1015 => TlsHandshake,
            other => Other(other),
        }
    }
}

/// A terminal close value: the negotiated code plus an optional UTF-8 reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Close {
    pub code: CloseCode,
    pub reason: String,
}

impl Close {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// The synthetic "no status received" close, used when a CLOSE frame arrives empty.
    pub fn no_status() -> Self {
        Self {
            code: CloseCode::NoStatusReceived,
            reason: String::new(),
        }
    }

    /// The synthetic close recorded when the transport faults or times out.
    pub fn abnormal() -> Self {
        Self {
            code: CloseCode::AbnormalClosure,
            reason: String::new(),
        }
    }

    /// Encode this close as a CLOSE frame payload: 2-byte big-endian code, then the UTF-8 reason.
    /// Substitutes 1000 for codes that must never appear on the wire.
    pub fn to_payload(&self) -> Vec<u8> {
        let code: u16 = self.code.for_wire().into();
        let mut buf = Vec::with_capacity(2 + self.reason.len());
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(self.reason.as_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_code_roundtrip() {
        assert_eq!(CloseCode::from(1008u16), CloseCode::PolicyViolation);
        assert_eq!(u16::from(CloseCode::GoingAway), 1001u16);
    }

    #[test]
    fn non_sendable_codes_substitute_normal_on_wire() {
        assert_eq!(CloseCode::AbnormalClosure.for_wire(), CloseCode::Normal);
        assert_eq!(CloseCode::NoStatusReceived.for_wire(), CloseCode::Normal);
        assert_eq!(CloseCode::ProtocolError.for_wire(), CloseCode::ProtocolError);
    }

    #[test]
    fn close_payload_encoding() {
        let c = Close::new(CloseCode::Normal, "bye");
        assert_eq!(c.to_payload(), [0x03, 0xE8, b'b', b'y', b'e']);
    }

    #[test]
    fn abnormal_close_never_sent_as_1006() {
        let c = Close::abnormal();
        let payload = c.to_payload();
        assert_eq!(&payload[..2], &1000u16.to_be_bytes());
    }
}
