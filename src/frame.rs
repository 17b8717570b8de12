//! The frame codec: wire-level encoding and decoding of RFC 6455 frames.
//!
//! This is the hot path of the engine. A [`Frame`] is the smallest
//! transmission unit; [`crate::assembler`] reassembles a sequence of frames
//! into application [`crate::message::Message`]s.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, WsError};

/// Defines the interpretation of the frame payload.
///
/// - 0x0 denotes a continuation frame
/// - 0x1 denotes a text frame
/// - 0x2 denotes a binary frame
/// - 0x3-0x7 are reserved for further non-control frames
/// - 0x8 denotes a connection close
/// - 0x9 denotes a ping
/// - 0xA denotes a pong
/// - 0xB-0xF are reserved for further control frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn try_from_u8(byte: u8) -> Result<OpCode, ProtocolError> {
        match byte {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(ProtocolError::ReservedOpcode(other)),
        }
    }
}

/// A single parsed wire frame. `payload` is always already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: OpCode,
    pub mask_key: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build an unmasked, FIN-set frame (used by server endpoints, or by a client
    /// writer which will mask it separately via [`Frame::masked`]).
    pub fn new(fin: bool, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask_key: None,
            payload,
        }
    }

    /// Apply (or replace) a mask key, XOR-ing the stored payload in place.
    /// Calling this twice with the same key restores the original payload,
    /// since XOR is its own inverse.
    pub fn masked(mut self, mask_key: [u8; 4]) -> Self {
        apply_mask(&mut self.payload, mask_key);
        self.mask_key = Some(mask_key);
        self
    }

    fn validate_control(&self) -> Result<(), ProtocolError> {
        if self.opcode.is_control() {
            if !self.fin {
                return Err(ProtocolError::FragmentedControlFrame);
            }
            if self.payload.len() > 125 {
                return Err(ProtocolError::ControlFrameTooBig);
            }
        }
        Ok(())
    }

    /// Read one frame from the transport.
    ///
    /// `expect_masked` is `true` for a Server endpoint reading Client-sent
    /// frames (which MUST be masked) and `false` for a Client endpoint
    /// reading Server-sent frames (which MUST NOT be masked).
    pub async fn read<R>(reader: &mut R, expect_masked: bool) -> Result<Frame, WsError>
    where
        R: AsyncRead + Unpin,
    {
        let mut head = [0u8; 2];
        reader.read_exact(&mut head).await?;

        let fin = head[0] & 0b1000_0000 != 0;
        let rsv1 = head[0] & 0b0100_0000 != 0;
        let rsv2 = head[0] & 0b0010_0000 != 0;
        let rsv3 = head[0] & 0b0001_0000 != 0;
        if rsv1 || rsv2 || rsv3 {
            return Err(ProtocolError::ReservedBitsSet.into());
        }
        let opcode = OpCode::try_from_u8(head[0] & 0b0000_1111)?;

        let masked = head[1] & 0b1000_0000 != 0;
        if masked != expect_masked {
            let err = if expect_masked {
                ProtocolError::UnmaskedFrameFromClient
            } else {
                ProtocolError::MaskedFrameFromServer
            };
            return Err(err.into());
        }

        let len7 = head[1] & 0b0111_1111;
        let payload_len: u64 = match len7 {
            0..=125 => len7 as u64,
            126 => {
                let mut buf = [0u8; 2];
                reader.read_exact(&mut buf).await?;
                u16::from_be_bytes(buf) as u64
            }
            127 => {
                let mut buf = [0u8; 8];
                reader.read_exact(&mut buf).await?;
                let len = u64::from_be_bytes(buf);
                if len & 0x8000_0000_0000_0000 != 0 {
                    return Err(ProtocolError::PayloadLengthOverflow.into());
                }
                len
            }
            _ => unreachable!("7-bit field cannot exceed 127"),
        };

        let mask_key = if masked {
            let mut key = [0u8; 4];
            reader.read_exact(&mut key).await?;
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; payload_len as usize];
        reader.read_exact(&mut payload).await?;
        if let Some(key) = mask_key {
            apply_mask(&mut payload, key);
        }

        let frame = Frame {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            mask_key,
            payload,
        };
        frame.validate_control()?;
        Ok(frame)
    }

    /// Serialize this frame to wire format: header, optional mask key, masked payload.
    /// The smallest length field that fits the payload is always chosen.
    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len();
        let mut head: Vec<u8> = Vec::with_capacity(14 + len);

        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= 0b1000_0000;
        }
        head.push(byte0);

        let mask_bit = if self.mask_key.is_some() { 0b1000_0000 } else { 0 };
        if len < 126 {
            head.push(mask_bit | len as u8);
        } else if len <= 0xFFFF {
            head.push(mask_bit | 126);
            head.extend_from_slice(&(len as u16).to_be_bytes());
        } else {
            head.push(mask_bit | 127);
            head.extend_from_slice(&(len as u64).to_be_bytes());
        }

        if let Some(key) = self.mask_key {
            head.extend_from_slice(&key);
        }
        head.extend_from_slice(&self.payload);
        head
    }

    /// Write this frame to the transport.
    pub async fn write<W>(&self, writer: &mut W) -> Result<(), WsError>
    where
        W: AsyncWrite + Unpin,
    {
        self.validate_control()?;
        writer.write_all(&self.encode()).await?;
        Ok(())
    }
}

/// XOR each payload byte against the 4-byte mask key, cycling the key.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn roundtrip_small_unmasked_text_frame() {
        let frame = Frame::new(true, OpCode::Text, b"Hello".to_vec());
        let wire = frame.encode();
        assert_eq!(wire[0], 0x81);
        assert_eq!(wire[1], 5);

        let mut cursor = Cursor::new(wire);
        let decoded = Frame::read(&mut cursor, false).await.unwrap();
        assert_eq!(decoded.payload, b"Hello");
        assert_eq!(decoded.opcode, OpCode::Text);
        assert!(decoded.fin);
    }

    #[tokio::test]
    async fn roundtrip_masked_frame() {
        let frame = Frame::new(true, OpCode::Binary, vec![1, 2, 3, 4, 5]).masked([9, 8, 7, 6]);
        let wire = frame.encode();
        assert_eq!(wire[1] & 0x80, 0x80);

        let mut cursor = Cursor::new(wire);
        let decoded = Frame::read(&mut cursor, true).await.unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn length_field_widths() {
        for len in [0usize, 125, 126, 65535, 65536] {
            let payload = vec![0x42; len];
            let frame = Frame::new(true, OpCode::Binary, payload.clone());
            let wire = frame.encode();
            match len {
                0..=125 => assert_eq!(wire[1], len as u8),
                126..=65535 => assert_eq!(wire[1], 126),
                _ => assert_eq!(wire[1], 127),
            }
            let mut cursor = Cursor::new(wire);
            let decoded = Frame::read(&mut cursor, false).await.unwrap();
            assert_eq!(decoded.payload.len(), len);
            assert_eq!(decoded.payload, payload);
        }
    }

    #[tokio::test]
    async fn rejects_reserved_bits() {
        let mut wire = Frame::new(true, OpCode::Text, b"hi".to_vec()).encode();
        wire[0] |= 0b0100_0000; // set RSV1
        let mut cursor = Cursor::new(wire);
        let err = Frame::read(&mut cursor, false).await.unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[tokio::test]
    async fn rejects_mask_direction_violation() {
        let wire = Frame::new(true, OpCode::Text, b"hi".to_vec()).encode();
        let mut cursor = Cursor::new(wire);
        // Server reading a client frame expects it masked; this one isn't.
        let err = Frame::read(&mut cursor, true).await.unwrap_err();
        assert!(matches!(
            err,
            WsError::Protocol(ProtocolError::UnmaskedFrameFromClient)
        ));
    }

    #[tokio::test]
    async fn rejects_fragmented_control_frame() {
        let mut frame = Frame::new(false, OpCode::Ping, vec![1, 2, 3]);
        frame.fin = false;
        let mut cursor = Cursor::new(frame.encode());
        let err = Frame::read(&mut cursor, false).await.unwrap_err();
        assert!(matches!(
            err,
            WsError::Protocol(ProtocolError::FragmentedControlFrame)
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_control_frame() {
        let frame = Frame::new(true, OpCode::Ping, vec![0u8; 126]);
        let mut cursor = Cursor::new(frame.encode());
        let err = Frame::read(&mut cursor, false).await.unwrap_err();
        assert!(matches!(
            err,
            WsError::Protocol(ProtocolError::ControlFrameTooBig)
        ));
    }

    #[test]
    fn mask_is_its_own_inverse() {
        let mut data = b"round trip me".to_vec();
        let key = [0xDE, 0xAD, 0xBE, 0xEF];
        apply_mask(&mut data, key);
        apply_mask(&mut data, key);
        assert_eq!(&data, b"round trip me");
    }
}
