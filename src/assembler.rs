//! Reassembles a stream of frames into application messages.
//!
//! Control frames (CLOSE/PING/PONG) are never fragmented and are surfaced
//! immediately without disturbing an in-progress fragmented data message.

use crate::close::Close;
use crate::error::{ProtocolError, WsError};
use crate::frame::{Frame, OpCode};
use crate::message::Message;

/// One event produced by feeding a frame into the [`Assembler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembledEvent {
    /// A complete application message (the FIN frame of a possibly-fragmented sequence arrived).
    Message(Message),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(Close),
}

#[derive(Debug)]
enum InProgress {
    None,
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl Default for InProgress {
    fn default() -> Self {
        InProgress::None
    }
}

/// Stateful reassembler: feed it frames in wire order, get messages and
/// control events back out.
#[derive(Debug, Default)]
pub struct Assembler {
    in_progress: InProgress,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame in. Returns `Ok(None)` for a non-final fragment of a
    /// data message; `Ok(Some(event))` when a message or control event is ready.
    pub fn push(&mut self, frame: Frame) -> Result<Option<AssembledEvent>, WsError> {
        if frame.opcode.is_control() {
            return Ok(Some(self.handle_control(frame)?));
        }
        self.handle_data(frame)
    }

    fn handle_control(&self, frame: Frame) -> Result<AssembledEvent, WsError> {
        match frame.opcode {
            OpCode::Ping => Ok(AssembledEvent::Ping(frame.payload)),
            OpCode::Pong => Ok(AssembledEvent::Pong(frame.payload)),
            OpCode::Close => Ok(AssembledEvent::Close(decode_close_payload(&frame.payload)?)),
            _ => unreachable!("is_control() only true for Ping/Pong/Close"),
        }
    }

    fn handle_data(&mut self, frame: Frame) -> Result<Option<AssembledEvent>, WsError> {
        match (&mut self.in_progress, frame.opcode) {
            (InProgress::None, OpCode::Continuation) => {
                Err(ProtocolError::UnexpectedContinuation.into())
            }
            (InProgress::None, OpCode::Text) => {
                self.in_progress = InProgress::Text(frame.payload);
                self.finish_if_done(frame.fin)
            }
            (InProgress::None, OpCode::Binary) => {
                self.in_progress = InProgress::Binary(frame.payload);
                self.finish_if_done(frame.fin)
            }
            (InProgress::Text(_) | InProgress::Binary(_), OpCode::Continuation) => {
                match &mut self.in_progress {
                    InProgress::Text(buf) | InProgress::Binary(buf) => {
                        buf.extend_from_slice(&frame.payload)
                    }
                    InProgress::None => unreachable!(),
                }
                self.finish_if_done(frame.fin)
            }
            (InProgress::Text(_) | InProgress::Binary(_), OpCode::Text | OpCode::Binary) => {
                Err(ProtocolError::ExpectedContinuation.into())
            }
            (_, OpCode::Close | OpCode::Ping | OpCode::Pong) => {
                unreachable!("control opcodes are routed to handle_control")
            }
        }
    }

    fn finish_if_done(&mut self, fin: bool) -> Result<Option<AssembledEvent>, WsError> {
        if !fin {
            return Ok(None);
        }
        let completed = std::mem::replace(&mut self.in_progress, InProgress::None);
        let message = match completed {
            InProgress::Text(buf) => {
                let text = String::from_utf8(buf).map_err(|_| ProtocolError::InvalidUtf8)?;
                Message::Text(text)
            }
            InProgress::Binary(buf) => Message::Binary(buf),
            InProgress::None => unreachable!("finish_if_done only called mid-message"),
        };
        Ok(Some(AssembledEvent::Message(message)))
    }
}

fn decode_close_payload(payload: &[u8]) -> Result<Close, WsError> {
    if payload.is_empty() {
        return Ok(Close::no_status());
    }
    if payload.len() < 2 {
        return Err(ProtocolError::InvalidCloseLength(payload.len()).into());
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8(payload[2..].to_vec()).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(Close::new(code.into(), reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::CloseCode;

    fn data(fin: bool, opcode: OpCode, payload: &[u8]) -> Frame {
        Frame::new(fin, opcode, payload.to_vec())
    }

    #[test]
    fn single_frame_text_message() {
        let mut asm = Assembler::new();
        let ev = asm.push(data(true, OpCode::Text, b"hi")).unwrap().unwrap();
        assert_eq!(ev, AssembledEvent::Message(Message::Text("hi".into())));
    }

    #[test]
    fn fragmented_binary_message_reassembles() {
        let mut asm = Assembler::new();
        assert!(asm.push(data(false, OpCode::Binary, &[1, 2])).unwrap().is_none());
        assert!(asm.push(data(false, OpCode::Continuation, &[3, 4])).unwrap().is_none());
        let ev = asm
            .push(data(true, OpCode::Continuation, &[5]))
            .unwrap()
            .unwrap();
        assert_eq!(ev, AssembledEvent::Message(Message::Binary(vec![1, 2, 3, 4, 5])));
    }

    #[test]
    fn control_frame_interleaves_without_disturbing_fragment() {
        let mut asm = Assembler::new();
        assert!(asm.push(data(false, OpCode::Text, b"par")).unwrap().is_none());
        let ping = asm.push(data(true, OpCode::Ping, b"p")).unwrap().unwrap();
        assert_eq!(ping, AssembledEvent::Ping(b"p".to_vec()));
        let ev = asm
            .push(data(true, OpCode::Continuation, b"t"))
            .unwrap()
            .unwrap();
        assert_eq!(ev, AssembledEvent::Message(Message::Text("part".into())));
    }

    #[test]
    fn continuation_without_start_is_protocol_error() {
        let mut asm = Assembler::new();
        let err = asm.push(data(true, OpCode::Continuation, b"x")).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn new_data_frame_mid_fragment_is_protocol_error() {
        let mut asm = Assembler::new();
        asm.push(data(false, OpCode::Text, b"a")).unwrap();
        let err = asm.push(data(true, OpCode::Binary, b"b")).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn invalid_utf8_closes_with_1007() {
        let mut asm = Assembler::new();
        let err = asm.push(data(true, OpCode::Text, &[0xC0])).unwrap_err();
        assert_eq!(err.close_code(), Some(1007));
    }

    #[test]
    fn empty_close_payload_yields_no_status_received() {
        let mut asm = Assembler::new();
        let ev = asm.push(data(true, OpCode::Close, &[])).unwrap().unwrap();
        assert_eq!(ev, AssembledEvent::Close(Close::no_status()));
    }

    #[test]
    fn one_byte_close_payload_is_protocol_error() {
        let mut asm = Assembler::new();
        let err = asm.push(data(true, OpCode::Close, &[0x03])).unwrap_err();
        assert_eq!(err.close_code(), Some(1002));
    }

    #[test]
    fn close_payload_with_code_and_reason() {
        let mut asm = Assembler::new();
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let ev = asm.push(data(true, OpCode::Close, &payload)).unwrap().unwrap();
        assert_eq!(
            ev,
            AssembledEvent::Close(Close::new(CloseCode::Normal, "bye"))
        );
    }
}
