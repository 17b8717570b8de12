//! The connection state machine and session façade: the single [`WebSocket`]
//! handle both clients and servers read messages from and write messages to,
//! once the handshake in [`crate::handshake`] has completed.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::assembler::{AssembledEvent, Assembler};
use crate::close::{Close, CloseCode};
use crate::error::{ProtocolError, WsError};
use crate::frame::{Frame, OpCode};
use crate::message::Message;

/// Which side of the connection this handle represents. Determines whether
/// outbound frames are masked (`Client`) and which direction of masking is
/// expected on read (`Server` expects masked frames from its peer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The connection's position in the RFC 6455 closing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    /// We sent a CLOSE frame and are waiting for the peer's.
    ClosingSentLocal,
    /// The peer sent a CLOSE frame and we have echoed ours back.
    ClosingReceivedRemote,
    Closed,
}

impl ConnState {
    fn as_str(self) -> &'static str {
        match self {
            ConnState::Open => "Open",
            ConnState::ClosingSentLocal => "ClosingSentLocal",
            ConnState::ClosingReceivedRemote => "ClosingReceivedRemote",
            ConnState::Closed => "Closed",
        }
    }
}

struct ReadSide<S> {
    io: ReadHalf<S>,
    assembler: Assembler,
}

/// A live WebSocket connection. Cheap to share: reads and writes each take
/// their own lock, so a concurrent reader and writer never block each other.
pub struct WebSocket<S> {
    role: Role,
    read_side: Mutex<ReadSide<S>>,
    writer: Mutex<WriteHalf<S>>,
    state: Mutex<ConnState>,
    close_info: Mutex<Option<Close>>,
    read_timeout: Duration,
    chunk_size: Option<usize>,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already-upgraded duplex stream in a [`WebSocket`] handle.
    /// Used by [`crate::client::open`] and [`crate::server::WebSocketServer`]
    /// once their handshake completes; also the entry point for tests and
    /// for embedders who perform the HTTP upgrade with their own stack and
    /// only need the post-handshake framing.
    pub fn new(io: S, role: Role, read_timeout: Duration, chunk_size: Option<usize>) -> Self {
        let (read_half, write_half) = tokio::io::split(io);
        WebSocket {
            role,
            read_side: Mutex::new(ReadSide {
                io: read_half,
                assembler: Assembler::new(),
            }),
            writer: Mutex::new(write_half),
            state: Mutex::new(ConnState::Open),
            close_info: Mutex::new(None),
            read_timeout,
            chunk_size,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub async fn state(&self) -> ConnState {
        *self.state.lock().await
    }

    /// The close code and reason observed during shutdown, once the
    /// connection has left `Open`. `None` while still open.
    pub async fn close_info(&self) -> Option<Close> {
        self.close_info.lock().await.clone()
    }

    /// Frames this side reads MUST be masked iff we're a server (clients mask, servers don't).
    fn expect_masked_frames(&self) -> bool {
        self.role == Role::Server
    }

    fn build_frame(&self, fin: bool, opcode: OpCode, payload: Vec<u8>) -> Frame {
        let frame = Frame::new(fin, opcode, payload);
        match self.role {
            Role::Client => frame.masked(rand::random()),
            Role::Server => frame,
        }
    }

    async fn set_state(&self, state: ConnState) {
        *self.state.lock().await = state;
    }

    async fn set_closed(&self, close: Close) {
        *self.close_info.lock().await = Some(close);
        self.set_state(ConnState::Closed).await;
    }

    async fn ensure_writable(&self) -> Result<(), WsError> {
        let state = *self.state.lock().await;
        if state == ConnState::Open {
            Ok(())
        } else {
            Err(WsError::Closed(state.as_str()))
        }
    }

    async fn ensure_readable(&self) -> Result<(), WsError> {
        let state = *self.state.lock().await;
        if state == ConnState::Closed {
            Err(WsError::Closed(state.as_str()))
        } else {
            Ok(())
        }
    }

    async fn read_one_frame(&self, guard: &mut ReadSide<S>) -> Result<Frame, WsError> {
        match timeout(self.read_timeout, Frame::read(&mut guard.io, self.expect_masked_frames())).await {
            Ok(result) => result,
            Err(_elapsed) => Err(WsError::Transport(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no frame received within read_timeout",
            ))),
        }
    }

    async fn write_frame(&self, frame: &Frame) -> Result<(), WsError> {
        let mut writer = self.writer.lock().await;
        frame.write(&mut *writer).await
    }

    async fn write_control(&self, opcode: OpCode, payload: Vec<u8>) -> Result<(), WsError> {
        if payload.len() > 125 {
            return Err(ProtocolError::ControlFrameTooBig.into());
        }
        self.ensure_writable().await?;
        let frame = self.build_frame(true, opcode, payload);
        self.write_frames(vec![frame]).await
    }

    /// Write every frame of a message while holding the write lock for the
    /// whole sequence, so a concurrent `write_message` call can never
    /// interleave its own frames with this message's fragments.
    async fn write_frames(&self, frames: Vec<Frame>) -> Result<(), WsError> {
        let mut writer = self.writer.lock().await;
        for frame in &frames {
            frame.write(&mut *writer).await?;
        }
        Ok(())
    }

    /// Send an unsolicited PING. The peer's PONG (or application PONGs)
    /// surface only as a silent continuation of [`WebSocket::read_message`];
    /// this engine does not correlate PONGs back to a particular PING.
    pub async fn ping(&self, payload: Vec<u8>) -> Result<(), WsError> {
        self.write_control(OpCode::Ping, payload).await
    }

    /// Send an unsolicited PONG, e.g. as a keepalive not in response to a PING.
    pub async fn pong(&self, payload: Vec<u8>) -> Result<(), WsError> {
        self.write_control(OpCode::Pong, payload).await
    }

    /// Send one application message, fragmenting it into `chunk_size`-sized
    /// frames if configured and the payload exceeds that size.
    pub async fn write_message(&self, message: impl Into<Message>) -> Result<(), WsError> {
        self.ensure_writable().await?;
        let message = message.into();
        let opcode = match &message {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
        };
        let payload = message.into_bytes();

        let frames = match self.chunk_size {
            Some(chunk) if payload.len() > chunk && chunk > 0 => {
                let mut frames = Vec::new();
                let mut offset = 0;
                let mut first = true;
                while offset < payload.len() {
                    let end = (offset + chunk).min(payload.len());
                    let is_last = end == payload.len();
                    let op = if first { opcode } else { OpCode::Continuation };
                    frames.push(self.build_frame(is_last, op, payload[offset..end].to_vec()));
                    offset = end;
                    first = false;
                }
                frames
            }
            _ => vec![self.build_frame(true, opcode, payload)],
        };
        self.write_frames(frames).await
    }

    /// Read the next application message, transparently answering PINGs with
    /// PONGs and skipping PONGs, as it goes. The PONG reply to a PING is
    /// written before this call returns control to the caller, so a peer's
    /// PING is always answered no later than the next message delivery.
    ///
    /// Returns `Err(WsError::Closed(..))` once a CLOSE frame has been seen
    /// and the closing handshake completed; after that every call returns
    /// the same error without touching the transport again.
    pub async fn read_message(&self) -> Result<Message, WsError> {
        loop {
            self.ensure_readable().await?;
            let mut guard = self.read_side.lock().await;
            let frame = match self.read_one_frame(&mut guard).await {
                Ok(frame) => frame,
                Err(e) => {
                    drop(guard);
                    self.set_closed(Close::abnormal()).await;
                    return Err(e);
                }
            };
            let event = guard.assembler.push(frame);
            drop(guard);

            match event {
                Err(e) => {
                    let code = CloseCode::from(e.close_code().unwrap_or(1002));
                    let _ = self.send_close_frame(&Close::new(code, String::new())).await;
                    self.set_closed(Close::new(code, String::new())).await;
                    return Err(e);
                }
                Ok(None) => continue,
                Ok(Some(AssembledEvent::Message(message))) => return Ok(message),
                Ok(Some(AssembledEvent::Ping(payload))) => {
                    self.write_control(OpCode::Pong, payload).await?;
                    continue;
                }
                Ok(Some(AssembledEvent::Pong(_))) => continue,
                Ok(Some(AssembledEvent::Close(close))) => {
                    self.handle_peer_close(close).await;
                    return Err(WsError::Closed("Closed"));
                }
            }
        }
    }

    async fn send_close_frame(&self, close: &Close) -> Result<(), WsError> {
        let frame = self.build_frame(true, OpCode::Close, close.to_payload());
        self.write_frame(&frame).await
    }

    /// Called when a CLOSE frame arrives from the peer without us having
    /// initiated closure first. Echoes the close back (per RFC 6455 §5.5.1)
    /// and transitions straight to `Closed`: an echoed close is not followed
    /// by waiting on anything further from the peer.
    async fn handle_peer_close(&self, close: Close) {
        let already_closing = *self.state.lock().await != ConnState::Open;
        if !already_closing {
            self.set_state(ConnState::ClosingReceivedRemote).await;
            let _ = self.send_close_frame(&close).await;
        }
        self.set_closed(close).await;
    }

    /// Initiate a local close: send our CLOSE frame, then wait (bounded by
    /// `read_timeout`) for the peer's CLOSE frame, discarding any other
    /// frames that arrive in the meantime. Idempotent once `Closed`.
    pub async fn close(&self, code: CloseCode, reason: impl Into<String>) -> Result<(), WsError> {
        if self.state().await == ConnState::Closed {
            return Ok(());
        }
        let close = Close::new(code, reason.into());
        self.ensure_writable().await?;
        self.send_close_frame(&close).await?;
        self.set_state(ConnState::ClosingSentLocal).await;
        self.wait_for_peer_close().await
    }

    async fn wait_for_peer_close(&self) -> Result<(), WsError> {
        loop {
            let mut guard = self.read_side.lock().await;
            let frame = match self.read_one_frame(&mut guard).await {
                Ok(frame) => frame,
                Err(_) => {
                    drop(guard);
                    let _ = self.writer.lock().await.shutdown().await;
                    self.set_closed(Close::abnormal()).await;
                    return Ok(());
                }
            };
            let event = guard.assembler.push(frame);
            drop(guard);
            match event {
                Ok(Some(AssembledEvent::Close(close))) => {
                    self.set_closed(close).await;
                    return Ok(());
                }
                Ok(Some(AssembledEvent::Ping(payload))) => {
                    self.write_control(OpCode::Pong, payload).await?;
                    continue;
                }
                // Any other frame arriving after we've initiated a close is discarded.
                _ => continue,
            }
        }
    }
}
