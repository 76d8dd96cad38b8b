//! Reassembly of fragmented messages.
//!
//! Data frames with FIN=0 open (or extend) a message; their payloads are
//! concatenated in arrival order until a frame with FIN=1 closes it.
//! Control frames pass straight through and leave the partial message alone.

use bytes::{Bytes, BytesMut};

use crate::codec::ProtocolError;
use crate::frames::{Frame, OpCode};

/// Default cap on a reassembled message (16 MiB).
pub const DEFAULT_MAX_MESSAGE: usize = 16 * 1024 * 1024;

/// A complete inbound message or control signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text message.
    Text(String),
    /// Binary message.
    Binary(Bytes),
    /// Ping with its application data.
    Ping(Bytes),
    /// Pong with its application data.
    Pong(Bytes),
    /// Close request.
    Close(Bytes),
}

/// Joins continuation frames into whole messages.
#[derive(Debug)]
pub struct Assembler {
    /// Opcode of the message in progress.
    opcode: Option<OpCode>,
    buffer: BytesMut,
    max_message: usize,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE)
    }
}

impl Assembler {
    /// Create an assembler that rejects messages larger than `max_message`.
    #[must_use]
    pub fn new(max_message: usize) -> Self {
        Self {
            opcode: None,
            buffer: BytesMut::new(),
            max_message,
        }
    }

    /// Whether a fragmented message is waiting for more frames.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }

    /// Feed one frame.
    ///
    /// Returns `Ok(Some(message))` when the frame completes a message or is
    /// a control frame, `Ok(None)` when more fragments are needed.
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-order fragments, oversized messages, or
    /// text that is not valid UTF-8. The partial message is discarded.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            OpCode::Ping => return Ok(Some(Message::Ping(frame.payload))),
            OpCode::Pong => return Ok(Some(Message::Pong(frame.payload))),
            OpCode::Close => return Ok(Some(Message::Close(frame.payload))),
            OpCode::Continuation => {
                if self.opcode.is_none() {
                    return Err(ProtocolError::Fragmentation(
                        "continuation without a message in progress",
                    ));
                }
            }
            OpCode::Text | OpCode::Binary => {
                if self.opcode.is_some() {
                    self.reset();
                    return Err(ProtocolError::Fragmentation(
                        "new message before previous one finished",
                    ));
                }
                if frame.fin {
                    if frame.payload.len() > self.max_message {
                        return Err(ProtocolError::TooLarge(
                            frame.payload.len() as u64,
                            self.max_message,
                        ));
                    }
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.opcode = Some(frame.opcode);
            }
        }

        if self.buffer.len() + frame.payload.len() > self.max_message {
            let len = (self.buffer.len() + frame.payload.len()) as u64;
            self.reset();
            return Err(ProtocolError::TooLarge(len, self.max_message));
        }
        self.buffer.extend_from_slice(&frame.payload);

        if !frame.fin {
            return Ok(None);
        }

        let opcode = self.opcode.take().unwrap_or(OpCode::Binary);
        let payload = self.buffer.split().freeze();
        finish(opcode, payload).map(Some)
    }

    fn reset(&mut self) {
        self.opcode = None;
        self.buffer.clear();
    }
}

fn finish(opcode: OpCode, payload: Bytes) -> Result<Message, ProtocolError> {
    match opcode {
        OpCode::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| ProtocolError::InvalidUtf8),
        _ => Ok(Message::Binary(payload)),
    }
}
