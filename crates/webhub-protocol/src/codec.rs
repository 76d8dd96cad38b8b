//! Codec for encoding and decoding WebSocket frames.
//!
//! Header layout (RFC 6455 §5.2):
//!
//! ```text
//!  0               1               2 ...
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| payload len |   extended payload length     |
//! |I|S|S|S|  (4)  |A|     (7)     |   (16 or 64, if len is 126/127)|
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |    masking key (32, if MASK)  |          payload ...          |
//! +-------------------------------+-------------------------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::{Frame, OpCode};

/// Largest payload that fits in the 7-bit length field.
pub const MAX_INLINE_LEN: usize = 125;

/// Length marker announcing a 16-bit extended length.
const LEN_16: u8 = 126;

/// Length marker announcing a 64-bit extended length.
const LEN_64: u8 = 127;

/// Default cap on a single frame payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not enough data to decode a frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// Frame or message exceeds the configured maximum.
    #[error("Payload size {0} exceeds maximum {1}")]
    TooLarge(u64, usize),

    /// Reserved header bits set without a negotiated extension.
    #[error("Reserved bits set in frame header")]
    ReservedBits,

    /// Opcode not defined by RFC 6455.
    #[error("Unknown opcode: {0:#x}")]
    UnknownOpcode(u8),

    /// Control frame that is fragmented or longer than 125 bytes.
    #[error("Invalid control frame: {0}")]
    InvalidControl(&'static str),

    /// Continuation frame with no message in progress, or a new data
    /// frame while a fragmented message is still open.
    #[error("Fragmentation error: {0}")]
    Fragmentation(&'static str),

    /// Text message that is not valid UTF-8.
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,

    /// Handshake request is unusable.
    #[error("Handshake error: {0}")]
    Handshake(&'static str),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Bounds-checked reader over a byte slice.
///
/// Every read reports how many bytes are missing instead of panicking, so
/// callers can wait for more input.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at the start of `buf`.
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Consume exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Incomplete`] if fewer than `n` bytes remain.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::Incomplete(n - self.remaining()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Consume a fixed-size array.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Incomplete`] if fewer than `N` bytes remain.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Incomplete`] at end of input.
    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Read a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Incomplete`] if fewer than 2 bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Read a big-endian `u64`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Incomplete`] if fewer than 8 bytes remain.
    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.read_array().map(u64::from_be_bytes)
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Masking key, when the MASK bit is set.
    pub mask: Option<[u8; 4]>,
    /// Payload length after extension.
    pub payload_len: u64,
    /// Size of the header in bytes.
    pub header_len: usize,
}

/// Parse a frame header from the start of `data`.
///
/// # Errors
///
/// Returns [`ProtocolError::Incomplete`] if the header is not fully
/// buffered yet, or a validation error for malformed headers.
pub fn parse_header(data: &[u8]) -> Result<Header, ProtocolError> {
    let mut cursor = Cursor::new(data);

    let b0 = cursor.read_u8()?;
    let b1 = cursor.read_u8()?;

    let fin = b0 & 0x80 != 0;
    if b0 & 0x70 != 0 {
        return Err(ProtocolError::ReservedBits);
    }
    let opcode = OpCode::try_from(b0 & 0x0F).map_err(ProtocolError::UnknownOpcode)?;

    let masked = b1 & 0x80 != 0;
    let payload_len = match b1 & 0x7F {
        LEN_16 => u64::from(cursor.read_u16()?),
        LEN_64 => {
            let len = cursor.read_u64()?;
            if len >> 63 != 0 {
                return Err(ProtocolError::TooLarge(len, usize::MAX));
            }
            len
        }
        inline => u64::from(inline),
    };

    if opcode.is_control() {
        if !fin {
            return Err(ProtocolError::InvalidControl("fragmented control frame"));
        }
        if payload_len > MAX_INLINE_LEN as u64 {
            return Err(ProtocolError::InvalidControl("control payload over 125 bytes"));
        }
    }

    let mask = if masked {
        Some(cursor.read_array::<4>()?)
    } else {
        None
    };

    Ok(Header {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: cursor.position(),
    })
}

/// XOR `payload` with the cyclic 4-byte masking key. Applying it twice
/// restores the original bytes.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Encode a frame into an existing buffer.
///
/// Server-to-client frames pass `None`; a client must supply a mask key.
pub fn encode_into(frame: &Frame, mask: Option<[u8; 4]>, buf: &mut BytesMut) {
    let len = frame.payload.len();
    let fin_bit = if frame.fin { 0x80 } else { 0x00 };
    let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };

    buf.reserve(14 + len);
    buf.put_u8(fin_bit | u8::from(frame.opcode));

    if len <= MAX_INLINE_LEN {
        buf.put_u8(mask_bit | len as u8);
    } else if let Ok(len16) = u16::try_from(len) {
        buf.put_u8(mask_bit | LEN_16);
        buf.put_u16(len16);
    } else {
        buf.put_u8(mask_bit | LEN_64);
        buf.put_u64(len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.extend_from_slice(&frame.payload);
            apply_mask(&mut buf[start..], key);
        }
        None => buf.extend_from_slice(&frame.payload),
    }
}

/// Encode an unmasked (server-to-client) frame.
#[must_use]
pub fn encode(frame: &Frame) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(frame, None, &mut buf);
    buf.freeze()
}

/// Encode a masked (client-to-server) frame.
#[must_use]
pub fn encode_masked(frame: &Frame, key: [u8; 4]) -> Bytes {
    let mut buf = BytesMut::new();
    encode_into(frame, Some(key), &mut buf);
    buf.freeze()
}

/// Encode a text message as a single unmasked frame.
#[must_use]
pub fn encode_text(text: impl Into<Bytes>) -> Bytes {
    encode(&Frame::text(text))
}

/// Decode one complete frame from the start of `data`.
///
/// # Errors
///
/// Returns [`ProtocolError::Incomplete`] if `data` holds less than a full
/// frame, or a validation error for malformed frames.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    let header = parse_header(data)?;
    let mut cursor = Cursor::new(&data[header.header_len..]);
    let len = usize::try_from(header.payload_len)
        .map_err(|_| ProtocolError::TooLarge(header.payload_len, usize::MAX))?;
    let mut payload = BytesMut::from(cursor.take(len)?);
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }
    Ok(Frame::new(header.fin, header.opcode, payload.freeze()))
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is malformed or its payload exceeds
/// `max_payload`.
pub fn decode_from(buf: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>, ProtocolError> {
    let header = match parse_header(buf) {
        Ok(header) => header,
        Err(ProtocolError::Incomplete(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    if header.payload_len > max_payload as u64 {
        return Err(ProtocolError::TooLarge(header.payload_len, max_payload));
    }

    let len = header.payload_len as usize;
    if buf.len() < header.header_len + len {
        return Ok(None);
    }

    buf.advance(header.header_len);
    let mut payload = buf.split_to(len);
    if let Some(key) = header.mask {
        apply_mask(&mut payload, key);
    }

    Ok(Some(Frame::new(header.fin, header.opcode, payload.freeze())))
}

/// Streaming frame decoder with a payload cap.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl FrameCodec {
    /// Create a codec that rejects frames larger than `max_payload`.
    #[must_use]
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Maximum accepted payload per frame.
    #[must_use]
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode a frame for sending from the server.
    #[must_use]
    pub fn encode(&self, frame: &Frame) -> Bytes {
        encode(frame)
    }

    /// Try to decode a frame from a buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is invalid or too large.
    pub fn decode_from(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        decode_from(buf, self.max_payload)
    }
}
