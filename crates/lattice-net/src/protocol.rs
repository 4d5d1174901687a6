//! Packet header, raw packet container, and the little-endian field codec.
//!
//! Every packet is a fixed 9-byte header followed by `size` payload bytes:
//!
//! ```text
//! +--------+-------------+-----------------+-------------------+
//! | type   | size        | sequence        | payload           |
//! | u8     | u32 LE      | u32 LE          | (size bytes)      |
//! +--------+-------------+-----------------+-------------------+
//! ```
//!
//! Payload fields are packed without padding, integers and floats in
//! little-endian order. Strings are a `u16` byte length followed by UTF-8.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use static_assertions::const_assert_eq;

/// Version carried in the client hello. Mismatches are rejected.
pub const PROTOCOL_VERSION: u32 = 1;

/// Longest accepted player name, in bytes.
pub const MAX_NAME_LEN: usize = 32;

/// Longest accepted chat line or reason string, in bytes.
pub const MAX_TEXT_LEN: usize = 256;

/// Message type tag, the first byte of every packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    ClientHello = 0x01,
    ServerHello = 0x02,
    PlayerJoin = 0x10,
    PlayerLeave = 0x11,
    PlayerMove = 0x12,
    PlayerUpdate = 0x13,
    BlockPlace = 0x20,
    BlockBreak = 0x21,
    BlockUpdate = 0x22,
    ChunkRequest = 0x30,
    ChunkData = 0x31,
    ChatMessage = 0x40,
    Ping = 0x50,
    Pong = 0x51,
    Disconnect = 0x60,
    Error = 0xFF,
}

impl MessageType {
    /// Decodes a header tag byte.
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        Ok(match tag {
            0x01 => MessageType::ClientHello,
            0x02 => MessageType::ServerHello,
            0x10 => MessageType::PlayerJoin,
            0x11 => MessageType::PlayerLeave,
            0x12 => MessageType::PlayerMove,
            0x13 => MessageType::PlayerUpdate,
            0x20 => MessageType::BlockPlace,
            0x21 => MessageType::BlockBreak,
            0x22 => MessageType::BlockUpdate,
            0x30 => MessageType::ChunkRequest,
            0x31 => MessageType::ChunkData,
            0x40 => MessageType::ChatMessage,
            0x50 => MessageType::Ping,
            0x51 => MessageType::Pong,
            0x60 => MessageType::Disconnect,
            0xFF => MessageType::Error,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        })
    }
}

/// Errors raised while encoding or decoding packets and payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message type 0x{0:02x}")]
    UnknownMessageType(u8),

    #[error("expected {expected:?} payload, got {actual:?}")]
    TypeMismatch {
        expected: MessageType,
        actual: MessageType,
    },

    #[error("invalid block type {0}")]
    InvalidBlockType(u8),

    #[error("invalid flag byte {0}")]
    InvalidFlag(u8),

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("string field of {len} bytes exceeds limit of {max}")]
    StringTooLong { len: usize, max: usize },

    #[error("{0} unexpected trailing bytes after payload")]
    TrailingBytes(usize),

    #[error("payload of {0} bytes does not fit the header size field")]
    PayloadTooLarge(usize),
}

/// Fixed-size packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub message_type: MessageType,
    /// Payload length in bytes.
    pub size: u32,
    /// Per-connection send counter, assigned by the link at send time.
    pub sequence: u32,
}

impl PacketHeader {
    /// Encoded header length.
    pub const SIZE: usize = 1 + 4 + 4;

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.message_type as u8);
        buf.put_u32_le(self.size);
        buf.put_u32_le(self.sequence);
    }

    /// Reads a header from the front of `buf`.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        need(buf.remaining(), Self::SIZE)?;
        let tag = buf.get_u8();
        let size = buf.get_u32_le();
        let sequence = buf.get_u32_le();
        Ok(Self {
            message_type: MessageType::from_tag(tag)?,
            size,
            sequence,
        })
    }
}

const_assert_eq!(PacketHeader::SIZE, 9);

fn need(available: usize, needed: usize) -> Result<(), ProtocolError> {
    if available < needed {
        return Err(ProtocolError::Truncated { needed, available });
    }
    Ok(())
}

/// A message type and sequence plus the payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkPacket {
    message_type: MessageType,
    sequence: u32,
    payload: Bytes,
}

impl NetworkPacket {
    pub fn new(message_type: MessageType, payload: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            sequence: 0,
            payload: payload.into(),
        }
    }

    /// The header this packet encodes to. Fails if the payload is longer
    /// than a `u32` size field can describe.
    pub fn header(&self) -> Result<PacketHeader, ProtocolError> {
        let size =
            u32::try_from(self.payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(self.payload.len()))?;
        Ok(PacketHeader {
            message_type: self.message_type,
            size,
            sequence: self.sequence,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns the packet with its sequence number replaced.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Total encoded length (header plus payload).
    pub fn encoded_len(&self) -> usize {
        PacketHeader::SIZE + self.payload.len()
    }

    /// Header bytes followed by payload bytes.
    pub fn serialize(&self) -> Result<Bytes, ProtocolError> {
        let header = self.header()?;
        let mut out = BytesMut::with_capacity(self.encoded_len());
        header.encode(&mut out);
        out.put_slice(&self.payload);
        Ok(out.freeze())
    }

    /// Parses one packet from the front of `buf`.
    ///
    /// Fails if fewer than [`PacketHeader::SIZE`] bytes are present or if the
    /// declared payload length runs past the end of the buffer. Bytes after
    /// the declared payload are left in `buf`.
    pub fn deserialize(mut buf: impl Buf) -> Result<Self, ProtocolError> {
        let header = PacketHeader::decode(&mut buf)?;
        let size = header.size as usize;
        need(buf.remaining(), size)?;
        Ok(Self {
            message_type: header.message_type,
            sequence: header.sequence,
            payload: buf.copy_to_bytes(size),
        })
    }
}

/// Appends little-endian fields to a payload buffer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(u8::from(v))
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.put_i32_le(v);
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.put_f32_le(v);
        self
    }

    pub fn vec3(&mut self, v: [f32; 3]) -> &mut Self {
        self.f32(v[0]).f32(v[1]).f32(v[2])
    }

    /// Writes a length-prefixed string, clipped to `max` bytes on a char boundary.
    pub fn str(&mut self, s: &str, max: usize) -> &mut Self {
        let clipped = clip_to_char_boundary(s, max.min(u16::MAX as usize));
        if clipped.len() < s.len() {
            tracing::debug!(len = s.len(), max, "clipping oversized string field");
        }
        self.buf.put_u16_le(clipped.len() as u16);
        self.buf.put_slice(clipped.as_bytes());
        self
    }

    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.put_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

fn clip_to_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Bounds-checked reader over a payload. Every read checks `remaining()`
/// first, so a short payload is an error rather than a panic.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { buf: bytes }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        need(self.remaining(), len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        need(self.remaining(), 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn bool(&mut self) -> Result<bool, ProtocolError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::InvalidFlag(other)),
        }
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        need(self.remaining(), 2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        need(self.remaining(), 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        need(self.remaining(), 4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        need(self.remaining(), 8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        need(self.remaining(), 4)?;
        Ok(self.buf.get_f32_le())
    }

    pub fn vec3(&mut self) -> Result<[f32; 3], ProtocolError> {
        Ok([self.f32()?, self.f32()?, self.f32()?])
    }

    /// Reads a length-prefixed UTF-8 string of at most `max` bytes.
    pub fn str(&mut self, max: usize) -> Result<String, ProtocolError> {
        let len = self.u16()? as usize;
        if len > max {
            return Err(ProtocolError::StringTooLong { len, max });
        }
        let raw = self.bytes(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidUtf8)
    }

    /// Fails if any bytes are left unread.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(ProtocolError::TrailingBytes(n)),
        }
    }
}

/// Milliseconds since the Unix epoch, used for ping and event timestamps.
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
