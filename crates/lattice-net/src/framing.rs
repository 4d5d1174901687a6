//! Length-prefixed framing for TCP streams.
//!
//! Every serialized packet is carried in one frame:
//!
//! ```text
//! +-------------------+--------------------------+
//! | length (4 bytes)  |   packet bytes           |
//! | u32 little-endian |   (header + payload)     |
//! +-------------------+--------------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes. [`FrameDecoder`]
//! accumulates whatever a non-blocking read returned and yields every frame
//! that is complete, keeping a partial trailing frame for the next call.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::protocol::{NetworkPacket, ProtocolError};

/// Configuration for the framing layer.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Maximum allowed frame body size in bytes. Default: 1 MiB.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1_048_576,
        }
    }
}

/// Length of the frame prefix.
pub const FRAME_PREFIX_LEN: usize = 4;

/// Errors that can occur during framing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// The frame exceeds the configured maximum. The stream can no longer be
    /// trusted to be aligned on frame boundaries.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error(transparent)]
    Packet(#[from] ProtocolError),
}

/// Prefixes `body` with its length.
pub fn encode_frame(body: &[u8], config: &FrameConfig) -> Result<Bytes, FrameError> {
    let too_large = || FrameError::FrameTooLarge {
        size: body.len(),
        max: config.max_frame_size,
    };
    if body.len() > config.max_frame_size {
        return Err(too_large());
    }
    let len = u32::try_from(body.len()).map_err(|_| too_large())?;
    let mut out = BytesMut::with_capacity(FRAME_PREFIX_LEN + body.len());
    out.put_u32_le(len);
    out.put_slice(body);
    Ok(out.freeze())
}

/// Serializes `packet` and frames it.
pub fn encode_packet(packet: &NetworkPacket, config: &FrameConfig) -> Result<Bytes, FrameError> {
    encode_frame(&packet.serialize()?, config)
}

/// Reassembles frames from arbitrarily split reads.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameDecoder {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            config,
        }
    }

    /// Appends freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held for an incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extracts every complete frame currently buffered, in order.
    ///
    /// On [`FrameError::FrameTooLarge`] the buffer is discarded; the caller
    /// is expected to disconnect.
    pub fn decode_available(&mut self) -> Result<Vec<Bytes>, FrameError> {
        let mut frames = Vec::new();

        while self.buf.len() >= FRAME_PREFIX_LEN {
            let len = (&self.buf[..FRAME_PREFIX_LEN]).get_u32_le() as usize;
            if len > self.config.max_frame_size {
                self.buf.clear();
                return Err(FrameError::FrameTooLarge {
                    size: len,
                    max: self.config.max_frame_size,
                });
            }
            if self.buf.len() - FRAME_PREFIX_LEN < len {
                self.buf.reserve(FRAME_PREFIX_LEN + len - self.buf.len());
                break;
            }
            self.buf.advance(FRAME_PREFIX_LEN);
            frames.push(self.buf.split_to(len).freeze());
        }

        Ok(frames)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(FrameConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefix_is_little_endian() {
        let frame = encode_frame(b"hello", &FrameConfig::default()).unwrap();
        assert_eq!(&frame[..4], &[5, 0, 0, 0]);
        assert_eq!(&frame[4..], b"hello");
    }

    #[test]
    fn test_back_to_back_frames_dont_merge() {
        let config = FrameConfig::default();
        let mut bytes = encode_frame(b"aaa", &config).unwrap().to_vec();
        bytes.extend_from_slice(&encode_frame(b"bbb", &config).unwrap());

        let mut decoder = FrameDecoder::new(config);
        decoder.extend(&bytes);
        let frames = decoder.decode_available().unwrap();
        assert_eq!(frames, vec![Bytes::from_static(b"aaa"), Bytes::from_static(b"bbb")]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_partial_frame_is_kept_for_next_read() {
        let config = FrameConfig::default();
        let bytes = encode_frame(b"this frame arrives in pieces", &config).unwrap();
        let mut decoder = FrameDecoder::new(config);

        // Feed one byte at a time; only the last byte completes the frame.
        for (i, b) in bytes.iter().enumerate() {
            decoder.extend(std::slice::from_ref(b));
            let frames = decoder.decode_available().unwrap();
            if i + 1 < bytes.len() {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames, vec![Bytes::from_static(b"this frame arrives in pieces")]);
            }
        }
    }

    #[test]
    fn test_complete_frame_followed_by_partial() {
        let config = FrameConfig::default();
        let mut bytes = encode_frame(b"one", &config).unwrap().to_vec();
        let second = encode_frame(b"two", &config).unwrap();
        bytes.extend_from_slice(&second[..5]);

        let mut decoder = FrameDecoder::new(config);
        decoder.extend(&bytes);
        assert_eq!(decoder.decode_available().unwrap(), vec![Bytes::from_static(b"one")]);
        assert_eq!(decoder.buffered(), 5);

        decoder.extend(&second[5..]);
        assert_eq!(decoder.decode_available().unwrap(), vec![Bytes::from_static(b"two")]);
    }

    #[test]
    fn test_oversized_prefix_is_rejected() {
        let config = FrameConfig { max_frame_size: 16 };
        let mut decoder = FrameDecoder::new(config);
        decoder.extend(&1024u32.to_le_bytes());
        assert_eq!(
            decoder.decode_available(),
            Err(FrameError::FrameTooLarge {
                size: 1024,
                max: 16
            })
        );
    }

    #[test]
    fn test_oversized_body_is_rejected_on_encode() {
        let config = FrameConfig { max_frame_size: 16 };
        assert!(matches!(
            encode_frame(&[0u8; 17], &config),
            Err(FrameError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_packet_frame_carries_header_and_payload() {
        use crate::protocol::{MessageType, PacketHeader};

        let packet = NetworkPacket::new(MessageType::Pong, vec![9u8; 3]).with_sequence(4);
        let frame = encode_packet(&packet, &FrameConfig::default()).unwrap();
        assert_eq!(&frame[..4], &((PacketHeader::SIZE + 3) as u32).to_le_bytes());

        let mut decoder = FrameDecoder::default();
        decoder.extend(&frame);
        let body = decoder.decode_available().unwrap().remove(0);
        assert_eq!(NetworkPacket::deserialize(body).unwrap(), packet);
    }

    #[test]
    fn test_zero_length_frame_is_valid() {
        let config = FrameConfig::default();
        let mut decoder = FrameDecoder::new(config);
        decoder.extend(&encode_frame(&[], &config).unwrap());
        assert_eq!(decoder.decode_available().unwrap(), vec![Bytes::new()]);
    }
}
