//! # Message Framing
//!
//! Wire format for the three exchange messages. Every value is length
//! prefixed so the receiver can reassemble it from any number of partial
//! reads.
//!
//! ## Frame Format
//!
//! ```text
//! +--------+--------+--------+----------+----------+
//! | Magic  | Version| Type   | Length   | Payload  |
//! | 4 bytes| 1 byte | 1 byte | 4 bytes  | variable |
//! +--------+--------+--------+----------+----------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ExchangeError, ExchangeResult};
use crate::{MAX_CIPHERTEXT_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION};

/// Frame header size in bytes
pub const FRAME_HEADER_SIZE: usize = 10; // magic(4) + version(1) + type(1) + length(4)

/// Largest payload any frame may declare
pub const MAX_FRAME_PAYLOAD: usize = MAX_CIPHERTEXT_SIZE;

/// Message types in the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Big-endian Diffie-Hellman public value
    PublicValue = 0x01,
    /// Cleartext CBC initialization vector
    InitializationVector = 0x02,
    /// AES-256-CBC ciphertext
    Ciphertext = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = ExchangeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::PublicValue),
            0x02 => Ok(MessageType::InitializationVector),
            0x03 => Ok(MessageType::Ciphertext),
            _ => Err(ExchangeError::FrameError(format!(
                "Unknown message type: 0x{:02x}",
                value
            ))),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PublicValue => write!(f, "PublicValue"),
            Self::InitializationVector => write!(f, "InitializationVector"),
            Self::Ciphertext => write!(f, "Ciphertext"),
        }
    }
}

/// Frame header structure
#[derive(Debug, Clone)]
pub struct FrameHeader {
    /// Message type
    pub message_type: MessageType,
    /// Payload length (not including header)
    pub length: u32,
}

impl FrameHeader {
    pub fn new(message_type: MessageType, length: u32) -> Self {
        Self {
            message_type,
            length,
        }
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&PROTOCOL_MAGIC);
        buf[4] = PROTOCOL_VERSION;
        buf[5] = self.message_type as u8;
        buf[6..10].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Parse and bounds-check a header
    pub fn from_bytes(data: &[u8]) -> ExchangeResult<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return Err(ExchangeError::FrameError(format!(
                "Header too short: {} < {}",
                data.len(),
                FRAME_HEADER_SIZE
            )));
        }

        if data[0..4] != PROTOCOL_MAGIC {
            return Err(ExchangeError::FrameError(format!(
                "Invalid protocol magic: {:02x?}",
                &data[0..4]
            )));
        }

        let version = data[4];
        if version != PROTOCOL_VERSION {
            return Err(ExchangeError::FrameError(format!(
                "Unsupported protocol version: {}",
                version
            )));
        }

        let message_type = MessageType::try_from(data[5])?;

        let length = u32::from_be_bytes([data[6], data[7], data[8], data[9]]);

        // Reject before buffering the payload
        if length as usize > MAX_FRAME_PAYLOAD {
            return Err(ExchangeError::MessageTooLarge {
                size: length as usize,
                max: MAX_FRAME_PAYLOAD,
            });
        }

        Ok(Self {
            message_type,
            length,
        })
    }
}

/// Complete protocol frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame, checking the payload against `MAX_FRAME_PAYLOAD`
    pub fn new(message_type: MessageType, payload: Bytes) -> ExchangeResult<Self> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ExchangeError::MessageTooLarge {
                size: payload.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        Ok(Self {
            header: FrameHeader::new(message_type, payload.len() as u32),
            payload,
        })
    }

    /// Serialize the complete frame to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.total_size());
        buf.put_slice(&self.header.to_bytes());
        buf.put_slice(&self.payload);
        buf
    }

    /// Parse a frame from the front of a byte buffer
    ///
    /// Consumes the frame and returns it, or returns None if incomplete.
    pub fn parse(data: &mut BytesMut) -> ExchangeResult<Option<Self>> {
        Self::parse_limited(data, MAX_FRAME_PAYLOAD)
    }

    /// Like `parse`, but rejects a declared length above `max_payload` as
    /// soon as the header is available.
    pub fn parse_limited(data: &mut BytesMut, max_payload: usize) -> ExchangeResult<Option<Self>> {
        if data.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        // Parse header without consuming
        let header = FrameHeader::from_bytes(data)?;
        if header.length as usize > max_payload {
            return Err(ExchangeError::MessageTooLarge {
                size: header.length as usize,
                max: max_payload,
            });
        }

        let frame_len = FRAME_HEADER_SIZE + header.length as usize;
        if data.len() < frame_len {
            return Ok(None);
        }

        data.advance(FRAME_HEADER_SIZE);
        let payload = data.split_to(header.length as usize).freeze();

        Ok(Some(Self { header, payload }))
    }

    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Total frame size on the wire
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }

    /// Fail with `UnexpectedMessage` unless this frame has the given type
    pub fn expect_type(self, expected: MessageType) -> ExchangeResult<Self> {
        if self.message_type() != expected {
            return Err(ExchangeError::UnexpectedMessage {
                expected: expected.to_string(),
                actual: self.message_type().to_string(),
            });
        }
        Ok(self)
    }
}

/// Frame decoder for streaming reads
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(FRAME_HEADER_SIZE + 512),
        }
    }

    /// Add data to the buffer
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame
    pub fn decode(&mut self) -> ExchangeResult<Option<Frame>> {
        Frame::parse(&mut self.buffer)
    }

    /// Try to decode the next frame, capping its payload at `max_payload`
    pub fn decode_limited(&mut self, max_payload: usize) -> ExchangeResult<Option<Frame>> {
        Frame::parse_limited(&mut self.buffer, max_payload)
    }

    /// Remaining buffered data length
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from_static(b"\x01\x02\x03\x04");
        let frame = Frame::new(MessageType::PublicValue, payload.clone()).unwrap();

        let mut buf = frame.to_bytes();
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + 4);
        assert_eq!(&buf[0..4], b"DHX1");

        let parsed = Frame::parse(&mut buf).unwrap().unwrap();

        assert_eq!(parsed.message_type(), MessageType::PublicValue);
        assert_eq!(parsed.payload(), &payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_incomplete_frame() {
        let frame = Frame::new(MessageType::Ciphertext, Bytes::from_static(&[0u8; 32])).unwrap();
        let bytes = frame.to_bytes();

        // Partial header
        let mut partial = BytesMut::from(&bytes[..5]);
        assert!(Frame::parse(&mut partial).unwrap().is_none());

        // Full header, partial payload
        let mut partial = BytesMut::from(&bytes[..FRAME_HEADER_SIZE + 10]);
        assert!(Frame::parse(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), FRAME_HEADER_SIZE + 10);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let frame = Frame::new(MessageType::PublicValue, Bytes::from_static(b"x")).unwrap();
        let mut bytes = frame.to_bytes();
        bytes[0] = b'X';

        let result = Frame::parse(&mut bytes);
        assert!(matches!(result, Err(ExchangeError::FrameError(_))));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = Frame::new(MessageType::PublicValue, Bytes::from_static(b"x")).unwrap();
        let mut bytes = frame.to_bytes();
        bytes[5] = 0x7f;

        let result = Frame::parse(&mut bytes);
        assert!(matches!(result, Err(ExchangeError::FrameError(_))));
    }

    #[test]
    fn test_oversized_length_rejected_from_header() {
        let header = FrameHeader::new(MessageType::Ciphertext, (MAX_FRAME_PAYLOAD + 1) as u32);
        let mut bytes = BytesMut::from(&header.to_bytes()[..]);

        let result = Frame::parse(&mut bytes);
        assert!(matches!(result, Err(ExchangeError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_per_call_limit_rejects_on_header() {
        let header = FrameHeader::new(MessageType::InitializationVector, 4096);
        let mut bytes = BytesMut::from(&header.to_bytes()[..]);

        // Only the header has arrived; the declared length alone is enough
        let result = Frame::parse_limited(&mut bytes, 16);
        assert!(matches!(
            result,
            Err(ExchangeError::MessageTooLarge { size: 4096, max: 16 })
        ));

        let frame = Frame::new(MessageType::InitializationVector, Bytes::from_static(&[3u8; 16])).unwrap();
        let mut bytes = frame.to_bytes();
        assert!(Frame::parse_limited(&mut bytes, 16).unwrap().is_some());
    }

    #[test]
    fn test_oversized_payload_rejected_on_build() {
        let payload = Bytes::from(vec![0u8; MAX_FRAME_PAYLOAD + 1]);
        let result = Frame::new(MessageType::Ciphertext, payload);
        assert!(matches!(result, Err(ExchangeError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_expect_type() {
        let frame = Frame::new(MessageType::InitializationVector, Bytes::from_static(&[0u8; 16])).unwrap();
        assert!(frame.clone().expect_type(MessageType::InitializationVector).is_ok());

        let result = frame.expect_type(MessageType::Ciphertext);
        assert!(matches!(result, Err(ExchangeError::UnexpectedMessage { .. })));
    }

    #[test]
    fn test_frame_decoder_streaming() {
        let frame1 = Frame::new(MessageType::InitializationVector, Bytes::from_static(&[7u8; 16])).unwrap();
        let frame2 = Frame::new(MessageType::Ciphertext, Bytes::from_static(b"Second message")).unwrap();

        let mut bytes = frame1.to_bytes();
        bytes.extend_from_slice(&frame2.to_bytes());

        let mut decoder = FrameDecoder::new();

        // Push one byte at a time, as a worst-case stream
        let mut decoded = Vec::new();
        for b in bytes.iter() {
            decoder.push(&[*b]);
            while let Some(frame) = decoder.decode().unwrap() {
                decoded.push(frame);
            }
        }

        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].message_type(), MessageType::InitializationVector);
        assert_eq!(decoded[0].payload().as_ref(), &[7u8; 16]);
        assert_eq!(decoded[1].payload().as_ref(), b"Second message");
        assert_eq!(decoder.buffered(), 0);
    }
}
