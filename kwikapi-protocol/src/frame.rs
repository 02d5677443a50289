//! Length-prefixed record frames for binary streaming.
//!
//! Codecs whose payload may contain any byte value cannot delimit streamed
//! records with a separator, so each record travels in a frame:
//!
//! ```text
//! +-------------+--------+------------------+
//! | payload_len | crc32c | payload          |
//! |   4 bytes   | 4 bytes| payload_len bytes|
//! +-------------+--------+------------------+
//! ```

use crate::error::ProtocolError;
use crate::MAX_RECORD_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the frame header in bytes (4+4 = 8).
pub const FRAME_HEADER_SIZE: usize = 8;

/// A single framed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Bytes,
}

impl Frame {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let payload_len = self.payload.len() as u32;
        if self.payload.len() > MAX_RECORD_SIZE as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        buf.put_u32(payload_len);
        buf.put_u32(crc32c::crc32c(&self.payload));
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Decodes a frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more data is needed; nothing is consumed in
    /// that case.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let payload_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if payload_len > MAX_RECORD_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload_len,
                max: MAX_RECORD_SIZE,
            });
        }
        let crc_expected = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        let total_len = FRAME_HEADER_SIZE + payload_len as usize;
        if buf.len() < total_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let payload = buf.split_to(payload_len as usize).freeze();

        let crc_actual = crc32c::crc32c(&payload);
        if crc_actual != crc_expected {
            return Err(ProtocolError::CrcMismatch {
                expected: crc_expected,
                actual: crc_actual,
            });
        }

        Ok(Some(Self { payload }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = Bytes::from_static(b"{\"a\":1}\n\x00\x01\x02");
        let mut buf = Frame::new(payload.clone()).encode().unwrap();
        let decoded = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_crc_validation() {
        let mut encoded = Frame::new(Bytes::from_static(b"payload")).encode().unwrap();
        let len = encoded.len();
        encoded[len - 1] ^= 0xFF;

        let result = Frame::decode(&mut encoded);
        assert!(matches!(result, Err(ProtocolError::CrcMismatch { .. })));
    }

    #[test]
    fn test_incomplete_frame() {
        let encoded = Frame::new(Bytes::from_static(b"0123456789")).encode().unwrap();

        let mut partial = BytesMut::from(&encoded[..4]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());

        let mut partial = BytesMut::from(&encoded[..12]);
        assert!(Frame::decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 12);
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_RECORD_SIZE + 1);
        buf.put_u32(0);
        let result = Frame::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_multiple_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::new(Bytes::from_static(b"one")).encode().unwrap());
        buf.extend_from_slice(&Frame::new(Bytes::from_static(b"two")).encode().unwrap());

        let first = Frame::decode(&mut buf).unwrap().unwrap();
        let second = Frame::decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.payload.as_ref(), b"one");
        assert_eq!(second.payload.as_ref(), b"two");
        assert!(Frame::decode(&mut buf).unwrap().is_none());
    }
}
