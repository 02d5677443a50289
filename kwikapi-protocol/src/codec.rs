//! The codec contract and the line-delimited JSON codec.

use crate::error::ProtocolError;
use bytes::{Bytes, BytesMut};
use serde_json::Value;

/// A named wire format.
///
/// Every codec serializes single values and frames streamed values so that
/// a reader using the same codec can split them again. The default
/// [`encode_record`](Codec::encode_record) appends
/// [`record_separator`](Codec::record_separator) to each serialized value;
/// codecs whose output may contain the separator override it.
pub trait Codec: Send + Sync {
    /// Name used for registration and negotiation.
    fn name(&self) -> &str;

    /// MIME type sent in `Content-Type`.
    fn mime_type(&self) -> &str;

    /// Bytes placed after each record in a streamed response.
    fn record_separator(&self) -> &[u8];

    /// Whether non-streamed results are wrapped in the envelope.
    fn wraps_response(&self) -> bool {
        true
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError>;

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError>;

    /// Serializes one element of a streamed sequence, framing included.
    fn encode_record(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        let body = self.serialize(value)?;
        let separator = self.record_separator();
        if separator.is_empty() {
            return Ok(body);
        }
        let mut buf = BytesMut::with_capacity(body.len() + separator.len());
        buf.extend_from_slice(&body);
        buf.extend_from_slice(separator);
        Ok(buf.freeze())
    }

    /// Creates an incremental decoder for a streamed sequence.
    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError>;
}

/// Incremental decoder splitting a byte stream into records.
pub trait RecordDecoder: Send {
    /// Appends data to the internal buffer.
    fn extend(&mut self, data: &[u8]);

    /// Attempts to decode the next complete record.
    fn decode_next(&mut self) -> Result<Option<Value>, ProtocolError>;

    /// Called once the input is exhausted; decodes a trailing record that was
    /// not followed by a separator.
    fn finish(&mut self) -> Result<Option<Value>, ProtocolError>;
}

/// Text-structured codec: JSON values, newline-separated when streamed.
///
/// Compact JSON never contains a raw newline, so `\n` frames records
/// unambiguously.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &str {
        "json"
    }

    fn mime_type(&self) -> &str {
        "application/json"
    }

    fn record_separator(&self) -> &[u8] {
        b"\n"
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(value)?))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }

    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError> {
        Ok(Box::new(LineDecoder::new()))
    }
}

/// Line-delimited JSON decoder.
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
        }
    }

    fn parse_line(line: &[u8]) -> Result<Option<Value>, ProtocolError> {
        let text = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(text)?))
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder for LineDecoder {
    fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<Value>, ProtocolError> {
        // Blank lines are skipped rather than treated as records.
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            if let Some(value) = Self::parse_line(&line[..line.len() - 1])? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<Value>, ProtocolError> {
        let rest = std::mem::take(&mut self.buffer);
        Self::parse_line(&rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let codec = JsonCodec;
        let value = json!({"success": true, "result": [1, 2.5, "x", null]});
        let bytes = codec.serialize(&value).unwrap();
        assert_eq!(codec.deserialize(&bytes).unwrap(), value);
    }

    #[test]
    fn test_json_record_has_newline() {
        let codec = JsonCodec;
        let record = codec.encode_record(&json!({"a": "line\nbreak"})).unwrap();
        assert_eq!(record.iter().filter(|&&b| b == b'\n').count(), 1);
        assert_eq!(record.last(), Some(&b'\n'));
    }

    #[test]
    fn test_line_decoder_multiple_lines() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"id\":1}\n\n{\"id\":2}\n");

        assert_eq!(decoder.decode_next().unwrap(), Some(json!({"id": 1})));
        assert_eq!(decoder.decode_next().unwrap(), Some(json!({"id": 2})));
        assert_eq!(decoder.decode_next().unwrap(), None);
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn test_line_decoder_partial_line() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"type\":");
        assert!(decoder.decode_next().unwrap().is_none());

        decoder.extend(b"\"request\"}\n");
        assert_eq!(
            decoder.decode_next().unwrap(),
            Some(json!({"type": "request"}))
        );
    }

    #[test]
    fn test_line_decoder_trailing_record() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"1\n2");
        assert_eq!(decoder.decode_next().unwrap(), Some(json!(1)));
        assert_eq!(decoder.decode_next().unwrap(), None);
        assert_eq!(decoder.finish().unwrap(), Some(json!(2)));
    }

    #[test]
    fn test_line_decoder_invalid_json() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{nope}\n");
        assert!(matches!(decoder.decode_next(), Err(ProtocolError::Json(_))));
    }
}
