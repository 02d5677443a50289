//! Pass-through codec for callers that want the bare result bytes.

use crate::codec::{Codec, RecordDecoder};
use crate::error::ProtocolError;
use bytes::Bytes;
use serde_json::Value;

/// Writes string results verbatim and never wraps them in the envelope.
///
/// Non-string values fall back to their JSON text. Streamed output is the
/// plain concatenation of records; streamed input cannot be split and is
/// rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn name(&self) -> &str {
        "raw"
    }

    fn mime_type(&self) -> &str {
        "application/octet-stream"
    }

    fn record_separator(&self) -> &[u8] {
        b""
    }

    fn wraps_response(&self) -> bool {
        false
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        match value {
            Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Value::Null => Ok(Bytes::new()),
            other => Ok(Bytes::from(serde_json::to_vec(other)?)),
        }
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        let text = std::str::from_utf8(data).map_err(|_| ProtocolError::InvalidUtf8)?;
        Ok(Value::String(text.to_string()))
    }

    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError> {
        Err(ProtocolError::StreamingNotSupported(self.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strings_pass_through() {
        let codec = RawCodec;
        assert_eq!(codec.serialize(&json!("hello")).unwrap().as_ref(), b"hello");
        assert_eq!(codec.serialize(&Value::Null).unwrap().len(), 0);
        assert_eq!(codec.serialize(&json!([1, 2])).unwrap().as_ref(), b"[1,2]");
        assert!(!codec.wraps_response());
    }

    #[test]
    fn test_deserialize_text() {
        let codec = RawCodec;
        assert_eq!(codec.deserialize(b"a=1").unwrap(), json!("a=1"));
        assert!(matches!(
            codec.deserialize(&[0xff, 0xfe]),
            Err(ProtocolError::InvalidUtf8)
        ));
    }

    #[test]
    fn test_streaming_input_rejected() {
        let err = RawCodec.record_decoder().err().unwrap();
        assert!(matches!(err, ProtocolError::StreamingNotSupported(ref name) if name == "raw"));
    }
}
