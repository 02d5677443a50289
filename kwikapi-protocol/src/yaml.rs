//! Generic-object codec backed by YAML.
//!
//! Streamed records are YAML documents terminated by a `---` line. Block
//! scalars are always indented and a top-level `---` string is quoted, so an
//! unindented `---` line only ever ends a document.

use crate::codec::{Codec, RecordDecoder};
use crate::error::ProtocolError;
use bytes::Bytes;
use serde_json::Value;

const DOCUMENT_MARKER: &str = "---";

#[derive(Debug, Default, Clone, Copy)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &str {
        "yaml"
    }

    fn mime_type(&self) -> &str {
        "application/x-yaml"
    }

    fn record_separator(&self) -> &[u8] {
        b"---\n"
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        let mut text = serde_yaml::to_string(value)?;
        if !text.ends_with('\n') {
            text.push('\n');
        }
        Ok(Bytes::from(text))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        Ok(serde_yaml::from_slice(data)?)
    }

    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError> {
        Ok(Box::new(DocumentDecoder::new()))
    }
}

/// Splits a byte stream into YAML documents at `---` lines.
pub struct DocumentDecoder {
    buffer: Vec<u8>,
    document: String,
}

impl DocumentDecoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            document: String::new(),
        }
    }

    fn take_document(&mut self) -> Result<Option<Value>, ProtocolError> {
        let document = std::mem::take(&mut self.document);
        if document.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_yaml::from_str(&document)?))
    }
}

impl Default for DocumentDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordDecoder for DocumentDecoder {
    fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<Value>, ProtocolError> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line = self.buffer.drain(..=pos).collect::<Vec<_>>();
            let line = std::str::from_utf8(&line).map_err(|_| ProtocolError::InvalidUtf8)?;
            if line.trim_end() == DOCUMENT_MARKER {
                if let Some(value) = self.take_document()? {
                    return Ok(Some(value));
                }
            } else {
                self.document.push_str(line);
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<Value>, ProtocolError> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = std::str::from_utf8(&rest).map_err(|_| ProtocolError::InvalidUtf8)?;
        if rest.trim_end() != DOCUMENT_MARKER {
            self.document.push_str(rest);
        }
        self.take_document()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_roundtrip_fixed_values() {
        let codec = YamlCodec;
        let values = [
            json!(10),
            json!(-3),
            json!(2.5),
            json!(true),
            json!(null),
            json!("10"),
            json!("true"),
            json!("---"),
            json!("multi\nline\n---\ntext"),
            json!({"nested": {"list": [1, "two", false]}}),
        ];
        for value in values {
            let bytes = codec.serialize(&value).unwrap();
            assert_eq!(codec.deserialize(&bytes).unwrap(), value, "value {value}");
        }
    }

    #[test]
    fn test_document_decoder_splits_records() {
        let codec = YamlCodec;
        let mut data = Vec::new();
        let values = [json!({"a": 1}), json!("---"), json!([1, 2])];
        for value in &values {
            data.extend_from_slice(&codec.encode_record(value).unwrap());
        }

        let mut decoder = DocumentDecoder::new();
        decoder.extend(&data);
        for value in &values {
            assert_eq!(decoder.decode_next().unwrap().as_ref(), Some(value));
        }
        assert_eq!(decoder.decode_next().unwrap(), None);
        assert_eq!(decoder.finish().unwrap(), None);
    }

    #[test]
    fn test_document_decoder_block_scalar_with_marker_line() {
        let codec = YamlCodec;
        let value = json!({"text": "first\n---\nlast"});
        let mut decoder = DocumentDecoder::new();
        decoder.extend(&codec.encode_record(&value).unwrap());
        assert_eq!(decoder.decode_next().unwrap(), Some(value));
    }

    #[test]
    fn test_document_decoder_trailing_document() {
        let mut decoder = DocumentDecoder::new();
        decoder.extend(b"a: 1\n---\nb: 2\n");
        assert_eq!(decoder.decode_next().unwrap(), Some(json!({"a": 1})));
        assert_eq!(decoder.decode_next().unwrap(), None);
        assert_eq!(decoder.finish().unwrap(), Some(json!({"b": 2})));
    }
}
