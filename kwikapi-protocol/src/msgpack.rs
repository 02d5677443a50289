//! Compact-binary codec backed by MessagePack.
//!
//! MessagePack values are self-delimiting, so streamed records are simply
//! concatenated and the record separator is empty.

use crate::codec::{Codec, RecordDecoder};
use crate::error::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};
use serde::Deserialize;
use serde_json::Value;
use std::io::{Cursor, ErrorKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct MessagePackCodec;

impl Codec for MessagePackCodec {
    fn name(&self) -> &str {
        "messagepack"
    }

    fn mime_type(&self) -> &str {
        "application/x-msgpack"
    }

    fn record_separator(&self) -> &[u8] {
        b""
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(rmp_serde::to_vec(value)?))
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError> {
        Ok(Box::new(MessagePackDecoder::new()))
    }
}

/// Splits concatenated MessagePack values.
pub struct MessagePackDecoder {
    buffer: BytesMut,
}

impl MessagePackDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }
}

impl Default for MessagePackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns whether a decode error only means the value is not complete yet.
fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    match err {
        rmp_serde::decode::Error::InvalidMarkerRead(e)
        | rmp_serde::decode::Error::InvalidDataRead(e) => e.kind() == ErrorKind::UnexpectedEof,
        _ => false,
    }
}

impl RecordDecoder for MessagePackDecoder {
    fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<Value>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&self.buffer[..]);
        let result = {
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            Value::deserialize(&mut de)
        };

        match result {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn finish(&mut self) -> Result<Option<Value>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        Err(ProtocolError::TruncatedStream {
            remaining: self.buffer.len(),
        })
    }
}
