//! Numeric-array codec.
//!
//! A message is a JSON header line followed by packed little-endian
//! buffers. Every rectangular, homogeneous numeric array in the value is
//! lifted out of the header and replaced by a descriptor:
//!
//! ```text
//! {"__type__":"ndarray","shape":[2,3],"dtype":"<i8","size":48,"index":0}
//! ```
//!
//! `index` orders the buffers and `size` is the buffer length in bytes.
//! Arrays mixing integer and floating-point elements stay in the header so
//! that the value decodes back unchanged. Streamed records are wrapped in
//! [`Frame`]s since the buffers may contain any byte.

use crate::codec::{Codec, RecordDecoder};
use crate::error::ProtocolError;
use crate::frame::Frame;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{Map, Number, Value};

const TYPE_KEY: &str = "__type__";
const NDARRAY: &str = "ndarray";

/// Element type of a packed array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DType {
    I8,
    F8,
}

impl DType {
    fn as_str(self) -> &'static str {
        match self {
            DType::I8 => "<i8",
            DType::F8 => "<f8",
        }
    }

    fn parse(s: &str) -> Result<Self, ProtocolError> {
        match s {
            "<i8" => Ok(DType::I8),
            "<f8" => Ok(DType::F8),
            other => Err(ProtocolError::Malformed(format!(
                "unsupported dtype: {}",
                other
            ))),
        }
    }

    fn of(n: &Number) -> Option<Self> {
        if n.is_f64() {
            Some(DType::F8)
        } else if n.is_i64() {
            Some(DType::I8)
        } else {
            // u64 above i64::MAX
            None
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NumericArrayCodec;

impl Codec for NumericArrayCodec {
    fn name(&self) -> &str {
        "numpy"
    }

    fn mime_type(&self) -> &str {
        "application/numpy"
    }

    fn record_separator(&self) -> &[u8] {
        b""
    }

    fn serialize(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        let mut buffers = Vec::new();
        let header = lift_arrays(value, &mut buffers);

        let mut out = BytesMut::new();
        out.extend_from_slice(&serde_json::to_vec(&header)?);
        out.put_u8(b'\n');
        for buf in buffers {
            out.extend_from_slice(&buf);
        }
        Ok(out.freeze())
    }

    fn deserialize(&self, data: &[u8]) -> Result<Value, ProtocolError> {
        let split = data
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ProtocolError::Malformed("missing header line".into()))?;
        let header: Value = serde_json::from_slice(&data[..split])?;
        let mut reader = BufferReader {
            data: &data[split + 1..],
            offset: 0,
            next_index: 0,
        };
        let value = restore_arrays(header, &mut reader)?;
        if reader.offset != reader.data.len() {
            return Err(ProtocolError::Malformed(format!(
                "{} unused buffer bytes",
                reader.data.len() - reader.offset
            )));
        }
        Ok(value)
    }

    fn encode_record(&self, value: &Value) -> Result<Bytes, ProtocolError> {
        Ok(Frame::new(self.serialize(value)?).encode()?.freeze())
    }

    fn record_decoder(&self) -> Result<Box<dyn RecordDecoder>, ProtocolError> {
        Ok(Box::new(FrameDecoder {
            buffer: BytesMut::with_capacity(8192),
        }))
    }
}

/// Returns the shape and dtype of `value` if it can be packed.
fn array_layout(value: &Value) -> Option<(Vec<usize>, DType)> {
    match value {
        Value::Number(n) => DType::of(n).map(|d| (Vec::new(), d)),
        Value::Array(items) if !items.is_empty() => {
            let (inner, dtype) = array_layout(&items[0])?;
            for item in &items[1..] {
                let (shape, d) = array_layout(item)?;
                if shape != inner || d != dtype {
                    return None;
                }
            }
            let mut shape = Vec::with_capacity(inner.len() + 1);
            shape.push(items.len());
            shape.extend(inner);
            Some((shape, dtype))
        }
        _ => None,
    }
}

fn pack(value: &Value, dtype: DType, out: &mut BytesMut) {
    match value {
        Value::Array(items) => {
            for item in items {
                pack(item, dtype, out);
            }
        }
        Value::Number(n) => match dtype {
            DType::I8 => out.put_i64_le(n.as_i64().unwrap_or_default()),
            DType::F8 => out.put_f64_le(n.as_f64().unwrap_or_default()),
        },
        _ => {}
    }
}

fn lift_arrays(value: &Value, buffers: &mut Vec<BytesMut>) -> Value {
    match value {
        Value::Array(items) => {
            if let Some((shape, dtype)) = array_layout(value) {
                let mut buf = BytesMut::new();
                pack(value, dtype, &mut buf);
                let descriptor = serde_json::json!({
                    TYPE_KEY: NDARRAY,
                    "shape": shape,
                    "dtype": dtype.as_str(),
                    "size": buf.len(),
                    "index": buffers.len(),
                });
                buffers.push(buf);
                descriptor
            } else {
                Value::Array(items.iter().map(|v| lift_arrays(v, buffers)).collect())
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), lift_arrays(v, buffers)))
                .collect(),
        ),
        other => other.clone(),
    }
}

struct BufferReader<'a> {
    data: &'a [u8],
    offset: usize,
    next_index: u64,
}

impl<'a> BufferReader<'a> {
    fn take(&mut self, index: u64, size: usize) -> Result<&'a [u8], ProtocolError> {
        if index != self.next_index {
            return Err(ProtocolError::Malformed(format!(
                "buffer index {} out of order (expected {})",
                index, self.next_index
            )));
        }
        let end = self
            .offset
            .checked_add(size)
            .filter(|&end| end <= self.data.len())
            .ok_or(ProtocolError::TruncatedStream {
                remaining: self.data.len() - self.offset,
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        self.next_index += 1;
        Ok(slice)
    }
}

fn is_descriptor(map: &Map<String, Value>) -> bool {
    map.get(TYPE_KEY).and_then(Value::as_str) == Some(NDARRAY)
}

fn restore_arrays(value: Value, reader: &mut BufferReader<'_>) -> Result<Value, ProtocolError> {
    match value {
        Value::Object(map) if is_descriptor(&map) => unpack_descriptor(&map, reader),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, restore_arrays(v, reader)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(|v| restore_arrays(v, reader))
                .collect::<Result<_, _>>()?,
        )),
        other => Ok(other),
    }
}

fn descriptor_field<'m>(map: &'m Map<String, Value>, key: &str) -> Result<&'m Value, ProtocolError> {
    map.get(key)
        .ok_or_else(|| ProtocolError::Malformed(format!("array descriptor missing \"{}\"", key)))
}

fn unpack_descriptor(
    map: &Map<String, Value>,
    reader: &mut BufferReader<'_>,
) -> Result<Value, ProtocolError> {
    let shape: Vec<usize> = serde_json::from_value(descriptor_field(map, "shape")?.clone())?;
    let dtype = DType::parse(descriptor_field(map, "dtype")?.as_str().unwrap_or_default())?;
    let size: usize = serde_json::from_value(descriptor_field(map, "size")?.clone())?;
    let index: u64 = serde_json::from_value(descriptor_field(map, "index")?.clone())?;

    // Packed arrays are never empty, so every dimension is at least one and
    // bounded by the element count.
    let count = shape
        .iter()
        .try_fold(1usize, |acc, &dim| match dim {
            0 => None,
            dim => acc.checked_mul(dim),
        })
        .ok_or_else(|| {
            ProtocolError::Malformed(format!("invalid array shape {:?}", shape))
        })?;
    if shape.is_empty() || count.checked_mul(8) != Some(size) {
        return Err(ProtocolError::Malformed(format!(
            "array of shape {:?} does not fit {} bytes",
            shape, size
        )));
    }

    let bytes = reader.take(index, size)?;
    let mut flat = bytes.chunks_exact(8).map(|chunk| {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        match dtype {
            DType::I8 => Value::from(i64::from_le_bytes(word)),
            // Non-finite floats have no JSON representation.
            DType::F8 => Number::from_f64(f64::from_le_bytes(word))
                .map(Value::Number)
                .unwrap_or(Value::Null),
        }
    });
    Ok(reshape(&shape, &mut flat))
}

fn reshape(shape: &[usize], flat: &mut impl Iterator<Item = Value>) -> Value {
    match shape.split_first() {
        Some((&n, [])) => Value::Array(flat.take(n).collect()),
        Some((&n, rest)) => Value::Array((0..n).map(|_| reshape(rest, flat)).collect()),
        None => Value::Null,
    }
}

/// Decodes framed numeric-array records.
struct FrameDecoder {
    buffer: BytesMut,
}

impl RecordDecoder for FrameDecoder {
    fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn decode_next(&mut self) -> Result<Option<Value>, ProtocolError> {
        match Frame::decode(&mut self.buffer)? {
            Some(frame) => NumericArrayCodec.deserialize(&frame.payload).map(Some),
            None => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<Option<Value>, ProtocolError> {
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Err(ProtocolError::TruncatedStream {
                remaining: self.buffer.len(),
            })
        }
    }
}
