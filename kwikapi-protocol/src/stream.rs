//! Lazy streaming on top of any [`Codec`].
//!
//! Neither direction materializes the whole sequence: [`RecordStream`] pulls
//! one chunk at a time and yields records as soon as they are complete, and
//! [`RecordEncoder`] encodes one element per `next()` call.

use crate::codec::{Codec, RecordDecoder};
use crate::error::ProtocolError;
use bytes::Bytes;
use serde_json::Value;
use std::io;
use std::sync::Arc;

/// A lazily produced sequence of body chunks.
pub type ByteChunks = Box<dyn Iterator<Item = io::Result<Bytes>> + Send>;

/// Lazily decoded records from a chunked byte source.
///
/// The iterator ends after the first error.
pub struct RecordStream {
    chunks: ByteChunks,
    decoder: Box<dyn RecordDecoder>,
    done: bool,
}

impl RecordStream {
    pub fn new(chunks: ByteChunks, decoder: Box<dyn RecordDecoder>) -> Self {
        Self {
            chunks,
            decoder,
            done: false,
        }
    }
}

impl Iterator for RecordStream {
    type Item = Result<Value, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            match self.decoder.decode_next() {
                Ok(Some(value)) => return Some(Ok(value)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            match self.chunks.next() {
                Some(Ok(chunk)) => self.decoder.extend(&chunk),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    return self.decoder.finish().transpose();
                }
            }
        }
        None
    }
}

/// Splits `chunks` into records using `codec`'s framing.
///
/// Fails immediately with `StreamingNotSupported` for codecs that cannot
/// split a byte stream.
pub fn deserialize_stream(
    codec: &dyn Codec,
    chunks: ByteChunks,
) -> Result<RecordStream, ProtocolError> {
    Ok(RecordStream::new(chunks, codec.record_decoder()?))
}

/// Lazily encoded records.
pub struct RecordEncoder<I> {
    codec: Arc<dyn Codec>,
    items: I,
}

impl<I> Iterator for RecordEncoder<I>
where
    I: Iterator<Item = Value>,
{
    type Item = Result<Bytes, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.items.next()?;
        Some(self.codec.encode_record(&item))
    }
}

/// Encodes each element of `items` as one framed record.
pub fn serialize_stream<I>(codec: Arc<dyn Codec>, items: I) -> RecordEncoder<I::IntoIter>
where
    I: IntoIterator<Item = Value>,
{
    RecordEncoder {
        codec,
        items: items.into_iter(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JsonCodec, MessagePackCodec, NumericArrayCodec, RawCodec, YamlCodec};
    use proptest::prelude::*;
    use serde_json::json;

    /// Re-chunks `data` into pieces of at most `size` bytes.
    fn chunked(data: Vec<u8>, size: usize) -> ByteChunks {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Box::new(chunks.into_iter())
    }

    fn encode_all(codec: Arc<dyn Codec>, values: &[Value]) -> Vec<u8> {
        serialize_stream(codec, values.to_vec())
            .map(|r| r.unwrap())
            .flat_map(|b| b.to_vec())
            .collect()
    }

    #[test]
    fn test_stream_roundtrip_every_builtin() {
        let values = vec![json!({"n": 1}), json!([1, 2, 3]), json!("text"), json!(2.5)];
        let codecs: Vec<Arc<dyn Codec>> = vec![
            Arc::new(JsonCodec),
            Arc::new(MessagePackCodec),
            Arc::new(YamlCodec),
            Arc::new(NumericArrayCodec),
        ];
        for codec in codecs {
            let data = encode_all(codec.clone(), &values);
            let decoded: Vec<Value> = deserialize_stream(codec.as_ref(), chunked(data, 3))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();
            assert_eq!(decoded, values, "codec {}", codec.name());
        }
    }

    #[test]
    fn test_stream_is_lazy() {
        // The source panics if pulled past the first chunk.
        let first = JsonCodec.encode_record(&json!(1)).unwrap();
        let chunks: ByteChunks = Box::new(
            std::iter::once(Ok::<_, io::Error>(first)).chain(std::iter::from_fn(|| panic!("pulled too far"))),
        );
        let mut stream = deserialize_stream(&JsonCodec, chunks).unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), json!(1));
    }

    #[test]
    fn test_stream_stops_after_error() {
        let chunks: ByteChunks = Box::new(
            vec![
                Ok::<_, io::Error>(Bytes::from_static(b"1\n{bad\n")),
                Ok(Bytes::from_static(b"3\n")),
            ]
            .into_iter(),
        );
        let mut stream = deserialize_stream(&JsonCodec, chunks).unwrap();
        assert_eq!(stream.next().unwrap().unwrap(), json!(1));
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_source_error_surfaces() {
        let chunks: ByteChunks = Box::new(std::iter::once(Err::<Bytes, _>(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "reset",
        ))));
        let mut stream = deserialize_stream(&JsonCodec, chunks).unwrap();
        assert!(matches!(stream.next(), Some(Err(ProtocolError::Io(_)))));
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_raw_rejects_stream_input() {
        let result = deserialize_stream(&RawCodec, Box::new(std::iter::empty::<io::Result<Bytes>>()));
        assert!(matches!(
            result,
            Err(ProtocolError::StreamingNotSupported(_))
        ));
    }

    fn scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
            "[a-zA-Z0-9 _\\-\n]{0,24}".prop_map(Value::from),
            (-1.0e12f64..1.0e12).prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    proptest! {
        #[test]
        fn prop_scalar_roundtrip(value in scalar(), chunk in 1usize..16) {
            let codecs: Vec<Arc<dyn Codec>> = vec![
                Arc::new(JsonCodec),
                Arc::new(MessagePackCodec),
                Arc::new(NumericArrayCodec),
            ];
            for codec in codecs {
                let bytes = codec.serialize(&value).unwrap();
                prop_assert_eq!(&codec.deserialize(&bytes).unwrap(), &value);

                let data = encode_all(codec.clone(), &[value.clone(), value.clone()]);
                let decoded: Vec<Value> = deserialize_stream(codec.as_ref(), chunked(data, chunk))
                    .unwrap()
                    .map(|r| r.unwrap())
                    .collect();
                prop_assert_eq!(decoded, vec![value.clone(), value.clone()]);
            }
        }

        #[test]
        fn prop_int_vectors_roundtrip(items in proptest::collection::vec(any::<i64>(), 1..32)) {
            let value = Value::from(items);
            let bytes = NumericArrayCodec.serialize(&value).unwrap();
            prop_assert_eq!(NumericArrayCodec.deserialize(&bytes).unwrap(), value);
        }
    }
}
