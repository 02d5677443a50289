//! # kwikapi-protocol
//!
//! Wire protocols for kwikapi.
//!
//! This crate provides:
//! - The [`Codec`] contract (serialize, deserialize and their streaming forms)
//! - Built-in codecs: `json`, `messagepack`, `yaml`, `numpy` and `raw`
//! - The [`CodecTable`] used for per-request protocol negotiation
//! - Length-prefixed record framing for binary streams
//! - The response [`Envelope`] and the canonical [`ErrorCode`] taxonomy

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod msgpack;
pub mod numeric;
pub mod raw;
pub mod stream;
pub mod table;
pub mod yaml;

pub use codec::{Codec, JsonCodec, RecordDecoder};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, FRAME_HEADER_SIZE};
pub use message::Envelope;
pub use msgpack::MessagePackCodec;
pub use numeric::NumericArrayCodec;
pub use raw::RawCodec;
pub use stream::{deserialize_stream, serialize_stream, ByteChunks, RecordEncoder, RecordStream};
pub use table::CodecTable;
pub use yaml::YamlCodec;

/// Header selecting the request (and default response) protocol.
pub const PROTOCOL_HEADER: &str = "X-KwikAPI-Protocol";

/// Header naming the parameter fed from a streamed request body.
pub const STREAM_PARAM_HEADER: &str = "X-KwikAPI-StreamParam";

/// Header carrying the caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "X-KwikAPI-RequestID";

/// Name of the codec that is the default in a fresh table.
pub const DEFAULT_PROTOCOL: &str = "json";

/// Maximum size of a single framed record (16 MiB).
pub const MAX_RECORD_SIZE: u32 = 16 * 1024 * 1024;
