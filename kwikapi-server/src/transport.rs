//! Transport-neutral request and response shapes.
//!
//! An adapter (HTTP or otherwise) converts its native request into a
//! [`TransportRequest`], hands it to the dispatcher and writes back the
//! [`TransportResponse`].

use bytes::Bytes;
use kwikapi_protocol::ByteChunks;
use std::fmt;

/// Body of an incoming request.
pub enum RequestBody {
    Empty,
    Bytes(Bytes),
    /// Chunks pulled lazily from the connection.
    Stream(ByteChunks),
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct TransportRequest {
    /// Path without query string, e.g. `/api/v1/add`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    /// Creates a request for `target`, which may carry a `?query` suffix.
    pub fn new(target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            path: path.to_string(),
            query: query.to_string(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    pub fn with_stream(mut self, chunks: ByteChunks) -> Self {
        self.body = RequestBody::Stream(chunks);
        self
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Lazily produced response chunks. Each chunk is one encoded record.
pub type ChunkStream = Box<dyn Iterator<Item = Bytes> + Send>;

pub enum ResponseBody {
    Full(Bytes),
    Stream(ChunkStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(b) => write!(f, "Full({} bytes)", b.len()),
            ResponseBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.body, ResponseBody::Stream(_))
    }

    /// Drains the body into one buffer.
    pub fn into_bytes(self) -> Bytes {
        match self.body {
            ResponseBody::Full(bytes) => bytes,
            ResponseBody::Stream(chunks) => {
                let mut buf = Vec::new();
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                Bytes::from(buf)
            }
        }
    }
}
