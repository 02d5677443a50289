//! Per-request state shared between the dispatcher and the callable.

use crate::registry::Namespace;
use kwikapi_protocol::PROTOCOL_HEADER;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Outcome of authenticating a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthInfo {
    pub is_authenticated: bool,
    pub principal: Option<String>,
    /// Scheme that produced this result (`"bearer"`, ...).
    pub scheme: Option<String>,
}

impl AuthInfo {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(scheme: impl Into<String>, principal: Option<String>) -> Self {
        Self {
            is_authenticated: true,
            principal,
            scheme: Some(scheme.into()),
        }
    }
}

/// Response metadata the callable may adjust.
#[derive(Debug, Clone, Default)]
pub struct ResponseState {
    headers: Vec<(String, String)>,
    protocol_override: Option<String>,
}

impl ResponseState {
    /// Sets a response header, replacing an existing one of the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Selects the codec used for the response.
    pub fn set_protocol(&mut self, name: impl Into<String>) {
        self.protocol_override = Some(name.into());
    }

    /// Returns the response codec chosen by the callable, if any.
    ///
    /// An explicit [`set_protocol`](Self::set_protocol) wins over a
    /// protocol response header.
    pub fn protocol_override(&self) -> Option<&str> {
        self.protocol_override
            .as_deref()
            .or_else(|| self.header(PROTOCOL_HEADER))
    }
}

/// State of one invocation.
///
/// Created fresh for each request and dropped when the response is done.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub version: String,
    pub namespace: Namespace,
    pub method: String,
    /// Arguments as received, before coercion. Streamed parameters are
    /// not included.
    pub raw_params: Map<String, Value>,
    /// Parameters fed from a lazily decoded sequence.
    pub streaming_input: HashSet<String>,
    pub auth: AuthInfo,
    pub response: ResponseState,
    request_headers: Vec<(String, String)>,
}

impl RequestContext {
    /// Creates a context with a fresh request ID.
    pub fn new() -> Self {
        Self::with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            version: String::new(),
            namespace: Namespace::root(),
            method: String::new(),
            raw_params: Map::new(),
            streaming_input: HashSet::new(),
            auth: AuthInfo::anonymous(),
            response: ResponseState::default(),
            request_headers: Vec::new(),
        }
    }

    pub fn set_request_headers(&mut self, headers: Vec<(String, String)>) {
        self.request_headers = headers;
    }

    /// Looks up a request header, ignoring case.
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_streaming_input(&self, param: &str) -> bool {
        self.streaming_input.contains(param)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
