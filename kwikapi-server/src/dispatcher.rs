//! Request dispatch.
//!
//! Every request walks `Resolving -> Binding -> Invoking -> Serializing ->
//! Done`. Any error along the way moves it to `Failed` and is turned into a
//! failure envelope here; callers of [`Dispatcher::handle`] never see an
//! error value.

use crate::auth::{Authenticator, BearerAuthenticator};
use crate::config::{ApiConfig, Config};
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::transport::{RequestBody, ResponseBody, TransportRequest, TransportResponse};
use bytes::{Bytes, BytesMut};
use kwikapi_core::{
    bind, CallError, CoreError, MethodEntry, MethodRegistry, Namespace, Output, RawArg, RawParams,
    RequestContext, ValueStream,
};
use kwikapi_protocol::{
    deserialize_stream, ByteChunks, Codec, CodecTable, Envelope, JsonCodec, PROTOCOL_HEADER,
    REQUEST_ID_HEADER, STREAM_PARAM_HEADER,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

const AUTHORIZATION_HEADER: &str = "Authorization";

/// Position of a request in the dispatch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Binding,
    Invoking,
    Serializing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Binding => "binding",
            Stage::Invoking => "invoking",
            Stage::Serializing => "serializing",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Routing and negotiation defaults.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Leading path segment, `"api"` by default. Empty means no prefix.
    pub prefix: String,
    pub default_version: Option<String>,
    /// Handler-level default codec, consulted before the table default.
    pub default_protocol: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&ApiConfig::default())
    }
}

impl From<&ApiConfig> for DispatchSettings {
    fn from(api: &ApiConfig) -> Self {
        Self {
            prefix: api.prefix.trim_matches('/').to_string(),
            default_version: api.default_version.clone(),
            default_protocol: api.default_protocol.clone(),
        }
    }
}

/// What the failure path needs to know about a request in flight.
struct Progress {
    stage: Stage,
    codec: Option<Arc<dyn Codec>>,
    method: Option<String>,
}

/// Routes transport requests to registered methods.
pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    codecs: Arc<CodecTable>,
    settings: DispatchSettings,
    authenticator: Option<Arc<dyn Authenticator>>,
    auth_required: bool,
    metrics: Option<Arc<Metrics>>,
}

impl Dispatcher {
    pub fn new(registry: Arc<MethodRegistry>, codecs: Arc<CodecTable>) -> Self {
        Self {
            registry,
            codecs,
            settings: DispatchSettings::default(),
            authenticator: None,
            auth_required: false,
            metrics: None,
        }
    }

    /// Builds a dispatcher from loaded configuration.
    ///
    /// A bearer authenticator is installed when tokens are configured or
    /// authentication is required.
    pub fn from_config(
        registry: Arc<MethodRegistry>,
        codecs: Arc<CodecTable>,
        config: &Config,
    ) -> Self {
        let mut dispatcher = Self::new(registry, codecs).with_settings((&config.api).into());
        if config.auth.required || !config.auth.token_hashes.is_empty() {
            dispatcher = dispatcher
                .with_authenticator(Arc::new(BearerAuthenticator::from_config(&config.auth)));
        }
        dispatcher.require_auth(config.auth.required)
    }

    pub fn with_settings(mut self, settings: DispatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Rejects unauthenticated calls with `AuthenticationError`.
    pub fn require_auth(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn codecs(&self) -> &Arc<CodecTable> {
        &self.codecs
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Handles one request. The status is always 200; the outcome is in
    /// the envelope.
    ///
    /// Blocks while the callable runs. A streamed body is produced lazily
    /// as the returned response is drained.
    pub fn handle(&self, request: TransportRequest) -> TransportResponse {
        let started = Instant::now();
        let request_id = request
            .header(REQUEST_ID_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut ctx = RequestContext::with_request_id(request_id);

        let mut progress = Progress {
            stage: Stage::Resolving,
            codec: None,
            method: None,
        };
        let response = match self.run(&mut ctx, request, &mut progress) {
            Ok(response) => response,
            Err(err) => self.fail(&ctx, &mut progress, err),
        };

        if let (Some(metrics), Some(method)) = (&self.metrics, &progress.method) {
            metrics
                .request_duration
                .with_label_values(&[method.as_str()])
                .observe(started.elapsed().as_secs_f64());
        }
        response
    }

    fn run(
        &self,
        ctx: &mut RequestContext,
        request: TransportRequest,
        progress: &mut Progress,
    ) -> Result<TransportResponse, ServerError> {
        let TransportRequest {
            path,
            query,
            headers,
            body,
        } = request;
        ctx.set_request_headers(headers);

        let entry = self.resolve(&path, ctx)?;
        progress.method = Some(entry.name.clone());
        if let Some(ref metrics) = self.metrics {
            metrics.observe_request(&ctx.version, &ctx.method);
        }

        enter(progress, Stage::Binding, ctx);
        let codec = self.negotiate(ctx.request_header(PROTOCOL_HEADER), ctx)?;
        progress.codec = Some(codec.clone());
        self.authenticate(ctx)?;
        let stream_param = ctx.request_header(STREAM_PARAM_HEADER).map(str::to_string);
        let raw = collect_params(&query, body, stream_param, codec.as_ref())?;
        let args = bind(&entry.params, raw, ctx)?;

        enter(progress, Stage::Invoking, ctx);
        let output = entry.invoke(ctx, args)?;

        enter(progress, Stage::Serializing, ctx);
        let codec = self.response_codec(ctx, codec)?;
        progress.codec = Some(codec.clone());
        let headers = response_headers(ctx, codec.as_ref());
        let body = match output {
            Output::Value(value) => {
                let payload = if codec.wraps_response() {
                    Envelope::ok(value).to_value()
                } else {
                    value
                };
                ResponseBody::Full(codec.serialize(&payload)?)
            }
            Output::Stream(records) => ResponseBody::Stream(Box::new(StreamingBody {
                records,
                codec,
                request_id: ctx.request_id.clone(),
                method: entry.name.clone(),
                metrics: self.metrics.clone(),
                emitted: 0,
                finished: false,
            })),
        };

        enter(progress, Stage::Done, ctx);
        Ok(TransportResponse {
            status: 200,
            headers,
            body,
        })
    }

    /// Splits the path into version, namespace and method and looks the
    /// method up.
    fn resolve(
        &self,
        path: &str,
        ctx: &mut RequestContext,
    ) -> Result<Arc<MethodEntry>, CoreError> {
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if !self.settings.prefix.is_empty() {
            if segments.first() != Some(&self.settings.prefix.as_str()) {
                return Err(CoreError::UnknownApiFunction {
                    method: path.to_string(),
                });
            }
            segments.remove(0);
        }

        let Some((method, rest)) = segments.split_last() else {
            return Err(CoreError::UnknownApiFunction {
                method: String::new(),
            });
        };
        let (version, namespace) = match rest.split_first() {
            Some((first, tail)) if self.registry.has_version(first) => (first.to_string(), tail),
            _ => match (&self.settings.default_version, rest.split_first()) {
                (Some(default), _) => (default.clone(), rest),
                (None, Some((first, tail))) => (first.to_string(), tail),
                (None, None) => {
                    return Err(CoreError::UnknownVersion {
                        version: String::new(),
                    })
                }
            },
        };

        ctx.version = version;
        ctx.namespace = Namespace::from_segments(namespace.iter().copied());
        ctx.method = method.to_string();
        tracing::debug!(
            request_id = %ctx.request_id,
            version = %ctx.version,
            namespace = %ctx.namespace,
            method = %ctx.method,
            "Resolving method"
        );
        self.registry.resolve(&ctx.version, &ctx.namespace, &ctx.method)
    }

    /// Picks the request codec: explicit header, then a response override
    /// already on the context, then the handler default, then the table
    /// default.
    fn negotiate(
        &self,
        requested: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<Arc<dyn Codec>, ServerError> {
        let name = requested
            .map(str::trim)
            .or_else(|| ctx.response.protocol_override())
            .or(self.settings.default_protocol.as_deref());
        let codec = match name {
            Some(name) => self.codecs.get(name)?,
            None => self.codecs.default_codec()?,
        };
        Ok(codec)
    }

    fn response_codec(
        &self,
        ctx: &RequestContext,
        negotiated: Arc<dyn Codec>,
    ) -> Result<Arc<dyn Codec>, ServerError> {
        match ctx.response.protocol_override() {
            Some(name) if name != negotiated.name() => Ok(self.codecs.get(name)?),
            _ => Ok(negotiated),
        }
    }

    fn authenticate(&self, ctx: &mut RequestContext) -> Result<(), ServerError> {
        if let Some(ref authenticator) = self.authenticator {
            let auth = authenticator.authenticate(ctx.request_header(AUTHORIZATION_HEADER))?;
            ctx.auth = auth;
        }
        if self.auth_required && !ctx.auth.is_authenticated {
            return Err(ServerError::NotAuthenticated);
        }
        Ok(())
    }

    /// Codec for failures that happen before negotiation succeeds.
    fn fallback_codec(&self) -> Arc<dyn Codec> {
        self.settings
            .default_protocol
            .as_deref()
            .and_then(|name| self.codecs.get(name).ok())
            .or_else(|| self.codecs.default_codec().ok())
            .unwrap_or_else(|| Arc::new(JsonCodec) as Arc<dyn Codec>)
    }

    fn fail(
        &self,
        ctx: &RequestContext,
        progress: &mut Progress,
        err: ServerError,
    ) -> TransportResponse {
        tracing::warn!(
            request_id = %ctx.request_id,
            stage = %progress.stage,
            code = err.code(),
            "Request failed: {}",
            err
        );
        progress.stage = Stage::Failed;
        if let Some(ref metrics) = self.metrics {
            metrics.observe_error(err.code());
        }

        let codec = progress
            .codec
            .clone()
            .unwrap_or_else(|| self.fallback_codec());
        let envelope = err.to_envelope().to_value();
        let (codec, body) = match codec.serialize(&envelope) {
            Ok(body) => (codec, body),
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    protocol = codec.name(),
                    "Failed to encode error envelope, falling back to JSON: {}",
                    e
                );
                let json: Arc<dyn Codec> = Arc::new(JsonCodec);
                let body = json
                    .serialize(&envelope)
                    .unwrap_or_else(|_| Bytes::from_static(FALLBACK_ENVELOPE));
                (json, body)
            }
        };
        TransportResponse {
            status: 200,
            headers: response_headers(ctx, codec.as_ref()),
            body: ResponseBody::Full(body),
        }
    }
}

/// Sent when even the JSON envelope cannot be encoded.
const FALLBACK_ENVELOPE: &[u8] =
    br#"{"code":50000,"error":"InternalError","message":"internal error","success":false}"#;

fn enter(progress: &mut Progress, stage: Stage, ctx: &RequestContext) {
    tracing::debug!(
        request_id = %ctx.request_id,
        from = %progress.stage,
        to = %stage,
        "Dispatch stage"
    );
    progress.stage = stage;
}

/// Merges body and query arguments. Query values win.
fn collect_params(
    query: &str,
    body: RequestBody,
    stream_param: Option<String>,
    codec: &dyn Codec,
) -> Result<RawParams, ServerError> {
    let mut raw = RawParams::new();

    match stream_param {
        Some(name) => {
            let chunks: ByteChunks = match body {
                RequestBody::Empty => Box::new(std::iter::empty()),
                RequestBody::Bytes(bytes) => Box::new(std::iter::once(Ok(bytes))),
                RequestBody::Stream(chunks) => chunks,
            };
            let records = deserialize_stream(codec, chunks)?;
            let stream: ValueStream = Box::new(records.map(|r| r.map_err(CallError::from)));
            raw.insert(name.trim().to_string(), RawArg::Stream(stream));
        }
        None => {
            let bytes = read_body(body)?;
            if !bytes.iter().all(u8::is_ascii_whitespace) {
                match codec.deserialize(&bytes)? {
                    Value::Object(map) => {
                        for (name, value) in map {
                            raw.insert(name, RawArg::Data(value));
                        }
                    }
                    Value::Null => {}
                    other => {
                        return Err(CoreError::NonKeywordArguments {
                            args: other.to_string(),
                        }
                        .into())
                    }
                }
            }
        }
    }

    for (name, value) in parse_query(query)? {
        raw.insert(name, RawArg::Text(value));
    }
    Ok(raw)
}

fn read_body(body: RequestBody) -> Result<Bytes, ServerError> {
    match body {
        RequestBody::Empty => Ok(Bytes::new()),
        RequestBody::Bytes(bytes) => Ok(bytes),
        RequestBody::Stream(chunks) => {
            let mut buf = BytesMut::new();
            for chunk in chunks {
                buf.extend_from_slice(&chunk?);
            }
            Ok(buf.freeze())
        }
    }
}

/// Decodes `a=1&b=2`. A segment without `=` is a positional argument.
fn parse_query(query: &str) -> Result<Vec<(String, String)>, CoreError> {
    let positional: Vec<&str> = query
        .split('&')
        .filter(|s| !s.is_empty() && !s.contains('='))
        .collect();
    if !positional.is_empty() {
        return Err(CoreError::NonKeywordArguments {
            args: positional.join(", "),
        });
    }
    Ok(url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect())
}

fn response_headers(ctx: &RequestContext, codec: &dyn Codec) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), codec.mime_type().to_string()),
        (REQUEST_ID_HEADER.to_string(), ctx.request_id.clone()),
    ];
    for (name, value) in ctx.response.headers() {
        if name.eq_ignore_ascii_case(PROTOCOL_HEADER) {
            continue;
        }
        match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(slot) => slot.1 = value.clone(),
            None => headers.push((name.clone(), value.clone())),
        }
    }
    headers.push((PROTOCOL_HEADER.to_string(), codec.name().to_string()));
    headers
}

/// Encodes a streamed result one record at a time.
///
/// A failing element ends the stream with a single failure envelope.
struct StreamingBody {
    records: ValueStream,
    codec: Arc<dyn Codec>,
    request_id: String,
    method: String,
    metrics: Option<Arc<Metrics>>,
    emitted: u64,
    finished: bool,
}

impl StreamingBody {
    fn terminate(&mut self, err: ServerError) -> Option<Bytes> {
        self.finished = true;
        tracing::warn!(
            request_id = %self.request_id,
            method = %self.method,
            records = self.emitted,
            code = err.code(),
            "Stream aborted: {}",
            err
        );
        if let Some(ref metrics) = self.metrics {
            metrics.observe_error(err.code());
        }
        self.codec
            .encode_record(&err.to_envelope().to_value())
            .ok()
    }
}

impl Iterator for StreamingBody {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.finished {
            return None;
        }
        match self.records.next() {
            Some(Ok(value)) => match self.codec.encode_record(&value) {
                Ok(bytes) => {
                    self.emitted += 1;
                    if let Some(ref metrics) = self.metrics {
                        metrics
                            .streamed_records_total
                            .with_label_values(&[self.method.as_str()])
                            .inc();
                    }
                    Some(bytes)
                }
                Err(e) => self.terminate(e.into()),
            },
            Some(Err(e)) => self.terminate(e.into()),
            None => {
                self.finished = true;
                tracing::debug!(
                    request_id = %self.request_id,
                    method = %self.method,
                    records = self.emitted,
                    "Stream complete"
                );
                None
            }
        }
    }
}
