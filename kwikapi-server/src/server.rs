//! HTTP/1 transport adapter.
//!
//! Each request is dispatched on the blocking pool. Request bodies are
//! pumped into the dispatcher through a bounded channel; streamed responses
//! go out through a channel of capacity one, so a record is only produced
//! after the previous one was taken by the connection.

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::metrics::Metrics;
use crate::transport::{ChunkStream, RequestBody, ResponseBody, TransportRequest, TransportResponse};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use kwikapi_core::MethodRegistry;
use kwikapi_protocol::CodecTable;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Semaphore};

/// Request body chunks buffered ahead of the dispatcher.
const REQUEST_CHUNK_BUFFER: usize = 8;

type HttpBody = BoxBody<Bytes, Infallible>;

/// HTTP server in front of a [`Dispatcher`].
pub struct HttpServer {
    bind_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    metrics: Option<Arc<Metrics>>,
    connections: Arc<Semaphore>,
    shutdown: broadcast::Sender<()>,
}

impl HttpServer {
    pub fn new(bind_addr: SocketAddr, dispatcher: Dispatcher) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            bind_addr,
            dispatcher: Arc::new(dispatcher),
            metrics: None,
            connections: Arc::new(Semaphore::new(1000)),
            shutdown: shutdown_tx,
        }
    }

    /// Builds the dispatcher, metrics and limits from configuration.
    pub fn from_config(
        config: &Config,
        registry: Arc<MethodRegistry>,
        codecs: Arc<CodecTable>,
    ) -> Result<Self, ServerError> {
        let mut dispatcher = Dispatcher::from_config(registry, codecs, config);
        let metrics = if config.metrics.enabled {
            let metrics = Arc::new(Metrics::new()?);
            dispatcher = dispatcher.with_metrics(metrics.clone());
            Some(metrics)
        } else {
            None
        };

        let mut server = Self::new(config.network.bind_addr, dispatcher)
            .with_max_connections(config.network.max_connections);
        server.metrics = metrics;
        Ok(server)
    }

    /// Serves `/metrics` from `metrics`. The dispatcher is not changed.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.connections = Arc::new(Semaphore::new(max));
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Signals the accept loop and open connections to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Binds the configured address and serves until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serves connections accepted from `listener` until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        tracing::info!("Server listening on http://{}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let Ok(permit) = self.connections.clone().try_acquire_owned() else {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            };

                            if let Some(ref metrics) = self.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let dispatcher = self.dispatcher.clone();
                            let metrics = self.metrics.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let _permit = permit;
                                tracing::debug!("Client connected: {}", addr);

                                let service_metrics = metrics.clone();
                                let service = service_fn(move |req| {
                                    let dispatcher = dispatcher.clone();
                                    let metrics = service_metrics.clone();
                                    async move { handle_request(req, dispatcher, metrics).await }
                                });
                                let conn = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service);
                                tokio::pin!(conn);

                                let mut draining = false;
                                loop {
                                    tokio::select! {
                                        result = conn.as_mut() => {
                                            if let Err(e) = result {
                                                tracing::debug!("Connection {} error: {}", addr, e);
                                            }
                                            break;
                                        }
                                        _ = conn_shutdown.recv(), if !draining => {
                                            draining = true;
                                            conn.as_mut().graceful_shutdown();
                                        }
                                    }
                                }

                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }
                                tracing::debug!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle_request(
    req: Request<Incoming>,
    dispatcher: Arc<Dispatcher>,
    metrics: Option<Arc<Metrics>>,
) -> Result<Response<HttpBody>, Infallible> {
    match req.uri().path() {
        "/metrics" => {
            if let Some(metrics) = metrics {
                return Ok(metrics_response(&metrics));
            }
        }
        "/health" | "/healthz" => return Ok(plain(StatusCode::OK, "OK")),
        _ => {}
    }

    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let mut request = TransportRequest::new(&target);
    request.headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let (tx, mut rx) = mpsc::channel(REQUEST_CHUNK_BUFFER);
    tokio::spawn(pump_request_body(req.into_body(), tx));
    request.body = RequestBody::Stream(Box::new(std::iter::from_fn(move || rx.blocking_recv())));

    match tokio::task::spawn_blocking(move || dispatcher.handle(request)).await {
        Ok(response) => Ok(into_http(response)),
        Err(e) => {
            tracing::error!("Dispatch task failed: {}", e);
            Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error"))
        }
    }
}

/// Forwards request body data frames until the body ends or the
/// dispatcher drops its side.
async fn pump_request_body(mut body: Incoming, tx: mpsc::Sender<io::Result<Bytes>>) {
    while let Some(frame) = body.frame().await {
        let item = match frame {
            Ok(frame) => match frame.into_data() {
                Ok(data) => Ok(data),
                Err(_) => continue,
            },
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            break;
        }
    }
}

fn into_http(response: TransportResponse) -> Response<HttpBody> {
    let TransportResponse {
        status,
        headers,
        body,
    } = response;

    let body = match body {
        ResponseBody::Full(bytes) => Full::new(bytes).boxed(),
        ResponseBody::Stream(chunks) => stream_body(chunks),
    };

    let mut out = Response::new(body);
    *out.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    for (name, value) in headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                out.headers_mut().append(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid response header"),
        }
    }
    out
}

fn stream_body(chunks: ChunkStream) -> HttpBody {
    let (tx, rx) = mpsc::channel(1);
    tokio::task::spawn_blocking(move || {
        for chunk in chunks {
            if tx.blocking_send(chunk).is_err() {
                tracing::debug!("Client went away, stopping stream");
                break;
            }
        }
    });
    ChannelBody { rx }.boxed()
}

/// Response body fed from a channel.
struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx
            .poll_recv(cx)
            .map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

fn metrics_response(metrics: &Metrics) -> Response<HttpBody> {
    match metrics.encode() {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)).boxed());
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            response
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            plain(StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable")
        }
    }
}

fn plain(status: StatusCode, text: &'static str) -> Response<HttpBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(text.as_bytes())).boxed());
    *response.status_mut() = status;
    response
}
