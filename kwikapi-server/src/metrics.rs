//! Prometheus metrics for the kwikapi server.
//!
//! The HTTP adapter serves the text encoding at `/metrics` when enabled.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0];

/// Prometheus metrics for the kwikapi server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Total dispatched requests by version and method.
    pub requests_total: CounterVec,
    /// Total failed requests by envelope code.
    pub errors_total: CounterVec,
    /// Time spent before the response body starts, by method.
    pub request_duration: HistogramVec,
    /// Records emitted by streaming responses, by method.
    pub streamed_records_total: CounterVec,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "kwikapi_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "kwikapi_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let requests_total = CounterVec::new(
            Opts::new("kwikapi_requests_total", "Total requests by method"),
            &["version", "method"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("kwikapi_errors_total", "Total failed requests by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "kwikapi_request_duration_seconds",
                "Request duration in seconds by method",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["method"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let streamed_records_total = CounterVec::new(
            Opts::new(
                "kwikapi_streamed_records_total",
                "Total records emitted by streaming responses",
            ),
            &["method"],
        )?;
        registry.register(Box::new(streamed_records_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            errors_total,
            request_duration,
            streamed_records_total,
        })
    }

    /// Records one dispatched request.
    pub fn observe_request(&self, version: &str, method: &str) {
        self.requests_total
            .with_label_values(&[version, method])
            .inc();
    }

    /// Records one failure envelope.
    pub fn observe_error(&self, code: i64) {
        let code = code.to_string();
        self.errors_total.with_label_values(&[code.as_str()]).inc();
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
