use prometheus::{Counter, CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Global metrics for the gateway
pub struct Metrics {
    pub registry: Registry,

    // HTTP surface
    pub http_requests_total: CounterVec,

    // Drive API calls
    pub provider_requests_total: CounterVec,
    pub provider_duration_seconds: HistogramVec,

    // Authorization
    pub auth_exchanges_total: CounterVec,

    // Downloads
    pub download_bytes_total: Counter,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new(
                "drive_gateway_http_requests_total",
                "Total number of HTTP requests served",
            ),
            &["route", "status"],
        )?;

        let provider_requests_total = CounterVec::new(
            Opts::new(
                "drive_gateway_provider_requests_total",
                "Total number of Drive API calls",
            ),
            &["operation", "outcome"],
        )?;

        let provider_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "drive_gateway_provider_duration_seconds",
                "Drive API call duration in seconds (until response headers)",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )?;

        let auth_exchanges_total = CounterVec::new(
            Opts::new(
                "drive_gateway_auth_exchanges_total",
                "Authorization code exchanges by outcome",
            ),
            &["outcome"],
        )?;

        let download_bytes_total = Counter::new(
            "drive_gateway_download_bytes_total",
            "Total bytes streamed from Drive to clients",
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(provider_requests_total.clone()))?;
        registry.register(Box::new(provider_duration_seconds.clone()))?;
        registry.register(Box::new(auth_exchanges_total.clone()))?;
        registry.register(Box::new(download_bytes_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            provider_requests_total,
            provider_duration_seconds,
            auth_exchanges_total,
            download_bytes_total,
        })
    }

    /// Render the registry in Prometheus text exposition format
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::default()));
