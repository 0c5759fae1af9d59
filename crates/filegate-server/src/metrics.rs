//! Prometheus metrics.
//!
//! Label values are pre-initialized where the value set is known so the
//! series exist from the first scrape.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    pub auth_failures_total: IntCounterVec,
    pub rate_limit_rejections_total: IntCounter,
    pub share_tokens_total: IntCounterVec,
    pub share_sessions_total: IntCounterVec,
    pub sigv4_rejections_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("filegate_http_requests_total", "HTTP requests served"),
            &["method", "status"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "filegate_http_request_duration_seconds",
                "HTTP request latency",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let auth_failures_total = IntCounterVec::new(
            Opts::new("filegate_auth_failures_total", "Rejected credential attempts"),
            &["scheme"],
        )?;
        registry.register(Box::new(auth_failures_total.clone()))?;
        for scheme in ["basic", "bearer", "external"] {
            auth_failures_total.with_label_values(&[scheme]);
        }

        let rate_limit_rejections_total = IntCounter::new(
            "filegate_rate_limit_rejections_total",
            "Requests refused while a client address is locked out",
        )?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;

        let share_tokens_total = IntCounterVec::new(
            Opts::new("filegate_share_tokens_total", "Share-token validations"),
            &["result"],
        )?;
        registry.register(Box::new(share_tokens_total.clone()))?;
        for result in ["accepted", "rejected", "expired", "replayed"] {
            share_tokens_total.with_label_values(&[result]);
        }

        let share_sessions_total = IntCounterVec::new(
            Opts::new("filegate_share_sessions_total", "Share-session lookups"),
            &["result"],
        )?;
        registry.register(Box::new(share_sessions_total.clone()))?;
        for result in ["created", "resumed", "expired"] {
            share_sessions_total.with_label_values(&[result]);
        }

        let sigv4_rejections_total = IntCounterVec::new(
            Opts::new("filegate_sigv4_rejections_total", "Rejected S3 requests"),
            &["code"],
        )?;
        registry.register(Box::new(sigv4_rejections_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            auth_failures_total,
            rate_limit_rejections_total,
            share_tokens_total,
            share_sessions_total,
            sigv4_rejections_total,
        })
    }

    pub fn record_http_request(&self, method: &str, status: u16) {
        self.http_requests_total
            .with_label_values(&[method, &status.to_string()])
            .inc();
    }

    pub fn http_duration(&self, method: &str) -> Histogram {
        self.http_request_duration_seconds
            .with_label_values(&[method])
    }

    pub fn record_auth_failure(&self, scheme: &str) {
        self.auth_failures_total.with_label_values(&[scheme]).inc();
    }

    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejections_total.inc();
    }

    pub fn record_share_token(&self, result: &str) {
        self.share_tokens_total.with_label_values(&[result]).inc();
    }

    pub fn record_share_session(&self, result: &str) {
        self.share_sessions_total.with_label_values(&[result]).inc();
    }

    pub fn record_sigv4_rejection(&self, code: &str) {
        self.sigv4_rejections_total.with_label_values(&[code]).inc();
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(buf)
    }

    pub fn content_type() -> &'static str {
        // Prometheus text exposition format.
        "text/plain; version=0.0.4"
    }
}
