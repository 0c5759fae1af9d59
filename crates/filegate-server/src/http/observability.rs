use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request};
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use crate::metrics::Metrics;

pub(crate) async fn middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method.as_str(),
        path = %path,
    );

    let start = Instant::now();
    let mut res = {
        let _guard = span.enter();
        next.run(req).await
    };

    let latency = start.elapsed();
    let status = res.status().as_u16();

    res.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&request_id).unwrap_or_else(|_| HeaderValue::from_static("invalid")),
    );

    metrics.record_http_request(method.as_str(), status);
    metrics.http_duration(method.as_str()).observe(latency.as_secs_f64());

    tracing::info!(
        parent: &span,
        status,
        latency_seconds = latency.as_secs_f64(),
        "request complete"
    );

    res
}
