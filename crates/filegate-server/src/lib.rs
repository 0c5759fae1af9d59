//! filegate: a self-hosted file-serving gateway.
//!
//! The HTTP surface is a single axum router. Every request first passes
//! through the credential gate ([`gate`]), which decides between anonymous
//! bypass, share-token or share-session access, external-proxy identity,
//! bearer tokens, and Basic credentials. Admitted requests reach the file
//! consumer routes ([`http`]) or the SigV4-protected S3 surface.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use filegate_pathguard::PathPolicy;
use filegate_share_tokens::ShareTokenService;

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod metrics;
pub mod server;

use config::Config;
use gate::ledger::ShareLedger;
use gate::lockout::FailureLimiter;
use metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub policy: Arc<PathPolicy>,
    pub tokens: Option<Arc<ShareTokenService>>,
    pub ledger: Arc<ShareLedger>,
    pub limiter: Arc<FailureLimiter>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Builds state from a resolved config. The root in `cfg` must already
    /// be canonical; [`server::start`] takes care of that for the binary.
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let policy = PathPolicy::new(cfg.root.clone())
            .with_hide_patterns(cfg.hide_patterns.clone())
            .with_blocked_extensions(cfg.blocked_extensions.clone());
        let tokens = cfg
            .share_secret
            .as_deref()
            .map(|secret| Arc::new(ShareTokenService::new(secret.as_bytes())));
        Ok(Self {
            cfg: Arc::new(cfg),
            policy: Arc::new(policy),
            tokens,
            ledger: Arc::new(ShareLedger::new()),
            limiter: Arc::new(FailureLimiter::new()),
            metrics: Arc::new(Metrics::new()?),
        })
    }
}

/// Assembles the full router: health and metrics endpoints, the share mint
/// API, the S3 surface, and the file consumer catch-all, wrapped in the
/// credential gate and the request-id observability layer.
pub fn app(state: AppState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/healthz", get(http::health))
        .route("/ready", get(http::ready))
        .route("/metrics", get(http::metrics_handler))
        .route("/api/share", post(http::share::create_share))
        .nest("/s3", http::s3::router(state.clone()))
        .route("/", get(http::files::serve_root))
        .route("/*path", get(http::files::serve_path))
        .layer(middleware::from_fn_with_state(state.clone(), gate::middleware))
        .layer(middleware::from_fn_with_state(
            metrics,
            http::observability::middleware,
        ))
        .with_state(state)
}

pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Masks a client address for logs: the last IPv4 octet (or everything past
/// the first four IPv6 groups) is dropped.
pub(crate) fn mask_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, c, _] = v4.octets();
            format!("{a}.{b}.{c}.0")
        }
        IpAddr::V6(v6) => {
            let segs = v6.segments();
            format!(
                "{:x}:{:x}:{:x}:{:x}::",
                segs[0], segs[1], segs[2], segs[3]
            )
        }
    }
}
