//! S3-compatible object surface.
//!
//! Mounted under `/s3` and excluded from the credential gate; every
//! request authenticates by AWS Signature V4 instead, verified against the
//! full original URI (signers sign the path the client sent, prefix
//! included). Errors use the S3 XML shape so stock SDKs surface them.

use axum::body::Body;
use axum::extract::{OriginalUri, Path as AxumPath, Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use filegate_pathguard::normalize_relative;
use filegate_sigv4::{verify_request, SigV4Error};
use http::{header, HeaderValue, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::{mask_ip, now_unix, AppState};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/*key", get(get_object).head(head_object))
        .layer(middleware::from_fn_with_state(state, verify_middleware))
}

async fn verify_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(creds) = &state.cfg.s3 else {
        return xml_error(StatusCode::NOT_FOUND, "NoSuchKey", "not found", req.uri().path());
    };

    // Clients sign the URI they send, which includes the /s3 prefix the
    // nested router has already stripped from `req.uri()`.
    let original = req
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.0.clone());
    let (path, query) = match &original {
        Some(uri) => (uri.path(), uri.query().unwrap_or("")),
        None => (req.uri().path(), req.uri().query().unwrap_or("")),
    };

    let verdict = verify_request(
        creds,
        req.method().as_str(),
        path,
        query,
        req.headers(),
        now_unix(),
    );
    match verdict {
        Ok(()) => next.run(req).await,
        Err(err) => {
            state.metrics.record_sigv4_rejection(err.aws_code());
            let peer = req
                .extensions()
                .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
                .map(|info| mask_ip(info.0.ip()));
            warn!(
                event = "sigv4_rejected",
                code = err.aws_code(),
                client = peer.as_deref().unwrap_or("unknown"),
                "s3 request rejected"
            );
            sigv4_error_response(err, path)
        }
    }
}

async fn get_object(
    State(state): State<AppState>,
    OriginalUri(original): OriginalUri,
    AxumPath(key): AxumPath<String>,
) -> Response {
    match lookup(&state, &key).await {
        Ok((canonical, len)) => {
            let Ok(file) = tokio::fs::File::open(&canonical).await else {
                return xml_error(StatusCode::NOT_FOUND, "NoSuchKey", "not found", original.path());
            };
            let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
            object_headers(&mut response, len);
            response
        }
        Err(()) => xml_error(StatusCode::NOT_FOUND, "NoSuchKey", "not found", original.path()),
    }
}

async fn head_object(
    State(state): State<AppState>,
    AxumPath(key): AxumPath<String>,
) -> Response {
    match lookup(&state, &key).await {
        Ok((_canonical, len)) => {
            let mut response = Response::new(Body::empty());
            object_headers(&mut response, len);
            response
        }
        Err(()) => {
            // HEAD carries the status without a body.
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

/// Resolves an object key to a canonical file path, applying the same
/// containment and visibility rules as the file routes. Directories are
/// not objects.
async fn lookup(state: &AppState, key: &str) -> Result<(std::path::PathBuf, u64), ()> {
    let rel = normalize_relative(key).ok_or(())?;
    let physical = state.policy.resolve_physical_path(&rel).ok_or(())?;
    let canonical = state.policy.resolve_canonical_path(&physical).ok_or(())?;
    let meta = tokio::fs::metadata(&canonical).await.map_err(|_| ())?;
    if meta.is_dir() || state.policy.is_hidden(&rel, meta.is_dir()) {
        return Err(());
    }
    Ok((canonical, meta.len()))
}

fn object_headers(response: &mut Response, len: u64) {
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("none"));
}

fn sigv4_error_response(err: SigV4Error, resource: &str) -> Response {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::FORBIDDEN);
    xml_error(status, err.aws_code(), &err.to_string(), resource)
}

fn xml_error(status: StatusCode, code: &str, message: &str, resource: &str) -> Response {
    let body = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <Error><Code>{}</Code><Message>{}</Message><Resource>{}</Resource></Error>",
        xml_escape(code),
        xml_escape(message),
        xml_escape(resource)
    );
    (
        status,
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response()
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
