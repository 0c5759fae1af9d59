//! The credential gate.
//!
//! Every request passes through an ordered guard chain; the first guard
//! that claims the request decides its fate. Order matters: share tokens
//! beat share sessions so a fresh link always re-validates, and the
//! external-proxy path is consulted before header-borne credentials.
//!
//! Denials carry `Cache-Control: no-store` so an intermediary can never
//! replay a 401 challenge or serve a cached denial to another client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use filegate_share_tokens::{grant_allows, ScopeGrant, ShareMode, ShareOp, ValidateError};
use http::header::{
    CACHE_CONTROL, LOCATION, PRAGMA, RETRY_AFTER, SET_COOKIE, WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tracing::{debug, info, warn};

use crate::{mask_ip, now_unix, AppState};

pub mod credentials;
pub mod ledger;
pub mod lockout;

pub const SESSION_COOKIE: &str = "filegate_session";

/// Identity established by a guard, attached to admitted requests.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    Bypass,
    ShareToken,
    ShareSession,
    ExternalIdentity,
    BearerToken,
    BasicCredentials,
}

pub const GUARD_ORDER: [GuardKind; 6] = [
    GuardKind::Bypass,
    GuardKind::ShareToken,
    GuardKind::ShareSession,
    GuardKind::ExternalIdentity,
    GuardKind::BearerToken,
    GuardKind::BasicCredentials,
];

#[derive(Debug, Clone, Copy)]
enum DenyReason {
    /// 401; the challenge is attached only where a Basic prompt is useful.
    Unauthorized { challenge: bool },
    /// 429 from the failure lockout.
    RateLimited,
}

enum GuardOutcome {
    /// Guard does not apply; try the next one.
    Continue,
    /// Request admitted, optionally scoped to a share grant.
    Allow {
        grant: Option<ScopeGrant>,
        principal: Option<String>,
    },
    Deny(DenyReason),
    /// Terminal response built by the guard itself (redirects).
    ShortCircuit(Response),
}

/// What the middleware needs to do for an admitted request.
struct Admitted {
    grant: Option<ScopeGrant>,
    principal: Option<String>,
}

enum Admission {
    Proceed(Admitted),
    Respond(Response),
}

/// Per-request view the guards evaluate. Borrowed from the request so the
/// chain allocates nothing on the happy path.
struct GateRequest<'a> {
    method: &'a Method,
    /// Raw (still percent-encoded) request path.
    path: &'a str,
    query: &'a str,
    headers: &'a HeaderMap,
    peer_ip: IpAddr,
    now: i64,
}

/// Cookie side effects accumulated while the chain runs; applied to
/// whichever response leaves the gate.
#[derive(Default)]
struct CookieEffects {
    set: Option<String>,
    clear: bool,
}

pub async fn middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let peer_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));

    let mut cookies = CookieEffects::default();
    let admission = {
        let gate_req = GateRequest {
            method: req.method(),
            path: req.uri().path(),
            query: req.uri().query().unwrap_or(""),
            headers: req.headers(),
            peer_ip,
            now: now_unix(),
        };
        admit(&state, &gate_req, &mut cookies)
    };

    let mut response = match admission {
        Admission::Respond(response) => response,
        Admission::Proceed(admitted) => {
            if let Some(grant) = admitted.grant {
                req.extensions_mut().insert(grant);
            }
            if let Some(principal) = admitted.principal {
                req.extensions_mut().insert(Principal(principal));
            }
            next.run(req).await
        }
    };
    apply_cookies(&mut response, &state, &cookies);
    response
}

fn admit(state: &AppState, req: &GateRequest<'_>, cookies: &mut CookieEffects) -> Admission {
    for guard in GUARD_ORDER {
        let outcome = match guard {
            GuardKind::Bypass => bypass_guard(state, req),
            GuardKind::ShareToken => share_token_guard(state, req, cookies),
            GuardKind::ShareSession => share_session_guard(state, req, cookies),
            GuardKind::ExternalIdentity => external_guard(state, req),
            GuardKind::BearerToken => bearer_guard(state, req),
            GuardKind::BasicCredentials => basic_guard(state, req),
        };
        match outcome {
            GuardOutcome::Continue => continue,
            GuardOutcome::Allow { grant, principal } => {
                return Admission::Proceed(Admitted { grant, principal })
            }
            GuardOutcome::Deny(reason) => {
                return Admission::Respond(deny_response(state, reason))
            }
            GuardOutcome::ShortCircuit(response) => return Admission::Respond(response),
        }
    }

    // No guard claimed the request. With no scheme configured the gateway
    // is intentionally public; otherwise this is an anonymous request to a
    // protected gateway.
    if !state.cfg.any_scheme_enabled() {
        return Admission::Proceed(Admitted {
            grant: None,
            principal: None,
        });
    }
    Admission::Respond(deny_response(
        state,
        DenyReason::Unauthorized {
            challenge: state.cfg.basic.is_some(),
        },
    ))
}

/// Endpoints that never require credentials. The S3 surface is excluded
/// from the gate because it authenticates by request signature instead.
fn bypass_guard(state: &AppState, req: &GateRequest<'_>) -> GuardOutcome {
    let path = req.path;
    let open = path == "/healthz"
        || path == "/ready"
        || path == "/favicon.ico"
        || path == "/s3"
        || path.starts_with("/s3/")
        || (path == "/metrics"
            && (state.cfg.public_metrics || state.cfg.metrics_token.is_some()));
    if open {
        GuardOutcome::Allow {
            grant: None,
            principal: None,
        }
    } else {
        GuardOutcome::Continue
    }
}

fn share_token_guard(
    state: &AppState,
    req: &GateRequest<'_>,
    cookies: &mut CookieEffects,
) -> GuardOutcome {
    let Some(tokens) = &state.tokens else {
        return GuardOutcome::Continue;
    };
    let Some(token) = query_param(req.query, "s") else {
        return GuardOutcome::Continue;
    };

    let mut grant = match tokens.validate(&token, req.now) {
        Ok(grant) => grant,
        Err(ValidateError::Expired) => {
            state.metrics.record_share_token("expired");
            info!(
                event = "share_token_rejected",
                reason = "expired",
                client = %mask_ip(req.peer_ip),
                "expired share token"
            );
            return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
        }
        Err(_) => {
            state.metrics.record_share_token("rejected");
            warn!(
                event = "share_token_rejected",
                reason = "invalid",
                client = %mask_ip(req.peer_ip),
                "invalid share token"
            );
            return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
        }
    };

    if grant.is_one_time {
        if !state
            .ledger
            .try_consume_nonce(&grant.nonce, grant.expires_at_unix, req.now)
        {
            state.metrics.record_share_token("replayed");
            warn!(
                event = "share_token_replayed",
                client = %mask_ip(req.peer_ip),
                scope = %grant.scope_path,
                "one-time share token replayed"
            );
            return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
        }
        // Redeemed; the grant must no longer carry a shareable URL.
        grant.token.clear();

        if grant.mode == ShareMode::Directory {
            let session_id = state.ledger.create_session(grant.clone(), req.now);
            state.metrics.record_share_session("created");
            cookies.set = Some(session_cookie(state, &session_id));

            // A plain navigational GET gets bounced to the clean URL so the
            // consumed token never sits in the address bar or a refresh.
            if req.method == &Method::GET && query_param(req.query, "handler").is_none() {
                state.metrics.record_share_token("accepted");
                let location = url_without_share_param(req.path, req.query);
                let mut response = StatusCode::FOUND.into_response();
                if let Ok(value) = HeaderValue::try_from(location) {
                    response.headers_mut().insert(LOCATION, value);
                }
                no_store(&mut response);
                return GuardOutcome::ShortCircuit(response);
            }
        }
    }

    state.metrics.record_share_token("accepted");
    debug!(
        event = "share_token_accepted",
        scope = %grant.scope_path,
        one_time = grant.is_one_time,
        "share token accepted"
    );
    GuardOutcome::Allow {
        grant: Some(grant),
        principal: None,
    }
}

fn share_session_guard(
    state: &AppState,
    req: &GateRequest<'_>,
    cookies: &mut CookieEffects,
) -> GuardOutcome {
    if state.tokens.is_none() {
        return GuardOutcome::Continue;
    }
    let Some(session_id) = cookie_value(req.headers, SESSION_COOKIE) else {
        return GuardOutcome::Continue;
    };

    let Some(grant) = state.ledger.try_get_session(&session_id, req.now) else {
        // Dead cookie: fall through to the remaining guards, and tell the
        // client to drop it.
        state.metrics.record_share_session("expired");
        cookies.clear = true;
        return GuardOutcome::Continue;
    };

    let rel = percent_decode(req.path.trim_start_matches('/'));
    let op = op_from_query(req.query);
    if !grant_allows(&grant, &rel, op) {
        // Out of scope is a silent denial; a session holder probing around
        // the share gets no prompt and no hint.
        info!(
            event = "share_scope_denied",
            scope = %grant.scope_path,
            client = %mask_ip(req.peer_ip),
            "request outside share scope"
        );
        return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
    }

    state.metrics.record_share_session("resumed");
    GuardOutcome::Allow {
        grant: Some(grant),
        principal: None,
    }
}

fn external_guard(state: &AppState, req: &GateRequest<'_>) -> GuardOutcome {
    let Some(external) = &state.cfg.external else {
        return GuardOutcome::Continue;
    };
    let mut values = req.headers.get_all(external.header.as_str()).iter();
    let Some(first) = values.next() else {
        return GuardOutcome::Continue;
    };

    if !external.trusted_proxies.contains(&req.peer_ip) {
        state.metrics.record_auth_failure("external");
        warn!(
            event = "external_auth_rejected",
            reason = "untrusted_peer",
            client = %mask_ip(req.peer_ip),
            "identity header from untrusted peer"
        );
        return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
    }
    // Exactly one non-blank value; duplicates smell like header smuggling.
    let identity = first.to_str().map(str::trim).unwrap_or("");
    if values.next().is_some() || identity.is_empty() {
        state.metrics.record_auth_failure("external");
        warn!(
            event = "external_auth_rejected",
            reason = "malformed_header",
            client = %mask_ip(req.peer_ip),
            "external identity header malformed"
        );
        return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: false });
    }

    GuardOutcome::Allow {
        grant: None,
        principal: Some(identity.to_owned()),
    }
}

fn bearer_guard(state: &AppState, req: &GateRequest<'_>) -> GuardOutcome {
    let Some(bearer) = &state.cfg.bearer else {
        return GuardOutcome::Continue;
    };
    let Some(candidate) = credentials::bearer_payload(req.headers, &bearer.header) else {
        return GuardOutcome::Continue;
    };

    if let Some(outcome) = lockout_check(state, req, "bearer") {
        return outcome;
    }
    if credentials::constant_time_eq(candidate, &bearer.token) {
        return GuardOutcome::Allow {
            grant: None,
            principal: None,
        };
    }

    state.limiter.record_failure(req.peer_ip, req.now);
    state.metrics.record_auth_failure("bearer");
    warn!(
        event = "auth_failure",
        scheme = "bearer",
        client = %mask_ip(req.peer_ip),
        "bearer token rejected"
    );
    GuardOutcome::Deny(DenyReason::Unauthorized {
        challenge: state.cfg.basic.is_some(),
    })
}

fn basic_guard(state: &AppState, req: &GateRequest<'_>) -> GuardOutcome {
    let Some((user, pass)) = &state.cfg.basic else {
        return GuardOutcome::Continue;
    };
    let Some(payload) = credentials::basic_payload(req.headers) else {
        return GuardOutcome::Continue;
    };

    if let Some(outcome) = lockout_check(state, req, "basic") {
        return outcome;
    }
    let Some(cred) = credentials::decode_basic(payload) else {
        // Malformed, not wrong: rejected without charging the lockout
        // budget, since no amount of retrying makes it parse.
        state.metrics.record_auth_failure("basic");
        warn!(
            event = "auth_failure",
            scheme = "basic",
            reason = "malformed",
            client = %mask_ip(req.peer_ip),
            "malformed Basic credential"
        );
        return GuardOutcome::Deny(DenyReason::Unauthorized { challenge: true });
    };

    if credentials::basic_matches(&cred, user, pass) {
        return GuardOutcome::Allow {
            grant: None,
            principal: Some(cred.username),
        };
    }

    state.limiter.record_failure(req.peer_ip, req.now);
    state.metrics.record_auth_failure("basic");
    warn!(
        event = "auth_failure",
        scheme = "basic",
        client = %mask_ip(req.peer_ip),
        "Basic credential rejected"
    );
    GuardOutcome::Deny(DenyReason::Unauthorized { challenge: true })
}

/// Shared lockout gate for the credential guards. 429 takes priority over
/// any credential check, including a correct one.
fn lockout_check(
    state: &AppState,
    req: &GateRequest<'_>,
    scheme: &'static str,
) -> Option<GuardOutcome> {
    if !state.limiter.is_locked(req.peer_ip, req.now) {
        return None;
    }
    state.metrics.record_rate_limit_rejection();
    warn!(
        event = "auth_lockout",
        scheme,
        client = %mask_ip(req.peer_ip),
        "address locked out after repeated failures"
    );
    Some(GuardOutcome::Deny(DenyReason::RateLimited))
}

fn deny_response(state: &AppState, reason: DenyReason) -> Response {
    let mut response = match reason {
        DenyReason::Unauthorized { challenge } => {
            let body = serde_json::json!({ "error": "unauthorized" });
            let mut response =
                (StatusCode::UNAUTHORIZED, axum::Json(body)).into_response();
            if challenge {
                let value = format!("Basic realm=\"{}\", charset=\"UTF-8\"", state.cfg.realm);
                if let Ok(value) = HeaderValue::try_from(value) {
                    response.headers_mut().insert(WWW_AUTHENTICATE, value);
                }
            }
            response
        }
        DenyReason::RateLimited => {
            let body = serde_json::json!({ "error": "too many failed attempts" });
            let mut response =
                (StatusCode::TOO_MANY_REQUESTS, axum::Json(body)).into_response();
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(lockout::RETRY_AFTER_SECS));
            response
        }
    };
    no_store(&mut response);
    response
}

fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
}

fn apply_cookies(response: &mut Response, state: &AppState, cookies: &CookieEffects) {
    if let Some(cookie) = &cookies.set {
        if let Ok(value) = HeaderValue::try_from(cookie.as_str()) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    } else if cookies.clear {
        let cookie = format!(
            "{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            secure_suffix(state)
        );
        if let Ok(value) = HeaderValue::try_from(cookie) {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
}

fn session_cookie(state: &AppState, session_id: &str) -> String {
    format!(
        "{SESSION_COOKIE}={session_id}; Path=/; HttpOnly; SameSite=Lax{}",
        secure_suffix(state)
    )
}

fn secure_suffix(state: &AppState) -> &'static str {
    if state.cfg.cookie_secure {
        "; Secure"
    } else {
        ""
    }
}

/// First value of a query parameter, percent-decoded.
fn query_param(query: &str, name: &str) -> Option<String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(key) == name).then(|| percent_decode(value))
        })
}

/// Rebuilds `path?query` with the share parameter removed.
fn url_without_share_param(path: &str, query: &str) -> String {
    let rest: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            !pair.is_empty() && pair.split_once('=').map_or(*pair, |(k, _)| k) != "s"
        })
        .collect();
    if rest.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{}", rest.join("&"))
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|part| {
        let (key, value) = part.trim().split_once('=')?;
        (key == name).then(|| value.to_owned())
    })
}

fn op_from_query(query: &str) -> ShareOp {
    match query_param(query, "handler").as_deref() {
        None | Some("view") => ShareOp::View,
        Some("download") => ShareOp::Download,
        Some("dirsize") => ShareOp::DirSize,
        Some("zip") => ShareOp::ZipDownload,
        Some("archive") => ShareOp::ArchiveBrowse,
        Some(_) => ShareOp::View,
    }
}

/// Lossy `%XX` and `+`-free decoding for request paths.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Some(decoded) = hex_pair(bytes[i + 1], bytes[i + 2]) {
                out.push(decoded);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hex = |b: u8| match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    };
    Some(hex(hi)? << 4 | hex(lo)?)
}
