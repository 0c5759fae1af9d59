//! Share-link minting.
//!
//! Only fully-authenticated callers may mint. A caller holding a share
//! grant is by definition a guest inside someone else's scope, so the gate
//! attaches the grant and this handler refuses it.

use axum::extract::{Extension, State};
use axum::Json;
use filegate_share_tokens::{MintError, ScopeGrant, ShareMode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::{now_unix, AppState};

const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

#[derive(Debug, Deserialize)]
pub struct ShareRequest {
    path: String,
    /// "file" or "dir".
    mode: String,
    #[serde(default = "default_ttl")]
    ttl_secs: u64,
    #[serde(default)]
    one_time: bool,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    token: String,
    url: String,
    expires_at_unix: i64,
}

pub async fn create_share(
    State(state): State<AppState>,
    grant: Option<Extension<ScopeGrant>>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, ApiError> {
    if grant.is_some() {
        return Err(ApiError::Forbidden);
    }
    let Some(tokens) = &state.tokens else {
        // Sharing disabled; the endpoint does not exist as far as callers
        // can tell.
        return Err(ApiError::NotFound);
    };

    let mode = match req.mode.as_str() {
        "file" => ShareMode::File,
        "dir" => ShareMode::Directory,
        _ => return Err(ApiError::BadRequest("mode must be \"file\" or \"dir\"")),
    };
    if req.ttl_secs == 0 || req.ttl_secs > MAX_TTL_SECS {
        return Err(ApiError::BadRequest("ttl out of range"));
    }

    let expires_at_unix = now_unix() + req.ttl_secs as i64;
    let token = tokens
        .mint(mode, &req.path, expires_at_unix, req.one_time)
        .map_err(|err| match err {
            MintError::InvalidScopePath => ApiError::BadRequest("invalid scope path"),
            MintError::EmptyFileScope => ApiError::BadRequest("file shares need a path"),
        })?;

    info!(
        event = "share_minted",
        mode = %req.mode,
        one_time = req.one_time,
        expires_at_unix,
        "share link minted"
    );

    let url = format!("/{}?s={token}", req.path.trim_start_matches('/'));
    Ok(Json(ShareResponse {
        token,
        url,
        expires_at_unix,
    }))
}
