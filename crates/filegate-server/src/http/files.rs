//! File consumer routes: inline view, download, directory listing, and
//! recursive directory size.
//!
//! Every handler re-derives containment from scratch. The gate has already
//! admitted the request, but scope and visibility are re-checked here so a
//! routing mistake upstream can never turn into a disclosure.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Extension, Path as AxumPath, Query, State};
use axum::response::{IntoResponse, Response};
use filegate_pathguard::{normalize_relative, PathPolicy};
use filegate_share_tokens::{grant_allows, ScopeGrant, ShareOp};
use http::{header, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConsumerQuery {
    handler: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListingEntry {
    name: String,
    is_dir: bool,
    size: u64,
}

#[derive(Debug, Serialize)]
struct Listing {
    path: String,
    entries: Vec<ListingEntry>,
}

#[derive(Debug, Serialize)]
struct DirSize {
    path: String,
    total_bytes: u64,
    files: u64,
}

pub async fn serve_root(
    State(state): State<AppState>,
    Query(query): Query<ConsumerQuery>,
    grant: Option<Extension<ScopeGrant>>,
) -> Result<Response, ApiError> {
    serve(state, String::new(), query, grant.map(|e| e.0)).await
}

pub async fn serve_path(
    State(state): State<AppState>,
    AxumPath(path): AxumPath<String>,
    Query(query): Query<ConsumerQuery>,
    grant: Option<Extension<ScopeGrant>>,
) -> Result<Response, ApiError> {
    serve(state, path, query, grant.map(|e| e.0)).await
}

async fn serve(
    state: AppState,
    raw_path: String,
    query: ConsumerQuery,
    grant: Option<ScopeGrant>,
) -> Result<Response, ApiError> {
    let rel = normalize_relative(&raw_path).ok_or(ApiError::NotFound)?;
    let op = match query.handler.as_deref() {
        None | Some("view") => ShareOp::View,
        Some("download") => ShareOp::Download,
        Some("dirsize") => ShareOp::DirSize,
        Some(_) => return Err(ApiError::BadRequest("unknown handler")),
    };

    let physical = state
        .policy
        .resolve_physical_path(&rel)
        .ok_or(ApiError::NotFound)?;
    let canonical = state
        .policy
        .resolve_canonical_path(&physical)
        .ok_or(ApiError::NotFound)?;
    let meta = tokio::fs::metadata(&canonical)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let is_dir = meta.is_dir();

    if state.policy.is_hidden(&rel, is_dir) {
        return Err(ApiError::NotFound);
    }
    if let Some(grant) = &grant {
        if !grant_allows(grant, &rel, op) {
            return Err(ApiError::Forbidden);
        }
    }

    match (op, is_dir) {
        (ShareOp::View, true) => list_directory(&state, &rel, canonical).await,
        (ShareOp::View, false) => stream_file(canonical, &rel, meta.len(), false).await,
        (ShareOp::Download, false) => {
            if state.policy.is_download_blocked(&rel) {
                return Err(ApiError::Forbidden);
            }
            stream_file(canonical, &rel, meta.len(), true).await
        }
        (ShareOp::Download, true) => Err(ApiError::BadRequest("not a file")),
        (ShareOp::DirSize, true) => dir_size(&state, &rel, canonical).await,
        (ShareOp::DirSize, false) => Err(ApiError::BadRequest("not a directory")),
        // Never parsed from a handler name above; these ops exist only as
        // grant scopes.
        (ShareOp::ZipDownload | ShareOp::ArchiveBrowse, _) => {
            Err(ApiError::BadRequest("unknown handler"))
        }
    }
}

async fn stream_file(
    canonical: PathBuf,
    rel: &str,
    len: u64,
    attachment: bool,
) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&canonical)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    let disposition = format!(
        "{}; filename=\"{}\"",
        if attachment { "attachment" } else { "inline" },
        disposition_filename(rel)
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// Last path segment with quote and control characters stripped, safe to
/// embed in a quoted Content-Disposition parameter.
fn disposition_filename(rel: &str) -> String {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let name: String = name
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    if name.is_empty() {
        "download".to_owned()
    } else {
        name
    }
}

async fn list_directory(
    state: &AppState,
    rel: &str,
    canonical: PathBuf,
) -> Result<Response, ApiError> {
    let mut reader = tokio::fs::read_dir(&canonical)
        .await
        .map_err(|_| ApiError::Internal)?;

    let mut entries = Vec::new();
    while let Ok(Some(entry)) = reader.next_entry().await {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let child_rel = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        // Entries that escape the root through a symlink are simply absent
        // from the listing.
        let Some(child_canonical) = state.policy.resolve_canonical_path(&entry.path()) else {
            continue;
        };
        let Ok(meta) = tokio::fs::metadata(&child_canonical).await else {
            continue;
        };
        let is_dir = meta.is_dir();
        if state.policy.is_hidden(&child_rel, is_dir) {
            continue;
        }
        entries.push(ListingEntry {
            name,
            is_dir,
            size: if is_dir { 0 } else { meta.len() },
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(axum::Json(Listing {
        path: rel.to_owned(),
        entries,
    })
    .into_response())
}

async fn dir_size(
    state: &AppState,
    rel: &str,
    canonical: PathBuf,
) -> Result<Response, ApiError> {
    let policy = state.policy.clone();
    let rel_owned = rel.to_owned();
    let (total_bytes, files) =
        tokio::task::spawn_blocking(move || walk_size(&policy, &rel_owned, &canonical))
            .await
            .map_err(|_| ApiError::Internal)?;

    Ok(axum::Json(DirSize {
        path: rel.to_owned(),
        total_bytes,
        files,
    })
    .into_response())
}

/// Recursive size walk applying the same visibility and containment rules
/// as the listing: hidden entries and escaping symlinks contribute nothing.
/// Each canonical directory is descended into at most once, so symlink
/// cycles terminate and in-root aliases are not double-counted.
fn walk_size(policy: &Arc<PathPolicy>, rel: &str, dir: &std::path::Path) -> (u64, u64) {
    let mut visited = HashSet::from([dir.to_path_buf()]);
    walk_size_inner(policy, rel, dir, &mut visited)
}

fn walk_size_inner(
    policy: &Arc<PathPolicy>,
    rel: &str,
    dir: &std::path::Path,
    visited: &mut HashSet<PathBuf>,
) -> (u64, u64) {
    let mut total = 0u64;
    let mut files = 0u64;
    let Ok(reader) = std::fs::read_dir(dir) else {
        return (0, 0);
    };
    for entry in reader.flatten() {
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        let child_rel = if rel.is_empty() {
            name.clone()
        } else {
            format!("{rel}/{name}")
        };
        let Some(child_canonical) = policy.resolve_canonical_path(&entry.path()) else {
            continue;
        };
        let Ok(meta) = std::fs::metadata(&child_canonical) else {
            continue;
        };
        if policy.is_hidden(&child_rel, meta.is_dir()) {
            continue;
        }
        if meta.is_dir() {
            if !visited.insert(child_canonical.clone()) {
                continue;
            }
            let (sub_total, sub_files) =
                walk_size_inner(policy, &child_rel, &child_canonical, visited);
            total += sub_total;
            files += sub_files;
        } else {
            total += meta.len();
            files += 1;
        }
    }
    (total, files)
}
