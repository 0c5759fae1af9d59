//! Shared helpers for the integration tests: a populated serving tree, a
//! config builder, and request plumbing that mimics a connected client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Response;
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use filegate_server::config::Config;
use filegate_server::{app, AppState};
use http::Request;
use http_body_util::BodyExt;
use tempfile::TempDir;

pub struct TestTree {
    pub dir: TempDir,
    /// Canonicalized root, as the server resolves it at startup.
    pub root: PathBuf,
}

pub fn tree() -> TestTree {
    let dir = tempfile::tempdir().unwrap();
    let root = std::fs::canonicalize(dir.path()).unwrap();
    std::fs::create_dir_all(root.join("docs")).unwrap();
    std::fs::write(root.join("docs/readme.txt"), b"hello docs").unwrap();
    std::fs::write(root.join("docs/notes.md"), b"# notes").unwrap();
    std::fs::write(root.join("top.txt"), b"top").unwrap();
    std::fs::write(root.join("secret.txt"), b"classified").unwrap();
    TestTree { dir, root }
}

pub fn base_config(root: &Path) -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        root: root.to_path_buf(),
        realm: "filegate".to_owned(),
        basic: None,
        bearer: None,
        external: None,
        share_secret: None,
        s3: None,
        hide_patterns: Vec::new(),
        blocked_extensions: Vec::new(),
        public_metrics: true,
        metrics_token: None,
        cookie_secure: false,
        log: "info".to_owned(),
    }
}

pub fn make_app(cfg: Config) -> Router {
    app(AppState::new(cfg).unwrap())
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    request_from(method, uri, [127, 0, 0, 1])
}

pub fn request_from(method: &str, uri: &str, ip: [u8; 4]) -> Request<Body> {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((ip, 40_000))));
    req
}

pub fn with_header(mut req: Request<Body>, name: &str, value: &str) -> Request<Body> {
    req.headers_mut().insert(
        http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
        value.parse().unwrap(),
    );
    req
}

pub fn with_basic_auth(req: Request<Body>, user: &str, pass: &str) -> Request<Body> {
    let encoded = STANDARD.encode(format!("{user}:{pass}"));
    with_header(req, "authorization", &format!("Basic {encoded}"))
}

pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Extracts `name=value` from a Set-Cookie header value.
pub fn cookie_from(response: &Response) -> Option<String> {
    let raw = header(response, "set-cookie")?;
    raw.split(';').next().map(str::to_owned)
}
