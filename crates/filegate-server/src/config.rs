//! Process configuration.
//!
//! Everything is a flag with a `FILEGATE_*` environment fallback, parsed
//! once at startup into the runtime [`Config`] the rest of the server
//! shares.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use filegate_sigv4::SigV4Credentials;

#[derive(Debug, Parser)]
#[command(name = "filegate", about = "Self-hosted file-serving gateway")]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "FILEGATE_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Directory to serve. Resolved to a canonical path at startup.
    #[arg(long, env = "FILEGATE_ROOT", default_value = "./files")]
    pub root: PathBuf,

    /// Basic credentials as `user:password`. Unset disables Basic auth.
    #[arg(long, env = "FILEGATE_AUTH")]
    pub auth: Option<String>,

    /// Realm announced in the Basic challenge.
    #[arg(long, env = "FILEGATE_REALM", default_value = "filegate")]
    pub realm: String,

    /// Static bearer token. Unset disables bearer auth.
    #[arg(long, env = "FILEGATE_BEARER_TOKEN")]
    pub bearer_token: Option<String>,

    /// Header the bearer token is read from.
    #[arg(long, env = "FILEGATE_BEARER_HEADER", default_value = "authorization")]
    pub bearer_header: String,

    /// Header a trusted reverse proxy asserts the authenticated user in.
    /// Unset disables external-proxy identity.
    #[arg(long, env = "FILEGATE_EXTERNAL_AUTH_HEADER")]
    pub external_auth_header: Option<String>,

    /// Proxy addresses allowed to assert the external identity header.
    #[arg(long, env = "FILEGATE_TRUSTED_PROXIES", value_delimiter = ',')]
    pub trusted_proxies: Vec<IpAddr>,

    /// Secret the share-token signing key is derived from. Unset disables
    /// share links entirely.
    #[arg(long, env = "FILEGATE_SHARE_SECRET")]
    pub share_secret: Option<String>,

    /// S3 surface access key id. All three S3 flags must be set together.
    #[arg(long, env = "FILEGATE_S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    /// S3 surface secret access key.
    #[arg(long, env = "FILEGATE_S3_SECRET_KEY")]
    pub s3_secret_key: Option<String>,

    /// Region requests to the S3 surface must be signed for.
    #[arg(long, env = "FILEGATE_S3_REGION")]
    pub s3_region: Option<String>,

    /// Glob patterns for paths hidden from every response.
    #[arg(long, env = "FILEGATE_HIDE", value_delimiter = ',')]
    pub hide: Vec<String>,

    /// Extensions refused for direct download (without the dot).
    #[arg(long, env = "FILEGATE_BLOCK_DOWNLOAD", value_delimiter = ',')]
    pub block_download: Vec<String>,

    /// Serve /metrics without authentication.
    #[arg(long, env = "FILEGATE_PUBLIC_METRICS")]
    pub public_metrics: bool,

    /// Bearer token required for /metrics when it is not public.
    #[arg(long, env = "FILEGATE_METRICS_TOKEN")]
    pub metrics_token: Option<String>,

    /// Mark the share-session cookie Secure.
    #[arg(long, env = "FILEGATE_COOKIE_SECURE")]
    pub cookie_secure: bool,

    /// Log filter, e.g. `info` or `filegate_server=debug`.
    #[arg(long, env = "FILEGATE_LOG", default_value = "info")]
    pub log: String,
}

#[derive(Debug, Clone)]
pub struct BearerConfig {
    pub token: String,
    /// Lowercased header name the token arrives in.
    pub header: String,
}

#[derive(Debug, Clone)]
pub struct ExternalAuthConfig {
    /// Lowercased identity header name.
    pub header: String,
    pub trusted_proxies: HashSet<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub root: PathBuf,
    pub realm: String,
    pub basic: Option<(String, String)>,
    pub bearer: Option<BearerConfig>,
    pub external: Option<ExternalAuthConfig>,
    pub share_secret: Option<String>,
    pub s3: Option<SigV4Credentials>,
    pub hide_patterns: Vec<String>,
    pub blocked_extensions: Vec<String>,
    pub public_metrics: bool,
    pub metrics_token: Option<String>,
    pub cookie_secure: bool,
    pub log: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let basic = args
            .auth
            .as_deref()
            .map(|raw| {
                let (user, pass) = raw
                    .split_once(':')
                    .context("--auth must be `user:password`")?;
                if user.is_empty() || pass.is_empty() {
                    bail!("--auth user and password must both be non-empty");
                }
                Ok((user.to_owned(), pass.to_owned()))
            })
            .transpose()?;

        let bearer = args.bearer_token.map(|token| BearerConfig {
            token,
            header: args.bearer_header.to_ascii_lowercase(),
        });

        let external = args
            .external_auth_header
            .map(|header| {
                if args.trusted_proxies.is_empty() {
                    bail!("--external-auth-header requires --trusted-proxies");
                }
                Ok(ExternalAuthConfig {
                    header: header.to_ascii_lowercase(),
                    trusted_proxies: args.trusted_proxies.iter().copied().collect(),
                })
            })
            .transpose()?;

        let s3 = match (args.s3_access_key, args.s3_secret_key, args.s3_region) {
            (None, None, None) => None,
            (Some(access_key_id), Some(secret_access_key), Some(region)) => {
                Some(SigV4Credentials {
                    access_key_id,
                    secret_access_key,
                    region,
                })
            }
            _ => bail!("--s3-access-key, --s3-secret-key and --s3-region must be set together"),
        };

        Ok(Config {
            listen: args.listen,
            root: args.root,
            realm: args.realm,
            basic,
            bearer,
            external,
            share_secret: args.share_secret,
            s3,
            hide_patterns: args.hide,
            blocked_extensions: args.block_download,
            public_metrics: args.public_metrics,
            metrics_token: args.metrics_token,
            cookie_secure: args.cookie_secure,
            log: args.log,
        })
    }

    /// True when at least one credential scheme is configured; a gateway
    /// with none is intentionally public.
    pub fn any_scheme_enabled(&self) -> bool {
        self.basic.is_some()
            || self.bearer.is_some()
            || self.external.is_some()
            || self.share_secret.is_some()
    }
}
