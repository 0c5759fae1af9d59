//! Capability tokens for the filegate gateway.
//!
//! A share token is `base64url(payload-json) "." base64url(hmac-sha256)`. The
//! payload carries a version, a mode letter (`f`/`d`), the root-relative
//! scope path, a unix expiry, a one-time flag and (for one-time tokens) a
//! random nonce. Tokens are fully self-contained: validating a non-one-time
//! token requires no server-side state, which matters because the gateway has
//! no durable store.
//!
//! The signing key is derived from the gateway secret with HKDF bound to a
//! fixed context string, so the share-token key is never the raw secret.

#![forbid(unsafe_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Tolerance applied when comparing timestamps against expiry, absorbing
/// clock drift between the minting and validating hosts.
pub const EXPIRY_SKEW_SECS: i64 = 60;

const SHARE_KEY_CONTEXT: &[u8] = b"filegate share token key v1";
const TOKEN_VERSION: u8 = 1;
const NONCE_LEN: usize = 16;
const SIG_LEN: usize = 32;
// base64url without padding of a 32-byte HMAC is always 43 chars.
const SIG_B64_LEN: usize = 43;
const MAX_PAYLOAD_B64_LEN: usize = 4 * 1024;
const MAX_TOKEN_LEN: usize = MAX_PAYLOAD_B64_LEN + 1 + SIG_B64_LEN;

type HmacSha256 = Hmac<Sha256>;

/// What a grant covers: one file, or one directory subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    File,
    Directory,
}

impl ShareMode {
    fn letter(self) -> &'static str {
        match self {
            Self::File => "f",
            Self::Directory => "d",
        }
    }

    fn from_letter(letter: &str) -> Option<Self> {
        match letter {
            "f" => Some(Self::File),
            "d" => Some(Self::Directory),
            _ => None,
        }
    }
}

/// The result of successful share-token (or share-session) validation,
/// attached to the request context for the duration of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeGrant {
    pub mode: ShareMode,
    /// Root-relative, slash-normalized, no `.`/`..` segments. Non-empty
    /// whenever `mode` is [`ShareMode::File`].
    pub scope_path: String,
    pub expires_at_unix: i64,
    /// The wire token. Cleared after a one-time redemption so it cannot leak
    /// onward from the session store.
    pub token: String,
    pub is_one_time: bool,
    /// Random redemption nonce; empty unless `is_one_time`.
    pub nonce: String,
}

/// Operation discriminator checked against a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOp {
    View,
    Download,
    DirSize,
    ZipDownload,
    ArchiveBrowse,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MintError {
    #[error("scope path is not a valid root-relative path")]
    InvalidScopePath,
    #[error("file grants require a non-empty scope path")]
    EmptyFileScope,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidateError {
    /// Unparseable token: bad framing, bad base64, bad JSON, unknown
    /// version or mode, or a one-time payload without a nonce.
    #[error("malformed share token")]
    Malformed,
    #[error("share token signature mismatch")]
    SignatureMismatch,
    /// Well-formed and correctly signed, but past `expiry + skew`.
    #[error("share token expired")]
    Expired,
}

#[derive(Serialize, Deserialize)]
struct TokenPayload {
    v: u8,
    m: String,
    p: String,
    e: i64,
    o: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<String>,
}

/// Mints and validates share tokens under one derived key.
#[derive(Clone)]
pub struct ShareTokenService {
    key: [u8; 32],
}

impl ShareTokenService {
    pub fn new(secret: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::new(None, secret);
        let mut key = [0u8; 32];
        hk.expand(SHARE_KEY_CONTEXT, &mut key)
            .expect("32 bytes is a valid HKDF-SHA256 output length");
        Self { key }
    }

    /// Creates a token granting time-boxed read access to `scope_path`.
    pub fn mint(
        &self,
        mode: ShareMode,
        scope_path: &str,
        expires_at_unix: i64,
        one_time: bool,
    ) -> Result<String, MintError> {
        let scope = filegate_pathguard::normalize_relative(scope_path)
            .ok_or(MintError::InvalidScopePath)?;
        if mode == ShareMode::File && scope.is_empty() {
            return Err(MintError::EmptyFileScope);
        }

        let nonce = one_time.then(|| {
            let mut raw = [0u8; NONCE_LEN];
            rand::thread_rng().fill_bytes(&mut raw);
            URL_SAFE_NO_PAD.encode(raw)
        });

        let payload = TokenPayload {
            v: TOKEN_VERSION,
            m: mode.letter().to_owned(),
            p: scope,
            e: expires_at_unix,
            o: u8::from(one_time),
            n: nonce,
        };
        let payload_raw = serde_json::to_vec(&payload)
            .expect("token payload serialization is infallible");

        let sig = self.sign(&payload_raw);
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload_raw),
            URL_SAFE_NO_PAD.encode(sig)
        ))
    }

    /// Validates a wire token. No field is trusted before the signature
    /// verifies; expiry is the last check so the caller can distinguish
    /// [`ValidateError::Expired`] from forgery.
    pub fn validate(&self, token: &str, now_unix: i64) -> Result<ScopeGrant, ValidateError> {
        // Coarse cap before scanning attacker-controlled input for delimiters.
        if token.len() > MAX_TOKEN_LEN {
            return Err(ValidateError::Malformed);
        }
        let mut parts = token.split('.');
        let payload_b64 = parts.next().ok_or(ValidateError::Malformed)?;
        let sig_b64 = parts.next().ok_or(ValidateError::Malformed)?;
        if parts.next().is_some() {
            return Err(ValidateError::Malformed);
        }
        if payload_b64.is_empty()
            || payload_b64.len() > MAX_PAYLOAD_B64_LEN
            || sig_b64.len() != SIG_B64_LEN
        {
            return Err(ValidateError::Malformed);
        }

        let payload_raw = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| ValidateError::Malformed)?;
        let provided_sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| ValidateError::Malformed)?;
        if provided_sig.len() != SIG_LEN {
            return Err(ValidateError::Malformed);
        }

        let expected_sig = self.sign(&payload_raw);
        if !bool::from(expected_sig.ct_eq(provided_sig.as_slice())) {
            return Err(ValidateError::SignatureMismatch);
        }

        let payload: TokenPayload =
            serde_json::from_slice(&payload_raw).map_err(|_| ValidateError::Malformed)?;
        if payload.v != TOKEN_VERSION {
            return Err(ValidateError::Malformed);
        }
        let mode = ShareMode::from_letter(&payload.m).ok_or(ValidateError::Malformed)?;
        let one_time = match payload.o {
            0 => false,
            1 => true,
            _ => return Err(ValidateError::Malformed),
        };
        let nonce = payload.n.unwrap_or_default();
        if one_time && nonce.is_empty() {
            return Err(ValidateError::Malformed);
        }

        let scope = filegate_pathguard::normalize_relative(&payload.p)
            .ok_or(ValidateError::Malformed)?;
        if mode == ShareMode::File && scope.is_empty() {
            return Err(ValidateError::Malformed);
        }

        if now_unix > payload.e + EXPIRY_SKEW_SECS {
            return Err(ValidateError::Expired);
        }

        Ok(ScopeGrant {
            mode,
            scope_path: scope,
            expires_at_unix: payload.e,
            token: token.to_owned(),
            is_one_time: one_time,
            nonce,
        })
    }

    fn sign(&self, payload: &[u8]) -> [u8; SIG_LEN] {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .expect("HMAC-SHA256 accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().into()
    }
}

/// Whether `op` against root-relative `path` is compatible with the grant.
///
/// A File grant permits operations against exactly its scope path; a
/// Directory grant permits the scope path and anything nested under it, for
/// the directory allow-list. Static assets never reach this check (the
/// gate's bypass guard admits them first).
pub fn grant_allows(grant: &ScopeGrant, path: &str, op: ShareOp) -> bool {
    let Some(path) = filegate_pathguard::normalize_relative(path) else {
        return false;
    };

    match grant.mode {
        ShareMode::File => {
            path == grant.scope_path
                && matches!(op, ShareOp::View | ShareOp::Download | ShareOp::ArchiveBrowse)
        }
        ShareMode::Directory => {
            let in_scope = grant.scope_path.is_empty()
                || path == grant.scope_path
                || path
                    .strip_prefix(&grant.scope_path)
                    .is_some_and(|rest| rest.starts_with('/'));
            in_scope
                && matches!(
                    op,
                    ShareOp::View | ShareOp::DirSize | ShareOp::ZipDownload | ShareOp::ArchiveBrowse
                )
        }
    }
}
