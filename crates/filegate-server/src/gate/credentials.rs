//! Credential extraction and comparison.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::HeaderMap;
use subtle::ConstantTimeEq;

/// Upper bound on an Authorization header we are willing to decode.
const MAX_CREDENTIAL_LEN: usize = 4096;

/// A parsed Basic credential pair.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicCredential {
    pub username: String,
    pub password: String,
}

/// Extracts the base64 blob from a `Basic` Authorization header, if the
/// header uses that scheme at all.
pub fn basic_payload(headers: &HeaderMap) -> Option<&str> {
    let raw = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    scheme_payload(raw, "Basic")
}

/// Extracts a bearer token from the configured header. For the standard
/// Authorization header the `Bearer` scheme prefix is required; a custom
/// header carries the bare token.
pub fn bearer_payload<'a>(headers: &'a HeaderMap, header: &str) -> Option<&'a str> {
    let raw = headers.get(header)?.to_str().ok()?;
    if header == "authorization" {
        scheme_payload(raw, "Bearer")
    } else {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Splits `Scheme payload`, matching the scheme case-insensitively.
fn scheme_payload<'a>(raw: &'a str, scheme: &str) -> Option<&'a str> {
    let (candidate, payload) = raw.trim().split_once(' ')?;
    if !candidate.eq_ignore_ascii_case(scheme) {
        return None;
    }
    let payload = payload.trim();
    (!payload.is_empty()).then_some(payload)
}

/// Decodes a Basic payload. `None` means the credential is malformed
/// (oversized, invalid base64, non-UTF-8, or missing the colon); malformed
/// credentials are rejected without counting toward the lockout budget.
pub fn decode_basic(payload: &str) -> Option<BasicCredential> {
    if payload.len() > MAX_CREDENTIAL_LEN {
        return None;
    }
    let decoded = STANDARD.decode(payload).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some(BasicCredential {
        username: username.to_owned(),
        password: password.to_owned(),
    })
}

/// Constant-time string equality. Comparison runs over both inputs even on
/// length mismatch so timing does not reveal the expected length prefix.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let lengths_match = a.len() == b.len();
    let bytes_match = if lengths_match {
        a.as_bytes().ct_eq(b.as_bytes()).into()
    } else {
        // Burn comparable work against itself; result is discarded.
        let _: bool = a.as_bytes().ct_eq(a.as_bytes()).into();
        false
    };
    lengths_match && bytes_match
}

/// Verifies a Basic pair without short-circuiting between username and
/// password.
pub fn basic_matches(cred: &BasicCredential, user: &str, pass: &str) -> bool {
    let user_ok = constant_time_eq(&cred.username, user);
    let pass_ok = constant_time_eq(&cred.password, pass);
    user_ok & pass_ok
}
