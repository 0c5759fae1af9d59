//! AWS Signature Version 4 verification for the S3-compatible surface.
//!
//! Implements the canonical-request / string-to-sign / derived-signing-key
//! protocol for `Authorization: AWS4-HMAC-SHA256 ...` headers. This validator
//! is independent of the gateway's other credential schemes; the S3 routes
//! call it directly instead of the credential gate's header parsing.

#![forbid(unsafe_code)]

mod canonical;
mod timestamp;

use hmac::{Hmac, Mac};
use http::header::AUTHORIZATION;
use http::HeaderMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub use timestamp::format_amz_date;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";
const TERMINATOR: &str = "aws4_request";
const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Requests timestamped more than this far from the gateway clock (either
/// direction) are rejected.
const MAX_CLOCK_SKEW_SECS: i64 = 15 * 60;

type HmacSha256 = Hmac<Sha256>;

/// The key pair and region the gateway accepts signatures for.
#[derive(Debug, Clone)]
pub struct SigV4Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// AWS-style rejection codes. The wire error code is [`Self::aws_code`]; the
/// HTTP status is [`Self::status_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SigV4Error {
    /// No `Authorization` header, or no usable timestamp header.
    #[error("request is missing a required security header")]
    MissingSecurityHeader,
    /// Structurally invalid authorization header, including credential-scope
    /// mismatches (region, service, terminator, date-stamp) and an unsigned
    /// `host` header. Detected before any signature computation.
    #[error("authorization header is malformed")]
    AuthorizationHeaderMalformed,
    #[error("access key id does not exist")]
    InvalidAccessKeyId,
    #[error("request time too skewed")]
    RequestTimeTooSkewed,
    #[error("signature does not match")]
    SignatureDoesNotMatch,
}

impl SigV4Error {
    pub fn aws_code(self) -> &'static str {
        match self {
            Self::MissingSecurityHeader => "MissingSecurityHeader",
            Self::AuthorizationHeaderMalformed => "AuthorizationHeaderMalformed",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::MissingSecurityHeader | Self::AuthorizationHeaderMalformed => 400,
            Self::InvalidAccessKeyId
            | Self::RequestTimeTooSkewed
            | Self::SignatureDoesNotMatch => 403,
        }
    }
}

struct ParsedAuthorization<'a> {
    access_key_id: &'a str,
    date_stamp: &'a str,
    region: &'a str,
    service: &'a str,
    terminator: &'a str,
    signed_headers: Vec<String>,
    signature: &'a str,
}

/// Verifies a SigV4-signed request against the configured credentials.
///
/// `uri_path` and `raw_query` are taken exactly as they appeared on the
/// request line; canonicalization (segment re-encoding, query sorting)
/// happens here so the comparison matches what the client signed.
pub fn verify_request(
    creds: &SigV4Credentials,
    method: &str,
    uri_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    now_unix: i64,
) -> Result<(), SigV4Error> {
    let auth_raw = headers
        .get(AUTHORIZATION)
        .ok_or(SigV4Error::MissingSecurityHeader)?
        .to_str()
        .map_err(|_| SigV4Error::AuthorizationHeaderMalformed)?;
    let auth = parse_authorization(auth_raw)?;

    // Credential-scope cross-checks come before any signature work.
    if auth.service != SERVICE || auth.terminator != TERMINATOR {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }
    if auth.region != creds.region {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }
    if !auth.signed_headers.iter().any(|h| h == "host") {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }
    if auth.access_key_id != creds.access_key_id {
        return Err(SigV4Error::InvalidAccessKeyId);
    }

    let amz_date = request_timestamp(headers)?;
    let request_unix =
        timestamp::parse_amz_date(&amz_date).ok_or(SigV4Error::AuthorizationHeaderMalformed)?;
    if (now_unix - request_unix).abs() > MAX_CLOCK_SKEW_SECS {
        return Err(SigV4Error::RequestTimeTooSkewed);
    }
    if amz_date[..8] != *auth.date_stamp {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }

    let payload_hash = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(UNSIGNED_PAYLOAD);

    let canonical_request = canonical::canonical_request(
        method,
        uri_path,
        raw_query,
        headers,
        &auth.signed_headers,
        payload_hash,
    )
    .ok_or(SigV4Error::AuthorizationHeaderMalformed)?;

    let scope = format!(
        "{}/{}/{SERVICE}/{TERMINATOR}",
        auth.date_stamp, creds.region
    );
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(
        creds.secret_access_key.as_bytes(),
        auth.date_stamp,
        &creds.region,
    );
    let computed = hmac_sha256(&signing_key, string_to_sign.as_bytes());

    let provided: [u8; 32] = hex::decode(auth.signature)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(SigV4Error::AuthorizationHeaderMalformed)?;

    if bool::from(computed.ct_eq(&provided)) {
        Ok(())
    } else {
        Err(SigV4Error::SignatureDoesNotMatch)
    }
}

fn parse_authorization(raw: &str) -> Result<ParsedAuthorization<'_>, SigV4Error> {
    let rest = raw
        .strip_prefix(ALGORITHM)
        .ok_or(SigV4Error::AuthorizationHeaderMalformed)?;
    if !rest.starts_with(' ') {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;
    for part in rest.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(SigV4Error::AuthorizationHeaderMalformed)?;
        match key {
            "Credential" => credential = Some(value),
            "SignedHeaders" => signed_headers = Some(value),
            "Signature" => signature = Some(value),
            _ => return Err(SigV4Error::AuthorizationHeaderMalformed),
        }
    }

    let credential = credential.ok_or(SigV4Error::AuthorizationHeaderMalformed)?;
    let signed_headers = signed_headers.ok_or(SigV4Error::AuthorizationHeaderMalformed)?;
    let signature = signature.ok_or(SigV4Error::AuthorizationHeaderMalformed)?;

    let scope_parts: Vec<&str> = credential.split('/').collect();
    let [access_key_id, date_stamp, region, service, terminator] = scope_parts[..] else {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    };
    if access_key_id.is_empty() || date_stamp.is_empty() {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }

    let mut names: Vec<String> = signed_headers
        .split(';')
        .map(|h| h.trim().to_ascii_lowercase())
        .filter(|h| !h.is_empty())
        .collect();
    if names.is_empty() {
        return Err(SigV4Error::AuthorizationHeaderMalformed);
    }
    names.sort_unstable();
    names.dedup();

    Ok(ParsedAuthorization {
        access_key_id,
        date_stamp,
        region,
        service,
        terminator,
        signed_headers: names,
        signature,
    })
}

/// Timestamp string used in the string-to-sign: `x-amz-date` verbatim, or
/// the `Date` header converted to the compact ISO8601 form.
fn request_timestamp(headers: &HeaderMap) -> Result<String, SigV4Error> {
    if let Some(value) = headers.get("x-amz-date") {
        let raw = value
            .to_str()
            .map_err(|_| SigV4Error::AuthorizationHeaderMalformed)?;
        return Ok(raw.to_owned());
    }

    let raw = headers
        .get(http::header::DATE)
        .ok_or(SigV4Error::MissingSecurityHeader)?
        .to_str()
        .map_err(|_| SigV4Error::AuthorizationHeaderMalformed)?;
    let time = httpdate::parse_http_date(raw)
        .map_err(|_| SigV4Error::AuthorizationHeaderMalformed)?;
    let unix = time
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| SigV4Error::AuthorizationHeaderMalformed)?
        .as_secs() as i64;
    Ok(timestamp::format_amz_date(unix))
}

/// `HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), "s3"), "aws4_request")`
fn derive_signing_key(secret: &[u8], date_stamp: &str, region: &str) -> [u8; 32] {
    let mut seed = Vec::with_capacity(4 + secret.len());
    seed.extend_from_slice(b"AWS4");
    seed.extend_from_slice(secret);

    let k_date = hmac_sha256(&seed, date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, TERMINATOR.as_bytes())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC-SHA256 accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}
