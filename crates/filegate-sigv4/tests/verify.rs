//! End-to-end verification against a locally minted signer.
//!
//! The signer below duplicates the canonicalization rules on purpose, so the
//! vectors are produced independently of the crate's internals.

use filegate_sigv4::{verify_request, SigV4Credentials, SigV4Error};
use hmac::{Hmac, Mac};
use http::HeaderMap;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const NOW: i64 = 1_768_478_400; // 20260115T120000Z
const AMZ_DATE: &str = "20260115T120000Z";
const DATE_STAMP: &str = "20260115";

fn creds() -> SigV4Credentials {
    SigV4Credentials {
        access_key_id: "AKIDEXAMPLE".to_owned(),
        secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_owned(),
        region: "eu-west-1".to_owned(),
    }
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).unwrap();
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::new();
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Signs `method path?query` with plain (already-decoded, single-encoded)
/// inputs and returns headers carrying the authorization line.
fn sign(
    creds: &SigV4Credentials,
    sign_region: &str,
    method: &str,
    path: &str,
    query_pairs: &[(&str, &str)],
    host: &str,
) -> HeaderMap {
    let canonical_uri = path
        .split('/')
        .map(|seg| uri_encode(seg, true))
        .collect::<Vec<_>>()
        .join("/");

    let mut pairs: Vec<(String, String)> = query_pairs
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    pairs.sort();
    let canonical_query = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let signed_headers = "host;x-amz-date";
    let canonical_headers = format!("host:{host}\nx-amz-date:{AMZ_DATE}\n");
    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\nUNSIGNED-PAYLOAD"
    );

    let scope = format!("{DATE_STAMP}/{sign_region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{AMZ_DATE}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(
        format!("AWS4{}", creds.secret_access_key).as_bytes(),
        DATE_STAMP.as_bytes(),
    );
    let k_region = hmac(&k_date, sign_region.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    let mut headers = HeaderMap::new();
    headers.insert("host", host.parse().unwrap());
    headers.insert("x-amz-date", AMZ_DATE.parse().unwrap());
    headers.insert(
        "authorization",
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, \
             Signature={signature}",
            creds.access_key_id
        )
        .parse()
        .unwrap(),
    );
    headers
}

fn raw_query(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k, true), uri_encode(v, true)))
        .collect::<Vec<_>>()
        .join("&")
}

#[test]
fn valid_request_verifies() {
    let creds = creds();
    let pairs = [("list-type", "2"), ("prefix", "docs/")];
    let headers = sign(&creds, "eu-west-1", "GET", "/bucket/key.txt", &pairs, "s3.test");

    assert_eq!(
        verify_request(
            &creds,
            "GET",
            "/bucket/key.txt",
            &raw_query(&pairs),
            &headers,
            NOW
        ),
        Ok(())
    );
}

#[test]
fn unordered_query_still_verifies() {
    // The validator sorts; the order on the wire must not matter.
    let creds = creds();
    let pairs = [("b", "2"), ("a", "1")];
    let headers = sign(&creds, "eu-west-1", "GET", "/k", &pairs, "s3.test");

    assert_eq!(
        verify_request(&creds, "GET", "/k", "b=2&a=1", &headers, NOW),
        Ok(())
    );
}

#[test]
fn tampered_query_parameter_fails() {
    let creds = creds();
    let pairs = [("prefix", "docs/")];
    let headers = sign(&creds, "eu-west-1", "GET", "/bucket", &pairs, "s3.test");

    assert_eq!(
        verify_request(&creds, "GET", "/bucket", "prefix=evil%2F", &headers, NOW),
        Err(SigV4Error::SignatureDoesNotMatch)
    );
}

#[test]
fn tampered_path_fails() {
    let creds = creds();
    let headers = sign(&creds, "eu-west-1", "GET", "/bucket/a.txt", &[], "s3.test");

    assert_eq!(
        verify_request(&creds, "GET", "/bucket/b.txt", "", &headers, NOW),
        Err(SigV4Error::SignatureDoesNotMatch)
    );
}

#[test]
fn region_mismatch_is_a_scope_error_not_a_signature_error() {
    let creds = creds();
    let headers = sign(&creds, "us-east-1", "GET", "/k", &[], "s3.test");

    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, NOW),
        Err(SigV4Error::AuthorizationHeaderMalformed)
    );
}

#[test]
fn unknown_access_key_is_rejected() {
    let mut other = creds();
    other.access_key_id = "AKIDOTHER".to_owned();
    let headers = sign(&other, "eu-west-1", "GET", "/k", &[], "s3.test");

    assert_eq!(
        verify_request(&creds(), "GET", "/k", "", &headers, NOW),
        Err(SigV4Error::InvalidAccessKeyId)
    );
}

#[test]
fn missing_authorization_is_missing_security_header() {
    let mut headers = HeaderMap::new();
    headers.insert("host", "s3.test".parse().unwrap());
    headers.insert("x-amz-date", AMZ_DATE.parse().unwrap());

    assert_eq!(
        verify_request(&creds(), "GET", "/k", "", &headers, NOW),
        Err(SigV4Error::MissingSecurityHeader)
    );
}

#[test]
fn skewed_clock_is_rejected() {
    let creds = creds();
    let headers = sign(&creds, "eu-west-1", "GET", "/k", &[], "s3.test");

    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, NOW + 15 * 60 + 1),
        Err(SigV4Error::RequestTimeTooSkewed)
    );
    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, NOW - 15 * 60 - 1),
        Err(SigV4Error::RequestTimeTooSkewed)
    );
    // Inside the window both directions.
    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, NOW + 14 * 60),
        Ok(())
    );
}

#[test]
fn date_stamp_must_match_credential_scope() {
    let creds = creds();
    let mut headers = sign(&creds, "eu-west-1", "GET", "/k", &[], "s3.test");
    headers.insert("x-amz-date", "20260116T120000Z".parse().unwrap());

    // Timestamp is within skew of NOW+1day check? Use a now close to the new
    // date so only the scope disagreement trips.
    let next_day_noon = NOW + 86_400;
    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, next_day_noon),
        Err(SigV4Error::AuthorizationHeaderMalformed)
    );
}

#[test]
fn unsigned_host_is_rejected() {
    let creds = creds();
    let mut headers = sign(&creds, "eu-west-1", "GET", "/k", &[], "s3.test");
    let auth = headers["authorization"].to_str().unwrap().to_owned();
    headers.insert(
        "authorization",
        auth.replace("SignedHeaders=host;x-amz-date", "SignedHeaders=x-amz-date")
            .parse()
            .unwrap(),
    );

    assert_eq!(
        verify_request(&creds, "GET", "/k", "", &headers, NOW),
        Err(SigV4Error::AuthorizationHeaderMalformed)
    );
}

#[test]
fn date_header_fallback_verifies() {
    // Sign with x-amz-date, then move the timestamp into a Date header; the
    // signed header list must then reference date instead.
    let creds = creds();
    let host = "s3.test";

    let signed_headers = "date;host";
    let http_date = "Thu, 15 Jan 2026 12:00:00 GMT";
    let canonical_headers = format!("date:{http_date}\nhost:{host}\n");
    let canonical_request =
        format!("GET\n/k\n\n{canonical_headers}\n{signed_headers}\nUNSIGNED-PAYLOAD");

    let scope = format!("{DATE_STAMP}/eu-west-1/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{AMZ_DATE}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let k_date = hmac(
        format!("AWS4{}", creds.secret_access_key).as_bytes(),
        DATE_STAMP.as_bytes(),
    );
    let k_region = hmac(&k_date, b"eu-west-1");
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    let mut headers = HeaderMap::new();
    headers.insert("host", host.parse().unwrap());
    headers.insert("date", http_date.parse().unwrap());
    headers.insert(
        "authorization",
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, \
             Signature={signature}",
            creds.access_key_id
        )
        .parse()
        .unwrap(),
    );

    assert_eq!(verify_request(&creds, "GET", "/k", "", &headers, NOW), Ok(()));
}

#[test]
fn signed_payload_hash_is_honored() {
    // A request that signs a concrete payload hash must present the same
    // x-amz-content-sha256 on the wire.
    let creds = creds();
    let host = "s3.test";
    let payload_hash = hex::encode(Sha256::digest(b"body-bytes"));

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_headers = format!(
        "host:{host}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{AMZ_DATE}\n"
    );
    let canonical_request =
        format!("PUT\n/k\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let scope = format!("{DATE_STAMP}/eu-west-1/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{AMZ_DATE}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );
    let k_date = hmac(
        format!("AWS4{}", creds.secret_access_key).as_bytes(),
        DATE_STAMP.as_bytes(),
    );
    let k_region = hmac(&k_date, b"eu-west-1");
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    let mut headers = HeaderMap::new();
    headers.insert("host", host.parse().unwrap());
    headers.insert("x-amz-date", AMZ_DATE.parse().unwrap());
    headers.insert("x-amz-content-sha256", payload_hash.parse().unwrap());
    headers.insert(
        "authorization",
        format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, \
             Signature={signature}",
            creds.access_key_id
        )
        .parse()
        .unwrap(),
    );

    assert_eq!(verify_request(&creds, "PUT", "/k", "", &headers, NOW), Ok(()));

    // Tampering with the advertised hash breaks the signature.
    headers.insert(
        "x-amz-content-sha256",
        hex::encode(Sha256::digest(b"other")).parse().unwrap(),
    );
    assert_eq!(
        verify_request(&creds, "PUT", "/k", "", &headers, NOW),
        Err(SigV4Error::SignatureDoesNotMatch)
    );
}
