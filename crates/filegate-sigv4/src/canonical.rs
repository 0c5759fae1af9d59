//! Canonical-request construction.

use http::HeaderMap;

/// Builds the SigV4 canonical request. Returns `None` when a signed header
/// carries a non-ASCII value the canonical form cannot represent.
pub(crate) fn canonical_request(
    method: &str,
    uri_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    signed_headers: &[String],
    payload_hash: &str,
) -> Option<String> {
    let mut header_block = String::new();
    for name in signed_headers {
        let mut values = Vec::new();
        for value in headers.get_all(name.as_str()) {
            values.push(collapse_whitespace(value.to_str().ok()?));
        }
        header_block.push_str(name);
        header_block.push(':');
        header_block.push_str(&values.join(","));
        header_block.push('\n');
    }

    Some(format!(
        "{method}\n{}\n{}\n{header_block}\n{}\n{payload_hash}",
        canonical_uri(uri_path),
        canonical_query(raw_query),
        signed_headers.join(";"),
    ))
}

/// Per-segment double-decode-then-encode normalization, matching what S3
/// clients produce for paths that arrive already percent-encoded.
fn canonical_uri(path: &str) -> String {
    if path.is_empty() {
        return "/".to_owned();
    }
    let segments: Vec<String> = path
        .split('/')
        .map(|seg| uri_encode(&percent_decode(&percent_decode(seg, false), false), false))
        .collect();
    let joined = segments.join("/");
    if joined.starts_with('/') {
        joined
    } else {
        format!("/{joined}")
    }
}

/// Sorted, deduplicated `key=value` pairs, each side decoded then re-encoded.
fn canonical_query(raw_query: &str) -> String {
    let mut pairs: Vec<(String, String)> = raw_query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                uri_encode(&percent_decode(key, true), true),
                uri_encode(&percent_decode(value, true), true),
            )
        })
        .collect();
    pairs.sort();
    pairs.dedup();

    let encoded: Vec<String> = pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();
    encoded.join("&")
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// RFC 3986 unreserved set; everything else is `%XX`-encoded (uppercase).
/// `/` is encoded only in query position.
fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
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

/// Percent-decoding that leaves malformed escapes untouched rather than
/// erroring; a literal stray `%` simply round-trips back through
/// [`uri_encode`]. `+` decodes to space only in query position.
fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(decoded) => {
                        out.push(decoded);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
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
