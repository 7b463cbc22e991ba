//! AWS Signature Version 4 request signing

use crate::config::Credentials;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Payload hash sent for streamed bodies
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const SERVICE: &str = "s3";

/// The parts of a request that go into the canonical request
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    /// Already URI-encoded path
    pub uri: &'a str,
    /// Already sorted and encoded query string
    pub query: &'a str,
    /// Lower-case header names to values; every entry is signed
    pub headers: &'a BTreeMap<String, String>,
    pub payload_hash: &'a str,
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn amz_date(date: DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

fn scope(date: DateTime<Utc>, region: &str) -> String {
    format!("{}/{}/{}/aws4_request", date.format("%Y%m%d"), region, SERVICE)
}

fn signing_key(secret_key: &str, date: DateTime<Utc>, region: &str) -> Vec<u8> {
    let date_key = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date.format("%Y%m%d").to_string().as_bytes(),
    );
    let region_key = hmac_sha256(&date_key, region.as_bytes());
    let service_key = hmac_sha256(&region_key, SERVICE.as_bytes());
    hmac_sha256(&service_key, b"aws4_request")
}

/// Compute the `Authorization` header value for a request
pub fn authorization(
    credentials: &Credentials,
    region: &str,
    date: DateTime<Utc>,
    request: &CanonicalRequest<'_>,
) -> String {
    let signed_headers = request
        .headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = request
        .headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        request.uri,
        request.query,
        canonical_headers,
        signed_headers,
        request.payload_hash
    );

    let scope = scope(date, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date(date),
        scope,
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(&credentials.secret_access_key, date, region);
    let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, scope, signed_headers, signature
    )
}

/// Percent-encode per the SigV4 rules; `/` is kept when `encode_slash` is false
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Sorted, encoded query string
pub fn canonical_query(params: &[(&str, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k, true), uri_encode(v, true)))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}
