//! VAPID (RFC 8292) JWT construction for push-service authentication.

use serde::Serialize;

use super::crypto;
use crate::error::{CryptoError, PushError};

/// Default token lifetime: 12 hours.
pub const DEFAULT_LIFETIME_SECS: u64 = 43_200;

#[derive(Serialize)]
struct Header {
    typ: &'static str,
    alg: &'static str,
}

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: u64,
    sub: &'a str,
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build a signed ES256 JWT for the given push-service audience.
///
/// `private_key_b64url` is the VAPID key format: a base64url-encoded
/// 32-byte P-256 scalar. The subject must be a `mailto:` or `https://`
/// URI.
pub fn build(
    audience: &str,
    subject: &str,
    private_key_b64url: &str,
    lifetime_secs: u64,
) -> Result<String, CryptoError> {
    if !subject.starts_with("mailto:") && !subject.starts_with("https://") {
        return Err(CryptoError::SignatureFailure(
            "VAPID subject must start with 'mailto:' or 'https://'".into(),
        ));
    }

    let header = Header {
        typ: "JWT",
        alg: "ES256",
    };
    let claims = Claims {
        aud: audience,
        exp: unix_now() + lifetime_secs,
        sub: subject,
    };

    let header_json =
        serde_json::to_vec(&header).map_err(|e| CryptoError::SignatureFailure(e.to_string()))?;
    let claims_json =
        serde_json::to_vec(&claims).map_err(|e| CryptoError::SignatureFailure(e.to_string()))?;

    let signing_input = format!(
        "{}.{}",
        crypto::b64url_encode(header_json),
        crypto::b64url_encode(claims_json)
    );

    let signature = crypto::es256_sign(signing_input.as_bytes(), private_key_b64url)?;

    Ok(format!(
        "{signing_input}.{}",
        crypto::b64url_encode(signature)
    ))
}

/// Extract the VAPID audience from a push endpoint: scheme and host, no
/// path.
pub fn extract_audience(endpoint: &str) -> Result<String, PushError> {
    let scheme_end = endpoint
        .find("://")
        .ok_or_else(|| PushError::InvalidSubscription(format!("missing scheme: {endpoint}")))?;

    let host_start = scheme_end + 3;
    if endpoint.len() <= host_start {
        return Err(PushError::InvalidSubscription(format!(
            "missing host: {endpoint}"
        )));
    }

    match endpoint[host_start..].find('/') {
        Some(path_start) => Ok(endpoint[..host_start + path_start].to_string()),
        None => Ok(endpoint.to_string()),
    }
}
