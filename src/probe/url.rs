//! HTTP/HTTPS GET probe.
//!
//! TLS certificate verification is disabled: the probe checks that the
//! service answers, not that its certificate chain is trustworthy.

use std::time::Duration;

use crate::error::ProbeError;

const USER_AGENT: &str = "Argus/1.0 (Network Monitor)";

pub fn run(url: &str, proxy: Option<&str>, timeout_ms: u64) -> Result<(), ProbeError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ProbeError::InvalidConfig(format!(
            "invalid URL format: {url}"
        )));
    }

    let timeout = Duration::from_millis(timeout_ms);
    let mut builder = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(true)
        .connect_timeout(timeout)
        .timeout(timeout);

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| ProbeError::InvalidConfig(format!("invalid proxy: {e}")))?;
        builder = builder.proxy(proxy);
    }

    let client = builder
        .build()
        .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "*/*")
        .header(reqwest::header::CONNECTION, "close")
        .send()
        .map_err(|e| {
            let msg = e.to_string();
            if e.is_timeout() {
                ProbeError::TimeoutExceeded
            } else if msg.contains("SSL") || msg.contains("TLS") || msg.contains("certificate") {
                ProbeError::SslFailure(msg)
            } else if e.is_connect() {
                ProbeError::ConnectionFailed(msg)
            } else {
                ProbeError::SendFailed(msg)
            }
        })?;

    let status = response.status().as_u16();
    if (200..300).contains(&status) {
        Ok(())
    } else {
        Err(ProbeError::HttpStatus(status))
    }
}
