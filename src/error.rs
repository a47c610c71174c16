//! Error types shared across the monitoring engine and push pipeline.

use thiserror::Error;

/// Address resolution errors.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("DNS resolution failed: {0}")]
    DnsFailure(String),
    #[error("no addresses found for {0}")]
    NoAddressesFound(String),
    #[error("unsupported address family")]
    UnsupportedFamily,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("resolution timed out")]
    Timeout,
    #[error("invalid hostname: {0}")]
    InvalidHostname(String),
}

/// Probe execution errors. These are never fatal; they are folded into a
/// failed `ProbeOutcome` and feed the state machine.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("timeout exceeded")]
    TimeoutExceeded,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("TLS failure: {0}")]
    SslFailure(String),
    #[error("command exited with code {0}")]
    CommandFailed(i32),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Scheduler and worker pool errors.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("submit on stopped worker pool")]
    SubmitOnStoppedPool,
    #[error("task {0} abandoned after retries")]
    RetryAbandoned(u64),
}

/// Crypto primitive errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("key derivation failed")]
    KdfFailure,
    #[error("encryption failed")]
    EncryptFailure,
    #[error("signature failure: {0}")]
    SignatureFailure(String),
    #[error("invalid base64url input")]
    InvalidEncoding,
}

/// Web Push delivery errors, per subscription.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("subscription expired (status {0})")]
    SubscriptionExpired(u16),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Configuration errors. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
