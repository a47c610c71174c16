//! Configuration model for Argus.
//!
//! Loaded from a JSON file at startup and validated before the engine sees
//! it. Groups and destinations are sorted by their `sort` keys at load time
//! so downstream consumers can rely on the order.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Transport protocol for connect tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// One probe definition. The `method` tag selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum TestConfig {
    Ping {
        host: String,
    },
    Connect {
        host: String,
        port: u16,
        protocol: Protocol,
    },
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proxy: Option<String>,
    },
    Cmd {
        command: String,
        #[serde(default)]
        expected_exit_code: i32,
    },
}

impl TestConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            TestConfig::Ping { host } => {
                if host.is_empty() {
                    return Err(ConfigError::Invalid("ping test requires a host".into()));
                }
            }
            TestConfig::Connect { host, port, .. } => {
                if host.is_empty() {
                    return Err(ConfigError::Invalid("connect test requires a host".into()));
                }
                if *port == 0 {
                    return Err(ConfigError::Invalid(
                        "connect test requires a valid port (1-65535)".into(),
                    ));
                }
            }
            TestConfig::Url { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::Invalid(format!("invalid URL format: {url}")));
                }
            }
            TestConfig::Cmd { command, .. } => {
                if command.is_empty() {
                    return Err(ConfigError::Invalid("cmd test requires a command".into()));
                }
            }
        }
        Ok(())
    }

    /// Host shown in the status view. Only ping and connect tests carry one.
    pub fn host(&self) -> Option<&str> {
        match self {
            TestConfig::Ping { host } | TestConfig::Connect { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Human-readable description used as the monitor's `details` field.
    pub fn description(&self) -> String {
        match self {
            TestConfig::Ping { host } => format!("PING {host}"),
            TestConfig::Connect {
                host,
                port,
                protocol,
            } => format!("CONNECT {protocol} {host}:{port}"),
            TestConfig::Url { url, proxy } => {
                if proxy.is_some() {
                    format!("URL: {url} (via proxy)")
                } else {
                    format!("URL: {url}")
                }
            }
            TestConfig::Cmd {
                command,
                expected_exit_code,
            } => format!("Cmd: {command} (expect={expected_exit_code})"),
        }
    }
}

/// A single monitored destination. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub sort: i64,
    pub name: String,
    /// Probe timeout in milliseconds.
    pub timeout: u64,
    /// Consecutive failures before WARNING.
    pub warning: u32,
    /// Consecutive failures before FAILURE.
    pub failure: u32,
    /// Consecutive successes before recovery to OK.
    pub reset: u32,
    /// Probe interval in seconds.
    pub interval: u64,
    /// Rolling history length (capped at 1000 by the engine).
    pub history: usize,
    pub test: TestConfig,
}

impl Destination {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("destination requires a name".into()));
        }
        for (field, value) in [
            ("timeout", self.timeout),
            ("warning", self.warning as u64),
            ("failure", self.failure as u64),
            ("reset", self.reset as u64),
            ("interval", self.interval),
            ("history", self.history as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "destination {}: {} must be greater than zero",
                    self.name, field
                )));
            }
        }
        if self.warning > self.failure {
            tracing::warn!(
                "destination {}: warning threshold {} exceeds failure threshold {}; \
                 failure takes precedence",
                self.name,
                self.warning,
                self.failure
            );
        }
        self.test.validate()
    }
}

/// A named group of destinations, rendered in `sort` order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub sort: i64,
    #[serde(rename = "group")]
    pub name: String,
    pub destinations: Vec<Destination>,
}

/// Web Push configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub vapid_subject: String,
    pub vapid_public_key: String,
    pub vapid_private_key: String,
    pub subscriptions_file: String,
    pub suppressions_file: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vapid_subject: String::new(),
            vapid_public_key: String::new(),
            vapid_private_key: String::new(),
            subscriptions_file: "subscriptions.json".to_string(),
            suppressions_file: "suppressions.json".to_string(),
        }
    }
}

impl PushConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Ok(());
        }
        if self.vapid_subject.is_empty()
            || self.vapid_public_key.is_empty()
            || self.vapid_private_key.is_empty()
        {
            return Err(ConfigError::Invalid(
                "push is enabled but VAPID subject or keys are missing".into(),
            ));
        }
        if !self.vapid_subject.starts_with("mailto:") && !self.vapid_subject.starts_with("https://")
        {
            return Err(ConfigError::Invalid(
                "vapid_subject must start with 'mailto:' or 'https://'".into(),
            ));
        }
        Ok(())
    }
}

fn default_base_url() -> String {
    "/argus".to_string()
}

fn default_cache_duration() -> u64 {
    30
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub name: String,
    /// Listen address: `host:port`, `[v6]:port`, or a bare port.
    pub listen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_cache_duration")]
    pub cache_duration_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Log every Nth consecutive failure (0 = always log).
    #[serde(default)]
    pub log_status_every_n: u32,
    /// Worker pool size (0 = auto).
    #[serde(default)]
    pub thread_pool_size: usize,
    pub monitors: Vec<Group>,
    #[serde(default)]
    pub push: PushConfig,
}

impl MonitorConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: MonitorConfig = serde_json::from_str(&raw)?;
        config.validate()?;

        config.monitors.sort_by_key(|g| g.sort);
        for group in &mut config.monitors {
            group.destinations.sort_by_key(|d| d.sort);
        }

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".into()));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".into()));
        }
        if !self.base_url.starts_with('/') || self.base_url.len() < 2 {
            return Err(ConfigError::Invalid(
                "base_url must start with '/' and name a path".into(),
            ));
        }
        for group in &self.monitors {
            if group.name.is_empty() {
                return Err(ConfigError::Invalid("group requires a name".into()));
            }
            for dest in &group.destinations {
                dest.validate()?;
            }
        }
        self.push.validate()
    }

    /// Total number of destinations across all groups.
    pub fn monitor_count(&self) -> usize {
        self.monitors.iter().map(|g| g.destinations.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> &'static str {
        r#"{
            "name": "Test Monitor",
            "listen": "127.0.0.1:8080",
            "monitors": [
                {
                    "sort": 2,
                    "group": "External",
                    "destinations": [
                        {
                            "sort": 1, "name": "Gateway",
                            "timeout": 1000, "warning": 2, "failure": 3,
                            "reset": 2, "interval": 30, "history": 50,
                            "test": {"method": "ping", "host": "192.0.2.1"}
                        }
                    ]
                },
                {
                    "sort": 1,
                    "group": "Internal",
                    "destinations": [
                        {
                            "sort": 2, "name": "Web",
                            "timeout": 2000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "url", "url": "https://example.com/health"}
                        },
                        {
                            "sort": 1, "name": "SSH",
                            "timeout": 1000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "connect", "host": "example.com", "port": 22, "protocol": "tcp"}
                        }
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn test_load_sorts_groups_and_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_config()).unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.name, "Test Monitor");
        assert_eq!(config.monitors[0].name, "Internal");
        assert_eq!(config.monitors[1].name, "External");
        assert_eq!(config.monitors[0].destinations[0].name, "SSH");
        assert_eq!(config.monitors[0].destinations[1].name, "Web");
        assert_eq!(config.monitor_count(), 3);
    }

    #[test]
    fn test_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, sample_config()).unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert_eq!(config.base_url, "/argus");
        assert_eq!(config.cache_duration_seconds, 30);
        assert_eq!(config.thread_pool_size, 0);
        assert!(!config.push.enabled);
    }

    #[test]
    fn test_test_config_parsing() {
        let test: TestConfig =
            serde_json::from_str(r#"{"method": "cmd", "command": "true"}"#).unwrap();
        match test {
            TestConfig::Cmd {
                command,
                expected_exit_code,
            } => {
                assert_eq!(command, "true");
                assert_eq!(expected_exit_code, 0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        let test: Result<TestConfig, _> =
            serde_json::from_str(r#"{"method": "telnet", "host": "example.com"}"#);
        assert!(test.is_err());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut config: MonitorConfig = serde_json::from_str(sample_config()).unwrap();
        config.monitors[0].destinations[0].failure = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_connect_requires_port() {
        let test: TestConfig = serde_json::from_str(
            r#"{"method": "connect", "host": "example.com", "port": 0, "protocol": "udp"}"#,
        )
        .unwrap();
        assert!(test.validate().is_err());
    }

    #[test]
    fn test_url_scheme_validation() {
        let test = TestConfig::Url {
            url: "ftp://example.com".into(),
            proxy: None,
        };
        assert!(test.validate().is_err());
    }

    #[test]
    fn test_push_config_invariant() {
        let push = PushConfig {
            enabled: true,
            ..PushConfig::default()
        };
        assert!(push.validate().is_err());
    }

    #[test]
    fn test_descriptions() {
        let ping = TestConfig::Ping {
            host: "example.com".into(),
        };
        assert_eq!(ping.description(), "PING example.com");

        let connect = TestConfig::Connect {
            host: "example.com".into(),
            port: 443,
            protocol: Protocol::Tcp,
        };
        assert_eq!(connect.description(), "CONNECT tcp example.com:443");
    }
}
