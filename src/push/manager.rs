//! Push subscription set, suppressions, delivery, and persistence.
//!
//! Subscriptions are unique by endpoint. Suppressions mute notifications
//! for a test id until a wall-clock instant. Both sets are persisted as
//! JSON after every mutation; persistence failures are logged and never
//! abort the in-memory change.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{encryption, vapid, PushSubscription};
use crate::config::PushConfig;
use crate::error::PushError;

/// Wall-clock format for suppression expiry stamps.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MESSAGE_TTL_SECS: &str = "86400";

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubscriptionStore {
    subscriptions: Vec<PushSubscription>,
}

/// Owns the subscription vector and suppression map behind separate locks
/// and performs Web Push delivery.
pub struct PushManager {
    config: PushConfig,
    enabled: bool,
    /// Built on first delivery, which always happens on an engine worker
    /// thread (a blocking client must never be created in async context).
    client: OnceLock<Option<reqwest::blocking::Client>>,
    subscriptions: Mutex<Vec<PushSubscription>>,
    suppressions: Mutex<BTreeMap<String, String>>,
}

impl PushManager {
    pub fn new(config: PushConfig) -> Self {
        let mut enabled = config.enabled;

        if enabled {
            if let Err(e) = config.validate() {
                tracing::error!("invalid push notification configuration: {e}");
                enabled = false;
            } else {
                tracing::info!(
                    "push notification manager initialized (VAPID subject: {})",
                    config.vapid_subject
                );
            }
        } else {
            tracing::info!("push notifications are disabled");
        }

        Self {
            config,
            enabled,
            client: OnceLock::new(),
            subscriptions: Mutex::new(Vec::new()),
            suppressions: Mutex::new(BTreeMap::new()),
        }
    }

    fn client(&self) -> Option<&reqwest::blocking::Client> {
        self.client
            .get_or_init(|| {
                reqwest::blocking::Client::builder()
                    .timeout(DELIVERY_TIMEOUT)
                    .connect_timeout(DELIVERY_TIMEOUT)
                    .build()
                    .map_err(|e| tracing::error!("failed to build push HTTP client: {e}"))
                    .ok()
            })
            .as_ref()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn vapid_public_key(&self) -> &str {
        &self.config.vapid_public_key
    }

    /// Load persisted subscriptions and suppressions, if the files exist.
    pub fn load(&self) {
        match std::fs::read_to_string(&self.config.subscriptions_file) {
            Ok(raw) => match serde_json::from_str::<SubscriptionStore>(&raw) {
                Ok(store) => {
                    let mut subscriptions = self.subscriptions.lock().unwrap();
                    *subscriptions = store.subscriptions;
                    tracing::info!(
                        "loaded {} push subscriptions from {}",
                        subscriptions.len(),
                        self.config.subscriptions_file
                    );
                }
                Err(e) => tracing::error!("failed to parse subscriptions file: {e}"),
            },
            Err(_) => tracing::debug!(
                "no subscription file found: {}",
                self.config.subscriptions_file
            ),
        }

        match std::fs::read_to_string(&self.config.suppressions_file) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(map) => {
                    let mut suppressions = self.suppressions.lock().unwrap();
                    *suppressions = map;
                    tracing::info!(
                        "loaded {} suppressions from {}",
                        suppressions.len(),
                        self.config.suppressions_file
                    );
                }
                Err(e) => tracing::error!("failed to parse suppressions file: {e}"),
            },
            Err(_) => tracing::debug!(
                "no suppressions file found: {}",
                self.config.suppressions_file
            ),
        }
    }

    /// Add or update a subscription (unique by endpoint). Persists.
    pub fn add_subscription(&self, subscription: PushSubscription) -> bool {
        if !self.enabled {
            return false;
        }

        {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            if let Some(existing) = subscriptions
                .iter_mut()
                .find(|s| s.endpoint == subscription.endpoint)
            {
                tracing::debug!("subscription already exists, updating: {}", subscription.endpoint);
                *existing = subscription;
            } else {
                tracing::info!(
                    "adding new push subscription: {}...",
                    truncate(&subscription.endpoint, 50)
                );
                subscriptions.push(subscription);
            }
        }
        self.save_subscriptions();
        true
    }

    /// Remove a subscription by endpoint. Persists when something changed.
    pub fn remove_subscription(&self, endpoint: &str) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            let before = subscriptions.len();
            subscriptions.retain(|s| s.endpoint != endpoint);
            subscriptions.len() != before
        };
        if removed {
            tracing::info!("removed push subscription: {}...", truncate(endpoint, 50));
            self.save_subscriptions();
        }
        removed
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Mute notifications for `test_id` until the given local wall-clock
    /// time (`YYYY-MM-DD HH:MM:SS`). Rejects unparseable stamps.
    pub fn add_suppression(&self, test_id: &str, until: &str) -> bool {
        if NaiveDateTime::parse_from_str(until, TIME_FORMAT).is_err() {
            tracing::warn!("rejecting suppression with invalid timestamp: {until}");
            return false;
        }
        self.suppressions
            .lock()
            .unwrap()
            .insert(test_id.to_string(), until.to_string());
        self.save_suppressions();
        true
    }

    pub fn remove_suppression(&self, test_id: &str) -> bool {
        let removed = self.suppressions.lock().unwrap().remove(test_id).is_some();
        if removed {
            self.save_suppressions();
        }
        removed
    }

    pub fn list_suppressions(&self) -> BTreeMap<String, String> {
        self.suppressions.lock().unwrap().clone()
    }

    /// A suppression is active iff its expiry is strictly in the future.
    pub fn is_suppressed(&self, test_id: &str) -> bool {
        let suppressions = self.suppressions.lock().unwrap();
        let Some(until) = suppressions.get(test_id) else {
            return false;
        };
        match NaiveDateTime::parse_from_str(until, TIME_FORMAT) {
            Ok(until) => until > Local::now().naive_local(),
            Err(_) => false,
        }
    }

    /// Deliver a notification for a status transition of `test_id` to all
    /// subscribers, unless the test is suppressed. Expired subscriptions
    /// (404/410 from the push service) are removed and the change is
    /// persisted immediately. Returns true iff at least one delivery
    /// succeeded.
    pub fn notify_for_test(
        &self,
        test_id: &str,
        title: &str,
        body: &str,
        icon: &str,
        data: serde_json::Value,
    ) -> bool {
        if !self.enabled {
            tracing::debug!("push notifications disabled, skipping notification: {title}");
            return false;
        }
        if self.is_suppressed(test_id) {
            tracing::info!("notifications suppressed for {test_id}, skipping: {title}");
            return false;
        }

        let subscriptions = self.subscriptions.lock().unwrap().clone();
        if subscriptions.is_empty() {
            tracing::debug!("no push subscriptions available");
            return false;
        }

        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "icon": if icon.is_empty() { "/icons/icon-192x192.png" } else { icon },
            "data": data,
            "tag": "argus-notification",
            "requireInteraction": true,
        });
        let payload_bytes = payload.to_string().into_bytes();

        tracing::info!(
            "sending push notification to {} subscribers: {title}",
            subscriptions.len()
        );

        let mut any_success = false;
        let mut expired: Vec<String> = Vec::new();

        for subscription in &subscriptions {
            match self.send_web_push(subscription, &payload_bytes) {
                Ok(()) => any_success = true,
                Err(PushError::SubscriptionExpired(status)) => {
                    tracing::warn!(
                        "push subscription expired or invalid (status {status}): {}...",
                        truncate(&subscription.endpoint, 50)
                    );
                    expired.push(subscription.endpoint.clone());
                }
                Err(e) => {
                    tracing::error!(
                        "push delivery failed for {}...: {e}",
                        truncate(&subscription.endpoint, 50)
                    );
                }
            }
        }

        if !expired.is_empty() {
            {
                let mut subscriptions = self.subscriptions.lock().unwrap();
                subscriptions.retain(|s| !expired.contains(&s.endpoint));
            }
            tracing::warn!("removed {} expired subscriptions", expired.len());
            self.save_subscriptions();
        }

        any_success
    }

    fn send_web_push(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), PushError> {
        let client = self
            .client()
            .ok_or_else(|| PushError::DeliveryFailed("no HTTP client".into()))?;

        let encrypted = encryption::encrypt(payload, subscription)?;
        let body = encryption::build_request_body(&encrypted);

        let audience = vapid::extract_audience(&subscription.endpoint)?;
        let jwt = vapid::build(
            &audience,
            &self.config.vapid_subject,
            &self.config.vapid_private_key,
            vapid::DEFAULT_LIFETIME_SECS,
        )?;

        tracing::debug!(
            "sending Web Push to {}... ({} bytes)",
            truncate(&subscription.endpoint, 80),
            body.len()
        );

        let response = client
            .post(&subscription.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_ENCODING, "aes128gcm")
            .header("TTL", MESSAGE_TTL_SECS)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("vapid t={jwt}, k={}", self.config.vapid_public_key),
            )
            .body(body)
            .send()
            .map_err(|e| PushError::DeliveryFailed(e.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                tracing::debug!("push notification sent successfully (status {status})");
                Ok(())
            }
            404 | 410 => Err(PushError::SubscriptionExpired(status)),
            _ => Err(PushError::DeliveryFailed(format!(
                "push service returned status {status}"
            ))),
        }
    }

    /// Persist both files; used on shutdown.
    pub fn save_all(&self) {
        self.save_subscriptions();
        self.save_suppressions();
    }

    fn save_subscriptions(&self) {
        let store = SubscriptionStore {
            subscriptions: self.subscriptions.lock().unwrap().clone(),
        };
        if let Err(e) = write_json_atomically(&self.config.subscriptions_file, &store) {
            tracing::error!(
                "failed to save subscriptions to {}: {e}",
                self.config.subscriptions_file
            );
        }
    }

    fn save_suppressions(&self) {
        let map = self.suppressions.lock().unwrap().clone();
        if let Err(e) = write_json_atomically(&self.config.suppressions_file, &map) {
            tracing::error!(
                "failed to save suppressions to {}: {e}",
                self.config.suppressions_file
            );
        }
    }
}

/// Write via a temp file and rename so readers never see a partial file.
fn write_json_atomically<T: Serialize>(path: &str, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = format!("{path}.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, Path::new(path))?;
    Ok(())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::{crypto, SubscriptionKeys};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn enabled_config(dir: &Path) -> PushConfig {
        let vapid = crypto::ecdh_generate();
        PushConfig {
            enabled: true,
            vapid_subject: "mailto:ops@example.com".into(),
            vapid_public_key: crypto::b64url_encode(vapid.public),
            vapid_private_key: crypto::b64url_encode(vapid.secret),
            subscriptions_file: dir.join("subs.json").to_str().unwrap().to_string(),
            suppressions_file: dir.join("supp.json").to_str().unwrap().to_string(),
        }
    }

    fn subscription(endpoint: &str) -> PushSubscription {
        let keys = crypto::ecdh_generate();
        PushSubscription {
            endpoint: endpoint.into(),
            keys: SubscriptionKeys {
                p256dh: crypto::b64url_encode(keys.public),
                auth: crypto::b64url_encode([3u8; 16]),
            },
        }
    }

    /// Minimal push-service stub answering every request with one status.
    fn spawn_push_service(status_line: &'static str, hits: Arc<AtomicUsize>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let response =
                    format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes());
            }
        });
        port
    }

    #[test]
    fn test_disabled_manager_is_inert() {
        let manager = PushManager::new(PushConfig::default());
        assert!(!manager.enabled());
        assert!(!manager.add_subscription(subscription("https://push.example.net/a")));
        assert!(!manager.notify_for_test("1_g_1_d", "t", "b", "", serde_json::Value::Null));
    }

    #[test]
    fn test_add_subscription_overwrites_by_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PushManager::new(enabled_config(dir.path()));

        let first = subscription("https://push.example.net/same");
        let second = subscription("https://push.example.net/same");
        assert!(manager.add_subscription(first));
        assert!(manager.add_subscription(second.clone()));
        assert_eq!(manager.subscription_count(), 1);

        // The newer key material won.
        let stored = manager.subscriptions.lock().unwrap()[0].clone();
        assert_eq!(stored.keys, second.keys);
    }

    #[test]
    fn test_subscription_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = enabled_config(dir.path());
        let sub = subscription("https://push.example.net/persisted");

        {
            let manager = PushManager::new(config.clone());
            manager.add_subscription(sub.clone());
        }

        let raw = std::fs::read_to_string(&config.subscriptions_file).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["subscriptions"][0]["endpoint"], sub.endpoint);
        assert_eq!(parsed["subscriptions"][0]["keys"]["p256dh"], sub.keys.p256dh);

        let manager = PushManager::new(config);
        manager.load();
        assert_eq!(manager.subscription_count(), 1);
    }

    #[test]
    fn test_suppression_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PushManager::new(enabled_config(dir.path()));

        assert!(manager.add_suppression("1_g_1_d", "2099-01-01 00:00:00"));
        assert!(manager.is_suppressed("1_g_1_d"));
        assert!(!manager.is_suppressed("other"));

        // Past expiry means inactive, even while still listed.
        assert!(manager.add_suppression("2_g_2_d", "2000-01-01 00:00:00"));
        assert!(!manager.is_suppressed("2_g_2_d"));
        assert_eq!(manager.list_suppressions().len(), 2);

        assert!(manager.remove_suppression("1_g_1_d"));
        assert!(!manager.is_suppressed("1_g_1_d"));
        assert!(!manager.remove_suppression("1_g_1_d"));
    }

    #[test]
    fn test_suppression_rejects_invalid_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PushManager::new(enabled_config(dir.path()));
        assert!(!manager.add_suppression("1_g_1_d", "tomorrow-ish"));
        assert!(manager.list_suppressions().is_empty());
    }

    #[test]
    fn test_suppression_persistence_format() {
        let dir = tempfile::tempdir().unwrap();
        let config = enabled_config(dir.path());
        let manager = PushManager::new(config.clone());
        manager.add_suppression("1_g_1_d", "2099-01-01 00:00:00");

        let raw = std::fs::read_to_string(&config.suppressions_file).unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["1_g_1_d"], "2099-01-01 00:00:00");
    }

    #[test]
    fn test_suppressed_test_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PushManager::new(enabled_config(dir.path()));

        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_push_service("HTTP/1.1 201 Created", hits.clone());
        manager.add_subscription(subscription(&format!("http://127.0.0.1:{port}/send/s")));

        manager.add_suppression("1_g_1_d", "2099-01-01 00:00:00");
        assert!(!manager.notify_for_test(
            "1_g_1_d",
            "title",
            "body",
            "",
            serde_json::Value::Null
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // After the mute is lifted the same transition delivers.
        manager.remove_suppression("1_g_1_d");
        assert!(manager.notify_for_test(
            "1_g_1_d",
            "title",
            "body",
            "",
            serde_json::Value::Null
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expired_subscription_is_removed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = enabled_config(dir.path());
        let manager = PushManager::new(config.clone());

        let gone_hits = Arc::new(AtomicUsize::new(0));
        let ok_hits = Arc::new(AtomicUsize::new(0));
        let gone_port = spawn_push_service("HTTP/1.1 410 Gone", gone_hits.clone());
        let ok_port = spawn_push_service("HTTP/1.1 201 Created", ok_hits.clone());

        let gone_endpoint = format!("http://127.0.0.1:{gone_port}/send/a");
        let ok_endpoint = format!("http://127.0.0.1:{ok_port}/send/b");
        manager.add_subscription(subscription(&gone_endpoint));
        manager.add_subscription(subscription(&ok_endpoint));

        assert!(manager.notify_for_test("1_g_1_d", "t", "b", "", serde_json::Value::Null));
        assert_eq!(gone_hits.load(Ordering::SeqCst), 1);
        assert_eq!(ok_hits.load(Ordering::SeqCst), 1);

        assert_eq!(manager.subscription_count(), 1);
        let raw = std::fs::read_to_string(&config.subscriptions_file).unwrap();
        let store: SubscriptionStore = serde_json::from_str(&raw).unwrap();
        assert_eq!(store.subscriptions.len(), 1);
        assert_eq!(store.subscriptions[0].endpoint, ok_endpoint);
    }

    #[test]
    fn test_other_errors_keep_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PushManager::new(enabled_config(dir.path()));

        let hits = Arc::new(AtomicUsize::new(0));
        let port = spawn_push_service("HTTP/1.1 500 Internal Server Error", hits.clone());
        manager.add_subscription(subscription(&format!("http://127.0.0.1:{port}/send/s")));

        assert!(!manager.notify_for_test("1_g_1_d", "t", "b", "", serde_json::Value::Null));
        assert_eq!(manager.subscription_count(), 1);
    }
}
