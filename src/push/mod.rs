//! Web Push: subscription model, crypto, VAPID, RFC 8291 encryption, and
//! the delivery/persistence manager.

pub mod crypto;
pub mod encryption;
pub mod manager;
pub mod vapid;

pub use manager::PushManager;

use serde::{Deserialize, Serialize};

/// Key material of a browser push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Base64url, uncompressed P-256 point (65 bytes decoded).
    pub p256dh: String,
    /// Base64url, 16-byte auth secret.
    pub auth: String,
}

/// A browser push subscription, unique by endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

impl PushSubscription {
    /// Check that the key material decodes to the expected sizes.
    pub fn validate(&self) -> Result<(), crate::error::PushError> {
        use crate::error::PushError;

        if self.endpoint.is_empty() || !self.endpoint.contains("://") {
            return Err(PushError::InvalidSubscription(format!(
                "invalid endpoint: {}",
                self.endpoint
            )));
        }
        let p256dh = crypto::b64url_decode(&self.keys.p256dh)
            .map_err(|_| PushError::InvalidSubscription("p256dh is not base64url".into()))?;
        if p256dh.len() != crypto::P256_PUBLIC_KEY_LEN {
            return Err(PushError::InvalidSubscription(format!(
                "p256dh decodes to {} bytes, expected 65",
                p256dh.len()
            )));
        }
        let auth = crypto::b64url_decode(&self.keys.auth)
            .map_err(|_| PushError::InvalidSubscription("auth is not base64url".into()))?;
        if auth.len() != 16 {
            return Err(PushError::InvalidSubscription(format!(
                "auth decodes to {} bytes, expected 16",
                auth.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_json_round_trip() {
        let json = r#"{
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc123",
            "keys": {"p256dh": "BPub", "auth": "c2VjcmV0"}
        }"#;
        let sub: PushSubscription = serde_json::from_str(json).unwrap();
        assert_eq!(sub.endpoint, "https://fcm.googleapis.com/fcm/send/abc123");
        assert_eq!(sub.keys.p256dh, "BPub");
        assert_eq!(sub.keys.auth, "c2VjcmV0");

        let back = serde_json::to_value(&sub).unwrap();
        assert_eq!(back["endpoint"], sub.endpoint);
        assert_eq!(back["keys"]["p256dh"], "BPub");
        assert_eq!(back["keys"]["auth"], "c2VjcmV0");
    }

    #[test]
    fn test_subscription_validation() {
        let valid = PushSubscription {
            endpoint: "https://push.example.net/x".into(),
            keys: SubscriptionKeys {
                p256dh: crypto::b64url_encode([4u8; 65]),
                auth: crypto::b64url_encode([1u8; 16]),
            },
        };
        valid.validate().unwrap();

        let bad_keys = PushSubscription {
            keys: SubscriptionKeys {
                p256dh: crypto::b64url_encode([4u8; 64]),
                ..valid.keys.clone()
            },
            ..valid.clone()
        };
        assert!(bad_keys.validate().is_err());

        let bad_endpoint = PushSubscription {
            endpoint: "not-a-url".into(),
            ..valid
        };
        assert!(bad_endpoint.validate().is_err());
    }
}
