//! HTTP request handlers: status JSON and push endpoints.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::push::manager::TIME_FORMAT;
use crate::push::PushSubscription;

// ============================================================================
// Status JSON
// ============================================================================

/// Process-wide cache for the generated status document.
pub struct StatusCache {
    ttl: Duration,
    inner: Mutex<Option<(Instant, String)>>,
}

impl StatusCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            inner: Mutex::new(None),
        }
    }

    /// Return the cached document while it is fresh, else regenerate.
    /// A zero TTL disables caching entirely.
    fn get_or_generate(&self, generate: impl FnOnce() -> String) -> String {
        if self.ttl.is_zero() {
            return generate();
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some((at, cached)) = inner.as_ref() {
            if at.elapsed() < self.ttl {
                return cached.clone();
            }
        }

        let fresh = generate();
        *inner = Some((Instant::now(), fresh.clone()));
        fresh
    }
}

#[derive(Serialize)]
struct MonitorEntry {
    id: String,
    service: String,
    host: String,
    status: String,
    response_time: String,
    response_time_ms: i64,
    uptime_percent: f64,
    last_check: String,
    details: String,
}

#[derive(Serialize)]
struct GroupStatus {
    name: String,
    monitors: Vec<MonitorEntry>,
}

#[derive(Serialize)]
struct StatusResponse {
    name: String,
    timestamp: String,
    groups: Vec<GroupStatus>,
}

/// Serialize the registry into the status document. Groups and monitors
/// come out in ascending `sort` order (the config is sorted at load).
pub fn generate_status_json(state: &AppState) -> String {
    let mut groups = Vec::with_capacity(state.config.monitors.len());

    for group in &state.config.monitors {
        let mut monitors = Vec::with_capacity(group.destinations.len());

        for dest in &group.destinations {
            let key = format!("{}:{}", group.name, dest.name);
            let Some(monitor) = state.registry.states().get(&key) else {
                continue;
            };

            let last = monitor.last();
            let (response_time, response_time_ms, last_check) = match &last {
                Some(outcome) => (
                    format!("{}ms", outcome.duration_ms),
                    outcome.duration_ms,
                    outcome.at.format(TIME_FORMAT).to_string(),
                ),
                None => ("N/A".to_string(), -1, "Never".to_string()),
            };

            monitors.push(MonitorEntry {
                id: monitor.id().to_string(),
                service: dest.name.clone(),
                host: dest.test.host().unwrap_or("N/A").to_string(),
                status: monitor.status().to_string(),
                response_time,
                response_time_ms,
                uptime_percent: monitor.uptime_percent(),
                last_check,
                details: monitor.test_description().to_string(),
            });
        }

        groups.push(GroupStatus {
            name: group.name.clone(),
            monitors,
        });
    }

    let response = StatusResponse {
        name: state.config.name.clone(),
        timestamp: Local::now().format(TIME_FORMAT).to_string(),
        groups,
    };

    serde_json::to_string_pretty(&response)
        .unwrap_or_else(|_| r#"{"error":"Error generating monitor data"}"#.to_string())
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .status_cache
        .get_or_generate(|| generate_status_json(&state));

    (
        [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
        body,
    )
}

// ============================================================================
// Config discovery
// ============================================================================

pub async fn handle_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "base_url": state.config.base_url,
        "name": state.config.name,
        "push_enabled": state.push.enabled(),
    }))
}

// ============================================================================
// Template page
// ============================================================================

pub async fn handle_template(State(state): State<AppState>) -> impl IntoResponse {
    match &state.html_page {
        Some(page) => Html(page.as_ref().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Push endpoints
// ============================================================================

fn push_disabled() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"error": "Push notifications are not enabled"})),
    )
}

pub async fn handle_vapid_public_key(State(state): State<AppState>) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    (
        [(header::CONTENT_TYPE, "text/plain; charset=UTF-8")],
        state.push.vapid_public_key().to_string(),
    )
        .into_response()
}

pub async fn handle_subscribe(State(state): State<AppState>, body: String) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    let subscription: PushSubscription = match serde_json::from_str(&body) {
        Ok(sub) => sub,
        Err(e) => {
            tracing::debug!("rejecting push subscription: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid subscription data"})),
            )
                .into_response();
        }
    };
    if let Err(e) = subscription.validate() {
        tracing::debug!("rejecting push subscription: {e}");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Invalid subscription data"})),
        )
            .into_response();
    }

    if state.push.add_subscription(subscription) {
        (
            StatusCode::CREATED,
            Json(json!({"success": true, "message": "Subscription added"})),
        )
            .into_response()
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to add subscription"})),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

pub async fn handle_unsubscribe(State(state): State<AppState>, body: String) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    let request: UnsubscribeRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid request data"})),
            )
                .into_response();
        }
    };

    if state.push.remove_subscription(&request.endpoint) {
        Json(json!({"success": true, "message": "Subscription removed"})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Subscription not found"})),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct SuppressRequest {
    test_ids: Vec<String>,
    until: String,
}

pub async fn handle_suppress(State(state): State<AppState>, body: String) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    let request: SuppressRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid request data"})),
            )
                .into_response();
        }
    };

    let suppressed = request
        .test_ids
        .iter()
        .filter(|id| state.push.add_suppression(id, &request.until))
        .count();

    tracing::info!("suppressed {suppressed} tests until {}", request.until);
    Json(json!({
        "success": true,
        "suppressed_count": suppressed,
        "until": request.until,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct UnsuppressRequest {
    test_ids: Vec<String>,
}

pub async fn handle_unsuppress(State(state): State<AppState>, body: String) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    let request: UnsuppressRequest = match serde_json::from_str(&body) {
        Ok(req) => req,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid request data"})),
            )
                .into_response();
        }
    };

    let unsuppressed = request
        .test_ids
        .iter()
        .filter(|id| state.push.remove_suppression(id))
        .count();

    tracing::info!("unsuppressed {unsuppressed} tests");
    Json(json!({
        "success": true,
        "unsuppressed_count": unsuppressed,
    }))
    .into_response()
}

pub async fn handle_suppressions(State(state): State<AppState>) -> impl IntoResponse {
    if !state.push.enabled() {
        return push_disabled().into_response();
    }

    Json(json!({"suppressions": state.push.list_suppressions()})).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MonitorConfig, PushConfig};
    use crate::monitor::MonitorRegistry;
    use crate::probe::ProbeOutcome;
    use crate::push::{crypto, PushManager};
    use crate::web::Server;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    fn sample_config(cache_ttl: u64) -> MonitorConfig {
        let json = serde_json::json!({
            "name": "Argus Test",
            "listen": "127.0.0.1:0",
            "cache_duration_seconds": cache_ttl,
            "monitors": [
                {
                    "sort": 2,
                    "group": "beta",
                    "destinations": [
                        {
                            "sort": 2, "name": "b-two",
                            "timeout": 1000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "ping", "host": "192.0.2.2"}
                        },
                        {
                            "sort": 1, "name": "b-one",
                            "timeout": 1000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "ping", "host": "192.0.2.1"}
                        }
                    ]
                },
                {
                    "sort": 1,
                    "group": "alpha",
                    "destinations": [
                        {
                            "sort": 2, "name": "a-two",
                            "timeout": 1000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "connect", "host": "192.0.2.3", "port": 22, "protocol": "tcp"}
                        },
                        {
                            "sort": 1, "name": "a-one",
                            "timeout": 1000, "warning": 1, "failure": 2,
                            "reset": 1, "interval": 60, "history": 10,
                            "test": {"method": "url", "url": "https://example.com/"}
                        }
                    ]
                }
            ]
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, serde_json::to_string(&json).unwrap()).unwrap();
        MonitorConfig::load(&path).unwrap()
    }

    fn app_state(config: MonitorConfig, push: Arc<PushManager>) -> AppState {
        let registry = MonitorRegistry::new(&config, push.clone());
        AppState {
            status_cache: Arc::new(StatusCache::new(config.cache_duration_seconds)),
            config: Arc::new(config),
            registry,
            push,
            html_page: None,
        }
    }

    fn disabled_state(cache_ttl: u64) -> AppState {
        app_state(
            sample_config(cache_ttl),
            Arc::new(PushManager::new(PushConfig::default())),
        )
    }

    fn enabled_push(dir: &std::path::Path) -> Arc<PushManager> {
        let vapid = crypto::ecdh_generate();
        Arc::new(PushManager::new(PushConfig {
            enabled: true,
            vapid_subject: "mailto:ops@example.com".into(),
            vapid_public_key: crypto::b64url_encode(vapid.public),
            vapid_private_key: crypto::b64url_encode(vapid.secret),
            subscriptions_file: dir.join("subs.json").to_str().unwrap().into(),
            suppressions_file: dir.join("supp.json").to_str().unwrap().into(),
        }))
    }

    async fn request(
        state: AppState,
        method: &str,
        uri: &str,
        body: &str,
    ) -> (StatusCode, serde_json::Value, axum::http::HeaderMap) {
        let app = Server::router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value, headers)
    }

    #[test]
    fn test_status_ordering_follows_sort_keys() {
        let state = disabled_state(0);
        let status: serde_json::Value =
            serde_json::from_str(&generate_status_json(&state)).unwrap();

        assert_eq!(status["name"], "Argus Test");
        assert_eq!(status["groups"][0]["name"], "alpha");
        assert_eq!(status["groups"][1]["name"], "beta");
        assert_eq!(status["groups"][0]["monitors"][0]["service"], "a-one");
        assert_eq!(status["groups"][0]["monitors"][1]["service"], "a-two");
        assert_eq!(status["groups"][1]["monitors"][0]["service"], "b-one");
    }

    #[test]
    fn test_status_fields_before_first_probe() {
        let state = disabled_state(0);
        let status: serde_json::Value =
            serde_json::from_str(&generate_status_json(&state)).unwrap();

        let monitor = &status["groups"][1]["monitors"][0];
        assert_eq!(monitor["id"], "2_beta_1_b-one");
        assert_eq!(monitor["status"], "PENDING");
        assert_eq!(monitor["response_time"], "N/A");
        assert_eq!(monitor["response_time_ms"], -1);
        assert_eq!(monitor["last_check"], "Never");
        assert_eq!(monitor["uptime_percent"], 0.0);
        assert_eq!(monitor["host"], "192.0.2.1");
        assert_eq!(monitor["details"], "PING 192.0.2.1");

        // URL tests have no host to show.
        assert_eq!(status["groups"][0]["monitors"][0]["host"], "N/A");
    }

    #[test]
    fn test_status_reflects_outcomes_without_cache() {
        let state = disabled_state(0);
        state.registry.states()["beta:b-one"].add_outcome(ProbeOutcome::success(12));

        let status: serde_json::Value =
            serde_json::from_str(&generate_status_json(&state)).unwrap();
        let monitor = &status["groups"][1]["monitors"][0];
        assert_eq!(monitor["status"], "OK");
        assert_eq!(monitor["response_time"], "12ms");
        assert_eq!(monitor["response_time_ms"], 12);
        assert_eq!(monitor["uptime_percent"], 100.0);
    }

    #[tokio::test]
    async fn test_zero_cache_ttl_regenerates_every_call() {
        let state = disabled_state(0);

        let (status, before, _) = request(state.clone(), "GET", "/argus/status", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(before["groups"][1]["monitors"][0]["status"], "PENDING");

        state.registry.states()["beta:b-one"].add_outcome(ProbeOutcome::success(3));
        let (_, after, _) = request(state, "GET", "/argus/status", "").await;
        assert_eq!(after["groups"][1]["monitors"][0]["status"], "OK");
    }

    #[tokio::test]
    async fn test_cache_serves_stale_within_ttl() {
        let state = disabled_state(30);

        let (_, before, _) = request(state.clone(), "GET", "/argus/status", "").await;
        assert_eq!(before["groups"][1]["monitors"][0]["status"], "PENDING");

        state.registry.states()["beta:b-one"].add_outcome(ProbeOutcome::success(3));
        let (_, after, _) = request(state, "GET", "/argus/status", "").await;
        assert_eq!(after["groups"][1]["monitors"][0]["status"], "PENDING");
    }

    #[tokio::test]
    async fn test_config_json_at_root_and_base_url() {
        let state = disabled_state(0);

        for uri in ["/config.json", "/argus/config.json"] {
            let (status, value, headers) = request(state.clone(), "GET", uri, "").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(value["base_url"], "/argus");
            assert_eq!(value["name"], "Argus Test");
            assert_eq!(value["push_enabled"], false);
            assert_eq!(headers.get("access-control-allow-origin").unwrap(), "*");
        }
    }

    #[tokio::test]
    async fn test_push_endpoints_disabled_return_503() {
        let state = disabled_state(0);
        for (method, uri) in [
            ("GET", "/argus/push/vapid_public_key"),
            ("POST", "/argus/push/subscribe"),
            ("POST", "/argus/push/unsubscribe"),
            ("POST", "/argus/push/suppress"),
            ("POST", "/argus/push/unsuppress"),
            ("GET", "/argus/push/suppressions"),
        ] {
            let (status, _, _) = request(state.clone(), method, uri, "{}").await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe_flow() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(sample_config(0), enabled_push(dir.path()));

        let keys = crypto::ecdh_generate();
        let body = serde_json::json!({
            "endpoint": "https://push.example.net/send/abc",
            "keys": {
                "p256dh": crypto::b64url_encode(keys.public),
                "auth": crypto::b64url_encode([5u8; 16]),
            }
        })
        .to_string();

        let (status, value, _) =
            request(state.clone(), "POST", "/argus/push/subscribe", &body).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(value["success"], true);
        assert_eq!(state.push.subscription_count(), 1);

        let (status, _, _) = request(
            state.clone(),
            "POST",
            "/argus/push/unsubscribe",
            r#"{"endpoint": "https://push.example.net/send/abc"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.push.subscription_count(), 0);

        let (status, _, _) = request(
            state,
            "POST",
            "/argus/push/unsubscribe",
            r#"{"endpoint": "https://push.example.net/send/abc"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(sample_config(0), enabled_push(dir.path()));

        let (status, value, _) =
            request(state.clone(), "POST", "/argus/push/subscribe", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"], "Invalid subscription data");

        // Well-formed JSON with undersized keys is rejected too.
        let body = serde_json::json!({
            "endpoint": "https://push.example.net/send/abc",
            "keys": {"p256dh": "AAAA", "auth": "AAAA"}
        })
        .to_string();
        let (status, _, _) = request(state, "POST", "/argus/push/subscribe", &body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_suppress_and_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = app_state(sample_config(0), enabled_push(dir.path()));

        let (status, value, _) = request(
            state.clone(),
            "POST",
            "/argus/push/suppress",
            r#"{"test_ids": ["1_alpha_1_a-one", "2_beta_1_b-one"], "until": "2099-01-01 00:00:00"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["suppressed_count"], 2);

        let (_, listed, _) = request(state.clone(), "GET", "/argus/push/suppressions", "").await;
        assert_eq!(
            listed["suppressions"]["1_alpha_1_a-one"],
            "2099-01-01 00:00:00"
        );

        let (status, value, _) = request(
            state.clone(),
            "POST",
            "/argus/push/unsuppress",
            r#"{"test_ids": ["1_alpha_1_a-one"]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["unsuppressed_count"], 1);

        let (_, listed, _) = request(state, "GET", "/argus/push/suppressions", "").await;
        assert!(listed["suppressions"]["1_alpha_1_a-one"].is_null());
        assert!(!listed["suppressions"]["2_beta_1_b-one"].is_null());
    }

    #[tokio::test]
    async fn test_vapid_public_key_served_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let push = enabled_push(dir.path());
        let expected = push.vapid_public_key().to_string();
        let state = app_state(sample_config(0), push);

        let app = Server::router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/argus/push/vapid_public_key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), expected);
    }
}
