//! Web server: status JSON and push endpoints under `base_url`, optional
//! HTML template page, and optional static file serving.

mod handlers;

pub use handlers::{generate_status_json, StatusCache};

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::monitor::MonitorRegistry;
use crate::push::PushManager;

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub registry: MonitorRegistry,
    pub push: Arc<PushManager>,
    pub status_cache: Arc<StatusCache>,
    pub html_page: Option<Arc<String>>,
}

/// The Argus web server.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Wire up the server state. Fails when a configured HTML template
    /// cannot be loaded.
    pub fn new(
        config: Arc<MonitorConfig>,
        registry: MonitorRegistry,
        push: Arc<PushManager>,
    ) -> Result<Self, ConfigError> {
        let html_page = match &config.html_template {
            Some(path) if !path.is_empty() => {
                let page = std::fs::read_to_string(path).map_err(|e| {
                    ConfigError::Invalid(format!("cannot load HTML template {path}: {e}"))
                })?;
                if page.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "HTML template file is empty: {path}"
                    )));
                }
                tracing::info!("loaded HTML template: {path} ({} bytes)", page.len());
                Some(Arc::new(page))
            }
            _ => None,
        };

        let state = AppState {
            status_cache: Arc::new(StatusCache::new(config.cache_duration_seconds)),
            config,
            registry,
            push,
            html_page,
        };

        Ok(Self { state })
    }

    /// Build the router for the given state. Exposed separately so tests
    /// can drive it without binding a socket.
    pub fn router(state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let mut api = Router::new()
            .route("/status", get(handlers::handle_status))
            .route("/config.json", get(handlers::handle_config))
            .route("/push/vapid_public_key", get(handlers::handle_vapid_public_key))
            .route("/push/subscribe", post(handlers::handle_subscribe))
            .route("/push/unsubscribe", post(handlers::handle_unsubscribe))
            .route("/push/suppress", post(handlers::handle_suppress))
            .route("/push/unsuppress", post(handlers::handle_unsuppress))
            .route("/push/suppressions", get(handlers::handle_suppressions));

        if state.html_page.is_some() {
            api = api.route("/", get(handlers::handle_template));
        }

        if let Some(static_dir) = state.config.static_dir.as_deref() {
            tracing::info!(
                "static file server enabled at {} (serving from: {static_dir})",
                state.config.base_url
            );
            api = api.fallback_service(ServeDir::new(static_dir));
        }

        let base_url = state.config.base_url.trim_end_matches('/').to_string();

        Router::new()
            .route("/config.json", get(handlers::handle_config))
            .nest(&base_url, api)
            .layer(cors)
            .with_state(state)
    }

    /// Bind the configured listen address and serve until a shutdown
    /// signal arrives.
    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let (host, port) = parse_listen(&self.state.config.listen)?;
        let listen = self.state.config.listen.clone();
        let router = Self::router(self.state);

        let listener = tokio::net::TcpListener::bind((host.as_str(), port)).await?;
        tracing::info!("Argus web server listening on {listen}");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("web server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received interrupt signal, shutting down");
        }
        _ = terminate.recv() => {
            tracing::info!("received terminate signal, shutting down");
        }
    }
}

/// Parse a listen string: `host:port`, `[v6]:port`, or a bare port
/// (host defaults to localhost).
pub fn parse_listen(listen: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::Invalid(format!("invalid listen address: {listen}"));

    if let Some(rest) = listen.strip_prefix('[') {
        // Bracketed IPv6: [::1]:8080
        let close = rest.find(']').ok_or_else(invalid)?;
        let host = rest[..close].to_string();
        let port = rest[close + 1..]
            .strip_prefix(':')
            .ok_or_else(invalid)?
            .parse()
            .map_err(|_| invalid())?;
        return Ok((host, port));
    }

    match listen.rfind(':') {
        Some(colon) if !listen[..colon].contains(':') => {
            let host = listen[..colon].to_string();
            let port = listen[colon + 1..].parse().map_err(|_| invalid())?;
            Ok((host, port))
        }
        Some(_) => {
            // Bare IPv6 address without a port.
            Err(invalid())
        }
        None => {
            let port = listen.parse().map_err(|_| invalid())?;
            Ok(("localhost".to_string(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listen_host_port() {
        assert_eq!(
            parse_listen("127.0.0.1:8080").unwrap(),
            ("127.0.0.1".to_string(), 8080)
        );
        assert_eq!(
            parse_listen("monitor.internal:9001").unwrap(),
            ("monitor.internal".to_string(), 9001)
        );
    }

    #[test]
    fn test_parse_listen_ipv6() {
        assert_eq!(parse_listen("[::1]:8080").unwrap(), ("::1".to_string(), 8080));
        assert_eq!(
            parse_listen("[2001:db8::5]:80").unwrap(),
            ("2001:db8::5".to_string(), 80)
        );
    }

    #[test]
    fn test_parse_listen_bare_port() {
        assert_eq!(parse_listen("8080").unwrap(), ("localhost".to_string(), 8080));
    }

    #[test]
    fn test_parse_listen_rejects_garbage() {
        assert!(parse_listen("[::1]").is_err());
        assert!(parse_listen("2001:db8::5").is_err());
        assert!(parse_listen("host:notaport").is_err());
        assert!(parse_listen("just-a-host").is_err());
    }
}
