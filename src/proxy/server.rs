//! HTTP front end for the decision pipeline.
//!
//! ```text
//! Agent               AIS Proxy                    Target
//!   |                     |                           |
//!   |-- POST /api/proxy ->|                           |
//!   |   Bearer ais_...    |-- auth, limit, scan ----->|
//!   |                     |   redact, forward         |
//!   |                     |<-- response --------------|
//!   |                     |-- scan response           |
//!   |<-- decision JSON ---|                           |
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use ais::proxy::{ProxyConfig, ProxyServer};
//!
//! let server = ProxyServer::new(ProxyConfig::default(), pipeline);
//! server.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{AisError, Result};
use crate::pipeline::{Pipeline, ProxyRequest};
use crate::registry::Registry;
use crate::security::CATALOG_VERSION;

use super::stats::{ProxyStats, StatsSummary};

/// Proxy server configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,
    /// Maximum request body size in bytes
    pub max_body_size: usize,
    /// Interval between sweeps of expired rate-limit windows
    pub purge_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_body_size: 1024 * 1024,
            purge_interval: Duration::from_secs(300),
        }
    }
}

impl ProxyConfig {
    /// Server settings from a loaded [`Config`]
    pub fn from_config(config: &Config) -> Result<Self> {
        let addr = config.server.listen_addr();
        let listen_addr = addr
            .parse()
            .map_err(|e| AisError::Config(format!("Invalid listen address {addr}: {e}")))?;

        Ok(Self {
            listen_addr,
            max_body_size: config.server.max_body_size,
            purge_interval: Duration::from_secs(config.server.purge_interval_secs.max(1)),
        })
    }
}

/// Shared proxy state
struct ProxyState {
    config: ProxyConfig,
    pipeline: Arc<Pipeline>,
    registry: Registry,
    stats: Arc<ProxyStats>,
    shutdown_tx: broadcast::Sender<()>,
}

/// AIS proxy server
pub struct ProxyServer {
    state: Arc<ProxyState>,
}

impl ProxyServer {
    /// Create a server around a pipeline
    pub fn new(config: ProxyConfig, pipeline: Pipeline) -> Self {
        let registry = Registry::new(Arc::clone(pipeline.store()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            state: Arc::new(ProxyState {
                config,
                pipeline: Arc::new(pipeline),
                registry,
                stats: Arc::new(ProxyStats::new()),
                shutdown_tx,
            }),
        }
    }

    /// Get the router for the proxy
    pub fn router(&self) -> Router {
        Router::new()
            // Health and process metrics
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/metrics/reset", post(reset_metrics_handler))
            // API
            .route("/api/proxy", post(proxy_handler))
            .route("/api/register", post(register_handler))
            .route("/api/threats", get(threats_handler))
            .route("/api/stats", get(global_stats_handler))
            .layer(DefaultBodyLimit::max(self.state.config.max_body_size))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let addr = self.state.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| AisError::Server(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until Ctrl-C or [`ProxyServer::shutdown`].
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener
            .local_addr()
            .map_err(|e| AisError::Server(e.to_string()))?;
        tracing::info!("AIS proxy listening on http://{}", local);
        tracing::info!("Store: {}", self.state.pipeline.store().name());

        let purge = self.spawn_purge_task();
        let mut shutdown_rx = self.state.shutdown_tx.subscribe();

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = shutdown_rx.recv() => {},
                }
                tracing::info!("Shutting down");
            })
            .await
            .map_err(|e| AisError::Server(format!("Server error: {e}")));

        purge.abort();
        result
    }

    fn spawn_purge_task(&self) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self.state.pipeline.limiter());
        let period = self.state.config.purge_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = limiter.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, "purged rate-limit windows");
                }
            }
        })
    }

    /// Get statistics
    pub fn stats(&self) -> StatsSummary {
        self.state.stats.summary()
    }

    /// Send shutdown signal
    pub fn shutdown(&self) {
        let _ = self.state.shutdown_tx.send(());
    }
}

/// Credential from `Authorization`, with an optional `Bearer ` prefix
fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "ok": false, "error": message }))).into_response()
}

// === Handlers ===

async fn health_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "ais-proxy",
        "version": env!("CARGO_PKG_VERSION"),
        "catalog_version": CATALOG_VERSION,
        "store": state.pipeline.store().name(),
    }))
}

async fn metrics_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    Json(state.stats.summary())
}

async fn reset_metrics_handler(State(state): State<Arc<ProxyState>>) -> impl IntoResponse {
    state.stats.reset();
    Json(json!({"status": "reset"}))
}

/// Main proxy handler
async fn proxy_handler(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    // An unparsable body still goes through auth first and ends as bad_request
    let request: ProxyRequest = serde_json::from_slice(&body).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "unparsable proxy body");
        ProxyRequest::default()
    });

    let decision = state.pipeline.handle(bearer(&headers), request).await;
    state.stats.record(&decision, start.elapsed());

    let status =
        StatusCode::from_u16(decision.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(decision.to_body())).into_response()
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    #[serde(default)]
    agent_name: Option<String>,
    #[serde(default)]
    wallet_address: Option<String>,
}

async fn register_handler(State(state): State<Arc<ProxyState>>, body: Bytes) -> Response {
    let Ok(body) = serde_json::from_slice::<RegisterBody>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid request");
    };

    let name = body.agent_name.unwrap_or_default();
    match state
        .registry
        .register(&name, body.wallet_address.as_deref())
        .await
    {
        Ok(registration) => Json(json!({
            "ok": true,
            "agent": {
                "id": registration.agent.id,
                "name": registration.agent.agent_name,
                "tier": registration.agent.subscription_tier,
            },
            "api_key": registration.api_key,
            "message": "Agent registered successfully. Save your API key - it will not be shown again.",
        }))
        .into_response(),
        Err(AisError::InvalidRequest(message)) => {
            error_response(StatusCode::BAD_REQUEST, &message)
        },
        Err(e) => {
            tracing::error!(error = %e, "registration failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create agent")
        },
    }
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    limit: Option<usize>,
    #[serde(rename = "type")]
    threat_type: Option<String>,
}

async fn threats_handler(
    State(state): State<Arc<ProxyState>>,
    Query(query): Query<FeedQuery>,
) -> Response {
    match state
        .registry
        .threat_feed(query.limit, query.threat_type.as_deref())
        .await
    {
        Ok(threats) => Json(json!({
            "ok": true,
            "count": threats.len(),
            "threats": threats,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "threat feed failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch threat feed")
        },
    }
}

async fn global_stats_handler(State(state): State<Arc<ProxyState>>) -> Response {
    match state.registry.global_stats().await {
        Ok(stats) => Json(json!({
            "ok": true,
            "stats": {
                "agents_protected": stats.agents_protected,
                "active_agents": stats.active_agents,
                "total_requests": stats.total_requests,
                "threats_blocked": stats.threats_blocked,
                "threat_signatures": stats.threat_signatures,
            },
            "recent_threats": stats.recent_threats,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "global stats failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch stats")
        },
    }
}
