//! # Agent Immune System
//!
//! A protective proxy for AI-agent tool calls. Every call is authenticated,
//! rate-limited, scanned for prompt injection and dangerous URLs, stripped
//! of leaked credentials, optionally forwarded to its target, and recorded
//! as exactly one audit event.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        AIS Proxy                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  Agent ──> Auth ──> Quarantine ──> Rate ──> Scan ──> Redact   │
//! │                      gate          limit    request  secrets  │
//! │                                                        │      │
//! │                                                        v      │
//! │  Agent <── Decision <── Scan response <── Forward ─────┘      │
//! │                │                                              │
//! │                └──> Store (events, counters, threat feed)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module        | Role                                                   |
//! |---------------|--------------------------------------------------------|
//! | [`security`]  | Pattern catalog, content scanner, secret redactor      |
//! | [`ratelimit`] | Per-agent fixed-window counters                        |
//! | [`store`]     | Persistence collaborator (in-memory and REST)          |
//! | [`pipeline`]  | The decision pipeline and its [`Decision`] type        |
//! | [`registry`]  | Agent registration, threat feed and global totals      |
//! | [`proxy`]     | axum HTTP front end and process metrics                |
//! | [`config`]    | TOML + environment configuration                       |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ais::{Config, HttpForwarder, Pipeline, ProxyConfig, ProxyServer};
//!
//! let config = Config::load(None)?;
//! let pipeline = Pipeline::new(
//!     config.build_store()?,
//!     Arc::new(config.build_catalog()?),
//!     Arc::new(HttpForwarder::new(config.forward.timeout())?),
//!     config.limits,
//! );
//!
//! ProxyServer::new(ProxyConfig::from_config(&config)?, pipeline)
//!     .run()
//!     .await?;
//! ```
//!
//! ## Decisions
//!
//! | Code              | Status | Retry                         |
//! |-------------------|--------|-------------------------------|
//! | `allow`           | 200    |                               |
//! | `threat_blocked`  | 400    | not unchanged                 |
//! | `response_threat` | 400    | not unchanged                 |
//! | `bad_request`     | 400    | not unchanged                 |
//! | `unauthorized`    | 401    | no                            |
//! | `quarantined`     | 403    | no                            |
//! | `rate_limited`    | 429    | after `reset_at`              |
//! | `internal_error`  | 500    | yes                           |
//! | `proxy_error`     | 502    | yes                           |

pub mod config;
pub mod error;
pub mod pipeline;
pub mod proxy;
pub mod ratelimit;
pub mod registry;
pub mod security;
pub mod store;

pub use config::Config;
pub use error::{AisError, Result};
pub use pipeline::{Decision, Forwarder, HttpForwarder, Pipeline, ProxyRequest, TierLimits};
pub use proxy::{ProxyConfig, ProxyServer, ProxyStats};
pub use ratelimit::{RateLimitResult, RateLimiter};
pub use registry::Registry;
pub use security::{ContentScanner, DetectedThreat, PatternCatalog, SecretRedactor, Severity};
pub use store::{HttpStore, InMemoryStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
