//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`AIS_*`), applied over the file
//! - CLI arguments (for `serve`)
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//!
//! [limits]
//! free = 1000
//! window_ms = 3600000
//!
//! [store]
//! backend = "http"
//! base_url = "https://backend.example.com/wp-json/app/v1"
//!
//! [[catalog.secret]]
//! kind = "internal_token"
//! pattern = "itk_[a-z0-9]{32}"
//! severity = "high"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AisError, Result};
use crate::pipeline::{TierLimits, DEFAULT_FORWARD_TIMEOUT, DEFAULT_MAX_RESPONSE_BYTES};
use crate::security::{PatternCatalog, RuleDomain, RuleSpec};
use crate::store::{HttpStore, InMemoryStore, Store};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-tier rate limits
    #[serde(default)]
    pub limits: TierLimits,

    /// Forwarding configuration
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Persistence backend
    #[serde(default)]
    pub store: StoreConfig,

    /// Rules added to the built-in catalog
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            AisError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| AisError::Config(format!("Failed to parse config: {e}")))
    }

    /// Defaults with environment overrides
    pub fn from_env() -> Self {
        Self::default().with_env()
    }

    /// Apply `AIS_*` environment variables
    pub fn with_env(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a key lookup. Unparsable values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("AIS_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("AIS_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secs) = lookup("AIS_FORWARD_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.forward.timeout_secs = secs;
        }
        if let Some(backend) = lookup("AIS_STORE_BACKEND").and_then(|v| StoreBackend::parse(&v)) {
            self.store.backend = backend;
        }
        if let Some(url) = lookup("AIS_STORE_URL") {
            self.store.base_url = Some(url);
        }
        if let Some(key) = lookup("AIS_SERVICE_KEY") {
            self.store.service_key = Some(key);
        }
        self
    }

    /// Load from `path`, or the default location when it exists, then apply
    /// the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Some(Self::from_file(path)?),
            None => match Self::default_path() {
                Some(default) if default.exists() => Some(Self::from_file(default)?),
                _ => None,
            },
        };
        Ok(file.unwrap_or_default().with_env())
    }

    /// `<config dir>/ais/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ais").join("config.toml"))
    }

    /// Built-in catalog plus configured rules
    pub fn build_catalog(&self) -> Result<PatternCatalog> {
        PatternCatalog::builtin()
            .with_rules(RuleDomain::Injection, &self.catalog.injection)?
            .with_rules(RuleDomain::Secret, &self.catalog.secret)?
            .with_rules(RuleDomain::DangerousUrl, &self.catalog.dangerous_url)
    }

    /// Store selected by `[store]`
    pub fn build_store(&self) -> Result<Arc<dyn Store>> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
            StoreBackend::Http => {
                let base_url = self.store.base_url.as_deref().ok_or_else(|| {
                    AisError::Config("store.base_url is required for the http backend".to_string())
                })?;
                let service_key = self.store.service_key.as_deref().unwrap_or_default();
                Ok(Arc::new(HttpStore::new(
                    base_url,
                    service_key,
                    Duration::from_secs(self.store.timeout_secs),
                )?))
            },
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Seconds between sweeps of expired rate-limit windows
    pub purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_body_size: 1024 * 1024, // 1 MB
            purge_interval_secs: 300,
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Forwarding configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Timeout for a forwarded call in seconds
    pub timeout_secs: u64,
    /// Largest upstream response body accepted
    pub max_response_bytes: usize,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_FORWARD_TIMEOUT.as_secs(),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

impl ForwardConfig {
    /// Timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Persistence backend kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process tables
    #[default]
    Memory,
    /// REST table API
    Http,
}

impl StoreBackend {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Backend kind
    pub backend: StoreBackend,

    /// Base URL of the REST table API
    pub base_url: Option<String>,

    /// Bearer key for the REST table API
    #[serde(skip_serializing)]
    pub service_key: Option<String>,

    /// Timeout for store calls in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            base_url: None,
            service_key: None,
            timeout_secs: 10,
        }
    }
}

/// Extra rules per domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Injection rules
    pub injection: Vec<RuleSpec>,
    /// Secret rules
    pub secret: Vec<RuleSpec>,
    /// Dangerous URL rules
    pub dangerous_url: Vec<RuleSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.limits.free, 1_000);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.forward.timeout(), DEFAULT_FORWARD_TIMEOUT);
        assert_eq!(config.forward.max_response_bytes, 1024 * 1024);
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            port = 9090

            [limits]
            pro = 20000

            [forward]
            max_response_bytes = 4096

            [store]
            backend = "http"
            base_url = "http://db.local"

            [[catalog.secret]]
            kind = "internal_token"
            pattern = "itk_[a-z0-9]{8}"
            severity = "high"
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.limits.pro, 20_000);
        assert_eq!(config.limits.free, 1_000);
        assert_eq!(config.forward.max_response_bytes, 4096);
        assert_eq!(config.forward.timeout(), DEFAULT_FORWARD_TIMEOUT);
        assert_eq!(config.store.backend, StoreBackend::Http);
        assert_eq!(config.catalog.secret.len(), 1);

        let catalog = config.build_catalog().unwrap();
        let builtin = PatternCatalog::builtin();
        assert_eq!(
            catalog.rules(RuleDomain::Secret).len(),
            builtin.rules(RuleDomain::Secret).len() + 1
        );
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("AIS_PORT", "7000"),
            ("AIS_HOST", "0.0.0.0"),
            ("AIS_STORE_BACKEND", "HTTP"),
            ("AIS_FORWARD_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.server.listen_addr(), "0.0.0.0:7000");
        assert_eq!(config.store.backend, StoreBackend::Http);
        assert_eq!(config.forward.timeout_secs, DEFAULT_FORWARD_TIMEOUT.as_secs());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = 9999").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file("/nonexistent/ais.toml").unwrap_err();
        assert!(matches!(err, AisError::Config(_)));
    }

    #[test]
    fn test_bad_catalog_rule_fails() {
        let mut config = Config::default();
        config.catalog.injection.push(RuleSpec {
            kind: "broken".to_string(),
            pattern: "(".to_string(),
            severity: crate::security::Severity::Low,
            description: String::new(),
        });
        assert!(config.build_catalog().is_err());
    }

    #[test]
    fn test_http_store_requires_url() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Http;
        assert!(matches!(config.build_store(), Err(AisError::Config(_))));

        config.store.base_url = Some("http://db.local".to_string());
        assert_eq!(config.build_store().unwrap().name(), "http");
    }
}
