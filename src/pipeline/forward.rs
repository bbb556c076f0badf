//! Forwarding of approved calls to their target URL.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::{AisError, Result};

/// Default forward timeout
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on an upstream response body (1 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 1024 * 1024;

/// An outbound call built from an approved request
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardRequest {
    /// Target URL
    pub url: String,
    /// HTTP method, upper case
    pub method: String,
    /// Caller-supplied headers
    pub headers: BTreeMap<String, String>,
    /// JSON body, absent for `GET`
    pub body: Option<Value>,
}

impl ForwardRequest {
    /// Build a request; the body is dropped for `GET`
    pub fn new(
        url: impl Into<String>,
        method: Option<&str>,
        headers: BTreeMap<String, String>,
        body: Value,
    ) -> Self {
        let method = method
            .filter(|m| !m.is_empty())
            .unwrap_or("GET")
            .to_ascii_uppercase();
        let body = (method != "GET").then_some(body);

        Self {
            url: url.into(),
            method,
            headers,
            body,
        }
    }
}

/// Sends a forward request and returns the response body.
///
/// A JSON body is returned as parsed JSON, anything else as
/// [`Value::String`]. Upstream status codes are not errors; only transport
/// failures and timeouts are.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Perform the call
    async fn forward(&self, request: &ForwardRequest) -> Result<Value>;
}

/// [`Forwarder`] over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: Client,
    timeout: Duration,
    max_response_bytes: usize,
}

impl HttpForwarder {
    /// Create a forwarder with a per-call timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AisError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        })
    }

    /// Refuse upstream bodies larger than `bytes`
    pub fn with_max_response_bytes(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured response size cap
    pub fn max_response_bytes(&self) -> usize {
        self.max_response_bytes
    }

    fn too_large(&self) -> AisError {
        AisError::Network(format!(
            "upstream response exceeds {} bytes",
            self.max_response_bytes
        ))
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(&self, request: &ForwardRequest) -> Result<Value> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| AisError::InvalidRequest(format!("bad method {}", request.method)))?;

        let mut outbound = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            outbound = outbound.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            outbound = outbound.json(body);
        }

        let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                AisError::Timeout(timeout_ms)
            } else {
                AisError::Network(e.to_string())
            }
        };

        let mut response = outbound.send().await.map_err(classify)?;
        let limit = self.max_response_bytes;
        if response
            .content_length()
            .is_some_and(|len| len > limit as u64)
        {
            return Err(self.too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            if body.len() + chunk.len() > limit {
                return Err(self.too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let text = String::from_utf8_lossy(&body);
        Ok(serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text.into_owned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_drops_body() {
        let request = ForwardRequest::new("http://x", None, BTreeMap::new(), json!({"a": 1}));
        assert_eq!(request.method, "GET");
        assert!(request.body.is_none());
    }

    #[test]
    fn test_post_keeps_body_and_normalizes_method() {
        let request =
            ForwardRequest::new("http://x", Some("post"), BTreeMap::new(), json!({"a": 1}));
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, Some(json!({"a": 1})));
    }

    #[test]
    fn test_default_response_cap() {
        let forwarder = HttpForwarder::new(Duration::from_secs(1)).unwrap();
        assert_eq!(forwarder.max_response_bytes(), DEFAULT_MAX_RESPONSE_BYTES);
        assert_eq!(forwarder.with_max_response_bytes(64).max_response_bytes(), 64);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let forwarder = HttpForwarder::new(Duration::from_secs(1)).unwrap();
        let request = ForwardRequest::new("http://127.0.0.1:9/", None, BTreeMap::new(), json!({}));
        let err = forwarder.forward(&request).await.unwrap_err();
        assert!(matches!(err, AisError::Network(_) | AisError::Timeout(_)));
    }
}
