//! Outcome of one proxied call.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::security::{DetectedThreat, Severity};

/// Payload of a successful call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allowed {
    /// Request data after redaction
    pub processed_data: Value,
    /// Upstream response, when the call was forwarded
    pub proxy_response: Option<Value>,
    /// Number of secrets replaced in the request
    pub secrets_redacted: usize,
    /// Time spent in the pipeline
    pub latency_ms: u64,
}

/// Threat details returned to the caller when a request is blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatSummary {
    /// Threat type
    #[serde(rename = "type")]
    pub threat_type: String,
    /// Severity
    pub severity: Severity,
    /// Description
    pub description: String,
}

impl From<&DetectedThreat> for ThreatSummary {
    fn from(threat: &DetectedThreat) -> Self {
        Self {
            threat_type: threat.threat_type.clone(),
            severity: threat.severity,
            description: threat.description.clone(),
        }
    }
}

/// Why authentication failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credential was presented
    Missing,
    /// The credential does not belong to any agent
    Invalid,
}

/// Decision returned by [`Pipeline::handle`](super::Pipeline::handle).
///
/// Every variant maps to a stable [`code`](Decision::code), a
/// human-readable [`message`](Decision::message) and an HTTP status.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// The call went through
    Allow(Allowed),
    /// The request payload matched a threat rule
    ThreatBlocked(ThreatSummary),
    /// The upstream response matched a threat rule
    ResponseThreat(DetectedThreat),
    /// The agent exceeded its tier limit
    RateLimited {
        /// Limit applied
        limit: u32,
        /// When the window resets
        reset_at: DateTime<Utc>,
    },
    /// The agent is quarantined
    Quarantined,
    /// The credential was missing or unknown
    Unauthorized(AuthFailure),
    /// The request was malformed
    BadRequest(String),
    /// Forwarding to the target failed
    ProxyError,
    /// Something failed inside the proxy
    InternalError,
}

impl Decision {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Decision::Allow(_) => "allow",
            Decision::ThreatBlocked(_) => "threat_blocked",
            Decision::ResponseThreat(_) => "response_threat",
            Decision::RateLimited { .. } => "rate_limited",
            Decision::Quarantined => "quarantined",
            Decision::Unauthorized(_) => "unauthorized",
            Decision::BadRequest(_) => "bad_request",
            Decision::ProxyError => "proxy_error",
            Decision::InternalError => "internal_error",
        }
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        match self {
            Decision::Allow(_) => "Request allowed",
            Decision::ThreatBlocked(_) => "Threat detected and blocked",
            Decision::ResponseThreat(_) => "Response contained potential threat",
            Decision::RateLimited { .. } => "Rate limit exceeded",
            Decision::Quarantined => "Agent is quarantined. Contact support.",
            Decision::Unauthorized(AuthFailure::Missing) => "Missing API key",
            Decision::Unauthorized(AuthFailure::Invalid) => "Invalid API key",
            Decision::BadRequest(message) => message,
            Decision::ProxyError => "Proxy request failed",
            Decision::InternalError => "Internal error",
        }
    }

    /// HTTP status for this decision
    pub fn status_code(&self) -> u16 {
        match self {
            Decision::Allow(_) => 200,
            Decision::ThreatBlocked(_)
            | Decision::ResponseThreat(_)
            | Decision::BadRequest(_) => 400,
            Decision::Unauthorized(_) => 401,
            Decision::Quarantined => 403,
            Decision::RateLimited { .. } => 429,
            Decision::InternalError => 500,
            Decision::ProxyError => 502,
        }
    }

    /// True for [`Decision::Allow`]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }

    /// Whether repeating the same call unchanged can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Decision::RateLimited { .. } | Decision::ProxyError | Decision::InternalError
        )
    }

    /// JSON response body
    pub fn to_body(&self) -> Value {
        let mut body = match self {
            Decision::Allow(allowed) => {
                return json!({
                    "ok": true,
                    "decision": "allow",
                    "code": self.code(),
                    "processed_data": allowed.processed_data,
                    "proxy_response": allowed.proxy_response,
                    "secrets_redacted": allowed.secrets_redacted,
                    "latency_ms": allowed.latency_ms,
                });
            },
            _ => json!({
                "ok": false,
                "code": self.code(),
                "message": self.message(),
                "error": self.message(),
            }),
        };

        match self {
            Decision::ThreatBlocked(summary) => {
                body["threat"] = json!(summary);
            },
            Decision::ResponseThreat(threat) => {
                body["threat"] = json!(threat);
            },
            Decision::RateLimited { limit, reset_at } => {
                body["limit"] = json!(limit);
                body["reset_at"] = json!(reset_at);
            },
            _ => {},
        }
        body
    }
}
