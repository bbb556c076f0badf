//! Record types exchanged with the persistence collaborator.
//!
//! Field names follow the external table schema (`ais_agents`,
//! `ais_policies`, `ais_events`, `ais_threats`) so records serialize
//! straight onto the wire.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::security::Severity;

/// Agent identifier
pub type AgentId = u64;

/// Subscription tier.
///
/// Unrecognized tier names deserialize as [`Tier::Free`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Default tier
    #[default]
    Free,
    /// Paid tier
    Pro,
    /// Highest tier
    Enterprise,
}

impl Tier {
    /// Parse a tier name, falling back to `Free`
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

impl<'de> Deserialize<'de> for Tier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Tier::from_name(&name))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Free => write!(f, "free"),
            Tier::Pro => write!(f, "pro"),
            Tier::Enterprise => write!(f, "enterprise"),
        }
    }
}

/// Agent health status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Normal operation
    #[default]
    Active,
    /// Administratively paused
    Suspended,
    /// Hard-blocked until external intervention
    Quarantined,
}

/// A registered agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Identifier
    pub id: AgentId,
    /// Display name
    pub agent_name: String,
    /// Credential presented on every proxied call
    pub api_key: String,
    /// Optional wallet address
    #[serde(default)]
    pub wallet_address: Option<String>,
    /// Tier
    #[serde(default)]
    pub subscription_tier: Tier,
    /// Prepaid credit balance
    #[serde(default)]
    pub credits_usdc: f64,
    /// Requests since the daily counter was last reset
    #[serde(default)]
    pub requests_today: u64,
    /// Requests ever
    #[serde(default)]
    pub requests_total: u64,
    /// Threats blocked or secrets redacted on this agent's behalf
    #[serde(default)]
    pub threats_blocked: u64,
    /// Status
    #[serde(default)]
    pub status: AgentStatus,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Agent {
    /// True when the agent is quarantined
    pub fn is_quarantined(&self) -> bool {
        self.status == AgentStatus::Quarantined
    }
}

/// Fields for creating an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgent {
    /// Display name
    pub agent_name: String,
    /// Credential
    pub api_key: String,
    /// Optional wallet address
    pub wallet_address: Option<String>,
    /// Tier
    pub subscription_tier: Tier,
    /// Status
    pub status: AgentStatus,
}

/// Partial agent update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentUpdate {
    /// New daily request count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_today: Option<u64>,
    /// New total request count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_total: Option<u64>,
    /// New blocked-threat count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threats_blocked: Option<u64>,
    /// New status
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    /// New tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<Tier>,
}

impl AgentUpdate {
    /// Merge the set fields into `agent`
    pub fn apply(&self, agent: &mut Agent) {
        if let Some(v) = self.requests_today {
            agent.requests_today = v;
        }
        if let Some(v) = self.requests_total {
            agent.requests_total = v;
        }
        if let Some(v) = self.threats_blocked {
            agent.threats_blocked = v;
        }
        if let Some(v) = self.status {
            agent.status = v;
        }
        if let Some(v) = self.subscription_tier {
            agent.subscription_tier = v;
        }
    }
}

/// Policy kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    /// Allowed tools
    ToolAllowlist,
    /// Blocked domains
    DomainBlock,
    /// Spend ceiling
    BudgetLimit,
    /// Request ceiling
    RateLimit,
    /// Secret redaction
    KeyProtection,
}

/// Policy permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Allow
    Allow,
    /// Deny
    Deny,
    /// Hold for review
    Review,
}

/// A policy attached to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Identifier
    pub id: u64,
    /// Owning agent
    pub agent_id: AgentId,
    /// Kind
    pub policy_type: PolicyType,
    /// Target (tool name, domain or `*`)
    pub target: String,
    /// Permission
    pub permission: Permission,
    /// Spend ceiling
    #[serde(default)]
    pub budget_limit: Option<f64>,
    /// Request ceiling
    #[serde(default)]
    pub rate_limit: Option<u32>,
    /// Enabled flag
    #[serde(default)]
    pub enabled: bool,
    /// Creation time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Fields for creating a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPolicy {
    /// Owning agent
    pub agent_id: AgentId,
    /// Kind
    pub policy_type: PolicyType,
    /// Target
    pub target: String,
    /// Permission
    pub permission: Permission,
    /// Spend ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_limit: Option<f64>,
    /// Request ceiling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    /// Enabled flag
    pub enabled: bool,
}

/// Audit event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Call completed
    ToolCall,
    /// Request or response rejected for content
    ThreatBlocked,
    /// Call completed with secrets redacted
    KeyRedacted,
    /// Call rejected by the rate limiter
    RateLimited,
    /// Forwarding failed
    ProxyError,
}

/// Audit event decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDecision {
    /// Passed through
    Allow,
    /// Rejected
    Block,
    /// Passed through after redaction
    Redact,
}

/// An append-only audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Owning agent
    pub agent_id: AgentId,
    /// Kind
    pub event_type: EventType,
    /// Tool name or target URL
    pub tool_name: String,
    /// Leading part of the serialized request, for threat events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<String>,
    /// Decision
    pub decision: EventDecision,
    /// Whether a threat or secret was found
    pub threat_detected: bool,
    /// Threat type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_type: Option<String>,
    /// Time spent in the pipeline
    pub latency_ms: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// An entry in the shared threat feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatSignature {
    /// Identifier, assigned by the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Dedup hash
    pub signature_hash: String,
    /// Threat type
    pub threat_type: String,
    /// Pattern excerpt
    pub pattern: String,
    /// Description
    pub description: String,
    /// Severity
    pub severity: Severity,
    /// Times this signature was blocked
    #[serde(default)]
    pub times_blocked: u64,
    /// Agent that first reported it
    #[serde(default)]
    pub source_agent_id: Option<AgentId>,
    /// First seen
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}
