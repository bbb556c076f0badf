//! Agent registration and read-only views over the store.

use std::sync::Arc;

use rand::RngCore;
use serde::Serialize;

use crate::error::{AisError, Result};
use crate::security::Severity;
use crate::store::{
    Agent, AgentStatus, NewAgent, NewPolicy, Permission, PolicyType, Store, ThreatSignature,
    Tier, MAX_PAGE,
};

/// Prefix of generated API keys
pub const API_KEY_PREFIX: &str = "ais_";

/// Random bytes behind an API key
pub const API_KEY_BYTES: usize = 32;

/// Minimum agent name length
pub const MIN_NAME_CHARS: usize = 2;

/// Request ceiling written on the default `rate_limit` policy
pub const DEFAULT_POLICY_RATE_LIMIT: u32 = 1_000;

/// Default threat feed page
pub const DEFAULT_FEED_LIMIT: usize = 50;

/// Largest threat feed page
pub const MAX_FEED_LIMIT: usize = 200;

/// Generate a fresh `ais_` key with 64 hex characters
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{API_KEY_PREFIX}{hex}")
}

/// A newly registered agent and its key
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    /// Stored agent
    pub agent: Agent,
    /// API key; only returned here
    pub api_key: String,
}

/// Feed entry as shown to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    /// Store id
    pub id: Option<u64>,
    /// Signature hash
    pub signature: String,
    /// Threat type
    #[serde(rename = "type")]
    pub threat_type: String,
    /// Severity
    pub severity: Severity,
    /// Description
    pub description: String,
    /// Times blocked
    pub times_blocked: u64,
    /// First seen
    pub first_seen: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ThreatSignature> for FeedEntry {
    fn from(sig: ThreatSignature) -> Self {
        Self {
            id: sig.id,
            signature: sig.signature_hash,
            threat_type: sig.threat_type,
            severity: sig.severity,
            description: sig.description,
            times_blocked: sig.times_blocked,
            first_seen: sig.created_at,
        }
    }
}

/// Short feed entry on the global stats view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentThreat {
    /// Threat type
    #[serde(rename = "type")]
    pub threat_type: String,
    /// Severity
    pub severity: Severity,
    /// Times blocked
    pub times_blocked: u64,
}

/// Totals across all agents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    /// Registered agents
    pub agents_protected: usize,
    /// Agents with status `active`
    pub active_agents: usize,
    /// Sum of request counters
    pub total_requests: u64,
    /// Sum of blocked-threat counters
    pub threats_blocked: u64,
    /// Signatures in the feed
    pub threat_signatures: usize,
    /// Newest feed entries
    pub recent_threats: Vec<RecentThreat>,
}

/// Registration and reporting over a [`Store`]
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn Store>,
}

impl Registry {
    /// Create a registry over a store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register an agent on the free tier with default policies.
    ///
    /// The name is trimmed and must have at least [`MIN_NAME_CHARS`]
    /// characters.
    pub async fn register(&self, name: &str, wallet_address: Option<&str>) -> Result<Registration> {
        let name = name.trim();
        if name.chars().count() < MIN_NAME_CHARS {
            return Err(AisError::InvalidRequest(format!(
                "Agent name is required (min {MIN_NAME_CHARS} characters)"
            )));
        }

        let api_key = generate_api_key();
        let agent = self
            .store
            .create_agent(NewAgent {
                agent_name: name.to_string(),
                api_key: api_key.clone(),
                wallet_address: wallet_address
                    .filter(|w| !w.is_empty())
                    .map(str::to_string),
                subscription_tier: Tier::Free,
                status: AgentStatus::Active,
            })
            .await?;

        let defaults = [
            NewPolicy {
                agent_id: agent.id,
                policy_type: PolicyType::KeyProtection,
                target: "*".to_string(),
                permission: Permission::Allow,
                budget_limit: None,
                rate_limit: None,
                enabled: true,
            },
            NewPolicy {
                agent_id: agent.id,
                policy_type: PolicyType::RateLimit,
                target: "*".to_string(),
                permission: Permission::Allow,
                budget_limit: None,
                rate_limit: Some(DEFAULT_POLICY_RATE_LIMIT),
                enabled: true,
            },
        ];
        for policy in defaults {
            self.store.create_policy(policy).await?;
        }

        tracing::info!(agent_id = agent.id, name, "agent registered");
        Ok(Registration { agent, api_key })
    }

    /// Newest feed entries, at most [`MAX_FEED_LIMIT`]
    pub async fn threat_feed(
        &self,
        limit: Option<usize>,
        threat_type: Option<&str>,
    ) -> Result<Vec<FeedEntry>> {
        let limit = limit.unwrap_or(DEFAULT_FEED_LIMIT).min(MAX_FEED_LIMIT);
        let feed = self
            .store
            .threat_feed(limit, threat_type.filter(|t| !t.is_empty()))
            .await?;
        Ok(feed.into_iter().map(FeedEntry::from).collect())
    }

    /// Totals across agents and the feed
    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let agents = self.store.list_agents(MAX_PAGE).await?;
        let feed = self.store.threat_feed(MAX_PAGE, None).await?;

        Ok(GlobalStats {
            agents_protected: agents.len(),
            active_agents: agents
                .iter()
                .filter(|a| a.status == AgentStatus::Active)
                .count(),
            total_requests: agents.iter().map(|a| a.requests_total).sum(),
            threats_blocked: agents.iter().map(|a| a.threats_blocked).sum(),
            threat_signatures: feed.len(),
            recent_threats: feed
                .into_iter()
                .take(5)
                .map(|s| RecentThreat {
                    threat_type: s.threat_type,
                    severity: s.severity,
                    times_blocked: s.times_blocked,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AgentUpdate, InMemoryStore};

    fn registry() -> (Registry, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Registry::new(store.clone()), store)
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert_eq!(key.len(), API_KEY_PREFIX.len() + 64);
        assert!(key[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(key, generate_api_key());
    }

    #[tokio::test]
    async fn test_register_creates_agent_and_policies() {
        let (registry, store) = registry();
        let registration = registry.register("  scout ", Some("wallet1")).await.unwrap();

        assert_eq!(registration.agent.agent_name, "scout");
        assert_eq!(registration.agent.subscription_tier, Tier::Free);
        assert_eq!(registration.agent.status, AgentStatus::Active);

        let found = store.agent_by_api_key(&registration.api_key).await.unwrap();
        assert_eq!(found.map(|a| a.id), Some(registration.agent.id));

        let policies = store.policies_for_agent(registration.agent.id).await.unwrap();
        assert_eq!(policies.len(), 2);
        assert!(policies
            .iter()
            .any(|p| p.policy_type == PolicyType::RateLimit && p.rate_limit == Some(1_000)));
    }

    #[tokio::test]
    async fn test_register_rejects_short_name() {
        let (registry, _) = registry();
        let err = registry.register(" a ", None).await.unwrap_err();
        assert!(matches!(err, AisError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_global_stats_sums_agents() {
        let (registry, store) = registry();
        let a = registry.register("alpha", None).await.unwrap().agent;
        let b = registry.register("beta", None).await.unwrap().agent;
        store
            .update_agent(
                a.id,
                &AgentUpdate {
                    requests_total: Some(4),
                    threats_blocked: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .update_agent(
                b.id,
                &AgentUpdate {
                    requests_total: Some(1),
                    status: Some(AgentStatus::Quarantined),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stats = registry.global_stats().await.unwrap();
        assert_eq!(stats.agents_protected, 2);
        assert_eq!(stats.active_agents, 1);
        assert_eq!(stats.total_requests, 5);
        assert_eq!(stats.threats_blocked, 2);
        assert_eq!(stats.threat_signatures, 0);
    }
}
