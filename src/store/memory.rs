//! In-process store for tests and local runs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::records::{
    Agent, AgentId, AgentUpdate, Event, NewAgent, NewPolicy, Policy, ThreatSignature,
};
use super::Store;
use crate::error::{AisError, Result};

#[derive(Debug, Default)]
struct Tables {
    agents: HashMap<AgentId, Agent>,
    policies: Vec<Policy>,
    events: Vec<Event>,
    signatures: Vec<ThreatSignature>,
    next_agent_id: AgentId,
    next_policy_id: u64,
    next_signature_id: u64,
}

/// Store that keeps every table in memory.
///
/// Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events
    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }
}

/// Newest-first copy of at most `limit` entries
fn newest<T>(items: impl DoubleEndedIterator<Item = T>, limit: usize) -> Vec<T> {
    items.rev().take(limit).collect()
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .agents
            .values()
            .find(|a| a.api_key == api_key)
            .cloned())
    }

    async fn agent_by_id(&self, id: AgentId) -> Result<Option<Agent>> {
        Ok(self.tables.read().await.agents.get(&id).cloned())
    }

    async fn list_agents(&self, limit: usize) -> Result<Vec<Agent>> {
        let tables = self.tables.read().await;
        let mut agents: Vec<Agent> = tables.agents.values().cloned().collect();
        agents.sort_by(|a, b| b.id.cmp(&a.id));
        agents.truncate(limit);
        Ok(agents)
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent> {
        let mut tables = self.tables.write().await;
        tables.next_agent_id += 1;
        let record = Agent {
            id: tables.next_agent_id,
            agent_name: agent.agent_name,
            api_key: agent.api_key,
            wallet_address: agent.wallet_address,
            subscription_tier: agent.subscription_tier,
            credits_usdc: 0.0,
            requests_today: 0,
            requests_total: 0,
            threats_blocked: 0,
            status: agent.status,
            created_at: Some(Utc::now()),
        };
        tables.agents.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_agent(&self, id: AgentId, update: &AgentUpdate) -> Result<Agent> {
        let mut tables = self.tables.write().await;
        let agent = tables
            .agents
            .get_mut(&id)
            .ok_or_else(|| AisError::NotFound(format!("agent {id}")))?;
        update.apply(agent);
        Ok(agent.clone())
    }

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        let mut tables = self.tables.write().await;
        tables.next_policy_id += 1;
        let record = Policy {
            id: tables.next_policy_id,
            agent_id: policy.agent_id,
            policy_type: policy.policy_type,
            target: policy.target,
            permission: policy.permission,
            budget_limit: policy.budget_limit,
            rate_limit: policy.rate_limit,
            enabled: policy.enabled,
            created_at: Some(Utc::now()),
        };
        tables.policies.push(record.clone());
        Ok(record)
    }

    async fn policies_for_agent(&self, agent_id: AgentId) -> Result<Vec<Policy>> {
        let tables = self.tables.read().await;
        Ok(tables
            .policies
            .iter()
            .filter(|p| p.agent_id == agent_id && p.enabled)
            .cloned()
            .collect())
    }

    async fn log_event(&self, event: &Event) -> Result<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn events_for_agent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(newest(
            tables.events.iter().filter(|e| e.agent_id == agent_id).cloned(),
            limit,
        ))
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(newest(tables.events.iter().cloned(), limit))
    }

    async fn record_signature(&self, signature: &ThreatSignature) -> Result<ThreatSignature> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .signatures
            .iter_mut()
            .find(|s| s.signature_hash == signature.signature_hash)
        {
            existing.times_blocked += 1;
            return Ok(existing.clone());
        }

        tables.next_signature_id += 1;
        let record = ThreatSignature {
            id: Some(tables.next_signature_id),
            times_blocked: signature.times_blocked.max(1),
            created_at: Some(Utc::now()),
            ..signature.clone()
        };
        tables.signatures.push(record.clone());
        Ok(record)
    }

    async fn threat_feed(
        &self,
        limit: usize,
        threat_type: Option<&str>,
    ) -> Result<Vec<ThreatSignature>> {
        let tables = self.tables.read().await;
        Ok(newest(
            tables
                .signatures
                .iter()
                .filter(|s| threat_type.map_or(true, |t| s.threat_type == t))
                .cloned(),
            limit,
        ))
    }
}
