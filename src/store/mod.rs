//! Persistence collaborator.
//!
//! Agents, policies, audit events and threat signatures live outside the
//! proxy. The [`Store`] trait is the request/response interface the
//! pipeline talks to; [`InMemoryStore`] backs tests and local runs and
//! [`HttpStore`] speaks the REST table interface of the hosted backend.
//!
//! Implementations return `Ok(None)` for a lookup that found nothing and
//! reserve `Err` for a failed or unreachable backend.

mod http;
mod memory;
mod records;

use async_trait::async_trait;

pub use http::HttpStore;
pub use memory::InMemoryStore;
pub use records::{
    Agent, AgentId, AgentStatus, AgentUpdate, Event, EventDecision, EventType, NewAgent,
    NewPolicy, Permission, Policy, PolicyType, ThreatSignature, Tier,
};

use crate::error::Result;

/// Largest page any listing returns
pub const MAX_PAGE: usize = 1000;

/// Storage backend for agent records and audit data.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Resolve a credential to its agent
    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>>;

    /// Fetch an agent by id
    async fn agent_by_id(&self, id: AgentId) -> Result<Option<Agent>>;

    /// Newest agents first
    async fn list_agents(&self, limit: usize) -> Result<Vec<Agent>>;

    /// Insert an agent and return it with its id
    async fn create_agent(&self, agent: NewAgent) -> Result<Agent>;

    /// Merge `update` into an agent and return the result.
    ///
    /// Fails with [`AisError::NotFound`](crate::AisError::NotFound) for an
    /// unknown id.
    async fn update_agent(&self, id: AgentId, update: &AgentUpdate) -> Result<Agent>;

    /// Insert a policy
    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy>;

    /// Enabled policies of one agent
    async fn policies_for_agent(&self, agent_id: AgentId) -> Result<Vec<Policy>>;

    /// Append an audit event
    async fn log_event(&self, event: &Event) -> Result<()>;

    /// Newest events of one agent first
    async fn events_for_agent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Event>>;

    /// Newest events across all agents first
    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>>;

    /// Add a signature to the feed, or bump `times_blocked` on the existing
    /// entry with the same hash. Returns the stored entry.
    async fn record_signature(&self, signature: &ThreatSignature) -> Result<ThreatSignature>;

    /// Newest signatures first, optionally only one threat type
    async fn threat_feed(
        &self,
        limit: usize,
        threat_type: Option<&str>,
    ) -> Result<Vec<ThreatSignature>>;
}
