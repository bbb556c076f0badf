//! Decision pipeline for proxied tool calls.
//!
//! A call runs through these steps and stops at the first blocking one:
//!
//! 1. authenticate the credential
//! 2. refuse quarantined agents
//! 3. require a tool or target URL
//! 4. apply the tier's rate limit
//! 5. scan the serialized request for threats
//! 6. redact secrets from the request
//! 7. forward to the target URL, if any, and scan the response
//! 8. record success
//!
//! Once the rate limit is consulted, every exit writes exactly one audit
//! event. A call that had secrets redacted and then succeeds is recorded
//! as `key_redacted`; if it later fails, the failure's event is the one
//! written. Counter and event writes are best-effort: a store failure is
//! logged and never changes the decision.

mod decision;
mod forward;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::Instrument;
use uuid::Uuid;

pub use decision::{Allowed, AuthFailure, Decision, ThreatSummary};
pub use forward::{
    ForwardRequest, Forwarder, HttpForwarder, DEFAULT_FORWARD_TIMEOUT, DEFAULT_MAX_RESPONSE_BYTES,
};

use crate::error::Result;
use crate::ratelimit::RateLimiter;
use crate::security::{
    signature_hash, truncate_chars, ContentScanner, DetectedThreat, PatternCatalog,
    SecretRedactor, SECRET_LEAK,
};
use crate::store::{
    Agent, AgentUpdate, Event, EventDecision, EventType, Store, ThreatSignature, Tier,
};

/// Characters of the serialized request kept on a threat event
pub const REQUEST_EXCERPT_CHARS: usize = 500;

/// Characters of the matched text kept on a feed signature
pub const SIGNATURE_PATTERN_CHARS: usize = 200;

/// Per-tier request limits per window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierLimits {
    /// Free tier limit
    pub free: u32,
    /// Pro tier limit
    pub pro: u32,
    /// Enterprise tier limit
    pub enterprise: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free: 1_000,
            pro: 10_000,
            enterprise: 100_000,
            window_ms: 3_600_000,
        }
    }
}

impl TierLimits {
    /// Limit for a tier
    pub fn for_tier(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free,
            Tier::Pro => self.pro,
            Tier::Enterprise => self.enterprise,
        }
    }
}

/// An inbound tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyRequest {
    /// Tool name
    #[serde(default)]
    pub tool: Option<String>,
    /// Tool action, informational
    #[serde(default)]
    pub action: Option<String>,
    /// URL to forward to
    #[serde(default)]
    pub target_url: Option<String>,
    /// Tool arguments; `null` is treated as `{}`
    #[serde(default)]
    pub data: Value,
    /// Forward method, `GET` when absent
    #[serde(default)]
    pub method: Option<String>,
    /// Forward headers
    #[serde(default)]
    pub headers: Option<BTreeMap<String, String>>,
}

impl ProxyRequest {
    /// Request for a named tool
    pub fn tool(name: impl Into<String>, data: Value) -> Self {
        Self {
            tool: Some(name.into()),
            data,
            ..Default::default()
        }
    }

    /// Request forwarded to a URL
    pub fn forward(url: impl Into<String>, data: Value) -> Self {
        Self {
            target_url: Some(url.into()),
            data,
            ..Default::default()
        }
    }

    /// Name recorded on events: the tool, else the target URL
    pub fn label(&self) -> Option<&str> {
        non_empty(self.tool.as_deref()).or_else(|| non_empty(self.target_url.as_deref()))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// The decision pipeline
pub struct Pipeline {
    store: Arc<dyn Store>,
    scanner: ContentScanner,
    redactor: SecretRedactor,
    limiter: Arc<RateLimiter>,
    forwarder: Arc<dyn Forwarder>,
    limits: TierLimits,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("store", &self.store.name())
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create a pipeline with its own rate limiter
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Arc<PatternCatalog>,
        forwarder: Arc<dyn Forwarder>,
        limits: TierLimits,
    ) -> Self {
        Self {
            store,
            scanner: ContentScanner::new(Arc::clone(&catalog)),
            redactor: SecretRedactor::new(catalog),
            limiter: Arc::new(RateLimiter::new()),
            forwarder,
            limits,
        }
    }

    /// Use a specific rate limiter
    pub fn with_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Rate limiter in use
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Store in use
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Tier limits in use
    pub fn limits(&self) -> TierLimits {
        self.limits
    }

    /// Run one call through the pipeline.
    ///
    /// Never fails: store errors during authentication become
    /// [`Decision::InternalError`].
    pub async fn handle(&self, credential: Option<&str>, request: ProxyRequest) -> Decision {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "proxy_call",
            %request_id,
            agent_id = tracing::field::Empty
        );

        async move {
            let started = Instant::now();
            let decision = match self.run(credential, &request, started).await {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(error = %e, "pipeline failed");
                    Decision::InternalError
                },
            };
            tracing::info!(
                code = decision.code(),
                latency_ms = elapsed_ms(started),
                "call finished"
            );
            decision
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        credential: Option<&str>,
        request: &ProxyRequest,
        started: Instant,
    ) -> Result<Decision> {
        let Some(credential) = non_empty(credential) else {
            return Ok(Decision::Unauthorized(AuthFailure::Missing));
        };
        let Some(agent) = self.store.agent_by_api_key(credential).await? else {
            return Ok(Decision::Unauthorized(AuthFailure::Invalid));
        };
        tracing::Span::current().record("agent_id", agent.id);

        if agent.is_quarantined() {
            tracing::warn!("quarantined agent refused");
            return Ok(Decision::Quarantined);
        }

        let Some(label) = request.label() else {
            return Ok(Decision::BadRequest("Missing tool or target_url".to_string()));
        };

        let limit = self.limits.for_tier(agent.subscription_tier);
        let verdict = self.limiter.check(agent.id, limit, self.limits.window_ms);
        if !verdict.allowed {
            tracing::info!(limit, "rate limited");
            let mut event = audit(&agent, label, started);
            event.event_type = EventType::RateLimited;
            event.decision = EventDecision::Block;
            self.log_event(event).await;

            return Ok(Decision::RateLimited {
                limit,
                reset_at: verdict.reset_time.unwrap_or_else(Utc::now),
            });
        }

        let data = if request.data.is_null() {
            json!({})
        } else {
            request.data.clone()
        };
        let serialized = data.to_string();

        let scan = self.scanner.scan(&serialized);
        if let Some(threat) = scan.first() {
            tracing::warn!(
                threat_type = %threat.threat_type,
                severity = %threat.severity,
                "request blocked"
            );
            let mut event = audit(&agent, label, started);
            event.event_type = EventType::ThreatBlocked;
            event.decision = EventDecision::Block;
            event.threat_detected = true;
            event.threat_type = Some(threat.threat_type.clone());
            let excerpt = self.redactor.redact(&serialized).redacted;
            event.request_data = Some(truncate_chars(&excerpt, REQUEST_EXCERPT_CHARS));
            self.log_event(event).await;

            self.publish_signature(&agent, threat).await;
            self.bump_threats_blocked(&agent, 1).await;

            return Ok(Decision::ThreatBlocked(ThreatSummary::from(threat)));
        }

        let redaction = self.redactor.redact(&serialized);
        let secrets_redacted = redaction.count();
        let processed_data = if redaction.is_clean() {
            data
        } else {
            tracing::info!(count = secrets_redacted, "secrets redacted");
            self.bump_threats_blocked(&agent, secrets_redacted).await;
            serde_json::from_str(&redaction.redacted)
                .unwrap_or_else(|_| Value::String(redaction.redacted.clone()))
        };

        let mut proxy_response = None;
        if let Some(url) = non_empty(request.target_url.as_deref()) {
            let outbound = ForwardRequest::new(
                url,
                request.method.as_deref(),
                request.headers.clone().unwrap_or_default(),
                processed_data.clone(),
            );

            let response = match self.forwarder.forward(&outbound).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, url, "forward failed");
                    let mut event = audit(&agent, label, started);
                    event.event_type = EventType::ProxyError;
                    event.decision = EventDecision::Block;
                    self.log_event(event).await;
                    return Ok(Decision::ProxyError);
                },
            };

            let response_scan = self.scanner.scan(&response.to_string());
            if let Some(threat) = response_scan.first() {
                tracing::warn!(threat_type = %threat.threat_type, url, "response blocked");
                let mut event = audit(&agent, url, started);
                event.event_type = EventType::ThreatBlocked;
                event.decision = EventDecision::Block;
                event.threat_detected = true;
                event.threat_type = Some(threat.threat_type.clone());
                self.log_event(event).await;
                return Ok(Decision::ResponseThreat(threat.clone()));
            }
            proxy_response = Some(response);
        }

        let mut event = audit(&agent, label, started);
        if secrets_redacted > 0 {
            event.event_type = EventType::KeyRedacted;
            event.decision = EventDecision::Redact;
            event.threat_detected = true;
            event.threat_type = Some(SECRET_LEAK.to_string());
        }
        self.log_event(event).await;

        let update = AgentUpdate {
            requests_today: Some(agent.requests_today + 1),
            requests_total: Some(agent.requests_total + 1),
            ..Default::default()
        };
        if let Err(e) = self.store.update_agent(agent.id, &update).await {
            tracing::warn!(error = %e, "request counter update failed");
        }

        Ok(Decision::Allow(Allowed {
            processed_data,
            proxy_response,
            secrets_redacted,
            latency_ms: elapsed_ms(started),
        }))
    }

    async fn log_event(&self, event: Event) {
        if let Err(e) = self.store.log_event(&event).await {
            tracing::warn!(error = %e, event_type = ?event.event_type, "event write failed");
        }
    }

    async fn publish_signature(&self, agent: &Agent, threat: &DetectedThreat) {
        let signature = ThreatSignature {
            id: None,
            signature_hash: signature_hash(threat),
            threat_type: threat.threat_type.clone(),
            pattern: truncate_chars(&threat.pattern, SIGNATURE_PATTERN_CHARS),
            description: threat.description.clone(),
            severity: threat.severity,
            times_blocked: 1,
            source_agent_id: Some(agent.id),
            created_at: None,
        };
        if let Err(e) = self.store.record_signature(&signature).await {
            tracing::warn!(error = %e, "signature feed write failed");
        }
    }

    async fn bump_threats_blocked(&self, agent: &Agent, by: usize) {
        let update = AgentUpdate {
            threats_blocked: Some(agent.threats_blocked + by as u64),
            ..Default::default()
        };
        if let Err(e) = self.store.update_agent(agent.id, &update).await {
            tracing::warn!(error = %e, "threat counter update failed");
        }
    }
}

/// Base `tool_call`/`allow` event for an agent
fn audit(agent: &Agent, tool_name: &str, started: Instant) -> Event {
    Event {
        agent_id: agent.id,
        event_type: EventType::ToolCall,
        tool_name: tool_name.to_string(),
        request_data: None,
        decision: EventDecision::Allow,
        threat_detected: false,
        threat_type: None,
        latency_ms: elapsed_ms(started),
        created_at: Utc::now(),
    }
}
