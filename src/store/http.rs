//! REST store client.
//!
//! Talks to a table API of the form `/db/<table>` where every response is
//! wrapped in `{ "ok": bool, "data": ..., "error": { "code", "message" } }`.
//! Filters are passed as `where=<field>:eq:<value>`, ordering as
//! `order=<field>:desc`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::records::{
    Agent, AgentId, AgentUpdate, Event, NewAgent, NewPolicy, Policy, ThreatSignature,
};
use super::Store;
use crate::error::{AisError, Result};

const AGENTS: &str = "/db/ais_agents";
const POLICIES: &str = "/db/ais_policies";
const EVENTS: &str = "/db/ais_events";
const THREATS: &str = "/db/ais_threats";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    data: Option<T>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

type Query = Vec<(&'static str, String)>;

fn eq(field: &str, value: impl ToString) -> (&'static str, String) {
    ("where", format!("{field}:eq:{}", value.to_string()))
}

fn newest_first(limit: usize) -> Query {
    vec![
        ("order", "created_at:desc".to_string()),
        ("limit", limit.to_string()),
    ]
}

/// Store backed by the hosted REST table API
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl HttpStore {
    /// Create a client for `base_url` authenticating with `service_key`
    pub fn new(base_url: &str, service_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AisError::Store(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send one request and unwrap the envelope.
    ///
    /// A 404 yields `Ok(None)`; `ok: false` becomes [`AisError::Store`].
    async fn call<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&'static str, String)],
        body: Option<&B>,
    ) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.service_key)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AisError::Store(format!("{method} {path}: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| AisError::Store(format!("{method} {path}: invalid response: {e}")))?;

        if !envelope.ok {
            let (code, message) = envelope
                .error
                .map(|e| (e.code, e.message))
                .unwrap_or_else(|| ("unknown".to_string(), String::new()));
            return Err(AisError::Store(format!("{method} {path}: {code}: {message}")));
        }

        Ok(envelope.data)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: Query) -> Result<Option<T>> {
        self.call::<T, ()>(Method::GET, path, &query, None).await
    }

    async fn list<T: DeserializeOwned>(&self, path: &str, query: Query) -> Result<Vec<T>> {
        Ok(self.get::<Vec<T>>(path, query).await?.unwrap_or_default())
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(Method::POST, path, &[], Some(body))
            .await?
            .ok_or_else(|| AisError::Store(format!("POST {path}: empty response")))
    }

    async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.call(Method::PATCH, path, &[], Some(body))
            .await?
            .ok_or_else(|| AisError::NotFound(path.to_string()))
    }
}

#[async_trait]
impl Store for HttpStore {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn agent_by_api_key(&self, api_key: &str) -> Result<Option<Agent>> {
        let agents: Vec<Agent> = self
            .list(
                AGENTS,
                vec![eq("api_key", api_key), ("limit", "1".to_string())],
            )
            .await?;
        Ok(agents.into_iter().next())
    }

    async fn agent_by_id(&self, id: AgentId) -> Result<Option<Agent>> {
        self.get(&format!("{AGENTS}/{id}"), Vec::new()).await
    }

    async fn list_agents(&self, limit: usize) -> Result<Vec<Agent>> {
        self.list(AGENTS, newest_first(limit)).await
    }

    async fn create_agent(&self, agent: NewAgent) -> Result<Agent> {
        self.post(AGENTS, &agent).await
    }

    async fn update_agent(&self, id: AgentId, update: &AgentUpdate) -> Result<Agent> {
        self.patch(&format!("{AGENTS}/{id}"), update).await
    }

    async fn create_policy(&self, policy: NewPolicy) -> Result<Policy> {
        self.post(POLICIES, &policy).await
    }

    async fn policies_for_agent(&self, agent_id: AgentId) -> Result<Vec<Policy>> {
        self.list(POLICIES, vec![eq("agent_id", agent_id), eq("enabled", 1)])
            .await
    }

    async fn log_event(&self, event: &Event) -> Result<()> {
        self.call::<serde_json::Value, _>(Method::POST, EVENTS, &[], Some(event))
            .await?;
        Ok(())
    }

    async fn events_for_agent(&self, agent_id: AgentId, limit: usize) -> Result<Vec<Event>> {
        let mut query = vec![eq("agent_id", agent_id)];
        query.extend(newest_first(limit));
        self.list(EVENTS, query).await
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        self.list(EVENTS, newest_first(limit)).await
    }

    async fn record_signature(&self, signature: &ThreatSignature) -> Result<ThreatSignature> {
        let existing: Vec<ThreatSignature> = self
            .list(
                THREATS,
                vec![
                    eq("signature_hash", &signature.signature_hash),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        match existing.into_iter().next() {
            Some(ThreatSignature {
                id: Some(id),
                times_blocked,
                ..
            }) => {
                self.patch(
                    &format!("{THREATS}/{id}"),
                    &json!({ "times_blocked": times_blocked + 1 }),
                )
                .await
            },
            _ => {
                let mut fresh = signature.clone();
                fresh.times_blocked = fresh.times_blocked.max(1);
                self.post(THREATS, &fresh).await
            },
        }
    }

    async fn threat_feed(
        &self,
        limit: usize,
        threat_type: Option<&str>,
    ) -> Result<Vec<ThreatSignature>> {
        let mut query = newest_first(limit);
        if let Some(t) = threat_type {
            query.push(eq("threat_type", t));
        }
        self.list(THREATS, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let store = HttpStore::new("http://localhost:9/api/", "key", Duration::from_secs(1)).unwrap();
        assert_eq!(store.base_url(), "http://localhost:9/api");
    }

    #[test]
    fn test_where_clause_format() {
        assert_eq!(eq("agent_id", 7), ("where", "agent_id:eq:7".to_string()));
    }

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope<Vec<Agent>> =
            serde_json::from_str(r#"{"ok":false,"error":{"code":"forbidden","message":"no"}}"#)
                .unwrap();
        assert!(!envelope.ok);
        assert!(envelope.data.is_none());
        assert_eq!(envelope.error.unwrap().code, "forbidden");
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_store_error() {
        let store = HttpStore::new("http://127.0.0.1:9", "key", Duration::from_millis(500)).unwrap();
        let err = store.agent_by_api_key("ais_x").await.unwrap_err();
        assert!(matches!(err, AisError::Store(_)));
    }
}
