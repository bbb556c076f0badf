//! `HttpStore` against an in-process mock of the REST table API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

use ais::error::AisError;
use ais::security::Severity;
use ais::store::{
    AgentStatus, AgentUpdate, Event, EventDecision, EventType, HttpStore, NewAgent, Store,
    ThreatSignature, Tier,
};

const SERVICE_KEY: &str = "pb_sk_test";

#[derive(Default)]
struct Backend {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    next_id: Mutex<u64>,
}

type Shared = Arc<Backend>;

fn envelope(data: Value) -> Response {
    Json(json!({ "ok": true, "data": data })).into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "ok": false, "error": { "code": "not_found", "message": "no row" } })),
    )
        .into_response()
}

fn authorized(headers: &HeaderMap) -> bool {
    let expected = format!("Bearer {SERVICE_KEY}");
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected.as_str())
}

fn forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "ok": false, "error": { "code": "forbidden", "message": "bad key" } })),
    )
        .into_response()
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => u8::from(*b).to_string(),
        other => other.to_string(),
    }
}

async fn list_rows(
    State(backend): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    if !authorized(&headers) {
        return forbidden();
    }
    let tables = backend.tables.lock().unwrap();
    let mut rows: Vec<Value> = tables.get(&table).cloned().unwrap_or_default();

    for (key, value) in &params {
        if key == "where" {
            let mut parts = value.splitn(3, ':');
            let (field, _op, expected) = (parts.next(), parts.next(), parts.next());
            if let (Some(field), Some(expected)) = (field, expected) {
                rows.retain(|row| row.get(field).map(field_text).as_deref() == Some(expected));
            }
        }
    }
    if params.iter().any(|(k, v)| k == "order" && v.ends_with(":desc")) {
        rows.reverse();
    }
    if let Some(limit) = params
        .iter()
        .find(|(k, _)| k == "limit")
        .and_then(|(_, v)| v.parse::<usize>().ok())
    {
        rows.truncate(limit);
    }
    envelope(Value::Array(rows))
}

async fn create_row(
    State(backend): State<Shared>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Map<String, Value>>,
) -> Response {
    if !authorized(&headers) {
        return forbidden();
    }
    let id = {
        let mut next = backend.next_id.lock().unwrap();
        *next += 1;
        *next
    };
    let mut row = body;
    row.insert("id".to_string(), json!(id));
    row.insert("created_at".to_string(), json!(chrono::Utc::now()));
    let row = Value::Object(row);

    backend
        .tables
        .lock()
        .unwrap()
        .entry(table)
        .or_default()
        .push(row.clone());
    envelope(row)
}

async fn get_row(
    State(backend): State<Shared>,
    Path((table, id)): Path<(String, u64)>,
) -> Response {
    let tables = backend.tables.lock().unwrap();
    tables
        .get(&table)
        .and_then(|rows| rows.iter().find(|r| r["id"] == json!(id)))
        .map(|row| envelope(row.clone()))
        .unwrap_or_else(not_found)
}

async fn patch_row(
    State(backend): State<Shared>,
    Path((table, id)): Path<(String, u64)>,
    Json(changes): Json<Map<String, Value>>,
) -> Response {
    let mut tables = backend.tables.lock().unwrap();
    let Some(row) = tables
        .get_mut(&table)
        .and_then(|rows| rows.iter_mut().find(|r| r["id"] == json!(id)))
    else {
        return not_found();
    };
    if let Value::Object(fields) = row {
        fields.extend(changes);
    }
    envelope(row.clone())
}

async fn spawn_backend() -> (HttpStore, Shared) {
    let backend = Shared::default();
    let router = Router::new()
        .route("/db/:table", get(list_rows).post(create_row))
        .route("/db/:table/:id", get(get_row).patch(patch_row))
        .with_state(backend.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let store = HttpStore::new(
        &format!("http://{addr}/"),
        SERVICE_KEY,
        Duration::from_secs(5),
    )
    .unwrap();
    (store, backend)
}

fn new_agent(name: &str, key: &str) -> NewAgent {
    NewAgent {
        agent_name: name.to_string(),
        api_key: key.to_string(),
        wallet_address: None,
        subscription_tier: Tier::Pro,
        status: AgentStatus::Active,
    }
}

fn signature(hash: &str) -> ThreatSignature {
    ThreatSignature {
        id: None,
        signature_hash: hash.to_string(),
        threat_type: "prompt_injection".to_string(),
        pattern: "ignore previous instructions".to_string(),
        description: "Attempt to override instructions".to_string(),
        severity: Severity::Critical,
        times_blocked: 1,
        source_agent_id: Some(1),
        created_at: None,
    }
}

#[tokio::test]
async fn test_agent_lookup_by_key_and_id() {
    let (store, _) = spawn_backend().await;

    let created = store.create_agent(new_agent("scout", "ais_one")).await.unwrap();
    store.create_agent(new_agent("other", "ais_two")).await.unwrap();

    let found = store.agent_by_api_key("ais_one").await.unwrap().unwrap();
    assert_eq!(found.id, created.id);
    assert_eq!(found.subscription_tier, Tier::Pro);
    assert!(found.created_at.is_some());

    assert!(store.agent_by_api_key("ais_missing").await.unwrap().is_none());
    assert_eq!(
        store.agent_by_id(created.id).await.unwrap().unwrap().agent_name,
        "scout"
    );
    assert!(store.agent_by_id(999).await.unwrap().is_none());
}

#[tokio::test]
async fn test_partial_update() {
    let (store, _) = spawn_backend().await;
    let agent = store.create_agent(new_agent("scout", "ais_one")).await.unwrap();

    let updated = store
        .update_agent(
            agent.id,
            &AgentUpdate {
                threats_blocked: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.threats_blocked, 4);
    assert_eq!(updated.requests_total, agent.requests_total);

    let err = store
        .update_agent(999, &AgentUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AisError::NotFound(_)));
}

#[tokio::test]
async fn test_signature_upsert_bumps_count() {
    let (store, backend) = spawn_backend().await;

    let first = store.record_signature(&signature("aaaa")).await.unwrap();
    assert_eq!(first.times_blocked, 1);
    let again = store.record_signature(&signature("aaaa")).await.unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.times_blocked, 2);
    store.record_signature(&signature("bbbb")).await.unwrap();

    let feed = store.threat_feed(10, Some("prompt_injection")).await.unwrap();
    assert_eq!(feed.len(), 2);
    assert_eq!(feed[0].signature_hash, "bbbb");
    assert!(store.threat_feed(10, Some("dangerous_url")).await.unwrap().is_empty());

    assert_eq!(backend.tables.lock().unwrap()["ais_threats"].len(), 2);
}

#[tokio::test]
async fn test_events_newest_first() {
    let (store, _) = spawn_backend().await;

    for tool in ["first", "second", "third"] {
        store
            .log_event(&Event {
                agent_id: 7,
                event_type: EventType::ToolCall,
                tool_name: tool.to_string(),
                request_data: None,
                decision: EventDecision::Allow,
                threat_detected: false,
                threat_type: None,
                latency_ms: 1,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();
    }

    let events = store.events_for_agent(7, 2).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].tool_name, "third");
    assert!(store.events_for_agent(8, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_service_key_is_store_error() {
    let (store, _) = spawn_backend().await;
    let intruder = HttpStore::new(store.base_url(), "wrong", Duration::from_secs(5)).unwrap();

    let err = intruder.list_agents(10).await.unwrap_err();

    let AisError::Store(message) = err else {
        panic!("expected store error, got {err:?}");
    };
    assert!(message.contains("forbidden"), "{message}");
}
