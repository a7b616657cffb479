//! Fake quotes API served by axum on an ephemeral port.

#![allow(dead_code)]

use axum::{
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use quote_relay::config::{BreakerConfig, UpstreamConfig};

/// How the fake answers every request.
#[derive(Debug, Clone)]
pub enum Behavior {
    Healthy,
    /// Reply with this status and an empty JSON body.
    Status(u16),
    /// Reply `status` for the first `failures` requests, then behave healthily.
    FailThenRecover { failures: usize, status: u16 },
    /// Sleep before answering healthily.
    Slow(Duration),
    /// Sleep, then reply with this status.
    SlowStatus(Duration, u16),
    /// 200 with a body that is not JSON.
    Garbage,
    /// `/random` answers `[]`.
    EmptyArray,
}

pub struct FakeState {
    behavior: Mutex<Behavior>,
    hits: AtomicUsize,
    random_served: AtomicUsize,
    failures_served: AtomicUsize,
    requests: Mutex<Vec<String>>,
}

pub struct FakeUpstream {
    pub addr: SocketAddr,
    state: Arc<FakeState>,
}

impl FakeUpstream {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Requests received so far, all paths.
    pub fn hits(&self) -> usize {
        self.state.hits.load(Ordering::SeqCst)
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.state.behavior.lock().unwrap() = behavior;
    }

    /// `path?query` of every request, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().unwrap().clone()
    }
}

pub fn quotes() -> Vec<Value> {
    vec![
        json!({
            "_id": "q1",
            "content": "The only way to do great work is to love what you do.",
            "author": "Steve Jobs",
            "tags": ["inspirational", "work"],
            "authorSlug": "steve-jobs",
            "length": 53,
            "dateAdded": "2023-04-14",
            "dateModified": "2023-04-14"
        }),
        json!({
            "_id": "q2",
            "content": "Life is what happens when you're busy making other plans.",
            "author": "John Lennon",
            "tags": ["life"],
            "authorSlug": "john-lennon",
            "length": 57,
            "dateAdded": "2022-01-02",
            "dateModified": "2023-04-14"
        }),
        json!({
            "_id": "q3",
            "content": "In the middle of difficulty lies opportunity.",
            "author": "Albert Einstein",
            "tags": ["inspirational", "wisdom"],
            "authorSlug": "albert-einstein",
            "length": 45,
            "dateAdded": "2021-06-01T12:30:00Z",
            "dateModified": "2023-04-14"
        }),
        json!({
            "_id": "q4",
            "content": "Simplicity is the ultimate sophistication.",
            "author": "Leonardo da Vinci",
            "tags": ["wisdom"],
            "authorSlug": "leonardo-da-vinci",
            "length": 42,
            "dateAdded": "2020-03-03",
            "dateModified": "2023-04-14"
        }),
    ]
}

pub async fn spawn_upstream(behavior: Behavior) -> FakeUpstream {
    let state = Arc::new(FakeState {
        behavior: Mutex::new(behavior),
        hits: AtomicUsize::new(0),
        random_served: AtomicUsize::new(0),
        failures_served: AtomicUsize::new(0),
        requests: Mutex::new(Vec::new()),
    });

    let app = Router::new().fallback(handle).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeUpstream { addr, state }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(
        uri.path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_default(),
    );

    let behavior = state.behavior.lock().unwrap().clone();
    match behavior {
        Behavior::Healthy => {}
        Behavior::Status(code) => return status(code),
        Behavior::FailThenRecover { failures, status: code } => {
            if state.failures_served.fetch_add(1, Ordering::SeqCst) < failures {
                return status(code);
            }
        }
        Behavior::Slow(delay) => tokio::time::sleep(delay).await,
        Behavior::SlowStatus(delay, code) => {
            tokio::time::sleep(delay).await;
            return status(code);
        }
        Behavior::Garbage => return (StatusCode::OK, "<html>not json</html>").into_response(),
        Behavior::EmptyArray => {
            if uri.path() == "/random" {
                return Json(json!([])).into_response();
            }
        }
    }

    let all = quotes();
    match uri.path() {
        "/random" => {
            let n = state.random_served.fetch_add(1, Ordering::SeqCst);
            Json(all[n % all.len()].clone()).into_response()
        }
        "/quotes" => {
            let limit = limit(&params);
            let results: Vec<Value> = all
                .into_iter()
                .filter(|q| match params.get("tags") {
                    Some(tag) => q["tags"]
                        .as_array()
                        .is_some_and(|tags| tags.iter().any(|t| t == tag.as_str())),
                    None => true,
                })
                .filter(|q| match params.get("author") {
                    Some(author) => q["author"] == author.as_str(),
                    None => true,
                })
                .take(limit)
                .collect();
            Json(json!({ "count": results.len(), "results": results })).into_response()
        }
        "/search/quotes" => {
            let needle = params.get("query").cloned().unwrap_or_default().to_lowercase();
            let results: Vec<Value> = all
                .into_iter()
                .filter(|q| {
                    q["content"]
                        .as_str()
                        .is_some_and(|c| c.to_lowercase().contains(&needle))
                })
                .take(limit(&params))
                .collect();
            Json(json!({ "results": results })).into_response()
        }
        _ => status(404),
    }
}

fn limit(params: &HashMap<String, String>) -> usize {
    params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(20)
}

fn status(code: u16) -> Response {
    let code = StatusCode::from_u16(code).unwrap();
    (code, Json(json!({ "statusCode": code.as_u16() }))).into_response()
}

/// Upstream settings pointed at `url` with short timeouts and 1ms backoff.
pub fn upstream_config(url: &str, retries: u32) -> UpstreamConfig {
    UpstreamConfig {
        base_url: url.to_string(),
        timeout_ms: 500,
        call_timeout_grace_ms: 1000,
        retries,
        backoff_base_ms: 1,
        accept_invalid_certs: false,
    }
}

pub fn breaker_config(reset_timeout_ms: u64) -> BreakerConfig {
    BreakerConfig {
        reset_timeout_ms,
        ..BreakerConfig::default()
    }
}

/// Relay configuration (TOML) pointed at the fake upstream.
pub fn relay_toml(upstream_url: &str, bind: &str, environment: &str) -> String {
    format!(
        r#"[server]
bind = "{bind}"
environment = "{environment}"

[upstream]
base_url = "{upstream_url}"
timeout_ms = 500
retries = 0
backoff_base_ms = 1
"#
    )
}
