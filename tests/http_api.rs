//! End-to-end HTTP tests: relay router in front of a fake upstream.

mod common;

use common::{relay_toml, spawn_upstream, Behavior, FakeUpstream};
use quote_relay::config::parse_config;
use quote_relay::server;
use serde_json::Value;
use std::time::Duration;

struct Relay {
    base: String,
    http: reqwest::Client,
}

impl Relay {
    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }
}

/// Serve the relay on an ephemeral port. `environment = "test"` keeps the
/// breaker out of the way so every request reaches the fake.
async fn spawn_relay(upstream: &FakeUpstream) -> Relay {
    let cfg = parse_config(&relay_toml(&upstream.url(), "127.0.0.1:0", "test")).unwrap();
    let state = server::build_state(&cfg).unwrap();
    let app = server::router(state, &cfg.server).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Relay {
        base: format!("http://{}", addr),
        http: reqwest::Client::new(),
    }
}

fn ids(body: &Value) -> Vec<String> {
    body["quotes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_random_lookup_like_similar_flow() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    let (status, quote) = relay.get("/api/quotes/random").await;
    assert_eq!(status, 200);
    assert_eq!(quote["id"], "q1");
    assert_eq!(quote["views"], 1);
    assert_eq!(quote["likes"], 0);
    assert_eq!(quote["length"], 53);
    assert!(quote.get("createdAt").is_none());

    let (status, quote) = relay.get("/api/quotes/q1").await;
    assert_eq!(status, 200);
    assert_eq!(quote["views"], 1, "lookup must not count a view");

    let (status, liked) = relay.post("/api/quotes/q1/like").await;
    assert_eq!(status, 200);
    assert_eq!(liked["id"], "q1");
    assert_eq!(liked["likes"], 1);
    assert_eq!(liked["success"], true);

    // Cache holds only q1, so similarity backfills from its first tag.
    let (status, similar) = relay.get("/api/quotes/q1/similar").await;
    assert_eq!(status, 200);
    assert_eq!(ids(&similar), vec!["q3"]);
    assert_eq!(similar["total"], 1);
    assert!(upstream
        .requests()
        .contains(&"/quotes?tags=inspirational&limit=5".to_string()));
}

#[tokio::test]
async fn test_unknown_quote_is_not_found() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    for (status, body) in [
        relay.get("/api/quotes/nope").await,
        relay.post("/api/quotes/nope/like").await,
        relay.get("/api/quotes/nope/similar").await,
    ] {
        assert_eq!(status, 404);
        assert_eq!(body["error"]["code"], "not_found");
        assert_eq!(body["error"]["message"], "Quote not found: nope");
    }
}

#[tokio::test]
async fn test_limit_validation() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    for path in [
        "/api/quotes/top-rated?limit=0",
        "/api/quotes/top-rated?limit=101",
        "/api/quotes/most-viewed?limit=abc",
        "/api/quotes/q1/similar?limit=51",
        "/api/quotes?minLength=x",
    ] {
        let (status, body) = relay.get(path).await;
        assert_eq!(status, 400, "{}", path);
        assert_eq!(body["error"]["code"], "bad_request");
    }

    let (status, _) = relay.get("/api/quotes/top-rated?limit=100").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_no_quotes_available_when_upstream_down_and_cache_empty() {
    let upstream = spawn_upstream(Behavior::Status(500)).await;
    let relay = spawn_relay(&upstream).await;

    let (status, body) = relay.get("/api/quotes/random").await;
    assert_eq!(status, 503);
    assert_eq!(body["error"]["code"], "no_quotes_available");
}

#[tokio::test]
async fn test_random_falls_back_to_cache() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    let (_, first) = relay.get("/api/quotes/random").await;
    assert_eq!(first["id"], "q1");

    upstream.set_behavior(Behavior::Status(503));
    let (status, fallback) = relay.get("/api/quotes/random").await;
    assert_eq!(status, 200);
    assert_eq!(fallback["id"], "q1");
    assert_eq!(fallback["views"], 2);
}

#[tokio::test]
async fn test_listing_filters_and_statistics() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;
    for _ in 0..3 {
        relay.get("/api/quotes/random").await;
    }

    let (_, all) = relay.get("/api/quotes").await;
    assert_eq!(ids(&all), vec!["q1", "q2", "q3"]);
    assert_eq!(all["total"], 3);

    let (_, tagged) = relay.get("/api/quotes?tags=wisdom,life").await;
    assert_eq!(ids(&tagged), vec!["q2", "q3"]);

    let (_, by_author) = relay.get("/api/quotes?author=einstein").await;
    assert_eq!(ids(&by_author), vec!["q3"]);

    let (_, short) = relay.get("/api/quotes?maxLength=50").await;
    assert_eq!(ids(&short), vec!["q3"]);

    let (status, stats) = relay.get("/api/quotes/stats").await;
    assert_eq!(status, 200);
    assert_eq!(stats["totalQuotes"], 3);
    assert_eq!(stats["totalViews"], 3);
    assert_eq!(stats["totalLikes"], 0);
    assert_eq!(stats["averageViews"], 1.0);
}

#[tokio::test]
async fn test_upstream_search_and_author_lookup_warm_the_cache() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    let (status, found) = relay.get("/api/quotes/search?query=sophistication").await;
    assert_eq!(status, 200);
    assert_eq!(ids(&found), vec!["q4"]);
    assert_eq!(found["quotes"][0]["views"], 0);

    let (status, by_author) = relay
        .get("/api/quotes/by-author?author=John%20Lennon&limit=5")
        .await;
    assert_eq!(status, 200);
    assert_eq!(ids(&by_author), vec!["q2"]);
    assert!(upstream
        .requests()
        .contains(&"/quotes?author=John+Lennon&limit=5".to_string()));

    let (_, cached) = relay.get("/api/quotes").await;
    assert_eq!(ids(&cached), vec!["q4", "q2"]);
    let (status, _) = relay.get("/api/quotes/q4").await;
    assert_eq!(status, 200);

    for path in ["/api/quotes/search", "/api/quotes/by-author?author=%20"] {
        let (status, body) = relay.get(path).await;
        assert_eq!(status, 400, "{}", path);
        assert_eq!(body["error"]["code"], "bad_request");
    }
}

#[tokio::test]
async fn test_top_rated_and_most_viewed() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;
    for _ in 0..3 {
        relay.get("/api/quotes/random").await;
    }
    for _ in 0..3 {
        relay.post("/api/quotes/q2/like").await;
    }
    relay.post("/api/quotes/q3/like").await;

    let (status, top) = relay.get("/api/quotes/top-rated?limit=2").await;
    assert_eq!(status, 200);
    assert_eq!(ids(&top), vec!["q2", "q3"]);

    let (_, viewed) = relay.get("/api/quotes/most-viewed").await;
    assert_eq!(ids(&viewed), vec!["q1", "q2", "q3"]);
}

#[tokio::test]
async fn test_health_endpoints() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    let (status, report) = relay.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(report["status"], "healthy");
    assert_eq!(report["environment"], "test");
    assert_eq!(report["circuitBreaker"], "closed");
    assert_eq!(report["checks"]["upstream"]["status"], "healthy");
    assert_eq!(report["checks"]["repository"]["quotesCount"], 0);

    let (status, live) = relay.get("/health/live").await;
    assert_eq!(status, 200);
    assert_eq!(live["status"], "ok");

    upstream.set_behavior(Behavior::Status(500));
    let (_, report) = relay.get("/health").await;
    assert_eq!(report["status"], "degraded");
    assert_eq!(report["checks"]["upstream"]["status"], "unhealthy");

    // Degraded is still ready; only an unhealthy repository fails readiness.
    let (status, ready) = relay.get("/health/ready").await;
    assert_eq!(status, 200);
    assert_eq!(ready["status"], "ready");
}

#[tokio::test]
async fn test_index_lists_endpoints() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let relay = spawn_relay(&upstream).await;

    let (status, index) = relay.get("/").await;
    assert_eq!(status, 200);
    assert_eq!(index["name"], "quote-relay");
    assert!(index["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e == "GET /api/quotes/random"));
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health/live", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("server did not start on port {}", port);
}

#[tokio::test]
async fn test_run_server_binds_configured_address() {
    let upstream = spawn_upstream(Behavior::Healthy).await;
    let port = find_free_port();
    let cfg = parse_config(&relay_toml(
        &upstream.url(),
        &format!("127.0.0.1:{}", port),
        "production",
    ))
    .unwrap();

    tokio::spawn(async move {
        server::run_server(&cfg).await.unwrap();
    });
    wait_for_server(port).await;

    let resp = reqwest::get(format!("http://127.0.0.1:{}/api/quotes/random", port))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let quote: Value = resp.json().await.unwrap();
    assert_eq!(quote["id"], "q1");
}
