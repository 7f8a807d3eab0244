//! Router behaviour over a real socket

use std::sync::Arc;

use madmin_api::AppState;
use madmin_store::{MemorySource, Registry, RegistryConfig, Submission};
use reqwest::StatusCode;
use serde_json::{Value, json};

const TOKEN: &str = "s3cret";

struct TestServer {
    base: String,
    source: Arc<MemorySource>,
    client: reqwest::Client,
}

fn manifest(id: &str, min_version: Option<&str>) -> Vec<u8> {
    let mut document = json!({
        "id": id,
        "name": id,
        "description": "test module",
        "repository": format!("https://github.com/acme/{}", id),
        "author": { "name": "Acme" },
        "category": "security",
        "tags": ["firewall"],
    });
    if let Some(min) = min_version {
        document["requirements"] = json!({ "min_madmin_version": min });
    }
    serde_json::to_vec(&document).unwrap()
}

async fn start(submissions: Vec<Submission>) -> TestServer {
    let source = Arc::new(MemorySource::new(submissions));
    let registry = Registry::in_memory(RegistryConfig::default(), source.clone()).unwrap();
    let state = AppState::new(Arc::new(registry), Some(TOKEN.to_string()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(madmin_api::serve(listener, state, std::future::pending()));

    TestServer {
        base: format!("http://{}", addr),
        source,
        client: reqwest::Client::new(),
    }
}

impl TestServer {
    async fn rebuild(&self) -> Value {
        let response = self
            .client
            .post(format!("{}/v1/rebuild", self.base))
            .bearer_auth(TOKEN)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }
}

#[tokio::test]
async fn test_health_before_first_build() {
    let server = start(vec![]).await;
    let health: Value = reqwest::get(format!("{}/health", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["sequence"], 0);
    assert_eq!(health["modules"], 0);

    let report = reqwest::get(format!("{}/v1/report", server.base)).await.unwrap();
    assert_eq!(report.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_endpoints_require_token() {
    let server = start(vec![Submission::new("a.json", manifest("fail2ban", None))]).await;

    let response = server
        .client
        .post(format!("{}/v1/rebuild", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = server
        .client
        .post(format!("{}/v1/rebuild", server.base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let report = server.rebuild().await;
    assert_eq!(report["outcome"]["status"], "published");
    assert_eq!(report["outcome"]["sequence"], 1);
}

#[tokio::test]
async fn test_index_etag_and_not_modified() {
    let server = start(vec![Submission::new("a.json", manifest("fail2ban", None))]).await;
    server.rebuild().await;

    let response = reqwest::get(format!("{}/v1/index", server.base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let etag = response.headers()["etag"].to_str().unwrap().to_string();
    let body: Value = response.json().await.unwrap();
    assert_eq!(etag, format!("\"{}\"", body["fingerprint"].as_str().unwrap()));
    assert_eq!(body["modules"][0]["id"], "fail2ban");

    let response = server
        .client
        .get(format!("{}/v1/index", server.base))
        .header("If-None-Match", &etag)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

    let response = reqwest::get(format!("{}/v1/index?category=games", server.base))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_module_lookup_respects_client_version() {
    let server = start(vec![Submission::new(
        "crowdsec.json",
        manifest("crowdsec", Some("2.0.0")),
    )])
    .await;
    server.rebuild().await;

    let old: Value = reqwest::get(format!(
        "{}/v1/modules/crowdsec?client_version=1.9.9",
        server.base
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(old["status"], "ineligible");
    assert_eq!(old["reason"]["code"], "client_too_old");

    let new: Value = reqwest::get(format!(
        "{}/v1/modules/crowdsec?client_version=2.5.0",
        server.base
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(new["status"], "found");
    assert_eq!(new["module"]["id"], "crowdsec");

    let missing = reqwest::get(format!("{}/v1/modules/nope", server.base))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_diff_and_review_flow() {
    let server = start(vec![Submission::new("a.json", manifest("fail2ban", None))]).await;
    server.rebuild().await;

    server.source.replace(vec![
        Submission::new("a.json", manifest("fail2ban", None)),
        Submission::new("b.json", manifest("crowdsec", None)),
    ]);
    server.rebuild().await;

    let diff: Value = reqwest::get(format!("{}/v1/index/diff?since=1", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(diff["status"], "diff");
    assert_eq!(diff["added"][0]["id"], "crowdsec");

    let stale: Value = reqwest::get(format!("{}/v1/index/diff?since=99", server.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stale["status"], "full_fetch_required");

    for query in ["since=abc", "since=-1", ""] {
        let response = reqwest::get(format!("{}/v1/index/diff?{}", server.base, query))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "query {:?}", query);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error"]["code"], "bad_request");
        assert!(body["error"]["message"].is_string());
    }

    let review = |target: &str, revision: u64| {
        server
            .client
            .post(format!("{}/v1/reviews", server.base))
            .bearer_auth(TOKEN)
            .json(&json!({
                "identifier": "crowdsec",
                "reviewer": "maintainer",
                "target": target,
                "expected_revision": revision,
            }))
            .send()
    };

    let response = review("verified", 0).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = review("pending", 0).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record: Value = response.json().await.unwrap();
    assert_eq!(record["status"], "pending");
    assert_eq!(record["revision"], 1);

    let response = review("verified", 0).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = server
        .client
        .post(format!("{}/v1/reviews", server.base))
        .bearer_auth(TOKEN)
        .header("Content-Type", "application/json")
        .body("{\"identifier\": 5}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}
