//! End-to-end tests: a relay in front of a stub or real coverage engine,
//! with in-memory brokers standing in for AMQP.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::RawQuery;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use cover_registry::{FileStore, ProfileParam, Registry, RegistrySettings, ServiceMap};
use covrelay_core::fakes::{FailingBroker, RecordingBroker};
use covrelay_core::{
    CiContext, CiProvider, Provenance, Publisher, RepositoryIdentity, EXCHANGE, ROUTING_KEY,
};
use covrelayd::{CoverageServer, InternalServer, ProfileResponse, Relay, RelaySettings};
use tokio::net::TcpListener;

const PROFILE: &str = "mode: count\napp/main.go:10.13,12.2 1 4\n";
const SETTLE: Duration = Duration::from_secs(2);

/// Engine double: a fixed profile, an echoing register route and a
/// 400 for unknown services on profile POST.
struct StubEngine;

impl CoverageServer for StubEngine {
    fn route(&self) -> Router {
        Router::new()
            .route("/v1/cover/profile", get(|| async { PROFILE }).post(stub_profile_post))
            .route("/v1/cover/register", post(stub_register))
            .route("/v1/cover/list", get(|| async { Json(ServiceMap::new()) }))
    }
}

async fn stub_profile_post(Json(param): Json<ProfileParam>) -> axum::response::Response {
    if param.service.iter().any(|s| s == "missing") {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "service not registered: missing" })),
        )
            .into_response();
    }
    PROFILE.into_response()
}

async fn stub_register(RawQuery(query): RawQuery, headers: HeaderMap) -> impl IntoResponse {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    (
        StatusCode::CREATED,
        [("x-engine", "stub")],
        format!("{}|{}", query.unwrap_or_default(), forwarded),
    )
}

fn provenance() -> Provenance {
    Provenance::new(
        RepositoryIdentity {
            remote_url: "https://github.com/acme/widgets.git".to_string(),
            repository_id: "1296269".to_string(),
            branch: "main".to_string(),
            commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
        },
        CiContext::from_lookup(|key| match key {
            "BUILD_NUMBER" => Some("42".to_string()),
            "JOB_NAME" => Some("nightly".to_string()),
            _ => None,
        }),
    )
}

async fn start_relay(base_url: &str, publisher: Publisher) -> String {
    let relay = Relay::new(base_url, provenance(), publisher, RelaySettings::default()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(covrelayd::serve(listener, relay, std::future::pending()));
    format!("http://{addr}")
}

fn dead_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

async fn get_profile(relay: &str) -> reqwest::Response {
    reqwest::get(format!("{relay}/v1/cover/profile")).await.unwrap()
}

#[tokio::test]
async fn profile_without_broker_returns_coverage_and_provenance() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let publisher = Publisher::disabled();
    assert!(!publisher.is_enabled());
    let relay = start_relay(engine.base_url(), publisher).await;

    let resp = get_profile(&relay).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: ProfileResponse = resp.json().await.unwrap();
    assert_eq!(
        body,
        ProfileResponse {
            repo: "https://github.com/acme/widgets.git".to_string(),
            branch: "main".to_string(),
            commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
            coverage: PROFILE.to_string(),
        }
    );
}

#[tokio::test]
async fn profile_publishes_enriched_report() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let broker = RecordingBroker::new();
    let relay = start_relay(engine.base_url(), Publisher::spawn(broker.clone(), 8)).await;

    assert!(get_profile(&relay).await.status().is_success());

    let published = broker.wait_for(1, SETTLE).await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, EXCHANGE);
    assert_eq!(published[0].routing_key, ROUTING_KEY);

    let report = published[0].report();
    assert_eq!(report.repo, "https://github.com/acme/widgets.git");
    assert_eq!(report.repo_id, "1296269");
    assert_eq!(report.ci.provider, Some(CiProvider::Jenkins));
    assert_eq!(report.ci.pipeline_id, "42");
    assert_eq!(report.ci.job_id, "nightly");
    assert_eq!(report.coverage.format, "goc");
    assert_eq!(report.coverage.raw, PROFILE);
    assert!(report.timestamp > 0);
}

#[tokio::test]
async fn internal_server_down_is_server_error_without_publish() {
    let broker = RecordingBroker::new();
    let relay = start_relay(&dead_address(), Publisher::spawn(broker.clone(), 8)).await;

    let resp = get_profile(&relay).await;
    assert!(resp.status().is_server_error());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn publish_failure_does_not_affect_response() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let broker = FailingBroker::new();
    let relay = start_relay(engine.base_url(), Publisher::spawn(broker.clone(), 8)).await;

    let resp = get_profile(&relay).await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: ProfileResponse = resp.json().await.unwrap();
    assert_eq!(body.coverage, PROFILE);

    let deadline = tokio::time::Instant::now() + SETTLE;
    while broker.attempts() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(broker.attempts(), 1);
}

#[tokio::test]
async fn repeated_profiles_are_identical_with_ordered_timestamps() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let broker = RecordingBroker::new();
    let relay = start_relay(engine.base_url(), Publisher::spawn(broker.clone(), 8)).await;

    for _ in 0..3 {
        assert!(get_profile(&relay).await.status().is_success());
    }

    let reports: Vec<_> = broker
        .wait_for(3, SETTLE)
        .await
        .iter()
        .map(|p| p.report())
        .collect();
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.coverage.raw == PROFILE));
    assert!(reports.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn profile_post_engine_rejection_is_server_error() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let broker = RecordingBroker::new();
    let relay = start_relay(engine.base_url(), Publisher::spawn(broker.clone(), 8)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{relay}/v1/cover/profile"))
        .json(&serde_json::json!({ "service": ["missing"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "service not registered: missing");

    let resp = client
        .post(format!("{relay}/v1/cover/profile"))
        .json(&serde_json::json!({ "service": ["web"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(broker.wait_for(1, SETTLE).await.len(), 1);
}

#[tokio::test]
async fn empty_registry_profile_is_server_error_with_engine_message() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("_svrs_address.txt")).unwrap();
    let registry = Registry::new(store, RegistrySettings::default()).unwrap();
    let engine = InternalServer::start(registry).await.unwrap();
    let broker = RecordingBroker::new();
    let relay = start_relay(engine.base_url(), Publisher::spawn(broker.clone(), 8)).await;

    let resp = get_profile(&relay).await;
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "no service registered or selected");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn profile_post_with_malformed_body_is_bad_request() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let relay = start_relay(engine.base_url(), Publisher::disabled()).await;

    let resp = reqwest::Client::new()
        .post(format!("{relay}/v1/cover/profile"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn pass_through_relays_status_headers_and_body() {
    let engine = InternalServer::start(StubEngine).await.unwrap();
    let relay = start_relay(engine.base_url(), Publisher::disabled()).await;

    let resp = reqwest::Client::new()
        .post(format!("{relay}/v1/cover/register?name=web&address=10.0.0.5:7001"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    assert_eq!(resp.headers()["x-engine"], "stub");
    assert_eq!(
        resp.text().await.unwrap(),
        "name=web&address=10.0.0.5:7001|127.0.0.1"
    );
}

#[tokio::test]
async fn pass_through_with_engine_down_is_server_error() {
    let relay = start_relay(&dead_address(), Publisher::disabled()).await;

    let resp = reqwest::get(format!("{relay}/v1/cover/list")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn registry_behind_relay_sees_caller_address() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("_svrs_address.txt")).unwrap();
    let registry = Registry::new(store, RegistrySettings::default()).unwrap();
    let engine = InternalServer::start(registry).await.unwrap();
    let relay = start_relay(engine.base_url(), Publisher::disabled()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{relay}/v1/cover/register"))
        .query(&[("name", "web"), ("address", "http://10.0.0.5:7001")])
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let services: ServiceMap = client
        .get(format!("{relay}/v1/cover/list"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services["web"], vec!["http://127.0.0.1:7001"]);

    let resp = client
        .post(format!("{relay}/v1/cover/init"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let services: ServiceMap = reqwest::get(format!("{relay}/v1/cover/list"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(services.is_empty());
}
