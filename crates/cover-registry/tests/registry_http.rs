//! HTTP-level tests for the registry against stub instrumented services.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use cover_registry::{
    CoverClient, FileStore, ProfileParam, Registry, RegistryError, RegistrySettings,
};

struct Harness {
    _dir: tempfile::TempDir,
    base_url: String,
    client: CoverClient,
    http: reqwest::Client,
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    format!("http://{addr}")
}

async fn start_registry(ip_revise: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("_svrs_address.txt")).unwrap();
    let registry = Registry::new(
        store,
        RegistrySettings {
            ip_revise,
            service_timeout: Duration::from_secs(5),
        },
    )
    .unwrap();
    let base_url = serve(registry.router()).await;
    let client = CoverClient::new(&base_url, Duration::from_secs(5)).unwrap();
    Harness {
        _dir: dir,
        base_url,
        client,
        http: reqwest::Client::new(),
    }
}

/// A stub instrumented service serving a fixed profile and counting clears.
async fn start_service(profile: &'static str, clears: Arc<AtomicUsize>) -> String {
    let router = Router::new()
        .route("/v1/cover/coverage", get(move || async move { profile }))
        .route(
            "/v1/cover/clear",
            post(move || {
                let clears = clears.clone();
                async move {
                    clears.fetch_add(1, Ordering::SeqCst);
                    "clear call successfully"
                }
            }),
        );
    serve(router).await
}

async fn dead_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

impl Harness {
    async fn register(&self, name: &str, address: &str) -> reqwest::Response {
        self.http
            .post(format!("{}/v1/cover/register", self.base_url))
            .query(&[("name", name), ("address", address)])
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn profile_merges_registered_services() {
    let h = start_registry(true).await;
    let clears = Arc::new(AtomicUsize::new(0));
    let a = start_service("mode: count\napp/a.go:1.1,2.2 1 2\n", clears.clone()).await;
    let b = start_service("mode: count\napp/a.go:1.1,2.2 1 3\napp/b.go:4.1,5.2 2 0\n", clears).await;

    assert!(h.register("web", &a).await.status().is_success());
    assert!(h.register("api", &b).await.status().is_success());

    let raw = h.client.profile(&ProfileParam::default()).await.unwrap();
    assert_eq!(
        String::from_utf8(raw).unwrap(),
        "mode: count\napp/a.go:1.1,2.2 1 5\napp/b.go:4.1,5.2 2 0\n"
    );

    let only_api = ProfileParam {
        service: vec!["api".to_string()],
        skipfile: vec!["b\\.go$".to_string()],
        ..ProfileParam::default()
    };
    let raw = h.client.profile(&only_api).await.unwrap();
    assert_eq!(String::from_utf8(raw).unwrap(), "mode: count\napp/a.go:1.1,2.2 1 3\n");
}

#[tokio::test]
async fn profile_without_services_is_client_error() {
    let h = start_registry(true).await;
    let err = h.client.profile(&ProfileParam::default()).await.unwrap_err();
    match err {
        RegistryError::Upstream { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("error"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_service_fails_unless_forced() {
    let h = start_registry(true).await;
    let live = start_service("mode: set\nx.go:1.1,1.5 1 1\n", Arc::default()).await;
    let dead = dead_address().await;
    h.register("live", &live).await;
    h.register("dead", &dead).await;

    let err = h.client.profile(&ProfileParam::default()).await.unwrap_err();
    assert!(matches!(err, RegistryError::Upstream { status: 500, .. }));

    let forced = ProfileParam {
        force: true,
        ..ProfileParam::default()
    };
    let raw = h.client.profile(&forced).await.unwrap();
    assert_eq!(String::from_utf8(raw).unwrap(), "mode: set\nx.go:1.1,1.5 1 1\n");
}

#[tokio::test]
async fn register_revises_host_from_forwarded_for() {
    let h = start_registry(true).await;
    let resp = h
        .http
        .post(format!("{}/v1/cover/register", h.base_url))
        .query(&[("name", "web"), ("address", "http://172.17.0.3:7001")])
        .header("X-Forwarded-For", "10.9.9.9")
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let services = h.client.list().await.unwrap();
    assert_eq!(services["web"], vec!["http://10.9.9.9:7001"]);
}

#[tokio::test]
async fn register_without_revise_keeps_address() {
    let h = start_registry(false).await;
    h.register("web", "172.17.0.3:7001").await;

    let services = h.client.list().await.unwrap();
    assert_eq!(services["web"], vec!["http://172.17.0.3:7001"]);
}

#[tokio::test]
async fn clear_remove_and_init() {
    let h = start_registry(true).await;
    let clears = Arc::new(AtomicUsize::new(0));
    let a = start_service("mode: set\n", clears.clone()).await;
    let b = start_service("mode: set\n", clears.clone()).await;
    h.register("web", &a).await;
    h.register("api", &b).await;

    let resp = h
        .http
        .post(format!("{}/v1/cover/clear", h.base_url))
        .json(&serde_json::json!({ "service": ["web"] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(clears.load(Ordering::SeqCst), 1);

    let resp = h
        .http
        .post(format!("{}/v1/cover/remove", h.base_url))
        .json(&serde_json::json!({ "service": ["web"] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let services = h.client.list().await.unwrap();
    assert!(!services.contains_key("web"));
    assert!(services.contains_key("api"));

    let resp = h
        .http
        .post(format!("{}/v1/cover/init", h.base_url))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(h.client.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_profile_body_is_bad_request() {
    let h = start_registry(true).await;
    let resp = h
        .http
        .post(format!("{}/v1/cover/profile", h.base_url))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn profile_query_string_filters() {
    let h = start_registry(true).await;
    let a = start_service("mode: set\nweb.go:1.1,1.5 1 1\n", Arc::default()).await;
    let b = start_service("mode: set\napi.go:1.1,1.5 1 0\n", Arc::default()).await;
    h.register("web", &a).await;
    h.register("api", &b).await;

    let raw = h.client.profile_query(Some("service=api")).await.unwrap();
    assert_eq!(String::from_utf8(raw).unwrap(), "mode: set\napi.go:1.1,1.5 1 0\n");

    let raw = h.client.profile_query(None).await.unwrap();
    assert_eq!(
        String::from_utf8(raw).unwrap(),
        "mode: set\napi.go:1.1,1.5 1 0\nweb.go:1.1,1.5 1 1\n"
    );
}
