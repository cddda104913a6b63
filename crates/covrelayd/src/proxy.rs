//! Public HTTP surface.
//!
//! Register, clear, init, list and remove are relayed verbatim to the
//! internal server. The two profile routes fetch the merged profile
//! through [`CoverClient`], hand a [`CoverageReport`] to the publisher and
//! answer with the coverage plus provenance. Publication never affects the
//! response. A profile the internal server refuses is a 500 carrying its
//! `error` message.
//!
//! When a caller disconnects, axum drops the handler future and with it
//! the in-flight internal call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, RawQuery, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use cover_registry::{CoverClient, ProfileParam};
use covrelay_core::{CoverageReport, Provenance, Publisher};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use crate::error::RelayError;

/// Largest request body relayed to the internal server.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "host",
    "content-length",
];

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Timeout for each call to the internal server.
    pub upstream_timeout: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(30),
        }
    }
}

/// Body of a successful profile response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub repo: String,
    pub branch: String,
    pub commit: String,
    pub coverage: String,
}

struct Inner {
    base_url: String,
    http_client: reqwest::Client,
    cover_client: CoverClient,
    provenance: Provenance,
    publisher: Publisher,
}

/// Shared state of the public router. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    /// Front the internal server at `base_url`. `provenance` is fixed for
    /// the life of the relay.
    pub fn new(
        base_url: &str,
        provenance: Provenance,
        publisher: Publisher,
        settings: RelaySettings,
    ) -> Result<Self, RelayError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let http_client = reqwest::Client::builder()
            .timeout(settings.upstream_timeout)
            .build()?;
        let cover_client = CoverClient::new(&base_url, settings.upstream_timeout)?;
        Ok(Self {
            inner: Arc::new(Inner {
                base_url,
                http_client,
                cover_client,
                provenance,
                publisher,
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/cover/register", post(pass_through))
            .route("/v1/cover/profile", get(profile_get).post(profile_post))
            .route("/v1/cover/clear", post(pass_through))
            .route("/v1/cover/init", post(pass_through))
            .route("/v1/cover/list", get(pass_through))
            .route("/v1/cover/remove", post(pass_through))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    /// Attach provenance to `raw`, queue the report and build the response.
    fn enrich(&self, raw: Vec<u8>) -> ProfileResponse {
        let coverage = String::from_utf8_lossy(&raw).into_owned();
        let provenance = &self.inner.provenance;
        self.inner
            .publisher
            .submit(CoverageReport::assemble(provenance, coverage.clone()));

        let repo = &provenance.repository;
        ProfileResponse {
            repo: repo.remote_url.clone(),
            branch: repo.branch.clone(),
            commit: repo.commit.clone(),
            coverage,
        }
    }
}

async fn profile_get(
    State(relay): State<Relay>,
    RawQuery(query): RawQuery,
) -> Result<Json<ProfileResponse>, RelayError> {
    let raw = relay
        .inner
        .cover_client
        .profile_query(query.as_deref())
        .await
        .map_err(RelayError::profile_fetch)?;
    Ok(Json(relay.enrich(raw)))
}

async fn profile_post(
    State(relay): State<Relay>,
    body: Bytes,
) -> Result<Json<ProfileResponse>, RelayError> {
    let param: ProfileParam = if body.iter().all(u8::is_ascii_whitespace) {
        ProfileParam::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| RelayError::BadRequest(e.to_string()))?
    };
    let raw = relay
        .inner
        .cover_client
        .profile(&param)
        .await
        .map_err(RelayError::profile_fetch)?;
    Ok(Json(relay.enrich(raw)))
}

async fn pass_through(
    State(relay): State<Relay>,
    peer: Option<ConnectInfo<SocketAddr>>,
    req: Request,
) -> Result<Response, RelayError> {
    let span = info_span!(
        "proxy",
        request_id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );
    forward(&relay, peer.map(|ConnectInfo(addr)| addr), req)
        .instrument(span)
        .await
}

async fn forward(
    relay: &Relay,
    peer: Option<SocketAddr>,
    req: Request,
) -> Result<Response, RelayError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let url = format!("{}{}", relay.inner.base_url, path_and_query);

    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| RelayError::BadRequest(e.to_string()))?;

    let mut headers = end_to_end_headers(&parts.headers);
    if let Some(peer) = peer {
        append_forwarded_for(&mut headers, peer);
    }

    let upstream = relay
        .inner
        .http_client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|e| RelayError::UpstreamUnreachable(e.to_string()))?;

    let status = upstream.status();
    let headers = end_to_end_headers(upstream.headers());
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| RelayError::UpstreamUnreachable(e.to_string()))?;
    debug!(%status, bytes = bytes.len(), "relayed response");

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || name.starts_with("proxy-")
}

/// Copy of `headers` without hop-by-hop, `host` and `content-length`.
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert("x-forwarded-for", value);
    }
}
