//! HTTP surface of the coverage registry.
//!
//! Instrumented services register their coverage endpoint here; profile
//! requests fan out to every selected service, merge the returned profiles
//! and answer with a single `text/plain` profile.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::{RegistryError, Result};
use crate::profile::{compile_patterns, Profile};
use crate::store::{FileStore, ServiceMap};

/// Path instrumented services serve their raw profile on.
pub const SERVICE_COVERAGE_PATH: &str = "/v1/cover/coverage";

/// Path instrumented services reset their counters on.
pub const SERVICE_CLEAR_PATH: &str = "/v1/cover/clear";

/// Settings injected at construction.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Rewrite a registrant's host to the observed client IP.
    pub ip_revise: bool,
    /// Timeout for calls to instrumented services.
    pub service_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            ip_revise: true,
            service_timeout: Duration::from_secs(30),
        }
    }
}

/// Profile selection and filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileParam {
    /// Skip unreachable services instead of failing.
    pub force: bool,
    pub service: Vec<String>,
    pub address: Vec<String>,
    /// Keep only files matching one of these patterns.
    pub coverfile: Vec<String>,
    /// Drop files matching one of these patterns.
    pub skipfile: Vec<String>,
}

/// Query-string form of [`ProfileParam`]; list fields are comma separated.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileQuery {
    force: bool,
    service: Option<String>,
    address: Option<String>,
    coverfile: Option<String>,
    skipfile: Option<String>,
}

impl From<ProfileQuery> for ProfileParam {
    fn from(q: ProfileQuery) -> Self {
        let split = |v: Option<String>| -> Vec<String> {
            v.map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
        };
        ProfileParam {
            force: q.force,
            service: split(q.service),
            address: split(q.address),
            coverfile: split(q.coverfile),
            skipfile: split(q.skipfile),
        }
    }
}

/// Service/address filter for `clear` and `remove`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectParam {
    pub service: Vec<String>,
    pub address: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegisterQuery {
    name: String,
    address: String,
}

struct Inner {
    store: FileStore,
    settings: RegistrySettings,
    http_client: reqwest::Client,
}

/// The coverage registry engine. Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    pub fn new(store: FileStore, settings: RegistrySettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.service_timeout)
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                settings,
                http_client,
            }),
        })
    }

    pub fn store(&self) -> &FileStore {
        &self.inner.store
    }

    /// The engine's routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/v1/cover/register", post(register))
            .route("/v1/cover/profile", get(profile_get).post(profile_post))
            .route("/v1/cover/clear", post(clear))
            .route("/v1/cover/init", post(init))
            .route("/v1/cover/list", get(list))
            .route("/v1/cover/remove", post(remove))
            .with_state(self.clone())
    }

    /// Record a registrant, revising its host to `client_ip` when enabled.
    pub fn register(&self, name: &str, address: &str, client_ip: Option<IpAddr>) -> Result<String> {
        if name.trim().is_empty() {
            return Err(RegistryError::BadRequest("name must not be empty".to_string()));
        }
        let mut address = normalize_address(address)?;
        if self.inner.settings.ip_revise {
            if let Some(ip) = client_ip {
                address = revise_host(&address, ip);
            }
        }
        if self.inner.store.add(name, &address)? {
            info!(service = name, %address, "service registered");
        }
        Ok(address)
    }

    /// Fetch, merge and filter profiles from the selected services.
    pub async fn profile(&self, param: &ProfileParam) -> Result<Profile> {
        let keep = compile_patterns(&param.coverfile)?;
        let skip = compile_patterns(&param.skipfile)?;
        let addresses = self.inner.store.select(&param.service, &param.address)?;

        let fetches = addresses.iter().map(|addr| self.fetch_profile(addr));
        let results = join_all(fetches).await;

        let mut merged: Option<Profile> = None;
        for (address, result) in addresses.iter().zip(results) {
            let profile = match result {
                Ok(p) => p,
                Err(e) if param.force => {
                    warn!(%address, error = %e, "skipping unreachable service");
                    continue;
                }
                Err(e) => return Err(e),
            };
            merged = Some(match merged.take() {
                Some(mut m) => {
                    m.merge(profile)?;
                    m
                }
                None => profile,
            });
        }

        let mut merged = merged.ok_or(RegistryError::NoServices)?;
        merged.filter_files(&keep, &skip);
        Ok(merged)
    }

    /// Reset counters on the selected services. Returns one line per address.
    pub async fn clear(&self, param: &SelectParam) -> Result<String> {
        let addresses = self.inner.store.select(&param.service, &param.address)?;
        let mut report = String::new();
        for address in &addresses {
            let url = format!("{address}{SERVICE_CLEAR_PATH}");
            let resp = self
                .inner
                .http_client
                .post(&url)
                .send()
                .await
                .map_err(|e| fetch_error(address, e))?;
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(RegistryError::Fetch {
                    address: address.clone(),
                    reason: format!("HTTP {status}: {body}"),
                });
            }
            report.push_str(&format!("{address}: {}\n", body.trim()));
        }
        Ok(report)
    }

    async fn fetch_profile(&self, address: &str) -> Result<Profile> {
        let url = format!("{address}{SERVICE_COVERAGE_PATH}");
        let resp = self
            .inner
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_error(address, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| fetch_error(address, e))?;
        if !status.is_success() {
            return Err(RegistryError::Fetch {
                address: address.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }
        Profile::parse(&body)
    }
}

fn fetch_error(address: &str, e: reqwest::Error) -> RegistryError {
    RegistryError::Fetch {
        address: address.to_string(),
        reason: e.to_string(),
    }
}

/// Accept `host:port` or a full http(s) url; strip any trailing slash.
fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim().trim_end_matches('/');
    if address.is_empty() {
        return Err(RegistryError::BadRequest("address must not be empty".to_string()));
    }
    let full = if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else if address.contains("://") {
        return Err(RegistryError::BadRequest(format!(
            "unsupported address scheme: {address}"
        )));
    } else {
        format!("http://{address}")
    };
    Ok(full)
}

/// Replace the host of `address` with `ip`, keeping scheme and port.
fn revise_host(address: &str, ip: IpAddr) -> String {
    let Some((scheme, rest)) = address.split_once("://") else {
        return address.to_string();
    };
    let (host_port, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    let port = match host_port.rsplit_once(':') {
        Some((_, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => Some(port),
        _ => None,
    };
    let host = match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    };
    match port {
        Some(port) => format!("{scheme}://{host}:{port}{path}"),
        None => format!("{scheme}://{host}{path}"),
    }
}

/// Observed client IP: `X-Forwarded-For`, then `X-Real-IP`, then the peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok());
    let real = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    };
    forwarded.or_else(real).or(peer.map(|p| p.ip()))
}

fn parse_body<T: Default + serde::de::DeserializeOwned>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| RegistryError::BadRequest(e.to_string()))
}

async fn register(
    State(registry): State<Registry>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<RegisterQuery>,
) -> Result<Json<serde_json::Value>> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    let address = registry.register(&query.name, &query.address, ip)?;
    Ok(Json(json!({ "result": "success", "address": address })))
}

async fn profile_get(
    State(registry): State<Registry>,
    Query(query): Query<ProfileQuery>,
) -> Result<impl IntoResponse> {
    let profile = registry.profile(&ProfileParam::from(query)).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], profile.to_string()))
}

async fn profile_post(State(registry): State<Registry>, body: Bytes) -> Result<impl IntoResponse> {
    let param: ProfileParam = parse_body(&body)?;
    let profile = registry.profile(&param).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], profile.to_string()))
}

async fn clear(State(registry): State<Registry>, body: Bytes) -> Result<String> {
    let param: SelectParam = parse_body(&body)?;
    registry.clear(&param).await
}

async fn init(State(registry): State<Registry>) -> Result<Json<serde_json::Value>> {
    registry.store().clear_all()?;
    info!("registry initialised");
    Ok(Json(json!({ "result": "success" })))
}

async fn list(State(registry): State<Registry>) -> Json<ServiceMap> {
    Json(registry.store().snapshot())
}

async fn remove(
    State(registry): State<Registry>,
    body: Bytes,
) -> Result<Json<serde_json::Value>> {
    let param: SelectParam = parse_body(&body)?;
    if param.service.is_empty() && param.address.is_empty() {
        return Err(RegistryError::BadRequest(
            "service or address required".to_string(),
        ));
    }
    let removed = registry.store().remove(&param.service, &param.address)?;
    Ok(Json(json!({ "result": "success", "removed": removed })))
}
