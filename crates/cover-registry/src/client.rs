//! HTTP client for a running registry.

use std::time::Duration;

use crate::error::{RegistryError, Result};
use crate::server::ProfileParam;
use crate::store::ServiceMap;

/// Talks to a registry at `base_url` (e.g. `http://127.0.0.1:7778`).
#[derive(Debug, Clone)]
pub struct CoverClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl CoverClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the merged profile as raw bytes.
    ///
    /// Connection failures surface as [`RegistryError::Http`]; non-200
    /// answers as [`RegistryError::Upstream`] with the response body.
    pub async fn profile(&self, param: &ProfileParam) -> Result<Vec<u8>> {
        let req = self
            .http_client
            .post(format!("{}/v1/cover/profile", self.base_url))
            .json(param);
        read_profile(req).await
    }

    /// Same as [`CoverClient::profile`] but with the filters given as a raw
    /// query string (`service=a,b&force=true`).
    pub async fn profile_query(&self, query: Option<&str>) -> Result<Vec<u8>> {
        let url = match query.filter(|q| !q.is_empty()) {
            Some(q) => format!("{}/v1/cover/profile?{q}", self.base_url),
            None => format!("{}/v1/cover/profile", self.base_url),
        };
        read_profile(self.http_client.get(url)).await
    }

    /// Registered services.
    pub async fn list(&self) -> Result<ServiceMap> {
        let resp = self
            .http_client
            .get(format!("{}/v1/cover/list", self.base_url))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RegistryError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json().await?)
    }
}

async fn read_profile(req: reqwest::RequestBuilder) -> Result<Vec<u8>> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.bytes().await?;
    if status != reqwest::StatusCode::OK {
        return Err(RegistryError::Upstream {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        });
    }
    Ok(body.to_vec())
}
