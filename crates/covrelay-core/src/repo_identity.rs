//! Resolve a git remote url into the hosting provider's repository id.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::IdentityError;

/// Default repository-metadata API base.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Identifying client header sent with every lookup.
pub const USER_AGENT: &str = "covrelay";

/// Upper bound on a single repository lookup.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// `owner/name` pair extracted from a remote url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSlug {
    pub owner: String,
    pub name: String,
}

impl std::fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

const REMOTE_PATTERNS: [&str; 3] = [
    r"(?i)^https?://github\.com/([^/]+)/([^/]+)$",
    r"(?i)^git@github\.com:([^/]+)/([^/]+)$",
    r"(?i)^git://github\.com/([^/]+)/([^/]+)$",
];

fn remote_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        REMOTE_PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = *p, error = %e, "skipping invalid remote pattern");
                    None
                }
            })
            .collect()
    })
}

/// Parse a remote url in https, scp-like ssh or git-protocol form.
pub fn parse_remote(remote_url: &str) -> Result<RepoSlug, IdentityError> {
    let trimmed = remote_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

    remote_patterns()
        .iter()
        .find_map(|re| re.captures(trimmed))
        .map(|caps| RepoSlug {
            owner: caps[1].to_string(),
            name: caps[2].to_string(),
        })
        .ok_or_else(|| IdentityError::UnparsableRemote(remote_url.to_string()))
}

#[derive(Deserialize)]
struct RepositoryResponse {
    id: i64,
}

/// Client for the hosting provider's repository-metadata endpoint.
#[derive(Clone)]
pub struct RepoIdentityResolver {
    api_base: String,
    token: Option<String>,
    http_client: reqwest::Client,
}

impl RepoIdentityResolver {
    /// Create a resolver against `api_base` (no trailing slash needed).
    pub fn new(api_base: &str, token: Option<String>) -> Result<Self, IdentityError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(LOOKUP_TIMEOUT)
            .build()?;

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
            http_client,
        })
    }

    /// Look up the numeric repository id for `remote_url`, rendered as a string.
    pub async fn resolve(&self, remote_url: &str) -> Result<String, IdentityError> {
        let slug = parse_remote(remote_url)?;
        let url = format!("{}/repos/{}/{}", self.api_base, slug.owner, slug.name);
        debug!(%slug, %url, "looking up repository id");

        let mut request = self
            .http_client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentityError::LookupFailed {
                status: status.as_u16(),
                body,
            });
        }

        let repo: RepositoryResponse = response.json().await?;
        Ok(repo.id.to_string())
    }
}
