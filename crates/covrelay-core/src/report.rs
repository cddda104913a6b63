//! The structured coverage report published to the broker.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ci::CiContext;
use crate::error::PublishError;
use crate::provenance::Provenance;

/// Format tag for profiles produced by the coverage registry.
pub const COVERAGE_FORMAT: &str = "goc";

/// Raw coverage payload with its format tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageData {
    pub format: String,
    pub raw: String,
}

/// One coverage snapshot plus provenance. Built per profile request and
/// handed to the publisher; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub repo: String,
    pub repo_id: String,
    pub branch: String,
    pub commit: String,
    pub ci: CiContext,
    pub coverage: CoverageData,
    /// Unix time in whole seconds.
    pub timestamp: i64,
}

impl CoverageReport {
    /// Combine cached provenance with a freshly fetched profile, stamped now.
    pub fn assemble(provenance: &Provenance, raw: String) -> Self {
        Self::assemble_at(provenance, raw, Utc::now().timestamp())
    }

    pub fn assemble_at(provenance: &Provenance, raw: String, timestamp: i64) -> Self {
        let repo = &provenance.repository;
        Self {
            repo: repo.remote_url.clone(),
            repo_id: repo.repository_id.clone(),
            branch: repo.branch.clone(),
            commit: repo.commit.clone(),
            ci: provenance.ci.clone(),
            coverage: CoverageData {
                format: COVERAGE_FORMAT.to_string(),
                raw,
            },
            timestamp,
        }
    }

    /// Serialise to the JSON message body.
    pub fn to_json(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }
}
