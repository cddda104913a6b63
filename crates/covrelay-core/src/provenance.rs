//! Startup-time provenance: repository identity plus CI context.
//!
//! Both halves are resolved once before the public listener accepts
//! traffic and shared read-only afterwards. Later commits or checkouts
//! are not observed; the identity describes the tree the relay started in.

use std::path::Path;

use serde::Serialize;
use tracing::warn;

use crate::ci::CiContext;
use crate::git;
use crate::obs;
use crate::repo_identity::RepoIdentityResolver;

/// Repository fields attached to every report. Unresolved fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryIdentity {
    pub remote_url: String,
    pub repository_id: String,
    pub branch: String,
    pub commit: String,
}

impl RepositoryIdentity {
    /// Resolve the identity of the repository enclosing `start`.
    ///
    /// Never fails: every problem is logged as a warning and leaves the
    /// corresponding field empty. Without a `resolver` the repository id
    /// lookup is skipped.
    pub async fn resolve(start: &Path, resolver: Option<&RepoIdentityResolver>) -> Self {
        let meta = match git::inspect(start) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(error = %e, "failed to read git metadata, using empty values");
                return Self::default();
            }
        };

        for failure in &meta.failures {
            warn!(field = failure.field, error = %failure.error, "git metadata field unresolved");
        }

        let mut identity = RepositoryIdentity {
            remote_url: meta.remote_url.unwrap_or_default(),
            repository_id: String::new(),
            branch: meta.branch.unwrap_or_default(),
            commit: meta.commit.unwrap_or_default(),
        };

        if let (Some(resolver), false) = (resolver, identity.remote_url.is_empty()) {
            match resolver.resolve(&identity.remote_url).await {
                Ok(id) => identity.repository_id = id,
                Err(e) => {
                    warn!(remote = %identity.remote_url, error = %e, "failed to resolve repository id")
                }
            }
        }

        identity
    }
}

/// Immutable provenance shared by every request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub repository: RepositoryIdentity,
    pub ci: CiContext,
}

impl Provenance {
    pub fn new(repository: RepositoryIdentity, ci: CiContext) -> Self {
        Self { repository, ci }
    }

    /// Resolve repository identity from `start` and CI context from the
    /// process environment.
    pub async fn discover(start: &Path, resolver: Option<&RepoIdentityResolver>) -> Self {
        let repository = RepositoryIdentity::resolve(start, resolver).await;
        let ci = CiContext::detect();
        obs::emit_provenance_resolved(&repository, &ci);
        Self { repository, ci }
    }
}
