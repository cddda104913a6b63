//! Structured observability events for the relay lifecycle.
//!
//! Events carry an `event` field so they can be filtered in JSON output
//! (`--json`). Level defaults to `info`, overridable through `RUST_LOG`.

use tracing::{info, warn};

use crate::ci::CiContext;
use crate::error::PublishError;
use crate::provenance::RepositoryIdentity;
use crate::report::CoverageReport;

/// Emit event: provenance resolved at startup.
pub fn emit_provenance_resolved(repo: &RepositoryIdentity, ci: &CiContext) {
    info!(
        event = "provenance.resolved",
        repo = %repo.remote_url,
        repo_id = %repo.repository_id,
        branch = %repo.branch,
        commit = %repo.commit,
        ci_provider = ci.provider.map(|p| p.as_str()).unwrap_or("unknown"),
        pipeline_id = %ci.pipeline_id,
        job_id = %ci.job_id,
    );
}

/// Emit event: a report reached the broker.
pub fn emit_report_published(report: &CoverageReport) {
    info!(
        event = "report.published",
        repo = %report.repo,
        branch = %report.branch,
        commit = %report.commit,
        timestamp = report.timestamp,
        bytes = report.coverage.raw.len(),
    );
}

/// Emit event: a report could not be published (warning level).
pub fn emit_report_publish_failed(report: &CoverageReport, error: &PublishError) {
    warn!(
        event = "report.publish_failed",
        repo = %report.repo,
        commit = %report.commit,
        error = %error,
    );
}

/// Emit event: a report was dropped before reaching the publisher.
pub fn emit_report_dropped(reason: &str) {
    warn!(event = "report.dropped", reason = reason);
}

/// Emit event: the internal coverage server is accepting connections.
pub fn emit_internal_server_started(base_url: &str) {
    info!(event = "internal_server.started", base_url = %base_url);
}

/// Emit event: the internal coverage server stopped.
pub fn emit_internal_server_stopped(base_url: &str, error: Option<&dyn std::fmt::Display>) {
    match error {
        Some(e) => warn!(event = "internal_server.stopped", base_url = %base_url, error = %e),
        None => warn!(event = "internal_server.stopped", base_url = %base_url),
    }
}
