//! Error type for the relay and its HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cover_registry::RegistryError;
use covrelay_core::PublishError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    /// The loopback listener for the internal server could not be bound.
    #[error("internal listener unavailable: {0}")]
    ListenerUnavailable(#[source] std::io::Error),

    #[error("message broker unavailable: {0}")]
    BrokerUnavailable(#[source] PublishError),

    /// The internal server could not be reached or the call timed out.
    #[error("internal coverage server unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The internal server answered with an error status.
    #[error("{message}")]
    Upstream { status: u16, message: String },

    /// The internal server failed to produce a profile.
    #[error("{0}")]
    ProfileFailed(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::ListenerUnavailable(_)
            | RelayError::BrokerUnavailable(_)
            | RelayError::UpstreamUnreachable(_)
            | RelayError::ProfileFailed(_)
            | RelayError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Map a failed profile fetch. Whatever the engine answered, the caller
    /// sees a 500 carrying the engine's message.
    pub fn profile_fetch(err: RegistryError) -> Self {
        match err {
            RegistryError::Upstream { body, .. } => RelayError::ProfileFailed(error_message(&body)),
            other => RelayError::UpstreamUnreachable(other.to_string()),
        }
    }
}

impl From<RegistryError> for RelayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Upstream { status, body } => RelayError::Upstream {
                status,
                message: error_message(&body),
            },
            RegistryError::BadRequest(msg) => RelayError::BadRequest(msg),
            other => RelayError::UpstreamUnreachable(other.to_string()),
        }
    }
}

/// Pull the `error` field out of a JSON error body, or use the body as is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "relay request failed");
        } else {
            tracing::debug!(error = %self, "relay request rejected");
        }
        let mut message = self.to_string();
        if message.is_empty() {
            message = status.to_string();
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_status_and_message_are_kept() {
        let err = RelayError::from(RegistryError::Upstream {
            status: 400,
            body: r#"{"error":"service not registered: web"}"#.to_string(),
        });
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_string(), "service not registered: web");
    }

    #[test]
    fn plain_upstream_body_is_used_verbatim() {
        let err = RelayError::from(RegistryError::Upstream {
            status: 503,
            body: "overloaded\n".to_string(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_string(), "overloaded");
    }

    #[test]
    fn profile_rejection_is_internal_error_with_engine_message() {
        let err = RelayError::profile_fetch(RegistryError::Upstream {
            status: 400,
            body: r#"{"error":"no service registered or selected"}"#.to_string(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "no service registered or selected");
    }

    #[test]
    fn unreachable_is_internal_error() {
        let err = RelayError::UpstreamUnreachable("connection refused".to_string());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn empty_upstream_message_still_renders_error() {
        let resp = RelayError::Upstream {
            status: 502,
            message: String::new(),
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
