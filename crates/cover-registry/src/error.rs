//! Error types for the coverage registry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors raised by the registry engine and its client.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Nothing registered, or the filter selected no address.
    #[error("no service registered or selected")]
    NoServices,

    #[error("service not registered: {0}")]
    UnknownService(String),

    #[error("address not registered: {0}")]
    UnknownAddress(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid file pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// An instrumented service could not be reached or answered non-2xx.
    #[error("failed to reach {address}: {reason}")]
    Fetch { address: String, reason: String },

    /// The registry itself answered non-2xx (client side).
    #[error("registry returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("malformed coverage profile: {0}")]
    Profile(String),

    #[error("persistence error: {0}")]
    Persist(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RegistryError {
    pub fn status(&self) -> StatusCode {
        match self {
            RegistryError::NoServices
            | RegistryError::UnknownService(_)
            | RegistryError::UnknownAddress(_)
            | RegistryError::BadRequest(_)
            | RegistryError::InvalidPattern(_) => StatusCode::BAD_REQUEST,
            RegistryError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RegistryError::Fetch { .. }
            | RegistryError::Profile(_)
            | RegistryError::Persist(_)
            | RegistryError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "registry request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
