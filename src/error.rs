//! Authentication error taxonomy and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::store::StoreError;

/// Errors produced by the OAuth flow and by session mutations.
///
/// Every variant means "not authenticated" to the caller; no failure path
/// ever upgrades into a trusted session.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("OAuth client is not configured: {0}")]
    Configuration(&'static str),

    #[error("Identity provider request failed: {0}")]
    Network(String),

    #[error("Account {email} is outside the allowed sign-in domain")]
    Denied { email: String },

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Session registry is not running")]
    RegistryClosed,
}

impl AuthError {
    /// Stable machine-readable code for JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "oauth_not_configured",
            AuthError::Network(_) => "provider_unreachable",
            AuthError::Denied { .. } => "domain_not_allowed",
            AuthError::Store(_) => "store_unavailable",
            AuthError::RegistryClosed => "registry_unavailable",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Network(_) => StatusCode::BAD_GATEWAY,
            AuthError::Denied { .. } => StatusCode::FORBIDDEN,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AuthError::RegistryClosed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest errors can embed full URLs with query strings; strip the
        // URL before the message can reach a log line or response body.
        if err.is_timeout() {
            AuthError::Network("request timed out".to_string())
        } else {
            AuthError::Network(err.without_url().to_string())
        }
    }
}
