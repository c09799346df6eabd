//! Error kinds the HTTP surface distinguishes, and their wire shape.
//!
//! Every handler error serializes as the OpenAI error envelope
//! `{"error": {"message", "type", "code"?}}` with the status the kind
//! dictates. Streaming responses report upstream failures in-band instead;
//! see the streaming assembler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Typed error for the gateway, admin, and webhook surfaces.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed JSON, empty model, missing body.
    #[error("{0}")]
    BadRequest(String),

    /// Missing header, unknown or expired token, no auth configured.
    #[error("{0}")]
    Auth(String),

    /// Token exists but lacks access to the requested resource.
    #[error("{0}")]
    Scope(String),

    /// Unknown provider, trigger, run, or other resource.
    #[error("{0}")]
    NotFound(String),

    /// Unknown model under a known provider. Carries `code = model_not_found`.
    #[error("{0}")]
    ModelNotFound(String),

    /// Upstream vendor returned an error or was unreachable.
    #[error("{0}")]
    Upstream(String),

    /// Store read failure, lock failure, marshaling error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Scope(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::ModelNotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::ModelNotFound(_) => "invalid_request_error",
            Self::Auth(_) => "authentication_error",
            Self::Scope(_) => "permission_error",
            Self::NotFound(_) => "not_found_error",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }

    fn code(&self) -> Option<&'static str> {
        match self {
            Self::ModelNotFound(_) => Some("model_not_found"),
            _ => None,
        }
    }

    /// The user-facing message. Internal errors are not leaked verbatim.
    fn message(&self) -> String {
        match self {
            Self::Internal(err) => {
                tracing::error!(error = %err, "internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "message": self.message(),
            "type": self.error_type(),
        });
        if let Some(code) = self.code() {
            error["code"] = json!(code);
        }
        (self.status(), Json(json!({ "error": error }))).into_response()
    }
}
