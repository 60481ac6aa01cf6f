//! Error responses for the HTTP surface

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use crmsync_domain::CrmSyncError;
use serde_json::json;
use thiserror::Error;

use crate::utils::logging::error_label;

/// Route-level failures and their HTTP status
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("missing or invalid webhook signature")]
    InvalidSignature,

    #[error(transparent)]
    Domain(#[from] CrmSyncError),
}

impl RouteError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Domain(err) => match err {
                CrmSyncError::NotFound(_) => StatusCode::NOT_FOUND,
                CrmSyncError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                CrmSyncError::Auth(_) => StatusCode::UNAUTHORIZED,
                CrmSyncError::Network(_) => StatusCode::BAD_GATEWAY,
                CrmSyncError::Database(_) | CrmSyncError::Config(_) | CrmSyncError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload(_) => "invalid_payload",
            Self::InvalidSignature => "invalid_signature",
            Self::Domain(err) => error_label(err),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub type RouteResult<T> = std::result::Result<T, RouteError>;
