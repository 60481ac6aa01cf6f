//! HubSpot API error taxonomy

use std::time::Duration;

use crmsync_common::resilience::RateLimitError;
use crmsync_core::SyncError;
use crmsync_domain::{CrmSyncError, ObjectType, SyncOperation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Interrupted, TransportError};

/// One field-level problem reported in a HubSpot error body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Offending property, when HubSpot names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<String>,
}

/// Errors returned by [`super::HubSpotClient`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("HubSpot authentication failed: {0}")]
    Auth(String),

    #[error("HubSpot rate limit reached{}", retry_hint(.retry_after_secs))]
    RateLimit { retry_after_secs: Option<u64> },

    #[error("HubSpot rejected the request: {message}")]
    Validation { message: String, errors: Vec<FieldError> },

    #[error("HubSpot API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("client configuration error: {0}")]
    Config(String),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs.map(|secs| format!(", retry after {secs}s")).unwrap_or_default()
}

impl ApiError {
    /// Whether retrying the same request later can succeed.
    ///
    /// Auth and decode failures go through the queue's backoff. Validation,
    /// other 4xx and client misconfiguration do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. }
            | Self::Network(_)
            | Self::CircuitOpen
            | Self::Timeout
            | Self::Cancelled
            | Self::Auth(_)
            | Self::Decode(_) => true,
            Self::Api { status, .. } => *status >= 500 || *status == 409,
            Self::Validation { .. } | Self::Config(_) => false,
        }
    }

    /// Server-provided wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after_secs: Some(secs) } => Some(Duration::from_secs(*secs)),
            _ => None,
        }
    }

    /// HTTP status, for errors that came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Auth(_) => Some(401),
            Self::RateLimit { .. } => Some(429),
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify for the sync queue retry policy.
    pub fn into_sync_error(self, object_type: ObjectType, operation: SyncOperation) -> SyncError {
        let retry_after = self.retry_after();
        let message = self.to_string();
        let error = if self.is_retryable() {
            SyncError::transient(object_type, operation, message)
        } else {
            SyncError::permanent(object_type, operation, message)
        };
        match retry_after {
            Some(delay) => error.with_retry_after(delay),
            None => error,
        }
    }
}

impl From<RateLimitError> for ApiError {
    fn from(value: RateLimitError) -> Self {
        ApiError::RateLimit { retry_after_secs: value.retry_after_secs() }
    }
}

impl From<TransportError> for ApiError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Timeout => ApiError::Timeout,
            TransportError::Network(message) => ApiError::Network(message),
            TransportError::InvalidRequest(message) => ApiError::Config(message),
        }
    }
}

impl From<Interrupted> for ApiError {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::TimedOut => ApiError::Timeout,
            Interrupted::Cancelled => ApiError::Cancelled,
        }
    }
}

impl From<ApiError> for CrmSyncError {
    fn from(value: ApiError) -> Self {
        let message = value.to_string();
        match value {
            ApiError::Auth(_) => CrmSyncError::Auth(message),
            ApiError::Validation { .. } => CrmSyncError::InvalidInput(message),
            ApiError::Api { status: 404, .. } => CrmSyncError::NotFound(message),
            ApiError::Config(_) => CrmSyncError::Config(message),
            ApiError::Decode(_) => CrmSyncError::Internal(message),
            _ => CrmSyncError::Network(message),
        }
    }
}

/// Standard HubSpot error envelope
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl ErrorBody {
    pub(crate) fn parse(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }

    pub(crate) fn field_errors(&self) -> Vec<FieldError> {
        self.errors
            .iter()
            .map(|detail| FieldError {
                message: detail.message.clone(),
                code: detail.code.clone(),
                property: detail
                    .context
                    .as_ref()
                    .and_then(|ctx| ctx.get("propertyName"))
                    .and_then(|names| names.get(0))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string),
            })
            .collect()
    }
}
