//! Sync error type carrying entity context

use std::time::Duration;

use crmsync_domain::{ObjectType, SyncOperation};
use thiserror::Error;

/// A failed attempt to sync one queue item
///
/// `retryable` decides whether the queue reschedules the item or fails it
/// immediately. `retry_after` lets the remote side push the next attempt
/// further out than the backoff table would.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} {object_type} failed: {message}")]
pub struct SyncError {
    pub object_type: ObjectType,
    pub operation: SyncOperation,
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
}

impl SyncError {
    pub fn transient(
        object_type: ObjectType,
        operation: SyncOperation,
        message: impl Into<String>,
    ) -> Self {
        Self { object_type, operation, message: message.into(), retryable: true, retry_after: None }
    }

    pub fn permanent(
        object_type: ObjectType,
        operation: SyncOperation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object_type,
            operation,
            message: message.into(),
            retryable: false,
            retry_after: None,
        }
    }

    #[must_use]
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}
