//! Conversions from external infrastructure errors into domain errors.

use crmsync_domain::CrmSyncError;
use reqwest::Error as HttpError;
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub CrmSyncError);

impl From<InfraError> for CrmSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<CrmSyncError> for InfraError {
    fn from(value: CrmSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoCrmSyncError {
    fn into_crmsync(self) -> CrmSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → CrmSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCrmSyncError for SqlError {
    fn into_crmsync(self) -> CrmSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        CrmSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        CrmSyncError::Database("database is locked".into())
                    }
                    (ErrorCode::ConstraintViolation, 1555 | 2067) => {
                        CrmSyncError::InvalidInput("unique constraint violation".into())
                    }
                    (ErrorCode::ConstraintViolation, 275) => {
                        CrmSyncError::InvalidInput(format!("check constraint failed: {message}"))
                    }
                    (ErrorCode::CannotOpen, _) => {
                        CrmSyncError::Database(format!("unable to open database: {message}"))
                    }
                    _ => CrmSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => CrmSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                CrmSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, name, ty) => {
                CrmSyncError::Database(format!("invalid column type for {name}: {ty}"))
            }
            RE::InvalidPath(path) => CrmSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            RE::InvalidQuery => CrmSyncError::Database("invalid SQL query".into()),
            other => CrmSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_crmsync())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → CrmSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCrmSyncError for r2d2::Error {
    fn into_crmsync(self) -> CrmSyncError {
        CrmSyncError::Database(format!("failed to acquire pooled connection: {self}"))
    }
}

impl From<r2d2::Error> for InfraError {
    fn from(value: r2d2::Error) -> Self {
        InfraError(value.into_crmsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → CrmSyncError */
/* -------------------------------------------------------------------------- */

impl IntoCrmSyncError for HttpError {
    fn into_crmsync(self) -> CrmSyncError {
        if self.is_timeout() {
            return CrmSyncError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return CrmSyncError::Network("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            let code = status.as_u16();
            let message =
                format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));

            return match code {
                401 | 403 => CrmSyncError::Auth(message),
                404 => CrmSyncError::NotFound(message),
                429 => CrmSyncError::Network(message),
                400..=499 => CrmSyncError::InvalidInput(message),
                _ => CrmSyncError::Network(message),
            };
        }

        if self.is_decode() {
            return CrmSyncError::Internal(format!("failed to decode response: {self}"));
        }

        CrmSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_crmsync())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
