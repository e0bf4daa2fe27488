//! Typed error taxonomy.
//!
//! Every component recovers the errors it is architecturally responsible for
//! and surfaces the rest as typed values. The control surface wraps whatever
//! escapes into an [`ApiError`] envelope for callers.

use serde::Serialize;
use thiserror::Error;

use crate::models::Source;

/// Configuration problems: bad paths, unreadable files, invalid values.
/// Surfaced to the caller, never retried.
#[derive(Debug, Error)]
#[error("config error: {0}")]
pub struct ConfigError(pub String);

/// Failures originating in the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Integrity check failed at open. Fatal for the deployment.
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    /// Lock contention; caller may retry with backoff.
    #[error("store is busy: {0}")]
    Busy(String),

    /// A schema migration failed. Carries the version and a bounded excerpt
    /// of the offending statement.
    #[error("migration {version} failed at: {statement}")]
    MigrationFailed { version: i64, statement: String },

    /// A constraint violation indicates a bug; the batch is rolled back.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Document lookup miss. Normal for `fetch_document`.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Sqlx(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if !matches!(db.kind(), sqlx::error::ErrorKind::Other) {
                return StoreError::ConstraintViolation(db.message().to_string());
            }
            let code = db.code().unwrap_or_default();
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if code == "5" || code == "6" {
                return StoreError::Busy(db.message().to_string());
            }
            // SQLITE_CORRUPT = 11, SQLITE_NOTADB = 26
            if code == "11" || code == "26" {
                return StoreError::Corrupt(db.message().to_string());
            }
        }
        StoreError::Sqlx(err)
    }
}

impl StoreError {
    /// Whether this error aborts the entire run rather than one batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Corrupt(_) | StoreError::MigrationFailed { .. }
        )
    }
}

/// Failures reported by source adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The OS denied access to the underlying store; the hint tells the user
    /// which permission to grant. Defers the source for the run.
    #[error("permission denied for {src}: {hint}")]
    PermissionDenied { src: Source, hint: String },

    /// The underlying store is missing or unreadable. Defers the source.
    #[error("source {src} unavailable: {reason}")]
    SourceUnavailable { src: Source, reason: String },

    /// A single record failed to translate. Per-record, reported in-band.
    #[error("malformed record {native_id}: {reason}")]
    MalformedRecord { native_id: String, reason: String },
}

/// Failures from the external embedder endpoint.
#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error("embedder call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("embedder http error: {0}")]
    Http(String),

    /// The response vector count or dimension does not match the request.
    #[error("embedder shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Failures at the query surface.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("planning failed: {0}")]
    PlanFailed(String),

    #[error("search failed: {0}")]
    SearchFailed(String),
}

/// Stable kind discriminants for the control surface envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Config,
    StoreCorrupt,
    StoreBusy,
    MigrationFailed,
    ConstraintViolation,
    NotFound,
    Store,
    PermissionDenied,
    SourceUnavailable,
    MalformedRecord,
    EmbedderTimeout,
    EmbedderHttp,
    EmbedderShape,
    InvalidFilter,
    PlanFailed,
    SearchFailed,
}

/// Typed failure returned by every control-surface operation.
///
/// Success results never carry error fields and vice versa; callers branch on
/// `kind` rather than parsing messages.
#[derive(Debug, Clone, Serialize, Error)]
#[error("{kind:?}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::new(ErrorKind::Config, err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let kind = match &err {
            StoreError::Corrupt(_) => ErrorKind::StoreCorrupt,
            StoreError::Busy(_) => ErrorKind::StoreBusy,
            StoreError::MigrationFailed { .. } => ErrorKind::MigrationFailed,
            StoreError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            StoreError::NotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Store,
        };
        ApiError::new(kind, err.to_string())
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        let kind = match &err {
            AdapterError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            AdapterError::SourceUnavailable { .. } => ErrorKind::SourceUnavailable,
            AdapterError::MalformedRecord { .. } => ErrorKind::MalformedRecord,
        };
        ApiError::new(kind, err.to_string())
    }
}

impl From<EmbedderError> for ApiError {
    fn from(err: EmbedderError) -> Self {
        let kind = match &err {
            EmbedderError::Timeout(_) => ErrorKind::EmbedderTimeout,
            EmbedderError::Http(_) => ErrorKind::EmbedderHttp,
            EmbedderError::ShapeMismatch(_) => ErrorKind::EmbedderShape,
        };
        ApiError::new(kind, err.to_string())
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let kind = match &err {
            QueryError::InvalidFilter(_) => ErrorKind::InvalidFilter,
            QueryError::PlanFailed(_) => ErrorKind::PlanFailed,
            QueryError::SearchFailed(_) => ErrorKind::SearchFailed,
        };
        ApiError::new(kind, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_serializes_kind_and_message() {
        let err = ApiError::new(ErrorKind::NotFound, "document not found");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not-found");
        assert_eq!(json["message"], "document not found");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn store_error_maps_to_kind() {
        let api: ApiError = StoreError::Busy("locked".into()).into();
        assert_eq!(api.kind, ErrorKind::StoreBusy);
        let api: ApiError = StoreError::NotFound("x".into()).into();
        assert_eq!(api.kind, ErrorKind::NotFound);
    }
}
