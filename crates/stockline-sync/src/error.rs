//! # Sync Error Types
//!
//! What a handler or the gateway can fail with, categorised so the gateway
//! can map each failure to a response.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │  Business rule  │  │     Contention          │ │
//! │  │   (400)         │  │  (400)          │  │     (503, retryable)    │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │ MalformedEnv.   │  │ InsufficientStk │  │  LockTimeout            │ │
//! │  │ InvalidPayload  │  │ InvalidTransit. │  │  (also SQLITE_BUSY)     │ │
//! │  │ NotFound        │  │ AlreadyReceived │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │  Configuration  │                              │
//! │  │    (500)        │  │  (startup)      │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Idempotent duplicates are not errors; they are a
//! [`SyncOutcome`](crate::protocol::SyncOutcome) of their own.

use stockline_core::{CoreError, ValidationError};
use stockline_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Envelope Errors
    // =========================================================================
    /// The envelope is missing `uuid`, `type` or `data`, or `uuid` is not a UUID.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// `data` does not deserialize into the payload of its `type`.
    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: String, reason: String },

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// Validation or business-rule rejection from the core.
    #[error(transparent)]
    Domain(#[from] CoreError),

    // =========================================================================
    // Contention
    // =========================================================================
    /// Stock locks (or SQLite's write lock) were not obtained in time.
    ///
    /// ## When This Occurs
    /// - Another call holds one of the product locks for longer than
    ///   `locks.wait_ms`
    /// - SQLite stayed busy past `busy_timeout`
    ///
    /// Nothing was written; replaying the same envelope later is safe.
    #[error("Timed out waiting for stock locks: {0}")]
    LockTimeout(String),

    // =========================================================================
    // Infrastructure
    // =========================================================================
    /// Unexpected database failure.
    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid gateway configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => SyncError::Domain(core),
            DbError::NotFound { entity, id } => SyncError::Domain(CoreError::NotFound { entity, id }),
            DbError::Busy(msg) => SyncError::LockTimeout(msg),
            DbError::PoolExhausted => SyncError::LockTimeout("connection pool exhausted".to_string()),
            other => SyncError::Database(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Domain(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if replaying the identical request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::LockTimeout(_))
    }

    /// Returns true when the request itself is wrong (never retried).
    pub fn is_validation(&self) -> bool {
        match self {
            SyncError::MalformedEnvelope(_) | SyncError::InvalidPayload { .. } => true,
            SyncError::Domain(core) => core.is_validation(),
            _ => false,
        }
    }

    /// Returns true when the request is well formed but current state forbids it.
    pub fn is_business_rule(&self) -> bool {
        matches!(self, SyncError::Domain(core) if core.is_business_rule())
    }

    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_))
    }

    pub(crate) fn invalid_payload(kind: &str, reason: impl Into<String>) -> Self {
        SyncError::InvalidPayload {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}
