//! # Storage Errors
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  sqlx::Error                           CoreError                        │
//! │   ├─ unique index      ─► UniqueViolation   (ledger balance check,     │
//! │   ├─ foreign key       ─► ForeignKeyViolation  unknown product)        │
//! │   ├─ CHECK / trigger   ─► ConstraintViolation     │                    │
//! │   ├─ SQLITE_BUSY/LOCKED─► Busy                    │                    │
//! │   └─ pool timeout      ─► PoolExhausted           ▼                    │
//! │                                      DbError::Domain                   │
//! │                                                                         │
//! │  The sync layer turns Busy/PoolExhausted into a retryable LockTimeout  │
//! │  and reads UniqueViolation columns to detect replays.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::error::ErrorKind;
use stockline_core::CoreError;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// A UNIQUE index rejected the insert.
    ///
    /// ## When This Occurs
    /// - A second insert with the same `(tenant_id, client_uuid)` (replayed
    ///   envelope that lost a race)
    /// - A reference id collision
    /// - A duplicate SKU within one branch
    #[error("Duplicate value for {}", columns.join(", "))]
    UniqueViolation { table: String, columns: Vec<String> },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// CHECK constraint or trigger rejected the write.
    ///
    /// ## When This Occurs
    /// - UPDATE/DELETE against the append-only ledger
    /// - A non-adjustment movement leaving a negative `balance_after`
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// SQLite could not obtain its lock within `busy_timeout`.
    #[error("Database busy: {0}")]
    Busy(String),

    #[error("Could not open database: {0}")]
    ConnectionFailed(String),

    #[error("Schema migration failed: {0}")]
    MigrationFailed(String),

    #[error("Statement failed: {0}")]
    QueryFailed(String),

    #[error("No free database connection")]
    PoolExhausted,

    /// A business rule raised from inside a repository (ledger balance check).
    #[error(transparent)]
    Domain(#[from] CoreError),

    #[error("Unexpected database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when a UNIQUE index covering `column` failed.
    pub fn is_unique_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { columns, .. } if columns.iter().any(|c| c == column))
    }

    /// True for transient lock contention (safe to retry unchanged).
    pub fn is_busy(&self) -> bool {
        matches!(self, DbError::Busy(_) | DbError::PoolExhausted)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Row", "?"),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let code = db_err.code().and_then(|c| c.parse::<i32>().ok());

                match db_err.kind() {
                    ErrorKind::UniqueViolation => {
                        let (table, columns) = unique_columns(&message);
                        DbError::UniqueViolation { table, columns }
                    }
                    ErrorKind::ForeignKeyViolation => DbError::ForeignKeyViolation(message),
                    ErrorKind::CheckViolation | ErrorKind::NotNullViolation => DbError::ConstraintViolation(message),
                    _ if message.contains("append-only") => DbError::ConstraintViolation(message),
                    _ if code.is_some_and(is_busy_code) => DbError::Busy(message),
                    _ => DbError::QueryFailed(message),
                }
            }
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Splits `UNIQUE constraint failed: orders.tenant_id, orders.client_uuid`
/// into `("orders", ["tenant_id", "client_uuid"])`.
fn unique_columns(message: &str) -> (String, Vec<String>) {
    let list = message.rsplit(": ").next().unwrap_or_default();
    let mut table = String::new();
    let columns = list
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|qualified| match qualified.split_once('.') {
            Some((t, column)) => {
                table = t.to_string();
                column.to_string()
            }
            None => qualified.to_string(),
        })
        .collect();
    (table, columns)
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes.
fn is_busy_code(code: i32) -> bool {
    matches!(code & 0xff, 5 | 6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_columns_parsed() {
        let (table, columns) = unique_columns("UNIQUE constraint failed: orders.tenant_id, orders.client_uuid");
        assert_eq!(table, "orders");
        assert_eq!(columns, vec!["tenant_id", "client_uuid"]);

        let err = DbError::UniqueViolation { table, columns };
        assert!(err.is_unique_on("client_uuid"));
        assert!(!err.is_unique_on("reference_id"));
        assert!(!err.is_unique_on("uuid"));
        assert_eq!(err.to_string(), "Duplicate value for tenant_id, client_uuid");
    }

    #[test]
    fn test_busy_codes() {
        assert!(is_busy_code(5));
        assert!(is_busy_code(517)); // SQLITE_BUSY_SNAPSHOT
        assert!(is_busy_code(6));
        assert!(!is_busy_code(2067)); // SQLITE_CONSTRAINT_UNIQUE
        assert!(DbError::Busy("locked".into()).is_busy());
    }

    #[test]
    fn test_domain_error_is_transparent() {
        let err: DbError = CoreError::not_found("Product", "p-9").into();
        assert_eq!(err.to_string(), "Product not found: p-9");
    }
}
