use ambit_data::DataError;
use sqlx::error::DatabaseError;

/// Extension trait for converting `sqlx::Error` into `DataError`.
///
/// Due to Rust's orphan rules, `From<sqlx::Error> for DataError` can't live
/// here. Use `.into_data_error()` (statements) or `.into_tx_error(op)`
/// (begin/commit/rollback) instead.
pub trait SqlxErrorExt {
    fn into_data_error(self) -> DataError;

    /// Like [`into_data_error`](Self::into_data_error), but only the
    /// retry-safe kinds (`PoolExhausted`, `Timeout`, `Conflict`) stay
    /// distinct. Everything else, lost connections included, becomes
    /// `DataError::Transaction` tagged with `op`.
    fn into_tx_error(self, op: &str) -> DataError;
}

impl SqlxErrorExt for sqlx::Error {
    fn into_data_error(self) -> DataError {
        match &self {
            sqlx::Error::RowNotFound => DataError::NotFound("Row not found".into()),
            sqlx::Error::PoolTimedOut => {
                DataError::PoolExhausted("timed out waiting for a pooled connection".into())
            }
            sqlx::Error::PoolClosed => DataError::Connection("pool is closed".into()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::Protocol(_) => DataError::Connection(self.to_string()),
            sqlx::Error::Database(db) if is_conflict(db.as_ref()) => {
                DataError::Conflict(self.to_string())
            }
            _ => DataError::database(self),
        }
    }

    fn into_tx_error(self, op: &str) -> DataError {
        match self.into_data_error() {
            DataError::Database(err) => DataError::Transaction(format!("{op} failed: {err}")),
            DataError::NotFound(msg) | DataError::Connection(msg) => {
                DataError::Transaction(format!("{op} failed: {msg}"))
            }
            other => other,
        }
    }
}

/// Lock and serialization conflicts the caller may resolve by retrying.
///
/// Five-character codes are SQLSTATE (Postgres, MySQL): `40001`
/// serialization failure, `40P01` deadlock, `55P03` lock not available
/// (`NOWAIT` or `lock_timeout`). Anything else numeric is a
/// SQLite result code, where the primary code `SQLITE_BUSY` (5) or
/// `SQLITE_LOCKED` (6) sits in the low byte of extended codes.
fn is_conflict(err: &dyn DatabaseError) -> bool {
    err.code().is_some_and(|code| is_conflict_code(&code))
}

fn is_conflict_code(code: &str) -> bool {
    if code.len() == 5 {
        return matches!(code, "40001" | "40P01" | "55P03");
    }
    matches!(code.parse::<i32>(), Ok(c) if matches!(c & 0xff, 5 | 6))
}

/// Convenience alias for data-layer results using `DataError`.
pub type SqlxResult<T> = Result<T, DataError>;
