use ambit_core::HttpError;

/// Errors that can occur in the data layer.
///
/// The variants are the classification callers act on. `PoolExhausted`,
/// `Timeout` and `Conflict` are transient: the whole unit of work may be
/// retried. The rest are not. This layer never retries on its own.
#[derive(Debug)]
pub enum DataError {
    NotFound(String),
    /// The pool could not be opened or the store is unreachable.
    Connection(String),
    /// No connection became available within the pool's acquire timeout.
    PoolExhausted(String),
    /// The caller's deadline elapsed or its context was cancelled.
    Timeout(String),
    /// Begin, commit or rollback failed at the data-store level.
    Transaction(String),
    /// The store rejected the work because of a lock or serialization conflict.
    Conflict(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
    Other(String),
}

impl DataError {
    /// Construct a `Database` variant from any error type.
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }

    /// Whether retrying the whole unit of work may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::PoolExhausted(_) | DataError::Timeout(_) | DataError::Conflict(_)
        )
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "Not found: {msg}"),
            DataError::Connection(msg) => write!(f, "Connection error: {msg}"),
            DataError::PoolExhausted(msg) => write!(f, "Pool exhausted: {msg}"),
            DataError::Timeout(msg) => write!(f, "Timed out: {msg}"),
            DataError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            DataError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            DataError::Database(err) => write!(f, "Database error: {err}"),
            DataError::Other(msg) => write!(f, "Data error: {msg}"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Database(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DataError> for HttpError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => HttpError::NotFound(msg),
            DataError::Conflict(msg) => HttpError::Conflict(msg),
            DataError::PoolExhausted(_) | DataError::Timeout(_) => {
                HttpError::Unavailable(err.to_string())
            }
            other => HttpError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(DataError::PoolExhausted("all 10 in use".into()).is_transient());
        assert!(DataError::Timeout("begin".into()).is_transient());
        assert!(DataError::Conflict("40001".into()).is_transient());
        assert!(!DataError::Connection("refused".into()).is_transient());
        assert!(!DataError::Transaction("commit".into()).is_transient());
        assert!(!DataError::NotFound("book".into()).is_transient());
    }

    #[test]
    fn maps_to_http_status() {
        let status = |e: DataError| HttpError::from(e).status().as_u16();
        assert_eq!(status(DataError::NotFound("book 7".into())), 404);
        assert_eq!(status(DataError::Conflict("deadlock".into())), 409);
        assert_eq!(status(DataError::Timeout("commit".into())), 503);
        assert_eq!(status(DataError::PoolExhausted("acquire".into())), 503);
        assert_eq!(status(DataError::Transaction("commit".into())), 500);
    }

    #[test]
    fn database_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let err = DataError::database(io);
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Database error: socket closed");
    }
}
