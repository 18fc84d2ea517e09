use applygate_core::{ApiError, Origin};

/// Errors from the data layer.
#[derive(Debug)]
pub enum DataError {
    NotFound(String),
    /// Optimistic-concurrency loss: another writer advanced the version.
    Conflict(String),
    Database(Box<dyn std::error::Error + Send + Sync>),
    /// Pool exhausted or endpoint unreachable within the acquisition
    /// budget.
    Unavailable(String),
}

impl DataError {
    pub fn database(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DataError::Database(Box::new(err))
    }
}

impl std::fmt::Display for DataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataError::NotFound(msg) => write!(f, "not found: {msg}"),
            DataError::Conflict(msg) => write!(f, "conflict: {msg}"),
            DataError::Database(err) => write!(f, "database error: {err}"),
            DataError::Unavailable(msg) => write!(f, "database unavailable: {msg}"),
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

impl From<sqlx::Error> for DataError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DataError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut => DataError::Unavailable("pool acquisition timed out".into()),
            other => DataError::database(other),
        }
    }
}

impl From<DataError> for ApiError {
    fn from(err: DataError) -> Self {
        match err {
            DataError::NotFound(msg) => ApiError::not_found(msg),
            DataError::Conflict(msg) => ApiError::conflict(msg),
            err => ApiError::dependency(Origin::Db, err),
        }
    }
}
