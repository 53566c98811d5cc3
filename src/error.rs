//! Unified error type for kestrel — carries the retry classification used by
//! the resilient invoker.

use std::time::Duration;

use thiserror::Error;

/// Classification of an error for retry decisions.
///
/// The retry policy holds a set of retryable kinds; everything else
/// re-raises immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad settings (e.g. overlap >= chunk size). Fails before any I/O.
    Configuration,
    /// Malformed input to a command. Fatal, immediate.
    Validation,
    /// Provider or store unreachable.
    Connectivity,
    /// A per-call deadline elapsed.
    Timeout,
    /// Low-level I/O failure.
    Io,
    /// Storage backend rejected an operation.
    Storage,
    /// Embedding provider failed.
    Embedding,
    /// Requested record does not exist. Read paths return `None` instead;
    /// this kind only appears where absence is genuinely an error.
    NotFound,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::Storage => "storage",
            ErrorKind::Embedding => "embedding",
            ErrorKind::NotFound => "not_found",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Not found: {0}")]
    #[allow(dead_code)]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, KestrelError>;

impl KestrelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Embedding(_) => ErrorKind::Embedding,
            Self::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

impl From<sqlx::Error> for KestrelError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            // Connection-level failures are transient; the rest are not.
            sqlx::Error::Io(io) => KestrelError::Connectivity(io.to_string()),
            sqlx::Error::PoolTimedOut => {
                KestrelError::Connectivity("sqlite pool timed out".to_string())
            }
            sqlx::Error::PoolClosed => {
                KestrelError::Connectivity("sqlite pool closed".to_string())
            }
            other => KestrelError::Storage(other.to_string()),
        }
    }
}

impl From<lancedb::Error> for KestrelError {
    fn from(e: lancedb::Error) -> Self {
        KestrelError::Storage(e.to_string())
    }
}

impl From<arrow_schema::ArrowError> for KestrelError {
    fn from(e: arrow_schema::ArrowError) -> Self {
        KestrelError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            KestrelError::Configuration("x".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            KestrelError::Connectivity("x".into()).kind(),
            ErrorKind::Connectivity
        );
        assert_eq!(
            KestrelError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn sqlx_io_maps_to_connectivity() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: KestrelError = sqlx::Error::Io(io).into();
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn sqlx_row_not_found_maps_to_storage() {
        let err: KestrelError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.kind(), ErrorKind::Storage);
    }
}
