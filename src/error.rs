//! Error types for cache and connection operations

use thiserror::Error;

/// Result type alias for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a flush attempt.
///
/// Both variants leave the buffered triples in place, so a later `sync()`
/// resends exactly the same batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A buffered term could not be rendered into the update statement
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The backend rejected or failed to receive the update
    #[error("Update submission failed: {0}")]
    Submission(String),
}

/// Main error type for connection operations
#[derive(Error, Debug)]
pub enum Error {
    /// Pending cached mutations could not be flushed
    #[error("Pending writes not persisted: {0}")]
    Cache(#[from] CacheError),

    /// Backend store error
    #[error("Backend error: {0}")]
    Backend(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Query evaluation or result decoding error
    #[error("Query error: {0}")]
    Query(String),

    /// Transaction misuse or failure
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation on a closed connection
    #[error("Connection is closed")]
    Closed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// RDF or JSON parse error
    #[error("Parse error: {0}")]
    Parse(String),
}

impl Error {
    /// Whether retrying the same call (typically `sync()`) can succeed.
    ///
    /// A serialization failure will fail again with the same batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Cache(CacheError::Submission(_)) | Error::Http(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<oxigraph::store::StorageError> for Error {
    fn from(err: oxigraph::store::StorageError) -> Self {
        Error::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Cache(CacheError::Submission("timeout".to_string()));
        assert_eq!(
            err.to_string(),
            "Pending writes not persisted: Update submission failed: timeout"
        );
    }

    #[test]
    fn test_submission_errors_are_retryable() {
        assert!(Error::from(CacheError::Submission("503".to_string())).is_retryable());
        assert!(!Error::from(CacheError::Serialization("bad iri".to_string())).is_retryable());
        assert!(!Error::Closed.is_retryable());
        assert!(!Error::Config("zero interval".to_string()).is_retryable());
    }
}
