use thiserror::Error;

/// Failure classes shared by the API and the worker.
///
/// The split matters operationally: `retryable()` decides whether a failed
/// ingestion stage is retried (and whether queue redelivery is useful), and
/// the server maps each variant to an HTTP status.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    ClientInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient upstream failure: {0}")]
    TransientUpstream(String),

    #[error("permanent upstream failure: {0}")]
    PermanentUpstream(String),

    #[error("no extractable text")]
    EmptyContent,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("blob store error: {0}")]
    BlobStore(#[from] object_store::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// True when a retry (in-stage backoff or queue redelivery) can help.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientUpstream(_)
                | CoreError::Queue(_)
                | CoreError::Database(_)
                | CoreError::BlobStore(_)
                | CoreError::Io(_)
        )
    }

    /// True when the document should be failed terminally (no redelivery retry).
    pub fn terminal(&self) -> bool {
        matches!(
            self,
            CoreError::ClientInput(_)
                | CoreError::PermanentUpstream(_)
                | CoreError::EmptyContent
                | CoreError::InvariantViolation(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(CoreError::TransientUpstream("rate limited".into()).retryable());
        assert!(CoreError::Queue("redelivery".into()).retryable());
        assert!(!CoreError::TransientUpstream("rate limited".into()).terminal());
    }

    #[test]
    fn permanent_errors_are_terminal() {
        assert!(CoreError::EmptyContent.terminal());
        assert!(CoreError::PermanentUpstream("unsupported pdf".into()).terminal());
        assert!(!CoreError::EmptyContent.retryable());
    }

    #[test]
    fn cache_errors_neither_retry_nor_fail_terminally() {
        let e = CoreError::CacheUnavailable("connection refused".into());
        assert!(!e.retryable());
        assert!(!e.terminal());
    }
}
