use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Non-2xx response. Belongs to the I/O category of failures.
    #[error("HTTP {status} returned for {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("No retriever registered for URL: {0}")]
    UnsupportedScheme(String),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Retrieval cancelled")]
    Cancelled,

    #[error("Not available in cache: {0}")]
    NotCached(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Retrieval service has shut down")]
    ServiceShutDown,

    #[error("{0}")]
    Other(String),
}

impl RetrievalError {
    /// True for failures that come from reading bytes: HTTP status errors,
    /// socket errors and filesystem errors.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            RetrievalError::Http { .. }
                | RetrievalError::Transport(_)
                | RetrievalError::Io(_)
                | RetrievalError::Timeout(_)
        )
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RetrievalError::Http { status, .. } => *status >= 500,
            RetrievalError::Transport(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            RetrievalError::Timeout(_) => true,
            _ => false,
        }
    }

    /// True when the failure shows the resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        match self {
            RetrievalError::Http { status, .. } => *status == 404 || *status == 410,
            RetrievalError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
