use std::sync::Arc;

use crate::app::RetrievalError;

use super::{CacheValidators, RetrievalData};

/// Outcome of a retrieval.
///
/// Exactly one of [`data`](Self::data) and [`error`](Self::error) is present.
/// Cached results are always successful. Cancellation is reported as a failed
/// result carrying [`RetrievalError::Cancelled`].
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    data: Option<RetrievalData>,
    error: Option<Arc<RetrievalError>>,
    from_cache: bool,
    message: String,
    validators: Option<CacheValidators>,
}

impl RetrievalResult {
    pub fn success(data: RetrievalData, validators: CacheValidators) -> Self {
        Self {
            data: Some(data),
            error: None,
            from_cache: false,
            message: "retrieved".to_string(),
            validators: Some(validators),
        }
    }

    pub fn cached(data: RetrievalData) -> Self {
        Self {
            data: Some(data),
            error: None,
            from_cache: true,
            message: "served from cache".to_string(),
            validators: None,
        }
    }

    pub fn failure(error: impl Into<Arc<RetrievalError>>) -> Self {
        let error = error.into();
        Self {
            message: error.to_string(),
            data: None,
            error: Some(error),
            from_cache: false,
            validators: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::failure(RetrievalError::Cancelled)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn is_successful(&self) -> bool {
        self.data.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.error.as_deref(), Some(RetrievalError::Cancelled))
    }

    pub fn is_from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn data(&self) -> Option<&RetrievalData> {
        self.data.as_ref()
    }

    pub fn error(&self) -> Option<&RetrievalError> {
        self.error.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Validators returned by the source along with fresh data.
    pub fn validators(&self) -> Option<&CacheValidators> {
        self.validators.as_ref()
    }
}
