pub mod file;
pub mod http;

use async_trait::async_trait;
use url::Url;

use crate::app::Result;
use crate::cache::CacheEntry;
use crate::domain::{RetrievalProperties, RetrievalResult, RetrievalStatus};

pub use file::FileRetriever;
pub use http::{HttpConfig, HttpRetriever};

/// Status sink handed to a [`Retriever`] for one invocation.
pub trait RetrievalMonitor: Send + Sync {
    /// Report progress. Backwards moves are ignored.
    fn update_status(&self, status: RetrievalStatus);

    /// Polled between I/O steps; a retriever should stop and return a
    /// cancelled result once this is true.
    fn is_cancelled(&self) -> bool;
}

/// Fetches bytes for one family of URL schemes.
///
/// An invocation runs to completion on the worker that called it and never
/// retries. Transport failures come back as `Ok` with a failed
/// [`RetrievalResult`]; `Err` is reserved for caller bugs such as handing
/// over a URL this retriever does not support.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, url: &Url) -> bool;

    /// Whether successful results should be written to the disk cache.
    fn caches_results(&self) -> bool {
        true
    }

    async fn retrieve(
        &self,
        url: &Url,
        monitor: &dyn RetrievalMonitor,
        properties: &RetrievalProperties,
        cached: Option<&CacheEntry>,
    ) -> Result<RetrievalResult>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::RetrievalMonitor;
    use crate::domain::RetrievalStatus;

    /// Records every status it is given.
    #[derive(Default)]
    pub struct RecordingMonitor {
        pub statuses: Mutex<Vec<RetrievalStatus>>,
        pub cancelled: AtomicBool,
        /// Flip to cancelled as soon as this status is reported
        pub cancel_at: Option<RetrievalStatus>,
    }

    impl RecordingMonitor {
        pub fn cancelled() -> Self {
            let monitor = Self::default();
            monitor.cancelled.store(true, Ordering::SeqCst);
            monitor
        }

        pub fn cancelling_at(status: RetrievalStatus) -> Self {
            Self {
                cancel_at: Some(status),
                ..Self::default()
            }
        }

        pub fn seen(&self) -> Vec<RetrievalStatus> {
            self.statuses.lock().unwrap().clone()
        }
    }

    impl RetrievalMonitor for RecordingMonitor {
        fn update_status(&self, status: RetrievalStatus) {
            self.statuses.lock().unwrap().push(status);
            if self.cancel_at == Some(status) {
                self.cancelled.store(true, Ordering::SeqCst);
            }
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }
}
