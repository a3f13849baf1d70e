//! The retrieval coordinator.
//!
//! ```text
//! retrieve(url) → Retrieval (shared per key) → start()
//!     → cache lookup → cached() → [fresh? complete()]
//!     → worker pool → Retriever → cache update → complete()
//! ```

mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::app::{Result, RetrievalError};
use crate::cache::Cache;
use crate::config::Config;
use crate::domain::{RetrievalKey, RetrievalProperties, RetrievalResult};
use crate::retrieval::Retrieval;
use crate::retriever::{FileRetriever, HttpRetriever, Retriever};

pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub(crate) struct Shared {
    retrievers: Vec<Arc<dyn Retriever>>,
    cache: Option<Arc<dyn Cache>>,
    in_flight: Mutex<HashMap<RetrievalKey, Retrieval>>,
    semaphore: Arc<Semaphore>,
    runtime: Handle,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Shared {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<RetrievalKey, Retrieval>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop retrievals that were created but never started and whose
    /// handles have all been dropped; nothing could ever start them.
    fn prune_abandoned(in_flight: &mut HashMap<RetrievalKey, Retrieval>) {
        in_flight.retain(|_, retrieval| !retrieval.is_abandoned());
    }

    fn retriever_for(&self, url: &Url) -> Option<Arc<dyn Retriever>> {
        self.retrievers.iter().find(|r| r.supports(url)).cloned()
    }

    /// Drop a finished retrieval from the in-flight map, unless a newer one
    /// already took its key.
    pub(crate) fn evict(&self, retrieval: &Retrieval) {
        let mut in_flight = self.in_flight();
        if in_flight.get(retrieval.key()) == Some(retrieval) {
            in_flight.remove(retrieval.key());
        }
    }

    /// Serve from cache where possible, otherwise queue the fetch on the worker pool.
    pub(crate) fn launch(self: &Arc<Self>, retrieval: Retrieval) {
        let Some(retriever) = self.retriever_for(retrieval.url()) else {
            warn!("no retriever for {}", retrieval.url());
            retrieval.finish(RetrievalResult::failure(RetrievalError::UnsupportedScheme(
                retrieval.url().to_string(),
            )));
            return;
        };

        let properties = retrieval.properties();
        let mut cached = None;

        if properties.use_cache || properties.cache_only {
            if let Some(ref cache) = self.cache {
                match cache.lookup(retrieval.key()) {
                    Ok(Some(entry)) => {
                        retrieval.deliver_cached(entry.data());
                        if cache.is_usable(&entry, properties) {
                            info!("{} served from cache", retrieval.key());
                            retrieval.finish(RetrievalResult::cached(entry.data()));
                            return;
                        }
                        cached = Some(entry);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("cache lookup for {} failed: {}", retrieval.key(), e),
                }
            }
        }

        if properties.cache_only {
            retrieval.finish(RetrievalResult::failure(RetrievalError::NotCached(
                retrieval.url().to_string(),
            )));
            return;
        }

        debug!("queueing {} on {}", retrieval.key(), retriever.name());
        let shared = self.clone();
        self.runtime
            .spawn(worker::run(shared, retriever, retrieval, cached));
    }
}

/// Entry point for all retrievals.
///
/// Construct one per process and hand clones to consumers; clones share the
/// registry, cache, worker pool and in-flight map.
#[derive(Clone)]
pub struct RetrievalService {
    shared: Arc<Shared>,
}

impl RetrievalService {
    pub fn builder() -> RetrievalServiceBuilder {
        RetrievalServiceBuilder::default()
    }

    /// Get the retrieval for `url`, joining one already in flight for the same key.
    ///
    /// Never blocks on I/O. Fails only if `url` does not parse.
    pub fn retrieve(&self, url: &str, properties: RetrievalProperties) -> Result<Retrieval> {
        let url = Url::parse(url)?;
        Ok(self.retrieve_url(&url, properties))
    }

    pub fn retrieve_url(&self, url: &Url, properties: RetrievalProperties) -> Retrieval {
        let key = RetrievalKey::new(url, &properties);
        let mut in_flight = self.shared.in_flight();
        Shared::prune_abandoned(&mut in_flight);

        if let Some(existing) = in_flight.get(&key) {
            if !existing.is_done() {
                debug!("joining in-flight retrieval of {}", key);
                return existing.clone();
            }
        }

        let retrieval = Retrieval::new(
            key.clone(),
            url.clone(),
            properties,
            Arc::downgrade(&self.shared),
        );
        in_flight.insert(key, retrieval.clone());
        retrieval
    }

    /// Number of retrievals created and not yet finished. Unstarted
    /// retrievals whose handles were all dropped are not counted.
    pub fn in_flight(&self) -> usize {
        let mut in_flight = self.shared.in_flight();
        Shared::prune_abandoned(&mut in_flight);
        in_flight.len()
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.shared.cache.as_ref()
    }

    pub fn retriever_for(&self, url: &Url) -> Option<Arc<dyn Retriever>> {
        self.shared.retriever_for(url)
    }
}

pub struct RetrievalServiceBuilder {
    retrievers: Vec<Arc<dyn Retriever>>,
    cache: Option<Arc<dyn Cache>>,
    workers: usize,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Default for RetrievalServiceBuilder {
    fn default() -> Self {
        Self {
            retrievers: Vec::new(),
            cache: None,
            workers: DEFAULT_WORKERS,
            max_attempts: 1,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

impl RetrievalServiceBuilder {
    /// Builder with the file and http retrievers and the configured pool and
    /// retry settings. No cache is attached.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::default()
            .register(FileRetriever::new())
            .register(HttpRetriever::with_config(&config.http.to_http_config())?)
            .workers(config.service.workers)
            .max_attempts(config.service.max_attempts)
            .retry_backoff(Duration::from_millis(config.service.retry_backoff_ms)))
    }

    /// Add a retriever. The first registered retriever that supports a URL handles it.
    pub fn register<R: Retriever + 'static>(self, retriever: R) -> Self {
        self.register_shared(Arc::new(retriever))
    }

    pub fn register_shared(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retrievers.push(retriever);
        self
    }

    pub fn cache<C: Cache + 'static>(mut self, cache: C) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn shared_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Maximum number of retrievers running at once.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Total tries for failures that may be transient. 1 disables retrying.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn build(self, runtime: Handle) -> RetrievalService {
        RetrievalService {
            shared: Arc::new(Shared {
                retrievers: self.retrievers,
                cache: self.cache,
                in_flight: Mutex::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(self.workers)),
                runtime,
                max_attempts: self.max_attempts,
                retry_backoff: self.retry_backoff,
            }),
        }
    }
}
