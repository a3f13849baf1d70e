use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request configuration.
///
/// Only `accept` and `headers` change which bytes come back, so only those
/// feed into the [`RetrievalKey`](super::RetrievalKey).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalProperties {
    /// Deliver a cached copy (if any) before going to the network
    pub use_cache: bool,
    /// Write successful network results back into the cache
    pub update_cache: bool,
    /// Never touch the network; fail if nothing is cached
    pub cache_only: bool,
    /// Connect + read timeout for network retrievers
    pub timeout: Duration,
    /// Overrides the cache's expiry window for this request
    pub max_age: Option<Duration>,
    pub accept: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Default for RetrievalProperties {
    fn default() -> Self {
        Self {
            use_cache: true,
            update_cache: true,
            cache_only: false,
            timeout: DEFAULT_TIMEOUT,
            max_age: None,
            accept: None,
            headers: BTreeMap::new(),
        }
    }
}

impl RetrievalProperties {
    /// Skip the cache in both directions.
    pub fn uncached() -> Self {
        Self {
            use_cache: false,
            update_cache: false,
            ..Default::default()
        }
    }

    /// Show cached data but always revalidate against the source.
    pub fn refresh() -> Self {
        Self {
            max_age: Some(Duration::ZERO),
            ..Default::default()
        }
    }

    pub fn offline() -> Self {
        Self {
            cache_only: true,
            ..Default::default()
        }
    }

    pub fn with_use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_update_cache(mut self, update_cache: bool) -> Self {
        self.update_cache = update_cache;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }
}
