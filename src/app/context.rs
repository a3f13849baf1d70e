use std::sync::Arc;

use tokio::runtime::Handle;

use crate::app::error::Result;
use crate::cache::DiskCache;
use crate::config::Config;
use crate::service::{RetrievalService, RetrievalServiceBuilder};

pub struct AppContext {
    pub config: Config,
    pub service: RetrievalService,
    /// Concrete handle on the service's cache for maintenance commands
    pub cache: Option<Arc<DiskCache>>,
}

impl AppContext {
    /// Load the user's config and build the service on the current runtime.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::load()?, Handle::current())
    }

    pub fn with_workers(workers: usize) -> Result<Self> {
        let mut config = Config::load()?;
        config.service.workers = workers;
        Self::with_config(config, Handle::current())
    }

    pub fn with_config(config: Config, runtime: Handle) -> Result<Self> {
        let cache = if config.cache.enabled {
            let directory = config.cache.directory()?;
            Some(Arc::new(DiskCache::with_expiry(
                directory,
                config.cache.expiry(),
            )?))
        } else {
            None
        };

        let mut builder = RetrievalServiceBuilder::from_config(&config)?;
        if let Some(ref cache) = cache {
            builder = builder.shared_cache(cache.clone());
        }

        Ok(Self {
            service: builder.build(runtime),
            config,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.cache.directory = Some(dir.path().join("cache"));
        config
    }

    #[tokio::test]
    async fn test_context_wires_cache_into_service() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::with_config(config_in(&dir), Handle::current()).unwrap();

        assert!(ctx.cache.is_some());
        assert!(ctx.service.cache().is_some());
        assert!(dir.path().join("cache").is_dir());
        let url = url::Url::parse("https://example.com/wms").unwrap();
        assert_eq!(ctx.service.retriever_for(&url).unwrap().name(), "http");
    }

    #[tokio::test]
    async fn test_disabled_cache() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.cache.enabled = false;

        let ctx = AppContext::with_config(config, Handle::current()).unwrap();
        assert!(ctx.cache.is_none());
        assert!(ctx.service.cache().is_none());
        assert!(!dir.path().join("cache").exists());
    }
}
