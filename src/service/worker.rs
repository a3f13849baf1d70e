use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::app::RetrievalError;
use crate::cache::CacheEntry;
use crate::domain::{RetrievalResult, RetrievalStatus};
use crate::retrieval::Retrieval;
use crate::retriever::{RetrievalMonitor, Retriever};
use crate::service::Shared;

/// Monitor handed to retrievers; forwards status to the retrieval.
struct WorkerMonitor {
    retrieval: Retrieval,
}

impl RetrievalMonitor for WorkerMonitor {
    fn update_status(&self, status: RetrievalStatus) {
        self.retrieval.advance(status);
    }

    fn is_cancelled(&self) -> bool {
        self.retrieval.is_cancelled()
    }
}

pub(super) async fn run(
    shared: Arc<Shared>,
    retriever: Arc<dyn Retriever>,
    retrieval: Retrieval,
    cached: Option<CacheEntry>,
) {
    let _permit = match shared.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            retrieval.finish(RetrievalResult::failure(RetrievalError::ServiceShutDown));
            return;
        }
    };

    if retrieval.is_cancelled() {
        retrieval.finish(RetrievalResult::cancelled());
        return;
    }

    let monitor = WorkerMonitor {
        retrieval: retrieval.clone(),
    };
    let mut result = fetch_with_retries(
        &shared,
        retriever.as_ref(),
        &retrieval,
        &monitor,
        cached.as_ref(),
    )
    .await;

    if retrieval.is_cancelled() {
        result = RetrievalResult::cancelled();
    } else {
        update_cache(&shared, retriever.as_ref(), &retrieval, &result).await;
    }

    if result.is_successful() {
        info!("retrieved {} ({})", retrieval.key(), result.message());
    } else {
        debug!("retrieval of {} failed: {}", retrieval.key(), result.message());
    }
    retrieval.finish(result);
}

async fn fetch_with_retries(
    shared: &Shared,
    retriever: &dyn Retriever,
    retrieval: &Retrieval,
    monitor: &WorkerMonitor,
    cached: Option<&CacheEntry>,
) -> RetrievalResult {
    let mut attempt = 1;
    loop {
        let result = fetch_once(retriever, retrieval, monitor, cached).await;

        let retry = attempt < shared.max_attempts
            && !retrieval.is_cancelled()
            && result.error().is_some_and(|e| e.is_retryable());
        if !retry {
            return result;
        }

        warn!(
            "attempt {} of {} for {} failed, retrying: {}",
            attempt,
            shared.max_attempts,
            retrieval.key(),
            result.message()
        );
        tokio::select! {
            _ = tokio::time::sleep(shared.retry_backoff * attempt) => {}
            _ = retrieval.cancelled() => return RetrievalResult::cancelled(),
        }
        attempt += 1;
    }
}

async fn fetch_once(
    retriever: &dyn Retriever,
    retrieval: &Retrieval,
    monitor: &WorkerMonitor,
    cached: Option<&CacheEntry>,
) -> RetrievalResult {
    let call = retriever.retrieve(retrieval.url(), monitor, retrieval.properties(), cached);

    tokio::select! {
        outcome = AssertUnwindSafe(call).catch_unwind() => match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                warn!("{} rejected {}: {}", retriever.name(), retrieval.url(), e);
                RetrievalResult::failure(e)
            }
            Err(panic) => {
                error!(
                    "{} panicked retrieving {}: {}",
                    retriever.name(),
                    retrieval.url(),
                    panic_message(panic.as_ref())
                );
                RetrievalResult::failure(RetrievalError::Other(format!(
                    "retriever panicked: {}",
                    panic_message(panic.as_ref())
                )))
            }
        },
        _ = retrieval.cancelled() => RetrievalResult::cancelled(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn update_cache(
    shared: &Shared,
    retriever: &dyn Retriever,
    retrieval: &Retrieval,
    result: &RetrievalResult,
) {
    let Some(cache) = shared.cache.clone() else {
        return;
    };
    let key = retrieval.key().clone();

    let outcome = if result.is_from_cache() {
        // Source confirmed our copy is current
        tokio::task::spawn_blocking(move || cache.touch(&key)).await
    } else if let (Some(data), Some(validators)) = (result.data(), result.validators()) {
        if !retrieval.properties().update_cache || !retriever.caches_results() {
            return;
        }
        let (data, validators) = (data.clone(), validators.clone());
        tokio::task::spawn_blocking(move || cache.store(&key, &data, &validators).map(|_| ()))
            .await
    } else if result.error().is_some_and(|e| e.is_not_found()) {
        debug!("{} no longer exists, dropping cached copy", key);
        tokio::task::spawn_blocking(move || cache.remove(&key)).await
    } else {
        return;
    };

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("cache update for {} failed: {}", retrieval.key(), e),
        Err(e) => error!("cache update task for {} failed: {}", retrieval.key(), e),
    }
}
