//! The shared handle for one logical fetch.
//!
//! Listener notifications go through a per-retrieval queue that one thread
//! drains at a time. Events are enqueued under the state lock and callbacks
//! run without it, so a listener may call back into its retrieval.

pub mod listener;

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tracing::{debug, error};
use url::Url;

use crate::app::{Result, RetrievalError};
use crate::domain::{
    RetrievalData, RetrievalKey, RetrievalProperties, RetrievalResult, RetrievalStatus,
};
use crate::service::Shared;

pub use listener::{FnListener, RetrievalListener};

/// Identifies an attached listener for [`Retrieval::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
enum Event {
    Cached,
    Complete,
}

struct Slot {
    id: ListenerId,
    listener: Arc<dyn RetrievalListener>,
}

struct State {
    status: RetrievalStatus,
    history: Vec<RetrievalStatus>,
    result: Option<RetrievalResult>,
    cached: Option<RetrievalData>,
    listeners: Vec<Slot>,
    queue: VecDeque<(ListenerId, Event)>,
    dispatching: bool,
    next_id: u64,
}

impl State {
    fn set_status(&mut self, status: RetrievalStatus) {
        self.status = status;
        self.history.push(status);
    }
}

struct Inner {
    key: RetrievalKey,
    url: Url,
    properties: RetrievalProperties,
    state: Mutex<State>,
    done: Condvar,
    status_tx: watch::Sender<RetrievalStatus>,
    cancelled: AtomicBool,
    cancel_notify: Notify,
    service: Weak<Shared>,
}

/// Handle for one logical fetch, shared by every caller that asked for the same key.
///
/// Cancelling a shared retrieval cancels it for all callers sharing it.
#[derive(Clone)]
pub struct Retrieval {
    inner: Arc<Inner>,
}

impl Retrieval {
    pub(crate) fn new(
        key: RetrievalKey,
        url: Url,
        properties: RetrievalProperties,
        service: Weak<Shared>,
    ) -> Self {
        let (status_tx, _) = watch::channel(RetrievalStatus::NotStarted);
        Self {
            inner: Arc::new(Inner {
                key,
                url,
                properties,
                state: Mutex::new(State {
                    status: RetrievalStatus::NotStarted,
                    history: vec![RetrievalStatus::NotStarted],
                    result: None,
                    cached: None,
                    listeners: Vec::new(),
                    queue: VecDeque::new(),
                    dispatching: false,
                    next_id: 0,
                }),
                done: Condvar::new(),
                status_tx,
                cancelled: AtomicBool::new(false),
                cancel_notify: Notify::new(),
                service,
            }),
        }
    }

    // Callbacks never run under this lock, so poisoning can only come from a
    // bug in this module; the state is still consistent in that case.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &RetrievalKey {
        &self.inner.key
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn properties(&self) -> &RetrievalProperties {
        &self.inner.properties
    }

    pub fn status(&self) -> RetrievalStatus {
        self.lock().status
    }

    /// Every status this retrieval has been in, oldest first.
    pub fn status_history(&self) -> Vec<RetrievalStatus> {
        self.lock().history.clone()
    }

    pub fn result(&self) -> Option<RetrievalResult> {
        self.lock().result.clone()
    }

    /// Cached data delivered through `cached()`, if any.
    pub fn cached_data(&self) -> Option<RetrievalData> {
        self.lock().cached.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Attach a listener. A listener attached late is replayed everything it
    /// missed: `cached()` if cached data went out, then `complete()` if finished.
    pub fn add_listener<L: RetrievalListener + 'static>(&self, listener: L) -> ListenerId {
        self.add_shared_listener(Arc::new(listener))
    }

    pub fn add_shared_listener(&self, listener: Arc<dyn RetrievalListener>) -> ListenerId {
        let id = {
            let mut state = self.lock();
            let id = ListenerId(state.next_id);
            state.next_id += 1;
            state.listeners.push(Slot { id, listener });
            if state.cached.is_some() {
                state.queue.push_back((id, Event::Cached));
            }
            if state.status.is_terminal() {
                state.queue.push_back((id, Event::Complete));
            }
            id
        };
        self.drain();
        id
    }

    /// Detach a listener. Events not yet delivered to it are dropped.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|slot| slot.id != id);
        state.listeners.len() != before
    }

    /// Begin fetching. Calling this again, or on a finished retrieval, does nothing.
    pub fn start(&self) {
        {
            let mut state = self.lock();
            if state.status != RetrievalStatus::NotStarted {
                return;
            }
            state.set_status(RetrievalStatus::Started);
            self.inner.status_tx.send_replace(RetrievalStatus::Started);
        }
        debug!("starting retrieval of {}", self.inner.key);

        match self.inner.service.upgrade() {
            Some(service) => service.launch(self.clone()),
            None => {
                self.finish(RetrievalResult::failure(RetrievalError::ServiceShutDown));
            }
        }
    }

    /// Request cancellation for every caller sharing this retrieval.
    ///
    /// A retrieval that never started finishes as cancelled right away. A
    /// queued one never reaches its retriever. A running one is told through
    /// its monitor and stops being awaited.
    /// Has no effect once the retrieval has finished.
    pub fn cancel(&self) {
        {
            // Under the state lock so a concurrent finish() cannot slip in between
            let state = self.lock();
            if state.status.is_terminal() {
                return;
            }
            self.inner.cancelled.store(true, Ordering::SeqCst);
        }
        self.inner.cancel_notify.notify_one();

        if self.status() == RetrievalStatus::NotStarted {
            self.finish(RetrievalResult::cancelled());
        }
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub(crate) async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.cancel_notify.notified().await;
    }

    /// Wait for the terminal result.
    pub async fn wait(&self) -> RetrievalResult {
        let mut rx = self.inner.status_tx.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.result()
            .unwrap_or_else(|| RetrievalResult::failure(RetrievalError::ServiceShutDown))
    }

    /// Block the current thread until the terminal result is available.
    ///
    /// Bridge for synchronous call sites only; must not be called from inside
    /// the async runtime driving the service.
    pub fn wait_blocking(&self, timeout: Duration) -> Result<RetrievalResult> {
        let state = self.lock();
        let (state, _) = self
            .inner
            .done
            .wait_timeout_while(state, timeout, |s| s.result.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        state.result.clone().ok_or(RetrievalError::Timeout(timeout))
    }

    /// Never started, and no handle remains outside the service's in-flight map.
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.inner) == 1 && self.status() == RetrievalStatus::NotStarted
    }

    /// Move forward to a non-terminal status. Regressions and repeats are ignored.
    pub(crate) fn advance(&self, status: RetrievalStatus) {
        if status.is_terminal() {
            return;
        }
        let mut state = self.lock();
        if state.status.can_advance_to(status) {
            state.set_status(status);
            self.inner.status_tx.send_replace(status);
            debug!("{} -> {}", self.inner.key, status);
        }
    }

    /// Publish cached data to all listeners. Only the first call has any effect.
    pub(crate) fn deliver_cached(&self, data: RetrievalData) {
        {
            let mut state = self.lock();
            if state.cached.is_some() || state.status.is_terminal() {
                return;
            }
            state.cached = Some(data);
            let ids: Vec<ListenerId> = state.listeners.iter().map(|s| s.id).collect();
            state
                .queue
                .extend(ids.into_iter().map(|id| (id, Event::Cached)));
        }
        self.drain();
    }

    /// Record the terminal result and notify listeners. Returns false if the
    /// retrieval had already finished.
    pub(crate) fn finish(&self, result: RetrievalResult) -> bool {
        let status = if result.is_cancelled() {
            RetrievalStatus::Cancelled
        } else if result.is_successful() {
            RetrievalStatus::Complete
        } else {
            RetrievalStatus::Error
        };

        {
            let mut state = self.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.set_status(status);
            state.result = Some(result);
            let ids: Vec<ListenerId> = state.listeners.iter().map(|s| s.id).collect();
            state
                .queue
                .extend(ids.into_iter().map(|id| (id, Event::Complete)));
            self.inner.status_tx.send_replace(status);
            self.inner.done.notify_all();
        }
        debug!("retrieval of {} finished: {}", self.inner.key, status);

        if let Some(service) = self.inner.service.upgrade() {
            service.evict(self);
        }
        self.drain();
        true
    }

    fn drain(&self) {
        {
            let mut state = self.lock();
            if state.dispatching {
                // The active dispatcher picks up what we queued
                return;
            }
            state.dispatching = true;
        }

        loop {
            let next = {
                let mut state = self.lock();
                loop {
                    match state.queue.pop_front() {
                        None => {
                            state.dispatching = false;
                            break None;
                        }
                        Some((id, event)) => {
                            // Skip events for listeners removed since they were queued
                            if let Some(slot) = state.listeners.iter().find(|s| s.id == id) {
                                break Some((slot.listener.clone(), event));
                            }
                        }
                    }
                }
            };

            let Some((listener, event)) = next else {
                return;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                Event::Cached => listener.cached(self),
                Event::Complete => listener.complete(self),
            }));
            if outcome.is_err() {
                error!(
                    "listener panicked during {:?} for {}",
                    event, self.inner.key
                );
            }
        }
    }
}

impl PartialEq for Retrieval {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Retrieval {}

impl fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrieval")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::domain::CacheValidators;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    impl RetrievalListener for Recorder {
        fn cached(&self, _: &Retrieval) {
            self.events.lock().unwrap().push("cached");
        }

        fn complete(&self, _: &Retrieval) {
            self.events.lock().unwrap().push("complete");
        }
    }

    fn detached() -> Retrieval {
        let url = Url::parse("https://example.com/layer.xml").unwrap();
        let props = RetrievalProperties::default();
        Retrieval::new(RetrievalKey::new(&url, &props), url, props, Weak::new())
    }

    fn ok_result() -> RetrievalResult {
        RetrievalResult::success(
            RetrievalData::from_bytes(&b"fresh"[..]),
            CacheValidators::default(),
        )
    }

    #[test]
    fn test_cached_then_complete_in_order() {
        let retrieval = detached();
        let recorder = Arc::new(Recorder::default());
        retrieval.add_listener(recorder.clone());

        retrieval.deliver_cached(RetrievalData::from_bytes(&b"stale"[..]));
        retrieval.deliver_cached(RetrievalData::from_bytes(&b"again"[..]));
        assert!(retrieval.finish(ok_result()));
        assert!(!retrieval.finish(RetrievalResult::cancelled()));

        assert_eq!(recorder.events(), vec!["cached", "complete"]);
        assert_eq!(retrieval.status(), RetrievalStatus::Complete);
        assert_eq!(
            retrieval.cached_data().unwrap().read_all().unwrap(),
            &b"stale"[..]
        );
    }

    #[test]
    fn test_late_listener_gets_full_replay() {
        let retrieval = detached();
        retrieval.deliver_cached(RetrievalData::from_bytes(&b"stale"[..]));
        retrieval.finish(ok_result());

        let recorder = Arc::new(Recorder::default());
        retrieval.add_listener(recorder.clone());
        assert_eq!(recorder.events(), vec!["cached", "complete"]);
    }

    #[test]
    fn test_removed_listener_is_not_notified() {
        let retrieval = detached();
        let kept = Arc::new(Recorder::default());
        let dropped = Arc::new(Recorder::default());
        retrieval.add_listener(kept.clone());
        let id = retrieval.add_listener(dropped.clone());

        assert!(retrieval.remove_listener(id));
        assert!(!retrieval.remove_listener(id));
        retrieval.finish(ok_result());

        assert_eq!(kept.events(), vec!["complete"]);
        assert!(dropped.events().is_empty());
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let retrieval = detached();
        retrieval.add_listener(listener::on_complete(|_| panic!("listener bug")));
        let recorder = Arc::new(Recorder::default());
        retrieval.add_listener(recorder.clone());

        retrieval.finish(ok_result());

        assert_eq!(recorder.events(), vec!["complete"]);
        assert!(retrieval.result().unwrap().is_successful());
    }

    #[test]
    fn test_listener_may_attach_from_callback() {
        let retrieval = detached();
        let inner = Arc::new(Recorder::default());
        let nested = inner.clone();
        retrieval.add_listener(listener::on_complete(move |r| {
            r.add_listener(nested.clone());
        }));

        retrieval.finish(ok_result());
        assert_eq!(inner.events(), vec!["complete"]);
    }

    #[test]
    fn test_status_only_moves_forward() {
        let retrieval = detached();
        retrieval.advance(RetrievalStatus::Reading);
        retrieval.advance(RetrievalStatus::Connecting);
        retrieval.advance(RetrievalStatus::Complete);
        assert_eq!(retrieval.status(), RetrievalStatus::Reading);

        retrieval.finish(RetrievalResult::failure(RetrievalError::Http {
            status: 500,
            url: "https://example.com/layer.xml".into(),
        }));
        retrieval.advance(RetrievalStatus::Reading);
        assert_eq!(
            retrieval.status_history(),
            vec![
                RetrievalStatus::NotStarted,
                RetrievalStatus::Reading,
                RetrievalStatus::Error
            ]
        );
    }

    #[test]
    fn test_cancel_before_start_finishes_immediately() {
        let retrieval = detached();
        let completions = Arc::new(AtomicUsize::new(0));
        let counter = completions.clone();
        retrieval.add_listener(listener::on_complete(move |r| {
            assert!(r.result().unwrap().is_cancelled());
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        retrieval.cancel();
        retrieval.start();

        assert_eq!(retrieval.status(), RetrievalStatus::Cancelled);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_after_finish_is_ignored() {
        let retrieval = detached();
        retrieval.finish(ok_result());
        retrieval.cancel();

        assert!(!retrieval.is_cancelled());
        assert_eq!(retrieval.status(), RetrievalStatus::Complete);
        assert!(retrieval.result().unwrap().is_successful());
    }

    #[test]
    fn test_abandoned_only_when_unstarted_and_unshared() {
        let retrieval = detached();
        assert!(retrieval.is_abandoned());

        let other = retrieval.clone();
        assert!(!retrieval.is_abandoned());
        drop(other);

        retrieval.cancel();
        assert!(!retrieval.is_abandoned());
    }

    #[test]
    fn test_start_without_service_fails() {
        let retrieval = detached();
        retrieval.start();
        let result = retrieval.result().unwrap();
        assert!(matches!(result.error(), Some(RetrievalError::ServiceShutDown)));
        assert_eq!(retrieval.status(), RetrievalStatus::Error);
    }

    #[test]
    fn test_wait_blocking_times_out() {
        let retrieval = detached();
        let outcome = retrieval.wait_blocking(Duration::from_millis(20));
        assert!(matches!(outcome, Err(RetrievalError::Timeout(_))));
    }

    #[test]
    fn test_concurrent_attach_never_drops_complete() {
        for _ in 0..50 {
            let retrieval = detached();
            let count = Arc::new(AtomicUsize::new(0));

            let attachers: Vec<_> = (0..4)
                .map(|_| {
                    let retrieval = retrieval.clone();
                    let count = count.clone();
                    std::thread::spawn(move || {
                        for _ in 0..10 {
                            let count = count.clone();
                            retrieval.add_listener(listener::on_complete(move |_| {
                                count.fetch_add(1, Ordering::SeqCst);
                            }));
                        }
                    })
                })
                .collect();
            let finisher = {
                let retrieval = retrieval.clone();
                std::thread::spawn(move || {
                    retrieval.finish(ok_result());
                })
            };

            for t in attachers {
                t.join().unwrap();
            }
            finisher.join().unwrap();

            // Drain any events still queued behind another thread's dispatch
            retrieval.drain();
            assert_eq!(count.load(Ordering::SeqCst), 40);
        }
    }
}
