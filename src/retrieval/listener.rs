use super::Retrieval;

/// Receives the outcome of a [`Retrieval`].
///
/// `cached` fires at most once, before `complete`, when a cached copy was
/// available at start. `complete` fires exactly once per attached listener,
/// including for cancelled and failed retrievals.
pub trait RetrievalListener: Send + Sync {
    fn cached(&self, retrieval: &Retrieval);

    fn complete(&self, retrieval: &Retrieval);
}

type Callback = Box<dyn Fn(&Retrieval) + Send + Sync>;

/// Closure-backed listener for callers interested in only one of the events.
///
/// ```rust,ignore
/// retrieval.add_listener(listener::on_complete(|r| println!("{:?}", r.status())));
/// ```
pub struct FnListener {
    on_cached: Option<Callback>,
    on_complete: Option<Callback>,
}

impl FnListener {
    pub fn on_cached(mut self, f: impl Fn(&Retrieval) + Send + Sync + 'static) -> Self {
        self.on_cached = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(&Retrieval) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

impl RetrievalListener for FnListener {
    fn cached(&self, retrieval: &Retrieval) {
        if let Some(ref f) = self.on_cached {
            f(retrieval);
        }
    }

    fn complete(&self, retrieval: &Retrieval) {
        if let Some(ref f) = self.on_complete {
            f(retrieval);
        }
    }
}

pub fn on_complete(f: impl Fn(&Retrieval) + Send + Sync + 'static) -> FnListener {
    FnListener {
        on_cached: None,
        on_complete: None,
    }
    .on_complete(f)
}

pub fn on_cached(f: impl Fn(&Retrieval) + Send + Sync + 'static) -> FnListener {
    FnListener {
        on_cached: None,
        on_complete: None,
    }
    .on_cached(f)
}

impl<T: RetrievalListener + ?Sized> RetrievalListener for std::sync::Arc<T> {
    fn cached(&self, retrieval: &Retrieval) {
        (**self).cached(retrieval)
    }

    fn complete(&self, retrieval: &Retrieval) {
        (**self).complete(retrieval)
    }
}
