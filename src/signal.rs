//! Ordered, fallible signals.
//!
//! Subscribers are called in subscription order. The first subscriber that
//! returns an error stops the emission and the error is handed back to the
//! emitter wrapped in [`EngineError::Callback`].

use crate::error::{BoxError, EngineError, Result};
use crate::graph::id::ObserverId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Subscriber<A> = Arc<dyn Fn(&A) -> std::result::Result<(), BoxError> + Send + Sync>;

pub struct OrderedSignal<A> {
    subscribers: Mutex<Vec<(ObserverId, Subscriber<A>)>>,
    next_id: AtomicU64,
}

impl<A> Default for OrderedSignal<A> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<A> OrderedSignal<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, f: F) -> ObserverId
    where
        F: Fn(&A) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.lock().push((id, Arc::new(f)));
        id
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Call every subscriber with `args`.
    pub fn emit(&self, args: &A) -> Result<()> {
        let subscribers: Vec<Subscriber<A>> =
            self.subscribers.lock().iter().map(|(_, f)| f.clone()).collect();
        for f in subscribers {
            f(args).map_err(EngineError::callback)?;
        }
        Ok(())
    }
}
