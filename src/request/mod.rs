//! Deferred units of work.
//!
//! A [`Request`] wraps a closure producing a `Result<T>`. It can be run on
//! the graph's [`WorkerPool`], waited on, or created already finished.
//! Waiting on a request that no worker has picked up yet runs it on the
//! waiting thread, so nested waits from inside workers never starve the pool.

mod pool;

pub use pool::WorkerPool;

use crate::error::{EngineError, Result};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

type Job<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;
type FinishedCallback<T> = Box<dyn FnOnce(&T) + Send + 'static>;
type FailedCallback = Box<dyn FnOnce(&EngineError) + Send + 'static>;

enum State<T> {
    Pending(Job<T>),
    Running,
    Finished(Result<T>),
    Consumed,
}

struct Callbacks<T> {
    finished: Vec<FinishedCallback<T>>,
    failed: Vec<FailedCallback>,
}

impl<T> Default for Callbacks<T> {
    fn default() -> Self {
        Self {
            finished: Vec::new(),
            failed: Vec::new(),
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    callbacks: Mutex<Callbacks<T>>,
    done: Condvar,
}

pub struct Request<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Request<T> {
    /// Create an unsubmitted request.
    pub fn new<F>(job: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::from_state(State::Pending(Box::new(job)))
    }

    /// Create a request that is already finished with `value`.
    pub fn with_value(value: T) -> Self {
        Self::from_state(State::Finished(Ok(value)))
    }

    /// Create a request and hand it to `pool` straight away.
    pub fn spawn<F>(pool: &WorkerPool, job: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        Self::new(job).submit(pool)
    }

    fn from_state(state: State<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                callbacks: Mutex::new(Callbacks::default()),
                done: Condvar::new(),
            }),
        }
    }

    /// Queue the request on `pool`. Submitting a finished request is a no-op.
    pub fn submit(self, pool: &WorkerPool) -> Self {
        if matches!(*self.shared.state.lock(), State::Pending(_)) {
            let shared = self.shared.clone();
            pool.spawn(Box::new(move || Self::run(&shared)));
        }
        self
    }

    /// Register a callback for successful completion.
    ///
    /// It runs on the completing thread before any waiter wakes. On a request
    /// that is already running or finished it runs on the calling thread once
    /// the result is available.
    pub fn notify_finished<F>(self, f: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        while matches!(*state, State::Running) {
            self.shared.done.wait(&mut state);
        }
        match &*state {
            State::Pending(_) => self.shared.callbacks.lock().finished.push(Box::new(f)),
            State::Finished(Ok(value)) => f(value),
            _ => {}
        }
        drop(state);
        self
    }

    /// Register a callback for failure. Same timing as `notify_finished`.
    pub fn notify_failed<F>(self, f: F) -> Self
    where
        F: FnOnce(&EngineError) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        while matches!(*state, State::Running) {
            self.shared.done.wait(&mut state);
        }
        match &*state {
            State::Pending(_) => self.shared.callbacks.lock().failed.push(Box::new(f)),
            State::Finished(Err(e)) => f(e),
            _ => {}
        }
        drop(state);
        self
    }

    /// True while no thread has started the job yet.
    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Pending(_))
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            *self.shared.state.lock(),
            State::Finished(_) | State::Consumed
        )
    }

    /// Block until the result is available and return it.
    pub fn wait(self) -> Result<T> {
        Self::run(&self.shared);

        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Consumed) {
                State::Finished(result) => return result,
                State::Consumed => {
                    return Err(EngineError::ContractViolation(
                        "request result was already taken".to_string(),
                    ))
                }
                other => {
                    *state = other;
                    self.shared.done.wait(&mut state);
                }
            }
        }
    }

    /// Run the job if nobody has started it yet.
    fn run(shared: &Shared<T>) {
        let job = {
            let mut state = shared.state.lock();
            match std::mem::replace(&mut *state, State::Running) {
                State::Pending(job) => job,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!("Request panicked: {}", message);
            Err(EngineError::WorkerPool(format!(
                "request panicked: {message}"
            )))
        });

        let callbacks = std::mem::take(&mut *shared.callbacks.lock());
        let notified = catch_unwind(AssertUnwindSafe(|| match &result {
            Ok(value) => callbacks.finished.into_iter().for_each(|f| f(value)),
            Err(e) => callbacks.failed.into_iter().for_each(|f| f(e)),
        }));
        if notified.is_err() {
            error!("Request completion callback panicked");
        }

        *shared.state.lock() = State::Finished(result);
        shared.done.notify_all();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_wait_runs_unsubmitted_job_inline() {
        let caller = std::thread::current().id();
        let request = Request::new(move || Ok(std::thread::current().id() == caller));
        assert!(request.wait().unwrap());
    }

    #[test]
    fn test_pending_until_run() {
        let request = Request::new(|| Ok(1));
        assert!(request.is_pending());
        assert!(!request.is_finished());

        let request = Request::with_value(1);
        assert!(!request.is_pending());
    }

    #[test]
    fn test_submitted_job_completes() {
        let pool = WorkerPool::new(2);
        let request = Request::spawn(&pool, || Ok(6 * 7));
        assert_eq!(request.wait().unwrap(), 42);
    }

    #[test]
    fn test_with_value_is_finished() {
        let request = Request::with_value("done");
        assert!(request.is_finished());

        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let request = request.notify_finished(move |v| *s.lock() = Some(*v));
        assert_eq!(*seen.lock(), Some("done"));
        assert_eq!(request.wait().unwrap(), "done");
    }

    #[test]
    fn test_callbacks_run_before_waiters_wake() {
        let pool = WorkerPool::new(1);
        let finished = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let f = finished.clone();
        let request = Request::new(|| Ok(1))
            .notify_finished(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .submit(&pool);
        request.wait().unwrap();
        assert_eq!(finished.load(Ordering::SeqCst), 1);

        let f = failed.clone();
        let request = Request::<()>::new(|| Err(EngineError::SlotNotReady("x".into())))
            .notify_failed(move |e| {
                assert!(matches!(e, EngineError::SlotNotReady(_)));
                f.fetch_add(1, Ordering::SeqCst);
            })
            .submit(&pool);
        assert!(request.wait().is_err());
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_becomes_error() {
        let request = Request::<()>::new(|| panic!("boom"));
        let err = request.wait().unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_nested_wait_on_single_worker() {
        let pool = Arc::new(WorkerPool::new(1));
        let inner_pool = pool.clone();
        let outer = Request::spawn(&pool, move || {
            // Only worker is busy with us; the inner wait must steal its job.
            let inner = Request::spawn(&inner_pool, || Ok(5));
            Ok(inner.wait()? + 1)
        });
        assert_eq!(outer.wait().unwrap(), 6);
    }
}
