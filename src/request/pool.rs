//! Shared worker pool.
//!
//! A fixed set of named threads pulling boxed jobs off an unbounded
//! crossbeam channel. Threads exit once the last sender is dropped, i.e.
//! when the owning graph goes away.

use crossbeam_channel::{unbounded, Sender};
use std::thread;
use tracing::{error, info};

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Task>>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `threads` workers.
    ///
    /// If no thread can be spawned the pool degrades to running every task
    /// inline on the submitting thread.
    pub fn new(threads: usize) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let mut workers = 0;

        for i in 0..threads.max(1) {
            let rx = rx.clone();
            let spawned = thread::Builder::new()
                .name(format!("lazyslot-worker-{i}"))
                .spawn(move || {
                    for task in rx.iter() {
                        task();
                    }
                });
            match spawned {
                Ok(_) => workers += 1,
                Err(e) => error!("Failed to spawn worker thread {}: {}", i, e),
            }
        }

        info!("Worker pool started with {} threads", workers);
        Self {
            sender: (workers > 0).then_some(tx),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub(crate) fn spawn(&self, task: Task) {
        match &self.sender {
            Some(tx) => {
                if let Err(rejected) = tx.send(task) {
                    (rejected.0)();
                }
            }
            None => task(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_tasks_run_on_workers() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.workers(), 2);

        let (tx, rx) = bounded(4);
        for i in 0..4 {
            let tx = tx.clone();
            pool.spawn(Box::new(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send((i, name)).unwrap();
            }));
        }

        let mut seen: Vec<_> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_by_key(|(i, _)| *i);
        assert_eq!(seen.len(), 4);
        assert!(seen
            .iter()
            .all(|(_, name)| name.as_deref().unwrap_or("").starts_with("lazyslot-worker-")));
    }
}
