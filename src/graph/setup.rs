//! Setup-depth tracking.
//!
//! Every structural change (connect, insert, remove, set_value, operator
//! instantiation) runs inside a setup scope. Scopes nest; when the outermost
//! one closes, callbacks queued with
//! [`Graph::call_when_setup_finished`](super::Graph::call_when_setup_finished)
//! run once, in registration order.

use super::Graph;
use tracing::trace;

pub(crate) type FinishedCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot signal alive while the setup depth is above zero.
#[derive(Default)]
pub(crate) struct SetupComplete {
    callbacks: Vec<FinishedCallback>,
}

impl SetupComplete {
    pub fn subscribe(&mut self, f: FinishedCallback) {
        self.callbacks.push(f);
    }

    pub fn fire(self) {
        for f in self.callbacks {
            f();
        }
    }
}

#[derive(Default)]
pub(crate) struct SetupState {
    pub depth: usize,
    pub pending: Option<SetupComplete>,
}

/// RAII guard for a setup scope. Dropping it leaves the scope.
#[must_use = "the setup scope ends as soon as the guard is dropped"]
pub struct SetupGuard {
    graph: Graph,
}

impl SetupGuard {
    pub(crate) fn enter(graph: &Graph) -> Self {
        let mut state = graph.inner.setup.lock();
        if state.depth == 0 {
            state.pending = Some(SetupComplete::default());
        }
        state.depth += 1;
        trace!(depth = state.depth, "enter setup");
        drop(state);

        Self {
            graph: graph.clone(),
        }
    }
}

impl Drop for SetupGuard {
    fn drop(&mut self) {
        let finished = {
            let mut state = self.graph.inner.setup.lock();
            state.depth = state.depth.saturating_sub(1);
            trace!(depth = state.depth, "leave setup");
            if state.depth == 0 {
                state.pending.take()
            } else {
                None
            }
        };

        // Fired with the lock released so callbacks may start a new setup.
        if let Some(signal) = finished {
            signal.fire();
        }
    }
}
