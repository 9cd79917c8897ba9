//! The operator graph.
//!
//! A [`Graph`] is a cheaply clonable handle to shared state: the slot and
//! operator [`Registry`](registry::Registry), the setup-depth counter, the
//! worker pool and the engine configuration. Operators never store a graph;
//! they are handed an [`OperatorHandle`] in every hook call.
//!
//! # Lock discipline
//!
//! The registry mutex is held only for bookkeeping. Operator hooks and slot
//! observers always run with it released, so they are free to call back into
//! the graph.

pub mod id;
pub(crate) mod registry;
mod setup;

pub use setup::SetupGuard;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::operator::{Operator, OperatorHandle};
use crate::request::WorkerPool;
use crate::roi::Roi;
use crate::slot::{SlotDirection, Value};
use id::{OperatorId, SlotId};
use ndarray::ArrayD;
use parking_lot::{Mutex, MutexGuard};
use registry::{OperatorEntry, Registry, SlotEntry};
use setup::SetupState;
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct GraphInner {
    setup: Mutex<SetupState>,
    registry: Mutex<Registry>,
    pool: WorkerPool,
    config: EngineConfig,
}

#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Arc<GraphInner>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reg = self.registry();
        f.debug_struct("Graph")
            .field("operators", &reg.operator_count())
            .field("slots", &reg.slot_count())
            .field("pool", &self.inner.pool)
            .finish()
    }
}

impl Graph {
    /// Create a graph with the default configuration.
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    /// Create a graph whose worker pool is sized from `config`.
    pub fn with_config(config: &EngineConfig) -> Self {
        Self {
            inner: Arc::new(GraphInner {
                setup: Mutex::new(SetupState::default()),
                registry: Mutex::new(Registry::default()),
                pool: WorkerPool::new(config.worker_threads),
                config: config.clone(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner.registry.lock()
    }

    pub fn ptr_eq(&self, other: &Graph) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ==================== Setup coordination ====================

    /// Enter a setup scope; it ends when the returned guard is dropped.
    pub fn setup_scope(&self) -> SetupGuard {
        SetupGuard::enter(self)
    }

    /// Current setup nesting depth.
    pub fn setup_depth(&self) -> usize {
        self.inner.setup.lock().depth
    }

    /// Run `f` now if no setup is in progress, otherwise once the outermost
    /// setup scope closes.
    pub fn call_when_setup_finished<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.setup.lock();
        if state.depth == 0 {
            drop(state);
            f();
            return;
        }
        match state.pending.as_mut() {
            Some(signal) => signal.subscribe(Box::new(f)),
            None => {
                drop(state);
                f();
            }
        }
    }

    // ==================== Operators ====================

    /// Add a top-level operator to the graph.
    pub fn instantiate<T: Operator>(&self, operator: T) -> Result<OperatorHandle> {
        self.instantiate_with_parent(operator, None)
    }

    pub fn operator(&self, id: OperatorId) -> Result<OperatorHandle> {
        self.registry().operator(id)?;
        Ok(OperatorHandle::new(self.clone(), id))
    }

    pub fn operator_count(&self) -> usize {
        self.registry().operator_count()
    }

    pub fn slot_count(&self) -> usize {
        self.registry().slot_count()
    }

    pub(crate) fn instantiate_with_parent<T: Operator>(
        &self,
        operator: T,
        parent: Option<OperatorId>,
    ) -> Result<OperatorHandle> {
        let _setup = self.setup_scope();
        let behavior = Arc::new(operator);
        let name = behavior.name().to_string();
        let descriptors = behavior.slots().to_vec();

        let id = {
            let mut reg = self.registry();
            if let Some(parent) = parent {
                reg.operator(parent)?;
            }
            let id = reg.add_operator(OperatorEntry {
                name: name.clone(),
                parent,
                children: Vec::new(),
                inputs: Vec::new(),
                outputs: Vec::new(),
                behavior: behavior.clone(),
                any: behavior.clone(),
            });
            for desc in &descriptors {
                let slot = reg.add_slot(SlotEntry::new(
                    desc.name,
                    desc.direction,
                    desc.level,
                    desc.optional,
                    id,
                    None,
                ));
                let entry = reg.operator_mut(id)?;
                match desc.direction {
                    SlotDirection::Input => entry.inputs.push(slot),
                    SlotDirection::Output => entry.outputs.push(slot),
                }
            }
            if let Some(parent) = parent {
                reg.operator_mut(parent)?.children.push(id);
            }
            id
        };
        debug!("Instantiated operator '{}' as {:?}", name, id);

        let handle = OperatorHandle::new(self.clone(), id);
        behavior.on_instantiated(&handle)?;
        self.run_setup(id)?;
        Ok(handle)
    }

    /// Configure `op`'s outputs from its inputs' metadata.
    ///
    /// When a required input is not ready the operator's own leaf outputs are
    /// marked not ready instead.
    pub(crate) fn run_setup(&self, op: OperatorId) -> Result<()> {
        let (behavior, inputs, ready) = {
            let reg = self.registry();
            let Ok(entry) = reg.operator(op) else {
                return Ok(());
            };
            let ready = entry.inputs.iter().all(|&s| {
                reg.slot(s).map(|e| e.optional).unwrap_or(false) || reg.is_ready(s)
            });
            (entry.behavior.clone(), entry.inputs.clone(), ready)
        };
        let _setup = self.setup_scope();
        trace!(?op, ready, inputs = inputs.len(), "run setup");

        if !ready {
            let changed = self.mark_outputs_ready(op, false);
            for slot in changed {
                self.propagate_change(slot)?;
            }
            return Ok(());
        }

        let handle = OperatorHandle::new(self.clone(), op);
        behavior.setup_outputs(&handle)?;
        self.mark_outputs_ready(op, true);

        let outputs = match self.registry().operator(op) {
            Ok(entry) => entry.outputs.clone(),
            Err(_) => return Ok(()),
        };
        for slot in outputs {
            self.propagate_change_tree(slot)?;
        }
        Ok(())
    }

    /// Set `meta.ready` on every unconnected leaf output of `op`; returns the
    /// slots whose flag actually changed.
    fn mark_outputs_ready(&self, op: OperatorId, ready: bool) -> Vec<SlotId> {
        let mut reg = self.registry();
        let outputs = match reg.operator(op) {
            Ok(entry) => entry.outputs.clone(),
            Err(_) => return Vec::new(),
        };
        let mut leaves = Vec::new();
        for out in outputs {
            reg.leaves(out, &mut leaves);
        }

        let mut changed = Vec::new();
        for leaf in leaves {
            if let Ok(slot) = reg.slot_mut(leaf) {
                if slot.upstream.is_none() && slot.meta.ready != ready {
                    slot.meta.ready = ready;
                    changed.push(leaf);
                }
            }
        }
        changed
    }

    /// Push `slot`'s metadata to its downstream partners and re-run setup
    /// of every operator consuming it, recursively.
    pub(crate) fn propagate_change(&self, slot: SlotId) -> Result<()> {
        let (partners, consumer) = {
            let mut reg = self.registry();
            let Ok(entry) = reg.slot(slot) else {
                return Ok(());
            };
            let meta = entry.meta.clone();
            let partners = entry.downstream.clone();
            let consumer = (entry.direction == SlotDirection::Input).then_some(entry.operator);
            for &p in &partners {
                if let Ok(partner) = reg.slot_mut(p) {
                    partner.meta.assign_from(&meta);
                }
            }
            (partners, consumer)
        };

        for p in partners {
            self.propagate_change(p)?;
        }
        if let Some(op) = consumer {
            self.run_setup(op)?;
        }
        Ok(())
    }

    /// `propagate_change` for `slot` and all of its descendants, leaves first.
    pub(crate) fn propagate_change_tree(&self, slot: SlotId) -> Result<()> {
        let children = match self.registry().slot(slot) {
            Ok(entry) => entry.children.clone(),
            Err(_) => return Ok(()),
        };
        for child in children {
            self.propagate_change_tree(child)?;
        }
        self.propagate_change(slot)
    }

    // ==================== Data ====================

    /// Produce the data of `slot` within `roi`.
    ///
    /// Follows the upstream chain to the slot that actually owns the data:
    /// a stored array value is sliced, an operator output is computed by the
    /// operator's `execute`.
    pub(crate) fn compute(&self, slot: SlotId, roi: &Roi) -> Result<ArrayD<f64>> {
        let (behavior, op, top, subindex, shape) = {
            let reg = self.registry();
            let source = reg.resolve(slot)?;
            if !reg.is_ready(source) {
                return Err(EngineError::SlotNotReady(reg.display_name(slot)));
            }
            let entry = reg.slot(source)?;
            match (&entry.value, entry.direction) {
                (Some(Value::Array(array)), _) => {
                    if roi.is_everything() {
                        return Ok(array.as_ref().clone());
                    }
                    return Ok(roi.slice(array)?.to_owned());
                }
                (Some(_), _) => return Err(EngineError::NotAnArray(reg.display_name(slot))),
                (None, SlotDirection::Output) if entry.level == 0 => {
                    let (top, subindex) = reg.path(source)?;
                    let behavior = reg.operator(entry.operator)?.behavior.clone();
                    (behavior, entry.operator, top, subindex, entry.meta.shape.clone())
                }
                _ => return Err(EngineError::SlotNotReady(reg.display_name(slot))),
            }
        };

        let roi = match (&shape, roi.is_everything()) {
            (Some(shape), true) => Roi::full(shape),
            (Some(shape), false) => {
                roi.validate(shape)?;
                roi.clone()
            }
            (None, _) => roi.clone(),
        };

        let handle = OperatorHandle::new(self.clone(), op);
        let top = crate::slot::Slot::new(self.clone(), top);
        let data = behavior.execute(&handle, &top, &subindex, &roi)?;

        if !roi.is_everything() && data.shape() != roi.shape().as_slice() {
            return Err(EngineError::ContractViolation(format!(
                "operator '{}' returned shape {:?} for roi {:?}",
                behavior.name(),
                data.shape(),
                roi
            )));
        }
        Ok(data)
    }

    /// Delete a slot subtree and propagate to the partners it leaves behind.
    pub(crate) fn release_slot(&self, slot: SlotId) -> Vec<SlotId> {
        let mut orphans = Vec::new();
        self.registry().release_slot(slot, &mut orphans);
        orphans
    }

    /// Propagate to orphaned partners that still exist.
    pub(crate) fn propagate_orphans(&self, orphans: Vec<SlotId>) -> Result<()> {
        for slot in orphans {
            if self.registry().has_slot(slot) {
                self.propagate_change(slot)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callback_runs_immediately_outside_setup() {
        let graph = Graph::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        graph.call_when_setup_finished(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(graph.setup_depth(), 0);
    }

    #[test]
    fn test_callback_deferred_until_outermost_scope_closes() {
        let graph = Graph::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let outer = graph.setup_scope();
        {
            let _inner = graph.setup_scope();
            assert_eq!(graph.setup_depth(), 2);
            let c = calls.clone();
            graph.call_when_setup_finished(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let _again = graph.setup_scope();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        drop(outer);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A fresh setup does not re-fire the old callback.
        drop(graph.setup_scope());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_start_new_setup() {
        let graph = Graph::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let scope = graph.setup_scope();
        let g = graph.clone();
        let c = calls.clone();
        graph.call_when_setup_finished(move || {
            let _nested = g.setup_scope();
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(scope);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(graph.setup_depth(), 0);
    }

    #[test]
    fn test_with_config_sizes_pool() {
        let config = EngineConfig {
            worker_threads: 3,
            ..Default::default()
        };
        let graph = Graph::with_config(&config);
        assert_eq!(graph.pool().workers(), 3);
        assert_eq!(graph.config().worker_threads, 3);
    }

    #[test]
    fn test_resize_cycles_reuse_registry_cells() {
        use crate::operator::{OperatorWrapper, WrapperConfig};
        use crate::operators::OpArrayPiper;

        let graph = Graph::new();
        let wrapped = graph
            .instantiate(OperatorWrapper::new(OpArrayPiper::new, WrapperConfig::default()).unwrap())
            .unwrap();
        let input = wrapped.input("Input").unwrap();

        input.resize(4).unwrap();
        let capacity = graph.registry().slot_capacity();
        let slots = graph.slot_count();
        for _ in 0..20 {
            input.resize(0).unwrap();
            input.resize(4).unwrap();
        }
        assert_eq!(graph.slot_count(), slots);
        assert_eq!(graph.operator_count(), 5);
        assert_eq!(graph.registry().slot_capacity(), capacity);
    }
}
