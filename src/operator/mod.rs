//! The operator contract.
//!
//! An operator declares its slots through static [`SlotDescriptor`]s and
//! implements three hooks:
//!
//! - [`Operator::setup_outputs`] configures output metadata from input
//!   metadata. It runs whenever an input changes and all required inputs are
//!   ready.
//! - [`Operator::execute`] computes the data of one output (sub-)slot
//!   within a region of interest.
//! - [`Operator::propagate_dirty`] translates a dirty input region into dirty
//!   output regions.
//!
//! Operators are shared (`Arc<dyn Operator>`) and may be executed from many
//! worker threads at once, so any interior state needs its own
//! synchronization.

pub mod wrapper;

pub use wrapper::{OperatorWrapper, WrapperConfig};

use crate::error::{EngineError, Result};
use crate::graph::id::OperatorId;
use crate::graph::Graph;
use crate::roi::Roi;
use crate::slot::{Slot, SlotDescriptor, SlotDirection};
use ndarray::ArrayD;
use std::sync::Arc;
use tracing::debug;

pub trait Operator: Send + Sync + 'static {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Declared slots, inputs and outputs in any order.
    fn slots(&self) -> &[SlotDescriptor];

    /// Called once after the operator's slots exist, before its first setup.
    fn on_instantiated(&self, _op: &OperatorHandle) -> Result<()> {
        Ok(())
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()>;

    /// Compute `roi` of `slot`; `subindex` addresses the sub-slot of a
    /// multi-level output.
    fn execute(
        &self,
        op: &OperatorHandle,
        slot: &Slot,
        subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>>;

    /// React to `roi` of input `slot` (sub-slot `subindex`) becoming dirty.
    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        slot: &Slot,
        subindex: &[usize],
        roi: &Roi,
    ) -> Result<()>;

    /// Release resources before the operator's slots are torn down.
    fn cleanup(&self, _op: &OperatorHandle) -> Result<()> {
        Ok(())
    }
}

/// Handle onto an instantiated operator.
#[derive(Clone)]
pub struct OperatorHandle {
    graph: Graph,
    id: OperatorId,
}

impl PartialEq for OperatorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.graph.ptr_eq(&other.graph)
    }
}

impl Eq for OperatorHandle {}

impl std::fmt::Debug for OperatorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.name().unwrap_or_else(|_| "<released>".to_string());
        write!(f, "OperatorHandle({:?} '{}')", self.id, name)
    }
}

impl OperatorHandle {
    pub(crate) fn new(graph: Graph, id: OperatorId) -> Self {
        Self { graph, id }
    }

    pub fn id(&self) -> OperatorId {
        self.id
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.graph.registry().operator(self.id)?.name.clone())
    }

    pub fn is_alive(&self) -> bool {
        self.graph.registry().has_operator(self.id)
    }

    pub fn parent(&self) -> Result<Option<OperatorHandle>> {
        let parent = self.graph.registry().operator(self.id)?.parent;
        Ok(parent.map(|p| OperatorHandle::new(self.graph.clone(), p)))
    }

    pub fn children(&self) -> Result<Vec<OperatorHandle>> {
        let children = self.graph.registry().operator(self.id)?.children.clone();
        Ok(children
            .into_iter()
            .map(|c| OperatorHandle::new(self.graph.clone(), c))
            .collect())
    }

    /// The concrete operator behind this handle.
    pub fn behavior<T: Operator>(&self) -> Option<Arc<T>> {
        let any = self.graph.registry().operator(self.id).ok()?.any.clone();
        any.downcast::<T>().ok()
    }

    pub fn input(&self, name: &str) -> Result<Slot> {
        self.slot(name, SlotDirection::Input)
    }

    pub fn output(&self, name: &str) -> Result<Slot> {
        self.slot(name, SlotDirection::Output)
    }

    pub fn inputs(&self) -> Result<Vec<Slot>> {
        let ids = self.graph.registry().operator(self.id)?.inputs.clone();
        Ok(ids
            .into_iter()
            .map(|s| Slot::new(self.graph.clone(), s))
            .collect())
    }

    pub fn outputs(&self) -> Result<Vec<Slot>> {
        let ids = self.graph.registry().operator(self.id)?.outputs.clone();
        Ok(ids
            .into_iter()
            .map(|s| Slot::new(self.graph.clone(), s))
            .collect())
    }

    fn slot(&self, name: &str, direction: SlotDirection) -> Result<Slot> {
        let reg = self.graph.registry();
        let entry = reg.operator(self.id)?;
        let ids = match direction {
            SlotDirection::Input => &entry.inputs,
            SlotDirection::Output => &entry.outputs,
        };
        for &id in ids {
            if reg.slot(id)?.name == name {
                return Ok(Slot::new(self.graph.clone(), id));
            }
        }
        Err(EngineError::NoSuchSlotName {
            operator: entry.name.clone(),
            slot: name.to_string(),
        })
    }

    /// Instantiate `operator` as a child of this one.
    pub fn instantiate_child<T: Operator>(&self, operator: T) -> Result<OperatorHandle> {
        self.graph.instantiate_with_parent(operator, Some(self.id))
    }

    /// Tear the operator down.
    ///
    /// The operator's own `cleanup` hook runs first, then every child
    /// operator is cleaned up, then all slots are disconnected and released.
    /// Downstream slots that were fed by this operator are left unconnected.
    pub fn cleanup(&self) -> Result<()> {
        let _setup = self.graph.setup_scope();
        let behavior = match self.graph.registry().operator(self.id) {
            Ok(entry) => entry.behavior.clone(),
            Err(_) => return Ok(()),
        };

        behavior.cleanup(self)?;

        for child in self.children()? {
            child.cleanup()?;
        }

        let slots: Vec<Slot> = self
            .inputs()?
            .into_iter()
            .chain(self.outputs()?)
            .collect();
        for slot in &slots {
            slot.disconnect()?;
        }

        let mut orphans = Vec::new();
        {
            let mut reg = self.graph.registry();
            for slot in &slots {
                reg.release_slot(slot.id(), &mut orphans);
            }
            if let Some(entry) = reg.remove_operator(self.id) {
                if let Some(parent) = entry.parent {
                    if let Ok(parent) = reg.operator_mut(parent) {
                        parent.children.retain(|&c| c != self.id);
                    }
                }
            }
        }
        debug!("Cleaned up operator {:?}", self.id);

        self.graph.propagate_orphans(orphans)
    }
}
