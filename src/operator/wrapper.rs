//! Lane replication of a single-item operator.
//!
//! [`OperatorWrapper`] turns an operator of type `T` into one that processes
//! a list: every *promoted* slot of `T` gets one extra nesting level on the
//! wrapper, and the wrapper keeps one inner `T` instance ("lane") per entry.
//! Inputs that are not promoted are *broadcast*: a single wrapper slot feeds
//! the same input of every lane. Outputs are always promoted.
//!
//! Lanes are created and destroyed by structural changes on the promoted
//! slots; the wrapper never computes data itself.

use super::{Operator, OperatorHandle};
use crate::error::{EngineError, Result};
use crate::graph::id::{ObserverId, OperatorId, SlotId};
use crate::graph::Graph;
use crate::roi::Roi;
use crate::slot::{Slot, SlotDescriptor};
use ndarray::ArrayD;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Which inputs of the wrapped operator get one lane per entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WrapperConfig {
    promoted: Option<HashSet<String>>,
    broadcast: Option<HashSet<String>>,
}

impl WrapperConfig {
    /// Promote exactly the named inputs; every other input is broadcast.
    pub fn promote<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().with_promoted(names)
    }

    /// Broadcast exactly the named inputs; every other input is promoted.
    pub fn broadcast<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().with_broadcast(names)
    }

    pub fn with_promoted<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.promoted = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_broadcast<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broadcast = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve to the set of promoted input names.
    fn resolve(&self, inputs: &[&'static str]) -> Result<HashSet<&'static str>> {
        let check = |names: &HashSet<String>| -> Result<()> {
            for name in names {
                if !inputs.contains(&name.as_str()) {
                    return Err(EngineError::Config(format!(
                        "'{}' is not an input of the wrapped operator",
                        name
                    )));
                }
            }
            Ok(())
        };

        match (&self.promoted, &self.broadcast) {
            (Some(_), Some(_)) => Err(EngineError::Config(
                "specify either promoted or broadcast slots, not both".to_string(),
            )),
            (Some(promoted), None) => {
                check(promoted)?;
                Ok(inputs
                    .iter()
                    .copied()
                    .filter(|n| promoted.contains(*n))
                    .collect())
            }
            (None, Some(broadcast)) => {
                check(broadcast)?;
                Ok(inputs
                    .iter()
                    .copied()
                    .filter(|n| !broadcast.contains(*n))
                    .collect())
            }
            (None, None) => Ok(inputs.iter().copied().collect()),
        }
    }
}

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

pub struct OperatorWrapper<T: Operator> {
    name: String,
    slots: Vec<SlotDescriptor>,
    state: Arc<WrapperState<T>>,
}

struct WrapperState<T: Operator> {
    factory: Factory<T>,
    inner_slots: Vec<SlotDescriptor>,
    promoted: HashSet<&'static str>,
    lanes: Mutex<Vec<OperatorId>>,
    /// Early-disconnect guards on lane inputs and outer output sub-slots.
    guards: Mutex<HashMap<SlotId, ObserverId>>,
    cleaning_up: Arc<AtomicBool>,
}

impl<T: Operator> OperatorWrapper<T> {
    /// Wrap operators produced by `factory`.
    ///
    /// The factory is called once here to read the inner slot layout, then
    /// once per lane.
    pub fn new<F>(factory: F, config: WrapperConfig) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let prototype = factory();
        let name = format!("Wrapped {}", prototype.name());
        let inner_slots = prototype.slots().to_vec();
        drop(prototype);

        let inputs: Vec<&'static str> = inner_slots
            .iter()
            .filter(|d| d.is_input())
            .map(|d| d.name)
            .collect();
        let mut promoted = config.resolve(&inputs)?;
        promoted.extend(
            inner_slots
                .iter()
                .filter(|d| !d.is_input())
                .map(|d| d.name),
        );

        let slots = inner_slots
            .iter()
            .map(|d| {
                let mut d = d.clone();
                if promoted.contains(d.name) {
                    d.level += 1;
                }
                d
            })
            .collect();

        Ok(Self {
            name,
            slots,
            state: Arc::new(WrapperState {
                factory: Box::new(factory),
                inner_slots,
                promoted,
                lanes: Mutex::new(Vec::new()),
                guards: Mutex::new(HashMap::new()),
                cleaning_up: Arc::new(AtomicBool::new(false)),
            }),
        })
    }

    /// Number of lanes.
    pub fn len(&self) -> usize {
        self.state.lanes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_promoted(&self, name: &str) -> bool {
        self.state.promoted.contains(name)
    }

    pub fn lane_ids(&self) -> Vec<OperatorId> {
        self.state.lanes.lock().clone()
    }

    /// Inner operator of lane `index`.
    pub fn lane(&self, graph: &Graph, index: usize) -> Result<OperatorHandle> {
        let id = self.state.lanes.lock().get(index).copied();
        match id {
            Some(id) => graph.operator(id),
            None => Err(EngineError::ContractViolation(format!(
                "lane {} out of range (len {})",
                index,
                self.len()
            ))),
        }
    }

    /// All inner operators, in lane order.
    pub fn inner_operators(&self, graph: &Graph) -> Result<Vec<OperatorHandle>> {
        self.lane_ids()
            .into_iter()
            .map(|id| graph.operator(id))
            .collect()
    }
}

impl<T: Operator> Operator for OperatorWrapper<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn slots(&self) -> &[SlotDescriptor] {
        &self.slots
    }

    fn on_instantiated(&self, op: &OperatorHandle) -> Result<()> {
        for desc in &self.state.inner_slots {
            let slot = if desc.is_input() {
                op.input(desc.name)?
            } else {
                op.output(desc.name)?
            };
            let promoted = self.state.promoted.contains(desc.name);

            if promoted {
                let state = self.state.clone();
                slot.notify_inserted(move |slot, index, final_len| {
                    state.insert_lane(&slot.operator()?, index, final_len)?;
                    Ok(())
                })?;
                let state = self.state.clone();
                slot.notify_remove(move |slot, index, final_len| {
                    state.before_remove(&slot.operator()?, index, final_len)
                })?;
                let state = self.state.clone();
                slot.notify_removed(move |slot, index, final_len| {
                    state.remove_lane(&slot.operator()?, index, final_len)
                })?;
            }

            if desc.is_input() {
                let state = self.state.clone();
                let name = desc.name;
                slot.notify_connect(move |slot| state.on_input_connected(slot, name, promoted))?;
            }
        }
        Ok(())
    }

    fn setup_outputs(&self, _op: &OperatorHandle) -> Result<()> {
        Ok(())
    }

    fn execute(
        &self,
        _op: &OperatorHandle,
        slot: &Slot,
        _subindex: &[usize],
        _roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        Err(EngineError::ContractViolation(format!(
            "OperatorWrapper '{}' never computes data itself; request '{}' from a lane",
            self.name,
            slot.display_name()
        )))
    }

    fn propagate_dirty(
        &self,
        _op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        _roi: &Roi,
    ) -> Result<()> {
        // Lanes receive dirtiness through their own connections.
        Ok(())
    }

    fn cleanup(&self, op: &OperatorHandle) -> Result<()> {
        self.state.cleaning_up.store(true, Ordering::SeqCst);
        let lanes = self.len();
        for index in (0..lanes).rev() {
            self.state.before_remove(op, index, index)?;
            self.state.remove_lane(op, index, index)?;
        }
        Ok(())
    }
}

impl<T: Operator> WrapperState<T> {
    fn inputs(&self) -> impl Iterator<Item = &SlotDescriptor> {
        self.inner_slots.iter().filter(|d| d.is_input())
    }

    fn outputs(&self) -> impl Iterator<Item = &SlotDescriptor> {
        self.inner_slots.iter().filter(|d| !d.is_input())
    }

    /// Make sure lane `index` exists, creating and wiring it if needed.
    fn insert_lane(
        &self,
        wrapper: &OperatorHandle,
        index: usize,
        final_len: usize,
    ) -> Result<OperatorId> {
        {
            let lanes = self.lanes.lock();
            if lanes.len() >= final_len {
                return lanes.get(index).copied().ok_or_else(|| {
                    EngineError::ContractViolation(format!(
                        "lane {} out of range (len {})",
                        index,
                        lanes.len()
                    ))
                });
            }
        }

        debug!("Inserting inner operator at index {}", index);
        let lane = wrapper.instantiate_child((self.factory)())?;
        for input in lane.inputs()? {
            input.set_backpropagate_values(true)?;
            self.guard(&input)?;
        }
        self.lanes.lock().insert(index, lane.id());

        for desc in self.inputs() {
            let outer = wrapper.input(desc.name)?;
            let upstream = if self.promoted.contains(desc.name) {
                outer.insert_slot(index, final_len)?;
                outer.at(index)?
            } else {
                outer
            };
            let inner = lane.input(desc.name)?;
            if inner.is_connected()? {
                return Err(EngineError::AlreadyConnected {
                    operator: lane.name()?,
                    slot: desc.name.to_string(),
                });
            }
            inner.connect(&upstream)?;
        }

        for desc in self.outputs() {
            let outer = wrapper.output(desc.name)?;
            outer.insert_slot(index, final_len)?;
            let sub = outer.at(index)?;
            sub.set_backpropagate_values(true)?;
            sub.connect(&lane.output(desc.name)?)?;
            self.guard(&sub)?;
        }

        Ok(lane.id())
    }

    /// Lift the guards on the outer output sub-slots about to go away.
    fn before_remove(&self, wrapper: &OperatorHandle, index: usize, final_len: usize) -> Result<()> {
        for desc in self.outputs() {
            let outer = wrapper.output(desc.name)?;
            if outer.len()? > final_len {
                let sub = outer.at(index)?;
                sub.set_backpropagate_values(false)?;
                self.unguard(&sub)?;
            }
        }
        Ok(())
    }

    /// Drop lane `index` if the lane list is still longer than `final_len`.
    fn remove_lane(&self, wrapper: &OperatorHandle, index: usize, final_len: usize) -> Result<()> {
        let lane = {
            let mut lanes = self.lanes.lock();
            if lanes.len() <= final_len {
                return Ok(());
            }
            if index >= lanes.len() {
                return Err(EngineError::ContractViolation(format!(
                    "lane {} out of range (len {})",
                    index,
                    lanes.len()
                )));
            }
            lanes.remove(index)
        };
        debug!("Removing inner operator at index {}", index);

        let lane = wrapper.graph().operator(lane)?;
        for input in lane.inputs()? {
            input.set_backpropagate_values(false)?;
            self.unguard(&input)?;
        }

        for desc in self.outputs() {
            wrapper.output(desc.name)?.remove_slot(index, final_len)?;
        }
        for desc in self.inputs().filter(|d| self.promoted.contains(d.name)) {
            wrapper.input(desc.name)?.remove_slot(index, final_len)?;
        }

        lane.cleanup()
    }

    /// Re-attach every lane after an outer input got a new upstream.
    fn on_input_connected(&self, slot: &Slot, name: &'static str, promoted: bool) -> Result<()> {
        let lanes = self.lanes.lock().clone();
        let graph = slot.graph();

        if promoted {
            slot.resize(lanes.len())?;
            for (i, lane) in lanes.into_iter().enumerate() {
                graph.operator(lane)?.input(name)?.connect(&slot.at(i)?)?;
            }
        } else {
            for lane in lanes {
                graph.operator(lane)?.input(name)?.connect(slot)?;
            }
        }
        Ok(())
    }

    /// Refuse disconnects of `slot` unless the wrapper is tearing down.
    fn guard(&self, slot: &Slot) -> Result<()> {
        let cleaning_up = self.cleaning_up.clone();
        let observer = slot.notify_disconnect(move |slot| {
            if cleaning_up.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(EngineError::InternalDisconnect(slot.display_name()))
            }
        })?;
        self.guards.lock().insert(slot.id(), observer);
        Ok(())
    }

    fn unguard(&self, slot: &Slot) -> Result<()> {
        let observer = self.guards.lock().remove(&slot.id());
        if let Some(observer) = observer {
            slot.unregister(observer)?;
        }
        Ok(())
    }
}
