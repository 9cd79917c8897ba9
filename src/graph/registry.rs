//! Owning storage for every slot and operator of a graph.
//!
//! Slots and operators live in flat generational tables indexed by
//! [`SlotId`] / [`OperatorId`]. Freed cells go on a free list and are handed
//! out again under a new generation, so repeated resizing does not grow the
//! tables. Upstream and downstream links are plain ids, so the registry is
//! the only owner and there are no reference cycles between slots.

use crate::error::{EngineError, Result};
use crate::graph::id::{ObserverId, OperatorId, SlotId};
use crate::operator::Operator;
use crate::roi::Roi;
use crate::slot::{MetaDict, Slot, SlotDirection, Value};
use std::any::Any;
use std::sync::Arc;

/// Observer for structural changes: `(slot, index, final_len)`.
pub(crate) type StructureObserver = Arc<dyn Fn(&Slot, usize, usize) -> Result<()> + Send + Sync>;
/// Observer for connect / disconnect.
pub(crate) type LinkObserver = Arc<dyn Fn(&Slot) -> Result<()> + Send + Sync>;
/// Observer for dirty notifications.
pub(crate) type DirtyObserver = Arc<dyn Fn(&Slot, &Roi) -> Result<()> + Send + Sync>;

/// Per-slot observer lists, each kept in subscription order.
#[derive(Default)]
pub(crate) struct Observers {
    pub dirty: Vec<(ObserverId, DirtyObserver)>,
    pub inserted: Vec<(ObserverId, StructureObserver)>,
    pub remove: Vec<(ObserverId, StructureObserver)>,
    pub removed: Vec<(ObserverId, StructureObserver)>,
    pub connect: Vec<(ObserverId, LinkObserver)>,
    pub disconnect: Vec<(ObserverId, LinkObserver)>,
}

impl Observers {
    /// Remove the observer from whichever list holds it.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        fn drop_from<T>(list: &mut Vec<(ObserverId, T)>, id: ObserverId) -> bool {
            let before = list.len();
            list.retain(|(oid, _)| *oid != id);
            list.len() != before
        }

        drop_from(&mut self.dirty, id)
            | drop_from(&mut self.inserted, id)
            | drop_from(&mut self.remove, id)
            | drop_from(&mut self.removed, id)
            | drop_from(&mut self.connect, id)
            | drop_from(&mut self.disconnect, id)
    }
}

pub(crate) struct SlotEntry {
    pub name: &'static str,
    pub direction: SlotDirection,
    pub level: usize,
    pub optional: bool,
    pub operator: OperatorId,
    pub parent: Option<SlotId>,
    pub children: Vec<SlotId>,
    pub meta: MetaDict,
    pub value: Option<Value>,
    pub upstream: Option<SlotId>,
    pub downstream: Vec<SlotId>,
    pub backpropagate_values: bool,
    pub observers: Observers,
}

impl SlotEntry {
    pub fn new(
        name: &'static str,
        direction: SlotDirection,
        level: usize,
        optional: bool,
        operator: OperatorId,
        parent: Option<SlotId>,
    ) -> Self {
        Self {
            name,
            direction,
            level,
            optional,
            operator,
            parent,
            children: Vec::new(),
            meta: MetaDict::default(),
            value: None,
            upstream: None,
            downstream: Vec::new(),
            backpropagate_values: false,
            observers: Observers::default(),
        }
    }
}

pub(crate) struct OperatorEntry {
    pub name: String,
    pub parent: Option<OperatorId>,
    pub children: Vec<OperatorId>,
    pub inputs: Vec<SlotId>,
    pub outputs: Vec<SlotId>,
    pub behavior: Arc<dyn Operator>,
    pub any: Arc<dyn Any + Send + Sync>,
}

struct Cell<T> {
    generation: u32,
    entry: Option<T>,
}

/// Vector of cells with a free list; `(index, generation)` names an entry.
struct Table<T> {
    cells: Vec<Cell<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Table<T> {
    fn insert(&mut self, entry: T) -> (u32, u32) {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let cell = &mut self.cells[index as usize];
            cell.entry = Some(entry);
            return (index, cell.generation);
        }
        let index = self.cells.len() as u32;
        self.cells.push(Cell {
            generation: 0,
            entry: Some(entry),
        });
        (index, 0)
    }

    fn get(&self, index: usize, generation: u32) -> Option<&T> {
        self.cells
            .get(index)
            .filter(|cell| cell.generation == generation)
            .and_then(|cell| cell.entry.as_ref())
    }

    fn get_mut(&mut self, index: usize, generation: u32) -> Option<&mut T> {
        self.cells
            .get_mut(index)
            .filter(|cell| cell.generation == generation)
            .and_then(|cell| cell.entry.as_mut())
    }

    /// Remove the entry and retire its generation. A cell whose generation
    /// is exhausted is never handed out again.
    fn take(&mut self, index: usize, generation: u32) -> Option<T> {
        let cell = self.cells.get_mut(index)?;
        if cell.generation != generation {
            return None;
        }
        let entry = cell.entry.take()?;
        self.live -= 1;
        if let Some(next) = cell.generation.checked_add(1) {
            cell.generation = next;
            self.free.push(index as u32);
        }
        Some(entry)
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    slots: Table<SlotEntry>,
    operators: Table<OperatorEntry>,
    next_observer: u64,
}

impl Registry {
    pub fn slot(&self, id: SlotId) -> Result<&SlotEntry> {
        self.slots
            .get(id.index(), id.generation())
            .ok_or(EngineError::UnknownSlot(id))
    }

    pub fn slot_mut(&mut self, id: SlotId) -> Result<&mut SlotEntry> {
        self.slots
            .get_mut(id.index(), id.generation())
            .ok_or(EngineError::UnknownSlot(id))
    }

    pub fn has_slot(&self, id: SlotId) -> bool {
        self.slot(id).is_ok()
    }

    pub fn operator(&self, id: OperatorId) -> Result<&OperatorEntry> {
        self.operators
            .get(id.index(), id.generation())
            .ok_or(EngineError::UnknownOperator(id))
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Result<&mut OperatorEntry> {
        self.operators
            .get_mut(id.index(), id.generation())
            .ok_or(EngineError::UnknownOperator(id))
    }

    pub fn has_operator(&self, id: OperatorId) -> bool {
        self.operator(id).is_ok()
    }

    pub fn add_slot(&mut self, entry: SlotEntry) -> SlotId {
        let (index, generation) = self.slots.insert(entry);
        SlotId::new(index, generation)
    }

    pub fn add_operator(&mut self, entry: OperatorEntry) -> OperatorId {
        let (index, generation) = self.operators.insert(entry);
        OperatorId::new(index, generation)
    }

    pub fn remove_operator(&mut self, id: OperatorId) -> Option<OperatorEntry> {
        self.operators.take(id.index(), id.generation())
    }

    pub fn next_observer_id(&mut self) -> ObserverId {
        self.next_observer += 1;
        ObserverId(self.next_observer)
    }

    /// Number of live slots.
    pub fn slot_count(&self) -> usize {
        self.slots.live
    }

    /// Number of slot cells ever allocated, live or free.
    #[cfg(test)]
    pub fn slot_capacity(&self) -> usize {
        self.slots.cells.len()
    }

    /// Number of live operators.
    pub fn operator_count(&self) -> usize {
        self.operators.live
    }

    /// Top-level slot and the index path from it down to `id`.
    pub fn path(&self, id: SlotId) -> Result<(SlotId, Vec<usize>)> {
        let mut subindex = Vec::new();
        let mut current = id;
        while let Some(parent) = self.slot(current)?.parent {
            let position = self
                .slot(parent)?
                .children
                .iter()
                .position(|&c| c == current)
                .ok_or(EngineError::UnknownSlot(current))?;
            subindex.push(position);
            current = parent;
        }
        subindex.reverse();
        Ok((current, subindex))
    }

    /// Human readable `Operator.Slot[i][j]` name for logs and errors.
    pub fn display_name(&self, id: SlotId) -> String {
        let Ok(entry) = self.slot(id) else {
            return format!("{id:?}");
        };
        let operator = self
            .operator(entry.operator)
            .map(|o| o.name.as_str())
            .unwrap_or("?");
        let mut name = format!("{operator}.{}", entry.name);
        if let Ok((_, subindex)) = self.path(id) {
            for i in subindex {
                name.push_str(&format!("[{i}]"));
            }
        }
        name
    }

    /// Follow upstream links until reaching a slot with no upstream.
    pub fn resolve(&self, id: SlotId) -> Result<SlotId> {
        let mut current = id;
        while let Some(up) = self.slot(current)?.upstream {
            current = up;
        }
        Ok(current)
    }

    /// Whether the slot can currently provide a value or data.
    pub fn is_ready(&self, id: SlotId) -> bool {
        let Ok(entry) = self.slot(id) else {
            return false;
        };
        if let Some(up) = entry.upstream {
            return self.is_ready(up);
        }
        if entry.level > 0 {
            return entry.children.iter().all(|&c| self.is_ready(c));
        }
        match entry.direction {
            SlotDirection::Input => entry.value.is_some(),
            SlotDirection::Output => entry.value.is_some() || entry.meta.ready,
        }
    }

    /// All level-0 descendants of `id` (including `id` itself when level 0).
    pub fn leaves(&self, id: SlotId, out: &mut Vec<SlotId>) {
        let Ok(entry) = self.slot(id) else {
            return;
        };
        if entry.level == 0 {
            out.push(id);
        } else {
            for &c in &entry.children {
                self.leaves(c, out);
            }
        }
    }

    /// Delete `id` and its descendants.
    ///
    /// Links to the deleted slots are cut without firing observers; downstream
    /// partners that survive are appended to `orphans` so the caller can
    /// propagate the change once the structural update is complete.
    pub fn release_slot(&mut self, id: SlotId, orphans: &mut Vec<SlotId>) {
        let Some(entry) = self.slots.take(id.index(), id.generation()) else {
            return;
        };
        for &child in &entry.children {
            self.release_slot(child, orphans);
        }
        if let Some(up) = entry.upstream {
            if let Ok(upstream) = self.slot_mut(up) {
                upstream.downstream.retain(|&d| d != id);
            }
        }
        for &d in &entry.downstream {
            if let Ok(partner) = self.slot_mut(d) {
                partner.upstream = None;
                partner.value = None;
                partner.meta = MetaDict::default();
                orphans.push(d);
            }
        }
        if let Some(parent) = entry.parent {
            if let Ok(p) = self.slot_mut(parent) {
                p.children.retain(|&c| c != id);
            }
        }
    }
}
