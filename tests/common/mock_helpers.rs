//! Test operators and error types

use lazyslot::{
    EngineError, Operator, OperatorHandle, Result, Roi, Slot, SlotDescriptor,
};
use ndarray::ArrayD;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Error raised by [`OpFailAt`]
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("processing failed on call {0}")]
pub struct ProcessingError(pub usize);

/// Error raised by test callbacks
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("special error {0}")]
pub struct SpecialError(pub u32);

static OP_A_SLOTS: &[SlotDescriptor] = &[
    SlotDescriptor::input("Input").with_level(2),
    SlotDescriptor::output("Output").with_level(2),
];

/// Operator with level-2 slots; the output mirrors the input's structure.
#[derive(Debug, Default)]
pub struct OpA;

impl Operator for OpA {
    fn name(&self) -> &str {
        "OpA"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        OP_A_SLOTS
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        let input = op.input("Input")?;
        let output = op.output("Output")?;
        output.resize(input.len()?)?;
        for i in 0..input.len()? {
            let inner = input.at(i)?;
            let out = output.at(i)?;
            out.resize(inner.len()?)?;
            for j in 0..inner.len()? {
                out.at(j)?.set_meta(inner.at(j)?.meta()?)?;
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        let mut slot = op.input("Input")?;
        for &i in subindex {
            slot = slot.at(i)?;
        }
        slot.get(roi)
    }

    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        subindex: &[usize],
        roi: &Roi,
    ) -> Result<()> {
        let mut slot = op.output("Output")?;
        for &i in subindex {
            slot = slot.at(i)?;
        }
        slot.set_dirty(roi)
    }
}

static FAIL_SLOTS: &[SlotDescriptor] = &[
    SlotDescriptor::input("Input"),
    SlotDescriptor::output("Output"),
];

/// Pass-through that fails on its `fail_at`-th execute call (1-based).
#[derive(Debug)]
pub struct OpFailAt {
    fail_at: usize,
    calls: AtomicUsize,
}

impl OpFailAt {
    pub fn new(fail_at: usize) -> Self {
        Self {
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Operator for OpFailAt {
    fn name(&self) -> &str {
        "OpFailAt"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        FAIL_SLOTS
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        op.output("Output")?.set_meta(op.input("Input")?.meta()?)
    }

    fn execute(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_at {
            return Err(EngineError::operator(self.name(), ProcessingError(call)));
        }
        op.input("Input")?.get(roi)
    }

    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<()> {
        op.output("Output")?.set_dirty(roi)
    }
}

static OFFSET_SLOTS: &[SlotDescriptor] = &[
    SlotDescriptor::input("Input"),
    SlotDescriptor::input("Offset"),
    SlotDescriptor::output("Output"),
];

/// Adds the scalar `Offset` to every element of `Input`.
#[derive(Debug, Default)]
pub struct OpOffset;

impl Operator for OpOffset {
    fn name(&self) -> &str {
        "OpOffset"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        OFFSET_SLOTS
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        op.output("Output")?.set_meta(op.input("Input")?.meta()?)
    }

    fn execute(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        let offset = op
            .input("Offset")?
            .value()?
            .and_then(|v| v.as_float())
            .ok_or_else(|| EngineError::SlotNotReady("Offset".to_string()))?;
        Ok(op.input("Input")?.get(roi)? + offset)
    }

    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        _roi: &Roi,
    ) -> Result<()> {
        op.output("Output")?.set_dirty_all()
    }
}

static PREWIRED_SLOTS: &[SlotDescriptor] = &[
    SlotDescriptor::input("A"),
    SlotDescriptor::input("B"),
    SlotDescriptor::output("Output"),
];

/// Operator that links its own `B` input to its `A` input on instantiation.
#[derive(Debug, Default)]
pub struct OpPrewired;

impl Operator for OpPrewired {
    fn name(&self) -> &str {
        "OpPrewired"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        PREWIRED_SLOTS
    }

    fn on_instantiated(&self, op: &OperatorHandle) -> Result<()> {
        op.input("B")?.connect(&op.input("A")?)
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        op.output("Output")?.set_meta(op.input("A")?.meta()?)
    }

    fn execute(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        op.input("A")?.get(roi)
    }

    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<()> {
        op.output("Output")?.set_dirty(roi)
    }
}

/// Pass-through whose `execute` panics with [`OpPanic::MESSAGE`].
#[derive(Debug, Default)]
pub struct OpPanic;

impl OpPanic {
    pub const MESSAGE: &'static str = "lane exploded";
}

impl Operator for OpPanic {
    fn name(&self) -> &str {
        "OpPanic"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        FAIL_SLOTS
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        op.output("Output")?.set_meta(op.input("Input")?.meta()?)
    }

    fn execute(
        &self,
        _op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        _roi: &Roi,
    ) -> Result<ArrayD<f64>> {
        panic!("{}", Self::MESSAGE);
    }

    fn propagate_dirty(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<()> {
        op.output("Output")?.set_dirty(roi)
    }
}
