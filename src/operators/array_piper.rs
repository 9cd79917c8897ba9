//! Pass-through operator.

use crate::error::Result;
use crate::operator::{Operator, OperatorHandle};
use crate::roi::Roi;
use crate::slot::{Slot, SlotDescriptor};
use ndarray::ArrayD;

static SLOTS: &[SlotDescriptor] = &[
    SlotDescriptor::input("Input"),
    SlotDescriptor::output("Output"),
];

/// Forwards `Input` to `Output` unchanged, metadata included.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpArrayPiper;

impl OpArrayPiper {
    pub fn new() -> Self {
        Self
    }
}

impl Operator for OpArrayPiper {
    fn name(&self) -> &str {
        "OpArrayPiper"
    }

    fn slots(&self) -> &[SlotDescriptor] {
        SLOTS
    }

    fn setup_outputs(&self, op: &OperatorHandle) -> Result<()> {
        let meta = op.input("Input")?.meta()?;
        op.output("Output")?.set_meta(meta)
    }

    fn execute(
        &self,
        op: &OperatorHandle,
        _slot: &Slot,
        _subindex: &[usize],
        roi: &Roi,
    ) -> Result<ArrayD<f64>> {
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
