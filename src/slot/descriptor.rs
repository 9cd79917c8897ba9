//! Slot descriptors for the operator system.
//!
//! Each operator declares its slots via a static `SlotDescriptor` array.
//! The graph instantiates one slot per descriptor when the operator is added.

/// Whether a slot is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDirection {
    Input,
    Output,
}

/// Static descriptor for an operator's slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub name: &'static str,
    pub direction: SlotDirection,
    /// Nesting depth: 0 for a plain port, N for a sequence of level N-1 slots.
    pub level: usize,
    /// Optional inputs do not block `setup_outputs`.
    pub optional: bool,
}

impl SlotDescriptor {
    pub const fn input(name: &'static str) -> Self {
        Self {
            name,
            direction: SlotDirection::Input,
            level: 0,
            optional: false,
        }
    }

    pub const fn output(name: &'static str) -> Self {
        Self {
            name,
            direction: SlotDirection::Output,
            level: 0,
            optional: false,
        }
    }

    pub const fn with_level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == SlotDirection::Input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SLOTS: &[SlotDescriptor] = &[
        SlotDescriptor::input("Images").with_level(1),
        SlotDescriptor::input("Sigma").optional(),
        SlotDescriptor::output("Output"),
    ];

    #[test]
    fn test_const_builders() {
        assert_eq!(SLOTS[0].level, 1);
        assert!(SLOTS[0].is_input());
        assert!(SLOTS[1].optional);
        assert_eq!(SLOTS[2].direction, SlotDirection::Output);
        assert!(!SLOTS[2].optional);
    }
}
