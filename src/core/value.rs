// This module defines Value, the record of one datum produced by a tile during expression
// compilation. A value is either a register value (integer or floating point) or a pseudo
// value (constants and addresses absorbed into a larger tile) that never occupies a register.
// Register values move through a small state machine: Empty until their defining tile
// allocates a register, Allocated while resident, Spilled while parked in the spill area, and
// Dead once their last consumer has been emitted. Transitions are checked so that allocator
// bugs surface as InvalidTransition errors rather than as silently clobbered registers. The
// live-range fields (first_created, last_use, num_use) are tile order numbers filled in by the
// code generator's use pass before any register is handed out.

//! Values and their storage state.

use super::error::{JitError, JitResult};
use super::register_file::{AsmReg, RegClass};

/// Index of the expression node whose tile defines the value.
pub type ValueId = usize;

/// Kind of datum a value holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Constant or pseudo value, never register resident.
    Void,
    /// Integer or pointer in a general purpose register.
    Reg,
    /// Floating point number.
    Num,
}

impl ValueType {
    pub fn reg_class(self) -> Option<RegClass> {
        match self {
            ValueType::Void => None,
            ValueType::Reg => Some(RegClass::Gpr),
            ValueType::Num => Some(RegClass::Num),
        }
    }
}

/// Storage state of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueState {
    Empty,
    Allocated,
    Spilled,
    /// Reached from Allocated, or from Spilled when a call input is read
    /// straight from its slot after `spill_before_call` (see `codegen/call.rs`).
    Dead,
}

impl ValueState {
    /// Whether `self -> to` is a legal step.
    ///
    /// Spilled values may die in their slot when their last consumer is a
    /// call that reads the slot directly.
    pub fn can_become(self, to: ValueState) -> bool {
        use ValueState::*;
        matches!(
            (self, to),
            (Empty, Allocated) | (Allocated, Spilled) | (Allocated, Dead) | (Spilled, Allocated) | (Spilled, Dead)
        )
    }

    pub fn is_live(self) -> bool {
        matches!(self, ValueState::Allocated | ValueState::Spilled)
    }
}

/// One datum tracked by the register allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub ty: ValueType,
    pub state: ValueState,
    pub reg: Option<AsmReg>,
    /// Offset of the spill slot from the work base.
    pub spill: Option<i32>,
    /// Size in bytes.
    pub size: u8,
    pub first_created: u32,
    pub last_use: u32,
    pub num_use: u32,
}

impl Value {
    pub fn new(ty: ValueType, size: u8) -> Self {
        Self {
            ty,
            state: ValueState::Empty,
            reg: None,
            spill: None,
            size,
            first_created: 0,
            last_use: 0,
            num_use: 0,
        }
    }

    pub fn class(&self) -> Option<RegClass> {
        self.ty.reg_class()
    }

    /// Clear allocation results and live range, keeping type and size.
    pub fn reset(&mut self) {
        *self = Value::new(self.ty, self.size);
    }

    /// Move to `to`, checking the state machine.
    pub fn transition(&mut self, id: ValueId, to: ValueState) -> JitResult<()> {
        if !self.state.can_become(to) {
            return Err(JitError::InvalidTransition {
                node: id,
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// The register of a resident value, or a not-live error.
    pub fn resident_reg(&self, id: ValueId) -> JitResult<AsmReg> {
        match (self.state, self.reg) {
            (ValueState::Allocated, Some(reg)) => Ok(reg),
            _ => Err(JitError::ValueNotLive {
                node: id,
                state: self.state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_trajectory() {
        let mut value = Value::new(ValueType::Reg, 8);
        value.transition(1, ValueState::Allocated).unwrap();
        value.transition(1, ValueState::Spilled).unwrap();
        value.transition(1, ValueState::Allocated).unwrap();
        value.transition(1, ValueState::Dead).unwrap();
        assert!(value.transition(1, ValueState::Allocated).is_err());
    }

    #[test]
    fn test_spilled_value_dies_in_slot() {
        let mut value = Value::new(ValueType::Reg, 8);
        value.transition(2, ValueState::Allocated).unwrap();
        value.transition(2, ValueState::Spilled).unwrap();
        value.transition(2, ValueState::Dead).unwrap();
        assert!(!value.state.is_live());
        assert!(!ValueState::Dead.can_become(ValueState::Spilled));
    }

    #[test]
    fn test_empty_cannot_spill() {
        let mut value = Value::new(ValueType::Num, 8);
        let err = value.transition(4, ValueState::Spilled).unwrap_err();
        assert!(matches!(err, JitError::InvalidTransition { node: 4, .. }));
        assert!(value.resident_reg(4).is_err());
    }

    #[test]
    fn test_class_mapping() {
        assert_eq!(ValueType::Reg.reg_class(), Some(RegClass::Gpr));
        assert_eq!(ValueType::Num.reg_class(), Some(RegClass::Num));
        assert_eq!(ValueType::Void.reg_class(), None);
    }
}
