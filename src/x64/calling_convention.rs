// This module implements the System V AMD64 calling convention for calls emitted by the JIT,
// both graph-level external calls and calls tiled inside expression trees. SysVAssigner walks
// an argument list in encounter order: integer arguments take RDI, RSI, RDX, RCX, R8, R9,
// floating arguments take XMM0-XMM7, and anything past those goes to consecutive 8-byte stack
// slots starting at the stack pointer. The CallingConvention trait is the interchangeable
// backend capability the code generator consults for argument registers, the return register,
// the caller-saved set that must be flushed before a call, the allocatable set and the scratch
// register reserved for the backend. A convention is selected once from the configured ABI;
// anything other than System V is rejected as unimplemented instead of being marshaled wrongly.

//! System V x86-64 calling convention.

use std::fmt;

use crate::core::config::TargetAbi;
use crate::core::error::{JitError, JitResult};
use crate::core::register_file::{AsmReg, RegBitSet, RegClass};

use super::{CU, SCRATCH, TC, WORK};

/// Where a call argument is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    Register(AsmReg),
    /// Byte offset from the stack pointer at the call.
    Stack(i32),
}

/// Per-ABI call lowering rules.
pub trait CallingConvention: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Registers the allocator may hand out.
    fn allocatable(&self) -> RegBitSet;

    /// Registers a callee may clobber.
    fn caller_saved(&self) -> RegBitSet;

    fn arg_registers(&self, class: RegClass) -> &'static [AsmReg];

    fn return_register(&self, class: RegClass) -> AsmReg;

    /// Register reserved for the backend's own use around calls.
    fn scratch(&self) -> AsmReg;

    /// Number of 8-byte outgoing stack slots the frame provides.
    fn max_stack_args(&self) -> usize;

    /// Place arguments of the given classes, in encounter order.
    fn assign_args(&self, classes: &[RegClass]) -> JitResult<Vec<ArgLocation>>;
}

/// Stateful System V argument assigner.
#[derive(Debug, Default)]
pub struct SysVAssigner {
    gp_cnt: usize,
    xmm_cnt: usize,
    stack: u32,
}

impl SysVAssigner {
    /// System V x86-64 GP argument registers.
    pub const GP_ARG_REGS: [AsmReg; 6] = [
        AsmReg::gpr(7), // RDI
        AsmReg::gpr(6), // RSI
        AsmReg::gpr(2), // RDX
        AsmReg::gpr(1), // RCX
        AsmReg::gpr(8), // R8
        AsmReg::gpr(9), // R9
    ];

    /// System V x86-64 XMM argument registers.
    pub const XMM_ARG_REGS: [AsmReg; 8] = [
        AsmReg::num(0),
        AsmReg::num(1),
        AsmReg::num(2),
        AsmReg::num(3),
        AsmReg::num(4),
        AsmReg::num(5),
        AsmReg::num(6),
        AsmReg::num(7),
    ];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign_arg(&mut self, class: RegClass) -> ArgLocation {
        let (regs, cnt): (&[AsmReg], &mut usize) = match class {
            RegClass::Gpr => (&Self::GP_ARG_REGS, &mut self.gp_cnt),
            RegClass::Num => (&Self::XMM_ARG_REGS, &mut self.xmm_cnt),
        };
        if *cnt < regs.len() {
            let reg = regs[*cnt];
            *cnt += 1;
            ArgLocation::Register(reg)
        } else {
            let offset = self.stack as i32;
            self.stack += 8;
            ArgLocation::Stack(offset)
        }
    }

    /// Outgoing stack bytes used so far, 16-byte aligned.
    pub fn stack_size(&self) -> u32 {
        self.stack.div_ceil(16) * 16
    }
}

/// System V AMD64.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysV;

pub static SYSV: SysV = SysV;

/// Outgoing argument area reserved below the saved registers.
pub const STACK_ARG_SLOTS: usize = 16;

const CALLER_SAVED_GPRS: [u8; 9] = [0, 1, 2, 6, 7, 8, 9, 10, 11];

impl CallingConvention for SysV {
    fn name(&self) -> &'static str {
        "sysv"
    }

    fn allocatable(&self) -> RegBitSet {
        let mut set = RegBitSet::new();
        for id in 0..16u8 {
            let reg = AsmReg::gpr(id);
            if ![4, 5].contains(&id) && ![TC, WORK, CU, SCRATCH].contains(&reg) {
                set.set(reg);
            }
            set.set(AsmReg::num(id));
        }
        set
    }

    fn caller_saved(&self) -> RegBitSet {
        let mut set = RegBitSet::new();
        for id in CALLER_SAVED_GPRS {
            set.set(AsmReg::gpr(id));
        }
        for id in 0..16 {
            set.set(AsmReg::num(id));
        }
        set
    }

    fn arg_registers(&self, class: RegClass) -> &'static [AsmReg] {
        match class {
            RegClass::Gpr => &SysVAssigner::GP_ARG_REGS,
            RegClass::Num => &SysVAssigner::XMM_ARG_REGS,
        }
    }

    fn return_register(&self, class: RegClass) -> AsmReg {
        match class {
            RegClass::Gpr => AsmReg::gpr(0),
            RegClass::Num => AsmReg::num(0),
        }
    }

    fn scratch(&self) -> AsmReg {
        SCRATCH
    }

    fn max_stack_args(&self) -> usize {
        STACK_ARG_SLOTS
    }

    fn assign_args(&self, classes: &[RegClass]) -> JitResult<Vec<ArgLocation>> {
        let mut assigner = SysVAssigner::new();
        let locations: Vec<_> = classes.iter().map(|&class| assigner.assign_arg(class)).collect();
        if assigner.stack_size() as usize > self.max_stack_args() * 8 {
            return Err(JitError::unimplemented(format!(
                "call with {} bytes of stack arguments",
                assigner.stack_size()
            )));
        }
        Ok(locations)
    }
}

/// Pick the calling convention for the configured ABI.
pub fn select(abi: TargetAbi) -> JitResult<&'static dyn CallingConvention> {
    match abi {
        TargetAbi::SysV => Ok(&SYSV),
        TargetAbi::Win64 => Err(JitError::unimplemented("win64 call marshaling")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysv_gp_argument_assignment() {
        let mut assigner = SysVAssigner::new();
        for reg in SysVAssigner::GP_ARG_REGS {
            assert_eq!(assigner.assign_arg(RegClass::Gpr), ArgLocation::Register(reg));
        }
        assert_eq!(assigner.assign_arg(RegClass::Gpr), ArgLocation::Stack(0));
        assert_eq!(assigner.assign_arg(RegClass::Gpr), ArgLocation::Stack(8));
        assert_eq!(assigner.stack_size(), 16);
    }

    #[test]
    fn test_mixed_classes_keep_encounter_order() {
        let classes = [
            RegClass::Num,
            RegClass::Gpr,
            RegClass::Num,
            RegClass::Gpr,
        ];
        let locations = SYSV.assign_args(&classes).unwrap();
        assert_eq!(
            locations,
            vec![
                ArgLocation::Register(AsmReg::num(0)),
                ArgLocation::Register(AsmReg::gpr(7)),
                ArgLocation::Register(AsmReg::num(1)),
                ArgLocation::Register(AsmReg::gpr(6)),
            ]
        );
    }

    #[test]
    fn test_xmm_overflow_shares_stack_with_gp() {
        let mut classes = vec![RegClass::Num; 9];
        classes.extend([RegClass::Gpr; 7]);
        let locations = SYSV.assign_args(&classes).unwrap();
        assert_eq!(locations[8], ArgLocation::Stack(0));
        assert_eq!(locations[15], ArgLocation::Stack(8));
    }

    #[test]
    fn test_fixed_registers_not_allocatable() {
        let allocatable = SYSV.allocatable();
        for reg in [TC, WORK, CU, SCRATCH, AsmReg::gpr(4), AsmReg::gpr(5)] {
            assert!(!allocatable.contains(reg), "{reg} must stay reserved");
        }
        assert_eq!(allocatable.count(RegClass::Gpr), 10);
        assert_eq!(allocatable.count(RegClass::Num), 16);
    }

    #[test]
    fn test_win64_rejected() {
        assert!(matches!(select(TargetAbi::Win64), Err(JitError::Unimplemented { .. })));
        assert_eq!(select(TargetAbi::SysV).unwrap().name(), "sysv");
    }

    #[test]
    fn test_too_many_stack_args() {
        let classes = vec![RegClass::Gpr; 6 + STACK_ARG_SLOTS + 1];
        assert!(SYSV.assign_args(&classes).is_err());
    }
}
