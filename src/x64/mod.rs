//! x86-64 backend.
//!
//! - `calling_convention`: System V argument placement and register sets
//! - `emitter`: the `Emitter` implementation on iced-x86
//!
//! Registers are numbered the way the hardware encodes them: rax=0, rcx=1,
//! rdx=2, rbx=3, rsp=4, rbp=5, rsi=6, rdi=7, r8..r15=8..15, and xmm0..xmm15
//! as class `Num` 0..15.

pub mod calling_convention;
pub mod emitter;

pub use calling_convention::{select, ArgLocation, CallingConvention, SysV, SysVAssigner, STACK_ARG_SLOTS, SYSV};
pub use emitter::X64Emitter;

use crate::core::register_file::AsmReg;

/// Execution context pointer (rbx).
pub const TC: AsmReg = AsmReg::gpr(3);
/// Work area base (r14).
pub const WORK: AsmReg = AsmReg::gpr(14);
/// Compilation unit pointer (r15).
pub const CU: AsmReg = AsmReg::gpr(15);
/// Backend scratch register (r11), never handed to the allocator.
pub const SCRATCH: AsmReg = AsmReg::gpr(11);
