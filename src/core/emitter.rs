// This module defines the Emitter trait, the narrow interface between the target independent
// compiler (dispatcher, tiler, code generator, allocator) and an instruction encoder. Graph
// nodes are handed over whole (emit_primitive, emit_guard, emit_jumplist, ...) because their
// lowering is fixed per target; expression tiles are lowered through small instruction-level
// hooks (emit_binary, emit_memory_load, emit_compare, ...) with registers chosen by the
// allocator. Spill traffic goes through emit_load/emit_store with offsets relative to the work
// base, and call marshaling through emit_move/emit_stack_arg/emit_call_indirect. After the node
// pass the finalizer calls link() for the code size, encode() into writable memory and
// label_offset() for each label. The x64 backend implements this on iced-x86; the recording
// backend in `trace` implements it as an event log for tests.

//! Abstract assembler interface.

use super::error::JitResult;
use super::register_file::AsmReg;
use crate::ir::graph::{BranchNode, CallNode, ControlNode, GuardNode, InvokeNode, JumplistNode, Primitive};

/// Label number within one function. Graph labels come first, expression
/// tree labels are offset past them.
pub type LabelId = usize;

/// Condition evaluated on the flags of the last compare or test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    Zero,
    NonZero,
}

impl Condition {
    pub fn negate(self) -> Self {
        match self {
            Condition::Lt => Condition::Ge,
            Condition::Le => Condition::Gt,
            Condition::Eq => Condition::Ne,
            Condition::Ne => Condition::Eq,
            Condition::Ge => Condition::Lt,
            Condition::Gt => Condition::Le,
            Condition::Zero => Condition::NonZero,
            Condition::NonZero => Condition::Zero,
        }
    }
}

/// Two-operand arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

/// Registers the frame pins for the whole function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Base {
    /// Work area holding locals, outgoing call data and spill slots.
    Work,
    /// Execution context.
    Tc,
    /// Compilation unit.
    Cu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressBase {
    Fixed(Base),
    Reg(AsmReg),
}

/// `[base + offset]` memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub base: AddressBase,
    pub offset: i32,
}

impl Address {
    pub fn fixed(base: Base, offset: i32) -> Self {
        Self {
            base: AddressBase::Fixed(base),
            offset,
        }
    }

    pub fn reg(reg: AsmReg, offset: i32) -> Self {
        Self {
            base: AddressBase::Reg(reg),
            offset,
        }
    }
}

/// Instruction sink used by the dispatcher and the expression compiler.
pub trait Emitter {
    /// Function entry. Sets up the fixed registers and jumps to the resume
    /// label supplied by the caller.
    fn emit_prologue(&mut self) -> JitResult<()>;

    /// Function exit; the exit label is placed here.
    fn emit_epilogue(&mut self) -> JitResult<()>;

    /// Make sure labels `0..count` can be referenced.
    fn reserve_labels(&mut self, count: usize);

    fn emit_label(&mut self, label: LabelId) -> JitResult<()>;

    fn emit_primitive(&mut self, prim: &Primitive) -> JitResult<()>;

    /// Graph level branch, possibly testing a work slot.
    fn emit_block_branch(&mut self, branch: &BranchNode) -> JitResult<()>;

    fn emit_branch(&mut self, label: LabelId) -> JitResult<()>;

    /// Branch on the flags left by the preceding compare or test.
    fn emit_conditional_branch(&mut self, cond: Condition, label: LabelId) -> JitResult<()>;

    fn emit_call(&mut self, call: &CallNode) -> JitResult<()>;

    fn emit_guard(&mut self, guard: &GuardNode) -> JitResult<()>;

    fn emit_invoke(&mut self, invoke: &InvokeNode) -> JitResult<()>;

    fn emit_jumplist(&mut self, jumplist: &JumplistNode) -> JitResult<()>;

    fn emit_control(&mut self, control: &ControlNode) -> JitResult<()>;

    /// Store `reg` into outgoing stack argument slot at `offset` from the
    /// stack pointer.
    fn emit_stack_arg(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()>;

    /// Reload `reg` from the spill slot at `offset` from the work base.
    fn emit_load(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()>;

    /// Write `reg` to the spill slot at `offset` from the work base.
    fn emit_store(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()>;

    fn emit_move(&mut self, dst: AsmReg, src: AsmReg) -> JitResult<()>;

    fn emit_constant(&mut self, dst: AsmReg, value: i64, size: u8) -> JitResult<()>;

    /// Copy a fixed frame register into `dst`.
    fn emit_base(&mut self, dst: AsmReg, base: Base) -> JitResult<()>;

    /// Compute an address into `dst`.
    fn emit_address(&mut self, dst: AsmReg, addr: Address) -> JitResult<()>;

    fn emit_memory_load(&mut self, dst: AsmReg, addr: Address, size: u8) -> JitResult<()>;

    fn emit_memory_store(&mut self, addr: Address, src: AsmReg, size: u8) -> JitResult<()>;

    /// `dst = lhs op rhs`. `dst` may equal `lhs`, never `rhs` unless `lhs` does too.
    fn emit_binary(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: AsmReg) -> JitResult<()>;

    fn emit_binary_immediate(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, imm: i64) -> JitResult<()>;

    fn emit_compare(&mut self, lhs: AsmReg, rhs: AsmReg) -> JitResult<()>;

    fn emit_test(&mut self, reg: AsmReg) -> JitResult<()>;

    /// Materialise a flag condition as 0 or 1.
    fn emit_flag_to_register(&mut self, cond: Condition, dst: AsmReg) -> JitResult<()>;

    fn emit_call_indirect(&mut self, target: AsmReg) -> JitResult<()>;

    /// Resolve labels; returns the code size in bytes.
    fn link(&mut self) -> JitResult<usize>;

    /// Write the linked code into `buffer`, which is exactly `link()` bytes.
    fn encode(&mut self, buffer: &mut [u8]) -> JitResult<()>;

    /// Byte offset of a label after linking, negative when unresolved.
    fn label_offset(&self, label: LabelId) -> i64;
}
