// This module provides RecordingEmitter, an Emitter that keeps an ordered log of every request
// the compiler makes instead of encoding machine instructions. It is what the unit and
// integration tests use to observe allocator and code generator decisions: which registers a
// tile was given, when a value was spilled and reloaded, in which order call arguments were
// moved into place, and where labels landed. "Linking" assigns every event one byte, so a label's
// offset is the index of its Label event and the code size is the number of events; encoding
// fills the buffer with int3 bytes. That keeps the finalizer path runnable end to end on any
// host, including ones where the generated x86-64 code could never execute.

//! Event-recording emitter for tests and diagnostics.

use std::fmt;

use crate::core::emitter::{Address, Base, BinaryOp, Condition, Emitter, LabelId};
use crate::core::error::{JitError, JitResult};
use crate::core::register_file::AsmReg;
use crate::ir::graph::{BranchNode, CallNode, ControlNode, GuardNode, InvokeNode, JumplistNode, Primitive};

/// One recorded emitter request.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Prologue,
    Epilogue,
    Label(LabelId),
    Primitive(Primitive),
    BlockBranch(BranchNode),
    Branch(LabelId),
    CondBranch(Condition, LabelId),
    Call(CallNode),
    Guard(GuardNode),
    Invoke(InvokeNode),
    Jumplist(JumplistNode),
    Control(ControlNode),
    StackArg { offset: i32, reg: AsmReg, size: u8 },
    Load { offset: i32, reg: AsmReg, size: u8 },
    Store { offset: i32, reg: AsmReg, size: u8 },
    Move { dst: AsmReg, src: AsmReg },
    Constant { dst: AsmReg, value: i64, size: u8 },
    Base { dst: AsmReg, base: Base },
    Address { dst: AsmReg, addr: Address },
    MemoryLoad { dst: AsmReg, addr: Address, size: u8 },
    MemoryStore { addr: Address, src: AsmReg, size: u8 },
    Binary { op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: AsmReg },
    BinaryImmediate { op: BinaryOp, dst: AsmReg, lhs: AsmReg, imm: i64 },
    Compare { lhs: AsmReg, rhs: AsmReg },
    Test(AsmReg),
    FlagToRegister { cond: Condition, dst: AsmReg },
    CallIndirect(AsmReg),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Label(label) => write!(f, "L{label}:"),
            Event::Load { offset, reg, size } => write!(f, "  load{size} {reg}, [work+{offset}]"),
            Event::Store { offset, reg, size } => write!(f, "  store{size} [work+{offset}], {reg}"),
            Event::Move { dst, src } => write!(f, "  mov {dst}, {src}"),
            Event::Binary { op, dst, lhs, rhs } => write!(f, "  {op:?} {dst}, {lhs}, {rhs}"),
            other => write!(f, "  {other:?}"),
        }
    }
}

/// Emitter that logs requests.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    events: Vec<Event>,
    reserved_labels: usize,
    labels: Vec<Option<usize>>,
    linked: bool,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of labels the compiler asked for.
    pub fn reserved_labels(&self) -> usize {
        self.reserved_labels
    }

    /// Registers written by the recorded events, in order.
    pub fn defined_registers(&self) -> impl Iterator<Item = AsmReg> + '_ {
        self.events.iter().filter_map(|event| match *event {
            Event::Load { reg, .. } => Some(reg),
            Event::Move { dst, .. }
            | Event::Constant { dst, .. }
            | Event::Base { dst, .. }
            | Event::Address { dst, .. }
            | Event::MemoryLoad { dst, .. }
            | Event::Binary { dst, .. }
            | Event::BinaryImmediate { dst, .. }
            | Event::FlagToRegister { dst, .. } => Some(dst),
            _ => None,
        })
    }

    fn record(&mut self, event: Event) -> JitResult<()> {
        log::trace!("{event}");
        self.events.push(event);
        Ok(())
    }
}

impl Emitter for RecordingEmitter {
    fn emit_prologue(&mut self) -> JitResult<()> {
        self.record(Event::Prologue)
    }

    fn emit_epilogue(&mut self) -> JitResult<()> {
        self.record(Event::Epilogue)
    }

    fn reserve_labels(&mut self, count: usize) {
        self.reserved_labels = self.reserved_labels.max(count);
    }

    fn emit_label(&mut self, label: LabelId) -> JitResult<()> {
        if label >= self.reserved_labels {
            return Err(JitError::UnknownLabel { label });
        }
        self.record(Event::Label(label))
    }

    fn emit_primitive(&mut self, prim: &Primitive) -> JitResult<()> {
        self.record(Event::Primitive(*prim))
    }

    fn emit_block_branch(&mut self, branch: &BranchNode) -> JitResult<()> {
        self.record(Event::BlockBranch(*branch))
    }

    fn emit_branch(&mut self, label: LabelId) -> JitResult<()> {
        self.record(Event::Branch(label))
    }

    fn emit_conditional_branch(&mut self, cond: Condition, label: LabelId) -> JitResult<()> {
        self.record(Event::CondBranch(cond, label))
    }

    fn emit_call(&mut self, call: &CallNode) -> JitResult<()> {
        self.record(Event::Call(call.clone()))
    }

    fn emit_guard(&mut self, guard: &GuardNode) -> JitResult<()> {
        self.record(Event::Guard(*guard))
    }

    fn emit_invoke(&mut self, invoke: &InvokeNode) -> JitResult<()> {
        self.record(Event::Invoke(invoke.clone()))
    }

    fn emit_jumplist(&mut self, jumplist: &JumplistNode) -> JitResult<()> {
        self.record(Event::Jumplist(jumplist.clone()))
    }

    fn emit_control(&mut self, control: &ControlNode) -> JitResult<()> {
        self.record(Event::Control(*control))
    }

    fn emit_stack_arg(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.record(Event::StackArg { offset, reg, size })
    }

    fn emit_load(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.record(Event::Load { offset, reg, size })
    }

    fn emit_store(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.record(Event::Store { offset, reg, size })
    }

    fn emit_move(&mut self, dst: AsmReg, src: AsmReg) -> JitResult<()> {
        self.record(Event::Move { dst, src })
    }

    fn emit_constant(&mut self, dst: AsmReg, value: i64, size: u8) -> JitResult<()> {
        self.record(Event::Constant { dst, value, size })
    }

    fn emit_base(&mut self, dst: AsmReg, base: Base) -> JitResult<()> {
        self.record(Event::Base { dst, base })
    }

    fn emit_address(&mut self, dst: AsmReg, addr: Address) -> JitResult<()> {
        self.record(Event::Address { dst, addr })
    }

    fn emit_memory_load(&mut self, dst: AsmReg, addr: Address, size: u8) -> JitResult<()> {
        self.record(Event::MemoryLoad { dst, addr, size })
    }

    fn emit_memory_store(&mut self, addr: Address, src: AsmReg, size: u8) -> JitResult<()> {
        self.record(Event::MemoryStore { addr, src, size })
    }

    fn emit_binary(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: AsmReg) -> JitResult<()> {
        self.record(Event::Binary { op, dst, lhs, rhs })
    }

    fn emit_binary_immediate(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, imm: i64) -> JitResult<()> {
        self.record(Event::BinaryImmediate { op, dst, lhs, imm })
    }

    fn emit_compare(&mut self, lhs: AsmReg, rhs: AsmReg) -> JitResult<()> {
        self.record(Event::Compare { lhs, rhs })
    }

    fn emit_test(&mut self, reg: AsmReg) -> JitResult<()> {
        self.record(Event::Test(reg))
    }

    fn emit_flag_to_register(&mut self, cond: Condition, dst: AsmReg) -> JitResult<()> {
        self.record(Event::FlagToRegister { cond, dst })
    }

    fn emit_call_indirect(&mut self, target: AsmReg) -> JitResult<()> {
        self.record(Event::CallIndirect(target))
    }

    fn link(&mut self) -> JitResult<usize> {
        self.labels = vec![None; self.reserved_labels];
        for (offset, event) in self.events.iter().enumerate() {
            if let Event::Label(label) = event {
                self.labels[*label] = Some(offset);
            }
        }
        self.linked = true;
        Ok(self.events.len())
    }

    fn encode(&mut self, buffer: &mut [u8]) -> JitResult<()> {
        if !self.linked {
            return Err(JitError::Encode {
                reason: "encode before link".to_string(),
            });
        }
        buffer.fill(0xCC);
        Ok(())
    }

    fn label_offset(&self, label: LabelId) -> i64 {
        self.labels
            .get(label)
            .copied()
            .flatten()
            .map_or(-1, |offset| offset as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_resolve_to_event_index() {
        let mut emitter = RecordingEmitter::new();
        emitter.reserve_labels(3);
        emitter.emit_prologue().unwrap();
        emitter.emit_label(1).unwrap();
        emitter.emit_branch(1).unwrap();
        assert_eq!(emitter.link().unwrap(), 3);
        assert_eq!(emitter.label_offset(1), 1);
        assert_eq!(emitter.label_offset(0), -1);
        assert_eq!(emitter.label_offset(7), -1);
    }

    #[test]
    fn test_unreserved_label_rejected() {
        let mut emitter = RecordingEmitter::new();
        emitter.reserve_labels(1);
        assert!(matches!(emitter.emit_label(4), Err(JitError::UnknownLabel { label: 4 })));
    }

    #[test]
    fn test_encode_requires_link() {
        let mut emitter = RecordingEmitter::new();
        let mut buffer = [0u8; 2];
        assert!(emitter.encode(&mut buffer).is_err());
        emitter.link().unwrap();
        emitter.encode(&mut buffer).unwrap();
        assert_eq!(buffer, [0xCC, 0xCC]);
    }
}
