// Call tiles cannot follow the generic input/output protocol: the callee clobbers every
// caller-saved register, arguments must land in registers fixed by the ABI, and the result
// appears in a fixed register too. The sequence is therefore spelled out here. Live values in
// caller-saved registers are spilled first, which also frees every argument register. Each
// argument is then brought from its current home (register or spill slot) into its ABI
// location, and argument registers are reserved as they are filled so nothing later in the
// marshaling can reuse them. Arguments past the register budget go to the outgoing stack area
// in encounter order. The target address goes through the convention's scratch register, the
// reservations are dropped after the call, and the return register becomes the output value.

use crate::core::error::{JitError, JitResult};
use crate::core::register_file::AsmReg;
use crate::core::value::ValueState;
use crate::ir::expr::{ArgType, NodeId};
use crate::tiler::TileEntry;
use crate::x64::ArgLocation;

use super::TreeCompiler;

impl TreeCompiler<'_, '_, '_> {
    pub(super) fn compile_call(&mut self, entry: &TileEntry<'_>) -> JitResult<()> {
        for &input in entry.inputs {
            let state = self.tree.values()[input].state;
            if !state.is_live() {
                return Err(JitError::ValueNotLive { node: input, state });
            }
        }
        self.alloc.spill_before_call(self.tree.values_mut(), self.emitter)?;

        let arglist = self.tree.node(entry.node).children[1];
        let classes: Vec<_> = self
            .tree
            .node(arglist)
            .children
            .iter()
            .map(|&carg| ArgType::from_word(self.tree.node(carg).args[0]).class())
            .collect();
        let locations = self.conv.assign_args(&classes)?;

        let (target, args) = entry
            .inputs
            .split_first()
            .ok_or_else(|| JitError::unimplemented("call without a target"))?;
        let mut reserved = Vec::with_capacity(args.len());
        for ((&arg, &location), &class) in args.iter().zip(&locations).zip(&classes) {
            if self.tree.values()[arg].class() != Some(class) {
                return Err(JitError::unimplemented(format!(
                    "passing node {arg} as a {class:?} argument"
                )));
            }
            match location {
                ArgLocation::Register(reg) => {
                    self.move_to_register(arg, reg)?;
                    self.alloc.reserve(reg)?;
                    reserved.push(reg);
                }
                ArgLocation::Stack(offset) => self.move_to_stack(arg, offset)?,
            }
        }

        let scratch = self.conv.scratch();
        self.move_to_register(*target, scratch)?;
        self.emitter.emit_call_indirect(scratch)?;
        self.session.record_call();

        for reg in reserved {
            self.alloc.unreserve(reg)?;
        }
        if let Some(output) = entry.output {
            let class = self.tree.values()[output]
                .class()
                .ok_or_else(|| JitError::unimplemented("call result without a register class"))?;
            let reg = self.conv.return_register(class);
            self.alloc.assign(self.tree.values_mut(), output, reg)?;
        }
        self.alloc.expire(self.tree.values_mut(), entry.order_nr)
    }

    /// Copy a live value into `reg` from wherever it currently is.
    fn move_to_register(&mut self, id: NodeId, reg: AsmReg) -> JitResult<()> {
        let value = &self.tree.values()[id];
        match (value.state, value.reg, value.spill) {
            (ValueState::Allocated, Some(src), _) if src == reg => Ok(()),
            (ValueState::Allocated, Some(src), _) => self.emitter.emit_move(reg, src),
            (ValueState::Spilled, _, Some(offset)) => self.emitter.emit_load(offset, reg, value.size),
            (state, _, _) => Err(JitError::ValueNotLive { node: id, state }),
        }
    }

    fn move_to_stack(&mut self, id: NodeId, offset: i32) -> JitResult<()> {
        let value = &self.tree.values()[id];
        let size = value.size;
        match (value.state, value.reg, value.spill, value.class()) {
            (ValueState::Allocated, Some(reg), _, _) => self.emitter.emit_stack_arg(offset, reg, size),
            (ValueState::Spilled, _, Some(slot), Some(class)) => {
                let tmp = self.alloc.allocate(class)?;
                self.emitter.emit_load(slot, tmp, size)?;
                self.emitter.emit_stack_arg(offset, tmp, size)?;
                self.alloc.free(tmp)
            }
            (state, ..) => Err(JitError::ValueNotLive { node: id, state }),
        }
    }
}
