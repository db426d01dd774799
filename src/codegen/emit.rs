//! Per-tile instruction emission.

use crate::core::emitter::{Address, Base, BinaryOp, Condition};
use crate::core::error::{JitError, JitResult};
use crate::core::register_file::AsmReg;
use crate::ir::expr::{ExprOp, NodeId};
use crate::tiler::{Emit, TileEntry};

use super::TreeCompiler;

fn base_of(op: ExprOp) -> JitResult<Base> {
    match op {
        ExprOp::Local => Ok(Base::Work),
        ExprOp::Tc => Ok(Base::Tc),
        ExprOp::Cu => Ok(Base::Cu),
        other => Err(JitError::unimplemented(format!("{} as address base", other.name()))),
    }
}

fn binary_op(op: ExprOp) -> JitResult<BinaryOp> {
    Ok(match op {
        ExprOp::Add | ExprOp::AddNum => BinaryOp::Add,
        ExprOp::Sub => BinaryOp::Sub,
        ExprOp::Mul => BinaryOp::Mul,
        ExprOp::And => BinaryOp::And,
        ExprOp::Or => BinaryOp::Or,
        ExprOp::Xor => BinaryOp::Xor,
        other => return Err(JitError::unimplemented(format!("{} as arithmetic", other.name()))),
    })
}

fn condition(op: ExprOp) -> JitResult<Condition> {
    Ok(match op {
        ExprOp::Lt => Condition::Lt,
        ExprOp::Le => Condition::Le,
        ExprOp::Eq => Condition::Eq,
        ExprOp::Ne => Condition::Ne,
        ExprOp::Ge => Condition::Ge,
        ExprOp::Gt => Condition::Gt,
        ExprOp::Nz => Condition::NonZero,
        ExprOp::Zr => Condition::Zero,
        other => return Err(JitError::unimplemented(format!("{} as condition", other.name()))),
    })
}

impl TreeCompiler<'_, '_, '_> {
    /// The node holding the tile's argument words.
    fn arg_node(&self, entry: &TileEntry<'_>) -> NodeId {
        match entry.tile().args.first() {
            Some(&step) if step > 0 => self.tree.node(entry.node).children[step as usize - 1],
            _ => entry.node,
        }
    }

    fn arg_word(&self, entry: &TileEntry<'_>, index: usize) -> i64 {
        self.tree.node(self.arg_node(entry)).args[index]
    }

    /// `[base + offset]` for an `Addr` node whose base is a frame register.
    fn fixed_address(&self, addr: NodeId) -> JitResult<Address> {
        let node = self.tree.node(addr);
        let base = base_of(self.tree.node(node.children[0]).op)?;
        Ok(Address::fixed(base, node.args[0] as i32))
    }

    fn access_size(&self, node: NodeId) -> u8 {
        let node = self.tree.node(node);
        match node.op {
            ExprOp::Load | ExprOp::Store => node.args[0] as u8,
            _ => 8,
        }
    }

    pub(super) fn emit_tile(&mut self, entry: &TileEntry<'_>, emit: Emit, output: Option<AsmReg>) -> JitResult<()> {
        let node = entry.node;
        let op = self.tree.node(node).op;
        let input = |i: usize| -> JitResult<AsmReg> {
            let id = entry.inputs[i];
            self.input_reg(id)
        };
        let dst = || output.ok_or_else(|| JitError::unimplemented(format!("{} without a result register", op.name())));

        match emit {
            Emit::Base => {
                let (dst, base) = (dst()?, base_of(op)?);
                self.emitter.emit_base(dst, base)
            }
            Emit::Const => {
                let (dst, value, size) = (dst()?, self.arg_word(entry, 0), self.arg_word(entry, 1) as u8);
                self.emitter.emit_constant(dst, value, size)
            }
            Emit::AddrBase => {
                let (dst, addr) = (dst()?, self.fixed_address(node)?);
                self.emitter.emit_address(dst, addr)
            }
            Emit::Addr => {
                let addr = Address::reg(input(0)?, self.arg_word(entry, 0) as i32);
                let dst = dst()?;
                self.emitter.emit_address(dst, addr)
            }
            Emit::LoadBase | Emit::LoadNumBase => {
                let addr = self.fixed_address(self.arg_node(entry))?;
                let (dst, size) = (dst()?, self.access_size(node));
                self.emitter.emit_memory_load(dst, addr, size)
            }
            Emit::LoadAddr | Emit::LoadNumAddr => {
                let addr = Address::reg(input(0)?, self.arg_word(entry, 0) as i32);
                let (dst, size) = (dst()?, self.access_size(node));
                self.emitter.emit_memory_load(dst, addr, size)
            }
            Emit::Load => {
                let addr = Address::reg(input(0)?, 0);
                let (dst, size) = (dst()?, self.access_size(node));
                self.emitter.emit_memory_load(dst, addr, size)
            }
            Emit::StoreBase | Emit::StoreNumBase => {
                let addr = self.fixed_address(self.arg_node(entry))?;
                let (src, size) = (input(0)?, self.access_size(node));
                self.emitter.emit_memory_store(addr, src, size)
            }
            Emit::StoreAddr | Emit::StoreNumAddr => {
                let addr = Address::reg(input(0)?, self.arg_word(entry, 0) as i32);
                let (src, size) = (input(1)?, self.access_size(node));
                self.emitter.emit_memory_store(addr, src, size)
            }
            Emit::Store => {
                let addr = Address::reg(input(0)?, 0);
                let (src, size) = (input(1)?, self.access_size(node));
                self.emitter.emit_memory_store(addr, src, size)
            }
            Emit::Copy => {
                let (dst, src) = (dst()?, input(0)?);
                if dst == src {
                    return Ok(());
                }
                self.emitter.emit_move(dst, src)
            }
            Emit::Binary | Emit::AddNum => {
                let (dst, lhs, rhs) = (dst()?, input(0)?, input(1)?);
                self.emitter.emit_binary(binary_op(op)?, dst, lhs, rhs)
            }
            Emit::BinaryConst => {
                let (dst, lhs, imm) = (dst()?, input(0)?, self.arg_word(entry, 0));
                self.emitter.emit_binary_immediate(binary_op(op)?, dst, lhs, imm)
            }
            Emit::CompareToReg => {
                let (dst, lhs, rhs) = (dst()?, input(0)?, input(1)?);
                self.emitter.emit_compare(lhs, rhs)?;
                self.emitter.emit_flag_to_register(condition(op)?, dst)
            }
            Emit::TestToReg => {
                let (dst, reg) = (dst()?, input(0)?);
                self.emitter.emit_test(reg)?;
                self.emitter.emit_flag_to_register(condition(op)?, dst)
            }
            Emit::CondBranchCompare => {
                let flag = self.arg_node(entry);
                let cond = condition(self.tree.node(flag).op)?;
                let label = self.label(self.tree.node(node).args[0]);
                let (lhs, rhs) = (input(0)?, input(1)?);
                self.emitter.emit_compare(lhs, rhs)?;
                self.emitter.emit_conditional_branch(cond, label)
            }
            Emit::CondBranchTest => {
                let flag = self.arg_node(entry);
                let cond = condition(self.tree.node(flag).op)?;
                let label = self.label(self.tree.node(node).args[0]);
                let reg = input(0)?;
                self.emitter.emit_test(reg)?;
                self.emitter.emit_conditional_branch(cond, label)
            }
            Emit::Label => {
                let label = self.label(self.arg_word(entry, 0));
                self.emitter.emit_label(label)
            }
            Emit::Branch => {
                let label = self.label(self.arg_word(entry, 0));
                self.emitter.emit_branch(label)
            }
            Emit::Call => unreachable!("call tiles go through compile_call"),
        }
    }
}
