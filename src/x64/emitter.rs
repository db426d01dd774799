// This module implements the Emitter trait for x86-64 on top of the iced-x86 CodeAssembler.
// Every function shares one frame layout: rbp is pushed and set up as a frame pointer, the
// callee-saved registers the JIT pins (rbx for the execution context, r14 for the work area, r15
// for the compilation unit) and the two allocatable callee-saved registers r12/r13 are pushed,
// and a fixed outgoing-argument area keeps rsp 16-byte aligned at every call site. Entry code
// loads the pinned registers from the System V arguments and jumps to the resume address the
// caller passed in the third argument, so compiled code can be re-entered in the middle after an
// invoke. The epilogue lives behind a dedicated exit label that guards, invokes and exit nodes
// jump to. Work slots and spill slots are addressed relative to r14; r11 and xmm0 are scratch
// between nodes. Labels are iced CodeLabels created on demand; two labels may not share one
// instruction in iced, so a nop is inserted when a second label would be bound before any
// instruction follows the first. Linking assembles at address 0 with label offsets requested,
// which the finalizer reads back through label_offset.

//! x86-64 instruction emission with iced-x86.

use iced_x86::code_asm::*;
use iced_x86::{BlockEncoderOptions, IcedError};

use crate::core::emitter::{Address, AddressBase, Base, BinaryOp, Condition, Emitter, LabelId};
use crate::core::error::{JitError, JitResult};
use crate::core::register_file::{AsmReg, RegClass};
use crate::ir::graph::{
    slot_offset, BranchCondition, BranchNode, CallArg, CallNode, CallReturn, ControlNode, GuardNode, InvokeNode,
    JumplistNode, Primitive,
};
use crate::runtime::code::{CTX_EXIT, CTX_RESUME, CTX_WORK};

use super::calling_convention::{ArgLocation, CallingConvention, STACK_ARG_SLOTS};

/// Bytes reserved below the saved registers for outgoing stack arguments,
/// padded so rsp stays 16-byte aligned.
pub const FRAME_ARG_AREA: i32 = STACK_ARG_SLOTS as i32 * 8 + 8;

const GP64: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];
const GP32: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];
const GP16: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];
const GP8: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];
const XMM: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
];

/// Callee-saved registers in push order.
const SAVED: [AsmRegister64; 5] = [rbx, r12, r13, r14, r15];

trait Encoding<T> {
    fn encoding(self) -> JitResult<T>;
}

impl<T> Encoding<T> for Result<T, IcedError> {
    fn encoding(self) -> JitResult<T> {
        self.map_err(|e| JitError::Encode { reason: e.to_string() })
    }
}

fn invalid_register(reg: AsmReg, what: &str) -> JitError {
    JitError::Encode {
        reason: format!("{reg} cannot be used as {what}"),
    }
}

fn gp64(reg: AsmReg) -> JitResult<AsmRegister64> {
    match reg.class {
        RegClass::Gpr => GP64.get(reg.id as usize).copied().ok_or_else(|| invalid_register(reg, "gpr")),
        RegClass::Num => Err(invalid_register(reg, "gpr")),
    }
}

fn gp32(reg: AsmReg) -> JitResult<AsmRegister32> {
    gp64(reg).map(|_| GP32[reg.id as usize])
}

fn gp16(reg: AsmReg) -> JitResult<AsmRegister16> {
    gp64(reg).map(|_| GP16[reg.id as usize])
}

fn gp8(reg: AsmReg) -> JitResult<AsmRegister8> {
    gp64(reg).map(|_| GP8[reg.id as usize])
}

fn xmm(reg: AsmReg) -> JitResult<AsmRegisterXmm> {
    match reg.class {
        RegClass::Num => XMM.get(reg.id as usize).copied().ok_or_else(|| invalid_register(reg, "xmm")),
        RegClass::Gpr => Err(invalid_register(reg, "xmm")),
    }
}

fn base_register(base: Base) -> AsmRegister64 {
    match base {
        Base::Work => r14,
        Base::Tc => rbx,
        Base::Cu => r15,
    }
}

fn work(slot: u16) -> AsmMemoryOperand {
    r14 + slot_offset(slot)
}

/// Emitter producing x86-64 machine code.
pub struct X64Emitter {
    asm: CodeAssembler,
    conv: &'static dyn CallingConvention,
    labels: Vec<CodeLabel>,
    placed: Vec<bool>,
    exit: CodeLabel,
    /// A label was bound and no instruction has been emitted since.
    label_pending: bool,
    code: Vec<u8>,
    offsets: Vec<i64>,
}

impl X64Emitter {
    pub fn new(conv: &'static dyn CallingConvention) -> JitResult<Self> {
        let mut asm = CodeAssembler::new(64).encoding()?;
        let exit = asm.create_label();
        Ok(Self {
            asm,
            conv,
            labels: Vec::new(),
            placed: Vec::new(),
            exit,
            label_pending: false,
            code: Vec::new(),
            offsets: Vec::new(),
        })
    }

    /// The assembler, for emitting an instruction.
    fn asm(&mut self) -> &mut CodeAssembler {
        self.label_pending = false;
        &mut self.asm
    }

    /// Bind `label` at the next instruction. The returned label carries the
    /// instruction index `label_ip` needs after linking, so it has to replace
    /// any stored copy.
    fn bind(&mut self, mut label: CodeLabel) -> JitResult<CodeLabel> {
        if self.label_pending {
            self.asm.nop().encoding()?;
        }
        self.asm.set_label(&mut label).encoding()?;
        self.label_pending = true;
        Ok(label)
    }

    fn label(&self, label: LabelId) -> JitResult<CodeLabel> {
        self.labels.get(label).copied().ok_or(JitError::UnknownLabel { label })
    }

    fn memory(&self, addr: Address) -> JitResult<AsmMemoryOperand> {
        let base = match addr.base {
            AddressBase::Fixed(base) => base_register(base),
            AddressBase::Reg(reg) => gp64(reg)?,
        };
        Ok(base + addr.offset)
    }

    /// Zero-extending load of `size` bytes.
    fn load_sized(&mut self, dst: AsmReg, mem: AsmMemoryOperand, size: u8) -> JitResult<()> {
        if dst.class == RegClass::Num {
            let dst = xmm(dst)?;
            return self.asm().movsd_2(dst, qword_ptr(mem)).encoding();
        }
        match size {
            1 => {
                let dst = gp32(dst)?;
                self.asm().movzx(dst, byte_ptr(mem)).encoding()
            }
            2 => {
                let dst = gp32(dst)?;
                self.asm().movzx(dst, word_ptr(mem)).encoding()
            }
            4 => {
                let dst = gp32(dst)?;
                self.asm().mov(dst, dword_ptr(mem)).encoding()
            }
            _ => {
                let dst = gp64(dst)?;
                self.asm().mov(dst, qword_ptr(mem)).encoding()
            }
        }
    }

    fn store_sized(&mut self, mem: AsmMemoryOperand, src: AsmReg, size: u8) -> JitResult<()> {
        if src.class == RegClass::Num {
            let src = xmm(src)?;
            return self.asm().movsd_2(qword_ptr(mem), src).encoding();
        }
        match size {
            1 => {
                let src = gp8(src)?;
                self.asm().mov(byte_ptr(mem), src).encoding()
            }
            2 => {
                let src = gp16(src)?;
                self.asm().mov(word_ptr(mem), src).encoding()
            }
            4 => {
                let src = gp32(src)?;
                self.asm().mov(dword_ptr(mem), src).encoding()
            }
            _ => {
                let src = gp64(src)?;
                self.asm().mov(qword_ptr(mem), src).encoding()
            }
        }
    }

    fn jump_if(&mut self, cond: Condition, target: CodeLabel) -> JitResult<()> {
        let asm = self.asm();
        match cond {
            Condition::Lt => asm.jl(target),
            Condition::Le => asm.jle(target),
            Condition::Eq | Condition::Zero => asm.je(target),
            Condition::Ne | Condition::NonZero => asm.jne(target),
            Condition::Ge => asm.jge(target),
            Condition::Gt => asm.jg(target),
        }
        .encoding()
    }

    fn alu(&mut self, op: BinaryOp, dst: AsmRegister64, src: AsmRegister64) -> JitResult<()> {
        let asm = self.asm();
        match op {
            BinaryOp::Add => asm.add(dst, src),
            BinaryOp::Sub => asm.sub(dst, src),
            BinaryOp::Mul => asm.imul_2(dst, src),
            BinaryOp::And => asm.and(dst, src),
            BinaryOp::Or => asm.or(dst, src),
            BinaryOp::Xor => asm.xor(dst, src),
        }
        .encoding()
    }

    /// Put one graph-level call argument into its ABI location.
    fn place_arg(&mut self, arg: CallArg, location: ArgLocation) -> JitResult<()> {
        let (reg, stack) = match location {
            ArgLocation::Register(reg) => (reg, None),
            ArgLocation::Stack(offset) => (self.conv.scratch(), Some(offset)),
        };
        match (arg, reg.class) {
            (CallArg::WorkNum(slot), RegClass::Num) => {
                let dst = xmm(reg)?;
                self.asm().movsd_2(dst, qword_ptr(work(slot))).encoding()?;
            }
            (CallArg::Tc, _) => self.asm().mov(gp64(reg)?, rbx).encoding()?,
            (CallArg::Cu, _) => self.asm().mov(gp64(reg)?, r15).encoding()?,
            // stack-passed floats travel as raw bits through the scratch register
            (CallArg::Work(slot) | CallArg::WorkNum(slot), _) => {
                self.asm().mov(gp64(reg)?, qword_ptr(work(slot))).encoding()?
            }
            (CallArg::WorkAddr(slot), _) => self.asm().lea(gp64(reg)?, work(slot)).encoding()?,
            (CallArg::Literal(value), _) => self.asm().mov(gp64(reg)?, value).encoding()?,
        }
        if let Some(offset) = stack {
            let src = gp64(reg)?;
            self.asm().mov(qword_ptr(rsp + offset), src).encoding()?;
        }
        Ok(())
    }

    fn call_with_args(&mut self, func: usize, args: &[CallArg]) -> JitResult<()> {
        let classes: Vec<_> = args.iter().map(CallArg::class).collect();
        let locations = self.conv.assign_args(&classes)?;
        // stack arguments go first, they pass through the scratch register
        let (stack, regs): (Vec<_>, Vec<_>) = args
            .iter()
            .zip(locations)
            .partition(|(_, location)| matches!(location, ArgLocation::Stack(_)));
        for (&arg, location) in stack.into_iter().chain(regs) {
            self.place_arg(arg, location)?;
        }
        self.asm().mov(r11, func as u64).encoding()?;
        self.asm().call(r11).encoding()
    }

    /// Store the address of `label` into the context's resume slot.
    fn store_resume(&mut self, label: LabelId) -> JitResult<()> {
        let target = self.label(label)?;
        self.asm().lea(r11, ptr(target)).encoding()?;
        self.asm().mov(qword_ptr(rbx + CTX_RESUME), r11).encoding()
    }

    /// Machine code after `link`.
    pub fn code(&self) -> &[u8] {
        &self.code
    }
}

impl Emitter for X64Emitter {
    fn emit_prologue(&mut self) -> JitResult<()> {
        self.asm().push(rbp).encoding()?;
        self.asm().mov(rbp, rsp).encoding()?;
        for reg in SAVED {
            self.asm().push(reg).encoding()?;
        }
        self.asm().sub(rsp, FRAME_ARG_AREA).encoding()?;
        self.asm().mov(rbx, rdi).encoding()?;
        self.asm().mov(r15, rsi).encoding()?;
        self.asm().mov(r14, qword_ptr(rbx + CTX_WORK)).encoding()?;
        self.asm().jmp(rdx).encoding()
    }

    fn emit_epilogue(&mut self) -> JitResult<()> {
        self.exit = self.bind(self.exit)?;
        self.asm().add(rsp, FRAME_ARG_AREA).encoding()?;
        for reg in SAVED.iter().rev() {
            self.asm().pop(*reg).encoding()?;
        }
        self.asm().pop(rbp).encoding()?;
        self.asm().ret().encoding()
    }

    fn reserve_labels(&mut self, count: usize) {
        while self.labels.len() < count {
            let label = self.asm.create_label();
            self.labels.push(label);
            self.placed.push(false);
        }
    }

    fn emit_label(&mut self, label: LabelId) -> JitResult<()> {
        let code_label = self.label(label)?;
        if self.placed[label] {
            return Err(JitError::Encode {
                reason: format!("label {label} bound twice"),
            });
        }
        self.placed[label] = true;
        self.labels[label] = self.bind(code_label)?;
        Ok(())
    }

    fn emit_primitive(&mut self, prim: &Primitive) -> JitResult<()> {
        match *prim {
            Primitive::Noop => Ok(()),
            Primitive::ConstI64 { dst, value } => {
                self.asm().mov(r11, value).encoding()?;
                self.asm().mov(qword_ptr(work(dst)), r11).encoding()
            }
            Primitive::ConstN64 { dst, value } => {
                self.asm().mov(r11, value.to_bits()).encoding()?;
                self.asm().mov(qword_ptr(work(dst)), r11).encoding()
            }
            Primitive::Set { dst, src } => {
                self.asm().mov(r11, qword_ptr(work(src))).encoding()?;
                self.asm().mov(qword_ptr(work(dst)), r11).encoding()
            }
            Primitive::AddI { dst, a, b } | Primitive::SubI { dst, a, b } | Primitive::MulI { dst, a, b } => {
                self.asm().mov(r11, qword_ptr(work(a))).encoding()?;
                let asm = self.asm();
                match prim {
                    Primitive::AddI { .. } => asm.add(r11, qword_ptr(work(b))),
                    Primitive::SubI { .. } => asm.sub(r11, qword_ptr(work(b))),
                    _ => asm.imul_2(r11, qword_ptr(work(b))),
                }
                .encoding()?;
                self.asm().mov(qword_ptr(work(dst)), r11).encoding()
            }
            Primitive::IncI { dst } => self.asm().add(qword_ptr(work(dst)), 1).encoding(),
            Primitive::DecI { dst } => self.asm().sub(qword_ptr(work(dst)), 1).encoding(),
            Primitive::AddN { dst, a, b } => {
                self.asm().movsd_2(xmm0, qword_ptr(work(a))).encoding()?;
                self.asm().addsd(xmm0, qword_ptr(work(b))).encoding()?;
                self.asm().movsd_2(qword_ptr(work(dst)), xmm0).encoding()
            }
        }
    }

    fn emit_block_branch(&mut self, branch: &BranchNode) -> JitResult<()> {
        let target = self.label(branch.label)?;
        match branch.cond {
            BranchCondition::Always => self.asm().jmp(target).encoding(),
            BranchCondition::IfZero(slot) | BranchCondition::IfNonZero(slot) => {
                self.asm().cmp(qword_ptr(work(slot)), 0).encoding()?;
                let cond = match branch.cond {
                    BranchCondition::IfZero(_) => Condition::Zero,
                    _ => Condition::NonZero,
                };
                self.jump_if(cond, target)
            }
        }
    }

    fn emit_branch(&mut self, label: LabelId) -> JitResult<()> {
        let target = self.label(label)?;
        self.asm().jmp(target).encoding()
    }

    fn emit_conditional_branch(&mut self, cond: Condition, label: LabelId) -> JitResult<()> {
        let target = self.label(label)?;
        self.jump_if(cond, target)
    }

    fn emit_call(&mut self, call: &CallNode) -> JitResult<()> {
        self.call_with_args(call.func, &call.args)?;
        match call.ret {
            CallReturn::Void => Ok(()),
            CallReturn::Work(slot) => self.asm().mov(qword_ptr(work(slot)), rax).encoding(),
            CallReturn::WorkNum(slot) => self.asm().movsd_2(qword_ptr(work(slot)), xmm0).encoding(),
        }
    }

    fn emit_guard(&mut self, guard: &GuardNode) -> JitResult<()> {
        let ok = self.asm.create_label();
        self.asm().mov(r11, guard.expected).encoding()?;
        self.asm().cmp(qword_ptr(work(guard.local)), r11).encoding()?;
        self.asm().je(ok).encoding()?;
        let code = i32::try_from(guard.deopt + 1).map_err(|_| JitError::Encode {
            reason: format!("deopt index {} out of range", guard.deopt),
        })?;
        self.asm().mov(qword_ptr(rbx + CTX_EXIT), code).encoding()?;
        let exit = self.exit;
        self.asm().jmp(exit).encoding()?;
        self.bind(ok)?;
        Ok(())
    }

    fn emit_invoke(&mut self, invoke: &InvokeNode) -> JitResult<()> {
        self.store_resume(invoke.return_label)?;
        self.call_with_args(invoke.func, &invoke.args)?;
        let exit = self.exit;
        self.asm().jmp(exit).encoding()
    }

    fn emit_jumplist(&mut self, jumplist: &JumplistNode) -> JitResult<()> {
        self.asm().mov(r11, qword_ptr(work(jumplist.selector))).encoding()?;
        for (index, &label) in jumplist.labels.iter().enumerate() {
            let target = self.label(label)?;
            self.asm().cmp(r11, index as i32).encoding()?;
            self.asm().je(target).encoding()?;
        }
        Ok(())
    }

    fn emit_control(&mut self, control: &ControlNode) -> JitResult<()> {
        let exit = self.exit;
        match *control {
            ControlNode::Breakpoint => self.asm().int3().encoding(),
            ControlNode::DynamicLabel(label) => self.store_resume(label),
            ControlNode::ExitCheck => {
                self.asm().cmp(qword_ptr(rbx + CTX_EXIT), 0).encoding()?;
                self.asm().jne(exit).encoding()
            }
            ControlNode::Exit => self.asm().jmp(exit).encoding(),
        }
    }

    fn emit_stack_arg(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.store_sized(rsp + offset, reg, size)
    }

    fn emit_load(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.load_sized(reg, r14 + offset, size)
    }

    fn emit_store(&mut self, offset: i32, reg: AsmReg, size: u8) -> JitResult<()> {
        self.store_sized(r14 + offset, reg, size)
    }

    fn emit_move(&mut self, dst: AsmReg, src: AsmReg) -> JitResult<()> {
        if dst == src {
            return Ok(());
        }
        match (dst.class, src.class) {
            (RegClass::Gpr, RegClass::Gpr) => {
                let (dst, src) = (gp64(dst)?, gp64(src)?);
                self.asm().mov(dst, src).encoding()
            }
            (RegClass::Num, RegClass::Num) => {
                let (dst, src) = (xmm(dst)?, xmm(src)?);
                self.asm().movapd(dst, src).encoding()
            }
            (RegClass::Num, RegClass::Gpr) => {
                let (dst, src) = (xmm(dst)?, gp64(src)?);
                self.asm().movq(dst, src).encoding()
            }
            (RegClass::Gpr, RegClass::Num) => {
                let (dst, src) = (gp64(dst)?, xmm(src)?);
                self.asm().movq(dst, src).encoding()
            }
        }
    }

    fn emit_constant(&mut self, dst: AsmReg, value: i64, _size: u8) -> JitResult<()> {
        match dst.class {
            RegClass::Gpr => {
                let dst = gp64(dst)?;
                self.asm().mov(dst, value).encoding()
            }
            RegClass::Num => {
                let dst = xmm(dst)?;
                self.asm().mov(r11, value).encoding()?;
                self.asm().movq(dst, r11).encoding()
            }
        }
    }

    fn emit_base(&mut self, dst: AsmReg, base: Base) -> JitResult<()> {
        let dst = gp64(dst)?;
        self.asm().mov(dst, base_register(base)).encoding()
    }

    fn emit_address(&mut self, dst: AsmReg, addr: Address) -> JitResult<()> {
        let (dst, mem) = (gp64(dst)?, self.memory(addr)?);
        self.asm().lea(dst, mem).encoding()
    }

    fn emit_memory_load(&mut self, dst: AsmReg, addr: Address, size: u8) -> JitResult<()> {
        let mem = self.memory(addr)?;
        self.load_sized(dst, mem, size)
    }

    fn emit_memory_store(&mut self, addr: Address, src: AsmReg, size: u8) -> JitResult<()> {
        let mem = self.memory(addr)?;
        self.store_sized(mem, src, size)
    }

    fn emit_binary(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, rhs: AsmReg) -> JitResult<()> {
        if dst.class == RegClass::Num {
            let (d, l, r) = (xmm(dst)?, xmm(lhs)?, xmm(rhs)?);
            if dst == rhs && dst != lhs && !matches!(op, BinaryOp::Add | BinaryOp::Mul) {
                return Err(JitError::unimplemented(format!("{op:?} into its right operand")));
            }
            let (d, r) = if dst == rhs && dst != lhs { (d, l) } else { (d, r) };
            if dst != lhs && dst != rhs {
                self.asm().movapd(d, l).encoding()?;
            }
            let asm = self.asm();
            return match op {
                BinaryOp::Add => asm.addsd(d, r),
                BinaryOp::Sub => asm.subsd(d, r),
                BinaryOp::Mul => asm.mulsd(d, r),
                _ => return Err(JitError::unimplemented(format!("{op:?} on floats"))),
            }
            .encoding();
        }

        let (d, l, r) = (gp64(dst)?, gp64(lhs)?, gp64(rhs)?);
        if dst == lhs {
            return self.alu(op, d, r);
        }
        if dst == rhs {
            if op == BinaryOp::Sub {
                self.asm().mov(r11, r).encoding()?;
                self.asm().mov(d, l).encoding()?;
                return self.alu(op, d, r11);
            }
            return self.alu(op, d, l);
        }
        self.asm().mov(d, l).encoding()?;
        self.alu(op, d, r)
    }

    fn emit_binary_immediate(&mut self, op: BinaryOp, dst: AsmReg, lhs: AsmReg, imm: i64) -> JitResult<()> {
        let (d, l) = (gp64(dst)?, gp64(lhs)?);
        let Ok(imm32) = i32::try_from(imm) else {
            self.asm().mov(r11, imm).encoding()?;
            return self.emit_binary(op, dst, lhs, super::SCRATCH);
        };
        if op == BinaryOp::Mul {
            return self.asm().imul_3(d, l, imm32).encoding();
        }
        if dst != lhs {
            self.asm().mov(d, l).encoding()?;
        }
        let asm = self.asm();
        match op {
            BinaryOp::Add => asm.add(d, imm32),
            BinaryOp::Sub => asm.sub(d, imm32),
            BinaryOp::And => asm.and(d, imm32),
            BinaryOp::Or => asm.or(d, imm32),
            BinaryOp::Xor => asm.xor(d, imm32),
            BinaryOp::Mul => asm.imul_3(d, d, imm32),
        }
        .encoding()
    }

    fn emit_compare(&mut self, lhs: AsmReg, rhs: AsmReg) -> JitResult<()> {
        let (l, r) = (gp64(lhs)?, gp64(rhs)?);
        self.asm().cmp(l, r).encoding()
    }

    fn emit_test(&mut self, reg: AsmReg) -> JitResult<()> {
        let reg = gp64(reg)?;
        self.asm().test(reg, reg).encoding()
    }

    fn emit_flag_to_register(&mut self, cond: Condition, dst: AsmReg) -> JitResult<()> {
        let (low, wide) = (gp8(dst)?, gp32(dst)?);
        let asm = self.asm();
        match cond {
            Condition::Lt => asm.setl(low),
            Condition::Le => asm.setle(low),
            Condition::Eq | Condition::Zero => asm.sete(low),
            Condition::Ne | Condition::NonZero => asm.setne(low),
            Condition::Ge => asm.setge(low),
            Condition::Gt => asm.setg(low),
        }
        .encoding()?;
        self.asm().movzx(wide, low).encoding()
    }

    fn emit_call_indirect(&mut self, target: AsmReg) -> JitResult<()> {
        let target = gp64(target)?;
        self.asm().call(target).encoding()
    }

    fn link(&mut self) -> JitResult<usize> {
        let result = self
            .asm
            .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
            .map_err(|e| JitError::Link { reason: e.to_string() })?;
        self.offsets = self
            .labels
            .iter()
            .zip(&self.placed)
            .map(|(label, &placed)| match (placed, result.label_ip(label)) {
                (true, Ok(ip)) => ip as i64,
                _ => -1,
            })
            .collect();
        self.code = result.inner.code_buffer;
        log::debug!("linked {} bytes, {} labels", self.code.len(), self.labels.len());
        Ok(self.code.len())
    }

    fn encode(&mut self, buffer: &mut [u8]) -> JitResult<()> {
        if buffer.len() != self.code.len() {
            return Err(JitError::Encode {
                reason: format!("buffer holds {} bytes, code is {}", buffer.len(), self.code.len()),
            });
        }
        buffer.copy_from_slice(&self.code);
        Ok(())
    }

    fn label_offset(&self, label: LabelId) -> i64 {
        self.offsets.get(label).copied().unwrap_or(-1)
    }
}
