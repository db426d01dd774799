// This module implements the greedy register allocator used while replaying a tile list. It
// combines the RegisterFile (which registers are bound, locked and owned by whom) with the
// spill area layout and the set of values currently live. Values enter through allocate+assign
// when their defining tile is emitted, are locked by use() for the duration of a tile's
// emission and unlocked by release(), may be parked in the spill area by spill() when a register
// is needed or a call is about to clobber caller-saved registers, are brought back by load() on
// their next use, and die in expire() once the tile order number reaches their last use.
// Allocation is deliberately order driven: the lowest free register is taken, and when none is
// free the code generator asks for the unlocked value whose last use lies furthest ahead.

//! Greedy register allocation with spilling.

use super::emitter::Emitter;
use super::error::{JitError, JitResult};
use super::register_file::{AsmReg, RegAllocError, RegBitSet, RegClass, RegisterFile};
use super::value::{Value, ValueId, ValueState};

/// Bytes per spill slot.
pub const SPILL_SLOT_SIZE: i32 = 8;

/// Spill slots in the work area, above locals and outgoing call data.
#[derive(Debug, Clone)]
pub struct SpillLayout {
    base: i32,
    next: i32,
    free: Vec<i32>,
}

impl SpillLayout {
    pub fn new(base: i32) -> Self {
        Self {
            base,
            next: base,
            free: Vec::new(),
        }
    }

    pub fn base(&self) -> i32 {
        self.base
    }

    pub fn allocate(&mut self) -> i32 {
        self.free.pop().unwrap_or_else(|| {
            let offset = self.next;
            self.next += SPILL_SLOT_SIZE;
            offset
        })
    }

    pub fn release(&mut self, offset: i32) {
        debug_assert!(offset >= self.base && offset < self.next);
        self.free.push(offset);
    }

    /// Bytes touched so far.
    pub fn extent(&self) -> u32 {
        (self.next - self.base) as u32
    }
}

/// Counters for one allocator run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocStats {
    pub spills: u32,
    pub reloads: u32,
}

/// Register allocator for one expression tree.
#[derive(Debug)]
pub struct RegisterAllocator {
    file: RegisterFile,
    caller_saved: RegBitSet,
    spill: SpillLayout,
    /// Values that are Allocated or Spilled.
    active: Vec<ValueId>,
    peak: [u32; 2],
    stats: AllocStats,
}

impl RegisterAllocator {
    pub fn new(allocatable: RegBitSet, caller_saved: RegBitSet, spill_base: i32) -> Self {
        Self {
            file: RegisterFile::new(allocatable),
            caller_saved,
            spill: SpillLayout::new(spill_base),
            active: Vec::new(),
            peak: [0; 2],
            stats: AllocStats::default(),
        }
    }

    pub fn file(&self) -> &RegisterFile {
        &self.file
    }

    pub fn stats(&self) -> AllocStats {
        self.stats
    }

    pub fn spill_extent(&self) -> u32 {
        self.spill.extent()
    }

    /// Highest number of simultaneously bound registers of a class.
    pub fn peak_in_use(&self, class: RegClass) -> u32 {
        self.peak[class.index()]
    }

    pub fn has_free(&self, class: RegClass) -> bool {
        self.file.free(class).next().is_some()
    }

    /// Values still Allocated or Spilled.
    pub fn live_values(&self) -> &[ValueId] {
        &self.active
    }

    fn note_peak(&mut self, class: RegClass) {
        let in_use = self.file.in_use(class);
        let peak = &mut self.peak[class.index()];
        *peak = (*peak).max(in_use);
    }

    /// Take a free register. Callers spill first when none is left.
    pub fn allocate(&mut self, class: RegClass) -> JitResult<AsmReg> {
        let reg = self
            .file
            .allocate(class)
            .map_err(|_| JitError::NoFreeRegister { class })?;
        self.note_peak(class);
        Ok(reg)
    }

    /// Return a register obtained from `allocate` without binding it.
    pub fn free(&mut self, reg: AsmReg) -> JitResult<()> {
        Ok(self.file.free_register(reg)?)
    }

    /// Bind `reg` to a value, taking ownership of the register.
    pub fn assign(&mut self, values: &mut [Value], id: ValueId, reg: AsmReg) -> JitResult<()> {
        values[id].transition(id, ValueState::Allocated)?;
        self.file.bind(reg, Some(id))?;
        values[id].reg = Some(reg);
        if !self.active.contains(&id) {
            self.active.push(id);
        }
        self.note_peak(reg.class);
        log::trace!("node {id} assigned {reg}");
        Ok(())
    }

    /// Lock the register of a resident value for the current tile.
    pub fn use_value(&mut self, values: &[Value], id: ValueId) -> JitResult<()> {
        let reg = values[id].resident_reg(id)?;
        Ok(self.file.lock_register(reg)?)
    }

    pub fn release(&mut self, values: &[Value], id: ValueId) -> JitResult<()> {
        if let (ValueState::Allocated, Some(reg)) = (values[id].state, values[id].reg) {
            self.file.unlock_register(reg)?;
        }
        Ok(())
    }

    /// Bring a spilled value back into a fresh register.
    pub fn load(&mut self, values: &mut [Value], id: ValueId, emitter: &mut dyn Emitter) -> JitResult<AsmReg> {
        let value = &values[id];
        let (Some(class), ValueState::Spilled, Some(offset)) = (value.class(), value.state, value.spill) else {
            return Err(JitError::ValueNotLive {
                node: id,
                state: value.state,
            });
        };
        let size = value.size;
        let reg = self.allocate(class)?;
        emitter.emit_load(offset, reg, size)?;
        self.assign(values, id, reg)?;
        self.stats.reloads += 1;
        log::debug!("reloaded node {id} from spill offset {offset} into {reg}");
        Ok(reg)
    }

    /// Park a resident value in its spill slot and free the register.
    pub fn spill(&mut self, values: &mut [Value], id: ValueId, emitter: &mut dyn Emitter) -> JitResult<()> {
        let reg = values[id].resident_reg(id)?;
        if self.file.is_locked(reg) {
            return Err(RegAllocError::Locked(reg).into());
        }
        let offset = match values[id].spill {
            // slot already holds the value
            Some(offset) => offset,
            None => {
                let offset = self.spill.allocate();
                emitter.emit_store(offset, reg, values[id].size)?;
                values[id].spill = Some(offset);
                offset
            }
        };
        values[id].transition(id, ValueState::Spilled)?;
        values[id].reg = None;
        if self.file.owner(reg) == Some(id) {
            self.file.free_register(reg)?;
        }
        self.stats.spills += 1;
        log::debug!("spilled node {id} from {reg} to offset {offset}");
        Ok(())
    }

    /// Spill every value held in a caller-saved register.
    pub fn spill_before_call(&mut self, values: &mut [Value], emitter: &mut dyn Emitter) -> JitResult<()> {
        let victims: Vec<ValueId> = self
            .active
            .iter()
            .copied()
            .filter(|&id| {
                values[id].state == ValueState::Allocated
                    && values[id]
                        .reg
                        .is_some_and(|reg| self.caller_saved.contains(reg) && self.file.owner(reg) == Some(id))
            })
            .collect();
        for id in victims {
            self.spill(values, id, emitter)?;
        }
        Ok(())
    }

    /// The unlocked resident value of `class` whose last use is furthest away.
    pub fn spill_victim(&self, values: &[Value], class: RegClass) -> Option<ValueId> {
        self.active
            .iter()
            .copied()
            .filter(|&id| {
                let value = &values[id];
                value.state == ValueState::Allocated
                    && value.reg.is_some_and(|reg| {
                        reg.class == class && !self.file.is_locked(reg) && self.file.owner(reg) == Some(id)
                    })
            })
            .max_by_key(|&id| (values[id].last_use, std::cmp::Reverse(id)))
    }

    /// Reserve a specific free register without an owning value.
    pub fn reserve(&mut self, reg: AsmReg) -> JitResult<()> {
        if self.file.is_allocated(reg) {
            return Err(RegAllocError::Locked(reg).into());
        }
        self.file.bind(reg, None)?;
        self.file.lock_register(reg)?;
        self.note_peak(reg.class);
        Ok(())
    }

    /// Undo `reserve`.
    pub fn unreserve(&mut self, reg: AsmReg) -> JitResult<()> {
        self.file.unlock_register(reg)?;
        if !self.file.is_locked(reg) && self.file.owner(reg).is_none() {
            self.file.free_register(reg)?;
        }
        Ok(())
    }

    /// Retire values whose last use is at or before `order_nr`.
    pub fn expire(&mut self, values: &mut [Value], order_nr: u32) -> JitResult<()> {
        let mut keep = Vec::with_capacity(self.active.len());
        for id in std::mem::take(&mut self.active) {
            if values[id].last_use > order_nr {
                keep.push(id);
                continue;
            }
            if let (ValueState::Allocated, Some(reg)) = (values[id].state, values[id].reg) {
                if self.file.owner(reg) == Some(id) && !self.file.is_locked(reg) {
                    self.file.free_register(reg)?;
                }
            }
            if let Some(offset) = values[id].spill.take() {
                self.spill.release(offset);
            }
            values[id].transition(id, ValueState::Dead)?;
            values[id].reg = None;
            log::trace!("node {id} dead at {order_nr}");
        }
        self.active = keep;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ValueType;
    use crate::trace::{Event, RecordingEmitter};

    fn allocator() -> RegisterAllocator {
        let allocatable = RegBitSet::from_regs(&[AsmReg::gpr(0), AsmReg::gpr(1), AsmReg::gpr(12)]);
        let caller_saved = RegBitSet::from_regs(&[AsmReg::gpr(0), AsmReg::gpr(1)]);
        RegisterAllocator::new(allocatable, caller_saved, 64)
    }

    fn values(n: usize) -> Vec<Value> {
        vec![Value::new(ValueType::Reg, 8); n]
    }

    #[test]
    fn test_spill_and_reload_roundtrip() {
        let mut alloc = allocator();
        let mut vals = values(2);
        let mut emitter = RecordingEmitter::new();
        let reg = alloc.allocate(RegClass::Gpr).unwrap();
        alloc.assign(&mut vals, 1, reg).unwrap();
        alloc.spill(&mut vals, 1, &mut emitter).unwrap();
        assert_eq!(vals[1].state, ValueState::Spilled);
        assert!(!alloc.file().is_allocated(reg));

        let back = alloc.load(&mut vals, 1, &mut emitter).unwrap();
        assert_eq!(vals[1].state, ValueState::Allocated);
        assert_eq!(
            emitter.events(),
            &[
                Event::Store { offset: 64, reg, size: 8 },
                Event::Load { offset: 64, reg: back, size: 8 },
            ]
        );
        assert_eq!(alloc.stats(), AllocStats { spills: 1, reloads: 1 });
    }

    #[test]
    fn test_spill_before_call_keeps_callee_saved() {
        let mut alloc = allocator();
        let mut vals = values(3);
        let mut emitter = RecordingEmitter::new();
        for id in 0..3 {
            let reg = alloc.allocate(RegClass::Gpr).unwrap();
            alloc.assign(&mut vals, id, reg).unwrap();
        }
        alloc.spill_before_call(&mut vals, &mut emitter).unwrap();
        assert_eq!(vals[0].state, ValueState::Spilled);
        assert_eq!(vals[1].state, ValueState::Spilled);
        assert_eq!(vals[2].state, ValueState::Allocated);
        assert_eq!(vals[2].reg, Some(AsmReg::gpr(12)));
    }

    #[test]
    fn test_expire_frees_registers_and_slots() {
        let mut alloc = allocator();
        let mut vals = values(2);
        let mut emitter = RecordingEmitter::new();
        vals[0].last_use = 3;
        vals[1].last_use = 5;
        for id in 0..2 {
            let reg = alloc.allocate(RegClass::Gpr).unwrap();
            alloc.assign(&mut vals, id, reg).unwrap();
        }
        alloc.spill(&mut vals, 1, &mut emitter).unwrap();
        alloc.expire(&mut vals, 3).unwrap();
        assert_eq!(vals[0].state, ValueState::Dead);
        assert_eq!(vals[1].state, ValueState::Spilled);
        alloc.expire(&mut vals, 5).unwrap();
        assert_eq!(vals[1].state, ValueState::Dead);
        assert!(alloc.live_values().is_empty());
        assert_eq!(alloc.file().in_use(RegClass::Gpr), 0);
    }

    #[test]
    fn test_victim_is_furthest_unlocked_use() {
        let mut alloc = allocator();
        let mut vals = values(3);
        vals[0].last_use = 9;
        vals[1].last_use = 4;
        vals[2].last_use = 7;
        for id in 0..3 {
            let reg = alloc.allocate(RegClass::Gpr).unwrap();
            alloc.assign(&mut vals, id, reg).unwrap();
        }
        assert_eq!(alloc.spill_victim(&vals, RegClass::Gpr), Some(0));
        alloc.use_value(&vals, 0).unwrap();
        assert_eq!(alloc.spill_victim(&vals, RegClass::Gpr), Some(2));
        assert!(matches!(
            alloc.allocate(RegClass::Gpr),
            Err(JitError::NoFreeRegister { class: RegClass::Gpr })
        ));
        assert_eq!(alloc.peak_in_use(RegClass::Gpr), 3);
    }

    #[test]
    fn test_cross_assign_shares_register() {
        let mut alloc = allocator();
        let mut vals = values(2);
        vals[0].last_use = 2;
        vals[1].last_use = 3;
        let reg = alloc.allocate(RegClass::Gpr).unwrap();
        alloc.assign(&mut vals, 0, reg).unwrap();
        alloc.assign(&mut vals, 1, reg).unwrap();
        alloc.expire(&mut vals, 2).unwrap();
        assert_eq!(vals[0].state, ValueState::Dead);
        assert_eq!(alloc.file().owner(reg), Some(1));
        assert!(alloc.file().is_allocated(reg));
    }

    #[test]
    fn test_reserve_and_unreserve() {
        let mut alloc = allocator();
        let reg = AsmReg::gpr(1);
        alloc.reserve(reg).unwrap();
        assert!(alloc.reserve(reg).is_err());
        assert_ne!(alloc.allocate(RegClass::Gpr).unwrap(), reg);
        alloc.unreserve(reg).unwrap();
        assert!(!alloc.file().is_allocated(reg));
    }

    #[test]
    fn test_dead_value_not_live() {
        let mut alloc = allocator();
        let mut vals = values(1);
        let mut emitter = RecordingEmitter::new();
        let err = alloc.load(&mut vals, 0, &mut emitter).unwrap_err();
        assert!(matches!(err, JitError::ValueNotLive { node: 0, state: ValueState::Empty }));
    }
}
