// This module tracks the physical register state of one expression-tree compilation. AsmReg
// names a register by class (general purpose or floating point) and hardware number, and
// RegBitSet keeps one 64-bit mask per class so free/used/locked queries are single bit
// operations. RegisterFile records which registers may be handed out at all (the ABI's
// allocatable set), which ones are currently bound, which value owns each bound register and
// how many in-flight uses lock it. Allocation is deterministic: the lowest numbered free
// allocatable register of the requested class wins, which keeps emitted code byte-identical
// across repeated compilations. The file never spills on its own; eviction decisions belong to
// the RegisterAllocator, which sees value live ranges.

//! Register bookkeeping for the expression compiler.

use std::fmt;

use thiserror::Error;

use super::value::ValueId;

/// Number of register slots tracked per class.
pub const MAX_REGISTERS_PER_CLASS: usize = 64;

/// Hardware register number within a class.
pub type RegId = u8;

/// Register class a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegClass {
    /// Integer and pointer registers.
    Gpr = 0,
    /// Floating point registers.
    Num = 1,
}

impl RegClass {
    pub const ALL: [RegClass; 2] = [RegClass::Gpr, RegClass::Num];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// A physical register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AsmReg {
    pub class: RegClass,
    pub id: RegId,
}

impl AsmReg {
    pub const fn new(class: RegClass, id: RegId) -> Self {
        Self { class, id }
    }

    pub const fn gpr(id: RegId) -> Self {
        Self::new(RegClass::Gpr, id)
    }

    pub const fn num(id: RegId) -> Self {
        Self::new(RegClass::Num, id)
    }

    #[inline]
    fn slot(self) -> usize {
        self.class.index() * MAX_REGISTERS_PER_CLASS + self.id as usize
    }
}

impl fmt::Display for AsmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.class {
            RegClass::Gpr => write!(f, "gpr{}", self.id),
            RegClass::Num => write!(f, "num{}", self.id),
        }
    }
}

/// Bit set over both register classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegBitSet {
    classes: [u64; 2],
}

impl RegBitSet {
    pub const fn new() -> Self {
        Self { classes: [0; 2] }
    }

    /// Build a set from a list of registers.
    pub fn from_regs(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    pub fn contains(&self, reg: AsmReg) -> bool {
        (reg.id as usize) < MAX_REGISTERS_PER_CLASS
            && self.classes[reg.class.index()] & (1u64 << reg.id) != 0
    }

    pub fn set(&mut self, reg: AsmReg) {
        if (reg.id as usize) < MAX_REGISTERS_PER_CLASS {
            self.classes[reg.class.index()] |= 1u64 << reg.id;
        }
    }

    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.id as usize) < MAX_REGISTERS_PER_CLASS {
            self.classes[reg.class.index()] &= !(1u64 << reg.id);
        }
    }

    pub fn union(&self, other: &RegBitSet) -> RegBitSet {
        RegBitSet {
            classes: [
                self.classes[0] | other.classes[0],
                self.classes[1] | other.classes[1],
            ],
        }
    }

    pub fn intersect(&self, other: &RegBitSet) -> RegBitSet {
        RegBitSet {
            classes: [
                self.classes[0] & other.classes[0],
                self.classes[1] & other.classes[1],
            ],
        }
    }

    /// Registers in `self` that are not in `other`.
    pub fn without(&self, other: &RegBitSet) -> RegBitSet {
        RegBitSet {
            classes: [
                self.classes[0] & !other.classes[0],
                self.classes[1] & !other.classes[1],
            ],
        }
    }

    /// Lowest numbered register of the class.
    pub fn first(&self, class: RegClass) -> Option<AsmReg> {
        let bits = self.classes[class.index()];
        (bits != 0).then(|| AsmReg::new(class, bits.trailing_zeros() as RegId))
    }

    pub fn count(&self, class: RegClass) -> u32 {
        self.classes[class.index()].count_ones()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.iter().all(|&bits| bits == 0)
    }

    /// Registers of one class in ascending order.
    pub fn iter(&self, class: RegClass) -> impl Iterator<Item = AsmReg> {
        let mut bits = self.classes[class.index()];
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let id = bits.trailing_zeros();
            bits &= bits - 1;
            Some(AsmReg::new(class, id as RegId))
        })
    }
}

/// Register file failures. These always indicate a compiler bug.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegAllocError {
    #[error("no {0:?} register available")]
    NoRegistersAvailable(RegClass),
    #[error("register {0} is not allocatable")]
    NotAllocatable(AsmReg),
    #[error("register {0} is not bound")]
    NotBound(AsmReg),
    #[error("register {0} is locked")]
    Locked(AsmReg),
    #[error("lock count underflow on {0}")]
    LockCountUnderflow(AsmReg),
}

/// Physical register state for one compilation.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    allocatable: RegBitSet,
    used: RegBitSet,
    locked: RegBitSet,
    owners: Vec<Option<ValueId>>,
    lock_counts: Vec<u8>,
}

impl RegisterFile {
    pub fn new(allocatable: RegBitSet) -> Self {
        Self {
            allocatable,
            used: RegBitSet::new(),
            locked: RegBitSet::new(),
            owners: vec![None; 2 * MAX_REGISTERS_PER_CLASS],
            lock_counts: vec![0; 2 * MAX_REGISTERS_PER_CLASS],
        }
    }

    /// Registers that may be handed out.
    pub fn allocatable(&self) -> RegBitSet {
        self.allocatable
    }

    /// Registers of `class` that are allocatable and unbound.
    pub fn free(&self, class: RegClass) -> impl Iterator<Item = AsmReg> {
        self.allocatable.without(&self.used).iter(class)
    }

    /// Take the lowest numbered free register of a class.
    pub fn allocate(&mut self, class: RegClass) -> Result<AsmReg, RegAllocError> {
        let reg = self
            .allocatable
            .without(&self.used)
            .first(class)
            .ok_or(RegAllocError::NoRegistersAvailable(class))?;
        self.used.set(reg);
        Ok(reg)
    }

    /// Bind a register to an owner. Rebinding moves ownership.
    pub fn bind(&mut self, reg: AsmReg, owner: Option<ValueId>) -> Result<(), RegAllocError> {
        if !self.allocatable.contains(reg) {
            return Err(RegAllocError::NotAllocatable(reg));
        }
        self.used.set(reg);
        self.owners[reg.slot()] = owner;
        Ok(())
    }

    /// Return a register to the free set.
    pub fn free_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::NotBound(reg));
        }
        if self.locked.contains(reg) {
            return Err(RegAllocError::Locked(reg));
        }
        self.used.clear(reg);
        self.owners[reg.slot()] = None;
        Ok(())
    }

    pub fn lock_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::NotBound(reg));
        }
        self.lock_counts[reg.slot()] += 1;
        self.locked.set(reg);
        Ok(())
    }

    pub fn unlock_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        let count = &mut self.lock_counts[reg.slot()];
        if *count == 0 {
            return Err(RegAllocError::LockCountUnderflow(reg));
        }
        *count -= 1;
        if *count == 0 {
            self.locked.clear(reg);
        }
        Ok(())
    }

    pub fn owner(&self, reg: AsmReg) -> Option<ValueId> {
        if self.used.contains(reg) {
            self.owners[reg.slot()]
        } else {
            None
        }
    }

    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    pub fn is_locked(&self, reg: AsmReg) -> bool {
        self.locked.contains(reg)
    }

    /// Bound registers of a class.
    pub fn in_use(&self, class: RegClass) -> u32 {
        self.used.count(class)
    }

    /// Allocatable registers of a class.
    pub fn capacity(&self, class: RegClass) -> u32 {
        self.allocatable.count(class)
    }

    pub fn used(&self) -> RegBitSet {
        self.used
    }
}
