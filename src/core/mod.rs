// This module groups the target independent building blocks of the back end that every other
// layer leans on. The register file tracks which physical registers are free, owned or locked;
// the allocator builds on it to bind values to registers, spill them to work-area slots and
// bring them back; values carry their storage state and live range. The Emitter trait is the
// seam to the instruction encoders, the session holds the per-compilation arena and counters,
// and config and error are the ambient configuration and error types shared crate-wide.

//! Core back end infrastructure.

pub mod allocator;
pub mod config;
pub mod emitter;
pub mod error;
pub mod register_file;
pub mod session;
pub mod value;

pub use allocator::{AllocStats, RegisterAllocator, SpillLayout, SPILL_SLOT_SIZE};
pub use config::{JitConfig, TargetAbi};
pub use emitter::{Address, AddressBase, Base, BinaryOp, Condition, Emitter, LabelId};
pub use error::{oops, JitError, JitResult};
pub use register_file::{AsmReg, RegAllocError, RegBitSet, RegClass, RegisterFile};
pub use session::{CompilationSession, SessionStats};
pub use value::{Value, ValueId, ValueState, ValueType};
