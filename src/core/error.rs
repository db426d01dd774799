// This module defines the error type of the JIT back end using the thiserror crate. Every
// variant describes an internal invariant violation or missing target support: an operator
// shape with no tiling rule, an unimplemented node kind or ABI, a value that must be live but
// is Empty or Dead, register file misuse, or an assembler backend that refused to link or
// encode. Errors propagate with `?` through the tiler, allocator, code generator and finalizer
// so that tests can observe them; the instance-level entry point turns any of them into a
// process abort with a diagnostic through `oops`, because none of them is an expected input.

//! Error types for the JIT back end.

use thiserror::Error;

use super::register_file::{RegAllocError, RegClass};
use super::value::{ValueId, ValueState};

/// Main error type for compilation.
#[derive(Error, Debug)]
pub enum JitError {
    #[error("tiler table has no rule for {op} (states {left}, {right})")]
    NoTileRule {
        op: &'static str,
        left: i32,
        right: i32,
    },

    #[error("{what} NYI")]
    Unimplemented { what: String },

    #[error("required value is not live (node {node}, state {state:?})")]
    ValueNotLive { node: ValueId, state: ValueState },

    #[error("no free {class:?} register and nothing to spill")]
    NoFreeRegister { class: RegClass },

    #[error("invalid value transition on node {node}: {from:?} -> {to:?}")]
    InvalidTransition {
        node: ValueId,
        from: ValueState,
        to: ValueState,
    },

    #[error("register file: {0}")]
    Register(#[from] RegAllocError),

    #[error("could not link code: {reason}")]
    Link { reason: String },

    #[error("could not encode code: {reason}")]
    Encode { reason: String },

    #[error("unknown label {label}")]
    UnknownLabel { label: usize },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

impl JitError {
    pub fn unimplemented(what: impl Into<String>) -> Self {
        JitError::Unimplemented { what: what.into() }
    }
}

/// Result type alias for back end operations.
pub type JitResult<T> = Result<T, JitError>;

/// Abort on an internal invariant violation.
#[cold]
pub fn oops(err: JitError) -> ! {
    log::error!("JIT: {err}");
    panic!("JIT: {err}")
}
