//! exprjit - native code back end for a bytecode VM JIT.
//!
//! The front end hands over a [`Graph`]: a linear sequence of nodes, some of
//! which embed expression trees. Graph nodes are lowered directly by the
//! backend emitter; expression trees are tiled bottom-up, register allocated
//! on the fly and emitted tile by tile. The finished function is linked,
//! placed in executable memory and returned as a [`CodeObject`].
//!
//! # Primary Usage
//!
//! ```ignore
//! use exprjit::{ExprOp, ExprTree, Graph, GraphNode, JitConfig, JitInstance};
//!
//! let jit = JitInstance::new(JitConfig::default())?;
//!
//! let mut graph = Graph::new(2, 0);
//! let start = graph.new_label();
//! let mut tree = ExprTree::new();
//! // work[1] = work[0] + 1
//! let local = tree.local();
//! let src = tree.addr(local, 0);
//! let value = tree.load(src, 8);
//! let one = tree.constant(1, 8);
//! let sum = tree.binary(ExprOp::Add, value, one);
//! let dst = tree.addr(local, 8);
//! let store = tree.store(dst, sum, 8);
//! tree.add_root(store);
//! graph.push(GraphNode::Label(start)).push(GraphNode::ExprTree(tree));
//!
//! let code = jit.compile(&graph)?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - graph nodes, expression trees and side tables
//! - [`tiler`] - transition table, tiling with node duplication, tile lists
//! - [`codegen`] - expression tree replay with register allocation and calls
//! - [`compiler`] - graph node dispatcher
//! - [`core`] - register file, allocator, values, emitter trait, errors
//! - [`x64`] - System V calling convention and the iced-x86 emitter
//! - [`runtime`] - executable pages, code objects, the JIT instance
//! - [`trace`] - event-recording emitter for inspecting compilations
//! - [`dump`] - ELF dumps of compiled code

pub mod codegen;
pub mod compiler;
pub mod core;
pub mod dump;
pub mod ir;
pub mod runtime;
pub mod tiler;
pub mod trace;
pub mod x64;

pub use crate::core::{
    AsmReg, CompilationSession, Emitter, JitConfig, JitError, JitResult, LabelId, RegClass, TargetAbi, Value,
    ValueState, ValueType,
};
pub use codegen::{compile_tree, CompiledTree, TreeContext, TreeSummary};
pub use compiler::{GraphSummary, JitCompiler};
pub use ir::{CallArg, CallNode, CallReturn, ExprOp, ExprTree, Graph, GraphNode, NodeId, Primitive};
pub use runtime::{CodeObject, CompUnit, ExecutionContext, JitInstance};
pub use tiler::{tile_expr_tree, TilerOptions, TilerStats};
pub use trace::{Event, RecordingEmitter};
pub use x64::{CallingConvention, X64Emitter, SYSV};
