//! Front-end facing data structures: the graph node sequence and the
//! expression trees embedded in it.

pub mod expr;
pub mod graph;

pub use expr::{ArgType, ExprNode, ExprOp, ExprTree, NodeId, NodeInfo, OpInfo};
pub use graph::{
    BranchCondition, BranchNode, CallArg, CallNode, CallReturn, ControlNode, DeoptPoint, Graph, GraphNode,
    GuardNode, Handler, InlineRange, InvokeNode, JumplistNode, Primitive, WorkSlot,
};
