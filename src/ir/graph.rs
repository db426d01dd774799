// This module defines the JIT graph: the ordered node sequence the front end builds for one
// compiled function. Most node kinds are lowered directly by the backend emitter (labels,
// primitive operations on work slots, branches, external calls, guards, invokes, jump lists and
// control nodes); ExprTree nodes embed an expression tree that goes through tiling, register
// allocation and tile emission. The graph also owns the function's side tables (deoptimization
// points, exception handler ranges and inlined-call ranges), which only reference logical label
// numbers so that the finalizer can copy them into the code object without any fixup. Work
// slots are 8-byte cells addressed from the work base; the spill area begins after the locals
// and the outgoing call-argument area.

//! Graph nodes and side tables.

use crate::core::allocator::SPILL_SLOT_SIZE;
use crate::core::emitter::LabelId;
use crate::core::register_file::RegClass;

use super::expr::ExprTree;

/// Index of an 8-byte work slot.
pub type WorkSlot = u16;

/// Byte offset of a work slot from the work base.
pub fn slot_offset(slot: WorkSlot) -> i32 {
    slot as i32 * 8
}

/// Operation on work slots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Noop,
    ConstI64 { dst: WorkSlot, value: i64 },
    ConstN64 { dst: WorkSlot, value: f64 },
    Set { dst: WorkSlot, src: WorkSlot },
    AddI { dst: WorkSlot, a: WorkSlot, b: WorkSlot },
    SubI { dst: WorkSlot, a: WorkSlot, b: WorkSlot },
    MulI { dst: WorkSlot, a: WorkSlot, b: WorkSlot },
    IncI { dst: WorkSlot },
    DecI { dst: WorkSlot },
    AddN { dst: WorkSlot, a: WorkSlot, b: WorkSlot },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCondition {
    Always,
    IfZero(WorkSlot),
    IfNonZero(WorkSlot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchNode {
    pub label: LabelId,
    pub cond: BranchCondition,
}

/// Argument source for graph-level calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallArg {
    Tc,
    Cu,
    Work(WorkSlot),
    /// Address of a work slot.
    WorkAddr(WorkSlot),
    Literal(i64),
    WorkNum(WorkSlot),
}

impl CallArg {
    pub fn class(&self) -> RegClass {
        match self {
            CallArg::WorkNum(_) => RegClass::Num,
            _ => RegClass::Gpr,
        }
    }
}

/// Where a call result is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallReturn {
    Void,
    Work(WorkSlot),
    WorkNum(WorkSlot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallNode {
    /// Address of an `extern "C"` function.
    pub func: usize,
    pub args: Vec<CallArg>,
    pub ret: CallReturn,
}

/// Deoptimize unless a work slot holds the expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardNode {
    pub local: WorkSlot,
    pub expected: i64,
    /// Index into the graph's deopt table.
    pub deopt: usize,
}

/// Call into VM code, resuming at `return_label` when re-entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeNode {
    pub func: usize,
    pub args: Vec<CallArg>,
    pub return_label: LabelId,
}

/// Jump to `labels[work[selector]]`; out of range falls through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumplistNode {
    pub selector: WorkSlot,
    pub labels: Vec<LabelId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlNode {
    Breakpoint,
    /// Record a label as the resume point.
    DynamicLabel(LabelId),
    /// Leave compiled code when the context requests it.
    ExitCheck,
    Exit,
}

#[derive(Debug, Clone)]
pub enum GraphNode {
    Label(LabelId),
    Primitive(Primitive),
    Branch(BranchNode),
    CallExternal(CallNode),
    Guard(GuardNode),
    Invoke(InvokeNode),
    Jumplist(JumplistNode),
    Control(ControlNode),
    ExprTree(ExprTree),
}

impl GraphNode {
    pub fn kind(&self) -> &'static str {
        match self {
            GraphNode::Label(_) => "label",
            GraphNode::Primitive(_) => "primitive",
            GraphNode::Branch(_) => "branch",
            GraphNode::CallExternal(_) => "call",
            GraphNode::Guard(_) => "guard",
            GraphNode::Invoke(_) => "invoke",
            GraphNode::Jumplist(_) => "jumplist",
            GraphNode::Control(_) => "control",
            GraphNode::ExprTree(_) => "expr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeoptPoint {
    pub label: LabelId,
    pub bytecode_offset: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start_label: LabelId,
    pub end_label: LabelId,
    pub goto_label: LabelId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InlineRange {
    pub start_label: LabelId,
    pub end_label: LabelId,
    pub code_ref: u32,
}

/// One function to compile.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<GraphNode>,
    num_labels: usize,
    pub num_locals: usize,
    pub max_callsite_args: usize,
    pub deopts: Vec<DeoptPoint>,
    pub handlers: Vec<Handler>,
    pub inlines: Vec<InlineRange>,
}

impl Graph {
    pub fn new(num_locals: usize, max_callsite_args: usize) -> Self {
        Self {
            num_locals,
            max_callsite_args,
            ..Default::default()
        }
    }

    pub fn new_label(&mut self) -> LabelId {
        self.num_labels += 1;
        self.num_labels - 1
    }

    pub fn push(&mut self, node: GraphNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_deopt(&mut self, label: LabelId, bytecode_offset: u32) -> usize {
        self.deopts.push(DeoptPoint { label, bytecode_offset });
        self.deopts.len() - 1
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Work-area offset of the first spill slot.
    pub fn spill_base(&self) -> i32 {
        ((self.num_locals + self.max_callsite_args) as i32) * SPILL_SLOT_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spill_base_follows_locals_and_callsite() {
        let graph = Graph::new(5, 3);
        assert_eq!(graph.spill_base(), 64);
        assert_eq!(slot_offset(3), 24);
    }

    #[test]
    fn test_builder_keeps_order() {
        let mut graph = Graph::new(1, 0);
        let label = graph.new_label();
        graph
            .push(GraphNode::Label(label))
            .push(GraphNode::Control(ControlNode::Exit));
        let deopt = graph.add_deopt(label, 12);
        assert_eq!(deopt, 0);
        let kinds: Vec<_> = graph.nodes().iter().map(GraphNode::kind).collect();
        assert_eq!(kinds, vec!["label", "control"]);
        assert_eq!(graph.num_labels(), 1);
    }
}
