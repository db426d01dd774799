// This module defines the expression tree the front end hands to the back end for each
// straight-line region of a compiled function. Nodes live in a growable Vec and refer to each
// other only by index, because tiling may append copies of shared nodes while the traversal is
// still holding indices. Beside the node records the tree keeps two parallel arrays: per-node
// tiling info (assigned tile, automaton state row) and the Value the node's tile produces.
// Before tiling a node may have several parents (the tree is a DAG); after tiling every node
// carries exactly one tile, shared nodes having been duplicated where their users disagree on
// how the node should be covered. The operator table gives arity, argument count and a printable
// name per operator and is what builders use to validate node shapes.

//! Expression trees.

use std::fmt;

use crate::core::emitter::LabelId;
use crate::core::register_file::RegClass;
use crate::core::value::{Value, ValueType};
use crate::tiler::table::{StateRow, TileId, TILES};

/// Index of a node record.
pub type NodeId = usize;

/// Expression operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ExprOp {
    /// Base of the work area.
    Local,
    /// Execution context pointer.
    Tc,
    /// Compilation unit pointer.
    Cu,
    /// args: value, size
    Const,
    /// child: base; args: offset
    Addr,
    /// child: address; args: size
    Load,
    /// child: address
    LoadNum,
    /// children: address, value; args: size
    Store,
    /// children: address, value
    StoreNum,
    Copy,
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    AddNum,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    /// Nonzero test.
    Nz,
    /// Zero test.
    Zr,
    /// args: label
    Label,
    /// args: label
    Branch,
    /// child: flag; args: label
    CondBranch,
    /// children: function, arglist
    Call,
    /// children: function, arglist
    CallNum,
    /// children: function, arglist
    CallVoid,
    /// Variadic list of `Carg` nodes.
    Arglist,
    /// child: value; args: argument type
    Carg,
    Do,
    All,
    Any,
    If,
}

/// Static description of an operator.
#[derive(Debug)]
pub struct OpInfo {
    pub name: &'static str,
    /// Number of children, or -1 for variadic operators.
    pub nchild: i8,
    pub nargs: u8,
}

const fn op(name: &'static str, nchild: i8, nargs: u8) -> OpInfo {
    OpInfo { name, nchild, nargs }
}

static OP_INFO: [OpInfo; 37] = [
    op("local", 0, 0),
    op("tc", 0, 0),
    op("cu", 0, 0),
    op("const", 0, 2),
    op("addr", 1, 1),
    op("load", 1, 1),
    op("load_num", 1, 0),
    op("store", 2, 1),
    op("store_num", 2, 0),
    op("copy", 1, 0),
    op("add", 2, 0),
    op("sub", 2, 0),
    op("mul", 2, 0),
    op("and", 2, 0),
    op("or", 2, 0),
    op("xor", 2, 0),
    op("add_num", 2, 0),
    op("lt", 2, 0),
    op("le", 2, 0),
    op("eq", 2, 0),
    op("ne", 2, 0),
    op("ge", 2, 0),
    op("gt", 2, 0),
    op("nz", 1, 0),
    op("zr", 1, 0),
    op("label", 0, 1),
    op("branch", 0, 1),
    op("cond_branch", 1, 1),
    op("call", 2, 0),
    op("call_num", 2, 0),
    op("callv", 2, 0),
    op("arglist", -1, 0),
    op("carg", 1, 1),
    op("do", -1, 0),
    op("all", -1, 0),
    op("any", -1, 0),
    op("if", 3, 0),
];

impl ExprOp {
    pub fn info(self) -> &'static OpInfo {
        &OP_INFO[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_variadic(self) -> bool {
        self.info().nchild < 0
    }
}

/// Class of a call argument as declared by its `Carg` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Int = 0,
    Num = 1,
}

impl ArgType {
    pub fn from_word(word: i64) -> Self {
        if word == ArgType::Num as i64 {
            ArgType::Num
        } else {
            ArgType::Int
        }
    }

    pub fn class(self) -> RegClass {
        match self {
            ArgType::Int => RegClass::Gpr,
            ArgType::Num => RegClass::Num,
        }
    }
}

/// One node record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprNode {
    pub op: ExprOp,
    pub children: Vec<NodeId>,
    pub args: Vec<i64>,
}

/// Tiling results for one node.
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub tile: Option<TileId>,
    /// Transition table row selected for the node.
    pub row: Option<&'static StateRow>,
}

impl NodeInfo {
    /// Automaton state, -1 before tiling.
    pub fn state(&self) -> i32 {
        self.row.map_or(-1, |row| row.state)
    }
}

/// Index-addressed expression DAG.
#[derive(Debug, Clone, Default)]
pub struct ExprTree {
    nodes: Vec<ExprNode>,
    info: Vec<NodeInfo>,
    values: Vec<Value>,
    roots: Vec<NodeId>,
    num_labels: usize,
}

impl ExprTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. Panics when the shape contradicts the operator table.
    pub fn add_node(&mut self, op: ExprOp, children: &[NodeId], args: &[i64]) -> NodeId {
        let info = op.info();
        assert!(
            info.nchild < 0 || info.nchild as usize == children.len(),
            "{} takes {} children, got {}",
            info.name,
            info.nchild,
            children.len()
        );
        assert_eq!(info.nargs as usize, args.len(), "{} argument count", info.name);
        assert!(children.iter().all(|&c| c < self.nodes.len()), "{} child out of range", info.name);
        self.nodes.push(ExprNode {
            op,
            children: children.to_vec(),
            args: args.to_vec(),
        });
        self.info.push(NodeInfo::default());
        self.values.push(Value::new(ValueType::Void, 8));
        self.nodes.len() - 1
    }

    pub fn add_root(&mut self, node: NodeId) {
        self.roots.push(node);
    }

    /// Reserve a tree-local label number.
    pub fn new_label(&mut self) -> LabelId {
        self.num_labels += 1;
        self.num_labels - 1
    }

    pub fn local(&mut self) -> NodeId {
        self.add_node(ExprOp::Local, &[], &[])
    }

    pub fn tc(&mut self) -> NodeId {
        self.add_node(ExprOp::Tc, &[], &[])
    }

    pub fn cu(&mut self) -> NodeId {
        self.add_node(ExprOp::Cu, &[], &[])
    }

    pub fn constant(&mut self, value: i64, size: u8) -> NodeId {
        self.add_node(ExprOp::Const, &[], &[value, size as i64])
    }

    pub fn addr(&mut self, base: NodeId, offset: i32) -> NodeId {
        self.add_node(ExprOp::Addr, &[base], &[offset as i64])
    }

    pub fn load(&mut self, addr: NodeId, size: u8) -> NodeId {
        self.add_node(ExprOp::Load, &[addr], &[size as i64])
    }

    pub fn load_num(&mut self, addr: NodeId) -> NodeId {
        self.add_node(ExprOp::LoadNum, &[addr], &[])
    }

    pub fn store(&mut self, addr: NodeId, value: NodeId, size: u8) -> NodeId {
        self.add_node(ExprOp::Store, &[addr, value], &[size as i64])
    }

    pub fn store_num(&mut self, addr: NodeId, value: NodeId) -> NodeId {
        self.add_node(ExprOp::StoreNum, &[addr, value], &[])
    }

    /// `op(lhs, rhs)` for arithmetic, comparison and `AddNum`.
    pub fn binary(&mut self, op: ExprOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.add_node(op, &[lhs, rhs], &[])
    }

    pub fn unary(&mut self, op: ExprOp, child: NodeId) -> NodeId {
        self.add_node(op, &[child], &[])
    }

    pub fn label(&mut self, label: LabelId) -> NodeId {
        self.add_node(ExprOp::Label, &[], &[label as i64])
    }

    pub fn branch(&mut self, label: LabelId) -> NodeId {
        self.add_node(ExprOp::Branch, &[], &[label as i64])
    }

    pub fn cond_branch(&mut self, flag: NodeId, label: LabelId) -> NodeId {
        self.add_node(ExprOp::CondBranch, &[flag], &[label as i64])
    }

    /// Build `call(func, arglist(carg...))`. `op` is one of the call operators.
    pub fn call(&mut self, op: ExprOp, func: NodeId, args: &[(NodeId, ArgType)]) -> NodeId {
        let cargs: Vec<NodeId> = args
            .iter()
            .map(|&(value, ty)| self.add_node(ExprOp::Carg, &[value], &[ty as i64]))
            .collect();
        let arglist = self.add_node(ExprOp::Arglist, &cargs, &[]);
        self.add_node(op, &[func, arglist], &[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id]
    }

    pub fn info(&self, id: NodeId) -> &NodeInfo {
        &self.info[id]
    }

    pub fn info_mut(&mut self, id: NodeId) -> &mut NodeInfo {
        &mut self.info[id]
    }

    pub fn tile(&self, id: NodeId) -> Option<TileId> {
        self.info[id].tile
    }

    pub fn value(&self, id: NodeId) -> &Value {
        &self.values[id]
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Byte size of the datum a node produces.
    pub fn value_size(&self, id: NodeId) -> u8 {
        let node = &self.nodes[id];
        match node.op {
            ExprOp::Const => node.args[1] as u8,
            ExprOp::Load => node.args[0] as u8,
            _ => 8,
        }
    }

    /// Append a copy of `id` with its info and value; returns the new index.
    pub(crate) fn duplicate(&mut self, id: NodeId) -> NodeId {
        self.nodes.reserve(1);
        self.info.reserve(1);
        self.values.reserve(1);
        let node = self.nodes[id].clone();
        let info = self.info[id].clone();
        let value = self.values[id].clone();
        self.nodes.push(node);
        self.info.push(info);
        self.values.push(value);
        self.nodes.len() - 1
    }

    pub(crate) fn set_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[parent].children[index] = child;
    }

    pub(crate) fn set_root(&mut self, index: usize, node: NodeId) {
        self.roots[index] = node;
    }
}

impl fmt::Display for ExprTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes.iter().enumerate() {
            write!(f, "{id:4}: {}", node.op.name())?;
            if !node.children.is_empty() {
                write!(f, " {:?}", node.children)?;
            }
            if !node.args.is_empty() {
                write!(f, " args={:?}", node.args)?;
            }
            if let Some(tile) = self.info[id].tile {
                write!(f, " tile={} state={}", TILES[tile].name, self.info[id].state())?;
            }
            writeln!(f)?;
        }
        writeln!(f, "roots: {:?}", self.roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_table_is_aligned() {
        assert_eq!(ExprOp::If.name(), "if");
        assert_eq!(ExprOp::Carg.info().nargs, 1);
        assert!(ExprOp::Arglist.is_variadic());
        assert_eq!(ExprOp::CallVoid.name(), "callv");
    }

    #[test]
    fn test_builders() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 16);
        let load = tree.load(addr, 4);
        let func = tree.constant(0x1000, 8);
        let call = tree.call(ExprOp::Call, func, &[(load, ArgType::Int)]);
        tree.add_root(call);
        assert_eq!(tree.node(call).children.len(), 2);
        let arglist = tree.node(call).children[1];
        assert_eq!(tree.node(arglist).op, ExprOp::Arglist);
        assert_eq!(tree.value_size(load), 4);
        assert_eq!(tree.roots(), &[call]);
    }

    #[test]
    fn test_duplicate_keeps_indices() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 8);
        let copy = tree.duplicate(addr);
        assert_eq!(copy, 2);
        assert_eq!(tree.node(copy), tree.node(addr));
        assert_eq!(tree.node(copy).children, vec![local]);
    }

    #[test]
    #[should_panic(expected = "add takes 2 children")]
    fn test_arity_checked() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        tree.add_node(ExprOp::Add, &[local], &[]);
    }

    #[test]
    fn test_labels_are_tree_local() {
        let mut tree = ExprTree::new();
        assert_eq!(tree.new_label(), 0);
        assert_eq!(tree.new_label(), 1);
        assert_eq!(tree.num_labels(), 2);
    }
}
