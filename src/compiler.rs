// This module contains the graph compiler: the dispatcher that walks a Graph's nodes in order
// and turns each into emitter requests. Labels, primitives, branches, external calls, guards,
// invokes, jump lists and control nodes are handed to the backend whole; expression tree nodes
// go through the tiler and the code generator. The dispatcher owns the state that must survive
// from one tree to the next: the label offset that keeps tree-local labels apart from graph
// labels and from each other, the spill base computed from the function's locals and call-site
// area, and the largest spill extent any tree needed, which becomes the function's spill size.
// The prologue is emitted before the first node and the epilogue after the last, so the whole
// function is one linear instruction stream that the finalizer links in a single pass.

//! Graph node dispatcher.

use crate::codegen::{compile_tree, TreeContext, TreeSummary};
use crate::core::emitter::{Emitter, LabelId};
use crate::core::error::JitResult;
use crate::core::session::CompilationSession;
use crate::ir::graph::{CallArg, Graph, GraphNode};
use crate::tiler::TilerOptions;
use crate::x64::CallingConvention;

/// Totals over one graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphSummary {
    pub nodes: usize,
    pub trees: usize,
    /// Labels referenced, graph labels included.
    pub labels: usize,
    /// Largest spill extent of any tree, in bytes.
    pub spill_size: u32,
    pub tiles: usize,
    pub conflicts: usize,
    pub spills: u32,
    pub reloads: u32,
}

impl GraphSummary {
    fn add_tree(&mut self, tree: &TreeSummary) {
        self.trees += 1;
        self.tiles += tree.tiles;
        self.conflicts += tree.conflicts;
        self.spills += tree.spills;
        self.reloads += tree.reloads;
        self.spill_size = self.spill_size.max(tree.spill_extent);
    }
}

pub struct JitCompiler<'a, 'arena> {
    emitter: &'a mut dyn Emitter,
    conv: &'static dyn CallingConvention,
    tiler: TilerOptions,
    session: &'a CompilationSession<'arena>,
    label_offset: LabelId,
    spill_base: i32,
    summary: GraphSummary,
}

impl<'a, 'arena> JitCompiler<'a, 'arena> {
    pub fn new(
        emitter: &'a mut dyn Emitter,
        conv: &'static dyn CallingConvention,
        tiler: TilerOptions,
        session: &'a CompilationSession<'arena>,
    ) -> Self {
        Self {
            emitter,
            conv,
            tiler,
            session,
            label_offset: 0,
            spill_base: 0,
            summary: GraphSummary::default(),
        }
    }

    /// Emit the whole function.
    pub fn compile_graph(&mut self, graph: &Graph) -> JitResult<GraphSummary> {
        self.label_offset = graph.num_labels();
        self.spill_base = graph.spill_base();
        self.summary = GraphSummary::default();
        self.emitter.reserve_labels(graph.num_labels());

        self.emitter.emit_prologue()?;
        for node in graph.nodes() {
            self.compile_node(node)?;
            self.summary.nodes += 1;
        }
        self.emitter.emit_epilogue()?;

        self.summary.labels = self.label_offset;
        log::debug!(
            "graph compiled: {} nodes, {} trees, spill size {}",
            self.summary.nodes,
            self.summary.trees,
            self.summary.spill_size
        );
        Ok(self.summary)
    }

    fn compile_node(&mut self, node: &GraphNode) -> JitResult<()> {
        log::trace!("graph node {}", node.kind());
        match node {
            GraphNode::Label(label) => self.emitter.emit_label(*label),
            GraphNode::Primitive(prim) => self.emitter.emit_primitive(prim),
            GraphNode::Branch(branch) => self.emitter.emit_block_branch(branch),
            GraphNode::CallExternal(call) => {
                self.check_args(&call.args)?;
                self.session.record_call();
                self.emitter.emit_call(call)
            }
            GraphNode::Guard(guard) => self.emitter.emit_guard(guard),
            GraphNode::Invoke(invoke) => {
                self.check_args(&invoke.args)?;
                self.session.record_call();
                self.emitter.emit_invoke(invoke)
            }
            GraphNode::Jumplist(jumplist) => self.emitter.emit_jumplist(jumplist),
            GraphNode::Control(control) => self.emitter.emit_control(control),
            GraphNode::ExprTree(tree) => {
                let ctx = TreeContext {
                    conv: self.conv,
                    tiler: &self.tiler,
                    label_offset: self.label_offset,
                    spill_base: self.spill_base,
                };
                let compiled = compile_tree(tree, &ctx, self.session, &mut *self.emitter)?;
                self.label_offset += compiled.tree.num_labels();
                self.summary.add_tree(&compiled.summary);
                Ok(())
            }
        }
    }

    /// Reject argument lists the convention cannot place.
    fn check_args(&self, args: &[CallArg]) -> JitResult<()> {
        let classes: Vec<_> = args.iter().map(CallArg::class).collect();
        self.conv.assign_args(&classes).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use bumpalo::Bump;

    use super::*;
    use crate::core::error::JitError;
    use crate::ir::expr::{ExprOp, ExprTree};
    use crate::ir::graph::{CallNode, CallReturn, ControlNode, Primitive};
    use crate::trace::{Event, RecordingEmitter};
    use crate::x64::SYSV;

    fn compile(graph: &Graph, emitter: &mut RecordingEmitter) -> JitResult<GraphSummary> {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut compiler = JitCompiler::new(emitter, &SYSV, TilerOptions::default(), &session);
        compiler.compile_graph(graph)
    }

    fn looping_tree() -> ExprTree {
        let mut tree = ExprTree::new();
        let top = tree.new_label();
        let label = tree.label(top);
        let local = tree.local();
        let addr = tree.addr(local, 0);
        let value = tree.load(addr, 8);
        let test = tree.unary(ExprOp::Nz, value);
        let branch = tree.cond_branch(test, top);
        tree.add_root(label);
        tree.add_root(branch);
        tree
    }

    #[test]
    fn test_nodes_dispatch_in_order() {
        let mut graph = Graph::new(2, 0);
        let start = graph.new_label();
        graph
            .push(GraphNode::Label(start))
            .push(GraphNode::Primitive(Primitive::IncI { dst: 0 }))
            .push(GraphNode::Control(ControlNode::Exit));

        let mut emitter = RecordingEmitter::new();
        let summary = compile(&graph, &mut emitter).unwrap();
        assert_eq!(
            emitter.events(),
            &[
                Event::Prologue,
                Event::Label(0),
                Event::Primitive(Primitive::IncI { dst: 0 }),
                Event::Control(ControlNode::Exit),
                Event::Epilogue,
            ]
        );
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.labels, 1);
    }

    #[test]
    fn test_tree_labels_never_alias() {
        let mut graph = Graph::new(1, 0);
        let start = graph.new_label();
        graph
            .push(GraphNode::Label(start))
            .push(GraphNode::ExprTree(looping_tree()))
            .push(GraphNode::ExprTree(looping_tree()));

        let mut emitter = RecordingEmitter::new();
        let summary = compile(&graph, &mut emitter).unwrap();
        let labels: Vec<_> = emitter
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Label(l) => Some(*l),
                Event::CondBranch(_, l) => Some(*l),
                _ => None,
            })
            .collect();
        assert_eq!(labels, vec![0, 1, 1, 2, 2]);
        assert_eq!(summary.labels, 3);
        assert_eq!(summary.trees, 2);
    }

    #[test]
    fn test_spill_base_follows_frame() {
        let mut graph = Graph::new(3, 2);
        let mut tree = ExprTree::new();
        let loads: Vec<_> = (0..11)
            .map(|i| {
                let local = tree.local();
                let addr = tree.addr(local, i * 8);
                tree.load(addr, 8)
            })
            .collect();
        let mut sum = loads[10];
        for &load in loads[..10].iter().rev() {
            sum = tree.binary(ExprOp::Add, load, sum);
        }
        tree.add_root(sum);
        graph.push(GraphNode::ExprTree(tree));

        let mut emitter = RecordingEmitter::new();
        let summary = compile(&graph, &mut emitter).unwrap();
        assert_eq!(summary.spills, 1);
        assert_eq!(summary.spill_size, 8);
        assert!(emitter.events().iter().any(|e| matches!(e, Event::Store { offset: 40, .. })));
    }

    #[test]
    fn test_oversized_call_rejected() {
        let mut graph = Graph::new(1, 0);
        graph.push(GraphNode::CallExternal(CallNode {
            func: 0x1000,
            args: vec![CallArg::Literal(1); 40],
            ret: CallReturn::Void,
        }));
        let mut emitter = RecordingEmitter::new();
        assert!(matches!(
            compile(&graph, &mut emitter),
            Err(JitError::Unimplemented { .. })
        ));
    }
}
