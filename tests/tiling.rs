use bumpalo::Bump;
use exprjit::ir::{BranchCondition, BranchNode};
use exprjit::tiler::list::TileList;
use exprjit::trace::Event;
use exprjit::{
    compile_tree, tile_expr_tree, CompilationSession, ExprOp, ExprTree, Graph, GraphNode, JitConfig, JitInstance,
    RecordingEmitter, TilerOptions, TreeContext, SYSV,
};

/// add(load(addr(local, 8)), addr(local, 8)) plus a second shared address.
fn shared_addresses() -> ExprTree {
    let mut tree = ExprTree::new();
    let local = tree.local();
    let a = tree.addr(local, 8);
    let b = tree.addr(local, 16);
    let la = tree.load(a, 8);
    let lb = tree.load(b, 8);
    let x = tree.binary(ExprOp::Add, la, a);
    let y = tree.binary(ExprOp::Add, lb, b);
    let sum = tree.binary(ExprOp::Add, x, y);
    let dst = tree.addr(local, 24);
    let store = tree.store(dst, sum, 8);
    tree.add_root(store);
    tree
}

#[test]
fn tiling_is_deterministic() {
    let mut first = shared_addresses();
    let mut second = shared_addresses();
    tile_expr_tree(&mut first, &TilerOptions::default()).unwrap();
    tile_expr_tree(&mut second, &TilerOptions::default()).unwrap();
    assert_eq!(first.len(), second.len());
    for node in 0..first.len() {
        assert_eq!(first.node(node), second.node(node));
        assert_eq!(first.tile(node), second.tile(node));
    }

    let arena = Bump::new();
    let list_a = TileList::build(&arena, &mut first);
    let list_b = TileList::build(&arena, &mut second);
    let order = |list: &TileList<'_>| list.entries().iter().map(|e| (e.node, e.tile)).collect::<Vec<_>>();
    assert_eq!(order(&list_a), order(&list_b));
}

#[test]
fn machine_code_is_deterministic() {
    let mut graph = Graph::new(4, 0);
    let start = graph.new_label();
    graph.push(GraphNode::Label(start)).push(GraphNode::ExprTree(shared_addresses()));
    let jit = JitInstance::new(JitConfig::default()).unwrap();
    let a = jit.compile(&graph).unwrap();
    let b = jit.compile(&graph).unwrap();
    assert_eq!(a.as_bytes(), b.as_bytes());
    assert_ne!(a.seq_nr, b.seq_nr);
}

#[test]
fn graph_labels_resolve_in_machine_code() {
    let mut graph = Graph::new(1, 0);
    let top = graph.new_label();
    graph.push(GraphNode::Label(top)).push(GraphNode::Branch(BranchNode {
        label: top,
        cond: BranchCondition::Always,
    }));
    let jit = JitInstance::new(JitConfig::default()).unwrap();
    let code = jit.compile(&graph).unwrap();
    let offset = code.label_offset(top).expect("label placed");
    assert!(offset > 0 && offset < code.size());
    assert_eq!(code.unresolved_labels().count(), 0);
}

#[test]
fn duplication_count_matches_growth() {
    let mut tree = shared_addresses();
    let before = tree.len();
    let stats = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
    assert_eq!(stats.conflicts, 2);
    assert_eq!(tree.len(), before + stats.conflicts);

    // every node reachable from the roots carries exactly one tile
    let mut stack: Vec<_> = tree.roots().to_vec();
    while let Some(node) = stack.pop() {
        assert!(tree.tile(node).is_some(), "node {node} untiled");
        stack.extend(tree.node(node).children.iter().copied());
    }
}

#[test]
fn conflict_free_tree_keeps_its_size() {
    let mut tree = ExprTree::new();
    let local = tree.local();
    let addr = tree.addr(local, 0);
    let load = tree.load(addr, 8);
    let one = tree.constant(1, 8);
    let add = tree.binary(ExprOp::Add, load, one);
    tree.add_root(add);
    let before = tree.len();
    let stats = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
    assert_eq!(stats.conflicts, 0);
    assert_eq!(tree.len(), before);
}

fn labelled_tree() -> ExprTree {
    let mut tree = ExprTree::new();
    let first = tree.new_label();
    let second = tree.new_label();
    let l1 = tree.label(first);
    let jump = tree.branch(second);
    let l2 = tree.label(second);
    tree.add_root(l1);
    tree.add_root(jump);
    tree.add_root(l2);
    tree
}

#[test]
fn tree_labels_never_collide() {
    let mut graph = Graph::new(1, 0);
    let g0 = graph.new_label();
    let g1 = graph.new_label();
    graph
        .push(GraphNode::Label(g0))
        .push(GraphNode::ExprTree(labelled_tree()))
        .push(GraphNode::Label(g1))
        .push(GraphNode::ExprTree(labelled_tree()));

    let jit = JitInstance::new(JitConfig::default()).unwrap();
    let mut recorder = RecordingEmitter::new();
    jit.compile_with(&mut recorder, &graph).unwrap();

    let placed: Vec<_> = recorder
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Label(l) => Some(*l),
            _ => None,
        })
        .collect();
    assert_eq!(placed, vec![0, 2, 3, 1, 4, 5]);
    let mut unique = placed.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), placed.len());
    assert_eq!(recorder.reserved_labels(), 6);
}

#[test]
fn tree_compiles_against_recorder() {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let options = TilerOptions::default();
    let ctx = TreeContext {
        conv: &SYSV,
        tiler: &options,
        label_offset: 0,
        spill_base: 32,
    };
    let mut recorder = RecordingEmitter::new();
    let compiled = compile_tree(&shared_addresses(), &ctx, &session, &mut recorder).unwrap();
    assert_eq!(compiled.summary.conflicts, 2);
    assert_eq!(compiled.summary.spills, 0);
    assert_eq!(session.stats().duplications, 2);
    assert!(recorder
        .events()
        .iter()
        .any(|e| matches!(e, Event::MemoryStore { .. })));
}
