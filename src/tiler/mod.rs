// This module implements instruction selection for expression trees by bottom-up rewriting:
// a single post-order traversal computes each node's automaton state from its operator and its
// children's states, and the matching transition row dictates which tile every child must be
// covered with. Because the tree is really a DAG, a shared child may be demanded with two
// different tiles by two parents (an address folded into a load by one user and materialised
// into a register by another). Instead of failing, the conflicting user gets its own copy of the
// child node, appended to the node array, and only that user's edge is redirected. After the
// walk every reachable node carries exactly one tile and the node count has grown by the number
// of conflicts. The tile list built afterwards in `list` is the linear emission schedule that
// the code generator replays.

//! Bottom-up tiling of expression trees.

pub mod list;
pub mod table;

pub use list::{tile_values, TileEntry, TileList};
pub use table::{lookup, Emit, StateRow, Tile, TileId, TILES};

use crate::core::error::{JitError, JitResult};
use crate::ir::expr::{ExprOp, ExprTree, NodeId};

use table::{ST_CARG, ST_NONE, T_CARG};

/// Tiler behaviour switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TilerOptions {
    /// Use the left child's state in place of the right child's when looking
    /// up binary operators. Only kept to reproduce legacy selections.
    pub mirror_left_state: bool,
}

/// Results of one tiling run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TilerStats {
    /// Nodes that received a tile.
    pub tiled: usize,
    /// Nodes appended to resolve conflicting tile demands.
    pub conflicts: usize,
}

/// The edge through which a tile is demanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Child { parent: NodeId, index: usize },
    Root(usize),
}

struct Tiler<'t> {
    tree: &'t mut ExprTree,
    options: &'t TilerOptions,
    visited: Vec<bool>,
    stats: TilerStats,
}

impl Tiler<'_> {
    fn visit(&mut self, node: NodeId) -> JitResult<()> {
        if self.visited.get(node).copied().unwrap_or(false) {
            return Ok(());
        }
        if node >= self.visited.len() {
            self.visited.resize(node + 1, false);
        }
        self.visited[node] = true;

        let op = self.tree.node(node).op;
        if matches!(op, ExprOp::Do | ExprOp::All | ExprOp::Any | ExprOp::If) {
            return Err(JitError::unimplemented(format!("tiling {}", op.name())));
        }
        let children = self.tree.node(node).children.clone();
        for &child in &children {
            self.visit(child)?;
        }

        if op == ExprOp::Arglist {
            return self.visit_arglist(node, &children);
        }
        if children.len() > 2 {
            return Err(JitError::unimplemented(format!(
                "tiling {} with {} children",
                op.name(),
                children.len()
            )));
        }

        let left = children.first().map_or(ST_NONE, |&c| self.tree.info(c).state());
        let mut right = children.get(1).map_or(ST_NONE, |&c| self.tree.info(c).state());
        if self.options.mirror_left_state && children.len() == 2 {
            right = left;
        }
        let row = lookup(op, left, right).ok_or(JitError::NoTileRule {
            op: op.name(),
            left,
            right,
        })?;
        self.tree.info_mut(node).row = Some(row);
        log::trace!("node {node} {} ({left}, {right}) -> state {}", op.name(), row.state);

        for (index, &child) in children.iter().enumerate() {
            if let Some(tile) = row.children[index] {
                self.assign_tile(Edge::Child { parent: node, index }, child, tile);
            }
        }
        Ok(())
    }

    fn visit_arglist(&mut self, node: NodeId, children: &[NodeId]) -> JitResult<()> {
        let row = lookup(ExprOp::Arglist, ST_NONE, ST_NONE).ok_or(JitError::NoTileRule {
            op: ExprOp::Arglist.name(),
            left: ST_NONE,
            right: ST_NONE,
        })?;
        self.tree.info_mut(node).row = Some(row);
        for (index, &child) in children.iter().enumerate() {
            let state = self.tree.info(child).state();
            if state != ST_CARG {
                return Err(JitError::NoTileRule {
                    op: ExprOp::Arglist.name(),
                    left: state,
                    right: ST_NONE,
                });
            }
            self.assign_tile(Edge::Child { parent: node, index }, child, T_CARG);
        }
        Ok(())
    }

    fn assign_tile(&mut self, edge: Edge, node: NodeId, tile: TileId) {
        match self.tree.tile(node) {
            None => {
                self.tree.info_mut(node).tile = Some(tile);
                self.stats.tiled += 1;
            }
            Some(existing) if existing == tile => {}
            Some(existing) => {
                let copy = self.tree.duplicate(node);
                self.tree.info_mut(copy).tile = Some(tile);
                match edge {
                    Edge::Child { parent, index } => self.tree.set_child(parent, index, copy),
                    Edge::Root(index) => self.tree.set_root(index, copy),
                }
                self.stats.tiled += 1;
                self.stats.conflicts += 1;
                log::trace!(
                    "node {node} wanted as {} and {}, copied to {copy}",
                    TILES[existing].name,
                    TILES[tile].name
                );
            }
        }
    }
}

/// Assign a tile to every node reachable from the roots.
pub fn tile_expr_tree(tree: &mut ExprTree, options: &TilerOptions) -> JitResult<TilerStats> {
    let roots = tree.roots().to_vec();
    let mut tiler = Tiler {
        visited: vec![false; tree.len()],
        tree,
        options,
        stats: TilerStats::default(),
    };
    for (index, &root) in roots.iter().enumerate() {
        tiler.visit(root)?;
        if tiler.tree.tile(root).is_none() {
            let row = tiler.tree.info(root).row.ok_or(JitError::NoTileRule {
                op: tiler.tree.node(root).op.name(),
                left: ST_NONE,
                right: ST_NONE,
            })?;
            tiler.assign_tile(Edge::Root(index), root, row.default_tile);
        }
    }
    log::debug!(
        "tiled {} nodes with {} duplications",
        tiler.stats.tiled,
        tiler.stats.conflicts
    );
    Ok(tiler.stats)
}

#[cfg(test)]
mod tests {
    use super::table::*;
    use super::*;
    use crate::ir::expr::ArgType;

    #[test]
    fn test_load_folds_base_address() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 16);
        let load = tree.load(addr, 8);
        tree.add_root(load);

        let stats = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
        assert_eq!(stats.conflicts, 0);
        assert_eq!(tree.tile(load), Some(T_LOAD_BASE));
        assert_eq!(tree.tile(addr), Some(T_ADDR_BASE_SYM));
        assert_eq!(tree.tile(local), Some(T_BASE_SYM));
    }

    #[test]
    fn test_shared_address_is_duplicated() {
        // add(load(addr(local, 8)), addr(local, 8)): the load folds the
        // address, the add needs it in a register
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 8);
        let load = tree.load(addr, 8);
        let add = tree.binary(ExprOp::Add, load, addr);
        tree.add_root(add);
        let before = tree.len();

        let stats = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
        assert_eq!(stats.conflicts, 1);
        assert_eq!(tree.len(), before + stats.conflicts);

        let copy = tree.node(add).children[1];
        assert_ne!(copy, addr);
        assert_eq!(tree.node(copy), tree.node(addr));
        assert_eq!(tree.tile(addr), Some(T_ADDR_BASE_SYM));
        assert_eq!(tree.tile(copy), Some(T_ADDR_BASE));
        assert_eq!(tree.node(load).children, vec![addr]);
    }

    #[test]
    fn test_constant_operand_becomes_immediate() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 0);
        let load = tree.load(addr, 8);
        let one = tree.constant(1, 8);
        let add = tree.binary(ExprOp::Add, load, one);
        let dst = tree.addr(local, 8);
        let store = tree.store(dst, add, 8);
        tree.add_root(store);

        tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
        assert_eq!(tree.tile(add), Some(T_BINARY_CONST));
        assert_eq!(tree.tile(one), Some(T_CONST_SYM));
        assert_eq!(tree.tile(store), Some(T_STORE_BASE));
    }

    #[test]
    fn test_call_arguments_are_cargs() {
        let mut tree = ExprTree::new();
        let tc = tree.tc();
        let func = tree.constant(0x1000, 8);
        let call = tree.call(ExprOp::CallVoid, func, &[(tc, ArgType::Int)]);
        tree.add_root(call);

        tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();
        let arglist = tree.node(call).children[1];
        let carg = tree.node(arglist).children[0];
        assert_eq!(tree.tile(call), Some(T_CALL_VOID));
        assert_eq!(tree.tile(arglist), Some(T_ARGLIST));
        assert_eq!(tree.tile(carg), Some(T_CARG));
        assert_eq!(tree.tile(tc), Some(T_BASE));
        assert_eq!(tree.tile(func), Some(T_CONST));
    }

    #[test]
    fn test_mirrored_lookup_rejects_calls() {
        let mut tree = ExprTree::new();
        let func = tree.constant(0x1000, 8);
        let call = tree.call(ExprOp::Call, func, &[]);
        tree.add_root(call);
        let options = TilerOptions {
            mirror_left_state: true,
        };
        let err = tile_expr_tree(&mut tree, &options).unwrap_err();
        assert!(matches!(
            err,
            JitError::NoTileRule {
                op: "call",
                left: ST_CONST,
                right: ST_CONST
            }
        ));
    }

    #[test]
    fn test_variadic_control_is_unimplemented() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let all = tree.add_node(ExprOp::All, &[local, local], &[]);
        tree.add_root(all);
        let err = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap_err();
        assert!(matches!(err, JitError::Unimplemented { .. }));
    }

    #[test]
    fn test_missing_rule() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let addr = tree.addr(local, 0);
        let num = tree.load_num(addr);
        let add = tree.binary(ExprOp::Add, num, num);
        tree.add_root(add);
        let err = tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap_err();
        assert!(matches!(err, JitError::NoTileRule { op: "add", .. }));
    }
}
