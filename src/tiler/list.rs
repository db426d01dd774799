//! Linear emission schedule for a tiled tree.
//!
//! The list holds one entry per tiled node in post order, so every value is
//! defined before its first consumer. Entries and their input slices live in
//! the compilation arena.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;

use crate::core::value::{Value, ValueType};
use crate::ir::expr::{ExprOp, ExprTree, NodeId};

use super::table::{Tile, TileId, TILES};

/// One scheduled tile.
#[derive(Debug, Clone, Copy)]
pub struct TileEntry<'a> {
    pub node: NodeId,
    pub tile: TileId,
    /// Position in the schedule, starting at 1.
    pub order_nr: u32,
    /// Node whose value the tile defines.
    pub output: Option<NodeId>,
    /// Values consumed, in path order. Call tiles list the target first and
    /// then each argument.
    pub inputs: &'a [NodeId],
}

impl TileEntry<'_> {
    pub fn tile(&self) -> &'static Tile {
        &TILES[self.tile]
    }
}

/// Values consumed by `tile` when it covers `node`.
pub fn tile_values(tree: &ExprTree, node: NodeId, tile: &Tile) -> Vec<NodeId> {
    let path = tile.path;
    let mut values = Vec::with_capacity(tile.num_values());
    let mut i = 0;
    while path[i] != 0 {
        let mut cur = node;
        while path[i] != 0 {
            cur = tree.node(cur).children[path[i] as usize - 1];
            i += 1;
        }
        values.push(cur);
        i += 1;
    }
    values
}

/// Values passed to a call tile's target: the child of each `Carg`.
pub fn call_arguments(tree: &ExprTree, call: NodeId) -> Vec<NodeId> {
    let arglist = tree.node(call).children[1];
    tree.node(arglist)
        .children
        .iter()
        .map(|&carg| tree.node(carg).children[0])
        .collect()
}

pub struct TileList<'a> {
    entries: BumpVec<'a, TileEntry<'a>>,
}

impl<'a> TileList<'a> {
    /// Schedule every tiled node reachable from the roots and give each
    /// node a fresh value of its tile's result type.
    pub fn build(arena: &'a Bump, tree: &mut ExprTree) -> Self {
        let mut list = TileList {
            entries: BumpVec::new_in(arena),
        };
        let mut visited = vec![false; tree.len()];
        for root in tree.roots().to_vec() {
            list.schedule(arena, tree, root, &mut visited);
        }
        list
    }

    fn schedule(&mut self, arena: &'a Bump, tree: &mut ExprTree, node: NodeId, visited: &mut [bool]) {
        if visited[node] {
            return;
        }
        visited[node] = true;
        for child in tree.node(node).children.clone() {
            self.schedule(arena, tree, child, visited);
        }
        let Some(tile_id) = tree.tile(node) else {
            return;
        };
        let tile = &TILES[tile_id];

        let mut inputs = tile_values(tree, node, tile);
        if matches!(tree.node(node).op, ExprOp::Call | ExprOp::CallNum | ExprOp::CallVoid) {
            inputs.extend(call_arguments(tree, node));
        }
        let size = tree.value_size(node);
        tree.values_mut()[node] = Value::new(tile.result, size);

        self.entries.push(TileEntry {
            node,
            tile: tile_id,
            order_nr: self.entries.len() as u32 + 1,
            output: (tile.result != ValueType::Void).then_some(node),
            inputs: arena.alloc_slice_copy(&inputs),
        });
    }

    pub fn entries(&self) -> &[TileEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::table::*;
    use super::super::{tile_expr_tree, TilerOptions};
    use super::*;
    use crate::ir::expr::ArgType;

    #[test]
    fn test_schedule_is_post_order() {
        let arena = Bump::new();
        let mut tree = ExprTree::new();
        let local = tree.local();
        let a = tree.addr(local, 0);
        let la = tree.load(a, 8);
        let b = tree.addr(local, 8);
        let lb = tree.load(b, 8);
        let add = tree.binary(ExprOp::Add, la, lb);
        tree.add_root(add);
        tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();

        let list = TileList::build(&arena, &mut tree);
        let tiles: Vec<_> = list.entries().iter().map(|e| e.tile().name).collect();
        assert_eq!(
            tiles,
            vec!["base_sym", "addr_base_sym", "load_base", "addr_base_sym", "load_base", "binary"]
        );
        let last = list.entries().last().unwrap();
        assert_eq!(last.order_nr, 6);
        assert_eq!(last.inputs, &[la, lb]);
        assert_eq!(last.output, Some(add));
        assert_eq!(tree.value(la).ty, ValueType::Reg);
        assert_eq!(tree.value(a).ty, ValueType::Void);
    }

    #[test]
    fn test_paths_reach_through_pseudo_tiles() {
        let mut tree = ExprTree::new();
        let local = tree.local();
        let tc = tree.tc();
        let load = tree.load(tc, 8);
        let addr = tree.addr(load, 24);
        let cu = tree.cu();
        let store = tree.store(addr, cu, 8);
        tree.add_root(store);
        tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();

        assert_eq!(tree.tile(store), Some(T_STORE_ADDR));
        assert_eq!(tile_values(&tree, store, &TILES[T_STORE_ADDR]), vec![load, cu]);
        assert!(tile_values(&tree, local, &TILES[T_BASE]).is_empty());
    }

    #[test]
    fn test_call_inputs_include_arguments() {
        let arena = Bump::new();
        let mut tree = ExprTree::new();
        let func = tree.constant(0x1000, 8);
        let tc = tree.tc();
        let cu = tree.cu();
        let call = tree.call(ExprOp::Call, func, &[(tc, ArgType::Int), (cu, ArgType::Int)]);
        tree.add_root(call);
        tile_expr_tree(&mut tree, &TilerOptions::default()).unwrap();

        let list = TileList::build(&arena, &mut tree);
        let entry = list.entries().iter().find(|e| e.node == call).unwrap();
        assert_eq!(entry.inputs, &[func, tc, cu]);
        assert_eq!(entry.tile().emit, Some(Emit::Call));
    }
}
