// This module holds the tile catalog and the tiling automaton's transition table. Each Tile
// names one code shape: the emission routine that produces it, the value path describing which
// descendants' values it consumes, the node (self or a child) carrying the rule's argument
// words, and the type of value it produces. Pseudo tiles have no emission routine; they mark
// nodes whose work is absorbed into an ancestor's tile, like the constant folded into an
// add-immediate or the address folded into a load. The transition table maps (operator, left
// child state, right child state) to a StateRow giving the node's new state, its default tile and
// the tile each child must carry under that rule. Rows are generated once from a compact rule
// description and then shared read-only by every compilation.

//! Tile catalog and state transition table.

use std::sync::OnceLock;

use hashbrown::HashMap;

use crate::core::value::ValueType;
use crate::ir::expr::ExprOp;

/// Index into `TILES`.
pub type TileId = usize;

/// Emission routine selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Emit {
    Base,
    Const,
    AddrBase,
    Addr,
    LoadBase,
    LoadAddr,
    Load,
    LoadNumBase,
    LoadNumAddr,
    StoreBase,
    StoreAddr,
    Store,
    StoreNumBase,
    StoreNumAddr,
    Copy,
    Binary,
    BinaryConst,
    AddNum,
    CompareToReg,
    TestToReg,
    CondBranchCompare,
    CondBranchTest,
    Label,
    Branch,
    Call,
}

/// A selection rule instance.
#[derive(Debug)]
pub struct Tile {
    pub name: &'static str,
    /// `None` marks a pseudo tile.
    pub emit: Option<Emit>,
    /// Value path: 1-based child steps, each value ended by 0, the path by
    /// an extra 0.
    pub path: &'static [u8],
    /// Child step to the node holding the rule's argument words, 0 for self.
    pub args: &'static [u8],
    pub result: ValueType,
}

impl Tile {
    /// Number of values the tile consumes through its path.
    pub fn num_values(&self) -> usize {
        let mut count = 0;
        let mut i = 0;
        while self.path[i] != 0 {
            while self.path[i] != 0 {
                i += 1;
            }
            count += 1;
            i += 1;
        }
        count
    }

    pub fn is_pseudo(&self) -> bool {
        self.emit.is_none()
    }
}

const fn tile(name: &'static str, emit: Emit, path: &'static [u8], args: &'static [u8], result: ValueType) -> Tile {
    Tile {
        name,
        emit: Some(emit),
        path,
        args,
        result,
    }
}

const fn pseudo(name: &'static str) -> Tile {
    Tile {
        name,
        emit: None,
        path: &[0],
        args: &[],
        result: ValueType::Void,
    }
}

pub const T_BASE: TileId = 0;
pub const T_BASE_SYM: TileId = 1;
pub const T_CONST: TileId = 2;
pub const T_CONST_SYM: TileId = 3;
pub const T_ADDR_BASE: TileId = 4;
pub const T_ADDR_BASE_SYM: TileId = 5;
pub const T_ADDR: TileId = 6;
pub const T_ADDR_SYM: TileId = 7;
pub const T_LOAD_BASE: TileId = 8;
pub const T_LOAD_ADDR: TileId = 9;
pub const T_LOAD: TileId = 10;
pub const T_LOADNUM_BASE: TileId = 11;
pub const T_LOADNUM_ADDR: TileId = 12;
pub const T_STORE_BASE: TileId = 13;
pub const T_STORE_ADDR: TileId = 14;
pub const T_STORE: TileId = 15;
pub const T_STORENUM_BASE: TileId = 16;
pub const T_STORENUM_ADDR: TileId = 17;
pub const T_COPY: TileId = 18;
pub const T_BINARY: TileId = 19;
pub const T_BINARY_CONST: TileId = 20;
pub const T_ADDNUM: TileId = 21;
pub const T_COMPARE: TileId = 22;
pub const T_COMPARE_SYM: TileId = 23;
pub const T_TEST: TileId = 24;
pub const T_TEST_SYM: TileId = 25;
pub const T_CBRANCH_COMPARE: TileId = 26;
pub const T_CBRANCH_TEST: TileId = 27;
pub const T_LABEL: TileId = 28;
pub const T_BRANCH: TileId = 29;
pub const T_CARG: TileId = 30;
pub const T_ARGLIST: TileId = 31;
pub const T_CALL: TileId = 32;
pub const T_CALL_NUM: TileId = 33;
pub const T_CALL_VOID: TileId = 34;

use ValueType::{Num, Reg, Void};

pub static TILES: [Tile; 35] = [
    tile("base", Emit::Base, &[0], &[0], Reg),
    pseudo("base_sym"),
    tile("const", Emit::Const, &[0], &[0], Reg),
    pseudo("const_sym"),
    tile("addr_base", Emit::AddrBase, &[0], &[0], Reg),
    pseudo("addr_base_sym"),
    tile("addr", Emit::Addr, &[1, 0, 0], &[0], Reg),
    pseudo("addr_sym"),
    tile("load_base", Emit::LoadBase, &[0], &[1], Reg),
    tile("load_addr", Emit::LoadAddr, &[1, 1, 0, 0], &[1], Reg),
    tile("load", Emit::Load, &[1, 0, 0], &[0], Reg),
    tile("load_num_base", Emit::LoadNumBase, &[0], &[1], Num),
    tile("load_num_addr", Emit::LoadNumAddr, &[1, 1, 0, 0], &[1], Num),
    tile("store_base", Emit::StoreBase, &[2, 0, 0], &[1], Void),
    tile("store_addr", Emit::StoreAddr, &[1, 1, 0, 2, 0, 0], &[1], Void),
    tile("store", Emit::Store, &[1, 0, 2, 0, 0], &[0], Void),
    tile("store_num_base", Emit::StoreNumBase, &[2, 0, 0], &[1], Void),
    tile("store_num_addr", Emit::StoreNumAddr, &[1, 1, 0, 2, 0, 0], &[1], Void),
    tile("copy", Emit::Copy, &[1, 0, 0], &[], Reg),
    tile("binary", Emit::Binary, &[1, 0, 2, 0, 0], &[], Reg),
    tile("binary_const", Emit::BinaryConst, &[1, 0, 0], &[2], Reg),
    tile("add_num", Emit::AddNum, &[1, 0, 2, 0, 0], &[], Num),
    tile("compare", Emit::CompareToReg, &[1, 0, 2, 0, 0], &[], Reg),
    pseudo("compare_sym"),
    tile("test", Emit::TestToReg, &[1, 0, 0], &[], Reg),
    pseudo("test_sym"),
    tile("cbranch_compare", Emit::CondBranchCompare, &[1, 1, 0, 1, 2, 0, 0], &[1], Void),
    tile("cbranch_test", Emit::CondBranchTest, &[1, 1, 0, 0], &[1], Void),
    tile("label", Emit::Label, &[0], &[0], Void),
    tile("branch", Emit::Branch, &[0], &[0], Void),
    pseudo("carg"),
    pseudo("arglist"),
    tile("call", Emit::Call, &[1, 0, 0], &[], Reg),
    tile("call_num", Emit::Call, &[1, 0, 0], &[], Num),
    tile("callv", Emit::Call, &[1, 0, 0], &[], Void),
];

/// Automaton states. -1 stands for an absent child.
pub const ST_NONE: i32 = -1;
pub const ST_BASE: i32 = 1;
pub const ST_CONST: i32 = 2;
pub const ST_ADDR_BASE: i32 = 3;
pub const ST_ADDR: i32 = 4;
pub const ST_LOAD_BASE: i32 = 5;
pub const ST_LOAD_ADDR: i32 = 6;
pub const ST_LOAD: i32 = 7;
pub const ST_BINARY: i32 = 8;
pub const ST_BINARY_CONST: i32 = 9;
pub const ST_COMPARE: i32 = 10;
pub const ST_TEST: i32 = 11;
pub const ST_COPY: i32 = 12;
pub const ST_CALL: i32 = 13;
pub const ST_NUM_LOAD_BASE: i32 = 14;
pub const ST_NUM_LOAD_ADDR: i32 = 15;
pub const ST_NUM_ADD: i32 = 16;
pub const ST_NUM_CALL: i32 = 17;
pub const ST_VOID: i32 = 18;
pub const ST_CARG: i32 = 19;
pub const ST_ARGLIST: i32 = 20;

/// States whose node can deliver a general purpose register.
const REG_STATES: [i32; 13] = [
    ST_BASE,
    ST_CONST,
    ST_ADDR_BASE,
    ST_ADDR,
    ST_LOAD_BASE,
    ST_LOAD_ADDR,
    ST_LOAD,
    ST_BINARY,
    ST_BINARY_CONST,
    ST_COMPARE,
    ST_TEST,
    ST_COPY,
    ST_CALL,
];

/// States whose node can deliver a floating point register.
const NUM_STATES: [i32; 4] = [ST_NUM_LOAD_BASE, ST_NUM_LOAD_ADDR, ST_NUM_ADD, ST_NUM_CALL];

/// Tile that puts a node of `state` into a general purpose register.
pub fn reg_tile(state: i32) -> Option<TileId> {
    Some(match state {
        ST_BASE => T_BASE,
        ST_CONST => T_CONST,
        ST_ADDR_BASE => T_ADDR_BASE,
        ST_ADDR => T_ADDR,
        ST_LOAD_BASE => T_LOAD_BASE,
        ST_LOAD_ADDR => T_LOAD_ADDR,
        ST_LOAD => T_LOAD,
        ST_BINARY => T_BINARY,
        ST_BINARY_CONST => T_BINARY_CONST,
        ST_COMPARE => T_COMPARE,
        ST_TEST => T_TEST,
        ST_COPY => T_COPY,
        ST_CALL => T_CALL,
        _ => return None,
    })
}

/// Tile that puts a node of `state` into a floating point register.
pub fn num_tile(state: i32) -> Option<TileId> {
    Some(match state {
        ST_NUM_LOAD_BASE => T_LOADNUM_BASE,
        ST_NUM_LOAD_ADDR => T_LOADNUM_ADDR,
        ST_NUM_ADD => T_ADDNUM,
        ST_NUM_CALL => T_CALL_NUM,
        _ => return None,
    })
}

/// One transition of the tiling automaton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRow {
    pub op: ExprOp,
    pub left: i32,
    pub right: i32,
    pub state: i32,
    pub default_tile: TileId,
    pub children: [Option<TileId>; 2],
}

type TableKey = (ExprOp, i32, i32);

struct TableBuilder {
    rows: HashMap<TableKey, StateRow>,
}

impl TableBuilder {
    fn row(&mut self, op: ExprOp, left: i32, right: i32, state: i32, default_tile: TileId, children: [Option<TileId>; 2]) {
        let previous = self.rows.insert(
            (op, left, right),
            StateRow {
                op,
                left,
                right,
                state,
                default_tile,
                children,
            },
        );
        debug_assert!(previous.is_none(), "duplicate rule for {op:?} {left} {right}");
    }
}

fn build_table() -> HashMap<TableKey, StateRow> {
    let mut t = TableBuilder { rows: HashMap::new() };
    let reg = |s: i32| reg_tile(s);
    let num = |s: i32| num_tile(s);

    for op in [ExprOp::Local, ExprOp::Tc, ExprOp::Cu] {
        t.row(op, ST_NONE, ST_NONE, ST_BASE, T_BASE, [None, None]);
    }
    t.row(ExprOp::Const, ST_NONE, ST_NONE, ST_CONST, T_CONST, [None, None]);
    t.row(ExprOp::Label, ST_NONE, ST_NONE, ST_VOID, T_LABEL, [None, None]);
    t.row(ExprOp::Branch, ST_NONE, ST_NONE, ST_VOID, T_BRANCH, [None, None]);
    t.row(ExprOp::Arglist, ST_NONE, ST_NONE, ST_ARGLIST, T_ARGLIST, [None, None]);

    for s in REG_STATES {
        // addressing
        if s == ST_BASE {
            t.row(ExprOp::Addr, s, ST_NONE, ST_ADDR_BASE, T_ADDR_BASE, [Some(T_BASE_SYM), None]);
        } else {
            t.row(ExprOp::Addr, s, ST_NONE, ST_ADDR, T_ADDR, [reg(s), None]);
        }
        match s {
            ST_ADDR_BASE => {
                t.row(ExprOp::Load, s, ST_NONE, ST_LOAD_BASE, T_LOAD_BASE, [Some(T_ADDR_BASE_SYM), None]);
                t.row(ExprOp::LoadNum, s, ST_NONE, ST_NUM_LOAD_BASE, T_LOADNUM_BASE, [Some(T_ADDR_BASE_SYM), None]);
            }
            ST_ADDR => {
                t.row(ExprOp::Load, s, ST_NONE, ST_LOAD_ADDR, T_LOAD_ADDR, [Some(T_ADDR_SYM), None]);
                t.row(ExprOp::LoadNum, s, ST_NONE, ST_NUM_LOAD_ADDR, T_LOADNUM_ADDR, [Some(T_ADDR_SYM), None]);
            }
            _ => t.row(ExprOp::Load, s, ST_NONE, ST_LOAD, T_LOAD, [reg(s), None]),
        }
        t.row(ExprOp::Copy, s, ST_NONE, ST_COPY, T_COPY, [reg(s), None]);
        t.row(ExprOp::Carg, s, ST_NONE, ST_CARG, T_CARG, [reg(s), None]);
        for op in [ExprOp::Nz, ExprOp::Zr] {
            t.row(op, s, ST_NONE, ST_TEST, T_TEST, [reg(s), None]);
        }
        if s == ST_COMPARE {
            t.row(ExprOp::CondBranch, s, ST_NONE, ST_VOID, T_CBRANCH_COMPARE, [Some(T_COMPARE_SYM), None]);
        } else if s == ST_TEST {
            t.row(ExprOp::CondBranch, s, ST_NONE, ST_VOID, T_CBRANCH_TEST, [Some(T_TEST_SYM), None]);
        }
        t.row(ExprOp::Call, s, ST_ARGLIST, ST_CALL, T_CALL, [reg(s), Some(T_ARGLIST)]);
        t.row(ExprOp::CallNum, s, ST_ARGLIST, ST_NUM_CALL, T_CALL_NUM, [reg(s), Some(T_ARGLIST)]);
        t.row(ExprOp::CallVoid, s, ST_ARGLIST, ST_VOID, T_CALL_VOID, [reg(s), Some(T_ARGLIST)]);

        for r in REG_STATES {
            for op in [ExprOp::Add, ExprOp::Sub, ExprOp::Mul, ExprOp::And, ExprOp::Or, ExprOp::Xor] {
                if r == ST_CONST {
                    t.row(op, s, r, ST_BINARY_CONST, T_BINARY_CONST, [reg(s), Some(T_CONST_SYM)]);
                } else {
                    t.row(op, s, r, ST_BINARY, T_BINARY, [reg(s), reg(r)]);
                }
            }
            for op in [ExprOp::Lt, ExprOp::Le, ExprOp::Eq, ExprOp::Ne, ExprOp::Ge, ExprOp::Gt] {
                t.row(op, s, r, ST_COMPARE, T_COMPARE, [reg(s), reg(r)]);
            }
            let (store, tile, addr_tile) = match s {
                ST_ADDR_BASE => (ExprOp::Store, T_STORE_BASE, Some(T_ADDR_BASE_SYM)),
                ST_ADDR => (ExprOp::Store, T_STORE_ADDR, Some(T_ADDR_SYM)),
                _ => (ExprOp::Store, T_STORE, reg(s)),
            };
            t.row(store, s, r, ST_VOID, tile, [addr_tile, reg(r)]);
        }
        for n in NUM_STATES {
            match s {
                ST_ADDR_BASE => {
                    t.row(ExprOp::StoreNum, s, n, ST_VOID, T_STORENUM_BASE, [Some(T_ADDR_BASE_SYM), num(n)])
                }
                ST_ADDR => t.row(ExprOp::StoreNum, s, n, ST_VOID, T_STORENUM_ADDR, [Some(T_ADDR_SYM), num(n)]),
                _ => {}
            }
        }
    }

    for n in NUM_STATES {
        t.row(ExprOp::Carg, n, ST_NONE, ST_CARG, T_CARG, [num(n), None]);
        for m in NUM_STATES {
            t.row(ExprOp::AddNum, n, m, ST_NUM_ADD, T_ADDNUM, [num(n), num(m)]);
        }
    }

    log::debug!("tiling table built with {} rules", t.rows.len());
    t.rows
}

fn table() -> &'static HashMap<TableKey, StateRow> {
    static TABLE: OnceLock<HashMap<TableKey, StateRow>> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

/// Look up the transition for an operator over its children's states.
pub fn lookup(op: ExprOp, left: i32, right: i32) -> Option<&'static StateRow> {
    table().get(&(op, left, right))
}

/// Number of rules in the table.
pub fn rule_count() -> usize {
    table().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_value_counts() {
        assert_eq!(TILES[T_BASE].num_values(), 0);
        assert_eq!(TILES[T_LOAD].num_values(), 1);
        assert_eq!(TILES[T_STORE_ADDR].num_values(), 2);
        assert_eq!(TILES[T_CBRANCH_COMPARE].num_values(), 2);
        assert!(TILES[T_CARG].is_pseudo());
    }

    #[test]
    fn test_row_defaults_match_reg_tiles() {
        for row in table().values() {
            if let Some(tile) = reg_tile(row.state).or_else(|| num_tile(row.state)) {
                assert_eq!(row.default_tile, tile, "{:?}", row);
            }
        }
    }

    #[test]
    fn test_lookup_folds_immediates() {
        let row = lookup(ExprOp::Add, ST_LOAD, ST_CONST).unwrap();
        assert_eq!(row.state, ST_BINARY_CONST);
        assert_eq!(row.children, [Some(T_LOAD), Some(T_CONST_SYM)]);
        assert!(lookup(ExprOp::Add, ST_NUM_ADD, ST_CONST).is_none());
    }

    #[test]
    fn test_store_through_base() {
        let row = lookup(ExprOp::Store, ST_ADDR_BASE, ST_BINARY).unwrap();
        assert_eq!(row.default_tile, T_STORE_BASE);
        assert_eq!(row.children, [Some(T_ADDR_BASE_SYM), Some(T_BINARY)]);
        assert!(rule_count() > 500);
    }
}
