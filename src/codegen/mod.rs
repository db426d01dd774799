// This module compiles one expression tree into emitter requests. The tree is cloned so the
// graph stays untouched, tiled, and flattened into a tile list in the session arena; a use pass
// then records for every value the order number of its defining tile and of its last consumer.
// Replay walks the list once. Each real tile makes its inputs resident (reloading spilled ones),
// locks them, obtains an output register and emits its instructions, after which everything is
// unlocked and values whose last use has been reached are retired. The output register is taken
// over from the first input when that input dies at this very tile and lives in the same class,
// which turns two-address arithmetic into a single instruction. When a class runs out of
// registers the unlocked value used furthest in the future is spilled. Call tiles take a
// separate path in `call` that flushes caller-saved registers and marshals arguments. Tree
// labels are renumbered past every label the graph and the earlier trees already use.

//! Expression tree code generation.

mod call;
mod emit;

use crate::core::allocator::RegisterAllocator;
use crate::core::emitter::{Emitter, LabelId};
use crate::core::error::{JitError, JitResult};
use crate::core::register_file::{AsmReg, RegClass};
use crate::core::session::CompilationSession;
use crate::core::value::{Value, ValueState};
use crate::ir::expr::{ExprTree, NodeId};
use crate::tiler::{tile_expr_tree, Emit, TileEntry, TileList, TilerOptions};
use crate::x64::CallingConvention;

/// Per-tree inputs from the graph compiler.
#[derive(Debug, Clone, Copy)]
pub struct TreeContext<'c> {
    pub conv: &'static dyn CallingConvention,
    pub tiler: &'c TilerOptions,
    /// First label number available to this tree.
    pub label_offset: LabelId,
    /// Work-area offset of the first spill slot.
    pub spill_base: i32,
}

/// What compiling one tree cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub tiles: usize,
    pub conflicts: usize,
    pub spills: u32,
    pub reloads: u32,
    /// Spill bytes used past the spill base.
    pub spill_extent: u32,
    /// Peak simultaneously bound registers per class.
    pub peak: [u32; 2],
}

/// The tiled tree with its final value states.
#[derive(Debug, Clone)]
pub struct CompiledTree {
    pub tree: ExprTree,
    pub summary: TreeSummary,
}

/// Fill in `first_created`, `last_use` and `num_use` from the schedule.
pub fn compute_use(list: &TileList<'_>, values: &mut [Value]) {
    for value in values.iter_mut() {
        value.reset();
    }
    for entry in list.entries() {
        if let Some(output) = entry.output {
            values[output].first_created = entry.order_nr;
        }
        for &input in entry.inputs {
            values[input].last_use = entry.order_nr;
            values[input].num_use += 1;
        }
    }
    // unused results die right after their definition
    for entry in list.entries() {
        if let Some(output) = entry.output {
            let value = &mut values[output];
            value.last_use = value.last_use.max(value.first_created);
        }
    }
}

/// Compile one expression tree.
pub fn compile_tree(
    tree: &ExprTree,
    ctx: &TreeContext<'_>,
    session: &CompilationSession<'_>,
    emitter: &mut dyn Emitter,
) -> JitResult<CompiledTree> {
    let mut tree = tree.clone();
    let tiling = tile_expr_tree(&mut tree, ctx.tiler)?;
    let list = TileList::build(session.arena(), &mut tree);
    compute_use(&list, tree.values_mut());
    emitter.reserve_labels(ctx.label_offset + tree.num_labels());
    session.record_tree(tiling.conflicts);

    let mut compiler = TreeCompiler {
        alloc: RegisterAllocator::new(ctx.conv.allocatable(), ctx.conv.caller_saved(), ctx.spill_base),
        tree,
        conv: ctx.conv,
        label_offset: ctx.label_offset,
        emitter,
        session,
    };
    for entry in list.entries() {
        compiler.compile_tile(entry)?;
    }

    let stats = compiler.alloc.stats();
    session.record_spills(stats.spills, stats.reloads);
    let summary = TreeSummary {
        tiles: list.len(),
        conflicts: tiling.conflicts,
        spills: stats.spills,
        reloads: stats.reloads,
        spill_extent: compiler.alloc.spill_extent(),
        peak: [
            compiler.alloc.peak_in_use(RegClass::Gpr),
            compiler.alloc.peak_in_use(RegClass::Num),
        ],
    };
    log::debug!("tree compiled: {summary:?}");
    Ok(CompiledTree {
        tree: compiler.tree,
        summary,
    })
}

pub(crate) struct TreeCompiler<'e, 's, 'arena> {
    tree: ExprTree,
    alloc: RegisterAllocator,
    conv: &'static dyn CallingConvention,
    label_offset: LabelId,
    emitter: &'e mut dyn Emitter,
    session: &'s CompilationSession<'arena>,
}

impl TreeCompiler<'_, '_, '_> {
    fn compile_tile(&mut self, entry: &TileEntry<'_>) -> JitResult<()> {
        let tile = entry.tile();
        let Some(emit) = tile.emit else {
            return Ok(());
        };
        log::trace!("#{} node {} tile {}", entry.order_nr, entry.node, tile.name);
        self.session.record_tile(tile.name);

        if emit == Emit::Call {
            return self.compile_call(entry);
        }

        self.ensure_values(entry.inputs)?;
        let output = match entry.output {
            Some(output) => Some(self.allocate_output(entry, output)?),
            None => None,
        };
        self.emit_tile(entry, emit, output)?;

        for &input in entry.inputs {
            self.alloc.release(self.tree.values(), input)?;
        }
        if let Some(output) = entry.output {
            self.alloc.release(self.tree.values(), output)?;
        }
        self.alloc.expire(self.tree.values_mut(), entry.order_nr)
    }

    /// Make every input resident and lock it.
    fn ensure_values(&mut self, inputs: &[NodeId]) -> JitResult<()> {
        for &input in inputs {
            let value = &self.tree.values()[input];
            match (value.state, value.class()) {
                (ValueState::Allocated, _) => {}
                (ValueState::Spilled, Some(class)) => {
                    self.make_room(class)?;
                    self.alloc.load(self.tree.values_mut(), input, self.emitter)?;
                }
                (state, _) => return Err(JitError::ValueNotLive { node: input, state }),
            }
            self.alloc.use_value(self.tree.values(), input)?;
        }
        Ok(())
    }

    /// Spill one value when `class` has no free register left.
    fn make_room(&mut self, class: RegClass) -> JitResult<()> {
        if self.alloc.has_free(class) {
            return Ok(());
        }
        let victim = self
            .alloc
            .spill_victim(self.tree.values(), class)
            .ok_or(JitError::NoFreeRegister { class })?;
        self.alloc.spill(self.tree.values_mut(), victim, self.emitter)
    }

    fn allocate_output(&mut self, entry: &TileEntry<'_>, output: NodeId) -> JitResult<AsmReg> {
        let values = self.tree.values();
        let Some(class) = values[output].class() else {
            return Err(JitError::unimplemented(format!("register for void node {output}")));
        };
        let reuse = entry.inputs.first().and_then(|&first| {
            let value = &values[first];
            (value.class() == Some(class)
                && value.state == ValueState::Allocated
                && value.last_use == entry.order_nr)
                .then_some(value.reg)
                .flatten()
        });
        let reg = match reuse {
            Some(reg) => reg,
            None => {
                self.make_room(class)?;
                self.alloc.allocate(class)?
            }
        };
        self.alloc.assign(self.tree.values_mut(), output, reg)?;
        self.alloc.use_value(self.tree.values(), output)?;
        Ok(reg)
    }

    fn input_reg(&self, id: NodeId) -> JitResult<AsmReg> {
        self.tree.values()[id].resident_reg(id)
    }

    fn label(&self, word: i64) -> LabelId {
        self.label_offset + word as LabelId
    }
}
