// This module provides the arena-backed compilation session shared by every expression tree
// of one graph compilation. The session borrows a bumpalo arena owned by the caller, so tile
// lists and their per-tile input slices can be allocated without individual frees and all
// disappear together when the compilation ends. Alongside the arena the session keeps running
// statistics: trees compiled, tiles emitted (with a per-tile-name breakdown), duplications made
// by the tiler, spills, reloads, calls marshaled and the final code size. The statistics live in
// a RefCell because the session is passed around by shared reference while the dispatcher and
// code generator both record into it; a session is never shared across threads.

//! Arena-based compilation session.

use std::cell::RefCell;
use std::fmt;

use bumpalo::Bump;
use hashbrown::HashMap;

/// Per-compilation arena and statistics.
pub struct CompilationSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Copy a slice into the arena.
    pub fn alloc_slice<T: Copy>(&self, slice: &[T]) -> &'arena [T] {
        self.arena.alloc_slice_copy(slice)
    }

    pub fn record_tree(&self, conflicts: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.trees_compiled += 1;
        stats.duplications += conflicts;
    }

    pub fn record_tile(&self, name: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.tiles_emitted += 1;
        *stats.tile_counts.entry(name).or_insert(0) += 1;
    }

    pub fn record_call(&self) {
        self.stats.borrow_mut().calls_marshaled += 1;
    }

    pub fn record_spills(&self, spills: u32, reloads: u32) {
        let mut stats = self.stats.borrow_mut();
        stats.spills += spills as usize;
        stats.reloads += reloads as usize;
    }

    pub fn record_code_size(&self, size: usize) {
        self.stats.borrow_mut().code_size = size;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Counters for one graph compilation.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    pub trees_compiled: usize,
    pub tiles_emitted: usize,
    pub tile_counts: HashMap<&'static str, usize>,
    /// Nodes added by the tiler to resolve tile conflicts.
    pub duplications: usize,
    pub spills: usize,
    pub reloads: usize,
    pub calls_marshaled: usize,
    pub code_size: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation statistics:")?;
        writeln!(f, "  Trees compiled: {}", self.trees_compiled)?;
        writeln!(f, "  Tiles emitted: {}", self.tiles_emitted)?;
        writeln!(f, "  Duplications: {}", self.duplications)?;
        writeln!(f, "  Spills / reloads: {} / {}", self.spills, self.reloads)?;
        writeln!(f, "  Calls marshaled: {}", self.calls_marshaled)?;
        writeln!(f, "  Code size: {} bytes", self.code_size)?;

        if !self.tile_counts.is_empty() {
            writeln!(f, "  Tile breakdown:")?;
            let mut sorted: Vec<_> = self.tile_counts.iter().collect();
            sorted.sort_by_key(|(name, count)| (std::cmp::Reverse(**count), **name));
            for (name, count) in sorted.into_iter().take(10) {
                writeln!(f, "    {name}: {count}")?;
            }
        }
        Ok(())
    }
}
