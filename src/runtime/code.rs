// This module holds the finalizer and the object it produces. After the dispatcher has pushed
// every node through the emitter, CodeObject::assemble links the instruction stream to learn its
// size, maps that many writable bytes, has the emitter encode into them, and flips the mapping
// to read-execute. Graph label offsets are read back from the emitter; a label that never got
// placed reports a negative offset, which is logged and recorded as unresolved instead of
// failing the compilation, since the front end may reserve labels it ends up not using. The
// graph's side tables (deopt points, handlers, inline ranges) only refer to label numbers, so
// they are cloned as-is and resolved through label_address when someone needs an address.
//
// Compiled code is entered through the System V signature fn(ctx, cu, resume): the prologue pins
// the context and compilation unit in callee-saved registers, loads the work area pointer from
// the context and jumps to the resume address. ExecutionContext is the #[repr(C)] block the code
// reads and writes at fixed offsets: the work area pointer, the resume address written by invoke
// and dynamic-label nodes, and the exit code written by guards.

//! Code objects in executable memory.

use std::mem::offset_of;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::emitter::{Emitter, LabelId};
use crate::core::error::{JitError, JitResult};
use crate::ir::graph::{DeoptPoint, Graph, Handler, InlineRange};

use super::platform::{alloc_pages, free_pages, set_page_mode, ExecutablePages, PageMode};

/// State shared between compiled code and the runtime.
#[repr(C)]
#[derive(Debug)]
pub struct ExecutionContext {
    /// Base of the work area: locals, call-site slots, then spill slots.
    pub work: *mut u64,
    /// Where execution continues on the next entry.
    pub resume: *const u8,
    /// Non-zero after a failed guard: deopt index plus one.
    pub exit: u64,
}

pub const CTX_WORK: i32 = offset_of!(ExecutionContext, work) as i32;
pub const CTX_RESUME: i32 = offset_of!(ExecutionContext, resume) as i32;
pub const CTX_EXIT: i32 = offset_of!(ExecutionContext, exit) as i32;

impl ExecutionContext {
    pub fn new(work: &mut [u64]) -> Self {
        Self {
            work: work.as_mut_ptr(),
            resume: std::ptr::null(),
            exit: 0,
        }
    }

    /// Deopt index recorded by the last failed guard.
    pub fn deopt(&self) -> Option<usize> {
        self.exit.checked_sub(1).map(|index| index as usize)
    }
}

/// Opaque compilation unit handed through to compiled code.
#[repr(C)]
pub struct CompUnit {
    _private: [u8; 0],
}

pub type EntryFn = unsafe extern "C" fn(*mut ExecutionContext, *mut CompUnit, *const u8);

/// Finished machine code for one graph.
#[derive(Debug)]
pub struct CodeObject {
    pages: Option<ExecutablePages>,
    labels: Vec<Option<usize>>,
    pub deopts: Vec<DeoptPoint>,
    pub handlers: Vec<Handler>,
    pub inlines: Vec<InlineRange>,
    /// Spill area size in bytes, past the graph's spill base.
    pub spill_size: u32,
    /// Work area bytes the code touches.
    pub work_size: usize,
    pub seq_nr: u64,
}

impl CodeObject {
    /// Link, place and protect the code the emitter holds.
    pub fn assemble(emitter: &mut dyn Emitter, graph: &Graph, spill_size: u32, seq: &AtomicU64) -> JitResult<Self> {
        let size = emitter.link()?;
        let mut pages = alloc_pages(size, PageMode::ReadWrite)?;
        emitter.encode(pages.as_mut_slice())?;
        let pages = set_page_mode(pages, PageMode::ReadExecute)?;

        let labels = (0..graph.num_labels())
            .map(|label| {
                let offset = emitter.label_offset(label);
                if offset < 0 {
                    log::warn!("label {label} was never placed");
                    None
                } else {
                    Some(offset as usize)
                }
            })
            .collect();
        let seq_nr = seq.fetch_add(1, Ordering::Relaxed);
        log::info!("code object {seq_nr}: {size} bytes at {:p}", pages.as_ptr());

        Ok(Self {
            pages: Some(pages),
            labels,
            deopts: graph.deopts.clone(),
            handlers: graph.handlers.clone(),
            inlines: graph.inlines.clone(),
            spill_size,
            work_size: graph.spill_base() as usize + spill_size as usize,
            seq_nr,
        })
    }

    pub fn entry(&self) -> *const u8 {
        self.pages.as_ref().map_or(std::ptr::null(), ExecutablePages::as_ptr)
    }

    pub fn size(&self) -> usize {
        self.pages.as_ref().map_or(0, ExecutablePages::len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match &self.pages {
            Some(pages) => pages.as_slice(),
            None => &[],
        }
    }

    pub fn num_labels(&self) -> usize {
        self.labels.len()
    }

    pub fn label_offset(&self, label: LabelId) -> Option<usize> {
        self.labels.get(label).copied().flatten()
    }

    pub fn label_address(&self, label: LabelId) -> Option<*const u8> {
        let offset = self.label_offset(label)?;
        Some(self.entry().wrapping_add(offset))
    }

    /// Labels unresolved after linking.
    pub fn unresolved_labels(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(label, offset)| offset.is_none().then_some(label))
    }

    /// Run the code from `label`.
    ///
    /// # Safety
    /// `ctx.work` must point to at least `work_size` writable bytes, `cu`
    /// must be what the compiled calls expect, and every function address
    /// baked into the graph must still be valid.
    pub unsafe fn enter(&self, ctx: &mut ExecutionContext, cu: *mut CompUnit, label: LabelId) -> JitResult<()> {
        let resume = self.label_address(label).ok_or(JitError::UnknownLabel { label })?;
        self.enter_address(ctx, cu, resume);
        Ok(())
    }

    /// Run the code from a raw resume address, such as one an invoke left
    /// in `ctx.resume`.
    ///
    /// # Safety
    /// As for [`CodeObject::enter`]; `resume` must lie on an instruction
    /// boundary inside this object.
    pub unsafe fn enter_address(&self, ctx: &mut ExecutionContext, cu: *mut CompUnit, resume: *const u8) {
        let entry: EntryFn = std::mem::transmute::<*const u8, EntryFn>(self.entry());
        entry(ctx, cu, resume);
    }
}

impl Drop for CodeObject {
    fn drop(&mut self) {
        if let Some(pages) = self.pages.take() {
            free_pages(pages);
        }
    }
}
