// This module wraps the host page allocator used for generated code. Code is written into an
// anonymous read-write mapping and then flipped to read-execute in one step that consumes the
// writable handle, so at no point does the crate hold a mapping that is both writable and
// executable, and once code is executable there is no API returning it to a writable state.
// Both halves are thin newtypes over memmap2: WritablePages around MmapMut, ExecutablePages
// around Mmap. Freeing is dropping; free_pages exists so call sites can say it explicitly.

//! Page allocation and protection for generated code.

use memmap2::{Mmap, MmapMut};

use crate::core::error::{JitError, JitResult};

/// Protection requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    ReadWrite,
    ReadExecute,
}

/// Anonymous pages open for writing code.
#[derive(Debug)]
pub struct WritablePages {
    map: MmapMut,
    len: usize,
}

impl WritablePages {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The requested bytes, not the whole mapping.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..self.len]
    }
}

/// Read-execute pages holding finished code.
#[derive(Debug)]
pub struct ExecutablePages {
    map: Mmap,
    len: usize,
}

impl ExecutablePages {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.len]
    }
}

/// Map `size` bytes of fresh anonymous memory.
///
/// Only [`PageMode::ReadWrite`] is accepted: executable memory is obtained
/// from [`set_page_mode`] after the code has been written.
pub fn alloc_pages(size: usize, mode: PageMode) -> JitResult<WritablePages> {
    if mode != PageMode::ReadWrite {
        return Err(JitError::unimplemented("allocating pages executable and writable"));
    }
    // zero-length mappings are rejected by the host
    let map = MmapMut::map_anon(size.max(1))?;
    log::debug!("mapped {} bytes for code at {:p}", map.len(), map.as_ptr());
    Ok(WritablePages { map, len: size })
}

/// Make written pages executable, giving up write access.
pub fn set_page_mode(pages: WritablePages, mode: PageMode) -> JitResult<ExecutablePages> {
    if mode != PageMode::ReadExecute {
        return Err(JitError::unimplemented("returning executable pages to writable"));
    }
    let len = pages.len;
    let map = pages.map.make_exec()?;
    Ok(ExecutablePages { map, len })
}

pub fn free_pages(pages: ExecutablePages) {
    log::trace!("releasing {} bytes of code at {:p}", pages.len, pages.as_ptr());
    drop(pages);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_execute() {
        let mut pages = alloc_pages(3, PageMode::ReadWrite).unwrap();
        assert_eq!(pages.len(), 3);
        pages.as_mut_slice().copy_from_slice(&[0x90, 0x90, 0xC3]);
        let exec = set_page_mode(pages, PageMode::ReadExecute).unwrap();
        assert_eq!(exec.as_slice(), &[0x90, 0x90, 0xC3]);
        assert!(!exec.as_ptr().is_null());
        free_pages(exec);
    }

    #[test]
    fn test_wx_requests_rejected() {
        assert!(alloc_pages(16, PageMode::ReadExecute).is_err());
        let pages = alloc_pages(16, PageMode::ReadWrite).unwrap();
        assert!(set_page_mode(pages, PageMode::ReadWrite).is_err());
    }

    #[test]
    fn test_empty_allocation() {
        let pages = alloc_pages(0, PageMode::ReadWrite).unwrap();
        assert!(pages.is_empty());
        let exec = set_page_mode(pages, PageMode::ReadExecute).unwrap();
        assert!(exec.as_slice().is_empty());
    }
}
