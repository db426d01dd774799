//! Runtime side of the JIT.
//!
//! - `platform`: anonymous pages and the write-to-execute flip
//! - `code`: the finalizer, `CodeObject` and the execution context layout
//! - `instance`: `JitInstance`, the thread-safe compile entry point

pub mod code;
pub mod instance;
pub mod platform;

pub use code::{CodeObject, CompUnit, EntryFn, ExecutionContext};
pub use instance::JitInstance;
pub use platform::{alloc_pages, free_pages, set_page_mode, ExecutablePages, PageMode, WritablePages};
