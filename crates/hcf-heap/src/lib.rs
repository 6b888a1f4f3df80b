//! Local heaps for the hierarchical container format.
//!
//! A local heap is a small byte arena owned by one group. Member names and
//! symbolic-link values are stored in it as NUL-terminated strings and are
//! referenced from symbol-table entries by [`HeapOffset`](hcf_types::HeapOffset).
//!
//! The heap is a metadata-cache entry like any other: callers protect it,
//! mutate it in memory, and unprotect it. Its data block is reallocated in
//! the container when the heap is flushed after growing or shrinking.

pub mod error;
pub mod heap;

pub use error::{HeapError, HeapResult};
pub use heap::{insert_str, read_string, remove_str, LocalHeap, HEAP_MAGIC, HEAP_VERSION};
