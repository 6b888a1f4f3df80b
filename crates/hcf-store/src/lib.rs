//! Storage layer for the hierarchical container format.
//!
//! A container is a single file. This crate owns everything below the
//! structural metadata: raw block I/O, address-space allocation, the
//! metadata cache, and the superblock that ties them together.
//!
//! # Components
//!
//! - [`BlockDevice`]: positioned byte I/O ([`MemoryDevice`], [`FileDevice`])
//! - [`SpaceAllocator`]: first-fit allocator over the container address space
//! - [`MetadataCache`]: typed, LRU-evicting cache of decoded metadata entries
//! - [`ContainerFile`]: one open container: device + allocator + cache + superblock
//!
//! # Protect / unprotect
//!
//! Metadata is never shared between two live in-memory copies. A caller
//! *protects* an address and receives the decoded entry by value; the cache
//! forgets about it until the entry is *unprotected* again. Protecting an
//! address that is already out is an error, so the cache can never hand out
//! two copies of the same node. [`ContainerFile::with_entry`] brackets a
//! closure with protect/unprotect and returns the entry on every exit path.

pub mod alloc;
pub mod cache;
pub mod config;
pub mod container;
pub mod error;
pub mod file;
pub mod memory;
pub mod superblock;
pub mod traits;

pub use alloc::{Extent, SpaceAllocator};
pub use cache::{CacheClass, CacheStats, FlushContext, MetadataCache, Release};
pub use config::ContainerConfig;
pub use container::ContainerFile;
pub use error::{StoreError, StoreResult};
pub use file::FileDevice;
pub use memory::MemoryDevice;
pub use superblock::{Superblock, SUPERBLOCK_SIZE};
pub use traits::BlockDevice;
