//! Groups and the object namespace for the hierarchical container format.
//!
//! A group is an object whose header points at a symbol table: a B-tree of
//! symbol nodes plus a local heap holding member names and symbolic-link
//! values. On top of that this crate provides path resolution, the table of
//! open handles with their cached paths, and mounting one file on a group of
//! another.
//!
//! # Components
//!
//! - [`SymbolEntry`] / [`EntryCache`]: one fixed-width name binding
//! - [`SymbolNode`]: a sorted node of up to `2K` entries, cached like any
//!   other metadata
//! - [`SymbolTableClass`]: the leaf callbacks the generic B-tree runs
//! - [`SymbolTable`]: find, insert, remove and iterate for one group
//! - [`Namespace`]: files, handles, links, moves, mounts and validation
//! - [`names`]: the path rewriting applied to open handles after each
//!   namespace change

pub mod config;
pub mod entry;
pub mod error;
pub mod handle;
pub mod mount;
pub mod names;
pub mod namespace;
pub mod node;
mod resolve;
pub mod stab;

pub use config::NamespaceConfig;
pub use entry::{EntryCache, SymbolEntry, SCRATCH_SIZE};
pub use error::{GroupError, GroupResult};
pub use handle::{Handle, HandleId, HandleKind, Location};
pub use names::{HiddenCount, NameChange, NamePaths};
pub use namespace::{FileId, Namespace, ObjInfo, ObjType, ValidationReport};
pub use node::{SymbolNode, SNOD_MAGIC, SNOD_VERSION};
pub use stab::{Member, SymbolTable, SymbolTableClass, TableStats, GROUP_NODE_TAG};
