//! Generic keyed B-tree for the hierarchical container format.
//!
//! The tree only knows about its own internal nodes. What hangs off the
//! bottom level (symbol-table nodes, chunk records, ...) is owned by a
//! [`BtreeClass`] implementation, which the engine calls to find, insert,
//! remove and iterate within one leaf object. Keys are opaque to the engine
//! beyond their fixed encoded size; ordering goes through the class.
//!
//! # Structure
//!
//! - Every internal node with `n` children carries `n + 1` keys. Child `i`
//!   covers the half-open range `(key[i], key[i+1]]`.
//! - Nodes at the same level are chained by left/right sibling addresses.
//! - The root address never changes: a root split moves both halves into
//!   new nodes and the root grows one level.
//! - There is no merging. A child that becomes empty is pruned, and an empty
//!   root goes back to level 0.

pub mod class;
pub mod error;
pub mod key;
pub mod node;
pub mod tree;

pub use class::{BtreeClass, InsertOutcome, IterCursor, RemoveOutcome};
pub use error::{BtreeError, BtreeResult};
pub use key::BtreeKey;
pub use node::{BtreeNode, BTREE_MAGIC};
pub use tree::{create, delete, find, insert, iterate, leaves, remove, LeafRef};
