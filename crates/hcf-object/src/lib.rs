//! Object headers for the hierarchical container format.
//!
//! Every named object (group, dataset, named datatype) starts with a small
//! header recording its kind and how many hard links point at it. Groups
//! additionally carry a symbol-table message: the addresses of the B-tree
//! and local heap that hold their members.
//!
//! [`OpenObjects`] tracks which headers are open in memory so that an object
//! whose link count drops to zero is only deleted once nothing has it open.

pub mod error;
pub mod header;
pub mod open;

pub use error::{ObjectError, ObjectResult};
pub use header::{ObjectHeader, ObjectInfo, ObjectKind, SymbolTableMessage, OHDR_MAGIC};
pub use open::OpenObjects;
