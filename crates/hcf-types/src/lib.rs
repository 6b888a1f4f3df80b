//! Foundation types for the hierarchical container format (HCF).
//!
//! Every other HCF crate depends on `hcf-types`. Nothing in here touches
//! storage: these are the value types and the byte codec that the on-disk
//! structures are written with.
//!
//! # Key Types
//!
//! - [`Address`]: container-relative file address, with an "undefined" sentinel
//! - [`HeapOffset`]: offset of a string inside a local heap
//! - [`FormatParams`]: address/length widths, fan-out constants, byte order
//! - [`Encoder`] / [`Decoder`]: width- and byte-order-aware cursors

pub mod address;
pub mod codec;
pub mod error;
pub mod params;

pub use address::{Address, HeapOffset};
pub use codec::{Decoder, Encoder};
pub use error::TypeError;
pub use params::{ByteOrder, FormatParams};
