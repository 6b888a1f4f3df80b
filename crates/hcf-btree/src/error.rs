use hcf_store::StoreError;
use hcf_types::Address;
use thiserror::Error;

/// Errors raised by the B-tree engine itself.
#[derive(Debug, Error)]
pub enum BtreeError {
    #[error("b-tree node at {addr} belongs to class {found}, expected {expected}")]
    WrongClass { addr: Address, expected: u8, found: u8 },

    #[error("corrupt b-tree at {addr}: {reason}")]
    Corrupt { addr: Address, reason: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type BtreeResult<T> = Result<T, BtreeError>;
