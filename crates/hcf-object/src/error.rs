use hcf_store::StoreError;
use hcf_types::Address;
use thiserror::Error;

use crate::header::ObjectKind;

/// Errors produced by object-header operations.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object at {0} is not a group")]
    NotAGroup(Address),

    #[error("link count of object at {addr} would drop below zero ({count} {delta:+})")]
    LinkCountUnderflow { addr: Address, count: u32, delta: i32 },

    #[error("link count of object at {0} overflowed")]
    LinkCountOverflow(Address),

    #[error("object at {addr} is open as a {open_as} but was reached as a {requested}")]
    InconsistentState {
        addr: Address,
        open_as: ObjectKind,
        requested: ObjectKind,
    },

    #[error("object at {0} is not open")]
    NotOpen(Address),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type ObjectResult<T> = Result<T, ObjectError>;
