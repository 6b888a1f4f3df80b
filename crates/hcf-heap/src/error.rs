use hcf_store::StoreError;
use hcf_types::HeapOffset;
use thiserror::Error;

/// Errors produced by local heap operations.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("heap offset {offset} out of range (data size {size})")]
    OffsetOutOfRange { offset: HeapOffset, size: usize },

    #[error("string at heap offset {offset} is not NUL-terminated")]
    NotTerminated { offset: HeapOffset },

    #[error("string at heap offset {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: HeapOffset },

    #[error("string contains an embedded NUL byte")]
    EmbeddedNul,

    #[error("heap offset 0 is reserved for the empty string")]
    ReservedOffset,

    #[error("cannot free {len} bytes at heap offset {offset}: {reason}")]
    InvalidFree {
        offset: HeapOffset,
        len: usize,
        reason: &'static str,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub type HeapResult<T> = Result<T, HeapError>;
