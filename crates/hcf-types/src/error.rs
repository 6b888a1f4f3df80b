use thiserror::Error;

/// Errors produced by type and codec operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("unsupported field width: {0} (expected 2, 4 or 8)")]
    InvalidWidth(u8),

    #[error("truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("value {value:#x} does not fit in {width} bytes")]
    Overflow { value: u64, width: u8 },

    #[error("invalid format parameter: {0}")]
    InvalidParams(String),
}
