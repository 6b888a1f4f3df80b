use hcf_types::{Address, TypeError};

/// Errors from storage and metadata-cache operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read reached past the end of the device.
    #[error("read of {len} bytes at {addr:#x} is past end of device ({size} bytes)")]
    OutOfBounds { addr: u64, len: usize, size: u64 },

    /// I/O error from the underlying device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Field encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] TypeError),

    /// On-disk signature did not match.
    #[error("bad signature at {addr}: expected {expected:?}, found {actual:?}")]
    BadSignature {
        addr: Address,
        expected: String,
        actual: String,
    },

    /// On-disk structure version is not the one this library writes.
    #[error("unsupported version {version} at {addr}")]
    UnsupportedVersion { addr: Address, version: u32 },

    /// Metadata failed validation while loading.
    #[error("corrupt metadata at {addr}: {reason}")]
    Corrupt { addr: Address, reason: String },

    /// The address is already protected by another caller.
    #[error("metadata at {0} is already protected")]
    AlreadyProtected(Address),

    /// Unprotect was called for an address that is not protected.
    #[error("metadata at {0} is not protected")]
    NotProtected(Address),

    /// A new entry was registered at an address that is already cached.
    #[error("metadata at {0} is already cached")]
    AlreadyCached(Address),

    /// The cached entry at this address has a different type.
    #[error("cache type mismatch at {addr}: requested {requested}, cached {cached}")]
    TypeMismatch {
        addr: Address,
        requested: &'static str,
        cached: &'static str,
    },

    /// No address space is left for an allocation.
    #[error("cannot allocate {size} bytes: {reason}")]
    AllocationFailed { size: u64, reason: String },

    /// A free request does not describe allocated space.
    #[error("invalid free of {size} bytes at {addr}")]
    InvalidFree { addr: Address, size: u64 },

    /// Superblock checksum did not match its payload.
    #[error("superblock checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
