use hcf_btree::BtreeError;
use hcf_heap::HeapError;
use hcf_object::ObjectError;
use hcf_store::StoreError;
use hcf_types::Address;
use thiserror::Error;

use crate::handle::HandleId;
use crate::namespace::FileId;

/// Errors produced by group and namespace operations.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("too many symbolic links while resolving {path} (limit {limit})")]
    LinkLimitExceeded { path: String, limit: u32 },

    #[error("nothing to insert: {0}")]
    NothingToInsert(String),

    #[error("no containing group: {0}")]
    NoContainingGroup(String),

    #[error("not a group: {0}")]
    NotAGroup(String),

    #[error("not a symbolic link: {0}")]
    NotASymlink(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("skip {skip} is out of range for a group with {count} members")]
    IndexOutOfRange { skip: usize, count: usize },

    #[error("invalid handle: {0}")]
    InvalidHandle(HandleId),

    #[error("invalid file: {0}")]
    InvalidFile(FileId),

    #[error("hard link from {from} into {to} crosses files")]
    CrossFileLink { from: FileId, to: FileId },

    #[error("cannot move {0} into itself")]
    MoveIntoSelf(String),

    #[error("mount point is busy: {0}")]
    MountBusy(String),

    #[error("not a mount point: {0}")]
    NotMounted(String),

    #[error("mounting {0} would create a cycle")]
    MountCycle(FileId),

    #[error("file {file} is busy: {reason}")]
    FileBusy { file: FileId, reason: String },

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("object error: {0}")]
    Object(#[from] ObjectError),

    #[error("heap error: {0}")]
    Heap(#[from] HeapError),

    #[error("b-tree error: {0}")]
    Btree(#[from] BtreeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GroupError {
    pub(crate) fn corrupt(addr: Address, reason: impl Into<String>) -> Self {
        GroupError::Store(StoreError::Corrupt {
            addr,
            reason: reason.into(),
        })
    }

    /// Whether the error reports damaged on-disk metadata.
    pub fn is_corruption(&self) -> bool {
        fn store(err: &StoreError) -> bool {
            matches!(
                err,
                StoreError::Corrupt { .. }
                    | StoreError::BadSignature { .. }
                    | StoreError::UnsupportedVersion { .. }
                    | StoreError::ChecksumMismatch { .. }
            )
        }
        match self {
            GroupError::Store(err)
            | GroupError::Heap(HeapError::Store(err))
            | GroupError::Btree(BtreeError::Store(err))
            | GroupError::Object(ObjectError::Store(err)) => store(err),
            GroupError::Btree(BtreeError::Corrupt { .. }) => true,
            _ => false,
        }
    }
}

pub type GroupResult<T> = Result<T, GroupError>;
