use std::cmp::Ordering;
use std::ops::ControlFlow;

use hcf_store::{ContainerFile, StoreError};
use hcf_types::Address;

use crate::error::BtreeError;
use crate::key::BtreeKey;

/// Result of inserting into a leaf object or a subtree.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome<K> {
    /// Inserted in place. `right_key` is set when the right bound of the
    /// object changed.
    Done { right_key: Option<K> },
    /// The object split. `middle` separates the halves, `right_addr` is the
    /// new right half, and `right_key` is set when the right bound of the
    /// right half changed.
    Split {
        middle: K,
        right_addr: Address,
        right_key: Option<K>,
    },
}

/// Result of removing from a leaf object or a subtree.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoveOutcome<K> {
    Done { right_key: Option<K> },
    /// The object became empty and has already been freed.
    Removed,
}

/// Position of an iteration. Records before `skip` are counted but not
/// visited; `index` ends as the number of records passed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterCursor {
    pub skip: usize,
    pub index: usize,
}

impl IterCursor {
    pub fn new(skip: usize) -> Self {
        Self { skip, index: 0 }
    }
}

/// What a B-tree indexes: one implementation per kind of leaf object.
///
/// Every callback receives the container so it can protect its own leaf
/// objects and side structures. The engine never holds one of its internal
/// nodes protected while a callback runs.
pub trait BtreeClass {
    type Key: BtreeKey;
    /// Operation payload for find, insert and remove.
    type Udata;
    /// What iteration hands to the visitor.
    type Record;
    type Error: From<BtreeError> + From<StoreError>;

    /// Stored in every internal node and checked on access.
    const TYPE_TAG: u8;

    /// Order the payload against one key.
    fn cmp2(
        &self,
        file: &mut ContainerFile,
        udata: &Self::Udata,
        key: &Self::Key,
    ) -> Result<Ordering, Self::Error>;

    /// `Less` if the payload is at or before `left`, `Greater` if after
    /// `right`, `Equal` if it falls in `(left, right]`.
    fn cmp3(
        &self,
        file: &mut ContainerFile,
        left: &Self::Key,
        udata: &Self::Udata,
        right: &Self::Key,
    ) -> Result<Ordering, Self::Error> {
        if self.cmp2(file, udata, left)? != Ordering::Greater {
            return Ok(Ordering::Less);
        }
        if self.cmp2(file, udata, right)? == Ordering::Greater {
            return Ok(Ordering::Greater);
        }
        Ok(Ordering::Equal)
    }

    /// Create the first leaf object of an empty tree and return its left key,
    /// address and right key.
    fn new_first(
        &self,
        file: &mut ContainerFile,
        udata: &mut Self::Udata,
    ) -> Result<(Self::Key, Address, Self::Key), Self::Error>;

    fn find(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        udata: &mut Self::Udata,
    ) -> Result<bool, Self::Error>;

    fn insert(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        left: &Self::Key,
        right: &Self::Key,
        udata: &mut Self::Udata,
    ) -> Result<InsertOutcome<Self::Key>, Self::Error>;

    fn remove(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        left: &Self::Key,
        right: &Self::Key,
        udata: &mut Self::Udata,
    ) -> Result<RemoveOutcome<Self::Key>, Self::Error>;

    /// Free a leaf object and everything in it. Called while deleting the
    /// whole tree.
    fn remove_all(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        udata: &mut Self::Udata,
    ) -> Result<(), Self::Error>;

    fn iterate_leaf(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        cursor: &mut IterCursor,
        visit: &mut dyn FnMut(Self::Record) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>, Self::Error>;

    /// The error reported when no leaf range contains the payload.
    fn not_found(&self, udata: &Self::Udata) -> Self::Error;
}
