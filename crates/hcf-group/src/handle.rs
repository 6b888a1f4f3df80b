use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use tracing::trace;

use hcf_object::ObjectKind;
use hcf_types::Address;

use crate::error::{GroupError, GroupResult};
use crate::names::{NameChange, NamePaths, RewriteMemo};
use crate::namespace::FileId;

/// Identifier of an open handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct HandleId(u64);

impl HandleId {
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Group,
    Dataset,
    Datatype,
    Attribute,
}

impl From<ObjectKind> for HandleKind {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Group => HandleKind::Group,
            ObjectKind::Dataset => HandleKind::Dataset,
            ObjectKind::NamedDatatype => HandleKind::Datatype,
        }
    }
}

/// An object header in a particular file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    pub file: FileId,
    pub header: Address,
}

#[derive(Clone, Debug)]
pub struct Handle {
    pub kind: HandleKind,
    /// For attributes, the owning object.
    pub loc: Location,
    /// Kind of the object at `loc`.
    pub object_kind: ObjectKind,
    pub paths: NamePaths,
    pub attr_name: Option<String>,
    /// Held by a mount rather than by a caller.
    pub internal: bool,
}

/// Every live handle, in creation order.
#[derive(Debug, Default)]
pub struct HandleTable {
    next: u64,
    handles: BTreeMap<HandleId, Handle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, handle: Handle) -> HandleId {
        self.next += 1;
        let id = HandleId(self.next);
        trace!(%id, kind = ?handle.kind, header = %handle.loc.header, "opened handle");
        self.handles.insert(id, handle);
        id
    }

    pub fn get(&self, id: HandleId) -> GroupResult<&Handle> {
        self.handles.get(&id).ok_or(GroupError::InvalidHandle(id))
    }

    pub fn remove(&mut self, id: HandleId) -> GroupResult<Handle> {
        self.handles.remove(&id).ok_or(GroupError::InvalidHandle(id))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (HandleId, &Handle)> {
        self.handles.iter().map(|(id, h)| (*id, h))
    }

    /// Handles on objects in `file`, internal ones included.
    pub fn count_in(&self, file: FileId) -> usize {
        self.handles.values().filter(|h| h.loc.file == file).count()
    }

    /// Rewrite the cached paths of every handle `select` accepts.
    ///
    /// User paths live in the shared view of one mount hierarchy, so `user`
    /// applies across the files `select` admits. Canonical paths only change
    /// for handles in the given file. Returns how many handles changed.
    pub fn apply(
        &mut self,
        user: Option<NameChange<'_>>,
        canonical: Option<(FileId, NameChange<'_>)>,
        mut select: impl FnMut(&Handle) -> bool,
    ) -> usize {
        let mut user_memo = RewriteMemo::default();
        let mut canon_memo = RewriteMemo::default();
        let mut changed = 0;
        for handle in self.handles.values_mut() {
            if !select(handle) {
                continue;
            }
            let mut hit = false;
            if let Some(change) = user {
                hit |= handle.paths.apply_user(change, &mut user_memo);
            }
            if let Some((file, change)) = canonical {
                if handle.loc.file == file {
                    hit |= handle.paths.apply_canonical(change, &mut canon_memo);
                }
            }
            if hit {
                changed += 1;
            }
        }
        changed
    }
}

/// State shared by every handle on one group.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedGroup {
    pub open_count: usize,
    pub is_mount_point: bool,
}

/// Shared group state of one file, keyed by header address.
#[derive(Debug)]
pub struct SharedGroups {
    root: Address,
    groups: HashMap<Address, SharedGroup>,
}

impl SharedGroups {
    /// The root's state exists for as long as the file is open.
    pub fn new(root: Address) -> Self {
        let mut groups = HashMap::new();
        groups.insert(root, SharedGroup::default());
        Self { root, groups }
    }

    pub fn get(&self, header: Address) -> Option<&SharedGroup> {
        self.groups.get(&header)
    }

    /// Add a reference and return the new count.
    pub fn acquire(&mut self, header: Address) -> usize {
        let shared = self.groups.entry(header).or_default();
        shared.open_count += 1;
        shared.open_count
    }

    /// Drop a reference. Returns whether the shared state went away.
    pub fn release(&mut self, header: Address) -> bool {
        let Some(shared) = self.groups.get_mut(&header) else {
            return false;
        };
        shared.open_count = shared.open_count.saturating_sub(1);
        if shared.open_count > 0 || shared.is_mount_point || header == self.root {
            return false;
        }
        self.groups.remove(&header);
        true
    }

    pub fn is_mount_point(&self, header: Address) -> bool {
        self.groups.get(&header).is_some_and(|g| g.is_mount_point)
    }

    pub fn set_mount_point(&mut self, header: Address, mounted: bool) {
        if let Some(shared) = self.groups.get_mut(&header) {
            shared.is_mount_point = mounted;
        }
    }

    /// References held on groups other than the root.
    pub fn open_groups(&self) -> usize {
        self.groups
            .iter()
            .filter(|(addr, g)| **addr != self.root && g.open_count > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(file: u64, header: u64, user: &str) -> Handle {
        Handle {
            kind: HandleKind::Group,
            loc: Location {
                file: FileId::from_raw(file),
                header: Address::new(header),
            },
            object_kind: ObjectKind::Group,
            paths: NamePaths::new(Some(user), Some(user)),
            attr_name: None,
            internal: false,
        }
    }

    #[test]
    fn ids_are_unique_and_removal_invalidates() {
        let mut table = HandleTable::new();
        let a = table.insert(handle(1, 0x100, "/a"));
        let b = table.insert(handle(1, 0x200, "/b"));
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        table.remove(a).unwrap();
        assert!(matches!(table.get(a), Err(GroupError::InvalidHandle(id)) if id == a));
        assert_eq!(table.get(b).unwrap().paths.user(), Some("/b"));
    }

    #[test]
    fn canonical_changes_stay_in_their_file() {
        let mut table = HandleTable::new();
        let same = table.insert(handle(1, 0x100, "/g/x"));
        let other = table.insert(handle(2, 0x100, "/g/x"));
        let change = NameChange::Move { from: "/g", to: "/h" };
        let changed = table.apply(None, Some((FileId::from_raw(1), change)), |_| true);
        assert_eq!(changed, 1);
        assert_eq!(table.get(same).unwrap().paths.canonical(), Some("/h/x"));
        assert_eq!(table.get(other).unwrap().paths.canonical(), Some("/g/x"));
    }

    #[test]
    fn root_and_mount_points_outlive_their_handles() {
        let root = Address::new(0x40);
        let mut shared = SharedGroups::new(root);
        assert_eq!(shared.acquire(root), 1);
        assert!(!shared.release(root));
        assert!(shared.get(root).is_some());

        let g = Address::new(0x80);
        shared.acquire(g);
        shared.acquire(g);
        shared.set_mount_point(g, true);
        assert!(!shared.release(g));
        assert!(!shared.release(g));
        assert!(shared.is_mount_point(g));
        shared.set_mount_point(g, false);
        shared.acquire(g);
        assert!(shared.release(g));
        assert!(shared.get(g).is_none());
    }
}
