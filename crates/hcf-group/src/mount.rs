use std::collections::HashMap;

use hcf_types::Address;

use crate::handle::HandleId;
use crate::namespace::FileId;

/// One file mounted on a group of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountRecord {
    pub parent: FileId,
    pub point: Address,
    pub child: FileId,
    /// Internal handle that keeps the mount point open.
    pub holder: HandleId,
}

/// Mounts indexed both ways.
#[derive(Debug, Default)]
pub struct MountTable {
    by_point: HashMap<(FileId, Address), FileId>,
    by_child: HashMap<FileId, MountRecord>,
}

impl MountTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: MountRecord) {
        self.by_point
            .insert((record.parent, record.point), record.child);
        self.by_child.insert(record.child, record);
    }

    pub fn remove(&mut self, child: FileId) -> Option<MountRecord> {
        let record = self.by_child.remove(&child)?;
        self.by_point.remove(&(record.parent, record.point));
        Some(record)
    }

    /// The file mounted on `point` in `file`, if any.
    pub fn child_at(&self, file: FileId, point: Address) -> Option<FileId> {
        self.by_point.get(&(file, point)).copied()
    }

    /// Where `child` is mounted, if it is.
    pub fn record(&self, child: FileId) -> Option<&MountRecord> {
        self.by_child.get(&child)
    }

    /// The file at the top of the mount chain containing `file`.
    pub fn top(&self, mut file: FileId) -> FileId {
        while let Some(record) = self.by_child.get(&file) {
            file = record.parent;
        }
        file
    }

    /// Whether `ancestor` is `file` or one of the files it is mounted under.
    pub fn is_ancestor(&self, ancestor: FileId, mut file: FileId) -> bool {
        loop {
            if file == ancestor {
                return true;
            }
            match self.by_child.get(&file) {
                Some(record) => file = record.parent,
                None => return false,
            }
        }
    }

    pub fn has_children(&self, file: FileId) -> bool {
        self.by_child.values().any(|r| r.parent == file)
    }

    /// `file` and every file mounted below it, directly or not.
    pub fn subtree(&self, file: FileId) -> Vec<FileId> {
        let mut out = vec![file];
        let mut i = 0;
        while i < out.len() {
            let parent = out[i];
            let mut children: Vec<FileId> = self
                .by_child
                .values()
                .filter(|r| r.parent == parent)
                .map(|r| r.child)
                .collect();
            children.sort();
            out.extend(children);
            i += 1;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.by_child.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_child.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(parent: u64, point: u64, child: u64, holder: &mut u64) -> MountRecord {
        *holder += 1;
        MountRecord {
            parent: FileId::from_raw(parent),
            point: Address::new(point),
            child: FileId::from_raw(child),
            holder: HandleId::from_raw(*holder),
        }
    }

    #[test]
    fn tracks_chains_and_subtrees() {
        let mut holder = 0;
        let mut table = MountTable::new();
        table.insert(record(1, 0x100, 2, &mut holder));
        table.insert(record(2, 0x200, 3, &mut holder));
        table.insert(record(1, 0x300, 4, &mut holder));

        let f = FileId::from_raw;
        assert_eq!(table.child_at(f(1), Address::new(0x100)), Some(f(2)));
        assert_eq!(table.child_at(f(2), Address::new(0x100)), None);
        assert_eq!(table.top(f(3)), f(1));
        assert!(table.is_ancestor(f(1), f(3)));
        assert!(!table.is_ancestor(f(4), f(3)));
        assert_eq!(table.subtree(f(2)), vec![f(2), f(3)]);
        assert_eq!(table.subtree(f(1)), vec![f(1), f(2), f(4), f(3)]);

        let removed = table.remove(f(2)).unwrap();
        assert_eq!(removed.point, Address::new(0x100));
        assert_eq!(table.child_at(f(1), Address::new(0x100)), None);
        assert_eq!(table.top(f(3)), f(2));
        assert_eq!(table.len(), 2);
    }
}
