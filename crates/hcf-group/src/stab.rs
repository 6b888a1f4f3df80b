//! Group symbol tables: a B-tree of symbol nodes plus a local heap of names.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use tracing::{debug, trace, warn};

use hcf_btree::{self as btree, BtreeClass, InsertOutcome, IterCursor, RemoveOutcome};
use hcf_heap::{self as heap, HeapError, LocalHeap};
use hcf_object::SymbolTableMessage;
use hcf_store::{ContainerFile, Release};
use hcf_types::{Address, HeapOffset};

use crate::entry::{EntryCache, SymbolEntry};
use crate::error::{GroupError, GroupResult};
use crate::node::SymbolNode;

/// B-tree class tag of group nodes.
pub const GROUP_NODE_TAG: u8 = 0;

/// Payload threaded through one B-tree operation on a symbol table.
#[derive(Debug)]
pub struct NameOp {
    pub name: String,
    /// Insert: the entry to store. Find and remove: the entry found.
    pub entry: Option<SymbolEntry>,
    /// Find only: replace the found entry's cache.
    pub refresh: Option<EntryCache>,
    /// Remove only: report hard links whose targets lose a link.
    pub adjust_links: bool,
    /// Object headers that lost a hard link during the operation.
    pub released: Vec<Address>,
}

impl NameOp {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            entry: None,
            refresh: None,
            adjust_links: false,
            released: Vec::new(),
        }
    }
}

/// A member handed to iteration callbacks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub entry: SymbolEntry,
}

/// The leaf callbacks for symbol nodes. Names compare through the group's
/// local heap.
#[derive(Clone, Copy, Debug)]
pub struct SymbolTableClass {
    pub heap: Address,
}

impl SymbolTableClass {
    /// Binary search a node's entries by name with the heap protected once.
    fn search(
        &self,
        file: &mut ContainerFile,
        entries: &[SymbolEntry],
        name: &str,
    ) -> GroupResult<Result<usize, usize>> {
        file.read_entry(self.heap, |_, heap: &LocalHeap| {
            let (mut lo, mut hi) = (0, entries.len());
            while lo < hi {
                let mid = (lo + hi) / 2;
                match name.cmp(heap.read_str(entries[mid].name_off)?) {
                    Ordering::Equal => return Ok(Ok(mid)),
                    Ordering::Less => hi = mid,
                    Ordering::Greater => lo = mid + 1,
                }
            }
            Ok(Err(lo))
        })
    }

    fn new_node(file: &mut ContainerFile, entries: Vec<SymbolEntry>) -> GroupResult<Address> {
        let addr = file.allocate(SymbolNode::node_size(file.params()) as u64)?;
        file.insert_new(addr, SymbolNode::with_entries(entries))?;
        Ok(addr)
    }
}

impl BtreeClass for SymbolTableClass {
    type Key = HeapOffset;
    type Udata = NameOp;
    type Record = Member;
    type Error = GroupError;
    const TYPE_TAG: u8 = GROUP_NODE_TAG;

    fn cmp2(&self, file: &mut ContainerFile, udata: &NameOp, key: &HeapOffset) -> GroupResult<Ordering> {
        file.read_entry(self.heap, |_, heap: &LocalHeap| {
            Ok(udata.name.as_str().cmp(heap.read_str(*key)?))
        })
    }

    fn new_first(
        &self,
        file: &mut ContainerFile,
        _udata: &mut NameOp,
    ) -> GroupResult<(HeapOffset, Address, HeapOffset)> {
        let addr = Self::new_node(file, Vec::new())?;
        Ok((HeapOffset::EMPTY, addr, HeapOffset::EMPTY))
    }

    fn find(&self, file: &mut ContainerFile, addr: Address, udata: &mut NameOp) -> GroupResult<bool> {
        file.with_entry(addr, |file, node: &mut SymbolNode| {
            let Ok(idx) = self.search(file, &node.entries, &udata.name)? else {
                return Ok((false, Release::Clean));
            };
            let release = match udata.refresh.take() {
                Some(cache) => {
                    node.entries[idx].cache = cache;
                    node.entries[idx].dirty = true;
                    Release::Dirty
                }
                None => Release::Clean,
            };
            udata.entry = Some(node.entries[idx]);
            Ok((true, release))
        })
    }

    fn insert(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        _left: &HeapOffset,
        _right: &HeapOffset,
        udata: &mut NameOp,
    ) -> GroupResult<InsertOutcome<HeapOffset>> {
        let k = file.params().sym_leaf_k as usize;
        let capacity = file.params().sym_node_capacity();
        file.with_entry(addr, |file, node: &mut SymbolNode| {
            let idx = match self.search(file, &node.entries, &udata.name)? {
                Ok(_) => return Err(GroupError::AlreadyExists(udata.name.clone())),
                Err(idx) => idx,
            };
            let mut entry = udata
                .entry
                .ok_or_else(|| GroupError::NothingToInsert(udata.name.clone()))?;
            entry.name_off = heap::insert_str(file, self.heap, &udata.name)?;
            entry.dirty = true;
            udata.entry = Some(entry);

            if node.entries.len() < capacity {
                node.entries.insert(idx, entry);
                let right_key = (idx + 1 == node.entries.len()).then_some(entry.name_off);
                return Ok((InsertOutcome::Done { right_key }, Release::Dirty));
            }

            // Full: entries [K, 2K) move to a new right sibling.
            let mut upper = node.entries.split_off(k);
            let right_key = if idx <= k {
                node.entries.insert(idx, entry);
                None
            } else {
                upper.insert(idx - k, entry);
                (idx - k + 1 == upper.len()).then_some(entry.name_off)
            };
            let middle = node.entries[node.entries.len() - 1].name_off;
            let right_addr = Self::new_node(file, upper)?;
            debug!(%addr, %right_addr, name = %udata.name, "split symbol node");
            Ok((
                InsertOutcome::Split {
                    middle,
                    right_addr,
                    right_key,
                },
                Release::Dirty,
            ))
        })
    }

    fn remove(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        _left: &HeapOffset,
        _right: &HeapOffset,
        udata: &mut NameOp,
    ) -> GroupResult<RemoveOutcome<HeapOffset>> {
        file.with_entry(addr, |file, node: &mut SymbolNode| {
            let idx = self
                .search(file, &node.entries, &udata.name)?
                .map_err(|_| GroupError::NotFound(udata.name.clone()))?;
            let entry = node.entries[idx];
            match entry.cache {
                EntryCache::SymLink { link_off } => {
                    // A missing link value has nothing left to free.
                    match heap::remove_str(file, self.heap, link_off) {
                        Ok(()) => {}
                        Err(HeapError::Store(err)) => return Err(err.into()),
                        Err(err) => warn!(name = %udata.name, %link_off, %err, "could not free link value"),
                    }
                }
                _ if udata.adjust_links => udata.released.push(entry.header),
                _ => {}
            }
            heap::remove_str(file, self.heap, entry.name_off)?;
            node.entries.remove(idx);
            udata.entry = Some(entry);

            if node.entries.is_empty() {
                debug!(%addr, name = %udata.name, "removed empty symbol node");
                return Ok((RemoveOutcome::Removed, Release::Delete));
            }
            let right_key = (idx == node.entries.len()).then(|| node.entries[idx - 1].name_off);
            Ok((RemoveOutcome::Done { right_key }, Release::Dirty))
        })
    }

    fn remove_all(&self, file: &mut ContainerFile, addr: Address, udata: &mut NameOp) -> GroupResult<()> {
        file.with_entry(addr, |_, node: &mut SymbolNode| {
            udata.released.extend(
                node.entries
                    .iter()
                    .filter(|e| !e.is_symlink())
                    .map(|e| e.header),
            );
            Ok(((), Release::Delete))
        })
    }

    fn iterate_leaf(
        &self,
        file: &mut ContainerFile,
        addr: Address,
        cursor: &mut IterCursor,
        visit: &mut dyn FnMut(Member) -> ControlFlow<()>,
    ) -> GroupResult<ControlFlow<()>> {
        let entries = file.read_entry(addr, |_, node: &SymbolNode| Ok::<_, GroupError>(node.entries.clone()))?;
        let skipped = cursor.skip.saturating_sub(cursor.index).min(entries.len());
        cursor.index += skipped;
        let rest = &entries[skipped..];
        if rest.is_empty() {
            return Ok(ControlFlow::Continue(()));
        }
        let names = file.read_entry(self.heap, |_, heap: &LocalHeap| {
            rest.iter()
                .map(|e| heap.read_str(e.name_off).map(str::to_owned))
                .collect::<Result<Vec<_>, HeapError>>()
        })?;
        // Node and heap are both back in the cache while callbacks run.
        for (name, entry) in names.into_iter().zip(rest) {
            cursor.index += 1;
            if visit(Member { name, entry: *entry }).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn not_found(&self, udata: &NameOp) -> GroupError {
        GroupError::NotFound(udata.name.clone())
    }
}

/// Totals produced by [`SymbolTable::validate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableStats {
    pub nodes: usize,
    pub entries: usize,
}

/// A group's member table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolTable {
    pub btree: Address,
    pub heap: Address,
}

impl From<SymbolTableMessage> for SymbolTable {
    fn from(msg: SymbolTableMessage) -> Self {
        Self {
            btree: msg.btree,
            heap: msg.heap,
        }
    }
}

impl SymbolTable {
    /// Create an empty table: a heap holding only the empty string and a
    /// B-tree with no nodes.
    pub fn create(file: &mut ContainerFile) -> GroupResult<Self> {
        let heap = LocalHeap::create(file, file.heap_initial_size())?;
        let class = SymbolTableClass { heap };
        let btree = btree::create(&class, file)?;
        debug!(%btree, %heap, "created symbol table");
        Ok(Self { btree, heap })
    }

    pub fn message(&self) -> SymbolTableMessage {
        SymbolTableMessage {
            btree: self.btree,
            heap: self.heap,
        }
    }

    /// The cache an entry pointing at this table's group should carry.
    pub fn entry_cache(&self) -> EntryCache {
        EntryCache::Group {
            btree: self.btree,
            heap: self.heap,
        }
    }

    fn class(&self) -> SymbolTableClass {
        SymbolTableClass { heap: self.heap }
    }

    pub fn find(&self, file: &mut ContainerFile, name: &str) -> GroupResult<Option<SymbolEntry>> {
        let mut op = NameOp::new(name);
        let found = btree::find(&self.class(), file, self.btree, &mut op)?;
        Ok(if found { op.entry } else { None })
    }

    /// Insert `entry` under `name`. Returns the stored entry.
    pub fn insert(
        &self,
        file: &mut ContainerFile,
        name: &str,
        entry: SymbolEntry,
    ) -> GroupResult<SymbolEntry> {
        let mut op = NameOp::new(name);
        op.entry = Some(entry);
        btree::insert(&self.class(), file, self.btree, &mut op)?;
        trace!(name, header = %entry.header, "inserted symbol entry");
        op.entry
            .ok_or_else(|| GroupError::InconsistentState(format!("insert of {name} lost its entry")))
    }

    /// Store `target` in the heap and insert a symbolic link to it. The
    /// value is freed again if the name is taken.
    pub fn insert_symlink(
        &self,
        file: &mut ContainerFile,
        name: &str,
        target: &str,
    ) -> GroupResult<SymbolEntry> {
        let link_off = heap::insert_str(file, self.heap, target)?;
        match self.insert(file, name, SymbolEntry::soft(link_off)) {
            Ok(entry) => Ok(entry),
            Err(err) => {
                if let Err(cleanup) = heap::remove_str(file, self.heap, link_off) {
                    warn!(name, %cleanup, "could not free unused link value");
                }
                Err(err)
            }
        }
    }

    /// Remove `name`. With `adjust_links`, the hard-linked header is returned
    /// in `released` for the caller to decrement.
    pub fn remove(
        &self,
        file: &mut ContainerFile,
        name: &str,
        adjust_links: bool,
    ) -> GroupResult<(SymbolEntry, Vec<Address>)> {
        let mut op = NameOp::new(name);
        op.adjust_links = adjust_links;
        btree::remove(&self.class(), file, self.btree, &mut op)?;
        let entry = op
            .entry
            .ok_or_else(|| GroupError::InconsistentState(format!("remove of {name} lost its entry")))?;
        trace!(name, header = %entry.header, "removed symbol entry");
        Ok((entry, op.released))
    }

    /// Replace the cache of `name`'s entry. Returns whether it exists.
    pub fn update_cache(
        &self,
        file: &mut ContainerFile,
        name: &str,
        cache: EntryCache,
    ) -> GroupResult<bool> {
        let mut op = NameOp::new(name);
        op.refresh = Some(cache);
        btree::find(&self.class(), file, self.btree, &mut op)
    }

    /// Visit members in name order, starting after `skip` of them. Returns
    /// how the walk ended and the index reached.
    pub fn iterate(
        &self,
        file: &mut ContainerFile,
        skip: usize,
        mut visit: impl FnMut(&Member) -> ControlFlow<()>,
    ) -> GroupResult<(ControlFlow<()>, usize)> {
        let mut cursor = IterCursor::new(skip);
        let flow = btree::iterate(
            &self.class(),
            file,
            self.btree,
            &mut cursor,
            &mut |member: Member| visit(&member),
        )?;
        Ok((flow, cursor.index))
    }

    pub fn count(&self, file: &mut ContainerFile) -> GroupResult<usize> {
        let (_, count) = self.iterate(file, 0, |_| ControlFlow::Continue(()))?;
        Ok(count)
    }

    pub fn members(&self, file: &mut ContainerFile) -> GroupResult<Vec<Member>> {
        let mut out = Vec::new();
        self.iterate(file, 0, |m| {
            out.push(m.clone());
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    pub fn read_name(&self, file: &mut ContainerFile, offset: HeapOffset) -> GroupResult<String> {
        Ok(heap::read_string(file, self.heap, offset)?)
    }

    /// Free the whole table. Returns the headers of every hard-linked member,
    /// each of which has lost one link.
    pub fn delete(&self, file: &mut ContainerFile) -> GroupResult<Vec<Address>> {
        let mut op = NameOp::new("");
        op.adjust_links = true;
        btree::delete(&self.class(), file, self.btree, &mut op)?;
        LocalHeap::delete(file, self.heap)?;
        debug!(btree = %self.btree, heap = %self.heap, released = op.released.len(), "deleted symbol table");
        Ok(op.released)
    }

    /// Check every node: non-empty, within capacity, strictly sorted, and
    /// bounded by its B-tree keys.
    pub fn validate(&self, file: &mut ContainerFile) -> GroupResult<TableStats> {
        let capacity = file.params().sym_node_capacity();
        let leaves = btree::leaves(&self.class(), file, self.btree)?;
        let mut stats = TableStats::default();
        for leaf in leaves {
            let entries = file.read_entry(leaf.addr, |_, node: &SymbolNode| {
                Ok::<_, GroupError>(node.entries.clone())
            })?;
            if entries.is_empty() || entries.len() > capacity {
                return Err(GroupError::corrupt(
                    leaf.addr,
                    format!("{} entries outside 1..={capacity}", entries.len()),
                ));
            }
            let last = entries[entries.len() - 1].name_off;
            if last != leaf.right {
                return Err(GroupError::corrupt(
                    leaf.addr,
                    format!("right key {} is not last entry {}", leaf.right, last),
                ));
            }
            let left = self.read_name(file, leaf.left)?;
            let mut prev = left;
            for entry in &entries {
                let name = self.read_name(file, entry.name_off)?;
                if name <= prev {
                    return Err(GroupError::corrupt(
                        leaf.addr,
                        format!("{name:?} is not after {prev:?}"),
                    ));
                }
                prev = name;
            }
            stats.nodes += 1;
            stats.entries += entries.len();
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_store::{ContainerConfig, MemoryDevice};
    use hcf_types::FormatParams;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn container(k: u16) -> ContainerFile {
        let config = ContainerConfig {
            format: FormatParams {
                sym_leaf_k: k,
                btree_k: 2,
                ..FormatParams::default()
            },
            ..ContainerConfig::default()
        };
        ContainerFile::create(Box::new(MemoryDevice::new()), &config).unwrap()
    }

    fn names(table: &SymbolTable, file: &mut ContainerFile) -> Vec<String> {
        table
            .members(file)
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect()
    }

    fn leaf_sizes(table: &SymbolTable, file: &mut ContainerFile) -> Vec<usize> {
        btree::leaves(&table.class(), file, table.btree)
            .unwrap()
            .into_iter()
            .map(|leaf| {
                file.read_entry(leaf.addr, |_, node: &SymbolNode| {
                    Ok::<_, GroupError>(node.entries.len())
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn fifth_name_splits_once() {
        let mut file = container(2);
        let table = SymbolTable::create(&mut file).unwrap();
        let mut addrs = BTreeMap::new();
        for (i, name) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
            let header = Address::new(0x1000 + i as u64 * 0x100);
            table
                .insert(&mut file, name, SymbolEntry::hard(header, EntryCache::Nothing))
                .unwrap();
            addrs.insert(name.to_string(), header);
        }
        assert_eq!(table.validate(&mut file).unwrap().nodes, 1);

        let header = Address::new(0x2000);
        table
            .insert(&mut file, "epsilon", SymbolEntry::hard(header, EntryCache::Nothing))
            .unwrap();
        addrs.insert("epsilon".into(), header);

        let stats = table.validate(&mut file).unwrap();
        assert_eq!(stats, TableStats { nodes: 2, entries: 5 });
        let mut sizes = leaf_sizes(&table, &mut file);
        sizes.sort_unstable();
        assert_eq!(sizes, vec![2, 3]);
        for (name, header) in &addrs {
            let entry = table.find(&mut file, name).unwrap().unwrap();
            assert_eq!(entry.header, *header, "{name}");
        }
        assert_eq!(
            names(&table, &mut file),
            vec!["alpha", "beta", "delta", "epsilon", "gamma"]
        );
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut file = container(2);
        let table = SymbolTable::create(&mut file).unwrap();
        let entry = SymbolEntry::hard(Address::new(0x500), EntryCache::Nothing);
        table.insert(&mut file, "x", entry).unwrap();
        let err = table.insert(&mut file, "x", entry).unwrap_err();
        assert!(matches!(err, GroupError::AlreadyExists(ref n) if n == "x"));
        assert_eq!(table.count(&mut file).unwrap(), 1);
    }

    #[test]
    fn remove_reports_hard_links_and_frees_empty_nodes() {
        let mut file = container(2);
        let table = SymbolTable::create(&mut file).unwrap();
        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            table
                .insert(
                    &mut file,
                    name,
                    SymbolEntry::hard(Address::new(0x1000 + i as u64), EntryCache::Nothing),
                )
                .unwrap();
        }
        table.insert_symlink(&mut file, "link", "/a").unwrap();

        let (entry, released) = table.remove(&mut file, "c", true).unwrap();
        assert_eq!(entry.header, Address::new(0x1002));
        assert_eq!(released, vec![Address::new(0x1002)]);

        let (entry, released) = table.remove(&mut file, "link", true).unwrap();
        assert!(entry.is_symlink());
        assert!(released.is_empty());

        let (_, released) = table.remove(&mut file, "d", false).unwrap();
        assert!(released.is_empty());

        for name in ["a", "b", "e"] {
            table.remove(&mut file, name, true).unwrap();
            table.validate(&mut file).unwrap();
        }
        assert_eq!(table.validate(&mut file).unwrap(), TableStats::default());
        assert!(matches!(
            table.remove(&mut file, "a", true),
            Err(GroupError::NotFound(_))
        ));
    }

    #[test]
    fn symlink_value_round_trips() {
        let mut file = container(4);
        let table = SymbolTable::create(&mut file).unwrap();
        let entry = table.insert_symlink(&mut file, "soft", "../target/path").unwrap();
        let EntryCache::SymLink { link_off } = entry.cache else {
            panic!("expected a symlink, got {:?}", entry.cache);
        };
        assert_eq!(table.read_name(&mut file, link_off).unwrap(), "../target/path");
        assert_eq!(table.find(&mut file, "soft").unwrap(), Some(entry));
    }

    #[test]
    fn update_cache_rewrites_entry() {
        let mut file = container(4);
        let table = SymbolTable::create(&mut file).unwrap();
        table
            .insert(&mut file, "g", SymbolEntry::hard(Address::new(0x900), EntryCache::Nothing))
            .unwrap();
        let cache = EntryCache::Group {
            btree: Address::new(0xa00),
            heap: Address::new(0xb00),
        };
        assert!(table.update_cache(&mut file, "g", cache).unwrap());
        assert!(!table.update_cache(&mut file, "h", cache).unwrap());
        assert_eq!(table.find(&mut file, "g").unwrap().unwrap().cache, cache);
    }

    #[test]
    fn iterate_skip_and_break() {
        let mut file = container(2);
        let table = SymbolTable::create(&mut file).unwrap();
        for name in ["n1", "n2", "n3", "n4", "n5", "n6", "n7"] {
            table
                .insert(&mut file, name, SymbolEntry::hard(Address::new(0x700), EntryCache::Nothing))
                .unwrap();
        }
        let mut seen = Vec::new();
        let (flow, index) = table
            .iterate(&mut file, 3, |m| {
                seen.push(m.name.clone());
                if m.name == "n5" {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert!(flow.is_break());
        assert_eq!(seen, vec!["n4", "n5"]);
        assert_eq!(index, 5);

        let (_, index) = table.iterate(&mut file, 10, |_| ControlFlow::Continue(())).unwrap();
        assert_eq!(index, 7);
    }

    #[test]
    fn delete_releases_every_hard_link() {
        let mut file = container(2);
        let before = file.allocator().eoa();
        let table = SymbolTable::create(&mut file).unwrap();
        for i in 0..9u64 {
            table
                .insert(
                    &mut file,
                    &format!("m{i}"),
                    SymbolEntry::hard(Address::new(0x4000 + i), EntryCache::Nothing),
                )
                .unwrap();
        }
        table.insert_symlink(&mut file, "s", "m0").unwrap();
        let mut released = table.delete(&mut file).unwrap();
        released.sort();
        assert_eq!(released, (0..9).map(|i| Address::new(0x4000 + i)).collect::<Vec<_>>());
        assert_eq!(file.allocator().eoa(), before);
    }

    #[test]
    fn reopen_preserves_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.hcf");
        let config = ContainerConfig {
            format: FormatParams {
                sym_leaf_k: 2,
                ..FormatParams::default()
            },
            ..ContainerConfig::default()
        };
        let device = hcf_store::FileDevice::create(&path).unwrap();
        let mut file = ContainerFile::create(Box::new(device), &config).unwrap();
        let table = SymbolTable::create(&mut file).unwrap();
        for i in 0..20u64 {
            table
                .insert(
                    &mut file,
                    &format!("item-{i:02}"),
                    SymbolEntry::hard(Address::new(0x8000 + i), EntryCache::Nothing),
                )
                .unwrap();
        }
        file.close().unwrap();

        let device = hcf_store::FileDevice::open(&path).unwrap();
        let mut file = ContainerFile::open(Box::new(device), &config).unwrap();
        let stats = table.validate(&mut file).unwrap();
        assert_eq!(stats.entries, 20);
        let entry = table.find(&mut file, "item-13").unwrap().unwrap();
        assert_eq!(entry.header, Address::new(0x8000 + 13));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn nodes_stay_sorted_and_bounded(ops in prop::collection::vec((any::<bool>(), 0u8..40), 1..100)) {
            let mut file = container(2);
            let table = SymbolTable::create(&mut file).unwrap();
            let mut model: BTreeMap<String, Address> = BTreeMap::new();
            for (insert, n) in ops {
                let name = format!("k{n:02}");
                if insert {
                    let header = Address::new(0x10_000 + n as u64);
                    let res = table.insert(&mut file, &name, SymbolEntry::hard(header, EntryCache::Nothing));
                    prop_assert_eq!(res.is_ok(), model.insert(name, header).is_none());
                } else {
                    let res = table.remove(&mut file, &name, true);
                    prop_assert_eq!(res.is_ok(), model.remove(&name).is_some());
                }
                let stats = table.validate(&mut file).unwrap();
                prop_assert_eq!(stats.entries, model.len());
            }
            prop_assert_eq!(names(&table, &mut file), model.keys().cloned().collect::<Vec<_>>());
            for (name, header) in &model {
                prop_assert_eq!(table.find(&mut file, name).unwrap().map(|e| e.header), Some(*header));
            }
        }

        #[test]
        fn split_nodes_hold_at_least_k(
            k in 2u16..5,
            keys in prop::collection::btree_set(0u16..500, 1..120),
            seed in any::<u64>(),
        ) {
            let mut file = container(k);
            let table = SymbolTable::create(&mut file).unwrap();
            let mut keys: Vec<u16> = keys.into_iter().collect();
            // Deterministic shuffle so inserts arrive out of order.
            let len = keys.len();
            for i in (1..len).rev() {
                let j = (seed.rotate_left(i as u32) as usize ^ i.wrapping_mul(31)) % (i + 1);
                keys.swap(i, j);
            }
            for n in keys {
                let header = Address::new(0x10_000 + n as u64);
                table
                    .insert(&mut file, &format!("n{n:03}"), SymbolEntry::hard(header, EntryCache::Nothing))
                    .unwrap();
                let sizes = leaf_sizes(&table, &mut file);
                if sizes.len() > 1 {
                    for size in &sizes {
                        prop_assert!(*size >= k as usize && *size <= 2 * k as usize, "{sizes:?}");
                    }
                }
            }
        }
    }
}
