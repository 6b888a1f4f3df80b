//! The object namespace over one or more open container files.
//!
//! A [`Namespace`] owns its files, every open handle, and the mount table.
//! Operations take a handle as their starting point and a path relative to
//! it (or absolute, starting at the top of the mount hierarchy).
//!
//! Hard links count toward an object's link count. An object whose count
//! drops to zero is deleted at once if nothing has it open, otherwise when
//! its last handle closes. Deleting a group releases each of its hard-linked
//! members in turn.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::ops::ControlFlow;

use serde::Serialize;
use tracing::{debug, info, trace};

use hcf_object::{ObjectHeader, ObjectKind, OpenObjects};
use hcf_store::{BlockDevice, ContainerFile};
use hcf_types::Address;

use crate::config::NamespaceConfig;
use crate::entry::{EntryCache, SymbolEntry};
use crate::error::{GroupError, GroupResult};
use crate::handle::{Handle, HandleId, HandleKind, HandleTable, Location, SharedGroups};
use crate::mount::{MountRecord, MountTable};
use crate::names::{is_component_prefix, split_last, NameChange, NamePaths};
use crate::resolve::{Action, Flags, InsertEntry, Resolved, Start};
use crate::stab::{Member, SymbolTable};

/// Identifier of a file attached to a namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FileId(u64);

impl FileId {
    pub(crate) fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

pub(crate) struct FileState {
    pub container: ContainerFile,
    pub open: OpenObjects,
    pub shared: SharedGroups,
    pub root: Address,
}

/// What a name refers to, as reported by [`Namespace::get_objinfo`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjType {
    Group,
    Dataset,
    NamedDatatype,
    SymbolicLink,
}

impl From<ObjectKind> for ObjType {
    fn from(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Group => ObjType::Group,
            ObjectKind::Dataset => ObjType::Dataset,
            ObjectKind::NamedDatatype => ObjType::NamedDatatype,
        }
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjType::Group => "group",
            ObjType::Dataset => "dataset",
            ObjType::NamedDatatype => "named datatype",
            ObjType::SymbolicLink => "symbolic link",
        };
        f.write_str(name)
    }
}

/// Status of one name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ObjInfo {
    pub kind: ObjType,
    pub file: FileId,
    /// Undefined for a symbolic link.
    pub header: Address,
    pub link_count: u32,
    /// Byte length of a symbolic link's value; zero otherwise.
    pub link_len: usize,
    /// Whether another file is mounted on this group.
    pub mounted: bool,
}

/// Totals gathered by [`Namespace::validate`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub groups: usize,
    pub objects: usize,
    pub symlinks: usize,
    pub nodes: usize,
    pub entries: usize,
}

/// Open files, handles and mounts.
pub struct Namespace {
    config: NamespaceConfig,
    files: BTreeMap<FileId, FileState>,
    next_file: u64,
    pub(crate) handles: HandleTable,
    pub(crate) mounts: MountTable,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("files", &self.files.keys().collect::<Vec<_>>())
            .field("handles", &self.handles.len())
            .field("mounts", &self.mounts.len())
            .finish()
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(NamespaceConfig::default())
    }
}

impl Namespace {
    pub fn new(config: NamespaceConfig) -> Self {
        Self {
            config,
            files: BTreeMap::new(),
            next_file: 0,
            handles: HandleTable::new(),
            mounts: MountTable::new(),
        }
    }

    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    pub(crate) fn file_state(&self, file: FileId) -> GroupResult<&FileState> {
        self.files.get(&file).ok_or(GroupError::InvalidFile(file))
    }

    pub(crate) fn file_state_mut(&mut self, file: FileId) -> GroupResult<&mut FileState> {
        self.files.get_mut(&file).ok_or(GroupError::InvalidFile(file))
    }

    /// Direct access to a file's container.
    pub fn container(&mut self, file: FileId) -> GroupResult<&mut ContainerFile> {
        Ok(&mut self.file_state_mut(file)?.container)
    }

    pub fn files(&self) -> impl Iterator<Item = FileId> + '_ {
        self.files.keys().copied()
    }

    pub fn handle(&self, id: HandleId) -> GroupResult<&Handle> {
        self.handles.get(id)
    }

    /// Handles opened by callers.
    pub fn open_handles(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.internal).count()
    }

    fn hops(&self) -> u32 {
        self.config.max_symlink_hops
    }

    // ---- files ----

    /// Create a container on `device` with an empty root group.
    pub fn create_file(&mut self, device: Box<dyn BlockDevice>) -> GroupResult<FileId> {
        let mut container = ContainerFile::create(device, &self.config.container)?;
        let table = SymbolTable::create(&mut container)?;
        let root = ObjectHeader::create(&mut container, ObjectKind::Group, Some(table.message()))?;
        ObjectHeader::link_adjust(&mut container, root, 1)?;
        container.set_root(root);
        container.flush()?;
        self.attach(container)
    }

    pub fn open_file(&mut self, device: Box<dyn BlockDevice>) -> GroupResult<FileId> {
        let container = ContainerFile::open(device, &self.config.container)?;
        self.attach(container)
    }

    /// Add an already open container.
    pub fn attach(&mut self, mut container: ContainerFile) -> GroupResult<FileId> {
        let root = container.root();
        if !root.is_defined() {
            return Err(GroupError::InconsistentState(
                "container has no root group".into(),
            ));
        }
        let info = ObjectHeader::read(&mut container, root)?;
        if info.kind != ObjectKind::Group {
            return Err(GroupError::NotAGroup("/".into()));
        }
        let mut open = OpenObjects::new();
        open.open(root, ObjectKind::Group)?;
        self.next_file += 1;
        let id = FileId(self.next_file);
        self.files.insert(
            id,
            FileState {
                container,
                open,
                shared: SharedGroups::new(root),
                root,
            },
        );
        info!(file = %id, %root, "attached container");
        Ok(id)
    }

    pub fn flush_file(&mut self, file: FileId) -> GroupResult<()> {
        self.container(file)?.flush()?;
        Ok(())
    }

    /// Close a file that nothing refers to any more and hand back its device.
    pub fn close_file(&mut self, file: FileId) -> GroupResult<Box<dyn BlockDevice>> {
        self.file_state(file)?;
        let busy = |reason: String| GroupError::FileBusy { file, reason };
        let handles = self.handles.count_in(file);
        if self.mounts.record(file).is_some() {
            return Err(busy("mounted on another file".into()));
        }
        if self.mounts.has_children(file) {
            return Err(busy("other files are mounted on it".into()));
        }
        if handles > 0 {
            return Err(busy(format!("{handles} open handles")));
        }
        let mut state = self
            .files
            .remove(&file)
            .ok_or(GroupError::InvalidFile(file))?;
        state.open.close(state.root)?;
        let device = state.container.close()?;
        info!(%file, "closed container");
        Ok(device)
    }

    // ---- handles ----

    fn open_handle(
        &mut self,
        loc: Location,
        kind: ObjectKind,
        paths: NamePaths,
        internal: bool,
    ) -> GroupResult<HandleId> {
        let state = self.file_state_mut(loc.file)?;
        state.open.open(loc.header, kind)?;
        if kind == ObjectKind::Group {
            state.shared.acquire(loc.header);
        }
        Ok(self.handles.insert(Handle {
            kind: kind.into(),
            loc,
            object_kind: kind,
            paths,
            attr_name: None,
            internal,
        }))
    }

    /// The user path of a file's root: `/` at the top, or wherever it is
    /// mounted.
    fn root_user_path(&self, file: FileId) -> Option<String> {
        match self.mounts.record(file) {
            None => Some("/".to_owned()),
            Some(record) => self
                .handles
                .get(record.holder)
                .ok()
                .and_then(|h| h.paths.user().map(str::to_owned)),
        }
    }

    pub fn open_root(&mut self, file: FileId) -> GroupResult<HandleId> {
        let root = self.file_state(file)?.root;
        let user = self.root_user_path(file);
        let paths = NamePaths::new(user.as_deref(), Some("/"));
        self.open_handle(
            Location { file, header: root },
            ObjectKind::Group,
            paths,
            false,
        )
    }

    fn object_kind(&mut self, loc: Location, path: &str) -> GroupResult<ObjectKind> {
        if !loc.header.is_defined() {
            return Err(GroupError::NotFound(path.to_owned()));
        }
        let state = self.file_state_mut(loc.file)?;
        Ok(ObjectHeader::read(&mut state.container, loc.header)?.kind)
    }

    fn open_resolved(&mut self, res: Resolved, kind: ObjectKind) -> GroupResult<HandleId> {
        let paths = NamePaths::new(res.user.as_deref(), res.canonical.as_deref());
        self.open_handle(res.object, kind, paths, false)
    }

    pub fn open_group(&mut self, at: HandleId, path: &str) -> GroupResult<HandleId> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::default(), &mut hops)?;
        if self.object_kind(res.object, path)? != ObjectKind::Group {
            return Err(GroupError::NotAGroup(path.to_owned()));
        }
        self.open_resolved(res, ObjectKind::Group)
    }

    /// Open whatever `path` names.
    pub fn open_object(&mut self, at: HandleId, path: &str) -> GroupResult<HandleId> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::default(), &mut hops)?;
        let kind = self.object_kind(res.object, path)?;
        self.open_resolved(res, kind)
    }

    pub fn create_group(&mut self, at: HandleId, path: &str) -> GroupResult<HandleId> {
        self.create_object(at, path, ObjectKind::Group)
    }

    /// Create an object header of `kind` and link it as `path`.
    pub fn create_object(
        &mut self,
        at: HandleId,
        path: &str,
        kind: ObjectKind,
    ) -> GroupResult<HandleId> {
        let (parent_path, Some(last)) = split_last(path) else {
            return Err(GroupError::NothingToInsert(path.to_owned()));
        };
        let mut hops = self.hops();
        let parent = self.namei(
            self.start(at)?,
            &parent_path,
            Action::Traverse,
            Flags::default(),
            &mut hops,
        )?;
        let file = parent.object.file;

        let (header, cache) = {
            let container = &mut self.file_state_mut(file)?.container;
            match kind {
                ObjectKind::Group => {
                    let table = SymbolTable::create(container)?;
                    let header = ObjectHeader::create(container, kind, Some(table.message()))?;
                    (header, table.entry_cache())
                }
                _ => (
                    ObjectHeader::create(container, kind, None)?,
                    EntryCache::Nothing,
                ),
            }
        };
        let insert = Action::Insert(InsertEntry::Hard {
            file,
            header,
            cache,
        });
        let res = match self.namei(parent.into_start(), last, insert, Flags::default(), &mut hops) {
            Ok(res) => res,
            Err(err) => {
                let state = self.file_state_mut(file)?;
                Self::destroy_object(state, header)?;
                return Err(err);
            }
        };
        ObjectHeader::link_adjust(&mut self.file_state_mut(file)?.container, header, 1)?;
        debug!(%file, %header, %kind, path, "created object");
        let paths = NamePaths::new(res.user.as_deref(), res.canonical.as_deref());
        self.open_handle(Location { file, header }, kind, paths, false)
    }

    /// Open an attribute of the object behind `owner`. The handle keeps the
    /// owner open and shares its paths.
    pub fn open_attribute(&mut self, owner: HandleId, name: &str) -> GroupResult<HandleId> {
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(GroupError::InvalidName(name.to_owned()));
        }
        let owner = self.handles.get(owner)?.clone();
        let state = self.file_state_mut(owner.loc.file)?;
        state.open.open(owner.loc.header, owner.object_kind)?;
        Ok(self.handles.insert(Handle {
            kind: HandleKind::Attribute,
            loc: owner.loc,
            object_kind: owner.object_kind,
            paths: owner.paths,
            attr_name: Some(name.to_owned()),
            internal: false,
        }))
    }

    /// Close a handle. An object that lost its last link is deleted once its
    /// last handle closes.
    pub fn close(&mut self, id: HandleId) -> GroupResult<()> {
        if self.handles.get(id)?.internal {
            return Err(GroupError::InvalidHandle(id));
        }
        self.release_handle(id)
    }

    fn release_handle(&mut self, id: HandleId) -> GroupResult<()> {
        let handle = self.handles.remove(id)?;
        let Location { file, header } = handle.loc;
        let state = self.file_state_mut(file)?;
        if handle.kind == HandleKind::Group && state.shared.release(header) {
            trace!(%file, %header, "released shared group state");
        }
        let remaining = state.open.close(header)?;
        if remaining > 0 || header == state.root {
            return Ok(());
        }
        if ObjectHeader::read(&mut state.container, header)?.link_count == 0 {
            debug!(%file, %header, "deleting unlinked object on last close");
            self.delete_object(file, header)?;
        }
        Ok(())
    }

    // ---- object lifetime ----

    /// Free an object and its member table. Returns the members that lost a
    /// link.
    fn destroy_object(state: &mut FileState, header: Address) -> GroupResult<Vec<Address>> {
        let info = ObjectHeader::read(&mut state.container, header)?;
        let released = match info.stab {
            Some(stab) => SymbolTable::from(stab).delete(&mut state.container)?,
            None => Vec::new(),
        };
        ObjectHeader::delete(&mut state.container, header)?;
        debug!(%header, kind = %info.kind, released = released.len(), "deleted object");
        Ok(released)
    }

    fn delete_object(&mut self, file: FileId, header: Address) -> GroupResult<()> {
        let released = Self::destroy_object(self.file_state_mut(file)?, header)?;
        self.release_links(file, released)
    }

    /// Drop one link from each header, deleting any that reach zero and are
    /// not open.
    fn release_links(&mut self, file: FileId, mut work: Vec<Address>) -> GroupResult<()> {
        let state = self.file_state_mut(file)?;
        while let Some(header) = work.pop() {
            let count = ObjectHeader::link_adjust(&mut state.container, header, -1)?;
            if count == 0 && !state.open.is_open(header) {
                work.extend(Self::destroy_object(state, header)?);
            }
        }
        Ok(())
    }

    // ---- links ----

    /// Add `new_path` as another hard link to the object at `cur_path`.
    pub fn link_hard(
        &mut self,
        cur_at: HandleId,
        cur_path: &str,
        new_at: HandleId,
        new_path: &str,
    ) -> GroupResult<()> {
        let mut hops = self.hops();
        let target = self.namei(
            self.start(cur_at)?,
            cur_path,
            Action::Traverse,
            Flags::default(),
            &mut hops,
        )?;
        let Location { file, header } = target.object;
        if !header.is_defined() {
            return Err(GroupError::NotFound(cur_path.to_owned()));
        }
        ObjectHeader::link_adjust(&mut self.file_state_mut(file)?.container, header, 1)?;
        let insert = Action::Insert(InsertEntry::Hard {
            file,
            header,
            cache: EntryCache::Nothing,
        });
        let mut hops = self.hops();
        if let Err(err) = self.namei(self.start(new_at)?, new_path, insert, Flags::default(), &mut hops) {
            ObjectHeader::link_adjust(&mut self.file_state_mut(file)?.container, header, -1)?;
            return Err(err);
        }
        debug!(%file, %header, from = cur_path, to = new_path, "linked");
        Ok(())
    }

    /// Add `new_path` as a symbolic link whose value is `target`. The target
    /// need not exist.
    pub fn link_soft(&mut self, target: &str, at: HandleId, new_path: &str) -> GroupResult<()> {
        if target.is_empty() {
            return Err(GroupError::InvalidName(target.to_owned()));
        }
        let mut hops = self.hops();
        let insert = Action::Insert(InsertEntry::Soft { target });
        self.namei(self.start(at)?, new_path, insert, Flags::default(), &mut hops)?;
        debug!(target, link = new_path, "created symbolic link");
        Ok(())
    }

    /// Remove a name. The last component is neither followed nor crossed.
    pub fn unlink(&mut self, at: HandleId, path: &str) -> GroupResult<()> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::TERMINAL, &mut hops)?;
        let group = res.require_group(path)?;
        let file = group.loc.file;
        if self.mounts.child_at(file, res.object.header).is_some() {
            return Err(GroupError::MountBusy(path.to_owned()));
        }
        let (entry, released) = {
            let state = self.file_state_mut(file)?;
            group.table.remove(&mut state.container, &res.name, true)?
        };
        debug!(%file, path, symlink = entry.is_symlink(), "unlinked");

        let canonical = res
            .canonical
            .as_deref()
            .filter(|_| !entry.is_symlink())
            .map(|path| (file, NameChange::Unlink { path }));
        let user = res.user.as_deref().map(|path| NameChange::Unlink { path });
        let top = self.mounts.top(file);
        let mounts = &self.mounts;
        self.handles
            .apply(user, canonical, |h| mounts.top(h.loc.file) == top);
        self.release_links(file, released)
    }

    /// Rename a link. A hard link is linked at the destination and then
    /// removed from the source; a symbolic link is recreated and removed.
    pub fn move_link(
        &mut self,
        src_at: HandleId,
        src: &str,
        dst_at: HandleId,
        dst: &str,
    ) -> GroupResult<()> {
        let mut hops = self.hops();
        let sres = self.namei(self.start(src_at)?, src, Action::Traverse, Flags::TERMINAL, &mut hops)?;
        let sgroup = sres.require_group(src)?;
        let file = sgroup.loc.file;
        let entry = sres
            .entry
            .ok_or_else(|| GroupError::NoContainingGroup(src.to_owned()))?;
        let dst_start = self.start(dst_at)?;

        let dres = match entry.cache {
            EntryCache::SymLink { link_off } => {
                let value = {
                    let state = self.file_state_mut(file)?;
                    sgroup.table.read_name(&mut state.container, link_off)?
                };
                let insert = Action::Insert(InsertEntry::Soft { target: &value });
                let mut hops = self.hops();
                self.namei(dst_start, dst, insert, Flags::default(), &mut hops)?
            }
            _ => {
                if self.mounts.child_at(file, entry.header).is_some() {
                    return Err(GroupError::MountBusy(src.to_owned()));
                }
                self.check_not_into_self(&sres, dst_start.clone(), dst)?;
                ObjectHeader::link_adjust(&mut self.file_state_mut(file)?.container, entry.header, 1)?;
                let insert = Action::Insert(InsertEntry::Hard {
                    file,
                    header: entry.header,
                    cache: entry.cache,
                });
                let mut hops = self.hops();
                match self.namei(dst_start, dst, insert, Flags::default(), &mut hops) {
                    Ok(dres) => dres,
                    Err(err) => {
                        let state = self.file_state_mut(file)?;
                        ObjectHeader::link_adjust(&mut state.container, entry.header, -1)?;
                        return Err(err);
                    }
                }
            }
        };

        let released = {
            let state = self.file_state_mut(file)?;
            let (_, released) = sgroup.table.remove(&mut state.container, &sres.name, true)?;
            released
        };
        self.release_links(file, released)?;
        debug!(%file, from = src, to = dst, "moved link");

        // Names through a symbolic link moved into another hierarchy are
        // released.
        let top = self.mounts.top(file);
        let dst_file = dres.group.map_or(dres.object.file, |g| g.loc.file);
        let same_tree = self.mounts.top(dst_file) == top;
        let user = match (sres.user.as_deref(), dres.user.as_deref()) {
            (Some(from), Some(to)) if same_tree => Some(NameChange::Move { from, to }),
            (Some(path), Some(_)) => Some(NameChange::Unlink { path }),
            _ => None,
        };
        let canonical = match (
            sres.canonical.as_deref(),
            dres.canonical.as_deref(),
            entry.is_symlink(),
        ) {
            (Some(from), Some(to), false) => Some((file, NameChange::Move { from, to })),
            _ => None,
        };
        let mounts = &self.mounts;
        self.handles
            .apply(user, canonical, |h| mounts.top(h.loc.file) == top);
        Ok(())
    }

    /// Refuse to move a group below itself.
    fn check_not_into_self(
        &mut self,
        src: &Resolved,
        dst_start: Start,
        dst: &str,
    ) -> GroupResult<()> {
        let (parent_path, _) = split_last(dst);
        let mut hops = self.hops();
        let parent = self.namei(dst_start, &parent_path, Action::Traverse, Flags::default(), &mut hops)?;
        let inside = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => is_component_prefix(a, b),
            _ => false,
        };
        let same_file = parent.object.file == src.object.file;
        if parent.object == src.object
            || inside(&src.user, &parent.user)
            || (same_file && inside(&src.canonical, &parent.canonical))
        {
            return Err(GroupError::MoveIntoSelf(dst.to_owned()));
        }
        Ok(())
    }

    // ---- queries ----

    /// Visit the members of the group at `path` in name order, skipping the
    /// first `skip`. Returns the index reached.
    pub fn iterate(
        &mut self,
        at: HandleId,
        path: &str,
        skip: usize,
        visit: impl FnMut(&Member) -> ControlFlow<()>,
    ) -> GroupResult<usize> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::default(), &mut hops)?;
        let table = self.group_table(res.object, path)?;
        let container = &mut self.file_state_mut(res.object.file)?.container;
        let (_, index) = table.iterate(container, skip, visit)?;
        if skip > 0 && index <= skip {
            return Err(GroupError::IndexOutOfRange { skip, count: index });
        }
        Ok(index)
    }

    /// The members of the group at `path`.
    pub fn members(&mut self, at: HandleId, path: &str) -> GroupResult<Vec<Member>> {
        let mut out = Vec::new();
        self.iterate(at, path, 0, |m| {
            out.push(m.clone());
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }

    pub fn num_objs(&mut self, at: HandleId, path: &str) -> GroupResult<usize> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::default(), &mut hops)?;
        let table = self.group_table(res.object, path)?;
        table.count(&mut self.file_state_mut(res.object.file)?.container)
    }

    /// Describe what `path` names. With `follow_link` false a symbolic link
    /// describes itself. A mount point always describes itself.
    pub fn get_objinfo(
        &mut self,
        at: HandleId,
        path: &str,
        follow_link: bool,
    ) -> GroupResult<ObjInfo> {
        let flags = Flags {
            no_follow_last: !follow_link,
            no_cross_mount_last: true,
        };
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, flags, &mut hops)?;
        let file = res.object.file;
        if let (Some(entry), Some(group)) = (res.entry, res.group) {
            if let EntryCache::SymLink { link_off } = entry.cache {
                if !follow_link {
                    let state = self.file_state_mut(group.loc.file)?;
                    let value = group.table.read_name(&mut state.container, link_off)?;
                    return Ok(ObjInfo {
                        kind: ObjType::SymbolicLink,
                        file,
                        header: Address::UNDEF,
                        link_count: 0,
                        link_len: value.len(),
                        mounted: false,
                    });
                }
            }
        }
        let state = self.file_state_mut(file)?;
        let info = ObjectHeader::read(&mut state.container, res.object.header)?;
        Ok(ObjInfo {
            kind: info.kind.into(),
            file,
            header: res.object.header,
            link_count: info.link_count,
            link_len: 0,
            mounted: state.shared.is_mount_point(res.object.header),
        })
    }

    /// The value of the symbolic link at `path`.
    pub fn get_linkval(&mut self, at: HandleId, path: &str) -> GroupResult<String> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::TERMINAL, &mut hops)?;
        let group = res.require_group(path)?;
        match res.entry.map(|e| e.cache) {
            Some(EntryCache::SymLink { link_off }) => {
                let state = self.file_state_mut(group.loc.file)?;
                group.table.read_name(&mut state.container, link_off)
            }
            _ => Err(GroupError::NotASymlink(path.to_owned())),
        }
    }

    /// The path a handle was opened by, or `None` once that name was removed
    /// or while a mount covers it.
    pub fn get_name(&self, id: HandleId) -> GroupResult<Option<String>> {
        Ok(self.handles.get(id)?.paths.user().map(str::to_owned))
    }

    /// Where a handle's object sits inside its own file.
    pub fn canonical_name(&self, id: HandleId) -> GroupResult<Option<String>> {
        Ok(self.handles.get(id)?.paths.canonical().map(str::to_owned))
    }

    // ---- mounts ----

    /// Mount `child` on the group at `path`. Names below the mount point
    /// are hidden until it is unmounted.
    pub fn mount(&mut self, at: HandleId, path: &str, child: FileId) -> GroupResult<()> {
        self.file_state(child)?;
        if self.mounts.record(child).is_some() {
            return Err(GroupError::FileBusy {
                file: child,
                reason: "already mounted".into(),
            });
        }
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::NO_CROSS, &mut hops)?;
        let point = res.object;
        if self.object_kind(point, path)? != ObjectKind::Group {
            return Err(GroupError::NotAGroup(path.to_owned()));
        }
        if self.mounts.is_ancestor(child, point.file) {
            return Err(GroupError::MountCycle(child));
        }
        if self.mounts.child_at(point.file, point.header).is_some() {
            return Err(GroupError::MountBusy(path.to_owned()));
        }

        let point_user = res.user.clone();
        let paths = NamePaths::new(res.user.as_deref(), res.canonical.as_deref());
        let holder = self.open_handle(point, ObjectKind::Group, paths, true)?;
        self.file_state_mut(point.file)?
            .shared
            .set_mount_point(point.header, true);

        let subtree: HashSet<FileId> = self.mounts.subtree(child).into_iter().collect();
        let top = self.mounts.top(point.file);
        if let Some(point_path) = point_user.as_deref() {
            let mounts = &self.mounts;
            let hidden = self.handles.apply(
                Some(NameChange::Hide { point: point_path }),
                None,
                |h| mounts.top(h.loc.file) == top,
            );
            self.handles.apply(
                Some(NameChange::Prefix { point: point_path }),
                None,
                |h| subtree.contains(&h.loc.file),
            );
            debug!(hidden, point = point_path, "hid covered names");
        }
        self.mounts.insert(MountRecord {
            parent: point.file,
            point: point.header,
            child,
            holder,
        });
        info!(parent = %point.file, point = %point.header, %child, path, "mounted");
        Ok(())
    }

    /// Undo the mount on the group at `path`.
    pub fn unmount(&mut self, at: HandleId, path: &str) -> GroupResult<()> {
        let mut hops = self.hops();
        let res = self.namei(self.start(at)?, path, Action::Traverse, Flags::NO_CROSS, &mut hops)?;
        let point = res.object;
        let child = self
            .mounts
            .child_at(point.file, point.header)
            .ok_or_else(|| GroupError::NotMounted(path.to_owned()))?;
        let record = self
            .mounts
            .remove(child)
            .ok_or_else(|| GroupError::NotMounted(path.to_owned()))?;
        let point_user = self
            .handles
            .get(record.holder)?
            .paths
            .raw_user()
            .map(|p| p.to_string());

        let subtree: HashSet<FileId> = self.mounts.subtree(child).into_iter().collect();
        let top = self.mounts.top(point.file);
        if let Some(point_path) = point_user.as_deref() {
            self.handles.apply(
                Some(NameChange::StripPrefix { point: point_path }),
                None,
                |h| subtree.contains(&h.loc.file),
            );
            let mounts = &self.mounts;
            self.handles.apply(
                Some(NameChange::Unhide { point: point_path }),
                None,
                |h| mounts.top(h.loc.file) == top,
            );
        }
        self.file_state_mut(point.file)?
            .shared
            .set_mount_point(point.header, false);
        self.release_handle(record.holder)?;
        info!(parent = %point.file, %child, path, "unmounted");
        Ok(())
    }

    // ---- checking ----

    /// Walk every group reachable from the root of `file`, checking each
    /// symbol table and that every link count matches the links found.
    pub fn validate(&mut self, file: FileId) -> GroupResult<ValidationReport> {
        let state = self.file_state_mut(file)?;
        let root = state.root;
        let container = &mut state.container;

        let mut report = ValidationReport::default();
        let mut links: HashMap<Address, u32> = HashMap::new();
        let mut seen: HashSet<Address> = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        report.objects = 1;

        while let Some(group) = queue.pop_front() {
            let stab = ObjectHeader::stab(container, group)?;
            let table = SymbolTable::from(stab);
            let stats = table.validate(container)?;
            report.groups += 1;
            report.nodes += stats.nodes;
            report.entries += stats.entries;

            for member in table.members(container)? {
                let entry: SymbolEntry = member.entry;
                if entry.is_symlink() {
                    report.symlinks += 1;
                    continue;
                }
                *links.entry(entry.header).or_default() += 1;
                let info = ObjectHeader::read(container, entry.header)?;
                if let EntryCache::Group { btree, heap } = entry.cache {
                    let cached = info.stab.map(|s| (s.btree, s.heap));
                    if cached != Some((btree, heap)) {
                        return Err(GroupError::InconsistentState(format!(
                            "entry {:?} caches a symbol table its object does not have",
                            member.name
                        )));
                    }
                }
                if seen.insert(entry.header) {
                    report.objects += 1;
                    if info.kind == ObjectKind::Group {
                        queue.push_back(entry.header);
                    }
                }
            }
        }

        for (header, found) in links.iter().map(|(h, n)| (*h, *n)) {
            let expected = found + u32::from(header == root);
            let count = ObjectHeader::read(container, header)?.link_count;
            if count != expected {
                return Err(GroupError::InconsistentState(format!(
                    "object at {header} has link count {count} but {expected} links"
                )));
            }
        }
        let root_count = ObjectHeader::read(container, root)?.link_count;
        if !links.contains_key(&root) && root_count != 1 {
            return Err(GroupError::InconsistentState(format!(
                "root group has link count {root_count}, expected 1"
            )));
        }
        debug!(%file, ?report, "validated namespace");
        Ok(report)
    }
}
