//! Path resolution.
//!
//! A path is walked one component at a time from a starting group. A leading
//! `/` restarts at the root of the top file in the mount hierarchy, empty and
//! `.` components are skipped, symbolic links are resolved relative to the
//! group holding them, and mount points are replaced by the root of the
//! mounted file. Following a link spends one hop; running out of hops is the
//! only guard against link cycles.

use tracing::trace;

use hcf_object::ObjectHeader;
use hcf_types::Address;

use crate::entry::{EntryCache, SymbolEntry};
use crate::error::{GroupError, GroupResult};
use crate::handle::{HandleId, Location};
use crate::names::{components, join};
use crate::namespace::{FileId, Namespace};
use crate::stab::SymbolTable;

/// Where a walk begins, with the paths of that place if known.
#[derive(Clone, Debug)]
pub(crate) struct Start {
    pub loc: Location,
    pub user: Option<String>,
    pub canonical: Option<String>,
}

/// What to store under the last component in insert mode.
#[derive(Clone, Copy, Debug)]
pub(crate) enum InsertEntry<'a> {
    Hard {
        file: FileId,
        header: Address,
        cache: EntryCache,
    },
    Soft {
        target: &'a str,
    },
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum Action<'a> {
    Traverse,
    Insert(InsertEntry<'a>),
}

/// Flags that apply to the last component only.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Flags {
    pub no_follow_last: bool,
    pub no_cross_mount_last: bool,
}

impl Flags {
    /// Stop at the link itself: neither follow nor cross.
    pub const TERMINAL: Flags = Flags {
        no_follow_last: true,
        no_cross_mount_last: true,
    };

    pub const NO_CROSS: Flags = Flags {
        no_follow_last: false,
        no_cross_mount_last: true,
    };
}

/// A group together with its member table.
#[derive(Clone, Copy, Debug)]
pub(crate) struct GroupRef {
    pub loc: Location,
    pub table: SymbolTable,
}

/// Outcome of a walk.
#[derive(Clone, Debug)]
pub(crate) struct Resolved {
    /// The group holding the last component; `None` when the path names the
    /// starting point.
    pub group: Option<GroupRef>,
    /// The entry reached, if the walk ended on one.
    pub entry: Option<SymbolEntry>,
    /// The object reached. The header is undefined for an unfollowed link.
    pub object: Location,
    /// The last component as written.
    pub name: String,
    pub user: Option<String>,
    pub canonical: Option<String>,
}

impl Resolved {
    pub fn into_start(self) -> Start {
        Start {
            loc: self.object,
            user: self.user,
            canonical: self.canonical,
        }
    }

    pub fn require_group(&self, path: &str) -> GroupResult<GroupRef> {
        self.group
            .ok_or_else(|| GroupError::NoContainingGroup(path.to_owned()))
    }
}

fn prefix(absolute: bool, comps: &[&str]) -> String {
    match (absolute, comps.is_empty()) {
        (true, _) => format!("/{}", comps.join("/")),
        (false, true) => ".".to_owned(),
        (false, false) => comps.join("/"),
    }
}

impl Namespace {
    /// The starting point of a handle: its location and cached paths.
    pub(crate) fn start(&self, at: HandleId) -> GroupResult<Start> {
        let handle = self.handles.get(at)?;
        Ok(Start {
            loc: handle.loc,
            user: handle.paths.user().map(str::to_owned),
            canonical: handle.paths.canonical().map(str::to_owned),
        })
    }

    /// The root of the top file of the mount hierarchy holding `file`.
    pub(crate) fn top_start(&self, file: FileId) -> GroupResult<Start> {
        let top = self.mounts.top(file);
        Ok(Start {
            loc: Location {
                file: top,
                header: self.file_state(top)?.root,
            },
            user: Some("/".to_owned()),
            canonical: Some("/".to_owned()),
        })
    }

    /// The member table of the group at `loc`.
    pub(crate) fn group_table(&mut self, loc: Location, path: &str) -> GroupResult<SymbolTable> {
        if !loc.header.is_defined() {
            return Err(GroupError::NotAGroup(path.to_owned()));
        }
        let state = self.file_state_mut(loc.file)?;
        let info = ObjectHeader::read(&mut state.container, loc.header)?;
        info.stab
            .map(SymbolTable::from)
            .ok_or_else(|| GroupError::NotAGroup(path.to_owned()))
    }

    fn insert_entry(
        &mut self,
        group: &GroupRef,
        name: &str,
        insert: InsertEntry<'_>,
    ) -> GroupResult<SymbolEntry> {
        let state = self.file_state_mut(group.loc.file)?;
        match insert {
            InsertEntry::Hard {
                file,
                header,
                cache,
            } => {
                if file != group.loc.file {
                    return Err(GroupError::CrossFileLink {
                        from: file,
                        to: group.loc.file,
                    });
                }
                group
                    .table
                    .insert(&mut state.container, name, SymbolEntry::hard(header, cache))
            }
            InsertEntry::Soft { target } => {
                group
                    .table
                    .insert_symlink(&mut state.container, name, target)
            }
        }
    }

    /// Fill in the group cache of a hard entry that has none yet.
    fn refresh_cache(
        &mut self,
        group: &GroupRef,
        name: &str,
        entry: &mut SymbolEntry,
    ) -> GroupResult<()> {
        if entry.cache != EntryCache::Nothing {
            return Ok(());
        }
        let state = self.file_state_mut(group.loc.file)?;
        if let Some(stab) = ObjectHeader::read(&mut state.container, entry.header)?.stab {
            let cache = SymbolTable::from(stab).entry_cache();
            group.table.update_cache(&mut state.container, name, cache)?;
            entry.cache = cache;
            trace!(name, header = %entry.header, "cached group entry");
        }
        Ok(())
    }

    /// If `loc` is a mount point, the root of the file mounted there.
    fn mounted_root(&self, loc: Location) -> GroupResult<Option<Location>> {
        let state = self.file_state(loc.file)?;
        if !state.shared.is_mount_point(loc.header) {
            return Ok(None);
        }
        let Some(child) = self.mounts.child_at(loc.file, loc.header) else {
            return Ok(None);
        };
        Ok(Some(Location {
            file: child,
            header: self.file_state(child)?.root,
        }))
    }

    /// Walk `path` from `start`.
    ///
    /// In insert mode every component but the last must exist and the last
    /// must not; it is created from `action`.
    pub(crate) fn namei(
        &mut self,
        start: Start,
        path: &str,
        action: Action<'_>,
        flags: Flags,
        hops: &mut u32,
    ) -> GroupResult<Resolved> {
        let absolute = path.starts_with('/');
        let mut cur = if absolute {
            self.top_start(start.loc.file)?
        } else {
            start
        };
        let comps: Vec<&str> = components(path).collect();
        let mut group = None;
        let mut entry = None;
        let mut name = String::new();
        let mut inserted = false;

        for (i, &comp) in comps.iter().enumerate() {
            let last = i + 1 == comps.len();
            let here = GroupRef {
                loc: cur.loc,
                table: self.group_table(cur.loc, &prefix(absolute, &comps[..i]))?,
            };
            let found = {
                let state = self.file_state_mut(here.loc.file)?;
                here.table.find(&mut state.container, comp)?
            };
            let mut current = match (found, last, action) {
                (Some(_), true, Action::Insert(_)) => {
                    return Err(GroupError::AlreadyExists(path.to_owned()))
                }
                (Some(found), _, _) => found,
                (None, true, Action::Insert(insert)) => {
                    inserted = true;
                    self.insert_entry(&here, comp, insert)?
                }
                (None, _, _) => {
                    return Err(GroupError::NotFound(prefix(absolute, &comps[..=i])))
                }
            };
            let user = cur.user.as_deref().map(|u| join(u, comp));
            let canonical = cur.canonical.as_deref().map(|c| join(c, comp));

            let next = match current.cache {
                EntryCache::SymLink { link_off } if !inserted && (!last || !flags.no_follow_last) => {
                    if *hops == 0 {
                        return Err(GroupError::LinkLimitExceeded {
                            path: path.to_owned(),
                            limit: self.config().max_symlink_hops,
                        });
                    }
                    *hops -= 1;
                    let target = {
                        let state = self.file_state_mut(here.loc.file)?;
                        here.table.read_name(&mut state.container, link_off)?
                    };
                    trace!(link = comp, %target, hops = *hops, "following symbolic link");
                    let from = Start {
                        loc: here.loc,
                        user: cur.user.clone(),
                        canonical: cur.canonical.clone(),
                    };
                    let sub = self.namei(from, &target, Action::Traverse, Flags::default(), hops)?;
                    entry = sub.entry;
                    Start {
                        loc: sub.object,
                        user,
                        canonical: sub.canonical,
                    }
                }
                EntryCache::SymLink { .. } => {
                    entry = Some(current);
                    Start {
                        loc: Location {
                            file: here.loc.file,
                            header: Address::UNDEF,
                        },
                        user,
                        canonical,
                    }
                }
                _ => {
                    self.refresh_cache(&here, comp, &mut current)?;
                    entry = Some(current);
                    let loc = Location {
                        file: here.loc.file,
                        header: current.header,
                    };
                    let cross = !inserted && (!last || !flags.no_cross_mount_last);
                    match self.mounted_root(loc)? {
                        Some(root) if cross => {
                            trace!(point = %loc.header, child = %root.file, "crossing mount point");
                            Start {
                                loc: root,
                                user,
                                canonical: Some("/".to_owned()),
                            }
                        }
                        _ => Start {
                            loc,
                            user,
                            canonical,
                        },
                    }
                }
            };
            group = Some(here);
            name = comp.to_owned();
            cur = next;
        }

        if matches!(action, Action::Insert(_)) && !inserted {
            return Err(GroupError::NothingToInsert(path.to_owned()));
        }
        Ok(Resolved {
            group,
            entry,
            object: cur.loc,
            name,
            user: cur.user,
            canonical: cur.canonical,
        })
    }
}
