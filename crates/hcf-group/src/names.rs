//! Path strings cached on open handles.
//!
//! Every handle remembers two paths:
//!
//! - the **user path**, built from the names the caller actually wrote,
//!   starting at the top of the mount hierarchy;
//! - the **canonical path**, the location of the object inside its own file.
//!
//! When the namespace changes shape the registry rewrites these strings in
//! place of recomputing them. Matching is component-wise: a change to `/foo`
//! never touches `/foobar`.
//!
//! Path strings are shared `Arc<str>` values and are never edited in place.
//! A rewrite builds a new string and swaps the handle's reference.

use std::sync::Arc;

/// How many mounts currently cover a path.
///
/// A counter rather than a flag, so nested mounts unwind correctly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HiddenCount(u32);

impl HiddenCount {
    pub fn increment(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn decrement(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }

    pub fn is_hidden(&self) -> bool {
        self.0 > 0
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

/// A namespace mutation the registry must reflect in cached paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameChange<'a> {
    /// `path` no longer names anything.
    Unlink { path: &'a str },
    /// `from` was renamed to `to`.
    Move { from: &'a str, to: &'a str },
    /// A file was mounted at `point`; paths strictly below it are covered.
    Hide { point: &'a str },
    /// The mount at `point` went away.
    Unhide { point: &'a str },
    /// Paths of a newly mounted file now start at `point`.
    Prefix { point: &'a str },
    /// Paths of an unmounted file no longer start at `point`.
    StripPrefix { point: &'a str },
}

/// The cached paths of one handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamePaths {
    user: Option<Arc<str>>,
    canonical: Option<Arc<str>>,
    hidden: HiddenCount,
}

impl NamePaths {
    pub fn new(user: Option<&str>, canonical: Option<&str>) -> Self {
        Self {
            user: user.map(Arc::from),
            canonical: canonical.map(Arc::from),
            hidden: HiddenCount::default(),
        }
    }

    /// The user path, or `None` once released or while a mount hides it.
    pub fn user(&self) -> Option<&str> {
        if self.hidden.is_hidden() {
            return None;
        }
        self.user.as_deref()
    }

    /// The user path even while hidden.
    pub fn raw_user(&self) -> Option<&Arc<str>> {
        self.user.as_ref()
    }

    pub fn canonical(&self) -> Option<&str> {
        self.canonical.as_deref()
    }

    pub fn canonical_arc(&self) -> Option<&Arc<str>> {
        self.canonical.as_ref()
    }

    pub fn hidden(&self) -> HiddenCount {
        self.hidden
    }

    /// Paths for something opened as `name` below a handle with these paths.
    pub fn child(&self, name: &str) -> Self {
        Self {
            user: self.user.as_deref().map(|u| Arc::from(join(u, name))),
            canonical: self.canonical.as_deref().map(|c| Arc::from(join(c, name))),
            hidden: self.hidden,
        }
    }

    /// Apply `change` to the user path. Returns whether anything changed.
    pub fn apply_user(&mut self, change: NameChange<'_>, memo: &mut RewriteMemo) -> bool {
        let Some(current) = self.user.clone() else {
            return false;
        };
        match change {
            // Hidden paths describe names a mount currently covers.
            NameChange::Unlink { .. } | NameChange::Move { .. } if self.hidden.is_hidden() => false,
            NameChange::Hide { point } => {
                let below = is_strictly_below(point, &current);
                if below {
                    self.hidden.increment();
                }
                below
            }
            NameChange::Unhide { point } => {
                let below = is_strictly_below(point, &current) && self.hidden.is_hidden();
                if below {
                    self.hidden.decrement();
                }
                below
            }
            _ => rewrite(&mut self.user, &current, change, memo),
        }
    }

    /// Apply `change` to the canonical path. Only unlink and move apply.
    pub fn apply_canonical(&mut self, change: NameChange<'_>, memo: &mut RewriteMemo) -> bool {
        let Some(current) = self.canonical.clone() else {
            return false;
        };
        match change {
            NameChange::Unlink { .. } | NameChange::Move { .. } => {
                rewrite(&mut self.canonical, &current, change, memo)
            }
            _ => false,
        }
    }
}

/// Rewritten strings from one registry pass. Handles that shared a path
/// before the change share the rewritten one after it.
#[derive(Debug, Default)]
pub struct RewriteMemo {
    seen: Vec<(Arc<str>, Arc<str>)>,
}

impl RewriteMemo {
    fn lookup(&self, old: &Arc<str>) -> Option<Arc<str>> {
        self.seen
            .iter()
            .find(|(o, _)| Arc::ptr_eq(o, old))
            .map(|(_, n)| Arc::clone(n))
    }
}

fn rewrite(
    slot: &mut Option<Arc<str>>,
    current: &Arc<str>,
    change: NameChange<'_>,
    memo: &mut RewriteMemo,
) -> bool {
    let next: Option<String> = match change {
        NameChange::Unlink { path } => {
            if !is_component_prefix(path, current) {
                return false;
            }
            *slot = None;
            return true;
        }
        NameChange::Move { from, to } => {
            is_component_prefix(from, current).then(|| splice(current, from, to))
        }
        NameChange::Prefix { point } => Some(if &**current == "/" {
            point.to_owned()
        } else {
            format!("{}{}", point.trim_end_matches('/'), current)
        }),
        NameChange::StripPrefix { point } => is_component_prefix(point, current).then(|| {
            match &current[point.trim_end_matches('/').len()..] {
                "" => "/".to_owned(),
                rest => rest.to_owned(),
            }
        }),
        NameChange::Hide { .. } | NameChange::Unhide { .. } => None,
    };
    let Some(next) = next else {
        return false;
    };
    let shared = memo.lookup(current).unwrap_or_else(|| {
        let fresh: Arc<str> = Arc::from(next);
        memo.seen.push((Arc::clone(current), Arc::clone(&fresh)));
        fresh
    });
    *slot = Some(shared);
    true
}

/// Collapse repeated slashes, drop `.` components and any trailing slash.
/// An absolute path stays absolute; the root is `/`.
pub fn normalize(path: &str) -> String {
    let absolute = path.starts_with('/');
    let parts: Vec<&str> = components(path).collect();
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// The non-empty, non-`.` components of `path`.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// Resolve `name` against `base`. An absolute `name` replaces `base`.
pub fn join(base: &str, name: &str) -> String {
    if name.starts_with('/') {
        return normalize(name);
    }
    normalize(&format!("{base}/{name}"))
}

/// Whether `prefix` names `path` or one of its ancestors.
///
/// ```
/// use hcf_group::names::is_component_prefix;
///
/// assert!(is_component_prefix("/foo", "/foo"));
/// assert!(is_component_prefix("/foo", "/foo/bar"));
/// assert!(!is_component_prefix("/foo", "/foobar"));
/// assert!(is_component_prefix("/", "/anything"));
/// ```
pub fn is_component_prefix(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

fn is_strictly_below(point: &str, path: &str) -> bool {
    is_component_prefix(point, path) && path.trim_end_matches('/') != point.trim_end_matches('/')
}

/// Replace the leading `from` of `path` with `to`, keeping the rest.
pub fn splice(path: &str, from: &str, to: &str) -> String {
    let rest = &path[from.trim_end_matches('/').len()..];
    let to = to.trim_end_matches('/');
    match (to.is_empty(), rest.is_empty()) {
        (true, true) => "/".to_owned(),
        _ => format!("{to}{rest}"),
    }
}

/// Split a path into its parent and last component. The last component is
/// `None` when the path names its starting point (`""`, `"/"`, `"."`).
pub fn split_last(path: &str) -> (String, Option<&str>) {
    let Some(last) = components(path).last() else {
        return (path.to_owned(), None);
    };
    let parent: Vec<&str> = components(path).collect();
    let parent = parent[..parent.len() - 1].join("/");
    let parent = match (path.starts_with('/'), parent.is_empty()) {
        (true, _) => format!("/{parent}"),
        (false, true) => ".".to_owned(),
        (false, false) => parent,
    };
    (parent, Some(last))
}
