//! Tree-level operations.
//!
//! Every operation protects one internal node at a time, copies out what it
//! needs, and unprotects it before descending. Structural changes are
//! applied on the way back up by protecting the node again.

use std::cmp::Ordering;
use std::ops::ControlFlow;

use tracing::{debug, trace};

use hcf_store::{ContainerFile, Release};
use hcf_types::Address;

use crate::class::{BtreeClass, InsertOutcome, IterCursor, RemoveOutcome};
use crate::error::BtreeError;
use crate::node::BtreeNode;

type Node<C> = BtreeNode<<C as BtreeClass>::Key>;

/// One bottom-level child with the keys bounding it.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafRef<K> {
    pub left: K,
    pub addr: Address,
    pub right: K,
}

fn check_class<C: BtreeClass>(addr: Address, node: &Node<C>) -> Result<(), BtreeError> {
    if node.class != C::TYPE_TAG {
        return Err(BtreeError::WrongClass {
            addr,
            expected: C::TYPE_TAG,
            found: node.class,
        });
    }
    Ok(())
}

fn read_node<C, R>(
    file: &mut ContainerFile,
    addr: Address,
    f: impl FnOnce(&Node<C>) -> R,
) -> Result<R, C::Error>
where
    C: BtreeClass,
{
    file.with_entry(addr, |_, node: &mut Node<C>| {
        check_class::<C>(addr, node)?;
        Ok((f(node), Release::Clean))
    })
}

fn modify_node<C, R>(
    file: &mut ContainerFile,
    addr: Address,
    f: impl FnOnce(&mut ContainerFile, &mut Node<C>) -> Result<(R, Release), C::Error>,
) -> Result<R, C::Error>
where
    C: BtreeClass,
{
    file.with_entry(addr, |file, node: &mut Node<C>| {
        check_class::<C>(addr, node)?;
        f(file, node)
    })
}

/// First child index `i` with `udata <= keys[i + 1]`, or the child count if
/// the payload is past the last key.
fn locate<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    keys: &[C::Key],
    udata: &C::Udata,
) -> Result<usize, C::Error> {
    let n = keys.len() - 1;
    let (mut lo, mut hi) = (0, n);
    while lo < hi {
        let mid = (lo + hi) / 2;
        if class.cmp2(file, udata, &keys[mid + 1])? == Ordering::Greater {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// The child whose range contains the payload, if any.
fn locate_exact<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    keys: &[C::Key],
    udata: &C::Udata,
) -> Result<Option<usize>, C::Error> {
    if keys.is_empty() {
        return Ok(None);
    }
    let idx = locate(class, file, keys, udata)?;
    if idx == keys.len() - 1 {
        return Ok(None);
    }
    match class.cmp3(file, &keys[idx], udata, &keys[idx + 1])? {
        Ordering::Equal => Ok(Some(idx)),
        _ => Ok(None),
    }
}

/// Allocate and register an empty tree for class `C`.
pub fn create<C: BtreeClass>(_class: &C, file: &mut ContainerFile) -> Result<Address, C::Error> {
    let size = Node::<C>::node_size(file.params()) as u64;
    let addr = file.allocate(size)?;
    file.insert_new(addr, Node::<C>::empty(C::TYPE_TAG, 0))?;
    debug!(%addr, class = C::TYPE_TAG, "created b-tree");
    Ok(addr)
}

/// Look the payload up. Returns `false` when no leaf range contains it or
/// the leaf does not have it.
pub fn find<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    root: Address,
    udata: &mut C::Udata,
) -> Result<bool, C::Error> {
    let mut addr = root;
    loop {
        let (level, keys, children) =
            read_node::<C, _>(file, addr, |n| (n.level, n.keys.clone(), n.children.clone()))?;
        let Some(idx) = locate_exact(class, file, &keys, udata)? else {
            return Ok(false);
        };
        if level == 0 {
            return class.find(file, children[idx], udata);
        }
        addr = children[idx];
    }
}

/// Insert the payload, splitting nodes as needed.
pub fn insert<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    root: Address,
    udata: &mut C::Udata,
) -> Result<(), C::Error> {
    let empty = read_node::<C, _>(file, root, |n| n.children.is_empty())?;
    if empty {
        let (left, child, right) = class.new_first(file, udata)?;
        modify_node::<C, _>(file, root, |_, node| {
            node.level = 0;
            node.keys = vec![left, right];
            node.children = vec![child];
            Ok(((), Release::Dirty))
        })?;
        trace!(%root, %child, "b-tree got its first child");
    }
    if let InsertOutcome::Split {
        middle, right_addr, ..
    } = insert_into(class, file, root, udata)?
    {
        split_root(class, file, root, middle, right_addr)?;
    }
    Ok(())
}

fn insert_into<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    addr: Address,
    udata: &mut C::Udata,
) -> Result<InsertOutcome<C::Key>, C::Error> {
    let (level, keys, children) =
        read_node::<C, _>(file, addr, |n| (n.level, n.keys.clone(), n.children.clone()))?;
    if children.is_empty() {
        return Err(BtreeError::Corrupt {
            addr,
            reason: "insert reached an empty interior node".into(),
        }
        .into());
    }
    let last = children.len() - 1;
    let idx = locate(class, file, &keys, udata)?.min(last);
    let child = children[idx];

    let outcome = if level == 0 {
        class.insert(file, child, &keys[idx], &keys[idx + 1], udata)?
    } else {
        insert_into(class, file, child, udata)?
    };

    match outcome {
        InsertOutcome::Done { right_key: None } => Ok(InsertOutcome::Done { right_key: None }),
        InsertOutcome::Done {
            right_key: Some(key),
        } => modify_node::<C, _>(file, addr, |_, node| {
            node.keys[idx + 1] = key.clone();
            let propagate = (idx == last).then_some(key);
            Ok((InsertOutcome::Done { right_key: propagate }, Release::Dirty))
        }),
        InsertOutcome::Split {
            middle,
            right_addr,
            right_key,
        } => modify_node::<C, _>(file, addr, |file, node| {
            if let Some(key) = &right_key {
                node.keys[idx + 1] = key.clone();
            }
            node.keys.insert(idx + 1, middle);
            node.children.insert(idx + 1, right_addr);
            let propagate = if idx == last { right_key } else { None };

            if node.children.len() <= file.params().btree_capacity() {
                return Ok((InsertOutcome::Done { right_key: propagate }, Release::Dirty));
            }
            let (middle, right_addr) = split_node::<C>(file, addr, node)?;
            Ok((
                InsertOutcome::Split {
                    middle,
                    right_addr,
                    right_key: propagate,
                },
                Release::Dirty,
            ))
        }),
    }
}

/// Move the upper half of an overflowing node into a new right sibling.
fn split_node<C: BtreeClass>(
    file: &mut ContainerFile,
    addr: Address,
    node: &mut Node<C>,
) -> Result<(C::Key, Address), C::Error> {
    let half = node.children.len() / 2;
    let right_children = node.children.split_off(half);
    let right_keys = node.keys.split_off(half);
    let middle = right_keys[0].clone();
    node.keys.push(middle.clone());

    let new_addr = file.allocate(Node::<C>::node_size(file.params()) as u64)?;
    let old_right = node.right;
    let sibling = Node::<C>::with_contents(
        node.class,
        node.level,
        right_keys,
        right_children,
        addr,
        old_right,
    );
    file.insert_new(new_addr, sibling)?;
    node.right = new_addr;
    if old_right.is_defined() {
        modify_node::<C, _>(file, old_right, |_, n| {
            n.left = new_addr;
            Ok(((), Release::Dirty))
        })?;
    }
    debug!(%addr, %new_addr, level = node.level, "split b-tree node");
    Ok((middle, new_addr))
}

/// The root now holds the left half of a split. Move it out so the root
/// address stays put, and make the root the parent of both halves.
fn split_root<C: BtreeClass>(
    _class: &C,
    file: &mut ContainerFile,
    root: Address,
    middle: C::Key,
    right_addr: Address,
) -> Result<(), C::Error> {
    let left_addr = file.allocate(Node::<C>::node_size(file.params()) as u64)?;
    let right_last = modify_node::<C, _>(file, right_addr, |_, n| {
        n.left = left_addr;
        Ok((n.keys.last().cloned(), Release::Dirty))
    })?;
    let right_last = right_last.ok_or_else(|| BtreeError::Corrupt {
        addr: right_addr,
        reason: "split produced an empty node".into(),
    })?;

    modify_node::<C, _>(file, root, |file, node| {
        let keys = std::mem::take(&mut node.keys);
        let children = std::mem::take(&mut node.children);
        let first = keys[0].clone();
        let left = Node::<C>::with_contents(
            node.class,
            node.level,
            keys,
            children,
            Address::UNDEF,
            right_addr,
        );
        file.insert_new(left_addr, left)?;
        node.level += 1;
        node.keys = vec![first, middle, right_last];
        node.children = vec![left_addr, right_addr];
        node.left = Address::UNDEF;
        node.right = Address::UNDEF;
        debug!(%root, level = node.level, "b-tree root grew");
        Ok(((), Release::Dirty))
    })
}

/// Remove the payload. Children that become empty are pruned; there is no
/// rebalancing.
pub fn remove<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    root: Address,
    udata: &mut C::Udata,
) -> Result<(), C::Error> {
    remove_from(class, file, root, udata, true).map(|_| ())
}

fn remove_from<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    addr: Address,
    udata: &mut C::Udata,
    is_root: bool,
) -> Result<RemoveOutcome<C::Key>, C::Error> {
    let (level, keys, children) =
        read_node::<C, _>(file, addr, |n| (n.level, n.keys.clone(), n.children.clone()))?;
    let Some(idx) = locate_exact(class, file, &keys, udata)? else {
        return Err(class.not_found(udata));
    };
    let last = children.len() - 1;
    let child = children[idx];

    let outcome = if level == 0 {
        class.remove(file, child, &keys[idx], &keys[idx + 1], udata)?
    } else {
        remove_from(class, file, child, udata, false)?
    };

    match outcome {
        RemoveOutcome::Done { right_key: None } => Ok(RemoveOutcome::Done { right_key: None }),
        RemoveOutcome::Done {
            right_key: Some(key),
        } => modify_node::<C, _>(file, addr, |file, node| {
            node.keys[idx + 1] = key.clone();
            let propagate = (idx == last).then_some(key);
            if let Some(key) = &propagate {
                set_left_key::<C>(file, node.right, key)?;
            }
            Ok((RemoveOutcome::Done { right_key: propagate }, Release::Dirty))
        }),
        RemoveOutcome::Removed => modify_node::<C, _>(file, addr, |file, node| {
            node.children.remove(idx);
            node.keys.remove(idx + 1);
            if !node.children.is_empty() {
                let propagate = if idx == last {
                    node.keys.last().cloned()
                } else {
                    None
                };
                if let Some(key) = &propagate {
                    set_left_key::<C>(file, node.right, key)?;
                }
                return Ok((RemoveOutcome::Done { right_key: propagate }, Release::Dirty));
            }
            if is_root {
                node.keys.clear();
                node.level = 0;
                debug!(%addr, "b-tree is empty");
                return Ok((RemoveOutcome::Done { right_key: None }, Release::Dirty));
            }
            unlink_siblings::<C>(file, node)?;
            debug!(%addr, level = node.level, "pruned empty b-tree node");
            Ok((RemoveOutcome::Removed, Release::Delete))
        }),
    }
}

/// Keys are duplicated between neighbours: a node's right key is its right
/// sibling's left key. Keep the copy in step when the right key moves.
fn set_left_key<C: BtreeClass>(
    file: &mut ContainerFile,
    sibling: Address,
    key: &C::Key,
) -> Result<(), C::Error> {
    if !sibling.is_defined() {
        return Ok(());
    }
    modify_node::<C, _>(file, sibling, |_, n| {
        if let Some(first) = n.keys.first_mut() {
            *first = key.clone();
        }
        Ok(((), Release::Dirty))
    })
}

/// Splice an emptied node out of its level. Its right sibling inherits its
/// left key.
fn unlink_siblings<C: BtreeClass>(file: &mut ContainerFile, node: &Node<C>) -> Result<(), C::Error> {
    let (left, right) = (node.left, node.right);
    if left.is_defined() {
        modify_node::<C, _>(file, left, |_, n| {
            n.right = right;
            Ok(((), Release::Dirty))
        })?;
    }
    if right.is_defined() {
        let inherited = node.keys.first().cloned();
        modify_node::<C, _>(file, right, |_, n| {
            n.left = left;
            if let (Some(key), Some(first)) = (inherited, n.keys.first_mut()) {
                *first = key;
            }
            Ok(((), Release::Dirty))
        })?;
    }
    Ok(())
}

/// Free every node and, through the class, every leaf object.
pub fn delete<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    root: Address,
    udata: &mut C::Udata,
) -> Result<(), C::Error> {
    let (level, children) = read_node::<C, _>(file, root, |n| (n.level, n.children.clone()))?;
    for child in children {
        if level == 0 {
            class.remove_all(file, child, udata)?;
        } else {
            delete(class, file, child, udata)?;
        }
    }
    file.with_entry(root, |_, _: &mut Node<C>| Ok::<_, C::Error>(((), Release::Delete)))?;
    trace!(%root, level, "deleted b-tree node");
    Ok(())
}

fn leftmost_bottom<C: BtreeClass>(
    file: &mut ContainerFile,
    root: Address,
) -> Result<Option<Address>, C::Error> {
    let mut addr = root;
    loop {
        let (level, first) =
            read_node::<C, _>(file, addr, |n| (n.level, n.children.first().copied()))?;
        match first {
            None => return Ok(None),
            Some(_) if level == 0 => return Ok(Some(addr)),
            Some(child) => addr = child,
        }
    }
}

/// Visit every record in key order, following the bottom level's sibling
/// chain.
pub fn iterate<C: BtreeClass>(
    class: &C,
    file: &mut ContainerFile,
    root: Address,
    cursor: &mut IterCursor,
    visit: &mut dyn FnMut(C::Record) -> ControlFlow<()>,
) -> Result<ControlFlow<()>, C::Error> {
    let mut next = leftmost_bottom::<C>(file, root)?;
    while let Some(addr) = next {
        let (children, right) = read_node::<C, _>(file, addr, |n| (n.children.clone(), n.right))?;
        for child in children {
            if class.iterate_leaf(file, child, cursor, visit)?.is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        next = right.is_defined().then_some(right);
    }
    Ok(ControlFlow::Continue(()))
}

/// Every bottom-level child in key order with its bounding keys.
///
/// Walks the sibling chain and checks that its back links agree.
pub fn leaves<C: BtreeClass>(
    _class: &C,
    file: &mut ContainerFile,
    root: Address,
) -> Result<Vec<LeafRef<C::Key>>, C::Error> {
    let mut out = Vec::new();
    let mut prev = Address::UNDEF;
    let mut next = leftmost_bottom::<C>(file, root)?;
    while let Some(addr) = next {
        let (keys, children, left, right) = read_node::<C, _>(file, addr, |n| {
            (n.keys.clone(), n.children.clone(), n.left, n.right)
        })?;
        if left != prev {
            return Err(BtreeError::Corrupt {
                addr,
                reason: format!("left sibling is {left}, expected {prev}"),
            }
            .into());
        }
        if keys.len() != children.len() + 1 {
            return Err(BtreeError::Corrupt {
                addr,
                reason: format!("{} keys for {} children", keys.len(), children.len()),
            }
            .into());
        }
        for (i, child) in children.into_iter().enumerate() {
            out.push(LeafRef {
                left: keys[i].clone(),
                addr: child,
                right: keys[i + 1].clone(),
            });
        }
        prev = addr;
        next = right.is_defined().then_some(right);
    }
    Ok(out)
}
