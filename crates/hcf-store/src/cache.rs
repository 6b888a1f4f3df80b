//! Typed metadata cache with protect/unprotect access windows.
//!
//! Each cached structure type implements [`CacheClass`]: how to load itself
//! from the device, how to flush itself back, how to drop its dirty state
//! without writing, and how large it is on disk. The cache stores entries
//! type-erased and hands them back by value on protect, so at most one live
//! in-memory copy of a given address exists at any time.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use tracing::trace;

use hcf_types::{Address, FormatParams};

use crate::alloc::SpaceAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockDevice;

/// Everything a flush callback may touch.
pub struct FlushContext<'a> {
    pub device: &'a mut dyn BlockDevice,
    pub allocator: &'a mut SpaceAllocator,
    pub params: &'a FormatParams,
}

/// A metadata structure that can live in the [`MetadataCache`].
pub trait CacheClass: Any + Send + Sized {
    /// Human-readable class name used in errors and logs.
    const NAME: &'static str;

    /// Decode the structure stored at `addr`.
    fn load(device: &mut dyn BlockDevice, params: &FormatParams, addr: Address) -> StoreResult<Self>;

    /// Write the structure back if it is dirty, then clear its dirty state.
    fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()>;

    /// Drop dirty state without writing.
    fn clear(&mut self);

    /// Returns `true` if the structure (or any part of it) needs writing.
    fn is_dirty(&self) -> bool;

    /// Mark the structure as needing a write.
    fn mark_dirty(&mut self);

    /// Size in bytes of the structure's on-disk image at its address.
    fn compute_size(&self, params: &FormatParams) -> usize;

    /// Release in-memory resources. Called when the entry leaves the cache
    /// for good (eviction after flush, or deletion).
    fn destroy(self) {}
}

/// How an entry goes back into the cache on unprotect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// Unchanged by this access.
    Clean,
    /// Modified; must be flushed before eviction.
    Dirty,
    /// Delete the entry and free its file space.
    Delete,
}

/// Counters describing cache behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub flushes: u64,
    pub evictions: u64,
    pub deletions: u64,
}

trait ErasedEntry: Send {
    fn class_name(&self) -> &'static str;
    fn entry_type(&self) -> TypeId;
    fn flush_erased(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()>;
    fn dirty(&self) -> bool;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
    fn destroy_erased(self: Box<Self>);
}

impl<T: CacheClass> ErasedEntry for T {
    fn class_name(&self) -> &'static str {
        T::NAME
    }

    fn entry_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn flush_erased(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
        self.flush(ctx, addr)
    }

    fn dirty(&self) -> bool {
        self.is_dirty()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }

    fn destroy_erased(self: Box<Self>) {
        (*self).destroy()
    }
}

struct Slot {
    entry: Box<dyn ErasedEntry>,
    last_used: u64,
}

/// Address-keyed cache of decoded metadata.
///
/// Unprotected entries are evicted least-recently-used first once the cache
/// holds more than `max_entries`; dirty victims are flushed before they go.
pub struct MetadataCache {
    slots: HashMap<Address, Slot>,
    protected: HashMap<Address, &'static str>,
    max_entries: usize,
    clock: u64,
    stats: CacheStats,
}

impl MetadataCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            slots: HashMap::new(),
            protected: HashMap::new(),
            max_entries: max_entries.max(1),
            clock: 0,
            stats: CacheStats::default(),
        }
    }

    /// Number of unprotected entries held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn is_cached(&self, addr: Address) -> bool {
        self.slots.contains_key(&addr)
    }

    pub fn is_protected(&self, addr: Address) -> bool {
        self.protected.contains_key(&addr)
    }

    /// Number of entries currently protected.
    pub fn protected_count(&self) -> usize {
        self.protected.len()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Take the entry at `addr` out of the cache, loading it if needed.
    pub fn protect<T: CacheClass>(
        &mut self,
        device: &mut dyn BlockDevice,
        params: &FormatParams,
        addr: Address,
    ) -> StoreResult<T> {
        if !addr.is_defined() {
            return Err(StoreError::Corrupt {
                addr,
                reason: format!("cannot protect {} at undefined address", T::NAME),
            });
        }
        if self.protected.contains_key(&addr) {
            return Err(StoreError::AlreadyProtected(addr));
        }

        let cached = self
            .slots
            .get(&addr)
            .map(|slot| (slot.entry.entry_type(), slot.entry.class_name()));
        let entry = match cached {
            Some((ty, cached)) if ty != TypeId::of::<T>() => {
                return Err(StoreError::TypeMismatch {
                    addr,
                    requested: T::NAME,
                    cached,
                });
            }
            Some((_, cached)) => {
                let Some(slot) = self.slots.remove(&addr) else {
                    return Err(StoreError::NotProtected(addr));
                };
                self.stats.hits += 1;
                *slot
                    .entry
                    .into_any()
                    .downcast::<T>()
                    .map_err(|_| StoreError::TypeMismatch {
                        addr,
                        requested: T::NAME,
                        cached,
                    })?
            }
            None => {
                self.stats.misses += 1;
                trace!(%addr, class = T::NAME, "cache load");
                T::load(device, params, addr)?
            }
        };

        self.protected.insert(addr, T::NAME);
        Ok(entry)
    }

    /// Put a protected entry back.
    pub fn unprotect<T: CacheClass>(
        &mut self,
        ctx: &mut FlushContext<'_>,
        addr: Address,
        mut entry: T,
        release: Release,
    ) -> StoreResult<()> {
        if self.protected.remove(&addr).is_none() {
            return Err(StoreError::NotProtected(addr));
        }
        match release {
            Release::Delete => {
                let size = entry.compute_size(ctx.params) as u64;
                entry.clear();
                entry.destroy();
                self.stats.deletions += 1;
                trace!(%addr, class = T::NAME, size, "cache delete");
                ctx.allocator.free(addr, size)
            }
            Release::Dirty | Release::Clean => {
                if release == Release::Dirty {
                    entry.mark_dirty();
                }
                let last_used = self.tick();
                self.slots.insert(
                    addr,
                    Slot {
                        entry: Box::new(entry),
                        last_used,
                    },
                );
                self.evict_if_needed(ctx)
            }
        }
    }

    /// Register a newly created structure. It is marked dirty.
    pub fn insert_new<T: CacheClass>(
        &mut self,
        ctx: &mut FlushContext<'_>,
        addr: Address,
        mut entry: T,
    ) -> StoreResult<()> {
        if self.slots.contains_key(&addr) || self.protected.contains_key(&addr) {
            return Err(StoreError::AlreadyCached(addr));
        }
        entry.mark_dirty();
        let last_used = self.tick();
        self.slots.insert(
            addr,
            Slot {
                entry: Box::new(entry),
                last_used,
            },
        );
        self.stats.inserts += 1;
        trace!(%addr, class = T::NAME, "cache insert");
        self.evict_if_needed(ctx)
    }

    fn evict_if_needed(&mut self, ctx: &mut FlushContext<'_>) -> StoreResult<()> {
        while self.slots.len() > self.max_entries {
            let victim = self
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(addr, _)| *addr);
            let Some(addr) = victim else { break };
            let Some(mut slot) = self.slots.remove(&addr) else {
                break;
            };
            if slot.entry.dirty() {
                slot.entry.flush_erased(ctx, addr)?;
                self.stats.flushes += 1;
            }
            trace!(%addr, class = slot.entry.class_name(), "cache evict");
            slot.entry.destroy_erased();
            self.stats.evictions += 1;
        }
        Ok(())
    }

    /// Flush every dirty unprotected entry. Returns how many were written.
    pub fn flush_all(&mut self, ctx: &mut FlushContext<'_>) -> StoreResult<usize> {
        let mut dirty: Vec<Address> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.dirty())
            .map(|(addr, _)| *addr)
            .collect();
        dirty.sort();
        for addr in &dirty {
            if let Some(slot) = self.slots.get_mut(addr) {
                slot.entry.flush_erased(ctx, *addr)?;
                self.stats.flushes += 1;
            }
        }
        Ok(dirty.len())
    }

    /// Flush everything and drop all unprotected entries.
    pub fn evict_all(&mut self, ctx: &mut FlushContext<'_>) -> StoreResult<()> {
        self.flush_all(ctx)?;
        for (_, slot) in self.slots.drain() {
            slot.entry.destroy_erased();
            self.stats.evictions += 1;
        }
        Ok(())
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache")
            .field("entries", &self.slots.len())
            .field("protected", &self.protected.len())
            .field("max_entries", &self.max_entries)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDevice;

    /// A four-byte counter stored big-endian at its address.
    #[derive(Debug)]
    struct Counter {
        value: u32,
        dirty: bool,
    }

    impl CacheClass for Counter {
        const NAME: &'static str = "counter";

        fn load(device: &mut dyn BlockDevice, _: &FormatParams, addr: Address) -> StoreResult<Self> {
            let bytes = device.read_vec(addr.value(), 4)?;
            Ok(Self {
                value: u32::from_be_bytes(bytes.try_into().unwrap()),
                dirty: false,
            })
        }

        fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
            if self.dirty {
                ctx.device.write_at(addr.value(), &self.value.to_be_bytes())?;
                self.dirty = false;
            }
            Ok(())
        }

        fn clear(&mut self) {
            self.dirty = false;
        }

        fn is_dirty(&self) -> bool {
            self.dirty
        }

        fn mark_dirty(&mut self) {
            self.dirty = true;
        }

        fn compute_size(&self, _: &FormatParams) -> usize {
            4
        }
    }

    #[derive(Debug)]
    struct Other;

    impl CacheClass for Other {
        const NAME: &'static str = "other";

        fn load(_: &mut dyn BlockDevice, _: &FormatParams, _: Address) -> StoreResult<Self> {
            Ok(Other)
        }
        fn flush(&mut self, _: &mut FlushContext<'_>, _: Address) -> StoreResult<()> {
            Ok(())
        }
        fn clear(&mut self) {}
        fn is_dirty(&self) -> bool {
            false
        }
        fn mark_dirty(&mut self) {}
        fn compute_size(&self, _: &FormatParams) -> usize {
            1
        }
    }

    struct Harness {
        device: MemoryDevice,
        allocator: SpaceAllocator,
        params: FormatParams,
        cache: MetadataCache,
    }

    impl Harness {
        fn new(max_entries: usize) -> Self {
            Self {
                device: MemoryDevice::new(),
                allocator: SpaceAllocator::new(0, u64::MAX - 1),
                params: FormatParams::default(),
                cache: MetadataCache::new(max_entries),
            }
        }

        fn insert(&mut self, value: u32) -> Address {
            let addr = self.allocator.allocate(4).unwrap();
            let mut ctx = FlushContext {
                device: &mut self.device,
                allocator: &mut self.allocator,
                params: &self.params,
            };
            self.cache
                .insert_new(&mut ctx, addr, Counter { value, dirty: false })
                .unwrap();
            addr
        }

        fn protect(&mut self, addr: Address) -> StoreResult<Counter> {
            self.cache.protect(&mut self.device, &self.params, addr)
        }

        fn unprotect(&mut self, addr: Address, c: Counter, release: Release) -> StoreResult<()> {
            let mut ctx = FlushContext {
                device: &mut self.device,
                allocator: &mut self.allocator,
                params: &self.params,
            };
            self.cache.unprotect(&mut ctx, addr, c, release)
        }
    }

    #[test]
    fn protect_twice_is_rejected() {
        let mut h = Harness::new(8);
        let addr = h.insert(1);
        let c = h.protect(addr).unwrap();
        assert!(matches!(h.protect(addr), Err(StoreError::AlreadyProtected(_))));
        h.unprotect(addr, c, Release::Clean).unwrap();
        assert!(h.protect(addr).is_ok());
    }

    #[test]
    fn unprotect_without_protect_fails() {
        let mut h = Harness::new(8);
        let err = h
            .unprotect(Address::new(0), Counter { value: 0, dirty: false }, Release::Clean)
            .unwrap_err();
        assert!(matches!(err, StoreError::NotProtected(_)));
    }

    #[test]
    fn eviction_flushes_dirty_entries() {
        let mut h = Harness::new(2);
        let a = h.insert(10);
        let b = h.insert(20);
        let c = h.insert(30);
        assert_eq!(h.cache.len(), 2);
        assert!(!h.cache.is_cached(a));
        assert_eq!(h.cache.stats().evictions, 1);

        // The evicted counter reloads from the device with its value intact.
        let counter = h.protect(a).unwrap();
        assert_eq!(counter.value, 10);
        assert_eq!(h.cache.stats().misses, 1);
        h.unprotect(a, counter, Release::Clean).unwrap();
        assert!(h.cache.is_cached(c) || h.cache.is_cached(b));
    }

    #[test]
    fn dirty_release_is_flushed() {
        let mut h = Harness::new(8);
        let addr = h.insert(1);
        let mut c = h.protect(addr).unwrap();
        c.value = 99;
        h.unprotect(addr, c, Release::Dirty).unwrap();

        let mut ctx = FlushContext {
            device: &mut h.device,
            allocator: &mut h.allocator,
            params: &h.params,
        };
        assert_eq!(h.cache.flush_all(&mut ctx).unwrap(), 1);
        assert_eq!(h.device.snapshot(), 99u32.to_be_bytes().to_vec());
    }

    #[test]
    fn delete_frees_space() {
        let mut h = Harness::new(8);
        let addr = h.insert(5);
        let c = h.protect(addr).unwrap();
        h.unprotect(addr, c, Release::Delete).unwrap();
        assert!(!h.cache.is_cached(addr));
        assert_eq!(h.allocator.eoa(), 0);
        assert_eq!(h.cache.stats().deletions, 1);
    }

    #[test]
    fn type_mismatch_keeps_entry() {
        let mut h = Harness::new(8);
        let addr = h.insert(5);
        let err = h
            .cache
            .protect::<Other>(&mut h.device, &h.params, addr)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::TypeMismatch {
                requested: "other",
                cached: "counter",
                ..
            }
        ));
        assert!(h.cache.is_cached(addr));
    }

    #[test]
    fn undefined_address_cannot_be_protected() {
        let mut h = Harness::new(8);
        assert!(matches!(
            h.protect(Address::UNDEF),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
