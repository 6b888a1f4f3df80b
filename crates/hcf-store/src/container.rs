use tracing::debug;

use hcf_types::{Address, FormatParams};

use crate::alloc::SpaceAllocator;
use crate::cache::{CacheClass, CacheStats, FlushContext, MetadataCache, Release};
use crate::config::ContainerConfig;
use crate::error::{StoreError, StoreResult};
use crate::superblock::{Superblock, DATA_START};
use crate::traits::BlockDevice;

/// One open container: device, allocator, metadata cache and superblock
/// state.
///
/// All structured metadata goes through [`protect`](Self::protect) /
/// [`unprotect`](Self::unprotect) or the bracketing helper
/// [`with_entry`](Self::with_entry).
pub struct ContainerFile {
    device: Box<dyn BlockDevice>,
    allocator: SpaceAllocator,
    cache: MetadataCache,
    params: FormatParams,
    root: Address,
    heap_initial_size: usize,
}

impl ContainerFile {
    /// Start a new, empty container on `device`.
    pub fn create(device: Box<dyn BlockDevice>, config: &ContainerConfig) -> StoreResult<Self> {
        config.validate()?;
        let params = config.format;
        let mut file = Self {
            device,
            allocator: SpaceAllocator::new(DATA_START, params.max_address()),
            cache: MetadataCache::new(config.cache_max_entries),
            params,
            root: Address::UNDEF,
            heap_initial_size: config.heap_initial_size,
        };
        file.write_superblock()?;
        debug!(?params, "created container");
        Ok(file)
    }

    /// Open an existing container. Format parameters come from its superblock.
    pub fn open(mut device: Box<dyn BlockDevice>, config: &ContainerConfig) -> StoreResult<Self> {
        config.validate()?;
        let sb = Superblock::read(device.as_mut())?;
        debug!(root = %sb.root, eoa = sb.allocator.eoa(), "opened container");
        Ok(Self {
            device,
            allocator: sb.allocator,
            cache: MetadataCache::new(config.cache_max_entries),
            params: sb.params,
            root: sb.root,
            heap_initial_size: config.heap_initial_size,
        })
    }

    pub fn params(&self) -> &FormatParams {
        &self.params
    }

    /// Object header address of the root group.
    pub fn root(&self) -> Address {
        self.root
    }

    pub fn set_root(&mut self, root: Address) {
        self.root = root;
    }

    pub fn heap_initial_size(&self) -> usize {
        self.heap_initial_size
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn allocator(&self) -> &SpaceAllocator {
        &self.allocator
    }

    /// Returns `true` if `addr` is currently protected by some caller.
    pub fn is_protected(&self, addr: Address) -> bool {
        self.cache.is_protected(addr)
    }

    pub fn allocate(&mut self, size: u64) -> StoreResult<Address> {
        self.allocator.allocate(size)
    }

    pub fn free(&mut self, addr: Address, size: u64) -> StoreResult<()> {
        self.allocator.free(addr, size)
    }

    /// Take the entry at `addr` out of the cache.
    pub fn protect<T: CacheClass>(&mut self, addr: Address) -> StoreResult<T> {
        self.cache.protect(self.device.as_mut(), &self.params, addr)
    }

    /// Return a protected entry to the cache.
    pub fn unprotect<T: CacheClass>(
        &mut self,
        addr: Address,
        entry: T,
        release: Release,
    ) -> StoreResult<()> {
        let mut ctx = FlushContext {
            device: self.device.as_mut(),
            allocator: &mut self.allocator,
            params: &self.params,
        };
        self.cache.unprotect(&mut ctx, addr, entry, release)
    }

    /// Register a freshly created structure at an allocated address.
    pub fn insert_new<T: CacheClass>(&mut self, addr: Address, entry: T) -> StoreResult<()> {
        let mut ctx = FlushContext {
            device: self.device.as_mut(),
            allocator: &mut self.allocator,
            params: &self.params,
        };
        self.cache.insert_new(&mut ctx, addr, entry)
    }

    /// Protect `addr`, run `f`, and unprotect with the release mode `f`
    /// returns. On error the entry is returned unchanged and the error from
    /// `f` is propagated.
    pub fn with_entry<T, R, E, F>(&mut self, addr: Address, f: F) -> Result<R, E>
    where
        T: CacheClass,
        E: From<StoreError>,
        F: FnOnce(&mut Self, &mut T) -> Result<(R, Release), E>,
    {
        let mut entry = self.protect::<T>(addr)?;
        match f(self, &mut entry) {
            Ok((value, release)) => {
                self.unprotect(addr, entry, release)?;
                Ok(value)
            }
            Err(err) => {
                // Released clean; the error from `f` takes precedence.
                let _ = self.unprotect(addr, entry, Release::Clean);
                Err(err)
            }
        }
    }

    /// Read-only variant of [`with_entry`](Self::with_entry).
    pub fn read_entry<T, R, E, F>(&mut self, addr: Address, f: F) -> Result<R, E>
    where
        T: CacheClass,
        E: From<StoreError>,
        F: FnOnce(&mut Self, &T) -> Result<R, E>,
    {
        self.with_entry(addr, |file, entry: &mut T| Ok((f(file, entry)?, Release::Clean)))
    }

    /// Raw read of unstructured bytes.
    pub fn read_raw(&mut self, addr: Address, len: usize) -> StoreResult<Vec<u8>> {
        self.device.read_vec(addr.value(), len)
    }

    /// Write all dirty metadata and the superblock, then sync the device.
    pub fn flush(&mut self) -> StoreResult<()> {
        let mut ctx = FlushContext {
            device: self.device.as_mut(),
            allocator: &mut self.allocator,
            params: &self.params,
        };
        let written = self.cache.flush_all(&mut ctx)?;
        self.write_superblock()?;
        self.device.sync()?;
        debug!(written, "flushed container");
        Ok(())
    }

    /// Flush, drop every cached entry, and hand back the device.
    pub fn close(mut self) -> StoreResult<Box<dyn BlockDevice>> {
        if self.cache.protected_count() > 0 {
            return Err(StoreError::Config(format!(
                "cannot close with {} protected entries",
                self.cache.protected_count()
            )));
        }
        let mut ctx = FlushContext {
            device: self.device.as_mut(),
            allocator: &mut self.allocator,
            params: &self.params,
        };
        self.cache.evict_all(&mut ctx)?;
        self.write_superblock()?;
        self.device.sync()?;
        debug!(eoa = self.allocator.eoa(), "closed container");
        Ok(self.device)
    }

    fn write_superblock(&mut self) -> StoreResult<()> {
        let sb = Superblock {
            params: self.params,
            root: self.root,
            allocator: self.allocator.clone(),
        };
        sb.write(self.device.as_mut())
    }
}

impl std::fmt::Debug for ContainerFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerFile")
            .field("root", &self.root)
            .field("params", &self.params)
            .field("eoa", &self.allocator.eoa())
            .field("cache", &self.cache)
            .finish()
    }
}
