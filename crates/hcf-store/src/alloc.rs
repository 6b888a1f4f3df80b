//! First-fit allocator over the container address space.

use serde::{Deserialize, Serialize};
use tracing::trace;

use hcf_types::Address;

use crate::error::{StoreError, StoreResult};

/// A free range of the container address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub addr: u64,
    pub size: u64,
}

impl Extent {
    fn end(&self) -> u64 {
        self.addr + self.size
    }
}

/// Tracks the end of allocated space and a sorted list of freed extents.
///
/// Allocation is first-fit over the free list, falling back to extending the
/// end of allocation (EOA). Freed extents are merged with their neighbours;
/// an extent that reaches the EOA shrinks it instead of being listed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceAllocator {
    eoa: u64,
    free: Vec<Extent>,
    max_address: u64,
}

impl SpaceAllocator {
    /// Start allocating at `base`; no address may exceed `max_address`.
    pub fn new(base: u64, max_address: u64) -> Self {
        Self {
            eoa: base,
            free: Vec::new(),
            max_address,
        }
    }

    /// End of allocated space.
    pub fn eoa(&self) -> u64 {
        self.eoa
    }

    /// Freed extents below the EOA, sorted by address.
    pub fn free_extents(&self) -> &[Extent] {
        &self.free
    }

    /// Total bytes on the free list.
    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|e| e.size).sum()
    }

    /// Allocate `size` bytes.
    pub fn allocate(&mut self, size: u64) -> StoreResult<Address> {
        if size == 0 {
            return Err(StoreError::AllocationFailed {
                size,
                reason: "zero-sized allocation".into(),
            });
        }

        if let Some(idx) = self.free.iter().position(|e| e.size >= size) {
            let extent = &mut self.free[idx];
            let addr = extent.addr;
            if extent.size == size {
                self.free.remove(idx);
            } else {
                extent.addr += size;
                extent.size -= size;
            }
            trace!(addr, size, "allocated from free list");
            return Ok(Address::new(addr));
        }

        let addr = self.eoa;
        let end = addr.checked_add(size).ok_or_else(|| StoreError::AllocationFailed {
            size,
            reason: "address overflow".into(),
        })?;
        if end - 1 > self.max_address {
            return Err(StoreError::AllocationFailed {
                size,
                reason: format!("address space exhausted (max {:#x})", self.max_address),
            });
        }
        self.eoa = end;
        trace!(addr, size, "allocated at end of space");
        Ok(Address::new(addr))
    }

    /// Return `size` bytes at `addr` to the allocator.
    pub fn free(&mut self, addr: Address, size: u64) -> StoreResult<()> {
        let start = addr.value();
        if !addr.is_defined() || size == 0 || start + size > self.eoa {
            return Err(StoreError::InvalidFree { addr, size });
        }
        let extent = Extent { addr: start, size };

        let idx = self.free.partition_point(|e| e.addr < start);
        let overlaps_prev = idx > 0 && self.free[idx - 1].end() > start;
        let overlaps_next = idx < self.free.len() && self.free[idx].addr < extent.end();
        if overlaps_prev || overlaps_next {
            return Err(StoreError::InvalidFree { addr, size });
        }
        self.free.insert(idx, extent);

        // Merge with the following extent, then the preceding one.
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].addr {
            self.free[idx].size += self.free[idx + 1].size;
            self.free.remove(idx + 1);
        }
        let mut idx = idx;
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].addr {
            self.free[idx - 1].size += self.free[idx].size;
            self.free.remove(idx);
            idx -= 1;
        }

        if self.free[idx].end() == self.eoa {
            self.eoa = self.free[idx].addr;
            self.free.remove(idx);
        }
        trace!(addr = start, size, eoa = self.eoa, "freed space");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_sequentially() {
        let mut a = SpaceAllocator::new(64, u64::MAX - 1);
        assert_eq!(a.allocate(16).unwrap(), Address::new(64));
        assert_eq!(a.allocate(8).unwrap(), Address::new(80));
        assert_eq!(a.eoa(), 88);
    }

    #[test]
    fn reuses_freed_space_first_fit() {
        let mut a = SpaceAllocator::new(0, u64::MAX - 1);
        let x = a.allocate(32).unwrap();
        let _y = a.allocate(32).unwrap();
        a.free(x, 32).unwrap();
        assert_eq!(a.allocate(16).unwrap(), Address::new(0));
        assert_eq!(a.allocate(16).unwrap(), Address::new(16));
        assert!(a.free_extents().is_empty());
    }

    #[test]
    fn freeing_tail_shrinks_eoa() {
        let mut a = SpaceAllocator::new(0, u64::MAX - 1);
        let x = a.allocate(10).unwrap();
        let y = a.allocate(10).unwrap();
        a.free(x, 10).unwrap();
        a.free(y, 10).unwrap();
        assert_eq!(a.eoa(), 0);
        assert!(a.free_extents().is_empty());
    }

    #[test]
    fn merges_neighbours() {
        let mut a = SpaceAllocator::new(0, u64::MAX - 1);
        let x = a.allocate(8).unwrap();
        let y = a.allocate(8).unwrap();
        let z = a.allocate(8).unwrap();
        let _tail = a.allocate(8).unwrap();
        a.free(x, 8).unwrap();
        a.free(z, 8).unwrap();
        assert_eq!(a.free_extents().len(), 2);
        a.free(y, 8).unwrap();
        assert_eq!(a.free_extents(), &[Extent { addr: 0, size: 24 }]);
        assert_eq!(a.free_bytes(), 24);
    }

    #[test]
    fn double_free_is_rejected() {
        let mut a = SpaceAllocator::new(0, u64::MAX - 1);
        let x = a.allocate(8).unwrap();
        let _y = a.allocate(8).unwrap();
        a.free(x, 8).unwrap();
        assert!(matches!(a.free(x, 8), Err(StoreError::InvalidFree { .. })));
    }

    #[test]
    fn exhausting_small_address_space_fails() {
        let mut a = SpaceAllocator::new(0, 0xfffe);
        a.allocate(0xff00).unwrap();
        let err = a.allocate(0x200).unwrap_err();
        assert!(matches!(err, StoreError::AllocationFailed { .. }));
    }

    #[test]
    fn zero_sized_allocation_fails() {
        let mut a = SpaceAllocator::new(0, u64::MAX - 1);
        assert!(a.allocate(0).is_err());
    }
}
