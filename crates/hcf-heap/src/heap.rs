//! The local heap cache class.
//!
//! On-disk format (field widths follow the container's `FormatParams`):
//! ```text
//! header, at the heap address:
//!   [4 bytes: magic "HEAP"]
//!   [1 byte:  version (0)]
//!   [3 bytes: reserved]
//!   [L bytes: data block size]
//!   [L bytes: offset of first free block, all ones if none]
//!   [A bytes: data block address]
//!
//! data block, anywhere:
//!   strings, NUL-terminated, 8-byte aligned
//!   free blocks: [L bytes: next free offset] [L bytes: block size]
//! ```

use tracing::{debug, trace};

use hcf_store::{
    BlockDevice, CacheClass, ContainerFile, FlushContext, Release, StoreError, StoreResult,
};
use hcf_types::{Address, Decoder, Encoder, FormatParams, HeapOffset};

use crate::error::{HeapError, HeapResult};

pub const HEAP_MAGIC: &[u8; 4] = b"HEAP";
pub const HEAP_VERSION: u8 = 0;

const ALIGNMENT: usize = 8;

fn align(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FreeBlock {
    offset: usize,
    size: usize,
}

impl FreeBlock {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// An in-memory local heap.
#[derive(Debug)]
pub struct LocalHeap {
    data: Vec<u8>,
    /// Sorted by offset, never adjacent.
    free: Vec<FreeBlock>,
    data_addr: Address,
    /// Size of the data block currently allocated in the container.
    disk_size: usize,
    min_block: usize,
    dirty: bool,
}

impl LocalHeap {
    /// Encoded size of the heap header.
    pub fn header_size(params: &FormatParams) -> usize {
        8 + 2 * params.sizeof_size as usize + params.sizeof_addr as usize
    }

    /// A fresh heap with room for about `size_hint` bytes. Offset 0 holds
    /// the empty string.
    pub fn new(params: &FormatParams, size_hint: usize) -> Self {
        let min_block = align(2 * params.sizeof_size as usize);
        let size = align(size_hint.max(min_block));
        let mut heap = Self {
            data: vec![0; size],
            free: vec![FreeBlock { offset: 0, size }],
            data_addr: Address::UNDEF,
            disk_size: 0,
            min_block,
            dirty: true,
        };
        let offset = heap.allocate(1);
        debug_assert_eq!(offset, 0);
        heap
    }

    /// Allocate a header in `file` and register a new heap there.
    pub fn create(file: &mut ContainerFile, size_hint: usize) -> HeapResult<Address> {
        let params = *file.params();
        let addr = file.allocate(Self::header_size(&params) as u64)?;
        file.insert_new(addr, Self::new(&params, size_hint))?;
        debug!(%addr, size_hint, "created local heap");
        Ok(addr)
    }

    /// Free the heap's header and data block.
    pub fn delete(file: &mut ContainerFile, addr: Address) -> HeapResult<()> {
        file.with_entry(addr, |file, heap: &mut LocalHeap| {
            if heap.data_addr.is_defined() {
                file.free(heap.data_addr, heap.disk_size as u64)?;
            }
            Ok::<_, HeapError>(((), Release::Delete))
        })?;
        debug!(%addr, "deleted local heap");
        Ok(())
    }

    /// Size of the data block in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn free_bytes(&self) -> usize {
        self.free.iter().map(|b| b.size).sum()
    }

    /// Address of the data block, undefined until the first flush.
    pub fn data_addr(&self) -> Address {
        self.data_addr
    }

    fn granule(&self, len: usize) -> usize {
        align(len).max(self.min_block)
    }

    /// First fit. A block is split only if the remainder can hold a free
    /// block record.
    fn allocate(&mut self, len: usize) -> usize {
        let need = self.granule(len);
        loop {
            let found = self
                .free
                .iter()
                .position(|b| b.size == need || b.size >= need + self.min_block);
            if let Some(i) = found {
                let block = self.free[i];
                if block.size == need {
                    self.free.remove(i);
                } else {
                    self.free[i] = FreeBlock {
                        offset: block.offset + need,
                        size: block.size - need,
                    };
                }
                self.dirty = true;
                return block.offset;
            }
            self.grow(need);
        }
    }

    fn grow(&mut self, need: usize) {
        let old = self.data.len();
        let new_len = (old * 2).max(old + need + self.min_block);
        self.data.resize(new_len, 0);
        match self.free.last_mut() {
            Some(tail) if tail.end() == old => tail.size += new_len - old,
            _ => self.free.push(FreeBlock {
                offset: old,
                size: new_len - old,
            }),
        }
        self.dirty = true;
        trace!(old, new_len, "local heap grew");
    }

    /// Store `bytes` followed by a NUL terminator.
    pub fn insert(&mut self, bytes: &[u8]) -> HeapResult<HeapOffset> {
        if bytes.contains(&0) {
            return Err(HeapError::EmbeddedNul);
        }
        let offset = self.allocate(bytes.len() + 1);
        let end = offset + self.granule(bytes.len() + 1);
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.data[offset + bytes.len()..end].fill(0);
        Ok(HeapOffset::new(offset as u64))
    }

    pub fn insert_str(&mut self, s: &str) -> HeapResult<HeapOffset> {
        self.insert(s.as_bytes())
    }

    /// The bytes at `offset`, up to but excluding the terminator.
    pub fn get(&self, offset: HeapOffset) -> HeapResult<&[u8]> {
        let start = offset.as_index();
        if start >= self.data.len() {
            return Err(HeapError::OffsetOutOfRange {
                offset,
                size: self.data.len(),
            });
        }
        let tail = &self.data[start..];
        let nul = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(HeapError::NotTerminated { offset })?;
        Ok(&tail[..nul])
    }

    pub fn read_str(&self, offset: HeapOffset) -> HeapResult<&str> {
        std::str::from_utf8(self.get(offset)?).map_err(|_| HeapError::InvalidUtf8 { offset })
    }

    /// Release `len` stored bytes (terminator included) at `offset`.
    pub fn remove(&mut self, offset: HeapOffset, len: usize) -> HeapResult<()> {
        let start = offset.as_index();
        if start == 0 {
            return Err(HeapError::ReservedOffset);
        }
        let size = self.granule(len);
        let invalid = |reason| HeapError::InvalidFree {
            offset,
            len,
            reason,
        };
        if start % ALIGNMENT != 0 {
            return Err(invalid("misaligned offset"));
        }
        if start + size > self.data.len() {
            return Err(invalid("past the end of the heap"));
        }
        if self
            .free
            .iter()
            .any(|b| b.offset < start + size && start < b.end())
        {
            return Err(invalid("overlaps a free block"));
        }

        let idx = self.free.partition_point(|b| b.offset < start);
        self.free.insert(idx, FreeBlock { offset: start, size });
        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            self.free[idx].size += self.free[idx + 1].size;
            self.free.remove(idx + 1);
        }
        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            self.free[idx - 1].size += self.free[idx].size;
            self.free.remove(idx);
        }
        self.shrink();
        self.dirty = true;
        Ok(())
    }

    /// Remove the string at `offset`, measuring its length first.
    pub fn remove_str(&mut self, offset: HeapOffset) -> HeapResult<()> {
        let len = self.get(offset)?.len() + 1;
        self.remove(offset, len)
    }

    /// Drop a trailing free block once it covers at least half the heap.
    fn shrink(&mut self) {
        let len = self.data.len();
        if let Some(tail) = self.free.last().copied() {
            if tail.end() == len && tail.size * 2 >= len {
                self.data.truncate(tail.offset);
                self.free.pop();
                trace!(old = len, new_len = tail.offset, "local heap shrank");
            }
        }
    }

    fn encode_free_list(&mut self, params: &FormatParams) -> StoreResult<()> {
        let none = params.max_length();
        for i in 0..self.free.len() {
            let block = self.free[i];
            let next = self.free.get(i + 1).map_or(none, |b| b.offset as u64);
            let mut record = Vec::with_capacity(self.min_block);
            let mut enc = Encoder::new(&mut record, params);
            enc.put_length(next)?;
            enc.put_length(block.size as u64)?;
            self.data[block.offset..block.offset + record.len()].copy_from_slice(&record);
        }
        Ok(())
    }

    fn decode_free_list(
        data: &[u8],
        params: &FormatParams,
        addr: Address,
        mut head: u64,
        min_block: usize,
    ) -> StoreResult<Vec<FreeBlock>> {
        let none = params.max_length();
        let corrupt = |reason: String| StoreError::Corrupt { addr, reason };
        let mut free: Vec<FreeBlock> = Vec::new();
        while head != none {
            let offset = head as usize;
            if offset + min_block > data.len() {
                return Err(corrupt(format!("free block at {offset} past end of heap")));
            }
            if let Some(prev) = free.last() {
                if offset < prev.end() {
                    return Err(corrupt(format!("free list out of order at {offset}")));
                }
            }
            let mut dec = Decoder::new(&data[offset..], params);
            let next = dec.get_length()?;
            let size = dec.get_length()? as usize;
            if size < min_block || offset + size > data.len() {
                return Err(corrupt(format!("free block at {offset} has bad size {size}")));
            }
            free.push(FreeBlock { offset, size });
            head = next;
        }
        Ok(free)
    }
}

impl CacheClass for LocalHeap {
    const NAME: &'static str = "local heap";

    fn load(device: &mut dyn BlockDevice, params: &FormatParams, addr: Address) -> StoreResult<Self> {
        let header = device.read_vec(addr.value(), Self::header_size(params))?;
        let mut dec = Decoder::new(&header, params);
        let magic = dec.get_bytes(4)?;
        if magic != HEAP_MAGIC {
            return Err(StoreError::BadSignature {
                addr,
                expected: String::from_utf8_lossy(HEAP_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(magic).into_owned(),
            });
        }
        let version = dec.get_u8()?;
        if version != HEAP_VERSION {
            return Err(StoreError::UnsupportedVersion {
                addr,
                version: version as u32,
            });
        }
        dec.skip(3)?;
        let data_size = dec.get_length()? as usize;
        let free_head = dec.get_length()?;
        let data_addr = dec.get_addr()?;

        let data = if data_size > 0 {
            if !data_addr.is_defined() {
                return Err(StoreError::Corrupt {
                    addr,
                    reason: "heap has data but no data address".into(),
                });
            }
            device.read_vec(data_addr.value(), data_size)?
        } else {
            Vec::new()
        };
        let min_block = align(2 * params.sizeof_size as usize);
        let free = Self::decode_free_list(&data, params, addr, free_head, min_block)?;
        trace!(%addr, %data_addr, data_size, free_blocks = free.len(), "loaded local heap");

        Ok(Self {
            data,
            free,
            data_addr,
            disk_size: data_size,
            min_block,
            dirty: false,
        })
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let len = self.data.len();
        if !self.data_addr.is_defined() || self.disk_size != len {
            if self.data_addr.is_defined() {
                ctx.allocator.free(self.data_addr, self.disk_size as u64)?;
            }
            self.data_addr = ctx.allocator.allocate(len as u64)?;
            self.disk_size = len;
            trace!(%addr, data_addr = %self.data_addr, len, "relocated heap data block");
        }
        self.encode_free_list(ctx.params)?;
        ctx.device.write_at(self.data_addr.value(), &self.data)?;

        let mut header = Vec::with_capacity(Self::header_size(ctx.params));
        let mut enc = Encoder::new(&mut header, ctx.params);
        enc.put_bytes(HEAP_MAGIC);
        enc.put_u8(HEAP_VERSION);
        enc.put_zeros(3);
        enc.put_length(len as u64)?;
        enc.put_length(
            self.free
                .first()
                .map_or(ctx.params.max_length(), |b| b.offset as u64),
        )?;
        enc.put_addr(self.data_addr)?;
        ctx.device.write_at(addr.value(), &header)?;
        self.dirty = false;
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

    fn compute_size(&self, params: &FormatParams) -> usize {
        Self::header_size(params)
    }
}

/// Insert `s` into the heap at `addr`.
pub fn insert_str(file: &mut ContainerFile, addr: Address, s: &str) -> HeapResult<HeapOffset> {
    file.with_entry(addr, |_, heap: &mut LocalHeap| {
        Ok((heap.insert_str(s)?, Release::Dirty))
    })
}

/// Copy the string at `offset` out of the heap at `addr`.
pub fn read_string(file: &mut ContainerFile, addr: Address, offset: HeapOffset) -> HeapResult<String> {
    file.read_entry(addr, |_, heap: &LocalHeap| {
        heap.read_str(offset).map(str::to_owned)
    })
}

/// Remove the string at `offset` from the heap at `addr`.
pub fn remove_str(file: &mut ContainerFile, addr: Address, offset: HeapOffset) -> HeapResult<()> {
    file.with_entry(addr, |_, heap: &mut LocalHeap| {
        heap.remove_str(offset)?;
        Ok(((), Release::Dirty))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_store::{ContainerConfig, MemoryDevice};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn params() -> FormatParams {
        FormatParams::default()
    }

    #[test]
    fn empty_string_lives_at_offset_zero() {
        let heap = LocalHeap::new(&params(), 64);
        assert_eq!(heap.read_str(HeapOffset::EMPTY).unwrap(), "");
        assert_eq!(heap.len(), 64);
        assert_eq!(heap.free_bytes(), 64 - 16);
    }

    #[test]
    fn insert_and_read_back() {
        let mut heap = LocalHeap::new(&params(), 64);
        let a = heap.insert_str("alpha").unwrap();
        let b = heap.insert_str("a-much-longer-member-name").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.value() % 8, 0);
        assert_eq!(b.value() % 8, 0);
        assert_eq!(heap.read_str(a).unwrap(), "alpha");
        assert_eq!(heap.read_str(b).unwrap(), "a-much-longer-member-name");
    }

    #[test]
    fn heap_grows_when_full() {
        let mut heap = LocalHeap::new(&params(), 16);
        let offsets: Vec<_> = (0..50)
            .map(|i| heap.insert_str(&format!("name-{i}")).unwrap())
            .collect();
        assert!(heap.len() >= 50 * 16);
        for (i, off) in offsets.iter().enumerate() {
            assert_eq!(heap.read_str(*off).unwrap(), format!("name-{i}"));
        }
    }

    #[test]
    fn removed_space_is_reused() {
        let mut heap = LocalHeap::new(&params(), 256);
        let a = heap.insert_str("first").unwrap();
        let _b = heap.insert_str("second").unwrap();
        heap.remove_str(a).unwrap();
        let c = heap.insert_str("third").unwrap();
        assert_eq!(a, c);
        assert_eq!(heap.read_str(c).unwrap(), "third");
    }

    #[test]
    fn neighbours_merge_and_tail_shrinks() {
        let mut heap = LocalHeap::new(&params(), 64);
        let a = heap.insert_str("aaaa").unwrap();
        let b = heap.insert_str("bbbb").unwrap();
        let c = heap.insert_str("cccc").unwrap();
        assert_eq!(heap.free_bytes(), 0);
        heap.remove_str(a).unwrap();
        heap.remove_str(c).unwrap();
        heap.remove_str(b).unwrap();
        // Everything past the sentinel was freed and merged into one tail
        // block, which is then dropped.
        assert_eq!(heap.len(), 16);
        assert_eq!(heap.free_bytes(), 0);
    }

    #[test]
    fn invalid_removals_are_rejected() {
        let mut heap = LocalHeap::new(&params(), 64);
        assert!(matches!(
            heap.remove(HeapOffset::EMPTY, 1),
            Err(HeapError::ReservedOffset)
        ));
        let a = heap.insert_str("x").unwrap();
        heap.insert_str("keep").unwrap();
        heap.remove_str(a).unwrap();
        assert!(matches!(
            heap.remove(a, 2),
            Err(HeapError::InvalidFree { .. })
        ));
        assert!(matches!(
            heap.remove(HeapOffset::new(4096), 2),
            Err(HeapError::InvalidFree { .. })
        ));
    }

    #[test]
    fn read_errors() {
        let mut heap = LocalHeap::new(&params(), 16);
        assert!(matches!(
            heap.get(HeapOffset::new(999)),
            Err(HeapError::OffsetOutOfRange { .. })
        ));
        assert!(matches!(
            heap.insert(b"bad\0name"),
            Err(HeapError::EmbeddedNul)
        ));
    }

    #[test]
    fn survives_close_and_reopen() {
        let dev = MemoryDevice::new();
        let config = ContainerConfig::default();
        let mut file = ContainerFile::create(Box::new(dev.clone()), &config).unwrap();
        let addr = LocalHeap::create(&mut file, 32).unwrap();
        let gone = insert_str(&mut file, addr, "gone").unwrap();
        let kept = insert_str(&mut file, addr, "kept").unwrap();
        remove_str(&mut file, addr, gone).unwrap();
        file.set_root(addr);
        file.close().unwrap();

        let mut file = ContainerFile::open(Box::new(dev), &config).unwrap();
        assert_eq!(read_string(&mut file, addr, kept).unwrap(), "kept");
        assert_eq!(read_string(&mut file, addr, HeapOffset::EMPTY).unwrap(), "");
        // The persisted free list hands the removed slot back out.
        assert_eq!(insert_str(&mut file, addr, "new").unwrap(), gone);
    }

    #[test]
    fn delete_releases_header_and_data() {
        let mut file =
            ContainerFile::create(Box::new(MemoryDevice::new()), &ContainerConfig::default())
                .unwrap();
        let addr = LocalHeap::create(&mut file, 64).unwrap();
        file.flush().unwrap();
        let eoa = file.allocator().eoa();
        LocalHeap::delete(&mut file, addr).unwrap();
        assert!(file.allocator().eoa() < eoa);
        assert_eq!(file.cache_stats().deletions, 1);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dev = MemoryDevice::from_bytes(&[0u8; 256]);
        let mut boxed: Box<dyn BlockDevice> = Box::new(dev);
        let err = LocalHeap::load(boxed.as_mut(), &params(), Address::new(64)).unwrap_err();
        assert!(matches!(err, StoreError::BadSignature { .. }));
    }

    proptest! {
        #[test]
        fn live_strings_stay_readable(ops in prop::collection::vec((any::<bool>(), "[a-z]{1,24}"), 1..80)) {
            let mut heap = LocalHeap::new(&params(), 32);
            let mut live: BTreeMap<u64, String> = BTreeMap::new();
            for (remove, name) in ops {
                if remove && !live.is_empty() {
                    let key = *live.keys().nth(name.len() % live.len()).unwrap();
                    live.remove(&key);
                    heap.remove_str(HeapOffset::new(key)).unwrap();
                } else {
                    let off = heap.insert_str(&name).unwrap();
                    prop_assert!(live.insert(off.value(), name).is_none());
                }
                for (off, s) in &live {
                    prop_assert_eq!(heap.read_str(HeapOffset::new(*off)).unwrap(), s.as_str());
                }
            }
        }
    }
}
