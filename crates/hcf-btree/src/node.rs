//! Internal B-tree nodes.
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "TREE"]
//! [1 byte:  class tag]
//! [1 byte:  level (0 = children are leaf objects)]
//! [2 bytes: child count]
//! [A bytes: left sibling, undefined if none]
//! [A bytes: right sibling, undefined if none]
//! key[0] child[0] key[1] child[1] ... child[n-1] key[n]
//! zero padding to the fixed node size
//! ```
//! The fixed size leaves room for `2 * btree_k` children.

use tracing::trace;

use hcf_store::{BlockDevice, CacheClass, FlushContext, StoreError, StoreResult};
use hcf_types::{Address, Decoder, Encoder, FormatParams};

use crate::key::BtreeKey;

pub const BTREE_MAGIC: &[u8; 4] = b"TREE";

const HEADER_FIXED: usize = 8;

/// One internal node. `keys.len() == children.len() + 1` unless the node is
/// an empty root, in which case both are empty.
#[derive(Debug)]
pub struct BtreeNode<K> {
    pub(crate) class: u8,
    pub(crate) level: u8,
    pub(crate) keys: Vec<K>,
    pub(crate) children: Vec<Address>,
    pub(crate) left: Address,
    pub(crate) right: Address,
    pub(crate) dirty: bool,
}

impl<K: BtreeKey> BtreeNode<K> {
    pub(crate) fn empty(class: u8, level: u8) -> Self {
        Self {
            class,
            level,
            keys: Vec::new(),
            children: Vec::new(),
            left: Address::UNDEF,
            right: Address::UNDEF,
            dirty: true,
        }
    }

    pub(crate) fn with_contents(
        class: u8,
        level: u8,
        keys: Vec<K>,
        children: Vec<Address>,
        left: Address,
        right: Address,
    ) -> Self {
        Self {
            keys,
            children,
            left,
            right,
            ..Self::empty(class, level)
        }
    }

    /// Fixed encoded size for the container's fan-out.
    pub fn node_size(params: &FormatParams) -> usize {
        let cap = params.btree_capacity();
        let a = params.sizeof_addr as usize;
        HEADER_FIXED + 2 * a + (cap + 1) * K::encoded_size(params) + cap * a
    }

    pub fn class(&self) -> u8 {
        self.class
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    pub fn children(&self) -> &[Address] {
        &self.children
    }

    pub fn left_sibling(&self) -> Address {
        self.left
    }

    pub fn right_sibling(&self) -> Address {
        self.right
    }

    fn encode(&self, params: &FormatParams) -> StoreResult<Vec<u8>> {
        let size = Self::node_size(params);
        let mut buf = Vec::with_capacity(size);
        let mut enc = Encoder::new(&mut buf, params);
        enc.put_bytes(BTREE_MAGIC);
        enc.put_u8(self.class);
        enc.put_u8(self.level);
        enc.put_u16(self.children.len() as u16);
        enc.put_addr(self.left)?;
        enc.put_addr(self.right)?;
        if !self.children.is_empty() {
            for (key, child) in self.keys.iter().zip(&self.children) {
                key.encode(&mut enc)?;
                enc.put_addr(*child)?;
            }
            if let Some(last) = self.keys.last() {
                last.encode(&mut enc)?;
            }
        }
        enc.pad_to(size);
        Ok(buf)
    }
}

impl<K: BtreeKey> CacheClass for BtreeNode<K> {
    const NAME: &'static str = "b-tree node";

    fn load(device: &mut dyn BlockDevice, params: &FormatParams, addr: Address) -> StoreResult<Self> {
        let buf = device.read_vec(addr.value(), Self::node_size(params))?;
        let mut dec = Decoder::new(&buf, params);
        let magic = dec.get_bytes(4)?;
        if magic != BTREE_MAGIC {
            return Err(StoreError::BadSignature {
                addr,
                expected: String::from_utf8_lossy(BTREE_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(magic).into_owned(),
            });
        }
        let class = dec.get_u8()?;
        let level = dec.get_u8()?;
        let count = dec.get_u16()? as usize;
        if count > params.btree_capacity() {
            return Err(StoreError::Corrupt {
                addr,
                reason: format!(
                    "{count} children exceeds capacity {}",
                    params.btree_capacity()
                ),
            });
        }
        let left = dec.get_addr()?;
        let right = dec.get_addr()?;
        let mut keys = Vec::with_capacity(count + 1);
        let mut children = Vec::with_capacity(count);
        if count > 0 {
            for _ in 0..count {
                keys.push(K::decode(&mut dec)?);
                children.push(dec.get_addr()?);
            }
            keys.push(K::decode(&mut dec)?);
        }
        trace!(%addr, class, level, count, "loaded b-tree node");
        Ok(Self {
            dirty: false,
            ..Self::with_contents(class, level, keys, children, left, right)
        })
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
        if self.dirty {
            let buf = self.encode(ctx.params)?;
            ctx.device.write_at(addr.value(), &buf)?;
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

    fn compute_size(&self, params: &FormatParams) -> usize {
        Self::node_size(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_store::{FlushContext, MemoryDevice, SpaceAllocator};
    use hcf_types::HeapOffset;

    #[test]
    fn node_size_matches_layout() {
        let params = FormatParams::default();
        // 8 + 2*8 + 33 keys * 8 + 32 children * 8
        assert_eq!(BtreeNode::<HeapOffset>::node_size(&params), 8 + 16 + 264 + 256);
    }

    #[test]
    fn flush_then_load() {
        let params = FormatParams {
            btree_k: 2,
            ..FormatParams::default()
        };
        let mut device = MemoryDevice::new();
        let mut allocator = SpaceAllocator::new(0, params.max_address());
        let addr = Address::new(0);
        let mut node = BtreeNode::with_contents(
            3,
            1,
            vec![HeapOffset::new(0), HeapOffset::new(8), HeapOffset::new(24)],
            vec![Address::new(100), Address::new(200)],
            Address::UNDEF,
            Address::new(300),
        );
        let mut ctx = FlushContext {
            device: &mut device,
            allocator: &mut allocator,
            params: &params,
        };
        node.flush(&mut ctx, addr).unwrap();
        assert!(!node.is_dirty());

        let loaded = BtreeNode::<HeapOffset>::load(&mut device, &params, addr).unwrap();
        assert_eq!(loaded.class(), 3);
        assert_eq!(loaded.level(), 1);
        assert_eq!(loaded.keys(), node.keys());
        assert_eq!(loaded.children(), node.children());
        assert_eq!(loaded.left_sibling(), Address::UNDEF);
        assert_eq!(loaded.right_sibling(), Address::new(300));
        assert_eq!(
            device.snapshot().len(),
            BtreeNode::<HeapOffset>::node_size(&params)
        );
    }

    #[test]
    fn empty_node_round_trips() {
        let params = FormatParams::default();
        let mut device = MemoryDevice::new();
        let mut allocator = SpaceAllocator::new(0, params.max_address());
        let mut node = BtreeNode::<HeapOffset>::empty(7, 0);
        let mut ctx = FlushContext {
            device: &mut device,
            allocator: &mut allocator,
            params: &params,
        };
        node.flush(&mut ctx, Address::new(0)).unwrap();
        let loaded = BtreeNode::<HeapOffset>::load(&mut device, &params, Address::new(0)).unwrap();
        assert!(loaded.keys().is_empty());
        assert!(loaded.children().is_empty());
    }

    #[test]
    fn bad_magic_and_count_are_rejected() {
        let params = FormatParams::default();
        let size = BtreeNode::<HeapOffset>::node_size(&params);
        let mut device = MemoryDevice::from_bytes(&vec![0u8; size]);
        let err = BtreeNode::<HeapOffset>::load(&mut device, &params, Address::new(0)).unwrap_err();
        assert!(matches!(err, StoreError::BadSignature { .. }));

        let mut bytes = vec![0u8; size];
        bytes[..4].copy_from_slice(BTREE_MAGIC);
        bytes[6..8].copy_from_slice(&500u16.to_le_bytes());
        let mut device = MemoryDevice::from_bytes(&bytes);
        let err = BtreeNode::<HeapOffset>::load(&mut device, &params, Address::new(0)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
