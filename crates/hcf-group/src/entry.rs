//! Symbol-table entries and their fixed-width record.
//!
//! ```text
//! [L bytes: name offset in the group's local heap]
//! [A bytes: object header address]
//! [4 bytes: cache type (0 nothing, 1 group, 2 symbolic link)]
//! [4 bytes: reserved]
//! [16 bytes: scratch]
//!     group:         B-tree address (A), heap address (A)
//!     symbolic link: link value offset (L)
//! ```

use hcf_store::{StoreError, StoreResult};
use hcf_types::{Address, Decoder, Encoder, FormatParams, HeapOffset, TypeError};

/// Width of the scratch region shared by every cache type.
pub const SCRATCH_SIZE: usize = 16;

const TAG_NOTHING: u32 = 0;
const TAG_GROUP: u32 = 1;
const TAG_SYMLINK: u32 = 2;

/// What an entry remembers about its target, so that traversal can skip
/// reading the object header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EntryCache {
    #[default]
    Nothing,
    Group { btree: Address, heap: Address },
    SymLink { link_off: HeapOffset },
}

impl EntryCache {
    fn tag(&self) -> u32 {
        match self {
            EntryCache::Nothing => TAG_NOTHING,
            EntryCache::Group { .. } => TAG_GROUP,
            EntryCache::SymLink { .. } => TAG_SYMLINK,
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, EntryCache::SymLink { .. })
    }
}

/// One name binding inside a symbol node.
#[derive(Clone, Copy, Debug)]
pub struct SymbolEntry {
    pub name_off: HeapOffset,
    /// Undefined for symbolic links.
    pub header: Address,
    pub cache: EntryCache,
    /// In-memory only; set when the entry needs writing.
    pub dirty: bool,
}

impl PartialEq for SymbolEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name_off == other.name_off && self.header == other.header && self.cache == other.cache
    }
}

impl Eq for SymbolEntry {}

impl SymbolEntry {
    /// A hard link to `header`.
    pub fn hard(header: Address, cache: EntryCache) -> Self {
        Self {
            name_off: HeapOffset::EMPTY,
            header,
            cache,
            dirty: true,
        }
    }

    /// A symbolic link whose value is stored at `link_off`.
    pub fn soft(link_off: HeapOffset) -> Self {
        Self {
            name_off: HeapOffset::EMPTY,
            header: Address::UNDEF,
            cache: EntryCache::SymLink { link_off },
            dirty: true,
        }
    }

    /// The record used to fill unused node slots.
    pub fn null() -> Self {
        Self {
            name_off: HeapOffset::EMPTY,
            header: Address::new(0),
            cache: EntryCache::Nothing,
            dirty: false,
        }
    }

    pub fn is_symlink(&self) -> bool {
        self.cache.is_symlink()
    }

    /// Encoded size of one record.
    pub fn encoded_size(params: &FormatParams) -> usize {
        params.sizeof_size as usize + params.sizeof_addr as usize + 8 + SCRATCH_SIZE
    }

    pub fn encode(&self, enc: &mut Encoder<'_>) -> Result<(), TypeError> {
        enc.put_offset(self.name_off)?;
        enc.put_addr(self.header)?;
        enc.put_u32(self.cache.tag());
        enc.put_zeros(4);
        let scratch_end = enc.position() + SCRATCH_SIZE;
        match self.cache {
            EntryCache::Nothing => {}
            EntryCache::Group { btree, heap } => {
                enc.put_addr(btree)?;
                enc.put_addr(heap)?;
            }
            EntryCache::SymLink { link_off } => enc.put_offset(link_off)?,
        }
        enc.pad_to(scratch_end);
        Ok(())
    }

    /// Decode one record. `node` is only used to report corruption.
    pub fn decode(dec: &mut Decoder<'_>, node: Address) -> StoreResult<Self> {
        let name_off = dec.get_offset()?;
        let header = dec.get_addr()?;
        let tag = dec.get_u32()?;
        dec.skip(4)?;
        let scratch = dec.position();
        let cache = match tag {
            TAG_NOTHING => EntryCache::Nothing,
            TAG_GROUP => EntryCache::Group {
                btree: dec.get_addr()?,
                heap: dec.get_addr()?,
            },
            TAG_SYMLINK => EntryCache::SymLink {
                link_off: dec.get_offset()?,
            },
            other => {
                return Err(StoreError::Corrupt {
                    addr: node,
                    reason: format!("unknown symbol entry cache type {other}"),
                })
            }
        };
        dec.seek(scratch + SCRATCH_SIZE)?;
        Ok(Self {
            name_off,
            header,
            cache,
            dirty: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_types::ByteOrder;
    use proptest::prelude::*;

    fn round_trip(entry: &SymbolEntry, params: &FormatParams) -> SymbolEntry {
        let mut buf = Vec::new();
        entry.encode(&mut Encoder::new(&mut buf, params)).unwrap();
        assert_eq!(buf.len(), SymbolEntry::encoded_size(params));
        let mut dec = Decoder::new(&buf, params);
        let decoded = SymbolEntry::decode(&mut dec, Address::new(0)).unwrap();
        assert_eq!(dec.remaining(), 0);
        decoded
    }

    #[test]
    fn null_entry_is_zeroed() {
        let params = FormatParams::default();
        let mut buf = Vec::new();
        SymbolEntry::null()
            .encode(&mut Encoder::new(&mut buf, &params))
            .unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        assert_eq!(round_trip(&SymbolEntry::null(), &params), SymbolEntry::null());
    }

    #[test]
    fn record_layout() {
        let params = FormatParams::default();
        let entry = SymbolEntry {
            name_off: HeapOffset::new(0x18),
            header: Address::new(0x400),
            cache: EntryCache::SymLink {
                link_off: HeapOffset::new(0x28),
            },
            dirty: true,
        };
        let mut buf = Vec::new();
        entry.encode(&mut Encoder::new(&mut buf, &params)).unwrap();
        assert_eq!(buf.len(), 40);
        assert_eq!(buf[0], 0x18);
        assert_eq!(&buf[8..10], &[0x00, 0x04]);
        assert_eq!(buf[16], 2);
        assert_eq!(buf[24], 0x28);
    }

    #[test]
    fn unknown_tag_is_corruption() {
        let params = FormatParams::default();
        let mut buf = Vec::new();
        SymbolEntry::null()
            .encode(&mut Encoder::new(&mut buf, &params))
            .unwrap();
        buf[16] = 7;
        let err = SymbolEntry::decode(&mut Decoder::new(&buf, &params), Address::new(99)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { addr, .. } if addr == Address::new(99)));
    }

    fn params_strategy() -> impl Strategy<Value = FormatParams> {
        (prop::sample::select(vec![4u8, 8]), prop::bool::ANY).prop_map(|(width, big)| FormatParams {
            sizeof_addr: width,
            sizeof_size: width,
            byte_order: if big { ByteOrder::Big } else { ByteOrder::Little },
            ..FormatParams::default()
        })
    }

    fn entry_strategy() -> impl Strategy<Value = SymbolEntry> {
        let addr = prop_oneof![
            Just(Address::UNDEF),
            (0u64..u32::MAX as u64 - 1).prop_map(Address::new),
        ];
        let offset = (0u64..u32::MAX as u64).prop_map(HeapOffset::new);
        let cache = prop_oneof![
            Just(EntryCache::Nothing),
            (addr.clone(), addr.clone()).prop_map(|(btree, heap)| EntryCache::Group { btree, heap }),
            offset.clone().prop_map(|link_off| EntryCache::SymLink { link_off }),
        ];
        (offset, addr, cache).prop_map(|(name_off, header, cache)| SymbolEntry {
            name_off,
            header,
            cache,
            dirty: false,
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(params in params_strategy(), entry in entry_strategy()) {
            prop_assert_eq!(round_trip(&entry, &params), entry);
        }
    }
}
