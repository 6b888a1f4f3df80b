//! The object header cache class.
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "OHDR"]
//! [1 byte:  version (1)]
//! [1 byte:  kind (1 group, 2 dataset, 3 named datatype)]
//! [2 bytes: reserved]
//! [4 bytes: link count]
//! [A bytes: symbol-table B-tree address, undefined unless a group]
//! [A bytes: symbol-table heap address, undefined unless a group]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use hcf_store::{
    BlockDevice, CacheClass, ContainerFile, FlushContext, Release, StoreError, StoreResult,
};
use hcf_types::{Address, Decoder, Encoder, FormatParams};

use crate::error::{ObjectError, ObjectResult};

pub const OHDR_MAGIC: &[u8; 4] = b"OHDR";
pub const OHDR_VERSION: u8 = 1;

/// What an object header describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Group,
    Dataset,
    NamedDatatype,
}

impl ObjectKind {
    fn tag(self) -> u8 {
        match self {
            ObjectKind::Group => 1,
            ObjectKind::Dataset => 2,
            ObjectKind::NamedDatatype => 3,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(ObjectKind::Group),
            2 => Some(ObjectKind::Dataset),
            3 => Some(ObjectKind::NamedDatatype),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Group => "group",
            ObjectKind::Dataset => "dataset",
            ObjectKind::NamedDatatype => "named datatype",
        };
        f.write_str(name)
    }
}

/// Where a group keeps its members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTableMessage {
    pub btree: Address,
    pub heap: Address,
}

/// A decoded header, copied out of the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ObjectInfo {
    pub kind: ObjectKind,
    pub link_count: u32,
    pub stab: Option<SymbolTableMessage>,
}

#[derive(Debug)]
pub struct ObjectHeader {
    info: ObjectInfo,
    dirty: bool,
}

impl ObjectHeader {
    pub fn encoded_size(params: &FormatParams) -> usize {
        12 + 2 * params.sizeof_addr as usize
    }

    /// Write a new header with a link count of zero.
    pub fn create(
        file: &mut ContainerFile,
        kind: ObjectKind,
        stab: Option<SymbolTableMessage>,
    ) -> ObjectResult<Address> {
        let addr = file.allocate(Self::encoded_size(file.params()) as u64)?;
        let header = ObjectHeader {
            info: ObjectInfo {
                kind,
                link_count: 0,
                stab,
            },
            dirty: true,
        };
        file.insert_new(addr, header)?;
        debug!(%addr, %kind, "created object header");
        Ok(addr)
    }

    pub fn read(file: &mut ContainerFile, addr: Address) -> ObjectResult<ObjectInfo> {
        file.read_entry(addr, |_, h: &ObjectHeader| Ok(h.info))
    }

    /// The symbol-table message of a group.
    pub fn stab(file: &mut ContainerFile, addr: Address) -> ObjectResult<SymbolTableMessage> {
        Self::read(file, addr)?
            .stab
            .ok_or(ObjectError::NotAGroup(addr))
    }

    /// Add `delta` to the link count and return the new count.
    pub fn link_adjust(file: &mut ContainerFile, addr: Address, delta: i32) -> ObjectResult<u32> {
        let count = file.with_entry(addr, |_, h: &mut ObjectHeader| {
            let count = h.info.link_count;
            let next = i64::from(count) + i64::from(delta);
            if next < 0 {
                return Err(ObjectError::LinkCountUnderflow { addr, count, delta });
            }
            let next = u32::try_from(next).map_err(|_| ObjectError::LinkCountOverflow(addr))?;
            h.info.link_count = next;
            Ok((next, Release::Dirty))
        })?;
        trace!(%addr, delta, count, "adjusted link count");
        Ok(count)
    }

    /// Free the header. The caller owns whatever the header pointed at.
    pub fn delete(file: &mut ContainerFile, addr: Address) -> ObjectResult<()> {
        file.with_entry(addr, |_, _: &mut ObjectHeader| {
            Ok::<_, ObjectError>(((), Release::Delete))
        })?;
        debug!(%addr, "deleted object header");
        Ok(())
    }
}

impl CacheClass for ObjectHeader {
    const NAME: &'static str = "object header";

    fn load(device: &mut dyn BlockDevice, params: &FormatParams, addr: Address) -> StoreResult<Self> {
        let buf = device.read_vec(addr.value(), Self::encoded_size(params))?;
        let mut dec = Decoder::new(&buf, params);
        let magic = dec.get_bytes(4)?;
        if magic != OHDR_MAGIC {
            return Err(StoreError::BadSignature {
                addr,
                expected: String::from_utf8_lossy(OHDR_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(magic).into_owned(),
            });
        }
        let version = dec.get_u8()?;
        if version != OHDR_VERSION {
            return Err(StoreError::UnsupportedVersion {
                addr,
                version: version as u32,
            });
        }
        let tag = dec.get_u8()?;
        let kind = ObjectKind::from_tag(tag).ok_or_else(|| StoreError::Corrupt {
            addr,
            reason: format!("unknown object kind {tag}"),
        })?;
        dec.skip(2)?;
        let link_count = dec.get_u32()?;
        let btree = dec.get_addr()?;
        let heap = dec.get_addr()?;
        let stab = match kind {
            ObjectKind::Group => Some(SymbolTableMessage { btree, heap }),
            _ => None,
        };
        Ok(Self {
            info: ObjectInfo {
                kind,
                link_count,
                stab,
            },
            dirty: false,
        })
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let mut buf = Vec::with_capacity(Self::encoded_size(ctx.params));
        let mut enc = Encoder::new(&mut buf, ctx.params);
        enc.put_bytes(OHDR_MAGIC);
        enc.put_u8(OHDR_VERSION);
        enc.put_u8(self.info.kind.tag());
        enc.put_zeros(2);
        enc.put_u32(self.info.link_count);
        let stab = self.info.stab.unwrap_or(SymbolTableMessage {
            btree: Address::UNDEF,
            heap: Address::UNDEF,
        });
        enc.put_addr(stab.btree)?;
        enc.put_addr(stab.heap)?;
        ctx.device.write_at(addr.value(), &buf)?;
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
        Self::encoded_size(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcf_store::{ContainerConfig, MemoryDevice};

    fn container() -> ContainerFile {
        ContainerFile::create(Box::new(MemoryDevice::new()), &ContainerConfig::default()).unwrap()
    }

    #[test]
    fn link_count_moves_and_refuses_underflow() {
        let mut file = container();
        let addr = ObjectHeader::create(&mut file, ObjectKind::Dataset, None).unwrap();
        assert_eq!(ObjectHeader::link_adjust(&mut file, addr, 1).unwrap(), 1);
        assert_eq!(ObjectHeader::link_adjust(&mut file, addr, 2).unwrap(), 3);
        assert_eq!(ObjectHeader::link_adjust(&mut file, addr, -3).unwrap(), 0);
        let err = ObjectHeader::link_adjust(&mut file, addr, -1).unwrap_err();
        assert!(matches!(err, ObjectError::LinkCountUnderflow { count: 0, .. }));
        assert_eq!(ObjectHeader::read(&mut file, addr).unwrap().link_count, 0);
    }

    #[test]
    fn stab_only_for_groups() {
        let mut file = container();
        let stab = SymbolTableMessage {
            btree: Address::new(1000),
            heap: Address::new(2000),
        };
        let group = ObjectHeader::create(&mut file, ObjectKind::Group, Some(stab)).unwrap();
        let dtype = ObjectHeader::create(&mut file, ObjectKind::NamedDatatype, None).unwrap();
        assert_eq!(ObjectHeader::stab(&mut file, group).unwrap(), stab);
        assert!(matches!(
            ObjectHeader::stab(&mut file, dtype),
            Err(ObjectError::NotAGroup(_))
        ));
    }

    #[test]
    fn survives_reopen() {
        let dev = MemoryDevice::new();
        let config = ContainerConfig::default();
        let mut file = ContainerFile::create(Box::new(dev.clone()), &config).unwrap();
        let stab = SymbolTableMessage {
            btree: Address::new(96),
            heap: Address::new(128),
        };
        let addr = ObjectHeader::create(&mut file, ObjectKind::Group, Some(stab)).unwrap();
        ObjectHeader::link_adjust(&mut file, addr, 2).unwrap();
        file.close().unwrap();

        let mut file = ContainerFile::open(Box::new(dev), &config).unwrap();
        let info = ObjectHeader::read(&mut file, addr).unwrap();
        assert_eq!(info.kind, ObjectKind::Group);
        assert_eq!(info.link_count, 2);
        assert_eq!(info.stab, Some(stab));
    }

    #[test]
    fn unknown_kind_is_corrupt() {
        let params = FormatParams::default();
        let mut bytes = vec![0u8; ObjectHeader::encoded_size(&params)];
        bytes[..4].copy_from_slice(OHDR_MAGIC);
        bytes[4] = OHDR_VERSION;
        bytes[5] = 42;
        let mut dev = MemoryDevice::from_bytes(&bytes);
        let err = ObjectHeader::load(&mut dev, &params, Address::new(0)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));

        bytes[4] = 9;
        let mut dev = MemoryDevice::from_bytes(&bytes);
        let err = ObjectHeader::load(&mut dev, &params, Address::new(0)).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { version: 9, .. }));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ObjectKind::NamedDatatype).unwrap();
        assert_eq!(json, "\"named_datatype\"");
        assert_eq!(ObjectKind::NamedDatatype.to_string(), "named datatype");
    }
}
