//! Symbol nodes: the leaf objects of a group's B-tree.
//!
//! ```text
//! [4 bytes: magic "SNOD"]
//! [1 byte:  version (1)]
//! [1 byte:  reserved]
//! [2 bytes: entry count]
//! 2K entry records, unused ones zero-filled
//! ```

use tracing::trace;

use hcf_store::{BlockDevice, CacheClass, FlushContext, StoreError, StoreResult};
use hcf_types::{Address, Decoder, Encoder, FormatParams};

use crate::entry::SymbolEntry;

pub const SNOD_MAGIC: &[u8; 4] = b"SNOD";
pub const SNOD_VERSION: u8 = 1;

const HEADER_SIZE: usize = 8;

/// Up to `2K` entries sorted by name.
#[derive(Debug, Default)]
pub struct SymbolNode {
    pub(crate) entries: Vec<SymbolEntry>,
    dirty: bool,
}

impl SymbolNode {
    pub(crate) fn with_entries(entries: Vec<SymbolEntry>) -> Self {
        Self {
            entries,
            dirty: true,
        }
    }

    pub fn node_size(params: &FormatParams) -> usize {
        HEADER_SIZE + params.sym_node_capacity() * SymbolEntry::encoded_size(params)
    }

    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    fn encode(&self, params: &FormatParams, addr: Address) -> StoreResult<Vec<u8>> {
        let count = u16::try_from(self.entries.len()).map_err(|_| StoreError::Corrupt {
            addr,
            reason: format!("{} entries do not fit the entry count", self.entries.len()),
        })?;
        let size = Self::node_size(params);
        let mut buf = Vec::with_capacity(size);
        let mut enc = Encoder::new(&mut buf, params);
        enc.put_bytes(SNOD_MAGIC);
        enc.put_u8(SNOD_VERSION);
        enc.put_u8(0);
        enc.put_u16(count);
        for entry in &self.entries {
            entry.encode(&mut enc)?;
        }
        enc.pad_to(size);
        Ok(buf)
    }
}

impl CacheClass for SymbolNode {
    const NAME: &'static str = "symbol node";

    fn load(device: &mut dyn BlockDevice, params: &FormatParams, addr: Address) -> StoreResult<Self> {
        let buf = device.read_vec(addr.value(), Self::node_size(params))?;
        let mut dec = Decoder::new(&buf, params);
        let magic = dec.get_bytes(4)?;
        if magic != SNOD_MAGIC {
            return Err(StoreError::BadSignature {
                addr,
                expected: String::from_utf8_lossy(SNOD_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(magic).into_owned(),
            });
        }
        let version = dec.get_u8()?;
        if version != SNOD_VERSION {
            return Err(StoreError::UnsupportedVersion {
                addr,
                version: version as u32,
            });
        }
        dec.skip(1)?;
        let count = dec.get_u16()? as usize;
        if count > params.sym_node_capacity() {
            return Err(StoreError::Corrupt {
                addr,
                reason: format!(
                    "{count} entries exceeds node capacity {}",
                    params.sym_node_capacity()
                ),
            });
        }
        let entries = (0..count)
            .map(|_| SymbolEntry::decode(&mut dec, addr))
            .collect::<StoreResult<Vec<_>>>()?;
        trace!(%addr, count, "loaded symbol node");
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    fn flush(&mut self, ctx: &mut FlushContext<'_>, addr: Address) -> StoreResult<()> {
        if !self.is_dirty() {
            return Ok(());
        }
        let buf = self.encode(ctx.params, addr)?;
        ctx.device.write_at(addr.value(), &buf)?;
        self.clear();
        trace!(%addr, count = self.entries.len(), "flushed symbol node");
        Ok(())
    }

    fn clear(&mut self) {
        self.dirty = false;
        for entry in &mut self.entries {
            entry.dirty = false;
        }
    }

    fn is_dirty(&self) -> bool {
        self.dirty || self.entries.iter().any(|e| e.dirty)
    }

    fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn compute_size(&self, params: &FormatParams) -> usize {
        Self::node_size(params)
    }
}
