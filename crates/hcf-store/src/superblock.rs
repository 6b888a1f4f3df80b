//! Fixed-position container header.
//!
//! On-disk format (always little-endian; the format parameters live inside
//! the payload):
//! ```text
//! [4 bytes: magic "\x89HCF"]
//! [4 bytes: version (u32)]
//! [8 bytes: payload address (u64)]
//! [4 bytes: payload length (u32)]
//! [4 bytes: CRC32 of payload (u32)]
//! [8 bytes: reserved, zero]
//! ```
//! The payload is a bincode-serialized [`Superblock`] written past the end
//! of allocated space on every flush.

use serde::{Deserialize, Serialize};

use hcf_types::{Address, FormatParams};

use crate::alloc::SpaceAllocator;
use crate::error::{StoreError, StoreResult};
use crate::traits::BlockDevice;

pub const SUPERBLOCK_MAGIC: &[u8; 4] = b"\x89HCF";
pub const SUPERBLOCK_VERSION: u32 = 1;
pub const SUPERBLOCK_SIZE: usize = 32;

/// Address where allocatable space begins.
pub const DATA_START: u64 = 64;

/// Container-wide state persisted in the superblock payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Superblock {
    pub params: FormatParams,
    /// Object header of the root group, or undefined for a fresh container.
    pub root: Address,
    pub allocator: SpaceAllocator,
}

impl Superblock {
    /// Write the payload at the allocator's EOA and the fixed header at 0.
    pub fn write(&self, device: &mut dyn BlockDevice) -> StoreResult<()> {
        let payload =
            bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let payload_addr = self.allocator.eoa().max(DATA_START);
        device.write_at(payload_addr, &payload)?;

        let mut header = Vec::with_capacity(SUPERBLOCK_SIZE);
        header.extend_from_slice(SUPERBLOCK_MAGIC);
        header.extend_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
        header.extend_from_slice(&payload_addr.to_le_bytes());
        header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        header.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        header.resize(SUPERBLOCK_SIZE, 0);
        device.write_at(0, &header)
    }

    /// Read and validate the superblock.
    pub fn read(device: &mut dyn BlockDevice) -> StoreResult<Self> {
        let header = device.read_vec(0, SUPERBLOCK_SIZE)?;
        if &header[0..4] != SUPERBLOCK_MAGIC {
            return Err(StoreError::BadSignature {
                addr: Address::new(0),
                expected: String::from_utf8_lossy(SUPERBLOCK_MAGIC).into(),
                actual: String::from_utf8_lossy(&header[0..4]).into(),
            });
        }
        let version = u32::from_le_bytes(field(&header, 4));
        if version != SUPERBLOCK_VERSION {
            return Err(StoreError::UnsupportedVersion {
                addr: Address::new(0),
                version,
            });
        }
        let payload_addr = u64::from_le_bytes(field(&header, 8));
        let payload_len = u32::from_le_bytes(field(&header, 16));
        let expected = u32::from_le_bytes(field(&header, 20));

        let payload = device.read_vec(payload_addr, payload_len as usize)?;
        let computed = crc32fast::hash(&payload);
        if computed != expected {
            return Err(StoreError::ChecksumMismatch { expected, computed });
        }
        let sb: Superblock = bincode::deserialize(&payload)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sb.params.validate()?;
        Ok(sb)
    }
}

fn field<const N: usize>(bytes: &[u8], at: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[at..at + N]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDevice;

    fn sample() -> Superblock {
        let mut allocator = SpaceAllocator::new(DATA_START, u64::MAX - 1);
        allocator.allocate(100).unwrap();
        Superblock {
            params: FormatParams::default(),
            root: Address::new(DATA_START),
            allocator,
        }
    }

    #[test]
    fn write_read_roundtrip() {
        let mut dev = MemoryDevice::new();
        let sb = sample();
        sb.write(&mut dev).unwrap();
        assert_eq!(Superblock::read(&mut dev).unwrap(), sb);
    }

    #[test]
    fn bad_magic() {
        let mut dev = MemoryDevice::from_bytes(&[0u8; 64]);
        let err = Superblock::read(&mut dev).unwrap_err();
        assert!(matches!(err, StoreError::BadSignature { .. }));
    }

    #[test]
    fn bad_version() {
        let mut dev = MemoryDevice::new();
        sample().write(&mut dev).unwrap();
        dev.write_at(4, &99u32.to_le_bytes()).unwrap();
        let err = Superblock::read(&mut dev).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedVersion { version: 99, .. }));
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut dev = MemoryDevice::new();
        let sb = sample();
        sb.write(&mut dev).unwrap();
        let payload_addr = sb.allocator.eoa();
        dev.write_at(payload_addr, &[0xAA]).unwrap();
        let err = Superblock::read(&mut dev).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn too_short_device() {
        let mut dev = MemoryDevice::from_bytes(b"\x89HC");
        assert!(matches!(
            Superblock::read(&mut dev),
            Err(StoreError::OutOfBounds { .. })
        ));
    }
}
