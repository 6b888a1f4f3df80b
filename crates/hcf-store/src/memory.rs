use std::sync::{Arc, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockDevice;

/// In-memory block device.
///
/// The buffer lives behind an `Arc<RwLock<..>>`: clones share the same bytes,
/// so a test can close a container and reopen it from a clone.
#[derive(Clone, Default)]
pub struct MemoryDevice {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemoryDevice {
    /// Create an empty device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: Arc::new(RwLock::new(bytes.to_vec())),
        }
    }

    /// Copy out the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().expect("lock poisoned").clone()
    }
}

impl BlockDevice for MemoryDevice {
    fn read_at(&mut self, addr: u64, buf: &mut [u8]) -> StoreResult<()> {
        let data = self.data.read().expect("lock poisoned");
        let start = addr as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(StoreError::OutOfBounds {
                addr,
                len: buf.len(),
                size: data.len() as u64,
            });
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&mut self, addr: u64, bytes: &[u8]) -> StoreResult<()> {
        let mut data = self.data.write().expect("lock poisoned");
        let start = addr as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.data.read().expect("lock poisoned").len() as u64)
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.data.read().expect("lock poisoned").len();
        f.debug_struct("MemoryDevice").field("len", &len).finish()
    }
}
