use crate::error::StoreResult;

/// Positioned byte I/O underneath a container.
///
/// Implementations must satisfy:
/// - `write_at` past the current end extends the device, zero-filling any gap.
/// - `read_at` past the end fails with [`StoreError::OutOfBounds`](crate::StoreError::OutOfBounds).
/// - All I/O errors are propagated, never silently ignored.
pub trait BlockDevice: Send {
    /// Fill `buf` with the bytes starting at `addr`.
    fn read_at(&mut self, addr: u64, buf: &mut [u8]) -> StoreResult<()>;

    /// Write `data` starting at `addr`.
    fn write_at(&mut self, addr: u64, data: &[u8]) -> StoreResult<()>;

    /// Current size of the device in bytes.
    fn len(&self) -> StoreResult<u64>;

    /// Returns `true` if nothing has been written yet.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Make previous writes durable.
    fn sync(&mut self) -> StoreResult<()>;

    /// Read `len` bytes at `addr` into a new buffer.
    fn read_vec(&mut self, addr: u64, len: usize) -> StoreResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_at(addr, &mut buf)?;
        Ok(buf)
    }
}
