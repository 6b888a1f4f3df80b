use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockDevice;

/// Block device backed by a regular file.
#[derive(Debug)]
pub struct FileDevice {
    path: PathBuf,
    file: File,
}

impl FileDevice {
    /// Create (or truncate) a file at `path`.
    pub fn create(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .read(true)
            .write(true)
            .open(path)?;
        debug!(path = %path.display(), "created container file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(path = %path.display(), "opened container file");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockDevice for FileDevice {
    fn read_at(&mut self, addr: u64, buf: &mut [u8]) -> StoreResult<()> {
        let size = self.file.metadata()?.len();
        if addr + buf.len() as u64 > size {
            return Err(StoreError::OutOfBounds {
                addr,
                len: buf.len(),
                size,
            });
        }
        self.file.seek(SeekFrom::Start(addr))?;
        match self.file.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(StoreError::OutOfBounds {
                addr,
                len: buf.len(),
                size,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn write_at(&mut self, addr: u64, data: &[u8]) -> StoreResult<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(data)?;
        Ok(())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.hcf");

        let mut dev = FileDevice::create(&path).unwrap();
        dev.write_at(10, b"payload").unwrap();
        dev.sync().unwrap();
        drop(dev);

        let mut dev = FileDevice::open(&path).unwrap();
        assert_eq!(dev.len().unwrap(), 17);
        assert_eq!(dev.read_vec(10, 7).unwrap(), b"payload");
        assert_eq!(dev.read_vec(0, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut dev = FileDevice::create(&dir.path().join("short.hcf")).unwrap();
        dev.write_at(0, b"ab").unwrap();
        let err = dev.read_vec(1, 8).unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { .. }));
    }
}
