//! File-based block device for persistent logs.

use crate::device::{BlockDevice, BlockLocator, IoPriority};
use crate::error::{StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes at the start of every device file.
pub const DEVICE_MAGIC: [u8; 8] = *b"ZILBDEV1";

/// Bytes reserved for the device label. Block locators are file offsets,
/// so the label also guarantees no block ever lives at locator zero.
pub const DEVICE_LABEL_SIZE: u64 = 512;

/// A file-based block device.
///
/// Blocks are carved from a single file: allocation extends the file with
/// zeros and the returned locator is the byte offset of the block. The
/// device never reuses space; `free_block` is accepted and ignored.
///
/// # Durability
///
/// - `flush()` calls `File::sync_data()` so that completed block writes
///   survive a crash
///
/// # Example
///
/// ```no_run
/// use zil_storage::{BlockDevice, FileBlockDevice, IoPriority};
/// use std::path::Path;
///
/// let device = FileBlockDevice::open(Path::new("log.dev")).unwrap();
/// let locator = device.write_block(&[7u8; 4096], IoPriority::SyncWrite).unwrap();
/// device.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBlockDevice {
    path: PathBuf,
    file: Mutex<File>,
    size: RwLock<u64>,
}

impl FileBlockDevice {
    /// Opens or creates a device file at the given path.
    ///
    /// A new file gets a fresh label; an existing file must carry one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its label is wrong.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut size = file.metadata()?.len();
        if size == 0 {
            let mut label = vec![0u8; DEVICE_LABEL_SIZE as usize];
            label[..DEVICE_MAGIC.len()].copy_from_slice(&DEVICE_MAGIC);
            file.write_all(&label)?;
            file.sync_all()?;
            size = DEVICE_LABEL_SIZE;
            debug!(path = %path.display(), "initialized block device label");
        } else {
            if size < DEVICE_LABEL_SIZE {
                return Err(StorageError::Corrupted(format!(
                    "device file is {size} bytes, shorter than its label"
                )));
            }
            let mut magic = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic)?;
            if magic != DEVICE_MAGIC {
                return Err(StorageError::Corrupted("bad device magic".into()));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: RwLock::new(size),
        })
    }

    /// Opens or creates a device file, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the device file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        *self.size.read()
    }

    fn check_range(&self, locator: BlockLocator, len: usize) -> StorageResult<()> {
        let size = *self.size.read();
        let offset = locator.as_u64();
        if offset < DEVICE_LABEL_SIZE {
            return Err(StorageError::UnknownBlock { locator });
        }
        if offset.saturating_add(len as u64) > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    fn allocate_block(&self, size: usize) -> StorageResult<BlockLocator> {
        if size == 0 {
            return Err(StorageError::InvalidBlockSize(size));
        }
        let file = self.file.lock();
        let mut current = self.size.write();
        let offset = *current;
        file.set_len(offset + size as u64)?;
        *current = offset + size as u64;
        Ok(BlockLocator::new(offset))
    }

    fn write_block_at(
        &self,
        locator: BlockLocator,
        data: &[u8],
        _priority: IoPriority,
    ) -> StorageResult<()> {
        self.check_range(locator, data.len())?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(locator.as_u64()))?;
        file.write_all(data)?;
        Ok(())
    }

    fn read_block(
        &self,
        locator: BlockLocator,
        size: usize,
        _priority: IoPriority,
    ) -> StorageResult<Vec<u8>> {
        self.check_range(locator, size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(locator.as_u64()))?;
        let mut buffer = vec![0u8; size];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn free_block(&self, locator: BlockLocator) -> StorageResult<()> {
        // Space is never reused; only validate the locator.
        self.check_range(locator, 0)
    }

    fn flush(&self) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new_writes_label() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.dev");

        let device = FileBlockDevice::open(&path).unwrap();
        assert_eq!(device.size(), DEVICE_LABEL_SIZE);
        assert!(path.exists());
    }

    #[test]
    fn file_first_block_follows_label() {
        let dir = tempdir().unwrap();
        let device = FileBlockDevice::open(&dir.path().join("log.dev")).unwrap();

        let locator = device.allocate_block(4096).unwrap();
        assert_eq!(locator.as_u64(), DEVICE_LABEL_SIZE);
        assert_eq!(device.size(), DEVICE_LABEL_SIZE + 4096);
    }

    #[test]
    fn file_write_and_read() {
        let dir = tempdir().unwrap();
        let device = FileBlockDevice::open(&dir.path().join("log.dev")).unwrap();

        let a = device.write_block(b"first", IoPriority::SyncWrite).unwrap();
        let b = device.write_block(b"second", IoPriority::SyncWrite).unwrap();

        assert_eq!(device.read_block(a, 5, IoPriority::SyncRead).unwrap(), b"first");
        assert_eq!(device.read_block(b, 6, IoPriority::SyncRead).unwrap(), b"second");
    }

    #[test]
    fn file_unwritten_block_reads_zeros() {
        let dir = tempdir().unwrap();
        let device = FileBlockDevice::open(&dir.path().join("log.dev")).unwrap();

        let locator = device.allocate_block(64).unwrap();
        let data = device.read_block(locator, 64, IoPriority::SyncRead).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let device = FileBlockDevice::open(&dir.path().join("log.dev")).unwrap();
        let locator = device.write_block(b"hello", IoPriority::SyncWrite).unwrap();

        let result = device.read_block(locator, 64, IoPriority::SyncRead);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_label_region_is_not_a_block() {
        let dir = tempdir().unwrap();
        let device = FileBlockDevice::open(&dir.path().join("log.dev")).unwrap();

        let result = device.read_block(BlockLocator::new(8), 8, IoPriority::SyncRead);
        assert!(matches!(result, Err(StorageError::UnknownBlock { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.dev");

        let locator = {
            let device = FileBlockDevice::open(&path).unwrap();
            let locator = device.write_block(b"persistent", IoPriority::SyncWrite).unwrap();
            device.flush().unwrap();
            locator
        };

        let device = FileBlockDevice::open(&path).unwrap();
        let data = device.read_block(locator, 10, IoPriority::SyncRead).unwrap();
        assert_eq!(&data, b"persistent");
    }

    #[test]
    fn file_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.dev");
        std::fs::write(&path, vec![0xAAu8; DEVICE_LABEL_SIZE as usize]).unwrap();

        assert!(matches!(
            FileBlockDevice::open(&path),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pool").join("log.dev");

        let device = FileBlockDevice::open_with_create_dirs(&path).unwrap();
        assert_eq!(device.path(), path);
    }
}
