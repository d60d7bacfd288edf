//! In-memory block device for testing.

use crate::device::{BlockDevice, BlockLocator, IoPriority};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
struct Blocks {
    next: u64,
    data: BTreeMap<u64, Vec<u8>>,
}

impl Default for Blocks {
    fn default() -> Self {
        // Locator 0 is reserved for holes.
        Self {
            next: 1,
            data: BTreeMap::new(),
        }
    }
}

/// An in-memory block device.
///
/// This device keeps every block in memory and is suitable for:
/// - Unit tests
/// - Crash-simulation tests that corrupt or drop blocks
/// - Ephemeral pools that don't need persistence
///
/// # Thread Safety
///
/// This device is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use zil_storage::{BlockDevice, InMemoryBlockDevice, IoPriority};
///
/// let device = InMemoryBlockDevice::new();
/// let locator = device.allocate_block(16).unwrap();
/// // Allocated but never written: reads back as zeros.
/// let data = device.read_block(locator, 16, IoPriority::SyncRead).unwrap();
/// assert_eq!(data, vec![0u8; 16]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBlockDevice {
    blocks: RwLock<Blocks>,
    faults: RwLock<HashSet<u64>>,
    fail_writes: AtomicBool,
}

impl InMemoryBlockDevice {
    /// Creates a new empty in-memory device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of allocated blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.read().data.len()
    }

    /// Returns a copy of the raw bytes of a block, if it exists.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self, locator: BlockLocator) -> Option<Vec<u8>> {
        self.blocks.read().data.get(&locator.as_u64()).cloned()
    }

    /// Flips bits of a stored block in place, simulating media corruption.
    ///
    /// Returns false if the block does not exist or `offset` is out of range.
    pub fn corrupt(&self, locator: BlockLocator, offset: usize, mask: u8) -> bool {
        let mut blocks = self.blocks.write();
        match blocks.data.get_mut(&locator.as_u64()) {
            Some(block) if offset < block.len() => {
                block[offset] ^= mask;
                true
            }
            _ => false,
        }
    }

    /// Overwrites a stored block with zeros, simulating a write that never
    /// reached the media.
    pub fn zero(&self, locator: BlockLocator) -> bool {
        let mut blocks = self.blocks.write();
        match blocks.data.get_mut(&locator.as_u64()) {
            Some(block) => {
                block.fill(0);
                true
            }
            None => false,
        }
    }

    /// Makes every subsequent read of `locator` fail with an injected fault.
    pub fn inject_read_fault(&self, locator: BlockLocator) {
        self.faults.write().insert(locator.as_u64());
    }

    /// Makes every write fail with an injected fault while `on` is set.
    ///
    /// Allocation still succeeds, so a failed write leaves a zeroed block.
    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Disarms all injected faults.
    pub fn clear_faults(&self) {
        self.faults.write().clear();
        self.fail_writes.store(false, Ordering::SeqCst);
    }
}

impl BlockDevice for InMemoryBlockDevice {
    fn allocate_block(&self, size: usize) -> StorageResult<BlockLocator> {
        if size == 0 {
            return Err(StorageError::InvalidBlockSize(size));
        }
        let mut blocks = self.blocks.write();
        let raw = blocks.next;
        blocks.next += 1;
        blocks.data.insert(raw, vec![0u8; size]);
        Ok(BlockLocator::new(raw))
    }

    fn write_block_at(
        &self,
        locator: BlockLocator,
        data: &[u8],
        _priority: IoPriority,
    ) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::InjectedFault { locator });
        }
        let mut blocks = self.blocks.write();
        let block = blocks
            .data
            .get_mut(&locator.as_u64())
            .ok_or(StorageError::UnknownBlock { locator })?;
        if block.len() != data.len() {
            return Err(StorageError::SizeMismatch {
                locator,
                expected: data.len(),
                actual: block.len(),
            });
        }
        block.copy_from_slice(data);
        Ok(())
    }

    fn read_block(
        &self,
        locator: BlockLocator,
        size: usize,
        _priority: IoPriority,
    ) -> StorageResult<Vec<u8>> {
        if self.faults.read().contains(&locator.as_u64()) {
            return Err(StorageError::InjectedFault { locator });
        }
        let blocks = self.blocks.read();
        let block = blocks
            .data
            .get(&locator.as_u64())
            .ok_or(StorageError::UnknownBlock { locator })?;
        if block.len() != size {
            return Err(StorageError::SizeMismatch {
                locator,
                expected: size,
                actual: block.len(),
            });
        }
        Ok(block.clone())
    }

    fn free_block(&self, locator: BlockLocator) -> StorageResult<()> {
        self.blocks
            .write()
            .data
            .remove(&locator.as_u64())
            .map(|_| ())
            .ok_or(StorageError::UnknownBlock { locator })
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_new_is_empty() {
        let device = InMemoryBlockDevice::new();
        assert_eq!(device.block_count(), 0);
    }

    #[test]
    fn memory_never_allocates_none() {
        let device = InMemoryBlockDevice::new();
        let first = device.allocate_block(8).unwrap();
        assert!(!first.is_none());
        assert_eq!(first.as_u64(), 1);
    }

    #[test]
    fn memory_write_and_read_back() {
        let device = InMemoryBlockDevice::new();
        let locator = device.write_block(b"hello", IoPriority::SyncWrite).unwrap();
        let data = device.read_block(locator, 5, IoPriority::SyncRead).unwrap();
        assert_eq!(&data, b"hello");
    }

    #[test]
    fn memory_unwritten_block_reads_zeros() {
        let device = InMemoryBlockDevice::new();
        let locator = device.allocate_block(32).unwrap();
        let data = device.read_block(locator, 32, IoPriority::SyncRead).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn memory_size_mismatch_fails() {
        let device = InMemoryBlockDevice::new();
        let locator = device.allocate_block(16).unwrap();
        assert!(matches!(
            device.write_block_at(locator, &[1; 8], IoPriority::SyncWrite),
            Err(StorageError::SizeMismatch { .. })
        ));
        assert!(matches!(
            device.read_block(locator, 8, IoPriority::SyncRead),
            Err(StorageError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn memory_unknown_block_fails() {
        let device = InMemoryBlockDevice::new();
        let result = device.read_block(BlockLocator::new(42), 8, IoPriority::SyncRead);
        assert!(matches!(result, Err(StorageError::UnknownBlock { .. })));
    }

    #[test]
    fn memory_zero_size_rejected() {
        let device = InMemoryBlockDevice::new();
        assert!(matches!(
            device.allocate_block(0),
            Err(StorageError::InvalidBlockSize(0))
        ));
    }

    #[test]
    fn memory_corrupt_flips_bits() {
        let device = InMemoryBlockDevice::new();
        let locator = device.write_block(&[0u8; 4], IoPriority::SyncWrite).unwrap();
        assert!(device.corrupt(locator, 2, 0xFF));
        assert_eq!(device.snapshot(locator).unwrap(), vec![0, 0, 0xFF, 0]);
        assert!(!device.corrupt(locator, 10, 0xFF));
    }

    #[test]
    fn memory_injected_fault() {
        let device = InMemoryBlockDevice::new();
        let locator = device.write_block(b"data", IoPriority::SyncWrite).unwrap();
        device.inject_read_fault(locator);
        assert!(matches!(
            device.read_block(locator, 4, IoPriority::SyncRead),
            Err(StorageError::InjectedFault { .. })
        ));
        device.clear_faults();
        assert!(device.read_block(locator, 4, IoPriority::SyncRead).is_ok());
    }

    #[test]
    fn memory_write_fault() {
        let device = InMemoryBlockDevice::new();
        device.fail_writes(true);
        assert!(matches!(
            device.write_block(b"data", IoPriority::SyncWrite),
            Err(StorageError::InjectedFault { .. })
        ));
        device.clear_faults();
        assert!(device.write_block(b"data", IoPriority::SyncWrite).is_ok());
    }

    #[test]
    fn memory_free_removes_block() {
        let device = InMemoryBlockDevice::new();
        let locator = device.write_block(b"x", IoPriority::SyncWrite).unwrap();
        device.free_block(locator).unwrap();
        assert_eq!(device.block_count(), 0);
        assert!(device.free_block(locator).is_err());
    }

    proptest::proptest! {
        #[test]
        fn memory_blocks_read_back_independently(
            blocks in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 1..512), 1..16)
        ) {
            let device = InMemoryBlockDevice::new();
            let locators: Vec<_> = blocks
                .iter()
                .map(|b| device.write_block(b, IoPriority::SyncWrite).unwrap())
                .collect();
            for (locator, data) in locators.iter().zip(&blocks) {
                let read = device.read_block(*locator, data.len(), IoPriority::SyncRead).unwrap();
                proptest::prop_assert_eq!(&read, data);
            }
            proptest::prop_assert_eq!(device.block_count(), blocks.len());
        }
    }
}
