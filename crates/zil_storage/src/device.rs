//! Block device trait definition.

use crate::error::StorageResult;
use std::fmt;

/// Opaque address of a block on a [`BlockDevice`].
///
/// Locators are handed out by a device and are only meaningful to that
/// device. The zero locator is never allocated, so an all-zero block
/// pointer can serve as a hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockLocator(u64);

impl BlockLocator {
    /// The reserved locator that never names a block.
    pub const NONE: Self = Self(0);

    /// Creates a locator from its raw on-disk value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw on-disk value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the reserved zero locator.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BlockLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blk:{:#x}", self.0)
    }
}

/// Scheduling class attached to every request.
///
/// Devices are free to ignore it; the log passes it through so that
/// import-time walks and commit-path writes can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IoPriority {
    /// Synchronous read on the caller's critical path.
    #[default]
    SyncRead,
    /// Synchronous write (log block issue during commit).
    SyncWrite,
    /// Background read (scrub, inspection).
    AsyncRead,
    /// Background write.
    AsyncWrite,
}

/// A block store for the intent log.
///
/// Block devices are **opaque**. They allocate, store and return whole
/// blocks. Checksums chained between log blocks, trailers and record
/// formats all belong to the log.
///
/// # Invariants
///
/// - `allocate_block` never returns [`BlockLocator::NONE`]
/// - An allocated block that was never written reads back as zeros
/// - `read_block` returns exactly the bytes last written at that locator
/// - `flush` makes every completed write durable
/// - Devices must be `Send + Sync`; the walker and writer share one device
pub trait BlockDevice: Send + Sync {
    /// Reserves a block of `size` bytes without writing it.
    ///
    /// The log uses this to learn a block's address before it is written
    /// so that the previous block can point at it.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the space cannot be reserved.
    fn allocate_block(&self, size: usize) -> StorageResult<BlockLocator>;

    /// Writes `data` into a previously allocated block.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator is unknown, the size does not match
    /// the allocation, or an I/O error occurs.
    fn write_block_at(
        &self,
        locator: BlockLocator,
        data: &[u8],
        priority: IoPriority,
    ) -> StorageResult<()>;

    /// Allocates a block sized for `data`, writes it and returns its locator.
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or the write fails.
    fn write_block(&self, data: &[u8], priority: IoPriority) -> StorageResult<BlockLocator> {
        let locator = self.allocate_block(data.len())?;
        self.write_block_at(locator, data, priority)?;
        Ok(locator)
    }

    /// Reads the `size`-byte block at `locator`.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator is unknown, the size is wrong, or an
    /// I/O error occurs.
    fn read_block(
        &self,
        locator: BlockLocator,
        size: usize,
        priority: IoPriority,
    ) -> StorageResult<Vec<u8>>;

    /// Releases a block back to the device.
    ///
    /// Freeing is advisory; devices that cannot reclaim space may ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator is unknown.
    fn free_block(&self, locator: BlockLocator) -> StorageResult<()>;

    /// Makes all completed writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> StorageResult<()>;
}
