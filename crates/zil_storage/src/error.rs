//! Error types for block device operations.

use crate::device::BlockLocator;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during block device operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The locator does not name a block this device handed out.
    #[error("unknown block {locator}")]
    UnknownBlock {
        /// The locator that could not be resolved.
        locator: BlockLocator,
    },

    /// A block was read or written with a size other than its allocation.
    #[error("block {locator} has size {actual}, request was for {expected} bytes")]
    SizeMismatch {
        /// The block involved.
        locator: BlockLocator,
        /// The size given by the caller.
        expected: usize,
        /// The size recorded by the device.
        actual: usize,
    },

    /// Attempted to read beyond the end of the device.
    #[error("read beyond end of device: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current device size.
        size: u64,
    },

    /// A zero-length or otherwise unusable block size was requested.
    #[error("invalid block size: {0}")]
    InvalidBlockSize(usize),

    /// The device label is missing or damaged.
    #[error("device corrupted: {0}")]
    Corrupted(String),

    /// A fault injected by a test device.
    #[error("injected fault on block {locator}")]
    InjectedFault {
        /// The block the fault was armed for.
        locator: BlockLocator,
    },
}
