//! # ZIL Storage
//!
//! Block device abstraction consumed by the intent log.
//!
//! The intent log never touches physical media directly. It hands whole
//! blocks to a [`BlockDevice`] and gets back an opaque [`BlockLocator`]
//! that is only ever resolved by the same device. Devices are **opaque
//! block stores**: they know nothing about log records, trailers or
//! checksums chained between blocks.
//!
//! ## Available Devices
//!
//! - [`InMemoryBlockDevice`] - For testing, with corruption and fault injection
//! - [`FileBlockDevice`] - A single append-only file carved into blocks
//!
//! ## Example
//!
//! ```rust
//! use zil_storage::{BlockDevice, InMemoryBlockDevice, IoPriority};
//!
//! let device = InMemoryBlockDevice::new();
//! let locator = device.write_block(b"log block", IoPriority::SyncWrite).unwrap();
//! let data = device.read_block(locator, 9, IoPriority::SyncRead).unwrap();
//! assert_eq!(&data, b"log block");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod device;
mod error;
mod file;
mod memory;

pub use device::{BlockDevice, BlockLocator, IoPriority};
pub use error::{StorageError, StorageResult};
pub use file::{FileBlockDevice, DEVICE_LABEL_SIZE, DEVICE_MAGIC};
pub use memory::InMemoryBlockDevice;
