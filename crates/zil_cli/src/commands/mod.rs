//! CLI command implementations.
//!
//! Every command works on a log image: a directory holding the serialized
//! header and the block device file the chain lives on.
//!
//! ```text
//! <image>/
//! ├── header.zil   (fixed-size log header)
//! └── log.dev      (block device file)
//! ```

pub mod dump;
pub mod inspect;
pub mod verify;

use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use zil_codec::Txg;
use zil_core::{MemoryObjset, PoolTxgs, ZilError, ZilHeader};
use zil_storage::{FileBlockDevice, StorageError};

/// Header file name inside an image.
pub const HEADER_FILE: &str = "header.zil";

/// Device file name inside an image.
pub const DEVICE_FILE: &str = "log.dev";

/// Errors reported by the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// The directory is not a log image.
    #[error("no log image at {}: missing {}", .0.display(), .1)]
    MissingImage(PathBuf, &'static str),

    /// The chain failed verification.
    #[error("log chain is damaged: {0}")]
    Damaged(ZilError),

    /// Engine error.
    #[error(transparent)]
    Zil(#[from] ZilError),

    /// Device error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON output error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable text.
    #[default]
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Pool state the image is examined against.
#[derive(Debug, Clone, Copy, Default, Args)]
pub struct PoolArgs {
    /// First txg whose changes may be missing from the main tree
    #[arg(long, global = true, default_value_t = 0)]
    pub min_claim_txg: u64,

    /// Txg of the pool's active checkpoint (0 for none)
    #[arg(long, global = true, default_value_t = 0)]
    pub checkpoint_txg: u64,

    /// Treat the object set as encrypted
    #[arg(long, global = true)]
    pub encrypted: bool,

    /// Object set id to report
    #[arg(long, global = true, default_value_t = 0)]
    pub objset: u64,
}

impl PoolArgs {
    /// Pool collaborator reflecting these arguments.
    #[must_use]
    pub fn pool(&self) -> PoolTxgs {
        PoolTxgs::new(Txg::new(self.min_claim_txg.max(1)))
            .with_min_claim_txg(Txg::new(self.min_claim_txg))
            .with_checkpoint_txg(Txg::new(self.checkpoint_txg))
    }

    /// Object set collaborator reflecting these arguments.
    #[must_use]
    pub fn objset(&self) -> MemoryObjset {
        MemoryObjset::new(self.objset).encrypted(self.encrypted)
    }
}

/// An opened log image.
pub struct LogImage {
    /// Image directory.
    pub path: PathBuf,
    /// Device holding the chain.
    pub device: FileBlockDevice,
    /// Decoded header.
    pub header: ZilHeader,
    /// Pool state.
    pub pool: PoolTxgs,
    /// Object set.
    pub objset: MemoryObjset,
}

impl LogImage {
    /// Opens the image at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::MissingImage`] if either file is absent, or the
    /// header decode error.
    pub fn open(dir: &Path, args: &PoolArgs) -> CliResult<Self> {
        let header_path = dir.join(HEADER_FILE);
        let device_path = dir.join(DEVICE_FILE);
        if !header_path.is_file() {
            return Err(CliError::MissingImage(dir.to_path_buf(), HEADER_FILE));
        }
        if !device_path.is_file() {
            return Err(CliError::MissingImage(dir.to_path_buf(), DEVICE_FILE));
        }
        let header = ZilHeader::from_bytes(&std::fs::read(&header_path)?)?;
        let device = FileBlockDevice::open(&device_path)?;
        debug!(path = %dir.display(), kind = %header.kind(), "opened log image");
        Ok(Self {
            path: dir.to_path_buf(),
            device,
            header,
            pool: args.pool(),
            objset: args.objset(),
        })
    }
}
