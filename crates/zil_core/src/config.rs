//! Intent log configuration.

use crate::error::{ZilError, ZilResult};
use crate::header::ZilKind;

/// Smallest log block the writer will produce.
pub const MIN_BLOCK_SIZE: usize = 4096;

/// Where synchronous write payloads should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogBias {
    /// Optimise for commit latency: copy small payloads into the log.
    #[default]
    Latency,
    /// Optimise for throughput: write full-block payloads indirectly.
    Throughput,
}

/// How synchronous semantics are honoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPolicy {
    /// Only operations flagged synchronous are forced by commit.
    #[default]
    Standard,
    /// Every operation is treated as synchronous.
    Always,
    /// Commit never writes to the log; durability comes from txg sync.
    Disabled,
}

/// Configuration for an intent log.
#[derive(Debug, Clone)]
pub struct ZilConfig {
    /// Size of each log block in bytes.
    pub block_size: usize,

    /// Upper bound accepted for `block_size`.
    pub max_block_size: usize,

    /// Write payloads at or below this size are copied into the log.
    pub immediate_write_size: u64,

    /// Whether the pool has a dedicated log device.
    pub has_slog: bool,

    /// Payload placement bias.
    pub logbias: LogBias,

    /// Synchronous write policy.
    pub sync: SyncPolicy,

    /// Skip replay and discard claimed logs.
    pub replay_disabled: bool,

    /// Kind given to logs created from an uninitialised header.
    pub default_kind: ZilKind,
}

impl Default for ZilConfig {
    fn default() -> Self {
        Self {
            block_size: 32 * 1024,
            max_block_size: 128 * 1024,
            immediate_write_size: 32 * 1024,
            has_slog: false,
            logbias: LogBias::Latency,
            sync: SyncPolicy::Standard,
            replay_disabled: false,
            default_kind: ZilKind::Lwb,
        }
    }
}

impl ZilConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log block size.
    #[must_use]
    pub const fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the largest accepted block size.
    #[must_use]
    pub const fn max_block_size(mut self, size: usize) -> Self {
        self.max_block_size = size;
        self
    }

    /// Sets the immediate write threshold.
    #[must_use]
    pub const fn immediate_write_size(mut self, size: u64) -> Self {
        self.immediate_write_size = size;
        self
    }

    /// Sets whether a separate log device is present.
    #[must_use]
    pub const fn has_slog(mut self, value: bool) -> Self {
        self.has_slog = value;
        self
    }

    /// Sets the log bias.
    #[must_use]
    pub const fn logbias(mut self, bias: LogBias) -> Self {
        self.logbias = bias;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub const fn sync(mut self, policy: SyncPolicy) -> Self {
        self.sync = policy;
        self
    }

    /// Sets whether replay is disabled.
    #[must_use]
    pub const fn replay_disabled(mut self, value: bool) -> Self {
        self.replay_disabled = value;
        self
    }

    /// Sets the kind for newly created logs.
    #[must_use]
    pub const fn default_kind(mut self, kind: ZilKind) -> Self {
        self.default_kind = kind;
        self
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns an error if the block size is out of range or not a multiple
    /// of eight.
    pub fn validate(&self) -> ZilResult<()> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > self.max_block_size {
            return Err(ZilError::invalid_operation(format!(
                "block size {} outside {MIN_BLOCK_SIZE}..={}",
                self.block_size, self.max_block_size
            )));
        }
        if self.block_size % 8 != 0 {
            return Err(ZilError::invalid_operation(format!(
                "block size {} is not 8-byte aligned",
                self.block_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ZilConfig::default();
        assert_eq!(config.block_size, 32 * 1024);
        assert_eq!(config.sync, SyncPolicy::Standard);
        assert_eq!(config.default_kind, ZilKind::Lwb);
        assert!(!config.replay_disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = ZilConfig::new()
            .block_size(8192)
            .has_slog(true)
            .logbias(LogBias::Throughput)
            .replay_disabled(true);

        assert_eq!(config.block_size, 8192);
        assert!(config.has_slog);
        assert_eq!(config.logbias, LogBias::Throughput);
        assert!(config.replay_disabled);
    }

    #[test]
    fn block_size_bounds() {
        assert!(ZilConfig::new().block_size(1024).validate().is_err());
        assert!(ZilConfig::new().block_size(256 * 1024).validate().is_err());
        assert!(ZilConfig::new().block_size(4100).validate().is_err());
        assert!(ZilConfig::new()
            .max_block_size(256 * 1024)
            .block_size(256 * 1024)
            .validate()
            .is_ok());
    }
}
