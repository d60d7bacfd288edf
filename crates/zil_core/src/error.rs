//! Error types for the intent log engine.

use thiserror::Error;
use zil_codec::{CodecError, TxType};
use zil_storage::StorageError;

use crate::claim::LogState;

/// Result type for engine operations.
pub type ZilResult<T> = Result<T, ZilError>;

/// Errors that can occur in intent log operations.
///
/// Walker errors on on-disk data never panic; they are recorded in the
/// walk's [`ParseResult`](crate::ParseResult) and halt that walk only.
#[derive(Debug, Error)]
pub enum ZilError {
    /// Block device error. Never retried by the engine.
    #[error("storage error: {0}")]
    Io(#[from] StorageError),

    /// A record could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A record inside a valid block is malformed or out of sequence.
    #[error("corrupt log record: {message}")]
    CorruptRecord {
        /// Description of the corruption.
        message: String,
    },

    /// A log block failed validation (checksum, trailer, pointer).
    #[error("corrupt log block: {message}")]
    CorruptBlock {
        /// Description of the corruption.
        message: String,
    },

    /// The header carries a kind tag outside the known table.
    #[error("invalid log kind tag {tag}")]
    InvalidKind {
        /// The raw tag.
        tag: u64,
    },

    /// The kind is known but this engine does not operate on it.
    #[error("log kind {kind} is not supported")]
    UnsupportedKind {
        /// Name of the kind.
        kind: &'static str,
    },

    /// The operation is not allowed in the log's current state.
    #[error("cannot {operation} while the log is {state}")]
    InvalidState {
        /// Current state.
        state: LogState,
        /// The refused operation.
        operation: &'static str,
    },

    /// A record does not fit in any log block.
    #[error("record of {reclen} bytes exceeds the {max}-byte block payload")]
    RecordTooLarge {
        /// Encoded record length.
        reclen: usize,
        /// Largest payload a block can carry.
        max: usize,
    },

    /// A replay callback failed to apply a record.
    #[error("replay of {txtype} failed: {message}")]
    Replay {
        /// Type of the failing record.
        txtype: TxType,
        /// Description of the failure.
        message: String,
    },

    /// Invalid configuration or argument.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl ZilError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            message: message.into(),
        }
    }

    /// Creates a corrupt block error.
    pub fn corrupt_block(message: impl Into<String>) -> Self {
        Self::CorruptBlock {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(state: LogState, operation: &'static str) -> Self {
        Self::InvalidState { state, operation }
    }

    /// Creates a replay failure.
    pub fn replay(txtype: TxType, message: impl Into<String>) -> Self {
        Self::Replay {
            txtype,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for errors describing damaged on-disk data.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptRecord { .. } | Self::CorruptBlock { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zil_storage::BlockLocator;

    #[test]
    fn messages_name_the_problem() {
        let err = ZilError::corrupt_block("checksum mismatch");
        assert_eq!(err.to_string(), "corrupt log block: checksum mismatch");
        assert!(err.is_corruption());

        let err = ZilError::invalid_state(LogState::Claiming, "append");
        assert_eq!(err.to_string(), "cannot append while the log is claiming");
        assert!(!err.is_corruption());
    }

    #[test]
    fn storage_errors_convert() {
        let err: ZilError = StorageError::UnknownBlock {
            locator: BlockLocator::new(7),
        }
        .into();
        assert!(matches!(err, ZilError::Io(_)));
    }
}
