//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding log records.
///
/// Every decoding error describes a malformed record. The chain walker
/// surfaces them as corrupt-record errors; none of them is a panic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes were available than the structure needs.
    #[error("unexpected end of input: needed {needed} bytes, {available} available")]
    UnexpectedEof {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        available: usize,
    },

    /// The type field holds a value outside the known table.
    #[error("unknown record type {0}")]
    UnknownTxType(u64),

    /// A commit marker (type 0) appeared on disk.
    #[error("commit marker has no on-disk form")]
    CommitMarker,

    /// `reclen` is smaller than the fixed size of the declared type.
    #[error("{txtype} record length {reclen} is below its minimum of {min}")]
    ReclenTooSmall {
        /// Name of the declared type.
        txtype: &'static str,
        /// Declared record length.
        reclen: u64,
        /// Minimum length for that type.
        min: usize,
    },

    /// `reclen` is not a multiple of eight.
    #[error("record length {0} is not 8-byte aligned")]
    Misaligned(u64),

    /// `reclen` disagrees with the sizes declared inside the record.
    #[error("record length {actual} does not match the {expected} bytes its fields declare")]
    ReclenMismatch {
        /// Length implied by the record's own fields.
        expected: u64,
        /// Declared record length.
        actual: u64,
    },

    /// A NUL-terminated string ran past the end of the record.
    #[error("unterminated {field} string")]
    UnterminatedString {
        /// Which string was being read.
        field: &'static str,
    },

    /// An embedded attribute section is malformed.
    #[error("invalid attribute section: {message}")]
    InvalidAttributes {
        /// Description of the problem.
        message: String,
    },

    /// The body variant does not belong to the record's type.
    #[error("body does not match record type {txtype}")]
    BodyMismatch {
        /// Name of the record type.
        txtype: &'static str,
    },

    /// A field is inconsistent with another field of the same record.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// Description of the inconsistency.
        message: String,
    },
}

impl CodecError {
    /// Create an unexpected end-of-input error.
    pub fn eof(needed: usize, available: usize) -> Self {
        Self::UnexpectedEof { needed, available }
    }

    /// Create an invalid record error.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }

    /// Create an invalid attribute section error.
    pub fn invalid_attributes(message: impl Into<String>) -> Self {
        Self::InvalidAttributes {
            message: message.into(),
        }
    }
}
