//! # ZIL Codec
//!
//! On-disk record format of the intent log.
//!
//! Every record starts with a 32-byte header (type, length, txg, sequence)
//! followed by a type-specific fixed body and optional variable data.
//! This crate decodes and encodes those records and the block pointers
//! embedded in them.
//!
//! ## Guarantees
//!
//! - Decoding never panics on malformed bytes; every defect is a
//!   [`CodecError`]
//! - `reclen` is validated against the type's fixed size before any
//!   variable payload is read
//! - Records produced on an opposite-endian host decode with
//!   `byteswap = true`
//!
//! ## Usage
//!
//! ```
//! use zil_codec::{decode_record, LogRecord, ObjectId, RecordBody, TruncateBody, TxType, Txg};
//!
//! let record = LogRecord::new(
//!     TxType::Truncate,
//!     RecordBody::Truncate(TruncateBody {
//!         foid: ObjectId::new(12),
//!         offset: 0,
//!         length: 4096,
//!     }),
//! )
//! .unwrap()
//! .with_txg(Txg::new(3));
//!
//! let bytes = record.encode().unwrap();
//! assert_eq!(decode_record(&bytes, false).unwrap(), record);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod blkptr;
mod decoder;
mod encoder;
mod error;
mod record;
#[cfg(test)]
mod samples;
mod txtype;
mod types;

pub use blkptr::{BlockPointer, BLKPTR_SIZE, ZC_SEQ};
pub use decoder::{decode_header, decode_record, ooo_target, RecordDecoder};
pub use encoder::{encode_record, RecordEncoder};
pub use error::{CodecError, CodecResult};
pub use record::{
    align8, attr, min_reclen, AclBody, AclCreateBody, AclPayload, AclV0Body, CreateBody, LinkBody,
    LogRecord, RecordBody, RecordHeader, RemoveBody, RenameBody, SetattrBody, TruncateBody,
    WriteBody, XvAttr, ACE_V0_SIZE, ACL_CREATE_FIXED, ACL_FIXED, ACL_V0_FIXED, CREATE_FIXED,
    LINK_FIXED, LR_HEADER_SIZE, LR_OOO_FOID_OFFSET, REMOVE_FIXED, RENAME_FIXED, SETATTR_FIXED,
    TRUNCATE_FIXED, WRITE_FIXED,
};
pub use txtype::{TxType, TX_CI, TX_MAX_TYPE};
pub use types::{ObjectId, Seq, Timespec, Txg, OBJECT_SHIFT};
