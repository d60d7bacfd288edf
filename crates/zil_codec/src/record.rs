//! Log record types.
//!
//! ## Record Layout
//!
//! ```text
//! | txtype (8) | reclen (8) | txg (8) | seq (8) | fixed body | variable data | pad |
//! ```
//!
//! `txtype` carries the case-insensitivity flag in its top bit. `reclen`
//! covers the whole record and is always a multiple of eight. The variable
//! section holds names, link targets, ACL entries and inline write data;
//! strings are NUL-terminated.

use crate::blkptr::BlockPointer;
use crate::decoder::RecordDecoder;
use crate::encoder::RecordEncoder;
use crate::error::{CodecError, CodecResult};
use crate::txtype::{TxType, TX_CI};
use crate::types::{ObjectId, Seq, Timespec, Txg};

/// Size of the common record header.
pub const LR_HEADER_SIZE: usize = 32;

/// Offset of the target object id in every out-of-order record type.
pub const LR_OOO_FOID_OFFSET: usize = LR_HEADER_SIZE;

/// Fixed body size of the create family.
pub const CREATE_FIXED: usize = 72;
/// Fixed body size of creates with ACL.
pub const ACL_CREATE_FIXED: usize = CREATE_FIXED + ACL_FIXED_PART;
/// Fixed body size of remove/rmdir.
pub const REMOVE_FIXED: usize = 8;
/// Fixed body size of link.
pub const LINK_FIXED: usize = 16;
/// Fixed body size of rename.
pub const RENAME_FIXED: usize = 16;
/// Fixed body size of write/write2.
pub const WRITE_FIXED: usize = 32 + crate::blkptr::BLKPTR_SIZE;
/// Fixed body size of truncate.
pub const TRUNCATE_FIXED: usize = 24;
/// Fixed body size of setattr.
pub const SETATTR_FIXED: usize = 80;
/// Fixed body size of the old ACL record.
pub const ACL_V0_FIXED: usize = 16;
/// Fixed body size of the ACL record.
pub const ACL_FIXED: usize = 8 + ACL_FIXED_PART;
/// Size of one old-format ACL entry.
pub const ACE_V0_SIZE: usize = 12;

const ACL_FIXED_PART: usize = 40;

/// Attribute mask bits used by setattr records.
pub mod attr {
    /// Mode is set.
    pub const AT_MODE: u64 = 1 << 0;
    /// Owner is set.
    pub const AT_UID: u64 = 1 << 1;
    /// Group is set.
    pub const AT_GID: u64 = 1 << 2;
    /// Size is set.
    pub const AT_SIZE: u64 = 1 << 3;
    /// Access time is set.
    pub const AT_ATIME: u64 = 1 << 4;
    /// Modification time is set.
    pub const AT_MTIME: u64 = 1 << 5;
    /// An extended attribute section follows the fixed body.
    pub const AT_XVATTR: u64 = 1 << 31;
}

/// Rounds `n` up to the next multiple of eight.
#[must_use]
pub const fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Returns the smallest valid `reclen` for a record type.
#[must_use]
pub const fn min_reclen(txtype: TxType) -> usize {
    LR_HEADER_SIZE
        + match txtype {
            TxType::Commit => 0,
            TxType::Create
            | TxType::Mkdir
            | TxType::Mkxattr
            | TxType::Symlink
            | TxType::CreateAttr
            | TxType::MkdirAttr => CREATE_FIXED,
            TxType::CreateAcl
            | TxType::CreateAclAttr
            | TxType::MkdirAcl
            | TxType::MkdirAclAttr => ACL_CREATE_FIXED,
            TxType::Remove | TxType::Rmdir => REMOVE_FIXED,
            TxType::Link => LINK_FIXED,
            TxType::Rename => RENAME_FIXED,
            TxType::Write | TxType::Write2 => WRITE_FIXED,
            TxType::Truncate => TRUNCATE_FIXED,
            TxType::Setattr => SETATTR_FIXED,
            TxType::AclV0 => ACL_V0_FIXED,
            TxType::Acl => ACL_FIXED,
        }
}

/// The common header at the start of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record type.
    pub txtype: TxType,
    /// Case-insensitive name handling was requested.
    pub case_insensitive: bool,
    /// Total record length, header included.
    pub reclen: u64,
    /// Transaction group the operation belongs to.
    pub txg: Txg,
    /// Record sequence number.
    pub seq: Seq,
}

impl RecordHeader {
    /// Returns the on-disk type field, CI bit included.
    #[must_use]
    pub const fn raw_txtype(&self) -> u64 {
        if self.case_insensitive {
            self.txtype.as_u64() | TX_CI
        } else {
            self.txtype.as_u64()
        }
    }

    /// Returns `reclen` as a `usize`, saturating on narrow targets.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.reclen).unwrap_or(usize::MAX)
    }

    /// Returns true when the record has no body beyond its header.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() <= LR_HEADER_SIZE
    }
}

/// Opaque extended-attribute section.
///
/// The section starts with a 32-bit mask count; its total length is
/// `4 * masksize + 60` bytes. The content is never interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XvAttr(pub Vec<u8>);

impl XvAttr {
    /// Largest accepted mask count.
    pub const MAX_MASKSIZE: u32 = 16;

    /// Returns the section length for a given mask count.
    #[must_use]
    pub const fn section_len(masksize: u32) -> usize {
        4 * masksize as usize + 60
    }

    /// Builds an all-zero section with the given mask count.
    #[must_use]
    pub fn zeroed(masksize: u32) -> Self {
        let mut bytes = vec![0u8; Self::section_len(masksize)];
        bytes[..4].copy_from_slice(&masksize.to_le_bytes());
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// ACL data shared by the ACL record and creates with ACL.
///
/// The entries, FUID table and domain table are opaque to the log; only
/// their sizes are checked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AclPayload {
    /// Number of entries in `aces`.
    pub aclcnt: u64,
    /// ACL flags.
    pub acl_flags: u64,
    /// Raw ACL entries (`acl_bytes` long, padded to eight on disk).
    pub aces: Vec<u8>,
    /// Log-specific FUIDs.
    pub fuids: Vec<u64>,
    /// Domain table, one NUL-terminated string per domain.
    pub domains: Vec<Vec<u8>>,
}

/// Body of the create family (`TX_CREATE`, `TX_MKDIR`, `TX_SYMLINK`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateBody {
    /// Parent directory.
    pub doid: ObjectId,
    /// Created object.
    pub foid: ObjectId,
    /// Mode bits.
    pub mode: u64,
    /// Owner.
    pub uid: u64,
    /// Group.
    pub gid: u64,
    /// Generation (txg of creation).
    pub gen: u64,
    /// Creation time.
    pub crtime: Timespec,
    /// Device number for device nodes.
    pub rdev: u64,
    /// Extended attributes, present for the `*_ATTR` types.
    pub xvattr: Option<XvAttr>,
    /// Name of the new entry.
    pub name: Vec<u8>,
    /// Link target, present for `TX_SYMLINK` only.
    pub link: Option<Vec<u8>>,
}

/// Body of the create-with-ACL family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclCreateBody {
    /// The create portion.
    pub create: CreateBody,
    /// The ACL portion.
    pub acl: AclPayload,
}

/// Body of `TX_REMOVE` and `TX_RMDIR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveBody {
    /// Parent directory.
    pub doid: ObjectId,
    /// Removed name.
    pub name: Vec<u8>,
}

/// Body of `TX_LINK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBody {
    /// Directory receiving the link.
    pub doid: ObjectId,
    /// Object being linked.
    pub link_obj: ObjectId,
    /// Name of the new link.
    pub name: Vec<u8>,
}

/// Body of `TX_RENAME`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameBody {
    /// Source directory.
    pub sdoid: ObjectId,
    /// Target directory.
    pub tdoid: ObjectId,
    /// Source name.
    pub src: Vec<u8>,
    /// Target name.
    pub tgt: Vec<u8>,
}

/// Body of `TX_WRITE` and `TX_WRITE2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBody {
    /// File being written.
    pub foid: ObjectId,
    /// Byte offset of the write.
    pub offset: u64,
    /// Length of the write.
    pub length: u64,
    /// Unused, kept for format compatibility.
    pub blkoff: u64,
    /// Data block for indirect writes, a hole otherwise.
    pub blkptr: BlockPointer,
    /// Inline data; empty for indirect writes.
    pub data: Vec<u8>,
}

impl WriteBody {
    /// Returns true if the payload lives in a separate block.
    #[must_use]
    pub fn is_indirect(&self) -> bool {
        self.data.is_empty()
    }
}

/// Body of `TX_TRUNCATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateBody {
    /// File being truncated.
    pub foid: ObjectId,
    /// Start of the freed range.
    pub offset: u64,
    /// Length of the freed range.
    pub length: u64,
}

/// Body of `TX_SETATTR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetattrBody {
    /// Object whose attributes change.
    pub foid: ObjectId,
    /// Which attributes are set, see [`attr`].
    pub mask: u64,
    /// Mode.
    pub mode: u64,
    /// Owner.
    pub uid: u64,
    /// Group.
    pub gid: u64,
    /// Size.
    pub size: u64,
    /// Access time.
    pub atime: Timespec,
    /// Modification time.
    pub mtime: Timespec,
    /// Extended attributes, present iff `mask` has [`attr::AT_XVATTR`].
    pub xvattr: Option<XvAttr>,
}

/// Body of `TX_ACL_V0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclV0Body {
    /// Object whose ACL changes.
    pub foid: ObjectId,
    /// Raw entries, [`ACE_V0_SIZE`] bytes each.
    pub aces: Vec<u8>,
}

/// Body of `TX_ACL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclBody {
    /// Object whose ACL changes.
    pub foid: ObjectId,
    /// The ACL.
    pub acl: AclPayload,
}

/// Type-specific part of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    /// Create family.
    Create(CreateBody),
    /// Create family with ACL.
    CreateAcl(AclCreateBody),
    /// Remove or rmdir.
    Remove(RemoveBody),
    /// Hard link.
    Link(LinkBody),
    /// Rename.
    Rename(RenameBody),
    /// Write or write2.
    Write(WriteBody),
    /// Truncate.
    Truncate(TruncateBody),
    /// Setattr.
    Setattr(SetattrBody),
    /// Old-format ACL.
    AclV0(AclV0Body),
    /// ACL.
    Acl(AclBody),
}

impl RecordBody {
    /// Returns true if this body is the layout used by `txtype`.
    #[must_use]
    pub fn accepts(&self, txtype: TxType) -> bool {
        match self {
            Self::Create(_) => txtype.is_create() && !txtype.is_create_acl(),
            Self::CreateAcl(_) => txtype.is_create_acl(),
            Self::Remove(_) => matches!(txtype, TxType::Remove | TxType::Rmdir),
            Self::Link(_) => txtype == TxType::Link,
            Self::Rename(_) => txtype == TxType::Rename,
            Self::Write(_) => matches!(txtype, TxType::Write | TxType::Write2),
            Self::Truncate(_) => txtype == TxType::Truncate,
            Self::Setattr(_) => txtype == TxType::Setattr,
            Self::AclV0(_) => txtype == TxType::AclV0,
            Self::Acl(_) => txtype == TxType::Acl,
        }
    }
}

/// A complete log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record type.
    pub txtype: TxType,
    /// Case-insensitive name handling was requested.
    pub case_insensitive: bool,
    /// Transaction group; assigned when the record is queued.
    pub txg: Txg,
    /// Sequence number; assigned when the record is written to a block.
    pub seq: Seq,
    /// Type-specific part.
    pub body: RecordBody,
}

impl LogRecord {
    /// Creates a record with txg and sequence left at zero.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` is not the layout of `txtype`.
    pub fn new(txtype: TxType, body: RecordBody) -> CodecResult<Self> {
        if !body.accepts(txtype) {
            return Err(CodecError::BodyMismatch {
                txtype: txtype.name(),
            });
        }
        Ok(Self {
            txtype,
            case_insensitive: false,
            txg: Txg::NONE,
            seq: Seq::default(),
            body,
        })
    }

    /// Sets the case-insensitive flag.
    #[must_use]
    pub fn case_insensitive(mut self, value: bool) -> Self {
        self.case_insensitive = value;
        self
    }

    /// Sets the transaction group.
    #[must_use]
    pub fn with_txg(mut self, txg: Txg) -> Self {
        self.txg = txg;
        self
    }

    /// Sets the sequence number.
    #[must_use]
    pub fn with_seq(mut self, seq: Seq) -> Self {
        self.seq = seq;
        self
    }

    /// Returns the target object of an out-of-order record.
    #[must_use]
    pub fn ooo_target(&self) -> Option<ObjectId> {
        if !self.txtype.is_ooo() {
            return None;
        }
        match &self.body {
            RecordBody::Write(b) => Some(b.foid),
            RecordBody::Truncate(b) => Some(b.foid),
            RecordBody::Setattr(b) => Some(b.foid),
            RecordBody::AclV0(b) => Some(b.foid),
            RecordBody::Acl(b) => Some(b.foid),
            _ => None,
        }
    }

    /// Returns the object the operation is primarily about.
    ///
    /// Out-of-order types and creates name the file; namespace operations
    /// name the directory that changes.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        match &self.body {
            RecordBody::Create(b) => b.foid,
            RecordBody::CreateAcl(b) => b.create.foid,
            RecordBody::Remove(b) => b.doid,
            RecordBody::Link(b) => b.doid,
            RecordBody::Rename(b) => b.sdoid,
            RecordBody::Write(b) => b.foid,
            RecordBody::Truncate(b) => b.foid,
            RecordBody::Setattr(b) => b.foid,
            RecordBody::AclV0(b) => b.foid,
            RecordBody::Acl(b) => b.foid,
        }
    }

    /// Returns the encoded length (`reclen`) of the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn encoded_len(&self) -> CodecResult<usize> {
        Ok(RecordEncoder::body_len(self)? + LR_HEADER_SIZE)
    }

    /// Returns the header this record encodes with.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn header(&self) -> CodecResult<RecordHeader> {
        Ok(RecordHeader {
            txtype: self.txtype,
            case_insensitive: self.case_insensitive,
            reclen: self.encoded_len()? as u64,
            txg: self.txg,
            seq: self.seq,
        })
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match the type or its fields
    /// are inconsistent.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        RecordEncoder::encode(self)
    }

    /// Decodes one record from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed.
    pub fn decode(bytes: &[u8], byteswap: bool) -> CodecResult<Self> {
        RecordDecoder::decode_record(bytes, byteswap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truncate(foid: u64) -> RecordBody {
        RecordBody::Truncate(TruncateBody {
            foid: ObjectId::new(foid),
            offset: 0,
            length: 10,
        })
    }

    #[test]
    fn body_must_match_type() {
        assert!(LogRecord::new(TxType::Truncate, truncate(1)).is_ok());
        assert_eq!(
            LogRecord::new(TxType::Write, truncate(1)),
            Err(CodecError::BodyMismatch { txtype: "TX_WRITE" })
        );
    }

    #[test]
    fn ooo_target_only_for_ooo_types() {
        let rec = LogRecord::new(TxType::Truncate, truncate(9)).unwrap();
        assert_eq!(rec.ooo_target(), Some(ObjectId::new(9)));

        let rm = LogRecord::new(
            TxType::Remove,
            RecordBody::Remove(RemoveBody {
                doid: ObjectId::new(4),
                name: b"f".to_vec(),
            }),
        )
        .unwrap();
        assert_eq!(rm.ooo_target(), None);
        assert_eq!(rm.object_id(), ObjectId::new(4));
    }

    #[test]
    fn min_reclen_matches_fixed_layouts() {
        assert_eq!(min_reclen(TxType::Write), 112);
        assert_eq!(min_reclen(TxType::Create), 104);
        assert_eq!(min_reclen(TxType::CreateAcl), 144);
        assert_eq!(min_reclen(TxType::Acl), 80);
        assert_eq!(min_reclen(TxType::Remove), 40);
    }

    #[test]
    fn align8_rounds_up() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(41), 48);
    }

    #[test]
    fn raw_txtype_sets_ci_bit() {
        let header = RecordHeader {
            txtype: TxType::Mkdir,
            case_insensitive: true,
            reclen: 120,
            txg: Txg::new(1),
            seq: Seq::new(1),
        };
        assert_eq!(header.raw_txtype(), 2 | TX_CI);
    }

    #[test]
    fn xvattr_section_length() {
        assert_eq!(XvAttr::section_len(1), 64);
        let x = XvAttr::zeroed(3);
        assert_eq!(x.as_bytes().len(), 72);
        assert_eq!(&x.as_bytes()[..4], &3u32.to_le_bytes());
    }
}
