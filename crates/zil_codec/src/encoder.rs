//! Binary record encoder.
//!
//! Records are always written in host-independent little-endian form. The
//! encoder validates a record before emitting any bytes, so a successful
//! encode always decodes back to an equal record.

use crate::error::{CodecError, CodecResult};
use crate::record::{
    align8, AclPayload, LogRecord, RecordBody, XvAttr, ACE_V0_SIZE, ACL_CREATE_FIXED, ACL_FIXED,
    ACL_V0_FIXED, CREATE_FIXED, LINK_FIXED, LR_HEADER_SIZE, REMOVE_FIXED, RENAME_FIXED,
    SETATTR_FIXED, TRUNCATE_FIXED, WRITE_FIXED,
};
use crate::record::attr::AT_XVATTR;
use crate::txtype::TxType;
use bytes::BufMut;

/// Encode a record to its on-disk bytes.
///
/// # Errors
///
/// Returns an error if the record is inconsistent (see [`RecordEncoder`]).
pub fn encode_record(record: &LogRecord) -> CodecResult<Vec<u8>> {
    RecordEncoder::encode(record)
}

/// A record encoder.
///
/// The encoder appends records to an internal buffer, each one padded to
/// an eight-byte boundary, which is exactly how records sit in a log
/// block.
pub struct RecordEncoder {
    buffer: Vec<u8>,
}

impl RecordEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a single record into a fresh buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is inconsistent.
    pub fn encode(record: &LogRecord) -> CodecResult<Vec<u8>> {
        let mut encoder = Self::with_capacity(record.encoded_len()?);
        encoder.append(record)?;
        Ok(encoder.into_bytes())
    }

    /// Returns the padded body length of a record, validating it on the way.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is inconsistent.
    pub fn body_len(record: &LogRecord) -> CodecResult<usize> {
        validate(record)?;
        Ok(align8(LR_HEADER_SIZE + unpadded_body_len(&record.body)) - LR_HEADER_SIZE)
    }

    /// Append one record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is inconsistent; nothing is appended
    /// in that case.
    pub fn append(&mut self, record: &LogRecord) -> CodecResult<()> {
        let body_len = Self::body_len(record)?;
        let reclen = LR_HEADER_SIZE + body_len;
        let start = self.buffer.len();
        self.buffer.reserve(reclen);

        let header = record.header()?;
        self.buffer.put_u64_le(header.raw_txtype());
        self.buffer.put_u64_le(reclen as u64);
        self.buffer.put_u64_le(record.txg.as_u64());
        self.buffer.put_u64_le(record.seq.as_u64());
        self.put_body(&record.body);

        self.buffer.resize(start + reclen, 0);
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn put_body(&mut self, body: &RecordBody) {
        match body {
            RecordBody::Create(b) => {
                self.put_create_fixed(b);
                self.put_xvattr(b.xvattr.as_ref());
                self.put_cstr(&b.name);
                if let Some(link) = &b.link {
                    self.put_cstr(link);
                }
            }
            RecordBody::CreateAcl(b) => {
                self.put_create_fixed(&b.create);
                self.put_acl_fixed(&b.acl);
                self.put_xvattr(b.create.xvattr.as_ref());
                self.put_acl_tables(&b.acl);
                self.put_cstr(&b.create.name);
            }
            RecordBody::Remove(b) => {
                self.buffer.put_u64_le(b.doid.as_u64());
                self.put_cstr(&b.name);
            }
            RecordBody::Link(b) => {
                self.buffer.put_u64_le(b.doid.as_u64());
                self.buffer.put_u64_le(b.link_obj.as_u64());
                self.put_cstr(&b.name);
            }
            RecordBody::Rename(b) => {
                self.buffer.put_u64_le(b.sdoid.as_u64());
                self.buffer.put_u64_le(b.tdoid.as_u64());
                self.put_cstr(&b.src);
                self.put_cstr(&b.tgt);
            }
            RecordBody::Write(b) => {
                self.buffer.put_u64_le(b.foid.as_u64());
                self.buffer.put_u64_le(b.offset);
                self.buffer.put_u64_le(b.length);
                self.buffer.put_u64_le(b.blkoff);
                self.buffer.put_slice(&b.blkptr.to_bytes());
                self.buffer.put_slice(&b.data);
            }
            RecordBody::Truncate(b) => {
                self.buffer.put_u64_le(b.foid.as_u64());
                self.buffer.put_u64_le(b.offset);
                self.buffer.put_u64_le(b.length);
            }
            RecordBody::Setattr(b) => {
                self.buffer.put_u64_le(b.foid.as_u64());
                self.buffer.put_u64_le(b.mask);
                self.buffer.put_u64_le(b.mode);
                self.buffer.put_u64_le(b.uid);
                self.buffer.put_u64_le(b.gid);
                self.buffer.put_u64_le(b.size);
                self.buffer.put_u64_le(b.atime.sec);
                self.buffer.put_u64_le(b.atime.nsec);
                self.buffer.put_u64_le(b.mtime.sec);
                self.buffer.put_u64_le(b.mtime.nsec);
                self.put_xvattr(b.xvattr.as_ref());
            }
            RecordBody::AclV0(b) => {
                self.buffer.put_u64_le(b.foid.as_u64());
                self.buffer.put_u64_le((b.aces.len() / ACE_V0_SIZE) as u64);
                self.buffer.put_slice(&b.aces);
            }
            RecordBody::Acl(b) => {
                self.buffer.put_u64_le(b.foid.as_u64());
                self.put_acl_fixed(&b.acl);
                self.put_acl_tables(&b.acl);
            }
        }
    }

    fn put_create_fixed(&mut self, b: &crate::record::CreateBody) {
        self.buffer.put_u64_le(b.doid.as_u64());
        self.buffer.put_u64_le(b.foid.as_u64());
        self.buffer.put_u64_le(b.mode);
        self.buffer.put_u64_le(b.uid);
        self.buffer.put_u64_le(b.gid);
        self.buffer.put_u64_le(b.gen);
        self.buffer.put_u64_le(b.crtime.sec);
        self.buffer.put_u64_le(b.crtime.nsec);
        self.buffer.put_u64_le(b.rdev);
    }

    fn put_acl_fixed(&mut self, acl: &AclPayload) {
        self.buffer.put_u64_le(acl.aclcnt);
        self.buffer.put_u64_le(acl.domains.len() as u64);
        self.buffer.put_u64_le(acl.fuids.len() as u64);
        self.buffer.put_u64_le(acl.aces.len() as u64);
        self.buffer.put_u64_le(acl.acl_flags);
    }

    fn put_acl_tables(&mut self, acl: &AclPayload) {
        self.buffer.put_slice(&acl.aces);
        self.buffer
            .put_bytes(0, align8(acl.aces.len()) - acl.aces.len());
        for fuid in &acl.fuids {
            self.buffer.put_u64_le(*fuid);
        }
        for domain in &acl.domains {
            self.put_cstr(domain);
        }
    }

    fn put_xvattr(&mut self, xvattr: Option<&XvAttr>) {
        if let Some(xv) = xvattr {
            self.buffer.put_slice(xv.as_bytes());
        }
    }

    fn put_cstr(&mut self, s: &[u8]) {
        self.buffer.put_slice(s);
        self.buffer.put_u8(0);
    }
}

impl Default for RecordEncoder {
    fn default() -> Self {
        Self::new()
    }
}

fn acl_tables_len(acl: &AclPayload) -> usize {
    align8(acl.aces.len())
        + 8 * acl.fuids.len()
        + acl.domains.iter().map(|d| d.len() + 1).sum::<usize>()
}

fn xvattr_len(xvattr: Option<&XvAttr>) -> usize {
    xvattr.map_or(0, |xv| xv.as_bytes().len())
}

fn unpadded_body_len(body: &RecordBody) -> usize {
    match body {
        RecordBody::Create(b) => {
            CREATE_FIXED
                + xvattr_len(b.xvattr.as_ref())
                + b.name.len()
                + 1
                + b.link.as_ref().map_or(0, |l| l.len() + 1)
        }
        RecordBody::CreateAcl(b) => {
            ACL_CREATE_FIXED
                + xvattr_len(b.create.xvattr.as_ref())
                + acl_tables_len(&b.acl)
                + b.create.name.len()
                + 1
        }
        RecordBody::Remove(b) => REMOVE_FIXED + b.name.len() + 1,
        RecordBody::Link(b) => LINK_FIXED + b.name.len() + 1,
        RecordBody::Rename(b) => RENAME_FIXED + b.src.len() + 1 + b.tgt.len() + 1,
        RecordBody::Write(b) => WRITE_FIXED + b.data.len(),
        RecordBody::Truncate(_) => TRUNCATE_FIXED,
        RecordBody::Setattr(b) => SETATTR_FIXED + xvattr_len(b.xvattr.as_ref()),
        RecordBody::AclV0(b) => ACL_V0_FIXED + b.aces.len(),
        RecordBody::Acl(b) => ACL_FIXED + acl_tables_len(&b.acl),
    }
}

fn validate(record: &LogRecord) -> CodecResult<()> {
    let txtype = record.txtype;
    if txtype == TxType::Commit {
        return Err(CodecError::CommitMarker);
    }
    if !record.body.accepts(txtype) {
        return Err(CodecError::BodyMismatch {
            txtype: txtype.name(),
        });
    }
    if record.case_insensitive && !txtype.allows_ci() {
        return Err(CodecError::invalid_record(format!(
            "{txtype} cannot be case-insensitive"
        )));
    }

    match &record.body {
        RecordBody::Create(b) => {
            check_create(txtype, b)?;
        }
        RecordBody::CreateAcl(b) => {
            check_create(txtype, &b.create)?;
            check_acl(&b.acl)?;
        }
        RecordBody::Remove(b) => check_name("name", &b.name)?,
        RecordBody::Link(b) => check_name("name", &b.name)?,
        RecordBody::Rename(b) => {
            check_name("source", &b.src)?;
            check_name("target", &b.tgt)?;
        }
        RecordBody::Write(b) => {
            if !b.data.is_empty() && b.data.len() as u64 != b.length {
                return Err(CodecError::invalid_record(format!(
                    "inline write carries {} bytes but declares {}",
                    b.data.len(),
                    b.length
                )));
            }
        }
        RecordBody::Truncate(_) => {}
        RecordBody::Setattr(b) => {
            if b.xvattr.is_some() != (b.mask & AT_XVATTR != 0) {
                return Err(CodecError::invalid_record(
                    "setattr attribute section must match AT_XVATTR",
                ));
            }
            if let Some(xv) = &b.xvattr {
                check_xvattr(xv)?;
            }
        }
        RecordBody::AclV0(b) => {
            if b.aces.len() % ACE_V0_SIZE != 0 {
                return Err(CodecError::invalid_record(format!(
                    "old ACL entry table of {} bytes is not a multiple of {ACE_V0_SIZE}",
                    b.aces.len()
                )));
            }
        }
        RecordBody::Acl(b) => check_acl(&b.acl)?,
    }
    Ok(())
}

fn check_create(txtype: TxType, b: &crate::record::CreateBody) -> CodecResult<()> {
    check_name("name", &b.name)?;
    if b.xvattr.is_some() != txtype.has_xvattr() {
        return Err(CodecError::invalid_record(format!(
            "{txtype} attribute section presence is wrong"
        )));
    }
    if let Some(xv) = &b.xvattr {
        check_xvattr(xv)?;
    }
    match (&b.link, txtype == TxType::Symlink) {
        (Some(link), true) => check_name("link", link),
        (None, false) => Ok(()),
        _ => Err(CodecError::invalid_record(
            "only TX_SYMLINK carries a link target",
        )),
    }
}

fn check_acl(acl: &AclPayload) -> CodecResult<()> {
    acl.domains
        .iter()
        .try_for_each(|domain| check_name("domain", domain))
}

fn check_name(field: &'static str, name: &[u8]) -> CodecResult<()> {
    if name.contains(&0) {
        return Err(CodecError::invalid_record(format!(
            "{field} contains a NUL byte"
        )));
    }
    Ok(())
}

pub(crate) fn check_xvattr(xv: &XvAttr) -> CodecResult<()> {
    let bytes = xv.as_bytes();
    let Some(head) = bytes.get(..4) else {
        return Err(CodecError::invalid_attributes("section shorter than its mask count"));
    };
    let masksize = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    if masksize == 0 || masksize > XvAttr::MAX_MASKSIZE {
        return Err(CodecError::invalid_attributes(format!(
            "mask count {masksize} out of range"
        )));
    }
    if bytes.len() != XvAttr::section_len(masksize) {
        return Err(CodecError::invalid_attributes(format!(
            "section is {} bytes, mask count {masksize} needs {}",
            bytes.len(),
            XvAttr::section_len(masksize)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RemoveBody, SetattrBody, TruncateBody, WriteBody};
    use crate::blkptr::BlockPointer;
    use crate::types::{ObjectId, Seq, Timespec, Txg};

    fn remove(name: &[u8]) -> LogRecord {
        LogRecord::new(
            TxType::Remove,
            RecordBody::Remove(RemoveBody {
                doid: ObjectId::new(3),
                name: name.to_vec(),
            }),
        )
        .unwrap()
        .with_txg(Txg::new(7))
        .with_seq(Seq::new(2))
    }

    #[test]
    fn header_fields_are_little_endian() {
        let bytes = encode_record(&remove(b"a")).unwrap();
        assert_eq!(&bytes[0..8], &6u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &48u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &7u64.to_le_bytes());
        assert_eq!(&bytes[24..32], &2u64.to_le_bytes());
        assert_eq!(&bytes[32..40], &3u64.to_le_bytes());
        assert_eq!(&bytes[40..42], b"a\0");
        assert_eq!(bytes.len(), 48);
    }

    #[test]
    fn reclen_is_padded_to_eight() {
        for len in 0..20 {
            let rec = remove(&vec![b'x'; len]);
            let bytes = encode_record(&rec).unwrap();
            assert_eq!(bytes.len() % 8, 0);
            assert_eq!(bytes.len(), align8(LR_HEADER_SIZE + REMOVE_FIXED + len + 1));
            assert_eq!(rec.encoded_len().unwrap(), bytes.len());
        }
    }

    #[test]
    fn ci_flag_lands_in_top_bit() {
        let bytes = encode_record(&remove(b"a").case_insensitive(true)).unwrap();
        assert_eq!(&bytes[0..8], &(6u64 | (1 << 63)).to_le_bytes());
    }

    #[test]
    fn ci_rejected_for_data_records() {
        let rec = LogRecord::new(
            TxType::Truncate,
            RecordBody::Truncate(TruncateBody {
                foid: ObjectId::new(1),
                offset: 0,
                length: 1,
            }),
        )
        .unwrap()
        .case_insensitive(true);
        assert!(matches!(
            encode_record(&rec),
            Err(CodecError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn nul_in_name_rejected() {
        assert!(encode_record(&remove(b"a\0b")).is_err());
    }

    #[test]
    fn inline_write_length_must_match() {
        let rec = LogRecord::new(
            TxType::Write,
            RecordBody::Write(WriteBody {
                foid: ObjectId::new(1),
                offset: 0,
                length: 10,
                blkoff: 0,
                blkptr: BlockPointer::HOLE,
                data: vec![1; 9],
            }),
        )
        .unwrap();
        assert!(encode_record(&rec).is_err());
    }

    #[test]
    fn setattr_xvattr_follows_mask() {
        let body = SetattrBody {
            foid: ObjectId::new(1),
            mask: AT_XVATTR,
            mode: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            xvattr: None,
        };
        let rec = LogRecord::new(TxType::Setattr, RecordBody::Setattr(body.clone())).unwrap();
        assert!(encode_record(&rec).is_err());

        let ok = SetattrBody {
            xvattr: Some(XvAttr::zeroed(1)),
            ..body
        };
        let rec = LogRecord::new(TxType::Setattr, RecordBody::Setattr(ok)).unwrap();
        assert_eq!(encode_record(&rec).unwrap().len(), 32 + 80 + 64);
    }

    #[test]
    fn bad_xvattr_rejected() {
        assert!(check_xvattr(&XvAttr(vec![0; 64])).is_err());
        assert!(check_xvattr(&XvAttr(vec![1, 0, 0, 0])).is_err());
        assert!(check_xvattr(&XvAttr::zeroed(2)).is_ok());
    }

    #[test]
    fn append_concatenates_records() {
        let mut encoder = RecordEncoder::new();
        encoder.append(&remove(b"a")).unwrap();
        encoder.append(&remove(b"bcdefghij")).unwrap();
        assert_eq!(encoder.len(), 48 + 56);
        assert!(encoder.append(&remove(b"\0")).is_err());
        assert_eq!(encoder.len(), 104);
    }
}
