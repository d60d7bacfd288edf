//! Binary record decoder.
//!
//! Decoding never panics on malformed input: every length is checked
//! against the bytes that remain before anything is read, and the record's
//! declared length is checked against its type's fixed size before any
//! variable data is touched.

use crate::blkptr::{BlockPointer, BLKPTR_SIZE};
use crate::error::{CodecError, CodecResult};
use crate::record::attr::AT_XVATTR;
use crate::record::{
    align8, min_reclen, AclBody, AclCreateBody, AclPayload, AclV0Body, CreateBody, LinkBody,
    LogRecord, RecordBody, RecordHeader, RemoveBody, RenameBody, SetattrBody, TruncateBody,
    WriteBody, XvAttr, ACE_V0_SIZE, LR_HEADER_SIZE, LR_OOO_FOID_OFFSET, WRITE_FIXED,
};
use crate::txtype::{TxType, TX_CI};
use crate::types::{ObjectId, Seq, Timespec, Txg};
use bytes::Buf;

/// Decode the common header at the start of `bytes`.
///
/// # Errors
///
/// Returns an error for truncated input, unknown types, the commit marker,
/// a misaligned `reclen` or one below the type's minimum.
pub fn decode_header(bytes: &[u8], byteswap: bool) -> CodecResult<RecordHeader> {
    RecordDecoder::decode_header(bytes, byteswap)
}

/// Decode one complete record from the start of `bytes`.
///
/// # Errors
///
/// Returns an error if the record is malformed.
pub fn decode_record(bytes: &[u8], byteswap: bool) -> CodecResult<LogRecord> {
    RecordDecoder::decode_record(bytes, byteswap)
}

/// Reads the target object id of an out-of-order record without decoding
/// its body.
///
/// Returns `None` for records outside the out-of-order subset.
///
/// # Errors
///
/// Returns an error if the header is malformed.
pub fn ooo_target(bytes: &[u8], byteswap: bool) -> CodecResult<Option<ObjectId>> {
    let header = decode_header(bytes, byteswap)?;
    if !header.txtype.is_ooo() {
        return Ok(None);
    }
    let mut decoder = RecordDecoder::new(&bytes[LR_OOO_FOID_OFFSET..], byteswap);
    decoder.object_id().map(Some)
}

/// A record decoder over a byte slice.
pub struct RecordDecoder<'a> {
    data: &'a [u8],
    byteswap: bool,
}

impl<'a> RecordDecoder<'a> {
    /// Create a decoder over `data`.
    pub fn new(data: &'a [u8], byteswap: bool) -> Self {
        Self { data, byteswap }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// See [`decode_header`].
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed.
    pub fn decode_header(bytes: &[u8], byteswap: bool) -> CodecResult<RecordHeader> {
        let mut decoder = RecordDecoder::new(bytes, byteswap);
        let raw = decoder.u64()?;
        let reclen = decoder.u64()?;
        let txg = Txg::new(decoder.u64()?);
        let seq = Seq::new(decoder.u64()?);

        let (txtype, case_insensitive) =
            TxType::from_raw(raw).ok_or(CodecError::UnknownTxType(raw & !TX_CI))?;
        if txtype == TxType::Commit {
            return Err(CodecError::CommitMarker);
        }
        if case_insensitive && !txtype.allows_ci() {
            return Err(CodecError::invalid_record(format!(
                "{txtype} cannot be case-insensitive"
            )));
        }
        if reclen % 8 != 0 {
            return Err(CodecError::Misaligned(reclen));
        }
        let min = min_reclen(txtype);
        if reclen < min as u64 {
            return Err(CodecError::ReclenTooSmall {
                txtype: txtype.name(),
                reclen,
                min,
            });
        }
        Ok(RecordHeader {
            txtype,
            case_insensitive,
            reclen,
            txg,
            seq,
        })
    }

    /// See [`decode_record`].
    ///
    /// # Errors
    ///
    /// Returns an error if the record is malformed.
    pub fn decode_record(bytes: &[u8], byteswap: bool) -> CodecResult<LogRecord> {
        let header = Self::decode_header(bytes, byteswap)?;
        Self::decode_body(&header, bytes, byteswap)
    }

    /// Decode the body of a record whose header was already decoded.
    ///
    /// `bytes` starts at the record header.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is malformed or disagrees with `reclen`.
    pub fn decode_body(
        header: &RecordHeader,
        bytes: &[u8],
        byteswap: bool,
    ) -> CodecResult<LogRecord> {
        let reclen = header.len();
        let record = bytes
            .get(LR_HEADER_SIZE..reclen)
            .ok_or_else(|| CodecError::eof(reclen, bytes.len()))?;
        let mut decoder = RecordDecoder::new(record, byteswap);
        let body = decoder.body(header)?;

        let consumed = LR_HEADER_SIZE + record.len() - decoder.remaining();
        let expected = align8(consumed) as u64;
        if expected != header.reclen {
            return Err(CodecError::ReclenMismatch {
                expected,
                actual: header.reclen,
            });
        }

        Ok(LogRecord {
            txtype: header.txtype,
            case_insensitive: header.case_insensitive,
            txg: header.txg,
            seq: header.seq,
            body,
        })
    }

    fn body(&mut self, header: &RecordHeader) -> CodecResult<RecordBody> {
        let txtype = header.txtype;
        let body = match txtype {
            TxType::Commit => return Err(CodecError::CommitMarker),
            TxType::Create
            | TxType::Mkdir
            | TxType::Mkxattr
            | TxType::Symlink
            | TxType::CreateAttr
            | TxType::MkdirAttr => {
                let mut create = self.create_fixed()?;
                if txtype.has_xvattr() {
                    create.xvattr = Some(self.xvattr()?);
                }
                create.name = self.cstr("name")?;
                if txtype == TxType::Symlink {
                    create.link = Some(self.cstr("link")?);
                }
                RecordBody::Create(create)
            }
            TxType::CreateAcl
            | TxType::CreateAclAttr
            | TxType::MkdirAcl
            | TxType::MkdirAclAttr => {
                let mut create = self.create_fixed()?;
                let counts = self.acl_fixed()?;
                if txtype.has_xvattr() {
                    create.xvattr = Some(self.xvattr()?);
                }
                let acl = self.acl_tables(counts)?;
                create.name = self.cstr("name")?;
                RecordBody::CreateAcl(AclCreateBody { create, acl })
            }
            TxType::Remove | TxType::Rmdir => RecordBody::Remove(RemoveBody {
                doid: self.object_id()?,
                name: self.cstr("name")?,
            }),
            TxType::Link => RecordBody::Link(LinkBody {
                doid: self.object_id()?,
                link_obj: self.object_id()?,
                name: self.cstr("name")?,
            }),
            TxType::Rename => RecordBody::Rename(RenameBody {
                sdoid: self.object_id()?,
                tdoid: self.object_id()?,
                src: self.cstr("source")?,
                tgt: self.cstr("target")?,
            }),
            TxType::Write | TxType::Write2 => {
                let foid = self.object_id()?;
                let offset = self.u64()?;
                let length = self.u64()?;
                let blkoff = self.u64()?;
                let blkptr = self.blkptr()?;
                let data = match self.remaining() {
                    0 => Vec::new(),
                    rest => {
                        let len = usize::try_from(length)
                            .ok()
                            .filter(|&n| n > 0 && align8(n) == rest)
                            .ok_or(CodecError::ReclenMismatch {
                                expected: (LR_HEADER_SIZE + WRITE_FIXED) as u64
                                    + (length.saturating_add(7) & !7),
                                actual: header.reclen,
                            })?;
                        let data = self.take(len)?.to_vec();
                        self.take(rest - len)?;
                        data
                    }
                };
                RecordBody::Write(WriteBody {
                    foid,
                    offset,
                    length,
                    blkoff,
                    blkptr,
                    data,
                })
            }
            TxType::Truncate => RecordBody::Truncate(TruncateBody {
                foid: self.object_id()?,
                offset: self.u64()?,
                length: self.u64()?,
            }),
            TxType::Setattr => {
                let foid = self.object_id()?;
                let mask = self.u64()?;
                let mode = self.u64()?;
                let uid = self.u64()?;
                let gid = self.u64()?;
                let size = self.u64()?;
                let atime = self.timespec()?;
                let mtime = self.timespec()?;
                let xvattr = if mask & AT_XVATTR != 0 {
                    Some(self.xvattr()?)
                } else {
                    None
                };
                RecordBody::Setattr(SetattrBody {
                    foid,
                    mask,
                    mode,
                    uid,
                    gid,
                    size,
                    atime,
                    mtime,
                    xvattr,
                })
            }
            TxType::AclV0 => {
                let foid = self.object_id()?;
                let aclcnt = self.u64()?;
                let len = usize::try_from(aclcnt)
                    .ok()
                    .and_then(|n| n.checked_mul(ACE_V0_SIZE))
                    .ok_or_else(|| CodecError::eof(usize::MAX, self.remaining()))?;
                RecordBody::AclV0(AclV0Body {
                    foid,
                    aces: self.take(len)?.to_vec(),
                })
            }
            TxType::Acl => {
                let foid = self.object_id()?;
                let counts = self.acl_fixed()?;
                RecordBody::Acl(AclBody {
                    foid,
                    acl: self.acl_tables(counts)?,
                })
            }
        };
        Ok(body)
    }

    fn create_fixed(&mut self) -> CodecResult<CreateBody> {
        Ok(CreateBody {
            doid: self.object_id()?,
            foid: self.object_id()?,
            mode: self.u64()?,
            uid: self.u64()?,
            gid: self.u64()?,
            gen: self.u64()?,
            crtime: self.timespec()?,
            rdev: self.u64()?,
            xvattr: None,
            name: Vec::new(),
            link: None,
        })
    }

    fn acl_fixed(&mut self) -> CodecResult<AclCounts> {
        Ok(AclCounts {
            aclcnt: self.u64()?,
            domcnt: self.u64()?,
            fuidcnt: self.u64()?,
            acl_bytes: self.u64()?,
            acl_flags: self.u64()?,
        })
    }

    fn acl_tables(&mut self, counts: AclCounts) -> CodecResult<AclPayload> {
        let acl_bytes = self.length(counts.acl_bytes)?;
        let aces = self.take(acl_bytes)?.to_vec();
        self.take(align8(acl_bytes) - acl_bytes)?;

        let fuidcnt = self.length(counts.fuidcnt)?;
        if fuidcnt > self.remaining() / 8 {
            return Err(CodecError::eof(fuidcnt.saturating_mul(8), self.remaining()));
        }
        let fuids = (0..fuidcnt).map(|_| self.u64()).collect::<CodecResult<Vec<_>>>()?;

        let domcnt = self.length(counts.domcnt)?;
        if domcnt > self.remaining() {
            return Err(CodecError::UnterminatedString { field: "domain" });
        }
        let domains = (0..domcnt)
            .map(|_| self.cstr("domain"))
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(AclPayload {
            aclcnt: counts.aclcnt,
            acl_flags: counts.acl_flags,
            aces,
            fuids,
            domains,
        })
    }

    fn xvattr(&mut self) -> CodecResult<XvAttr> {
        let head = self
            .data
            .get(..4)
            .ok_or_else(|| CodecError::eof(4, self.remaining()))?;
        let raw = [head[0], head[1], head[2], head[3]];
        let masksize = if self.byteswap {
            u32::from_be_bytes(raw)
        } else {
            u32::from_le_bytes(raw)
        };
        if masksize == 0 || masksize > XvAttr::MAX_MASKSIZE {
            return Err(CodecError::invalid_attributes(format!(
                "mask count {masksize} out of range"
            )));
        }
        let section = self.take(XvAttr::section_len(masksize))?;
        let mut bytes = section.to_vec();
        // Normalise the mask count so the section re-encodes natively.
        bytes[..4].copy_from_slice(&masksize.to_le_bytes());
        Ok(XvAttr(bytes))
    }

    fn blkptr(&mut self) -> CodecResult<BlockPointer> {
        self.need(BLKPTR_SIZE)?;
        let mut words = [0u64; 6];
        for word in &mut words {
            *word = self.u64()?;
        }
        Ok(BlockPointer::from_words(words))
    }

    fn timespec(&mut self) -> CodecResult<Timespec> {
        Ok(Timespec::new(self.u64()?, self.u64()?))
    }

    fn object_id(&mut self) -> CodecResult<ObjectId> {
        Ok(ObjectId::new(self.u64()?))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        self.need(8)?;
        Ok(if self.byteswap {
            self.data.get_u64()
        } else {
            self.data.get_u64_le()
        })
    }

    fn length(&self, declared: u64) -> CodecResult<usize> {
        usize::try_from(declared).map_err(|_| CodecError::eof(usize::MAX, self.remaining()))
    }

    fn cstr(&mut self, field: &'static str) -> CodecResult<Vec<u8>> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedString { field })?;
        let s = self.data[..end].to_vec();
        self.data.advance(end + 1);
        Ok(s)
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn need(&self, len: usize) -> CodecResult<()> {
        if self.data.len() < len {
            return Err(CodecError::eof(len, self.data.len()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct AclCounts {
    aclcnt: u64,
    domcnt: u64,
    fuidcnt: u64,
    acl_bytes: u64,
    acl_flags: u64,
}
