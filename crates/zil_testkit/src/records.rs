//! Constructors for the records tests use most.
//!
//! Every constructor returns a record with txg and sequence left at zero;
//! the writer (or [`ChainBuilder`](crate::ChainBuilder)) assigns them.

use zil_codec::attr::{AT_MODE, AT_SIZE};
use zil_codec::{
    AclBody, AclPayload, BlockPointer, CreateBody, LinkBody, LogRecord, ObjectId, RecordBody,
    RemoveBody, RenameBody, SetattrBody, Timespec, TruncateBody, TxType, WriteBody,
};

fn record(txtype: TxType, body: RecordBody) -> LogRecord {
    LogRecord::new(txtype, body).expect("constructor pairs the type with its layout")
}

fn create_body(doid: u64, name: &str, foid: u64, mode: u64) -> CreateBody {
    CreateBody {
        doid: ObjectId::new(doid),
        foid: ObjectId::new(foid),
        mode,
        uid: 1000,
        gid: 1000,
        gen: 1,
        crtime: Timespec::new(1_700_000_000, 0),
        rdev: 0,
        xvattr: None,
        name: name.as_bytes().to_vec(),
        link: None,
    }
}

/// `TX_CREATE` of a regular file.
pub fn create(doid: u64, name: &str, foid: u64) -> LogRecord {
    record(
        TxType::Create,
        RecordBody::Create(create_body(doid, name, foid, 0o100644)),
    )
}

/// `TX_MKDIR`.
pub fn mkdir(doid: u64, name: &str, foid: u64) -> LogRecord {
    record(
        TxType::Mkdir,
        RecordBody::Create(create_body(doid, name, foid, 0o040755)),
    )
}

/// `TX_SYMLINK` pointing at `target`.
pub fn symlink(doid: u64, name: &str, foid: u64, target: &str) -> LogRecord {
    let mut body = create_body(doid, name, foid, 0o120777);
    body.link = Some(target.as_bytes().to_vec());
    record(TxType::Symlink, RecordBody::Create(body))
}

/// `TX_REMOVE`.
pub fn remove(doid: u64, name: &str) -> LogRecord {
    record(
        TxType::Remove,
        RecordBody::Remove(RemoveBody {
            doid: ObjectId::new(doid),
            name: name.as_bytes().to_vec(),
        }),
    )
}

/// `TX_RMDIR`.
pub fn rmdir(doid: u64, name: &str) -> LogRecord {
    let mut r = remove(doid, name);
    r.txtype = TxType::Rmdir;
    r
}

/// `TX_LINK` of `target` under a new name.
pub fn link(doid: u64, name: &str, target: u64) -> LogRecord {
    record(
        TxType::Link,
        RecordBody::Link(LinkBody {
            doid: ObjectId::new(doid),
            link_obj: ObjectId::new(target),
            name: name.as_bytes().to_vec(),
        }),
    )
}

/// `TX_RENAME`.
pub fn rename(sdoid: u64, src: &str, tdoid: u64, tgt: &str) -> LogRecord {
    record(
        TxType::Rename,
        RecordBody::Rename(RenameBody {
            sdoid: ObjectId::new(sdoid),
            tdoid: ObjectId::new(tdoid),
            src: src.as_bytes().to_vec(),
            tgt: tgt.as_bytes().to_vec(),
        }),
    )
}

/// `TX_WRITE` carrying its data inline.
pub fn write(foid: u64, offset: u64, data: &[u8]) -> LogRecord {
    record(
        TxType::Write,
        RecordBody::Write(WriteBody {
            foid: ObjectId::new(foid),
            offset,
            length: data.len() as u64,
            blkoff: 0,
            blkptr: BlockPointer::HOLE,
            data: data.to_vec(),
        }),
    )
}

/// `TX_WRITE` without data, for itxs whose payload is fetched at flush.
pub fn write_intent(foid: u64, offset: u64, length: u64) -> LogRecord {
    record(
        TxType::Write,
        RecordBody::Write(WriteBody {
            foid: ObjectId::new(foid),
            offset,
            length,
            blkoff: 0,
            blkptr: BlockPointer::HOLE,
            data: Vec::new(),
        }),
    )
}

/// `TX_WRITE2`: the data is already in the main tree, only the size moves.
pub fn write2(foid: u64, offset: u64, length: u64) -> LogRecord {
    let mut r = write_intent(foid, offset, length);
    r.txtype = TxType::Write2;
    r
}

/// `TX_TRUNCATE` freeing `length` bytes at `offset`.
pub fn truncate(foid: u64, offset: u64, length: u64) -> LogRecord {
    record(
        TxType::Truncate,
        RecordBody::Truncate(TruncateBody {
            foid: ObjectId::new(foid),
            offset,
            length,
        }),
    )
}

fn setattr(foid: u64, mask: u64, mode: u64, size: u64) -> LogRecord {
    record(
        TxType::Setattr,
        RecordBody::Setattr(SetattrBody {
            foid: ObjectId::new(foid),
            mask,
            mode,
            uid: 0,
            gid: 0,
            size,
            atime: Timespec::default(),
            mtime: Timespec::default(),
            xvattr: None,
        }),
    )
}

/// `TX_SETATTR` changing only the size.
pub fn setattr_size(foid: u64, size: u64) -> LogRecord {
    setattr(foid, AT_SIZE, 0, size)
}

/// `TX_SETATTR` changing only the mode.
pub fn setattr_mode(foid: u64, mode: u64) -> LogRecord {
    setattr(foid, AT_MODE, mode, 0)
}

/// `TX_ACL` with `count` opaque entries.
pub fn acl(foid: u64, count: u64) -> LogRecord {
    record(
        TxType::Acl,
        RecordBody::Acl(AclBody {
            foid: ObjectId::new(foid),
            acl: AclPayload {
                aclcnt: count,
                acl_flags: 0,
                aces: vec![0x5A; count as usize * 12],
                fuids: Vec::new(),
                domains: Vec::new(),
            },
        }),
    )
}
