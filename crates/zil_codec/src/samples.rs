//! Representative records of every type, for unit tests.

use crate::blkptr::BlockPointer;
use crate::record::attr::{AT_MODE, AT_SIZE, AT_XVATTR};
use crate::record::{
    AclBody, AclCreateBody, AclPayload, AclV0Body, CreateBody, LinkBody, LogRecord, RecordBody,
    RemoveBody, RenameBody, SetattrBody, TruncateBody, WriteBody, XvAttr,
};
use crate::txtype::TxType;
use crate::types::{ObjectId, Seq, Timespec, Txg};
use zil_storage::BlockLocator;

fn create(txtype: TxType) -> CreateBody {
    CreateBody {
        doid: ObjectId::new(4),
        foid: ObjectId::with_slots(130, 2),
        mode: 0o100644,
        uid: 1000,
        gid: 100,
        gen: 5,
        crtime: Timespec::new(1_700_000_000, 42),
        rdev: 0,
        xvattr: txtype.has_xvattr().then(|| XvAttr::zeroed(2)),
        name: b"report.txt".to_vec(),
        link: (txtype == TxType::Symlink).then(|| b"../target".to_vec()),
    }
}

fn acl() -> AclPayload {
    AclPayload {
        aclcnt: 2,
        acl_flags: 0x10,
        aces: vec![0xAB; 21],
        fuids: vec![0x1_0000_0001, 0x1_0000_0002],
        domains: vec![b"S-1-5-21-1".to_vec()],
    }
}

/// Builds a valid record of `txtype` at txg 5, seq 3.
pub(crate) fn sample_record(txtype: TxType) -> LogRecord {
    let foid = ObjectId::new(130);
    let body = match txtype {
        TxType::Commit => unreachable!("commit markers have no body"),
        TxType::Create
        | TxType::Mkdir
        | TxType::Mkxattr
        | TxType::Symlink
        | TxType::CreateAttr
        | TxType::MkdirAttr => RecordBody::Create(create(txtype)),
        TxType::CreateAcl | TxType::CreateAclAttr | TxType::MkdirAcl | TxType::MkdirAclAttr => {
            RecordBody::CreateAcl(AclCreateBody {
                create: create(txtype),
                acl: acl(),
            })
        }
        TxType::Remove | TxType::Rmdir => RecordBody::Remove(RemoveBody {
            doid: ObjectId::new(4),
            name: b"old".to_vec(),
        }),
        TxType::Link => RecordBody::Link(LinkBody {
            doid: ObjectId::new(4),
            link_obj: foid,
            name: b"hardlink".to_vec(),
        }),
        TxType::Rename => RecordBody::Rename(RenameBody {
            sdoid: ObjectId::new(4),
            tdoid: ObjectId::new(9),
            src: b"a".to_vec(),
            tgt: b"b-renamed".to_vec(),
        }),
        TxType::Write | TxType::Write2 => RecordBody::Write(WriteBody {
            foid,
            offset: 8192,
            length: 13,
            blkoff: 0,
            blkptr: BlockPointer {
                locator: BlockLocator::new(0x2000),
                lsize: 4096,
                birth: Txg::new(4),
                cksum: [1, 2, 3],
            },
            data: b"hello, world!".to_vec(),
        }),
        TxType::Truncate => RecordBody::Truncate(TruncateBody {
            foid,
            offset: 100,
            length: 900,
        }),
        TxType::Setattr => RecordBody::Setattr(SetattrBody {
            foid,
            mask: AT_MODE | AT_SIZE | AT_XVATTR,
            mode: 0o600,
            uid: 0,
            gid: 0,
            size: 77,
            atime: Timespec::new(1, 2),
            mtime: Timespec::new(3, 4),
            xvattr: Some(XvAttr::zeroed(1)),
        }),
        TxType::AclV0 => RecordBody::AclV0(AclV0Body {
            foid,
            aces: vec![7; 36],
        }),
        TxType::Acl => RecordBody::Acl(AclBody { foid, acl: acl() }),
    };
    let ci = txtype.allows_ci();
    LogRecord::new(txtype, body)
        .map(|r| r.case_insensitive(ci).with_txg(Txg::new(5)).with_seq(Seq::new(3)))
        .unwrap_or_else(|e| panic!("sample for {txtype} is invalid: {e}"))
}
