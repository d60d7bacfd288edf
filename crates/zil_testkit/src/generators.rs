//! Property-based test generators using proptest.
//!
//! Every strategy yields values the encoder accepts: names without NUL
//! bytes, attribute sections only where the type carries one, inline write
//! data matching the declared length.

use proptest::prelude::*;
use zil_codec::attr::{AT_ATIME, AT_GID, AT_MODE, AT_MTIME, AT_SIZE, AT_UID, AT_XVATTR};
use zil_codec::{
    AclBody, AclCreateBody, AclPayload, AclV0Body, BlockPointer, CreateBody, LinkBody, LogRecord,
    ObjectId, RecordBody, RemoveBody, RenameBody, Seq, SetattrBody, Timespec, TruncateBody,
    TxType, Txg, WriteBody, XvAttr, ACE_V0_SIZE,
};
use zil_storage::BlockLocator;

/// Largest inline write payload generated.
pub const MAX_WRITE_DATA: usize = 4096;

/// Strategy for object ids, slot bits included.
pub fn object_id_strategy() -> impl Strategy<Value = ObjectId> {
    (1u64..1 << 32, 1u64..=4).prop_map(|(object, slots)| ObjectId::with_slots(object, slots))
}

/// Strategy for NUL-free names.
pub fn name_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(1u8..=255, 1..64)
}

/// Strategy for timestamps.
pub fn timespec_strategy() -> impl Strategy<Value = Timespec> {
    (any::<u32>(), 0u64..1_000_000_000).prop_map(|(sec, nsec)| Timespec::new(u64::from(sec), nsec))
}

/// Strategy for extended attribute sections.
pub fn xvattr_strategy() -> impl Strategy<Value = XvAttr> {
    (1u32..=XvAttr::MAX_MASKSIZE).prop_map(XvAttr::zeroed)
}

/// Strategy for ACL payloads.
pub fn acl_payload_strategy() -> impl Strategy<Value = AclPayload> {
    (
        0u64..16,
        any::<u64>(),
        prop::collection::vec(any::<u8>(), 0..128),
        prop::collection::vec(any::<u64>(), 0..4),
        prop::collection::vec(prop::collection::vec(1u8..=255, 1..16), 0..3),
    )
        .prop_map(|(aclcnt, acl_flags, aces, fuids, domains)| AclPayload {
            aclcnt,
            acl_flags,
            aces,
            fuids,
            domains,
        })
}

/// Strategy for block pointers, holes included.
pub fn blkptr_strategy() -> impl Strategy<Value = BlockPointer> {
    prop_oneof![
        Just(BlockPointer::HOLE),
        (1u64..1 << 40, 1u64..=1 << 17, 1u64..1 << 20, any::<[u64; 3]>()).prop_map(
            |(locator, lsize, birth, cksum)| BlockPointer {
                locator: BlockLocator::new(locator),
                lsize,
                birth: Txg::new(birth),
                cksum,
            }
        ),
    ]
}

/// Strategy for any record type except the commit marker.
pub fn txtype_strategy() -> impl Strategy<Value = TxType> {
    prop::sample::select(
        TxType::ALL
            .iter()
            .copied()
            .filter(|t| *t != TxType::Commit)
            .collect::<Vec<_>>(),
    )
}

fn create_body_strategy(txtype: TxType) -> impl Strategy<Value = CreateBody> {
    let xvattr = if txtype.has_xvattr() {
        xvattr_strategy().prop_map(Some).boxed()
    } else {
        Just(None).boxed()
    };
    let link = if txtype == TxType::Symlink {
        name_strategy().prop_map(Some).boxed()
    } else {
        Just(None).boxed()
    };
    (
        (object_id_strategy(), object_id_strategy()),
        (any::<u32>(), any::<u32>(), any::<u32>(), any::<u64>()),
        (timespec_strategy(), any::<u64>()),
        xvattr,
        name_strategy(),
        link,
    )
        .prop_map(
            |((doid, foid), (mode, uid, gid, gen), (crtime, rdev), xvattr, name, link)| {
                CreateBody {
                    doid,
                    foid,
                    mode: u64::from(mode),
                    uid: u64::from(uid),
                    gid: u64::from(gid),
                    gen,
                    crtime,
                    rdev,
                    xvattr,
                    name,
                    link,
                }
            },
        )
}

/// Strategy for write bodies, inline or indirect.
pub fn write_body_strategy() -> impl Strategy<Value = WriteBody> {
    let inline = (
        object_id_strategy(),
        any::<u32>(),
        prop::collection::vec(any::<u8>(), 1..=MAX_WRITE_DATA),
    )
        .prop_map(|(foid, offset, data)| WriteBody {
            foid,
            offset: u64::from(offset),
            length: data.len() as u64,
            blkoff: 0,
            blkptr: BlockPointer::HOLE,
            data,
        });
    let indirect = (
        object_id_strategy(),
        any::<u32>(),
        1u64..1 << 17,
        0u64..4096,
        blkptr_strategy(),
    )
        .prop_map(|(foid, offset, length, blkoff, blkptr)| WriteBody {
            foid,
            offset: u64::from(offset),
            length,
            blkoff,
            blkptr,
            data: Vec::new(),
        });
    prop_oneof![inline, indirect]
}

fn setattr_body_strategy() -> impl Strategy<Value = SetattrBody> {
    let mask = prop::sample::subsequence(
        vec![AT_MODE, AT_UID, AT_GID, AT_SIZE, AT_ATIME, AT_MTIME],
        0..=6,
    )
    .prop_map(|bits| bits.into_iter().fold(0, |m, b| m | b));
    (
        object_id_strategy(),
        mask,
        prop::option::of(xvattr_strategy()),
        (any::<u32>(), any::<u32>(), any::<u32>(), any::<u64>()),
        (timespec_strategy(), timespec_strategy()),
    )
        .prop_map(
            |(foid, mask, xvattr, (mode, uid, gid, size), (atime, mtime))| SetattrBody {
                foid,
                mask: if xvattr.is_some() { mask | AT_XVATTR } else { mask },
                mode: u64::from(mode),
                uid: u64::from(uid),
                gid: u64::from(gid),
                size,
                atime,
                mtime,
                xvattr,
            },
        )
}

/// Strategy for a body matching `txtype`.
///
/// # Panics
///
/// Panics for the commit marker, which has no body.
pub fn body_strategy(txtype: TxType) -> BoxedStrategy<RecordBody> {
    match txtype {
        TxType::Commit => panic!("commit markers have no body"),
        t if t.is_create_acl() => (create_body_strategy(t), acl_payload_strategy())
            .prop_map(|(create, acl)| RecordBody::CreateAcl(AclCreateBody { create, acl }))
            .boxed(),
        t if t.is_create() => create_body_strategy(t).prop_map(RecordBody::Create).boxed(),
        TxType::Remove | TxType::Rmdir => (object_id_strategy(), name_strategy())
            .prop_map(|(doid, name)| RecordBody::Remove(RemoveBody { doid, name }))
            .boxed(),
        TxType::Link => (object_id_strategy(), object_id_strategy(), name_strategy())
            .prop_map(|(doid, link_obj, name)| {
                RecordBody::Link(LinkBody {
                    doid,
                    link_obj,
                    name,
                })
            })
            .boxed(),
        TxType::Rename => (
            object_id_strategy(),
            object_id_strategy(),
            name_strategy(),
            name_strategy(),
        )
            .prop_map(|(sdoid, tdoid, src, tgt)| {
                RecordBody::Rename(RenameBody {
                    sdoid,
                    tdoid,
                    src,
                    tgt,
                })
            })
            .boxed(),
        TxType::Write | TxType::Write2 => write_body_strategy().prop_map(RecordBody::Write).boxed(),
        TxType::Truncate => (object_id_strategy(), any::<u64>(), any::<u64>())
            .prop_map(|(foid, offset, length)| {
                RecordBody::Truncate(TruncateBody {
                    foid,
                    offset,
                    length,
                })
            })
            .boxed(),
        TxType::Setattr => setattr_body_strategy().prop_map(RecordBody::Setattr).boxed(),
        TxType::AclV0 => (object_id_strategy(), 0usize..16)
            .prop_map(|(foid, n)| {
                RecordBody::AclV0(AclV0Body {
                    foid,
                    aces: vec![0x11; n * ACE_V0_SIZE],
                })
            })
            .boxed(),
        TxType::Acl => (object_id_strategy(), acl_payload_strategy())
            .prop_map(|(foid, acl)| RecordBody::Acl(AclBody { foid, acl }))
            .boxed(),
        // Every create variant is caught by the guards above.
        _ => unreachable!("{txtype} has no generator"),
    }
}

/// Strategy for a single valid record of any type.
pub fn record_strategy() -> impl Strategy<Value = LogRecord> {
    txtype_strategy().prop_flat_map(|txtype| {
        (
            body_strategy(txtype),
            any::<bool>(),
            1u64..1 << 20,
            1u64..1 << 40,
        )
            .prop_map(move |(body, ci, txg, seq)| {
                LogRecord::new(txtype, body)
                    .expect("body generated for its type")
                    .case_insensitive(ci && txtype.allows_ci())
                    .with_txg(Txg::new(txg))
                    .with_seq(Seq::new(seq))
            })
    })
}

/// Strategy for a record sequence as one log would hold it: sequence
/// numbers start at 1 and increase, txgs never decrease.
pub fn log_records_strategy(max: usize) -> impl Strategy<Value = Vec<LogRecord>> {
    (
        prop::collection::vec(record_strategy(), 1..=max.max(1)),
        1u64..100,
    )
        .prop_map(|(records, first_txg)| {
            records
                .into_iter()
                .enumerate()
                .map(|(i, r)| {
                    r.with_seq(Seq::new(i as u64 + 1))
                        .with_txg(Txg::new(first_txg + i as u64 / 4))
                })
                .collect()
        })
}
