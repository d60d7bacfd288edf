//! Chain walker.
//!
//! The walker follows a log from the header's first block pointer, verifies
//! each block, decodes its records and hands both to a [`ChainVisitor`] in
//! chain order. It never panics on on-disk data: the first failure is
//! recorded in [`ParseResult::error`] and halts the walk, leaving the
//! counts of everything visited before it intact.

use crate::chain::{verify_block, BlockStatus, BlockTrailer};
use crate::error::ZilError;
use crate::header::ZilHeader;
use crate::pool::{Objset, TxgSource};
use std::collections::HashSet;
use tracing::{debug, warn};
use zil_codec::{
    decode_header, BlockPointer, LogRecord, RecordDecoder, RecordHeader, Seq, TxType, Txg,
    TX_MAX_TYPE,
};
use zil_storage::{BlockDevice, IoPriority};

/// Whether a walk continues after a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitControl {
    /// Keep walking.
    Continue,
    /// Stop without error.
    Abort,
}

/// A verified block, as seen by [`ChainVisitor::visit_block`].
#[derive(Debug, Clone, Copy)]
pub struct BlockVisit {
    /// Pointer the block was read through.
    pub bp: BlockPointer,
    /// The block's trailer.
    pub trailer: BlockTrailer,
    /// Claim txg recorded in the header.
    pub claim_txg: Txg,
    /// The block was written by an opposite-endian host.
    pub byteswap: bool,
}

/// A record, as seen by [`ChainVisitor::visit_record`].
#[derive(Debug, Clone, Copy)]
pub struct RecordVisit<'a> {
    /// The decoded header.
    pub header: RecordHeader,
    /// The decoded record; `None` when the body is delivered opaque
    /// (encrypted object set, no decryption requested).
    pub record: Option<&'a LogRecord>,
    /// The record's raw bytes, `reclen` long.
    pub raw: &'a [u8],
    /// Block holding the record.
    pub block: &'a BlockPointer,
    /// Claim txg recorded in the header.
    pub claim_txg: Txg,
}

/// Callbacks driven by [`walk`].
///
/// An `Err` from either callback halts the walk and is stored in the
/// result; [`VisitControl::Abort`] halts it without error.
pub trait ChainVisitor {
    /// Called once per verified block, before its records.
    fn visit_block(&mut self, block: &BlockVisit) -> crate::ZilResult<VisitControl> {
        let _ = block;
        Ok(VisitControl::Continue)
    }

    /// Called once per record, in sequence order.
    fn visit_record(&mut self, record: &RecordVisit<'_>) -> crate::ZilResult<VisitControl> {
        let _ = record;
        Ok(VisitControl::Continue)
    }
}

/// A visitor that only lets the walker count.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullVisitor;

impl ChainVisitor for NullVisitor {}

/// Per-type record counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeCounts {
    counts: [u64; TX_MAX_TYPE],
}

impl TypeCounts {
    /// Count for one type.
    #[must_use]
    pub fn get(&self, txtype: TxType) -> u64 {
        self.counts[txtype.index()]
    }

    /// Adds one record of `txtype`.
    pub fn add(&mut self, txtype: TxType) {
        self.counts[txtype.index()] += 1;
    }

    /// Sum over all types.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-zero counts in type order.
    pub fn iter(&self) -> impl Iterator<Item = (TxType, u64)> + '_ {
        TxType::ALL
            .into_iter()
            .map(|t| (t, self.get(t)))
            .filter(|(_, n)| *n > 0)
    }
}

/// Why a walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalkEnd {
    /// Reached a hole pointer.
    #[default]
    Hole,
    /// Reached a preallocated block that was never written.
    Unwritten,
    /// Reached the end of the claimed range.
    ClaimBound,
    /// A callback asked to stop.
    Aborted,
    /// An error halted the walk.
    Failed,
    /// The walk was skipped (active checkpoint, unclaimed log).
    Skipped,
}

impl WalkEnd {
    /// Short description for tools.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hole => "hole",
            Self::Unwritten => "unwritten block",
            Self::ClaimBound => "end of claimed range",
            Self::Aborted => "aborted",
            Self::Failed => "error",
            Self::Skipped => "skipped",
        }
    }
}

/// Summary of a walk.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// The error that halted the walk, if any.
    pub error: Option<ZilError>,
    /// Why the walk stopped.
    pub end: WalkEnd,
    /// Highest block sequence visited.
    pub blk_seq: Seq,
    /// Highest record sequence visited.
    pub lr_seq: Seq,
    /// Blocks visited.
    pub blk_count: u64,
    /// Records visited.
    pub lr_count: u64,
    /// Records visited, per type.
    pub counts: TypeCounts,
}

impl ParseResult {
    /// Returns true if the walk ended without error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn fail(&mut self, error: ZilError) {
        warn!(error = %error, blocks = self.blk_count, records = self.lr_count, "log walk halted");
        self.error = Some(error);
        self.end = WalkEnd::Failed;
    }
}

/// Walks the log described by `header`.
///
/// Stops at a hole, at an unwritten successor, at the claimed-range bound
/// (if the header records one), on a callback abort or error, or on the
/// first corrupt block or record. When the pool has an active checkpoint
/// and the log was never claimed, nothing is read.
///
/// With an encrypted object set and `decrypt == false` records are still
/// visited, with [`RecordVisit::record`] set to `None`.
pub fn walk<V: ChainVisitor + ?Sized>(
    device: &dyn BlockDevice,
    pool: &dyn TxgSource,
    objset: &dyn Objset,
    header: &ZilHeader,
    visitor: &mut V,
    decrypt: bool,
    priority: IoPriority,
) -> ParseResult {
    let mut result = ParseResult::default();
    let lwb = match header {
        ZilHeader::Uninit => return result,
        ZilHeader::Pmem(_) => {
            result.fail(ZilError::UnsupportedKind {
                kind: header.kind().as_str(),
            });
            return result;
        }
        ZilHeader::Lwb(lwb) => lwb,
    };

    if !pool.checkpoint_txg().is_none() && !lwb.is_claimed() {
        debug!(objset = objset.id(), "pool has a checkpoint, skipping unclaimed log");
        result.end = WalkEnd::Skipped;
        return result;
    }

    let (max_blk_seq, max_lr_seq) = lwb
        .claim_bound()
        .map_or((u64::MAX, u64::MAX), |(b, l)| (b.as_u64(), l.as_u64()));
    let opaque = objset.is_encrypted() && !decrypt;
    let claim_txg = lwb.claim_txg;

    let mut seen = HashSet::new();
    let mut bp = lwb.log;
    'chain: loop {
        if bp.is_hole() {
            result.end = WalkEnd::Hole;
            break;
        }
        if bp.seq_word() > max_blk_seq {
            result.end = WalkEnd::ClaimBound;
            break;
        }
        if !seen.insert(bp.locator) {
            result.fail(ZilError::corrupt_block(format!(
                "block {} appears twice in the chain",
                bp.locator
            )));
            break;
        }

        let data = match device.read_block(bp.locator, bp.size(), priority) {
            Ok(data) => data,
            Err(e) => {
                result.fail(e.into());
                break;
            }
        };
        let (trailer, byteswap) = match verify_block(&bp, &data) {
            Ok(BlockStatus::Valid { trailer, byteswap }) => (trailer, byteswap),
            Ok(BlockStatus::Unwritten) => {
                result.end = WalkEnd::Unwritten;
                break;
            }
            Err(e) => {
                result.fail(e);
                break;
            }
        };
        if result.blk_count > 0 && trailer.seq <= result.blk_seq {
            result.fail(ZilError::corrupt_block(format!(
                "block seq {} follows {}",
                trailer.seq.as_u64(),
                result.blk_seq.as_u64()
            )));
            break;
        }

        let visit = BlockVisit {
            bp,
            trailer,
            claim_txg,
            byteswap,
        };
        match visitor.visit_block(&visit) {
            Ok(VisitControl::Continue) => {}
            Ok(VisitControl::Abort) => {
                result.end = WalkEnd::Aborted;
                break;
            }
            Err(e) => {
                result.fail(e);
                break;
            }
        }
        result.blk_count += 1;
        result.blk_seq = trailer.seq;

        let records = &data[..trailer.nused];
        let mut offset = 0;
        while offset < records.len() {
            let rest = &records[offset..];
            let header = match decode_header(rest, byteswap) {
                Ok(h) => h,
                Err(e) => {
                    result.fail(ZilError::corrupt_record(format!(
                        "block {} offset {offset}: {e}",
                        bp.locator
                    )));
                    break 'chain;
                }
            };
            if header.len() > rest.len() {
                result.fail(ZilError::corrupt_record(format!(
                    "block {} offset {offset}: record of {} bytes overruns the block",
                    bp.locator, header.reclen
                )));
                break 'chain;
            }
            if header.seq.as_u64() > max_lr_seq {
                result.end = WalkEnd::ClaimBound;
                break 'chain;
            }
            if header.seq <= result.lr_seq {
                result.fail(ZilError::corrupt_record(format!(
                    "block {} offset {offset}: record seq {} follows {}",
                    bp.locator,
                    header.seq.as_u64(),
                    result.lr_seq.as_u64()
                )));
                break 'chain;
            }

            let raw = &rest[..header.len()];
            let decoded = if opaque {
                None
            } else {
                match RecordDecoder::decode_body(&header, raw, byteswap) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        result.fail(ZilError::corrupt_record(format!(
                            "block {} offset {offset}: {e}",
                            bp.locator
                        )));
                        break 'chain;
                    }
                }
            };

            let visit = RecordVisit {
                header,
                record: decoded.as_ref(),
                raw,
                block: &bp,
                claim_txg,
            };
            match visitor.visit_record(&visit) {
                Ok(VisitControl::Continue) => {}
                Ok(VisitControl::Abort) => {
                    result.end = WalkEnd::Aborted;
                    break 'chain;
                }
                Err(e) => {
                    result.fail(e);
                    break 'chain;
                }
            }
            result.lr_count += 1;
            result.lr_seq = header.seq;
            result.counts.add(header.txtype);
            offset += header.len();
        }

        bp = trailer.next;
    }

    debug!(
        objset = objset.id(),
        end = ?result.end,
        blocks = result.blk_count,
        records = result.lr_count,
        blk_seq = result.blk_seq.as_u64(),
        lr_seq = result.lr_seq.as_u64(),
        "log walk finished"
    );
    result
}
