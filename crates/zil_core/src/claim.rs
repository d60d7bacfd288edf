//! Claim: deciding which log contents survive an import.
//!
//! Claiming happens once per log, during pool import, before the log may
//! be replayed or appended to. It records the claim boundary and the
//! highest block and record sequence seen, so that later walks never go
//! past what was claimed even if more of the chain becomes readable.

use crate::error::{ZilError, ZilResult};
use crate::header::{ZilHeader, ZIL_CLAIM_LR_SEQ_VALID, ZIL_REPLAY_NEEDED};
use crate::parse::{
    walk, BlockVisit, ChainVisitor, NullVisitor, ParseResult, RecordVisit, VisitControl,
};
use crate::pool::{Objset, TxgSource};
use std::fmt;
use tracing::{info, warn};
use zil_codec::{BlockPointer, RecordBody, Seq, Txg};
use zil_storage::{BlockDevice, IoPriority};

/// How a block or record relates to the claim boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimDisposition {
    /// Born at or after the boundary: its effect may be missing.
    WillClaim,
    /// Born before the boundary: already in the main tree.
    AlreadyCommitted,
    /// No block at all.
    Hole,
}

impl ClaimDisposition {
    /// Classifies a block pointer against the boundary `T`.
    #[must_use]
    pub fn of_block(bp: &BlockPointer, boundary: Txg) -> Self {
        if bp.is_hole() {
            Self::Hole
        } else {
            Self::of_txg(bp.birth, boundary)
        }
    }

    /// Classifies a txg against the boundary `T`.
    #[must_use]
    pub fn of_txg(txg: Txg, boundary: Txg) -> Self {
        if txg >= boundary {
            Self::WillClaim
        } else {
            Self::AlreadyCommitted
        }
    }

    /// Short description for dumps.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WillClaim => "will claim",
            Self::AlreadyCommitted => "won't claim",
            Self::Hole => "<hole>",
        }
    }
}

/// Lifecycle of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LogState {
    /// Opened, not yet claimed. Nothing may be appended.
    #[default]
    Unclaimed,
    /// Claim in progress.
    Claiming,
    /// Claimed; replay pending.
    Claimed,
    /// Replayed (or nothing to replay); accepting new records.
    Active,
    /// Chain abandoned.
    Destroyed,
}

impl LogState {
    /// Returns true if `self -> to` is a legal transition.
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Unclaimed, Self::Claiming)
                | (Self::Claiming, Self::Claimed | Self::Unclaimed)
                | (Self::Claimed, Self::Active | Self::Destroyed)
                | (Self::Active, Self::Destroyed)
        )
    }

    /// Performs a transition.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] for an illegal transition.
    pub fn transition(self, to: Self, operation: &'static str) -> ZilResult<Self> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(ZilError::invalid_state(self, operation))
        }
    }

    /// Name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unclaimed => "unclaimed",
            Self::Claiming => "claiming",
            Self::Claimed => "claimed",
            Self::Active => "active",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a claim found.
#[derive(Debug, Default)]
pub struct ClaimReport {
    /// Boundary recorded in the header.
    pub claim_txg: Txg,
    /// Blocks born at or after the boundary.
    pub blocks_claimed: u64,
    /// Blocks born before the boundary.
    pub blocks_committed: u64,
    /// Records at or after the boundary.
    pub records_claimed: u64,
    /// Records before the boundary.
    pub records_committed: u64,
    /// Indirect write data blocks claimed.
    pub indirect_claimed: u64,
    /// Indirect write data blocks already committed.
    pub indirect_committed: u64,
    /// Indirect writes with no data block.
    pub holes: u64,
    /// Highest block sequence claimed.
    pub blk_seq: Seq,
    /// Highest record sequence claimed.
    pub lr_seq: Seq,
    /// The log was discarded instead of claimed.
    pub cleared: bool,
    /// The log had been claimed before; nothing changed.
    pub already_claimed: bool,
    /// Records await replay.
    pub replay_needed: bool,
    /// Corruption that ended the claimed range early.
    pub tail_error: Option<ZilError>,
}

struct ClaimVisitor<'a> {
    boundary: Txg,
    report: &'a mut ClaimReport,
}

impl ChainVisitor for ClaimVisitor<'_> {
    fn visit_block(&mut self, block: &BlockVisit) -> ZilResult<VisitControl> {
        match ClaimDisposition::of_block(&block.bp, self.boundary) {
            ClaimDisposition::WillClaim => self.report.blocks_claimed += 1,
            ClaimDisposition::AlreadyCommitted => self.report.blocks_committed += 1,
            ClaimDisposition::Hole => {}
        }
        Ok(VisitControl::Continue)
    }

    fn visit_record(&mut self, record: &RecordVisit<'_>) -> ZilResult<VisitControl> {
        match ClaimDisposition::of_txg(record.header.txg, self.boundary) {
            ClaimDisposition::WillClaim => self.report.records_claimed += 1,
            _ => self.report.records_committed += 1,
        }
        if let Some(RecordBody::Write(w)) = record.record.map(|r| &r.body) {
            if w.is_indirect() {
                match ClaimDisposition::of_block(&w.blkptr, self.boundary) {
                    ClaimDisposition::WillClaim => self.report.indirect_claimed += 1,
                    ClaimDisposition::AlreadyCommitted => self.report.indirect_committed += 1,
                    ClaimDisposition::Hole => self.report.holes += 1,
                }
            }
        }
        Ok(VisitControl::Continue)
    }
}

/// Claims the log described by `header`, updating it in place.
///
/// The log is cleared instead when the pool requests it or when the pool
/// has an active checkpoint and the log was never claimed. A log that was
/// already claimed is left untouched.
///
/// # Errors
///
/// Returns [`ZilError::Io`] if a block cannot be read (the header is not
/// modified) and [`ZilError::UnsupportedKind`] for non-chain kinds.
/// Corruption is not an error: it ends the claimed range and is reported
/// in [`ClaimReport::tail_error`].
pub fn claim_log(
    device: &dyn BlockDevice,
    pool: &dyn TxgSource,
    objset: &dyn Objset,
    header: &mut ZilHeader,
) -> ZilResult<ClaimReport> {
    let mut report = ClaimReport::default();
    let snapshot = *header;
    let lwb = match header {
        ZilHeader::Uninit => return Ok(report),
        ZilHeader::Pmem(_) => {
            return Err(ZilError::UnsupportedKind {
                kind: snapshot.kind().as_str(),
            })
        }
        ZilHeader::Lwb(lwb) => lwb,
    };

    if pool.log_clear_requested() || (!pool.checkpoint_txg().is_none() && !lwb.is_claimed()) {
        info!(objset = objset.id(), "clearing intent log instead of claiming it");
        lwb.reset();
        report.cleared = true;
        return Ok(report);
    }
    if lwb.is_claimed() {
        report.already_claimed = true;
        report.claim_txg = lwb.claim_txg;
        report.replay_needed = lwb.replay_needed();
        return Ok(report);
    }
    if lwb.is_empty() {
        return Ok(report);
    }

    let boundary = pool.min_claim_txg();
    let mut result = walk(
        device,
        pool,
        objset,
        &snapshot,
        &mut ClaimVisitor {
            boundary,
            report: &mut report,
        },
        false,
        IoPriority::SyncRead,
    );
    match result.error.take() {
        Some(ZilError::Io(e)) => return Err(ZilError::Io(e)),
        Some(e) => {
            warn!(objset = objset.id(), error = %e, "claimed range ends at corrupt data");
            report.tail_error = Some(e);
        }
        None => {}
    }

    lwb.claim_txg = boundary;
    lwb.claim_blk_seq = result.blk_seq;
    lwb.claim_lr_seq = result.lr_seq;
    lwb.flags |= ZIL_CLAIM_LR_SEQ_VALID;
    if result.lr_count > 0 || result.blk_count > 1 {
        lwb.flags |= ZIL_REPLAY_NEEDED;
    }

    report.claim_txg = boundary;
    report.blk_seq = result.blk_seq;
    report.lr_seq = result.lr_seq;
    report.replay_needed = lwb.replay_needed();
    info!(
        objset = objset.id(),
        claim_txg = boundary.as_u64(),
        blocks = result.blk_count,
        records = result.lr_count,
        "claimed intent log"
    );
    Ok(report)
}

/// Walks a log to verify that its chain is intact.
///
/// # Errors
///
/// Returns the first error the walk hit.
pub fn check_log_chain(
    device: &dyn BlockDevice,
    pool: &dyn TxgSource,
    objset: &dyn Objset,
    header: &ZilHeader,
) -> ZilResult<ParseResult> {
    let mut result = walk(
        device,
        pool,
        objset,
        header,
        &mut NullVisitor,
        false,
        IoPriority::SyncRead,
    );
    match result.error.take() {
        Some(e) => Err(e),
        None => Ok(result),
    }
}
