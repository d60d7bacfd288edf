//! Replay of a claimed log.
//!
//! Replay walks the claimed range in sequence order and hands every record
//! that may be missing from the main tree to a [`ReplayOps`] implementation.
//! After each applied record the header's `replay_seq` advances, so a replay
//! interrupted by a crash resumes where it stopped without applying any
//! record twice.
//!
//! Records are skipped when:
//!
//! - their txg is below the claim boundary (already committed)
//! - their sequence is at or below `replay_seq` (already replayed)
//!
//! Everything else is applied in sequence order, out-of-order records
//! included: two writes to one object may cover disjoint ranges, so the
//! later one never makes the earlier one redundant.

use crate::error::{ZilError, ZilResult};
use crate::header::{LwbHeader, ZilHeader};
use crate::parse::{walk, ChainVisitor, RecordVisit, TypeCounts, VisitControl};
use crate::pool::{Objset, TxgSource};
use tracing::info;
use zil_codec::{
    AclBody, AclCreateBody, AclV0Body, CreateBody, LinkBody, LogRecord, RecordBody,
    RemoveBody, RenameBody, SetattrBody, TruncateBody, TxType, WriteBody,
};
use zil_storage::{BlockDevice, IoPriority};

/// Applies replayed records to the main object tree.
///
/// One method per record layout; the record itself tells variants apart
/// (`TX_MKDIR` vs `TX_CREATE`, `TX_RMDIR` vs `TX_REMOVE`, the
/// case-insensitivity flag). An `Err` stops replay; records applied before
/// it stay applied.
pub trait ReplayOps {
    /// Create family without ACL.
    fn create(&mut self, record: &LogRecord, body: &CreateBody) -> ZilResult<()>;
    /// Create family with ACL.
    fn create_acl(&mut self, record: &LogRecord, body: &AclCreateBody) -> ZilResult<()>;
    /// Remove or rmdir.
    fn remove(&mut self, record: &LogRecord, body: &RemoveBody) -> ZilResult<()>;
    /// Hard link.
    fn link(&mut self, record: &LogRecord, body: &LinkBody) -> ZilResult<()>;
    /// Rename.
    fn rename(&mut self, record: &LogRecord, body: &RenameBody) -> ZilResult<()>;
    /// Write.
    fn write(&mut self, record: &LogRecord, body: &WriteBody) -> ZilResult<()>;
    /// Write that only extends the file size.
    fn write2(&mut self, record: &LogRecord, body: &WriteBody) -> ZilResult<()>;
    /// Truncate.
    fn truncate(&mut self, record: &LogRecord, body: &TruncateBody) -> ZilResult<()>;
    /// Setattr.
    fn setattr(&mut self, record: &LogRecord, body: &SetattrBody) -> ZilResult<()>;
    /// Old-format ACL.
    fn acl_v0(&mut self, record: &LogRecord, body: &AclV0Body) -> ZilResult<()>;
    /// ACL.
    fn acl(&mut self, record: &LogRecord, body: &AclBody) -> ZilResult<()>;
}

/// Accepts every record without applying it.
///
/// Useful to dry-run a replay or to drain a log whose effects are known
/// to be in the main tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardOps;

impl ReplayOps for DiscardOps {
    fn create(&mut self, _: &LogRecord, _: &CreateBody) -> ZilResult<()> {
        Ok(())
    }
    fn create_acl(&mut self, _: &LogRecord, _: &AclCreateBody) -> ZilResult<()> {
        Ok(())
    }
    fn remove(&mut self, _: &LogRecord, _: &RemoveBody) -> ZilResult<()> {
        Ok(())
    }
    fn link(&mut self, _: &LogRecord, _: &LinkBody) -> ZilResult<()> {
        Ok(())
    }
    fn rename(&mut self, _: &LogRecord, _: &RenameBody) -> ZilResult<()> {
        Ok(())
    }
    fn write(&mut self, _: &LogRecord, _: &WriteBody) -> ZilResult<()> {
        Ok(())
    }
    fn write2(&mut self, _: &LogRecord, _: &WriteBody) -> ZilResult<()> {
        Ok(())
    }
    fn truncate(&mut self, _: &LogRecord, _: &TruncateBody) -> ZilResult<()> {
        Ok(())
    }
    fn setattr(&mut self, _: &LogRecord, _: &SetattrBody) -> ZilResult<()> {
        Ok(())
    }
    fn acl_v0(&mut self, _: &LogRecord, _: &AclV0Body) -> ZilResult<()> {
        Ok(())
    }
    fn acl(&mut self, _: &LogRecord, _: &AclBody) -> ZilResult<()> {
        Ok(())
    }
}

macro_rules! body {
    ($record:expr, $variant:ident) => {
        match &$record.body {
            RecordBody::$variant(b) => b,
            _ => {
                return Err(ZilError::corrupt_record(format!(
                    "{} record carries a foreign body",
                    $record.txtype
                )))
            }
        }
    };
}

/// Routes one record to its [`ReplayOps`] method.
///
/// # Panics
///
/// Panics on a commit marker, which the codec never produces.
///
/// # Errors
///
/// Returns the callback's error, or a corrupt-record error if the body
/// does not belong to the record's type.
pub fn dispatch<O: ReplayOps + ?Sized>(ops: &mut O, record: &LogRecord) -> ZilResult<()> {
    match record.txtype {
        TxType::Commit => unreachable!("commit markers never reach replay"),
        TxType::Create
        | TxType::Mkdir
        | TxType::Mkxattr
        | TxType::Symlink
        | TxType::CreateAttr
        | TxType::MkdirAttr => ops.create(record, body!(record, Create)),
        TxType::CreateAcl
        | TxType::CreateAclAttr
        | TxType::MkdirAcl
        | TxType::MkdirAclAttr => ops.create_acl(record, body!(record, CreateAcl)),
        TxType::Remove | TxType::Rmdir => ops.remove(record, body!(record, Remove)),
        TxType::Link => ops.link(record, body!(record, Link)),
        TxType::Rename => ops.rename(record, body!(record, Rename)),
        TxType::Write => ops.write(record, body!(record, Write)),
        TxType::Write2 => ops.write2(record, body!(record, Write)),
        TxType::Truncate => ops.truncate(record, body!(record, Truncate)),
        TxType::Setattr => ops.setattr(record, body!(record, Setattr)),
        TxType::AclV0 => ops.acl_v0(record, body!(record, AclV0)),
        TxType::Acl => ops.acl(record, body!(record, Acl)),
    }
}

/// What a replay did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    /// Records handed to [`ReplayOps`].
    pub applied: u64,
    /// Records below the claim boundary.
    pub already_committed: u64,
    /// Records at or below `replay_seq`.
    pub already_replayed: u64,
    /// Applied records per type.
    pub applied_by_type: TypeCounts,
    /// The log was discarded without replay.
    pub discarded: bool,
}

struct ReplayVisitor<'a, O: ?Sized> {
    ops: &'a mut O,
    header: &'a mut LwbHeader,
    outcome: &'a mut ReplayOutcome,
}

impl<O: ReplayOps + ?Sized> ChainVisitor for ReplayVisitor<'_, O> {
    fn visit_record(&mut self, visit: &RecordVisit<'_>) -> ZilResult<VisitControl> {
        let Some(record) = visit.record else {
            return Err(ZilError::invalid_operation(
                "encrypted records cannot be replayed without decryption",
            ));
        };
        if record.txg < self.header.claim_txg {
            self.outcome.already_committed += 1;
            return Ok(VisitControl::Continue);
        }
        if record.seq <= self.header.replay_seq {
            self.outcome.already_replayed += 1;
            return Ok(VisitControl::Continue);
        }
        dispatch(self.ops, record)?;
        self.header.replay_seq = record.seq;
        self.outcome.applied += 1;
        self.outcome.applied_by_type.add(record.txtype);
        Ok(VisitControl::Continue)
    }
}

/// Replays a claimed log through `ops`.
///
/// On success the chain is dropped from the header (claim fields, flags
/// and the first-block pointer are reset). On error the header keeps the
/// progress made so far and still asks for replay.
///
/// # Errors
///
/// Returns the first walk or callback error.
pub fn replay_log<O: ReplayOps + ?Sized>(
    device: &dyn BlockDevice,
    pool: &dyn TxgSource,
    objset: &dyn Objset,
    header: &mut ZilHeader,
    ops: &mut O,
) -> ZilResult<ReplayOutcome> {
    let mut outcome = ReplayOutcome::default();
    let snapshot = *header;
    let lwb = match header {
        ZilHeader::Uninit => return Ok(outcome),
        ZilHeader::Pmem(_) => {
            return Err(ZilError::UnsupportedKind {
                kind: snapshot.kind().as_str(),
            })
        }
        ZilHeader::Lwb(lwb) => lwb,
    };
    if !lwb.replay_needed() {
        lwb.reset();
        return Ok(outcome);
    }

    info!(
        objset = objset.id(),
        claim_txg = lwb.claim_txg.as_u64(),
        replay_seq = lwb.replay_seq.as_u64(),
        "replaying intent log"
    );
    let mut visitor = ReplayVisitor {
        ops,
        header: &mut *lwb,
        outcome: &mut outcome,
    };
    let mut result = walk(
        device,
        pool,
        objset,
        &snapshot,
        &mut visitor,
        true,
        IoPriority::SyncRead,
    );
    if let Some(e) = result.error.take() {
        return Err(e);
    }

    lwb.reset();
    info!(
        objset = objset.id(),
        applied = outcome.applied,
        committed = outcome.already_committed,
        replayed = outcome.already_replayed,
        "intent log replay complete"
    );
    Ok(outcome)
}
