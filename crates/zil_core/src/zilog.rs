//! The per-dataset intent log.
//!
//! [`IntentLog`] ties the pieces together: it owns the header, the itx
//! queue and the chain writer, and enforces the lifecycle
//!
//! ```text
//! Unclaimed ──claim──▶ Claimed ──replay──▶ Active ──destroy──▶ Destroyed
//!     ▲                   │                               ▲
//!     └──claim failed─────┘ (via Claiming)   Claimed ─────┘
//! ```
//!
//! Appends are refused until claim and replay have run.

use crate::claim::{claim_log, ClaimReport, LogState};
use crate::config::{SyncPolicy, ZilConfig};
use crate::error::{ZilError, ZilResult};
use crate::header::{ZilHeader, ZilKind};
use crate::itx::{Itx, ItxQueue};
use crate::pool::{Objset, TxgSource};
use crate::replay::{replay_log, ReplayOps, ReplayOutcome};
use crate::writer::{FlushSummary, LwbWriter};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, warn};
use zil_codec::{ObjectId, Txg};
use zil_storage::BlockDevice;

/// Intent log of one object set.
pub struct IntentLog {
    config: ZilConfig,
    device: Arc<dyn BlockDevice>,
    pool: Arc<dyn TxgSource>,
    objset: Arc<dyn Objset>,
    header: RwLock<ZilHeader>,
    state: Mutex<LogState>,
    queue: ItxQueue,
    writer: Mutex<LwbWriter>,
}

impl IntentLog {
    /// Opens the log described by `header`.
    ///
    /// An uninitialised header becomes an empty header of the configured
    /// default kind.
    ///
    /// # Errors
    ///
    /// Returns a config error, or [`ZilError::UnsupportedKind`] for a kind
    /// this engine cannot drive.
    pub fn open(
        config: ZilConfig,
        device: Arc<dyn BlockDevice>,
        pool: Arc<dyn TxgSource>,
        objset: Arc<dyn Objset>,
        header: ZilHeader,
    ) -> ZilResult<Self> {
        config.validate()?;
        let header = match header {
            ZilHeader::Uninit if config.default_kind == ZilKind::Lwb => ZilHeader::empty_lwb(),
            ZilHeader::Uninit => {
                return Err(ZilError::UnsupportedKind {
                    kind: config.default_kind.as_str(),
                })
            }
            ZilHeader::Pmem(_) => {
                return Err(ZilError::UnsupportedKind {
                    kind: ZilKind::Pmem.as_str(),
                })
            }
            lwb @ ZilHeader::Lwb(_) => lwb,
        };
        let writer = LwbWriter::new(&config);
        Ok(Self {
            config,
            device,
            pool,
            objset,
            header: RwLock::new(header),
            state: Mutex::new(LogState::Unclaimed),
            queue: ItxQueue::new(),
            writer: Mutex::new(writer),
        })
    }

    /// Object set id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.objset.id()
    }

    /// Current header, as it should be persisted.
    #[must_use]
    pub fn header(&self) -> ZilHeader {
        *self.header.read()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LogState {
        *self.state.lock()
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &ZilConfig {
        &self.config
    }

    /// Number of queued itxs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Claims the log at import.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] unless the log is unclaimed, or
    /// the claim error. A failed claim leaves the log unclaimed.
    pub fn claim(&self) -> ZilResult<ClaimReport> {
        {
            let mut state = self.state.lock();
            *state = state.transition(LogState::Claiming, "claim")?;
        }
        let mut header = self.header();
        match claim_log(&*self.device, &*self.pool, &*self.objset, &mut header) {
            Ok(report) => {
                *self.header.write() = header;
                *self.state.lock() = LogState::Claimed;
                Ok(report)
            }
            Err(e) => {
                warn!(objset = self.id(), error = %e, "claim failed");
                *self.state.lock() = LogState::Unclaimed;
                Err(e)
            }
        }
    }

    /// Replays the claimed log through `ops` and makes the log writable.
    ///
    /// With replay disabled the chain is discarded instead. On error the
    /// log stays claimed and the header keeps the replay progress, so a
    /// later call resumes.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] unless the log is claimed, or the
    /// replay error.
    pub fn replay(&self, ops: &mut dyn ReplayOps) -> ZilResult<ReplayOutcome> {
        let state = self.state();
        if state != LogState::Claimed {
            return Err(ZilError::invalid_state(state, "replay"));
        }

        let outcome = if self.config.replay_disabled {
            if let Some(lwb) = self.header.write().lwb_mut() {
                lwb.reset();
            }
            info!(objset = self.id(), "replay disabled, intent log discarded");
            ReplayOutcome {
                discarded: true,
                ..ReplayOutcome::default()
            }
        } else {
            let mut header = self.header();
            let result = replay_log(&*self.device, &*self.pool, &*self.objset, &mut header, ops);
            *self.header.write() = header;
            result?
        };

        let mut state = self.state.lock();
        *state = state.transition(LogState::Active, "replay")?;
        Ok(outcome)
    }

    /// Queues an itx under the open txg.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] unless the log is active.
    pub fn itx_assign(&self, itx: Itx) -> ZilResult<Txg> {
        let state = self.state();
        if state != LogState::Active {
            itx.destroy();
            return Err(ZilError::invalid_state(state, "append"));
        }
        let itx = match self.config.sync {
            SyncPolicy::Always => itx.with_sync(true),
            SyncPolicy::Standard | SyncPolicy::Disabled => itx,
        };
        let txg = self.pool.open_txg();
        self.queue.assign(itx, txg);
        Ok(txg)
    }

    /// Makes every queued itx touching `oid` (or every itx when `None`)
    /// durable, blocking until the log blocks are on disk.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] unless the log is active, or the
    /// write error. Itxs taken by a failed commit go back to the queue
    /// without being logged again; their callbacks run when their txg
    /// syncs, since the changes reach disk with it.
    pub fn commit(&self, oid: Option<ObjectId>) -> ZilResult<FlushSummary> {
        let state = self.state();
        if state != LogState::Active {
            return Err(ZilError::invalid_state(state, "commit"));
        }
        if self.config.sync == SyncPolicy::Disabled {
            return Ok(FlushSummary::default());
        }

        let mut writer = self.writer.lock();
        self.queue.promote(oid);
        let itxs = self.queue.drain(self.pool.last_synced_txg());
        if itxs.is_empty() {
            return Ok(FlushSummary::default());
        }
        let result = writer.write(&*self.device, &*self.objset, self.pool.open_txg(), &itxs);
        self.set_head(writer.head());
        drop(writer);

        match result {
            Ok(summary) => {
                for itx in itxs {
                    itx.complete();
                }
                Ok(summary)
            }
            Err(e) => {
                let held = self.queue.hold(itxs);
                warn!(objset = self.id(), error = %e, held, "commit failed, waiting for txg sync");
                Err(e)
            }
        }
    }

    /// Discards the async itxs of an object being removed.
    pub fn remove_async(&self, oid: ObjectId) -> usize {
        self.queue.remove_async(oid)
    }

    /// Handles a main-tree sync of `synced`: completes superseded itxs and
    /// frees log blocks that are no longer needed.
    ///
    /// # Errors
    ///
    /// Returns device errors from freeing blocks.
    pub fn sync(&self, synced: Txg) -> ZilResult<usize> {
        self.queue.clean(synced);
        if self.state() != LogState::Active {
            return Ok(0);
        }
        let mut writer = self.writer.lock();
        let freed = writer.sync(&*self.device, synced)?;
        self.set_head(writer.head());
        Ok(freed)
    }

    /// Destroys the log: pending itxs are discarded without callbacks and
    /// the header forgets the chain. Blocks are not erased.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidState`] unless the log is claimed or
    /// active.
    pub fn destroy(&self) -> ZilResult<()> {
        {
            let mut state = self.state.lock();
            *state = state.transition(LogState::Destroyed, "destroy")?;
            if let Some(lwb) = self.header.write().lwb_mut() {
                lwb.reset();
            }
        }
        let discarded = self.queue.discard_all();
        info!(objset = self.id(), discarded, "intent log destroyed");
        Ok(())
    }

    /// Points the header at `head`, unless the log was destroyed meanwhile.
    fn set_head(&self, head: zil_codec::BlockPointer) {
        let state = self.state.lock();
        if *state == LogState::Destroyed {
            return;
        }
        if let Some(lwb) = self.header.write().lwb_mut() {
            lwb.log = head;
        }
    }
}

impl std::fmt::Debug for IntentLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentLog")
            .field("objset", &self.id())
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Claims every log, isolating failures: one log's error does not stop
/// the others.
pub fn claim_all<'a, I>(logs: I) -> Vec<(u64, ZilResult<ClaimReport>)>
where
    I: IntoIterator<Item = &'a IntentLog>,
{
    logs.into_iter()
        .map(|log| (log.id(), log.claim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{MemoryObjset, PoolTxgs};
    use crate::replay::tests::RecordingOps;
    use crate::test_chain::{create, remove, truncate_obj, write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zil_codec::TxType;
    use zil_storage::{FileBlockDevice, InMemoryBlockDevice};

    struct Harness {
        device: Arc<InMemoryBlockDevice>,
        pool: Arc<PoolTxgs>,
        objset: Arc<MemoryObjset>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                device: Arc::new(InMemoryBlockDevice::new()),
                pool: Arc::new(PoolTxgs::new(Txg::new(10))),
                objset: Arc::new(MemoryObjset::new(1)),
            }
        }

        fn open(&self, config: ZilConfig, header: ZilHeader) -> IntentLog {
            IntentLog::open(
                config.block_size(4096),
                self.device.clone(),
                self.pool.clone(),
                self.objset.clone(),
                header,
            )
            .unwrap()
        }

        fn active(&self) -> IntentLog {
            let log = self.open(ZilConfig::default(), ZilHeader::Uninit);
            log.claim().unwrap();
            log.replay(&mut RecordingOps::default()).unwrap();
            log
        }
    }

    #[test]
    fn open_rejects_pmem() {
        let h = Harness::new();
        let err = IntentLog::open(
            ZilConfig::default(),
            h.device.clone(),
            h.pool.clone(),
            h.objset.clone(),
            ZilHeader::Pmem(Default::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ZilError::UnsupportedKind { kind: "pmem" }));
    }

    #[test]
    fn appends_refused_before_replay() {
        let h = Harness::new();
        let log = h.open(ZilConfig::default(), ZilHeader::Uninit);
        let err = log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap_err();
        assert!(matches!(err, ZilError::InvalidState { state: LogState::Unclaimed, .. }));
        log.claim().unwrap();
        assert!(log.commit(None).is_err());
        assert!(log.replay(&mut RecordingOps::default()).is_ok());
        assert_eq!(log.state(), LogState::Active);
        assert!(log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).is_ok());
    }

    #[test]
    fn commit_then_crash_then_replay() {
        let h = Harness::new();
        let log = h.active();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        log.itx_assign(Itx::create(create(0, 10, 5))).unwrap();
        log.itx_assign(
            Itx::create(write(TxType::Write, 5, 0, 10, b"payload")).with_callback(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();
        log.itx_assign(Itx::create(remove(0, 10))).unwrap();
        let summary = log.commit(None).unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let persisted = log.header();

        h.pool.crash_and_import();
        let reopened = h.open(ZilConfig::default(), persisted);
        let report = reopened.claim().unwrap();
        assert_eq!(report.records_claimed, 3);
        assert!(reopened.header().lwb().unwrap().replay_needed());

        let mut ops = RecordingOps::default();
        let outcome = reopened.replay(&mut ops).unwrap();
        assert_eq!(outcome.applied, 3);
        assert_eq!(
            ops.applied,
            vec![(TxType::Create, 1), (TxType::Write, 2), (TxType::Remove, 3)]
        );
        assert!(reopened.header().lwb().unwrap().is_empty());
    }

    #[test]
    fn records_take_the_open_txg() {
        let h = Harness::new();
        let log = h.active();
        let txg = log.itx_assign(Itx::create(truncate_obj(7, 0, 0))).unwrap();
        assert_eq!(txg, Txg::new(10));
        log.commit(None).unwrap();
        let persisted = log.header();

        h.pool.crash_and_import();
        let reopened = h.open(ZilConfig::default(), persisted);
        assert_eq!(reopened.claim().unwrap().records_claimed, 1);
        let mut ops = RecordingOps::default();
        assert_eq!(reopened.replay(&mut ops).unwrap().applied, 1);
        assert_eq!(ops.applied, vec![(TxType::Truncate, 1)]);
    }

    #[test]
    fn sync_before_the_open_txg_keeps_its_blocks() {
        let h = Harness::new();
        let log = h.active();
        log.itx_assign(Itx::create(truncate_obj(7, 0, 0))).unwrap();
        log.commit(None).unwrap();
        let head = log.header().lwb().unwrap().log;

        assert_eq!(log.sync(Txg::new(9)).unwrap(), 0);
        assert_eq!(log.header().lwb().unwrap().log, head);
        assert!(h.device.snapshot(head.locator).is_some());
    }

    #[test]
    fn failed_commit_completes_at_sync() {
        let h = Harness::new();
        let log = h.active();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10)).with_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        h.device.fail_writes(true);
        assert!(matches!(log.commit(None), Err(ZilError::Io(_))));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(log.pending(), 1);

        h.device.fail_writes(false);
        assert_eq!(log.commit(None).unwrap(), FlushSummary::default());
        let synced = h.pool.sync_txg();
        log.sync(synced).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn head_is_not_moved_after_destroy() {
        let h = Harness::new();
        let log = h.active();
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap();
        log.commit(None).unwrap();
        let head = log.writer.lock().head();

        log.destroy().unwrap();
        log.set_head(head);
        assert!(log.header().lwb().unwrap().is_empty());
    }

    #[test]
    fn commit_of_one_object_leaves_other_async_itxs() {
        let h = Harness::new();
        let log = h.active();
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10)).with_sync(false)).unwrap();
        log.itx_assign(Itx::create(truncate_obj(2, 0, 10)).with_sync(false)).unwrap();
        let summary = log.commit(Some(ObjectId::new(2))).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(log.pending(), 1);
        assert_eq!(log.remove_async(ObjectId::new(1)), 1);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn sync_policy_disabled_skips_commit() {
        let h = Harness::new();
        let log = h.open(ZilConfig::default().sync(SyncPolicy::Disabled), ZilHeader::Uninit);
        log.claim().unwrap();
        log.replay(&mut RecordingOps::default()).unwrap();
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap();
        assert_eq!(log.commit(None).unwrap(), FlushSummary::default());
        assert_eq!(log.pending(), 1);
    }

    #[test]
    fn sync_frees_blocks_and_runs_superseded_callbacks() {
        let h = Harness::new();
        let log = h.active();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap();
        log.commit(None).unwrap();
        log.itx_assign(
            Itx::create(truncate_obj(2, 0, 10))
                .with_sync(false)
                .with_callback(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .unwrap();

        let synced = h.pool.sync_txg();
        assert_eq!(log.sync(synced).unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn replay_disabled_discards_log() {
        let h = Harness::new();
        let log = h.active();
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap();
        log.commit(None).unwrap();
        let persisted = log.header();

        h.pool.crash_and_import();
        let reopened = h.open(ZilConfig::default().replay_disabled(true), persisted);
        reopened.claim().unwrap();
        let mut ops = RecordingOps::default();
        let outcome = reopened.replay(&mut ops).unwrap();
        assert!(outcome.discarded);
        assert!(ops.applied.is_empty());
        assert!(reopened.header().lwb().unwrap().is_empty());
        assert_eq!(reopened.state(), LogState::Active);
    }

    #[test]
    fn destroy_is_terminal_and_silent() {
        let h = Harness::new();
        let log = h.active();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        log.itx_assign(Itx::create(truncate_obj(1, 0, 10)).with_callback(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        log.destroy().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(log.state(), LogState::Destroyed);
        assert!(log.destroy().is_err());
        assert!(log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).is_err());
    }

    #[test]
    fn claim_all_isolates_failures() {
        let h = Harness::new();
        let first = h.active();
        let second = h.active();
        for log in [&first, &second] {
            log.itx_assign(Itx::create(truncate_obj(1, 0, 10))).unwrap();
            log.commit(None).unwrap();
        }
        let broken = first.header();
        h.device.inject_read_fault(broken.lwb().unwrap().log.locator);

        h.pool.crash_and_import();
        let logs = [
            h.open(ZilConfig::default(), broken),
            h.open(ZilConfig::default(), second.header()),
        ];
        let results = claim_all(&logs);
        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].1, Err(ZilError::Io(_))));
        assert_eq!(logs[0].state(), LogState::Unclaimed);
        assert_eq!(results[1].1.as_ref().unwrap().records_claimed, 1);
        assert_eq!(logs[1].state(), LogState::Claimed);
    }

    #[test]
    fn log_survives_reopen_on_file_device() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.dev");
        let pool = Arc::new(PoolTxgs::new(Txg::new(10)));
        let objset = Arc::new(MemoryObjset::new(1));
        let open = |header: ZilHeader| {
            let device = Arc::new(FileBlockDevice::open(&path).unwrap());
            IntentLog::open(
                ZilConfig::default().block_size(4096),
                device,
                pool.clone(),
                objset.clone(),
                header,
            )
            .unwrap()
        };

        let bytes = {
            let log = open(ZilHeader::Uninit);
            log.claim().unwrap();
            log.replay(&mut RecordingOps::default()).unwrap();
            log.itx_assign(Itx::create(truncate_obj(3, 0, 10))).unwrap();
            log.commit(None).unwrap();
            log.header().to_bytes()
        };

        pool.crash_and_import();
        let log = open(ZilHeader::from_bytes(&bytes).unwrap());
        assert_eq!(log.claim().unwrap().records_claimed, 1);
        let mut ops = RecordingOps::default();
        log.replay(&mut ops).unwrap();
        assert_eq!(ops.applied, vec![(TxType::Truncate, 1)]);
    }
}
