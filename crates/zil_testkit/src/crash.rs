//! Crash recovery testing for the intent log.
//!
//! The harness commits a workload to a log, loses the open txg, and then
//! imports the log again with a crash injected at one point of the
//! claim/replay sequence. Whatever the crash point, the tree rebuilt by
//! replay must equal the one a crash-free import produces, and no record
//! may be applied twice ([`TreeModel`] refuses double creates and
//! removes).
//!
//! ## Crash points
//!
//! 1. **Before claim** - the pool goes down again before importing the log
//! 2. **After claim** - the claimed header was persisted, replay not started
//! 3. **During replay** - after `n` records were applied
//! 4. **After replay** - the log was emptied; a second import finds nothing
//!
//! ## Usage
//!
//! ```rust
//! use zil_testkit::crash::CrashReplayHarness;
//!
//! let harness = CrashReplayHarness::sample();
//! for result in harness.run_all() {
//!     assert!(result.passed, "{}", result.description);
//! }
//! ```

use crate::fixtures::TestPool;
use crate::model::{TreeModel, TreeState};
use crate::records;
use zil_codec::{LogRecord, ObjectId};
use zil_core::{IntentLog, Itx, WriteState, ZilResult};

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash before the log was claimed.
    BeforeClaim,
    /// Crash after the claim, before replay.
    AfterClaim,
    /// Crash after this many records were replayed.
    DuringReplay(u64),
    /// Crash after replay completed.
    AfterReplay,
}

/// Result of one crash recovery run.
#[derive(Debug, Clone)]
pub struct CrashReplayResult {
    /// Where the crash was injected.
    pub point: CrashPoint,
    /// Whether the recovered tree matched the reference.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Records applied across all replay attempts.
    pub replayed: u64,
    /// Any error message.
    pub error: Option<String>,
}

/// Drives one workload through every crash point.
#[derive(Debug, Clone, Default)]
pub struct CrashReplayHarness {
    steps: Vec<(LogRecord, WriteState)>,
    payloads: Vec<(ObjectId, u64, Vec<u8>)>,
}

impl CrashReplayHarness {
    /// Creates a harness with an empty workload.
    pub fn new() -> Self {
        Self::default()
    }

    /// A namespace and data workload touching every write mode.
    pub fn sample() -> Self {
        Self::new()
            .record(records::mkdir(4, "dir", 20))
            .record(records::create(20, "a", 21))
            .record(records::write(21, 0, b"first version"))
            .record(records::create(20, "b", 22))
            .record(records::link(4, "b-link", 22))
            .payload(ObjectId::new(22), 0, &[0xAB; 3000])
            .record_with(records::write_intent(22, 0, 3000), WriteState::NeedCopy)
            .payload(ObjectId::new(21), 0, &[0xCD; 8192])
            .record_with(records::write_intent(21, 0, 8192), WriteState::Indirect)
            .record(records::rename(20, "a", 4, "a-moved"))
            .record(records::truncate(22, 100, 10_000))
            .record(records::setattr_mode(21, 0o640))
            .record(records::acl(21, 2))
            .record(records::remove(20, "b"))
            .record(records::symlink(4, "s", 23, "dir/b"))
    }

    /// Appends a record logged with its data copied inline.
    pub fn record(self, record: LogRecord) -> Self {
        self.record_with(record, WriteState::Copied)
    }

    /// Appends a record with an explicit write mode.
    pub fn record_with(mut self, record: LogRecord, state: WriteState) -> Self {
        self.steps.push((record, state));
        self
    }

    /// Stores object data that need-copy and indirect writes fetch at
    /// flush.
    pub fn payload(mut self, oid: ObjectId, offset: u64, data: &[u8]) -> Self {
        self.payloads.push((oid, offset, data.to_vec()));
        self
    }

    /// Number of records in the workload.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workload is empty.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Commits the workload on a fresh pool and loses the open txg.
    /// Returns the pool and the reopened, unclaimed log.
    ///
    /// # Errors
    ///
    /// Returns the first assign or commit error.
    pub fn committed_log(&self) -> ZilResult<(TestPool, IntentLog)> {
        let pool = TestPool::memory();
        for (oid, offset, data) in &self.payloads {
            pool.objset.write(*oid, *offset, data);
        }
        let log = pool.active_log();
        for (record, state) in &self.steps {
            log.itx_assign(Itx::create(record.clone()).with_write_state(*state))?;
        }
        log.commit(None)?;
        let log = pool.crash(log);
        Ok((pool, log))
    }

    /// Replays the workload without any crash.
    ///
    /// # Errors
    ///
    /// Returns the first commit, claim or replay error.
    pub fn reference(&self) -> ZilResult<TreeState> {
        let (pool, log) = self.committed_log()?;
        let mut model = TreeModel::new().with_device(pool.device());
        log.claim()?;
        log.replay(&mut model)?;
        Ok(model.state().clone())
    }

    /// Runs the workload with a crash at `point`.
    pub fn run(&self, point: CrashPoint) -> CrashReplayResult {
        let description = format!("crash {point:?} with {} records", self.len());
        let outcome = self
            .reference()
            .and_then(|expected| self.recover(point).map(|model| (expected, model)));
        match outcome {
            Ok((expected, model)) => {
                let passed = &expected == model.state();
                CrashReplayResult {
                    point,
                    passed,
                    description,
                    replayed: model.applied(),
                    error: (!passed).then(|| "recovered tree differs from reference".to_string()),
                }
            }
            Err(e) => CrashReplayResult {
                point,
                passed: false,
                description,
                replayed: 0,
                error: Some(e.to_string()),
            },
        }
    }

    /// Runs every crash point, including a crash after each record.
    pub fn run_all(&self) -> Vec<CrashReplayResult> {
        let mut points = vec![CrashPoint::BeforeClaim, CrashPoint::AfterClaim];
        points.extend((0..self.len() as u64).map(CrashPoint::DuringReplay));
        points.push(CrashPoint::AfterReplay);
        points.into_iter().map(|p| self.run(p)).collect()
    }

    fn recover(&self, point: CrashPoint) -> ZilResult<TreeModel> {
        let (pool, mut log) = self.committed_log()?;
        let mut model = TreeModel::new().with_device(pool.device());
        match point {
            CrashPoint::BeforeClaim => {
                log = pool.crash(log);
                log.claim()?;
                log.replay(&mut model)?;
            }
            CrashPoint::AfterClaim => {
                log.claim()?;
                log = pool.crash(log);
                log.claim()?;
                log.replay(&mut model)?;
            }
            CrashPoint::DuringReplay(applied) => {
                log.claim()?;
                model.fail_after(Some(applied));
                if log.replay(&mut model).is_err() {
                    log = pool.crash(log);
                    log.claim()?;
                    model.fail_after(None);
                    log.replay(&mut model)?;
                }
            }
            CrashPoint::AfterReplay => {
                log.claim()?;
                log.replay(&mut model)?;
                log = pool.crash(log);
                log.claim()?;
                log.replay(&mut model)?;
            }
        }
        Ok(model)
    }
}
