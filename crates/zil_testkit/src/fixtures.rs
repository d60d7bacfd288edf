//! Test fixtures and log helpers.
//!
//! [`TestPool`] bundles the collaborators an [`IntentLog`] needs (block
//! device, txg source, object set) and opens logs on them. The
//! [`scenarios`] module builds the reference logs used across the
//! workspace's tests.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use zil_codec::Txg;
use zil_core::{DiscardOps, IntentLog, MemoryObjset, PoolTxgs, ZilConfig, ZilHeader};
use zil_storage::{BlockDevice, FileBlockDevice, InMemoryBlockDevice};

/// Open txg of a fresh test pool.
pub const FIRST_TXG: Txg = Txg::new(10);

/// Block size used by test logs.
pub const TEST_BLOCK_SIZE: usize = 4096;

/// A pool with one object set, on which logs are opened.
pub struct TestPool {
    device: Arc<dyn BlockDevice>,
    memory: Option<Arc<InMemoryBlockDevice>>,
    /// Txg counters.
    pub txgs: Arc<PoolTxgs>,
    /// The object set the logs belong to.
    pub objset: Arc<MemoryObjset>,
    config: ZilConfig,
    _temp_dir: Option<TempDir>,
}

impl TestPool {
    /// Creates a pool on an in-memory device.
    pub fn memory() -> Self {
        let memory = Arc::new(InMemoryBlockDevice::new());
        Self {
            device: memory.clone(),
            memory: Some(memory),
            txgs: Arc::new(PoolTxgs::new(FIRST_TXG)),
            objset: Arc::new(MemoryObjset::new(1)),
            config: ZilConfig::default().block_size(TEST_BLOCK_SIZE),
            _temp_dir: None,
        }
    }

    /// Creates a pool on a file device in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let device = FileBlockDevice::open(&temp_dir.path().join("log.dev"))
            .expect("Failed to create log device");
        Self {
            device: Arc::new(device),
            memory: None,
            txgs: Arc::new(PoolTxgs::new(FIRST_TXG)),
            objset: Arc::new(MemoryObjset::new(1)),
            config: ZilConfig::default().block_size(TEST_BLOCK_SIZE),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Replaces the log configuration.
    pub fn with_config(mut self, config: ZilConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the txg source.
    pub fn with_txgs(mut self, txgs: PoolTxgs) -> Self {
        self.txgs = Arc::new(txgs);
        self
    }

    /// Replaces the object set.
    pub fn with_objset(mut self, objset: MemoryObjset) -> Self {
        self.objset = Arc::new(objset);
        self
    }

    /// The block device.
    pub fn device(&self) -> Arc<dyn BlockDevice> {
        Arc::clone(&self.device)
    }

    /// The in-memory device, for pools created with [`TestPool::memory`].
    pub fn memory_device(&self) -> Option<&InMemoryBlockDevice> {
        self.memory.as_deref()
    }

    /// Path of the device file, for pools created with [`TestPool::file`].
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("log.dev"))
    }

    /// The configuration logs are opened with.
    pub fn config(&self) -> &ZilConfig {
        &self.config
    }

    /// Opens a log from `header`.
    pub fn open(&self, header: ZilHeader) -> IntentLog {
        IntentLog::open(
            self.config.clone(),
            self.device(),
            self.txgs.clone(),
            self.objset.clone(),
            header,
        )
        .expect("Failed to open intent log")
    }

    /// Opens a fresh log and takes it through claim and replay.
    pub fn active_log(&self) -> IntentLog {
        let log = self.open(ZilHeader::Uninit);
        log.claim().expect("Failed to claim empty log");
        log.replay(&mut DiscardOps).expect("Failed to replay empty log");
        log
    }

    /// Simulates a crash and re-import: everything after the last synced
    /// txg is lost, and the log is reopened from its persisted header.
    pub fn crash(&self, log: IntentLog) -> IntentLog {
        let header = log.header();
        drop(log);
        self.txgs.crash_and_import();
        self.open(header)
    }
}

impl std::fmt::Debug for TestPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPool")
            .field("memory", &self.memory.is_some())
            .field("path", &self.path())
            .finish_non_exhaustive()
    }
}

/// Runs a test against an active log on an in-memory pool.
///
/// # Example
///
/// ```rust
/// use zil_core::Itx;
/// use zil_testkit::{records, with_test_log};
///
/// with_test_log(|_, log| {
///     log.itx_assign(Itx::create(records::truncate(7, 0, 10))).unwrap();
///     assert_eq!(log.commit(None).unwrap().records, 1);
/// });
/// ```
pub fn with_test_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestPool, &IntentLog) -> R,
{
    let pool = TestPool::memory();
    let log = pool.active_log();
    f(&pool, &log)
}

/// Runs a test against an active log on a file-backed pool.
pub fn with_file_log<F, R>(f: F) -> R
where
    F: FnOnce(&TestPool, &IntentLog, &std::path::Path) -> R,
{
    let pool = TestPool::file();
    let log = pool.active_log();
    let path = pool.path().expect("File pool should have a path");
    f(&pool, &log, &path)
}

/// Reference logs.
pub mod scenarios {
    use super::*;
    use crate::builder::{BuiltChain, ChainBuilder, Corruption};
    use crate::records;

    /// A pool with a hand-built chain on its device.
    #[derive(Debug)]
    pub struct Scenario {
        /// The pool.
        pub pool: TestPool,
        /// The chain.
        pub chain: BuiltChain,
    }

    impl Scenario {
        fn build(pool: TestPool, builder: ChainBuilder) -> Self {
            let device = pool.memory_device().expect("scenarios use memory pools");
            let chain = builder.build(device).expect("Failed to build chain");
            Self { pool, chain }
        }

        /// Opens the scenario's log.
        pub fn open(&self) -> IntentLog {
            self.pool.open(self.chain.header())
        }
    }

    /// A log without blocks.
    pub fn empty_log() -> Scenario {
        Scenario::build(TestPool::memory(), ChainBuilder::new())
    }

    /// One block holding a create, a copied write into the new file, and
    /// the file's removal.
    pub fn single_block() -> Scenario {
        Scenario::build(
            TestPool::memory(),
            ChainBuilder::new().block(vec![
                records::create(4, "a.txt", 10),
                records::write(10, 0, b"hello intent log"),
                records::remove(4, "a.txt"),
            ]),
        )
    }

    /// A valid block of `count` truncates followed by a block whose
    /// checksum no longer matches.
    pub fn corrupt_second_block(count: usize) -> Scenario {
        let first = (0..count as u64)
            .map(|i| records::truncate(20 + i, 0, i))
            .collect();
        let scenario = Scenario::build(
            TestPool::memory(),
            ChainBuilder::new()
                .block(first)
                .block(vec![records::remove(4, "gone")]),
        );
        let device = scenario
            .pool
            .memory_device()
            .expect("scenarios use memory pools");
        scenario
            .chain
            .corrupt(device, Corruption::FlipByte { block: 1, offset: 40 })
            .expect("Failed to corrupt block");
        scenario
    }

    /// One block whose writes to the same file reach the log out of txg
    /// order: the later range was assigned in txg 12, the earlier in 11.
    pub fn out_of_order_writes() -> Scenario {
        Scenario::build(
            TestPool::memory(),
            ChainBuilder::new().block(vec![
                records::create(4, "f", 10).with_txg(Txg::new(11)),
                records::write(10, 4096, b"tail").with_txg(Txg::new(12)),
                records::write(10, 0, b"head").with_txg(Txg::new(11)),
            ]),
        )
    }

    /// A two-block log written in txg 10, imported by a pool whose claim
    /// boundary is txg 20: everything in it is already committed.
    pub fn below_boundary() -> Scenario {
        Scenario::build(
            TestPool::memory().with_txgs(PoolTxgs::new(Txg::new(20))),
            ChainBuilder::new()
                .block(vec![records::create(4, "x", 30), records::write(30, 0, b"x")])
                .block(vec![records::truncate(30, 0, 1)]),
        )
    }
}
