//! Load generators for the intent log.
//!
//! Each run drives assign, commit and txg sync the way a busy dataset
//! would, and reports what reached the log: records and blocks written,
//! blocks freed by sync, and itx callbacks run. Counters are atomic so
//! threads of a concurrent run share one tally.

use crate::fixtures::TestPool;
use crate::records;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zil_codec::{ObjectId, Txg};
use zil_core::{FlushSummary, IntentLog, Itx, ZilResult};

/// What a stress run did to the log.
#[derive(Debug, Clone, Default)]
pub struct StressReport {
    /// Itxs accepted by `itx_assign`.
    pub itxs: u64,
    /// Itxs refused by `itx_assign`.
    pub rejected: u64,
    /// Commits that returned.
    pub commits: u64,
    /// Commits that failed.
    pub failed_commits: u64,
    /// Records written to log blocks.
    pub records: u64,
    /// Log blocks written.
    pub blocks: u64,
    /// Payload bytes written through the device for indirect writes.
    pub indirect_bytes: u64,
    /// Txg syncs handed to the log.
    pub syncs: u64,
    /// Log blocks freed by those syncs.
    pub blocks_freed: u64,
    /// Itx callbacks that ran.
    pub completions: u64,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl StressReport {
    /// Refused assigns and failed commits and syncs.
    pub fn failures(&self) -> u64 {
        self.rejected + self.failed_commits
    }

    /// Mean records packed into a log block.
    pub fn records_per_block(&self) -> f64 {
        if self.blocks == 0 {
            0.0
        } else {
            self.records as f64 / self.blocks as f64
        }
    }

    /// Itxs assigned per second.
    pub fn itxs_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.itxs as f64 / secs
        } else {
            0.0
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Itxs: {} ({} rejected)", self.itxs, self.rejected);
        println!("Commits: {} ({} failed)", self.commits, self.failed_commits);
        println!(
            "Records: {} in {} blocks ({:.1} per block)",
            self.records,
            self.blocks,
            self.records_per_block()
        );
        println!("Indirect bytes: {}", self.indirect_bytes);
        println!("Syncs: {}, blocks freed: {}", self.syncs, self.blocks_freed);
        println!("Completions: {}", self.completions);
        println!("Duration: {:?}", self.elapsed);
        println!("Throughput: {:.2} itxs/sec", self.itxs_per_second());
    }
}

#[derive(Debug, Default)]
struct Tally {
    itxs: AtomicU64,
    rejected: AtomicU64,
    commits: AtomicU64,
    failed_commits: AtomicU64,
    records: AtomicU64,
    blocks: AtomicU64,
    indirect_bytes: AtomicU64,
    syncs: AtomicU64,
    blocks_freed: AtomicU64,
    completions: AtomicU64,
}

impl Tally {
    fn assigned(&self, result: ZilResult<Txg>) {
        match result {
            Ok(_) => self.itxs.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn committed(&self, result: ZilResult<FlushSummary>) {
        match result {
            Ok(summary) => {
                self.commits.fetch_add(1, Ordering::Relaxed);
                self.records.fetch_add(summary.records, Ordering::Relaxed);
                self.blocks.fetch_add(summary.blocks, Ordering::Relaxed);
                self.indirect_bytes
                    .fetch_add(summary.indirect_bytes, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed_commits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn synced(&self, result: ZilResult<usize>) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
        match result {
            Ok(freed) => self.blocks_freed.fetch_add(freed as u64, Ordering::Relaxed),
            Err(_) => self.failed_commits.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn report(&self, elapsed: Duration) -> StressReport {
        let get = |c: &AtomicU64| c.load(Ordering::SeqCst);
        StressReport {
            itxs: get(&self.itxs),
            rejected: get(&self.rejected),
            commits: get(&self.commits),
            failed_commits: get(&self.failed_commits),
            records: get(&self.records),
            blocks: get(&self.blocks),
            indirect_bytes: get(&self.indirect_bytes),
            syncs: get(&self.syncs),
            blocks_freed: get(&self.blocks_freed),
            completions: get(&self.completions),
            elapsed,
        }
    }
}

/// Shape of a stress run.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of itxs to assign.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent runs).
    pub threads: usize,
    /// Inline write payload size in bytes.
    pub payload_size: usize,
    /// Number of distinct objects written.
    pub objects: usize,
    /// Commit after this many assigns.
    pub commit_every: usize,
    /// Sync a txg after this many assigns (for churn runs).
    pub sync_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            payload_size: 256,
            objects: 64,
            commit_every: 32,
            sync_every: 128,
        }
    }
}

fn counted_write(i: usize, config: &StressConfig, tally: &Arc<Tally>) -> Itx {
    let oid = 100 + (i % config.objects.max(1)) as u64;
    let data = vec![(i % 251) as u8; config.payload_size];
    let tally = Arc::clone(tally);
    Itx::create(records::write(oid, (i * config.payload_size) as u64, &data)).with_callback(
        move || {
            tally.completions.fetch_add(1, Ordering::Relaxed);
        },
    )
}

/// Assigns async writes from one thread and commits one object at a
/// time, then everything at the end.
pub fn stress_sequential_commits(log: &IntentLog, config: &StressConfig) -> StressReport {
    let tally = Arc::new(Tally::default());
    let start = Instant::now();

    for i in 0..config.operations {
        let itx = counted_write(i, config, &tally).with_sync(false);
        let oid = itx.oid();
        tally.assigned(log.itx_assign(itx));
        if (i + 1) % config.commit_every.max(1) == 0 {
            tally.committed(log.commit(Some(oid)));
        }
    }
    tally.committed(log.commit(None));

    tally.report(start.elapsed())
}

/// Assigns sync writes from many threads at once; every thread also
/// commits.
pub fn stress_concurrent_assign(log: Arc<IntentLog>, config: &StressConfig) -> StressReport {
    let tally = Arc::new(Tally::default());
    let ops_per_thread = config.operations / config.threads.max(1);
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let log = Arc::clone(&log);
            let tally = Arc::clone(&tally);
            let config = config.clone();

            thread::spawn(move || {
                for n in 0..ops_per_thread {
                    let i = t * ops_per_thread + n;
                    tally.assigned(log.itx_assign(counted_write(i, &config, &tally)));
                    if (n + 1) % config.commit_every.max(1) == 0 {
                        tally.committed(log.commit(None));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    tally.committed(log.commit(None));

    tally.report(start.elapsed())
}

/// Commits every itx while txgs sync underneath, so log blocks keep
/// being freed and the head keeps moving.
pub fn stress_sync_churn(pool: &TestPool, log: &IntentLog, config: &StressConfig) -> StressReport {
    let tally = Arc::new(Tally::default());
    let start = Instant::now();

    for i in 0..config.operations {
        tally.assigned(log.itx_assign(counted_write(i, config, &tally)));
        tally.committed(log.commit(Some(ObjectId::new(100))));
        if (i + 1) % config.sync_every.max(1) == 0 {
            tally.synced(log.sync(pool.txgs.sync_txg()));
        }
    }
    tally.synced(log.sync(pool.txgs.sync_txg()));

    tally.report(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> StressConfig {
        StressConfig {
            operations: 400,
            threads: 4,
            payload_size: 64,
            objects: 8,
            commit_every: 16,
            sync_every: 50,
        }
    }

    #[test]
    fn sequential_commits_log_every_itx() {
        let pool = TestPool::memory();
        let log = pool.active_log();
        let config = small();
        let report = stress_sequential_commits(&log, &config);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.itxs, config.operations as u64);
        assert_eq!(report.records, config.operations as u64);
        assert_eq!(report.completions, config.operations as u64);
        assert!(report.records_per_block() > 1.0);
        assert_eq!(log.pending(), 0);
    }

    #[test]
    fn concurrent_assign_loses_nothing() {
        let pool = TestPool::memory();
        let log = Arc::new(pool.active_log());
        let config = small();
        let report = stress_concurrent_assign(Arc::clone(&log), &config);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.itxs, config.operations as u64);
        assert_eq!(report.records, config.operations as u64);
        assert_eq!(report.completions, config.operations as u64);

        let log = Arc::try_unwrap(log).expect("threads joined");
        let reopened = pool.crash(log);
        let claim = reopened.claim().unwrap();
        assert_eq!(claim.records_claimed, report.records);
        assert!(claim.tail_error.is_none());
    }

    #[test]
    fn sync_churn_frees_every_block() {
        let pool = TestPool::memory();
        let log = pool.active_log();
        let config = small();
        let report = stress_sync_churn(&pool, &log, &config);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.completions, config.operations as u64);
        assert_eq!(report.syncs, (config.operations / config.sync_every + 1) as u64);
        assert_eq!(report.blocks_freed, report.blocks);
        let device = pool.memory_device().unwrap();
        assert!(device.block_count() < 4, "{} blocks left", device.block_count());
        report.print_summary("sync churn");
    }
}
