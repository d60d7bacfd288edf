//! In-memory transactions waiting to be logged.
//!
//! Every modifying operation produces an [`Itx`] wrapping the record to be
//! logged. Itxs are assigned to the open txg's bucket in the [`ItxQueue`]:
//!
//! ```text
//! buckets[txg & 3]
//! ├── sync list      (committed by any commit)
//! └── async lists    (per object, committed on demand)
//!     ├── oid 7 → [write, write, truncate]
//!     └── oid 9 → [setattr]
//! ```
//!
//! A commit promotes async lists to the sync list and drains every sync
//! list whose txg is not yet synced. Once a txg syncs, the buckets at or
//! below it are superseded: their itxs are completed without being logged.
//! Itxs of a failed commit are held in their bucket until that happens.

use crate::config::{LogBias, ZilConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;
use zil_codec::{LogRecord, ObjectId, Txg};

/// Number of in-flight txgs, hence of queue buckets.
pub const TXG_SIZE: usize = 4;

/// How a write record carries its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteState {
    /// Payload written through the block device at flush; the record
    /// carries only a block pointer.
    Indirect,
    /// Payload copied into the record at creation.
    #[default]
    Copied,
    /// Payload fetched from the object set at flush.
    NeedCopy,
}

impl WriteState {
    /// Chooses the write state for a write of `length` bytes at `offset`
    /// into a file with `file_block_size` blocks.
    #[must_use]
    pub fn select(
        config: &ZilConfig,
        offset: u64,
        length: u64,
        file_block_size: u64,
        sync: bool,
    ) -> Self {
        let whole_block =
            file_block_size > 0 && offset % file_block_size == 0 && length == file_block_size;
        let bypass = config.logbias == LogBias::Throughput
            || (!config.has_slog && length > config.immediate_write_size);
        if whole_block && bypass {
            Self::Indirect
        } else if sync {
            Self::Copied
        } else {
            Self::NeedCopy
        }
    }

    /// Name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Indirect => "indirect",
            Self::Copied => "copied",
            Self::NeedCopy => "need-copy",
        }
    }
}

/// Completion callback of an itx.
pub type ItxCallback = Box<dyn FnOnce() + Send + 'static>;

/// A transaction waiting to be logged.
pub struct Itx {
    record: LogRecord,
    write_state: WriteState,
    sync: bool,
    oid: ObjectId,
    txg: Txg,
    callback: Option<ItxCallback>,
}

impl Itx {
    /// Wraps a record. The itx is synchronous and copied by default.
    #[must_use]
    pub fn create(record: LogRecord) -> Self {
        let oid = record.object_id();
        Self {
            txg: record.txg,
            record,
            write_state: WriteState::default(),
            sync: true,
            oid,
            callback: None,
        }
    }

    /// Sets the write state.
    #[must_use]
    pub fn with_write_state(mut self, state: WriteState) -> Self {
        self.write_state = state;
        self
    }

    /// Marks the itx synchronous or asynchronous.
    #[must_use]
    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Overrides the object the itx is queued under.
    #[must_use]
    pub fn with_oid(mut self, oid: ObjectId) -> Self {
        self.oid = oid;
        self
    }

    /// Installs a callback run once the itx is durable or superseded.
    #[must_use]
    pub fn with_callback(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// The wrapped record.
    #[must_use]
    pub fn record(&self) -> &LogRecord {
        &self.record
    }

    /// The write state.
    #[must_use]
    pub fn write_state(&self) -> WriteState {
        self.write_state
    }

    /// Returns true for synchronous itxs.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        self.sync
    }

    /// Object the itx is queued under.
    #[must_use]
    pub fn oid(&self) -> ObjectId {
        self.oid
    }

    /// Txg the itx was assigned to.
    #[must_use]
    pub fn txg(&self) -> Txg {
        self.txg
    }

    /// Returns true if a callback is installed.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Discards an itx whose effect will never be reached. The callback
    /// does not run.
    pub fn destroy(self) {
        trace!(txtype = %self.record.txtype, oid = %self.oid, "itx discarded");
    }

    /// Drops the callback and hands back the record.
    #[must_use]
    pub fn destroy_without_callback(mut self) -> LogRecord {
        self.callback = None;
        self.record
    }

    /// Runs the callback, if any.
    pub(crate) fn complete(mut self) {
        if let Some(callback) = self.callback.take() {
            callback();
        }
    }
}

impl fmt::Debug for Itx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Itx")
            .field("txtype", &self.record.txtype)
            .field("oid", &self.oid)
            .field("txg", &self.txg)
            .field("sync", &self.sync)
            .field("write_state", &self.write_state)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Bucket {
    txg: Txg,
    sync: Vec<Itx>,
    async_lists: BTreeMap<ObjectId, Vec<Itx>>,
    held: Vec<Itx>,
}

impl Bucket {
    fn len(&self) -> usize {
        self.sync.len()
            + self.held.len()
            + self.async_lists.values().map(Vec::len).sum::<usize>()
    }

    fn take_all(&mut self) -> Vec<Itx> {
        let mut itxs = std::mem::take(&mut self.held);
        itxs.append(&mut self.sync);
        for (_, list) in std::mem::take(&mut self.async_lists) {
            itxs.extend(list);
        }
        itxs
    }

    fn promote(&mut self, oid: Option<ObjectId>) {
        match oid {
            Some(oid) => {
                if let Some(list) = self.async_lists.remove(&oid) {
                    self.sync.extend(list);
                }
            }
            None => {
                for (_, list) in std::mem::take(&mut self.async_lists) {
                    self.sync.extend(list);
                }
            }
        }
    }
}

/// Per-txg queue of pending itxs.
#[derive(Default)]
pub struct ItxQueue {
    buckets: Mutex<[Bucket; TXG_SIZE]>,
}

fn slot(txg: Txg) -> usize {
    (txg.as_u64() % TXG_SIZE as u64) as usize
}

fn complete_all(itxs: Vec<Itx>) -> usize {
    let n = itxs.len();
    for itx in itxs {
        itx.complete();
    }
    n
}

impl ItxQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `itx` under `txg`.
    ///
    /// If the bucket still holds itxs of an older txg those are
    /// superseded: their callbacks run before this returns.
    pub fn assign(&self, mut itx: Itx, txg: Txg) {
        itx.txg = txg;
        itx.record.txg = txg;
        let stale = {
            let mut buckets = self.buckets.lock();
            let bucket = &mut buckets[slot(txg)];
            let stale = if bucket.txg == txg {
                Vec::new()
            } else {
                bucket.txg = txg;
                bucket.take_all()
            };
            if itx.sync {
                bucket.sync.push(itx);
            } else {
                bucket.async_lists.entry(itx.oid).or_default().push(itx);
            }
            stale
        };
        complete_all(stale);
    }

    /// Takes back the itxs of a failed commit. They are not logged again;
    /// their callbacks run once their txg syncs, like any superseded itx.
    /// An itx whose bucket already moved on to a newer txg completes now.
    pub fn hold(&self, itxs: Vec<Itx>) -> usize {
        let n = itxs.len();
        let done: Vec<Itx> = {
            let mut buckets = self.buckets.lock();
            let mut done = Vec::new();
            for itx in itxs {
                let bucket = &mut buckets[slot(itx.txg)];
                if bucket.txg == itx.txg {
                    bucket.held.push(itx);
                } else {
                    done.push(itx);
                }
            }
            done
        };
        complete_all(done);
        n
    }

    /// Completes every itx whose txg is at or below `synced`.
    pub fn clean(&self, synced: Txg) -> usize {
        let done: Vec<Itx> = {
            let mut buckets = self.buckets.lock();
            buckets
                .iter_mut()
                .filter(|b| b.txg <= synced)
                .flat_map(Bucket::take_all)
                .collect()
        };
        complete_all(done)
    }

    /// Discards the async itxs of `oid`, for an object being removed.
    pub fn remove_async(&self, oid: ObjectId) -> usize {
        let removed: Vec<Itx> = {
            let mut buckets = self.buckets.lock();
            buckets
                .iter_mut()
                .filter_map(|b| b.async_lists.remove(&oid))
                .flatten()
                .collect()
        };
        let n = removed.len();
        removed.into_iter().for_each(Itx::destroy);
        n
    }

    /// Moves async itxs of `oid`, or of every object, to the sync lists.
    pub fn promote(&self, oid: Option<ObjectId>) {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.iter_mut() {
            bucket.promote(oid);
        }
    }

    /// Takes the sync itxs of every txg above `synced`, oldest txg first.
    ///
    /// Buckets at or below `synced` are cleaned on the way.
    pub fn drain(&self, synced: Txg) -> Vec<Itx> {
        let (mut live, stale) = {
            let mut buckets = self.buckets.lock();
            let mut live: Vec<(Txg, Vec<Itx>)> = Vec::new();
            let mut stale = Vec::new();
            for bucket in buckets.iter_mut() {
                if bucket.txg <= synced {
                    stale.extend(bucket.take_all());
                } else if !bucket.sync.is_empty() {
                    live.push((bucket.txg, std::mem::take(&mut bucket.sync)));
                }
            }
            (live, stale)
        };
        complete_all(stale);
        live.sort_by_key(|(txg, _)| *txg);
        live.into_iter().flat_map(|(_, itxs)| itxs).collect()
    }

    /// Drops everything without running callbacks.
    pub fn discard_all(&self) -> usize {
        let all: Vec<Itx> = {
            let mut buckets = self.buckets.lock();
            buckets.iter_mut().flat_map(Bucket::take_all).collect()
        };
        let n = all.len();
        all.into_iter().for_each(Itx::destroy);
        n
    }

    /// Number of queued itxs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(Bucket::len).sum()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ItxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItxQueue").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_chain::{remove, truncate_obj};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted(record: LogRecord, hits: &Arc<AtomicUsize>) -> Itx {
        let hits = Arc::clone(hits);
        Itx::create(record).with_callback(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn select_write_state() {
        let config = ZilConfig::default();
        let big = config.immediate_write_size * 4;
        assert_eq!(WriteState::select(&config, 0, big, big, true), WriteState::Indirect);
        assert_eq!(WriteState::select(&config, 1, big, big, true), WriteState::Copied);
        assert_eq!(WriteState::select(&config, 0, 512, 4096, true), WriteState::Copied);
        assert_eq!(WriteState::select(&config, 0, 512, 4096, false), WriteState::NeedCopy);

        let slog = ZilConfig::default().has_slog(true);
        assert_eq!(WriteState::select(&slog, 0, big, big, true), WriteState::Copied);
        let throughput = slog.logbias(LogBias::Throughput);
        assert_eq!(WriteState::select(&throughput, 0, 4096, 4096, false), WriteState::Indirect);
    }

    #[test]
    fn create_takes_object_from_record() {
        let itx = Itx::create(truncate_obj(42, 1, 10));
        assert_eq!(itx.oid(), ObjectId::new(42));
        assert!(itx.is_sync());
        assert_eq!(itx.write_state(), WriteState::Copied);
    }

    #[test]
    fn destroy_does_not_run_callback() {
        let hits = Arc::new(AtomicUsize::new(0));
        counted(truncate_obj(1, 1, 10), &hits).destroy();
        let record = counted(truncate_obj(1, 1, 10), &hits).destroy_without_callback();
        assert_eq!(record.seq.as_u64(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drain_returns_sync_itxs_in_txg_order() {
        let q = ItxQueue::new();
        q.assign(Itx::create(truncate_obj(1, 1, 12)), Txg::new(12));
        q.assign(Itx::create(truncate_obj(1, 2, 11)), Txg::new(11));
        q.assign(Itx::create(truncate_obj(1, 3, 12)), Txg::new(12));
        q.assign(Itx::create(remove(4, 11)).with_sync(false), Txg::new(11));
        assert_eq!(q.len(), 4);

        let seqs: Vec<u64> = q.drain(Txg::new(10)).iter().map(|i| i.record().seq.as_u64()).collect();
        assert_eq!(seqs, vec![2, 1, 3]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn promote_moves_only_the_requested_object() {
        let q = ItxQueue::new();
        q.assign(Itx::create(truncate_obj(1, 1, 11)).with_sync(false), Txg::new(11));
        q.assign(Itx::create(truncate_obj(2, 2, 11)).with_sync(false), Txg::new(11));
        q.promote(Some(ObjectId::new(2)));
        let drained = q.drain(Txg::new(10));
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].oid(), ObjectId::new(2));

        q.promote(None);
        assert_eq!(q.drain(Txg::new(10)).len(), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn clean_runs_callbacks_of_synced_txgs() {
        let hits = Arc::new(AtomicUsize::new(0));
        let q = ItxQueue::new();
        q.assign(counted(truncate_obj(1, 1, 11), &hits), Txg::new(11));
        q.assign(counted(truncate_obj(1, 2, 12), &hits).with_sync(false), Txg::new(12));
        assert_eq!(q.clean(Txg::new(11)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(q.clean(Txg::new(12)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn reused_bucket_supersedes_old_txg() {
        let hits = Arc::new(AtomicUsize::new(0));
        let q = ItxQueue::new();
        q.assign(counted(truncate_obj(1, 1, 11), &hits), Txg::new(11));
        q.assign(Itx::create(truncate_obj(1, 2, 15)), Txg::new(15));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_async_and_discard_skip_callbacks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let q = ItxQueue::new();
        q.assign(counted(truncate_obj(5, 1, 11), &hits).with_sync(false), Txg::new(11));
        q.assign(counted(truncate_obj(5, 2, 12), &hits).with_sync(false), Txg::new(12));
        q.assign(counted(truncate_obj(6, 3, 12), &hits), Txg::new(12));
        assert_eq!(q.remove_async(ObjectId::new(5)), 2);
        assert_eq!(q.discard_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn assign_stamps_the_record_txg() {
        let q = ItxQueue::new();
        let record = truncate_obj(3, 1, 0);
        assert!(record.txg.is_none());
        q.assign(Itx::create(record), Txg::new(14));
        let drained = q.drain(Txg::new(13));
        assert_eq!(drained[0].txg(), Txg::new(14));
        assert_eq!(drained[0].record().txg, Txg::new(14));
    }

    #[test]
    fn held_itxs_complete_at_sync_and_are_not_drained() {
        let hits = Arc::new(AtomicUsize::new(0));
        let q = ItxQueue::new();
        q.assign(counted(truncate_obj(1, 1, 11), &hits), Txg::new(11));
        let taken = q.drain(Txg::new(10));
        assert_eq!(q.hold(taken), 1);
        assert_eq!(q.len(), 1);
        assert!(q.drain(Txg::new(10)).is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(q.clean(Txg::new(11)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(q.is_empty());
    }

    #[test]
    fn held_itx_of_a_reused_bucket_completes_at_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let q = ItxQueue::new();
        q.assign(counted(truncate_obj(1, 1, 11), &hits), Txg::new(11));
        let taken = q.drain(Txg::new(10));
        q.assign(Itx::create(truncate_obj(1, 2, 15)), Txg::new(15));
        q.hold(taken);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn concurrent_assign() {
        let q = Arc::new(ItxQueue::new());
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        q.assign(Itx::create(truncate_obj(t, i + 1, 11)), Txg::new(11));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 400);
    }
}
