//! Collaborators the log consumes: the pool's txg state and the object set.

use crate::error::{ZilError, ZilResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use zil_codec::{ObjectId, Txg};

/// Transaction group state of the owning pool.
pub trait TxgSource: Send + Sync {
    /// The txg currently accepting changes.
    fn open_txg(&self) -> Txg;

    /// The most recent txg committed to the main tree.
    fn last_synced_txg(&self) -> Txg;

    /// The first txg whose changes may be missing from the main tree.
    ///
    /// Blocks and records born before it are already committed.
    fn min_claim_txg(&self) -> Txg;

    /// Txg of the pool's active checkpoint, or zero.
    fn checkpoint_txg(&self) -> Txg;

    /// Whether the administrator asked for logs to be discarded.
    fn log_clear_requested(&self) -> bool {
        false
    }
}

/// The object set (dataset) a log belongs to.
pub trait Objset: Send + Sync {
    /// Object set id.
    fn id(&self) -> u64;

    /// Whether the object set is encrypted.
    fn is_encrypted(&self) -> bool;

    /// Reads `len` bytes of object `oid` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the object or range does not exist.
    fn fetch_payload(&self, oid: ObjectId, offset: u64, len: u64) -> ZilResult<Vec<u8>>;
}

/// A [`TxgSource`] backed by plain counters.
#[derive(Debug, Default)]
pub struct PoolTxgs {
    open: AtomicU64,
    synced: AtomicU64,
    min_claim: AtomicU64,
    checkpoint: AtomicU64,
    clear: AtomicBool,
}

impl PoolTxgs {
    /// Creates a pool whose open txg is `open` and which synced everything
    /// before it.
    #[must_use]
    pub fn new(open: Txg) -> Self {
        let synced = open.as_u64().saturating_sub(1);
        Self {
            open: AtomicU64::new(open.as_u64()),
            synced: AtomicU64::new(synced),
            min_claim: AtomicU64::new(synced + 1),
            checkpoint: AtomicU64::new(0),
            clear: AtomicBool::new(false),
        }
    }

    /// Sets the minimum claim txg.
    #[must_use]
    pub fn with_min_claim_txg(self, txg: Txg) -> Self {
        self.min_claim.store(txg.as_u64(), Ordering::SeqCst);
        self
    }

    /// Sets the checkpoint txg.
    #[must_use]
    pub fn with_checkpoint_txg(self, txg: Txg) -> Self {
        self.checkpoint.store(txg.as_u64(), Ordering::SeqCst);
        self
    }

    /// Requests (or withdraws) log clearing.
    pub fn request_log_clear(&self, value: bool) {
        self.clear.store(value, Ordering::SeqCst);
    }

    /// Syncs the open txg and opens the next one. Returns the synced txg.
    pub fn sync_txg(&self) -> Txg {
        let synced = self.open.fetch_add(1, Ordering::SeqCst);
        self.synced.store(synced, Ordering::SeqCst);
        Txg::new(synced)
    }

    /// Simulates an import after a crash: every txg after the last synced
    /// one is lost and becomes the claim boundary.
    pub fn crash_and_import(&self) {
        let synced = self.synced.load(Ordering::SeqCst);
        self.min_claim.store(synced + 1, Ordering::SeqCst);
        self.open.store(synced + 1, Ordering::SeqCst);
    }
}

impl TxgSource for PoolTxgs {
    fn open_txg(&self) -> Txg {
        Txg::new(self.open.load(Ordering::SeqCst))
    }

    fn last_synced_txg(&self) -> Txg {
        Txg::new(self.synced.load(Ordering::SeqCst))
    }

    fn min_claim_txg(&self) -> Txg {
        Txg::new(self.min_claim.load(Ordering::SeqCst))
    }

    fn checkpoint_txg(&self) -> Txg {
        Txg::new(self.checkpoint.load(Ordering::SeqCst))
    }

    fn log_clear_requested(&self) -> bool {
        self.clear.load(Ordering::SeqCst)
    }
}

/// An [`Objset`] holding object contents in memory.
#[derive(Debug, Default)]
pub struct MemoryObjset {
    id: u64,
    encrypted: bool,
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryObjset {
    /// Creates an empty object set.
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Marks the object set as encrypted.
    #[must_use]
    pub fn encrypted(mut self, value: bool) -> Self {
        self.encrypted = value;
        self
    }

    /// Writes `data` into object `oid` at `offset`, growing it as needed.
    pub fn write(&self, oid: ObjectId, offset: u64, data: &[u8]) {
        let mut objects = self.objects.write();
        let object = objects.entry(oid).or_default();
        let start = offset as usize;
        let end = start + data.len();
        if object.len() < end {
            object.resize(end, 0);
        }
        object[start..end].copy_from_slice(data);
    }

    /// Returns a copy of object `oid`.
    #[must_use]
    pub fn read(&self, oid: ObjectId) -> Option<Vec<u8>> {
        self.objects.read().get(&oid).cloned()
    }
}

impl Objset for MemoryObjset {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    fn fetch_payload(&self, oid: ObjectId, offset: u64, len: u64) -> ZilResult<Vec<u8>> {
        let objects = self.objects.read();
        let object = objects
            .get(&oid)
            .ok_or_else(|| ZilError::invalid_operation(format!("no object {oid}")))?;
        let range = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(len).ok())
            .and_then(|(start, len)| Some(start..start.checked_add(len)?))
            .filter(|r| r.end <= object.len())
            .ok_or_else(|| {
                ZilError::invalid_operation(format!(
                    "range {offset}+{len} outside {oid} ({} bytes)",
                    object.len()
                ))
            })?;
        Ok(object[range].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_advances_txgs() {
        let pool = PoolTxgs::new(Txg::new(10));
        assert_eq!(pool.last_synced_txg(), Txg::new(9));
        assert_eq!(pool.min_claim_txg(), Txg::new(10));
        assert_eq!(pool.sync_txg(), Txg::new(10));
        assert_eq!(pool.open_txg(), Txg::new(11));
        assert_eq!(pool.last_synced_txg(), Txg::new(10));
    }

    #[test]
    fn crash_rewinds_to_last_synced() {
        let pool = PoolTxgs::new(Txg::new(5));
        pool.sync_txg();
        assert_eq!(pool.open_txg(), Txg::new(6));
        pool.crash_and_import();
        assert_eq!(pool.min_claim_txg(), Txg::new(6));
        assert_eq!(pool.open_txg(), Txg::new(6));
    }

    #[test]
    fn objset_reads_back_ranges() {
        let os = MemoryObjset::new(54);
        let oid = ObjectId::new(8);
        os.write(oid, 4, b"abcd");
        assert_eq!(os.fetch_payload(oid, 4, 4).unwrap(), b"abcd");
        assert_eq!(os.fetch_payload(oid, 0, 2).unwrap(), vec![0, 0]);
        assert!(os.fetch_payload(oid, 6, 4).is_err());
        assert!(os.fetch_payload(ObjectId::new(9), 0, 1).is_err());
        assert_eq!(os.id(), 54);
        assert!(!os.is_encrypted());
    }
}
