//! Hand-built chains for unit tests.

use crate::chain::{ChainId, LogBlockBuilder};
use crate::header::{LwbHeader, ZilHeader};
use crate::pool::{MemoryObjset, PoolTxgs};
use parking_lot::Mutex;
use zil_codec::{
    BlockPointer, CreateBody, LogRecord, ObjectId, RecordBody, RemoveBody, Seq, Timespec,
    TruncateBody, TxType, Txg, WriteBody,
};
use zil_storage::{BlockDevice, BlockLocator, InMemoryBlockDevice, IoPriority};

pub(crate) const BLOCK_SIZE: usize = 4096;
pub(crate) const CHAIN: ChainId = ChainId([0xC0FFEE, 0xBEEF]);

pub(crate) struct TestChain {
    pub device: InMemoryBlockDevice,
    pub pool: PoolTxgs,
    pub objset: MemoryObjset,
    locators: Mutex<Vec<BlockLocator>>,
}

impl TestChain {
    pub fn new() -> Self {
        Self {
            device: InMemoryBlockDevice::new(),
            pool: PoolTxgs::new(Txg::new(10)),
            objset: MemoryObjset::new(1),
            locators: Mutex::new(Vec::new()),
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.objset = MemoryObjset::new(1).encrypted(true);
        self
    }

    pub fn locators(&self) -> Vec<BlockLocator> {
        self.locators.lock().clone()
    }
}

fn pointer(locator: BlockLocator, seq: u64) -> BlockPointer {
    CHAIN.pointer(locator, BLOCK_SIZE, Txg::new(10), Seq::new(seq))
}

/// Writes one block per entry, plus an unwritten successor, and returns a
/// header pointing at the first block.
pub(crate) fn write_chain(chain: &TestChain, blocks: Vec<Vec<LogRecord>>) -> ZilHeader {
    let locators: Vec<BlockLocator> = (0..=blocks.len())
        .map(|_| chain.device.allocate_block(BLOCK_SIZE).unwrap())
        .collect();
    for (i, records) in blocks.iter().enumerate() {
        let mut builder = LogBlockBuilder::new(BLOCK_SIZE);
        for record in records {
            assert!(builder.push(&record.encode().unwrap()));
        }
        let seq = i as u64 + 1;
        let block = builder.seal(&pointer(locators[i + 1], seq + 1), Seq::new(seq), CHAIN);
        chain
            .device
            .write_block_at(locators[i], &block, IoPriority::SyncWrite)
            .unwrap();
    }
    *chain.locators.lock() = locators.clone();
    ZilHeader::Lwb(LwbHeader {
        log: pointer(locators[0], 1),
        ..LwbHeader::default()
    })
}

/// Writes a block whose successor pointer leads back to itself.
pub(crate) fn write_looping_chain(chain: &TestChain) -> ZilHeader {
    let locator = chain.device.allocate_block(BLOCK_SIZE).unwrap();
    let mut builder = LogBlockBuilder::new(BLOCK_SIZE);
    assert!(builder.push(&truncate(1, 10).encode().unwrap()));
    let block = builder.seal(&pointer(locator, 2), Seq::new(1), CHAIN);
    chain
        .device
        .write_block_at(locator, &block, IoPriority::SyncWrite)
        .unwrap();
    *chain.locators.lock() = vec![locator];
    ZilHeader::Lwb(LwbHeader {
        log: pointer(locator, 1),
        ..LwbHeader::default()
    })
}

pub(crate) fn truncate_obj(foid: u64, seq: u64, txg: u64) -> LogRecord {
    LogRecord::new(
        TxType::Truncate,
        RecordBody::Truncate(TruncateBody {
            foid: ObjectId::new(foid),
            offset: 0,
            length: seq * 100,
        }),
    )
    .unwrap()
    .with_seq(Seq::new(seq))
    .with_txg(Txg::new(txg))
}

pub(crate) fn truncate(seq: u64, txg: u64) -> LogRecord {
    truncate_obj(7, seq, txg)
}

pub(crate) fn remove(seq: u64, txg: u64) -> LogRecord {
    LogRecord::new(
        TxType::Remove,
        RecordBody::Remove(RemoveBody {
            doid: ObjectId::new(4),
            name: format!("file{seq}").into_bytes(),
        }),
    )
    .unwrap()
    .with_seq(Seq::new(seq))
    .with_txg(Txg::new(txg))
}

pub(crate) fn create(seq: u64, txg: u64, foid: u64) -> LogRecord {
    LogRecord::new(
        TxType::Create,
        RecordBody::Create(CreateBody {
            doid: ObjectId::new(4),
            foid: ObjectId::new(foid),
            mode: 0o100644,
            uid: 0,
            gid: 0,
            gen: txg,
            crtime: Timespec::new(txg, 0),
            rdev: 0,
            xvattr: None,
            name: format!("f{foid}").into_bytes(),
            link: None,
        }),
    )
    .unwrap()
    .with_seq(Seq::new(seq))
    .with_txg(Txg::new(txg))
}

pub(crate) fn write(txtype: TxType, foid: u64, seq: u64, txg: u64, data: &[u8]) -> LogRecord {
    LogRecord::new(
        txtype,
        RecordBody::Write(WriteBody {
            foid: ObjectId::new(foid),
            offset: 0,
            length: data.len() as u64,
            blkoff: 0,
            blkptr: BlockPointer::HOLE,
            data: data.to_vec(),
        }),
    )
    .unwrap()
    .with_seq(Seq::new(seq))
    .with_txg(Txg::new(txg))
}
