//! Hand-built log chains.
//!
//! [`ChainBuilder`] lays records out into blocks exactly as given, which
//! the writer never does on its own: blocks born in chosen txgs, block
//! boundaries at chosen records, and afterwards damage through
//! [`BuiltChain::corrupt`].
//!
//! ```text
//!  header.log ──► block 1 ──► block 2 ──► ... ──► block N ──► (unwritten)
//!                 seq 1       seq 2               seq N       seq N+1
//! ```

use zil_codec::{BlockPointer, LogRecord, Seq, Txg};
use zil_core::{ChainId, LogBlockBuilder, LwbHeader, ZilError, ZilHeader, ZilResult};
use zil_storage::{BlockDevice, BlockLocator, InMemoryBlockDevice, IoPriority};

/// Ways to damage a built chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// XOR one byte of a block with `0xFF`.
    FlipByte {
        /// Block index, from 0.
        block: usize,
        /// Byte offset in the block.
        offset: usize,
    },
    /// Overwrite a block with zeros, as if it was never written.
    Zero {
        /// Block index.
        block: usize,
    },
    /// Reseal a block so that its successor pointer names another block.
    Relink {
        /// Block to rewrite.
        block: usize,
        /// Block its trailer should point at.
        target: usize,
    },
    /// Make every read of a block fail.
    Unreadable {
        /// Block index.
        block: usize,
    },
}

/// Builds a chain on an [`InMemoryBlockDevice`].
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    block_size: usize,
    chain: ChainId,
    birth: Txg,
    renumber: bool,
    blocks: Vec<Vec<LogRecord>>,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self {
            block_size: 4096,
            chain: ChainId([0x5EED_0001, 0x5EED_0002]),
            birth: Txg::new(10),
            renumber: true,
            blocks: Vec::new(),
        }
    }
}

impl ChainBuilder {
    /// Creates a builder for 4 KiB blocks born in txg 10.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the block size.
    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Sets the birth txg of every block, and of records left at txg 0.
    pub fn birth(mut self, txg: Txg) -> Self {
        self.birth = txg;
        self
    }

    /// Keeps record sequence numbers as given instead of numbering them
    /// from 1.
    pub fn keep_seqs(mut self) -> Self {
        self.renumber = false;
        self
    }

    /// Appends a block holding `records`.
    pub fn block(mut self, records: Vec<LogRecord>) -> Self {
        self.blocks.push(records);
        self
    }

    /// Returns the blocks' records with the sequence numbers and txgs the
    /// chain will carry.
    pub fn records(&self) -> Vec<Vec<LogRecord>> {
        let mut seq = 0u64;
        self.blocks
            .iter()
            .map(|block| {
                block
                    .iter()
                    .map(|r| {
                        let mut r = r.clone();
                        if self.renumber {
                            seq += 1;
                            r.seq = Seq::new(seq);
                        }
                        if r.txg.is_none() {
                            r.txg = self.birth;
                        }
                        r
                    })
                    .collect()
            })
            .collect()
    }

    /// Writes the chain to `device` and returns a header pointing at it.
    ///
    /// # Errors
    ///
    /// Returns device errors, codec errors, and
    /// [`ZilError::RecordTooLarge`] if a block overflows.
    pub fn build(&self, device: &InMemoryBlockDevice) -> ZilResult<BuiltChain> {
        let blocks = self.records();
        let locators = (0..=blocks.len())
            .map(|_| device.allocate_block(self.block_size))
            .collect::<Result<Vec<_>, _>>()?;
        let pointers: Vec<BlockPointer> = locators
            .iter()
            .enumerate()
            .map(|(i, &locator)| {
                self.chain
                    .pointer(locator, self.block_size, self.birth, Seq::new(i as u64 + 1))
            })
            .collect();

        let mut payloads = Vec::with_capacity(blocks.len());
        for records in &blocks {
            let mut encoded = Vec::with_capacity(records.len());
            for record in records {
                encoded.push(record.encode()?);
            }
            payloads.push(encoded);
        }

        let built = BuiltChain {
            block_size: self.block_size,
            chain: self.chain,
            locators,
            pointers,
            payloads,
            records: blocks,
        };
        for i in 0..built.payloads.len() {
            built.write(device, i, i + 1)?;
        }
        Ok(built)
    }
}

/// A chain written by [`ChainBuilder`].
#[derive(Debug, Clone)]
pub struct BuiltChain {
    block_size: usize,
    chain: ChainId,
    locators: Vec<BlockLocator>,
    pointers: Vec<BlockPointer>,
    payloads: Vec<Vec<Vec<u8>>>,
    records: Vec<Vec<LogRecord>>,
}

impl BuiltChain {
    /// Header of a never-claimed log starting at the first block.
    ///
    /// A chain without blocks yields an empty header.
    pub fn header(&self) -> ZilHeader {
        let log = if self.payloads.is_empty() {
            BlockPointer::HOLE
        } else {
            self.pointers[0]
        };
        ZilHeader::Lwb(LwbHeader {
            log,
            ..LwbHeader::default()
        })
    }

    /// Locators of the written blocks followed by the unwritten successor.
    pub fn locators(&self) -> &[BlockLocator] {
        &self.locators
    }

    /// Pointer to block `index` (the last one is the unwritten successor).
    pub fn pointer(&self, index: usize) -> BlockPointer {
        self.pointers[index]
    }

    /// Records per block, as written.
    pub fn records(&self) -> &[Vec<LogRecord>] {
        &self.records
    }

    /// All records in chain order.
    pub fn all_records(&self) -> Vec<LogRecord> {
        self.records.iter().flatten().cloned().collect()
    }

    /// Number of written blocks.
    pub fn block_count(&self) -> usize {
        self.payloads.len()
    }

    /// Applies `corruption` to the device.
    ///
    /// # Errors
    ///
    /// Returns device errors, or an invalid operation error for a block
    /// index outside the chain.
    pub fn corrupt(&self, device: &InMemoryBlockDevice, corruption: Corruption) -> ZilResult<()> {
        let locator = |block: usize| {
            self.locators
                .get(block)
                .copied()
                .ok_or_else(|| ZilError::invalid_operation(format!("no block {block}")))
        };
        let done = match corruption {
            Corruption::FlipByte { block, offset } => device.corrupt(locator(block)?, offset, 0xFF),
            Corruption::Zero { block } => device.zero(locator(block)?),
            Corruption::Relink { block, target } => {
                locator(target)?;
                self.write(device, block, target)?;
                true
            }
            Corruption::Unreadable { block } => {
                device.inject_read_fault(locator(block)?);
                true
            }
        };
        if done {
            Ok(())
        } else {
            Err(ZilError::invalid_operation(format!(
                "cannot apply {corruption:?}"
            )))
        }
    }

    fn write(&self, device: &InMemoryBlockDevice, block: usize, next: usize) -> ZilResult<()> {
        let records = self
            .payloads
            .get(block)
            .ok_or_else(|| ZilError::invalid_operation(format!("no block {block}")))?;
        let mut builder = LogBlockBuilder::new(self.block_size);
        for record in records {
            if !builder.push(record) {
                return Err(ZilError::RecordTooLarge {
                    reclen: record.len(),
                    max: builder.remaining(),
                });
            }
        }
        let data = builder.seal(&self.pointers[next], Seq::new(block as u64 + 1), self.chain);
        device.write_block_at(self.locators[block], &data, IoPriority::SyncWrite)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records;
    use zil_core::{check_log_chain, MemoryObjset, PoolTxgs};

    fn check(device: &InMemoryBlockDevice, header: &ZilHeader) -> ZilResult<zil_core::ParseResult> {
        check_log_chain(device, &PoolTxgs::new(Txg::new(20)), &MemoryObjset::new(1), header)
    }

    fn two_blocks() -> ChainBuilder {
        ChainBuilder::new()
            .block(vec![records::create(4, "a", 10), records::write(10, 0, b"x")])
            .block(vec![records::remove(4, "a")])
    }

    #[test]
    fn built_chain_walks_clean() {
        let device = InMemoryBlockDevice::new();
        let chain = two_blocks().build(&device).unwrap();
        assert_eq!(chain.block_count(), 2);
        assert_eq!(chain.locators().len(), 3);
        let result = check(&device, &chain.header()).unwrap();
        assert_eq!(result.blk_count, 2);
        assert_eq!(result.lr_count, 3);
        assert_eq!(result.lr_seq, Seq::new(3));
        assert_eq!(chain.all_records()[2].seq, Seq::new(3));
    }

    #[test]
    fn records_inherit_birth_txg() {
        let builder = ChainBuilder::new()
            .birth(Txg::new(33))
            .block(vec![records::truncate(1, 0, 1), records::truncate(1, 0, 2).with_txg(Txg::new(34))]);
        let records = builder.records();
        assert_eq!(records[0][0].txg, Txg::new(33));
        assert_eq!(records[0][1].txg, Txg::new(34));
    }

    #[test]
    fn empty_builder_gives_empty_header() {
        let device = InMemoryBlockDevice::new();
        let chain = ChainBuilder::new().build(&device).unwrap();
        assert!(chain.header().lwb().unwrap().is_empty());
    }

    #[test]
    fn flipped_byte_breaks_checksum() {
        let device = InMemoryBlockDevice::new();
        let chain = two_blocks().build(&device).unwrap();
        chain
            .corrupt(&device, Corruption::FlipByte { block: 1, offset: 8 })
            .unwrap();
        let err = check(&device, &chain.header()).unwrap_err();
        assert!(matches!(err, ZilError::CorruptBlock { .. }));
    }

    #[test]
    fn relink_to_self_is_detected() {
        let device = InMemoryBlockDevice::new();
        let chain = two_blocks().build(&device).unwrap();
        chain
            .corrupt(&device, Corruption::Relink { block: 1, target: 1 })
            .unwrap();
        assert!(check(&device, &chain.header()).is_err());
    }

    #[test]
    fn unreadable_block_is_an_io_error() {
        let device = InMemoryBlockDevice::new();
        let chain = two_blocks().build(&device).unwrap();
        chain
            .corrupt(&device, Corruption::Unreadable { block: 0 })
            .unwrap();
        assert!(matches!(
            check(&device, &chain.header()),
            Err(ZilError::Io(_))
        ));
    }

    #[test]
    fn out_of_range_block_is_refused() {
        let device = InMemoryBlockDevice::new();
        let chain = two_blocks().build(&device).unwrap();
        assert!(chain.corrupt(&device, Corruption::Zero { block: 9 }).is_err());
    }
}
