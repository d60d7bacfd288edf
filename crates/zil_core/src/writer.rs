//! Packs pending itxs into log blocks and appends them to the chain.
//!
//! The writer always holds a pre-allocated tail block. Sealing a block
//! allocates the next tail and records its pointer in the trailer, so the
//! chain can be followed as soon as the block is on disk; the tail itself
//! stays unwritten and reads back as the end of the chain.
//!
//! ```text
//! header.log ─▶ [blk 1] ─▶ [blk 2] ─▶ [tail, unwritten]
//!               max txg 11  max txg 12
//! ```
//!
//! Once the main tree has synced a block's highest txg the block is freed
//! and the head moves forward.

use crate::chain::{data_checksum, max_payload, ChainId, LogBlockBuilder};
use crate::config::ZilConfig;
use crate::error::{ZilError, ZilResult};
use crate::itx::{Itx, WriteState};
use crate::pool::Objset;
use std::collections::VecDeque;
use tracing::debug;
use zil_codec::{
    BlockPointer, LogRecord, RecordBody, Seq, Txg, WriteBody, LR_HEADER_SIZE, WRITE_FIXED,
};
use zil_storage::{BlockDevice, IoPriority};

/// Result of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushSummary {
    /// Records written.
    pub records: u64,
    /// Log blocks written.
    pub blocks: u64,
    /// Payload bytes written through the device for indirect writes.
    pub indirect_bytes: u64,
    /// Sequence of the last record written.
    pub last_seq: Seq,
}

#[derive(Debug, Clone, Copy)]
struct WrittenBlock {
    bp: BlockPointer,
    max_txg: Txg,
}

/// Appends records to one log chain.
#[derive(Debug)]
pub struct LwbWriter {
    chain: ChainId,
    block_size: usize,
    tail: Option<BlockPointer>,
    blk_seq: Seq,
    lr_seq: Seq,
    written: VecDeque<WrittenBlock>,
}

impl LwbWriter {
    /// Creates a writer for a new chain.
    #[must_use]
    pub fn new(config: &ZilConfig) -> Self {
        Self::with_chain(config, ChainId::random())
    }

    /// Creates a writer for a new chain with a fixed identity.
    #[must_use]
    pub fn with_chain(config: &ZilConfig, chain: ChainId) -> Self {
        Self {
            chain,
            block_size: config.block_size,
            tail: None,
            blk_seq: Seq::default(),
            lr_seq: Seq::default(),
            written: VecDeque::new(),
        }
    }

    /// Identity of the chain.
    #[must_use]
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Pointer the header should hold: the oldest live block, or the
    /// unwritten tail, or a hole before the first flush.
    #[must_use]
    pub fn head(&self) -> BlockPointer {
        self.written
            .front()
            .map(|w| w.bp)
            .or(self.tail)
            .unwrap_or(BlockPointer::HOLE)
    }

    /// Sequence of the last record written.
    #[must_use]
    pub fn lr_seq(&self) -> Seq {
        self.lr_seq
    }

    /// Sequence of the last block written.
    #[must_use]
    pub fn blk_seq(&self) -> Seq {
        self.blk_seq
    }

    /// Number of written blocks not yet freed.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.written.len()
    }

    /// Largest inline write payload a single record may carry.
    #[must_use]
    pub fn max_inline_data(&self) -> usize {
        max_payload(self.block_size).saturating_sub(LR_HEADER_SIZE + WRITE_FIXED) & !7
    }

    /// Writes `itxs` in order and flushes the device.
    ///
    /// Record sequence numbers are assigned here. Nothing is assigned if
    /// any record cannot be materialised or is too large for a block, and
    /// after a device error only the records of blocks that were written
    /// keep theirs. Every record carries its itx's assigned txg.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::RecordTooLarge`], payload fetch errors, or
    /// device errors.
    pub fn write(
        &mut self,
        device: &dyn BlockDevice,
        objset: &dyn Objset,
        open_txg: Txg,
        itxs: &[Itx],
    ) -> ZilResult<FlushSummary> {
        let mut summary = FlushSummary::default();
        let mut records = Vec::with_capacity(itxs.len());
        for itx in itxs {
            summary.indirect_bytes += self.materialize(device, objset, itx, &mut records)?;
        }

        let max = max_payload(self.block_size);
        let mut staged = Vec::with_capacity(records.len());
        let mut seq = self.lr_seq;
        for record in records {
            seq = seq.next();
            let txg = record.txg;
            let bytes = record.with_seq(seq).encode()?;
            if bytes.len() > max {
                return Err(ZilError::RecordTooLarge {
                    reclen: bytes.len(),
                    max,
                });
            }
            staged.push((seq, txg, bytes));
        }

        let mut builder = LogBlockBuilder::new(self.block_size);
        let mut max_txg = Txg::default();
        let mut last = self.lr_seq;
        for (seq, txg, bytes) in staged {
            if !builder.push(&bytes) {
                let full = std::mem::replace(&mut builder, LogBlockBuilder::new(self.block_size));
                self.seal_and_write(device, full, open_txg, max_txg)?;
                self.lr_seq = last;
                summary.blocks += 1;
                max_txg = Txg::default();
                if !builder.push(&bytes) {
                    return Err(ZilError::RecordTooLarge {
                        reclen: bytes.len(),
                        max,
                    });
                }
            }
            max_txg = max_txg.max(txg);
            last = seq;
            summary.records += 1;
        }
        if !builder.is_empty() {
            self.seal_and_write(device, builder, open_txg, max_txg)?;
            self.lr_seq = last;
            summary.blocks += 1;
        }
        device.flush()?;
        summary.last_seq = self.lr_seq;
        debug!(
            records = summary.records,
            blocks = summary.blocks,
            last_seq = self.lr_seq.as_u64(),
            "flushed log blocks"
        );
        Ok(summary)
    }

    /// Frees blocks whose records are all at or below `synced`.
    ///
    /// # Errors
    ///
    /// Returns device errors from freeing.
    pub fn sync(&mut self, device: &dyn BlockDevice, synced: Txg) -> ZilResult<usize> {
        let mut freed = 0;
        while let Some(front) = self.written.front() {
            if front.max_txg > synced {
                break;
            }
            device.free_block(front.bp.locator)?;
            self.written.pop_front();
            freed += 1;
        }
        if freed > 0 {
            debug!(freed, synced = synced.as_u64(), "freed obsolete log blocks");
        }
        Ok(freed)
    }

    fn tail(&mut self, device: &dyn BlockDevice, open_txg: Txg) -> ZilResult<BlockPointer> {
        if let Some(tail) = self.tail {
            return Ok(tail);
        }
        let locator = device.allocate_block(self.block_size)?;
        let tail = self
            .chain
            .pointer(locator, self.block_size, open_txg, self.blk_seq.next());
        self.tail = Some(tail);
        Ok(tail)
    }

    fn seal_and_write(
        &mut self,
        device: &dyn BlockDevice,
        builder: LogBlockBuilder,
        open_txg: Txg,
        max_txg: Txg,
    ) -> ZilResult<()> {
        let bp = self.tail(device, open_txg)?;
        let seq = self.blk_seq.next();
        let next_locator = device.allocate_block(self.block_size)?;
        let next = self
            .chain
            .pointer(next_locator, self.block_size, open_txg, seq.next());
        let block = builder.seal(&next, seq, self.chain);
        device.write_block_at(bp.locator, &block, IoPriority::SyncWrite)?;
        self.written.push_back(WrittenBlock { bp, max_txg });
        self.tail = Some(next);
        self.blk_seq = seq;
        Ok(())
    }

    /// Turns an itx into the records that go on disk. Returns the bytes
    /// written through the device for an indirect write.
    fn materialize(
        &self,
        device: &dyn BlockDevice,
        objset: &dyn Objset,
        itx: &Itx,
        out: &mut Vec<LogRecord>,
    ) -> ZilResult<u64> {
        let mut record = itx.record().clone();
        record.txg = itx.txg();
        let body = match &record.body {
            RecordBody::Write(body) => body.clone(),
            _ => {
                out.push(record);
                return Ok(0);
            }
        };
        if body.is_indirect() && itx.write_state() == WriteState::Copied {
            out.push(record);
            return Ok(0);
        }
        match itx.write_state() {
            WriteState::Indirect => {
                let payload = objset.fetch_payload(body.foid, body.offset, body.length)?;
                let locator = device.write_block(&payload, IoPriority::AsyncWrite)?;
                let blkptr = BlockPointer {
                    locator,
                    lsize: payload.len() as u64,
                    birth: record.txg,
                    cksum: [data_checksum(&payload), 0, 0],
                };
                let bytes = payload.len() as u64;
                record.body = RecordBody::Write(WriteBody {
                    blkptr,
                    data: Vec::new(),
                    ..body
                });
                out.push(record);
                Ok(bytes)
            }
            WriteState::Copied => {
                self.split(&record, &body, &body.data, out);
                Ok(0)
            }
            WriteState::NeedCopy => {
                let payload = objset.fetch_payload(body.foid, body.offset, body.length)?;
                if payload.is_empty() || payload.len() as u64 != body.length {
                    return Err(ZilError::invalid_operation(format!(
                        "need-copy write of {} at {} fetched {} of {} bytes",
                        body.foid,
                        body.offset,
                        payload.len(),
                        body.length
                    )));
                }
                self.split(&record, &body, &payload, out);
                Ok(0)
            }
        }
    }

    fn split(&self, record: &LogRecord, body: &WriteBody, data: &[u8], out: &mut Vec<LogRecord>) {
        let chunk = self.max_inline_data().max(8);
        let mut offset = body.offset;
        for piece in data.chunks(chunk) {
            let mut part = record.clone();
            part.body = RecordBody::Write(WriteBody {
                offset,
                length: piece.len() as u64,
                blkptr: BlockPointer::HOLE,
                data: piece.to_vec(),
                ..body.clone()
            });
            out.push(part);
            offset += piece.len() as u64;
        }
    }
}
