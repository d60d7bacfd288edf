//! # ZIL Core
//!
//! Intent log engine.
//!
//! Synchronous operations are recorded as log records in a chain of log
//! blocks before the main tree commits them. After a crash the chain is
//! claimed and replayed:
//!
//! ```text
//!  itx_assign ─▶ ItxQueue ─commit─▶ LwbWriter ─▶ [blk 1]─▶[blk 2]─▶[tail]
//!                                                  ▲
//!  import: claim_log ─walk───────────────────────┘
//!          replay_log ─walk─▶ ReplayOps
//! ```
//!
//! This crate provides:
//! - [`ZilHeader`] with kind negotiation and a fixed serialized size
//! - The chain walker ([`walk`]) and its visitor trait
//! - Claim ([`claim_log`]) and replay ([`replay_log`]) with idempotent
//!   resume after a crash
//! - The pending transaction queue ([`ItxQueue`]) and chain writer
//! - [`IntentLog`], which enforces the claim, replay, append lifecycle
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use zil_core::{IntentLog, Itx, MemoryObjset, PoolTxgs, ZilConfig, ZilHeader};
//! use zil_codec::{LogRecord, ObjectId, RecordBody, TruncateBody, TxType, Txg};
//! use zil_storage::InMemoryBlockDevice;
//!
//! let log = IntentLog::open(
//!     ZilConfig::default(),
//!     Arc::new(InMemoryBlockDevice::new()),
//!     Arc::new(PoolTxgs::new(Txg::new(10))),
//!     Arc::new(MemoryObjset::new(1)),
//!     ZilHeader::Uninit,
//! )
//! .unwrap();
//! log.claim().unwrap();
//! log.replay(&mut zil_core::DiscardOps).unwrap();
//!
//! let record = LogRecord::new(
//!     TxType::Truncate,
//!     RecordBody::Truncate(TruncateBody { foid: ObjectId::new(7), offset: 0, length: 0 }),
//! )
//! .unwrap()
//! .with_txg(Txg::new(10));
//! log.itx_assign(Itx::create(record)).unwrap();
//! assert_eq!(log.commit(None).unwrap().records, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod claim;
mod config;
mod error;
mod header;
mod itx;
mod parse;
mod pool;
mod replay;
#[cfg(test)]
mod test_chain;
mod writer;
mod zilog;

pub use chain::{
    block_checksum, data_checksum, max_payload, seal_block, verify_block, BlockStatus,
    BlockTrailer, ChainId, LogBlockBuilder, BLOCK_MAGIC, TRAILER_SIZE,
};
pub use claim::{check_log_chain, claim_log, ClaimDisposition, ClaimReport, LogState};
pub use config::{LogBias, SyncPolicy, ZilConfig, MIN_BLOCK_SIZE};
pub use error::{ZilError, ZilResult};
pub use header::{
    LwbHeader, PmemHeader, ZilHeader, ZilKind, HEADER_SIZE, ZIL_CLAIM_LR_SEQ_VALID,
    ZIL_REPLAY_NEEDED,
};
pub use itx::{Itx, ItxCallback, ItxQueue, WriteState, TXG_SIZE};
pub use parse::{
    walk, BlockVisit, ChainVisitor, NullVisitor, ParseResult, RecordVisit, TypeCounts,
    VisitControl, WalkEnd,
};
pub use pool::{MemoryObjset, Objset, PoolTxgs, TxgSource};
pub use replay::{dispatch, replay_log, DiscardOps, ReplayOps, ReplayOutcome};
pub use writer::{FlushSummary, LwbWriter};
pub use zilog::{claim_all, IntentLog};
