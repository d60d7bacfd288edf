//! Log block chain model.
//!
//! ## Block Layout
//!
//! ```text
//! | records (nused) | zero fill | trailer (80) |
//! ```
//!
//! Trailer:
//!
//! ```text
//! | magic (8) | nused (8) | next block pointer (48) | seq (8) | crc32 (8) |
//! ```
//!
//! The checksum covers the whole block with the checksum slot zeroed,
//! followed by the chain identity and the block sequence. A block pointer
//! to a log block carries the same identity and sequence in its checksum
//! words, so a pointer only matches the one block it was made for.
//!
//! The writer allocates each successor before sealing the current block.
//! A successor that was never written reads back as zeros: that is the
//! clean end of the chain.

use crate::error::{ZilError, ZilResult};
use crc32fast::Hasher;
use rand::Rng;
use std::fmt;
use zil_codec::{BlockPointer, Seq, Txg, BLKPTR_SIZE, ZC_SEQ};
use zil_storage::BlockLocator;

/// Size of the block trailer.
pub const TRAILER_SIZE: usize = 80;

/// Trailer magic, as written by a little-endian host.
pub const BLOCK_MAGIC: u64 = u64::from_be_bytes(*b"ZILBLK01");

const NUSED_OFFSET: usize = 8;
const NEXT_OFFSET: usize = 16;
const SEQ_OFFSET: usize = NEXT_OFFSET + BLKPTR_SIZE;
const CKSUM_OFFSET: usize = SEQ_OFFSET + 8;

const _: () = assert!(CKSUM_OFFSET + 8 == TRAILER_SIZE);

/// Identity shared by every block of one chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChainId(pub [u64; 2]);

impl ChainId {
    /// Draws a fresh random identity.
    #[must_use]
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self([rng.gen(), rng.gen()])
    }

    /// Reads the identity out of a log block pointer.
    #[must_use]
    pub const fn of(bp: &BlockPointer) -> Self {
        Self([bp.cksum[0], bp.cksum[1]])
    }

    /// Builds a pointer to a block of this chain.
    #[must_use]
    pub const fn pointer(self, locator: BlockLocator, size: usize, birth: Txg, seq: Seq) -> BlockPointer {
        BlockPointer {
            locator,
            lsize: size as u64,
            birth,
            cksum: [self.0[0], self.0[1], seq.as_u64()],
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}", self.0[0], self.0[1])
    }
}

/// Decoded block trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTrailer {
    /// Bytes of records at the start of the block.
    pub nused: usize,
    /// Pointer to the successor; a hole ends the chain.
    pub next: BlockPointer,
    /// This block's sequence number.
    pub seq: Seq,
    /// Stored checksum.
    pub checksum: u32,
}

/// Outcome of reading a block back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStatus {
    /// A sealed block whose trailer and checksum verified.
    Valid {
        /// The trailer.
        trailer: BlockTrailer,
        /// The block was written by an opposite-endian host.
        byteswap: bool,
    },
    /// A preallocated block that was never written.
    Unwritten,
}

/// Returns the record space of a block of `block_size` bytes.
#[must_use]
pub const fn max_payload(block_size: usize) -> usize {
    block_size.saturating_sub(TRAILER_SIZE) & !7
}

/// Checksum of a data block referenced by an indirect write.
#[must_use]
pub fn data_checksum(data: &[u8]) -> u64 {
    u64::from(crc32fast::hash(data))
}

/// Accumulates records for one block.
#[derive(Debug, Clone)]
pub struct LogBlockBuilder {
    buf: Vec<u8>,
    nused: usize,
}

impl LogBlockBuilder {
    /// Creates an empty block of `block_size` bytes.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            buf: vec![0u8; block_size],
            nused: 0,
        }
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Bytes of records added so far.
    #[must_use]
    pub fn nused(&self) -> usize {
        self.nused
    }

    /// Returns true if no record was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nused == 0
    }

    /// Record space left.
    #[must_use]
    pub fn remaining(&self) -> usize {
        max_payload(self.buf.len()) - self.nused
    }

    /// Appends an encoded record. Returns false if it does not fit.
    pub fn push(&mut self, record: &[u8]) -> bool {
        if record.len() > self.remaining() {
            return false;
        }
        self.buf[self.nused..self.nused + record.len()].copy_from_slice(record);
        self.nused += record.len();
        true
    }

    /// Writes the trailer and returns the finished block.
    #[must_use]
    pub fn seal(mut self, next: &BlockPointer, seq: Seq, chain: ChainId) -> Vec<u8> {
        seal_block(&mut self.buf, self.nused, next, seq, chain);
        self.buf
    }
}

/// Writes the trailer of `block` in place.
///
/// `block` must be at least [`TRAILER_SIZE`] bytes long.
pub fn seal_block(block: &mut [u8], nused: usize, next: &BlockPointer, seq: Seq, chain: ChainId) {
    let base = block.len() - TRAILER_SIZE;
    let trailer = &mut block[base..];
    trailer[..8].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
    trailer[NUSED_OFFSET..NEXT_OFFSET].copy_from_slice(&(nused as u64).to_le_bytes());
    trailer[NEXT_OFFSET..SEQ_OFFSET].copy_from_slice(&next.to_bytes());
    trailer[SEQ_OFFSET..CKSUM_OFFSET].copy_from_slice(&seq.as_u64().to_le_bytes());
    trailer[CKSUM_OFFSET..].fill(0);
    let cksum = block_checksum(block, chain, seq, false);
    block[base + CKSUM_OFFSET..].copy_from_slice(&u64::from(cksum).to_le_bytes());
}

/// Computes the checksum of a block as stored.
///
/// The checksum slot is treated as zero. `byteswap` selects the byte order
/// in which the chain identity and sequence are mixed in, which must match
/// the host that wrote the block.
#[must_use]
pub fn block_checksum(block: &[u8], chain: ChainId, seq: Seq, byteswap: bool) -> u32 {
    let slot = block.len() - TRAILER_SIZE + CKSUM_OFFSET;
    let mut hasher = Hasher::new();
    hasher.update(&block[..slot]);
    hasher.update(&[0u8; 8]);
    for w in [chain.0[0], chain.0[1], seq.as_u64()] {
        let bytes = if byteswap { w.to_be_bytes() } else { w.to_le_bytes() };
        hasher.update(&bytes);
    }
    hasher.finalize()
}

/// Verifies a block read through `bp`.
///
/// # Errors
///
/// Returns [`ZilError::CorruptBlock`] if the size, magic, checksum,
/// sequence or successor pointer is wrong.
pub fn verify_block(bp: &BlockPointer, block: &[u8]) -> ZilResult<BlockStatus> {
    if block.len() != bp.size() || block.len() < TRAILER_SIZE {
        return Err(ZilError::corrupt_block(format!(
            "block {} is {} bytes, pointer says {}",
            bp.locator,
            block.len(),
            bp.lsize
        )));
    }
    let base = block.len() - TRAILER_SIZE;
    let trailer = &block[base..];
    let magic = word(trailer, 0, false);
    let byteswap = if magic == BLOCK_MAGIC {
        false
    } else if magic == BLOCK_MAGIC.swap_bytes() {
        true
    } else if block.iter().all(|&b| b == 0) {
        return Ok(BlockStatus::Unwritten);
    } else {
        return Err(ZilError::corrupt_block(format!(
            "block {} has bad magic {magic:#018x}",
            bp.locator
        )));
    };

    let mut next_words = [0u64; 6];
    for (i, w) in next_words.iter_mut().enumerate() {
        *w = word(trailer, NEXT_OFFSET + i * 8, byteswap);
    }
    let next = BlockPointer::from_words(next_words);
    let seq = Seq::new(word(trailer, SEQ_OFFSET, byteswap));
    let stored = word(trailer, CKSUM_OFFSET, byteswap);
    let nused = word(trailer, NUSED_OFFSET, byteswap);

    let chain = ChainId::of(bp);
    let computed = block_checksum(block, chain, seq, byteswap);
    if stored != u64::from(computed) {
        return Err(ZilError::corrupt_block(format!(
            "block {} checksum mismatch: stored {stored:#x}, computed {computed:#x}",
            bp.locator
        )));
    }
    if seq.as_u64() != bp.cksum[ZC_SEQ] {
        return Err(ZilError::corrupt_block(format!(
            "block {} carries seq {}, pointer expects {}",
            bp.locator,
            seq.as_u64(),
            bp.cksum[ZC_SEQ]
        )));
    }
    let nused = usize::try_from(nused)
        .ok()
        .filter(|&n| n <= base && n % 8 == 0)
        .ok_or_else(|| {
            ZilError::corrupt_block(format!("block {} has invalid nused {nused}", bp.locator))
        })?;
    let expected = seq.as_u64().checked_add(1);
    if !next.is_hole() && (ChainId::of(&next) != chain || Some(next.seq_word()) != expected) {
        return Err(ZilError::corrupt_block(format!(
            "block {} successor pointer is out of sequence",
            bp.locator
        )));
    }

    Ok(BlockStatus::Valid {
        trailer: BlockTrailer {
            nused,
            next,
            seq,
            checksum: computed,
        },
        byteswap,
    })
}

fn word(buf: &[u8], offset: usize, byteswap: bool) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[offset..offset + 8]);
    if byteswap {
        u64::from_be_bytes(w)
    } else {
        u64::from_le_bytes(w)
    }
}
