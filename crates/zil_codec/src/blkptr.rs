//! On-disk block pointers.

use crate::error::{CodecError, CodecResult};
use crate::types::Txg;
use bytes::Buf;
use std::fmt;
use zil_storage::BlockLocator;

/// Encoded size of a [`BlockPointer`].
pub const BLKPTR_SIZE: usize = 48;

/// Index of the checksum word that holds a log block's sequence number.
pub const ZC_SEQ: usize = 2;

/// A pointer to a block on the block device.
///
/// A pointer carries the block's locator, logical size, the txg in which
/// it was born and three checksum words. For log blocks the first two words
/// identify the chain and the third is the block sequence number; for data
/// blocks referenced by indirect writes the first word is the data checksum.
///
/// The all-zero pointer is a hole: no block, no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockPointer {
    /// Where the block lives.
    pub locator: BlockLocator,
    /// Logical size in bytes.
    pub lsize: u64,
    /// Transaction group the block was born in.
    pub birth: Txg,
    /// Checksum words.
    pub cksum: [u64; 3],
}

impl BlockPointer {
    /// The hole pointer.
    pub const HOLE: Self = Self {
        locator: BlockLocator::NONE,
        lsize: 0,
        birth: Txg::NONE,
        cksum: [0; 3],
    };

    /// Returns true if this pointer is a hole.
    #[must_use]
    pub const fn is_hole(&self) -> bool {
        self.locator.is_none()
    }

    /// Returns the sequence word of a log block pointer.
    #[must_use]
    pub const fn seq_word(&self) -> u64 {
        self.cksum[ZC_SEQ]
    }

    /// Returns the logical size as a `usize`, saturating on narrow targets.
    #[must_use]
    pub fn size(&self) -> usize {
        usize::try_from(self.lsize).unwrap_or(usize::MAX)
    }

    /// Encodes the pointer as six little-endian words.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; BLKPTR_SIZE] {
        let words = [
            self.locator.as_u64(),
            self.lsize,
            self.birth.as_u64(),
            self.cksum[0],
            self.cksum[1],
            self.cksum[2],
        ];
        let mut out = [0u8; BLKPTR_SIZE];
        for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// Decodes a little-endian pointer from the start of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than [`BLKPTR_SIZE`] bytes are given.
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        let mut buf = bytes
            .get(..BLKPTR_SIZE)
            .ok_or_else(|| CodecError::eof(BLKPTR_SIZE, bytes.len()))?;
        let mut words = [0u64; 6];
        for word in &mut words {
            *word = buf.get_u64_le();
        }
        Ok(Self::from_words(words))
    }

    /// Builds a pointer from six already-decoded words.
    #[must_use]
    pub const fn from_words(words: [u64; 6]) -> Self {
        Self {
            locator: BlockLocator::new(words[0]),
            lsize: words[1],
            birth: Txg::new(words[2]),
            cksum: [words[3], words[4], words[5]],
        }
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hole() {
            return f.write_str("<hole>");
        }
        write!(
            f,
            "DVA[0]={} [L0 ZIL intent log] size={:#x}L birth={}L cksum={:x}:{:x}:{:x}",
            self.locator, self.lsize, self.birth.0, self.cksum[0], self.cksum[1], self.cksum[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hole_is_all_zero() {
        assert!(BlockPointer::HOLE.is_hole());
        assert_eq!(BlockPointer::HOLE.to_bytes(), [0u8; BLKPTR_SIZE]);
        assert_eq!(BlockPointer::default(), BlockPointer::HOLE);
    }

    #[test]
    fn bytes_are_little_endian_words() {
        let bp = BlockPointer {
            locator: BlockLocator::new(0x0102),
            lsize: 4096,
            birth: Txg::new(7),
            cksum: [1, 2, 3],
        };
        let bytes = bp.to_bytes();
        assert_eq!(&bytes[0..8], &0x0102u64.to_le_bytes());
        assert_eq!(&bytes[40..48], &3u64.to_le_bytes());
        assert_eq!(bp.seq_word(), 3);
        assert_eq!(BlockPointer::from_bytes(&bytes).unwrap(), bp);
    }

    #[test]
    fn short_input_rejected() {
        assert_eq!(
            BlockPointer::from_bytes(&[0u8; 40]),
            Err(CodecError::eof(48, 40))
        );
    }

    #[test]
    fn display_hole() {
        assert_eq!(BlockPointer::HOLE.to_string(), "<hole>");
    }
}
