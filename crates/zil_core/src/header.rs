//! Log header and kind negotiation.
//!
//! ## Header Layout
//!
//! ```text
//! | kind body (168) | kind tag (8) | reserved (16) |
//! ```
//!
//! Every kind serialises into the same [`HEADER_SIZE`]. The tag is read
//! first; an unknown tag is rejected before the body is looked at.
//!
//! ## Block-chain body
//!
//! ```text
//! | claim_txg (8) | replay_seq (8) | log (48) | claim_blk_seq (8) | flags (8) | claim_lr_seq (8) | zero |
//! ```

use crate::error::{ZilError, ZilResult};
use std::fmt;
use std::str::FromStr;
use zil_codec::{BlockPointer, Seq, Txg, BLKPTR_SIZE};

/// Serialized size of every header.
pub const HEADER_SIZE: usize = 192;

/// Size of the kind-specific body.
pub const HEADER_BODY_SIZE: usize = 168;

const KIND_OFFSET: usize = HEADER_BODY_SIZE;
const LWB_BODY_SIZE: usize = 8 + 8 + BLKPTR_SIZE + 8 + 8 + 8;
const PMEM_WORDS: usize = HEADER_BODY_SIZE / 8;

const _: () = assert!(KIND_OFFSET + 8 + 16 == HEADER_SIZE);
const _: () = assert!(LWB_BODY_SIZE <= HEADER_BODY_SIZE);
const _: () = assert!(PMEM_WORDS * 8 == HEADER_BODY_SIZE);

/// Replay is required: the claimed log holds records not yet replayed.
pub const ZIL_REPLAY_NEEDED: u64 = 0x1;

/// `claim_blk_seq` and `claim_lr_seq` bound the claimed range.
pub const ZIL_CLAIM_LR_SEQ_VALID: u64 = 0x2;

/// Log layout kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u64)]
pub enum ZilKind {
    /// Never initialised.
    #[default]
    Uninit = 0,
    /// Chain of log write blocks.
    Lwb = 1,
    /// Persistent-memory log. Known, but not parsed by this engine.
    Pmem = 2,
}

impl ZilKind {
    /// All known kinds in tag order.
    pub const ALL: [ZilKind; 3] = [ZilKind::Uninit, ZilKind::Lwb, ZilKind::Pmem];

    /// Resolves an on-disk tag.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidKind`] for unknown tags.
    pub fn from_tag(tag: u64) -> ZilResult<Self> {
        match tag {
            0 => Ok(Self::Uninit),
            1 => Ok(Self::Lwb),
            2 => Ok(Self::Pmem),
            _ => Err(ZilError::InvalidKind { tag }),
        }
    }

    /// Returns the on-disk tag.
    #[must_use]
    pub const fn tag(self) -> u64 {
        self as u64
    }

    /// Returns the kind's name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninit => "uninit",
            Self::Lwb => "lwb",
            Self::Pmem => "pmem",
        }
    }
}

impl fmt::Display for ZilKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZilKind {
    type Err = ZilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ZilError::invalid_operation(format!("unknown log kind '{s}'")))
    }
}

/// Header body of a block-chain log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LwbHeader {
    /// Txg in which the log was claimed; zero if unclaimed.
    pub claim_txg: Txg,
    /// Highest record sequence already replayed.
    pub replay_seq: Seq,
    /// First block of the chain; a hole means the log is empty.
    pub log: BlockPointer,
    /// Highest block sequence claimed.
    pub claim_blk_seq: Seq,
    /// Flag bits (`ZIL_*`).
    pub flags: u64,
    /// Highest record sequence claimed.
    pub claim_lr_seq: Seq,
}

impl LwbHeader {
    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_hole()
    }

    /// Returns true once the log has been claimed.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        !self.claim_txg.is_none()
    }

    /// Returns true if claimed records still await replay.
    #[must_use]
    pub fn replay_needed(&self) -> bool {
        self.flags & ZIL_REPLAY_NEEDED != 0
    }

    /// Returns the claimed-range bound, if one is recorded.
    #[must_use]
    pub fn claim_bound(&self) -> Option<(Seq, Seq)> {
        (self.flags & ZIL_CLAIM_LR_SEQ_VALID != 0).then_some((self.claim_blk_seq, self.claim_lr_seq))
    }

    /// Resets the header to an empty, unclaimed log.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn encode_into(&self, body: &mut [u8]) {
        put(body, 0, self.claim_txg.as_u64());
        put(body, 8, self.replay_seq.as_u64());
        body[16..16 + BLKPTR_SIZE].copy_from_slice(&self.log.to_bytes());
        put(body, 64, self.claim_blk_seq.as_u64());
        put(body, 72, self.flags);
        put(body, 80, self.claim_lr_seq.as_u64());
    }

    fn decode(body: &[u8]) -> ZilResult<Self> {
        Ok(Self {
            claim_txg: Txg::new(word(body, 0)),
            replay_seq: Seq::new(word(body, 8)),
            log: BlockPointer::from_bytes(&body[16..16 + BLKPTR_SIZE])?,
            claim_blk_seq: Seq::new(word(body, 64)),
            flags: word(body, 72),
            claim_lr_seq: Seq::new(word(body, 80)),
        })
    }
}

/// Header body of a persistent-memory log, kept opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PmemHeader {
    /// Raw body words.
    pub words: [u64; PMEM_WORDS],
}

/// A log header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZilHeader {
    /// Never initialised.
    #[default]
    Uninit,
    /// Block-chain log.
    Lwb(LwbHeader),
    /// Persistent-memory log.
    Pmem(PmemHeader),
}

impl ZilHeader {
    /// An empty block-chain header.
    #[must_use]
    pub fn empty_lwb() -> Self {
        Self::Lwb(LwbHeader::default())
    }

    /// Returns the header's kind.
    #[must_use]
    pub const fn kind(&self) -> ZilKind {
        match self {
            Self::Uninit => ZilKind::Uninit,
            Self::Lwb(_) => ZilKind::Lwb,
            Self::Pmem(_) => ZilKind::Pmem,
        }
    }

    /// Returns the block-chain body, if this is one.
    #[must_use]
    pub fn lwb(&self) -> Option<&LwbHeader> {
        match self {
            Self::Lwb(h) => Some(h),
            _ => None,
        }
    }

    /// Returns the mutable block-chain body, if this is one.
    pub fn lwb_mut(&mut self) -> Option<&mut LwbHeader> {
        match self {
            Self::Lwb(h) => Some(h),
            _ => None,
        }
    }

    /// Serializes the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        match self {
            Self::Uninit => {}
            Self::Lwb(h) => h.encode_into(&mut out[..HEADER_BODY_SIZE]),
            Self::Pmem(p) => {
                for (i, w) in p.words.iter().enumerate() {
                    put(&mut out, i * 8, *w);
                }
            }
        }
        put(&mut out, KIND_OFFSET, self.kind().tag());
        out
    }

    /// Deserializes a header.
    ///
    /// # Errors
    ///
    /// Returns [`ZilError::InvalidKind`] for an unknown tag and
    /// [`ZilError::CorruptBlock`] if `bytes` is not [`HEADER_SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> ZilResult<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(ZilError::corrupt_block(format!(
                "header is {} bytes, expected {HEADER_SIZE}",
                bytes.len()
            )));
        }
        let body = &bytes[..HEADER_BODY_SIZE];
        match ZilKind::from_tag(word(bytes, KIND_OFFSET))? {
            ZilKind::Uninit => Ok(Self::Uninit),
            ZilKind::Lwb => Ok(Self::Lwb(LwbHeader::decode(body)?)),
            ZilKind::Pmem => {
                let mut words = [0u64; PMEM_WORDS];
                for (i, w) in words.iter_mut().enumerate() {
                    *w = word(body, i * 8);
                }
                Ok(Self::Pmem(PmemHeader { words }))
            }
        }
    }
}

impl fmt::Display for ZilHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lwb(h) => write!(
                f,
                "ZIL header: claim_txg {}, claim_blk_seq {}, claim_lr_seq {} replay_seq {}, flags {:#x}",
                h.claim_txg.as_u64(),
                h.claim_blk_seq.as_u64(),
                h.claim_lr_seq.as_u64(),
                h.replay_seq.as_u64(),
                h.flags
            ),
            other => write!(f, "ZIL header: kind {}", other.kind()),
        }
    }
}

fn put(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn word(buf: &[u8], offset: usize) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zil_storage::BlockLocator;

    fn claimed() -> LwbHeader {
        LwbHeader {
            claim_txg: Txg::new(42),
            replay_seq: Seq::new(7),
            log: BlockPointer {
                locator: BlockLocator::new(0x4000),
                lsize: 4096,
                birth: Txg::new(40),
                cksum: [0xAA, 0xBB, 1],
            },
            claim_blk_seq: Seq::new(3),
            flags: ZIL_REPLAY_NEEDED | ZIL_CLAIM_LR_SEQ_VALID,
            claim_lr_seq: Seq::new(19),
        }
    }

    #[test]
    fn every_kind_round_trips_at_fixed_size() {
        let headers = [
            ZilHeader::Uninit,
            ZilHeader::Lwb(claimed()),
            ZilHeader::Pmem(PmemHeader {
                words: std::array::from_fn(|i| i as u64 * 3),
            }),
        ];
        for header in headers {
            let bytes = header.to_bytes();
            assert_eq!(bytes.len(), HEADER_SIZE);
            assert_eq!(ZilHeader::from_bytes(&bytes).unwrap(), header);
        }
    }

    #[test]
    fn unknown_tag_rejected() {
        let mut bytes = ZilHeader::Lwb(claimed()).to_bytes();
        bytes[KIND_OFFSET..KIND_OFFSET + 8].copy_from_slice(&9u64.to_le_bytes());
        assert!(matches!(
            ZilHeader::from_bytes(&bytes),
            Err(ZilError::InvalidKind { tag: 9 })
        ));
    }

    #[test]
    fn wrong_size_rejected() {
        assert!(matches!(
            ZilHeader::from_bytes(&[0u8; 100]),
            Err(ZilError::CorruptBlock { .. })
        ));
    }

    #[test]
    fn kind_tags_and_names() {
        for kind in ZilKind::ALL {
            assert_eq!(ZilKind::from_tag(kind.tag()).unwrap(), kind);
            assert_eq!(kind.as_str().parse::<ZilKind>().unwrap(), kind);
        }
        assert_eq!("LWB".parse::<ZilKind>().unwrap(), ZilKind::Lwb);
        assert!("zfs".parse::<ZilKind>().is_err());
        assert!(ZilKind::from_tag(3).is_err());
    }

    #[test]
    fn flags_and_bounds() {
        let mut h = claimed();
        assert!(h.is_claimed());
        assert!(h.replay_needed());
        assert_eq!(h.claim_bound(), Some((Seq::new(3), Seq::new(19))));
        h.flags = 0;
        assert_eq!(h.claim_bound(), None);
        h.reset();
        assert!(h.is_empty());
        assert!(!h.is_claimed());
    }

    #[test]
    fn display_lists_claim_fields() {
        let text = ZilHeader::Lwb(claimed()).to_string();
        assert!(text.starts_with("ZIL header: claim_txg 42, claim_blk_seq 3"));
        assert_eq!(ZilHeader::Uninit.to_string(), "ZIL header: kind uninit");
    }
}
