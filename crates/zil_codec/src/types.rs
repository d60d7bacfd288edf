//! Identifier types shared by records, headers and the log engine.

use std::fmt;

/// A transaction group number.
///
/// Transaction groups are the epochs in which the pool's main tree commits.
/// Zero means "none" (an unclaimed header, a hole's birth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Txg(pub u64);

impl Txg {
    /// The "no transaction group" value.
    pub const NONE: Self = Self(0);

    /// Creates a new txg.
    #[must_use]
    pub const fn new(txg: u64) -> Self {
        Self(txg)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for [`Txg::NONE`].
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns the following txg.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Txg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txg:{}", self.0)
    }
}

/// A sequence number for log blocks or log records.
///
/// Block and record sequences are independent counters; both increase
/// strictly along a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Seq(pub u64);

impl Seq {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Number of low bits holding the object number.
pub const OBJECT_SHIFT: u32 = 48;

const SLOTS_SHIFT: u32 = 56;

/// An object id as stored in log records.
///
/// The low 48 bits are the object number. The top 8 bits hold the number
/// of dnode slots the object occupies, minus one, so single-slot objects
/// encode exactly as their object number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Creates an object id from its raw on-disk value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Creates an object id for `object` occupying `slots` dnode slots.
    ///
    /// `slots` is clamped to the encodable range 1..=256.
    #[must_use]
    pub const fn with_slots(object: u64, slots: u64) -> Self {
        let slots = if slots == 0 {
            1
        } else if slots > 256 {
            256
        } else {
            slots
        };
        let object = object & ((1u64 << OBJECT_SHIFT) - 1);
        Self(object | ((slots - 1) << SLOTS_SHIFT))
    }

    /// Returns the raw on-disk value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the object number without the slot bits.
    #[must_use]
    pub const fn object(self) -> u64 {
        self.0 & ((1u64 << OBJECT_SHIFT) - 1)
    }

    /// Returns the number of dnode slots.
    #[must_use]
    pub const fn slots(self) -> u64 {
        (self.0 >> SLOTS_SHIFT) + 1
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.object())
    }
}

/// A `(seconds, nanoseconds)` timestamp as logged by create and setattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    /// Seconds since the epoch.
    pub sec: u64,
    /// Nanoseconds within the second.
    pub nsec: u64,
}

impl Timespec {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(sec: u64, nsec: u64) -> Self {
        Self { sec, nsec }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txg_ordering_and_none() {
        assert!(Txg::new(3) < Txg::new(4));
        assert!(Txg::NONE.is_none());
        assert_eq!(Txg::new(9).next(), Txg::new(10));
    }

    #[test]
    fn seq_next() {
        assert_eq!(Seq::new(5).next().as_u64(), 6);
    }

    #[test]
    fn object_id_single_slot_is_plain_number() {
        let oid = ObjectId::with_slots(1234, 1);
        assert_eq!(oid.as_u64(), 1234);
        assert_eq!(oid.object(), 1234);
        assert_eq!(oid.slots(), 1);
    }

    #[test]
    fn object_id_slots_in_top_bits() {
        let oid = ObjectId::with_slots(77, 4);
        assert_eq!(oid.object(), 77);
        assert_eq!(oid.slots(), 4);
        assert_eq!(oid.as_u64() >> 56, 3);
    }

    #[test]
    fn object_id_display() {
        assert_eq!(format!("{}", ObjectId::with_slots(42, 2)), "obj:42");
    }
}
