//! Byte-level layout vectors.
//!
//! Hand-computed encodings of records and headers. They pin the on-disk
//! format: a change to field order, padding or the case-insensitivity bit
//! breaks them. Big-endian copies check decoding with `byteswap`.

use serde::{Deserialize, Serialize};

/// What a vector encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    /// A log record.
    Record,
    /// A log header.
    Header,
}

/// A layout vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestVector {
    /// Unique identifier for this vector.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// What the bytes encode.
    pub kind: VectorKind,
    /// The bytes (hex-encoded).
    pub hex: String,
    /// The bytes were written on an opposite-endian host.
    pub byteswap: bool,
    /// Expected error message fragment (if decoding should fail).
    pub expected_error: Option<String>,
}

impl TestVector {
    fn new(id: &str, description: &str, kind: VectorKind, hex: &str) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            kind,
            hex: hex.into(),
            byteswap: false,
            expected_error: None,
        }
    }

    fn byteswapped(mut self) -> Self {
        self.byteswap = true;
        self
    }

    fn failing(mut self, error: &str) -> Self {
        self.expected_error = Some(error.into());
        self
    }

    /// Decoded bytes.
    ///
    /// # Panics
    ///
    /// Panics if `hex` is not valid hex.
    pub fn bytes(&self) -> Vec<u8> {
        hex_decode(&self.hex).unwrap_or_else(|| panic!("vector {} is not hex", self.id))
    }
}

/// Record vectors.
pub fn record_vectors() -> Vec<TestVector> {
    vec![
        TestVector::new(
            "truncate_le",
            "TX_TRUNCATE obj 7 off 100 len 900, txg 10 seq 3",
            VectorKind::Record,
            "0a00000000000000\
             3800000000000000\
             0a00000000000000\
             0300000000000000\
             0700000000000000\
             6400000000000000\
             8403000000000000",
        ),
        TestVector::new(
            "truncate_be",
            "the same record written big-endian",
            VectorKind::Record,
            "000000000000000a\
             0000000000000038\
             000000000000000a\
             0000000000000003\
             0000000000000007\
             0000000000000064\
             0000000000000384",
        )
        .byteswapped(),
        TestVector::new(
            "remove_ci",
            "case-insensitive TX_REMOVE of \"a\" in dir 4, txg 5 seq 1, padded to 48 bytes",
            VectorKind::Record,
            "0500000000000080\
             3000000000000000\
             0500000000000000\
             0100000000000000\
             0400000000000000\
             6100000000000000",
        ),
        TestVector::new(
            "truncate_short_reclen",
            "TX_TRUNCATE claiming a 40-byte record",
            VectorKind::Record,
            "0a00000000000000\
             2800000000000000\
             0a00000000000000\
             0300000000000000\
             0700000000000000",
        )
        .failing("below its minimum"),
        TestVector::new(
            "commit_marker",
            "type 0 never appears in a log block",
            VectorKind::Record,
            "0000000000000000\
             2000000000000000\
             0a00000000000000\
             0300000000000000",
        )
        .failing("commit"),
    ]
}

/// Header vectors.
pub fn header_vectors() -> Vec<TestVector> {
    let mut claimed = String::new();
    claimed.push_str("0c00000000000000"); // claim txg 12
    claimed.push_str("0000000000000000"); // replay seq
    claimed.push_str(&"00".repeat(48)); // hole
    claimed.push_str("0200000000000000"); // claim blk seq 2
    claimed.push_str("0300000000000000"); // flags
    claimed.push_str("0900000000000000"); // claim lr seq 9
    claimed.push_str(&"00".repeat(168 - 88));
    claimed.push_str("0100000000000000"); // kind lwb
    claimed.push_str(&"00".repeat(16));

    let mut unknown = "00".repeat(168);
    unknown.push_str("0700000000000000");
    unknown.push_str(&"00".repeat(16));

    vec![
        TestVector::new(
            "header_claimed",
            "claimed chain header with both flags set and an empty chain",
            VectorKind::Header,
            &claimed,
        ),
        TestVector::new(
            "header_unknown_kind",
            "kind tag 7 is not in the table",
            VectorKind::Header,
            &unknown,
        )
        .failing("kind tag 7"),
    ]
}

/// All vectors.
pub fn all_vectors() -> Vec<TestVector> {
    let mut vectors = record_vectors();
    vectors.extend(header_vectors());
    vectors
}

/// Serializes every vector as pretty JSON, for consumption by other
/// implementations of the format.
///
/// # Errors
///
/// Returns the serializer error.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&all_vectors())
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes lowercase or uppercase hex; `None` on odd length or a bad digit.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use zil_codec::{decode_record, LogRecord, Seq, Txg};
    use zil_core::{LwbHeader, ZilHeader, ZIL_CLAIM_LR_SEQ_VALID, ZIL_REPLAY_NEEDED};

    fn find(id: &str) -> TestVector {
        all_vectors()
            .into_iter()
            .find(|v| v.id == id)
            .unwrap_or_else(|| panic!("no vector {id}"))
    }

    fn truncate() -> LogRecord {
        crate::records::truncate(7, 100, 900)
            .with_txg(Txg::new(10))
            .with_seq(Seq::new(3))
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_encode(&[0x00, 0xAB, 0x7f]), "00ab7f");
        assert_eq!(hex_decode("00AB7f"), Some(vec![0x00, 0xAB, 0x7F]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }

    #[test]
    fn truncate_layout() {
        let v = find("truncate_le");
        assert_eq!(hex_encode(&truncate().encode().unwrap()), v.hex);
        assert_eq!(decode_record(&v.bytes(), false).unwrap(), truncate());
    }

    #[test]
    fn byteswapped_truncate_decodes() {
        let v = find("truncate_be");
        assert!(v.byteswap);
        assert_eq!(decode_record(&v.bytes(), true).unwrap(), truncate());
        assert!(decode_record(&v.bytes(), false).is_err());
    }

    #[test]
    fn case_insensitive_remove_layout() {
        let v = find("remove_ci");
        let record = crate::records::remove(4, "a")
            .case_insensitive(true)
            .with_txg(Txg::new(5))
            .with_seq(Seq::new(1));
        assert_eq!(hex_encode(&record.encode().unwrap()), v.hex);
        assert_eq!(decode_record(&v.bytes(), false).unwrap(), record);
    }

    #[test]
    fn failing_record_vectors() {
        for v in record_vectors().into_iter().filter(|v| v.expected_error.is_some()) {
            let err = decode_record(&v.bytes(), v.byteswap).unwrap_err();
            let expected = v.expected_error.as_deref().unwrap();
            assert!(
                err.to_string().contains(expected),
                "{}: {err} lacks {expected:?}",
                v.id
            );
        }
    }

    #[test]
    fn header_layout() {
        let v = find("header_claimed");
        let header = ZilHeader::Lwb(LwbHeader {
            claim_txg: Txg::new(12),
            claim_blk_seq: Seq::new(2),
            claim_lr_seq: Seq::new(9),
            flags: ZIL_REPLAY_NEEDED | ZIL_CLAIM_LR_SEQ_VALID,
            ..LwbHeader::default()
        });
        assert_eq!(hex_encode(&header.to_bytes()), v.hex);
        assert_eq!(ZilHeader::from_bytes(&v.bytes()).unwrap(), header);
    }

    #[test]
    fn unknown_kind_vector() {
        let v = find("header_unknown_kind");
        let err = ZilHeader::from_bytes(&v.bytes()).unwrap_err();
        assert!(err.to_string().contains("kind tag 7"));
    }

    #[test]
    fn vectors_serialize() {
        let json = vectors_json().unwrap();
        let parsed: Vec<TestVector> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), all_vectors().len());
        assert_eq!(parsed[0].kind, VectorKind::Record);
    }
}
