//! Benchmark utilities, shared by the bench targets through `#[path]`.

#![allow(dead_code)]

use rand::Rng;
use zil_codec::{LogRecord, Seq, Txg};
use zil_testkit::records;

/// Generate random payload data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Inline write of `size` random bytes, numbered like a record in a chain.
pub fn write_record(oid: u64, size: usize, seq: u64) -> LogRecord {
    records::write(oid, seq * size as u64, &random_data(size))
        .with_txg(Txg::new(10))
        .with_seq(Seq::new(seq))
}

/// A namespace-heavy mix of records: create, write, rename, setattr and
/// remove per file.
pub fn mixed_records(files: usize) -> Vec<LogRecord> {
    let mut out = Vec::with_capacity(files * 5);
    for i in 0..files as u64 {
        let name = format!("file-{i}");
        let foid = 1000 + i;
        out.push(records::create(4, &name, foid));
        out.push(records::write(foid, 0, &random_data(128)));
        out.push(records::rename(4, &name, 4, &format!("{name}.moved")));
        out.push(records::setattr_mode(foid, 0o600));
        out.push(records::remove(4, &format!("{name}.moved")));
    }
    out
}
