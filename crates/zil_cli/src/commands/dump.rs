//! Dump command: prints the header, blocks and records of a log.
//!
//! Detail grows with the level (`-i` repeated):
//!
//! | level | output                                              |
//! |-------|-----------------------------------------------------|
//! | 1     | header line                                         |
//! | 2     | one line per record, per-type statistics            |
//! | 3     | record details, every statistics row                |
//! | 4     | one line per block with its claim status            |
//! | 5     | block pointers, write payloads (first 20 bytes)     |
//! | 6     | whole write payloads                                |

use super::inspect::HeaderInfo;
use super::{CliResult, Format, LogImage, PoolArgs};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use zil_codec::{
    attr, AclCreateBody, CreateBody, LogRecord, RecordBody, SetattrBody, TxType, Txg, WriteBody,
    ACE_V0_SIZE, TX_MAX_TYPE,
};
use zil_core::{
    walk, BlockVisit, ChainVisitor, ClaimDisposition, Objset, RecordVisit, TxgSource,
    VisitControl, ZilHeader, ZilResult,
};
use zil_storage::{BlockDevice, IoPriority};

/// Width of the type name column.
const NAME_WIDTH: usize = 19;

/// One record.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Type name.
    pub txtype: &'static str,
    /// Case-insensitive flag.
    pub ci: bool,
    /// Record length.
    pub reclen: u64,
    /// Txg.
    pub txg: u64,
    /// Sequence.
    pub seq: u64,
    /// Detail lines (level 3 and up).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<String>,
}

/// One block.
#[derive(Debug, Serialize)]
pub struct BlockInfo {
    /// Block sequence.
    pub seq: u64,
    /// Claim status.
    pub claim: &'static str,
    /// Pointer the block was reached through.
    pub pointer: String,
    /// Records in the block.
    pub records: Vec<RecordInfo>,
}

/// Records of one type.
#[derive(Debug, Serialize)]
pub struct TypeStat {
    /// Type name.
    pub txtype: &'static str,
    /// Count.
    pub count: u64,
}

/// Everything a dump found.
#[derive(Debug, Serialize)]
pub struct DumpReport {
    /// Object set id.
    pub objset: u64,
    /// Header fields.
    pub header: HeaderInfo,
    /// The header's kind can be dumped.
    pub supported: bool,
    /// The header points at no chain.
    pub empty: bool,
    /// Why the chain was not walked, if it was not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<&'static str>,
    /// Blocks in chain order.
    pub blocks: Vec<BlockInfo>,
    /// Per-type counts, `Total` first.
    pub stats: Vec<TypeStat>,
    /// Why the walk stopped.
    pub end: &'static str,
    /// Error that halted the walk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DumpReport {
    /// Total number of records.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.stats.first().map_or(0, |s| s.count)
    }
}

struct DumpVisitor<'a> {
    device: &'a dyn BlockDevice,
    min_claim_txg: Txg,
    claim_txg: Txg,
    encrypted: bool,
    level: u8,
    blocks: Vec<BlockInfo>,
}

impl ChainVisitor for DumpVisitor<'_> {
    fn visit_block(&mut self, block: &BlockVisit) -> ZilResult<VisitControl> {
        let claim = if block.claim_txg.is_none() {
            ClaimDisposition::of_block(&block.bp, self.min_claim_txg).as_str()
        } else {
            "already claimed"
        };
        self.blocks.push(BlockInfo {
            seq: block.bp.seq_word(),
            claim,
            pointer: block.bp.to_string(),
            records: Vec::new(),
        });
        Ok(VisitControl::Continue)
    }

    fn visit_record(&mut self, visit: &RecordVisit<'_>) -> ZilResult<VisitControl> {
        let detail = match visit.record {
            _ if self.level < 3 => Vec::new(),
            Some(record) if !self.encrypted => self.detail(record),
            _ => vec!["(encrypted)".to_string()],
        };
        let info = RecordInfo {
            txtype: visit.header.txtype.name(),
            ci: visit.header.case_insensitive,
            reclen: visit.header.reclen,
            txg: visit.header.txg.as_u64(),
            seq: visit.header.seq.as_u64(),
            detail,
        };
        if let Some(block) = self.blocks.last_mut() {
            block.records.push(info);
        }
        Ok(VisitControl::Continue)
    }
}

impl DumpVisitor<'_> {
    fn detail(&self, record: &LogRecord) -> Vec<String> {
        match &record.body {
            RecordBody::Create(body) => create_detail(record.txtype, body),
            RecordBody::CreateAcl(AclCreateBody { create, .. }) => {
                create_detail(record.txtype, create)
            }
            RecordBody::Remove(body) => vec![format!(
                "doid {}, name {}",
                body.doid.as_u64(),
                lossy(&body.name)
            )],
            RecordBody::Link(body) => vec![format!(
                "doid {}, link_obj {}, name {}",
                body.doid.as_u64(),
                body.link_obj.as_u64(),
                lossy(&body.name)
            )],
            RecordBody::Rename(body) => vec![
                format!(
                    "sdoid {}, tdoid {}",
                    body.sdoid.as_u64(),
                    body.tdoid.as_u64()
                ),
                format!("src {} tgt {}", lossy(&body.src), lossy(&body.tgt)),
            ],
            RecordBody::Write(body) => self.write_detail(record.txtype, body),
            RecordBody::Truncate(body) => vec![format!(
                "foid {}, offset {:#x}, length {:#x}",
                body.foid.as_u64(),
                body.offset,
                body.length
            )],
            RecordBody::Setattr(body) => setattr_detail(body),
            RecordBody::AclV0(body) => vec![format!(
                "foid {}, aclcnt {}",
                body.foid.as_u64(),
                body.aces.len() / ACE_V0_SIZE
            )],
            RecordBody::Acl(body) => vec![format!(
                "foid {}, aclcnt {}",
                body.foid.as_u64(),
                body.acl.aclcnt
            )],
        }
    }

    fn write_detail(&self, txtype: TxType, body: &WriteBody) -> Vec<String> {
        let mut lines = vec![format!(
            "foid {}, offset {:x}, length {:x}",
            body.foid.as_u64(),
            body.offset,
            body.length
        )];
        if txtype == TxType::Write2 || self.level < 5 {
            return lines;
        }

        let data = if body.is_indirect() {
            let bp = &body.blkptr;
            let claim = if !bp.is_hole() && bp.birth >= self.min_claim_txg {
                "will claim"
            } else {
                "won't claim"
            };
            lines.push(format!("has blkptr, {claim}"));
            lines.push(bp.to_string());
            if bp.is_hole() {
                lines.push(format!("LSIZE {:#x}", bp.lsize));
                lines.push("<hole>".to_string());
                return lines;
            }
            if bp.birth < self.claim_txg {
                lines.push("<block already committed>".to_string());
                return lines;
            }
            match self.device.read_block(bp.locator, bp.size(), IoPriority::SyncRead) {
                Ok(data) => data,
                Err(_) => return lines,
            }
        } else {
            body.data.clone()
        };

        let limit = if self.level < 6 { 20 } else { data.len() };
        let shown = usize::try_from(body.length).map_or(limit, |len| len.min(limit));
        lines.push(printable(&data[..shown.min(data.len())]));
        lines
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn printable(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for &b in data {
        if b.is_ascii_graphic() || b == b' ' {
            let _ = write!(out, "{} ", b as char);
        } else {
            let _ = write!(out, "{b:2X}");
        }
    }
    out
}

fn create_detail(txtype: TxType, body: &CreateBody) -> Vec<String> {
    let mut lines = Vec::new();
    match txtype {
        TxType::Symlink => lines.push(format!(
            "{} -> {}",
            lossy(&body.name),
            lossy(body.link.as_deref().unwrap_or_default())
        )),
        TxType::Mkxattr => {}
        _ => lines.push(lossy(&body.name)),
    }
    lines.push(format!("crtime {}.{:09}", body.crtime.sec, body.crtime.nsec));
    lines.push(format!(
        "doid {}, foid {}, slots {}, mode {:o}",
        body.doid.as_u64(),
        body.foid.object(),
        body.foid.slots(),
        body.mode
    ));
    lines.push(format!(
        "uid {}, gid {}, gen {}, rdev {:#x}",
        body.uid, body.gid, body.gen, body.rdev
    ));
    lines
}

fn setattr_detail(body: &SetattrBody) -> Vec<String> {
    let mut lines = vec![format!("foid {}, mask {:#x}", body.foid.as_u64(), body.mask)];
    if body.mask & attr::AT_MODE != 0 {
        lines.push(format!("AT_MODE  {:o}", body.mode));
    }
    if body.mask & attr::AT_UID != 0 {
        lines.push(format!("AT_UID   {}", body.uid));
    }
    if body.mask & attr::AT_GID != 0 {
        lines.push(format!("AT_GID   {}", body.gid));
    }
    if body.mask & attr::AT_SIZE != 0 {
        lines.push(format!("AT_SIZE  {}", body.size));
    }
    if body.mask & attr::AT_ATIME != 0 {
        lines.push(format!("AT_ATIME {}.{:09}", body.atime.sec, body.atime.nsec));
    }
    if body.mask & attr::AT_MTIME != 0 {
        lines.push(format!("AT_MTIME {}.{:09}", body.mtime.sec, body.mtime.nsec));
    }
    lines
}

/// Walks the log described by `header` and collects what a dump shows.
#[must_use]
pub fn dump_log(
    device: &dyn BlockDevice,
    pool: &dyn TxgSource,
    objset: &dyn Objset,
    header: &ZilHeader,
    level: u8,
) -> DumpReport {
    let info = HeaderInfo::from_header(header);
    let mut report = DumpReport {
        objset: objset.id(),
        supported: header.lwb().is_some(),
        empty: header.lwb().map_or(true, |h| h.log.is_hole()),
        header: info,
        skipped: None,
        blocks: Vec::new(),
        stats: Vec::new(),
        end: "hole",
        error: None,
    };
    let Some(lwb) = header.lwb() else {
        return report;
    };
    if report.empty {
        return report;
    }
    if !pool.checkpoint_txg().is_none() && !lwb.is_claimed() {
        report.skipped = Some("pool has a checkpoint and the log is unclaimed");
        return report;
    }

    let mut visitor = DumpVisitor {
        device,
        min_claim_txg: pool.min_claim_txg(),
        claim_txg: lwb.claim_txg,
        encrypted: objset.is_encrypted(),
        level,
        blocks: Vec::new(),
    };
    let result = walk(
        device,
        pool,
        objset,
        header,
        &mut visitor,
        false,
        IoPriority::SyncRead,
    );
    report.blocks = visitor.blocks;
    report.end = result.end.as_str();
    report.error = result.error.as_ref().map(ToString::to_string);
    report.stats.push(TypeStat {
        txtype: "Total",
        count: result.lr_count,
    });
    for txtype in TxType::ALL.into_iter().skip(1) {
        report.stats.push(TypeStat {
            txtype: txtype.name(),
            count: result.counts.get(txtype),
        });
    }
    debug_assert_eq!(report.stats.len(), TX_MAX_TYPE);
    report
}

/// Renders a report the way it is printed.
#[must_use]
pub fn render_text(report: &DumpReport, level: u8) -> String {
    let mut out = String::new();
    if !report.supported {
        let _ = writeln!(
            out,
            "\n    ZIL kind {} dump not supported",
            report.header.kind_tag
        );
        return out;
    }
    if report.empty || level < 1 {
        return out;
    }
    let h = &report.header;
    let _ = writeln!(
        out,
        "\n    ZIL header: claim_txg {}, claim_blk_seq {}, claim_lr_seq {} replay_seq {}, flags {:#x}",
        h.claim_txg, h.claim_blk_seq, h.claim_lr_seq, h.replay_seq, h.flags
    );
    if report.skipped.is_some() || level < 2 {
        return out;
    }

    out.push('\n');
    for block in &report.blocks {
        if level > 3 {
            let pointer = if level >= 5 {
                format!(", {}", block.pointer)
            } else {
                String::new()
            };
            let _ = writeln!(out, "\tBlock seqno {}, {}{}", block.seq, block.claim, pointer);
        }
        for record in &block.records {
            let _ = writeln!(
                out,
                "\t\t{}{:<name$} len {:6}, txg {}, seq {}",
                if record.ci { "CI-" } else { "" },
                record.txtype,
                record.reclen,
                record.txg,
                record.seq,
                name = NAME_WIDTH,
            );
            for line in &record.detail {
                let _ = writeln!(out, "\t\t\t{line}");
            }
        }
    }
    render_stats(&mut out, report, level);
    if let Some(error) = &report.error {
        let _ = writeln!(out, "    log walk halted: {error}");
    }
    out
}

fn render_stats(out: &mut String, report: &DumpReport, level: u8) {
    if level > 3 {
        out.push('\n');
    }
    let total = report.total();
    if total == 0 {
        return;
    }
    let width = total.to_string().len();
    for stat in &report.stats {
        if stat.count > 0 || level >= 3 {
            let _ = writeln!(
                out,
                "\t\t{:<name$} {:>width$}",
                stat.txtype,
                stat.count,
                name = NAME_WIDTH,
            );
        }
    }
    out.push('\n');
}

/// Runs the dump command.
///
/// # Errors
///
/// Returns image open or output errors. A damaged chain is not an error
/// here: what was readable is printed, followed by the error.
pub fn run(path: &Path, pool: &PoolArgs, level: u8, format: Format) -> CliResult<()> {
    let image = LogImage::open(path, pool)?;
    let report = dump_log(
        &image.device,
        &image.pool,
        &image.objset,
        &image.header,
        level,
    );
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => print!("{}", render_text(&report, level)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::{image_with_records, save_header};
    use zil_core::{PmemHeader, ZilHeader};

    fn dump(dir: &Path, args: &PoolArgs, level: u8) -> (DumpReport, String) {
        let image = LogImage::open(dir, args).unwrap();
        let report = dump_log(&image.device, &image.pool, &image.objset, &image.header, level);
        let text = render_text(&report, level);
        (report, text)
    }

    #[test]
    fn records_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let (report, text) = dump(dir.path(), &PoolArgs::default(), 2);
        assert_eq!(report.total(), 4);
        assert_eq!(report.end, "unwritten block");
        assert!(text.contains("ZIL header: claim_txg 0, claim_blk_seq 0, claim_lr_seq 0 replay_seq 0, flags 0x0"));
        assert!(text.contains("\t\tTX_CREATE           len "));
        assert!(text.contains(", txg 10, seq 1\n"));
        assert!(text.contains("\t\tTotal               4\n"));
        assert!(text.contains("\t\tTX_REMOVE           1\n"));
        assert!(!text.contains("TX_RENAME"));
        assert!(!text.contains("Block seqno"));
    }

    #[test]
    fn block_lines_and_details() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let args = PoolArgs {
            min_claim_txg: 10,
            ..PoolArgs::default()
        };
        let (_, text) = dump(dir.path(), &args, 5);
        assert!(text.contains("\tBlock seqno 1, will claim, DVA[0]="));
        assert!(text.contains("\t\t\tnotes.txt\n"));
        assert!(text.contains("\t\t\tdoid 4, foid 9, slots 1, mode 100644\n"));
        assert!(text.contains("\t\t\tfoid 9, offset 0, length 5\n"));
        assert!(text.contains("\t\t\th e l l o \n"));
        assert!(text.contains("\t\t\tfoid 9, offset 0x2, length 0x3\n"));
        assert!(text.contains("\t\tTX_RENAME           0\n"));
    }

    #[test]
    fn blocks_before_boundary_are_not_claimed() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let args = PoolArgs {
            min_claim_txg: 11,
            ..PoolArgs::default()
        };
        let (_, text) = dump(dir.path(), &args, 4);
        assert!(text.contains("\tBlock seqno 1, won't claim\n"));
    }

    #[test]
    fn encrypted_objset_hides_details() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let args = PoolArgs {
            encrypted: true,
            ..PoolArgs::default()
        };
        let (report, text) = dump(dir.path(), &args, 3);
        assert_eq!(report.total(), 4);
        assert!(text.contains("\t\t\t(encrypted)\n"));
        assert!(!text.contains("notes.txt"));
    }

    #[test]
    fn checkpoint_skips_unclaimed_log() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let args = PoolArgs {
            checkpoint_txg: 8,
            ..PoolArgs::default()
        };
        let (report, text) = dump(dir.path(), &args, 4);
        assert!(report.skipped.is_some());
        assert!(report.blocks.is_empty());
        assert!(text.contains("ZIL header:"));
        assert!(!text.contains("Block seqno"));
    }

    #[test]
    fn unsupported_kind() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        save_header(dir.path(), &ZilHeader::Pmem(PmemHeader::default()));
        let (report, text) = dump(dir.path(), &PoolArgs::default(), 3);
        assert!(!report.supported);
        assert_eq!(text, "\n    ZIL kind 2 dump not supported\n");
    }

    #[test]
    fn empty_log_prints_nothing() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        save_header(dir.path(), &ZilHeader::empty_lwb());
        let (report, text) = dump(dir.path(), &PoolArgs::default(), 6);
        assert!(report.empty);
        assert!(text.is_empty());
    }

    #[test]
    fn printable_bytes() {
        assert_eq!(printable(b"ab"), "a b ");
        assert_eq!(printable(&[0x01, b'z']), " 1z ");
    }

    #[test]
    fn json_report_serializes() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let (report, _) = dump(dir.path(), &PoolArgs::default(), 3);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["header"]["kind"], "lwb");
        assert_eq!(json["blocks"][0]["records"].as_array().unwrap().len(), 4);
        assert_eq!(json["stats"][0]["count"], 4);
    }
}
