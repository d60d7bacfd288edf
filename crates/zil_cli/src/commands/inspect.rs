//! Inspect command: prints the header of a log image.

use super::{CliResult, Format, LogImage, PoolArgs};
use serde::Serialize;
use std::path::Path;
use zil_core::{ZilHeader, ZIL_CLAIM_LR_SEQ_VALID, ZIL_REPLAY_NEEDED};

/// Header fields for output.
#[derive(Debug, Serialize)]
pub struct HeaderInfo {
    /// Kind name.
    pub kind: &'static str,
    /// Kind tag as stored.
    pub kind_tag: u64,
    /// First block pointer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Claim txg.
    pub claim_txg: u64,
    /// Highest claimed block sequence.
    pub claim_blk_seq: u64,
    /// Highest claimed record sequence.
    pub claim_lr_seq: u64,
    /// Last replayed record sequence.
    pub replay_seq: u64,
    /// Raw flags.
    pub flags: u64,
    /// Names of the set flags.
    pub flag_names: Vec<&'static str>,
}

impl HeaderInfo {
    /// Extracts the printable fields of `header`.
    #[must_use]
    pub fn from_header(header: &ZilHeader) -> Self {
        let kind = header.kind();
        let mut info = Self {
            kind: kind.as_str(),
            kind_tag: kind.tag(),
            log: None,
            claim_txg: 0,
            claim_blk_seq: 0,
            claim_lr_seq: 0,
            replay_seq: 0,
            flags: 0,
            flag_names: Vec::new(),
        };
        if let Some(lwb) = header.lwb() {
            info.log = Some(lwb.log.to_string());
            info.claim_txg = lwb.claim_txg.as_u64();
            info.claim_blk_seq = lwb.claim_blk_seq.as_u64();
            info.claim_lr_seq = lwb.claim_lr_seq.as_u64();
            info.replay_seq = lwb.replay_seq.as_u64();
            info.flags = lwb.flags;
            if lwb.flags & ZIL_REPLAY_NEEDED != 0 {
                info.flag_names.push("REPLAY_NEEDED");
            }
            if lwb.flags & ZIL_CLAIM_LR_SEQ_VALID != 0 {
                info.flag_names.push("CLAIM_LR_SEQ_VALID");
            }
        }
        info
    }

    /// One-word summary of the log's condition.
    #[must_use]
    pub fn condition(&self) -> &'static str {
        match self.kind_tag {
            0 => "uninitialized",
            _ if self.log.is_none() => "unsupported kind",
            _ if self.log.as_deref() == Some("<hole>") => "empty",
            _ if self.flags & ZIL_REPLAY_NEEDED != 0 => "claimed, replay needed",
            _ if self.claim_txg != 0 => "claimed",
            _ => "unclaimed",
        }
    }
}

/// Inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Image path.
    pub path: String,
    /// Device file size in bytes.
    pub device_size: u64,
    /// Condition summary.
    pub condition: &'static str,
    /// Header fields.
    pub header: HeaderInfo,
}

/// Builds the inspection result for an opened image.
#[must_use]
pub fn inspect(image: &LogImage) -> InspectResult {
    let header = HeaderInfo::from_header(&image.header);
    InspectResult {
        path: image.path.display().to_string(),
        device_size: image.device.size(),
        condition: header.condition(),
        header,
    }
}

/// Runs the inspect command.
///
/// # Errors
///
/// Returns image open or output errors.
pub fn run(path: &Path, pool: &PoolArgs, format: Format) -> CliResult<()> {
    let image = LogImage::open(path, pool)?;
    let result = inspect(&image);
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print!("{}", render_text(&result)),
    }
    Ok(())
}

fn render_text(result: &InspectResult) -> String {
    let h = &result.header;
    let mut out = format!("Log image: {}\n", result.path);
    out.push_str(&format!("  kind:           {} (tag {})\n", h.kind, h.kind_tag));
    out.push_str(&format!("  condition:      {}\n", result.condition));
    out.push_str(&format!("  device size:    {} bytes\n", result.device_size));
    if let Some(log) = &h.log {
        out.push_str(&format!("  log:            {log}\n"));
        out.push_str(&format!("  claim_txg:      {}\n", h.claim_txg));
        out.push_str(&format!("  claim_blk_seq:  {}\n", h.claim_blk_seq));
        out.push_str(&format!("  claim_lr_seq:   {}\n", h.claim_lr_seq));
        out.push_str(&format!("  replay_seq:     {}\n", h.replay_seq));
        out.push_str(&format!("  flags:          {:#x}", h.flags));
        if !h.flag_names.is_empty() {
            out.push_str(&format!(" ({})", h.flag_names.join(" | ")));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::image_with_records;
    use zil_core::LwbHeader;

    #[test]
    fn fresh_image_is_unclaimed() {
        let dir = tempfile::tempdir().unwrap();
        image_with_records(dir.path());
        let image = LogImage::open(dir.path(), &PoolArgs::default()).unwrap();
        let result = inspect(&image);
        assert_eq!(result.condition, "unclaimed");
        assert_eq!(result.header.kind, "lwb");
        let text = render_text(&result);
        assert!(text.contains("kind:           lwb (tag 1)"));
        assert!(text.contains("flags:          0x0\n"));
    }

    #[test]
    fn flags_are_named() {
        let header = ZilHeader::Lwb(LwbHeader {
            flags: ZIL_REPLAY_NEEDED | ZIL_CLAIM_LR_SEQ_VALID,
            claim_txg: zil_codec::Txg::new(7),
            ..LwbHeader::default()
        });
        let info = HeaderInfo::from_header(&header);
        assert_eq!(info.flag_names, vec!["REPLAY_NEEDED", "CLAIM_LR_SEQ_VALID"]);
        // A claimed header whose chain was dropped still reads as empty.
        assert_eq!(info.condition(), "empty");
    }

    #[test]
    fn uninit_header() {
        let info = HeaderInfo::from_header(&ZilHeader::Uninit);
        assert_eq!(info.condition(), "uninitialized");
        assert!(info.log.is_none());
    }

    #[test]
    fn missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = LogImage::open(dir.path(), &PoolArgs::default()).err().unwrap();
        assert!(err.to_string().contains("missing header.zil"));
    }
}
