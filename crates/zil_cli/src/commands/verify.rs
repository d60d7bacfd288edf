//! Verify command: checks that a log chain is intact.

use super::{CliError, CliResult, LogImage, PoolArgs};
use std::path::Path;
use zil_core::{check_log_chain, ParseResult};

/// Checks the chain of an opened image.
///
/// # Errors
///
/// Returns [`CliError::Damaged`] with the first problem found.
pub fn verify(image: &LogImage) -> CliResult<ParseResult> {
    check_log_chain(&image.device, &image.pool, &image.objset, &image.header)
        .map_err(CliError::Damaged)
}

/// Runs the verify command.
///
/// # Errors
///
/// Returns image open errors or [`CliError::Damaged`].
pub fn run(path: &Path, pool: &PoolArgs) -> CliResult<()> {
    let image = LogImage::open(path, pool)?;
    let result = verify(&image)?;
    println!(
        "Log chain OK: {} blocks, {} records, last block seq {}, last record seq {} (end: {})",
        result.blk_count,
        result.lr_count,
        result.blk_seq.as_u64(),
        result.lr_seq.as_u64(),
        result.end.as_str()
    );
    Ok(())
}
