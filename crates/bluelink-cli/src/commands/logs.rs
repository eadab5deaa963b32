//! Logs command implementation.

use anyhow::{Context as _, Result, bail};
use bluelink_core::LogSink;
use bluelink_core::runner::{Procedure, log_tag_for};

use super::Context;
use crate::format::format_log_lines;

/// Map a case id (`TC03`) to its log tag; other tags pass through.
pub fn tag_for(name: &str) -> String {
    match Procedure::for_id(name) {
        Some(_) => log_tag_for(name),
        None => name.to_string(),
    }
}

pub fn cmd_logs(ctx: &Context, name: &str, tail: Option<usize>) -> Result<()> {
    let tag = tag_for(name);
    let sink = LogSink::to_dir(&ctx.log_dir);
    let lines = sink
        .read(&tag)
        .with_context(|| format!("Failed to read log {tag}"))?;
    if lines.is_empty() {
        bail!("No log for {tag} in {}", ctx.log_dir.display());
    }
    print!("{}", format_log_lines(&lines, tail, &ctx.opts));
    Ok(())
}
