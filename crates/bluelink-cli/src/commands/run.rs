//! Run command implementation.

use anyhow::{Context as _, Result, bail};
use tracing::info;

use super::Context;
use crate::cli::OutputFormat;
use crate::format::{format_run_json, format_run_text};

pub async fn cmd_run(
    ctx: &Context,
    dut: Option<String>,
    ids: Vec<String>,
    all: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut bench = ctx.workbench(ctx.listener()).await?;

    let ids = if all {
        bench.catalog().cases().iter().map(|c| c.id.clone()).collect()
    } else if ids.is_empty() {
        ctx.config.cases.clone()
    } else {
        ids
    };
    // Blank names are rejected by the runner.
    let dut = ctx.dut(dut).unwrap_or_default();

    info!(dut = %dut, cases = ?ids, log_dir = %ctx.log_dir.display(), "Starting test run");
    let run = bench
        .run_ids(&ids, &dut)
        .await
        .context("Test run not started (pass case ids or --all, and --dut or BLUELINK_DUT)")?;

    let content = match format {
        OutputFormat::Text => format_run_text(&run, &ctx.opts),
        OutputFormat::Json => format_run_json(&run)?,
    };
    print!("{content}");

    if run.failed() > 0 {
        bail!("{} of {} test case(s) failed", run.failed(), run.results.len());
    }
    Ok(())
}
