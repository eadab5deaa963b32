//! Scan command implementation.

use anyhow::{Context as _, Result};

use super::Context;
use crate::cli::OutputFormat;
use crate::format::{format_devices_json, format_devices_text};
use crate::style;

pub async fn cmd_scan(ctx: &Context, timeout: Option<u64>, format: OutputFormat) -> Result<()> {
    let window = ctx.scan_window(timeout);
    let listener = ctx.listener();
    let mut bench = ctx.workbench(listener.clone()).await?;

    if !ctx.quiet && format == OutputFormat::Text {
        listener.attach(style::scanning_spinner(window));
    }
    let result = bench.begin_scan(Some(window)).await;
    listener.detach();
    let devices = result.context("Failed to scan for devices")?;

    let content = match format {
        OutputFormat::Text => format_devices_text(&devices, &ctx.opts),
        OutputFormat::Json => format_devices_json(&devices)?,
    };
    print!("{content}");
    Ok(())
}
