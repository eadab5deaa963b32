//! Explore command implementation.

use anyhow::Result;

use super::Context;
use crate::format::format_gatt_text;

pub async fn cmd_explore(ctx: &Context, dut: Option<String>, timeout: Option<u64>) -> Result<()> {
    let dut = ctx.require_dut(dut)?;
    let listener = ctx.listener();
    let mut bench = ctx.workbench(listener.clone()).await?;

    let (device, items) = ctx
        .connect_dut(&mut bench, &listener, &dut, ctx.scan_window(timeout))
        .await?;
    print!("{}", format_gatt_text(&device, &items, &ctx.opts));
    bench.disconnect().await?;
    Ok(())
}
