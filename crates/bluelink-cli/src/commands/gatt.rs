//! Read, write and watch command implementations.

use std::time::Duration;

use anyhow::{Context as _, Result};
use bluelink_core::uuids::parse_uuid;
use bluelink_core::{BleAdapter, Workbench};
use bluelink_types::{CharacteristicRef, WriteType, format_value, parse_value};
use tracing::warn;

use super::Context;
use crate::cli::TargetArgs;
use crate::style;

/// Resolve the characteristic named by `target`.
pub fn characteristic_ref(target: &TargetArgs) -> Result<CharacteristicRef> {
    let service = parse_uuid(&target.service).context("Invalid --service")?;
    let characteristic =
        parse_uuid(&target.characteristic).context("Invalid --characteristic")?;
    Ok(CharacteristicRef::new(service, characteristic))
}

async fn open(
    ctx: &Context,
    target: &TargetArgs,
    tag: &str,
) -> Result<(Workbench<dyn BleAdapter>, CharacteristicRef)> {
    let characteristic = characteristic_ref(target)?;
    let dut = ctx.require_dut(target.dut.clone())?;
    let listener = ctx.listener();
    let mut bench = ctx.workbench(listener.clone()).await?;
    bench.runner_mut().session_mut().set_log_tag(tag);
    ctx.connect_dut(&mut bench, &listener, &dut, ctx.scan_window(target.timeout))
        .await?;
    Ok((bench, characteristic))
}

pub async fn cmd_read(ctx: &Context, target: &TargetArgs) -> Result<()> {
    let (mut bench, characteristic) = open(ctx, target, "gatt_read").await?;
    let value = bench
        .runner_mut()
        .session_mut()
        .read(characteristic)
        .await
        .with_context(|| format!("Failed to read {characteristic}"))?;

    println!(
        "{} {}",
        style::bold(&characteristic.to_string(), ctx.opts.no_color),
        format_value(&value)
    );
    bench.disconnect().await?;
    Ok(())
}

pub async fn cmd_write(
    ctx: &Context,
    target: &TargetArgs,
    value: &str,
    no_response: bool,
) -> Result<()> {
    let payload = parse_value(value).context("Invalid value")?;
    let write_type = if no_response {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    };

    let (mut bench, characteristic) = open(ctx, target, "gatt_write").await?;
    bench
        .runner_mut()
        .session_mut()
        .write(characteristic, &payload, write_type)
        .await
        .with_context(|| format!("Failed to write {characteristic}"))?;

    if !ctx.quiet {
        println!("Wrote {} byte(s) to {characteristic}", payload.len());
    }
    bench.disconnect().await?;
    Ok(())
}

pub async fn cmd_watch(
    ctx: &Context,
    target: &TargetArgs,
    count: Option<usize>,
    duration: u64,
) -> Result<()> {
    let (mut bench, characteristic) = open(ctx, target, "gatt_notify").await?;
    let session = bench.runner_mut().session_mut();
    session
        .set_notification(characteristic, true)
        .await
        .with_context(|| format!("Failed to enable notifications on {characteristic}"))?;
    let mut stream = session.notifications().await?;

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            notification = stream.recv() => {
                let Some(notification) = notification else {
                    break;
                };
                if notification.characteristic != characteristic {
                    continue;
                }
                println!(
                    "{} {}",
                    style::dim(&characteristic.to_string(), ctx.opts.no_color),
                    format_value(&notification.value)
                );
                received += 1;
                if count.is_some_and(|n| received >= n) {
                    break;
                }
            }
        }
    }

    if let Err(e) = session.set_notification(characteristic, false).await {
        warn!("Failed to disable notifications: {e}");
    }
    if !ctx.quiet {
        eprintln!("{received} notification(s) received");
    }
    bench.disconnect().await?;
    Ok(())
}
