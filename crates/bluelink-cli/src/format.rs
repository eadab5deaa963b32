//! Output formatting for text and JSON.

use anyhow::Result;
use bluelink_core::runner::log_tag_for;
use bluelink_types::{DiscoveredDevice, GattItem, TestCase, TestRun, split_log_line};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::style;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(value)?))
}

pub fn format_devices_text(devices: &[DiscoveredDevice], opts: &FormatOptions) -> String {
    if devices.is_empty() {
        return "No BLE devices found.\n".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Address")]
        address: String,
        #[tabled(rename = "Signal")]
        signal: String,
    }

    let mut sorted: Vec<&DiscoveredDevice> = devices.iter().collect();
    sorted.sort_by(|a, b| b.rssi.cmp(&a.rssi));
    let rows: Vec<DeviceRow> = sorted
        .into_iter()
        .map(|d| DeviceRow {
            name: d.display_name().to_string(),
            address: d.address.clone(),
            signal: style::format_rssi(d.rssi, opts.no_color),
        })
        .collect();

    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("Found {} device(s):\n{}\n", devices.len(), table)
}

pub fn format_devices_json(devices: &[DiscoveredDevice]) -> Result<String> {
    #[derive(Serialize)]
    struct ScanResult<'a> {
        count: usize,
        devices: &'a [DiscoveredDevice],
    }
    to_json(&ScanResult {
        count: devices.len(),
        devices,
    })
}

pub fn format_cases_text(cases: &[TestCase]) -> String {
    #[derive(Tabled)]
    struct CaseRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Description")]
        description: String,
        #[tabled(rename = "Log")]
        log: String,
    }

    let rows: Vec<CaseRow> = cases
        .iter()
        .map(|c| CaseRow {
            id: c.id.clone(),
            title: c.title.clone(),
            description: c.description.clone(),
            log: log_tag_for(&c.id),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("{table}\n")
}

pub fn format_cases_json(cases: &[TestCase]) -> Result<String> {
    to_json(cases)
}

pub fn format_run_text(run: &TestRun, opts: &FormatOptions) -> String {
    #[derive(Tabled)]
    struct ResultRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Title")]
        title: String,
        #[tabled(rename = "Result")]
        result: String,
        #[tabled(rename = "Details")]
        details: String,
    }

    let rows: Vec<ResultRow> = run
        .results
        .iter()
        .map(|r| ResultRow {
            id: r.id.clone(),
            title: r.title.clone(),
            result: style::outcome_label(&r.outcome, opts.no_color),
            details: r.outcome.message().to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());

    let summary = format!(
        "{} passed, {} failed ({} case(s) against {})",
        run.passed(),
        run.failed(),
        run.results.len(),
        run.dut_name
    );
    format!("{}\n{}\n", table, style::bold(&summary, opts.no_color))
}

pub fn format_run_json(run: &TestRun) -> Result<String> {
    to_json(run)
}

/// Services with their characteristics indented beneath.
pub fn format_gatt_text(device: &DiscoveredDevice, items: &[GattItem], opts: &FormatOptions) -> String {
    let mut out = format!(
        "{} ({})\n",
        style::bold(device.display_name(), opts.no_color),
        device.address
    );
    if items.is_empty() {
        out.push_str("  No services discovered.\n");
        return out;
    }
    for item in items {
        match item {
            GattItem::Service { kind, .. } => {
                out.push_str(&format!(
                    "  {} {}\n",
                    style::bold(&format!("{} [{}]", item.name(), item.short_uuid()), opts.no_color),
                    style::dim(&format!("{kind} service {}", item.uuid()), opts.no_color)
                ));
            }
            GattItem::Characteristic { properties, .. } => {
                out.push_str(&format!(
                    "    {} [{}] {}\n",
                    item.name(),
                    item.short_uuid(),
                    style::dim(&properties.to_string(), opts.no_color)
                ));
            }
        }
    }
    out
}

/// Log lines, optionally only the last `tail`, with dimmed timestamps.
pub fn format_log_lines(lines: &[String], tail: Option<usize>, opts: &FormatOptions) -> String {
    let skip = tail.map_or(0, |n| lines.len().saturating_sub(n));
    let mut out = String::new();
    for line in &lines[skip..] {
        match split_log_line(line) {
            Some((timestamp, message)) => {
                out.push_str(&format!("{} {}\n", style::dim(timestamp, opts.no_color), message));
            }
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}
