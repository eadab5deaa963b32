//! Cases command implementation.

use anyhow::Result;
use bluelink_core::TestCatalog;

use crate::cli::OutputFormat;
use crate::format::{format_cases_json, format_cases_text};

pub fn cmd_cases(format: OutputFormat) -> Result<()> {
    let catalog = TestCatalog::standard();
    let content = match format {
        OutputFormat::Text => format_cases_text(catalog.cases()),
        OutputFormat::Json => format_cases_json(catalog.cases())?,
    };
    print!("{content}");
    Ok(())
}
