//! Terminal styling: spinners and colored labels.

use std::time::Duration;

use bluelink_types::TestOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

/// Braille dots animation.
const SPINNER_TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

const SPINNER_TICK_MS: u64 = 80;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars(SPINNER_TICK_CHARS)
}

/// A ticking spinner showing `message`.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(SPINNER_TICK_MS));
    pb
}

pub fn scanning_spinner(window: Duration) -> ProgressBar {
    spinner(format!("Scanning for BLE devices... ({}s)", window.as_secs()))
}

/// Short verdict label for a test outcome.
pub fn outcome_label(outcome: &TestOutcome, no_color: bool) -> String {
    let label = match outcome {
        TestOutcome::Passed { .. } => "PASS",
        TestOutcome::Failed { .. } => "FAIL",
        TestOutcome::NotImplemented => "N/A",
    };
    if no_color {
        return label.to_string();
    }
    match outcome {
        TestOutcome::Passed { .. } => label.green().bold().to_string(),
        TestOutcome::Failed { .. } => label.red().bold().to_string(),
        TestOutcome::NotImplemented => label.yellow().to_string(),
    }
}

/// Signal strength with a coarse quality hint.
pub fn format_rssi(rssi: i16, no_color: bool) -> String {
    let text = format!("{rssi} dBm");
    if no_color {
        return text;
    }
    match rssi {
        r if r >= -60 => text.green().to_string(),
        r if r >= -80 => text.yellow().to_string(),
        _ => text.red().to_string(),
    }
}

pub fn dim(text: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        text.dimmed().to_string()
    }
}

pub fn bold(text: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        text.bold().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels_without_color() {
        assert_eq!(outcome_label(&TestOutcome::passed("ok"), true), "PASS");
        assert_eq!(outcome_label(&TestOutcome::failed("no"), true), "FAIL");
        assert_eq!(outcome_label(&TestOutcome::NotImplemented, true), "N/A");
    }

    #[test]
    fn test_colored_label_keeps_text() {
        let label = outcome_label(&TestOutcome::passed("ok"), false);
        assert!(label.contains("PASS"));
        assert_ne!(label, "PASS");
    }

    #[test]
    fn test_format_rssi_plain() {
        assert_eq!(format_rssi(-65, true), "-65 dBm");
    }
}
