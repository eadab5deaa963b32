//! Terminal implementation of the presentation listener.

use std::sync::Mutex;

use bluelink_core::PresentationListener;
use bluelink_types::DiscoveredDevice;
use indicatif::ProgressBar;
use tracing::debug;

use crate::style;

/// Echoes log lines to stderr and keeps an optional spinner current.
pub struct ConsoleListener {
    echo_logs: bool,
    no_color: bool,
    progress: Mutex<Option<ProgressBar>>,
}

impl ConsoleListener {
    pub fn new(echo_logs: bool, no_color: bool) -> Self {
        Self {
            echo_logs,
            no_color,
            progress: Mutex::new(None),
        }
    }

    /// Route output through `pb` until [`detach`](Self::detach).
    pub fn attach(&self, pb: ProgressBar) {
        if let Ok(mut progress) = self.progress.lock() {
            *progress = Some(pb);
        }
    }

    /// Clear and drop the attached spinner.
    pub fn detach(&self) {
        if let Ok(mut progress) = self.progress.lock()
            && let Some(pb) = progress.take()
        {
            pb.finish_and_clear();
        }
    }

    fn render(&self, tag: &str, line: &str) -> String {
        format!("{} {}", style::dim(&format!("[{tag}]"), self.no_color), line)
    }
}

impl PresentationListener for ConsoleListener {
    fn on_device_list_changed(&self, devices: &[DiscoveredDevice]) {
        if let Ok(progress) = self.progress.lock()
            && let Some(pb) = progress.as_ref()
        {
            pb.set_message(format!(
                "Scanning for BLE devices... {} found",
                devices.len()
            ));
        }
    }

    fn on_log_line(&self, tag: &str, line: &str) {
        if !self.echo_logs {
            return;
        }
        let text = self.render(tag, line);
        let progress = self.progress.lock().ok();
        match progress.as_ref().and_then(|p| p.as_ref()) {
            Some(pb) => pb.println(text),
            None => eprintln!("{text}"),
        }
    }

    fn on_test_selection_changed(&self, ids: &[String]) {
        debug!(?ids, "Selection changed");
    }
}
