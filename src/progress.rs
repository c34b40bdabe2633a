//! Terminal progress for a polled scan job, using indicatif.
//!
//! The CLI polls the job's [`ScanStatus`] and hands every snapshot to
//! [`ScanProgress::update`]. In accessible mode the spinner animation is
//! replaced by plain text with a slow tick, for screen readers.

use std::time::Duration;

use bytesize::ByteSize;
use indicatif::{ProgressBar, ProgressStyle};

use crate::scheduler::{ScanState, ScanStatus};

/// Spinner showing a running job's counters.
pub struct ScanProgress {
    bar: Option<ProgressBar>,
}

impl ScanProgress {
    /// A spinner, or nothing at all when `quiet`.
    #[must_use]
    pub fn new(quiet: bool, accessible: bool) -> Self {
        if quiet {
            return Self { bar: None };
        }
        let bar = ProgressBar::new_spinner();
        let style = if accessible {
            ProgressStyle::with_template("{msg} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
        } else {
            ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        };
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(if accessible { 500 } else { 100 }));
        Self { bar: Some(bar) }
    }

    /// Show the latest snapshot.
    pub fn update(&self, status: &ScanStatus) {
        if let Some(bar) = &self.bar {
            bar.set_message(status_line(status));
        }
    }

    /// Stop the spinner, leaving the final line on screen.
    pub fn finish(&self, status: &ScanStatus) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(status_line(status));
        }
    }
}

/// One-line summary of a status, e.g.
/// `scanning 'Test Share': 120/150 files, 3 errors, in /photos/2021`.
#[must_use]
pub fn status_line(status: &ScanStatus) -> String {
    let mut line = format!(
        "{} '{}': {}/{} files",
        status.state, status.root_name, status.files_processed, status.files_found
    );
    if status.files_updated > 0 {
        line.push_str(&format!(", {} updated", status.files_updated));
    }
    if status.files_deleted > 0 {
        line.push_str(&format!(", {} deleted", status.files_deleted));
    }
    if status.error_count > 0 {
        line.push_str(&format!(", {} errors", status.error_count));
    }
    match (status.state, &status.current_path, &status.last_error) {
        (ScanState::Scanning, Some(path), _) => line.push_str(&format!(", in {path}")),
        (ScanState::Failed | ScanState::Cancelled, _, Some(reason)) => {
            line.push_str(&format!(" ({reason})"));
        }
        _ => {}
    }
    line
}

/// Human-readable byte count (`1.5 MiB`).
#[must_use]
pub fn human_size(bytes: u64) -> String {
    ByteSize::b(bytes).to_string()
}
