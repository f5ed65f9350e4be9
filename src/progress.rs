//! Progress reporting for the scanner.
//!
//! Provides real-time progress display using an indicatif spinner.

use std::time::Duration;

use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};

use crate::scanner::ScanSnapshot;

/// Progress reporter that displays scan status
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display from the scan counters
    pub fn update(&self, snapshot: &ScanSnapshot) {
        let msg = format!(
            "Entries: {} | Files: {} | Size: {} | Published: {} | Cached: {} | Skipped: {} | Errors: {}",
            format_number(snapshot.entries),
            format_number(snapshot.queued),
            format_size(snapshot.bytes, BINARY),
            format_number(snapshot.published),
            format_number(snapshot.cache_hits),
            format_number(snapshot.non_regular),
            format_number(snapshot.hash_errors + snapshot.publish_errors),
        );

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Print a summary of the scan results
pub fn print_scan_summary(snapshot: &ScanSnapshot, duration: Duration) {
    let secs = duration.as_secs_f64();
    let rate = if secs > 0.0 {
        snapshot.queued as f64 / secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("Scan complete in {}", format_elapsed(duration));
    eprintln!("  Entries inspected: {}", format_number(snapshot.entries));
    eprintln!("  Files processed:   {}", format_number(snapshot.queued));
    eprintln!("  Total size:        {}", format_size(snapshot.bytes, BINARY));
    eprintln!("  Published:         {}", format_number(snapshot.published));
    eprintln!("  Already cached:    {}", format_number(snapshot.cache_hits));
    eprintln!("  Non-regular:       {}", format_number(snapshot.non_regular));
    eprintln!(
        "  Errors:            {}",
        format_number(snapshot.hash_errors + snapshot.publish_errors)
    );
    eprintln!("  Rate:              {rate:.0} files/s");
}

/// Format a duration as 1h02m03s / 4m05s / 6s
pub fn format_elapsed(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}h{minutes:02}m{seconds:02}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}
