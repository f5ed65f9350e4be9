//! Consumer-side statistics.
//!
//! Counters live behind one mutex and are only ever read through
//! snapshots, so printers and the listener never race.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// How many extensions the detailed dump lists
const TOP_EXTENSIONS: usize = 10;

#[derive(Debug, Default)]
struct StatsInner {
    messages_received: u64,
    records_written: u64,
    records_skipped: u64,
    records_present: u64,
    files_by_extension: HashMap<String, u64>,
    host_stats: HashMap<String, u64>,
}

/// Read-only view of the counters at one point in time.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub messages_received: u64,
    pub records_written: u64,
    pub records_skipped: u64,
    pub records_present: u64,
    /// Host name and message count, descending
    pub hosts: Vec<(String, u64)>,
    /// Extension and message count, descending
    pub extensions: Vec<(String, u64)>,
    pub elapsed: Duration,
}

/// Statistics tracker for the store consumer.
pub struct ProcessStats {
    inner: Mutex<StatsInner>,
    start: Instant,
}

impl Default for ProcessStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessStats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner::default()),
            start: Instant::now(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        self.inner.lock().expect("stats mutex poisoned")
    }

    pub fn increment_received(&self) {
        self.lock().messages_received += 1;
    }

    pub fn increment_written(&self) {
        self.lock().records_written += 1;
    }

    pub fn increment_skipped(&self) {
        self.lock().records_skipped += 1;
    }

    pub fn increment_already_present(&self) {
        self.lock().records_present += 1;
    }

    pub fn record_host(&self, host: &str) {
        *self.lock().host_stats.entry(host.to_string()).or_default() += 1;
    }

    pub fn record_extension(&self, ext: &str) {
        let key = if ext.is_empty() { "[no extension]" } else { ext };
        *self
            .lock()
            .files_by_extension
            .entry(key.to_string())
            .or_default() += 1;
    }

    /// Take a consistent snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();

        let mut hosts: Vec<_> = inner
            .host_stats
            .iter()
            .map(|(host, count)| (host.clone(), *count))
            .collect();
        hosts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut extensions: Vec<_> = inner
            .files_by_extension
            .iter()
            .map(|(ext, count)| (ext.clone(), *count))
            .collect();
        extensions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        StatsSnapshot {
            messages_received: inner.messages_received,
            records_written: inner.records_written,
            records_skipped: inner.records_skipped,
            records_present: inner.records_present,
            hosts,
            extensions,
            elapsed: self.start.elapsed(),
        }
    }

    /// Print a one-line status update in place.
    pub fn print_live_status(&self) {
        let s = self.snapshot();
        print!(
            "\rProcessed: {} written, {} skipped, {} present",
            s.records_written, s.records_skipped, s.records_present
        );
        let _ = std::io::stdout().flush();
    }

    /// Print the detailed statistics block.
    pub fn print_stats(&self) {
        let s = self.snapshot();
        let secs = s.elapsed.as_secs_f64();
        let rate = |count: u64| if secs > 0.0 { count as f64 / secs } else { 0.0 };

        println!("\n-------------------------");
        println!("HASHUP STATS (elapsed {}s)", s.elapsed.as_secs());
        println!("-------------------------");
        println!(
            "Messages received: {} ({:.1}/sec)",
            s.messages_received,
            rate(s.messages_received)
        );
        println!(
            "Records written:   {} ({:.1}/sec)",
            s.records_written,
            rate(s.records_written)
        );
        println!(
            "Records skipped:   {} ({:.1}/sec)",
            s.records_skipped,
            rate(s.records_skipped)
        );
        println!(
            "Records present:   {} ({:.1}/sec)",
            s.records_present,
            rate(s.records_present)
        );

        if !s.hosts.is_empty() {
            println!("\nHosts:");
            for (host, count) in &s.hosts {
                println!("  {host:<20} {count}");
            }
        }

        if !s.extensions.is_empty() {
            println!("\nTop file extensions:");
            for (ext, count) in s.extensions.iter().take(TOP_EXTENSIONS) {
                println!("  {ext:<20} {count}");
            }
        }

        println!("-------------------------");
    }
}

/// Spawn the background printers: a detailed dump every `interval_secs`
/// (0 disables it) and a 1-second live status line. Tasks exit when the
/// shutdown flag is raised.
pub fn spawn_printers(
    stats: Arc<ProcessStats>,
    interval_secs: u64,
    shutdown: Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    if interval_secs > 0 {
        let stats = Arc::clone(&stats);
        let shutdown = Arc::clone(&shutdown);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await;
            while !shutdown.load(Ordering::Relaxed) {
                ticker.tick().await;
                stats.print_stats();
            }
        }));
    }

    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.tick().await;
        while !shutdown.load(Ordering::Relaxed) {
            ticker.tick().await;
            stats.print_live_status();
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accounting() {
        let stats = ProcessStats::new();
        stats.increment_received();
        stats.increment_received();
        stats.increment_written();
        stats.increment_skipped();
        stats.increment_already_present();

        let s = stats.snapshot();
        assert_eq!(s.messages_received, 2);
        assert_eq!(s.records_written, 1);
        assert_eq!(s.records_skipped, 1);
        assert_eq!(s.records_present, 1);
    }

    #[test]
    fn test_hosts_and_extensions_sorted_by_count() {
        let stats = ProcessStats::new();
        for _ in 0..3 {
            stats.record_extension("txt");
        }
        stats.record_extension("pdf");
        stats.record_host("beta");
        stats.record_host("alpha");
        stats.record_host("alpha");

        let s = stats.snapshot();
        assert_eq!(s.extensions[0], ("txt".to_string(), 3));
        assert_eq!(s.extensions[1], ("pdf".to_string(), 1));
        assert_eq!(s.hosts[0], ("alpha".to_string(), 2));
        assert_eq!(s.hosts[1], ("beta".to_string(), 1));
    }

    #[test]
    fn test_empty_extension_gets_placeholder() {
        let stats = ProcessStats::new();
        stats.record_extension("");

        let s = stats.snapshot();
        assert_eq!(s.extensions[0].0, "[no extension]");
    }
}
