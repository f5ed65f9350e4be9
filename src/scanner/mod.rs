//! Producer side: directory traversal, hashing, and publishing.
//!
//! [`DirectoryScanner`] wires the walker to the worker pool. The walker
//! runs on a blocking thread and submits one job per candidate file; each
//! job hashes the file, consults the identity cache, and hands new records
//! to the processor. The cache is only marked after a successful publish,
//! so failed files are retried on the next walk.

pub mod hasher;
pub mod pool;
pub mod walker;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use tracing::{debug, error, warn};

use crate::cache::FileCache;
use crate::error::{ConfigError, ConfigResult, ScanError, ScanResult};
use crate::processor::Processor;
use crate::types::ScannedFile;

use pool::{WorkerPool, DEFAULT_QUEUE_CAPACITY};
use walker::{FileEntry, WalkOptions};

/// Scanner configuration with defaults matching a typical workstation scan.
#[derive(Debug)]
pub struct ScanOptions {
    /// Skip hidden files and prune hidden directories
    pub ignore_hidden: bool,
    /// User ignore patterns as raw regular expressions
    pub ignore_list: Vec<String>,
    /// Number of concurrent hash-and-publish workers
    pub concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            ignore_hidden: true,
            ignore_list: Vec::new(),
            concurrency: 5,
        }
    }
}

/// Live counters for the scan in progress. All counters are best-effort
/// signals for the progress display; the scan summary reads them once the
/// walk has finished.
#[derive(Debug, Default)]
pub struct ScanCounters {
    /// Entries inspected by the walker (files and directories)
    pub entries: AtomicU64,
    /// Files submitted to the worker pool
    pub queued: AtomicU64,
    /// Bytes of file content submitted to the worker pool
    pub bytes: AtomicU64,
    /// Records published to the queue
    pub published: AtomicU64,
    /// Files skipped because the cache already held (path, hash)
    pub cache_hits: AtomicU64,
    /// Entries skipped because they are not regular files
    pub non_regular: AtomicU64,
    /// Files that failed to hash
    pub hash_errors: AtomicU64,
    /// Records that failed to publish
    pub publish_errors: AtomicU64,
}

/// Point-in-time view of [`ScanCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSnapshot {
    pub entries: u64,
    pub queued: u64,
    pub bytes: u64,
    pub published: u64,
    pub cache_hits: u64,
    pub non_regular: u64,
    pub hash_errors: u64,
    pub publish_errors: u64,
}

impl ScanCounters {
    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            entries: self.entries.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            non_regular: self.non_regular.load(Ordering::Relaxed),
            hash_errors: self.hash_errors.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

/// Recursive scanner feeding a processor through a bounded worker pool.
pub struct DirectoryScanner {
    root: PathBuf,
    options: ScanOptions,
    patterns: Vec<Regex>,
    cache: Arc<FileCache>,
    counters: Arc<ScanCounters>,
    shutdown: Arc<AtomicBool>,
}

impl DirectoryScanner {
    /// Create a scanner for `root`. Compiles the ignore list up front so an
    /// invalid pattern is a startup error, not a mid-scan surprise.
    pub fn new(
        root: impl Into<PathBuf>,
        options: ScanOptions,
        cache: Arc<FileCache>,
        shutdown: Arc<AtomicBool>,
    ) -> ConfigResult<Self> {
        let patterns = options
            .ignore_list
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidIgnorePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self {
            root: root.into(),
            options,
            patterns,
            cache,
            counters: Arc::new(ScanCounters::default()),
            shutdown,
        })
    }

    /// Counters for the progress display.
    pub fn counters(&self) -> Arc<ScanCounters> {
        Arc::clone(&self.counters)
    }

    /// Walk the tree and publish every new file through `processor`.
    ///
    /// Returns the number of files submitted to the pool. Cancellation is a
    /// clean exit: the walk stops at the next entry boundary, queued jobs
    /// drain, and the cache is saved.
    pub async fn scan(&self, processor: Arc<dyn Processor>) -> ScanResult<u64> {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());

        let pool = WorkerPool::new(self.options.concurrency, DEFAULT_QUEUE_CAPACITY);
        let submitter = pool.submitter();

        let root = self.root.clone();
        let walk_options = WalkOptions {
            ignore_hidden: self.options.ignore_hidden,
            ignore_patterns: self.patterns.clone(),
        };
        let counters = Arc::clone(&self.counters);
        let cache = Arc::clone(&self.cache);
        let shutdown = Arc::clone(&self.shutdown);
        let shutdown_walker = Arc::clone(&self.shutdown);

        let walk = tokio::task::spawn_blocking(move || {
            walker::walk(
                &root,
                &walk_options,
                &shutdown_walker,
                &counters,
                |entry| {
                    counters.queued.fetch_add(1, Ordering::Relaxed);
                    counters.bytes.fetch_add(entry.size, Ordering::Relaxed);
                    let job = scan_job(
                        entry,
                        hostname.clone(),
                        Arc::clone(&cache),
                        Arc::clone(&processor),
                        Arc::clone(&counters),
                        Arc::clone(&shutdown),
                    );
                    submitter.submit(job)
                },
            )
        });

        let result = match walk.await {
            Ok(Ok(count)) => Ok(count),
            // Cancellation stops the walk cleanly; report what was queued
            Ok(Err(ScanError::Cancelled)) => {
                Ok(self.counters.queued.load(Ordering::Relaxed))
            }
            Ok(Err(e)) => Err(e),
            Err(e) => Err(ScanError::Walk {
                path: self.root.clone(),
                source: std::io::Error::other(e.to_string()),
            }),
        };

        // Drain in-flight jobs before reporting, even on a failed walk
        pool.close().await;

        if let Err(e) = self.cache.save() {
            warn!("failed to save file cache: {e}");
        }

        result
    }
}

/// One worker job: hash, consult the cache, publish, mark.
async fn scan_job(
    entry: FileEntry,
    hostname: String,
    cache: Arc<FileCache>,
    processor: Arc<dyn Processor>,
    counters: Arc<ScanCounters>,
    shutdown: Arc<AtomicBool>,
) -> ScanResult<()> {
    if shutdown.load(Ordering::Relaxed) {
        return Err(ScanError::Cancelled);
    }

    let path = entry.path.to_string_lossy().into_owned();

    let hash = match hasher::hash_file(&entry.path) {
        Ok(hash) => hash,
        Err(e) => {
            warn!("{e}");
            counters.hash_errors.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
    };

    if cache.has(&path, &hash) {
        debug!("file {path} already processed");
        counters.cache_hits.fetch_add(1, Ordering::Relaxed);
        return Ok(());
    }

    let record = ScannedFile {
        extension: extension_of(&entry.path),
        size: entry.size as i64,
        mod_time: epoch_seconds(entry.mod_time),
        hash: hash.clone(),
        hostname,
        path: path.clone(),
    };

    match processor.process(record).await {
        Ok(()) => {
            cache.mark(&path, &hash);
            counters.published.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        Err(e) => {
            if shutdown.load(Ordering::Relaxed) {
                return Err(ScanError::Cancelled);
            }
            error!("failed processing {path:?}: {e}");
            counters.publish_errors.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }
}

/// Extension after the final dot of the basename, lowercased. Empty when
/// there is no dot or the basename is all extension (".bashrc").
fn extension_of(path: &std::path::Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn epoch_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("/a/report.PDF")), "pdf");
        assert_eq!(extension_of(Path::new("/a/archive.tar.gz")), "gz");
        assert_eq!(extension_of(Path::new("/a/README")), "");
        assert_eq!(extension_of(Path::new("/a/.bashrc")), "");
    }

    #[test]
    fn test_epoch_seconds() {
        assert_eq!(epoch_seconds(UNIX_EPOCH), 0);
        let later = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        assert_eq!(epoch_seconds(later), 1_700_000_000);
    }

    #[test]
    fn test_invalid_ignore_pattern_is_startup_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::new(1, dir.path().join("cache")));
        let options = ScanOptions {
            ignore_list: vec!["[unclosed".into()],
            ..Default::default()
        };

        let result = DirectoryScanner::new(
            dir.path(),
            options,
            cache,
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidIgnorePattern { .. })
        ));
    }
}
