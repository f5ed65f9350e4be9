//! Scanner-side file identity cache.
//!
//! An approximate, fixed-memory set of `path:hash` keys used to skip files
//! that were already published. Entries are 8-byte fingerprints stored in
//! sharded open-addressed tables; when a probe window is full an existing
//! entry is overwritten, so the set never grows past its byte budget.
//!
//! Losing an entry only costs one extra publish, which the consumer's
//! identity check absorbs. The cache checkpoints itself to disk and loads
//! the checkpoint on startup; a missing or corrupt checkpoint is a cold
//! start, never an error.

use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use twox_hash::XxHash64;

/// Number of independently locked shards
const SHARD_COUNT: usize = 64;

/// Linear probe window before an entry gets overwritten
const PROBE_WINDOW: usize = 8;

/// Interval between background checkpoints
pub const SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default byte budget in MiB
pub const DEFAULT_BUDGET_MIB: usize = 100;

/// On-disk checkpoint layout
#[derive(Serialize, Deserialize)]
struct Checkpoint {
    version: u32,
    slots_per_shard: u64,
    shards: Vec<Vec<u64>>,
}

const CHECKPOINT_VERSION: u32 = 1;

/// Cache hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub additions: AtomicU64,
}

/// Approximate persistent set of already-published `(path, hash)` pairs.
pub struct FileCache {
    shards: Vec<Mutex<Vec<u64>>>,
    slots_per_shard: usize,
    cache_path: PathBuf,
    stats: CacheStats,
}

impl FileCache {
    /// Create a cache with the given byte budget, loading the checkpoint at
    /// `cache_path` when one exists and is readable.
    pub fn new(budget_mib: usize, cache_path: impl Into<PathBuf>) -> Self {
        let cache_path = cache_path.into();
        let total_slots = (budget_mib.max(1) * 1024 * 1024) / 8;
        let slots_per_shard = (total_slots / SHARD_COUNT).max(PROBE_WINDOW);

        let shards = match Self::load_checkpoint(&cache_path, slots_per_shard) {
            Some(shards) => {
                debug!(path = %cache_path.display(), "loaded file cache checkpoint");
                shards
            }
            None => (0..SHARD_COUNT)
                .map(|_| Mutex::new(vec![0u64; slots_per_shard]))
                .collect(),
        };

        Self {
            shards,
            slots_per_shard,
            cache_path,
            stats: CacheStats::default(),
        }
    }

    fn load_checkpoint(path: &Path, slots_per_shard: usize) -> Option<Vec<Mutex<Vec<u64>>>> {
        let file = File::open(path).ok()?;
        let checkpoint: Checkpoint = match bincode::deserialize_from(BufReader::new(file)) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), "discarding unreadable cache checkpoint: {e}");
                return None;
            }
        };

        if checkpoint.version != CHECKPOINT_VERSION
            || checkpoint.slots_per_shard != slots_per_shard as u64
            || checkpoint.shards.len() != SHARD_COUNT
            || checkpoint
                .shards
                .iter()
                .any(|s| s.len() != slots_per_shard)
        {
            warn!(path = %path.display(), "cache checkpoint shape mismatch, starting cold");
            return None;
        }

        Some(checkpoint.shards.into_iter().map(Mutex::new).collect())
    }

    fn fingerprint(path: &str, hash: &str) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(path.as_bytes());
        hasher.write(b":");
        hasher.write(hash.as_bytes());
        let fp = hasher.finish();
        // 0 marks an empty slot
        if fp == 0 {
            1
        } else {
            fp
        }
    }

    fn locate(&self, fp: u64) -> (usize, usize) {
        let shard = (fp >> 58) as usize % SHARD_COUNT;
        let base = (fp as usize) % self.slots_per_shard;
        (shard, base)
    }

    /// Has this exact `(path, hash)` combination been published before?
    pub fn has(&self, path: &str, hash: &str) -> bool {
        let fp = Self::fingerprint(path, hash);
        let (shard, base) = self.locate(fp);

        let slots = self.shards[shard].lock().expect("cache shard poisoned");
        let found = (0..PROBE_WINDOW)
            .map(|i| slots[(base + i) % self.slots_per_shard])
            .any(|slot| slot == fp);

        if found {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Record that this `(path, hash)` combination was published.
    pub fn mark(&self, path: &str, hash: &str) {
        let fp = Self::fingerprint(path, hash);
        let (shard, base) = self.locate(fp);

        let mut slots = self.shards[shard].lock().expect("cache shard poisoned");
        for i in 0..PROBE_WINDOW {
            let idx = (base + i) % self.slots_per_shard;
            if slots[idx] == 0 || slots[idx] == fp {
                slots[idx] = fp;
                self.stats.additions.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        // Window full: overwrite a slot picked from the fingerprint's upper
        // bits, which spreads evictions across the window.
        let victim = (base + (fp >> 32) as usize % PROBE_WINDOW) % self.slots_per_shard;
        slots[victim] = fp;
        self.stats.additions.fetch_add(1, Ordering::Relaxed);
    }

    /// Persist the cache to its checkpoint file.
    ///
    /// Writes to a sibling temp file first so a crash mid-save leaves the
    /// previous checkpoint intact.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            slots_per_shard: self.slots_per_shard as u64,
            shards: self
                .shards
                .iter()
                .map(|s| s.lock().expect("cache shard poisoned").clone())
                .collect(),
        };

        let tmp_path = self.cache_path.with_extension("tmp");
        let file = File::create(&tmp_path)?;
        bincode::serialize_into(BufWriter::new(file), &checkpoint)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        fs::rename(&tmp_path, &self.cache_path)?;

        debug!(path = %self.cache_path.display(), "saved file cache checkpoint");
        Ok(())
    }

    /// Current hit/miss counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Spawn the periodic checkpoint task. Returns a handle the caller aborts
/// once the final explicit save has happened.
pub fn spawn_saver(cache: std::sync::Arc<FileCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SAVE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = cache.save() {
                warn!("failed to save file cache: {e}");
            }
        }
    })
}
