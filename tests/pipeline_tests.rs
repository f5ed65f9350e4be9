//! End-to-end pipeline tests: real scanner and catalog, in-memory queue.
//!
//! The broker is replaced by a processor that collects records in memory,
//! which keeps the suite hermetic while exercising the walker, hasher,
//! cache, worker pool and storage together.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use hashup::cache::FileCache;
use hashup::crypto::CryptoMachine;
use hashup::error::QueueResult;
use hashup::processor::Processor;
use hashup::scanner::{DirectoryScanner, ScanOptions};
use hashup::store::{SqliteStorage, Storage};
use hashup::types::ScannedFile;

/// Processor double that records everything it is asked to publish.
#[derive(Default)]
struct MemoryProcessor {
    records: Mutex<Vec<ScannedFile>>,
}

impl MemoryProcessor {
    fn records(&self) -> Vec<ScannedFile> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for MemoryProcessor {
    async fn process(&self, file: ScannedFile) -> QueueResult<()> {
        self.records.lock().unwrap().push(file);
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = File::create(path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

/// The tree from the walkthrough scenarios: a/hello.txt and a/dir/foo.txt
fn create_scan_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_file(&dir.path().join("a").join("hello.txt"), "hello world\n");
    write_file(&dir.path().join("a").join("dir").join("foo.txt"), "bar\n");
    dir
}

async fn scan_once(
    root: &Path,
    cache: Arc<FileCache>,
    processor: Arc<MemoryProcessor>,
    ignore_list: Vec<String>,
) -> u64 {
    let scanner = DirectoryScanner::new(
        root,
        ScanOptions {
            ignore_hidden: true,
            ignore_list,
            concurrency: 4,
        },
        cache,
        Arc::new(AtomicBool::new(false)),
    )
    .unwrap();

    scanner.scan(processor).await.unwrap()
}

fn store_all(storage: &mut SqliteStorage, records: &[ScannedFile]) {
    for record in records {
        storage.store(record).unwrap();
    }
}

fn count(storage: &SqliteStorage, table: &str) -> i64 {
    storage
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fresh_walk() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    let count_scanned =
        scan_once(root.path(), cache, Arc::clone(&processor), Vec::new()).await;
    assert_eq!(count_scanned, 2);

    let records = processor.records();
    assert_eq!(records.len(), 2);

    let expected_host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    let mut sizes: Vec<i64> = records.iter().map(|r| r.size).collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![4, 12]);

    for record in &records {
        assert_eq!(record.hostname, expected_host);
        assert_eq!(record.extension, "txt");
        assert_eq!(record.hash.len(), 16);
        assert!(Path::new(&record.path).is_absolute());
        assert!(record.mod_time > 0);
    }

    let db_dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::open(&db_dir.path().join("hashup.db")).unwrap();
    store_all(&mut storage, &records);

    assert_eq!(count(&storage, "file_hashes"), 2);
    assert_eq!(count(&storage, "file_info"), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_content_shares_hash_row() {
    let root = create_scan_root();
    write_file(
        &root.path().join("a").join("copy_of_hello.txt"),
        "hello world\n",
    );

    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    scan_once(root.path(), cache, Arc::clone(&processor), Vec::new()).await;
    let records = processor.records();
    assert_eq!(records.len(), 3);

    let db_dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::open(&db_dir.path().join("hashup.db")).unwrap();
    store_all(&mut storage, &records);

    assert_eq!(count(&storage, "file_hashes"), 2);
    assert_eq!(count(&storage, "file_info"), 3);

    // The two identical files reference the same hash row
    let shared: i64 = storage
        .connection()
        .query_row(
            "SELECT COUNT(DISTINCT hash_id) FROM file_info
             WHERE file_path LIKE '%hello%'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(shared, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rescan_with_cache_publishes_nothing() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    scan_once(
        root.path(),
        Arc::clone(&cache),
        Arc::clone(&processor),
        Vec::new(),
    )
    .await;
    assert_eq!(processor.records().len(), 2);

    // Second walk over an unchanged tree with the cache retained
    scan_once(root.path(), cache, Arc::clone(&processor), Vec::new()).await;
    assert_eq!(processor.records().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rescan_after_checkpoint_reload_publishes_nothing() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache_path = cache_dir.path().join("cache");
    let processor = Arc::new(MemoryProcessor::default());

    // The scan saves the cache checkpoint on completion
    let cache = Arc::new(FileCache::new(1, &cache_path));
    scan_once(root.path(), cache, Arc::clone(&processor), Vec::new()).await;
    assert_eq!(processor.records().len(), 2);

    // A fresh process would reload the checkpoint from disk
    let reloaded = Arc::new(FileCache::new(1, &cache_path));
    scan_once(root.path(), reloaded, Arc::clone(&processor), Vec::new()).await;
    assert_eq!(processor.records().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_content_modification_republishes() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    scan_once(
        root.path(),
        Arc::clone(&cache),
        Arc::clone(&processor),
        Vec::new(),
    )
    .await;

    let db_dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::open(&db_dir.path().join("hashup.db")).unwrap();
    store_all(&mut storage, &processor.records());

    // Change the content at an already-seen path
    write_file(&root.path().join("a").join("hello.txt"), "HELLO\n");
    scan_once(
        root.path(),
        Arc::clone(&cache),
        Arc::clone(&processor),
        Vec::new(),
    )
    .await;

    let records = processor.records();
    // Exactly one additional publish, for the new (path, hash) pair
    assert_eq!(records.len(), 3);
    assert!(records[2].path.ends_with("hello.txt"));
    assert_eq!(records[2].size, 6);

    store_all(&mut storage, &records[2..]);
    assert_eq!(count(&storage, "file_hashes"), 3);
    assert_eq!(count(&storage, "file_info"), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ignore_patterns_never_reach_the_processor() {
    let root = create_scan_root();
    write_file(&root.path().join("a").join("skipme.iso"), "big image");

    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    scan_once(
        root.path(),
        cache,
        Arc::clone(&processor),
        vec![r"\.iso$".to_string()],
    )
    .await;

    let records = processor.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.path.ends_with(".iso")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_encrypted_records_survive_the_wire() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    scan_once(root.path(), cache, Arc::clone(&processor), Vec::new()).await;

    // Seal and open every record the way the processor and listener do
    let producer = CryptoMachine::from_passphrase("shared-passphrase");
    let consumer = CryptoMachine::from_passphrase("shared-passphrase");

    for record in processor.records() {
        let sealed = producer.encrypt(&record.to_msgpack().unwrap()).unwrap();
        let opened = consumer.decrypt(&sealed).unwrap();
        let decoded = ScannedFile::from_msgpack(&opened).unwrap();
        assert_eq!(decoded, record);
    }

    // A consumer with a different passphrase cannot open any of them
    let stranger = CryptoMachine::from_passphrase("other-passphrase");
    for record in processor.records() {
        let sealed = producer.encrypt(&record.to_msgpack().unwrap()).unwrap();
        assert!(stranger.decrypt(&sealed).is_err());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_scan_exits_cleanly_with_consistent_catalog() {
    let root = create_scan_root();
    let cache_dir = TempDir::new().unwrap();
    let cache = Arc::new(FileCache::new(1, cache_dir.path().join("cache")));
    let processor = Arc::new(MemoryProcessor::default());

    let shutdown = Arc::new(AtomicBool::new(true));
    let scanner = DirectoryScanner::new(
        root.path(),
        ScanOptions::default(),
        cache,
        Arc::clone(&shutdown),
    )
    .unwrap();

    // Cancellation before the first entry: a clean exit, nothing published
    let count_scanned = scanner
        .scan(Arc::clone(&processor) as Arc<dyn Processor>)
        .await
        .unwrap();
    assert_eq!(count_scanned, 0);
    assert!(processor.records().is_empty());

    // Whatever did get published lands as complete hash+info pairs
    let db_dir = TempDir::new().unwrap();
    let mut storage = SqliteStorage::open(&db_dir.path().join("hashup.db")).unwrap();
    store_all(&mut storage, &processor.records());

    let orphans: i64 = storage
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM file_info
             WHERE hash_id NOT IN (SELECT id FROM file_hashes)",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}
