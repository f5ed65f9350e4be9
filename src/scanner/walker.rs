//! Depth-first directory traversal with the ignore policy.
//!
//! The walker owns all filesystem handles on the producer side. It yields
//! one [`FileEntry`] per regular file that survives the ignore policy and
//! leaves hashing and publishing to the worker pool. Errors on individual
//! entries are logged and skipped; only the root being unreadable aborts
//! the walk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use regex::Regex;
use tracing::{debug, warn};

use super::ScanCounters;
use crate::error::{ScanError, ScanResult};

/// Directory names that are never worth inventorying. Matching directories
/// are pruned, so nothing below them is visited.
pub const IGNORED_DIRECTORIES: &[&str] = &[
    ".@__thumb",
    ".android",
    ".arduino15",
    ".arduinoIDE",
    ".azure",
    ".bun",
    ".bundle",
    ".cache",
    ".cargo",
    ".dart",
    ".dartServer",
    ".deno",
    ".dotnet",
    ".flutter",
    ".flutter-devtools",
    ".git",
    ".gradle",
    ".gradleServer",
    ".java",
    ".npm",
    ".ollama",
    ".pub-cache",
    ".pyenv",
    ".rbenv",
    ".rustup",
    ".rye",
    ".streams",
    ".vscode",
    "node_modules",
];

/// File basenames that are never worth inventorying.
pub const IGNORED_FILES: &[&str] = &[".DS_Store", "Thumbs.db", ".localized"];

/// Metadata for a regular file emitted by the walker
#[derive(Debug, Clone)]
pub struct FileEntry {
    /// Absolute path
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub mod_time: SystemTime,
}

/// Walker configuration
#[derive(Debug, Default)]
pub struct WalkOptions {
    /// Skip hidden files and prune hidden directories
    pub ignore_hidden: bool,
    /// User-supplied patterns matched against absolute paths; first match
    /// wins, matching directories are pruned
    pub ignore_patterns: Vec<Regex>,
}

impl WalkOptions {
    fn ignores_path(&self, abs_path: &str) -> bool {
        self.ignore_patterns.iter().any(|re| re.is_match(abs_path))
    }
}

/// Walk `root` depth-first, invoking `on_file` for every regular file that
/// passes the ignore policy. `counters.entries` ticks once per entry
/// inspected and feeds the progress display; `counters.non_regular` tracks
/// the entries rejected for not being regular files.
///
/// Returns the number of files handed to `on_file`. Observing the shutdown
/// flag stops the walk at the next entry boundary with
/// [`ScanError::Cancelled`]; callers treat that as a clean exit.
pub fn walk<F>(
    root: &Path,
    options: &WalkOptions,
    shutdown: &AtomicBool,
    counters: &ScanCounters,
    mut on_file: F,
) -> ScanResult<u64>
where
    F: FnMut(FileEntry) -> ScanResult<()>,
{
    let root = root.canonicalize().map_err(|source| ScanError::Walk {
        path: root.to_path_buf(),
        source,
    })?;

    let mut count = 0u64;
    walk_dir(&root, options, shutdown, counters, &mut on_file, &mut count)?;
    Ok(count)
}

fn walk_dir<F>(
    dir: &Path,
    options: &WalkOptions,
    shutdown: &AtomicBool,
    counters: &ScanCounters,
    on_file: &mut F,
    count: &mut u64,
) -> ScanResult<()>
where
    F: FnMut(FileEntry) -> ScanResult<()>,
{
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("error accessing {:?}: {}", dir, e);
            return Ok(());
        }
    };

    for entry in entries {
        if shutdown.load(Ordering::Relaxed) {
            return Err(ScanError::Cancelled);
        }
        counters.entries.fetch_add(1, Ordering::Relaxed);

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("error reading entry in {:?}: {}", dir, e);
                continue;
            }
        };

        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        // file_type does not follow symlinks
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(e) => {
                warn!("error accessing {:?}: {}", path, e);
                continue;
            }
        };

        if file_type.is_dir() {
            if options.ignore_hidden && name.len() > 1 && name.starts_with('.') {
                debug!("ignoring hidden directory: {:?}", path);
                continue;
            }
            if IGNORED_DIRECTORIES.contains(&name.as_ref()) {
                debug!("ignoring directory {:?}", path);
                continue;
            }
            if options.ignores_path(&path.to_string_lossy()) {
                debug!("ignoring path match {:?}", path);
                continue;
            }
            walk_dir(&path, options, shutdown, counters, on_file, count)?;
            continue;
        }

        if options.ignore_hidden && name.starts_with('.') {
            debug!("ignoring hidden file: {:?}", path);
            continue;
        }

        // Symlinks are not followed; sockets, fifos and devices are skipped
        if !file_type.is_file() {
            debug!("{}", ScanError::NotRegularFile { path });
            counters.non_regular.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        if IGNORED_FILES.contains(&name.as_ref()) {
            debug!("ignoring file {:?}", path);
            continue;
        }

        if options.ignores_path(&path.to_string_lossy()) {
            debug!("ignoring path match {:?}", path);
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                warn!("error accessing {:?}: {}", path, e);
                continue;
            }
        };

        *count += 1;
        on_file(FileEntry {
            path,
            size: metadata.len(),
            mod_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        })?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::{tempdir, TempDir};

    fn create_tree() -> TempDir {
        let dir = tempdir().unwrap();

        let mut f = File::create(dir.path().join("hello.txt")).unwrap();
        writeln!(f, "hello world").unwrap();

        fs::create_dir(dir.path().join("sub")).unwrap();
        let mut f = File::create(dir.path().join("sub").join("nested.log")).unwrap();
        writeln!(f, "nested").unwrap();

        dir
    }

    fn collect(root: &Path, options: &WalkOptions) -> Vec<FileEntry> {
        let shutdown = AtomicBool::new(false);
        let counters = ScanCounters::default();
        let mut files = Vec::new();
        walk(root, options, &shutdown, &counters, |entry| {
            files.push(entry);
            Ok(())
        })
        .unwrap();
        files
    }

    #[test]
    fn test_walk_finds_regular_files() {
        let dir = create_tree();
        let files = collect(dir.path(), &WalkOptions::default());

        assert_eq!(files.len(), 2);
        for file in &files {
            assert!(file.path.is_absolute());
            assert!(file.size > 0);
        }
    }

    #[test]
    fn test_hidden_files_and_directories() {
        let dir = create_tree();
        File::create(dir.path().join(".hidden")).unwrap();
        fs::create_dir(dir.path().join(".config")).unwrap();
        File::create(dir.path().join(".config").join("visible.txt")).unwrap();

        let options = WalkOptions {
            ignore_hidden: true,
            ..Default::default()
        };
        let files = collect(dir.path(), &options);
        assert_eq!(files.len(), 2);

        // With hidden allowed, both extra entries show up
        let files = collect(dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 4);
    }

    #[test]
    fn test_noisy_directories_are_pruned() {
        let dir = create_tree();
        for noisy in ["node_modules", ".git"] {
            fs::create_dir(dir.path().join(noisy)).unwrap();
            let mut f = File::create(dir.path().join(noisy).join("data")).unwrap();
            writeln!(f, "noise").unwrap();
        }

        let files = collect(dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_noisy_files_are_skipped() {
        let dir = create_tree();
        let mut f = File::create(dir.path().join(".DS_Store")).unwrap();
        writeln!(f, "finder junk").unwrap();
        let mut f = File::create(dir.path().join("Thumbs.db")).unwrap();
        writeln!(f, "explorer junk").unwrap();

        let files = collect(dir.path(), &WalkOptions::default());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_ignore_patterns_match_absolute_path() {
        let dir = create_tree();

        let options = WalkOptions {
            ignore_patterns: vec![Regex::new(r"\.log$").unwrap()],
            ..Default::default()
        };
        let files = collect(dir.path(), &options);
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("hello.txt"));

        // A pattern matching the subdirectory prunes it entirely
        let options = WalkOptions {
            ignore_patterns: vec![Regex::new(r"/sub$").unwrap()],
            ..Default::default()
        };
        let files = collect(dir.path(), &options);
        assert_eq!(files.len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_are_not_followed() {
        let dir = create_tree();
        std::os::unix::fs::symlink(
            dir.path().join("sub"),
            dir.path().join("sublink"),
        )
        .unwrap();
        std::os::unix::fs::symlink(
            dir.path().join("hello.txt"),
            dir.path().join("hello_link.txt"),
        )
        .unwrap();

        let shutdown = AtomicBool::new(false);
        let counters = ScanCounters::default();
        let mut files = Vec::new();
        walk(
            dir.path(),
            &WalkOptions::default(),
            &shutdown,
            &counters,
            |entry| {
                files.push(entry);
                Ok(())
            },
        )
        .unwrap();

        // Neither the dir symlink nor the file symlink produces entries,
        // and both are counted as skipped non-regular files
        assert_eq!(files.len(), 2);
        assert_eq!(counters.non_regular.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_counter_ticks_per_entry() {
        let dir = create_tree();
        let counters = ScanCounters::default();
        let shutdown = AtomicBool::new(false);

        walk(
            dir.path(),
            &WalkOptions::default(),
            &shutdown,
            &counters,
            |_| Ok(()),
        )
        .unwrap();

        // hello.txt, sub, sub/nested.log
        assert_eq!(counters.entries.load(Ordering::Relaxed), 3);
        assert_eq!(counters.non_regular.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_cancellation_stops_walk() {
        let dir = create_tree();
        let shutdown = AtomicBool::new(true);
        let counters = ScanCounters::default();

        let result = walk(
            dir.path(),
            &WalkOptions::default(),
            &shutdown,
            &counters,
            |_| Ok(()),
        );
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[test]
    fn test_unreadable_root_is_error() {
        let shutdown = AtomicBool::new(false);
        let counters = ScanCounters::default();
        let result = walk(
            Path::new("/nonexistent/root/12345"),
            &WalkOptions::default(),
            &shutdown,
            &counters,
            |_| Ok(()),
        );
        assert!(matches!(result, Err(ScanError::Walk { .. })));
    }
}
