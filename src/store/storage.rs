//! SQLite catalog schema and storage.
//!
//! The catalog splits identity in two: `file_hashes` is the deduplicated
//! set of distinct content hashes, `file_info` records every observation of
//! a content at a (path, host). The same bytes showing up at two paths or
//! on two hosts share one `file_hashes` row and get one `file_info` row
//! each.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::ScannedFile;

/// SQL to create the content identity table
const CREATE_FILE_HASHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_hashes (
    id INTEGER PRIMARY KEY,
    file_hash TEXT NOT NULL UNIQUE
)
"#;

/// SQL to create the observation table
/// Note: modified_date is Unix epoch seconds; formatting happens at query
/// time. updated_date is reserved and not written by the pipeline.
const CREATE_FILE_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_info (
    id INTEGER PRIMARY KEY,
    file_path TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    modified_date INTEGER NOT NULL,
    updated_date INTEGER,
    hash_id INTEGER NOT NULL REFERENCES file_hashes(id),
    host TEXT NOT NULL,
    extension TEXT,
    file_hash TEXT NOT NULL,
    UNIQUE (file_path, host, file_hash)
)
"#;

/// Indexes for the query layer
const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_file_info_host ON file_info(host)",
    "CREATE INDEX IF NOT EXISTS idx_file_info_extension ON file_info(extension)",
    "CREATE INDEX IF NOT EXISTS idx_file_info_hash ON file_info(file_hash)",
];

/// Open policy: enforce referential integrity, WAL for concurrent readers,
/// tolerate short writer contention, keep a ~20 MiB page cache.
const OPEN_PRAGMAS: &str = r#"
PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA cache_size = -20000;
PRAGMA synchronous = NORMAL;
"#;

/// Outcome of a store call: which of the two rows were actually written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStored {
    /// A new `file_hashes` row was inserted
    pub hash_written: bool,
    /// A new `file_info` row was inserted
    pub info_written: bool,
}

impl FileStored {
    /// At least one row was written
    pub fn dirty(&self) -> bool {
        self.hash_written || self.info_written
    }

    /// Both rows were written (a never-before-seen content and observation)
    pub fn both(&self) -> bool {
        self.hash_written && self.info_written
    }

    /// Nothing was written; the record was already fully present
    pub fn clean(&self) -> bool {
        !self.hash_written && !self.info_written
    }
}

/// Catalog sink for scanned-file records. The single method keeps the
/// listener decoupled from the engine, so tests can substitute an
/// in-memory implementation.
pub trait Storage: Send {
    /// Persist one record idempotently: storing the same record twice
    /// leaves exactly one observation row and returns a clean outcome the
    /// second time.
    fn store(&mut self, file: &ScannedFile) -> StoreResult<FileStored>;
}

/// SQLite-backed catalog. Owns one connection; prepared statements are
/// cached per connection and not shared across listeners.
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Open (or create) the catalog at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        debug!("opening database {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::CreateFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(OPEN_PRAGMAS)?;
        create_tables(&conn)?;

        Ok(Self { conn })
    }

    /// Read-only handle to the underlying connection, for tests and the
    /// query layer.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Apply the schema idempotently.
pub fn create_tables(conn: &Connection) -> StoreResult<()> {
    conn.execute(CREATE_FILE_HASHES_TABLE, [])?;
    conn.execute(CREATE_FILE_INFO_TABLE, [])?;
    for sql in CREATE_INDEXES {
        conn.execute(sql, [])?;
    }
    Ok(())
}

impl Storage for SqliteStorage {
    fn store(&mut self, file: &ScannedFile) -> StoreResult<FileStored> {
        let tx = self.conn.transaction()?;

        let (hash_id, hash_written) = save_file_hash(&tx, &file.hash)?;
        let info_written = save_file_info(&tx, hash_id, file)?;

        tx.commit()?;

        Ok(FileStored {
            hash_written,
            info_written,
        })
    }
}

/// Look up the hash row, inserting it when absent. Returns the row id and
/// whether an insert happened.
fn save_file_hash(tx: &Transaction, hash: &str) -> StoreResult<(i64, bool)> {
    let existing: Option<i64> = tx
        .prepare_cached("SELECT id FROM file_hashes WHERE file_hash = ?1")?
        .query_row([hash], |row| row.get(0))
        .optional()?;

    if let Some(id) = existing {
        return Ok((id, false));
    }

    tx.prepare_cached("INSERT INTO file_hashes (file_hash) VALUES (?1)")?
        .execute([hash])?;
    Ok((tx.last_insert_rowid(), true))
}

/// Insert the observation row unless (path, host, hash) is already present.
fn save_file_info(tx: &Transaction, hash_id: i64, file: &ScannedFile) -> StoreResult<bool> {
    let existing: Option<i64> = tx
        .prepare_cached(
            "SELECT id FROM file_info WHERE file_path = ?1 AND host = ?2 AND file_hash = ?3",
        )?
        .query_row(params![file.path, file.hostname, file.hash], |row| {
            row.get(0)
        })
        .optional()?;

    if existing.is_some() {
        return Ok(false);
    }

    tx.prepare_cached(
        "INSERT INTO file_info (
            file_path, file_size, modified_date, hash_id,
            host, extension, file_hash
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?
    .execute(params![
        file.path,
        file.size,
        file.mod_time,
        hash_id,
        file.hostname,
        file.extension,
        file.hash,
    ])?;
    Ok(true)
}
