//! Error types for hashup
//!
//! Design philosophy:
//! - Use thiserror for structured error types in library code
//! - Errors should be actionable - include context about what to do
//! - Cancellation is a sentinel, not a failure; it must travel through the
//!   worker pool without being logged as an error

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the hashup application
#[derive(Error, Debug)]
pub enum HashupError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Scanner errors
    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    /// Broker errors (connect, publish, fetch, ack)
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Encryption/decryption errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Catalog errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration and CLI errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file does not exist
    #[error("config file not found at '{path}'")]
    NotFound { path: PathBuf },

    /// Config file could not be parsed
    #[error("failed to parse config file '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    /// Invalid worker count
    #[error("invalid scanning concurrency {count}: must be between 1 and {max}")]
    InvalidConcurrency { count: usize, max: usize },

    /// Encryption key missing
    #[error("encryption key is required")]
    MissingEncryptionKey,

    /// NATS server URL missing
    #[error("NATS server URL is required")]
    MissingNatsUrl,

    /// Invalid ignore pattern
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },

    /// Ignore file could not be read
    #[error("failed to read ignore file '{path}': {reason}")]
    IgnoreFile { path: PathBuf, reason: String },
}

/// Scanner errors
#[derive(Error, Debug)]
pub enum ScanError {
    /// Cooperative cancellation sentinel. Workers treat this as a normal
    /// exit, never as a failure.
    #[error("scan cancelled")]
    Cancelled,

    /// Failed to read a directory or entry
    #[error("failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to hash a file's contents
    #[error("failed to hash '{path}': {source}")]
    Hash {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Entry is not a regular file
    #[error("not a regular file: '{path}'")]
    NotRegularFile { path: PathBuf },

    /// Task queue closed while submitting work
    #[error("worker pool queue closed unexpectedly")]
    PoolClosed,
}

/// Broker errors shared by the publishing and consuming sides
#[derive(Error, Debug)]
pub enum QueueError {
    /// Failed to establish the broker connection
    #[error("failed to connect to NATS server '{url}': {reason}")]
    ConnectFailed { url: String, reason: String },

    /// Stream lookup or creation failed
    #[error("failed to set up stream '{stream}': {reason}")]
    StreamSetupFailed { stream: String, reason: String },

    /// Durable consumer creation failed
    #[error("failed to set up consumer '{name}': {reason}")]
    ConsumerSetupFailed { name: String, reason: String },

    /// Record could not be serialized for the wire
    #[error("failed to serialize record: {0}")]
    Serialize(String),

    /// Publish was rejected or not acknowledged
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Batch fetch failed
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// Message acknowledgment failed
    #[error("ack failed: {0}")]
    AckFailed(String),
}

/// Encryption/decryption errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Encryption failure
    #[error("encryption failed")]
    Encrypt,

    /// Decryption failure (wrong key or corrupted data)
    #[error("decryption failed")]
    Decrypt,

    /// Ciphertext shorter than the nonce prefix
    #[error("ciphertext too short")]
    TooShort,
}

/// Catalog errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to create the database file or its parent directory
    #[error("failed to create database at '{path}': {reason}")]
    CreateFailed { path: PathBuf, reason: String },
}

/// Result type alias for HashupError
pub type Result<T> = std::result::Result<T, HashupError>;

/// Result type alias for ConfigError
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for ScanError
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Result type alias for QueueError
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Result type alias for StoreError
pub type StoreResult<T> = std::result::Result<T, StoreError>;
