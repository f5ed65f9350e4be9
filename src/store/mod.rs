//! Consumer side: listener, catalog storage and statistics.

pub mod listener;
pub mod stats;
pub mod storage;

pub use listener::{NatsListener, NatsListenerOptions};
pub use stats::ProcessStats;
pub use storage::{FileStored, SqliteStorage, Storage};
