//! The per-file record flowing through the pipeline.

use serde::{Deserialize, Serialize};

/// A single scanned file, as published on the work queue.
///
/// The record is encoded as a MessagePack map with lowercase field names so
/// that consumers can decode it without sharing Rust types. `hash` is a
/// function of file content alone; `path` and `hostname` identify where the
/// content was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Absolute path of the file on the origin host
    pub path: String,
    /// File size in bytes
    pub size: i64,
    /// Last modification time, Unix epoch seconds
    pub mod_time: i64,
    /// 64-bit content hash, 16 lowercase hex characters
    pub hash: String,
    /// Extension after the final dot of the basename, lowercased, may be empty
    pub extension: String,
    /// Origin host as the scanner saw it
    pub hostname: String,
}

impl ScannedFile {
    /// Encode the record as a MessagePack map with named fields.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec_named(self)
    }

    /// Decode a record from its MessagePack map encoding.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScannedFile {
        ScannedFile {
            path: "/home/user/notes.txt".into(),
            size: 1024,
            mod_time: 1_700_000_000,
            hash: "00000000deadbeef".into(),
            extension: "txt".into(),
            hostname: "workstation".into(),
        }
    }

    #[test]
    fn test_msgpack_round_trip() {
        let file = sample();
        let bytes = file.to_msgpack().unwrap();
        let decoded = ScannedFile::from_msgpack(&bytes).unwrap();
        assert_eq!(file, decoded);
    }

    #[test]
    fn test_msgpack_uses_named_fields() {
        // The wire format is a self-describing map, so the raw bytes must
        // contain the field names.
        let bytes = sample().to_msgpack().unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        for name in ["path", "size", "mod_time", "hash", "extension", "hostname"] {
            assert!(raw.contains(name), "missing field name {name}");
        }
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(ScannedFile::from_msgpack(b"not msgpack").is_err());
        assert!(ScannedFile::from_msgpack(&[]).is_err());
    }
}
