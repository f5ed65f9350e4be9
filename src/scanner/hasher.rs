//! Content hashing with xxhash64.
//!
//! xxhash is an extremely fast non-cryptographic hash, which is the right
//! trade-off for inventory identity: collisions are tolerable because the
//! catalog keys observations by (path, host, hash), not hash alone.

use std::fs::File;
use std::hash::Hasher;
use std::io::Read;
use std::path::Path;

use twox_hash::XxHash64;

use crate::error::{ScanError, ScanResult};

/// Read buffer size for streaming hashing
const BUF_SIZE: usize = 64 * 1024;

/// Compute the 64-bit content hash of a file.
///
/// Streams the file through the hasher in fixed-size chunks, so memory use
/// is bounded regardless of file size. Returns the digest as 16 lowercase
/// hex characters, zero-padded.
pub fn hash_file(path: &Path) -> ScanResult<String> {
    let mut file = File::open(path).map_err(|source| ScanError::Hash {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = XxHash64::with_seed(0);
    let mut buf = [0u8; BUF_SIZE];

    loop {
        let n = file.read(&mut buf).map_err(|source| ScanError::Hash {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.write(&buf[..n]);
    }

    Ok(format!("{:016x}", hasher.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn test_hash_format() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "a.txt", b"hello world\n");

        let hash = hash_file(&path).unwrap();
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, hash.to_lowercase());
    }

    #[test]
    fn test_hash_depends_on_content_only() {
        let dir = tempdir().unwrap();
        let a = write_file(dir.path(), "a.txt", b"identical bytes");
        let b = write_file(dir.path(), "elsewhere.bin", b"identical bytes");
        let c = write_file(dir.path(), "c.txt", b"different bytes!");

        assert_eq!(hash_file(&a).unwrap(), hash_file(&b).unwrap());
        assert_ne!(hash_file(&a).unwrap(), hash_file(&c).unwrap());
    }

    #[test]
    fn test_hash_large_file_spans_buffers() {
        let dir = tempdir().unwrap();
        // Larger than one read buffer so the streaming path is exercised
        let big = vec![0xa5u8; BUF_SIZE * 3 + 17];
        let path = write_file(dir.path(), "big.bin", &big);

        let streamed = hash_file(&path).unwrap();

        let mut hasher = XxHash64::with_seed(0);
        hasher.write(&big);
        assert_eq!(streamed, format!("{:016x}", hasher.finish()));
    }

    #[test]
    fn test_hash_empty_file() {
        let dir = tempdir().unwrap();
        let path = write_file(dir.path(), "empty", b"");
        let hash = hash_file(&path).unwrap();
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = hash_file(Path::new("/nonexistent/file")).unwrap_err();
        assert!(matches!(err, ScanError::Hash { .. }));
    }
}
