//! Stable local identity for files queued for upload.
//!
//! A fingerprint recognizes "the same file" across process restarts without
//! any server round trip: it combines name, size, mtime and a SHA-256 of a
//! bounded content prefix, so gigabyte files are identified without hashing
//! them whole.

use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

/// How much of the file content participates in the fingerprint: 5 MiB.
pub const PREFIX_HASH_SIZE: u64 = 5 * 1024 * 1024;

/// Errors produced while fingerprinting a file.
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn chunk_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-256 of an entire file, streaming, and returns the hex digest.
///
/// This is the content hash the remote uses for deduplication.
pub fn full_hash(path: &Path) -> Result<String, FingerprintError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Derives the fingerprint of a file.
///
/// Reads at most [`PREFIX_HASH_SIZE`] bytes, hashes the prefix, then hashes
/// `"{name}|{size}|{mtime_millis}|{prefix_hash}"` into the final identifier.
/// Deterministic: any change to name, size, mtime or prefix content yields a
/// different fingerprint.
pub fn fingerprint(path: &Path) -> Result<String, FingerprintError> {
    let file = std::fs::File::open(path)?;
    let meta = file.metadata()?;
    let size = meta.len();
    let mtime_millis = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);

    let prefix_len = size.min(PREFIX_HASH_SIZE);
    let mut hasher = Sha256::new();
    let mut remaining = prefix_len;
    let mut reader = file;
    let mut buf = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    let prefix_hash = hex::encode(hasher.finalize());

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let material = format!("{name}|{size}|{mtime_millis}|{prefix_hash}");

    let mut outer = Sha256::new();
    outer.update(material.as_bytes());
    Ok(hex::encode(outer.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn fingerprint_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"some content");
        let f1 = fingerprint(&path).unwrap();
        let f2 = fingerprint(&path).unwrap();
        assert_eq!(f1, f2);
        assert_eq!(f1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn fingerprint_differs_by_name() {
        let dir = TempDir::new().unwrap();
        let p1 = create_test_file(dir.path(), "a.bin", b"same content");
        let p2 = create_test_file(dir.path(), "b.bin", b"same content");
        assert_ne!(fingerprint(&p1).unwrap(), fingerprint(&p2).unwrap());
    }

    #[test]
    fn fingerprint_differs_by_content() {
        let dir = TempDir::new().unwrap();
        let p1 = create_test_file(dir.path(), "a.bin", b"content one");
        let f1 = fingerprint(&p1).unwrap();
        // Same name and size, different bytes.
        let p2 = create_test_file(dir.path(), "a.bin", b"content two");
        assert_ne!(f1, fingerprint(&p2).unwrap());
    }

    #[test]
    fn fingerprint_differs_by_size() {
        let dir = TempDir::new().unwrap();
        let p1 = create_test_file(dir.path(), "a.bin", b"short");
        let f1 = fingerprint(&p1).unwrap();
        let p2 = create_test_file(dir.path(), "a.bin", b"rather longer body");
        assert_ne!(f1, fingerprint(&p2).unwrap());
    }

    #[test]
    fn fingerprint_differs_by_mtime_only() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "a.bin", b"same content");
        let f1 = fingerprint(&path).unwrap();

        // Identical bytes, modification time pushed back an hour.
        let earlier = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(earlier).unwrap();
        assert_ne!(f1, fingerprint(&path).unwrap());
    }

    #[test]
    fn fingerprint_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty", b"");
        let f = fingerprint(&path).unwrap();
        assert_eq!(f.len(), 64);
    }

    #[test]
    fn full_hash_matches_chunk_hash_of_bytes() {
        let dir = TempDir::new().unwrap();
        let data = b"the whole file body";
        let path = create_test_file(dir.path(), "a.bin", data);
        assert_eq!(full_hash(&path).unwrap(), chunk_hash(data));
    }

    #[test]
    fn chunk_hash_different_data() {
        assert_ne!(chunk_hash(b"hello"), chunk_hash(b"world"));
    }

    #[test]
    fn missing_file_propagates_io_error() {
        let dir = TempDir::new().unwrap();
        let err = fingerprint(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, FingerprintError::Io(_)));
    }
}
