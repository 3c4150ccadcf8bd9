//! File digests for every supported hash algorithm.

use crate::error::SyncError;
use crate::types::HashAlgorithm;
use md5::{Digest, Md5};
use sha2::{Sha224, Sha256, Sha384, Sha512};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

const BUFFER_SIZE: usize = 1024 * 1024;

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn digest_with<R: Read>(algo: HashAlgorithm, reader: R) -> io::Result<String> {
    match algo {
        HashAlgorithm::Md5 => digest_reader::<Md5, _>(reader),
        HashAlgorithm::Sha224 => digest_reader::<Sha224, _>(reader),
        HashAlgorithm::Sha256 => digest_reader::<Sha256, _>(reader),
        HashAlgorithm::Sha384 => digest_reader::<Sha384, _>(reader),
        HashAlgorithm::Sha512 => digest_reader::<Sha512, _>(reader),
    }
}

/// Lowercase hex digest of an in-memory buffer.
pub fn digest_bytes(algo: HashAlgorithm, data: &[u8]) -> String {
    // Reading from a slice cannot fail.
    digest_with(algo, data).unwrap_or_default()
}

/// Lowercase hex digest of a file, read in 1MB chunks.
pub fn digest_file_blocking(algo: HashAlgorithm, path: &Path) -> io::Result<String> {
    let file = std::fs::File::open(path)?;
    let reader = io::BufReader::with_capacity(BUFFER_SIZE, file);
    digest_with(algo, reader)
}

/// Computes the digest of a local file.
///
/// Hashing runs in a blocking task to avoid stalling the async runtime.
///
/// # Arguments
///
/// * `algo` - Hash algorithm to apply
/// * `path` - Path to the file
///
/// # Returns
///
/// The digest as a lowercase hexadecimal string, or an error.
pub async fn compute_file_digest(algo: HashAlgorithm, path: &Path) -> Result<String, SyncError> {
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || digest_file_blocking(algo, &path))
        .await
        .map_err(|e| SyncError::IoError(io::Error::other(format!("Task join error: {}", e))))?
        .map_err(SyncError::IoError)
}

/// Checks whether a cached file exists and hashes to `checksum`.
///
/// # Returns
///
/// `Ok(true)` if the file can be reused without downloading,
/// `Ok(false)` if it is absent or stale,
/// `Err` if it exists but cannot be read.
pub async fn verify_cached_file(
    algo: HashAlgorithm,
    path: &Path,
    checksum: &str,
) -> Result<bool, SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(m) if m.is_file() => {}
        _ => return Ok(false),
    }

    let actual = compute_file_digest(algo, path).await?;
    if actual == checksum {
        debug!("Cache hit for {}", checksum);
        Ok(true)
    } else {
        warn!(
            "Stale cache file {}: {} digest is {}",
            path.display(),
            algo,
            actual
        );
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_known_digests() {
        assert_eq!(
            digest_bytes(HashAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            digest_bytes(HashAlgorithm::Sha256, b"hello\n"),
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(
            digest_bytes(HashAlgorithm::Sha224, b""),
            "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f"
        );
    }

    #[test]
    fn test_digest_lengths_match_algorithm() {
        for algo in HashAlgorithm::ALL {
            assert_eq!(digest_bytes(algo, b"x").len(), algo.hex_len(), "{}", algo);
        }
    }

    #[tokio::test]
    async fn test_file_digest_matches_bytes() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"some test data").unwrap();
        f.flush().unwrap();

        let from_file = compute_file_digest(HashAlgorithm::Sha384, f.path())
            .await
            .unwrap();
        assert_eq!(from_file, digest_bytes(HashAlgorithm::Sha384, b"some test data"));
    }

    #[tokio::test]
    async fn test_verify_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let checksum = digest_bytes(HashAlgorithm::Md5, b"x");
        let path = dir.path().join(&checksum);

        assert!(!verify_cached_file(HashAlgorithm::Md5, &path, &checksum)
            .await
            .unwrap());

        std::fs::write(&path, b"x").unwrap();
        assert!(verify_cached_file(HashAlgorithm::Md5, &path, &checksum)
            .await
            .unwrap());

        std::fs::write(&path, b"y").unwrap();
        assert!(!verify_cached_file(HashAlgorithm::Md5, &path, &checksum)
            .await
            .unwrap());
    }
}
