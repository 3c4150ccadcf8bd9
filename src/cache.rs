//! Content-addressed local mirror of release assets.
//!
//! One directory per algorithm; every file is stored under its checksum.
//! The manifest and index files are kept alongside as `<ALGO>.csv` and
//! `<ALGO>.md`.

use crate::checksum::{compute_file_digest, verify_cached_file};
use crate::error::SyncError;
use crate::types::HashAlgorithm;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LocalCache {
    algo: HashAlgorithm,
    dir: PathBuf,
}

impl LocalCache {
    /// Opens (creating if needed) the cache directory for `algo`.
    pub fn open(dir: impl Into<PathBuf>, algo: HashAlgorithm) -> Result<Self, SyncError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { algo, dir })
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cached copy for `checksum`.
    pub fn path_for(&self, checksum: &str) -> PathBuf {
        self.dir.join(checksum)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(self.algo.manifest_asset())
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(self.algo.index_asset())
    }

    pub fn contains(&self, checksum: &str) -> bool {
        self.path_for(checksum).is_file()
    }

    /// Hashes `source` and copies it into the cache under its checksum.
    ///
    /// An existing cached copy is kept only if it still hashes to the
    /// checksum; a stale one is replaced.
    ///
    /// # Returns
    ///
    /// The checksum of `source`.
    pub async fn ingest(&self, source: &Path) -> Result<String, SyncError> {
        let checksum = compute_file_digest(self.algo, source).await?;
        let target = self.path_for(&checksum);

        if self.holds_valid(&checksum).await? {
            debug!("{} already cached as {}", source.display(), checksum);
        } else {
            // Copy under a temporary name so an interrupted copy never
            // leaves a truncated file at the checksum path.
            let partial = self.dir.join(format!(".{}.partial", checksum));
            tokio::fs::copy(source, &partial).await?;
            tokio::fs::rename(&partial, &target).await?;
            debug!("Cached {} as {}", source.display(), checksum);
        }

        Ok(checksum)
    }

    /// Whether the cached copy exists and still hashes to `checksum`.
    ///
    /// A stale copy is removed so it can be fetched again.
    pub async fn holds_valid(&self, checksum: &str) -> Result<bool, SyncError> {
        let path = self.path_for(checksum);
        if verify_cached_file(self.algo, &path, checksum).await? {
            return Ok(true);
        }
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(false)
    }
}
