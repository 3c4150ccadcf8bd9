//! releasesync - Content-addressed test data stored as release assets
//!
//! This library keeps a directory of test data files in sync with the
//! assets of one release per hash algorithm. Every file is stored under its
//! checksum, so old test suites can still fetch a file after its name has
//! been reused for new content.
//!
//! # Features
//!
//! - **Content Addressing**: Assets are keyed by MD5/SHA-2 checksum
//! - **Manifest**: `<ALGO>.csv` maps checksums to filenames, in upload order
//! - **Self-Healing Uploads**: Partially uploaded assets are removed and retried
//! - **Cached Downloads**: Files already in the local cache are never fetched again
//! - **Markdown Index**: `<ALGO>.md` and the release notes link every file
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use releasesync::{GitHubAssetStore, HashAlgorithm, LocalCache, SyncConfig, SyncEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::default();
//! let store = Arc::new(GitHubAssetStore::new("Slicer/SlicerTestingData", None)?);
//! let cache = LocalCache::open(config.cache_dir(HashAlgorithm::Md5), HashAlgorithm::Md5)?;
//! let engine = SyncEngine::new(cache, store);
//!
//! let manifest = engine.require_remote_manifest().await?;
//! engine
//!     .fetch(&manifest, &config.download_dir, config.max_concurrent_downloads, false)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod checksum;
mod error;
mod github;
mod index;
mod manifest;
mod memory;
mod orchestrator;
mod store;
mod types;

// Re-export public API
pub use cache::LocalCache;
pub use checksum::{compute_file_digest, digest_bytes, digest_file_blocking};
pub use error::SyncError;
pub use github::GitHubAssetStore;
pub use index::{asset_url, render_index};
pub use manifest::{Manifest, ManifestEntry};
pub use memory::{CallCounts, MemoryAssetStore};
pub use orchestrator::SyncEngine;
pub use store::{Asset, AssetState, AssetStore};
pub use types::{FetchReport, HashAlgorithm, Operation, SyncConfig, UpdateReport};
