//! Interface to the release-hosting service.
//!
//! A release is treated as a key-value store of assets. Implementations:
//! [`GitHubAssetStore`](crate::GitHubAssetStore) for GitHub releases
//! and [`MemoryAssetStore`](crate::MemoryAssetStore) for tests.

use crate::error::SyncError;
use async_trait::async_trait;
use std::path::Path;

/// Upload state of a remote asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetState {
    /// Upload completed; the asset is usable.
    Uploaded,
    /// Upload started but never finished.
    Partial,
    /// Any other state reported by the service.
    Other(String),
}

impl AssetState {
    /// Maps the service's state string to an [`AssetState`].
    pub fn from_service(state: &str) -> Self {
        match state {
            "uploaded" => AssetState::Uploaded,
            "open" | "starter" => AssetState::Partial,
            other => AssetState::Other(other.to_string()),
        }
    }

    pub fn is_uploaded(&self) -> bool {
        matches!(self, AssetState::Uploaded)
    }
}

/// A remote asset of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Asset name: a checksum, or a fixed manifest/index name.
    pub key: String,
    pub state: AssetState,
}

/// Operations on named releases and their assets.
///
/// Every call reflects the current remote state; callers must not assume
/// anything survives between runs.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Lists every asset of a release, with its upload state.
    async fn list_assets(&self, release: &str) -> Result<Vec<Asset>, SyncError>;

    /// Uploads a local file as asset `key`.
    ///
    /// Fails with [`SyncError::UploadFailed`] if the service rejects it.
    async fn upload_asset(&self, release: &str, path: &Path, key: &str) -> Result<(), SyncError>;

    /// Deletes asset `key`. Deleting an absent asset is not an error.
    async fn delete_asset(&self, release: &str, key: &str) -> Result<(), SyncError>;

    /// Downloads asset `key` to `dest`.
    ///
    /// Fails with [`SyncError::NotFound`] if the release has no such asset.
    async fn download_asset(&self, release: &str, key: &str, dest: &Path)
        -> Result<(), SyncError>;

    /// Creates a published release named `name`, if it does not exist yet.
    async fn create_release(&self, name: &str) -> Result<(), SyncError>;

    /// Replaces the release body text.
    async fn edit_release_body(&self, name: &str, body: &str) -> Result<(), SyncError>;

    /// Base URL that asset download links are built from.
    fn download_base(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_state_mapping() {
        assert_eq!(AssetState::from_service("uploaded"), AssetState::Uploaded);
        assert_eq!(AssetState::from_service("open"), AssetState::Partial);
        assert_eq!(
            AssetState::from_service("weird"),
            AssetState::Other("weird".to_string())
        );
        assert!(!AssetState::from_service("starter").is_uploaded());
    }
}
