//! In-memory implementation of the AssetStore trait.
//!
//! This is primarily for testing. Releases and assets live in a map and
//! every call is counted, so tests can assert how much network traffic a
//! sync run would have caused.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::store::{Asset, AssetState, AssetStore};

/// In-memory asset store.
///
/// Thread-safe via RwLock.
pub struct MemoryAssetStore {
    download_base: String,
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    releases: BTreeMap<String, MemoryRelease>,
    /// Keys whose uploads are rejected.
    failing_uploads: HashSet<String>,
    calls: CallCounts,
}

#[derive(Default)]
struct MemoryRelease {
    body: String,
    /// Assets in upload order.
    assets: Vec<StoredAsset>,
}

struct StoredAsset {
    key: String,
    state: AssetState,
    data: Vec<u8>,
}

/// Number of calls made to each store operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub upload: usize,
    pub delete: usize,
    pub download: usize,
    pub create: usize,
    pub edit: usize,
}

impl CallCounts {
    /// Total number of calls that would hit the network.
    pub fn total(&self) -> usize {
        self.list + self.upload + self.delete + self.download + self.create + self.edit
    }
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::with_download_base("https://example.invalid/releases/download")
    }

    pub fn with_download_base(download_base: impl Into<String>) -> Self {
        Self {
            download_base: download_base.into(),
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Places an asset directly into a release, creating the release if
    /// needed. Not counted as a call.
    pub fn insert_asset(&self, release: &str, key: &str, data: &[u8], state: AssetState) {
        let mut inner = self.inner.write().unwrap();
        let rel = inner.releases.entry(release.to_string()).or_default();
        rel.assets.retain(|a| a.key != key);
        rel.assets.push(StoredAsset {
            key: key.to_string(),
            state,
            data: data.to_vec(),
        });
    }

    /// Makes every future upload of `key` fail.
    pub fn fail_uploads_of(&self, key: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.failing_uploads.insert(key.to_string());
    }

    pub fn clear_upload_failures(&self) {
        self.inner.write().unwrap().failing_uploads.clear();
    }

    pub fn has_release(&self, release: &str) -> bool {
        self.inner.read().unwrap().releases.contains_key(release)
    }

    pub fn release_body(&self, release: &str) -> Option<String> {
        let inner = self.inner.read().unwrap();
        inner.releases.get(release).map(|r| r.body.clone())
    }

    /// Asset keys of a release, in upload order.
    pub fn asset_keys(&self, release: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        inner
            .releases
            .get(release)
            .map(|r| r.assets.iter().map(|a| a.key.clone()).collect())
            .unwrap_or_default()
    }

    pub fn asset_data(&self, release: &str, key: &str) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        inner
            .releases
            .get(release)?
            .assets
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.data.clone())
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.read().unwrap().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.inner.write().unwrap().calls = CallCounts::default();
    }
}

impl Default for MemoryAssetStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_release(release: &str) -> SyncError {
    SyncError::Transport(format!("Release {} does not exist", release))
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn list_assets(&self, release: &str) -> Result<Vec<Asset>, SyncError> {
        let mut inner = self.inner.write().unwrap();
        inner.calls.list += 1;
        let rel = inner
            .releases
            .get(release)
            .ok_or_else(|| missing_release(release))?;
        Ok(rel
            .assets
            .iter()
            .map(|a| Asset {
                key: a.key.clone(),
                state: a.state.clone(),
            })
            .collect())
    }

    async fn upload_asset(&self, release: &str, path: &Path, key: &str) -> Result<(), SyncError> {
        let data = tokio::fs::read(path).await?;
        let mut inner = self.inner.write().unwrap();
        inner.calls.upload += 1;

        let upload_failed = |message: &str| SyncError::UploadFailed {
            release: release.to_string(),
            key: key.to_string(),
            message: message.to_string(),
        };

        if inner.failing_uploads.contains(key) {
            return Err(upload_failed("injected failure"));
        }
        let rel = inner
            .releases
            .get_mut(release)
            .ok_or_else(|| upload_failed("release does not exist"))?;
        if rel.assets.iter().any(|a| a.key == key) {
            return Err(upload_failed("asset already exists"));
        }
        rel.assets.push(StoredAsset {
            key: key.to_string(),
            state: AssetState::Uploaded,
            data,
        });
        Ok(())
    }

    async fn delete_asset(&self, release: &str, key: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().unwrap();
        inner.calls.delete += 1;
        let rel = inner
            .releases
            .get_mut(release)
            .ok_or_else(|| missing_release(release))?;
        rel.assets.retain(|a| a.key != key);
        Ok(())
    }

    async fn download_asset(
        &self,
        release: &str,
        key: &str,
        dest: &Path,
    ) -> Result<(), SyncError> {
        let data = {
            let mut inner = self.inner.write().unwrap();
            inner.calls.download += 1;
            inner
                .releases
                .get(release)
                .and_then(|r| r.assets.iter().find(|a| a.key == key && a.state.is_uploaded()))
                .map(|a| a.data.clone())
                .ok_or_else(|| SyncError::NotFound {
                    release: release.to_string(),
                    key: key.to_string(),
                })?
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn create_release(&self, name: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().unwrap();
        inner.calls.create += 1;
        inner.releases.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn edit_release_body(&self, name: &str, body: &str) -> Result<(), SyncError> {
        let mut inner = self.inner.write().unwrap();
        inner.calls.edit += 1;
        let rel = inner
            .releases
            .get_mut(name)
            .ok_or_else(|| missing_release(name))?;
        rel.body = body.to_string();
        Ok(())
    }

    fn download_base(&self) -> String {
        self.download_base.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_list_download() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"payload").unwrap();

        let store = MemoryAssetStore::new();
        store.create_release("MD5").await.unwrap();
        store.upload_asset("MD5", &src, "abc").await.unwrap();

        let assets = store.list_assets("MD5").await.unwrap();
        assert_eq!(assets.len(), 1);
        assert!(assets[0].state.is_uploaded());

        let dest = dir.path().join("out/abc");
        store.download_asset("MD5", "abc", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert_eq!(store.calls().total(), 4);
    }

    #[tokio::test]
    async fn test_partial_asset_is_not_downloadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryAssetStore::new();
        store.insert_asset("MD5", "abc", b"half", AssetState::Partial);

        let err = store
            .download_asset("MD5", "abc", &dir.path().join("abc"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_absent_asset_is_ok() {
        let store = MemoryAssetStore::new();
        store.create_release("SHA256").await.unwrap();
        store.delete_asset("SHA256", "missing").await.unwrap();
    }
}
