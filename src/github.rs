//! GitHub releases implementation of the AssetStore trait.

use crate::error::SyncError;
use crate::store::{Asset, AssetState, AssetStore};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, info, warn};

const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_UPLOADS_URL: &str = "https://uploads.github.com";
const DEFAULT_WEB_URL: &str = "https://github.com";
const ASSETS_PER_PAGE: usize = 100;

/// Release fields used by the sync.
#[derive(Deserialize, Debug, Clone)]
struct ReleaseInfo {
    id: u64,
}

/// Asset fields used by the sync.
#[derive(Deserialize, Debug, Clone)]
struct RemoteAsset {
    id: u64,
    name: String,
    state: String,
}

/// Release ids and asset ids by name, as last seen by this process.
#[derive(Default)]
struct Listings {
    release_ids: HashMap<String, u64>,
    asset_ids: HashMap<String, HashMap<String, u64>>,
}

/// Asset store backed by the GitHub REST API.
///
/// Releases are looked up by tag; the tag and the release name are the same.
/// Downloads go through the public `releases/download` URLs, which are not
/// subject to the API rate limit. Release and asset ids are remembered
/// after the first lookup, so deletes and uploads cost one request each;
/// [`AssetStore::list_assets`] always refreshes them.
///
/// # Example
///
/// ```
/// use releasesync::GitHubAssetStore;
///
/// let _store = GitHubAssetStore::new("Slicer/SlicerTestingData", None).unwrap();
/// assert!(GitHubAssetStore::new("not-a-repo", None).is_err());
/// ```
#[derive(Clone)]
pub struct GitHubAssetStore {
    client: reqwest::Client,
    repo: String,
    token: Option<String>,
    api_url: String,
    uploads_url: String,
    web_url: String,
    listings: Arc<Mutex<Listings>>,
    /// Download attempts after the first failure.
    retry_attempts: usize,
    /// Delay between download attempts.
    retry_delay_ms: u64,
}

impl GitHubAssetStore {
    /// Creates a store for `owner/name`.
    pub fn new(repo: &str, token: Option<String>) -> Result<Self, SyncError> {
        let valid = matches!(
            repo.split_once('/'),
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
        );
        if !valid {
            return Err(SyncError::InvalidConfig(format!(
                "GitHub repository must be owner/name, got {:?}",
                repo
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("releasesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            repo: repo.to_string(),
            token: token.filter(|t| !t.is_empty()),
            api_url: DEFAULT_API_URL.to_string(),
            uploads_url: DEFAULT_UPLOADS_URL.to_string(),
            web_url: DEFAULT_WEB_URL.to_string(),
            listings: Arc::new(Mutex::new(Listings::default())),
            retry_attempts: 5,
            retry_delay_ms: 10_000,
        })
    }

    /// Points the store at another API host (e.g. GitHub Enterprise).
    pub fn with_api_urls(mut self, api_url: &str, uploads_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self.uploads_url = uploads_url.trim_end_matches('/').to_string();
        self
    }

    /// Sets the host that serves release downloads.
    pub fn with_web_url(mut self, web_url: &str) -> Self {
        self.web_url = web_url.trim_end_matches('/').to_string();
        self
    }

    /// Sets how often, and how far apart, failed downloads are retried.
    pub fn with_retry(mut self, attempts: usize, delay_ms: u64) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay_ms = delay_ms;
        self
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repo, path)
    }

    /// Looks up a release by tag. `None` if it does not exist.
    async fn find_release(&self, name: &str) -> Result<Option<ReleaseInfo>, SyncError> {
        let url = self.repo_url(&format!("releases/tags/{}", name));
        let response = self.request(Method::GET, &url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, &format!("Fetching release {}", name)).await?;
        Ok(Some(response.json::<ReleaseInfo>().await?))
    }

    /// Id of release `name`, looked up once per process.
    async fn release_id(&self, name: &str) -> Result<u64, SyncError> {
        if let Some(id) = self.listings.lock().await.release_ids.get(name) {
            return Ok(*id);
        }
        let info = self
            .find_release(name)
            .await?
            .ok_or_else(|| SyncError::Transport(format!("Release {} does not exist", name)))?;
        self.listings
            .lock()
            .await
            .release_ids
            .insert(name.to_string(), info.id);
        Ok(info.id)
    }

    /// Lists the assets of release `name` and remembers their ids.
    async fn refresh_assets(&self, name: &str) -> Result<Vec<RemoteAsset>, SyncError> {
        let release_id = self.release_id(name).await?;
        let assets = self.remote_assets(release_id).await?;
        let ids = assets.iter().map(|a| (a.name.clone(), a.id)).collect();
        self.listings
            .lock()
            .await
            .asset_ids
            .insert(name.to_string(), ids);
        Ok(assets)
    }

    /// Id of asset `key`, from the remembered listing if there is one.
    async fn asset_id(&self, release: &str, key: &str) -> Result<Option<u64>, SyncError> {
        if let Some(ids) = self.listings.lock().await.asset_ids.get(release) {
            return Ok(ids.get(key).copied());
        }
        Ok(self
            .refresh_assets(release)
            .await?
            .into_iter()
            .find(|a| a.name == key)
            .map(|a| a.id))
    }

    async fn remember_asset(&self, release: &str, asset: &RemoteAsset) {
        if let Some(ids) = self.listings.lock().await.asset_ids.get_mut(release) {
            ids.insert(asset.name.clone(), asset.id);
        }
    }

    async fn forget_asset(&self, release: &str, key: &str) {
        if let Some(ids) = self.listings.lock().await.asset_ids.get_mut(release) {
            ids.remove(key);
        }
    }

    /// Public download URL of asset `key`.
    fn asset_download_url(&self, release: &str, key: &str) -> String {
        format!("{}/{}/{}", self.download_base(), release, key)
    }

    async fn remote_assets(&self, release_id: u64) -> Result<Vec<RemoteAsset>, SyncError> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let url = self.repo_url(&format!(
                "releases/{}/assets?per_page={}&page={}",
                release_id, ASSETS_PER_PAGE, page
            ));
            let response = self.request(Method::GET, &url).send().await?;
            let response = check_status(response, "Listing release assets").await?;
            let batch = response.json::<Vec<RemoteAsset>>().await?;
            let done = batch.len() < ASSETS_PER_PAGE;
            all.extend(batch);
            if done {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    /// Streams an asset into `dest`, going through a temporary file.
    ///
    /// A 404 is reported as [`SyncError::NotFound`].
    async fn download_once(&self, release: &str, key: &str, dest: &Path) -> Result<(), SyncError> {
        let url = self.asset_download_url(release, key);
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(SyncError::NotFound {
                release: release.to_string(),
                key: key.to_string(),
            });
        }
        let response = response.error_for_status()?;
        let content_length = response.content_length();

        let partial = partial_path(dest);
        let mut file = BufWriter::new(tokio::fs::File::create(&partial).await?);
        let mut byte_stream = response.bytes_stream();
        while let Some(piece) = byte_stream.next().await {
            let chunk = piece?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        let file_size = tokio::fs::metadata(&partial).await?.len();
        if let Some(content_length) = content_length {
            if file_size != content_length {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(SyncError::IoError(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "File size mismatch for {}: expected {} bytes, got {} bytes",
                        dest.display(),
                        content_length,
                        file_size
                    ),
                )));
            }
        } else {
            warn!(
                "Content-Length header was not present for {}. Cannot verify file size.",
                url
            );
        }

        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".download");
    dest.with_file_name(name)
}

/// Turns a non-success response into a transport error carrying the body.
async fn check_status(response: Response, what: &str) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Transport(format!(
        "{} failed: HTTP {}: {}",
        what, status, body
    )))
}

#[async_trait]
impl AssetStore for GitHubAssetStore {
    async fn list_assets(&self, release: &str) -> Result<Vec<Asset>, SyncError> {
        let assets = self
            .refresh_assets(release)
            .await?
            .into_iter()
            .map(|a| Asset {
                key: a.name,
                state: AssetState::from_service(&a.state),
            })
            .collect::<Vec<_>>();
        debug!("Release {} has {} assets", release, assets.len());
        Ok(assets)
    }

    async fn upload_asset(&self, release: &str, path: &Path, key: &str) -> Result<(), SyncError> {
        let release_id = self.release_id(release).await?;
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        // Keys are checksums or `<ALGO>.csv`/`<ALGO>.md`, all URL-safe.
        let url = format!(
            "{}/repos/{}/releases/{}/assets?name={}",
            self.uploads_url, self.repo, release_id, key
        );
        let response = self
            .request(Method::POST, &url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, size)
            .body(Body::from(file))
            .send()
            .await
            .map_err(|e| SyncError::UploadFailed {
                release: release.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::UploadFailed {
                release: release.to_string(),
                key: key.to_string(),
                message: format!("HTTP {}: {}", status, body),
            });
        }

        match response.json::<RemoteAsset>().await {
            Ok(asset) => self.remember_asset(release, &asset).await,
            // Forces a fresh listing on the next lookup.
            Err(_) => {
                self.listings.lock().await.asset_ids.remove(release);
            }
        }

        info!("⬆️  Uploaded {} ({} bytes) to {}", key, size, release);
        Ok(())
    }

    async fn delete_asset(&self, release: &str, key: &str) -> Result<(), SyncError> {
        let Some(asset_id) = self.asset_id(release, key).await? else {
            debug!("No asset {} in {}, nothing to delete", key, release);
            return Ok(());
        };

        let url = self.repo_url(&format!("releases/assets/{}", asset_id));
        let response = self.request(Method::DELETE, &url).send().await?;
        if response.status() != StatusCode::NOT_FOUND {
            check_status(response, &format!("Deleting asset {}", key)).await?;
        }
        self.forget_asset(release, key).await;
        debug!("Deleted asset {} from {}", key, release);
        Ok(())
    }

    async fn download_asset(
        &self,
        release: &str,
        key: &str,
        dest: &Path,
    ) -> Result<(), SyncError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let retry_strategy = tokio_retry2::strategy::FixedInterval::from_millis(self.retry_delay_ms)
            .take(self.retry_attempts);

        Retry::spawn(retry_strategy, || async move {
            match self.download_once(release, key, dest).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => RetryError::to_permanent(e),
                Err(e) => {
                    warn!("Failed to download {} due to error: {}", key, e);
                    RetryError::to_transient(e)
                }
            }
        })
        .await
    }

    async fn create_release(&self, name: &str) -> Result<(), SyncError> {
        if let Some(info) = self.find_release(name).await? {
            self.listings
                .lock()
                .await
                .release_ids
                .insert(name.to_string(), info.id);
            return Ok(());
        }

        let url = self.repo_url("releases");
        let payload = json!({
            "tag_name": name,
            "name": name,
            "body": "",
            "draft": false,
            "prerelease": false,
        });
        let response = self.request(Method::POST, &url).json(&payload).send().await?;
        let response = check_status(response, &format!("Creating release {}", name)).await?;
        let info = response.json::<ReleaseInfo>().await?;
        let mut listings = self.listings.lock().await;
        listings.release_ids.insert(name.to_string(), info.id);
        listings.asset_ids.insert(name.to_string(), HashMap::new());
        drop(listings);
        info!("Created release {} in {}", name, self.repo);
        Ok(())
    }

    async fn edit_release_body(&self, name: &str, body: &str) -> Result<(), SyncError> {
        let release_id = self.release_id(name).await?;
        let url = self.repo_url(&format!("releases/{}", release_id));
        let response = self
            .request(Method::PATCH, &url)
            .json(&json!({ "body": body }))
            .send()
            .await?;
        check_status(response, &format!("Editing release {}", name)).await?;
        Ok(())
    }

    fn download_base(&self) -> String {
        format!("{}/{}/releases/download", self.web_url, self.repo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_validation() {
        assert!(GitHubAssetStore::new("owner/name", None).is_ok());
        for bad in ["", "owner", "owner/", "/name", "a/b/c"] {
            assert!(
                matches!(
                    GitHubAssetStore::new(bad, None),
                    Err(SyncError::InvalidConfig(_))
                ),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_download_base() {
        let store = GitHubAssetStore::new("Slicer/SlicerTestingData", Some(String::new())).unwrap();
        assert_eq!(
            store.download_base(),
            "https://github.com/Slicer/SlicerTestingData/releases/download"
        );
        assert!(store.token.is_none());
    }

    #[test]
    fn test_urls() {
        let store = GitHubAssetStore::new("o/r", None)
            .unwrap()
            .with_api_urls("https://ghe.local/api/v3/", "https://ghe.local/api/uploads");
        assert_eq!(
            store.repo_url("releases/tags/MD5"),
            "https://ghe.local/api/v3/repos/o/r/releases/tags/MD5"
        );
        assert_eq!(
            store.asset_download_url("MD5", "abc"),
            "https://github.com/o/r/releases/download/MD5/abc"
        );
        let store = store.with_web_url("https://ghe.local/");
        assert_eq!(
            store.asset_download_url("SHA256", "MD5.csv"),
            "https://ghe.local/o/r/releases/download/SHA256/MD5.csv"
        );
        assert_eq!(
            partial_path(Path::new("/tmp/MD5/abc")),
            PathBuf::from("/tmp/MD5/abc.download")
        );
    }
}
