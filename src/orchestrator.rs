//! Main orchestration logic for syncing one release.

use crate::cache::LocalCache;
use crate::checksum::compute_file_digest;
use crate::error::SyncError;
use crate::index::render_index;
use crate::manifest::{write_atomic, Manifest, ManifestEntry};
use crate::store::{Asset, AssetStore};
use crate::types::{FetchReport, HashAlgorithm, UpdateReport};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reconciles a manifest, its local cache and the release of one hash
/// algorithm.
///
/// Engines for different algorithms share nothing and may run side by side.
/// Two engines must never update the same release at once; nothing here
/// enforces that.
pub struct SyncEngine {
    algo: HashAlgorithm,
    cache: LocalCache,
    store: Arc<dyn AssetStore>,
}

impl SyncEngine {
    /// Creates an engine for the release named after `cache`'s algorithm.
    pub fn new(cache: LocalCache, store: Arc<dyn AssetStore>) -> Self {
        Self {
            algo: cache.algorithm(),
            cache,
            store,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    fn release(&self) -> &'static str {
        self.algo.name()
    }

    /// Downloads the release's manifest asset into the cache and loads it.
    ///
    /// A release without a manifest asset (or no release at all) yields an
    /// empty manifest. This is the starting point of an upload.
    pub async fn load_remote_manifest(&self) -> Result<Manifest, SyncError> {
        match self.download_manifest().await? {
            Some(manifest) => Ok(manifest),
            None => {
                info!("{}: no published manifest, starting a new one", self.algo);
                Ok(Manifest::new())
            }
        }
    }

    /// Like [`SyncEngine::load_remote_manifest`], but a missing release or
    /// manifest asset is a [`SyncError::NotFound`]. Downloads start here.
    pub async fn require_remote_manifest(&self) -> Result<Manifest, SyncError> {
        self.download_manifest()
            .await?
            .ok_or_else(|| SyncError::NotFound {
                release: self.release().to_string(),
                key: self.algo.manifest_asset(),
            })
    }

    async fn download_manifest(&self) -> Result<Option<Manifest>, SyncError> {
        let path = self.cache.manifest_path();
        if tokio::fs::metadata(&path).await.is_ok() {
            tokio::fs::remove_file(&path).await?;
        }

        match self
            .store
            .download_asset(self.release(), &self.algo.manifest_asset(), &path)
            .await
        {
            Ok(()) => Manifest::load_for(&path, self.algo).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Hashes every file in `incoming` into the cache and the manifest.
    ///
    /// Hidden files and subdirectories are ignored. Files are processed in
    /// name order.
    ///
    /// # Returns
    ///
    /// `(files ingested, manifest entries added)`.
    pub async fn ingest(
        &self,
        incoming: &Path,
        manifest: &mut Manifest,
    ) -> Result<(usize, usize), SyncError> {
        let files = incoming_files(incoming)?;
        let mut added = 0;

        for (filename, path) in &files {
            let checksum = self.cache.ingest(path).await?;
            if manifest.append_if_absent(&checksum, filename) {
                info!("{}: new file {} ({})", self.algo, filename, checksum);
                added += 1;
            } else {
                debug!("{}: {} already known as {}", self.algo, filename, checksum);
            }
        }

        Ok((files.len(), added))
    }

    /// Publishes INCOMING and the manifest to the release.
    ///
    /// This performs the following steps:
    ///
    /// 1. Creates the release if needed
    /// 2. Ingests `incoming` into the cache and `manifest`
    /// 3. Deletes partially uploaded assets left by an interrupted run
    /// 4. Uploads every manifest entry not already uploaded, in manifest order
    /// 5. Replaces the `<ALGO>.csv` and `<ALGO>.md` assets
    /// 6. Sets the release body to the rendered index
    ///
    /// The first failing upload aborts the run. Running again resumes it.
    pub async fn update(
        &self,
        incoming: &Path,
        manifest: &mut Manifest,
    ) -> Result<UpdateReport, SyncError> {
        let release = self.release();
        let mut report = UpdateReport::default();

        self.store.create_release(release).await?;

        let (ingested, new_entries) = self.ingest(incoming, manifest).await?;
        report.ingested = ingested;
        report.new_entries = new_entries;

        let (uploaded, partial): (Vec<Asset>, Vec<Asset>) = self
            .store
            .list_assets(release)
            .await?
            .into_iter()
            .partition(|a| a.state.is_uploaded());

        for asset in &partial {
            warn!(
                "{}: removing partially uploaded asset {} ({:?})",
                self.algo, asset.key, asset.state
            );
            self.store.delete_asset(release, &asset.key).await?;
        }
        report.partial_removed = partial.len();

        let uploaded: HashSet<String> = uploaded.into_iter().map(|a| a.key).collect();
        let pending: Vec<&ManifestEntry> = manifest
            .entries()
            .iter()
            .filter(|e| !uploaded.contains(&e.checksum))
            .collect();
        report.skipped = manifest.len() - pending.len();

        let pb = progress_bar(
            pending.len(),
            format!("⬆️  Uploading {} files to {}", pending.len(), release),
        );
        for entry in pending {
            let path = self.cache.path_for(&entry.checksum);
            if tokio::fs::metadata(&path).await.is_err() {
                pb.finish_with_message("❌ Upload failed!");
                return Err(SyncError::MissingCacheFile {
                    checksum: entry.checksum.clone(),
                    filename: entry.filename.clone(),
                    dir: self.cache.dir().to_path_buf(),
                });
            }

            pb.set_message(format!("| ⬆️  {}", entry.filename));
            if let Err(e) = self.store.upload_asset(release, &path, &entry.checksum).await {
                error!("{}: upload of {} failed: {}", self.algo, entry.filename, e);
                pb.finish_with_message("❌ Upload failed!");
                return Err(e);
            }
            report.uploaded += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        let index = render_index(manifest, self.algo, &self.store.download_base());
        let manifest_path = self.cache.manifest_path();
        let index_path = self.cache.index_path();
        manifest.persist(&manifest_path)?;
        write_atomic(&index_path, index.as_bytes())?;

        let manifest_asset = self.algo.manifest_asset();
        let index_asset = self.algo.index_asset();
        self.store.delete_asset(release, &manifest_asset).await?;
        self.store.delete_asset(release, &index_asset).await?;
        self.store
            .upload_asset(release, &manifest_path, &manifest_asset)
            .await?;
        self.store.upload_asset(release, &index_path, &index_asset).await?;

        self.store.edit_release_body(release, &index).await?;

        info!(
            "✅ {}: {} ingested, {} new, {} uploaded, {} already present",
            self.algo, report.ingested, report.new_entries, report.uploaded, report.skipped
        );
        Ok(report)
    }

    /// Fetches every manifest entry and writes it to `output_dir` under its
    /// filename.
    ///
    /// Entries whose cached copy still matches their checksum are not
    /// downloaded. Entries missing from the release are reported, not fatal.
    /// When several entries share a filename, the first keeps it and later
    /// ones are written as `<filename>-<checksum>`.
    ///
    /// # Arguments
    ///
    /// * `manifest` - Entries to fetch
    /// * `output_dir` - Directory receiving the named files
    /// * `max_concurrent_downloads` - Download parallelism
    /// * `link_outputs` - Hard-link instead of copying when possible
    pub async fn fetch(
        &self,
        manifest: &Manifest,
        output_dir: &Path,
        max_concurrent_downloads: usize,
        link_outputs: bool,
    ) -> Result<FetchReport, SyncError> {
        if max_concurrent_downloads == 0 {
            return Err(SyncError::InvalidConfig(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        tokio::fs::create_dir_all(output_dir).await?;

        let mut report = FetchReport::default();
        let pb = progress_bar(
            manifest.len(),
            format!("📦 Fetching {} files from {}", manifest.len(), self.release()),
        );
        let semaphore = Arc::new(Semaphore::new(max_concurrent_downloads));
        // Dropping the set on an early return aborts downloads still running.
        let mut download_tasks = JoinSet::new();

        for entry in manifest.entries() {
            if self.cache.holds_valid(&entry.checksum).await? {
                pb.set_message(format!("| ✅ Cached: {}", entry.filename));
                pb.inc(1);
                report.cache_hits += 1;
                continue;
            }

            let semaphore = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let cache = self.cache.clone();
            let pb_clone = pb.clone();
            let entry_clone = entry.clone();

            download_tasks.spawn(async move {
                let result = match semaphore.acquire().await {
                    Ok(_permit) => {
                        pb_clone
                            .set_message(format!("| ⬇️  Downloading: {}", entry_clone.filename));
                        fetch_into_cache(store.as_ref(), &cache, &entry_clone.checksum).await
                    }
                    Err(e) => Err(SyncError::Transport(format!("Semaphore closed: {}", e))),
                };
                pb_clone.inc(1);
                (entry_clone, result)
            });
        }

        let mut missing: HashSet<String> = HashSet::new();
        while let Some(joined) = download_tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.downloaded += 1,
                Ok((entry, Err(e))) if e.is_not_found() => {
                    error!(
                        "{}: failed to download {} ({}): {}",
                        self.algo, entry.filename, entry.checksum, e
                    );
                    missing.insert(entry.checksum);
                }
                Ok((entry, Err(e))) => {
                    error!("Download of {} failed: {}", entry.filename, e);
                    pb.finish_with_message("❌ Download failed!");
                    return Err(e);
                }
                Err(e) => {
                    error!("Task join error: {}", e);
                    pb.finish_with_message("❌ Download failed!");
                    return Err(SyncError::Transport(format!("Task failed: {}", e)));
                }
            }
        }
        // Completion order is arbitrary; report in manifest order.
        report.missing = manifest
            .entries()
            .iter()
            .filter(|e| missing.contains(&e.checksum))
            .cloned()
            .collect();
        pb.finish_and_clear();

        let resolved = manifest
            .entries()
            .iter()
            .filter(|e| !missing.contains(&e.checksum));
        let mut used_names: HashSet<String> = HashSet::new();
        for entry in resolved {
            let name = output_name(entry, &mut used_names);
            let target = output_dir.join(&name);
            materialize(&self.cache.path_for(&entry.checksum), &target, link_outputs).await?;
            debug!("{}: {} -> {}", self.algo, entry.checksum, target.display());
            report.materialized.push(target);
        }

        info!(
            "✅ {}: {} files in {} ({} cached, {} downloaded, {} missing)",
            self.algo,
            report.materialized.len(),
            output_dir.display(),
            report.cache_hits,
            report.downloaded,
            report.missing.len()
        );
        Ok(report)
    }
}

/// Downloads one asset into the cache and checks its digest.
async fn fetch_into_cache(
    store: &dyn AssetStore,
    cache: &LocalCache,
    checksum: &str,
) -> Result<(), SyncError> {
    let algo = cache.algorithm();
    let path = cache.path_for(checksum);
    store.download_asset(algo.name(), checksum, &path).await?;

    let actual = compute_file_digest(algo, &path).await?;
    if actual != checksum {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(SyncError::ChecksumMismatch {
            path,
            expected: checksum.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Picks a unique output filename for an entry.
fn output_name(entry: &ManifestEntry, used: &mut HashSet<String>) -> String {
    let mut name = entry.filename.clone();
    if used.contains(&name) {
        name = format!("{}-{}", entry.filename, entry.checksum);
    }
    let base = name.clone();
    let mut n = 1;
    while used.contains(&name) {
        name = format!("{}.{}", base, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

/// Copies (or hard-links) a cached file to its output path.
async fn materialize(source: &Path, target: &Path, link: bool) -> Result<(), SyncError> {
    if tokio::fs::symlink_metadata(target).await.is_ok() {
        tokio::fs::remove_file(target).await?;
    }
    if link {
        match tokio::fs::hard_link(source, target).await {
            Ok(()) => return Ok(()),
            Err(e) => debug!(
                "Hard link {} failed ({}), copying instead",
                target.display(),
                e
            ),
        }
    }
    tokio::fs::copy(source, target).await?;
    Ok(())
}

/// Lists regular, non-hidden files of `dir` sorted by name.
fn incoming_files(dir: &Path) -> Result<Vec<(String, PathBuf)>, SyncError> {
    if !dir.is_dir() {
        return Err(SyncError::MissingDirectory(dir.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping non UTF-8 filename {:?}", entry.file_name());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if name.contains(crate::manifest::DELIMITER) {
            return Err(SyncError::InvalidConfig(format!(
                "Filename {:?} contains the manifest delimiter ';'",
                name
            )));
        }
        files.push((name, entry.path()));
    }

    files.sort();
    Ok(files)
}

fn progress_bar(len: usize, message: String) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new(len as u64);
    let style = indicatif::ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed, ETA {eta_precise}")
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");
    pb.set_style(style);
    pb.set_message(message);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_name_disambiguates_duplicates() {
        let mut used = HashSet::new();
        let a = ManifestEntry::new("aaa", "img.nrrd");
        let b = ManifestEntry::new("bbb", "img.nrrd");
        let c = ManifestEntry::new("ccc", "other.nrrd");

        assert_eq!(output_name(&a, &mut used), "img.nrrd");
        assert_eq!(output_name(&b, &mut used), "img.nrrd-bbb");
        assert_eq!(output_name(&c, &mut used), "other.nrrd");
    }

    #[test]
    fn test_output_name_never_reuses_a_name() {
        let mut used = HashSet::new();
        // A real file literally named like a disambiguated one.
        let first = ManifestEntry::new("111", "x-222");
        let second = ManifestEntry::new("333", "x");
        let third = ManifestEntry::new("222", "x");

        assert_eq!(output_name(&first, &mut used), "x-222");
        assert_eq!(output_name(&second, &mut used), "x");
        assert_eq!(output_name(&third, &mut used), "x-222.1");
    }

    #[test]
    fn test_incoming_files_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        std::fs::write(dir.path().join(".hidden"), b"h").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let names: Vec<String> = incoming_files(dir.path())
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_incoming_rejects_delimiter_in_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a;b.txt"), b"x").unwrap();
        assert!(matches!(
            incoming_files(dir.path()),
            Err(SyncError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_incoming_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            incoming_files(&dir.path().join("INCOMING")),
            Err(SyncError::MissingDirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_materialize_link_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::write(&src, b"data").unwrap();

        let copied = dir.path().join("copied");
        materialize(&src, &copied, false).await.unwrap();
        let linked = dir.path().join("linked");
        materialize(&src, &linked, true).await.unwrap();
        // Overwrites a leftover from an earlier run.
        materialize(&src, &linked, true).await.unwrap();

        assert_eq!(std::fs::read(&copied).unwrap(), b"data");
        assert_eq!(std::fs::read(&linked).unwrap(), b"data");
    }
}
