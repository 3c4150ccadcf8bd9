//! Data structures shared by the sync operations.

use crate::error::SyncError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Hash algorithm that names a release and keys its assets.
///
/// Each algorithm owns an independent manifest, local cache directory and
/// release. The release tag is the uppercase algorithm name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms.
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha224,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    /// Release tag / directory name for this algorithm (e.g. `"SHA256"`).
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5",
            HashAlgorithm::Sha224 => "SHA224",
            HashAlgorithm::Sha256 => "SHA256",
            HashAlgorithm::Sha384 => "SHA384",
            HashAlgorithm::Sha512 => "SHA512",
        }
    }

    /// Length of the hex digest produced by this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            HashAlgorithm::Md5 => 32,
            HashAlgorithm::Sha224 => 56,
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha384 => 96,
            HashAlgorithm::Sha512 => 128,
        }
    }

    /// Name of the manifest asset (`<ALGO>.csv`).
    pub fn manifest_asset(&self) -> String {
        format!("{}.csv", self.name())
    }

    /// Name of the rendered index asset (`<ALGO>.md`).
    pub fn index_asset(&self) -> String {
        format!("{}.md", self.name())
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|algo| algo.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SyncError::UnknownAlgorithm(s.to_string()))
    }
}

/// Configuration for a sync run.
///
/// # Example
///
/// ```
/// use releasesync::SyncConfig;
///
/// let config = SyncConfig {
///     root_dir: "testdata".into(),
///     max_concurrent_downloads: 8,
///     ..SyncConfig::default()
/// };
/// assert_eq!(config.cache_dir(releasesync::HashAlgorithm::Md5), std::path::PathBuf::from("testdata/MD5"));
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root directory; each algorithm caches its files under `<root>/<ALGO>`.
    pub root_dir: PathBuf,
    /// Directory of files staged for upload.
    pub incoming_dir: PathBuf,
    /// Directory that receives downloaded files under their real names.
    pub download_dir: PathBuf,
    /// Maximum number of concurrent asset downloads (default: 4).
    pub max_concurrent_downloads: usize,
    /// Hard-link cache files into the download directory instead of copying.
    ///
    /// Falls back to copying when linking fails (e.g. across filesystems).
    pub link_outputs: bool,
}

impl SyncConfig {
    /// Local cache directory for an algorithm.
    pub fn cache_dir(&self, algo: HashAlgorithm) -> PathBuf {
        self.root_dir.join(algo.name())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            incoming_dir: PathBuf::from("INCOMING"),
            download_dir: PathBuf::from("DOWNLOAD"),
            max_concurrent_downloads: 4,
            link_outputs: false,
        }
    }
}

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Ingest INCOMING and publish it to the release.
    Upload,
    /// Fetch every manifest entry into the download directory.
    Download,
}

impl Operation {
    /// Algorithms used when none are given on the command line.
    pub fn default_algorithms(&self) -> Vec<HashAlgorithm> {
        match self {
            Operation::Upload => vec![HashAlgorithm::Md5, HashAlgorithm::Sha256],
            Operation::Download => vec![HashAlgorithm::Md5],
        }
    }
}

/// Summary of an upload run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Incoming files hashed this run.
    pub ingested: usize,
    /// Manifest entries added this run.
    pub new_entries: usize,
    /// Assets uploaded (data files only).
    pub uploaded: usize,
    /// Manifest entries already present as uploaded assets.
    pub skipped: usize,
    /// Partially uploaded assets removed before uploading.
    pub partial_removed: usize,
}

/// Summary of a download run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Entries served from the local cache without a network call.
    pub cache_hits: usize,
    /// Entries downloaded from the release.
    pub downloaded: usize,
    /// Files written to the output directory, in manifest order.
    pub materialized: Vec<PathBuf>,
    /// Entries with no corresponding asset in the release.
    pub missing: Vec<crate::manifest::ManifestEntry>,
}

impl FetchReport {
    /// True if every manifest entry was materialized.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parse_is_case_insensitive() {
        assert_eq!("md5".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Md5);
        assert_eq!(
            "Sha256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::Sha256
        );
        assert!(matches!(
            "crc32".parse::<HashAlgorithm>(),
            Err(SyncError::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_asset_names() {
        assert_eq!(HashAlgorithm::Sha512.manifest_asset(), "SHA512.csv");
        assert_eq!(HashAlgorithm::Md5.index_asset(), "MD5.md");
    }

    #[test]
    fn test_default_algorithms() {
        assert_eq!(
            Operation::Upload.default_algorithms(),
            vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]
        );
        assert_eq!(
            Operation::Download.default_algorithms(),
            vec![HashAlgorithm::Md5]
        );
    }
}
