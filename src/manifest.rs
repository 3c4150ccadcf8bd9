//! Checksum to filename manifest, persisted as `<ALGO>.csv`.
//!
//! Each line holds `checksum;filename`. Order is append order and is
//! significant: it is the order of the rendered index. Filenames containing
//! `;` cannot be represented and are rejected.

use crate::error::SyncError;
use crate::types::HashAlgorithm;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Field separator of the persisted form.
pub const DELIMITER: char = ';';

/// One checksum and the filename it was first uploaded under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    pub checksum: String,
    pub filename: String,
}

impl ManifestEntry {
    pub fn new(checksum: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            checksum: checksum.into(),
            filename: filename.into(),
        }
    }
}

/// Ordered checksum to filename mapping for one hash algorithm.
///
/// No two entries share a checksum. Several entries may share a filename
/// (historical revisions of the same logical file).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
    checksums: HashSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a manifest from disk. A missing file yields an empty manifest.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        Self::load_checked(path, None)
    }

    /// Like [`Manifest::load`], but every checksum must also have the digest
    /// length of `algo`.
    pub fn load_for(path: &Path, algo: HashAlgorithm) -> Result<Self, SyncError> {
        Self::load_checked(path, Some(algo))
    }

    fn load_checked(path: &Path, algo: Option<HashAlgorithm>) -> Result<Self, SyncError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No manifest at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let manifest = Self::parse_at(&text, path, algo)?;
        info!(
            "Loaded {} manifest entries from {}",
            manifest.len(),
            path.display()
        );
        Ok(manifest)
    }

    /// Parses the persisted text form.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        Self::parse_at(text, Path::new("<memory>"), None)
    }

    /// Parses the persisted text form of an `algo` manifest.
    pub fn parse_for(text: &str, algo: HashAlgorithm) -> Result<Self, SyncError> {
        Self::parse_at(text, Path::new("<memory>"), Some(algo))
    }

    fn parse_at(text: &str, path: &Path, algo: Option<HashAlgorithm>) -> Result<Self, SyncError> {
        let mut manifest = Self::new();

        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let corrupt = |reason: &str| SyncError::CorruptManifest {
                path: path.to_path_buf(),
                line: index + 1,
                content: line.to_string(),
                reason: reason.to_string(),
            };

            let mut fields = line.split(DELIMITER);
            let (checksum, filename) = match (fields.next(), fields.next(), fields.next()) {
                (Some(checksum), Some(filename), None) => (checksum, filename),
                _ => return Err(corrupt("expected exactly one ';' separator")),
            };

            if checksum.is_empty() || filename.is_empty() {
                return Err(corrupt("empty checksum or filename"));
            }
            if filename.contains(['/', '\\']) || filename == "." || filename == ".." {
                return Err(corrupt("filename is not a plain file name"));
            }
            if !is_hex_digest(checksum) {
                return Err(corrupt("checksum is not a lowercase hex digest"));
            }
            if let Some(algo) = algo {
                if checksum.len() != algo.hex_len() {
                    return Err(corrupt(&format!(
                        "checksum is not {} hex digits long ({})",
                        algo.hex_len(),
                        algo
                    )));
                }
            }
            if !manifest.append_if_absent(checksum, filename) {
                return Err(corrupt("duplicate checksum"));
            }
        }

        Ok(manifest)
    }

    /// Adds an entry unless the checksum is already present.
    ///
    /// The first filename recorded for a checksum wins; re-ingesting the same
    /// content under another name leaves the manifest untouched.
    ///
    /// # Returns
    ///
    /// `true` if a new entry was appended.
    pub fn append_if_absent(&mut self, checksum: &str, filename: &str) -> bool {
        if self.checksums.contains(checksum) {
            return false;
        }
        self.checksums.insert(checksum.to_string());
        self.entries.push(ManifestEntry::new(checksum, filename));
        true
    }

    /// Renders the persisted text form.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.checksum);
            out.push(DELIMITER);
            out.push_str(&entry.filename);
            out.push('\n');
        }
        out
    }

    /// Writes the manifest to `path`, replacing any previous file atomically.
    pub fn persist(&self, path: &Path) -> Result<(), SyncError> {
        write_atomic(path, self.to_csv().as_bytes())?;
        debug!("Persisted {} entries to {}", self.len(), path.display());
        Ok(())
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, checksum: &str) -> bool {
        self.checksums.contains(checksum)
    }

    /// Filename recorded for a checksum (linear scan).
    pub fn filename_of(&self, checksum: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.checksum == checksum)
            .map(|e| e.filename.as_str())
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Writes `contents` to a temp file next to `path`, then renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), SyncError> {
    let dir: PathBuf = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SyncError::IoError(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0cc175b9c0f1b6a831c399e269772661";
    const B: &str = "92eb5ffee6ae2fec3ad71c777531578f";

    #[test]
    fn test_append_if_absent_keeps_first_filename() {
        let mut m = Manifest::new();
        assert!(m.append_if_absent(A, "a.txt"));
        assert!(!m.append_if_absent(A, "renamed.txt"));
        assert!(m.append_if_absent(B, "a.txt"));

        assert_eq!(m.len(), 2);
        assert_eq!(m.filename_of(A), Some("a.txt"));
        assert_eq!(m.entries()[1], ManifestEntry::new(B, "a.txt"));
    }

    #[test]
    fn test_parse_preserves_order() {
        let text = format!("{B};z.nrrd\n{A};a.nrrd\n");
        let m = Manifest::parse(&text).unwrap();
        assert_eq!(m.entries()[0].checksum, B);
        assert_eq!(m.entries()[1].filename, "a.nrrd");
        assert_eq!(m.to_csv(), text);
    }

    #[test]
    fn test_parse_tolerates_crlf_and_blank_lines() {
        let text = format!("{A};a.txt\r\n\r\n{B};b.txt\r\n");
        let m = Manifest::parse(&text).unwrap();
        assert_eq!(m.len(), 2);
        assert_eq!(m.filename_of(B), Some("b.txt"));
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for bad in [
            "no-separator".to_string(),
            format!("{A};a;b"),
            format!("{A};"),
            ";file.txt".to_string(),
            "NOTHEX;file.txt".to_string(),
            format!("{A};../escape.txt"),
            format!("{A};a.txt\n{A};b.txt"),
        ] {
            match Manifest::parse(&bad) {
                Err(SyncError::CorruptManifest { .. }) => {}
                other => panic!("expected CorruptManifest for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_corrupt_manifest_reports_line_number() {
        let text = format!("{A};a.txt\nbroken\n");
        match Manifest::parse(&text) {
            Err(SyncError::CorruptManifest { line, content, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(content, "broken");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_for_checks_digest_length() {
        let short = "abc;f.txt\n";
        assert!(Manifest::parse(short).is_ok());
        match Manifest::parse_for(short, HashAlgorithm::Md5) {
            Err(SyncError::CorruptManifest { line: 1, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }

        let text = format!("{A};a.txt\n");
        assert_eq!(Manifest::parse_for(&text, HashAlgorithm::Md5).unwrap().len(), 1);
        assert!(Manifest::parse_for(&text, HashAlgorithm::Sha256).is_err());
    }

    #[test]
    fn test_load_for_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SHA256.csv");
        std::fs::write(&path, format!("{A};a.txt\n")).unwrap();
        assert!(matches!(
            Manifest::load_for(&path, HashAlgorithm::Sha256),
            Err(SyncError::CorruptManifest { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::load(&dir.path().join("MD5.csv")).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn test_persist_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MD5.csv");

        let mut m = Manifest::new();
        m.append_if_absent(B, "img.nrrd");
        m.append_if_absent(A, "img.nrrd");
        m.persist(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded, m);

        // Persisting again overwrites rather than appending.
        loaded.persist(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), m.to_csv());
    }
}
