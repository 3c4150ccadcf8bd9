//! Markdown index of a manifest, published as `<ALGO>.md` and as the
//! release body.

use crate::manifest::Manifest;
use crate::types::HashAlgorithm;

/// Builds the download URL of an asset.
pub fn asset_url(download_base: &str, algo: HashAlgorithm, checksum: &str) -> String {
    format!(
        "{}/{}/{}",
        download_base.trim_end_matches('/'),
        algo.name(),
        checksum
    )
}

/// Renders the manifest as a two-column table linking each filename to its
/// asset.
///
/// The output depends only on the manifest order and contents, so the same
/// manifest always renders to the same bytes.
///
/// # Example
///
/// ```
/// use releasesync::{render_index, HashAlgorithm, Manifest};
///
/// let mut manifest = Manifest::new();
/// manifest.append_if_absent("0cc175b9c0f1b6a831c399e269772661", "a.txt");
/// let md = render_index(&manifest, HashAlgorithm::Md5, "https://example.com/dl");
/// assert!(md.starts_with("| FileName | MD5 |\n"));
/// ```
pub fn render_index(manifest: &Manifest, algo: HashAlgorithm, download_base: &str) -> String {
    let mut out = format!("| FileName | {} |\n|----------|-------------|\n", algo.name());

    for entry in manifest.entries() {
        out.push_str(&format!(
            "| [{}]({}) | {} |\n",
            entry.filename,
            asset_url(download_base, algo, &entry.checksum),
            entry.checksum
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://github.com/Slicer/SlicerTestingData/releases/download";

    #[test]
    fn test_render_rows() {
        let mut m = Manifest::new();
        m.append_if_absent("aaa111", "img.nrrd");
        m.append_if_absent("bbb222", "img.nrrd");

        let md = render_index(&m, HashAlgorithm::Sha256, BASE);
        let expected = "\
| FileName | SHA256 |
|----------|-------------|
| [img.nrrd](https://github.com/Slicer/SlicerTestingData/releases/download/SHA256/aaa111) | aaa111 |
| [img.nrrd](https://github.com/Slicer/SlicerTestingData/releases/download/SHA256/bbb222) | bbb222 |
";
        assert_eq!(md, expected);
    }

    #[test]
    fn test_empty_manifest_renders_header_only() {
        let md = render_index(&Manifest::new(), HashAlgorithm::Md5, BASE);
        assert_eq!(md.lines().count(), 2);
    }

    #[test]
    fn test_asset_url_trims_trailing_slash() {
        assert_eq!(
            asset_url("https://x/dl/", HashAlgorithm::Md5, "abc"),
            "https://x/dl/MD5/abc"
        );
    }
}
