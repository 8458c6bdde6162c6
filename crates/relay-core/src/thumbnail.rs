//! Preview image discovery next to an asset

use globset::{GlobBuilder, GlobMatcher};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name patterns conventionally used for preview images, in priority order
pub const PREVIEW_PATTERNS: &[&str] = &["*_preview.*", "*preview.*", "*thumbnail.*", "*thumb.*"];

/// Extensions accepted as preview images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "tga", "tif", "tiff", "exr"];

/// Finds the first preview image in an asset directory.
///
/// The scan is non-recursive. Patterns are tried in order and, within a
/// pattern, file names are tried in lexical order, so results are stable.
#[derive(Debug, Clone)]
pub struct ThumbnailFinder {
    patterns: Vec<GlobMatcher>,
}

impl Default for ThumbnailFinder {
    fn default() -> Self {
        Self {
            patterns: PREVIEW_PATTERNS
                .iter()
                .filter_map(|p| compile(p).ok())
                .collect(),
        }
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, globset::Error> {
    Ok(GlobBuilder::new(pattern)
        .case_insensitive(true)
        .literal_separator(true)
        .build()?
        .compile_matcher())
}

impl ThumbnailFinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finder with custom patterns, tried in the given order.
    pub fn with_patterns(patterns: &[&str]) -> Result<Self, globset::Error> {
        let patterns = patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Find a preview for `asset_path`.
    ///
    /// Directories are scanned directly; for a file, its parent directory is
    /// scanned. Returns `None` when nothing matches or the directory cannot
    /// be listed.
    pub fn find(&self, asset_path: &Path) -> Option<PathBuf> {
        let dir = if asset_path.is_dir() {
            asset_path
        } else {
            asset_path.parent()?
        };

        let mut names: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| has_image_extension(name))
                .collect(),
            Err(e) => {
                debug!("Cannot scan {} for thumbnails: {e}", dir.display());
                return None;
            }
        };
        names.sort();

        self.patterns.iter().find_map(|pattern| {
            names
                .iter()
                .find(|name| pattern.is_match(name.as_str()))
                .map(|name| dir.join(name))
        })
    }
}

fn has_image_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_finds_preview_in_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "rock_albedo.png");
        touch(dir.path(), "rock_preview.png");

        let found = ThumbnailFinder::new().find(dir.path());
        assert_eq!(found, Some(dir.path().join("rock_preview.png")));
    }

    #[test]
    fn test_pattern_priority_beats_name_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a_thumb.jpg");
        touch(dir.path(), "z_preview.jpg");

        let found = ThumbnailFinder::new().find(dir.path());
        assert_eq!(found, Some(dir.path().join("z_preview.jpg")));
    }

    #[test]
    fn test_rejects_non_image_extensions_and_matches_case_insensitively() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "notes_preview.txt");
        touch(dir.path(), "Rock_Thumbnail.PNG");

        let found = ThumbnailFinder::new().find(dir.path());
        assert_eq!(found, Some(dir.path().join("Rock_Thumbnail.PNG")));
    }

    #[test]
    fn test_file_path_scans_parent() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "mesh.fbx");
        touch(dir.path(), "mesh_thumb.webp");

        let found = ThumbnailFinder::new().find(&dir.path().join("mesh.fbx"));
        assert_eq!(found, Some(dir.path().join("mesh_thumb.webp")));
    }

    #[test]
    fn test_no_match_and_missing_dir() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "albedo.png");

        let finder = ThumbnailFinder::new();
        assert!(finder.find(dir.path()).is_none());
        assert!(finder.find(&dir.path().join("missing/dir")).is_none());
    }

    #[test]
    fn test_subdirectories_are_not_scanned() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("previews")).unwrap();
        touch(&dir.path().join("previews"), "x_preview.png");

        assert!(ThumbnailFinder::new().find(dir.path()).is_none());
    }

    #[test]
    fn test_custom_patterns() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "cover.png");

        let finder = ThumbnailFinder::with_patterns(&["cover.*"]).unwrap();
        assert_eq!(finder.find(dir.path()), Some(dir.path().join("cover.png")));
    }
}
