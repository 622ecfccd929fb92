//! Input image discovery

use crate::error::RunError;
use std::path::{Path, PathBuf};

/// File extensions treated as input images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp"];

/// Check if a path carries an image extension
#[must_use]
pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
}

/// List the images in `dir`, sorted by file name
///
/// Subdirectories are not descended into. An empty result is an error since
/// every template needs at least one reference image.
pub fn discover_input_images(dir: &Path) -> Result<Vec<PathBuf>, RunError> {
    let entries = std::fs::read_dir(dir).map_err(|e| RunError::io_error(dir, e))?;

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RunError::io_error(dir, e))?;
        let path = entry.path();
        let is_file = entry
            .file_type()
            .map_err(|e| RunError::io_error(&path, e))?
            .is_file();
        if is_file && is_image(&path) {
            images.push(path);
        }
    }

    if images.is_empty() {
        return Err(RunError::NoInputImages {
            dir: dir.to_path_buf(),
        });
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    tracing::info!("Found {} input image(s) in {}", images.len(), dir.display());
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching() {
        assert!(is_image(Path::new("a.PNG")));
        assert!(is_image(Path::new("dir/b.webp")));
        assert!(!is_image(Path::new("notes.txt")));
        assert!(!is_image(Path::new("png")));
    }

    #[test]
    fn empty_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("readme.md"), "x").unwrap();
        let err = discover_input_images(dir.path()).unwrap_err();
        assert!(matches!(err, RunError::NoInputImages { .. }));
    }
}
