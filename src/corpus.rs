use std::path::{Path, PathBuf};

use crate::{Result, RetrievalError};

/// Image file extensions recognized during corpus traversal.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Fail with a fatal configuration error when `path` is not a directory.
pub fn check_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(RetrievalError::Config(format!(
            "{} does not exist or is not a directory",
            path.display()
        )))
    }
}

/// List the image files in `dir`, sorted by name for a deterministic scan
/// order.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    list_matching(dir, |ext| {
        IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e))
    })
}

/// List the files in `dir` carrying `extension`, sorted by name.
pub fn list_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    list_matching(dir, |ext| ext.eq_ignore_ascii_case(extension))
}

fn list_matching<F: Fn(&str) -> bool>(dir: &Path, keep: F) -> Result<Vec<PathBuf>> {
    check_dir(dir)?;
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in dir.read_dir()? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let matched = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| keep(e))
            .unwrap_or(false);
        if matched {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
