//! Content digests over a directory tree.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Relative paths of every regular file under `root`, sorted, using `/` separators.
///
/// A missing root yields an empty list.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
        files.push(relative.to_path_buf());
    }
    files.sort_by_key(|p| portable(p));
    Ok(files)
}

/// SHA-256 over the sorted relative paths and contents of every file under `root`.
pub fn tree_digest(root: &Path) -> Result<String> {
    let files = collect_files(root)?;
    digest_files(root, &files)
}

/// Digest of the listed files (relative to `root`), in the given order.
pub fn digest_files(root: &Path, files: &[PathBuf]) -> Result<String> {
    let mut hasher = Sha256::new();
    for relative in files {
        let name = portable(relative);
        let bytes = std::fs::read(root.join(relative))
            .with_context(|| format!("Failed to read {}", root.join(relative).display()))?;
        // length prefixes keep path/content boundaries unambiguous
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Path rendered with `/` separators.
pub fn portable(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
