/// Search-path configuration for libsmi
///
/// Finds the leaf directories of a MIB source tree and renders them into an
/// `smi.conf` that the libsmi tools read via `-c`.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;

/// A rendered `smi.conf`, removed from disk when dropped
#[derive(Debug)]
pub struct SmiConfig {
    file: NamedTempFile,
}

impl SmiConfig {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Collect every directory under `root` that has no subdirectories.
///
/// A symlink to a directory counts as a subdirectory of its parent but is
/// not descended into. A missing root has no leaves.
pub fn leaf_directories(root: &Path) -> Result<Vec<PathBuf>> {
    let mut leaves = Vec::new();
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "MIB source root is not a directory");
        return Ok(leaves);
    }
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut subdirs = Vec::new();
        let mut linked = false;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                subdirs.push(entry.path());
            } else if file_type.is_symlink() && entry.path().is_dir() {
                linked = true;
            }
        }
        if subdirs.is_empty() && !linked {
            leaves.push(dir);
        } else {
            pending.extend(subdirs);
        }
    }

    leaves.sort();
    Ok(leaves)
}

/// Render the config text for the given MIB directories
pub fn render(mib_paths: &[PathBuf]) -> String {
    let mut text = String::from("# smi.conf generated by mibc\n");
    if !mib_paths.is_empty() {
        // A leading colon appends to libsmi's built-in path instead of replacing it.
        text.push_str("path ");
        for path in mib_paths {
            text.push(':');
            text.push_str(&path.to_string_lossy());
        }
        text.push('\n');
    }
    text
}

/// Generate a temporary `smi.conf` for `mibs_root`
pub fn generate(mibs_root: Option<&Path>) -> Result<SmiConfig> {
    let mib_paths = match mibs_root {
        Some(root) => leaf_directories(root)?,
        None => Vec::new(),
    };

    let mut file = tempfile::Builder::new()
        .prefix("smi")
        .suffix(".conf")
        .tempfile()?;
    file.write_all(render(&mib_paths).as_bytes())?;
    file.flush()?;

    tracing::info!(path = %file.path().display(), dirs = mib_paths.len(), "smi.conf generated");
    Ok(SmiConfig { file })
}
