/// Staging area
///
/// Holds one compiled artifact per module for the duration of a run. Nothing
/// here is visible in the destination registry until the committer moves it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A staged artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub module: String,
    pub path: PathBuf,
}

#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    extension: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if needed
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Where the artifact for `module` is written
    pub fn artifact_path(&self, module: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", module, self.extension))
    }

    /// All staged artifacts, sorted by module name. A missing directory is empty.
    pub fn artifacts(&self) -> Result<Vec<Artifact>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                // Package markers are not modules.
                if stem == "__init__" {
                    continue;
                }
                artifacts.push(Artifact {
                    module: stem.to_string(),
                    path: path.clone(),
                });
            }
        }
        artifacts.sort_by(|a, b| a.module.cmp(&b.module));
        Ok(artifacts)
    }

    /// Remove the staging directory and everything in it
    pub fn discard(&self) -> Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                tracing::debug!(dir = %self.dir.display(), "Staging area discarded");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
