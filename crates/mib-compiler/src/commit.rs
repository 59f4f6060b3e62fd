/// Commit of staged modules into the destination registry
///
/// Every staged artifact is planned first, then applied. Replaced files are
/// parked in a backup directory inside the destination so that a failure
/// part-way through can put back everything already moved.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{CompileError, Result};
use crate::module::CompilationRegistry;
use crate::staging::{Artifact, StagingArea};

/// What to do with one staged artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    /// Nothing in the destination yet
    Install,
    /// Existing file may be overwritten and differs
    Replace,
    /// Existing file may be overwritten but is byte-identical
    Unchanged,
    /// Existing file is protected
    Skip { old_size: u64, new_size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub module: String,
    pub staged: PathBuf,
    pub target: PathBuf,
    pub action: CommitAction,
}

/// A protected module whose staged version was not committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedModule {
    pub module: String,
    pub old_size: u64,
    pub new_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub installed: Vec<String>,
    pub replaced: Vec<String>,
    pub unchanged: Vec<String>,
    pub skipped: Vec<SkippedModule>,
}

/// A move already applied, kept so it can be reversed
enum Applied {
    Installed { target: PathBuf, staged: PathBuf },
    Replaced { target: PathBuf, staged: PathBuf, backup: PathBuf },
}

/// Move a file, falling back to copy + remove across filesystems
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) if from.is_file() => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

fn same_contents(a: &Path, b: &Path) -> io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    Ok(fs::read(a)? == fs::read(b)?)
}

pub struct Committer {
    destination: PathBuf,
}

impl Committer {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Decide what happens to every staged artifact
    pub fn plan(
        &self,
        artifacts: &[Artifact],
        registry: &CompilationRegistry,
    ) -> Result<Vec<PlannedMove>> {
        let mut plan = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let file_name = artifact
                .path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&artifact.module));
            let target = self.destination.join(file_name);

            let action = if !target.is_file() {
                CommitAction::Install
            } else if registry.allows_overwrite(&artifact.module) {
                if same_contents(&artifact.path, &target)? {
                    CommitAction::Unchanged
                } else {
                    CommitAction::Replace
                }
            } else {
                CommitAction::Skip {
                    old_size: fs::metadata(&target)?.len(),
                    new_size: fs::metadata(&artifact.path)?.len(),
                }
            };

            plan.push(PlannedMove {
                module: artifact.module.clone(),
                staged: artifact.path.clone(),
                target,
                action,
            });
        }
        Ok(plan)
    }

    /// Move every allowed staged artifact into the destination
    pub fn commit(
        &self,
        staging: &StagingArea,
        registry: &CompilationRegistry,
    ) -> Result<CommitReport> {
        fs::create_dir_all(&self.destination)?;
        let plan = self.plan(&staging.artifacts()?, registry)?;

        let backup_dir = tempfile::Builder::new()
            .prefix(".mibc-backup-")
            .tempdir_in(&self.destination)?;

        let mut applied = Vec::new();
        let mut report = CommitReport::default();

        for planned in &plan {
            if let Err(e) = self.apply(planned, backup_dir.path(), &mut applied, &mut report) {
                tracing::error!(
                    module = %planned.module,
                    error = %e,
                    "Commit failed, rolling back"
                );
                let (restored, unrestored) = rollback(applied);
                if !unrestored.is_empty() {
                    // Keep the backups around for manual recovery.
                    let kept = backup_dir.keep();
                    tracing::error!(dir = %kept.display(), "Backups kept for manual recovery");
                }
                return Err(CompileError::Commit {
                    module: planned.module.clone(),
                    detail: e.to_string(),
                    restored,
                    unrestored,
                });
            }
        }

        Ok(report)
    }

    fn apply(
        &self,
        planned: &PlannedMove,
        backup_dir: &Path,
        applied: &mut Vec<Applied>,
        report: &mut CommitReport,
    ) -> io::Result<()> {
        match &planned.action {
            CommitAction::Install => {
                let size = fs::metadata(&planned.staged)?.len();
                tracing::info!(module = %planned.module, size, "Exporting module");
                move_file(&planned.staged, &planned.target)?;
                applied.push(Applied::Installed {
                    target: planned.target.clone(),
                    staged: planned.staged.clone(),
                });
                report.installed.push(planned.module.clone());
            }
            CommitAction::Replace => {
                let old_size = fs::metadata(&planned.target)?.len();
                let new_size = fs::metadata(&planned.staged)?.len();
                tracing::warn!(
                    module = %planned.module,
                    old_size,
                    new_size,
                    "Replacing module in destination"
                );

                let backup = backup_dir.join(planned.target.file_name().unwrap_or_default());
                move_file(&planned.target, &backup)?;
                if let Err(e) = move_file(&planned.staged, &planned.target) {
                    let _ = move_file(&backup, &planned.target);
                    return Err(e);
                }
                applied.push(Applied::Replaced {
                    target: planned.target.clone(),
                    staged: planned.staged.clone(),
                    backup,
                });
                report.replaced.push(planned.module.clone());
            }
            CommitAction::Unchanged => {
                tracing::info!(module = %planned.module, "Module unchanged, not rewritten");
                report.unchanged.push(planned.module.clone());
            }
            CommitAction::Skip { old_size, new_size } => {
                tracing::warn!(
                    module = %planned.module,
                    old_size,
                    new_size,
                    "Module exists in destination and is protected, skipping"
                );
                report.skipped.push(SkippedModule {
                    module: planned.module.clone(),
                    old_size: *old_size,
                    new_size: *new_size,
                });
            }
        }
        Ok(())
    }
}

/// Reverse applied moves, newest first. Returns the number restored and the
/// targets that could not be restored.
fn rollback(applied: Vec<Applied>) -> (usize, Vec<String>) {
    let mut restored = 0;
    let mut unrestored = Vec::new();

    for step in applied.into_iter().rev() {
        let result = match &step {
            Applied::Installed { target, staged } => move_file(target, staged),
            Applied::Replaced { target, staged, backup } => {
                move_file(target, staged).and_then(|_| move_file(backup, target))
            }
        };
        let target = match &step {
            Applied::Installed { target, .. } | Applied::Replaced { target, .. } => target,
        };
        match result {
            Ok(()) => restored += 1,
            Err(e) => {
                tracing::error!(path = %target.display(), error = %e, "Rollback failed");
                unrestored.push(target.display().to_string());
            }
        }
    }

    (restored, unrestored)
}
