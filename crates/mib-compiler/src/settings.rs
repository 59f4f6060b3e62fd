/// Compiler settings
///
/// Loaded from an optional JSON file; every field has a default so a partial
/// file (or none at all) is valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// Names of the external executables the compiler drives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolNames {
    pub smiquery: String,
    pub smilint: String,
    pub smidump: String,
    pub libsmi2pysnmp: String,
    pub python: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            smiquery: "smiquery".to_string(),
            smilint: "smilint".to_string(),
            smidump: "smidump".to_string(),
            libsmi2pysnmp: "libsmi2pysnmp".to_string(),
            python: "python3".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the ASN.1 MIB source tree
    pub mibs_root: Option<PathBuf>,
    /// Registry directory receiving compiled modules
    pub destination_dir: PathBuf,
    /// Scratch directory for modules compiled during a run
    pub staging_dir: PathBuf,
    /// Lint severity threshold; levels up to this one are fatal
    pub severity: u8,
    /// Dialect every module is rewritten into before conversion
    pub canonical_language: String,
    /// File extension of compiled registry modules
    pub artifact_extension: String,
    /// Upper bound on a single external tool run
    pub tool_timeout_secs: u64,
    pub tools: ToolNames,
}

fn base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pysnmp-mib-compiler")
}

impl Default for Settings {
    fn default() -> Self {
        let base = base_dir();
        Self {
            mibs_root: None,
            destination_dir: base.join("mibs"),
            staging_dir: base.join("staging"),
            severity: 3,
            canonical_language: "SMIv2".to_string(),
            artifact_extension: "py".to_string(),
            tool_timeout_secs: 300,
            tools: ToolNames::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| CompileError::Settings {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_json(&text).map_err(|detail| CompileError::Settings {
            path: path.to_path_buf(),
            detail,
        })
    }

    pub fn from_json(text: &str) -> std::result::Result<Self, String> {
        let settings: Settings = serde_json::from_str(text).map_err(|e| e.to_string())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings a run cannot safely use.
    ///
    /// Staging is wiped at the start and end of every run, so it must not
    /// overlap the destination registry in either direction.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.severity > 6 {
            return Err(format!("severity must be 0-6, got {}", self.severity));
        }
        let destination = resolve(&self.destination_dir);
        let staging = resolve(&self.staging_dir);
        if destination == staging {
            return Err("destination_dir and staging_dir must differ".to_string());
        }
        if destination.starts_with(&staging) || staging.starts_with(&destination) {
            return Err(format!(
                "destination_dir {} and staging_dir {} must not contain one another",
                destination.display(),
                staging.display()
            ));
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

/// Absolute form of `path` with symlinks resolved as far as it exists
fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}
