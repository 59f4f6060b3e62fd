/// Error types for the MIB compiler
///
/// Every failure that concerns a single module names that module, so the
/// top-level report always says what went wrong and where.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Which conversion step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStep {
    /// Rewrite of a legacy module into the canonical dialect
    Normalize,
    /// Conversion into the generic intermediate representation
    Intermediate,
    /// Conversion of the intermediate representation into a registry module
    Target,
}

impl std::fmt::Display for ConversionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionStep::Normalize => write!(f, "canonical rewrite"),
            ConversionStep::Intermediate => write!(f, "intermediate conversion"),
            ConversionStep::Target => write!(f, "target conversion"),
        }
    }
}

/// Errors that can occur while compiling MIB modules
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{module}: module info unavailable: {detail}")]
    Info { module: String, detail: String },

    #[error("{module}: syntax invalid at severity {severity}")]
    Syntax {
        module: String,
        severity: u8,
        diagnostics: Vec<String>,
    },

    #[error("{module}: failed to locate MIB module {missing}")]
    MissingDependency { module: String, missing: String },

    #[error("{module}: {step} failed: {detail}")]
    Conversion {
        module: String,
        step: ConversionStep,
        detail: String,
    },

    #[error("registry inconsistency found during {phase} check: {detail}")]
    Consistency { phase: String, detail: String },

    #[error("failed to start `{program}`: {source}")]
    ToolInvocation {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    ToolTimeout { program: String, timeout: Duration },

    #[error("registry runtime error: {0}")]
    Runtime(String),

    #[error(
        "{module}: commit failed ({detail}); restored {restored} file(s), \
         could not restore {unrestored:?}"
    )]
    Commit {
        module: String,
        detail: String,
        restored: usize,
        unrestored: Vec<String>,
    },

    #[error("invalid settings file {path}: {detail}")]
    Settings { path: PathBuf, detail: String },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl CompileError {
    /// Short name of the error kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Info { .. } => "InfoError",
            CompileError::Syntax { .. } => "SyntaxError",
            CompileError::MissingDependency { .. } => "MissingDependencyError",
            CompileError::Conversion { .. } => "ConversionError",
            CompileError::Consistency { .. } => "ConsistencyError",
            CompileError::ToolInvocation { .. } => "ToolInvocationError",
            CompileError::ToolTimeout { .. } => "ToolTimeoutError",
            CompileError::Runtime(_) => "RuntimeError",
            CompileError::Commit { .. } => "CommitError",
            CompileError::Settings { .. } | CompileError::InvalidSettings(_) => "SettingsError",
            CompileError::Io(_) => "IoError",
        }
    }

    /// The module this error is about, if any
    pub fn module(&self) -> Option<&str> {
        match self {
            CompileError::Info { module, .. }
            | CompileError::Syntax { module, .. }
            | CompileError::MissingDependency { module, .. }
            | CompileError::Conversion { module, .. }
            | CompileError::Commit { module, .. } => Some(module),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
