/// Protected set loading and the consistency gate
///
/// Both talk to the [`RegistryRuntime`]: one to learn which modules already
/// exist, the other to prove the whole registry still loads.

use std::fmt;
use std::path::PathBuf;

use crate::error::{CompileError, Result};
use crate::module::CompilationRegistry;
use crate::runtime::RegistryRuntime;

/// When a consistency check runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Before any compilation
    Baseline,
    /// After staging is populated, before commit
    PreCommit,
    /// Revalidation of an existing staging area
    Revalidate,
}

impl fmt::Display for GatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatePhase::Baseline => write!(f, "baseline"),
            GatePhase::PreCommit => write!(f, "pre-commit"),
            GatePhase::Revalidate => write!(f, "revalidate"),
        }
    }
}

/// Build a registry in which every module the runtime can already resolve
/// is protected.
pub fn load_protected<T: RegistryRuntime + ?Sized>(
    runtime: &mut T,
    search_path: Vec<PathBuf>,
) -> Result<CompilationRegistry> {
    runtime.set_search_path(search_path);
    let mut registry = CompilationRegistry::new();
    for name in runtime.list_modules()? {
        registry.protect(name);
    }
    tracing::info!(count = registry.protected_count(), "Loaded existing modules");
    Ok(registry)
}

/// Loads then unloads every module visible on `search_path`
pub struct ConsistencyGate {
    search_path: Vec<PathBuf>,
}

impl ConsistencyGate {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    pub fn check<T: RegistryRuntime + ?Sized>(
        &self,
        runtime: &mut T,
        phase: GatePhase,
    ) -> Result<()> {
        runtime.set_search_path(self.search_path.clone());
        let wrap = |e: CompileError| CompileError::Consistency {
            phase: phase.to_string(),
            detail: e.to_string(),
        };

        if let Err(e) = runtime.load_all() {
            tracing::error!(%phase, error = %e, "Failed to load registry modules");
            return Err(wrap(e));
        }
        runtime.unload_all().map_err(wrap)?;

        tracing::info!(%phase, "Registry consistency OK");
        Ok(())
    }
}
