/// Compilation driver
///
/// Runs a full compile: protected set, baseline consistency check, recursive
/// compilation of the requested module and its imports into staging, a second
/// consistency check, then commit. The destination registry is only touched
/// by the commit, and only after both checks pass.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::commit::{CommitReport, Committer};
use crate::config;
use crate::error::{CompileError, Result};
use crate::gate::{ConsistencyGate, GatePhase, load_protected};
use crate::module::{CompilationRegistry, ModuleRecord, Stage};
use crate::runtime::RegistryRuntime;
use crate::settings::Settings;
use crate::smi::{DumpFormat, Toolchain, imported_modules};
use crate::staging::StagingArea;

/// A sub-critical lint finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleWarning {
    pub module: String,
    pub message: String,
}

/// Result of a successful compile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub module: String,
    /// Modules compiled this run, dependencies before their importers
    pub compiled: Vec<String>,
    pub warnings: Vec<ModuleWarning>,
    /// Final state of every module this run worked on
    pub modules: BTreeMap<String, ModuleRecord>,
    pub commit: CommitReport,
}

pub struct Compiler<T, R> {
    settings: Settings,
    toolchain: T,
    runtime: R,
    /// Registry of the most recent `process` run, kept after failures too
    registry: CompilationRegistry,
}

impl<T: Toolchain, R: RegistryRuntime> Compiler<T, R> {
    pub fn new(settings: Settings, toolchain: T, runtime: R) -> Self {
        Self {
            settings,
            toolchain,
            runtime,
            registry: CompilationRegistry::new(),
        }
    }

    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Per-module state left by the last `process` call
    pub fn registry(&self) -> &CompilationRegistry {
        &self.registry
    }

    fn staging(&self) -> StagingArea {
        StagingArea::new(&self.settings.staging_dir, &self.settings.artifact_extension)
    }

    fn gate(&self) -> ConsistencyGate {
        ConsistencyGate::new(vec![
            self.settings.destination_dir.clone(),
            self.settings.staging_dir.clone(),
        ])
    }

    fn protected(&mut self) -> Result<CompilationRegistry> {
        let search_path = vec![self.settings.destination_dir.clone()];
        load_protected(&mut self.runtime, search_path)
    }

    /// Compile `module` and everything it imports, then commit
    pub fn process(&mut self, module: &str) -> Result<RunReport> {
        let _span = tracing::info_span!("compile", module).entered();
        self.settings.validate().map_err(CompileError::InvalidSettings)?;
        self.registry = CompilationRegistry::new();

        let smi_config = config::generate(self.settings.mibs_root.as_deref())?;
        self.toolchain.set_config(smi_config.path());
        let work_dir = tempfile::Builder::new().prefix("mibc-").tempdir()?;

        let staging = self.staging();
        if !staging.artifacts()?.is_empty() {
            tracing::warn!(dir = %staging.dir().display(), "Discarding stale staging area");
        }
        staging.discard()?;

        let mut registry = CompilationRegistry::new();
        let result = self.run(module, &staging, work_dir.path(), &mut registry);
        self.registry = registry;

        if let Err(e) = staging.discard() {
            tracing::warn!(error = %e, "Failed to remove staging area");
        }
        drop(smi_config);

        match &result {
            Ok(report) => tracing::info!(
                compiled = report.compiled.len(),
                installed = report.commit.installed.len(),
                replaced = report.commit.replaced.len(),
                skipped = report.commit.skipped.len(),
                "Compilation finished"
            ),
            Err(e) => tracing::error!(kind = e.kind(), error = %e, "Compilation failed"),
        }
        result
    }

    fn run(
        &mut self,
        module: &str,
        staging: &StagingArea,
        work_dir: &Path,
        registry: &mut CompilationRegistry,
    ) -> Result<RunReport> {
        *registry = self.protected()?;
        registry.request(module);

        let gate = self.gate();
        gate.check(&mut self.runtime, GatePhase::Baseline)?;

        staging.prepare()?;
        let mut session = Session {
            toolchain: &self.toolchain,
            settings: &self.settings,
            staging,
            work_dir,
            registry: &mut *registry,
            compiled: Vec::new(),
            warnings: Vec::new(),
        };
        session.advance(module)?;
        let Session { compiled, warnings, .. } = session;

        gate.check(&mut self.runtime, GatePhase::PreCommit)?;

        let commit = Committer::new(&self.settings.destination_dir).commit(staging, registry)?;
        Ok(RunReport {
            module: module.to_string(),
            compiled,
            warnings,
            modules: registry.worked_on(),
            commit,
        })
    }

    /// Check consistency, then commit whatever is already staged
    pub fn revalidate(&mut self) -> Result<CommitReport> {
        let _span = tracing::info_span!("revalidate").entered();
        self.settings.validate().map_err(CompileError::InvalidSettings)?;
        let staging = self.staging();

        let result = self.commit_staged(&staging);

        if let Err(e) = staging.discard() {
            tracing::warn!(error = %e, "Failed to remove staging area");
        }
        result
    }

    fn commit_staged(&mut self, staging: &StagingArea) -> Result<CommitReport> {
        let registry = self.protected()?;
        self.gate().check(&mut self.runtime, GatePhase::Revalidate)?;
        Committer::new(&self.settings.destination_dir).commit(staging, &registry)
    }

    /// Run the consistency gate alone
    pub fn check(&mut self) -> Result<()> {
        let gate = self.gate();
        gate.check(&mut self.runtime, GatePhase::Baseline)
    }
}

/// State of one recursive compilation
struct Session<'a, T> {
    toolchain: &'a T,
    settings: &'a Settings,
    staging: &'a StagingArea,
    work_dir: &'a Path,
    registry: &'a mut CompilationRegistry,
    compiled: Vec<String>,
    warnings: Vec<ModuleWarning>,
}

impl<'a, T: Toolchain> Session<'a, T> {
    /// Compile a module already registered in the registry
    fn advance(&mut self, module: &str) -> Result<()> {
        let _span = tracing::info_span!("module", module).entered();
        tracing::info!("Starting compilation");

        match self.stages(module) {
            Ok(()) => {
                self.registry.set_stage(module, Stage::Compiled);
                self.compiled.push(module.to_string());
                tracing::info!("Compiled successfully");
                Ok(())
            }
            Err(e) => {
                self.registry.set_stage(module, Stage::Failed);
                Err(e)
            }
        }
    }

    /// Compile a dependency unless it is already known to this run
    fn compile(&mut self, module: &str) -> Result<()> {
        if !self.registry.visit(module) {
            tracing::debug!(dependency = module, "Already known, not compiling");
            return Ok(());
        }
        self.advance(module)
    }

    fn stages(&mut self, module: &str) -> Result<()> {
        let source = self.check_info(module)?;
        self.check_syntax(module, &source)?;
        let source = self.normalize(module, source)?;

        let intermediate = self.work_dir.join(format!("{}.python", module));
        tracing::info!("Converting to intermediate format");
        self.toolchain
            .convert(module, &source, DumpFormat::Python, &intermediate)?;
        self.registry.set_stage(module, Stage::ConvertedIntermediate);

        let artifact = self.staging.artifact_path(module);
        tracing::info!(artifact = %artifact.display(), "Converting to registry format");
        self.toolchain.to_target(module, &intermediate, &artifact)?;
        self.registry.set_stage(module, Stage::ConvertedTarget);

        let dependencies = imported_modules(&self.toolchain.imports(module)?);
        tracing::info!(imports = ?dependencies, "Resolved imports");
        for dependency in &dependencies {
            self.compile(dependency)?;
        }
        self.registry.set_stage(module, Stage::DependenciesResolved);
        Ok(())
    }

    fn check_info(&mut self, module: &str) -> Result<PathBuf> {
        let info = self.toolchain.module_info(module)?;
        if info.language.trim().is_empty() {
            return Err(CompileError::Info {
                module: module.to_string(),
                detail: "language could not be determined".to_string(),
            });
        }
        if !info.path.exists() {
            return Err(CompileError::Info {
                module: module.to_string(),
                detail: format!("source path {} does not exist", info.path.display()),
            });
        }
        tracing::info!(lang = %info.language, path = %info.path.display(), "Module info");

        if let Some(record) = self.registry.get_mut(module) {
            record.language = Some(info.language);
            record.source_path = Some(info.path.clone());
            record.stage = Stage::InfoChecked;
        }
        Ok(info.path)
    }

    fn check_syntax(&mut self, module: &str, source: &Path) -> Result<()> {
        let report = self.toolchain.lint(module, source)?;
        tracing::info!(severity = report.severity, "Checked syntax");

        if let Some(missing) = report.missing_module {
            tracing::error!(missing = %missing, "Imported module not found");
            return Err(CompileError::MissingDependency {
                module: module.to_string(),
                missing,
            });
        }
        if !report.passed {
            for line in &report.diagnostics {
                tracing::warn!("{}", line);
            }
            return Err(CompileError::Syntax {
                module: module.to_string(),
                severity: report.severity,
                diagnostics: report.diagnostics,
            });
        }

        for line in &report.diagnostics {
            tracing::warn!(diagnostic = %line, "Lint warning");
            self.warnings.push(ModuleWarning {
                module: module.to_string(),
                message: line.clone(),
            });
        }
        self.registry.set_stage(module, Stage::SyntaxValidated);
        Ok(())
    }

    fn normalize(&mut self, module: &str, source: PathBuf) -> Result<PathBuf> {
        let language = self
            .registry
            .get(module)
            .and_then(|r| r.language.clone())
            .unwrap_or_default();

        let source = if language == self.settings.canonical_language {
            source
        } else {
            tracing::info!(
                from = %language,
                to = %self.settings.canonical_language,
                "Rewriting to canonical dialect"
            );
            let rewritten = self.work_dir.join(format!("{}.smiv2", module));
            self.toolchain
                .convert(module, &source, DumpFormat::Smiv2, &rewritten)?;
            if let Some(record) = self.registry.get_mut(module) {
                record.source_path = Some(rewritten.clone());
            }
            rewritten
        };

        self.registry.set_stage(module, Stage::Normalized);
        Ok(source)
    }
}
