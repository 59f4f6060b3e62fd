//! Test doubles for the conversion service and the registry runtime

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use mib_compiler::error::{CompileError, ConversionStep, Result};
use mib_compiler::smi::{DumpFormat, Import, LintReport, ModuleInfo, Toolchain};
use mib_compiler::{Compiler, RegistryRuntime, Settings};
use tempfile::TempDir;

/// Ordered log of everything the fakes were asked to do
pub type Events = Rc<RefCell<Vec<String>>>;

#[derive(Debug, Clone)]
pub struct FakeModule {
    pub language: String,
    pub imports: Vec<String>,
    pub lint: LintReport,
    pub body: String,
    pub fail_step: Option<ConversionStep>,
}

impl FakeModule {
    pub fn new(imports: &[&str]) -> Self {
        Self {
            language: "SMIv2".to_string(),
            imports: imports.iter().map(|s| s.to_string()).collect(),
            lint: LintReport {
                passed: true,
                ..Default::default()
            },
            body: String::new(),
            fail_step: None,
        }
    }

    pub fn language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub fn lint(mut self, lint: LintReport) -> Self {
        self.lint = lint;
        self
    }

    pub fn fail_at(mut self, step: ConversionStep) -> Self {
        self.fail_step = Some(step);
        self
    }
}

/// In-memory MIB source tree
pub struct FakeToolchain {
    pub modules: HashMap<String, FakeModule>,
    pub source_dir: PathBuf,
    pub events: Events,
    pub config: RefCell<Option<PathBuf>>,
}

impl FakeToolchain {
    fn fail(module: &str, step: ConversionStep) -> CompileError {
        CompileError::Conversion {
            module: module.to_string(),
            step,
            detail: "injected failure".to_string(),
        }
    }

    fn lookup(&self, module: &str) -> Result<&FakeModule> {
        self.modules.get(module).ok_or_else(|| CompileError::Info {
            module: module.to_string(),
            detail: "unknown module".to_string(),
        })
    }
}

impl Toolchain for FakeToolchain {
    fn set_config(&mut self, config: &Path) {
        *self.config.borrow_mut() = Some(config.to_path_buf());
    }

    fn module_info(&self, module: &str) -> Result<ModuleInfo> {
        self.events.borrow_mut().push(format!("info:{}", module));
        let fake = self.lookup(module)?;
        Ok(ModuleInfo {
            language: fake.language.clone(),
            path: self.source_dir.join(module),
        })
    }

    fn lint(&self, module: &str, _source: &Path) -> Result<LintReport> {
        self.events.borrow_mut().push(format!("lint:{}", module));
        Ok(self.lookup(module)?.lint.clone())
    }

    fn convert(
        &self,
        module: &str,
        source: &Path,
        format: DumpFormat,
        output: &Path,
    ) -> Result<()> {
        self.events
            .borrow_mut()
            .push(format!("convert:{}:{}", format.as_str(), module));
        let fake = self.lookup(module)?;
        if fake.fail_step == Some(format.step()) {
            return Err(Self::fail(module, format.step()));
        }
        let text = fs::read_to_string(source)?;
        fs::write(output, text)?;
        Ok(())
    }

    fn to_target(&self, module: &str, intermediate: &Path, output: &Path) -> Result<()> {
        self.events.borrow_mut().push(format!("target:{}", module));
        let fake = self.lookup(module)?;
        if fake.fail_step == Some(ConversionStep::Target) {
            fs::write(output, "partial")?;
            return Err(Self::fail(module, ConversionStep::Target));
        }
        let source = fs::read_to_string(intermediate)?;
        fs::write(output, format!("# {}\n{}{}\n", module, source, fake.body))?;
        Ok(())
    }

    fn imports(&self, module: &str) -> Result<Vec<Import>> {
        self.events.borrow_mut().push(format!("imports:{}", module));
        let fake = self.lookup(module)?;
        Ok(fake
            .imports
            .iter()
            .flat_map(|m| {
                // Two symbols per module exercise deduplication.
                [
                    Import { module: m.clone(), symbol: "first".to_string() },
                    Import { module: m.clone(), symbol: "second".to_string() },
                ]
            })
            .collect())
    }
}

/// Registry runtime over plain directories of `.py` files
pub struct FakeRuntime {
    pub builtins: Vec<String>,
    pub search_path: Vec<PathBuf>,
    pub events: Events,
    /// Zero-based load attempts that fail
    pub failing_loads: Vec<usize>,
    pub loads: Cell<usize>,
}

impl FakeRuntime {
    fn modules_in(dir: &Path) -> Vec<(String, PathBuf)> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("py") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    found.push((stem.to_string(), path.clone()));
                }
            }
        }
        found
    }
}

impl RegistryRuntime for FakeRuntime {
    fn set_search_path(&mut self, paths: Vec<PathBuf>) {
        self.search_path = paths;
    }

    fn list_modules(&self) -> Result<Vec<String>> {
        let mut names = self.builtins.clone();
        for dir in &self.search_path {
            names.extend(Self::modules_in(dir).into_iter().map(|(name, _)| name));
        }
        Ok(names)
    }

    fn load_all(&mut self) -> Result<()> {
        let attempt = self.loads.get();
        self.loads.set(attempt + 1);
        self.events.borrow_mut().push(format!("load:{}", attempt));

        if self.failing_loads.contains(&attempt) {
            return Err(CompileError::Runtime("injected load failure".to_string()));
        }
        for dir in &self.search_path {
            for (name, path) in Self::modules_in(dir) {
                if fs::read_to_string(&path)?.contains("BROKEN") {
                    return Err(CompileError::Runtime(format!("{} failed to load", name)));
                }
            }
        }
        Ok(())
    }

    fn unload_all(&mut self) -> Result<()> {
        self.events.borrow_mut().push("unload".to_string());
        Ok(())
    }
}

/// A compiler wired to fakes inside a scratch directory
pub struct Fixture {
    pub root: TempDir,
    pub events: Events,
    pub modules: HashMap<String, FakeModule>,
    pub builtins: Vec<String>,
    pub failing_loads: Vec<usize>,
}

impl Fixture {
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(root.path().join("mibs")).unwrap();
        Self {
            root,
            events: Rc::new(RefCell::new(Vec::new())),
            modules: HashMap::new(),
            builtins: vec!["SNMPv2-SMI".to_string(), "SNMPv2-TC".to_string()],
            failing_loads: Vec::new(),
        }
    }

    pub fn module(mut self, name: &str, module: FakeModule) -> Self {
        let source = format!("{} DEFINITIONS ::= BEGIN END\n", name);
        fs::write(self.root.path().join("mibs").join(name), source).unwrap();
        self.modules.insert(name.to_string(), module);
        self
    }

    pub fn failing_loads(mut self, attempts: &[usize]) -> Self {
        self.failing_loads = attempts.to_vec();
        self
    }

    pub fn destination(&self) -> PathBuf {
        self.root.path().join("dest")
    }

    pub fn staging(&self) -> PathBuf {
        self.root.path().join("staging")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            mibs_root: Some(self.root.path().join("mibs")),
            destination_dir: self.destination(),
            staging_dir: self.staging(),
            ..Settings::default()
        }
    }

    pub fn compiler(&self) -> Compiler<FakeToolchain, FakeRuntime> {
        self.compiler_with(self.settings())
    }

    pub fn compiler_with(&self, settings: Settings) -> Compiler<FakeToolchain, FakeRuntime> {
        let toolchain = FakeToolchain {
            modules: self.modules.clone(),
            source_dir: self.root.path().join("mibs"),
            events: Rc::clone(&self.events),
            config: RefCell::new(None),
        };
        let runtime = FakeRuntime {
            builtins: self.builtins.clone(),
            search_path: Vec::new(),
            events: Rc::clone(&self.events),
            failing_loads: self.failing_loads.clone(),
            loads: Cell::new(0),
        };
        Compiler::new(settings, toolchain, runtime)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn write_destination(&self, module: &str, contents: &str) {
        fs::create_dir_all(self.destination()).unwrap();
        fs::write(self.destination().join(format!("{}.py", module)), contents).unwrap();
    }

    pub fn read_destination(&self, module: &str) -> Option<String> {
        fs::read_to_string(self.destination().join(format!("{}.py", module))).ok()
    }
}
