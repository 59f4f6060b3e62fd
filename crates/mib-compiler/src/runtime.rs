//! Registry runtime for compiled modules
//!
//! The runtime is what ultimately loads the compiled modules. The compiler
//! uses it for two things: enumerating modules that already exist (the
//! protected set) and loading everything as a consistency check.
//! [`PysnmpRuntime`] drives PySNMP's `MibBuilder` through a python
//! interpreter.

use std::path::PathBuf;

use crate::error::{CompileError, Result};
use crate::tool::{Invocation, ToolRunner};

/// Builds a `MibBuilder` whose sources are the defaults plus every directory
/// given on the command line.
const BUILDER_PRELUDE: &str = "\
import sys
from pysnmp.smi import builder
b = builder.MibBuilder()
b.setMibSources(*(b.getMibSources() + tuple(builder.DirMibSource(p) for p in sys.argv[1:])))
";

const LIST_SCRIPT: &str = "\
for source in b.getMibSources():
    for name in source.listdir():
        print(name)
";

const LOAD_SCRIPT: &str = "\
b.loadModules()
b.unloadModules()
print('OK')
";

/// Interface to the runtime that loads compiled modules
pub trait RegistryRuntime {
    /// Directories searched in addition to the runtime's built-in modules
    fn set_search_path(&mut self, paths: Vec<PathBuf>);

    /// Every module name resolvable on the current search path
    fn list_modules(&self) -> Result<Vec<String>>;

    /// Load every resolvable module
    fn load_all(&mut self) -> Result<()>;

    /// Unload everything loaded by [`RegistryRuntime::load_all`]
    fn unload_all(&mut self) -> Result<()>;
}

/// PySNMP through a python interpreter
pub struct PysnmpRuntime<R> {
    runner: R,
    python: String,
    search_path: Vec<PathBuf>,
    loaded: bool,
}

impl<R: ToolRunner> PysnmpRuntime<R> {
    pub fn new(runner: R, python: impl Into<String>) -> Self {
        Self {
            runner,
            python: python.into(),
            search_path: Vec::new(),
            loaded: false,
        }
    }

    fn script(&self, body: &str) -> Invocation {
        Invocation::new(&self.python)
            .arg("-c")
            .arg(format!("{}{}", BUILDER_PRELUDE, body))
            .args(&self.search_path)
    }
}

impl<R: ToolRunner> RegistryRuntime for PysnmpRuntime<R> {
    fn set_search_path(&mut self, paths: Vec<PathBuf>) {
        self.search_path = paths;
    }

    fn list_modules(&self) -> Result<Vec<String>> {
        let output = self.runner.run(&self.script(LIST_SCRIPT))?;
        if !output.success() {
            return Err(CompileError::Runtime(format!(
                "module enumeration failed: {}",
                output.summary()
            )));
        }
        let mut names: Vec<String> = output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn load_all(&mut self) -> Result<()> {
        // PySNMP state dies with the interpreter, so load and unload share one run.
        let output = self.runner.run(&self.script(LOAD_SCRIPT))?;
        if !output.success() {
            tracing::warn!("module load failed\n{}", output.transcript());
            return Err(CompileError::Runtime(output.summary()));
        }
        self.loaded = true;
        Ok(())
    }

    fn unload_all(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(CompileError::Runtime("unload requested before load".to_string()));
        }
        self.loaded = false;
        Ok(())
    }
}
