/// MIB compiler
///
/// Compiles ASN.1 MIB modules, and every module they import, into PySNMP
/// registry modules. Parsing and conversion are delegated to libsmi; this
/// crate drives the pipeline and guards the destination registry.

pub mod commit;
pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod module;
pub mod runtime;
pub mod settings;
pub mod smi;
pub mod staging;
pub mod tool;

pub use commit::{CommitReport, Committer};
pub use driver::{Compiler, RunReport};
pub use error::{CompileError, Result};
pub use module::{CompilationRegistry, ModuleRecord, Stage};
pub use runtime::{PysnmpRuntime, RegistryRuntime};
pub use settings::Settings;
pub use smi::{Libsmi, Toolchain};
pub use tool::{ProcessRunner, ToolRunner};
