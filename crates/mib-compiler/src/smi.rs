/// Syntax & conversion service
///
/// The compiler never parses ASN.1 itself. It asks a [`Toolchain`] for module
/// metadata, lint results, format conversions and import lists. [`Libsmi`]
/// implements the toolchain with the libsmi command line tools
/// (`smiquery`, `smilint`, `smidump`) plus `libsmi2pysnmp`.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CompileError, ConversionStep, Result};
use crate::settings::ToolNames;
use crate::tool::{Invocation, ToolOutput, ToolRunner};

static LANGUAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Language:\s*(\S.*?)\s*$").unwrap());
static PATHNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*Pathname:\s*(\S.*?)\s*$").unwrap());
static MISSING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"failed to locate MIB module [`'"]([^`'"]+)[`'"]"#).unwrap());
static IMPORT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z][A-Za-z0-9-]*)::(\S+)\s*$").unwrap());

/// Metadata reported for a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Definition language, e.g. `SMIv1` or `SMIv2`
    pub language: String,
    /// Where the module's source lives
    pub path: PathBuf,
}

/// One imported symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub symbol: String,
}

/// Outcome of a syntax check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    /// Checker exited cleanly
    pub passed: bool,
    /// Severity level the check ran at
    pub severity: u8,
    /// First module the checker could not locate
    pub missing_module: Option<String>,
    /// Non-empty diagnostic lines, stdout then stderr
    pub diagnostics: Vec<String>,
}

impl LintReport {
    pub fn from_output(output: &ToolOutput, severity: u8) -> Self {
        let diagnostics: Vec<String> = output
            .stdout
            .lines()
            .chain(output.stderr.lines())
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect();
        let missing_module = find_missing_module(&diagnostics);
        Self {
            passed: output.success(),
            severity,
            missing_module,
            diagnostics,
        }
    }
}

/// Output formats of the converter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpFormat {
    /// Canonical SMIv2 rewrite
    Smiv2,
    /// Generic structured intermediate representation
    Python,
}

impl DumpFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpFormat::Smiv2 => "smiv2",
            DumpFormat::Python => "python",
        }
    }

    pub fn step(&self) -> ConversionStep {
        match self {
            DumpFormat::Smiv2 => ConversionStep::Normalize,
            DumpFormat::Python => ConversionStep::Intermediate,
        }
    }
}

/// The operations the compilation driver needs from the conversion service
pub trait Toolchain {
    /// Point the toolchain at the search-path config generated for this run
    fn set_config(&mut self, _config: &Path) {}

    /// Look up a module's language and source path
    fn module_info(&self, module: &str) -> Result<ModuleInfo>;

    /// Check the syntax of the module source at `source`
    fn lint(&self, module: &str, source: &Path) -> Result<LintReport>;

    /// Convert `source` into `format`, writing `output`
    fn convert(&self, module: &str, source: &Path, format: DumpFormat, output: &Path) -> Result<()>;

    /// Turn an intermediate file into a registry module at `output`
    fn to_target(&self, module: &str, intermediate: &Path, output: &Path) -> Result<()>;

    /// List the module's imports, in declaration order
    fn imports(&self, module: &str) -> Result<Vec<Import>>;
}

/// Extract the module name from a "failed to locate MIB module" diagnostic
pub fn find_missing_module<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines
        .iter()
        .find_map(|line| MISSING_RE.captures(line.as_ref()))
        .map(|caps| caps[1].to_string())
}

/// Parse `smiquery module` output
pub fn parse_module_info(stdout: &str) -> Option<ModuleInfo> {
    let language = LANGUAGE_RE.captures(stdout)?[1].to_string();
    let path = PATHNAME_RE.captures(stdout)?[1].to_string();
    Some(ModuleInfo {
        language,
        path: PathBuf::from(path),
    })
}

/// Parse `smiquery imports` output
pub fn parse_imports(stdout: &str) -> Vec<Import> {
    stdout
        .lines()
        .filter_map(|line| IMPORT_RE.captures(line))
        .map(|caps| Import {
            module: caps[1].to_string(),
            symbol: caps[2].to_string(),
        })
        .collect()
}

/// Module names of `imports`, first occurrence wins
pub fn imported_modules(imports: &[Import]) -> Vec<String> {
    let mut modules: Vec<String> = Vec::new();
    for import in imports {
        if !modules.contains(&import.module) {
            modules.push(import.module.clone());
        }
    }
    modules
}

/// libsmi-backed toolchain
pub struct Libsmi<R> {
    runner: R,
    tools: ToolNames,
    config: PathBuf,
    severity: u8,
}

impl<R: ToolRunner> Libsmi<R> {
    pub fn new(runner: R, tools: ToolNames, config: impl Into<PathBuf>, severity: u8) -> Self {
        Self {
            runner,
            tools,
            config: config.into(),
            severity,
        }
    }

    fn with_config(&self, program: &str) -> Invocation {
        Invocation::new(program).arg("-c").arg(&self.config)
    }

    fn conversion_failed(module: &str, step: ConversionStep, output: &ToolOutput) -> CompileError {
        tracing::warn!(module, "{} failed\n{}", step, output.transcript());
        CompileError::Conversion {
            module: module.to_string(),
            step,
            detail: output.summary(),
        }
    }
}

impl<R: ToolRunner> Toolchain for Libsmi<R> {
    fn set_config(&mut self, config: &Path) {
        self.config = config.to_path_buf();
    }

    fn module_info(&self, module: &str) -> Result<ModuleInfo> {
        let invocation = self.with_config(&self.tools.smiquery).args(["module", module]);
        let output = self.runner.run(&invocation)?;
        parse_module_info(&output.stdout).ok_or_else(|| {
            tracing::warn!(module, "module info missing\n{}", output.transcript());
            CompileError::Info {
                module: module.to_string(),
                detail: format!("no language/pathname reported ({})", output.summary()),
            }
        })
    }

    fn lint(&self, _module: &str, source: &Path) -> Result<LintReport> {
        let invocation = self
            .with_config(&self.tools.smilint)
            .arg("-l")
            .arg(self.severity.to_string())
            .args(["-s", "-r"])
            .arg(source);
        let output = self.runner.run(&invocation)?;
        Ok(LintReport::from_output(&output, self.severity))
    }

    fn convert(
        &self,
        module: &str,
        source: &Path,
        format: DumpFormat,
        output: &Path,
    ) -> Result<()> {
        let invocation = self
            .with_config(&self.tools.smidump)
            .args(["-l", "3", "-k", "-s", "-f", format.as_str(), "-o"])
            .arg(output)
            .arg(source);
        let result = self.runner.run(&invocation)?;
        if !result.success() {
            return Err(Self::conversion_failed(module, format.step(), &result));
        }
        Ok(())
    }

    fn to_target(&self, module: &str, intermediate: &Path, output: &Path) -> Result<()> {
        let invocation = Invocation::new(&self.tools.libsmi2pysnmp)
            .stdin_from(intermediate)
            .stdout_to(output);
        let result = self.runner.run(&invocation)?;
        if !result.success() {
            return Err(Self::conversion_failed(module, ConversionStep::Target, &result));
        }
        Ok(())
    }

    fn imports(&self, module: &str) -> Result<Vec<Import>> {
        let invocation = self.with_config(&self.tools.smiquery).args(["imports", module]);
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(CompileError::Info {
                module: module.to_string(),
                detail: format!("import query failed ({})", output.summary()),
            });
        }
        Ok(parse_imports(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_parse_module_info() {
        let stdout = "\
     Module: ACME-MIB
   Pathname: /usr/share/mibs/acme/ACME-MIB
   Language: SMIv1
";
        let info = parse_module_info(stdout).unwrap();
        assert_eq!(info.language, "SMIv1");
        assert_eq!(info.path, PathBuf::from("/usr/share/mibs/acme/ACME-MIB"));
    }

    #[test]
    fn test_parse_module_info_requires_both_fields() {
        assert!(parse_module_info("Language: SMIv2\n").is_none());
        assert!(parse_module_info("Pathname: /x\n").is_none());
        assert!(parse_module_info("").is_none());
    }

    #[test]
    fn test_missing_module_quoting_styles() {
        let lines = [
            "ACME-MIB:12: warning: something minor",
            "ACME-MIB:3: failed to locate MIB module `ACME-TC'",
        ];
        assert_eq!(find_missing_module(&lines).as_deref(), Some("ACME-TC"));

        let lines = ["x: failed to locate MIB module 'FOO-MIB'"];
        assert_eq!(find_missing_module(&lines).as_deref(), Some("FOO-MIB"));

        let lines = ["no problem here"];
        assert_eq!(find_missing_module(&lines), None);
    }

    #[test]
    fn test_parse_imports_dedups_in_order() {
        let stdout = "\
    Imports: SNMPv2-SMI::MODULE-IDENTITY
             SNMPv2-SMI::OBJECT-TYPE
             ACME-TC::AcmeString
             SNMPv2-TC::DisplayString
             ACME-TC::AcmeIndex
";
        let imports = parse_imports(stdout);
        assert_eq!(imports.len(), 5);
        assert_eq!(imports[0].module, "SNMPv2-SMI");
        assert_eq!(imports[0].symbol, "MODULE-IDENTITY");
        assert_eq!(
            imported_modules(&imports),
            vec!["SNMPv2-SMI", "ACME-TC", "SNMPv2-TC"]
        );
    }

    /// Runner that records invocations and replays canned outputs
    struct ScriptedRunner {
        calls: RefCell<Vec<Invocation>>,
        output: ToolOutput,
    }

    impl ToolRunner for ScriptedRunner {
        fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
            self.calls.borrow_mut().push(invocation.clone());
            Ok(self.output.clone())
        }
    }

    fn scripted(code: i32, stdout: &str, stderr: &str) -> ScriptedRunner {
        ScriptedRunner {
            calls: RefCell::new(Vec::new()),
            output: ToolOutput {
                code: Some(code),
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        }
    }

    #[test]
    fn test_lint_command_line_and_report() {
        let runner = scripted(0, "", "ACME-MIB:1: failed to locate MIB module `ACME-TC'\n");
        let smi = Libsmi::new(runner, ToolNames::default(), "/tmp/smi.conf", 5);
        let report = smi.lint("ACME-MIB", Path::new("/mibs/ACME-MIB")).unwrap();
        assert!(report.passed);
        assert_eq!(report.severity, 5);
        assert_eq!(report.missing_module.as_deref(), Some("ACME-TC"));

        let calls = smi.runner.calls.borrow();
        assert_eq!(
            calls[0].to_string(),
            "smilint -c /tmp/smi.conf -l 5 -s -r /mibs/ACME-MIB"
        );
    }

    #[test]
    fn test_convert_failure_names_step() {
        let runner = scripted(1, "", "smidump: bad input\n");
        let smi = Libsmi::new(runner, ToolNames::default(), "/tmp/smi.conf", 3);
        let err = smi
            .convert(
                "ACME-MIB",
                Path::new("/mibs/ACME-MIB"),
                DumpFormat::Python,
                Path::new("/w/ACME-MIB.python"),
            )
            .unwrap_err();
        match err {
            CompileError::Conversion { module, step, detail } => {
                assert_eq!(module, "ACME-MIB");
                assert_eq!(step, ConversionStep::Intermediate);
                assert_eq!(detail, "smidump: bad input");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            smi.runner.calls.borrow()[0].to_string(),
            "smidump -c /tmp/smi.conf -l 3 -k -s -f python -o /w/ACME-MIB.python /mibs/ACME-MIB"
        );
    }

    #[test]
    fn test_module_info_error() {
        let runner = scripted(1, "", "smiquery: cannot locate module\n");
        let smi = Libsmi::new(runner, ToolNames::default(), "/tmp/smi.conf", 3);
        let err = smi.module_info("NOPE-MIB").unwrap_err();
        assert!(matches!(err, CompileError::Info { ref module, .. } if module == "NOPE-MIB"));
    }

    #[test]
    fn test_to_target_redirects() {
        let runner = scripted(0, "", "");
        let smi = Libsmi::new(runner, ToolNames::default(), "/tmp/smi.conf", 3);
        smi.to_target("A", Path::new("/w/A.python"), Path::new("/s/A.py")).unwrap();
        assert_eq!(
            smi.runner.calls.borrow()[0].to_string(),
            "libsmi2pysnmp < /w/A.python > /s/A.py"
        );
    }
}
