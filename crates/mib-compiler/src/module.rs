/// Per-module compilation state
///
/// The [`CompilationRegistry`] is both the visited set of a run and the
/// overwrite policy consulted at commit time.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::Serialize;

/// Where a module is in the conversion pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Pending,
    InfoChecked,
    SyntaxValidated,
    Normalized,
    ConvertedIntermediate,
    ConvertedTarget,
    DependenciesResolved,
    Compiled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleRecord {
    /// Only the explicitly requested module may replace an existing file
    pub allow_overwrite: bool,
    pub language: Option<String>,
    /// Current authoritative source; moves when the module is normalized
    pub source_path: Option<PathBuf>,
    pub stage: Stage,
}

impl ModuleRecord {
    pub fn new(allow_overwrite: bool) -> Self {
        Self {
            allow_overwrite,
            language: None,
            source_path: None,
            stage: Stage::Pending,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompilationRegistry {
    records: HashMap<String, ModuleRecord>,
}

impl CompilationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, module: &str) -> Option<&ModuleRecord> {
        self.records.get(module)
    }

    pub fn get_mut(&mut self, module: &str) -> Option<&mut ModuleRecord> {
        self.records.get_mut(module)
    }

    /// Mark `module` as pre-existing; it will never be overwritten
    pub fn protect(&mut self, module: impl Into<String>) {
        self.records.insert(module.into(), ModuleRecord::new(false));
    }

    /// Register the module the caller asked for; it alone may overwrite
    pub fn request(&mut self, module: impl Into<String>) {
        self.records.insert(module.into(), ModuleRecord::new(true));
    }

    /// Register a newly discovered dependency.
    ///
    /// Returns `false` if the module was already known, in which case the
    /// existing record is left alone.
    pub fn visit(&mut self, module: &str) -> bool {
        if self.records.contains_key(module) {
            return false;
        }
        self.records.insert(module.to_string(), ModuleRecord::new(false));
        true
    }

    pub fn set_stage(&mut self, module: &str, stage: Stage) {
        if let Some(record) = self.records.get_mut(module) {
            record.stage = stage;
        }
    }

    /// Whether a staged module may replace an existing destination file.
    /// Unknown modules may not.
    pub fn allows_overwrite(&self, module: &str) -> bool {
        self.records.get(module).is_some_and(|r| r.allow_overwrite)
    }

    pub fn protected_count(&self) -> usize {
        self.records.values().filter(|r| !r.allow_overwrite).count()
    }

    /// Records of every module that left `Pending`, sorted by name
    pub fn worked_on(&self) -> BTreeMap<String, ModuleRecord> {
        self.records
            .iter()
            .filter(|(_, record)| record.stage != Stage::Pending)
            .map(|(name, record)| (name.clone(), record.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_overrides_protection() {
        let mut registry = CompilationRegistry::new();
        registry.protect("ACME-MIB");
        assert!(!registry.allows_overwrite("ACME-MIB"));
        registry.request("ACME-MIB");
        assert!(registry.allows_overwrite("ACME-MIB"));
    }

    #[test]
    fn test_visit_keeps_existing_record() {
        let mut registry = CompilationRegistry::new();
        registry.request("ACME-MIB");
        assert!(!registry.visit("ACME-MIB"));
        assert!(registry.allows_overwrite("ACME-MIB"));
        assert!(registry.visit("ACME-TC"));
        assert!(!registry.allows_overwrite("ACME-TC"));
        assert_eq!(registry.get("ACME-TC").unwrap().stage, Stage::Pending);
    }

    #[test]
    fn test_worked_on_skips_untouched_modules() {
        let mut registry = CompilationRegistry::new();
        registry.protect("SNMPv2-SMI");
        registry.protect("SNMPv2-TC");
        registry.request("ACME-MIB");
        registry.set_stage("ACME-MIB", Stage::Compiled);
        assert_eq!(registry.protected_count(), 2);

        let touched = registry.worked_on();
        assert_eq!(touched.keys().collect::<Vec<_>>(), vec!["ACME-MIB"]);
        assert_eq!(touched["ACME-MIB"].stage, Stage::Compiled);
    }

    #[test]
    fn test_unknown_module_is_not_overwritable() {
        let registry = CompilationRegistry::new();
        assert!(!registry.allows_overwrite("ANY-MIB"));
    }
}
