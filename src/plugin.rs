//! Plugin Architecture for Patch Generation and Prioritization
//!
//! Patch generators and prioritizers plug into the repair pipeline through
//! two traits sharing a common lifecycle. Plugins are looked up by name in
//! an explicit [`PluginRegistry`] of factories.
//!
//! # Architecture
//!
//! - **RepairPlugin**: lifecycle shared by every plugin (`init`, setters,
//!   parameters, `close`)
//! - **PatchGenerationPlugin**: produces candidate patches
//! - **PatchPrioritizationPlugin**: orders plausible patches
//! - **PluginRegistry**: name → factory lookup, case-insensitive
//!
//! # Example
//!
//! ```rust,no_run
//! use prf::plugin::{PluginRegistry, ProjectLayout, configure_plugin};
//! use std::collections::BTreeMap;
//!
//! let registry = PluginRegistry::default();
//! let mut generator = registry.create_generator("patches-pool").unwrap();
//! let layout = ProjectLayout::maven("/work/project");
//! configure_plugin(generator.as_mut(), &layout, None, None, &BTreeMap::new());
//! let patches = generator.generate()?;
//! println!("{} candidate patches", patches.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::coverage::{CoverageReport, FlReport};
use crate::patch::{Patch, PatchLocation};

/// Name of the built-in generator that loads precompiled patches.
pub const POOL_GENERATOR: &str = "patches-pool";
/// Name of the built-in prioritizer that keeps validation order.
pub const IDENTITY_PRIORITIZER: &str = "identity";
/// Name of the built-in prioritizer that ranks by suspiciousness.
pub const SUSPICIOUSNESS_PRIORITIZER: &str = "suspiciousness";

/// Metadata describing a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique plugin identifier (kebab-case recommended)
    pub name: String,

    /// Short human-readable description
    pub description: String,
}

/// Raised by a generator that cannot produce patches. Aborts the pipeline.
#[derive(Debug, Error)]
#[error("Patch generation failed: {0}")]
pub struct GenerationFailure(pub String);

/// Raised by a prioritizer that cannot order patches.
#[derive(Debug, Error)]
#[error("Patch prioritization failed: {0}")]
pub struct PrioritizationFailure(pub String);

/// Directories of the project under repair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayout {
    pub base_dir: PathBuf,
    pub source_dir: PathBuf,
    pub test_source_dir: PathBuf,
    pub build_dir: PathBuf,
    pub jre_home: Option<PathBuf>,
}

impl ProjectLayout {
    /// Conventional Maven layout under `base_dir`.
    pub fn maven(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            source_dir: base_dir.join("src").join("main").join("java"),
            test_source_dir: base_dir.join("src").join("test").join("java"),
            build_dir: base_dir.join("target").join("classes"),
            base_dir,
            jre_home: std::env::var_os("JAVA_HOME").map(PathBuf::from),
        }
    }
}

/// Lifecycle shared by generation and prioritization plugins.
///
/// `init` is called first, then the setters, then one
/// `visit_plugin_parameter` per configured parameter.
pub trait RepairPlugin: Send {
    fn metadata(&self) -> PluginMetadata;

    fn init(&mut self) {}

    fn set_fault_localization(&mut self, _fl: Option<&FlReport>) {}

    fn set_coverage(&mut self, _coverage: Option<&CoverageReport>) {}

    fn set_project_base_directory(&mut self, _dir: &Path) {}

    fn set_project_source_directory(&mut self, _dir: &Path) {}

    fn set_project_test_source_directory(&mut self, _dir: &Path) {}

    fn set_project_build_directory(&mut self, _dir: &Path) {}

    fn set_compatible_jre_home(&mut self, _dir: &Path) {}

    fn visit_plugin_parameter(&mut self, _key: &str, _value: &str) {}

    /// Release resources once the plugin's work is done.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Produces candidate patches.
pub trait PatchGenerationPlugin: RepairPlugin {
    fn generate(&mut self) -> Result<Vec<Patch>, GenerationFailure>;
}

/// Orders plausible patches, most promising first.
pub trait PatchPrioritizationPlugin: RepairPlugin {
    fn sort(&mut self, patches: Vec<Patch>) -> Result<Vec<Patch>, PrioritizationFailure>;
}

/// Drive the lifecycle of `plugin` up to the point where it can do work.
pub fn configure_plugin<P: RepairPlugin + ?Sized>(
    plugin: &mut P,
    layout: &ProjectLayout,
    fl: Option<&FlReport>,
    coverage: Option<&CoverageReport>,
    parameters: &BTreeMap<String, String>,
) {
    plugin.init();
    plugin.set_fault_localization(fl);
    plugin.set_coverage(coverage);
    plugin.set_project_base_directory(&layout.base_dir);
    plugin.set_project_source_directory(&layout.source_dir);
    plugin.set_project_test_source_directory(&layout.test_source_dir);
    plugin.set_project_build_directory(&layout.build_dir);
    if let Some(jre) = &layout.jre_home {
        plugin.set_compatible_jre_home(jre);
    }
    for (key, value) in parameters {
        plugin.visit_plugin_parameter(key, value);
    }
}

type GenerationFactory = Box<dyn Fn() -> Box<dyn PatchGenerationPlugin> + Send + Sync>;
type PrioritizationFactory = Box<dyn Fn() -> Box<dyn PatchPrioritizationPlugin> + Send + Sync>;

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("A plugin named '{0}' is already registered")]
    Duplicate(String),

    #[error("No patch generation plugin named '{0}'")]
    UnknownGenerator(String),

    #[error("No patch prioritization plugin named '{0}'")]
    UnknownPrioritizer(String),
}

/// Plugin registry for looking up plugin factories by name
///
/// Names are matched case-insensitively.
pub struct PluginRegistry {
    generators: BTreeMap<String, GenerationFactory>,
    prioritizers: BTreeMap<String, PrioritizationFactory>,
}

impl PluginRegistry {
    /// Create a registry with no plugins at all
    pub fn empty() -> Self {
        Self {
            generators: BTreeMap::new(),
            prioritizers: BTreeMap::new(),
        }
    }

    /// Create a registry holding the built-in plugins
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.generators.insert(
            POOL_GENERATOR.to_string(),
            Box::new(|| -> Box<dyn PatchGenerationPlugin> { Box::new(PoolGenerationPlugin::default()) }),
        );
        registry.prioritizers.insert(
            IDENTITY_PRIORITIZER.to_string(),
            Box::new(|| -> Box<dyn PatchPrioritizationPlugin> { Box::new(IdentityPrioritizationPlugin) }),
        );
        registry.prioritizers.insert(
            SUSPICIOUSNESS_PRIORITIZER.to_string(),
            Box::new(|| -> Box<dyn PatchPrioritizationPlugin> {
                Box::new(SuspiciousnessPrioritizationPlugin::default())
            }),
        );
        registry
    }

    /// Register a patch generation plugin factory
    pub fn register_generator<F>(&mut self, name: &str, factory: F) -> Result<(), PluginError>
    where
        F: Fn() -> Box<dyn PatchGenerationPlugin> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.generators.contains_key(&key) {
            return Err(PluginError::Duplicate(name.to_string()));
        }
        self.generators.insert(key, Box::new(factory));
        Ok(())
    }

    /// Register a patch prioritization plugin factory
    pub fn register_prioritizer<F>(&mut self, name: &str, factory: F) -> Result<(), PluginError>
    where
        F: Fn() -> Box<dyn PatchPrioritizationPlugin> + Send + Sync + 'static,
    {
        let key = name.to_lowercase();
        if self.prioritizers.contains_key(&key) {
            return Err(PluginError::Duplicate(name.to_string()));
        }
        self.prioritizers.insert(key, Box::new(factory));
        Ok(())
    }

    pub fn has_generator(&self, name: &str) -> bool {
        self.generators.contains_key(&name.to_lowercase())
    }

    pub fn has_prioritizer(&self, name: &str) -> bool {
        self.prioritizers.contains_key(&name.to_lowercase())
    }

    /// Instantiate the generator registered under `name`
    pub fn create_generator(&self, name: &str) -> Result<Box<dyn PatchGenerationPlugin>, PluginError> {
        match self.generators.get(&name.to_lowercase()) {
            Some(factory) => {
                let plugin = factory();
                info!(plugin = %plugin.metadata(), "Found patch generation plugin");
                Ok(plugin)
            }
            None => {
                warn!(name, "Patch generation plugin lookup failed");
                Err(PluginError::UnknownGenerator(name.to_string()))
            }
        }
    }

    /// Instantiate the prioritizer registered under `name`
    pub fn create_prioritizer(
        &self,
        name: &str,
    ) -> Result<Box<dyn PatchPrioritizationPlugin>, PluginError> {
        match self.prioritizers.get(&name.to_lowercase()) {
            Some(factory) => {
                let plugin = factory();
                info!(plugin = %plugin.metadata(), "Found patch prioritization plugin");
                Ok(plugin)
            }
            None => {
                warn!(name, "Patch prioritization plugin lookup failed");
                Err(PluginError::UnknownPrioritizer(name.to_string()))
            }
        }
    }

    /// Get all registered generator names
    pub fn generator_names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }

    /// Get all registered prioritizer names
    pub fn prioritizer_names(&self) -> Vec<String> {
        self.prioritizers.keys().cloned().collect()
    }

    /// Get number of registered plugins
    pub fn len(&self) -> usize {
        self.generators.len() + self.prioritizers.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty() && self.prioritizers.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PluginMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.description)
    }
}

// ============================================================================
// Built-in plugins
// ============================================================================

/// Loads precompiled patches from `<base>/patches-pool/<patch>/**/*.class`,
/// one patch per directory.
#[derive(Debug, Default)]
pub struct PoolGenerationPlugin {
    base_dir: Option<PathBuf>,
    pool_dir: Option<PathBuf>,
}

impl PoolGenerationPlugin {
    fn pool(&self) -> Option<PathBuf> {
        self.pool_dir
            .clone()
            .or_else(|| self.base_dir.as_ref().map(|b| b.join(POOL_GENERATOR)))
    }

    fn load_patch(patch_dir: &Path) -> Result<Option<Patch>, GenerationFailure> {
        let mut class_files: Vec<PathBuf> = WalkDir::new(patch_dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "class"))
            .collect();
        class_files.sort();

        let mut locations = Vec::with_capacity(class_files.len());
        for class_file in class_files {
            let location = PatchLocation::from_class_file(patch_dir, &class_file).map_err(|e| {
                GenerationFailure(format!("{}: {}", class_file.display(), e))
            })?;
            locations.push(location);
        }
        Ok((!locations.is_empty()).then(|| Patch::new(locations)))
    }
}

impl RepairPlugin for PoolGenerationPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: POOL_GENERATOR.to_string(),
            description: "Loads precompiled patches from a pool directory".to_string(),
        }
    }

    fn set_project_base_directory(&mut self, dir: &Path) {
        self.base_dir = Some(dir.to_path_buf());
    }

    fn visit_plugin_parameter(&mut self, key: &str, value: &str) {
        if key == "pool" {
            self.pool_dir = Some(PathBuf::from(value));
        } else {
            debug!(key, "Ignoring unknown parameter");
        }
    }
}

impl PatchGenerationPlugin for PoolGenerationPlugin {
    fn generate(&mut self) -> Result<Vec<Patch>, GenerationFailure> {
        let pool = self
            .pool()
            .ok_or_else(|| GenerationFailure("Project base directory was never set".to_string()))?;
        if !pool.is_dir() {
            return Err(GenerationFailure(format!(
                "Patches pool {} is non-existent",
                pool.display()
            )));
        }

        let mut patch_dirs: Vec<PathBuf> = std::fs::read_dir(&pool)
            .map_err(|e| GenerationFailure(format!("{}: {}", pool.display(), e)))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        patch_dirs.sort();

        let mut patches = Vec::new();
        for dir in &patch_dirs {
            match Self::load_patch(dir)? {
                Some(patch) => patches.push(patch),
                None => debug!(dir = %dir.display(), "Skipping patch directory without class files"),
            }
        }
        info!(patches = patches.len(), pool = %pool.display(), "Loaded patches");
        Ok(patches)
    }
}

/// Keeps patches in the order they arrive.
#[derive(Debug, Default)]
pub struct IdentityPrioritizationPlugin;

impl RepairPlugin for IdentityPrioritizationPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: IDENTITY_PRIORITIZER.to_string(),
            description: "Keeps validation order".to_string(),
        }
    }
}

impl PatchPrioritizationPlugin for IdentityPrioritizationPlugin {
    fn sort(&mut self, patches: Vec<Patch>) -> Result<Vec<Patch>, PrioritizationFailure> {
        Ok(patches)
    }
}

/// Ranks patches by the suspiciousness of the code they touch.
///
/// A location's own annotation wins; otherwise its class (class-level
/// localization) or its best-scored method (method-level) is looked up.
#[derive(Debug, Default)]
pub struct SuspiciousnessPrioritizationPlugin {
    scores: HashMap<String, f64>,
}

impl SuspiciousnessPrioritizationPlugin {
    fn location_score(&self, location: &PatchLocation) -> f64 {
        if let Some(score) = location.suspiciousness() {
            return score;
        }
        let class = location.class_name();
        if let Some(&score) = self.scores.get(class) {
            return score;
        }
        // Method entities are `pkg.Class.name(desc)`.
        let prefix = match location.method() {
            Some(method) => format!("{}.{}(", class, method),
            None => format!("{}.", class),
        };
        self.best_with_prefix(&prefix)
    }

    fn best_with_prefix(&self, prefix: &str) -> f64 {
        self.scores
            .iter()
            .filter(|(entity, _)| entity.starts_with(prefix))
            .map(|(_, &score)| score)
            .fold(0.0, f64::max)
    }

    fn patch_score(&self, patch: &Patch) -> f64 {
        patch
            .locations()
            .iter()
            .map(|l| self.location_score(l))
            .fold(0.0, f64::max)
    }
}

impl RepairPlugin for SuspiciousnessPrioritizationPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: SUSPICIOUSNESS_PRIORITIZER.to_string(),
            description: "Ranks patches by fault localization score".to_string(),
        }
    }

    fn set_fault_localization(&mut self, fl: Option<&FlReport>) {
        self.scores = fl
            .map(|report| report.ranked().into_iter().collect())
            .unwrap_or_default();
    }
}

impl PatchPrioritizationPlugin for SuspiciousnessPrioritizationPlugin {
    fn sort(&mut self, patches: Vec<Patch>) -> Result<Vec<Patch>, PrioritizationFailure> {
        let mut scored: Vec<(f64, Patch)> =
            patches.into_iter().map(|p| (self.patch_score(&p), p)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().map(|(_, p)| p).collect())
    }
}

#[cfg(test)]
#[path = "plugin_tests.rs"]
mod tests;
