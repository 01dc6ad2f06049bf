//! The repair pipeline: profile the test suite, generate candidate patches,
//! validate them in parallel, prioritize the plausible ones, and report.

use anyhow::{Context as AnyhowContext, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RepairConfig;
use crate::error::PrfError;
use crate::filter::CompiledFilter;
use crate::junit::TestComparator;
use crate::patch::{Patch, PatchId};
use crate::plugin::{configure_plugin, PluginRegistry, RepairPlugin};
use crate::process::{ProcessArgs, ProcessLauncher, WorkerLauncher};
use crate::profiler::{self, run_profiler, ProfilerArguments, ProfilerResults};
use crate::report::{FixReport, ValidationSummary};
use crate::validator::{self, ProcessBackend, ValidationContext, ValidationOutcome, WorkStealingValidator};

/// Stage names, in execution order
pub const STAGES: [&str; 6] = [
    "test-retrieval",
    "profiling",
    "patch-generation",
    "validation",
    "prioritization",
    "report",
];

/// Everything a repair run produced
#[derive(Debug)]
pub struct RepairOutcome {
    pub test_classes: Vec<String>,
    pub profile: ProfilerResults,
    pub failing_tests: BTreeSet<String>,
    pub outcomes: HashMap<Patch, ValidationOutcome>,
    /// Plausible patches, most promising first
    pub plausible: Vec<Patch>,
    pub report: FixReport,
}

impl RepairOutcome {
    /// Apply the zero-plausible policy.
    pub fn enforce(&self, fail_on_no_plausible: bool) -> Result<(), PrfError> {
        if fail_on_no_plausible && self.plausible.is_empty() {
            return Err(PrfError::NoPlausiblePatch(self.outcomes.len()));
        }
        Ok(())
    }
}

/// Drives one repair run over a validated configuration
pub struct RepairPipeline<'a> {
    config: &'a RepairConfig,
    registry: &'a PluginRegistry,
    profiler: Arc<dyn WorkerLauncher>,
    validator: Arc<dyn WorkerLauncher>,
}

impl<'a> RepairPipeline<'a> {
    /// Pipeline whose workers are child processes
    pub fn new(config: &'a RepairConfig, registry: &'a PluginRegistry) -> io::Result<Self> {
        let profiler = ProcessLauncher::new(worker_args(config, profiler::ROLE)?);
        let validator = ProcessLauncher::new(worker_args(config, validator::ROLE)?);
        Ok(Self::with_launchers(
            config,
            registry,
            Arc::new(profiler),
            Arc::new(validator),
        ))
    }

    pub fn with_launchers(
        config: &'a RepairConfig,
        registry: &'a PluginRegistry,
        profiler: Arc<dyn WorkerLauncher>,
        validator: Arc<dyn WorkerLauncher>,
    ) -> Self {
        Self {
            config,
            registry,
            profiler,
            validator,
        }
    }

    /// Run every stage. Fails before profiling when no test class exists
    /// and aborts on a generation failure.
    pub fn run(&self) -> Result<RepairOutcome> {
        info!("Starting repair pipeline with {} stages", STAGES.len());

        stage(0);
        let test_classes = self.test_classes()?;

        stage(1);
        let profile = self.profile(&test_classes)?;
        let failing_tests = self.failing_tests(&profile);

        stage(2);
        let patches = self.generate(&profile)?;

        stage(3);
        let comparator = TestComparator::new(profile.timing.clone(), failing_tests.clone());
        let (outcomes, summary) = self.validate(&test_classes, comparator, &patches)?;
        let plausible: Vec<Patch> = patches
            .iter()
            .filter(|p| outcomes.get(*p).is_some_and(|o| o.is_plausible()))
            .cloned()
            .collect();
        info!(
            plausible = plausible.len(),
            candidates = patches.len(),
            "Validation complete"
        );

        stage(4);
        let plausible = self.prioritize(&profile, plausible)?;

        stage(5);
        let report = FixReport::new(
            self.project_name(),
            summary,
            &plausible,
            &self.config.layout().source_dir,
        );

        Ok(RepairOutcome {
            test_classes,
            profile,
            failing_tests,
            outcomes,
            plausible,
            report,
        })
    }

    /// Sorted test class names from the test build directory
    pub fn test_classes(&self) -> Result<Vec<String>> {
        let dir = self.config.resolve(&self.config.project.test_build_dir);
        let filter = self
            .config
            .test_filter()
            .compile()
            .context("Compiling test globs")?;
        let classes = retrieve_test_classes(&dir, &filter);
        if classes.is_empty() {
            return Err(PrfError::NoTestClasses(dir).into());
        }
        info!(classes = classes.len(), "Retrieved test classes");
        Ok(classes)
    }

    /// Run the profiler worker over `test_classes`
    pub fn profile(&self, test_classes: &[String]) -> Result<ProfilerResults> {
        let args = ProfilerArguments {
            test_classes: test_classes.to_vec(),
            command: self.config.test_command(),
            options: self.config.profiler_options(),
        };
        let results = run_profiler(self.profiler.as_ref(), &args).map_err(PrfError::from)?;
        if !results.completed {
            warn!("Profiler did not complete; continuing with partial results");
        }
        Ok(results)
    }

    /// Configured failing tests, or the ones profiling observed
    pub fn failing_tests(&self, profile: &ProfilerResults) -> BTreeSet<String> {
        if self.config.tests.failing_tests.is_empty() {
            let inferred = profile.failing_set();
            info!(failing = inferred.len(), "Using inferred failing tests");
            return inferred;
        }
        info!("Inferred failing tests are ignored; using configured ones");
        for test in &self.config.tests.failing_tests {
            info!(test = %test, "Configured failing test");
        }
        self.config.tests.failing_tests.iter().cloned().collect()
    }

    /// Produce candidate patches with the configured generator
    pub fn generate(&self, profile: &ProfilerResults) -> Result<Vec<Patch>> {
        let mut generator = self
            .registry
            .create_generator(&self.config.plugins.generator)
            .map_err(PrfError::from)?;
        self.prepare(generator.as_mut(), profile);
        let generated = generator.generate().map_err(PrfError::from);
        close(generator.as_mut());
        let patches = generated?;
        info!(patches = patches.len(), "Generated candidate patches");
        Ok(patches)
    }

    /// Validate every patch on the work-stealing pool
    pub fn validate(
        &self,
        test_classes: &[String],
        comparator: TestComparator,
        patches: &[Patch],
    ) -> Result<(HashMap<Patch, ValidationOutcome>, ValidationSummary)> {
        let context = ValidationContext {
            test_classes: test_classes.to_vec(),
            command: self.config.test_command(),
            comparator,
            timeout: self.config.timeout_policy(),
            memory_limit_bytes: self.config.memory_limit_bytes(),
        };
        let backend = ProcessBackend::new(Arc::clone(&self.validator), context);
        let mut validator = WorkStealingValidator::new();
        let outcomes = validator
            .run(&backend, patches, self.config.validation.parallelism)
            .map_err(PrfError::from)?;
        let summary = ValidationSummary::from_outcomes(
            &outcomes,
            validator.time_elapsed(),
            validator.degree_of_parallelism(),
        );
        Ok((outcomes, summary))
    }

    /// Order plausible patches with the configured prioritizer
    pub fn prioritize(&self, profile: &ProfilerResults, plausible: Vec<Patch>) -> Result<Vec<Patch>> {
        let mut prioritizer = self
            .registry
            .create_prioritizer(&self.config.plugins.prioritizer)
            .map_err(PrfError::from)?;
        self.prepare(prioritizer.as_mut(), profile);
        let sorted = prioritizer.sort(plausible).map_err(PrfError::from);
        close(prioritizer.as_mut());
        Ok(sorted?)
    }

    fn prepare<P: RepairPlugin + ?Sized>(&self, plugin: &mut P, profile: &ProfilerResults) {
        configure_plugin(
            plugin,
            &self.config.layout(),
            profile.fault_localization.as_ref(),
            profile.coverage.as_ref(),
            &self.config.plugins.parameters,
        );
    }

    fn project_name(&self) -> String {
        let base = &self.config.project.base_dir;
        base.canonicalize()
            .unwrap_or_else(|_| base.clone())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

fn stage(index: usize) {
    info!("Running stage {}/{}: {}", index + 1, STAGES.len(), STAGES[index]);
}

fn close<P: RepairPlugin + ?Sized>(plugin: &mut P) {
    if let Err(e) = plugin.close() {
        warn!(plugin = %plugin.metadata().name, error = %e, "Failed to close plugin");
    }
}

/// Launch arguments for a worker of `role`
pub fn worker_args(config: &RepairConfig, role: &str) -> io::Result<ProcessArgs> {
    let args = match &config.validation.worker_program {
        Some(program) => ProcessArgs::new(config.resolve(program))
            .with_entry_point(vec!["worker".to_string(), role.to_string()]),
        None => ProcessArgs::current_exe(role)?,
    };
    Ok(args
        .with_child_args(config.validation.child_args.clone())
        .with_classpath(config.classpath()))
}

/// Class names of the compiled classes under `dir` accepted by `filter`,
/// sorted. Names come from the relative path of each class file.
pub fn retrieve_test_classes(dir: &Path, filter: &CompiledFilter) -> Vec<String> {
    let mut classes: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| class_name(dir, entry.path()))
        .filter(|name| filter.accepts(name))
        .collect();
    classes.sort();
    classes.dedup();
    debug!(dir = %dir.display(), classes = classes.len(), "Scanned test build directory");
    classes
}

fn class_name(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let stem = relative.to_str()?.strip_suffix(".class")?;
    Some(stem.replace(['/', '\\'], "."))
}

#[derive(Serialize)]
struct ValidationRecord {
    patch: PatchId,
    outcome: ValidationOutcome,
    locations: Vec<String>,
    class_files: Vec<PathBuf>,
}

/// Write profiling and validation results as JSON into `dir`
pub fn write_artifacts(dir: &Path, outcome: &RepairOutcome) -> Result<Vec<PathBuf>> {
    let mut written = write_profile_artifacts(dir, &outcome.profile)?;

    let mut records: Vec<ValidationRecord> = outcome
        .outcomes
        .iter()
        .map(|(patch, verdict)| ValidationRecord {
            patch: patch.id(),
            outcome: *verdict,
            locations: patch.locations().iter().map(ToString::to_string).collect(),
            class_files: patch.class_files(),
        })
        .collect();
    records.sort_by_key(|r| r.patch);
    written.push(write_json(dir, "validation.json", &records)?);
    Ok(written)
}

/// Write whatever the profiler reported as JSON into `dir`
pub fn write_profile_artifacts(dir: &Path, profile: &ProfilerResults) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let timing: std::collections::BTreeMap<&String, &u64> = profile.timing.iter().collect();
    let mut written = vec![
        write_json(dir, "timing.json", &timing)?,
        write_json(dir, "failing-tests.json", &profile.failing_tests)?,
    ];
    if let Some(fl) = &profile.fault_localization {
        written.push(write_json(dir, "fault-localization.json", fl)?);
    }
    if let Some(coverage) = &profile.coverage {
        written.push(write_json(dir, "coverage.json", coverage)?);
    }
    if let Some(graph) = &profile.call_graph {
        written.push(write_json(dir, "call-graph.json", graph)?);
    }
    Ok(written)
}

fn write_json<T: Serialize + ?Sized>(dir: &Path, name: &str, value: &T) -> Result<PathBuf> {
    let path = dir.join(name);
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Wrote artifact");
    Ok(path)
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
