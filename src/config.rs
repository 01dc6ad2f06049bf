use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::coverage::Granularity;
use crate::filter::{sanitize_test_name, NameFilter};
use crate::junit::{TestCommand, TimeoutPolicy};
use crate::localization::FlStrategy;
use crate::plugin::{PluginRegistry, ProjectLayout, IDENTITY_PRIORITIZER, POOL_GENERATOR};
use crate::profiler::ProfilerOptions;

/// Default configuration file name
pub const CONFIG_FILE: &str = "prf.toml";

/// Timeout constants below this are accepted with a warning.
const SMALL_TIMEOUT_MS: i64 = 1000;

/// prf repair configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairConfig {
    /// Configuration file version
    pub version: String,

    /// Project layout
    #[serde(default)]
    pub project: ProjectConfig,

    /// Test selection and execution
    #[serde(default)]
    pub tests: TestsConfig,

    /// Profiling and fault localization
    #[serde(default)]
    pub profiling: ProfilingConfig,

    /// Patch validation settings
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Plugin selection
    #[serde(default)]
    pub plugins: PluginsConfig,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            project: ProjectConfig::default(),
            tests: TestsConfig::default(),
            profiling: ProfilingConfig::default(),
            validation: ValidationConfig::default(),
            plugins: PluginsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root; relative paths below are resolved against it
    pub base_dir: PathBuf,

    /// Package prefix used to derive default class and test globs
    pub group: Option<String>,

    /// Application sources
    pub source_dir: PathBuf,

    /// Test sources
    pub test_source_dir: PathBuf,

    /// Compiled application classes
    pub build_dir: PathBuf,

    /// Compiled test classes
    pub test_build_dir: PathBuf,

    /// Extra classpath entries (dependencies)
    pub classpath: Vec<PathBuf>,

    /// JRE handed to plugins
    pub jre_home: Option<PathBuf>,

    /// Where reports and profiling artifacts are written
    pub output_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            group: None,
            source_dir: PathBuf::from("src/main/java"),
            test_source_dir: PathBuf::from("src/test/java"),
            build_dir: PathBuf::from("target/classes"),
            test_build_dir: PathBuf::from("target/test-classes"),
            classpath: vec![],
            jre_home: None,
            output_dir: PathBuf::from("prf-output"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestsConfig {
    /// Per-test command template (`{classpath}`, `{class}`, `{method}`, `{test}`)
    pub command: Vec<String>,

    /// Working directory for test commands
    pub working_dir: Option<PathBuf>,

    /// Directory where the instrumentation keeps its domain files
    pub domain_dir: Option<PathBuf>,

    /// Application class globs (default: `<group>.*`)
    pub target_classes: Vec<String>,

    pub excluded_classes: Vec<String>,

    /// Test class globs (default: `<group>*Test`, `<group>*Tests`)
    pub target_tests: Vec<String>,

    pub excluded_tests: Vec<String>,

    /// Known failing tests; inferred by profiling when empty
    pub failing_tests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilingConfig {
    /// Fault localization granularity (`off`, `class`, `method`, `line`)
    pub fault_localization: Granularity,

    /// Suspiciousness formula
    pub strategy: FlStrategy,

    pub collect_coverage: bool,

    pub call_graph: bool,
}

impl Default for ProfilingConfig {
    fn default() -> Self {
        Self {
            fault_localization: Granularity::Off,
            strategy: FlStrategy::Ochiai,
            collect_coverage: false,
            call_graph: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Constant part of the per-test deadline (ms)
    pub timeout_constant_ms: i64,

    /// Fraction of the historical time added to the deadline
    pub timeout_percent: f64,

    /// Validator processes running at once; `<= 0` uses every core
    pub parallelism: i32,

    /// Memory budget per validator process tree
    pub memory_limit_mb: Option<u64>,

    /// Worker executable; the running `prf` binary when unset
    pub worker_program: Option<PathBuf>,

    /// Arguments placed before the worker entry point; requires `worker_program`
    pub child_args: Vec<String>,

    /// Fail the run when no patch is plausible
    pub fail_on_no_plausible: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            timeout_constant_ms: 5000,
            timeout_percent: 0.5,
            parallelism: 0,
            memory_limit_mb: None,
            worker_program: None,
            child_args: vec![],
            fail_on_no_plausible: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Patch generation plugin name
    pub generator: String,

    /// Patch prioritization plugin name
    pub prioritizer: String,

    /// Parameters handed to both plugins
    pub parameters: BTreeMap<String, String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            generator: POOL_GENERATOR.to_string(),
            prioritizer: IDENTITY_PRIORITIZER.to_string(),
            parameters: BTreeMap::new(),
        }
    }
}

/// Invalid configuration, detected before any test runs
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Timeout constant must be non-negative, got {0}")]
    NegativeTimeout(i64),

    #[error("Timeout percent must be non-negative, got {0}")]
    NegativeTimeoutPercent(f64),

    #[error("No test command configured")]
    EmptyTestCommand,

    #[error("No plugin with the name {0} found")]
    UnknownGenerator(String),

    #[error("No plugin with the name {0} found")]
    UnknownPrioritizer(String),

    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("child_args {0:?} need a worker_program; the built-in worker accepts no extra arguments")]
    ChildArgsWithoutWorkerProgram(Vec<String>),
}

impl RepairConfig {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `path` resolved against the project base directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project.base_dir.join(path)
        }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve(&self.project.output_dir)
    }

    pub fn layout(&self) -> ProjectLayout {
        ProjectLayout {
            base_dir: self.project.base_dir.clone(),
            source_dir: self.resolve(&self.project.source_dir),
            test_source_dir: self.resolve(&self.project.test_source_dir),
            build_dir: self.resolve(&self.project.build_dir),
            jre_home: self
                .project
                .jre_home
                .clone()
                .or_else(|| std::env::var_os("JAVA_HOME").map(PathBuf::from)),
        }
    }

    /// Classpath of the program under repair: classes, test classes, then
    /// dependencies.
    pub fn classpath(&self) -> Vec<PathBuf> {
        let mut entries = vec![
            self.resolve(&self.project.build_dir),
            self.resolve(&self.project.test_build_dir),
        ];
        entries.extend(self.project.classpath.iter().map(|p| self.resolve(p)));
        entries
    }

    pub fn app_filter(&self) -> NameFilter {
        NameFilter::new(
            self.tests.target_classes.clone(),
            self.tests.excluded_classes.clone(),
        )
    }

    pub fn test_filter(&self) -> NameFilter {
        NameFilter::new(
            self.tests.target_tests.clone(),
            self.tests.excluded_tests.clone(),
        )
    }

    pub fn test_command(&self) -> TestCommand {
        let mut command = TestCommand::new(self.tests.command.clone());
        command.working_dir = self.tests.working_dir.as_deref().map(|p| self.resolve(p));
        command.domain_dir = self.tests.domain_dir.as_deref().map(|p| self.resolve(p));
        command.app_classes = self.app_filter();
        command
    }

    pub fn profiler_options(&self) -> ProfilerOptions {
        ProfilerOptions {
            collect_coverage: self.profiling.collect_coverage,
            fl: self.profiling.fault_localization,
            strategy: self.profiling.strategy,
            call_graph: self.profiling.call_graph,
        }
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            constant_ms: u64::try_from(self.validation.timeout_constant_ms).unwrap_or(0),
            percent: self.validation.timeout_percent.max(0.0),
        }
    }

    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.validation
            .memory_limit_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

/// Builds a validated [`RepairConfig`]; CLI flags are applied on top of
/// the file values.
#[derive(Debug, Clone, Default)]
pub struct RepairConfigBuilder {
    config: RepairConfig,
}

impl RepairConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from file values
    pub fn from_config(config: RepairConfig) -> Self {
        Self { config }
    }

    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project.base_dir = dir.into();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project.output_dir = dir.into();
        self
    }

    pub fn test_command(mut self, argv: Vec<String>) -> Self {
        self.config.tests.command = argv;
        self
    }

    pub fn failing_tests(mut self, tests: Vec<String>) -> Self {
        self.config.tests.failing_tests = tests;
        self
    }

    pub fn parallelism(mut self, parallelism: i32) -> Self {
        self.config.validation.parallelism = parallelism;
        self
    }

    pub fn timeout_constant(mut self, constant_ms: i64) -> Self {
        self.config.validation.timeout_constant_ms = constant_ms;
        self
    }

    pub fn timeout_percent(mut self, percent: f64) -> Self {
        self.config.validation.timeout_percent = percent;
        self
    }

    pub fn fault_localization(mut self, granularity: Granularity, strategy: FlStrategy) -> Self {
        self.config.profiling.fault_localization = granularity;
        self.config.profiling.strategy = strategy;
        self
    }

    pub fn generator(mut self, name: impl Into<String>) -> Self {
        self.config.plugins.generator = name.into();
        self
    }

    pub fn prioritizer(mut self, name: impl Into<String>) -> Self {
        self.config.plugins.prioritizer = name.into();
        self
    }

    pub fn fail_on_no_plausible(mut self, fail: bool) -> Self {
        self.config.validation.fail_on_no_plausible = fail;
        self
    }

    /// Validate, fill derived defaults, and freeze.
    pub fn build(self, registry: &PluginRegistry) -> Result<RepairConfig, ConfigError> {
        let mut config = self.config;

        let timeout = config.validation.timeout_constant_ms;
        if timeout < 0 {
            return Err(ConfigError::NegativeTimeout(timeout));
        }
        if timeout < SMALL_TIMEOUT_MS {
            warn!(timeout_ms = timeout, "Timeout constant is very small; tests may time out spuriously");
        }
        let percent = config.validation.timeout_percent;
        if percent < 0.0 || percent.is_nan() {
            return Err(ConfigError::NegativeTimeoutPercent(percent));
        }
        if config.tests.command.iter().all(|arg| arg.trim().is_empty()) {
            return Err(ConfigError::EmptyTestCommand);
        }
        if config.validation.worker_program.is_none() && !config.validation.child_args.is_empty() {
            return Err(ConfigError::ChildArgsWithoutWorkerProgram(config.validation.child_args));
        }
        if !registry.has_generator(&config.plugins.generator) {
            return Err(ConfigError::UnknownGenerator(config.plugins.generator));
        }
        if !registry.has_prioritizer(&config.plugins.prioritizer) {
            return Err(ConfigError::UnknownPrioritizer(config.plugins.prioritizer));
        }

        let group = config.project.group.clone().unwrap_or_default();
        if config.tests.target_classes.is_empty() {
            config.tests.target_classes = vec![if group.is_empty() {
                "*".to_string()
            } else {
                format!("{}.*", group)
            }];
        }
        if config.tests.target_tests.is_empty() {
            config.tests.target_tests = vec![format!("{}*Test", group), format!("{}*Tests", group)];
        }
        config.app_filter().compile().map_err(|e| invalid_pattern(&config.app_filter(), e))?;
        config.test_filter().compile().map_err(|e| invalid_pattern(&config.test_filter(), e))?;

        config.tests.failing_tests = config
            .tests
            .failing_tests
            .iter()
            .map(|t| sanitize_test_name(t))
            .filter(|t| !t.is_empty())
            .collect();

        Ok(config)
    }
}

fn invalid_pattern(filter: &NameFilter, error: regex_lite::Error) -> ConfigError {
    let pattern = filter
        .include
        .iter()
        .chain(&filter.exclude)
        .find(|g| crate::filter::Glob::new(g).is_err())
        .cloned()
        .unwrap_or_default();
    ConfigError::InvalidPattern {
        pattern,
        message: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid() -> RepairConfigBuilder {
        RepairConfigBuilder::new().test_command(vec!["run".into(), "{test}".into()])
    }

    // ============================================================================
    // DEFAULT VALUE TESTS
    // ============================================================================

    #[test]
    fn test_repair_config_default() {
        let config = RepairConfig::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.validation.timeout_constant_ms, 5000);
        assert_eq!(config.validation.timeout_percent, 0.5);
        assert_eq!(config.validation.parallelism, 0);
        assert!(!config.validation.fail_on_no_plausible);
        assert_eq!(config.profiling.fault_localization, Granularity::Off);
        assert_eq!(config.profiling.strategy, FlStrategy::Ochiai);
        assert_eq!(config.plugins.generator, POOL_GENERATOR);
        assert_eq!(config.plugins.prioritizer, IDENTITY_PRIORITIZER);
        assert!(config.tests.command.is_empty());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RepairConfig = toml::from_str(
            r#"
version = "1.0"

[validation]
parallelism = 4
"#,
        )
        .unwrap();
        assert_eq!(config.validation.parallelism, 4);
        assert_eq!(config.validation.timeout_constant_ms, 5000);
        assert_eq!(config.project, ProjectConfig::default());
    }

    #[test]
    fn test_full_toml_deserialization() {
        let config: RepairConfig = toml::from_str(
            r#"
version = "1.0"

[project]
base_dir = "/work/demo"
group = "org.demo"

[tests]
command = ["java", "-cp", "{classpath}", "Runner", "{test}"]
failing_tests = ["org.demo.CalcTest::testAdd"]

[profiling]
fault_localization = "method"
strategy = "tarantula"
call_graph = true

[validation]
memory_limit_mb = 2048

[plugins]
prioritizer = "suspiciousness"

[plugins.parameters]
pool = "/tmp/pool"
"#,
        )
        .unwrap();
        assert_eq!(config.project.group.as_deref(), Some("org.demo"));
        assert_eq!(config.profiling.fault_localization, Granularity::Method);
        assert_eq!(config.profiling.strategy, FlStrategy::Tarantula);
        assert_eq!(config.memory_limit_bytes(), Some(2048 * 1024 * 1024));
        assert_eq!(config.plugins.parameters["pool"], "/tmp/pool");
    }

    // ============================================================================
    // FILE TESTS
    // ============================================================================

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE);

        let mut config = RepairConfig::default();
        config.tests.command = vec!["run".to_string()];
        config.validation.parallelism = 3;
        config.save(&config_path).unwrap();

        let loaded = RepairConfig::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_save_config_toml_format() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_FILE);
        RepairConfig::default().save(&config_path).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("[project]"));
        assert!(content.contains("[tests]"));
        assert!(content.contains("[profiling]"));
        assert!(content.contains("[validation]"));
        assert!(content.contains("[plugins]"));
    }

    #[test]
    fn test_load_nonexistent_file() {
        assert!(RepairConfig::load(Path::new("/nonexistent/prf.toml")).is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        std::fs::write(&config_path, "invalid toml content [[[").unwrap();
        assert!(RepairConfig::load(&config_path).is_err());
    }

    // ============================================================================
    // BUILDER TESTS
    // ============================================================================

    #[test]
    fn test_builder_fills_default_globs() {
        let config = valid().build(&PluginRegistry::default()).unwrap();
        assert_eq!(config.tests.target_classes, vec!["*"]);
        assert_eq!(config.tests.target_tests, vec!["*Test", "*Tests"]);

        let mut raw = RepairConfig::default();
        raw.project.group = Some("org.demo".into());
        raw.tests.command = vec!["run".into()];
        let config = RepairConfigBuilder::from_config(raw)
            .build(&PluginRegistry::default())
            .unwrap();
        assert_eq!(config.tests.target_classes, vec!["org.demo.*"]);
        assert_eq!(config.tests.target_tests, vec!["org.demo*Test", "org.demo*Tests"]);
    }

    #[test]
    fn test_builder_sanitizes_failing_tests() {
        let config = valid()
            .failing_tests(vec![
                "a.CalcTest::testAdd".into(),
                "a.CalcTest:testSub".into(),
                "  ".into(),
            ])
            .build(&PluginRegistry::default())
            .unwrap();
        assert_eq!(
            config.tests.failing_tests,
            vec!["a.CalcTest.testAdd", "a.CalcTest.testSub"]
        );
    }

    #[test]
    fn test_builder_rejects_negative_timeouts() {
        let registry = PluginRegistry::default();
        assert_eq!(
            valid().timeout_constant(-1).build(&registry).unwrap_err(),
            ConfigError::NegativeTimeout(-1)
        );
        assert_eq!(
            valid().timeout_percent(-0.1).build(&registry).unwrap_err(),
            ConfigError::NegativeTimeoutPercent(-0.1)
        );
        assert!(valid().timeout_constant(10).timeout_percent(0.0).build(&registry).is_ok());
    }

    #[test]
    fn test_builder_rejects_empty_command() {
        let err = RepairConfigBuilder::new()
            .build(&PluginRegistry::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::EmptyTestCommand);
    }

    #[test]
    fn test_builder_rejects_unknown_plugins() {
        let registry = PluginRegistry::default();
        let err = valid().generator("astor").build(&registry).unwrap_err();
        assert_eq!(err.to_string(), "No plugin with the name astor found");
        assert!(matches!(
            valid().prioritizer("magic").build(&registry),
            Err(ConfigError::UnknownPrioritizer(_))
        ));
        assert!(valid().prioritizer("Suspiciousness").build(&registry).is_ok());
    }

    #[test]
    fn test_builder_rejects_child_args_for_builtin_worker() {
        let mut raw = RepairConfig::default();
        raw.tests.command = vec!["run".into()];
        raw.validation.child_args = vec!["-Xmx2g".into()];
        let err = RepairConfigBuilder::from_config(raw.clone())
            .build(&PluginRegistry::default())
            .unwrap_err();
        assert_eq!(err, ConfigError::ChildArgsWithoutWorkerProgram(vec!["-Xmx2g".into()]));

        raw.validation.worker_program = Some(PathBuf::from("/opt/jdk/bin/java"));
        let config = RepairConfigBuilder::from_config(raw)
            .build(&PluginRegistry::default())
            .unwrap();
        assert_eq!(config.validation.child_args, vec!["-Xmx2g"]);
    }

    #[test]
    fn test_builder_rejects_bad_regex() {
        let mut raw = RepairConfig::default();
        raw.tests.command = vec!["run".into()];
        raw.tests.excluded_classes = vec!["~(unclosed".into()];
        let err = RepairConfigBuilder::from_config(raw)
            .build(&PluginRegistry::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref pattern, .. } if pattern == "~(unclosed"));
    }

    // ============================================================================
    // DERIVED VALUE TESTS
    // ============================================================================

    #[test]
    fn test_paths_resolve_against_base_dir() {
        let config = valid().base_dir("/work/demo").build(&PluginRegistry::default()).unwrap();
        assert_eq!(config.output_dir(), PathBuf::from("/work/demo/prf-output"));
        assert_eq!(
            config.classpath(),
            vec![
                PathBuf::from("/work/demo/target/classes"),
                PathBuf::from("/work/demo/target/test-classes"),
            ]
        );
        assert_eq!(config.layout().source_dir, PathBuf::from("/work/demo/src/main/java"));
        assert_eq!(config.resolve(Path::new("/abs")), PathBuf::from("/abs"));
    }

    #[test]
    fn test_test_command_carries_app_filter() {
        let config = valid().build(&PluginRegistry::default()).unwrap();
        let command = config.test_command();
        assert_eq!(command.argv, vec!["run", "{test}"]);
        assert_eq!(command.app_classes.include, vec!["*"]);
    }

    #[test]
    fn test_timeout_policy() {
        let config = valid()
            .timeout_constant(2000)
            .timeout_percent(1.0)
            .build(&PluginRegistry::default())
            .unwrap();
        let policy = config.timeout_policy();
        assert_eq!(policy.constant_ms, 2000);
        assert_eq!(policy.percent, 1.0);
    }
}
