//! CLI command logic
//!
//! Argument types and config resolution live here so they can be unit tested;
//! each subcommand has its own module.

pub mod init;
pub mod localize;
pub mod repair;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use prf::config::{RepairConfig, RepairConfigBuilder};
use prf::coverage::Granularity;
use prf::localization::FlStrategy;
use prf::plugin::PluginRegistry;
use prf::report;

/// Report output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Plain text with unified diffs
    Text,
    /// Markdown document
    Markdown,
    /// JSON for tooling
    Json,
}

impl From<OutputFormat> for report::ReportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => report::ReportFormat::Text,
            OutputFormat::Markdown => report::ReportFormat::Markdown,
            OutputFormat::Json => report::ReportFormat::Json,
        }
    }
}

/// Fault localization granularity
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FlGranularity {
    Off,
    Class,
    Method,
    Line,
}

impl From<FlGranularity> for Granularity {
    fn from(granularity: FlGranularity) -> Self {
        match granularity {
            FlGranularity::Off => Granularity::Off,
            FlGranularity::Class => Granularity::Class,
            FlGranularity::Method => Granularity::Method,
            FlGranularity::Line => Granularity::Line,
        }
    }
}

/// Suspiciousness formula
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum FlFormula {
    Ochiai,
    Tarantula,
}

impl From<FlFormula> for FlStrategy {
    fn from(formula: FlFormula) -> Self {
        match formula {
            FlFormula::Ochiai => FlStrategy::Ochiai,
            FlFormula::Tarantula => FlStrategy::Tarantula,
        }
    }
}

/// Options shared by every command that runs the test suite
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectArgs {
    /// Configuration file
    #[arg(short, long, default_value = prf::config::CONFIG_FILE)]
    pub config: PathBuf,

    /// Project base directory (overrides the config file)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Directory for artifacts (overrides the config file)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Fault localization granularity
    #[arg(long, value_enum)]
    pub fl: Option<FlGranularity>,

    /// Suspiciousness formula
    #[arg(long, value_enum)]
    pub formula: Option<FlFormula>,

    /// Test command; `{test}` is replaced by the test name
    #[arg(last = true)]
    pub command: Vec<String>,
}

// ============================================================================
// Config Resolution
// ============================================================================

/// Read `path` if it exists; relative base directories in the file are
/// resolved against the file's own directory.
pub fn load_config(path: &Path) -> anyhow::Result<RepairConfig> {
    if !path.exists() {
        tracing::info!(path = %path.display(), "No configuration file; using defaults");
        return Ok(RepairConfig::default());
    }
    let mut config = RepairConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if config.project.base_dir.is_relative() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.project.base_dir = parent.join(&config.project.base_dir);
        }
    }
    Ok(config)
}

/// Start a builder from the config file with the shared overrides applied
pub fn builder(args: &ProjectArgs) -> anyhow::Result<RepairConfigBuilder> {
    let config = load_config(&args.config)?;
    let fl = config.profiling.fault_localization;
    let strategy = config.profiling.strategy;

    let mut builder = RepairConfigBuilder::from_config(config);
    if let Some(dir) = &args.base_dir {
        builder = builder.base_dir(dir);
    }
    if let Some(dir) = &args.output_dir {
        builder = builder.output_dir(dir);
    }
    if !args.command.is_empty() {
        builder = builder.test_command(args.command.clone());
    }
    if args.fl.is_some() || args.formula.is_some() {
        builder = builder.fault_localization(
            args.fl.map(Granularity::from).unwrap_or(fl),
            args.formula.map(FlStrategy::from).unwrap_or(strategy),
        );
    }
    Ok(builder)
}

/// Validate a builder against the registry
pub fn finish(builder: RepairConfigBuilder, registry: &PluginRegistry) -> anyhow::Result<RepairConfig> {
    let config = builder.build(registry)?;
    Ok(config)
}
