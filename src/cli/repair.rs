//! `prf repair`: run the whole pipeline and print the fix report

use std::path::PathBuf;

use clap::Args;
use prf::ansi_colors::Colorize;
use prf::pipeline::{write_artifacts, RepairOutcome, RepairPipeline};
use prf::plugin::PluginRegistry;
use prf::report::ReportFormat;
use tracing::info;

use super::{builder, finish, OutputFormat, ProjectArgs};

#[derive(Args, Debug, Clone)]
pub struct RepairArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Validator threads; 0 uses every core
    #[arg(short = 'j', long)]
    pub parallelism: Option<i32>,

    /// Known failing test (repeatable); disables inference
    #[arg(long = "failing-test")]
    pub failing_tests: Vec<String>,

    /// Patch generation plugin
    #[arg(long)]
    pub generator: Option<String>,

    /// Patch prioritization plugin
    #[arg(long)]
    pub prioritizer: Option<String>,

    /// Per-test timeout constant in milliseconds
    #[arg(long)]
    pub timeout: Option<i64>,

    /// Extra timeout as a fraction of the profiled duration
    #[arg(long)]
    pub timeout_percent: Option<f64>,

    /// Report format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Report file (default: <output-dir>/report.<ext>)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Exit non-zero when no patch is plausible
    #[arg(long)]
    pub fail_on_no_plausible: bool,
}

pub fn cmd_repair(args: RepairArgs) -> anyhow::Result<()> {
    let registry = PluginRegistry::new();
    let mut builder = builder(&args.project)?;
    if let Some(parallelism) = args.parallelism {
        builder = builder.parallelism(parallelism);
    }
    if !args.failing_tests.is_empty() {
        builder = builder.failing_tests(args.failing_tests.clone());
    }
    if let Some(generator) = &args.generator {
        builder = builder.generator(generator);
    }
    if let Some(prioritizer) = &args.prioritizer {
        builder = builder.prioritizer(prioritizer);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.timeout_constant(timeout);
    }
    if let Some(percent) = args.timeout_percent {
        builder = builder.timeout_percent(percent);
    }
    if args.fail_on_no_plausible {
        builder = builder.fail_on_no_plausible(true);
    }
    let config = finish(builder, &registry)?;

    println!("{}", "Running repair pipeline...".cyan().bold());
    let pipeline = RepairPipeline::new(&config, &registry)?;
    let outcome = pipeline.run()?;

    let output_dir = config.output_dir();
    write_artifacts(&output_dir, &outcome)?;

    let format = ReportFormat::from(args.format);
    let report_path = args
        .output
        .clone()
        .unwrap_or_else(|| output_dir.join(format!("report.{}", format.extension())));
    outcome.report.save(&report_path, format)?;
    info!(path = %report_path.display(), "Wrote fix report");

    print_summary(&outcome);
    println!();
    print!("{}", outcome.report.to_text());
    println!();
    println!("{} Report saved to: {}", "✓".green(), report_path.display());

    outcome.enforce(config.validation.fail_on_no_plausible)?;
    Ok(())
}

fn print_summary(outcome: &RepairOutcome) {
    let summary = &outcome.report.summary;
    println!(
        "{} {} candidates validated in {} ms",
        "•".dimmed(),
        summary.candidates,
        summary.elapsed_ms
    );
    let plausible = format!("{} plausible", summary.plausible);
    if summary.plausible > 0 {
        println!("{} {}", "✓".green(), plausible.green().bold());
    } else {
        println!("{} {}", "✗".red(), plausible.red().bold());
    }
    let failed = summary.timed_out + summary.run_error + summary.memory_error;
    if failed > 0 {
        println!(
            "{} {} rejected ({} timed out, {} run errors, {} memory errors)",
            "•".dimmed(),
            failed.to_string().yellow(),
            summary.timed_out,
            summary.run_error,
            summary.memory_error
        );
    }
}
