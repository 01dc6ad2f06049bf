//! `prf localize`: profile the test suite and print suspicious program elements

use clap::Args;
use prf::ansi_colors::Colorize;
use prf::coverage::{FlReport, Granularity};
use prf::localization::FlStrategy;
use prf::pipeline::{write_profile_artifacts, RepairPipeline};
use prf::plugin::PluginRegistry;
use tracing::info;

use super::{builder, finish, ProjectArgs};

#[derive(Args, Debug, Clone)]
pub struct LocalizeArgs {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Number of ranked elements to print
    #[arg(long, default_value_t = 20)]
    pub top: usize,
}

pub fn cmd_localize(args: LocalizeArgs) -> anyhow::Result<()> {
    let registry = PluginRegistry::new();
    let mut config = finish(builder(&args.project)?, &registry)?;
    if config.profiling.fault_localization == Granularity::Off {
        info!("Fault localization is off in the configuration; using method granularity");
        config.profiling.fault_localization = Granularity::Method;
    }

    let pipeline = RepairPipeline::new(&config, &registry)?;
    let test_classes = pipeline.test_classes()?;
    let profile = pipeline.profile(&test_classes)?;
    let failing = pipeline.failing_tests(&profile);

    let written = write_profile_artifacts(&config.output_dir(), &profile)?;
    info!(files = written.len(), "Wrote profiling artifacts");

    println!(
        "{} {} test classes, {} failing tests",
        "•".dimmed(),
        test_classes.len(),
        failing.len()
    );
    for test in &failing {
        println!("  {} {}", "✗".red(), test);
    }
    println!();

    match &profile.fault_localization {
        Some(report) => print_ranking(report, config.profiling.strategy, args.top),
        None => println!("{}", "No fault localization data was reported.".yellow()),
    }
    Ok(())
}

/// Lines of the ranking table, most suspicious first
pub fn ranking_lines(report: &FlReport, top: usize) -> Vec<String> {
    report
        .ranked()
        .into_iter()
        .take(top)
        .enumerate()
        .map(|(i, (element, score))| format!("{:>4}. {:.4}  {}", i + 1, score, element))
        .collect()
}

fn print_ranking(report: &FlReport, strategy: FlStrategy, top: usize) {
    println!("{} ({:?})", "Most suspicious elements".bold(), strategy);
    let lines = ranking_lines(report, top);
    if lines.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for line in lines {
        println!("{}", line);
    }
}
