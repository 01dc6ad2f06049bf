//! Profiler worker process body.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::ProfilerArguments;
use crate::coverage::{CoverageRecorder, Granularity, ProfilingDomains};
use crate::junit::classpath::{join_classpath, DirectoryClassSource};
use crate::junit::{discover_test_units, TestRunner, TestUnitFilter};
use crate::process::{ControlId, ExitCode, Reporter};

/// Connect to the coordinator on `port`, profile, and report `DONE`.
pub fn serve(port: u16) -> Result<()> {
    let (reporter, mut input) =
        Reporter::connect(port).with_context(|| format!("connecting to coordinator on {}", port))?;
    let args: ProfilerArguments = input.read_object().context("reading profiler request")?;
    let classpath = worker_classpath();

    let code = match profile(&args, &classpath, &reporter) {
        Ok(()) => ExitCode::Ok,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Profiling failed");
            ExitCode::UnknownError
        }
    };
    reporter.done(code).context("sending DONE")?;
    Ok(())
}

/// Classpath the coordinator exported for this worker.
pub(crate) fn worker_classpath() -> Vec<PathBuf> {
    std::env::var_os("CLASSPATH")
        .map(|cp| std::env::split_paths(&cp).collect())
        .unwrap_or_default()
}

/// Run every discovered test once, recording coverage, and report results.
pub fn profile<W: Write>(
    args: &ProfilerArguments,
    classpath: &[PathBuf],
    reporter: &Reporter<W>,
) -> Result<()> {
    let source = DirectoryClassSource::new(classpath.to_vec());
    let units = discover_test_units(&args.test_classes, &source)?;
    info!(tests = units.len(), "Discovered test units");

    let options = args.options;
    let granularity = options.recording_granularity();
    let mut recorder = CoverageRecorder::new(granularity);
    if options.call_graph {
        recorder = recorder.with_call_graph();
    }

    let executor = args.command.executor(join_classpath(classpath)?);
    let mut runner = TestRunner::new(units, Arc::new(executor), false);
    let status = runner.run(&TestUnitFilter::All, &mut recorder, &mut |name, ms| {
        let sent = reporter.send(ControlId::REPORT_TEST_TIME, |out| {
            out.write_string(name)?;
            out.write_long(i64::try_from(ms).unwrap_or(i64::MAX))
        });
        if let Err(e) = sent {
            warn!(test = name, error = %e, "Failed to report test time");
        }
    });
    debug!(?status, recorded = recorder.recorded_tests(), "Profiling run finished");

    let failing: Vec<String> = runner.failing_tests().to_vec();
    reporter.send(ControlId::REPORT_FAILING_TEST_NAMES, |out| {
        out.write_strings(failing.as_slice())
    })?;

    if granularity == Granularity::Off && !options.call_graph {
        return Ok(());
    }
    let domains = match &args.command.domain_dir {
        Some(dir) => ProfilingDomains::load(dir)
            .with_context(|| format!("loading domains from {}", dir.display()))?,
        None => ProfilingDomains::new(),
    };
    let domain = recorder.domain(&domains);

    if options.fl != Granularity::Off {
        let failing_set: BTreeSet<String> = failing.iter().cloned().collect();
        if let Some(report) = recorder.fault_localization(domain, &failing_set, options.strategy) {
            let tag = match options.fl {
                Granularity::Class => ControlId::REPORT_CLASS_LEVEL_FL,
                Granularity::Method => ControlId::REPORT_METHOD_LEVEL_FL,
                _ => ControlId::REPORT_LINE_LEVEL_FL,
            };
            reporter.send(tag, |out| out.write_object(&report))?;
        }
    }

    if options.collect_coverage {
        if let Some(report) = recorder.coverage_info(domain) {
            let tag = match granularity {
                Granularity::Class => ControlId::REPORT_CLASS_LEVEL_COV,
                Granularity::Method => ControlId::REPORT_METHOD_LEVEL_COV,
                _ => ControlId::REPORT_LINE_LEVEL_COV,
            };
            reporter.send(tag, |out| out.write_object(&report))?;
        }
    }

    if let Some(graph) = recorder.call_graph(&domains.methods) {
        reporter.send(ControlId::REPORT_CALL_GRAPH, |out| out.write_object(&graph))?;
    }
    Ok(())
}
