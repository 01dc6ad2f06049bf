//! Validator worker process body.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::{ValidationContext, ValidationOutcome, ValidatorArguments};
use crate::junit::classpath::{
    join_classpath, CachingByteSource, DirectoryClassSource, SelectiveClassSource,
    DEFAULT_CACHE_SIZE,
};
use crate::junit::{
    discover_test_units, CommandTestExecutor, TestExecutionStatus, TestExecutor, TestRunner,
};
use crate::patch::Patch;
use crate::process::memory::{
    self, MemoryWatchdog, ProcessTreeProbe, DEFAULT_INTERVAL, DEFAULT_THRESHOLD,
};
use crate::process::{ControlId, ExitCode, Reporter};
use crate::profiler::worker::worker_classpath;

/// Connect to the coordinator on `port`, validate the requested patch, and
/// report its outcome.
pub fn serve(port: u16) -> Result<()> {
    let (reporter, mut input) =
        Reporter::connect(port).with_context(|| format!("connecting to coordinator on {}", port))?;
    let reporter = Arc::new(reporter);
    let args: ValidatorArguments = input.read_object().context("reading validator request")?;
    let classpath = worker_classpath();

    let overlay = tempfile::Builder::new()
        .prefix("prf-overlay-")
        .tempdir()
        .context("creating class overlay directory")?;
    let validated = patched_executor(&args.context, &classpath, overlay.path()).and_then(|executor| {
        let executor = Arc::new(executor);
        let watchdog = arm_watchdog(&args.context, Arc::clone(&reporter), Arc::clone(&executor));
        let validated = validate(&args.context, &args.patch, &classpath, overlay.path(), executor);
        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }
        validated
    });
    let outcome = match validated {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(patch = %args.patch.id(), error = %format!("{:#}", e), "Validation failed");
            ValidationOutcome::RunError
        }
    };

    reporter
        .send(ControlId::REPORT, |out| out.write_object(&outcome))
        .context("reporting outcome")?;
    reporter.done(ExitCode::Ok).context("sending DONE")?;
    Ok(())
}

/// Report `MEMORY_ERROR` and exit once the process tree nears its budget.
fn arm_watchdog<W, E>(
    context: &ValidationContext,
    reporter: Arc<Reporter<W>>,
    executor: Arc<E>,
) -> Option<MemoryWatchdog>
where
    W: Write + Send + 'static,
    E: TestExecutor + 'static,
{
    let Some(limit) = context.memory_limit_bytes.or_else(memory::system_memory_bytes) else {
        warn!("No memory limit available; memory watchdog disabled");
        return None;
    };
    let started = MemoryWatchdog::start(
        ProcessTreeProbe::current(),
        limit,
        DEFAULT_THRESHOLD,
        DEFAULT_INTERVAL,
        move |used| {
            warn!(used, limit, "Memory limit nearly reached; aborting validation");
            abort_for_memory(&*executor, &reporter);
            std::process::exit(i32::from(ExitCode::OutOfMemory.code()));
        },
    );
    match started {
        Ok(watchdog) => Some(watchdog),
        Err(e) => {
            warn!(error = %e, "Failed to start memory watchdog");
            None
        }
    }
}

/// Kill the running test command with everything it forked, then report
/// `MEMORY_ERROR` and `DONE(OOM)`.
fn abort_for_memory<W: Write>(executor: &dyn TestExecutor, reporter: &Reporter<W>) {
    executor.cancel();
    let _ = reporter.send(ControlId::REPORT, |out| {
        out.write_object(&ValidationOutcome::MemoryError)
    });
    let _ = reporter.done(ExitCode::OutOfMemory);
}

/// Test executor whose classpath puts `overlay` before `classpath`.
pub fn patched_executor(
    context: &ValidationContext,
    classpath: &[PathBuf],
    overlay: &Path,
) -> Result<CommandTestExecutor> {
    let patched_classpath =
        join_classpath(std::iter::once(overlay.to_path_buf()).chain(classpath.iter().cloned()))?;
    Ok(context.command.executor(patched_classpath))
}

/// Run the covering tests of `patch` with its classes overlaid on the
/// classpath, failing tests first, and classify the run.
pub fn validate(
    context: &ValidationContext,
    patch: &Patch,
    classpath: &[PathBuf],
    overlay: &Path,
    executor: Arc<dyn TestExecutor>,
) -> Result<ValidationOutcome> {
    let fallback = CachingByteSource::new(
        DirectoryClassSource::new(classpath.to_vec()),
        DEFAULT_CACHE_SIZE,
    );
    let source = SelectiveClassSource::new(&patch.class_files(), fallback)
        .context("reading patched class files")?;
    source
        .materialize(overlay)
        .with_context(|| format!("writing patched classes to {}", overlay.display()))?;

    let mut units = discover_test_units(&context.test_classes, &source)?;
    context.comparator.sort(&mut units);
    debug!(patch = %patch.id(), tests = units.len(), "Validating patch");

    let mut runner = TestRunner::new(units, executor, true);
    let status = runner.run_with_timeout(
        patch.covering_tests_filter(),
        context.comparator.timing(),
        context.timeout,
    );

    let outcome = match status {
        TestExecutionStatus::Ok => ValidationOutcome::Plausible,
        TestExecutionStatus::EarlyExit => ValidationOutcome::RunError,
        TestExecutionStatus::TimedOut => ValidationOutcome::TimedOut,
    };
    info!(patch = %patch.id(), %outcome, "Validation finished");
    Ok(outcome)
}
