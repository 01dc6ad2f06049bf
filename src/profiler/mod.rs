//! Profiling: run every test once in a worker, collecting timings, failing
//! tests, fault localization, coverage and the call graph.

pub mod worker;

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::net::TcpStream;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coverage::{CallGraph, CoverageReport, FlReport, Granularity};
use crate::junit::TestCommand;
use crate::localization::FlStrategy;
use crate::process::{
    ControlId, DataInput, DataOutput, ReceiveStrategy, WireError, WorkerLauncher, WorkerProcess,
};

pub use worker::serve;

/// Entry-point role name of the profiler worker.
pub const ROLE: &str = "profiler";

/// What the profiler should measure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilerOptions {
    pub collect_coverage: bool,
    pub fl: Granularity,
    pub strategy: FlStrategy,
    pub call_graph: bool,
}

impl ProfilerOptions {
    /// Granularity the recorder runs at. Coverage without fault localization
    /// is recorded per line.
    pub fn recording_granularity(&self) -> Granularity {
        match self.fl {
            Granularity::Off if self.collect_coverage => Granularity::Line,
            other => other,
        }
    }
}

/// The request sent to a profiler worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfilerArguments {
    pub test_classes: Vec<String>,
    pub command: TestCommand,
    pub options: ProfilerOptions,
}

/// Everything a profiler worker reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilerResults {
    pub timing: HashMap<String, u64>,
    pub failing_tests: Vec<String>,
    pub fault_localization: Option<FlReport>,
    pub coverage: Option<CoverageReport>,
    pub call_graph: Option<CallGraph>,
    /// Whether the worker reached `DONE` with a successful exit code.
    #[serde(default)]
    pub completed: bool,
}

impl ProfilerResults {
    pub fn failing_set(&self) -> BTreeSet<String> {
        self.failing_tests.iter().cloned().collect()
    }
}

/// Accumulates profiler messages.
#[derive(Debug, Default)]
pub struct ProfilerReceiver {
    results: ProfilerResults,
}

impl ProfilerReceiver {
    pub fn handle<R: Read>(&mut self, tag: u8, input: &mut DataInput<R>) -> Result<(), WireError> {
        match tag {
            ControlId::REPORT_TEST_TIME => {
                let name = input.read_string()?;
                let ms = input.read_long()?;
                self.results.timing.insert(name, ms.max(0) as u64);
            }
            ControlId::REPORT_FAILING_TEST_NAMES => {
                self.results.failing_tests = input.read_strings()?;
            }
            ControlId::REPORT_CLASS_LEVEL_FL
            | ControlId::REPORT_METHOD_LEVEL_FL
            | ControlId::REPORT_LINE_LEVEL_FL => {
                self.results.fault_localization = Some(input.read_object()?);
            }
            ControlId::REPORT_CLASS_LEVEL_COV
            | ControlId::REPORT_METHOD_LEVEL_COV
            | ControlId::REPORT_LINE_LEVEL_COV => {
                self.results.coverage = Some(input.read_object()?);
            }
            ControlId::REPORT_CALL_GRAPH => {
                self.results.call_graph = Some(input.read_object()?);
            }
            other => return Err(WireError::UnexpectedTag(other)),
        }
        Ok(())
    }

    pub fn into_results(self) -> ProfilerResults {
        self.results
    }
}

impl ReceiveStrategy for ProfilerReceiver {
    fn receive(&mut self, tag: u8, input: &mut DataInput<TcpStream>) -> Result<(), WireError> {
        self.handle(tag, input)
    }
}

/// Run one profiler worker to completion and collect what it reported.
///
/// Worker and transport failures are logged; whatever arrived before the
/// failure is returned with `completed` unset.
pub fn run_profiler(
    launcher: &dyn WorkerLauncher,
    args: &ProfilerArguments,
) -> Result<ProfilerResults, WireError> {
    let mut request = DataOutput::new(Vec::new());
    request.write_object(args)?;

    info!(classes = args.test_classes.len(), "Profiling test suite");
    let process = WorkerProcess::start(launcher, request.into_inner(), ProfilerReceiver::default());
    let outcome = process.wait_to_die();
    let mut results = outcome.receiver.into_results();
    match outcome.exit {
        Ok(code) if code.is_ok() => results.completed = true,
        Ok(code) => warn!(%code, "Profiler exited abnormally"),
        Err(e) => warn!(error = %e, "Profiler did not finish"),
    }
    info!(
        tests = results.timing.len(),
        failing = results.failing_tests.len(),
        "Profiling finished"
    );
    Ok(results)
}
