//! Sequential test runner with optional per-test deadlines.

use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::discovery::TestUnit;
use super::executor::{ExecutionError, TestExecutor, TestOutcome};
use crate::coverage::{CoverageSink, NullSink};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestExecutionStatus {
    Ok,
    EarlyExit,
    TimedOut,
}

/// Which test units a run includes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestUnitFilter {
    #[default]
    All,
    Some(BTreeSet<String>),
}

impl TestUnitFilter {
    pub fn some<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Some(names.into_iter().map(Into::into).collect())
    }

    pub fn accepts(&self, unit: &TestUnit) -> bool {
        match self {
            Self::All => true,
            Self::Some(names) => names.contains(&unit.name()),
        }
    }
}

/// Receives per-test events and decides whether the run continues.
pub trait ResultCollector: Send {
    fn notify_start(&mut self, test: &str);
    fn notify_end(&mut self, test: &str, failure: Option<&str>);
    fn notify_skipped(&mut self, _test: &str) {}
    fn should_exit(&self) -> bool;
    /// Names of tests that failed so far.
    fn failing_tests(&self) -> &[String];
}

/// Records failing test names and never requests an exit.
#[derive(Debug, Default)]
pub struct DefaultResultCollector {
    failing: Vec<String>,
}

impl ResultCollector for DefaultResultCollector {
    fn notify_start(&mut self, test: &str) {
        debug!(test, "RUNNING");
    }

    fn notify_end(&mut self, test: &str, failure: Option<&str>) {
        if let Some(message) = failure {
            info!(test, %message, "Test failed");
            self.failing.push(test.to_string());
        }
    }

    fn notify_skipped(&mut self, test: &str) {
        debug!(test, "SKIPPED");
    }

    fn should_exit(&self) -> bool {
        false
    }

    fn failing_tests(&self) -> &[String] {
        &self.failing
    }
}

/// Requests an exit as soon as any test fails.
#[derive(Debug, Default)]
pub struct ExitingResultCollector<C> {
    inner: C,
    should_exit: bool,
}

impl<C: ResultCollector> ExitingResultCollector<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            should_exit: false,
        }
    }
}

impl<C: ResultCollector> ResultCollector for ExitingResultCollector<C> {
    fn notify_start(&mut self, test: &str) {
        self.inner.notify_start(test);
    }

    fn notify_end(&mut self, test: &str, failure: Option<&str>) {
        self.inner.notify_end(test, failure);
        if failure.is_some() {
            self.should_exit = true;
        }
    }

    fn notify_skipped(&mut self, test: &str) {
        self.inner.notify_skipped(test);
    }

    fn should_exit(&self) -> bool {
        self.should_exit || self.inner.should_exit()
    }

    fn failing_tests(&self) -> &[String] {
        self.inner.failing_tests()
    }
}

/// Per-test deadline: `constant + floor(historical * (1 + percent))` ms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutPolicy {
    pub constant_ms: u64,
    pub percent: f64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            constant_ms: 5000,
            percent: 0.5,
        }
    }
}

impl TimeoutPolicy {
    pub fn deadline(&self, historical_ms: u64) -> Duration {
        let exploded = (historical_ms as f64 * (1.0 + self.percent)).floor() as u64;
        Duration::from_millis(self.constant_ms.saturating_add(exploded))
    }
}

/// Receives per-test elapsed times as the runner measures them.
pub type TimingHook<'a> = &'a mut dyn FnMut(&str, u64);

type Job = (TestUnit, Sender<Result<TestOutcome, ExecutionError>>);

/// The dedicated thread that runs tests under a deadline.
struct DeadlineThread {
    jobs: Option<Sender<Job>>,
    handle: Option<JoinHandle<()>>,
}

impl DeadlineThread {
    fn spawn(executor: Arc<dyn TestExecutor>) -> std::io::Result<Self> {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("prf-test-executor".into())
            .spawn(move || {
                for (unit, reply) in rx {
                    let outcome = executor.execute(&unit, &mut NullSink);
                    let _ = reply.send(outcome);
                }
            })?;
        Ok(Self {
            jobs: Some(tx),
            handle: Some(handle),
        })
    }

    fn submit(&self, unit: TestUnit) -> Option<Receiver<Result<TestOutcome, ExecutionError>>> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.jobs.as_ref()?.send((unit, reply_tx)).ok()?;
        Some(reply_rx)
    }
}

impl Drop for DeadlineThread {
    fn drop(&mut self) {
        self.jobs.take();
        // A test stuck past its deadline keeps the thread busy; do not wait on it.
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

/// Runs discovered test units in order against a [`ResultCollector`].
pub struct TestRunner {
    units: Vec<TestUnit>,
    executor: Arc<dyn TestExecutor>,
    collector: Box<dyn ResultCollector>,
}

impl TestRunner {
    /// With `early_exit`, the run stops at the first failing test.
    pub fn new(units: Vec<TestUnit>, executor: Arc<dyn TestExecutor>, early_exit: bool) -> Self {
        let collector: Box<dyn ResultCollector> = if early_exit {
            Box::new(ExitingResultCollector::new(DefaultResultCollector::default()))
        } else {
            Box::new(DefaultResultCollector::default())
        };
        Self {
            units,
            executor,
            collector,
        }
    }

    pub fn units(&self) -> &[TestUnit] {
        &self.units
    }

    pub fn set_units(&mut self, units: Vec<TestUnit>) {
        self.units = units;
    }

    pub fn failing_tests(&self) -> &[String] {
        self.collector.failing_tests()
    }

    fn finish(&mut self, test: &str, outcome: &TestOutcome) {
        match outcome {
            TestOutcome::Passed => self.collector.notify_end(test, None),
            TestOutcome::Failed(message) => self.collector.notify_end(test, Some(message)),
        }
    }

    /// Run to completion or the first exit request, without deadlines.
    ///
    /// Each test is bracketed by `sink.start_test`/`sink.end_test`, and
    /// `on_timing` receives its elapsed milliseconds.
    pub fn run(
        &mut self,
        filter: &TestUnitFilter,
        sink: &mut dyn CoverageSink,
        on_timing: TimingHook<'_>,
    ) -> TestExecutionStatus {
        let units = self.units.clone();
        for unit in units.iter() {
            let name = unit.name();
            if !filter.accepts(unit) {
                self.collector.notify_skipped(&name);
                continue;
            }
            sink.start_test(&name);
            self.collector.notify_start(&name);
            let timer = crate::timing::start_timer();
            let outcome = self.executor.execute(unit, sink);
            on_timing(&name, crate::timing::elapsed_millis(&timer));
            sink.end_test();
            match outcome {
                Ok(outcome) => self.finish(&name, &outcome),
                Err(e) => {
                    warn!(test = %name, error = %e, "Running test cases is terminated");
                    return TestExecutionStatus::EarlyExit;
                }
            }
            if self.collector.should_exit() {
                warn!("Running test cases is terminated");
                return TestExecutionStatus::EarlyExit;
            }
        }
        TestExecutionStatus::Ok
    }

    /// Run with a deadline per test derived from `timing` and `policy`.
    ///
    /// A test past its deadline ends the run with `TimedOut`; a test that
    /// cannot be executed ends it with `EarlyExit`.
    pub fn run_with_timeout(
        &mut self,
        filter: &TestUnitFilter,
        timing: &HashMap<String, u64>,
        policy: TimeoutPolicy,
    ) -> TestExecutionStatus {
        let worker = match DeadlineThread::spawn(Arc::clone(&self.executor)) {
            Ok(worker) => worker,
            Err(e) => {
                warn!(error = %e, "Failed to start test executor thread");
                return TestExecutionStatus::EarlyExit;
            }
        };

        let units = self.units.clone();
        for unit in units.into_iter() {
            let name = unit.name();
            if !filter.accepts(&unit) {
                self.collector.notify_skipped(&name);
                continue;
            }
            let deadline = match timing.get(&name) {
                Some(&historical) => Some(policy.deadline(historical)),
                None => {
                    warn!(test = %name, "Missing time measurement; running without a deadline");
                    None
                }
            };

            self.collector.notify_start(&name);
            let Some(reply) = worker.submit(unit) else {
                warn!("Test executor thread is gone; running test cases is terminated");
                return TestExecutionStatus::EarlyExit;
            };
            let received = match deadline {
                Some(deadline) => reply.recv_timeout(deadline),
                None => reply.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(Ok(outcome)) => self.finish(&name, &outcome),
                Ok(Err(e)) => {
                    warn!(test = %name, error = %e, "Running test cases is terminated");
                    return TestExecutionStatus::EarlyExit;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(test = %name, ?deadline, "Running test cases is terminated due to TIME_OUT");
                    self.executor.cancel();
                    return TestExecutionStatus::TimedOut;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(test = %name, "Test executor thread died; running test cases is terminated");
                    return TestExecutionStatus::EarlyExit;
                }
            }
            if self.collector.should_exit() {
                warn!("Running test cases is terminated");
                return TestExecutionStatus::EarlyExit;
            }
        }
        TestExecutionStatus::Ok
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
