use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;

/// Executor driven by a per-test script.
#[derive(Default)]
struct Scripted {
    sleep_ms: HashMap<String, u64>,
    failing: BTreeSet<String>,
    broken: BTreeSet<String>,
    executed: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl Scripted {
    fn sleeping(mut self, test: &str, ms: u64) -> Self {
        self.sleep_ms.insert(test.to_string(), ms);
        self
    }

    fn failing(mut self, test: &str) -> Self {
        self.failing.insert(test.to_string());
        self
    }

    fn broken(mut self, test: &str) -> Self {
        self.broken.insert(test.to_string());
        self
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

impl TestExecutor for Scripted {
    fn execute(
        &self,
        unit: &TestUnit,
        sink: &mut dyn CoverageSink,
    ) -> Result<TestOutcome, ExecutionError> {
        let name = unit.name();
        self.executed.lock().unwrap().push(name.clone());
        sink.mark_class(0);
        if let Some(&ms) = self.sleep_ms.get(&name) {
            thread::sleep(Duration::from_millis(ms));
        }
        if self.broken.contains(&name) {
            return Err(ExecutionError::Cancelled(name));
        }
        if self.failing.contains(&name) {
            return Ok(TestOutcome::Failed("assertion failed".into()));
        }
        Ok(TestOutcome::Passed)
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Events(Vec<String>);

impl CoverageSink for Events {
    fn start_test(&mut self, test: &str) {
        self.0.push(format!("start {}", test));
    }
    fn end_test(&mut self) {
        self.0.push("end".into());
    }
    fn mark_class(&mut self, i: usize) {
        self.0.push(format!("C{}", i));
    }
    fn mark_method(&mut self, _: usize) {}
    fn mark_line(&mut self, _: usize, _: u32) {}
}

/// Collects the messages of WARN events.
#[derive(Clone, Default)]
struct Warnings(Arc<Mutex<Vec<String>>>);

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{:?}", value);
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Warnings {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            let mut message = String::new();
            event.record(&mut MessageVisitor(&mut message));
            self.0.lock().unwrap().push(message);
        }
    }
}

fn with_warnings<T>(f: impl FnOnce() -> T) -> (T, Vec<String>) {
    let warnings = Warnings::default();
    let subscriber = tracing_subscriber::registry().with(warnings.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    let captured = warnings.0.lock().unwrap().clone();
    (result, captured)
}

fn units(names: &[&str]) -> Vec<TestUnit> {
    names.iter().map(|n| TestUnit::new("t.C", *n)).collect()
}

fn runner(executor: &Arc<Scripted>, names: &[&str], early_exit: bool) -> TestRunner {
    let executor: Arc<dyn TestExecutor> = executor.clone();
    TestRunner::new(units(names), executor, early_exit)
}

// ========================================================================
// Unbounded runs
// ========================================================================

#[test]
fn test_run_brackets_each_test_and_reports_timing() {
    let executor = Arc::new(Scripted::default());
    let mut runner = runner(&executor, &["a", "b"], false);
    let mut events = Events::default();
    let mut timed = Vec::new();

    let status = runner.run(&TestUnitFilter::All, &mut events, &mut |t, _| {
        timed.push(t.to_string())
    });

    assert_eq!(status, TestExecutionStatus::Ok);
    assert_eq!(
        events.0,
        vec!["start t.C.a", "C0", "end", "start t.C.b", "C0", "end"]
    );
    assert_eq!(timed, vec!["t.C.a", "t.C.b"]);
}

#[test]
fn test_run_collects_failures_without_early_exit() {
    let executor = Arc::new(Scripted::default().failing("t.C.a"));
    let mut runner = runner(&executor, &["a", "b"], false);
    let status = runner.run(&TestUnitFilter::All, &mut NullSink, &mut |_, _| {});
    assert_eq!(status, TestExecutionStatus::Ok);
    assert_eq!(runner.failing_tests(), ["t.C.a".to_string()]);
    assert_eq!(executor.executed().len(), 2);
}

#[test]
fn test_early_exit_stops_at_first_failure() {
    let executor = Arc::new(Scripted::default().failing("t.C.b"));
    let mut runner = runner(&executor, &["a", "b", "c"], true);
    let status = runner.run(&TestUnitFilter::All, &mut NullSink, &mut |_, _| {});
    assert_eq!(status, TestExecutionStatus::EarlyExit);
    assert_eq!(executor.executed(), vec!["t.C.a", "t.C.b"]);
}

#[test]
fn test_filter_restricts_units() {
    let executor = Arc::new(Scripted::default());
    let mut runner = runner(&executor, &["a", "b", "c"], false);
    let filter = TestUnitFilter::some(["t.C.c", "t.C.a"]);
    runner.run(&filter, &mut NullSink, &mut |_, _| {});
    assert_eq!(executor.executed(), vec!["t.C.a", "t.C.c"]);
}

#[test]
fn test_execution_fault_is_early_exit() {
    let executor = Arc::new(Scripted::default().broken("t.C.a"));
    let mut runner = runner(&executor, &["a", "b"], false);
    let status = runner.run(&TestUnitFilter::All, &mut NullSink, &mut |_, _| {});
    assert_eq!(status, TestExecutionStatus::EarlyExit);
    assert_eq!(executor.executed(), vec!["t.C.a"]);
}

// ========================================================================
// Deadline-bounded runs
// ========================================================================

#[test]
fn test_deadline_formula() {
    let policy = TimeoutPolicy {
        constant_ms: 1000,
        percent: 0.5,
    };
    let deadline = policy.deadline(100);
    assert_eq!(deadline, Duration::from_millis(1150));
    assert!(Duration::from_millis(1150) <= deadline);
    assert!(Duration::from_millis(1151) > deadline);
    // floor, not round
    assert_eq!(policy.deadline(3), Duration::from_millis(1004));
}

#[test]
fn test_deadline_boundary_in_a_real_run() {
    // constant 1000 + 0.5 * historical 100 gives a 1150ms deadline.
    let policy = TimeoutPolicy {
        constant_ms: 1000,
        percent: 0.5,
    };
    let timing = HashMap::from([
        ("t.C.quick".to_string(), 100),
        ("t.C.late".to_string(), 100),
    ]);

    let executor = Arc::new(Scripted::default().sleeping("t.C.quick", 400));
    let mut within = runner(&executor, &["quick"], true);
    assert_eq!(
        within.run_with_timeout(&TestUnitFilter::All, &timing, policy),
        TestExecutionStatus::Ok
    );
    assert_eq!(executor.cancels.load(Ordering::SeqCst), 0);

    let executor = Arc::new(Scripted::default().sleeping("t.C.late", 1600));
    let mut past = runner(&executor, &["late"], true);
    assert_eq!(
        past.run_with_timeout(&TestUnitFilter::All, &timing, policy),
        TestExecutionStatus::TimedOut
    );
    assert_eq!(executor.cancels.load(Ordering::SeqCst), 1);
}

#[test]
fn test_slow_test_times_out_and_cancels() {
    let executor = Arc::new(Scripted::default().sleeping("t.C.slow", 2000));
    let mut runner = runner(&executor, &["fast", "slow", "after"], true);
    let timing = HashMap::from([
        ("t.C.fast".to_string(), 0),
        ("t.C.slow".to_string(), 0),
        ("t.C.after".to_string(), 0),
    ]);
    let policy = TimeoutPolicy {
        constant_ms: 200,
        percent: 0.0,
    };

    let status = runner.run_with_timeout(&TestUnitFilter::All, &timing, policy);
    assert_eq!(status, TestExecutionStatus::TimedOut);
    assert_eq!(executor.cancels.load(Ordering::SeqCst), 1);
    assert!(!executor.executed().contains(&"t.C.after".to_string()));
}

#[test]
fn test_missing_timing_disables_deadline() {
    let executor = Arc::new(Scripted::default().sleeping("t.C.a", 150));
    let mut runner = runner(&executor, &["a"], true);
    let policy = TimeoutPolicy {
        constant_ms: 1,
        percent: 0.0,
    };
    let status = runner.run_with_timeout(&TestUnitFilter::All, &HashMap::new(), policy);
    assert_eq!(status, TestExecutionStatus::Ok);
}

#[test]
fn test_missing_timing_entry_runs_unbounded_with_warning() {
    // Only t.C.timed has a measurement; t.C.unmeasured outlives the
    // deadline the policy would give it.
    let executor = Arc::new(Scripted::default().sleeping("t.C.unmeasured", 300));
    let mut runner = runner(&executor, &["timed", "unmeasured"], true);
    let timing = HashMap::from([("t.C.timed".to_string(), 10)]);
    let policy = TimeoutPolicy {
        constant_ms: 100,
        percent: 0.0,
    };

    let (status, warnings) =
        with_warnings(|| runner.run_with_timeout(&TestUnitFilter::All, &timing, policy));

    assert_eq!(status, TestExecutionStatus::Ok);
    assert_eq!(executor.executed(), vec!["t.C.timed", "t.C.unmeasured"]);
    assert_eq!(executor.cancels.load(Ordering::SeqCst), 0);
    assert_eq!(
        warnings,
        vec!["Missing time measurement; running without a deadline"]
    );
}

#[test]
fn test_bounded_run_failure_is_early_exit() {
    let executor = Arc::new(Scripted::default().failing("t.C.a"));
    let mut runner = runner(&executor, &["a", "b"], true);
    let timing = HashMap::from([("t.C.a".to_string(), 10), ("t.C.b".to_string(), 10)]);
    let status = runner.run_with_timeout(&TestUnitFilter::All, &timing, TimeoutPolicy::default());
    assert_eq!(status, TestExecutionStatus::EarlyExit);
    assert_eq!(runner.failing_tests(), ["t.C.a".to_string()]);
}

#[test]
fn test_bounded_run_all_pass() {
    let executor = Arc::new(Scripted::default());
    let mut runner = runner(&executor, &["a", "b"], true);
    let timing = HashMap::from([("t.C.a".to_string(), 10), ("t.C.b".to_string(), 10)]);
    let status = runner.run_with_timeout(&TestUnitFilter::All, &timing, TimeoutPolicy::default());
    assert_eq!(status, TestExecutionStatus::Ok);
    assert_eq!(executor.executed().len(), 2);
}
