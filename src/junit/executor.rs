//! Execution of a single test unit.
//!
//! [`CommandTestExecutor`] runs each test as an external command built from
//! an argv template, then replays the coverage trace the instrumented
//! program left behind into the caller's [`CoverageSink`].

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

use super::discovery::TestUnit;
use crate::coverage::CoverageSink;
use crate::filter::NameFilter;
use crate::process::group;

/// Environment variable naming the trace file of the current test.
pub const TRACE_FILE_ENV: &str = "PRF_TRACE_FILE";
/// Environment variable naming the directory of the profiling domains.
pub const DOMAIN_DIR_ENV: &str = "PRF_DOMAIN_DIR";
/// Environment variable carrying the application class globs to instrument,
/// separated by `,`.
pub const TARGET_CLASSES_ENV: &str = "PRF_TARGET_CLASSES";
/// Environment variable carrying the excluded application class globs.
pub const EXCLUDED_CLASSES_ENV: &str = "PRF_EXCLUDED_CLASSES";

/// Largest line number a trace may report. Class files store line numbers
/// as unsigned 16-bit values.
pub const MAX_LINE_NUMBER: u32 = u16::MAX as u32;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const FAILURE_TAIL_BYTES: u64 = 2048;

/// Result of a test that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
}

/// The test could not be executed at all.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to launch test {test}: {source}")]
    Spawn {
        test: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running {test}: {source}")]
    Io {
        test: String,
        #[source]
        source: io::Error,
    },

    #[error("Bad coverage trace from {test}: {source}")]
    Trace {
        test: String,
        #[source]
        source: TraceError,
    },

    #[error("Test {0} was cancelled")]
    Cancelled(String),
}

/// A coverage trace that cannot be replayed.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("line {line} at trace line {position} exceeds the maximum line number {max}", max = MAX_LINE_NUMBER)]
    LineOutOfRange { line: u32, position: usize },
}

/// Runs one test unit, reporting coverage callbacks to `sink`.
pub trait TestExecutor: Send + Sync {
    fn execute(&self, unit: &TestUnit, sink: &mut dyn CoverageSink)
        -> Result<TestOutcome, ExecutionError>;

    /// Abort the test currently executing, if any.
    fn cancel(&self) {}
}

/// Serializable description of how workers run tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    pub argv: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub domain_dir: Option<PathBuf>,
    pub app_classes: NameFilter,
}

impl TestCommand {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            ..Self::default()
        }
    }

    /// Build an executor running against `classpath`.
    pub fn executor(&self, classpath: OsString) -> CommandTestExecutor {
        let mut executor = CommandTestExecutor::new(self.argv.clone(), classpath)
            .with_env(TARGET_CLASSES_ENV, self.app_classes.include.join(","))
            .with_env(EXCLUDED_CLASSES_ENV, self.app_classes.exclude.join(","));
        if let Some(dir) = &self.domain_dir {
            executor = executor.with_domain_dir(dir.clone());
        }
        if let Some(dir) = &self.working_dir {
            executor = executor.with_working_dir(dir.clone());
        }
        executor
    }
}

/// Executes tests as child processes.
#[derive(Debug)]
pub struct CommandTestExecutor {
    template: Vec<String>,
    classpath: OsString,
    domain_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    cancelled: AtomicBool,
    /// Group leader of the running test command.
    running: Mutex<Option<u32>>,
}

impl CommandTestExecutor {
    /// `template` is an argv whose elements may contain `{classpath}`,
    /// `{class}`, `{method}` and `{test}`.
    pub fn new(template: Vec<String>, classpath: OsString) -> Self {
        Self {
            template,
            classpath,
            domain_dir: None,
            working_dir: None,
            env: Vec::new(),
            cancelled: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    pub fn with_domain_dir(mut self, dir: PathBuf) -> Self {
        self.domain_dir = Some(dir);
        self
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    fn argv(&self, unit: &TestUnit) -> Vec<String> {
        let classpath = self.classpath.to_string_lossy();
        let test = unit.name();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{classpath}", &classpath)
                    .replace("{class}", &unit.class_name)
                    .replace("{method}", &unit.method_name)
                    .replace("{test}", &test)
            })
            .collect()
    }

    fn io_error(unit: &TestUnit) -> impl FnOnce(io::Error) -> ExecutionError + '_ {
        move |source| ExecutionError::Io {
            test: unit.name(),
            source,
        }
    }

    fn set_running(&self, leader: Option<u32>) {
        if let Ok(mut running) = self.running.lock() {
            *running = leader;
        }
    }
}

impl TestExecutor for CommandTestExecutor {
    fn execute(
        &self,
        unit: &TestUnit,
        sink: &mut dyn CoverageSink,
    ) -> Result<TestOutcome, ExecutionError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let argv = self.argv(unit);
        let Some((program, args)) = argv.split_first() else {
            return Err(ExecutionError::Spawn {
                test: unit.name(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "empty test command"),
            });
        };

        let trace = tempfile::NamedTempFile::new().map_err(Self::io_error(unit))?;
        let mut output = tempfile::tempfile().map_err(Self::io_error(unit))?;
        let stderr = output.try_clone().map_err(Self::io_error(unit))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .env("CLASSPATH", &self.classpath)
            .env(TRACE_FILE_ENV, trace.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stderr.try_clone().map_err(Self::io_error(unit))?))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &self.domain_dir {
            command.env(DOMAIN_DIR_ENV, dir);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        group::isolate(&mut command);

        trace!(test = %unit, ?argv, "Launching test");
        let mut child = command.spawn().map_err(|source| ExecutionError::Spawn {
            test: unit.name(),
            source,
        })?;
        let leader = child.id();
        self.set_running(Some(leader));

        let waited = loop {
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(_)) if self.cancelled.load(Ordering::SeqCst) => {
                    break Err(ExecutionError::Cancelled(unit.name()));
                }
                Ok(Some(status)) => break Ok(status),
                Ok(None) if self.cancelled.load(Ordering::SeqCst) => {
                    group::kill_group(leader);
                    let _ = child.kill();
                    let _ = child.wait();
                    break Err(ExecutionError::Cancelled(unit.name()));
                }
                Ok(None) => {}
                Err(e) => {
                    group::kill_group(leader);
                    let _ = child.wait();
                    break Err(Self::io_error(unit)(e));
                }
            }
        };
        self.set_running(None);
        // Nothing the test forked outlives it.
        group::kill_group(leader);
        let status = waited?;

        let replayed = replay_trace(trace.path(), sink).map_err(|source| ExecutionError::Trace {
            test: unit.name(),
            source,
        })?;
        debug!(test = %unit, replayed, success = status.success(), "Test finished");

        if status.success() {
            Ok(TestOutcome::Passed)
        } else {
            let tail = read_tail(&mut output).unwrap_or_default();
            Ok(TestOutcome::Failed(format!("{}\n{}", status, tail.trim_end())))
        }
    }

    /// Kills the running test command and its group before returning.
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Ok(running) = self.running.lock() {
            if let Some(leader) = *running {
                group::kill_group(leader);
            }
        }
    }
}

fn read_tail(file: &mut File) -> io::Result<String> {
    let len = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(len.saturating_sub(FAILURE_TAIL_BYTES)))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Replay a trace file into `sink`. Returns the number of marks applied.
///
/// Lines: `C <class>`, `M <method>`, `L <file> <line>`, `E <method>`, `X`,
/// where class, method and file are domain indices. Malformed lines are
/// skipped; a line number above [`MAX_LINE_NUMBER`] rejects the trace.
pub fn replay_trace(path: &Path, sink: &mut dyn CoverageSink) -> Result<usize, TraceError> {
    if !path.exists() || fs::metadata(path)?.len() == 0 {
        return Ok(0);
    }
    let reader = BufReader::new(File::open(path)?);
    let mut applied = 0;
    let mut malformed = 0;
    for (position, line) in reader.lines().enumerate() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let index = |field: Option<&str>| field.and_then(|f| f.parse::<usize>().ok());
        let ok = match fields.next() {
            Some("C") => index(fields.next()).map(|i| sink.mark_class(i)).is_some(),
            Some("M") => index(fields.next()).map(|i| sink.mark_method(i)).is_some(),
            Some("L") => {
                let file = index(fields.next());
                let number = fields.next().and_then(|f| f.parse::<u32>().ok());
                match (file, number) {
                    (Some(_), Some(line)) if line > MAX_LINE_NUMBER => {
                        return Err(TraceError::LineOutOfRange {
                            line,
                            position: position + 1,
                        });
                    }
                    (Some(file), Some(number)) => {
                        sink.mark_line(file, number);
                        true
                    }
                    _ => false,
                }
            }
            Some("E") => index(fields.next()).map(|i| sink.enter_method(i)).is_some(),
            Some("X") => {
                sink.leave_method();
                true
            }
            None => continue,
            Some(_) => false,
        };
        if ok {
            applied += 1;
        } else {
            malformed += 1;
        }
    }
    if malformed > 0 {
        warn!(path = %path.display(), malformed, "Skipped malformed trace lines");
    }
    Ok(applied)
}
