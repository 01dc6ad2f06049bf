//! Patch validation: rerun the test suite against a patched classpath in an
//! isolated worker, one worker per patch.

pub mod work_stealing;
pub mod worker;

use std::fmt;
use std::io::Read;
use std::net::TcpStream;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::junit::{TestCommand, TestComparator, TimeoutPolicy};
use crate::patch::Patch;
use crate::process::{
    ControlId, DataInput, DataOutput, ReceiveStrategy, WireError, WorkerLauncher, WorkerProcess,
};

pub use work_stealing::{
    effective_parallelism, ProcessBackend, ValidationBackend, WorkStealingValidator,
};
pub use worker::serve;

/// Entry-point role name of the validator worker.
pub const ROLE: &str = "validator";

/// Verdict for one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationOutcome {
    /// Every selected test passed.
    Plausible,
    TimedOut,
    /// A test failed or could not run, or the worker gave no verdict.
    RunError,
    MemoryError,
}

impl ValidationOutcome {
    pub fn is_plausible(self) -> bool {
        self == Self::Plausible
    }
}

impl fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plausible => write!(f, "PLAUSIBLE"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
            Self::RunError => write!(f, "RUN_ERROR"),
            Self::MemoryError => write!(f, "MEMORY_ERROR"),
        }
    }
}

/// Everything a validator worker needs besides the patch itself. Shared by
/// every patch of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationContext {
    pub test_classes: Vec<String>,
    pub command: TestCommand,
    pub comparator: TestComparator,
    pub timeout: TimeoutPolicy,
    /// Memory budget for the worker's process tree; physical memory when unset.
    pub memory_limit_bytes: Option<u64>,
}

/// The request a validator worker receives.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorArguments {
    pub context: ValidationContext,
    pub patch: Patch,
}

#[derive(Serialize)]
struct ValidatorRequest<'a> {
    context: &'a ValidationContext,
    patch: &'a Patch,
}

/// Holds the single verdict a validator worker reports.
#[derive(Debug, Default)]
pub struct ValidatorReceiver {
    outcome: Option<ValidationOutcome>,
}

impl ValidatorReceiver {
    pub fn handle<R: Read>(&mut self, tag: u8, input: &mut DataInput<R>) -> Result<(), WireError> {
        match tag {
            ControlId::REPORT => {
                self.outcome = Some(input.read_object()?);
                Ok(())
            }
            other => Err(WireError::UnexpectedTag(other)),
        }
    }

    pub fn outcome(&self) -> Option<ValidationOutcome> {
        self.outcome
    }
}

impl ReceiveStrategy for ValidatorReceiver {
    fn receive(&mut self, tag: u8, input: &mut DataInput<TcpStream>) -> Result<(), WireError> {
        self.handle(tag, input)
    }
}

/// Validate one patch in a fresh worker. A worker that reports no verdict
/// counts as `RunError`.
pub fn run_validator(
    launcher: &dyn WorkerLauncher,
    context: &ValidationContext,
    patch: &Patch,
) -> ValidationOutcome {
    let mut request = DataOutput::new(Vec::new());
    if let Err(e) = request.write_object(&ValidatorRequest { context, patch }) {
        warn!(patch = %patch.id(), error = %e, "Failed to encode validation request");
        return ValidationOutcome::RunError;
    }

    let process = WorkerProcess::start(launcher, request.into_inner(), ValidatorReceiver::default());
    let outcome = process.wait_to_die();
    if let Err(e) = &outcome.exit {
        debug!(patch = %patch.id(), error = %e, "Validator did not finish cleanly");
    }
    let verdict = outcome.receiver.outcome().unwrap_or(ValidationOutcome::RunError);
    debug!(patch = %patch.id(), %verdict, "Patch validated");
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::PatchLocation;
    use crate::process::WorkerHandle;
    use std::io::{self, Cursor};

    #[test]
    fn test_outcome_wire_names() {
        assert_eq!(
            serde_json::to_string(&ValidationOutcome::MemoryError).unwrap(),
            "\"MEMORY_ERROR\""
        );
        assert_eq!(ValidationOutcome::TimedOut.to_string(), "TIMED_OUT");
        assert!(ValidationOutcome::Plausible.is_plausible());
        assert!(!ValidationOutcome::RunError.is_plausible());
    }

    #[test]
    fn test_receiver_keeps_reported_outcome() {
        let mut out = DataOutput::new(Vec::new());
        out.write_object(&ValidationOutcome::TimedOut).unwrap();
        let mut input = DataInput::new(Cursor::new(out.into_inner()));
        let mut receiver = ValidatorReceiver::default();
        receiver.handle(ControlId::REPORT, &mut input).unwrap();
        assert_eq!(receiver.outcome(), Some(ValidationOutcome::TimedOut));
    }

    #[test]
    fn test_request_decodes_as_arguments() {
        let context = ValidationContext {
            test_classes: vec!["t.CalcTest".into()],
            command: TestCommand::new(vec!["run".into()]),
            comparator: TestComparator::default(),
            timeout: TimeoutPolicy::default(),
            memory_limit_bytes: Some(1 << 30),
        };
        let patch = Patch::with_covering_tests(
            vec![PatchLocation::with_class_name("/p/A.class", "a.A")],
            ["t.CalcTest.add"],
        );
        let json = serde_json::to_string(&ValidatorRequest {
            context: &context,
            patch: &patch,
        })
        .unwrap();
        let args: ValidatorArguments = serde_json::from_str(&json).unwrap();
        assert_eq!(args.context, context);
        assert_eq!(args.patch, patch);
    }

    struct Unlaunchable;

    impl WorkerLauncher for Unlaunchable {
        fn launch(&self, _port: u16) -> io::Result<Box<dyn WorkerHandle>> {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))
        }
    }

    #[test]
    fn test_no_verdict_is_run_error() {
        let context = ValidationContext {
            test_classes: Vec::new(),
            command: TestCommand::default(),
            comparator: TestComparator::default(),
            timeout: TimeoutPolicy::default(),
            memory_limit_bytes: None,
        };
        let patch = Patch::new(Vec::new());
        assert_eq!(
            run_validator(&Unlaunchable, &context, &patch),
            ValidationOutcome::RunError
        );
    }
}
