//! Out-of-process worker plumbing.
//!
//! A coordinator binds a loopback listener, launches a worker with the port
//! as its last argument, sends one request, and collects tagged messages
//! until `DONE`. Profiling and validation are both built on this.

pub mod channel;
pub mod group;
pub mod launch;
pub mod memory;
pub mod reporter;
pub mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use channel::{ChannelError, ChannelOutcome, ReceiveStrategy, WorkerProcess};
pub use launch::{ProcessArgs, ProcessLauncher, WorkerHandle, WorkerLauncher};
pub use reporter::Reporter;
pub use wire::{ControlId, DataInput, DataOutput, WireError};

/// Worker exit codes, carried by `DONE` and used as the process status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitCode {
    Ok,
    OutOfMemory,
    UnknownError,
    Timeout,
}

impl ExitCode {
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::OutOfMemory => 11,
            Self::UnknownError => 13,
            Self::Timeout => 14,
        }
    }

    /// Unrecognized codes map to `UnknownError`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            11 => Self::OutOfMemory,
            14 => Self::Timeout,
            _ => Self::UnknownError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::OutOfMemory => write!(f, "OUT_OF_MEMORY"),
            Self::UnknownError => write!(f, "UNKNOWN_ERROR"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}
