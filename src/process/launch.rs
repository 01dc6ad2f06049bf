//! Launching worker processes.

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::group;
use super::memory::ProcessTreeProbe;
use crate::junit::classpath::join_classpath;

/// How a worker is started: `<program> <child args> <entry point> <port>`
/// with `classpath` exported as `CLASSPATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessArgs {
    pub program: PathBuf,
    pub child_args: Vec<String>,
    pub entry_point: Vec<String>,
    pub classpath: Vec<PathBuf>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ProcessArgs {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            child_args: Vec::new(),
            entry_point: Vec::new(),
            classpath: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    /// The running `prf` binary with its hidden worker entry point.
    pub fn current_exe(role: &str) -> io::Result<Self> {
        let mut args = Self::new(std::env::current_exe()?);
        args.entry_point = vec!["worker".to_string(), role.to_string()];
        Ok(args)
    }

    pub fn with_child_args(mut self, args: Vec<String>) -> Self {
        self.child_args = args;
        self
    }

    pub fn with_entry_point(mut self, entry_point: Vec<String>) -> Self {
        self.entry_point = entry_point;
        self
    }

    pub fn with_classpath(mut self, classpath: Vec<PathBuf>) -> Self {
        self.classpath = classpath;
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

    fn command(&self, port: u16) -> io::Result<Command> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.child_args)
            .args(&self.entry_point)
            .arg(port.to_string())
            .env("CLASSPATH", join_classpath(&self.classpath)?)
            .stdin(Stdio::null());
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Ok(command)
    }
}

/// A launched worker as seen by the coordinator.
pub trait WorkerHandle: Send {
    /// Exit status if the worker has terminated.
    fn try_exited(&mut self) -> io::Result<Option<i32>>;
    /// Terminate the worker and reap it; safe to call after exit.
    fn destroy(&mut self);
}

/// Starts a worker that will connect back to `port`.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, port: u16) -> io::Result<Box<dyn WorkerHandle>>;
}

impl<L: WorkerLauncher + ?Sized> WorkerLauncher for Arc<L> {
    fn launch(&self, port: u16) -> io::Result<Box<dyn WorkerHandle>> {
        (**self).launch(port)
    }
}

/// Launches real child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    args: ProcessArgs,
}

impl ProcessLauncher {
    pub fn new(args: ProcessArgs) -> Self {
        Self { args }
    }

    pub fn args(&self) -> &ProcessArgs {
        &self.args
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, port: u16) -> io::Result<Box<dyn WorkerHandle>> {
        let child = self.args.command(port)?.spawn()?;
        debug!(pid = child.id(), port, program = %self.args.program.display(), "Worker launched");
        Ok(Box::new(ChildHandle { child }))
    }
}

struct ChildHandle {
    child: Child,
}

impl WorkerHandle for ChildHandle {
    fn try_exited(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| status.code().unwrap_or(-1)))
    }

    /// Kill the worker and every process it started. Test commands lead
    /// their own groups, so each descendant group goes too.
    fn destroy(&mut self) {
        let descendants = ProcessTreeProbe::new(self.child.id()).descendants();
        if !matches!(self.child.try_wait(), Ok(Some(_))) {
            if let Err(e) = self.child.kill() {
                warn!(pid = self.child.id(), error = %e, "Failed to kill worker");
            }
            let _ = self.child.wait();
        }
        if !descendants.is_empty() {
            debug!(pid = self.child.id(), count = descendants.len(), "Killing worker descendants");
            group::kill_all(&descendants);
        }
    }
}
