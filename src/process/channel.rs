//! Coordinator side of a worker conversation.

use std::io::{self, ErrorKind, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use super::launch::{WorkerHandle, WorkerLauncher};
use super::wire::{ControlId, DataInput, WireError};
use super::ExitCode;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long a single frame may take once its tag has arrived.
const FRAME_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the channel may keep reading after the worker has exited.
const EXIT_GRACE: Duration = Duration::from_secs(2);

/// Why a conversation ended without `DONE`.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Failed to bind coordinator socket: {0}")]
    Bind(#[source] io::Error),

    #[error("Failed to launch worker: {0}")]
    Launch(#[source] io::Error),

    #[error("Worker never connected")]
    NeverConnected,

    #[error("Worker disconnected before DONE")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("Communication thread panicked")]
    Panicked,
}

/// Consumes tagged messages from a worker.
pub trait ReceiveStrategy: Default + Send + 'static {
    fn receive(&mut self, tag: u8, input: &mut DataInput<TcpStream>) -> Result<(), WireError>;
}

/// Whatever was received, plus how the conversation ended.
#[derive(Debug)]
pub struct ChannelOutcome<R> {
    pub receiver: R,
    pub exit: Result<ExitCode, ChannelError>,
}

fn accept(listener: &TcpListener, abandon: &AtomicBool) -> Result<TcpStream, ChannelError> {
    listener.set_nonblocking(true).map_err(ChannelError::Bind)?;
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "Worker connected");
                stream.set_nonblocking(false).map_err(|e| ChannelError::Wire(e.into()))?;
                return Ok(stream);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if abandon.load(Ordering::SeqCst) {
                    return Err(ChannelError::NeverConnected);
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(ChannelError::Wire(e.into())),
        }
    }
}

/// Wait for the next frame; `false` means the channel was abandoned.
fn await_frame(stream: &TcpStream, abandon: &AtomicBool) -> Result<bool, ChannelError> {
    stream
        .set_read_timeout(Some(POLL_INTERVAL * 5))
        .map_err(|e| ChannelError::Wire(e.into()))?;
    let mut probe = [0u8; 1];
    loop {
        match stream.peek(&mut probe) {
            Ok(0) => return Err(ChannelError::Disconnected),
            Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                return Err(ChannelError::Disconnected)
            }
            Ok(_) => break,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if abandon.load(Ordering::SeqCst) {
                    return Ok(false);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(ChannelError::Wire(e.into())),
        }
    }
    stream
        .set_read_timeout(Some(FRAME_TIMEOUT))
        .map_err(|e| ChannelError::Wire(e.into()))?;
    Ok(true)
}

fn converse<R: ReceiveStrategy>(
    listener: TcpListener,
    request: &[u8],
    receiver: &mut R,
    abandon: &AtomicBool,
) -> Result<ExitCode, ChannelError> {
    let stream = accept(&listener, abandon)?;
    drop(listener);

    let mut writer = stream.try_clone().map_err(|e| ChannelError::Wire(e.into()))?;
    writer
        .write_all(request)
        .and_then(|_| writer.flush())
        .map_err(|e| ChannelError::Wire(e.into()))?;

    let mut input = DataInput::new(stream);
    loop {
        if !await_frame(input.get_ref(), abandon)? {
            return Err(ChannelError::Disconnected);
        }
        let tag = match input.read_byte() {
            Ok(tag) => tag,
            Err(e) if e.is_eof() => return Err(ChannelError::Disconnected),
            Err(e) => return Err(e.into()),
        };
        if tag == ControlId::DONE {
            return Ok(ExitCode::from_code(input.read_byte()?));
        }
        receiver.receive(tag, &mut input)?;
    }
}

/// A running worker plus the thread talking to it.
pub struct WorkerProcess<R: ReceiveStrategy> {
    handle: Option<Box<dyn WorkerHandle>>,
    thread: Option<JoinHandle<ChannelOutcome<R>>>,
    abandon: Arc<AtomicBool>,
    early: Option<ChannelOutcome<R>>,
    launch_error: Option<io::Error>,
}

impl<R: ReceiveStrategy> WorkerProcess<R> {
    /// Bind a loopback port, start the communication thread, and launch the
    /// worker. Failures are logged and surface from [`Self::wait_to_die`].
    pub fn start(launcher: &dyn WorkerLauncher, request: Vec<u8>, receiver: R) -> Self {
        let abandon = Arc::new(AtomicBool::new(false));
        let listener = match TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0))) {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Failed to bind coordinator socket");
                return Self::failed(receiver, ChannelError::Bind(e), abandon);
            }
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => return Self::failed(receiver, ChannelError::Bind(e), abandon),
        };

        let thread_abandon = Arc::clone(&abandon);
        let spawned = thread::Builder::new()
            .name(format!("prf-comm-{}", port))
            .spawn(move || {
                let mut receiver = receiver;
                let exit = converse(listener, &request, &mut receiver, &thread_abandon);
                ChannelOutcome { receiver, exit }
            });
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                warn!(error = %e, "Failed to start communication thread");
                return Self::failed(R::default(), ChannelError::Wire(e.into()), abandon);
            }
        };

        let (handle, launch_error) = match launcher.launch(port) {
            Ok(handle) => (Some(handle), None),
            Err(e) => {
                warn!(error = %e, port, "Failed to launch worker");
                abandon.store(true, Ordering::SeqCst);
                (None, Some(e))
            }
        };
        Self {
            handle,
            thread: Some(thread),
            abandon,
            early: None,
            launch_error,
        }
    }

    fn failed(receiver: R, error: ChannelError, abandon: Arc<AtomicBool>) -> Self {
        Self {
            handle: None,
            thread: None,
            abandon,
            early: Some(ChannelOutcome {
                receiver,
                exit: Err(error),
            }),
            launch_error: None,
        }
    }

    /// Wait for the conversation to end, then unconditionally destroy the
    /// worker. Returns whatever was received.
    pub fn wait_to_die(mut self) -> ChannelOutcome<R> {
        if let Some(outcome) = self.early.take() {
            return outcome;
        }
        let Some(thread) = self.thread.take() else {
            return ChannelOutcome {
                receiver: R::default(),
                exit: Err(ChannelError::Panicked),
            };
        };

        let mut exited_at: Option<Instant> = None;
        while !thread.is_finished() {
            if exited_at.is_none() {
                let exited = match self.handle.as_mut() {
                    Some(handle) => match handle.try_exited() {
                        Ok(status) => status.is_some(),
                        Err(e) => {
                            warn!(error = %e, "Failed to poll worker");
                            true
                        }
                    },
                    None => true,
                };
                if exited {
                    exited_at = Some(Instant::now());
                }
            }
            if exited_at.is_some_and(|t| t.elapsed() >= EXIT_GRACE) {
                debug!("Worker gone; abandoning communication thread");
                self.abandon.store(true, Ordering::SeqCst);
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        if let Some(mut handle) = self.handle.take() {
            handle.destroy();
        }
        self.abandon.store(true, Ordering::SeqCst);

        match thread.join() {
            Ok(mut outcome) => {
                if matches!(outcome.exit, Err(ChannelError::NeverConnected)) {
                    if let Some(e) = self.launch_error.take() {
                        outcome.exit = Err(ChannelError::Launch(e));
                    }
                }
                if let Err(e) = &outcome.exit {
                    warn!(error = %e, "Worker conversation ended abnormally");
                }
                outcome
            }
            Err(_) => {
                warn!("Communication thread panicked");
                ChannelOutcome {
                    receiver: R::default(),
                    exit: Err(ChannelError::Panicked),
                }
            }
        }
    }
}

impl<R: ReceiveStrategy> Drop for WorkerProcess<R> {
    fn drop(&mut self) {
        self.abandon.store(true, Ordering::SeqCst);
        if let Some(mut handle) = self.handle.take() {
            handle.destroy();
        }
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
