//! Worker side of a conversation: the message writer.

use std::io::{self, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::Mutex;

use super::wire::{ControlId, DataInput, DataOutput, WireError};
use super::ExitCode;

/// Serializes tagged messages onto the coordinator connection.
///
/// Shared between the test thread and the memory watchdog, so every message
/// is written under one lock and flushed as a unit.
#[derive(Debug)]
pub struct Reporter<W: Write> {
    out: Mutex<DataOutput<W>>,
}

impl Reporter<TcpStream> {
    /// Connect to the coordinator listening on `port`. Returns the reporter
    /// and the input side for reading the request.
    pub fn connect(port: u16) -> io::Result<(Self, DataInput<TcpStream>)> {
        let stream = TcpStream::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
        stream.set_nodelay(true)?;
        let input = DataInput::new(stream.try_clone()?);
        Ok((Self::new(stream), input))
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            out: Mutex::new(DataOutput::new(writer)),
        }
    }

    /// Write `tag` followed by whatever `payload` writes, then flush.
    pub fn send<F>(&self, tag: u8, payload: F) -> Result<(), WireError>
    where
        F: FnOnce(&mut DataOutput<W>) -> Result<(), WireError>,
    {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reporter lock poisoned"))?;
        out.write_byte(tag)?;
        payload(&mut *out)?;
        out.flush()
    }

    pub fn done(&self, code: ExitCode) -> Result<(), WireError> {
        self.send(ControlId::DONE, |out| out.write_byte(code.code()))
    }

    pub fn into_inner(self) -> Result<W, WireError> {
        self.out
            .into_inner()
            .map(DataOutput::into_inner)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "reporter lock poisoned").into())
    }
}
