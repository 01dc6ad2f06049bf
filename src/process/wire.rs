//! Framed binary messages exchanged with worker processes.
//!
//! Every message is a one-byte tag followed by a payload. Payload items:
//! strings are a big-endian `u32` byte length plus UTF-8, longs are
//! big-endian `i64`, string arrays are a `u32` count plus strings, and
//! objects are a `u32` length plus a JSON document.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Message tags.
pub struct ControlId;

impl ControlId {
    pub const REPORT_TEST_TIME: u8 = 1;
    pub const REPORT_FAILING_TEST_NAMES: u8 = 2;
    /// Validation outcome.
    pub const REPORT: u8 = 3;
    pub const REPORT_CLASS_LEVEL_FL: u8 = 4;
    pub const REPORT_CLASS_LEVEL_COV: u8 = 5;
    pub const REPORT_CALL_GRAPH: u8 = 6;
    pub const REPORT_METHOD_LEVEL_FL: u8 = 8;
    pub const REPORT_METHOD_LEVEL_COV: u8 = 9;
    pub const REPORT_LINE_LEVEL_FL: u8 = 16;
    pub const REPORT_LINE_LEVEL_COV: u8 = 17;
    /// Followed by a one-byte exit code.
    pub const DONE: u8 = 64;
}

/// Upper bound on any length prefix.
const MAX_FRAME_BYTES: usize = 512 * 1024 * 1024;

/// Wire protocol errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid UTF-8 in string payload")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Length prefix {0} exceeds the frame limit")]
    TooLarge(usize),

    #[error("Unexpected message tag {0}")]
    UnexpectedTag(u8),
}

impl WireError {
    /// `true` when the peer closed the connection.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Writes wire items to an underlying stream.
#[derive(Debug)]
pub struct DataOutput<W> {
    inner: W,
}

impl<W: Write> DataOutput<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn write_byte(&mut self, value: u8) -> Result<(), WireError> {
        self.inner.write_all(&[value])?;
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> Result<(), WireError> {
        let len = u32::try_from(len)
            .ok()
            .filter(|&l| l as usize <= MAX_FRAME_BYTES)
            .ok_or(WireError::TooLarge(len))?;
        self.inner.write_all(&len.to_be_bytes())?;
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), WireError> {
        self.write_len(value.len())?;
        self.inner.write_all(value.as_bytes())?;
        Ok(())
    }

    pub fn write_long(&mut self, value: i64) -> Result<(), WireError> {
        self.inner.write_all(&value.to_be_bytes())?;
        Ok(())
    }

    pub fn write_strings<S: AsRef<str>>(&mut self, values: &[S]) -> Result<(), WireError> {
        self.write_len(values.len())?;
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    pub fn write_object<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), WireError> {
        let json = serde_json::to_vec(value)?;
        self.write_len(json.len())?;
        self.inner.write_all(&json)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), WireError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Reads wire items from an underlying stream.
#[derive(Debug)]
pub struct DataInput<R> {
    inner: R,
}

impl<R: Read> DataInput<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn read_byte(&mut self) -> Result<u8, WireError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_len(&mut self) -> Result<usize, WireError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        let len = u32::from_be_bytes(buf) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(WireError::TooLarge(len));
        }
        Ok(len)
    }

    fn read_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_string(&mut self) -> Result<String, WireError> {
        Ok(String::from_utf8(self.read_bytes()?)?)
    }

    pub fn read_long(&mut self) -> Result<i64, WireError> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(i64::from_be_bytes(buf))
    }

    pub fn read_strings(&mut self) -> Result<Vec<String>, WireError> {
        let count = self.read_len()?;
        (0..count).map(|_| self.read_string()).collect()
    }

    pub fn read_object<T: DeserializeOwned>(&mut self) -> Result<T, WireError> {
        Ok(serde_json::from_slice(&self.read_bytes()?)?)
    }
}
