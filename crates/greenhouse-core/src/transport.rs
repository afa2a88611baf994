//! Transport abstractions for the controller link.
//!
//! The engine talks to the controller through two small traits:
//!
//! - [`Transport`]: an open, line-oriented endpoint. Exactly one owner (the
//!   ingestor, or the handshake before it) uses a transport at a time, so the
//!   trait takes `&mut self` and is blocking.
//! - [`TransportProvider`]: enumerates endpoints and opens them.
//!
//! [`SerialProvider`] implements both on top of the `serialport` crate;
//! [`crate::mock`] provides in-memory implementations for tests.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Endpoint name fragments that usually identify a microcontroller's USB serial port.
pub const DEFAULT_PORT_PATTERNS: [&str; 5] = ["usbmodem", "usbserial", "ttyusb", "ttyacm", "com"];

/// Default baud rate of the controller firmware.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// An open, line-oriented link to a controller.
pub trait Transport: Send {
    /// Endpoint name (e.g. `/dev/ttyACM0` or `COM3`).
    fn name(&self) -> &str;

    /// Number of bytes waiting to be read (including any buffered partial line).
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Read one line, without its terminator.
    ///
    /// Returns `Ok(None)` if no complete line arrived before the read timeout.
    fn read_line(&mut self) -> io::Result<Option<String>>;

    /// Write one line; the terminator is appended.
    fn write_line(&mut self, line: &str) -> io::Result<()>;

    /// Discard anything buffered in either direction.
    fn clear(&mut self) -> io::Result<()>;
}

/// Enumerates and opens controller endpoints.
pub trait TransportProvider: Send + Sync {
    /// Names of all endpoints currently present on the system.
    fn endpoints(&self) -> Result<Vec<String>>;

    /// Open an endpoint by name.
    fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>>;
}

/// Keep only endpoints whose name contains one of `patterns` (case-insensitive).
///
/// ```
/// use greenhouse_core::transport::{filter_candidates, DEFAULT_PORT_PATTERNS};
///
/// let ports = vec![
///     "/dev/ttyS0".to_string(),
///     "/dev/ttyACM0".to_string(),
///     "/dev/cu.usbmodem1101".to_string(),
/// ];
/// let candidates = filter_candidates(&ports, &DEFAULT_PORT_PATTERNS);
/// assert_eq!(candidates, vec!["/dev/ttyACM0", "/dev/cu.usbmodem1101"]);
/// ```
pub fn filter_candidates<S: AsRef<str>>(endpoints: &[String], patterns: &[S]) -> Vec<String> {
    endpoints
        .iter()
        .filter(|name| {
            let lower = name.to_lowercase();
            patterns
                .iter()
                .any(|p| lower.contains(&p.as_ref().to_lowercase()))
        })
        .cloned()
        .collect()
}

/// Serial-port backed [`TransportProvider`].
#[derive(Debug, Clone)]
pub struct SerialProvider {
    baud_rate: u32,
    read_timeout: Duration,
}

impl Default for SerialProvider {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_secs(1),
        }
    }
}

impl SerialProvider {
    /// Create a provider with the default baud rate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baud rate.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the per-read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

impl TransportProvider for SerialProvider {
    fn endpoints(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        let names: Vec<String> = ports.into_iter().map(|p| p.port_name).collect();
        debug!("Available serial ports: {:?}", names);
        Ok(names)
    }

    fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>> {
        info!("Opening {} at {} baud", endpoint, self.baud_rate);
        let port = serialport::new(endpoint, self.baud_rate)
            .timeout(self.read_timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()?;
        Ok(Box::new(SerialTransport::new(endpoint, port)))
    }
}

/// Longest partial line kept while waiting for its terminator, in bytes.
pub const MAX_LINE_LEN: usize = 1024;

/// Splits a byte stream into trimmed lines.
///
/// A partial line that grows past its cap without a terminator is dropped.
#[derive(Debug)]
pub(crate) struct LineBuffer {
    bytes: Vec<u8>,
    cap: usize,
}

impl LineBuffer {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(256),
            cap,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Append received bytes. Returns the number of bytes discarded.
    pub(crate) fn extend(&mut self, chunk: &[u8]) -> usize {
        self.bytes.extend_from_slice(chunk);
        let complete = self.bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let partial = self.bytes.len() - complete;
        if partial > self.cap {
            self.bytes.truncate(complete);
            return partial;
        }
        0
    }

    /// Pop a complete line, if one is buffered.
    pub(crate) fn take_line(&mut self) -> Option<String> {
        let end = self.bytes.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.bytes.drain(..=end).collect();
        Some(
            String::from_utf8_lossy(&line)
                .trim_end_matches(['\r', '\n'])
                .trim()
                .to_string(),
        )
    }
}

/// A [`Transport`] over an open serial port.
pub struct SerialTransport {
    name: String,
    port: Box<dyn SerialPort>,
    lines: LineBuffer,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.name)
            .field("buffered", &self.lines.len())
            .finish()
    }
}

impl SerialTransport {
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.into(),
            port,
            lines: LineBuffer::new(MAX_LINE_LEN),
        }
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.port.bytes_to_read()?;
        Ok(pending as usize + self.lines.len())
    }

    /// At most one read from the port per call, bounded by its read timeout.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.lines.take_line() {
            return Ok(Some(line));
        }

        let mut chunk = [0u8; 256];
        match self.port.read(&mut chunk) {
            // The port reported data but delivered none: the device is gone.
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "device reports readiness to read but returned no data",
            )),
            Ok(n) => {
                let dropped = self.lines.extend(&chunk[..n]);
                if dropped > 0 {
                    warn!("Discarded {} bytes without a line break from {}", dropped, self.name);
                }
                Ok(self.lines.take_line())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()
    }

    fn clear(&mut self) -> io::Result<()> {
        self.lines.clear();
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

/// Whether an I/O error means the endpoint itself has gone away
/// (unplugged, reset), as opposed to a transient glitch.
#[must_use]
pub fn is_disconnect(err: &io::Error) -> bool {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotFound
        | io::ErrorKind::PermissionDenied => true,
        _ => {
            let msg = err.to_string().to_lowercase();
            msg.contains("device reports readiness to read but returned no data")
                || msg.contains("no such device")
                || msg.contains("device not configured")
        }
    }
}
