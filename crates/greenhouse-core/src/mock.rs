//! In-memory transports for testing.
//!
//! This module provides a mock controller link that can be used for unit and
//! integration testing without a microcontroller on a serial port.
//!
//! [`MockProvider`] implements [`TransportProvider`] and hands out
//! [`MockTransport`]s; each endpoint is paired with a [`MockLink`] handle the
//! test keeps to script the controller's side of the conversation.
//!
//! # Features
//!
//! - **Status replies**: endpoints answer the `STATUS` probe (or stay silent)
//! - **Telemetry injection**: push lines the ingestor will read
//! - **Command capture**: inspect every line written by the engine
//! - **Failure injection**: unplug a link or make an endpoint fail to open
//! - **Sink capture**: [`RecordingSink`] keeps every submitted batch
//!
//! # Example
//!
//! ```
//! use greenhouse_core::mock::MockProvider;
//! use greenhouse_core::transport::TransportProvider;
//!
//! let provider = MockProvider::new();
//! let link = provider.add_controller("/dev/ttyACM0");
//!
//! let mut transport = provider.open("/dev/ttyACM0").unwrap();
//! transport.write_line("STATUS").unwrap();
//! assert_eq!(link.written(), vec!["STATUS"]);
//! assert!(transport.read_line().unwrap().is_some());
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::codec::STATUS_PROBE;
use crate::error::{Error, Result};
use crate::sink::{SinkRecord, TelemetrySink};
use crate::transport::{Transport, TransportProvider};

/// Reply sent by a responsive mock controller to the status probe.
pub const DEFAULT_STATUS_REPLY: &str = "=== 시스템 상태 ===";

#[derive(Debug, Default)]
struct LinkState {
    inbound: VecDeque<String>,
    written: Vec<String>,
    status_reply: Option<String>,
    unplugged: bool,
    open_handles: u32,
}

/// Test-side handle to one mock endpoint.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        // A panicking test thread must not hide the link from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a line for the engine to read.
    pub fn push_line(&self, line: impl Into<String>) {
        self.lock().inbound.push_back(line.into());
    }

    /// Every line the engine has written, in order.
    pub fn written(&self) -> Vec<String> {
        self.lock().written.clone()
    }

    /// Lines written by the engine other than the status probe.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .written
            .iter()
            .filter(|l| l.as_str() != STATUS_PROBE)
            .cloned()
            .collect()
    }

    /// Set or clear the reply to the status probe.
    pub fn set_status_reply(&self, reply: Option<&str>) {
        self.lock().status_reply = reply.map(str::to_string);
    }

    /// Simulate the controller being unplugged: reads and writes fail from now on.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    /// Number of transports for this link that are currently open.
    pub fn open_handles(&self) -> u32 {
        self.lock().open_handles
    }
}

/// A [`Transport`] backed by a [`MockLink`].
#[derive(Debug)]
pub struct MockTransport {
    name: String,
    link: MockLink,
}

impl MockTransport {
    pub fn new(name: impl Into<String>, link: MockLink) -> Self {
        link.lock().open_handles += 1;
        Self {
            name: name.into(),
            link,
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        let mut state = self.link.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        let state = self.link.lock();
        if state.unplugged {
            // Like a yanked USB serial device: "ready", but the read fails.
            return Ok(1);
        }
        Ok(state.inbound.iter().map(|l| l.len() + 1).sum())
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut state = self.link.lock();
        if state.unplugged {
            return Err(io::Error::other(
                "device reports readiness to read but returned no data",
            ));
        }
        Ok(state.inbound.pop_front())
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.link.lock();
        if state.unplugged {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link unplugged"));
        }
        state.written.push(line.to_string());
        if line == STATUS_PROBE
            && let Some(reply) = state.status_reply.clone()
        {
            state.inbound.push_back(reply);
        }
        Ok(())
    }

    fn clear(&mut self) -> io::Result<()> {
        self.link.lock().inbound.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    name: String,
    link: MockLink,
    openable: bool,
}

/// A [`TransportProvider`] whose endpoints are created by the test.
#[derive(Debug, Clone, Default)]
pub struct MockProvider {
    endpoints: Arc<Mutex<Vec<Endpoint>>>,
}

impl MockProvider {
    /// Create a provider with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Endpoint>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, name: &str, status_reply: Option<&str>, openable: bool) -> MockLink {
        let link = MockLink::default();
        link.set_status_reply(status_reply);
        self.lock().push(Endpoint {
            name: name.to_string(),
            link: link.clone(),
            openable,
        });
        link
    }

    /// Add an endpoint that answers the status probe.
    pub fn add_controller(&self, name: &str) -> MockLink {
        self.add(name, Some(DEFAULT_STATUS_REPLY), true)
    }

    /// Add an endpoint that opens but never answers the status probe.
    pub fn add_silent(&self, name: &str) -> MockLink {
        self.add(name, None, true)
    }

    /// Add an endpoint that is listed but fails to open.
    pub fn add_unopenable(&self, name: &str) -> MockLink {
        self.add(name, None, false)
    }

    /// Remove an endpoint from enumeration.
    pub fn remove(&self, name: &str) {
        self.lock().retain(|e| e.name != name);
    }

    /// Remove every endpoint.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl TransportProvider for MockProvider {
    fn endpoints(&self) -> Result<Vec<String>> {
        Ok(self.lock().iter().map(|e| e.name.clone()).collect())
    }

    fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>> {
        let entry = self
            .lock()
            .iter()
            .find(|e| e.name == endpoint)
            .cloned()
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no such endpoint: {}", endpoint),
                ))
            })?;

        if !entry.openable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot open {}", endpoint),
            )));
        }

        Ok(Box::new(MockTransport::new(entry.name, entry.link)))
    }
}

/// A [`TelemetrySink`] that keeps every submitted batch in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    batches: Arc<Mutex<Vec<Vec<SinkRecord>>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch submitted so far.
    pub fn batches(&self) -> Vec<Vec<SinkRecord>> {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl TelemetrySink for RecordingSink {
    fn submit(&self, records: Vec<SinkRecord>) {
        self.batches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_probe_gets_reply() {
        let provider = MockProvider::new();
        let link = provider.add_controller("/dev/ttyACM0");
        let mut transport = provider.open("/dev/ttyACM0").unwrap();

        assert_eq!(transport.bytes_available().unwrap(), 0);
        transport.write_line(STATUS_PROBE).unwrap();
        assert!(transport.bytes_available().unwrap() > 0);
        assert_eq!(
            transport.read_line().unwrap().as_deref(),
            Some(DEFAULT_STATUS_REPLY)
        );
        assert_eq!(link.written(), vec![STATUS_PROBE]);
        assert!(link.commands().is_empty());
    }

    #[test]
    fn test_silent_endpoint() {
        let provider = MockProvider::new();
        provider.add_silent("COM4");
        let mut transport = provider.open("COM4").unwrap();
        transport.write_line(STATUS_PROBE).unwrap();
        assert_eq!(transport.read_line().unwrap(), None);
    }

    #[test]
    fn test_unopenable_endpoint() {
        let provider = MockProvider::new();
        provider.add_unopenable("/dev/ttyUSB0");
        assert_eq!(provider.endpoints().unwrap(), vec!["/dev/ttyUSB0"]);
        assert!(provider.open("/dev/ttyUSB0").is_err());
        assert!(provider.open("/dev/missing").is_err());
    }

    #[test]
    fn test_unplug_fails_reads_and_writes() {
        let provider = MockProvider::new();
        let link = provider.add_controller("/dev/ttyACM0");
        let mut transport = provider.open("/dev/ttyACM0").unwrap();

        link.unplug();
        assert_eq!(transport.bytes_available().unwrap(), 1);
        let err = transport.read_line().unwrap_err();
        assert!(crate::transport::is_disconnect(&err));
        assert!(transport.write_line("MANUAL_FAN_ON").is_err());
    }

    #[test]
    fn test_open_handles_tracked() {
        let provider = MockProvider::new();
        let link = provider.add_controller("/dev/ttyACM0");
        let transport = provider.open("/dev/ttyACM0").unwrap();
        assert_eq!(link.open_handles(), 1);
        drop(transport);
        assert_eq!(link.open_handles(), 0);
    }

    #[test]
    fn test_remove_endpoint() {
        let provider = MockProvider::new();
        provider.add_controller("a");
        provider.add_controller("b");
        provider.remove("a");
        assert_eq!(provider.endpoints().unwrap(), vec!["b"]);
        provider.clear();
        assert!(provider.endpoints().unwrap().is_empty());
    }
}
