//! Endpoint discovery and handshake.
//!
//! [`connect_first`] enumerates endpoints, keeps the ones whose names look
//! like a microcontroller, and probes each in turn:
//!
//! 1. open the endpoint,
//! 2. wait for the settle delay (the controller resets when the port opens),
//! 3. clear both buffers and send `STATUS`,
//! 4. poll for a line carrying a status marker until the handshake timeout.
//!
//! The first endpoint that answers wins. Every step is blocking; the engine
//! runs it on a blocking thread.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec::{STATUS_PROBE, is_status_reply};
use crate::error::{Error, Result};
use crate::transport::{DEFAULT_PORT_PATTERNS, Transport, TransportProvider, filter_candidates};

/// Options for endpoint discovery and the handshake.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Case-insensitive fragments an endpoint name must contain.
    pub port_patterns: Vec<String>,
    /// Wait after opening before talking to the controller.
    pub settle: Duration,
    /// How long to wait for a status reply.
    pub handshake_timeout: Duration,
    /// Interval between input checks during the handshake.
    pub poll_interval: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            port_patterns: DEFAULT_PORT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            settle: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the endpoint name patterns.
    pub fn port_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.port_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - at least one port pattern is given
    /// - `poll_interval` is > 0
    /// - `handshake_timeout` >= `poll_interval`
    pub fn validate(&self) -> Result<()> {
        if self.port_patterns.is_empty() {
            return Err(Error::invalid_config("port_patterns must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_config("poll_interval must be > 0"));
        }
        if self.handshake_timeout < self.poll_interval {
            return Err(Error::invalid_config(
                "handshake_timeout must be >= poll_interval",
            ));
        }
        Ok(())
    }
}

/// A handshake-verified, open endpoint.
pub struct Connection {
    pub endpoint: String,
    pub transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Probe an open transport for a status reply.
pub fn handshake(transport: &mut dyn Transport, options: &ConnectOptions) -> Result<()> {
    transport.clear()?;
    transport.write_line(STATUS_PROBE)?;

    let started = Instant::now();
    let mut seen = 0usize;
    while started.elapsed() < options.handshake_timeout {
        if transport.bytes_available()? > 0
            && let Some(line) = transport.read_line()?
        {
            if is_status_reply(&line) {
                debug!("Status reply from {}: {}", transport.name(), line);
                return Ok(());
            }
            if !line.is_empty() {
                seen += 1;
                debug!("Ignoring handshake line from {}: {}", transport.name(), line);
            }
            continue;
        }
        std::thread::sleep(options.poll_interval);
    }

    debug!(
        "No status reply from {} ({} other line(s))",
        transport.name(),
        seen
    );
    Err(Error::handshake_failed(transport.name(), options.handshake_timeout))
}

/// Find and open the first endpoint that passes the handshake.
///
/// Open errors and handshake failures are logged and the next candidate is
/// tried. Returns [`Error::NoEndpoints`] when nothing plausible is present,
/// otherwise the last failure once every candidate is exhausted.
pub fn connect_first(provider: &dyn TransportProvider, options: &ConnectOptions) -> Result<Connection> {
    let endpoints = provider.endpoints()?;
    let candidates = filter_candidates(&endpoints, &options.port_patterns);
    info!("Candidate controller endpoints: {:?}", candidates);

    if candidates.is_empty() {
        return Err(Error::NoEndpoints);
    }

    let mut last_error = None;
    for endpoint in candidates {
        info!("Trying {}", endpoint);
        let mut transport = match provider.open(&endpoint) {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to open {}: {}", endpoint, e);
                last_error = Some(e);
                continue;
            }
        };

        if !options.settle.is_zero() {
            std::thread::sleep(options.settle);
        }

        match handshake(transport.as_mut(), options) {
            Ok(()) => {
                info!("Controller found on {}", endpoint);
                return Ok(Connection { endpoint, transport });
            }
            Err(e) => {
                warn!("Handshake on {} failed: {}", endpoint, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or(Error::NoEndpoints))
}
