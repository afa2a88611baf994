//! Background telemetry ingestion.
//!
//! While a controller is attached the ingestor is the only code that touches
//! its [`Transport`]. It runs on a blocking thread and loops:
//!
//! 1. write any queued device commands,
//! 2. if input is waiting, read one line, decode it and merge the decoded
//!    fields into the published [`TelemetrySnapshot`],
//! 3. otherwise sleep for the poll interval.
//!
//! A read or write error that means the device is gone ends the loop with
//! [`IngestExit::LinkLost`]. The ingestor never reconnects on its own.

use std::collections::BTreeMap;
use std::time::Duration;

use greenhouse_types::{Metric, PartialReading};
use time::OffsetDateTime;
use tokio::sync::mpsc::{UnboundedReceiver, error::TryRecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec;
use crate::transport::{Transport, is_disconnect};

/// Default sleep between polls when no input is waiting.
pub const DEFAULT_READ_POLL: Duration = Duration::from_millis(100);

/// Most recent value of one metric as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawTelemetrySample {
    pub value: f64,
    pub received_at: OffsetDateTime,
}

/// Last-known sample per metric, overwritten in place as lines arrive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetrySnapshot {
    samples: BTreeMap<Metric, RawTelemetrySample>,
}

impl TelemetrySnapshot {
    /// Merge the fields of a decoded line, replacing older samples.
    pub fn merge(&mut self, reading: &PartialReading, received_at: OffsetDateTime) {
        for (metric, value) in reading.iter() {
            self.samples.insert(metric, RawTelemetrySample { value, received_at });
        }
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.samples.get(&metric).map(|s| s.value)
    }

    #[must_use]
    pub fn sample(&self, metric: Metric) -> Option<&RawTelemetrySample> {
        self.samples.get(&metric)
    }

    /// Arrival time of the newest sample.
    #[must_use]
    pub fn last_update(&self) -> Option<OffsetDateTime> {
        self.samples.values().map(|s| s.received_at).max()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }
}

/// Why the ingestion loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestExit {
    /// Stopped through its cancellation token.
    Cancelled,
    /// The device went away; carries the error text.
    LinkLost(String),
}

/// Everything the ingestion loop needs. Moved onto the blocking thread.
pub struct Ingestor {
    transport: Box<dyn Transport>,
    publisher: watch::Sender<TelemetrySnapshot>,
    commands: UnboundedReceiver<String>,
    cancel: CancellationToken,
    poll: Duration,
}

impl Ingestor {
    pub fn new(
        transport: Box<dyn Transport>,
        publisher: watch::Sender<TelemetrySnapshot>,
        commands: UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            publisher,
            commands,
            cancel,
            poll: DEFAULT_READ_POLL,
        }
    }

    /// Set the idle poll interval.
    pub fn poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Run until cancelled or the link is lost. Blocking; the transport is
    /// dropped (closed) on return.
    pub fn run(mut self) -> IngestExit {
        let endpoint = self.transport.name().to_string();
        info!("Telemetry ingestion started on {}", endpoint);

        let exit = self.run_loop();
        match &exit {
            IngestExit::Cancelled => info!("Telemetry ingestion on {} stopped", endpoint),
            IngestExit::LinkLost(reason) => {
                warn!("Lost controller on {}: {}", endpoint, reason)
            }
        }
        exit
    }

    fn run_loop(&mut self) -> IngestExit {
        loop {
            if self.cancel.is_cancelled() {
                return IngestExit::Cancelled;
            }

            if let Some(exit) = self.flush_commands() {
                return exit;
            }

            match self.transport.bytes_available() {
                Ok(0) => {}
                Ok(_) => match self.transport.read_line() {
                    Ok(Some(line)) => {
                        self.ingest(&line);
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) if is_disconnect(&e) => return IngestExit::LinkLost(e.to_string()),
                    Err(e) => warn!("Telemetry read error: {}", e),
                },
                Err(e) if is_disconnect(&e) => return IngestExit::LinkLost(e.to_string()),
                Err(e) => warn!("Failed to poll input: {}", e),
            }

            std::thread::sleep(self.poll);
        }
    }

    /// Write every queued command. Failures are logged and the command dropped.
    fn flush_commands(&mut self) -> Option<IngestExit> {
        loop {
            match self.commands.try_recv() {
                Ok(command) => match self.transport.write_line(&command) {
                    Ok(()) => info!("Sent command {}", command),
                    Err(e) if is_disconnect(&e) => {
                        warn!("Failed to send {}: {}", command, e);
                        return Some(IngestExit::LinkLost(e.to_string()));
                    }
                    Err(e) => warn!("Failed to send {}: {}", command, e),
                },
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }

    fn ingest(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        let decoded = codec::decode(line);
        debug!("Received {:?} -> {} field(s)", line, decoded.len());
        if decoded.is_empty() {
            return;
        }
        let now = OffsetDateTime::now_utc();
        self.publisher.send_modify(|snapshot| snapshot.merge(&decoded, now));
    }
}
