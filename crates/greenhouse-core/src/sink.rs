//! Durable-storage side channel.
//!
//! After every refresh the engine hands one record per metric and one per
//! device to an optional [`TelemetrySink`]. Submission must not block: an
//! implementation buffers (boundedly) and writes in the background, dropping
//! and logging whatever it cannot store.

use greenhouse_types::{Actuator, DeviceState, Metric, Mode, Reading};
use time::OffsetDateTime;

/// One record for durable storage.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Sensor {
        metric: Metric,
        value: f64,
        mode: Mode,
        timestamp: OffsetDateTime,
    },
    Device {
        device: Actuator,
        on: bool,
        mode: Mode,
        timestamp: OffsetDateTime,
    },
}

impl SinkRecord {
    /// Records describing one refresh: every present metric, then every device.
    pub fn batch(
        reading: &Reading,
        devices: &DeviceState,
        mode: Mode,
        timestamp: OffsetDateTime,
    ) -> Vec<SinkRecord> {
        let sensors = reading.iter().map(|(metric, value)| SinkRecord::Sensor {
            metric,
            value,
            mode,
            timestamp,
        });
        let actuators = devices.iter().map(|(device, on)| SinkRecord::Device {
            device,
            on,
            mode,
            timestamp,
        });
        sensors.chain(actuators).collect()
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            SinkRecord::Sensor { timestamp, .. } | SinkRecord::Device { timestamp, .. } => *timestamp,
        }
    }
}

/// Fire-and-forget consumer of telemetry records.
pub trait TelemetrySink: Send + Sync {
    /// Queue records for storage. Must return promptly.
    fn submit(&self, records: Vec<SinkRecord>);
}
