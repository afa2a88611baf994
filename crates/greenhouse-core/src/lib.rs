//! Sensor acquisition and device control engine for greenhouse controllers.
//!
//! This crate talks to a serial-attached microcontroller that reports
//! telemetry as text lines and accepts `MANUAL_<DEVICE>_<ON|OFF>` commands.
//! When no controller answers, or the one in use goes away, the engine keeps
//! producing plausible readings from a simulator, so consumers see the same
//! interface either way and only a status flag tells them apart.
//!
//! # Features
//!
//! - **Discovery and handshake**: find the controller among the serial ports
//! - **Background ingestion**: one task owns the port, reads telemetry and
//!   writes queued commands
//! - **Dual-source readings**: hardware values where available, computed or
//!   simulated values elsewhere, always within physical bounds
//! - **Device control**: logical on/off state relayed to the controller
//! - **History**: bounded per-metric timelines
//! - **Events and auto-reconnection**: broadcast notifications and an
//!   optional supervisor that reattaches a lost controller
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use greenhouse_core::{Engine, EngineOptions, SerialProvider};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = Engine::new(Arc::new(SerialProvider::new()), EngineOptions::default());
//!     engine.attempt_connect().await;
//!
//!     engine.set_device("water", true);
//!     let reading = engine.refresh();
//!     println!("soil moisture: {:.1} %", reading.soil);
//!     println!("mode: {}", engine.connection_status().mode);
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod codec;
pub mod connection;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod ingestor;
pub mod mock;
pub mod reconnect;
pub mod sink;
pub mod synthesizer;
pub mod transport;

// Re-export types crate
pub use greenhouse_types;
pub use greenhouse_types::{
    Actuator, ConnectionState, DeviceState, HistoryPoint, Metric, Mode, ParseError,
    PartialReading, Reading,
};

pub use connection::{ConnectOptions, Connection, connect_first, handshake};
pub use controller::{DeviceChange, DeviceController};
pub use engine::{ConnectionStatus, Engine, EngineOptions};
pub use error::{Error, Result};
pub use events::{EngineEvent, EventDispatcher, EventReceiver, EventSender};
pub use history::HistoryRecorder;
pub use ingestor::{IngestExit, Ingestor, RawTelemetrySample, TelemetrySnapshot};
pub use reconnect::{ReconnectOptions, spawn_supervisor};
pub use sink::{SinkRecord, TelemetrySink};
pub use synthesizer::{SimulationProfile, Synthesizer};
pub use transport::{SerialProvider, SerialTransport, Transport, TransportProvider};
