//! HTTP REST API and event stream for the greenhouse acquisition engine.
//!
//! This crate provides a service that:
//! - Attaches to a serial greenhouse controller, or simulates one
//! - Exposes current values, history and device control over REST
//! - Streams engine events to WebSocket clients
//! - Records a history point on a fixed interval
//! - Optionally stores every reading in InfluxDB
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/status` - Refreshed values, device intents and timestamp
//! - `GET /api/history?metric=<name>` - Recorded points of one metric
//! - `POST /api/control` - Switch a device (`{"device": "fan", "status": true}`)
//! - `GET /api/connection` - Controller connection status
//! - `POST /api/connection/reconnect` - Search for a controller again
//! - `GET /api/storage` - InfluxDB sink status
//! - `WS /api/ws` - Real-time engine events
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/greenhouse/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [serial]
//! enabled = true
//! baud_rate = 9600
//! port_patterns = ["usbmodem", "usbserial", "ttyusb", "ttyacm", "com"]
//!
//! [history]
//! record_interval_secs = 3600
//! backfill = true
//!
//! [reconnect]
//! auto = true
//! max_attempts = 5
//!
//! [influxdb]
//! enabled = false
//! url = "http://localhost:8086"
//! org = "greenhouse"
//! bucket = "smart_greenhouse"
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod influx;
pub mod state;
pub mod ws;

pub use collector::Collector;
pub use config::{
    Config, ConfigError, HistoryConfig, InfluxDbConfig, ReconnectConfig, SerialConfig,
    ServerConfig, SimulationConfig,
};
pub use influx::{InfluxSink, InfluxWriter, StorageStatus};
pub use state::AppState;
