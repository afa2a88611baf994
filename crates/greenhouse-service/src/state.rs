//! Application state shared across handlers.
//!
//! The engine is built in `main` and injected here; every handler and
//! background task reaches it through the same `Arc<AppState>`.

use std::sync::Arc;

use greenhouse_core::Engine;
use time::OffsetDateTime;

use crate::config::Config;
use crate::influx::{StorageStats, StorageStatus};

/// Shared application state.
pub struct AppState {
    /// The acquisition engine.
    pub engine: Engine,
    /// Configuration the service was started with.
    pub config: Config,
    /// Counters of the InfluxDB sink, if one is running.
    pub storage: Option<Arc<StorageStats>>,
    /// When the service started.
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Create new application state.
    pub fn new(engine: Engine, config: Config, storage: Option<Arc<StorageStats>>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            config,
            storage,
            started_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn storage_status(&self) -> StorageStatus {
        self.storage
            .as_ref()
            .map_or_else(StorageStatus::disabled, |stats| stats.status())
    }
}
