//! Periodic history recording.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::state::AppState;

/// Background task that appends the latest reading to the history.
pub struct Collector {
    state: Arc<AppState>,
}

impl Collector {
    /// Create a new collector.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start recording at the configured interval.
    ///
    /// The first point is recorded one interval after start. The task stops
    /// when the engine shuts down.
    pub fn start(&self) -> JoinHandle<()> {
        let period = self.state.config.history.record_interval();
        let state = Arc::clone(&self.state);
        info!("Recording history every {}s", period.as_secs());
        tokio::spawn(record_history(state, period))
    }
}

async fn record_history(state: Arc<AppState>, period: Duration) {
    let shutdown = state.engine.shutdown_token();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("History collector received stop signal");
                break;
            }
            _ = ticker.tick() => {
                let reading = state.engine.record_history();
                debug!(
                    "Recorded history point: {:.1} °C, {:.1} %, {:.1} W, soil {:.1} %",
                    reading.temperature, reading.humidity, reading.power, reading.soil
                );
            }
        }
    }
}
