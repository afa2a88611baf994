//! Automatic reconnection after a lost controller.
//!
//! The engine itself never reconnects: a lost link leaves it `Degraded`
//! until someone calls [`Engine::reconnect`]. [`spawn_supervisor`] is that
//! someone. It watches the engine's events and, whenever the state turns
//! `Degraded`, retries with backoff until a controller answers, the attempts
//! run out, or the engine shuts down.

use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use greenhouse_types::ConnectionState;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::events::EngineEvent;

/// Options for automatic reconnection.
///
/// The delay doubles after every failed attempt, starting at
/// `initial_delay` and capped at `max_delay`. Equal delays retry at a fixed
/// pace.
#[derive(Debug, Clone)]
pub struct ReconnectOptions {
    /// Maximum number of reconnection attempts (None = unlimited).
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl ReconnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create options with unlimited retry attempts.
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before attempt number `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Check that `initial_delay` is non-zero and not above `max_delay`.
    pub fn validate(&self) -> Result<()> {
        if self.initial_delay.is_zero() {
            return Err(Error::invalid_config("initial_delay must be > 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::invalid_config("max_delay must be >= initial_delay"));
        }
        Ok(())
    }
}

/// Spawn a task that reconnects `engine` whenever it degrades.
///
/// The task ends when the engine shuts down.
pub fn spawn_supervisor(engine: Engine, options: ReconnectOptions) -> JoinHandle<()> {
    tokio::spawn(supervise(engine, options))
}

async fn supervise(engine: Engine, options: ReconnectOptions) {
    let shutdown = engine.shutdown_token();
    let mut events = engine.subscribe();
    debug!("Reconnect supervisor started");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(EngineEvent::ConnectionChanged {
                to: ConnectionState::Degraded,
                ..
            }) => {}
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!("Reconnect supervisor skipped {} events", skipped);
                if engine.connection_state() != ConnectionState::Degraded {
                    continue;
                }
            }
            Err(RecvError::Closed) => break,
        }

        recover(&engine, &options, &shutdown).await;
    }

    debug!("Reconnect supervisor stopped");
}

/// Retry until connected. Returns whether a controller is attached.
async fn recover(engine: &Engine, options: &ReconnectOptions, shutdown: &CancellationToken) -> bool {
    let mut attempt = 0u32;
    loop {
        if let Some(max) = options.max_attempts
            && attempt >= max
        {
            warn!("Giving up on the controller after {} attempt(s)", attempt);
            engine
                .events()
                .send(EngineEvent::ReconnectFailed { attempts: attempt });
            return false;
        }

        let delay = options.delay_for_attempt(attempt);
        tokio::select! {
            _ = shutdown.cancelled() => return false,
            _ = sleep(delay) => {}
        }

        // A manual reconnect may have beaten us to it.
        if engine.is_connected() {
            return true;
        }

        attempt += 1;
        info!("Reconnection attempt {}", attempt);
        engine
            .events()
            .send(EngineEvent::ReconnectStarted { attempt });

        if engine.reconnect().await {
            info!("Reconnected after {} attempt(s)", attempt);
            engine
                .events()
                .send(EngineEvent::ReconnectSucceeded { attempts: attempt });
            return true;
        }
    }
}
