//! The acquisition and control engine.
//!
//! [`Engine`] ties the pieces together: it runs the connection manager,
//! owns the ingestor task, feeds telemetry to the synthesizer, relays device
//! intents to the controller and records history.
//!
//! All mutable state lives behind one `std::sync::Mutex` that is never held
//! across I/O or an `.await`. Telemetry arrives over a `watch` channel, so a
//! refresh never waits for the ingestor. Connect, reconnect and shutdown are
//! serialized by a separate async lock that also owns the ingestor handle.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use greenhouse_core::{Engine, EngineOptions, SerialProvider};
//!
//! # async fn run() {
//! let engine = Engine::new(Arc::new(SerialProvider::new()), EngineOptions::default());
//! if !engine.attempt_connect().await {
//!     println!("no controller, simulating");
//! }
//! engine.set_device("fan", true);
//! let reading = engine.refresh();
//! println!("{:.1} °C", reading.temperature);
//! engine.shutdown().await;
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use greenhouse_types::{ConnectionState, DeviceState, HistoryPoint, Mode, Reading};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::{ConnectOptions, connect_first};
use crate::controller::DeviceController;
use crate::error::{Error, Result};
use crate::events::{DEFAULT_EVENT_CAPACITY, EngineEvent, EventDispatcher, EventReceiver};
use crate::history::{DEFAULT_CAPACITY, HistoryRecorder};
use crate::ingestor::{DEFAULT_READ_POLL, IngestExit, Ingestor, TelemetrySnapshot};
use crate::sink::{SinkRecord, TelemetrySink};
use crate::synthesizer::{SimulationProfile, Synthesizer};
use crate::transport::TransportProvider;

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Look for a controller at all. When false the engine only simulates.
    pub hardware: bool,
    /// Discovery and handshake options.
    pub connect: ConnectOptions,
    /// Idle poll interval of the ingestor.
    pub read_poll: Duration,
    /// Values before the first refresh.
    pub initial: Reading,
    /// Noise amplitudes.
    pub profile: SimulationProfile,
    /// Fixed RNG seed; `None` seeds from the operating system.
    pub seed: Option<u64>,
    /// History points kept per metric.
    pub history_capacity: usize,
    /// Seed the history with a day of hourly points at construction.
    pub backfill: bool,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            hardware: true,
            connect: ConnectOptions::default(),
            read_poll: DEFAULT_READ_POLL,
            initial: Reading::default(),
            profile: SimulationProfile::default(),
            seed: None,
            history_capacity: DEFAULT_CAPACITY,
            backfill: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a pure simulation engine.
    pub fn simulation() -> Self {
        Self {
            hardware: false,
            ..Default::default()
        }
    }

    pub fn hardware(mut self, enabled: bool) -> Self {
        self.hardware = enabled;
        self
    }

    pub fn connect(mut self, connect: ConnectOptions) -> Self {
        self.connect = connect;
        self
    }

    pub fn read_poll(mut self, poll: Duration) -> Self {
        self.read_poll = poll;
        self
    }

    pub fn initial(mut self, reading: Reading) -> Self {
        self.initial = reading;
        self
    }

    pub fn profile(mut self, profile: SimulationProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn backfill(mut self, enabled: bool) -> Self {
        self.backfill = enabled;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate the options and return an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.hardware {
            self.connect.validate()?;
        }
        if self.read_poll.is_zero() {
            return Err(Error::invalid_config("read_poll must be > 0"));
        }
        if self.history_capacity == 0 {
            return Err(Error::invalid_config("history_capacity must be > 0"));
        }
        if !self.initial.is_within_bounds() {
            return Err(Error::invalid_config(
                "initial values must be within their physical bounds",
            ));
        }
        Ok(())
    }
}

/// Connection summary exposed to consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub endpoint: Option<String>,
    pub mode: Mode,
    pub state: ConnectionState,
}

struct EngineState {
    connection: ConnectionState,
    endpoint: Option<String>,
    controller: DeviceController,
    synthesizer: Synthesizer,
    history: HistoryRecorder,
    telemetry: Option<watch::Receiver<TelemetrySnapshot>>,
    commands: Option<mpsc::UnboundedSender<String>>,
}

impl EngineState {
    /// Move to `next` if the state machine allows it.
    ///
    /// Returns the event to publish, or `None` if nothing changed.
    fn transition(&mut self, next: ConnectionState) -> Option<EngineEvent> {
        let from = self.connection;
        if from == next {
            return None;
        }
        if !from.can_transition_to(next) {
            warn!("Ignoring connection transition {} -> {}", from, next);
            return None;
        }

        self.connection = next;
        match next {
            ConnectionState::Disconnected => {
                self.endpoint = None;
                self.telemetry = None;
                self.commands = None;
            }
            ConnectionState::Degraded => {
                self.telemetry = None;
                self.commands = None;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        info!("Connection {} -> {}", from, next);

        Some(EngineEvent::ConnectionChanged {
            from,
            to: next,
            endpoint: self.endpoint.clone(),
        })
    }
}

struct IngestorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Inner {
    provider: Arc<dyn TransportProvider>,
    options: EngineOptions,
    state: Mutex<EngineState>,
    ingestor: tokio::sync::Mutex<Option<IngestorHandle>>,
    sink: Option<Arc<dyn TelemetrySink>>,
    events: EventDispatcher,
    shutdown: CancellationToken,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        // No invariant spans a panic point, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, next: ConnectionState) {
        let event = self.lock_state().transition(next);
        if let Some(event) = event {
            self.events.send(event);
        }
    }

    /// Called when the ingestor lost the device.
    fn degrade(&self, reason: &str) {
        let event = {
            let mut state = self.lock_state();
            if state.connection != ConnectionState::Connected {
                return;
            }
            state.transition(ConnectionState::Degraded)
        };
        warn!("Controller lost ({}); falling back to simulation", reason);
        if let Some(event) = event {
            self.events.send(event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Handle to the engine. Cheap to clone; all clones share one engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.connection_state())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine. No endpoint is probed until [`Engine::attempt_connect`].
    pub fn new(provider: Arc<dyn TransportProvider>, options: EngineOptions) -> Self {
        Self::build(provider, options, None)
    }

    /// Create an engine that feeds every refresh to `sink`.
    pub fn with_sink(
        provider: Arc<dyn TransportProvider>,
        options: EngineOptions,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self::build(provider, options, Some(sink))
    }

    fn build(
        provider: Arc<dyn TransportProvider>,
        options: EngineOptions,
        sink: Option<Arc<dyn TelemetrySink>>,
    ) -> Self {
        let synthesizer = match options.seed {
            Some(seed) => Synthesizer::seeded(options.initial, seed),
            None => Synthesizer::new(options.initial),
        };
        let mut synthesizer = synthesizer.with_profile(options.profile);

        let mut history = HistoryRecorder::new(options.history_capacity);
        if options.backfill {
            let base = synthesizer.reading();
            history.backfill(&base, OffsetDateTime::now_utc(), synthesizer.rng());
        }

        let state = EngineState {
            connection: ConnectionState::Disconnected,
            endpoint: None,
            controller: DeviceController::new(),
            synthesizer,
            history,
            telemetry: None,
            commands: None,
        };

        Self {
            inner: Arc::new(Inner {
                provider,
                events: EventDispatcher::new(options.event_capacity),
                options,
                state: Mutex::new(state),
                ingestor: tokio::sync::Mutex::new(None),
                sink,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Look for a controller and attach the first one that answers.
    ///
    /// Returns whether the engine is now connected. Failures are logged and
    /// leave the engine `Disconnected`; they are never returned.
    pub async fn attempt_connect(&self) -> bool {
        let mut slot = self.inner.ingestor.lock().await;
        if self.connection_state() == ConnectionState::Connected {
            return true;
        }
        // A degraded link leaves a finished ingestor behind.
        self.stop_locked(&mut slot).await;
        self.connect_locked(&mut slot).await
    }

    /// Drop the current link, reset to `Disconnected` and search again.
    pub async fn reconnect(&self) -> bool {
        let mut slot = self.inner.ingestor.lock().await;
        self.stop_locked(&mut slot).await;
        self.inner.transition(ConnectionState::Disconnected);
        self.connect_locked(&mut slot).await
    }

    /// Stop the ingestor, close the link and refuse further connects.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut slot = self.inner.ingestor.lock().await;
        self.stop_locked(&mut slot).await;
        self.inner.transition(ConnectionState::Disconnected);
        info!("Engine shut down");
    }

    async fn connect_locked(&self, slot: &mut Option<IngestorHandle>) -> bool {
        let inner = &self.inner;
        if !inner.options.hardware {
            debug!("Hardware disabled; staying in simulation");
            return false;
        }
        if inner.shutdown.is_cancelled() {
            return false;
        }

        inner.transition(ConnectionState::Connecting);

        let provider = Arc::clone(&inner.provider);
        let options = inner.options.connect.clone();
        let result = tokio::task::spawn_blocking(move || connect_first(provider.as_ref(), &options)).await;

        let connection = match result {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => {
                info!("No controller attached ({}); running in simulation", e);
                inner.transition(ConnectionState::Disconnected);
                return false;
            }
            Err(e) => {
                warn!("Connection task failed: {}", e);
                inner.transition(ConnectionState::Disconnected);
                return false;
            }
        };

        let (publisher, telemetry) = watch::channel(TelemetrySnapshot::default());
        let (commands, queue) = mpsc::unbounded_channel();
        let cancel = inner.shutdown.child_token();
        let endpoint = connection.endpoint;
        let ingestor = Ingestor::new(connection.transport, publisher, queue, cancel.clone())
            .poll_interval(inner.options.read_poll);

        let event = {
            let mut state = inner.lock_state();
            state.endpoint = Some(endpoint);
            state.telemetry = Some(telemetry);
            state.commands = Some(commands);
            state.transition(ConnectionState::Connected)
        };
        if let Some(event) = event {
            inner.events.send(event);
        }

        let blocking = tokio::task::spawn_blocking(move || ingestor.run());
        let weak = Arc::downgrade(inner);
        let task = tokio::spawn(async move {
            let exit = blocking
                .await
                .unwrap_or_else(|e| IngestExit::LinkLost(format!("ingestor task failed: {}", e)));
            if let IngestExit::LinkLost(reason) = exit
                && let Some(inner) = weak.upgrade()
            {
                inner.degrade(&reason);
            }
        });

        *slot = Some(IngestorHandle { cancel, task });
        true
    }

    async fn stop_locked(&self, slot: &mut Option<IngestorHandle>) {
        if let Some(handle) = slot.take() {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!("Ingestor task failed: {}", e);
            }
        }
    }

    /// Produce the next reading.
    ///
    /// Uses the latest telemetry while connected and advances the simulation
    /// otherwise. Every value is within its bounds. The result is also
    /// submitted to the sink and published as an event.
    pub fn refresh(&self) -> Reading {
        let now = OffsetDateTime::now_utc();
        let (reading, devices, mode) = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            let snapshot = match (state.connection, &state.telemetry) {
                (ConnectionState::Connected, Some(rx)) => Some(rx.borrow().clone()),
                _ => None,
            };
            let devices = state.controller.state();
            let reading = state.synthesizer.refresh(snapshot.as_ref(), &devices);
            (reading, devices, state.connection.mode())
        };

        if let Some(sink) = &self.inner.sink {
            sink.submit(SinkRecord::batch(&reading, &devices, mode, now));
        }
        self.inner.events.send(EngineEvent::Reading { mode, reading });
        reading
    }

    /// Set the intent of a device.
    ///
    /// Returns false for an unknown device id, leaving every device
    /// untouched. When the intent changed and a controller is attached the
    /// matching command is queued for it; delivery is best effort.
    pub fn set_device(&self, device: &str, on: bool) -> bool {
        let (change, queued) = {
            let mut state = self.inner.lock_state();
            let change = match state.controller.apply(device, on) {
                Ok(change) => change,
                Err(e) => {
                    debug!("Rejected control request: {}", e);
                    return false;
                }
            };
            let queued = match (&change.command, state.connection, &state.commands) {
                (Some(command), ConnectionState::Connected, Some(tx)) => Some(tx.send(command.clone())),
                _ => None,
            };
            (change, queued)
        };

        if let Some(Err(e)) = queued {
            warn!("Failed to queue {}: {}", e.0, Error::ChannelClosed);
        }
        if change.command.is_some() {
            info!("Device {} -> {}", change.actuator, if on { "on" } else { "off" });
            self.inner.events.send(EngineEvent::DeviceChanged {
                device: change.actuator,
                on,
            });
        }
        true
    }

    /// Current intent of every device.
    pub fn devices(&self) -> DeviceState {
        self.inner.lock_state().controller.state()
    }

    /// The last refreshed reading, without advancing.
    pub fn reading(&self) -> Reading {
        self.inner.lock_state().synthesizer.reading()
    }

    /// Append the last reading to the history.
    pub fn record_history(&self) -> Reading {
        let mut state = self.inner.lock_state();
        let reading = state.synthesizer.reading();
        state.history.record(&reading, OffsetDateTime::now_utc());
        reading
    }

    /// Recorded points of a metric; empty for an unknown metric.
    pub fn history(&self, metric: &str) -> Vec<HistoryPoint> {
        self.inner.lock_state().history.query(metric)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock_state().connection
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        let state = self.inner.lock_state();
        ConnectionStatus {
            connected: state.connection.is_hardware(),
            endpoint: state.endpoint.clone(),
            mode: state.connection.mode(),
            state: state.connection,
        }
    }

    /// Whether a controller is attached.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_hardware()
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub(crate) fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    /// Token cancelled by [`Engine::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.inner.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn simulation() -> Engine {
        Engine::new(
            Arc::new(MockProvider::new()),
            EngineOptions::simulation().seed(11),
        )
    }

    #[test]
    fn test_options_validate() {
        assert!(EngineOptions::default().validate().is_ok());
        assert!(EngineOptions::default().read_poll(Duration::ZERO).validate().is_err());
        assert!(EngineOptions::default().history_capacity(0).validate().is_err());
        let hot = Reading {
            temperature: 60.0,
            ..Reading::default()
        };
        assert!(EngineOptions::default().initial(hot).validate().is_err());
    }

    #[test]
    fn test_initial_status() {
        let engine = simulation();
        let status = engine.connection_status();
        assert!(!status.connected);
        assert_eq!(status.endpoint, None);
        assert_eq!(status.mode, Mode::Simulation);
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(engine.reading(), Reading::default());
        assert_eq!(engine.devices(), DeviceState::default());
    }

    #[tokio::test]
    async fn test_hardware_disabled_never_connects() {
        let provider = MockProvider::new();
        let link = provider.add_controller("/dev/ttyACM0");
        let engine = Engine::new(Arc::new(provider), EngineOptions::simulation());

        assert!(!engine.attempt_connect().await);
        assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
        assert!(link.written().is_empty());
    }

    #[test]
    fn test_unknown_device_rejected() {
        let engine = simulation();
        engine.set_device("fan", true);
        let before = engine.devices();
        assert!(!engine.set_device("heater", true));
        assert_eq!(engine.devices(), before);
    }

    #[test]
    fn test_history_records_last_reading() {
        let engine = simulation();
        let reading = engine.refresh();
        engine.record_history();
        let temps = engine.history("temperature");
        assert_eq!(temps.len(), 1);
        assert_eq!(temps[0].value, reading.temperature);
        assert!(engine.history("pressure").is_empty());
    }

    #[test]
    fn test_backfill_on_construction() {
        let engine = Engine::new(
            Arc::new(MockProvider::new()),
            EngineOptions::simulation().seed(1).backfill(true),
        );
        assert_eq!(engine.history("humidity").len(), 24);
        engine.record_history();
        assert_eq!(engine.history("humidity").len(), 24);
    }

    #[tokio::test]
    async fn test_events_for_device_and_reading() {
        let engine = simulation();
        let mut events = engine.subscribe();

        engine.set_device("window", true);
        // Same intent again: no event.
        engine.set_device("window", true);
        engine.refresh();

        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::DeviceChanged { on: true, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            EngineEvent::Reading {
                mode: Mode::Simulation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_blocks_connect() {
        let provider = MockProvider::new();
        provider.add_controller("/dev/ttyACM0");
        let engine = Engine::new(Arc::new(provider), EngineOptions::default());
        engine.shutdown().await;
        assert!(engine.shutdown_token().is_cancelled());
        assert!(!engine.attempt_connect().await);
    }
}
