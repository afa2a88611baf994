//! Core types for greenhouse sensor data and actuator state.

use core::fmt;
use core::str::FromStr;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::ParseError;

/// A measured or derived quantity of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Metric {
    /// Air temperature in °C.
    Temperature,
    /// Relative humidity in %.
    Humidity,
    /// Soil moisture in %.
    Soil,
    /// Derived power draw in W.
    Power,
    /// CO₂ concentration in ppm (hardware only).
    Co2,
    /// Light level as the raw ADC code reported by the controller (hardware only).
    Light,
}

impl Metric {
    /// Every known metric, in display order.
    pub const ALL: [Metric; 6] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Soil,
        Metric::Power,
        Metric::Co2,
        Metric::Light,
    ];

    /// Metrics that are always present in a [`Reading`].
    pub const CORE: [Metric; 4] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Power,
        Metric::Soil,
    ];

    /// The wire/API name of the metric.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Soil => "soil",
            Metric::Power => "power",
            Metric::Co2 => "co2",
            Metric::Light => "light",
        }
    }

    /// Inclusive physical bounds `(min, max)` for this metric.
    ///
    /// ```
    /// use greenhouse_types::Metric;
    ///
    /// assert_eq!(Metric::Temperature.bounds(), (10.0, 40.0));
    /// assert_eq!(Metric::Power.bounds(), (50.0, 300.0));
    /// ```
    #[must_use]
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            Metric::Temperature => (10.0, 40.0),
            Metric::Humidity => (20.0, 100.0),
            Metric::Soil => (0.0, 100.0),
            Metric::Power => (50.0, 300.0),
            Metric::Co2 => (0.0, 10_000.0),
            Metric::Light => (0.0, 1023.0),
        }
    }

    /// Clamp a value into this metric's bounds.
    ///
    /// NaN is mapped to the lower bound so the invariant holds for any input.
    #[must_use]
    pub fn clamp_value(&self, value: f64) -> f64 {
        let (min, max) = self.bounds();
        if value.is_nan() {
            return min;
        }
        value.clamp(min, max)
    }

    /// Whether `value` lies within this metric's bounds.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        let (min, max) = self.bounds();
        (min..=max).contains(&value)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseError::UnknownMetric(s.to_string()))
    }
}

/// A controllable actuator of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Actuator {
    /// Ventilation fan.
    Fan,
    /// Irrigation pump.
    Water,
    /// Grow light.
    Light,
    /// Window servo.
    Window,
}

impl Actuator {
    /// Every known actuator.
    pub const ALL: [Actuator; 4] = [
        Actuator::Fan,
        Actuator::Water,
        Actuator::Light,
        Actuator::Window,
    ];

    /// The logical device id used by consumers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Actuator::Fan => "fan",
            Actuator::Water => "water",
            Actuator::Light => "light",
            Actuator::Window => "window",
        }
    }
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actuator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Actuator::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ParseError::UnknownDevice(s.to_string()))
    }
}

/// Logical on/off intent for every actuator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceState {
    pub fan: bool,
    pub water: bool,
    pub light: bool,
    pub window: bool,
}

impl DeviceState {
    /// Current intent for an actuator.
    #[must_use]
    pub fn get(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Fan => self.fan,
            Actuator::Water => self.water,
            Actuator::Light => self.light,
            Actuator::Window => self.window,
        }
    }

    /// Set the intent for an actuator, returning the previous value.
    pub fn set(&mut self, actuator: Actuator, on: bool) -> bool {
        let slot = match actuator {
            Actuator::Fan => &mut self.fan,
            Actuator::Water => &mut self.water,
            Actuator::Light => &mut self.light,
            Actuator::Window => &mut self.window,
        };
        std::mem::replace(slot, on)
    }

    /// Iterate over `(actuator, intent)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Actuator, bool)> + '_ {
        Actuator::ALL.into_iter().map(|a| (a, self.get(a)))
    }

    /// Actuators that are currently switched on.
    pub fn active(&self) -> impl Iterator<Item = Actuator> + '_ {
        self.iter().filter_map(|(a, on)| on.then_some(a))
    }
}

/// A complete snapshot of the installation's metrics.
///
/// The four core metrics are always present; CO₂ and light are only known
/// once a controller has reported them.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %.
    pub humidity: f64,
    /// Power draw in W.
    pub power: f64,
    /// Soil moisture in %.
    pub soil: f64,
    /// CO₂ in ppm.
    #[cfg_attr(feature = "serde", serde(default))]
    pub co2: Option<f64>,
    /// Light level (raw code).
    #[cfg_attr(feature = "serde", serde(default))]
    pub light: Option<f64>,
}

impl Default for Reading {
    fn default() -> Self {
        Self {
            temperature: 23.5,
            humidity: 58.0,
            power: 135.0,
            soil: 42.0,
            co2: None,
            light: None,
        }
    }
}

impl Reading {
    /// Value of a metric, if present.
    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Temperature => Some(self.temperature),
            Metric::Humidity => Some(self.humidity),
            Metric::Power => Some(self.power),
            Metric::Soil => Some(self.soil),
            Metric::Co2 => self.co2,
            Metric::Light => self.light,
        }
    }

    /// Overwrite a metric.
    pub fn set(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::Temperature => self.temperature = value,
            Metric::Humidity => self.humidity = value,
            Metric::Power => self.power = value,
            Metric::Soil => self.soil = value,
            Metric::Co2 => self.co2 = Some(value),
            Metric::Light => self.light = Some(value),
        }
    }

    /// Clamp every present metric into its physical bounds.
    pub fn clamp(&mut self) {
        for metric in Metric::ALL {
            if let Some(value) = self.get(metric) {
                self.set(metric, metric.clamp_value(value));
            }
        }
    }

    /// Whether every present metric is within bounds.
    #[must_use]
    pub fn is_within_bounds(&self) -> bool {
        self.iter().all(|(m, v)| m.contains(v))
    }

    /// Iterate over present `(metric, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|m| self.get(m).map(|v| (m, v)))
    }
}

/// A subset of metrics decoded from a single telemetry line.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PartialReading {
    values: BTreeMap<Metric, f64>,
}

impl PartialReading {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.values.insert(metric, value);
    }

    #[must_use]
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.values.iter().map(|(m, v)| (*m, *v))
    }
}

/// Lifecycle of the hardware link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// No endpoint attached; values are simulated.
    #[default]
    Disconnected,
    /// Enumerating endpoints and running the handshake.
    Connecting,
    /// A handshake-verified endpoint is attached.
    Connected,
    /// A previously connected endpoint stopped producing data; values are
    /// simulated until an explicit reconnect.
    Degraded,
}

impl ConnectionState {
    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// A reset to [`ConnectionState::Disconnected`] is always allowed.
    ///
    /// ```
    /// use greenhouse_types::ConnectionState::*;
    ///
    /// assert!(Disconnected.can_transition_to(Connecting));
    /// assert!(Connected.can_transition_to(Degraded));
    /// assert!(!Disconnected.can_transition_to(Connected));
    /// assert!(Degraded.can_transition_to(Disconnected));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Degraded)
                | (Degraded, Connecting)
        )
    }

    /// Whether hardware values are being used.
    #[must_use]
    pub fn is_hardware(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// The acquisition mode implied by this state.
    #[must_use]
    pub fn mode(&self) -> Mode {
        if self.is_hardware() {
            Mode::Hardware
        } else {
            Mode::Simulation
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Degraded => write!(f, "degraded"),
        }
    }
}

/// Where the current values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Mode {
    Hardware,
    Simulation,
}

impl Mode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Hardware => "hardware",
            Mode::Simulation => "simulation",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded value of a metric.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HistoryPoint {
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

/// Round to one decimal place, the precision the installation reports.
#[must_use]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
