//! Dual-source value synthesis.
//!
//! [`Synthesizer::refresh`] produces the next [`Reading`]. With a controller
//! attached, temperature, soil, CO₂ and light come from the latest telemetry
//! while humidity and power are computed from the device state. Without one,
//! every core metric follows a bounded random walk nudged by the active
//! devices, and CO₂ and light are unknown.
//!
//! The randomness source is a seedable [`StdRng`] so tests can replay a run.

use greenhouse_types::{Actuator, DeviceState, Metric, Reading, round1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ingestor::TelemetrySnapshot;

/// Humidity the computed hardware-mode estimate starts from, in %.
pub const BASE_HUMIDITY: f64 = 58.0;

/// Power drawn with every device off, in W.
pub const BASE_POWER: f64 = 50.0;

/// Mean outside humidity the open window mixes in, in %.
pub const EXTERNAL_HUMIDITY: f64 = 50.0;

/// Power added by an active device in hardware mode, in W.
#[must_use]
pub fn device_power(actuator: Actuator) -> f64 {
    match actuator {
        Actuator::Fan => 25.0,
        Actuator::Water => 15.0,
        Actuator::Light => 40.0,
        Actuator::Window => 5.0,
    }
}

/// Noise amplitudes used by the synthesizer.
///
/// Each value is the half-width of a uniform distribution centred on zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    /// Random-walk step for temperature, in °C.
    pub temperature_step: f64,
    /// Random-walk step for humidity, in %.
    pub humidity_step: f64,
    /// Random-walk step for power, in W.
    pub power_step: f64,
    /// Random-walk step for soil moisture, in %.
    pub soil_step: f64,
    /// Jitter on the computed hardware-mode power, in W.
    pub power_jitter: f64,
    /// Spread of the outside humidity around [`EXTERNAL_HUMIDITY`], in %.
    pub external_humidity_spread: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            temperature_step: 0.5,
            humidity_step: 1.0,
            power_step: 2.0,
            soil_step: 0.5,
            power_jitter: 5.0,
            external_humidity_spread: 10.0,
        }
    }
}

impl SimulationProfile {
    /// A profile without any noise: every refresh is fully determined by
    /// the device state.
    pub fn quiet() -> Self {
        Self {
            temperature_step: 0.0,
            humidity_step: 0.0,
            power_step: 0.0,
            soil_step: 0.0,
            power_jitter: 0.0,
            external_humidity_spread: 0.0,
        }
    }
}

/// Stateful producer of bounded readings.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    reading: Reading,
    rng: StdRng,
    profile: SimulationProfile,
}

impl Synthesizer {
    /// Create a synthesizer seeded from the operating system.
    pub fn new(initial: Reading) -> Self {
        Self::with_rng(initial, StdRng::from_os_rng())
    }

    /// Create a synthesizer with a fixed seed.
    pub fn seeded(initial: Reading, seed: u64) -> Self {
        Self::with_rng(initial, StdRng::seed_from_u64(seed))
    }

    fn with_rng(initial: Reading, rng: StdRng) -> Self {
        let mut reading = initial;
        reading.clamp();
        Self {
            reading,
            rng,
            profile: SimulationProfile::default(),
        }
    }

    /// Replace the noise profile.
    pub fn with_profile(mut self, profile: SimulationProfile) -> Self {
        self.profile = profile;
        self
    }

    /// The last produced reading.
    pub fn reading(&self) -> Reading {
        self.reading
    }

    pub fn profile(&self) -> &SimulationProfile {
        &self.profile
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Advance to the next reading.
    ///
    /// `telemetry` is the latest controller snapshot when hardware is
    /// attached, `None` in simulation.
    pub fn refresh(&mut self, telemetry: Option<&TelemetrySnapshot>, devices: &DeviceState) -> Reading {
        match telemetry {
            Some(snapshot) => self.refresh_hardware(snapshot, devices),
            None => self.refresh_simulated(devices),
        }
        self.reading.clamp();
        self.reading
    }

    fn refresh_hardware(&mut self, snapshot: &TelemetrySnapshot, devices: &DeviceState) {
        for metric in [Metric::Temperature, Metric::Soil, Metric::Co2, Metric::Light] {
            if let Some(value) = snapshot.get(metric) {
                self.reading.set(metric, value);
            }
        }

        let humidity = self.estimate_humidity(snapshot.get(Metric::Temperature), devices);
        self.reading.humidity = humidity;

        let load: f64 = devices.active().map(device_power).sum();
        let jitter = self.jitter(self.profile.power_jitter);
        self.reading.power = round1(BASE_POWER + load + jitter);
    }

    /// Humidity estimate from the window position and the measured temperature.
    fn estimate_humidity(&mut self, temperature: Option<f64>, devices: &DeviceState) -> f64 {
        let mut humidity = BASE_HUMIDITY;

        if devices.window {
            humidity = 0.9 * humidity + 0.1 * self.external_humidity();
        }

        if let Some(t) = temperature {
            if t > 25.0 {
                humidity -= (t - 25.0) * 2.0;
            } else if t < 20.0 {
                humidity += (20.0 - t) * 1.5;
            }
        }

        round1(Metric::Humidity.clamp_value(humidity))
    }

    fn refresh_simulated(&mut self, devices: &DeviceState) {
        let p = self.profile;
        let r = &mut self.reading;

        // No sensor to report these without hardware.
        r.co2 = None;
        r.light = None;

        // Draw order is fixed so a seed replays identically.
        let dt = jitter(&mut self.rng, p.temperature_step);
        let dh = jitter(&mut self.rng, p.humidity_step);
        let dp = jitter(&mut self.rng, p.power_step);
        let ds = jitter(&mut self.rng, p.soil_step);

        r.temperature = round1(r.temperature + dt);
        r.humidity = round1(r.humidity + dh);
        r.power = round1(r.power + dp);
        r.soil = round1(r.soil + ds);

        if devices.fan {
            r.temperature -= 0.2;
            r.power += 5.0;
        }
        if devices.water {
            r.soil += 0.5;
            r.power += 3.0;
        }
        if devices.light {
            r.temperature += 0.1;
            r.power += 10.0;
        }
        if devices.window {
            let outside = EXTERNAL_HUMIDITY + jitter(&mut self.rng, p.external_humidity_spread);
            r.humidity = 0.9 * r.humidity + 0.1 * outside;
        }

        r.temperature = round1(r.temperature);
        r.humidity = round1(r.humidity);
        r.power = round1(r.power);
        r.soil = round1(r.soil);
    }

    fn external_humidity(&mut self) -> f64 {
        EXTERNAL_HUMIDITY + self.jitter(self.profile.external_humidity_spread)
    }

    fn jitter(&mut self, amplitude: f64) -> f64 {
        jitter(&mut self.rng, amplitude)
    }
}

/// Uniform noise in `[-amplitude, amplitude]`; zero for a non-positive amplitude.
pub(crate) fn jitter<R: Rng + ?Sized>(rng: &mut R, amplitude: f64) -> f64 {
    if amplitude > 0.0 {
        rng.random_range(-amplitude..=amplitude)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_types::PartialReading;
    use time::OffsetDateTime;

    fn devices(active: &[Actuator]) -> DeviceState {
        let mut state = DeviceState::default();
        for a in active {
            state.set(*a, true);
        }
        state
    }

    fn snapshot(values: &[(Metric, f64)]) -> TelemetrySnapshot {
        let mut partial = PartialReading::new();
        for (m, v) in values {
            partial.insert(*m, *v);
        }
        let mut snapshot = TelemetrySnapshot::default();
        snapshot.merge(&partial, OffsetDateTime::now_utc());
        snapshot
    }

    #[test]
    fn test_quiet_simulation_applies_device_effects() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let reading = synth.refresh(None, &devices(&[Actuator::Fan]));
        assert_eq!(reading.temperature, 23.3);
        assert_eq!(reading.power, 140.0);
        assert_eq!(reading.humidity, 58.0);
        assert_eq!(reading.soil, 42.0);

        let reading = synth.refresh(None, &devices(&[Actuator::Water, Actuator::Light]));
        assert_eq!(reading.temperature, 23.4);
        assert_eq!(reading.soil, 42.5);
        assert_eq!(reading.power, 153.0);
    }

    #[test]
    fn test_quiet_window_mixes_outside_humidity() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let reading = synth.refresh(None, &devices(&[Actuator::Window]));
        // 0.9 * 58 + 0.1 * 50
        assert_eq!(reading.humidity, 57.2);
    }

    #[test]
    fn test_fan_cools_relative_to_same_seed() {
        let mut with_fan = Synthesizer::seeded(Reading::default(), 42);
        let mut without = Synthesizer::seeded(Reading::default(), 42);

        let a = with_fan.refresh(None, &devices(&[Actuator::Fan]));
        let b = without.refresh(None, &DeviceState::default());
        assert!(a.temperature < b.temperature);
        assert!(a.power > b.power);
    }

    #[test]
    fn test_simulation_walk_stays_near_previous() {
        let mut synth = Synthesizer::seeded(Reading::default(), 7);
        let reading = synth.refresh(None, &DeviceState::default());
        assert!((reading.temperature - 23.5).abs() <= 0.5 + 1e-9);
        assert!((reading.humidity - 58.0).abs() <= 1.0 + 1e-9);
        assert!((reading.power - 135.0).abs() <= 2.0 + 1e-9);
        assert!((reading.soil - 42.0).abs() <= 0.5 + 1e-9);
        assert_eq!(reading.co2, None);
    }

    #[test]
    fn test_simulation_clamps_at_bounds() {
        let initial = Reading {
            temperature: 10.0,
            power: 300.0,
            ..Reading::default()
        };
        let mut synth = Synthesizer::seeded(initial, 3).with_profile(SimulationProfile::quiet());
        let reading = synth.refresh(None, &devices(&[Actuator::Fan, Actuator::Light]));
        assert_eq!(reading.temperature, 10.0);
        assert_eq!(reading.power, 300.0);
    }

    #[test]
    fn test_hardware_uses_telemetry_and_computes_humidity() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let telemetry = snapshot(&[
            (Metric::Temperature, 30.0),
            (Metric::Soil, 36.5),
            (Metric::Co2, 350.0),
            (Metric::Light, 15.0),
        ]);
        let reading = synth.refresh(Some(&telemetry), &devices(&[Actuator::Fan, Actuator::Light]));
        assert_eq!(reading.temperature, 30.0);
        assert_eq!(reading.soil, 36.5);
        assert_eq!(reading.co2, Some(350.0));
        assert_eq!(reading.light, Some(15.0));
        // 58 - (30 - 25) * 2
        assert_eq!(reading.humidity, 48.0);
        assert_eq!(reading.power, 115.0);
    }

    #[test]
    fn test_simulation_drops_hardware_only_metrics() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let telemetry = snapshot(&[(Metric::Co2, 350.0), (Metric::Light, 15.0)]);
        let reading = synth.refresh(Some(&telemetry), &DeviceState::default());
        assert_eq!(reading.co2, Some(350.0));

        let reading = synth.refresh(None, &DeviceState::default());
        assert_eq!(reading.co2, None);
        assert_eq!(reading.light, None);
        assert_eq!(synth.reading().co2, None);
    }

    #[test]
    fn test_hardware_cold_raises_humidity() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let telemetry = snapshot(&[(Metric::Temperature, 16.0)]);
        let reading = synth.refresh(Some(&telemetry), &DeviceState::default());
        assert_eq!(reading.humidity, 64.0);
        assert_eq!(reading.power, 50.0);
    }

    #[test]
    fn test_hardware_keeps_previous_values_when_missing() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1).with_profile(SimulationProfile::quiet());
        let reading = synth.refresh(Some(&TelemetrySnapshot::default()), &DeviceState::default());
        assert_eq!(reading.temperature, 23.5);
        assert_eq!(reading.soil, 42.0);
        assert_eq!(reading.humidity, BASE_HUMIDITY);
        assert_eq!(reading.co2, None);
    }

    #[test]
    fn test_hardware_power_jitter_bounded() {
        let mut synth = Synthesizer::seeded(Reading::default(), 99);
        for _ in 0..100 {
            let reading = synth.refresh(Some(&TelemetrySnapshot::default()), &devices(&[Actuator::Water]));
            assert!((60.0..=70.0).contains(&reading.power), "power {}", reading.power);
        }
    }

    #[test]
    fn test_hardware_out_of_range_telemetry_clamped() {
        let mut synth = Synthesizer::seeded(Reading::default(), 1);
        let telemetry = snapshot(&[(Metric::Temperature, 85.0)]);
        let reading = synth.refresh(Some(&telemetry), &DeviceState::default());
        assert_eq!(reading.temperature, 40.0);
        assert_eq!(reading.humidity, 20.0);
    }

    #[test]
    fn test_jitter_zero_amplitude() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(jitter(&mut rng, 0.0), 0.0);
        assert_eq!(jitter(&mut rng, -1.0), 0.0);
        let v = jitter(&mut rng, 2.0);
        assert!((-2.0..=2.0).contains(&v));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Every refreshed value stays within its physical bounds.
        #[test]
        fn refresh_stays_within_bounds(
            seed in any::<u64>(),
            temperature in 10.0f64..=40.0,
            humidity in 20.0f64..=100.0,
            soil in 0.0f64..=100.0,
            power in 50.0f64..=300.0,
            mask in 0u8..16,
            steps in 1usize..50,
        ) {
            let initial = Reading { temperature, humidity, soil, power, co2: None, light: None };
            let mut devices = DeviceState::default();
            for (i, a) in Actuator::ALL.into_iter().enumerate() {
                devices.set(a, mask & (1 << i) != 0);
            }
            let mut synth = Synthesizer::seeded(initial, seed);
            for _ in 0..steps {
                let reading = synth.refresh(None, &devices);
                prop_assert!(reading.is_within_bounds(), "{:?}", reading);
            }
        }
    }
}
