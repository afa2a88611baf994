//! Platform-agnostic types for greenhouse telemetry and actuators.
//!
//! This crate provides the shared vocabulary used by the acquisition engine
//! (greenhouse-core) and its consumers (greenhouse-service).
//!
//! # Features
//!
//! - Metric and actuator identifiers with their wire names
//! - Physical bounds for every metric
//! - Reading snapshots, partial readings and history points
//! - Connection state machine
//!
//! # Example
//!
//! ```
//! use greenhouse_types::{Metric, Reading};
//!
//! let mut reading = Reading::default();
//! reading.set(Metric::Temperature, 52.0);
//! reading.clamp();
//! assert_eq!(reading.temperature, 40.0);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{
    Actuator, ConnectionState, DeviceState, HistoryPoint, Metric, Mode, PartialReading, Reading,
    round1,
};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Clamping any value yields a value within bounds.
        #[test]
        fn clamp_is_always_within_bounds(value in any::<f64>(), index in 0usize..6) {
            let metric = Metric::ALL[index];
            prop_assert!(metric.contains(metric.clamp_value(value)));
        }

        /// Parsing arbitrary strings as identifiers never panics.
        #[test]
        fn parse_identifiers_never_panics(s in ".*") {
            let _ = s.parse::<Metric>();
            let _ = s.parse::<Actuator>();
        }
    }
}
