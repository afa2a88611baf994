//! Wire codec for the greenhouse controller's line protocol.
//!
//! The controller speaks newline-terminated ASCII/UTF-8 over a serial line.
//!
//! Outbound commands are `MANUAL_<DEVICE>_<ON|OFF>` plus the `STATUS` probe.
//! Inbound telemetry lines use the firmware's Korean labels, for example:
//!
//! ```text
//! 온도: 25.0 °C, CO2: 350, 조도: 15, 토양 수분: 650
//! ```
//!
//! | Token | Metric | Payload |
//! |-------|--------|---------|
//! | `온도:` | temperature | decimal °C |
//! | `CO2:` | co2 | integer ppm |
//! | `조도:` | light | integer raw code |
//! | `토양 수분:` | soil | integer raw code 0–1023, inverted |

use std::sync::LazyLock;

use greenhouse_types::{Actuator, Metric, ParseError, ParseResult, PartialReading, round1};
use regex::Regex;
use tracing::warn;

/// Status probe sent during the handshake.
pub const STATUS_PROBE: &str = "STATUS";

/// Markers that identify a status reply from the controller.
///
/// The first is the "system status" banner, the second the temperature token
/// that every telemetry line starts with.
pub const STATUS_MARKERS: [&str; 2] = ["시스템 상태", "온도:"];

/// Full-scale value of the controller's 10-bit ADC.
pub const ADC_FULL_SCALE: f64 = 1023.0;

static TEMPERATURE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"온도:\s*(-?[\d.]+)").expect("valid temperature pattern"));
static CO2: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CO2:\s*(\d+)").expect("valid co2 pattern"));
static LIGHT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"조도:\s*(\d+)").expect("valid light pattern"));
static SOIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"토양\s*수분:\s*(\d+)").expect("valid soil pattern"));

/// Firmware name of an actuator in command strings.
fn wire_name(actuator: Actuator) -> &'static str {
    match actuator {
        Actuator::Fan => "FAN",
        Actuator::Water => "PUMP",
        Actuator::Light => "LED",
        Actuator::Window => "WINDOW",
    }
}

/// Build the command line for a typed actuator.
///
/// ```
/// use greenhouse_core::codec::command_for;
/// use greenhouse_types::Actuator;
///
/// assert_eq!(command_for(Actuator::Water, true), "MANUAL_PUMP_ON");
/// assert_eq!(command_for(Actuator::Light, false), "MANUAL_LED_OFF");
/// ```
#[must_use]
pub fn command_for(actuator: Actuator, on: bool) -> String {
    format!(
        "MANUAL_{}_{}",
        wire_name(actuator),
        if on { "ON" } else { "OFF" }
    )
}

/// Translate a logical device id and intent into a wire command.
///
/// Fails with [`ParseError::UnknownDevice`] for anything but the four known ids.
pub fn encode(device: &str, on: bool) -> ParseResult<String> {
    let actuator: Actuator = device.parse()?;
    Ok(command_for(actuator, on))
}

/// Convert the inverted raw soil sensor code to a moisture percentage.
///
/// ```
/// use greenhouse_core::codec::soil_percent;
///
/// assert_eq!(soil_percent(0), 100.0);
/// assert_eq!(soil_percent(1023), 0.0);
/// assert_eq!(soil_percent(650), 36.5);
/// ```
#[must_use]
pub fn soil_percent(raw: u32) -> f64 {
    round1((100.0 - f64::from(raw) / ADC_FULL_SCALE * 100.0).max(0.0))
}

/// Decode one telemetry line into the metrics it carries.
///
/// Missing tokens are simply absent from the result. Integer fields take the
/// leading digits after their label, so a trailing unit is ignored. A payload
/// that does not fit is dropped and logged; decoding never fails.
pub fn decode(line: &str) -> PartialReading {
    let mut reading = PartialReading::new();

    if let Some(raw) = capture(&TEMPERATURE, line) {
        match parse_decimal("온도", raw) {
            Ok(value) => reading.insert(Metric::Temperature, value),
            Err(e) => warn!("Dropping telemetry field: {}", e),
        }
    }
    if let Some(raw) = capture(&CO2, line) {
        match parse_integer("CO2", raw) {
            Ok(value) => reading.insert(Metric::Co2, f64::from(value)),
            Err(e) => warn!("Dropping telemetry field: {}", e),
        }
    }
    if let Some(raw) = capture(&LIGHT, line) {
        match parse_integer("조도", raw) {
            Ok(value) => reading.insert(Metric::Light, f64::from(value)),
            Err(e) => warn!("Dropping telemetry field: {}", e),
        }
    }
    if let Some(raw) = capture(&SOIL, line) {
        match parse_integer("토양 수분", raw) {
            Ok(value) => reading.insert(Metric::Soil, soil_percent(value)),
            Err(e) => warn!("Dropping telemetry field: {}", e),
        }
    }

    reading
}

/// Whether a line received during the handshake identifies the controller.
#[must_use]
pub fn is_status_reply(line: &str) -> bool {
    STATUS_MARKERS.iter().any(|marker| line.contains(marker))
}

fn capture<'a>(pattern: &Regex, line: &'a str) -> Option<&'a str> {
    pattern
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn parse_decimal(token: &str, raw: &str) -> ParseResult<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(token, raw))
}

fn parse_integer(token: &str, raw: &str) -> ParseResult<u32> {
    raw.parse::<u32>().map_err(|_| invalid(token, raw))
}

fn invalid(token: &str, raw: &str) -> ParseError {
    ParseError::InvalidValue {
        token: token.to_string(),
        value: raw.to_string(),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Decoding arbitrary text never panics.
        #[test]
        fn decode_never_panics(line in ".*") {
            let _ = decode(&line);
        }

        /// Any raw soil code maps into 0..=100.
        #[test]
        fn soil_percent_in_range(raw in any::<u32>()) {
            let pct = soil_percent(raw);
            prop_assert!((0.0..=100.0).contains(&pct));
        }

        /// A decoded temperature token always round-trips.
        #[test]
        fn decode_temperature_roundtrip(t in 0u32..500) {
            let value = f64::from(t) / 10.0;
            let reading = decode(&format!("온도: {:.1} °C", value));
            prop_assert_eq!(reading.get(Metric::Temperature), Some(value));
        }
    }
}
