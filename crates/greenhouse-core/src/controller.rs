//! Logical device state.
//!
//! The controller owns the on/off intent of every actuator. It does not talk
//! to the transport itself: [`DeviceController::apply`] returns the wire
//! command to send when an intent actually changed, and the engine decides
//! whether a controller is attached to receive it.

use greenhouse_types::{Actuator, DeviceState, ParseResult};

use crate::codec;

/// Result of applying an intent to a known device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    pub actuator: Actuator,
    pub on: bool,
    /// Wire command to dispatch, present only if the intent changed.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeviceController {
    state: DeviceState,
}

impl DeviceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current intent of every device.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Record an intent for a device id.
    ///
    /// Unknown ids fail and leave the state untouched.
    pub fn apply(&mut self, device: &str, on: bool) -> ParseResult<DeviceChange> {
        let actuator: Actuator = device.parse()?;
        let previous = self.state.set(actuator, on);
        let command = (previous != on).then(|| codec::command_for(actuator, on));
        Ok(DeviceChange {
            actuator,
            on,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenhouse_types::ParseError;

    #[test]
    fn test_apply_known_device() {
        let mut controller = DeviceController::new();
        let change = controller.apply("water", true).unwrap();
        assert_eq!(change.actuator, Actuator::Water);
        assert_eq!(change.command.as_deref(), Some("MANUAL_PUMP_ON"));
        assert!(controller.state().water);
    }

    #[test]
    fn test_repeat_intent_has_no_command() {
        let mut controller = DeviceController::new();
        controller.apply("fan", true).unwrap();
        let change = controller.apply("fan", true).unwrap();
        assert_eq!(change.command, None);

        let change = controller.apply("fan", false).unwrap();
        assert_eq!(change.command.as_deref(), Some("MANUAL_FAN_OFF"));
    }

    #[test]
    fn test_unknown_device_leaves_state() {
        let mut controller = DeviceController::new();
        controller.apply("light", true).unwrap();
        let before = controller.state();

        assert_eq!(
            controller.apply("heater", true),
            Err(ParseError::UnknownDevice("heater".into()))
        );
        assert_eq!(controller.state(), before);
    }
}
