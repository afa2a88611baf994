//! Engine event system.
//!
//! The engine publishes connection transitions, device changes and refreshed
//! readings on a `broadcast` channel. Slow receivers lag and lose events;
//! the engine never waits for them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use greenhouse_types::{Actuator, ConnectionState, Mode, Reading};

/// Events emitted by the engine.
///
/// All events are serializable so they can be streamed to clients as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EngineEvent {
    /// The connection state changed.
    ConnectionChanged {
        from: ConnectionState,
        to: ConnectionState,
        endpoint: Option<String>,
    },
    /// A device intent changed.
    DeviceChanged { device: Actuator, on: bool },
    /// A new reading was produced by `refresh`.
    Reading { mode: Mode, reading: Reading },
    /// The auto-reconnect supervisor started an attempt.
    ReconnectStarted { attempt: u32 },
    /// The supervisor reattached a controller.
    ReconnectSucceeded { attempts: u32 },
    /// The supervisor gave up.
    ReconnectFailed { attempts: u32 },
}

/// Sender for engine events.
pub type EventSender = broadcast::Sender<EngineEvent>;

/// Receiver for engine events.
pub type EventReceiver = broadcast::Receiver<EngineEvent>;

/// Default channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Fan-out of engine events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: EngineEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_to_subscribers() {
        let dispatcher = EventDispatcher::default();
        let mut rx1 = dispatcher.subscribe();
        let mut rx2 = dispatcher.subscribe();
        assert_eq!(dispatcher.receiver_count(), 2);

        dispatcher.send(EngineEvent::DeviceChanged {
            device: Actuator::Fan,
            on: true,
        });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                EngineEvent::DeviceChanged { device, on } => {
                    assert_eq!(device, Actuator::Fan);
                    assert!(on);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_without_receivers() {
        let dispatcher = EventDispatcher::new(4);
        dispatcher.send(EngineEvent::ReconnectStarted { attempt: 1 });
    }

    #[test]
    fn test_event_json_shape() {
        let event = EngineEvent::ConnectionChanged {
            from: ConnectionState::Connecting,
            to: ConnectionState::Connected,
            endpoint: Some("/dev/ttyACM0".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connection_changed");
        assert_eq!(json["to"], "connected");
        assert_eq!(json["endpoint"], "/dev/ttyACM0");

        let event = EngineEvent::DeviceChanged {
            device: Actuator::Water,
            on: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["device"], "water");
    }
}
