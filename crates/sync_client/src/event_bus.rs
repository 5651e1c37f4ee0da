use serde_json::Value;
use shared::protocol::{Envelope, PushMessage};
use tokio::sync::broadcast;
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use tracing::{debug, warn};

const BUS_CAPACITY: usize = 256;

/// A push frame re-emitted under its normalized name (`board_update` -> `board:update`).
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    pub name: String,
    pub kind: String,
    pub data: Value,
}

impl BusEvent {
    pub fn decode(&self) -> serde_json::Result<PushMessage> {
        PushMessage::from_envelope(&Envelope::new(self.kind.clone(), self.data.clone()))
    }
}

pub fn normalize_event_name(kind: &str) -> String {
    kind.replace('_', ":")
}

/// Fans inbound push frames out to any number of independent listeners.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Events carrying a given normalized name, skipping any a lagging listener missed.
    pub fn stream(&self, name: &str) -> impl Stream<Item = BusEvent> {
        let name = name.to_string();
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|event| event.ok())
            .filter(move |event| event.name == name)
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Parses a raw text frame and re-emits it. Malformed frames are logged and dropped.
    pub fn publish_frame(&self, text: &str) -> bool {
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                self.publish(envelope);
                true
            }
            Err(err) => {
                warn!(error = %err, frame_len = text.len(), "push: dropping malformed frame");
                false
            }
        }
    }

    pub fn publish(&self, envelope: Envelope) {
        let event = BusEvent {
            name: normalize_event_name(&envelope.kind),
            kind: envelope.kind,
            data: envelope.data,
        };
        debug!(name = %event.name, listeners = self.sender.receiver_count(), "push: event");
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
#[path = "tests/event_bus_tests.rs"]
mod tests;
