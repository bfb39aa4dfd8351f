//! Best-effort fan-out of server events to connected observers.
//!
//! One broadcast channel feeds every WebSocket connection. Delivery is fire
//! and forget: nothing is queued for observers that connect later, and a
//! receiver that falls behind the channel capacity skips ahead rather than
//! stalling the sender.

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::Mercadoria;

/// Broadcast channel capacity. A receiver further behind than this loses the
/// overwritten events.
const CHANNEL_CAPACITY: usize = 64;

/// Events observers can see. Wire form is `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new inventory entry was created; carries the full stored row.
    NewMercadoria(Mercadoria),
    /// A client message relayed to every connection.
    NewMessage(Value),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::NewMercadoria(_) => "newMercadoria",
            ServerEvent::NewMessage(_) => "newMessage",
        }
    }

    /// Serialize into the JSON text frame sent on the wire.
    pub fn to_frame(&self) -> String {
        let data = match self {
            ServerEvent::NewMercadoria(row) => serde_json::to_value(row).unwrap_or(Value::Null),
            ServerEvent::NewMessage(v) => v.clone(),
        };
        json!({ "event": self.name(), "data": data }).to_string()
    }
}

/// Greeting sent once to each connection right after the upgrade. Goes
/// straight to the socket, never through the hub, so other connections can
/// never observe it.
pub fn welcome_frame() -> String {
    json!({ "event": "message", "data": "Bem-vindo ao servidor de WebSockets!" }).to_string()
}

/// Fan-out hub over one broadcast channel. Cloning shares the channel.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a new observer. Only events emitted after this call are
    /// delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to every live observer. With no observers connected
    /// the event is dropped; the mutation that produced it already succeeded.
    pub fn emit(&self, event: ServerEvent) {
        let name = event.name();
        match self.tx.send(event) {
            Ok(n) => debug!(target: "estoque::events", "'{}' delivered to {} observer(s)", name, n),
            Err(_) => debug!(target: "estoque::events", "'{}' dropped, no observers", name),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Mercadoria {
        Mercadoria {
            id: 1,
            name: "Caixa".into(),
            price: 49.9,
            height: 30.0,
            width: 20.0,
            status: "disponível".into(),
            image: None,
        }
    }

    #[test]
    fn subscriber_receives_emitted_event() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        hub.emit(ServerEvent::NewMercadoria(sample_row()));
        match rx.try_recv().unwrap() {
            ServerEvent::NewMercadoria(row) => assert_eq!(row.id, 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn emit_without_observers_is_a_noop() {
        let hub = EventHub::new();
        assert_eq!(hub.observer_count(), 0);
        hub.emit(ServerEvent::NewMessage(json!("ola")));
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let hub = EventHub::new();
        hub.emit(ServerEvent::NewMessage(json!("antes")));
        let mut rx = hub.subscribe();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();
        assert_eq!(hub.observer_count(), 2);
        hub.emit(ServerEvent::NewMessage(json!({"texto": "oi"})));
        assert!(matches!(a.try_recv().unwrap(), ServerEvent::NewMessage(_)));
        assert!(matches!(b.try_recv().unwrap(), ServerEvent::NewMessage(_)));
    }

    #[test]
    fn lagged_receiver_skips_ahead() {
        let hub = EventHub::new();
        let mut rx = hub.subscribe();
        for i in 0..(CHANNEL_CAPACITY + 8) {
            hub.emit(ServerEvent::NewMessage(json!(i)));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        // After the lag report the receiver continues from what is retained.
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn frames_use_the_event_data_envelope() {
        let frame = ServerEvent::NewMercadoria(sample_row()).to_frame();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "newMercadoria");
        assert_eq!(parsed["data"]["name"], "Caixa");
        assert!(parsed["data"]["image"].is_null());

        let frame = ServerEvent::NewMessage(json!("oi")).to_frame();
        let parsed: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed["event"], "newMessage");
        assert_eq!(parsed["data"], "oi");
    }

    #[test]
    fn welcome_frame_shape() {
        let parsed: Value = serde_json::from_str(&welcome_frame()).unwrap();
        assert_eq!(parsed["event"], "message");
        assert_eq!(parsed["data"], "Bem-vindo ao servidor de WebSockets!");
    }
}
