//! Observer interface for server status and data events.
//!
//! The core has no knowledge of any GUI; everything it wants to say goes
//! through an [`EventSink`]. The serializable enums mirror the two
//! notification channels the desktop shell subscribes to, so a bridge can
//! forward them as tagged JSON unchanged.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Channel name the desktop shell listens on for server lifecycle updates.
pub const SERVER_STATUS_CHANNEL: &str = "tcp-server-status";
/// Channel name for received-message events.
pub const DATA_CHANNEL: &str = "tcp-data-received";

/// Events on the server-status channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StatusEvent {
    Running { host: String, port: u16 },
    Stopped,
    Error { message: String },
    ClientConnected { client: String },
    ClientDisconnected { client: String },
}

/// Events on the data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum DataEvent {
    Data { client: String, data: String },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Status(StatusEvent),
    Data(DataEvent),
}

impl ServerEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            ServerEvent::Status(_) => SERVER_STATUS_CHANNEL,
            ServerEvent::Data(_) => DATA_CHANNEL,
        }
    }
}

/// Outward notification surface of the server, one method per event
/// category. All methods default to no-ops so sinks implement only what they
/// observe.
pub trait EventSink: Send + Sync {
    fn server_running(&self, _host: &str, _port: u16) {}
    fn server_stopped(&self) {}
    fn server_error(&self, _message: &str) {}
    fn client_connected(&self, _client: &str) {}
    fn client_disconnected(&self, _client: &str) {}
    /// Raw message text, emitted before any decode attempt.
    fn data(&self, _client: &str, _raw: &str) {}
    fn decode_error(&self, _message: &str) {}
}

pub struct NoopSink;
impl EventSink for NoopSink {}

/// Forwards every event into an unbounded channel. The GUI bridge drains the
/// receiver; tests assert on it.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: ServerEvent) {
        // Receiver gone means nobody is observing; events are droppable.
        let _ = self.tx.send(event);
    }
}

impl EventSink for ChannelSink {
    fn server_running(&self, host: &str, port: u16) {
        self.send(ServerEvent::Status(StatusEvent::Running {
            host: host.to_string(),
            port,
        }));
    }
    fn server_stopped(&self) {
        self.send(ServerEvent::Status(StatusEvent::Stopped));
    }
    fn server_error(&self, message: &str) {
        self.send(ServerEvent::Status(StatusEvent::Error {
            message: message.to_string(),
        }));
    }
    fn client_connected(&self, client: &str) {
        self.send(ServerEvent::Status(StatusEvent::ClientConnected {
            client: client.to_string(),
        }));
    }
    fn client_disconnected(&self, client: &str) {
        self.send(ServerEvent::Status(StatusEvent::ClientDisconnected {
            client: client.to_string(),
        }));
    }
    fn data(&self, client: &str, raw: &str) {
        self.send(ServerEvent::Data(DataEvent::Data {
            client: client.to_string(),
            data: raw.to_string(),
        }));
    }
    fn decode_error(&self, message: &str) {
        self.send(ServerEvent::Data(DataEvent::Error {
            message: message.to_string(),
        }));
    }
}

/// Stderr sink used by the daemon binary.
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn server_running(&self, host: &str, port: u16) {
        eprintln!("server running on {host}:{port}");
    }
    fn server_stopped(&self) {
        eprintln!("server stopped");
    }
    fn server_error(&self, message: &str) {
        eprintln!("server error: {message}");
    }
    fn client_connected(&self, client: &str) {
        eprintln!("fixture connected: {client}");
    }
    fn client_disconnected(&self, client: &str) {
        eprintln!("fixture disconnected: {client}");
    }
    fn data(&self, client: &str, raw: &str) {
        eprintln!("message from {client} ({} bytes)", raw.len());
    }
    fn decode_error(&self, message: &str) {
        eprintln!("{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_events_serialize_with_kebab_case_tags() {
        assert_eq!(
            serde_json::to_value(StatusEvent::ClientConnected {
                client: "10.0.0.4:52110".into()
            })
            .unwrap(),
            json!({"status": "client-connected", "client": "10.0.0.4:52110"})
        );
        assert_eq!(
            serde_json::to_value(StatusEvent::Running {
                host: "0.0.0.0".into(),
                port: 7070
            })
            .unwrap(),
            json!({"status": "running", "host": "0.0.0.0", "port": 7070})
        );
        assert_eq!(
            serde_json::to_value(StatusEvent::Stopped).unwrap(),
            json!({"status": "stopped"})
        );
    }

    #[test]
    fn data_events_serialize_with_kebab_case_tags() {
        assert_eq!(
            serde_json::to_value(DataEvent::Error {
                message: "XML parsing error: boom".into()
            })
            .unwrap(),
            json!({"status": "error", "message": "XML parsing error: boom"})
        );
    }

    #[test]
    fn events_map_to_their_channels() {
        assert_eq!(
            ServerEvent::Status(StatusEvent::Stopped).channel(),
            SERVER_STATUS_CHANNEL
        );
        assert_eq!(
            ServerEvent::Data(DataEvent::Error { message: "x".into() }).channel(),
            DATA_CHANNEL
        );
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.client_connected("c1");
        sink.data("c1", "<doc/>");
        sink.client_disconnected("c1");

        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Status(StatusEvent::ClientConnected { client: "c1".into() })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Data(DataEvent::Data {
                client: "c1".into(),
                data: "<doc/>".into()
            })
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerEvent::Status(StatusEvent::ClientDisconnected { client: "c1".into() })
        );
        assert!(rx.try_recv().is_err());
    }
}
