//! Relay wire format and signaling transport collaborator contracts.

use std::time::{SystemTime, UNIX_EPOCH};

/// Tag value of the responder's handshake message.
pub const GUEST_READY_TYPE: &str = "guest-ready";

/// Room-scoped relay address: `<base>/ws/<room>/`.
pub fn relay_url(base: &str, room: &str) -> String {
    format!("{}/ws/{}/", base.trim_end_matches('/'), room)
}

/// Mint a fresh opaque room identifier for the initiating side.
pub fn generate_room_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Handshake text the responder sends once its transport opens.
pub fn guest_ready_text() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    serde_json::json!({ "type": GUEST_READY_TYPE, "timestamp": timestamp }).to_string()
}

/// A text message from the relay, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// The responder has joined the room; the initiator may offer a connection.
    GuestReady,
    /// Opaque negotiation envelope, forwarded verbatim to the peer channel.
    Envelope(String),
}

/// Classify a relay message. Everything that is not the handshake passes
/// through unmodified, including text that is not valid JSON.
pub fn classify(text: &str) -> RelayMessage {
    let is_ready = serde_json::from_str::<serde_json::Value>(text)
        .ok()
        .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(|t| t == GUEST_READY_TYPE))
        .unwrap_or(false);
    if is_ready {
        RelayMessage::GuestReady
    } else {
        RelayMessage::Envelope(text.to_string())
    }
}

/// Relay transport failure. Reported via status; recoverable by restarting the
/// session. There is no automatic retry.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("relay transport is closed")]
    Closed,
}

/// Relay transport: a text `send` over an open/message/error/close event
/// source. The host delivers its events into the session's ingestion entry
/// points.
pub trait SignalingTransport: Send + Sync {
    fn send_text(&self, text: &str) -> Result<(), SignalingError>;
    fn close(&self);
}

/// Opens a transport to the relay address for a room.
pub trait SignalingConnector: Send {
    fn connect(&mut self, url: &str) -> Result<Box<dyn SignalingTransport>, SignalingError>;
}
