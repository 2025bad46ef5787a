//! Connection orchestrator: role-aware state machine owning the peer channel.
//!
//! One ingestion entry point per transport/channel event; each dispatches on
//! the current state and returns an update for the session layer to act on.
//! The peer channel handle is created and destroyed here and nowhere else, so
//! at most one instance is live per session.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{PeerChannel, PeerChannelFactory};
use crate::signaling::{self, RelayMessage, SignalingConnector, SignalingError, SignalingTransport};

/// Asymmetric session role; fixed at session start. Only the initiator
/// controls the send queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Orchestrator-owned connection state, observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    SignalingConnecting,
    SignalingReady,
    Negotiating,
    Connected,
    Closed,
}

/// Caller error starting a session.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("room identifier must not be empty")]
    MissingRoom,
    #[error("session already started")]
    AlreadyStarted,
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Outcome of ingesting one event. Failure paths surface here as observable
/// updates; nothing propagates uncaught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUpdate {
    None,
    /// The peer channel connected; the initiator may begin draining its queue.
    Connected,
    /// Relay transport failure. Non-fatal; no automatic retry.
    SignalingFailed(String),
    /// Relay transport closed before the peer channel connected.
    Disconnected,
    /// Channel fault or explicit teardown moved the state machine to `Closed`.
    Closed,
}

pub struct Orchestrator {
    role: Role,
    state: ConnectionState,
    connector: Box<dyn SignalingConnector>,
    factory: Box<dyn PeerChannelFactory>,
    transport: Option<Box<dyn SignalingTransport>>,
    channel: Option<Arc<dyn PeerChannel>>,
}

impl Orchestrator {
    pub fn new(
        role: Role,
        connector: Box<dyn SignalingConnector>,
        factory: Box<dyn PeerChannelFactory>,
    ) -> Self {
        Self {
            role,
            state: ConnectionState::Idle,
            connector,
            factory,
            transport: None,
            channel: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Non-owning clone of the live channel handle, for the sender.
    pub fn channel(&self) -> Option<Arc<dyn PeerChannel>> {
        self.channel.clone()
    }

    /// Open the relay transport for a room. An empty room identifier is a
    /// caller error; the state machine is not entered.
    pub fn start_session(&mut self, relay_base: &str, room: &str) -> Result<(), StartError> {
        if room.trim().is_empty() {
            return Err(StartError::MissingRoom);
        }
        if self.state != ConnectionState::Idle {
            return Err(StartError::AlreadyStarted);
        }
        let url = signaling::relay_url(relay_base, room);
        info!(%url, role = ?self.role, "connecting to relay");
        self.transport = Some(self.connector.connect(&url)?);
        self.state = ConnectionState::SignalingConnecting;
        Ok(())
    }

    /// Transport opened. The responder creates its channel and announces
    /// readiness; the initiator waits for the peer's handshake.
    pub fn on_transport_open(&mut self) -> ConnectionUpdate {
        if self.state != ConnectionState::SignalingConnecting {
            warn!(state = ?self.state, "transport open in unexpected state; ignored");
            return ConnectionUpdate::None;
        }
        self.state = ConnectionState::SignalingReady;
        match self.role {
            Role::Responder => {
                self.create_channel(false);
                self.state = ConnectionState::Negotiating;
                if let Err(e) = self.send_to_relay(&signaling::guest_ready_text()) {
                    warn!(error = %e, "failed to send ready handshake");
                    return ConnectionUpdate::SignalingFailed(e.to_string());
                }
                debug!("ready handshake sent");
            }
            Role::Initiator => {
                debug!("waiting for responder handshake");
            }
        }
        ConnectionUpdate::None
    }

    /// Text message from the relay: the ready handshake, or an opaque
    /// negotiation envelope forwarded verbatim into the channel.
    pub fn on_transport_message(&mut self, text: &str) -> ConnectionUpdate {
        match signaling::classify(text) {
            RelayMessage::GuestReady => self.on_guest_ready(),
            RelayMessage::Envelope(envelope) => {
                match &self.channel {
                    Some(channel) => {
                        if let Err(e) = channel.signal(&envelope) {
                            warn!(error = %e, "channel rejected negotiation envelope");
                        }
                    }
                    // The envelope raced ahead of channel creation; the peer
                    // re-offers after the next handshake.
                    None => debug!("negotiation envelope before channel exists; dropped"),
                }
                ConnectionUpdate::None
            }
        }
    }

    fn on_guest_ready(&mut self) -> ConnectionUpdate {
        match self.role {
            Role::Responder => {
                debug!("ready handshake echoed to responder; ignored");
                ConnectionUpdate::None
            }
            Role::Initiator => {
                if !matches!(
                    self.state,
                    ConnectionState::SignalingReady
                        | ConnectionState::Negotiating
                        | ConnectionState::Connected
                ) {
                    warn!(state = ?self.state, "ready handshake in unexpected state; ignored");
                    return ConnectionUpdate::None;
                }
                // A repeated handshake means the responder restarted: the old
                // channel is half-open at best and is never reused.
                if let Some(stale) = self.channel.take() {
                    info!("stale channel discarded before re-offer");
                    stale.destroy();
                }
                self.create_channel(true);
                self.state = ConnectionState::Negotiating;
                ConnectionUpdate::None
            }
        }
    }

    /// Relay transport failed. Status only; the session may be restarted.
    pub fn on_transport_error(&mut self, reason: &str) -> ConnectionUpdate {
        warn!(reason, "relay transport error");
        ConnectionUpdate::SignalingFailed(reason.to_string())
    }

    /// Relay transport closed. Only notable before the channel is connected.
    pub fn on_transport_close(&mut self) -> ConnectionUpdate {
        self.transport = None;
        if matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Closed | ConnectionState::Idle
        ) {
            debug!("relay transport closed");
            ConnectionUpdate::None
        } else {
            warn!(state = ?self.state, "relay transport closed before channel connected");
            ConnectionUpdate::Disconnected
        }
    }

    /// Local negotiation envelope from the channel, forwarded verbatim to the
    /// relay.
    pub fn on_channel_signal(&mut self, envelope: &str) -> ConnectionUpdate {
        match self.send_to_relay(envelope) {
            Ok(()) => ConnectionUpdate::None,
            Err(e) => {
                warn!(error = %e, "failed to forward negotiation envelope to relay");
                ConnectionUpdate::SignalingFailed(e.to_string())
            }
        }
    }

    /// The peer channel connected.
    pub fn on_channel_connect(&mut self) -> ConnectionUpdate {
        if self.state != ConnectionState::Negotiating {
            warn!(state = ?self.state, "channel connect in unexpected state");
        }
        info!("peer channel connected");
        self.state = ConnectionState::Connected;
        ConnectionUpdate::Connected
    }

    /// Channel close or error: fatal for this channel instance.
    pub fn on_channel_closed(&mut self, reason: Option<&str>) -> ConnectionUpdate {
        if let Some(reason) = reason {
            warn!(reason, "peer channel error");
        } else {
            info!("peer channel closed");
        }
        self.teardown()
    }

    /// Destroy the channel, close the transport, enter `Closed`.
    pub fn teardown(&mut self) -> ConnectionUpdate {
        if let Some(channel) = self.channel.take() {
            channel.destroy();
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        if self.state == ConnectionState::Closed {
            return ConnectionUpdate::None;
        }
        self.state = ConnectionState::Closed;
        ConnectionUpdate::Closed
    }

    fn create_channel(&mut self, initiator: bool) {
        debug_assert!(self.channel.is_none(), "channel already exists");
        debug!(initiator, "creating peer channel");
        self.channel = Some(self.factory.create(initiator));
    }

    fn send_to_relay(&self, text: &str) -> Result<(), SignalingError> {
        match &self.transport {
            Some(transport) => transport.send_text(text),
            None => Err(SignalingError::Closed),
        }
    }
}
