//! Peer channel collaborator contract: ordered, reliable, message-oriented.

use std::sync::Arc;

/// Failure on the peer channel. Fatal for the current channel instance; the
/// only recovery path is handshake-driven renegotiation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("peer channel is closed")]
    Closed,
    #[error("peer channel error: {0}")]
    Transport(String),
}

/// Ordered, reliable, binary+text message channel between two endpoints.
///
/// Created, signaled, and destroyed only by the connection orchestrator. The
/// sender and receiver hold non-owning clones and never touch its lifecycle.
/// Implementations must deliver sent messages in order and exactly once under
/// normal operation.
pub trait PeerChannel: Send + Sync {
    /// Ingest a remote negotiation envelope produced by the other endpoint.
    fn signal(&self, envelope: &str) -> Result<(), ChannelError>;
    /// Send one message. Header text is sent as its UTF-8 bytes.
    fn send(&self, payload: &[u8]) -> Result<(), ChannelError>;
    /// Tear the channel down. Further sends fail with `ChannelError::Closed`.
    fn destroy(&self);
}

/// Creates peer channel instances on behalf of the orchestrator.
pub trait PeerChannelFactory: Send {
    fn create(&mut self, initiator: bool) -> Arc<dyn PeerChannel>;
}

/// Event raised by a peer channel, fed into the session by the host.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Local negotiation envelope to forward to the relay.
    Signal(String),
    /// The channel is connected and ready to carry messages.
    Connect,
    /// One in-order message from the remote endpoint.
    Data(Vec<u8>),
    /// Channel-fatal error.
    Error(String),
    /// The channel closed.
    Close,
}
