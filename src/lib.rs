//! Peer-to-peer file drop protocol core.
//! Host-driven: the host wires relay transport and peer channel events into
//! the session and performs the actual I/O behind the trait seams.

pub mod channel;
pub mod config;
pub mod connection;
pub mod files;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod signaling;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testutil;

pub use channel::{ChannelError, ChannelEvent, PeerChannel, PeerChannelFactory};
pub use config::SessionConfig;
pub use connection::{ConnectionState, Role, StartError};
pub use files::{DiskFile, FileReadError, FileSource, MemoryFile};
pub use protocol::CHUNK_SIZE;
pub use receiver::Artifact;
pub use sender::SendError;
pub use session::{Session, SessionEvent};
pub use signaling::{generate_room_id, SignalingConnector, SignalingError, SignalingTransport};
pub use telemetry::{TelemetrySnapshot, TransferState};
