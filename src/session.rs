//! Session control surface: queue and control operations, event routing, and
//! the caller-visible event stream.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, PeerChannel, PeerChannelFactory};
use crate::config::SessionConfig;
use crate::connection::{ConnectionState, ConnectionUpdate, Orchestrator, Role, StartError};
use crate::files::FileSource;
use crate::receiver::{Artifact, Receiver};
use crate::sender::{SendControl, SendError, SendQueue, Sender};
use crate::signaling::SignalingConnector;
use crate::telemetry::{TelemetryHandle, TelemetrySnapshot, TransferState};

/// Caller-visible occurrence on the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    /// Relay transport failure. Non-fatal; no automatic retry.
    SignalingError(String),
    /// Relay transport closed before the peer channel connected.
    Disconnected,
    /// One queued file was sent completely.
    FileSent { name: String, index: u32, total: u32 },
    /// A complete incoming file.
    FileReceived(Artifact),
    /// The drain aborted on a read or channel failure.
    TransferFailed(String),
}

/// One rendezvous-and-transfer session between two peers.
///
/// The host wires transport and channel events into the `on_*` entry points
/// and reads outcomes from the event stream and the telemetry watch.
pub struct Session {
    config: SessionConfig,
    orchestrator: Orchestrator,
    queue: SendQueue,
    control: Arc<SendControl>,
    telemetry: TelemetryHandle,
    receiver: Receiver,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Build a session. The returned receiver yields caller-visible events.
    pub fn new(
        role: Role,
        config: SessionConfig,
        connector: Box<dyn SignalingConnector>,
        factory: Box<dyn PeerChannelFactory>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let telemetry = TelemetryHandle::new();
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            config,
            orchestrator: Orchestrator::new(role, connector, factory),
            queue: SendQueue::default(),
            control: Arc::new(SendControl::default()),
            receiver: Receiver::new(telemetry.clone()),
            telemetry,
            events,
        };
        (session, rx)
    }

    pub fn role(&self) -> Role {
        self.orchestrator.role()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.orchestrator.state()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry.subscribe()
    }

    pub fn queued_files(&self) -> usize {
        self.queue.len()
    }

    /// Open the relay transport for a room. An empty room identifier is a
    /// caller error.
    pub fn start_session(&mut self, room: &str) -> Result<(), StartError> {
        self.orchestrator
            .start_session(&self.config.relay_base_url, room)?;
        self.emit_connection();
        Ok(())
    }

    // ── Queue and control operations (initiator only) ──

    /// Append files, deduplicated by (name, size) against the existing queue.
    /// Returns the number added.
    pub fn enqueue(&mut self, files: Vec<Box<dyn FileSource>>) -> usize {
        if self.role() != Role::Initiator {
            warn!("responder has no send queue; enqueue ignored");
            return 0;
        }
        let added = self.queue.enqueue(files);
        info!(added, queued = self.queue.len(), "files queued");
        added
    }

    /// Begin draining the queue. Valid for the initiator once connected.
    pub fn start(&mut self) -> Result<(), SendError> {
        if self.role() != Role::Initiator {
            warn!("responder cannot start a send");
            return Ok(());
        }
        if self.connection_state() != ConnectionState::Connected {
            return Err(SendError::ConnectionClosed);
        }
        let Some(channel) = self.orchestrator.channel() else {
            return Err(SendError::ConnectionClosed);
        };
        if self.queue.is_empty() {
            debug!("start with empty queue; nothing to send");
            return Ok(());
        }
        self.spawn_drain(channel);
        Ok(())
    }

    /// Pause the in-flight send. No-op unless the initiator is sending.
    pub fn pause(&self) {
        if self.role() != Role::Initiator || !self.control.is_sending() {
            return;
        }
        info!("send paused");
        self.control.pause();
        self.telemetry.set_transfer_state(TransferState::Paused);
    }

    /// Resume a paused send. No-op unless paused.
    pub fn resume(&self) {
        if self.role() != Role::Initiator || !self.control.is_paused() {
            return;
        }
        info!("send resumed");
        self.telemetry.set_transfer_state(TransferState::Sending);
        self.control.resume();
    }

    /// Stop the sender loop, clear the queue, and reset telemetry.
    pub fn cancel(&self) {
        if self.role() != Role::Initiator {
            return;
        }
        info!("send cancelled");
        self.control.cancel();
        self.queue.clear();
        self.telemetry.reset();
        self.telemetry.set_transfer_state(TransferState::Cancelled);
    }

    // ── Transport event ingestion ──

    pub fn on_transport_open(&mut self) {
        let update = self.orchestrator.on_transport_open();
        self.apply(update);
    }

    pub fn on_transport_message(&mut self, text: &str) {
        let update = self.orchestrator.on_transport_message(text);
        self.apply(update);
    }

    pub fn on_transport_error(&mut self, reason: &str) {
        let update = self.orchestrator.on_transport_error(reason);
        self.apply(update);
    }

    pub fn on_transport_close(&mut self) {
        let update = self.orchestrator.on_transport_close();
        self.apply(update);
    }

    // ── Peer channel event ingestion ──

    pub fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Signal(envelope) => {
                let update = self.orchestrator.on_channel_signal(&envelope);
                self.apply(update);
            }
            ChannelEvent::Connect => {
                let update = self.orchestrator.on_channel_connect();
                self.apply(update);
            }
            ChannelEvent::Data(payload) => self.on_data(&payload),
            ChannelEvent::Error(reason) => {
                let update = self.orchestrator.on_channel_closed(Some(&reason));
                self.apply(update);
            }
            ChannelEvent::Close => {
                let update = self.orchestrator.on_channel_closed(None);
                self.apply(update);
            }
        }
    }

    /// Explicit teardown of channel and transport.
    pub fn close(&mut self) {
        let update = self.orchestrator.teardown();
        self.apply(update);
    }

    fn on_data(&mut self, payload: &[u8]) {
        match self.receiver.on_message(payload) {
            Ok(Some(artifact)) => {
                let _ = self.events.send(SessionEvent::FileReceived(artifact));
            }
            Ok(None) => {}
            // Already logged by the receiver; the session carries on.
            Err(_violation) => {}
        }
    }

    fn apply(&mut self, update: ConnectionUpdate) {
        match update {
            ConnectionUpdate::None => {}
            ConnectionUpdate::Connected => {
                self.emit_connection();
                if self.role() == Role::Initiator && !self.queue.is_empty() {
                    if let Some(channel) = self.orchestrator.channel() {
                        info!(queued = self.queue.len(), "channel connected; sending queued files");
                        self.spawn_drain(channel);
                    }
                }
            }
            ConnectionUpdate::SignalingFailed(reason) => {
                let _ = self.events.send(SessionEvent::SignalingError(reason));
            }
            ConnectionUpdate::Disconnected => {
                let _ = self.events.send(SessionEvent::Disconnected);
            }
            ConnectionUpdate::Closed => {
                // The channel is gone; any in-flight drain fails on its next
                // send. Telemetry returns to its resting state.
                self.telemetry.reset();
                self.telemetry.set_transfer_state(TransferState::Idle);
                self.emit_connection();
            }
        }
    }

    fn spawn_drain(&self, channel: Arc<dyn PeerChannel>) {
        if self.control.is_sending() {
            debug!("drain already in progress");
            return;
        }
        let sender = Sender::new(
            self.queue.clone(),
            self.control.clone(),
            self.telemetry.clone(),
            self.events.clone(),
        );
        tokio::spawn(sender.drain(channel));
    }

    fn emit_connection(&self) {
        let _ = self
            .events
            .send(SessionEvent::ConnectionChanged(self.orchestrator.state()));
    }
}
