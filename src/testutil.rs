//! Shared test doubles: counting channels, factories, and relay transports.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::channel::{ChannelError, PeerChannel, PeerChannelFactory};
use crate::signaling::{SignalingConnector, SignalingError, SignalingTransport};

/// Peer channel double that records sends and signals.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub signalled: Mutex<Vec<String>>,
    pub destroyed: AtomicBool,
    /// When set, `send` fails with `ChannelError::Closed` after this many
    /// successful sends.
    pub fail_after: Option<usize>,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_after(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_after: Some(n),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl PeerChannel for RecordingChannel {
    fn signal(&self, envelope: &str) -> Result<(), ChannelError> {
        self.signalled.lock().unwrap().push(envelope.to_string());
        Ok(())
    }

    fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        if self.is_destroyed() {
            return Err(ChannelError::Closed);
        }
        let mut sent = self.sent.lock().unwrap();
        if let Some(limit) = self.fail_after {
            if sent.len() >= limit {
                return Err(ChannelError::Closed);
            }
        }
        sent.push(payload.to_vec());
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

/// Factory double that hands out `RecordingChannel`s and keeps every instance
/// reachable so tests can count live channels. Clones share the same records.
#[derive(Default, Clone)]
pub struct CountingFactory {
    pub created: Arc<Mutex<Vec<Arc<RecordingChannel>>>>,
    pub initiator_flags: Arc<Mutex<Vec<bool>>>,
}

impl CountingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channels(&self) -> Vec<Arc<RecordingChannel>> {
        self.created.lock().unwrap().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn live_count(&self) -> usize {
        self.created
            .lock()
            .unwrap()
            .iter()
            .filter(|c| !c.is_destroyed())
            .count()
    }
}

impl PeerChannelFactory for CountingFactory {
    fn create(&mut self, initiator: bool) -> Arc<dyn PeerChannel> {
        let channel = RecordingChannel::new();
        self.created.lock().unwrap().push(channel.clone());
        self.initiator_flags.lock().unwrap().push(initiator);
        channel
    }
}

/// Relay transport double that records outgoing text.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub fail_sends: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl SignalingTransport for Arc<RecordingTransport> {
    fn send_text(&self, text: &str) -> Result<(), SignalingError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SignalingError::Transport("send failed".to_string()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Connector double that hands out a shared `RecordingTransport`.
pub struct TestConnector {
    pub transport: Arc<RecordingTransport>,
    pub urls: Arc<Mutex<Vec<String>>>,
    pub fail_connect: bool,
    pub connects: Arc<AtomicUsize>,
}

impl TestConnector {
    pub fn new(transport: Arc<RecordingTransport>) -> Self {
        Self {
            transport,
            urls: Arc::new(Mutex::new(Vec::new())),
            fail_connect: false,
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl SignalingConnector for TestConnector {
    fn connect(&mut self, url: &str) -> Result<Box<dyn SignalingTransport>, SignalingError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(SignalingError::Transport("connect refused".to_string()));
        }
        self.urls.lock().unwrap().push(url.to_string());
        Ok(Box::new(self.transport.clone()))
    }
}
