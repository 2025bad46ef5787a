//! Observable transfer telemetry shared by the sender and receiver.

use std::sync::Arc;

use tokio::sync::watch;

/// Sender-owned transfer state, observed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    Sending,
    Paused,
    Cancelled,
    Done,
}

/// Which way the file in flight is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Metadata of the file currently in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub index: u32,
    pub total: u32,
    pub direction: Direction,
}

/// Point-in-time view of the observable telemetry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetrySnapshot {
    pub transfer_state: TransferState,
    pub progress_percent: u8,
    pub throughput_mbps: f64,
    pub current_file: Option<FileInfo>,
}

/// Publisher handle; cheap to clone. Readers take snapshots or subscribe to
/// the underlying watch channel.
#[derive(Clone)]
pub struct TelemetryHandle {
    tx: Arc<watch::Sender<TelemetrySnapshot>>,
}

impl TelemetryHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TelemetrySnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.tx.borrow().clone()
    }

    pub fn set_transfer_state(&self, state: TransferState) {
        self.tx.send_modify(|s| s.transfer_state = state);
    }

    /// A new file is in flight: publish its info, zero progress and throughput.
    pub fn begin_file(&self, info: FileInfo) {
        self.tx.send_modify(|s| {
            s.current_file = Some(info);
            s.progress_percent = 0;
            s.throughput_mbps = 0.0;
        });
    }

    pub fn record_chunk(&self, progress_percent: u8, throughput_mbps: f64) {
        self.tx.send_modify(|s| {
            s.progress_percent = progress_percent;
            s.throughput_mbps = throughput_mbps;
        });
    }

    /// The file in flight finished; progress is left where it landed.
    pub fn clear_file(&self) {
        self.tx.send_modify(|s| {
            s.current_file = None;
            s.throughput_mbps = 0.0;
        });
    }

    /// Zero everything except the transfer state.
    pub fn reset(&self) {
        self.tx.send_modify(|s| {
            s.progress_percent = 0;
            s.throughput_mbps = 0.0;
            s.current_file = None;
        });
    }
}

impl Default for TelemetryHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Instantaneous throughput in MB/s, rounded to two decimals. A zero elapsed
/// measurement counts as one millisecond.
pub fn throughput_mbps(chunk_len: usize, elapsed_ms: u64) -> f64 {
    let ms = elapsed_ms.max(1);
    let bytes_per_sec = chunk_len as f64 * 1000.0 / ms as f64;
    (bytes_per_sec / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

/// Cumulative progress as a floored percentage, clamped to 100. A zero-byte
/// total counts as complete.
pub fn progress_percent(transferred: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((transferred.min(total) as u128 * 100) / total as u128) as u8
}
