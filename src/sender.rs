//! Transfer sender: drains the file queue as header + chunk messages.
//!
//! Files are processed strictly in enqueue order; one file's chunk stream
//! completes or aborts before the next header is sent. Pause and cancel are
//! cooperative: flags are checked before each read and before each send, so a
//! read already in flight when cancel lands still completes and its chunk is
//! discarded at the next check.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, PeerChannel};
use crate::files::{FileReadError, FileSource};
use crate::protocol::{self, FileHeader, CHUNK_SIZE};
use crate::session::SessionEvent;
use crate::telemetry::{self, Direction, FileInfo, TelemetryHandle, TransferState};

/// Bounded re-check interval while paused. The resume notification normally
/// wakes the loop sooner; this is a backstop.
pub const PAUSE_RECHECK: Duration = Duration::from_millis(200);

/// Explicit pause/cancel/sending flags plus the resume wake, shared by handle
/// between the session surface and the drain loop.
#[derive(Default)]
pub struct SendControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    sending: AtomicBool,
    resumed: Notify,
}

impl SendControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Clear the pause flag and wake the drain loop. No-op if not paused.
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.resumed.notify_waiters();
        }
    }

    /// Request cancellation. Also clears pause so a paused loop wakes and
    /// observes the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.resumed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::SeqCst)
    }

    /// Claim the sending slot. False if a drain is already in progress.
    fn begin_send(&self) -> bool {
        !self.sending.swap(true, Ordering::SeqCst)
    }

    fn end_send(&self) {
        self.sending.store(false, Ordering::SeqCst);
    }

    /// Fresh flags for a new drain.
    fn arm(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// FIFO queue of pending sends, deduplicated by (name, size). Clones share
/// the same queue.
#[derive(Clone, Default)]
pub struct SendQueue {
    inner: Arc<Mutex<VecDeque<Box<dyn FileSource>>>>,
}

impl SendQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Box<dyn FileSource>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append files, skipping any whose (name, size) pair is already queued.
    /// Returns the number actually added.
    pub fn enqueue(&self, files: Vec<Box<dyn FileSource>>) -> usize {
        let mut queue = self.lock();
        let mut added = 0;
        for file in files {
            let duplicate = queue
                .iter()
                .any(|queued| queued.name() == file.name() && queued.len() == file.len());
            if duplicate {
                debug!(name = file.name(), size = file.len(), "duplicate enqueue ignored");
                continue;
            }
            queue.push_back(file);
            added += 1;
        }
        added
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn pop(&self) -> Option<Box<dyn FileSource>> {
        self.lock().pop_front()
    }
}

/// Why a drain stopped early.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("no peer channel; connection closed")]
    ConnectionClosed,
    #[error("a drain is already in progress")]
    Busy,
    #[error(transparent)]
    Read(#[from] FileReadError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Drains the queue over a peer channel. Clones share queue, control,
/// telemetry, and the event stream, so a drain can run detached.
#[derive(Clone)]
pub struct Sender {
    queue: SendQueue,
    control: Arc<SendControl>,
    telemetry: TelemetryHandle,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Sender {
    pub fn new(
        queue: SendQueue,
        control: Arc<SendControl>,
        telemetry: TelemetryHandle,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            queue,
            control,
            telemetry,
            events,
        }
    }

    /// Send every queued file in order. Returns the number of files sent.
    /// Every early-stop path discards the remaining queue.
    pub async fn drain(self, channel: Arc<dyn PeerChannel>) -> Result<usize, SendError> {
        if !self.control.begin_send() {
            return Err(SendError::Busy);
        }
        self.control.arm();
        self.telemetry.set_transfer_state(TransferState::Sending);

        let result = self.drain_inner(&channel).await;
        self.control.end_send();
        match &result {
            Ok(sent) => {
                info!(files = sent, "queue drained");
                self.telemetry.clear_file();
                self.telemetry.set_transfer_state(TransferState::Done);
            }
            Err(SendError::Cancelled) => {
                info!("send cancelled; remaining queue discarded");
                self.queue.clear();
                self.telemetry.reset();
                self.telemetry.set_transfer_state(TransferState::Cancelled);
            }
            Err(e) => {
                warn!(error = %e, "send aborted; remaining queue discarded");
                self.queue.clear();
                self.telemetry.clear_file();
                self.telemetry.set_transfer_state(TransferState::Idle);
                let _ = self
                    .events
                    .send(SessionEvent::TransferFailed(e.to_string()));
            }
        }
        result
    }

    async fn drain_inner(&self, channel: &Arc<dyn PeerChannel>) -> Result<usize, SendError> {
        let total = self.queue.len() as u32;
        let mut index = 0u32;
        while let Some(source) = self.queue.pop() {
            index += 1;
            self.send_file(source.as_ref(), index, total, channel).await?;
            let _ = self.events.send(SessionEvent::FileSent {
                name: source.name().to_string(),
                index,
                total,
            });
        }
        Ok(index as usize)
    }

    async fn send_file(
        &self,
        source: &dyn FileSource,
        index: u32,
        total: u32,
        channel: &Arc<dyn PeerChannel>,
    ) -> Result<(), SendError> {
        let size = source.len();
        let header = FileHeader {
            name: source.name().to_string(),
            size,
            index,
            total,
        };
        info!(name = %header.name, size, index, total, "sending file");
        self.telemetry.begin_file(FileInfo {
            name: header.name.clone(),
            size,
            index,
            total,
            direction: Direction::Send,
        });
        channel.send(protocol::encode_header(&header).as_bytes())?;

        let mut offset = 0u64;
        let mut last_chunk = Instant::now();
        while offset < size {
            self.checkpoint().await?;
            let want = CHUNK_SIZE.min((size - offset) as usize);
            let chunk = source.read_range(offset, want).await?;
            if chunk.is_empty() {
                return Err(SendError::Read(FileReadError::OutOfBounds { offset, size }));
            }
            // A cancel that landed during the read wins: the chunk is
            // discarded unsent.
            if self.control.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            channel.send(&chunk)?;
            offset += chunk.len() as u64;

            let elapsed_ms = last_chunk.elapsed().as_millis() as u64;
            last_chunk = Instant::now();
            self.telemetry.record_chunk(
                telemetry::progress_percent(offset, size),
                telemetry::throughput_mbps(chunk.len(), elapsed_ms),
            );
        }
        debug!(name = %header.name, "file sent");
        self.telemetry.clear_file();
        Ok(())
    }

    /// Cancel check plus pause wait. While paused, no chunk is read or sent;
    /// the resume notification wakes the loop, re-checked every 200 ms.
    async fn checkpoint(&self) -> Result<(), SendError> {
        if self.control.is_cancelled() {
            return Err(SendError::Cancelled);
        }
        if !self.control.is_paused() {
            return Ok(());
        }
        self.telemetry.set_transfer_state(TransferState::Paused);
        loop {
            if self.control.is_cancelled() {
                return Err(SendError::Cancelled);
            }
            if !self.control.is_paused() {
                break;
            }
            let _ = tokio::time::timeout(PAUSE_RECHECK, self.control.resumed.notified()).await;
        }
        self.telemetry.set_transfer_state(TransferState::Sending);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::MemoryFile;
    use crate::testutil::RecordingChannel;
    use async_trait::async_trait;

    fn sender_parts() -> (Sender, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let sender = Sender::new(
            SendQueue::default(),
            Arc::new(SendControl::default()),
            TelemetryHandle::new(),
            events,
        );
        (sender, rx)
    }

    fn boxed(name: &str, data: Vec<u8>) -> Box<dyn FileSource> {
        Box::new(MemoryFile::new(name, data))
    }

    /// Counts range reads; optionally trips a control flag on the nth read.
    struct InstrumentedFile {
        inner: MemoryFile,
        reads: Arc<std::sync::atomic::AtomicUsize>,
        cancel_on_read: Option<(usize, Arc<SendControl>)>,
        pause_on_read: Option<(usize, Arc<SendControl>)>,
    }

    impl InstrumentedFile {
        fn new(name: &str, data: Vec<u8>) -> (Self, Arc<std::sync::atomic::AtomicUsize>) {
            let reads = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            (
                Self {
                    inner: MemoryFile::new(name, data),
                    reads: reads.clone(),
                    cancel_on_read: None,
                    pause_on_read: None,
                },
                reads,
            )
        }
    }

    #[async_trait]
    impl FileSource for InstrumentedFile {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn len(&self) -> u64 {
            self.inner.len()
        }

        async fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>, FileReadError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, control)) = &self.cancel_on_read {
                if n == *at {
                    control.cancel();
                }
            }
            if let Some((at, control)) = &self.pause_on_read {
                if n == *at {
                    control.pause();
                }
            }
            self.inner.read_range(offset, len).await
        }
    }

    struct FailingFile;

    #[async_trait]
    impl FileSource for FailingFile {
        fn name(&self) -> &str {
            "broken.bin"
        }

        fn len(&self) -> u64 {
            1024
        }

        async fn read_range(&self, _offset: u64, _len: usize) -> Result<Vec<u8>, FileReadError> {
            Err(FileReadError::Io(std::io::Error::other("device gone")))
        }
    }

    #[test]
    fn enqueue_dedupes_by_name_and_size() {
        let queue = SendQueue::default();
        assert_eq!(queue.enqueue(vec![boxed("a.txt", vec![0; 10])]), 1);
        assert_eq!(queue.enqueue(vec![boxed("a.txt", vec![1; 10])]), 0);
        assert_eq!(queue.enqueue(vec![boxed("a.txt", vec![0; 11])]), 1);
        assert_eq!(queue.enqueue(vec![boxed("b.txt", vec![0; 10])]), 1);
        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn chunking_matches_declared_sizes() {
        let (sender, _rx) = sender_parts();
        let data: Vec<u8> = (0..40000u32).map(|i| i as u8).collect();
        sender.queue.enqueue(vec![boxed("big.bin", data.clone())]);
        let channel = RecordingChannel::new();

        let sent = sender.clone().drain(channel.clone()).await.unwrap();
        assert_eq!(sent, 1);

        let messages = channel.sent();
        assert_eq!(messages.len(), 4); // header + 3 chunks
        assert!(protocol::decode_header(&messages[0]).is_some());
        assert_eq!(messages[1].len(), 16384);
        assert_eq!(messages[2].len(), 16384);
        assert_eq!(messages[3].len(), 7232);
        let rebuilt: Vec<u8> = messages[1..].concat();
        assert_eq!(rebuilt, data);
        assert_eq!(sender.telemetry.snapshot().transfer_state, TransferState::Done);
        assert_eq!(sender.telemetry.snapshot().progress_percent, 100);
    }

    #[tokio::test]
    async fn files_are_sent_sequentially_in_order() {
        let (sender, mut rx) = sender_parts();
        sender.queue.enqueue(vec![
            boxed("first.bin", vec![1u8; CHUNK_SIZE + 1]),
            boxed("second.bin", vec![2u8; 5]),
        ]);
        let channel = RecordingChannel::new();
        sender.clone().drain(channel.clone()).await.unwrap();

        let messages = channel.sent();
        let headers: Vec<(usize, FileHeader)> = messages
            .iter()
            .enumerate()
            .filter_map(|(i, m)| protocol::decode_header(m).map(|h| (i, h)))
            .collect();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].1.name, "first.bin");
        assert_eq!(headers[0].1.index, 1);
        assert_eq!(headers[0].1.total, 2);
        assert_eq!(headers[1].1.name, "second.bin");
        assert_eq!(headers[1].1.index, 2);
        // No interleaving: the second header comes after both chunks of the first.
        assert_eq!(headers[1].0, 3);

        assert!(matches!(rx.try_recv(), Ok(SessionEvent::FileSent { index: 1, .. })));
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::FileSent { index: 2, .. })));
    }

    #[tokio::test]
    async fn zero_byte_file_sends_header_only() {
        let (sender, _rx) = sender_parts();
        sender.queue.enqueue(vec![boxed("empty.txt", Vec::new())]);
        let channel = RecordingChannel::new();
        sender.clone().drain(channel.clone()).await.unwrap();

        let messages = channel.sent();
        assert_eq!(messages.len(), 1);
        let header = protocol::decode_header(&messages[0]).unwrap();
        assert_eq!(header.size, 0);
    }

    #[tokio::test]
    async fn cancel_during_read_discards_chunk_and_queue() {
        let (sender, _rx) = sender_parts();
        let (mut file, _reads) = InstrumentedFile::new("c.bin", vec![7u8; CHUNK_SIZE * 3]);
        file.cancel_on_read = Some((2, sender.control.clone()));
        sender.queue.enqueue(vec![
            Box::new(file) as Box<dyn FileSource>,
            boxed("never.bin", vec![0u8; 10]),
        ]);
        let channel = RecordingChannel::new();

        let result = sender.clone().drain(channel.clone()).await;
        assert!(matches!(result, Err(SendError::Cancelled)));
        // Header and first chunk went out; the chunk read when cancel landed
        // was discarded, and the second file never started.
        assert_eq!(channel.sent().len(), 2);
        assert!(sender.queue.is_empty());
        let snap = sender.telemetry.snapshot();
        assert_eq!(snap.transfer_state, TransferState::Cancelled);
        assert_eq!(snap.progress_percent, 0);
        assert_eq!(snap.current_file, None);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_loop_reads_and_sends_nothing() {
        let (sender, _rx) = sender_parts();
        let (mut file, reads) = InstrumentedFile::new("p.bin", vec![3u8; CHUNK_SIZE * 2]);
        file.pause_on_read = Some((1, sender.control.clone()));
        sender.queue.enqueue(vec![Box::new(file) as Box<dyn FileSource>]);
        let channel = RecordingChannel::new();

        let handle = tokio::spawn(sender.clone().drain(channel.clone()));

        tokio::time::sleep(Duration::from_secs(5)).await;
        // The chunk already in flight when pause landed still went out.
        assert_eq!(channel.sent().len(), 2);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(sender.telemetry.snapshot().transfer_state, TransferState::Paused);

        // A long pause reads and sends nothing further.
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(channel.sent().len(), 2);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        sender.control.resume();
        handle.await.unwrap().unwrap();
        assert_eq!(channel.sent().len(), 3);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_continues_from_prior_offset() {
        let (sender, _rx) = sender_parts();
        let data: Vec<u8> = (0..(CHUNK_SIZE * 3) as u32).map(|i| i as u8).collect();
        let (mut file, reads) = InstrumentedFile::new("r.bin", data.clone());
        file.pause_on_read = Some((1, sender.control.clone()));
        sender.queue.enqueue(vec![Box::new(file) as Box<dyn FileSource>]);
        let channel = RecordingChannel::new();

        let handle = tokio::spawn(sender.clone().drain(channel.clone()));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.telemetry.snapshot().transfer_state, TransferState::Paused);

        sender.control.resume();
        handle.await.unwrap().unwrap();

        // Each range was read exactly once and nothing was re-sent.
        assert_eq!(reads.load(Ordering::SeqCst), 3);
        let messages = channel.sent();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1..].concat(), data);
    }

    #[tokio::test]
    async fn read_failure_aborts_file_and_queue() {
        let (sender, mut rx) = sender_parts();
        sender.queue.enqueue(vec![
            Box::new(FailingFile) as Box<dyn FileSource>,
            boxed("after.bin", vec![0u8; 10]),
        ]);
        let channel = RecordingChannel::new();

        let result = sender.clone().drain(channel.clone()).await;
        assert!(matches!(result, Err(SendError::Read(_))));
        assert_eq!(channel.sent().len(), 1); // header only
        assert!(sender.queue.is_empty());
        assert_eq!(sender.telemetry.snapshot().transfer_state, TransferState::Idle);
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::TransferFailed(_))));
    }

    #[tokio::test]
    async fn channel_failure_aborts_drain() {
        let (sender, _rx) = sender_parts();
        sender.queue.enqueue(vec![boxed("x.bin", vec![0u8; CHUNK_SIZE * 2])]);
        let channel = RecordingChannel::failing_after(2); // header + one chunk

        let result = sender.clone().drain(channel).await;
        assert!(matches!(result, Err(SendError::Channel(ChannelError::Closed))));
        assert!(sender.queue.is_empty());
    }

    #[tokio::test]
    async fn concurrent_drain_is_rejected() {
        let (sender, _rx) = sender_parts();
        assert!(sender.control.begin_send());
        let result = sender.clone().drain(RecordingChannel::new()).await;
        assert!(matches!(result, Err(SendError::Busy)));
        // The losing drain must not clear the winner's sending flag.
        assert!(sender.control.is_sending());
    }
}
