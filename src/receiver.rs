//! Transfer receiver: reassembles header + chunk streams into artifacts.
//!
//! No reordering or gap-filling: in-order delivery is the channel's job. At
//! most one incoming file context exists at a time.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::protocol::{self, FileHeader, TransferMessage};
use crate::telemetry::{self, Direction, FileInfo, TelemetryHandle};

/// A fully reassembled incoming file, tagged with its header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// A chunk arrived with no open file context. Logged and ignored by the
/// session; the transfer continues.
#[derive(Debug, thiserror::Error)]
#[error("chunk of {len} bytes arrived with no open file context")]
pub struct ProtocolViolation {
    pub len: usize,
}

/// The file currently being reassembled.
struct IncomingFile {
    header: FileHeader,
    chunks: Vec<Vec<u8>>,
    bytes_received: u64,
    last_chunk: Instant,
}

pub struct Receiver {
    context: Option<IncomingFile>,
    telemetry: TelemetryHandle,
}

impl Receiver {
    pub fn new(telemetry: TelemetryHandle) -> Self {
        Self {
            context: None,
            telemetry,
        }
    }

    pub fn awaiting_header(&self) -> bool {
        self.context.is_none()
    }

    /// Ingest one in-order channel message. Returns a completed artifact once
    /// the accumulated bytes reach the declared size.
    pub fn on_message(&mut self, payload: &[u8]) -> Result<Option<Artifact>, ProtocolViolation> {
        match protocol::classify(payload) {
            TransferMessage::Header(header) => Ok(self.on_header(header)),
            TransferMessage::Chunk(chunk) => self.on_chunk(chunk),
        }
    }

    fn on_header(&mut self, header: FileHeader) -> Option<Artifact> {
        if let Some(unfinished) = self.context.take() {
            // Tolerant policy: an early header discards the unfinished file.
            warn!(
                name = %unfinished.header.name,
                received = unfinished.bytes_received,
                declared = unfinished.header.size,
                "new header before previous file completed; partial file discarded"
            );
        }
        info!(
            name = %header.name,
            size = header.size,
            index = header.index,
            total = header.total,
            "incoming file"
        );
        self.telemetry.begin_file(FileInfo {
            name: header.name.clone(),
            size: header.size,
            index: header.index,
            total: header.total,
            direction: Direction::Receive,
        });
        let context = IncomingFile {
            header,
            chunks: Vec::new(),
            bytes_received: 0,
            last_chunk: Instant::now(),
        };
        if context.header.size == 0 {
            // Nothing to wait for: complete on the header alone.
            return Some(self.finish(context));
        }
        self.context = Some(context);
        None
    }

    fn on_chunk(&mut self, chunk: Vec<u8>) -> Result<Option<Artifact>, ProtocolViolation> {
        let Some(context) = self.context.as_mut() else {
            warn!(len = chunk.len(), "chunk with no open file context; ignored");
            return Err(ProtocolViolation { len: chunk.len() });
        };
        let len = chunk.len();
        context.bytes_received += len as u64;
        context.chunks.push(chunk);

        let elapsed_ms = context.last_chunk.elapsed().as_millis() as u64;
        context.last_chunk = Instant::now();
        let progress = telemetry::progress_percent(context.bytes_received, context.header.size);
        self.telemetry
            .record_chunk(progress, telemetry::throughput_mbps(len, elapsed_ms));

        if context.bytes_received >= context.header.size {
            if let Some(context) = self.context.take() {
                return Ok(Some(self.finish(context)));
            }
        }
        Ok(None)
    }

    /// Concatenate the buffered chunks and return to the await-header state.
    fn finish(&self, context: IncomingFile) -> Artifact {
        let declared = context.header.size as usize;
        let mut bytes = Vec::with_capacity(declared);
        for chunk in &context.chunks {
            bytes.extend_from_slice(chunk);
        }
        if bytes.len() > declared {
            debug!(
                name = %context.header.name,
                excess = bytes.len() - declared,
                "chunk stream overshot declared size; trailing bytes dropped"
            );
            bytes.truncate(declared);
        }
        info!(name = %context.header.name, len = bytes.len(), "file complete");
        self.telemetry.clear_file();
        Artifact {
            name: context.header.name,
            bytes,
        }
    }
}
