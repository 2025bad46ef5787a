//! Transfer wire format: `file-header` JSON text followed by raw binary chunks.

use serde::Deserialize;

/// Fixed chunk size in bytes. The final chunk of a file may be shorter.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Tag value identifying a header message on the wire.
pub const FILE_HEADER_TYPE: &str = "file-header";

/// Authoritative metadata for the file in flight, sent before its chunk stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileHeader {
    pub name: String,
    pub size: u64,
    /// 1-based position in the send queue.
    pub index: u32,
    /// Total files queued when the send began.
    pub total: u32,
}

/// A peer channel message, classified by the receiver's decode rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferMessage {
    /// Text that decoded and parsed as the header JSON shape.
    Header(FileHeader),
    /// Anything else: a binary chunk of the file currently in flight.
    Chunk(Vec<u8>),
}

/// Encode a header as its wire JSON text.
pub fn encode_header(header: &FileHeader) -> String {
    serde_json::json!({
        "type": FILE_HEADER_TYPE,
        "name": header.name,
        "size": header.size,
        "index": header.index,
        "total": header.total,
    })
    .to_string()
}

/// Try to decode a payload as header text. `None` if it is not UTF-8, not JSON,
/// or not tagged `file-header`.
pub fn decode_header(payload: &[u8]) -> Option<FileHeader> {
    let text = std::str::from_utf8(payload).ok()?;
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("type")?.as_str()? != FILE_HEADER_TYPE {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Classify one in-order message: header if it parses as one, chunk otherwise.
pub fn classify(payload: &[u8]) -> TransferMessage {
    match decode_header(payload) {
        Some(header) => TransferMessage::Header(header),
        None => TransferMessage::Chunk(payload.to_vec()),
    }
}
