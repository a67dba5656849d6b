//! File transfer engine: per-file records, chunk accumulation, finalization,
//! and the sender-side queue of files waiting to be chunked out.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::chunk::ChunkCursor;
use crate::protocol::{FileMeta, Message};

/// A complete file: reassembled on the receiving side, or the source bytes on the sending side.
#[derive(Debug, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Cheap, shareable reference to an [`Artifact`]. Set at most once per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle(Arc<Artifact>);

impl ArtifactHandle {
    fn new(file_name: &str, mime_type: &str, data: Vec<u8>) -> Self {
        ArtifactHandle(Arc::new(Artifact {
            file_name: file_name.to_owned(),
            mime_type: mime_type.to_owned(),
            data,
        }))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0.data
    }

    pub fn file_name(&self) -> &str {
        &self.0.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.0.mime_type
    }

    pub fn len(&self) -> u64 {
        self.0.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.0.data.is_empty()
    }

    /// True when both handles point at the same artifact (not merely equal bytes).
    pub fn same_as(&self, other: &ArtifactHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    InProgress,
    Complete,
    /// Channel went away (or the session ended) before the transfer finished.
    Abandoned,
}

/// One file moving in either direction.
#[derive(Debug)]
pub struct FileTransferRecord {
    meta: FileMeta,
    direction: Direction,
    /// Inbound: bytes received. Outbound: bytes queued to the transport.
    received_bytes: u64,
    /// Inbound only; the sender keeps its bytes in the outgoing queue.
    chunks: Vec<Vec<u8>>,
    artifact: Option<ArtifactHandle>,
    abandoned: bool,
}

impl FileTransferRecord {
    fn new(meta: FileMeta, direction: Direction) -> Self {
        Self {
            meta,
            direction,
            received_bytes: 0,
            chunks: Vec::new(),
            artifact: None,
            abandoned: false,
        }
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }

    pub fn file_id(&self) -> &str {
        &self.meta.file_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_bytes
    }

    pub fn chunks(&self) -> &[Vec<u8>] {
        &self.chunks
    }

    pub fn artifact(&self) -> Option<&ArtifactHandle> {
        self.artifact.as_ref()
    }

    /// `received / size`, 0 for an empty file.
    pub fn progress(&self) -> f64 {
        if self.meta.file_size_bytes == 0 {
            return 0.0;
        }
        self.received_bytes as f64 / self.meta.file_size_bytes as f64
    }

    pub fn is_complete(&self) -> bool {
        self.artifact.is_some() || self.progress() >= 1.0
    }

    pub fn status(&self) -> TransferStatus {
        if self.is_complete() {
            TransferStatus::Complete
        } else if self.abandoned {
            TransferStatus::Abandoned
        } else {
            TransferStatus::InProgress
        }
    }

    fn accept_chunk(&mut self, chunk: Vec<u8>) -> ChunkOutcome {
        if self.artifact.is_some() || self.abandoned {
            return ChunkOutcome::Ignored;
        }
        let len = chunk.len() as u64;
        let total = self.received_bytes.saturating_add(len);
        if total > self.meta.file_size_bytes {
            return ChunkOutcome::Overflow;
        }
        self.received_bytes = total;
        self.chunks.push(chunk);
        ChunkOutcome::Accepted {
            received_bytes: total,
        }
    }

    fn finalize(&mut self) -> EndOutcome {
        if let Some(handle) = &self.artifact {
            return EndOutcome::AlreadyFinalized(handle.clone());
        }
        let data = self.chunks.concat();
        let handle = ArtifactHandle::new(&self.meta.file_name, &self.meta.mime_type, data);
        self.artifact = Some(handle.clone());
        EndOutcome::Finalized(handle)
    }
}

/// Result of feeding one inbound chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    Accepted { received_bytes: u64 },
    /// No `FileMeta` was seen for this id.
    UnknownFile,
    /// Would push `received_bytes` past the announced size; chunk dropped.
    Overflow,
    /// Transfer already finalized or abandoned.
    Ignored,
}

/// Result of an inbound `FileEnd`.
#[derive(Debug, PartialEq, Eq)]
pub enum EndOutcome {
    Finalized(ArtifactHandle),
    AlreadyFinalized(ArtifactHandle),
    UnknownFile,
}

/// All transfers of a session, in the order they were announced.
#[derive(Debug, Default)]
pub struct TransferTable {
    records: HashMap<String, FileTransferRecord>,
    order: Vec<String>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, meta: FileMeta, direction: Direction) {
        let id = meta.file_id.clone();
        if self
            .records
            .insert(id.clone(), FileTransferRecord::new(meta, direction))
            .is_some()
        {
            tracing::warn!(file_id = %id, "file id collision, replacing earlier transfer");
        } else {
            self.order.push(id);
        }
    }

    /// Inbound `FileMeta`: start an empty record.
    pub fn on_meta(&mut self, meta: FileMeta) {
        self.insert(meta, Direction::Inbound);
    }

    /// Inbound `FileChunk`.
    pub fn on_chunk(&mut self, file_id: &str, chunk: Vec<u8>) -> ChunkOutcome {
        match self.records.get_mut(file_id) {
            Some(record) => record.accept_chunk(chunk),
            None => ChunkOutcome::UnknownFile,
        }
    }

    /// Inbound `FileEnd`: concatenate what arrived into the artifact. Idempotent.
    pub fn on_end(&mut self, file_id: &str) -> EndOutcome {
        match self.records.get_mut(file_id) {
            Some(record) => record.finalize(),
            None => EndOutcome::UnknownFile,
        }
    }

    /// Outbound file announced locally.
    pub fn begin_outbound(&mut self, meta: FileMeta) {
        self.insert(meta, Direction::Outbound);
    }

    fn record_queued(&mut self, file_id: &str, queued_bytes: u64) {
        if let Some(record) = self.records.get_mut(file_id) {
            record.received_bytes = queued_bytes.min(record.meta.file_size_bytes);
        }
    }

    fn complete_outbound(&mut self, file_id: &str, data: Vec<u8>) -> Option<ArtifactHandle> {
        let record = self.records.get_mut(file_id)?;
        record.received_bytes = record.meta.file_size_bytes;
        let handle = ArtifactHandle::new(&record.meta.file_name, &record.meta.mime_type, data);
        record.artifact = Some(handle.clone());
        Some(handle)
    }

    /// Mark every unfinished transfer as abandoned. Returns the ids touched.
    pub fn abandon_unfinished(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        for id in &self.order {
            if let Some(record) = self.records.get_mut(id) {
                if !record.is_complete() && !record.abandoned {
                    record.abandoned = true;
                    out.push(id.clone());
                }
            }
        }
        out
    }

    pub fn get(&self, file_id: &str) -> Option<&FileTransferRecord> {
        self.records.get(file_id)
    }

    /// Records in announcement order.
    pub fn iter(&self) -> impl Iterator<Item = &FileTransferRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Source file handed to the session by the host. Already fully read.
#[derive(Debug, Clone)]
pub struct OutgoingFile {
    pub name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// An outbound file waiting for its remaining chunks to be sent.
#[derive(Debug)]
pub struct OutgoingTransfer {
    file_id: String,
    cursor: ChunkCursor,
}

impl OutgoingTransfer {
    pub fn new(file_id: String, data: Vec<u8>, chunk_size: u64) -> Self {
        Self {
            file_id,
            cursor: ChunkCursor::new(data, chunk_size),
        }
    }
}

/// One step of an outbound transfer.
#[derive(Debug)]
pub enum OutgoingStep {
    /// More to come; send this message and come back.
    Chunk(Message),
    /// Last message of the transfer (`FileEnd`); artifact is now published.
    Finished(Message, Option<ArtifactHandle>),
}

impl OutgoingTransfer {
    /// Produce the next message and update the local record. Consumes `self` on the final step.
    pub fn step(mut self, table: &mut TransferTable) -> (OutgoingStep, Option<OutgoingTransfer>) {
        match self.cursor.next_chunk() {
            Some(chunk) => {
                table.record_queued(&self.file_id, self.cursor.offset());
                let msg = Message::FileChunk {
                    file_id: self.file_id.clone(),
                    chunk,
                };
                (OutgoingStep::Chunk(msg), Some(self))
            }
            None => {
                let handle = table.complete_outbound(&self.file_id, self.cursor.into_inner());
                let msg = Message::FileEnd {
                    file_id: self.file_id,
                };
                (OutgoingStep::Finished(msg, handle), None)
            }
        }
    }
}

/// Error rejecting an outgoing file before anything is sent.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("file is too large ({}); maximum size is {}", byte_size(.size), byte_size(.max))]
    TooLarge { size: u64, max: u64 },
}

/// Human-readable byte count, 1024 base: `0 Bytes`, `1.5 KB`, `10 MB`.
pub fn format_bytes(bytes: u64) -> String {
    ByteSize(bytes).to_string()
}

fn byte_size(bytes: &u64) -> ByteSize {
    ByteSize(*bytes)
}

struct ByteSize(u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
        if self.0 == 0 {
            return write!(f, "0 Bytes");
        }
        let mut value = self.0 as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        let rounded = (value * 100.0).round() / 100.0;
        write!(f, "{} {}", rounded, UNITS[unit])
    }
}
