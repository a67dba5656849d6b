//! Duet session core: a two-party room with chat, presence and file transfer.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod chat;
pub mod chunk;
pub mod core;
pub mod media;
pub mod participant;
pub mod presence;
pub mod protocol;
pub mod room;
pub mod status;
pub mod transfer;
pub mod transport;
pub mod wire;

pub use crate::core::{OutboundAction, SendError, Session, SessionConfig};
pub use chunk::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE, MAX_CHUNK_SIZE};
pub use media::{LocalStream, MediaDevices, MediaError, RemoteStream};
pub use participant::Participant;
pub use protocol::{ChatEntry, FileMeta, Message};
pub use room::{display_room_token, generate_room_token};
pub use status::{ConnectionStatus, Role, SessionError};
pub use transfer::{
    format_bytes, ArtifactHandle, Direction, FileTransferRecord, OutgoingFile, TransferError,
    TransferStatus,
};
pub use transport::{SignalingError, TransportEvent};
pub use wire::{encode_frame, FrameDecodeError, FrameEncodeError};
