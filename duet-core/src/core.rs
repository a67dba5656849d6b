//! Host-driven API: Session receives events from the host, returns actions.
//! All mutation happens here, from one dispatch context at a time.

use std::collections::VecDeque;

use crate::chat::{self, ChatLog};
use crate::chunk::{effective_chunk_size, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_FILE_SIZE};
use crate::media::{LocalStream, MediaError, RemoteStream};
use crate::participant::{generate_id, Participant};
use crate::presence::PresenceTracker;
use crate::protocol::{ChatEntry, FileMeta, Message};
use crate::status::{ConnectionStatus, Role, SessionError};
use crate::transfer::{
    ArtifactHandle, ChunkOutcome, EndOutcome, OutgoingFile, OutgoingStep, OutgoingTransfer,
    TransferError, TransferTable,
};
use crate::transport::TransportEvent;
use crate::wire::{self, FrameEncodeError};

/// Limits the core depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Largest `FileChunk` payload. 0 means [`DEFAULT_CHUNK_SIZE`]; capped at
    /// [`MAX_CHUNK_SIZE`](crate::chunk::MAX_CHUNK_SIZE) so every chunk fits in one frame.
    pub chunk_size: u64,
    /// Files above this are refused before anything is sent.
    pub max_file_size: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl SessionConfig {
    /// Same limits with the chunk size the session will actually use.
    pub fn normalized(self) -> Self {
        Self {
            chunk_size: effective_chunk_size(self.chunk_size),
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    None,
    /// Joiner asked the transport to connect; not open yet.
    Pending,
    Open,
    Closed,
}

/// Action for host to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundAction {
    /// Claim the room token and listen for one inbound connection.
    RegisterAsHost,
    /// Open the data channel and the media call toward the room token.
    ConnectToHost,
    /// Put this envelope on the data channel.
    Send(String),
    StatusChanged(ConnectionStatus),
    /// Failure to surface to the operator.
    Alert(SessionError),
    PeerIdentified(Participant),
    ChatReceived(ChatEntry),
    FileAnnounced(String),
    TransferProgress { file_id: String, received_bytes: u64 },
    TransferComplete(String, ArtifactHandle),
    /// Pending outbound/inbound transfers cut short by a close or teardown.
    TransfersAbandoned(Vec<String>),
    CloseMediaCall,
    CloseChannel,
    /// Stop capture on this stream.
    ReleaseDevices(LocalStream),
}

/// One two-party session: status, identities, chat, transfers.
pub struct Session {
    role: Role,
    room_token: String,
    config: SessionConfig,
    status: ConnectionStatus,
    last_error: Option<SessionError>,
    presence: PresenceTracker,
    chat: ChatLog,
    transfers: TransferTable,
    outgoing: VecDeque<OutgoingTransfer>,
    channel: Channel,
    media_call_open: bool,
    local_stream: Option<LocalStream>,
    remote_stream: Option<RemoteStream>,
}

impl Session {
    pub fn new(role: Role, room_token: impl Into<String>, local: Participant) -> Self {
        Self::with_config(role, room_token, local, SessionConfig::default())
    }

    pub fn with_config(
        role: Role,
        room_token: impl Into<String>,
        local: Participant,
        config: SessionConfig,
    ) -> Self {
        Self {
            role,
            room_token: room_token.into(),
            config: config.normalized(),
            status: ConnectionStatus::Connecting,
            last_error: None,
            presence: PresenceTracker::new(local),
            chat: ChatLog::new(),
            transfers: TransferTable::new(),
            outgoing: VecDeque::new(),
            channel: Channel::None,
            media_call_open: false,
            local_stream: None,
            remote_stream: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn room_token(&self) -> &str {
        &self.room_token
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    pub fn local(&self) -> &Participant {
        self.presence.local()
    }

    pub fn remote(&self) -> Option<&Participant> {
        self.presence.remote()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn transfers(&self) -> &TransferTable {
        &self.transfers
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> Option<&RemoteStream> {
        self.remote_stream.as_ref()
    }

    pub fn is_muted(&self) -> bool {
        self.local_stream
            .as_ref()
            .map(|s| s.has_audio && !s.audio_enabled)
            .unwrap_or(false)
    }

    pub fn is_camera_off(&self) -> bool {
        self.local_stream
            .as_ref()
            .map(|s| s.has_video && !s.video_enabled)
            .unwrap_or(false)
    }

    /// Take a transition from the lifecycle table. Refused transitions are logged and dropped.
    fn transition(&mut self, next: ConnectionStatus, actions: &mut Vec<OutboundAction>) -> bool {
        if !self.status.can_transition_to(next, self.role) {
            tracing::warn!(from = %self.status, to = %next, "refusing status transition");
            return false;
        }
        self.set_status(next, actions);
        true
    }

    /// Move to a terminal status regardless of the table (teardown, forced errors).
    fn force_terminal(&mut self, next: ConnectionStatus, actions: &mut Vec<OutboundAction>) {
        debug_assert!(next.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.set_status(next, actions);
    }

    fn set_status(&mut self, next: ConnectionStatus, actions: &mut Vec<OutboundAction>) {
        tracing::info!(from = %self.status, to = %next, role = ?self.role, "session status");
        self.status = next;
        actions.push(OutboundAction::StatusChanged(next));
        if next.is_terminal() {
            self.drop_pending_transfers(actions);
        }
    }

    fn fail(&mut self, err: SessionError, actions: &mut Vec<OutboundAction>) {
        if self.status.is_terminal() {
            tracing::debug!(error = %err, "error after session ended, ignoring");
            return;
        }
        tracing::warn!(error = %err, "session failed");
        self.last_error = Some(err.clone());
        self.force_terminal(ConnectionStatus::Error, actions);
        actions.push(OutboundAction::Alert(err));
    }

    fn drop_pending_transfers(&mut self, actions: &mut Vec<OutboundAction>) {
        self.outgoing.clear();
        let abandoned = self.transfers.abandon_unfinished();
        if !abandoned.is_empty() {
            tracing::info!(count = abandoned.len(), "abandoning unfinished transfers");
            actions.push(OutboundAction::TransfersAbandoned(abandoned));
        }
    }

    /// Local capture is ready: register (host) or connect (joiner).
    pub fn on_media_acquired(&mut self, stream: LocalStream) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        if self.status != ConnectionStatus::Connecting {
            return actions;
        }
        self.local_stream = Some(stream);
        match self.role {
            Role::Host => actions.push(OutboundAction::RegisterAsHost),
            Role::Joiner => {
                self.channel = Channel::Pending;
                self.media_call_open = true;
                actions.push(OutboundAction::ConnectToHost);
            }
        }
        actions
    }

    /// Capture failed: the session cannot start.
    pub fn on_media_failed(&mut self, err: MediaError) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        self.fail(SessionError::MediaAcquisition(err.to_string()), &mut actions);
        actions
    }

    /// Dispatch one transport event.
    pub fn on_transport_event(&mut self, event: TransportEvent) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        match event {
            TransportEvent::Registered => {
                self.transition(ConnectionStatus::Waiting, &mut actions);
            }
            TransportEvent::Opened => self.on_channel_opened(&mut actions),
            TransportEvent::DataReceived(text) => self.on_data_received(&text, &mut actions),
            TransportEvent::Closed => self.on_channel_closed(&mut actions),
            TransportEvent::Error(err) => self.fail(err.into(), &mut actions),
            TransportEvent::SignalingDisconnected => {
                self.force_terminal(ConnectionStatus::Disconnected, &mut actions);
            }
            TransportEvent::RemoteStreamAvailable(stream) => {
                if !self.status.is_terminal() {
                    self.media_call_open = true;
                    self.remote_stream = Some(stream);
                }
            }
        }
        actions
    }

    fn on_channel_opened(&mut self, actions: &mut Vec<OutboundAction>) {
        if !self.transition(ConnectionStatus::Connected, actions) {
            return;
        }
        self.channel = Channel::Open;
        if let Some(action) = self.encode(&self.presence.announcement()) {
            actions.push(action);
        }
    }

    fn on_channel_closed(&mut self, actions: &mut Vec<OutboundAction>) {
        if self.channel == Channel::Closed {
            tracing::debug!("channel already closed");
            return;
        }
        let was_open = self.channel == Channel::Open;
        self.channel = Channel::Closed;
        self.remote_stream = None;
        self.presence.clear_remote();
        if was_open {
            self.transition(ConnectionStatus::Disconnected, actions);
        } else {
            self.fail(
                SessionError::Signaling("data channel closed before opening".into()),
                actions,
            );
        }
    }

    fn on_data_received(&mut self, text: &str, actions: &mut Vec<OutboundAction>) {
        if self.status != ConnectionStatus::Connected {
            tracing::debug!(status = %self.status, "data outside a connected session, dropping");
            return;
        }
        let msg = match wire::decode_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(error = %e, "undecodable payload, dropping");
                return;
            }
        };
        match msg {
            Message::Chat(entry) => {
                self.chat.push(entry.clone());
                actions.push(OutboundAction::ChatReceived(entry));
            }
            Message::Presence { user } => {
                if self.presence.on_presence(user.clone()) {
                    actions.push(OutboundAction::PeerIdentified(user));
                }
            }
            Message::FileMeta(meta) => {
                let file_id = meta.file_id.clone();
                self.transfers.on_meta(meta);
                actions.push(OutboundAction::FileAnnounced(file_id));
            }
            Message::FileChunk { file_id, chunk } => {
                match self.transfers.on_chunk(&file_id, chunk) {
                    ChunkOutcome::Accepted { received_bytes } => {
                        actions.push(OutboundAction::TransferProgress {
                            file_id,
                            received_bytes,
                        });
                    }
                    ChunkOutcome::UnknownFile => {
                        tracing::debug!(file_id = %file_id, "chunk for unknown file, dropping");
                    }
                    ChunkOutcome::Overflow => {
                        tracing::warn!(file_id = %file_id, "chunk exceeds announced size, dropping");
                    }
                    ChunkOutcome::Ignored => {}
                }
            }
            Message::FileEnd { file_id } => match self.transfers.on_end(&file_id) {
                EndOutcome::Finalized(handle) => {
                    let announced = self
                        .transfers
                        .get(&file_id)
                        .map_or(0, |r| r.meta().file_size_bytes);
                    if handle.len() != announced {
                        tracing::warn!(
                            file_id = %file_id,
                            got = handle.len(),
                            announced,
                            "file ended short of announced size"
                        );
                    }
                    actions.push(OutboundAction::TransferComplete(file_id, handle));
                }
                EndOutcome::AlreadyFinalized(_) => {
                    tracing::debug!(file_id = %file_id, "duplicate file end");
                }
                EndOutcome::UnknownFile => {
                    tracing::debug!(file_id = %file_id, "end for unknown file, dropping");
                }
            },
            Message::Unknown => {
                tracing::debug!("unknown message kind, ignoring");
            }
        }
    }

    fn encode(&self, msg: &Message) -> Option<OutboundAction> {
        match wire::encode_message(msg) {
            Ok(text) => Some(OutboundAction::Send(text)),
            Err(e) => {
                tracing::warn!(kind = msg.kind(), error = %e, "failed to encode message");
                None
            }
        }
    }

    fn ensure_connected(&self) -> Result<(), SendError> {
        if self.status == ConnectionStatus::Connected && self.channel == Channel::Open {
            Ok(())
        } else {
            Err(SendError::NotConnected(self.status))
        }
    }

    /// Produce the envelope for a chat line and append the line locally.
    /// Nothing is logged unless the envelope was built.
    pub fn send_chat(&mut self, text: &str) -> Result<Vec<OutboundAction>, SendError> {
        self.ensure_connected()?;
        let entry = chat::compose(self.presence.local(), text).ok_or(SendError::EmptyMessage)?;
        let payload = wire::encode_message(&Message::Chat(entry.clone()))?;
        self.chat.push(entry);
        Ok(vec![OutboundAction::Send(payload)])
    }

    /// Announce a file and queue its chunks. Returns the new file id and the `FileMeta` send.
    /// Chunks go out one per [`Session::pump_outgoing`] call.
    pub fn send_file(
        &mut self,
        file: OutgoingFile,
    ) -> Result<(String, Vec<OutboundAction>), SendError> {
        self.ensure_connected()?;
        let size = file.data.len() as u64;
        if size > self.config.max_file_size {
            return Err(TransferError::TooLarge {
                size,
                max: self.config.max_file_size,
            }
            .into());
        }
        let file_id = generate_id();
        let meta = FileMeta {
            file_id: file_id.clone(),
            file_name: file.name,
            file_size_bytes: size,
            mime_type: file.mime_type,
            sender: self.presence.local().clone(),
        };
        let payload = wire::encode_message(&Message::FileMeta(meta.clone()))?;
        tracing::info!(file_id = %file_id, name = %meta.file_name, size, "sending file");
        self.transfers.begin_outbound(meta);
        self.outgoing.push_back(OutgoingTransfer::new(
            file_id.clone(),
            file.data,
            self.config.chunk_size,
        ));
        Ok((file_id, vec![OutboundAction::Send(payload)]))
    }

    pub fn has_pending_chunks(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Produce the next outbound file message (a chunk, or the final `FileEnd`).
    /// Several queued files take turns. Host yields to its scheduler between calls.
    pub fn pump_outgoing(&mut self) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        if self.ensure_connected().is_err() {
            self.outgoing.clear();
            return actions;
        }
        let Some(transfer) = self.outgoing.pop_front() else {
            return actions;
        };
        let (step, rest) = transfer.step(&mut self.transfers);
        if let Some(rest) = rest {
            self.outgoing.push_back(rest);
        }
        match step {
            OutgoingStep::Chunk(msg) => {
                if let Some(action) = self.encode(&msg) {
                    actions.push(action);
                }
            }
            OutgoingStep::Finished(msg, handle) => {
                if let Some(action) = self.encode(&msg) {
                    actions.push(action);
                }
                if let (Some(file_id), Some(handle)) = (msg.file_id(), handle) {
                    actions.push(OutboundAction::TransferComplete(file_id.to_owned(), handle));
                }
            }
        }
        actions
    }

    /// Flip the local audio track. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> Option<bool> {
        self.local_stream.as_mut().and_then(LocalStream::toggle_audio)
    }

    /// Flip the local video track. Returns the new camera-off state.
    pub fn toggle_camera(&mut self) -> Option<bool> {
        self.local_stream.as_mut().and_then(LocalStream::toggle_video)
    }

    /// Tear the session down: media call, data channel, devices, then a terminal status.
    /// Safe to call repeatedly; later calls only emit what is still held.
    pub fn leave(&mut self) -> Vec<OutboundAction> {
        let mut actions = Vec::new();
        if self.media_call_open {
            self.media_call_open = false;
            self.remote_stream = None;
            actions.push(OutboundAction::CloseMediaCall);
        }
        if matches!(self.channel, Channel::Pending | Channel::Open) {
            self.channel = Channel::Closed;
            actions.push(OutboundAction::CloseChannel);
        }
        if let Some(stream) = self.local_stream.take() {
            actions.push(OutboundAction::ReleaseDevices(stream));
        }
        self.force_terminal(ConnectionStatus::Disconnected, &mut actions);
        actions
    }
}

/// Error from a local send request.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected (status: {0})")]
    NotConnected(ConnectionStatus),
    #[error("message is empty")]
    EmptyMessage,
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}
