//! Connection lifecycle: roles, statuses, legal transitions, and failure causes.

use std::fmt;

/// Which side of the rendezvous this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registers the room token and waits for exactly one inbound connection.
    Host,
    /// Connects to a host that already registered the token.
    Joiner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    /// Host only: token registered, nobody attached yet.
    Waiting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionStatus::Disconnected | ConnectionStatus::Error)
    }

    /// Transitions the session may take on its own, from transport and media events.
    /// Teardown and forced errors bypass this table (see `Session::leave`).
    pub fn can_transition_to(self, next: ConnectionStatus, role: Role) -> bool {
        use ConnectionStatus::*;
        match (self, next) {
            (Connecting, Waiting) => role == Role::Host,
            (Connecting, Connected) | (Connecting, Error) => true,
            (Waiting, Connected) | (Waiting, Error) => true,
            (Connected, Disconnected) => true,
            _ => false,
        }
    }

    /// Short text for status lines and overlays.
    pub fn hint(self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "Establishing a connection...",
            ConnectionStatus::Waiting => "Waiting for a peer. Share the room token to have them join.",
            ConnectionStatus::Connected => "Connected.",
            ConnectionStatus::Disconnected => "The other participant has left the meeting.",
            ConnectionStatus::Error => {
                "Could not connect to the room. Please check the room token and try again."
            }
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Waiting => "waiting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a session ended up in [`ConnectionStatus::Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("could not access camera and microphone: {0}")]
    MediaAcquisition(String),
    #[error("signaling failed: {0}")]
    Signaling(String),
    #[error("could not connect to the host; check the room token and make sure the host is waiting")]
    PeerUnavailable,
}

impl SessionError {
    /// What the operator should do about it.
    pub fn hint(&self) -> &'static str {
        match self {
            SessionError::MediaAcquisition(_) => {
                "Allow camera and microphone access, then start a new session."
            }
            SessionError::Signaling(_) => ConnectionStatus::Error.hint(),
            SessionError::PeerUnavailable => {
                "Could not connect to the host. Please check the room token and ensure the host is waiting."
            }
        }
    }
}
