//! Events a transport adapter raises toward the session. Payloads are opaque text
//! envelopes; the adapter never looks inside them.

use crate::media::RemoteStream;
use crate::status::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Host claimed the room token with the rendezvous service.
    Registered,
    /// Data channel is open in both directions.
    Opened,
    DataReceived(String),
    /// Data channel closed (remote left or its process died).
    Closed,
    Error(SignalingError),
    /// Lost the rendezvous service itself.
    SignalingDisconnected,
    RemoteStreamAvailable(RemoteStream),
}

/// Failures reported by the rendezvous/signaling collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalingError {
    /// Nobody is listening on the room token.
    #[error("peer unavailable")]
    PeerUnavailable,
    /// Token already claimed by another host.
    #[error("room token {0} is already taken")]
    TokenTaken(String),
    #[error("{0}")]
    Other(String),
}

impl From<SignalingError> for SessionError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::PeerUnavailable => SessionError::PeerUnavailable,
            other => SessionError::Signaling(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_unavailable_is_kept_distinct() {
        assert_eq!(
            SessionError::from(SignalingError::PeerUnavailable),
            SessionError::PeerUnavailable
        );
        assert_eq!(
            SessionError::from(SignalingError::Other("timeout".into())),
            SessionError::Signaling("timeout".into())
        );
    }
}
