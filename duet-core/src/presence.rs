//! Presence: who is on the other end.

use crate::participant::Participant;
use crate::protocol::Message;

#[derive(Debug)]
pub struct PresenceTracker {
    local: Participant,
    remote: Option<Participant>,
}

impl PresenceTracker {
    pub fn new(local: Participant) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn local(&self) -> &Participant {
        &self.local
    }

    pub fn remote(&self) -> Option<&Participant> {
        self.remote.as_ref()
    }

    /// The one-shot announcement sent when the channel opens.
    pub fn announcement(&self) -> Message {
        Message::Presence {
            user: self.local.clone(),
        }
    }

    /// Store (or replace) the remote identity. Returns true if it changed.
    pub fn on_presence(&mut self, user: Participant) -> bool {
        let changed = self.remote.as_ref() != Some(&user);
        self.remote = Some(user);
        changed
    }

    pub fn clear_remote(&mut self) {
        self.remote = None;
    }

    /// Name to show for the peer: announced name, or a placeholder before presence arrives.
    pub fn remote_label(&self) -> &str {
        self.remote
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or("Peer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announcement_carries_local_identity() {
        let me = Participant::new("me", "Alice", "#f87171");
        let tracker = PresenceTracker::new(me.clone());
        assert_eq!(tracker.announcement(), Message::Presence { user: me });
    }

    #[test]
    fn reannounce_overwrites() {
        let mut tracker = PresenceTracker::new(Participant::new("me", "Alice", "#f87171"));
        assert_eq!(tracker.remote_label(), "Peer");
        assert!(tracker.on_presence(Participant::new("p", "Bob", "#60a5fa")));
        assert!(!tracker.on_presence(Participant::new("p", "Bob", "#60a5fa")));
        assert!(tracker.on_presence(Participant::new("p", "Robert", "#60a5fa")));
        assert_eq!(tracker.remote_label(), "Robert");
        tracker.clear_remote();
        assert!(tracker.remote().is_none());
    }
}
