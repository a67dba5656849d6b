//! Chat log: append-only, local sends interleaved with remote arrivals.

use crate::participant::{generate_id, Participant};
use crate::protocol::ChatEntry;

#[derive(Debug, Default)]
pub struct ChatLog {
    entries: Vec<ChatEntry>,
}

/// Build a local entry stamped now. `text` is trimmed; blank text yields `None`.
pub fn compose(sender: &Participant, text: &str) -> Option<ChatEntry> {
    let content = text.trim();
    if content.is_empty() {
        return None;
    }
    Some(ChatEntry {
        id: generate_id(),
        sender: sender.clone(),
        content: content.to_owned(),
        sent_at: chrono::Utc::now().timestamp_millis(),
    })
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry: a local one once its envelope exists, a remote one as received.
    /// Sender-supplied fields are trusted.
    pub fn push(&mut self, entry: ChatEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
