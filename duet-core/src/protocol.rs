//! Duet data-channel protocol: message kinds and their payloads.

use serde::{Deserialize, Serialize};

use crate::participant::Participant;

pub const KIND_CHAT: &str = "chat";
pub const KIND_PRESENCE: &str = "user-info";
pub const KIND_FILE_META: &str = "file-meta";
pub const KIND_FILE_CHUNK: &str = "file-chunk";
pub const KIND_FILE_END: &str = "file-end";

/// One chat line. Also the payload of [`Message::Chat`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: String,
    pub sender: Participant,
    pub content: String,
    /// Milliseconds since the Unix epoch, sender's clock.
    #[serde(rename = "timestamp", alias = "sentAt")]
    pub sent_at: i64,
}

/// File announcement sent before any chunk of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub file_id: String,
    pub file_name: String,
    #[serde(rename = "fileSize", alias = "fileSizeBytes")]
    pub file_size_bytes: u64,
    #[serde(rename = "fileType", alias = "mimeType")]
    pub mime_type: String,
    pub sender: Participant,
}

/// All data-channel messages. JSON object, discriminated by the `"type"` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "chat")]
    Chat(ChatEntry),
    /// Identity announcement, sent once right after the channel opens.
    #[serde(rename = "user-info")]
    Presence { user: Participant },
    #[serde(rename = "file-meta")]
    FileMeta(FileMeta),
    /// Raw chunk bytes travel as an array of byte values so the envelope stays text.
    #[serde(rename = "file-chunk", rename_all = "camelCase")]
    FileChunk { file_id: String, chunk: Vec<u8> },
    #[serde(rename = "file-end", rename_all = "camelCase")]
    FileEnd { file_id: String },
    /// Any kind this build does not know. Receivers drop it.
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Discriminator value as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Chat(_) => KIND_CHAT,
            Message::Presence { .. } => KIND_PRESENCE,
            Message::FileMeta(_) => KIND_FILE_META,
            Message::FileChunk { .. } => KIND_FILE_CHUNK,
            Message::FileEnd { .. } => KIND_FILE_END,
            Message::Unknown => "unknown",
        }
    }

    /// Transfer this message belongs to, if any.
    pub fn file_id(&self) -> Option<&str> {
        match self {
            Message::FileMeta(meta) => Some(&meta.file_id),
            Message::FileChunk { file_id, .. } | Message::FileEnd { file_id } => Some(file_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Participant {
        Participant::new("a1", "Alice", "#f87171")
    }

    #[test]
    fn chat_wire_shape() {
        let msg = Message::Chat(ChatEntry {
            id: "c1".into(),
            sender: alice(),
            content: "hello".into(),
            sent_at: 1_700_000_000_000,
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "chat");
        assert_eq!(json["content"], "hello");
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["sender"]["name"], "Alice");
    }

    #[test]
    fn file_meta_wire_shape() {
        let msg = Message::FileMeta(FileMeta {
            file_id: "f1".into(),
            file_name: "a.png".into(),
            file_size_bytes: 42,
            mime_type: "image/png".into(),
            sender: alice(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file-meta");
        assert_eq!(json["fileId"], "f1");
        assert_eq!(json["fileName"], "a.png");
        assert_eq!(json["fileSize"], 42);
        assert_eq!(json["fileType"], "image/png");
    }

    #[test]
    fn chunk_bytes_are_a_number_array() {
        let msg = Message::FileChunk {
            file_id: "f1".into(),
            chunk: vec![0, 127, 255],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "file-chunk");
        assert_eq!(json["chunk"], serde_json::json!([0, 127, 255]));
    }

    #[test]
    fn unknown_kind_parses_as_unknown() {
        let msg: Message =
            serde_json::from_str(r#"{"type":"typing","who":"a1"}"#).unwrap();
        assert_eq!(msg, Message::Unknown);
    }

    #[test]
    fn long_field_names_are_accepted() {
        let text = r##"{"type":"file-meta","fileId":"f2","fileName":"b.txt","fileSizeBytes":7,
            "mimeType":"text/plain","sender":{"id":"a1","name":"Alice","color":"#f87171"}}"##;
        match serde_json::from_str::<Message>(text).unwrap() {
            Message::FileMeta(meta) => {
                assert_eq!(meta.file_size_bytes, 7);
                assert_eq!(meta.mime_type, "text/plain");
            }
            other => panic!("expected FileMeta, got {other:?}"),
        }
    }

    #[test]
    fn kind_matches_tag() {
        let msg = Message::FileEnd {
            file_id: "f9".into(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], msg.kind());
        assert_eq!(msg.file_id(), Some("f9"));
    }
}
