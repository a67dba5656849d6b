//! Codec: JSON text envelope per message, plus length-prefix framing (4 bytes LE)
//! for transports that carry a byte stream instead of discrete messages.

use crate::protocol::Message;

pub const LEN_SIZE: usize = 4;
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024; // 16 MiB

/// Encode a message into its text envelope.
pub fn encode_message(msg: &Message) -> Result<String, FrameEncodeError> {
    if matches!(msg, Message::Unknown) {
        return Err(FrameEncodeError::UnknownKind);
    }
    serde_json::to_string(msg).map_err(FrameEncodeError::Encode)
}

/// Decode a text envelope. Unknown kinds come back as [`Message::Unknown`], not an error.
pub fn decode_message(text: &str) -> Result<Message, FrameDecodeError> {
    serde_json::from_str(text).map_err(FrameDecodeError::Decode)
}

/// Wrap one envelope into a frame: 4 bytes LE length + UTF-8 payload.
pub fn encode_frame(payload: &str) -> Result<Vec<u8>, FrameEncodeError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameEncodeError::TooLarge)?;
    if len > MAX_FRAME_LEN {
        return Err(FrameEncodeError::TooLarge);
    }
    let mut out = Vec::with_capacity(LEN_SIZE + payload.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload.as_bytes());
    Ok(out)
}

/// Validate a length prefix read off a stream.
pub fn frame_len(prefix: [u8; LEN_SIZE]) -> Result<usize, FrameDecodeError> {
    let len = u32::from_le_bytes(prefix);
    if len > MAX_FRAME_LEN {
        return Err(FrameDecodeError::TooLarge);
    }
    Ok(len as usize)
}

/// Error encoding a message (serializer, unknown kind, or size limit).
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cannot encode a message of unknown kind")]
    UnknownKind,
    #[error("frame too large")]
    TooLarge,
}

/// Error decoding a message or frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("frame too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}
