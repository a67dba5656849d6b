//! Media collaborator types: local capture stream, remote stream, device service.
//! Capture and rendering live outside the core; the session only holds handles.

/// Locally captured audio/video. Enabled flags are what mute / camera-off flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalStream {
    pub id: String,
    pub has_audio: bool,
    pub has_video: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

impl LocalStream {
    pub fn new(id: impl Into<String>, has_audio: bool, has_video: bool) -> Self {
        Self {
            id: id.into(),
            has_audio,
            has_video,
            audio_enabled: has_audio,
            video_enabled: has_video,
        }
    }

    /// Flip the audio track. Returns the new muted state, or `None` without an audio track.
    pub fn toggle_audio(&mut self) -> Option<bool> {
        if !self.has_audio {
            return None;
        }
        self.audio_enabled = !self.audio_enabled;
        Some(!self.audio_enabled)
    }

    /// Flip the video track. Returns the new camera-off state, or `None` without a video track.
    pub fn toggle_video(&mut self) -> Option<bool> {
        if !self.has_video {
            return None;
        }
        self.video_enabled = !self.video_enabled;
        Some(!self.video_enabled)
    }
}

/// The peer's stream as delivered by the media call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub id: String,
}

/// Local device access. Fails when permission is denied or no device exists.
pub trait MediaDevices {
    fn acquire_local_stream(&mut self, video: bool, audio: bool) -> Result<LocalStream, MediaError>;

    /// Stop every capture track of `stream`.
    fn release(&mut self, stream: &LocalStream);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("permission denied")]
    PermissionDenied,
    #[error("no capture device available")]
    NoDevice,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_report_new_state() {
        let mut s = LocalStream::new("s1", true, true);
        assert_eq!(s.toggle_audio(), Some(true));
        assert!(!s.audio_enabled);
        assert_eq!(s.toggle_audio(), Some(false));
        assert_eq!(s.toggle_video(), Some(true));
        assert!(!s.video_enabled);
    }

    #[test]
    fn toggle_without_track_is_none() {
        let mut s = LocalStream::new("s1", false, false);
        assert_eq!(s.toggle_audio(), None);
        assert_eq!(s.toggle_video(), None);
    }
}
