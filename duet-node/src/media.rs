//! Headless media: hands out capture handles without touching real devices.

use duet_core::{LocalStream, MediaDevices, MediaError};

/// Devices a terminal node pretends to have. With neither, acquisition fails.
#[derive(Debug, Clone)]
pub struct HeadlessMedia {
    audio: bool,
    video: bool,
    active: Option<String>,
}

impl HeadlessMedia {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            active: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }
}

impl MediaDevices for HeadlessMedia {
    fn acquire_local_stream(&mut self, video: bool, audio: bool) -> Result<LocalStream, MediaError> {
        let has_audio = audio && self.audio;
        let has_video = video && self.video;
        if !has_audio && !has_video {
            return Err(MediaError::NoDevice);
        }
        let id = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(stream = %id, has_audio, has_video, "capture started");
        self.active = Some(id.clone());
        Ok(LocalStream::new(id, has_audio, has_video))
    }

    fn release(&mut self, stream: &LocalStream) {
        if self.active.as_deref() == Some(stream.id.as_str()) {
            tracing::debug!(stream = %stream.id, "capture stopped");
            self.active = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_and_release() {
        let mut media = HeadlessMedia::new(true, false);
        let stream = media.acquire_local_stream(true, true).unwrap();
        assert!(stream.has_audio);
        assert!(!stream.has_video);
        assert!(media.is_capturing());
        media.release(&stream);
        assert!(!media.is_capturing());
    }

    #[test]
    fn no_devices_fails() {
        let mut media = HeadlessMedia::new(false, false);
        assert_eq!(
            media.acquire_local_stream(true, true).unwrap_err(),
            MediaError::NoDevice
        );
    }
}
