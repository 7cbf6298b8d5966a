use std::sync::atomic::{AtomicBool, Ordering};

/// The locally captured media tracks, shared by reference across every
/// outgoing peer link.
///
/// Muting flips the enabled flags in place; it never triggers a new
/// offer/answer cycle.
#[derive(Debug)]
pub struct LocalMedia {
    audio: AtomicBool,
    video: AtomicBool,
    /// False when camera/microphone permission was denied: the participant
    /// stays in the room without publishing tracks.
    publishing: AtomicBool,
}

/// Point-in-time view of the enabled tracks, used when seeding a new link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaSnapshot {
    pub audio: bool,
    pub video: bool,
    pub publishing: bool,
}

impl LocalMedia {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio: AtomicBool::new(audio),
            video: AtomicBool::new(video),
            publishing: AtomicBool::new(true),
        }
    }

    /// Media acquisition failed (permission denied): remain in the room
    /// without publishing until retried.
    pub fn without_tracks() -> Self {
        Self {
            audio: AtomicBool::new(false),
            video: AtomicBool::new(false),
            publishing: AtomicBool::new(false),
        }
    }

    pub fn set_audio(&self, enabled: bool) {
        self.audio.store(enabled, Ordering::SeqCst);
        tracing::debug!(enabled = enabled, "Toggled audio track");
    }

    pub fn set_video(&self, enabled: bool) {
        self.video.store(enabled, Ordering::SeqCst);
        tracing::debug!(enabled = enabled, "Toggled video track");
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.load(Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video.load(Ordering::SeqCst)
    }

    pub fn is_publishing(&self) -> bool {
        self.publishing.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MediaSnapshot {
        MediaSnapshot {
            audio: self.audio_enabled(),
            video: self.video_enabled(),
            publishing: self.is_publishing(),
        }
    }
}
