//! Audio subsystem: codec utilities, microphone capture, and playback
//! scheduling for the live session.
//!
//! Capture and playback both run on dedicated threads because cpal streams
//! are not `Send`; the rest of the crate talks to them through channels and
//! shared state.

pub mod capture;
pub mod codec;
pub mod playback;

pub use capture::{CapturePipeline, MediaChunk};
pub use playback::{AudioSink, PlaybackScheduler, SpeakerSink};

/// Errors from the audio device and codec layer
#[derive(Debug, Clone)]
pub enum AudioError {
    /// No audio input device found
    NoInputDevice,
    /// No audio output device found
    NoOutputDevice,
    /// No supported stream configuration on the selected device
    NoSupportedConfig,
    /// The platform refused access to the device
    PermissionDenied(String),
    /// Failed to create or start a device stream
    StreamCreationFailed(String),
    /// Malformed base64 or payload shape
    Decode(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::PermissionDenied(e) => write!(f, "Audio device access denied: {}", e),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            AudioError::Decode(e) => write!(f, "Failed to decode audio payload: {}", e),
        }
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NoInputDevice;
        assert!(err.to_string().contains("input device"));

        let err = AudioError::PermissionDenied("mic blocked".to_string());
        assert!(err.to_string().contains("mic blocked"));

        let err = AudioError::Decode("bad base64".to_string());
        assert!(err.to_string().contains("bad base64"));
    }
}
