//! Error types for the voice manager

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Collaborator and setup failures
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Unsupported audio encoding: {0}")]
    UnsupportedEncoding(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Thread spawn failed: {0}")]
    Spawn(String),
}

/// Result type alias
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Why an instance ended
///
/// None of these are surfaced as failures: an instance that cannot keep
/// playing simply stops, and the reason is kept for inspection.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisposeReason {
    /// Sound definition or its audio data resolved to nothing
    #[error("sound resource unavailable")]
    ResourceUnavailable,

    /// Pool exhausted and no steal candidate qualified
    #[error("no voice available")]
    VoiceUnavailable,

    /// Listener moved beyond the sound's maximum distance
    #[error("beyond audible range")]
    RangeExceeded,

    /// Voice played to its end
    #[error("playback finished")]
    Finished,

    /// Immediate stop was requested
    #[error("stopped")]
    Stopped,

    /// Fade to silence plus grace window elapsed
    #[error("faded out")]
    FadedOut,

    /// Disposed by the owner
    #[error("disposed by owner")]
    Requested,

    /// Mixer shut down
    #[error("mixer shutdown")]
    Shutdown,
}

impl DisposeReason {
    /// True when the instance ended for lack of something (resource, voice, range)
    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            DisposeReason::ResourceUnavailable
                | DisposeReason::VoiceUnavailable
                | DisposeReason::RangeExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispose_reason_display() {
        assert_eq!(DisposeReason::VoiceUnavailable.to_string(), "no voice available");
        assert_eq!(DisposeReason::FadedOut.to_string(), "faded out");
    }

    #[test]
    fn test_dropped_classification() {
        assert!(DisposeReason::RangeExceeded.is_dropped());
        assert!(!DisposeReason::Finished.is_dropped());
        assert!(!DisposeReason::Stopped.is_dropped());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: VoiceError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, VoiceError::Json(_)));
    }
}
