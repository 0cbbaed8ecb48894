//! Mixer configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{VoiceError, VoiceResult};

/// Default hardware voice capacity
pub const DEFAULT_TOTAL_VOICES: usize = 32;

/// Priority margin needed to steal from a one-shot
pub const PRIORITY_STEAL_THRESHOLD: f32 = 15.0;

/// Priority margin needed to steal from a looping source
pub const PRIORITY_STEAL_LOOPED_THRESHOLD: f32 = 30.0;

/// Buffers in a streaming ring
pub const DEFAULT_STREAM_BUFFER_COUNT: usize = 3;

/// Configuration for voice arbitration, fades and streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Hardware voice capacity (3/4 spatial, rest non-spatial)
    pub total_voices: usize,

    /// Margin a requester must beat a one-shot victim by
    pub priority_steal_threshold: f32,

    /// Margin a requester must beat a looping victim by
    pub priority_steal_looped_threshold: f32,

    /// Pause/resume ramp length in seconds
    pub pause_fade_secs: f32,

    /// Silence required after a fade-out before disposal (seconds)
    pub fade_out_grace_secs: f32,

    /// Floor for primary fade durations (seconds)
    pub min_fade_secs: f32,

    /// Pitch floor used when advancing play time
    pub min_play_time_pitch: f32,

    /// Weight applied to the Z axis when measuring distance
    pub z_distance_weight: f32,

    /// Buffers per streaming instance
    pub stream_buffer_count: usize,

    /// Frames decoded into each streaming buffer
    pub stream_chunk_frames: usize,

    /// Streaming service period in milliseconds
    pub stream_service_interval_ms: u64,

    /// Global simulation time multiplier applied to fades and play time
    pub time_speed: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            total_voices: DEFAULT_TOTAL_VOICES,
            priority_steal_threshold: PRIORITY_STEAL_THRESHOLD,
            priority_steal_looped_threshold: PRIORITY_STEAL_LOOPED_THRESHOLD,
            pause_fade_secs: 0.2,     // 200ms
            fade_out_grace_secs: 0.05, // 50ms
            min_fade_secs: 0.05,
            min_play_time_pitch: 0.5,
            z_distance_weight: 0.25,
            stream_buffer_count: DEFAULT_STREAM_BUFFER_COUNT,
            stream_chunk_frames: 4096,
            stream_service_interval_ms: 10,
            time_speed: 1.0,
        }
    }
}

impl MixerConfig {
    /// Smaller stream chunks serviced more often
    pub fn low_latency() -> Self {
        Self {
            stream_chunk_frames: 1024,
            stream_service_interval_ms: 4,
            ..Default::default()
        }
    }

    /// Same arbitration with a different voice capacity
    pub fn with_total_voices(total_voices: usize) -> Self {
        Self {
            total_voices,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> VoiceResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> VoiceResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> VoiceResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if self.total_voices == 0 {
            return Err(VoiceError::Config("total_voices must be > 0".into()));
        }
        if self.stream_buffer_count == 0 {
            return Err(VoiceError::Config("stream_buffer_count must be > 0".into()));
        }
        if self.stream_chunk_frames == 0 {
            return Err(VoiceError::Config("stream_chunk_frames must be > 0".into()));
        }
        if !(self.z_distance_weight >= 0.0 && self.z_distance_weight.is_finite()) {
            return Err(VoiceError::Config(format!(
                "z_distance_weight out of range: {}",
                self.z_distance_weight
            )));
        }
        if !(self.time_speed >= 0.0 && self.time_speed.is_finite()) {
            return Err(VoiceError::Config(format!(
                "time_speed out of range: {}",
                self.time_speed
            )));
        }
        if self.pause_fade_secs < 0.0 || self.fade_out_grace_secs < 0.0 || self.min_fade_secs <= 0.0 {
            return Err(VoiceError::Config("fade timings must be non-negative".into()));
        }
        Ok(())
    }

    /// Steal margin for a victim
    #[inline]
    pub fn steal_threshold(&self, looping: bool) -> f32 {
        if looping {
            self.priority_steal_looped_threshold
        } else {
            self.priority_steal_threshold
        }
    }
}
