//! Voice Backend Collaborator
//!
//! The hardware (or library) side of playback: voices that render one
//! source each, and sample buffers queued onto them.
//!
//! Implementations are shared between the tick thread and the streaming
//! service, so every method takes `&self`. Calls must not block: the
//! mixer issues them while holding per-instance locks.

use crate::decoder::PcmChunk;
use crate::error::VoiceResult;
use crate::types::{BufferHandle, Vec3, VoiceHandle, VoiceStatus};

/// Audio backend voice and buffer operations
pub trait VoiceBackend: Send + Sync {
    // ═══════════════════════════════════════════════════════════════════════════
    // VOICE LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a voice, or `None` when the backend has no more
    fn create_voice(&self) -> Option<VoiceHandle>;

    /// Stop, detach all queued buffers and restore default parameters.
    /// The voice reports [`VoiceStatus::NotStarted`] afterwards.
    fn reset_voice(&self, voice: VoiceHandle);

    fn destroy_voice(&self, voice: VoiceHandle);

    fn voice_status(&self, voice: VoiceHandle) -> VoiceStatus;

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn set_position(&self, voice: VoiceHandle, position: Vec3);
    fn set_velocity(&self, voice: VoiceHandle, velocity: Vec3);
    /// Position is relative to the listener
    fn set_relative(&self, voice: VoiceHandle, relative: bool);
    fn set_reference_distance(&self, voice: VoiceHandle, distance: f32);
    fn set_max_distance(&self, voice: VoiceHandle, distance: f32);
    fn set_looping(&self, voice: VoiceHandle, looping: bool);
    fn set_gain(&self, voice: VoiceHandle, gain: f32);
    fn set_pitch(&self, voice: VoiceHandle, pitch: f32);

    /// Master gain applied on top of every voice's gain
    fn set_listener_gain(&self, _gain: f32) {}

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Start or resume; a voice with nothing pending goes straight to stopped
    fn play(&self, voice: VoiceHandle);
    fn pause(&self, voice: VoiceHandle);
    fn stop(&self, voice: VoiceHandle);

    // ═══════════════════════════════════════════════════════════════════════════
    // BUFFERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn queue_buffer(&self, voice: VoiceHandle, buffer: BufferHandle);

    /// Queued buffers the voice has finished playing
    fn processed_buffers(&self, voice: VoiceHandle) -> usize;

    /// Remove the oldest processed buffer from the queue
    fn unqueue_buffer(&self, voice: VoiceHandle) -> Option<BufferHandle>;

    fn create_buffer(&self) -> Option<BufferHandle>;
    fn upload_buffer(&self, buffer: BufferHandle, pcm: &PcmChunk) -> VoiceResult<()>;
    fn delete_buffer(&self, buffer: BufferHandle);
}
