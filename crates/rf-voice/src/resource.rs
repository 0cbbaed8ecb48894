//! Resource Layer
//!
//! Sound definitions (playback parameters) and the audio data they point
//! at. The mixer re-resolves both every tick, so unregistering either one
//! ends every instance that uses it.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::VoiceBackend;
use crate::decoder::{StreamDecoder, decode_all};
use crate::error::{VoiceError, VoiceResult};
use crate::types::{AudioId, BufferHandle, SoundCategory, SoundId};

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND DEFINITION
// ═══════════════════════════════════════════════════════════════════════════════

/// Playback parameters shared by every instance of a sound
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDefinition {
    pub id: SoundId,
    pub name: String,
    pub category: SoundCategory,
    /// Audio data played by this sound
    pub audio: AudioId,
    /// Distance at which attenuation begins
    pub min_distance: f32,
    /// Distance beyond which the sound is inaudible (instances are dropped)
    pub max_distance: f32,
    pub volume: f32,
    pub pitch: f32,
    /// Concurrent instance cap (0 = unlimited)
    pub max_instances: u32,
    /// Play time (seconds) at which a fade-out starts automatically
    pub fade_out_point: Option<f32>,
    /// Length of that automatic fade-out
    pub fade_out_time: f32,
}

impl Default for SoundDefinition {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            category: SoundCategory::World,
            audio: 0,
            min_distance: 1.0,
            max_distance: 100.0,
            volume: 1.0,
            pitch: 1.0,
            max_instances: 0,
            fade_out_point: None,
            fade_out_time: 1.0,
        }
    }
}

impl SoundDefinition {
    pub fn new(id: SoundId, name: impl Into<String>, audio: AudioId) -> Self {
        Self {
            id,
            name: name.into(),
            audio,
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: SoundCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_distances(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pitch(mut self, pitch: f32) -> Self {
        self.pitch = pitch;
        self
    }

    pub fn with_max_instances(mut self, max_instances: u32) -> Self {
        self.max_instances = max_instances;
        self
    }

    pub fn with_fade_out(mut self, point: f32, time: f32) -> Self {
        self.fade_out_point = Some(point);
        self.fade_out_time = time;
        self
    }

    /// Whether `count` live instances already fill the cap
    #[inline]
    pub fn instance_cap_reached(&self, count: u32) -> bool {
        self.max_instances > 0 && count >= self.max_instances
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AUDIO DATA
// ═══════════════════════════════════════════════════════════════════════════════

/// Payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AudioEncoding {
    /// Raw interleaved little-endian i16
    #[default]
    Pcm16,
    /// Container/codec handled by symphonia
    Compressed,
}

/// Sample layout of a raw PCM payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::new(48000, 2)
    }
}

/// Decodable audio data
#[derive(Debug, Clone)]
pub struct AudioData {
    pub encoding: AudioEncoding,
    /// Decoded incrementally through a buffer ring
    pub streamed: bool,
    pub payload: Arc<[u8]>,
    /// Layout for [`AudioEncoding::Pcm16`] payloads
    pub format: PcmFormat,
    /// Fully decoded backend buffer (non-streamed data only)
    pub buffer: Option<BufferHandle>,
}

impl AudioData {
    /// Raw PCM from samples
    pub fn pcm16(samples: &[i16], format: PcmFormat, streamed: bool) -> Self {
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self {
            encoding: AudioEncoding::Pcm16,
            streamed,
            payload: payload.into(),
            format,
            buffer: None,
        }
    }

    /// Compressed file contents
    pub fn compressed(bytes: Vec<u8>, streamed: bool) -> Self {
        Self {
            encoding: AudioEncoding::Compressed,
            streamed,
            payload: bytes.into(),
            format: PcmFormat::default(),
            buffer: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE TRAIT
// ═══════════════════════════════════════════════════════════════════════════════

/// Resolves sound and audio references
pub trait SoundResources: Send + Sync {
    fn sound(&self, id: SoundId) -> Option<Arc<SoundDefinition>>;
    fn audio(&self, id: AudioId) -> Option<Arc<AudioData>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND LIBRARY
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory registry of definitions and audio data
#[derive(Default)]
pub struct SoundLibrary {
    sounds: RwLock<HashMap<SoundId, Arc<SoundDefinition>>>,
    audio: RwLock<HashMap<AudioId, Arc<AudioData>>>,
}

impl SoundLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sound(&self, sound: SoundDefinition) {
        self.sounds.write().insert(sound.id, Arc::new(sound));
    }

    pub fn unregister_sound(&self, id: SoundId) -> Option<Arc<SoundDefinition>> {
        self.sounds.write().remove(&id)
    }

    /// Register audio as-is (streamed data, or pre-uploaded buffers)
    pub fn register_audio(&self, id: AudioId, data: AudioData) {
        self.audio.write().insert(id, Arc::new(data));
    }

    /// Decode non-streamed data fully and upload it as one backend buffer
    pub fn load_buffered(
        &self,
        id: AudioId,
        mut data: AudioData,
        backend: &dyn VoiceBackend,
        decoder: &dyn StreamDecoder,
    ) -> VoiceResult<()> {
        let pcm = decode_all(decoder, &data)?;
        if pcm.is_empty() {
            return Err(VoiceError::Decoder(format!("audio {} decoded to nothing", id)));
        }

        let buffer = backend
            .create_buffer()
            .ok_or_else(|| VoiceError::Backend("buffer creation failed".into()))?;
        if let Err(e) = backend.upload_buffer(buffer, &pcm) {
            backend.delete_buffer(buffer);
            return Err(e);
        }

        data.streamed = false;
        data.buffer = Some(buffer);
        self.register_audio(id, data);
        Ok(())
    }

    /// Remove audio data, deleting its backend buffer if it owns one
    pub fn unload_audio(&self, id: AudioId, backend: &dyn VoiceBackend) {
        if let Some(data) = self.audio.write().remove(&id) {
            if let Some(buffer) = data.buffer {
                backend.delete_buffer(buffer);
            }
        }
    }

    pub fn sound_ids(&self) -> Vec<SoundId> {
        self.sounds.read().keys().copied().collect()
    }
}

impl SoundResources for SoundLibrary {
    fn sound(&self, id: SoundId) -> Option<Arc<SoundDefinition>> {
        self.sounds.read().get(&id).cloned()
    }

    fn audio(&self, id: AudioId) -> Option<Arc<AudioData>> {
        self.audio.read().get(&id).cloned()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
