//! Simulated voice backend
//!
//! In-memory voices that consume queued buffers at their sample rate
//! (scaled by pitch) when [`SimBackend::advance`] is called. Every backend
//! call is recorded so tests can assert on call order.
//!
//! Transport follows the usual queued-source model:
//! - `play` with nothing pending goes straight to `Stopped`
//! - a voice that runs out of pending buffers stops by itself
//! - `stop` marks every queued buffer processed
//! - a looping voice wraps its queue and never reports processed buffers

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::backend::VoiceBackend;
use crate::decoder::PcmChunk;
use crate::error::{VoiceError, VoiceResult};
use crate::types::{BufferHandle, Vec3, VoiceHandle, VoiceStatus};

/// Recorded backend call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendCall {
    CreateVoice(VoiceHandle),
    ResetVoice(VoiceHandle),
    DestroyVoice(VoiceHandle),
    SetPosition(VoiceHandle, Vec3),
    SetVelocity(VoiceHandle, Vec3),
    SetRelative(VoiceHandle, bool),
    SetReferenceDistance(VoiceHandle, f32),
    SetMaxDistance(VoiceHandle, f32),
    SetLooping(VoiceHandle, bool),
    SetGain(VoiceHandle, f32),
    SetPitch(VoiceHandle, f32),
    SetListenerGain(f32),
    Play(VoiceHandle),
    Pause(VoiceHandle),
    Stop(VoiceHandle),
    QueueBuffer(VoiceHandle, BufferHandle),
    UnqueueBuffer(VoiceHandle, BufferHandle),
    CreateBuffer(BufferHandle),
    UploadBuffer(BufferHandle, usize),
    DeleteBuffer(BufferHandle),
}

impl BackendCall {
    /// Voice the call targets, if any
    pub fn voice(&self) -> Option<VoiceHandle> {
        match *self {
            BackendCall::CreateVoice(v)
            | BackendCall::ResetVoice(v)
            | BackendCall::DestroyVoice(v)
            | BackendCall::SetPosition(v, _)
            | BackendCall::SetVelocity(v, _)
            | BackendCall::SetRelative(v, _)
            | BackendCall::SetReferenceDistance(v, _)
            | BackendCall::SetMaxDistance(v, _)
            | BackendCall::SetLooping(v, _)
            | BackendCall::SetGain(v, _)
            | BackendCall::SetPitch(v, _)
            | BackendCall::Play(v)
            | BackendCall::Pause(v)
            | BackendCall::Stop(v)
            | BackendCall::QueueBuffer(v, _)
            | BackendCall::UnqueueBuffer(v, _) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SimVoice {
    status: VoiceStatus,
    queue: VecDeque<BufferHandle>,
    /// Index of the buffer being played
    current: usize,
    /// Frames played within the current buffer
    playhead: f64,
    looping: bool,
    gain: f32,
    pitch: f32,
    position: Vec3,
    relative: bool,
}

impl Default for SimVoice {
    fn default() -> Self {
        Self {
            status: VoiceStatus::NotStarted,
            queue: VecDeque::new(),
            current: 0,
            playhead: 0.0,
            looping: false,
            gain: 1.0,
            pitch: 1.0,
            position: Vec3::ZERO,
            relative: false,
        }
    }
}

impl SimVoice {
    #[inline]
    fn has_pending(&self) -> bool {
        if self.looping {
            !self.queue.is_empty()
        } else {
            self.current < self.queue.len()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SimBuffer {
    frames: usize,
    sample_rate: u32,
}

#[derive(Default)]
struct SimState {
    max_voices: usize,
    next_voice: u32,
    next_buffer: u32,
    voices: HashMap<VoiceHandle, SimVoice>,
    buffers: HashMap<BufferHandle, SimBuffer>,
    listener_gain: f32,
    calls: Vec<BackendCall>,
}

/// In-memory [`VoiceBackend`]
pub struct SimBackend {
    state: Mutex<SimState>,
}

impl SimBackend {
    /// Backend that can create at most `max_voices` voices at once
    pub fn new(max_voices: usize) -> Self {
        Self {
            state: Mutex::new(SimState {
                max_voices,
                next_voice: 1,
                next_buffer: 1,
                listener_gain: 1.0,
                ..Default::default()
            }),
        }
    }

    /// Play `secs` of audio on every playing voice
    pub fn advance(&self, secs: f64) {
        let mut state = self.state.lock();
        let SimState { voices, buffers, .. } = &mut *state;

        for voice in voices.values_mut() {
            if voice.status != VoiceStatus::Playing {
                continue;
            }

            let queued_frames: usize = voice
                .queue
                .iter()
                .map(|b| buffers.get(b).map_or(0, |b| b.frames))
                .sum();
            if voice.looping && queued_frames == 0 {
                voice.status = VoiceStatus::Stopped;
                continue;
            }

            let mut budget = secs;
            let speed = voice.pitch.max(0.0) as f64;
            loop {
                if voice.current >= voice.queue.len() {
                    if voice.looping && !voice.queue.is_empty() {
                        voice.current = 0;
                        continue;
                    }
                    voice.status = VoiceStatus::Stopped;
                    voice.playhead = 0.0;
                    break;
                }

                let buffer = buffers.get(&voice.queue[voice.current]).copied().unwrap_or_default();
                let rate = buffer.sample_rate.max(1) as f64 * speed;
                if rate <= 0.0 {
                    break;
                }

                let remaining = (buffer.frames as f64 - voice.playhead) / rate;
                if budget >= remaining {
                    budget -= remaining;
                    voice.playhead = 0.0;
                    voice.current += 1;
                } else {
                    voice.playhead += budget * rate;
                    break;
                }
            }
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Frames uploaded to a buffer, `None` once deleted
    pub fn buffer_frames(&self, buffer: BufferHandle) -> Option<usize> {
        self.state.lock().buffers.get(&buffer).map(|b| b.frames)
    }

    /// Buffers alive on the backend
    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn queued_buffers(&self, voice: VoiceHandle) -> usize {
        self.state.lock().voices.get(&voice).map_or(0, |v| v.queue.len())
    }

    pub fn voice_gain(&self, voice: VoiceHandle) -> Option<f32> {
        self.state.lock().voices.get(&voice).map(|v| v.gain)
    }

    pub fn voice_pitch(&self, voice: VoiceHandle) -> Option<f32> {
        self.state.lock().voices.get(&voice).map(|v| v.pitch)
    }

    pub fn voice_looping(&self, voice: VoiceHandle) -> Option<bool> {
        self.state.lock().voices.get(&voice).map(|v| v.looping)
    }

    pub fn voice_position(&self, voice: VoiceHandle) -> Option<(Vec3, bool)> {
        self.state.lock().voices.get(&voice).map(|v| (v.position, v.relative))
    }

    /// Voices currently created
    pub fn active_voices(&self) -> usize {
        self.state.lock().voices.len()
    }

    pub fn listener_gain(&self) -> f32 {
        self.state.lock().listener_gain
    }

    fn with_voice(&self, voice: VoiceHandle, call: BackendCall, f: impl FnOnce(&mut SimVoice)) {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(v) = state.voices.get_mut(&voice) {
            f(v);
        }
    }
}

impl VoiceBackend for SimBackend {
    fn create_voice(&self) -> Option<VoiceHandle> {
        let mut state = self.state.lock();
        if state.voices.len() >= state.max_voices {
            return None;
        }
        let voice = VoiceHandle(state.next_voice);
        state.next_voice += 1;
        state.voices.insert(voice, SimVoice::default());
        state.calls.push(BackendCall::CreateVoice(voice));
        Some(voice)
    }

    fn reset_voice(&self, voice: VoiceHandle) {
        self.with_voice(voice, BackendCall::ResetVoice(voice), |v| *v = SimVoice::default());
    }

    fn destroy_voice(&self, voice: VoiceHandle) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DestroyVoice(voice));
        state.voices.remove(&voice);
    }

    fn voice_status(&self, voice: VoiceHandle) -> VoiceStatus {
        self.state
            .lock()
            .voices
            .get(&voice)
            .map_or(VoiceStatus::Stopped, |v| v.status)
    }

    fn set_position(&self, voice: VoiceHandle, position: Vec3) {
        self.with_voice(voice, BackendCall::SetPosition(voice, position), |v| {
            v.position = position
        });
    }

    fn set_velocity(&self, voice: VoiceHandle, velocity: Vec3) {
        self.with_voice(voice, BackendCall::SetVelocity(voice, velocity), |_| {});
    }

    fn set_relative(&self, voice: VoiceHandle, relative: bool) {
        self.with_voice(voice, BackendCall::SetRelative(voice, relative), |v| {
            v.relative = relative
        });
    }

    fn set_reference_distance(&self, voice: VoiceHandle, distance: f32) {
        self.with_voice(voice, BackendCall::SetReferenceDistance(voice, distance), |_| {});
    }

    fn set_max_distance(&self, voice: VoiceHandle, distance: f32) {
        self.with_voice(voice, BackendCall::SetMaxDistance(voice, distance), |_| {});
    }

    fn set_looping(&self, voice: VoiceHandle, looping: bool) {
        self.with_voice(voice, BackendCall::SetLooping(voice, looping), |v| {
            v.looping = looping
        });
    }

    fn set_gain(&self, voice: VoiceHandle, gain: f32) {
        self.with_voice(voice, BackendCall::SetGain(voice, gain), |v| v.gain = gain);
    }

    fn set_pitch(&self, voice: VoiceHandle, pitch: f32) {
        self.with_voice(voice, BackendCall::SetPitch(voice, pitch), |v| v.pitch = pitch);
    }

    fn set_listener_gain(&self, gain: f32) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::SetListenerGain(gain));
        state.listener_gain = gain;
    }

    fn play(&self, voice: VoiceHandle) {
        self.with_voice(voice, BackendCall::Play(voice), |v| {
            if v.status == VoiceStatus::Playing {
                return;
            }
            v.status = if v.has_pending() {
                VoiceStatus::Playing
            } else {
                VoiceStatus::Stopped
            };
        });
    }

    fn pause(&self, voice: VoiceHandle) {
        self.with_voice(voice, BackendCall::Pause(voice), |v| {
            if v.status == VoiceStatus::Playing {
                v.status = VoiceStatus::Paused;
            }
        });
    }

    fn stop(&self, voice: VoiceHandle) {
        self.with_voice(voice, BackendCall::Stop(voice), |v| {
            v.status = VoiceStatus::Stopped;
            v.current = v.queue.len();
            v.playhead = 0.0;
        });
    }

    fn queue_buffer(&self, voice: VoiceHandle, buffer: BufferHandle) {
        self.with_voice(voice, BackendCall::QueueBuffer(voice, buffer), |v| {
            v.queue.push_back(buffer)
        });
    }

    fn processed_buffers(&self, voice: VoiceHandle) -> usize {
        self.state.lock().voices.get(&voice).map_or(0, |v| {
            if v.looping {
                0
            } else {
                v.current.min(v.queue.len())
            }
        })
    }

    fn unqueue_buffer(&self, voice: VoiceHandle) -> Option<BufferHandle> {
        let mut state = self.state.lock();
        let v = state.voices.get_mut(&voice)?;
        if v.looping || v.current == 0 {
            return None;
        }
        let buffer = v.queue.pop_front()?;
        v.current -= 1;
        state.calls.push(BackendCall::UnqueueBuffer(voice, buffer));
        Some(buffer)
    }

    fn create_buffer(&self) -> Option<BufferHandle> {
        let mut state = self.state.lock();
        let buffer = BufferHandle(state.next_buffer);
        state.next_buffer += 1;
        state.buffers.insert(buffer, SimBuffer::default());
        state.calls.push(BackendCall::CreateBuffer(buffer));
        Some(buffer)
    }

    fn upload_buffer(&self, buffer: BufferHandle, pcm: &PcmChunk) -> VoiceResult<()> {
        let mut state = self.state.lock();
        let slot = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| VoiceError::Backend(format!("unknown buffer {:?}", buffer)))?;
        slot.frames = pcm.frames();
        slot.sample_rate = pcm.sample_rate;
        state.calls.push(BackendCall::UploadBuffer(buffer, pcm.frames()));
        Ok(())
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.calls.push(BackendCall::DeleteBuffer(buffer));
        state.buffers.remove(&buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_buffer(backend: &SimBackend, frames: usize, sample_rate: u32) -> BufferHandle {
        let buffer = backend.create_buffer().unwrap();
        let pcm = PcmChunk {
            samples: vec![0; frames],
            channels: 1,
            sample_rate,
        };
        backend.upload_buffer(buffer, &pcm).unwrap();
        buffer
    }

    #[test]
    fn test_voice_limit() {
        let backend = SimBackend::new(2);
        let a = backend.create_voice().unwrap();
        assert!(backend.create_voice().is_some());
        assert!(backend.create_voice().is_none());

        backend.destroy_voice(a);
        assert!(backend.create_voice().is_some());
    }

    #[test]
    fn test_play_without_data_stops() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        assert_eq!(backend.voice_status(voice), VoiceStatus::NotStarted);

        backend.play(voice);
        assert_eq!(backend.voice_status(voice), VoiceStatus::Stopped);
    }

    #[test]
    fn test_consumes_and_stops() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        let a = loaded_buffer(&backend, 100, 1000);
        let b = loaded_buffer(&backend, 100, 1000);
        backend.queue_buffer(voice, a);
        backend.queue_buffer(voice, b);
        backend.play(voice);

        backend.advance(0.15);
        assert_eq!(backend.processed_buffers(voice), 1);
        assert_eq!(backend.unqueue_buffer(voice), Some(a));
        assert_eq!(backend.unqueue_buffer(voice), None);

        backend.advance(0.1);
        assert_eq!(backend.voice_status(voice), VoiceStatus::Stopped);
    }

    #[test]
    fn test_pitch_scales_consumption() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        let a = loaded_buffer(&backend, 100, 1000);
        backend.queue_buffer(voice, a);
        backend.set_pitch(voice, 2.0);
        backend.play(voice);

        backend.advance(0.06);
        assert_eq!(backend.voice_status(voice), VoiceStatus::Stopped);
    }

    #[test]
    fn test_looping_wraps() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        let a = loaded_buffer(&backend, 100, 1000);
        backend.queue_buffer(voice, a);
        backend.set_looping(voice, true);
        backend.play(voice);

        backend.advance(1.0);
        assert_eq!(backend.voice_status(voice), VoiceStatus::Playing);
        assert_eq!(backend.processed_buffers(voice), 0);
    }

    #[test]
    fn test_reset_returns_to_not_started() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        let a = loaded_buffer(&backend, 100, 1000);
        backend.queue_buffer(voice, a);
        backend.set_gain(voice, 0.3);
        backend.play(voice);

        backend.reset_voice(voice);
        assert_eq!(backend.voice_status(voice), VoiceStatus::NotStarted);
        assert_eq!(backend.queued_buffers(voice), 0);
        assert_eq!(backend.voice_gain(voice), Some(1.0));
    }

    #[test]
    fn test_calls_recorded() {
        let backend = SimBackend::new(1);
        let voice = backend.create_voice().unwrap();
        backend.set_gain(voice, 0.5);
        backend.pause(voice);

        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::CreateVoice(voice),
                BackendCall::SetGain(voice, 0.5),
                BackendCall::Pause(voice),
            ]
        );
        backend.clear_calls();
        assert!(backend.calls().is_empty());
    }
}
