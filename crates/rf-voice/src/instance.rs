//! Playback Instance
//!
//! One live request to play a sound. Created by the mixer, ticked once per
//! frame by [`PlaybackInstance::update`], and fed by the streaming service
//! when its audio is streamed.
//!
//! ## State
//!
//! ```text
//! Unassigned ─► VoicedInitial ─► VoicedPlaying ⇄ VoicedPaused ─► VoicedStopped
//!      │               │               │               │               │
//!      └───────────────┴───────────────┴───────┬───────┴───────────────┘
//!                                              ▼
//!                                          Disposed
//! ```
//!
//! ## Locks
//!
//! - `params`: logical state, owned by the tick and the public setters
//! - `slot`: voice handle, stream cursor and stop request, shared with the
//!   streaming service
//!
//! Order is `params` → pool → `slot`. Stealing locks the victim's `slot`
//! under the pool lock. The streaming service only ever takes `slot`.
//! Disposal releases `slot` before touching the pool.

use parking_lot::Mutex;
use portable_atomic::AtomicF32;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::dirty::DirtyFlags;
use crate::error::DisposeReason;
use crate::fade::{Fade, PauseFade, SilenceGrace};
use crate::mixer::MixerCore;
use crate::priority::{distance_factor, priority, volume_factor};
use crate::resource::SoundDefinition;
use crate::scene::{AnchorState, Attachment, Placement, resolve_placement};
use crate::streaming::{self, FeedContext, StopRequest, VoiceSlot};
use crate::types::{
    AnchorId, InstanceId, SoundId, Vec3, VoiceHandle, VoiceKind, VoiceStatus,
    generate_instance_id,
};

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Observable lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceState {
    /// Wants a voice
    Unassigned,
    /// Holds a voice that has not started
    VoicedInitial,
    VoicedPlaying,
    VoicedPaused,
    VoicedStopped,
    /// Terminal
    Disposed,
}

impl InstanceState {
    #[inline]
    pub fn is_voiced(&self) -> bool {
        matches!(
            self,
            InstanceState::VoicedInitial
                | InstanceState::VoicedPlaying
                | InstanceState::VoicedPaused
                | InstanceState::VoicedStopped
        )
    }
}

/// Values last written to the voice
#[derive(Debug, Clone, Copy, Default)]
struct Pushed {
    position: Option<Vec3>,
    velocity: Option<Vec3>,
    relative: Option<bool>,
    distances: Option<(f32, f32)>,
    pitch: Option<f32>,
}

/// Logical state mutated by setters and consumed by the tick
#[derive(Debug, Clone)]
struct InstanceParams {
    attachment: Attachment,
    volume: f32,
    pitch: f32,
    /// Left/right placement for non-spatial instances (-1..1)
    pan: f32,
    position: Vec3,
    velocity: Vec3,
    looping: bool,
    paused: bool,
    fade: Fade,
    pause_fade: PauseFade,
    grace: SilenceGrace,
    dirty: DirtyFlags,
    /// Last resolved world position, kept for when the anchor goes away
    last_world: Option<Vec3>,
    pushed: Pushed,
}

impl InstanceParams {
    fn new(attachment: Attachment) -> Self {
        Self {
            attachment,
            volume: 1.0,
            pitch: 1.0,
            pan: 0.0,
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            looping: false,
            paused: false,
            fade: Fade::new(),
            pause_fade: PauseFade::new(),
            grace: SilenceGrace::default(),
            dirty: DirtyFlags::ALL,
            last_world: None,
            pushed: Pushed::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PLAYBACK INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// A live request to play a sound
pub struct PlaybackInstance {
    id: InstanceId,
    sound_id: SoundId,
    spatial: bool,
    core: Arc<MixerCore>,

    disposed: AtomicBool,
    dispose_reason: OnceLock<DisposeReason>,

    // Read by stealing scans without taking any instance lock
    priority: AtomicF32,
    play_time: AtomicF32,
    looping: AtomicBool,
    streaming: AtomicBool,

    params: Mutex<InstanceParams>,
    slot: Mutex<VoiceSlot>,
}

impl PlaybackInstance {
    pub(crate) fn new(core: Arc<MixerCore>, sound_id: SoundId, attachment: Attachment) -> Arc<Self> {
        Arc::new(Self {
            id: generate_instance_id(),
            sound_id,
            spatial: attachment.is_spatial(),
            core,
            disposed: AtomicBool::new(false),
            dispose_reason: OnceLock::new(),
            priority: AtomicF32::new(0.0),
            play_time: AtomicF32::new(0.0),
            looping: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            params: Mutex::new(InstanceParams::new(attachment)),
            slot: Mutex::new(VoiceSlot::default()),
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // READ-ONLY STATE
    // ═══════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    #[inline]
    pub fn sound_id(&self) -> SoundId {
        self.sound_id
    }

    #[inline]
    pub fn is_3d(&self) -> bool {
        self.spatial
    }

    #[inline]
    pub fn kind(&self) -> VoiceKind {
        VoiceKind::from_spatial(self.spatial)
    }

    /// Priority published by the last tick
    #[inline]
    pub fn priority(&self) -> f32 {
        self.priority.load(Ordering::Relaxed)
    }

    /// Seconds of (pitch-scaled) playback so far
    #[inline]
    pub fn play_time(&self) -> f32 {
        self.play_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    /// Audio was streamed on the last tick
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn dispose_reason(&self) -> Option<DisposeReason> {
        self.dispose_reason.get().copied()
    }

    pub fn fade_value(&self) -> f32 {
        self.params.lock().fade.current()
    }

    pub fn fade_target(&self) -> f32 {
        self.params.lock().fade.target()
    }

    pub fn pause_fade_value(&self) -> f32 {
        self.params.lock().pause_fade.value()
    }

    pub fn is_paused(&self) -> bool {
        self.params.lock().paused
    }

    pub fn volume(&self) -> f32 {
        self.params.lock().volume
    }

    pub fn pitch(&self) -> f32 {
        self.params.lock().pitch
    }

    /// Anchor followed, if still attached
    pub fn anchor(&self) -> Option<AnchorId> {
        self.params.lock().attachment.anchor_id()
    }

    pub fn attachment(&self) -> Attachment {
        self.params.lock().attachment
    }

    pub fn voice(&self) -> Option<VoiceHandle> {
        self.slot.lock().voice
    }

    pub fn stop_request(&self) -> StopRequest {
        self.slot.lock().stop_request
    }

    pub fn state(&self) -> InstanceState {
        let slot = self.slot.lock();
        if self.is_disposed() {
            return InstanceState::Disposed;
        }
        match slot.voice {
            None => InstanceState::Unassigned,
            Some(voice) => match self.core.backend().voice_status(voice) {
                VoiceStatus::NotStarted => InstanceState::VoicedInitial,
                VoiceStatus::Playing => InstanceState::VoicedPlaying,
                VoiceStatus::Paused => InstanceState::VoicedPaused,
                VoiceStatus::Stopped => InstanceState::VoicedStopped,
            },
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FADES
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn fade_to(&self, target: f32, duration: f32) {
        self.with_params(|p| p.fade.fade_to(target, duration));
    }

    pub fn fade_in(&self, duration: f32) {
        self.with_params(|p| p.fade.fade_in(duration));
    }

    pub fn fade_out(&self, duration: f32) {
        self.with_params(|p| p.fade.fade_out(duration));
    }

    /// Restart from silence and fade to full volume
    pub fn begin_fade_in(&self, duration: f32) {
        self.with_params(|p| p.fade.begin_fade_in(duration));
    }

    pub fn stop_fade(&self) {
        self.with_params(|p| p.fade.stop_fade());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PARAMETERS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_volume(&self, volume: f32) {
        self.with_params(|p| {
            p.volume = volume.max(0.0);
            p.dirty.insert(DirtyFlags::VOLUME);
        });
    }

    pub fn set_pitch(&self, pitch: f32) {
        self.with_params(|p| {
            p.pitch = pitch.max(0.0);
            p.dirty.insert(DirtyFlags::PITCH);
        });
    }

    /// Left/right balance of a non-spatial instance
    pub fn set_pan(&self, pan: f32) {
        self.with_params(|p| {
            p.pan = pan.clamp(-1.0, 1.0);
            p.dirty.insert(DirtyFlags::POSITION);
        });
    }

    pub fn set_looping(&self, looping: bool) {
        self.with_params(|p| {
            p.looping = looping;
            self.looping.store(looping, Ordering::Relaxed);
            p.dirty.insert(DirtyFlags::LOOP);
        });
    }

    /// Logical pause. The voice pauses once the pause ramp reaches silence.
    pub fn set_paused(&self, paused: bool) {
        self.with_params(|p| {
            if p.paused != paused {
                p.paused = paused;
                p.dirty.insert(DirtyFlags::PAUSE | DirtyFlags::VOLUME);
            }
        });
    }

    /// Local offset (relative to the anchor, point or listener)
    pub fn set_position(&self, position: Vec3) {
        self.with_params(|p| {
            p.position = position;
            p.dirty.insert(DirtyFlags::POSITION);
        });
    }

    pub fn set_velocity(&self, velocity: Vec3) {
        self.with_params(|p| {
            p.velocity = velocity;
            p.dirty.insert(DirtyFlags::VELOCITY);
        });
    }

    fn with_params(&self, f: impl FnOnce(&mut InstanceParams)) {
        if self.is_disposed() {
            return;
        }
        f(&mut self.params.lock());
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STOP / DISPOSE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stop now. The instance disposes on its next tick.
    pub fn stop(&self) {
        let mut slot = self.slot.lock();
        if self.is_disposed() {
            return;
        }
        slot.stop_request = StopRequest::Immediate;
        if let Some(cursor) = slot.cursor.as_mut() {
            cursor.close_decoder();
        }
        if let Some(voice) = slot.voice {
            self.core.backend().stop(voice);
        }
    }

    /// Let playback run out: streams stop feeding and drain what is
    /// queued, buffered sounds stop looping.
    pub fn stop_at_end(&self) {
        if self.is_streaming() {
            let mut slot = self.slot.lock();
            if self.is_disposed() {
                return;
            }
            if !slot.stop_request.is_pending() {
                slot.stop_request = StopRequest::EndOfStream;
            }
        } else {
            self.set_looping(false);
        }
    }

    pub fn dispose(&self) {
        self.dispose_with(DisposeReason::Requested);
    }

    /// Idempotent. Releases the voice and stream buffers and leaves the
    /// pool accounting.
    pub(crate) fn dispose_with(&self, reason: DisposeReason) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.dispose_reason.set(reason);

        let (voice, cursor) = {
            let mut slot = self.slot.lock();
            slot.stop_request = StopRequest::Immediate;
            slot.start_requested = false;
            slot.audio = None;
            (slot.voice.take(), slot.cursor.take())
        };

        let backend = self.core.backend();
        if let Some(voice) = voice {
            backend.stop(voice);
            backend.reset_voice(voice);
            backend.destroy_voice(voice);
        }
        if let Some(cursor) = cursor {
            cursor.release(backend);
        }

        self.core.pool.lock().unregister(self.id);
        self.core.forget_stream(self.id);

        log::debug!(
            "[Mixer] Instance {} (sound {}) disposed: {}",
            self.id,
            self.sound_id,
            reason
        );
    }

    /// Hand the voice to a stealing instance. Called under the pool lock.
    pub(crate) fn surrender_voice(&self) -> Option<VoiceHandle> {
        let (voice, cursor) = {
            let mut slot = self.slot.lock();
            if self.is_disposed() {
                return None;
            }
            let voice = slot.voice.take()?;
            slot.start_requested = false;
            if slot.stop_request == StopRequest::EndOfStream {
                slot.stop_request = StopRequest::None;
            }
            (voice, slot.cursor.take())
        };

        let backend = self.core.backend();
        backend.reset_voice(voice);
        if let Some(cursor) = cursor {
            cursor.release(backend);
        }
        Some(voice)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STREAMING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run the feeder once. Returns false when there is nothing left to
    /// feed (disposed, not streamed, or the stream has finished).
    pub fn service_streaming(&self) -> bool {
        if !self.is_streaming() {
            return false;
        }

        let mut slot = self.slot.lock();
        if self.is_disposed() {
            return false;
        }

        let config = self.core.config();
        let ctx = FeedContext {
            instance: self.id,
            backend: self.core.backend(),
            decoder: self.core.decoder(),
            looping: self.is_looping(),
            buffer_count: config.stream_buffer_count,
            chunk_frames: config.stream_chunk_frames,
        };
        streaming::feed(&mut slot, &ctx)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Reconcile with the voice for one frame of `dt` seconds
    pub fn update(self: &Arc<Self>, dt: f32) {
        if self.is_disposed() {
            return;
        }

        let result = {
            let mut params = self.params.lock();
            self.reconcile(&mut params, dt)
        };

        if let Err(reason) = result {
            self.dispose_with(reason);
        }
    }

    fn reconcile(self: &Arc<Self>, p: &mut InstanceParams, dt: f32) -> Result<(), DisposeReason> {
        let core = &self.core;
        let config = core.config();
        let backend = core.backend();
        let dt = dt.max(0.0) * core.time_speed();

        // Anchor liveness
        let anchor = self.validate_anchor(p);

        // Resources
        let sound = core
            .resources()
            .sound(self.sound_id)
            .ok_or(DisposeReason::ResourceUnavailable)?;
        let audio = core
            .resources()
            .audio(sound.audio)
            .ok_or(DisposeReason::ResourceUnavailable)?;
        let streamed = audio.streamed;
        self.streaming.store(streamed, Ordering::Relaxed);

        // Placement and range
        let listener = core.listener();
        let local = if self.spatial {
            p.position
        } else {
            p.position + Vec3::new(p.pan, 0.0, 0.0)
        };
        let placement = resolve_placement(
            &p.attachment,
            anchor.as_ref(),
            &listener,
            local,
            p.velocity,
            config.z_distance_weight,
        )
        .ok_or(DisposeReason::ResourceUnavailable)?;
        if !placement.relative {
            p.last_world = Some(placement.position);
        }
        if self.spatial && placement.distance > sound.max_distance {
            return Err(DisposeReason::RangeExceeded);
        }

        let volumes = core.volumes();
        let volume = volume_factor(&volumes, sound.category, sound.volume, p.volume);
        let distance = self
            .spatial
            .then(|| distance_factor(placement.distance, sound.min_distance, sound.max_distance));

        // Voice
        let (has_voice, stop_request) = {
            let slot = self.slot.lock();
            (slot.voice.is_some(), slot.stop_request)
        };
        if !has_voice {
            if stop_request == StopRequest::Immediate {
                return Err(DisposeReason::Stopped);
            }
            self.acquire(p, &sound, volume, distance)?;
        }
        let concurrent = core.pool.lock().accounting().sound_count(self.sound_id);

        let mut slot = self.slot.lock();
        if self.is_disposed() {
            return Ok(());
        }
        let Some(voice) = slot.voice else {
            return Ok(());
        };

        // Hardware state
        let status = backend.voice_status(voice);
        let ended = |request: StopRequest| {
            if request == StopRequest::Immediate {
                DisposeReason::Stopped
            } else {
                DisposeReason::Finished
            }
        };
        match status {
            VoiceStatus::Stopped if !streamed || slot.stop_request.is_pending() => {
                return Err(ended(slot.stop_request));
            }
            VoiceStatus::NotStarted if slot.stop_request.is_pending() => {
                return Err(ended(slot.stop_request));
            }
            _ => {}
        }

        // Fades
        p.fade.step(dt, config.min_fade_secs);
        if p.pause_fade.step(p.paused, dt, config.pause_fade_secs) {
            p.dirty.insert(DirtyFlags::PAUSE);
        }
        // Gain is rewritten every tick
        p.dirty.insert(DirtyFlags::VOLUME);

        // Push
        let gain = volumes.category(sound.category)
            * sound.volume
            * p.volume
            * p.fade.current()
            * p.pause_fade.value();
        let pitch = sound.pitch * p.pitch;
        self.mark_changed(p, &placement, &sound, pitch);
        self.push_dirty(p, voice, status, &placement, &sound, gain, pitch, streamed);

        // Play time
        if !p.paused {
            let before = self.play_time();
            let after = before + pitch.max(config.min_play_time_pitch) * dt;
            self.play_time.store(after, Ordering::Relaxed);

            if let Some(point) = sound.fade_out_point {
                if before < point && after >= point {
                    p.fade.fade_out(sound.fade_out_time);
                }
            }
        }

        // Final priority
        self.priority.store(
            priority(volume * p.fade.current(), distance, concurrent),
            Ordering::Relaxed,
        );

        // Start
        let mut enqueue = false;
        if status == VoiceStatus::NotStarted && !p.paused {
            if streamed {
                if !slot.start_requested {
                    slot.start_requested = true;
                    slot.audio = Some(Arc::clone(&audio));
                    enqueue = true;
                }
            } else {
                let buffer = audio.buffer.ok_or(DisposeReason::ResourceUnavailable)?;
                backend.queue_buffer(voice, buffer);
                backend.play(voice);
            }
        }
        drop(slot);

        if enqueue {
            core.enqueue_stream(self);
        }

        // Fade-out grace
        if p.fade.is_fading_to_zero() && gain <= 0.0 {
            if p.grace.accumulate(dt, config.fade_out_grace_secs) {
                return Err(DisposeReason::FadedOut);
            }
        } else {
            p.grace.reset();
        }

        Ok(())
    }

    /// Detach from a destroyed anchor, keeping the last known position
    fn validate_anchor(&self, p: &mut InstanceParams) -> Option<AnchorState> {
        let Attachment::Anchor { id, offset } = p.attachment else {
            return None;
        };

        match self.core.anchors().anchor(id) {
            Some(state) if !state.destroyed => Some(state),
            _ => {
                let world = p.last_world.unwrap_or(offset + p.position);
                p.attachment = Attachment::Fixed(world - p.position);
                log::debug!("[Mixer] Instance {} lost anchor {}", self.id, id);
                None
            }
        }
    }

    fn acquire(
        self: &Arc<Self>,
        p: &mut InstanceParams,
        sound: &SoundDefinition,
        volume: f32,
        distance: Option<f32>,
    ) -> Result<(), DisposeReason> {
        let core = &self.core;
        let backend = core.backend();
        let mut pool = core.pool.lock();

        let accounting = pool.accounting();
        let concurrent = accounting.sound_count(self.sound_id) + u32::from(!accounting.is_registered(self.id));
        // Fade left out so a sound that has not faded in can still win
        let pre_priority = priority(volume, distance, concurrent);
        self.priority.store(pre_priority, Ordering::Relaxed);

        let voice = pool
            .acquire(self, sound, pre_priority, backend, core.config())
            .ok_or(DisposeReason::VoiceUnavailable)?;

        {
            let mut slot = self.slot.lock();
            if self.is_disposed() {
                drop(slot);
                backend.reset_voice(voice);
                backend.destroy_voice(voice);
                return Ok(());
            }
            slot.voice = Some(voice);
            slot.start_requested = false;
        }
        pool.register(self);

        p.dirty = DirtyFlags::ALL;
        p.pushed = Pushed::default();
        Ok(())
    }

    /// Flag derived values that differ from what the voice last received
    fn mark_changed(&self, p: &mut InstanceParams, placement: &Placement, sound: &SoundDefinition, pitch: f32) {
        let pushed = p.pushed;
        if pushed.position != Some(placement.position) {
            p.dirty.insert(DirtyFlags::POSITION);
        }
        if pushed.velocity != Some(placement.velocity) {
            p.dirty.insert(DirtyFlags::VELOCITY);
        }
        if pushed.relative != Some(placement.relative) {
            p.dirty.insert(DirtyFlags::RELATIVE);
        }
        if pushed.distances != Some((sound.min_distance, sound.max_distance)) {
            p.dirty.insert(DirtyFlags::MAX_DISTANCE | DirtyFlags::REF_DISTANCE);
        }
        if pushed.pitch != Some(pitch) {
            p.dirty.insert(DirtyFlags::PITCH);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_dirty(
        &self,
        p: &mut InstanceParams,
        voice: VoiceHandle,
        status: VoiceStatus,
        placement: &Placement,
        sound: &SoundDefinition,
        gain: f32,
        pitch: f32,
        streamed: bool,
    ) {
        let backend = self.core.backend();

        if p.dirty.contains(DirtyFlags::POSITION) {
            backend.set_position(voice, placement.position);
            p.pushed.position = Some(placement.position);
            p.dirty.remove(DirtyFlags::POSITION);
        }
        if p.dirty.contains(DirtyFlags::VELOCITY) {
            backend.set_velocity(voice, placement.velocity);
            p.pushed.velocity = Some(placement.velocity);
            p.dirty.remove(DirtyFlags::VELOCITY);
        }
        if p.dirty.contains(DirtyFlags::RELATIVE) {
            backend.set_relative(voice, placement.relative);
            p.pushed.relative = Some(placement.relative);
            p.dirty.remove(DirtyFlags::RELATIVE);
        }
        if p.dirty.contains(DirtyFlags::MAX_DISTANCE) {
            backend.set_max_distance(voice, sound.max_distance);
            p.dirty.remove(DirtyFlags::MAX_DISTANCE);
        }
        if p.dirty.contains(DirtyFlags::REF_DISTANCE) {
            backend.set_reference_distance(voice, sound.min_distance);
            p.dirty.remove(DirtyFlags::REF_DISTANCE);
        }
        p.pushed.distances = Some((sound.min_distance, sound.max_distance));

        if p.dirty.contains(DirtyFlags::LOOP) {
            // Streams loop by reopening the decoder, never in hardware
            backend.set_looping(voice, p.looping && !streamed);
            p.dirty.remove(DirtyFlags::LOOP);
        }
        if p.dirty.contains(DirtyFlags::VOLUME) {
            backend.set_gain(voice, gain);
            p.dirty.remove(DirtyFlags::VOLUME);
        }
        if p.dirty.contains(DirtyFlags::PITCH) {
            backend.set_pitch(voice, pitch);
            p.pushed.pitch = Some(pitch);
            p.dirty.remove(DirtyFlags::PITCH);
        }

        // Pause only at silence, resume only once audible again
        if p.dirty.contains(DirtyFlags::PAUSE) {
            if p.paused {
                if p.pause_fade.is_silent() {
                    if status == VoiceStatus::Playing {
                        backend.pause(voice);
                    }
                    p.dirty.remove(DirtyFlags::PAUSE);
                }
            } else if p.pause_fade.is_audible() {
                if status == VoiceStatus::Paused {
                    backend.play(voice);
                }
                p.dirty.remove(DirtyFlags::PAUSE);
            }
        }
    }
}

impl Drop for PlaybackInstance {
    fn drop(&mut self) {
        self.dispose_with(DisposeReason::Shutdown);
    }
}

impl std::fmt::Debug for PlaybackInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackInstance")
            .field("id", &self.id)
            .field("sound_id", &self.sound_id)
            .field("spatial", &self.spatial)
            .field("priority", &self.priority())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;
    use crate::decoder::PcmDecoder;
    use crate::mixer::VoiceMixer;
    use crate::resource::{AudioData, PcmFormat, SoundLibrary};
    use crate::scene::AnchorTable;
    use crate::sim::{BackendCall, SimBackend};
    use approx::assert_relative_eq;

    const DT: f32 = 1.0 / 64.0;

    struct Rig {
        backend: Arc<SimBackend>,
        library: Arc<SoundLibrary>,
        anchors: Arc<AnchorTable>,
        mixer: VoiceMixer,
    }

    fn rig(total_voices: usize) -> Rig {
        let backend = Arc::new(SimBackend::new(64));
        let library = Arc::new(SoundLibrary::new());
        let anchors = Arc::new(AnchorTable::new());

        let data = AudioData::pcm16(&[100i16; 48000], PcmFormat::new(48000, 1), false);
        library.load_buffered(1, data, backend.as_ref(), &PcmDecoder).unwrap();
        library.register_sound(SoundDefinition::new(1, "tone", 1));

        let mixer = VoiceMixer::new(
            MixerConfig::with_total_voices(total_voices),
            backend.clone(),
            Arc::new(PcmDecoder),
            library.clone(),
            anchors.clone(),
        )
        .unwrap();

        Rig {
            backend,
            library,
            anchors,
            mixer,
        }
    }

    #[test]
    fn test_first_tick_voices_and_starts() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        assert_eq!(instance.state(), InstanceState::Unassigned);

        rig.mixer.update(DT);

        assert_eq!(instance.state(), InstanceState::VoicedPlaying);
        assert_relative_eq!(instance.priority(), 500.0);
        assert_relative_eq!(instance.play_time(), DT);
    }

    #[test]
    fn test_buffered_sound_finishes() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.update(DT);

        rig.backend.advance(1.5);
        rig.mixer.update(DT);

        assert!(instance.is_disposed());
        assert_eq!(instance.dispose_reason(), Some(DisposeReason::Finished));
        assert_eq!(rig.backend.active_voices(), 0);
    }

    #[test]
    fn test_resource_vanishing_disposes() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.update(DT);

        rig.library.unregister_sound(1);
        rig.mixer.update(DT);

        assert_eq!(instance.dispose_reason(), Some(DisposeReason::ResourceUnavailable));
        assert_eq!(rig.mixer.stats().voices_in_use_non_spatial, 0);
    }

    #[test]
    fn test_out_of_range_disposes() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_at(1, Vec3::new(150.0, 0.0, 0.0));
        rig.mixer.update(DT);

        assert_eq!(instance.dispose_reason(), Some(DisposeReason::RangeExceeded));
        assert!(instance.voice().is_none());
    }

    #[test]
    fn test_destroyed_anchor_keeps_last_position() {
        let mut rig = rig(8);
        rig.anchors.insert(9, AnchorState::at(Vec3::new(10.0, 0.0, 0.0)));
        let instance = rig.mixer.play_attached(1, 9, Vec3::new(0.0, 2.0, 0.0));
        rig.mixer.update(DT);
        assert_eq!(instance.anchor(), Some(9));

        rig.anchors.destroy(9);
        rig.mixer.update(DT);

        assert!(!instance.is_disposed());
        assert_eq!(instance.anchor(), None);
        let voice = instance.voice().unwrap();
        let (position, relative) = rig.backend.voice_position(voice).unwrap();
        assert!(!relative);
        assert_relative_eq!(position.x, 10.0);
        assert_relative_eq!(position.y, 2.0);
    }

    #[test]
    fn test_stop_disposes_next_tick() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.update(DT);

        instance.stop();
        assert_eq!(instance.state(), InstanceState::VoicedStopped);
        rig.mixer.update(DT);

        assert_eq!(instance.dispose_reason(), Some(DisposeReason::Stopped));
    }

    #[test]
    fn test_stop_before_first_tick() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        instance.stop();
        rig.mixer.update(DT);

        assert_eq!(instance.dispose_reason(), Some(DisposeReason::Stopped));
        assert_eq!(rig.backend.active_voices(), 0);
    }

    #[test]
    fn test_dispose_is_idempotent_and_silences() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.update(DT);

        instance.dispose();
        instance.dispose();
        rig.backend.clear_calls();

        instance.set_volume(0.5);
        instance.stop();
        rig.mixer.update(DT);

        assert!(rig.backend.calls().is_empty());
        assert_eq!(instance.dispose_reason(), Some(DisposeReason::Requested));
    }

    #[test]
    fn test_gain_rewritten_every_tick() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.update(DT);
        let voice = instance.voice().unwrap();

        rig.backend.clear_calls();
        rig.mixer.update(DT);
        rig.mixer.update(DT);

        let calls = rig.backend.calls();
        let gains = calls
            .iter()
            .filter(|c| matches!(c, BackendCall::SetGain(v, _) if *v == voice))
            .count();
        assert_eq!(gains, 2);
        // Nothing else changed, nothing else is pushed
        assert!(!calls.iter().any(|c| matches!(c, BackendCall::SetPitch(..) | BackendCall::SetPosition(..))));
    }

    #[test]
    fn test_pitch_floor_for_play_time() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        instance.set_pitch(0.1);
        rig.mixer.update(0.5);

        assert_relative_eq!(instance.play_time(), 0.25);
    }

    #[test]
    fn test_auto_fade_out_point() {
        let mut rig = rig(8);
        rig.library
            .register_sound(SoundDefinition::new(2, "fading", 1).with_fade_out(0.1, 0.5));
        let instance = rig.mixer.play_2d(2);

        rig.mixer.update(0.05);
        assert_eq!(instance.fade_target(), 1.0);

        rig.mixer.update(0.06);
        assert_eq!(instance.fade_target(), 0.0);
    }

    #[test]
    fn test_time_speed_scales_fades() {
        let mut rig = rig(8);
        let instance = rig.mixer.play_2d(1);
        rig.mixer.set_time_speed(2.0);
        instance.fade_out(1.0);

        rig.mixer.update(0.25);
        assert_relative_eq!(instance.fade_value(), 0.5);
        assert_relative_eq!(instance.play_time(), 0.5);
    }
}
