//! Voice Mixer
//!
//! Global mixer context and owner of every playback instance.
//!
//! The mixer holds the collaborators (backend, decoder, resources, scene
//! anchors), the listener and user volumes, the pool accounting and the
//! set of streams the streaming service feeds. Instances keep a handle to
//! the shared [`MixerCore`]; the mixer itself keeps the strong references
//! so it can guarantee every instance is disposed before it goes away.

use parking_lot::{Mutex, RwLock};
use portable_atomic::AtomicF32;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::backend::VoiceBackend;
use crate::config::MixerConfig;
use crate::decoder::StreamDecoder;
use crate::error::{DisposeReason, VoiceResult};
use crate::instance::PlaybackInstance;
use crate::pool::VoicePool;
use crate::resource::SoundResources;
use crate::scene::{Attachment, Listener, SceneAnchors};
use crate::streaming::StreamingService;
use crate::types::{AnchorId, InstanceId, SoundCategory, SoundId, Vec3, VoiceKind};
use crate::volume::VolumeSettings;

// ═══════════════════════════════════════════════════════════════════════════════
// MIXER CORE
// ═══════════════════════════════════════════════════════════════════════════════

/// State shared by the mixer, its instances and the streaming service
pub struct MixerCore {
    config: MixerConfig,
    backend: Arc<dyn VoiceBackend>,
    decoder: Arc<dyn StreamDecoder>,
    resources: Arc<dyn SoundResources>,
    anchors: Arc<dyn SceneAnchors>,
    listener: RwLock<Listener>,
    volumes: RwLock<VolumeSettings>,
    time_speed: AtomicF32,
    pub(crate) pool: Mutex<VoicePool>,
    streams: Mutex<HashMap<InstanceId, Weak<PlaybackInstance>>>,
}

impl MixerCore {
    #[inline]
    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> &dyn VoiceBackend {
        self.backend.as_ref()
    }

    #[inline]
    pub fn decoder(&self) -> &dyn StreamDecoder {
        self.decoder.as_ref()
    }

    #[inline]
    pub fn resources(&self) -> &dyn SoundResources {
        self.resources.as_ref()
    }

    #[inline]
    pub fn anchors(&self) -> &dyn SceneAnchors {
        self.anchors.as_ref()
    }

    #[inline]
    pub fn listener(&self) -> Listener {
        *self.listener.read()
    }

    #[inline]
    pub fn volumes(&self) -> VolumeSettings {
        *self.volumes.read()
    }

    #[inline]
    pub fn time_speed(&self) -> f32 {
        self.time_speed.load(Ordering::Relaxed)
    }

    pub(crate) fn enqueue_stream(&self, instance: &Arc<PlaybackInstance>) {
        self.streams
            .lock()
            .insert(instance.id(), Arc::downgrade(instance));
    }

    pub(crate) fn forget_stream(&self, id: InstanceId) {
        self.streams.lock().remove(&id);
    }

    /// Feed every active stream once. Returns how many are still active.
    pub fn service_streaming(&self) -> usize {
        // Snapshot so no set lock is held while feeding
        let active: Vec<Arc<PlaybackInstance>> = self
            .streams
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();

        let finished: Vec<InstanceId> = active
            .iter()
            .filter(|instance| !instance.service_streaming())
            .map(|instance| instance.id())
            .collect();

        let mut streams = self.streams.lock();
        for id in &finished {
            streams.remove(id);
        }
        streams.retain(|_, weak| weak.strong_count() > 0);
        streams.len()
    }

    pub fn active_streams(&self) -> usize {
        self.streams.lock().len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATS
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of pool and instance counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MixerStats {
    pub total_voices: usize,
    pub spatial_capacity: usize,
    pub non_spatial_capacity: usize,
    pub voices_in_use_spatial: usize,
    pub voices_in_use_non_spatial: usize,
    /// Live (not disposed) instances
    pub instances: usize,
    /// Instances currently holding a voice
    pub voiced: usize,
    /// Instances registered with the streaming feeder
    pub streaming: usize,
    pub paused: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE MIXER
// ═══════════════════════════════════════════════════════════════════════════════

/// Owner of all playback instances
pub struct VoiceMixer {
    core: Arc<MixerCore>,
    instances: Vec<Arc<PlaybackInstance>>,
}

impl VoiceMixer {
    pub fn new(
        config: MixerConfig,
        backend: Arc<dyn VoiceBackend>,
        decoder: Arc<dyn StreamDecoder>,
        resources: Arc<dyn SoundResources>,
        anchors: Arc<dyn SceneAnchors>,
    ) -> VoiceResult<Self> {
        config.validate()?;

        let pool = VoicePool::new(config.total_voices);
        log::info!(
            "[Mixer] Created with {} voices ({} spatial / {} non-spatial)",
            config.total_voices,
            pool.accounting().capacity(VoiceKind::Spatial),
            pool.accounting().capacity(VoiceKind::NonSpatial)
        );

        let core = MixerCore {
            time_speed: AtomicF32::new(config.time_speed),
            config,
            backend,
            decoder,
            resources,
            anchors,
            listener: RwLock::new(Listener::default()),
            volumes: RwLock::new(VolumeSettings::default()),
            pool: Mutex::new(pool),
            streams: Mutex::new(HashMap::new()),
        };

        Ok(Self {
            core: Arc::new(core),
            instances: Vec::new(),
        })
    }

    #[inline]
    pub fn core(&self) -> &Arc<MixerCore> {
        &self.core
    }

    #[inline]
    pub fn config(&self) -> &MixerConfig {
        self.core.config()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PLAY
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create an instance. It competes for a voice on the next update.
    pub fn play(&mut self, sound: SoundId, attachment: Attachment) -> Arc<PlaybackInstance> {
        let instance = PlaybackInstance::new(Arc::clone(&self.core), sound, attachment);
        self.instances.push(Arc::clone(&instance));
        instance
    }

    /// Non-spatial, locked to the listener
    pub fn play_2d(&mut self, sound: SoundId) -> Arc<PlaybackInstance> {
        self.play(sound, Attachment::NonSpatial)
    }

    /// At a fixed world position
    pub fn play_at(&mut self, sound: SoundId, position: Vec3) -> Arc<PlaybackInstance> {
        self.play(sound, Attachment::Fixed(position))
    }

    /// Following a scene anchor
    pub fn play_attached(&mut self, sound: SoundId, anchor: AnchorId, offset: Vec3) -> Arc<PlaybackInstance> {
        self.play(sound, Attachment::Anchor { id: anchor, offset })
    }

    /// Following the listener at an offset
    pub fn play_listener(&mut self, sound: SoundId, offset: Vec3) -> Arc<PlaybackInstance> {
        self.play(sound, Attachment::Listener { offset })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TICK
    // ═══════════════════════════════════════════════════════════════════════════

    /// Tick every instance in creation order, then drop disposed ones
    pub fn update(&mut self, dt: f32) {
        for instance in &self.instances {
            instance.update(dt);
        }
        self.instances.retain(|instance| !instance.is_disposed());
        self.core.pool.lock().prune();
    }

    /// Feed all streams once from the calling thread
    pub fn service_streaming(&self) -> usize {
        self.core.service_streaming()
    }

    /// Feed all streams from a background thread every
    /// `stream_service_interval_ms`
    pub fn spawn_streaming_service(&self) -> VoiceResult<StreamingService> {
        let interval = Duration::from_millis(self.core.config.stream_service_interval_ms.max(1));
        StreamingService::spawn(Arc::clone(&self.core), interval)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // GLOBAL CONTROLS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn set_listener(&self, listener: Listener) {
        *self.core.listener.write() = listener;
    }

    pub fn listener(&self) -> Listener {
        self.core.listener()
    }

    /// Replace user volumes. Master goes to the backend's listener gain.
    pub fn set_volumes(&self, volumes: VolumeSettings) {
        *self.core.volumes.write() = volumes;
        self.core.backend().set_listener_gain(volumes.master.clamp(0.0, 1.0));
    }

    pub fn volumes(&self) -> VolumeSettings {
        self.core.volumes()
    }

    /// Simulation speed applied to fades and play time
    pub fn set_time_speed(&self, speed: f32) {
        let speed = if speed.is_finite() { speed.max(0.0) } else { 1.0 };
        self.core.time_speed.store(speed, Ordering::Relaxed);
    }

    pub fn time_speed(&self) -> f32 {
        self.core.time_speed()
    }

    pub fn stop_all(&self) {
        for instance in &self.instances {
            instance.stop();
        }
    }

    /// Pause every instance, or only those in `category`
    pub fn pause_all(&self, category: Option<SoundCategory>) {
        self.set_paused_where(category, true);
    }

    pub fn resume_all(&self, category: Option<SoundCategory>) {
        self.set_paused_where(category, false);
    }

    fn set_paused_where(&self, category: Option<SoundCategory>, paused: bool) {
        for instance in &self.instances {
            let matches = match category {
                None => true,
                Some(category) => self
                    .core
                    .resources()
                    .sound(instance.sound_id())
                    .is_some_and(|sound| sound.category == category),
            };
            if matches {
                instance.set_paused(paused);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // INSPECTION
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn instances(&self) -> &[Arc<PlaybackInstance>] {
        &self.instances
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Arc<PlaybackInstance>> {
        self.instances.iter().find(|instance| instance.id() == id)
    }

    pub fn stats(&self) -> MixerStats {
        let (total_voices, capacities, in_use) = {
            let pool = self.core.pool.lock();
            let accounting = pool.accounting();
            (
                accounting.total_voices(),
                (
                    accounting.capacity(VoiceKind::Spatial),
                    accounting.capacity(VoiceKind::NonSpatial),
                ),
                (
                    accounting.in_use(VoiceKind::Spatial),
                    accounting.in_use(VoiceKind::NonSpatial),
                ),
            )
        };

        let live = self.instances.iter().filter(|i| !i.is_disposed());
        MixerStats {
            total_voices,
            spatial_capacity: capacities.0,
            non_spatial_capacity: capacities.1,
            voices_in_use_spatial: in_use.0,
            voices_in_use_non_spatial: in_use.1,
            instances: live.clone().count(),
            voiced: live.clone().filter(|i| i.voice().is_some()).count(),
            streaming: self.core.active_streams(),
            paused: live.filter(|i| i.is_paused()).count(),
        }
    }

    /// Dispose every instance
    pub fn shutdown(&mut self) {
        if self.instances.is_empty() {
            return;
        }
        let count = self.instances.len();
        for instance in self.instances.drain(..) {
            instance.dispose_with(DisposeReason::Shutdown);
        }
        log::info!("[Mixer] Shut down, {} instances disposed", count);
    }
}

impl Drop for VoiceMixer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
