//! Voice Pool Allocator
//!
//! Accounting of voices in use plus the grant/steal decision.
//!
//! ## Capacity split
//!
//! ```text
//! spatial     = ⌊total · 3/4⌋
//! non-spatial = total − spatial
//! ```
//!
//! ## Stealing
//!
//! When a request finds no free voice it may take one from a weaker
//! instance. Two scans exist:
//! - **Category**: same voice kind. Candidates are visited weakest first
//!   and the scan ends at the first one that cannot be beaten.
//! - **Similar sound**: the sound's own instance cap blocked the request,
//!   so only instances of the same definition qualify. Non-looping
//!   candidates are damped by `√(play_time + 1)`, which reorders them, so
//!   every candidate is checked.
//!
//! A victim is beaten when `requester · damping > victim + threshold`,
//! with a larger threshold for looping victims.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::backend::VoiceBackend;
use crate::config::MixerConfig;
use crate::instance::PlaybackInstance;
use crate::resource::SoundDefinition;
use crate::types::{InstanceId, SoundId, VoiceHandle, VoiceKind};

// ═══════════════════════════════════════════════════════════════════════════════
// ACCOUNTING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct Registration {
    sound: SoundId,
    kind: VoiceKind,
}

/// Voices in use per kind and live instances per sound definition
#[derive(Debug, Default)]
pub struct PoolAccounting {
    total_voices: usize,
    in_use: [usize; 2],
    sound_counts: HashMap<SoundId, u32>,
    registrations: HashMap<InstanceId, Registration>,
}

impl PoolAccounting {
    pub fn new(total_voices: usize) -> Self {
        Self {
            total_voices,
            ..Default::default()
        }
    }

    #[inline]
    pub fn total_voices(&self) -> usize {
        self.total_voices
    }

    /// Soft capacity for a voice kind
    #[inline]
    pub fn capacity(&self, kind: VoiceKind) -> usize {
        let spatial = self.total_voices * 3 / 4;
        match kind {
            VoiceKind::Spatial => spatial,
            VoiceKind::NonSpatial => self.total_voices - spatial,
        }
    }

    #[inline]
    pub fn in_use(&self, kind: VoiceKind) -> usize {
        self.in_use[kind.index()]
    }

    #[inline]
    pub fn in_use_total(&self) -> usize {
        self.in_use[0] + self.in_use[1]
    }

    /// Room for a fresh voice of `kind`. Similar-sound steals can move a
    /// voice across kinds, so the overall total is checked as well.
    #[inline]
    pub fn has_free(&self, kind: VoiceKind) -> bool {
        self.in_use(kind) < self.capacity(kind) && self.in_use_total() < self.total_voices
    }

    #[inline]
    pub fn sound_count(&self, sound: SoundId) -> u32 {
        self.sound_counts.get(&sound).copied().unwrap_or(0)
    }

    #[inline]
    pub fn is_registered(&self, id: InstanceId) -> bool {
        self.registrations.contains_key(&id)
    }

    /// Count an instance once. Returns false if it was already counted.
    pub fn register(&mut self, id: InstanceId, sound: SoundId, kind: VoiceKind) -> bool {
        if self.registrations.contains_key(&id) {
            return false;
        }
        self.registrations.insert(id, Registration { sound, kind });
        self.in_use[kind.index()] += 1;
        *self.sound_counts.entry(sound).or_insert(0) += 1;
        true
    }

    /// Release an instance's counts. Returns false if it was not counted.
    pub fn unregister(&mut self, id: InstanceId) -> bool {
        let Some(reg) = self.registrations.remove(&id) else {
            return false;
        };
        self.in_use[reg.kind.index()] = self.in_use[reg.kind.index()].saturating_sub(1);
        if let Some(count) = self.sound_counts.get_mut(&reg.sound) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.sound_counts.remove(&reg.sound);
            }
        }
        true
    }

    pub fn registered_count(&self) -> usize {
        self.registrations.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STEAL SELECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Which instances a steal may take from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealMode {
    /// Same voice kind, short-circuiting scan
    Category,
    /// Same sound definition, play-time damped, full scan
    SimilarSound,
}

/// Snapshot of a voiced instance considered for stealing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StealCandidate {
    pub id: InstanceId,
    pub priority: f32,
    pub looping: bool,
    pub play_time: f32,
}

/// Requester priority multiplier against a candidate
#[inline]
pub fn steal_damping(mode: StealMode, candidate: &StealCandidate) -> f32 {
    match mode {
        StealMode::SimilarSound if !candidate.looping => (candidate.play_time + 1.0).sqrt(),
        _ => 1.0,
    }
}

/// Whether `requester_priority` beats `candidate`
#[inline]
pub fn beats(requester_priority: f32, mode: StealMode, candidate: &StealCandidate, config: &MixerConfig) -> bool {
    requester_priority * steal_damping(mode, candidate)
        > candidate.priority + config.steal_threshold(candidate.looping)
}

/// Pick a victim. `candidates` is sorted by descending priority in place.
pub fn select_victim(
    requester_priority: f32,
    mode: StealMode,
    candidates: &mut [StealCandidate],
    config: &MixerConfig,
) -> Option<InstanceId> {
    candidates.sort_by(|a, b| b.priority.total_cmp(&a.priority));

    for candidate in candidates.iter().rev() {
        if beats(requester_priority, mode, candidate, config) {
            return Some(candidate.id);
        }
        if mode == StealMode::Category {
            break;
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// Accounting plus the registry of voiced instances
pub struct VoicePool {
    accounting: PoolAccounting,
    voiced: HashMap<InstanceId, Weak<PlaybackInstance>>,
}

impl VoicePool {
    pub fn new(total_voices: usize) -> Self {
        Self {
            accounting: PoolAccounting::new(total_voices),
            voiced: HashMap::new(),
        }
    }

    #[inline]
    pub fn accounting(&self) -> &PoolAccounting {
        &self.accounting
    }

    /// Register a voiced instance (idempotent)
    pub fn register(&mut self, instance: &Arc<PlaybackInstance>) -> bool {
        let added = self
            .accounting
            .register(instance.id(), instance.sound_id(), instance.kind());
        if added {
            self.voiced.insert(instance.id(), Arc::downgrade(instance));
        }
        added
    }

    /// Unregister an instance (idempotent)
    pub fn unregister(&mut self, id: InstanceId) -> bool {
        self.voiced.remove(&id);
        self.accounting.unregister(id)
    }

    /// Grant a fresh voice or steal one. `None` means the requester
    /// should be dropped.
    pub fn acquire(
        &mut self,
        requester: &PlaybackInstance,
        sound: &SoundDefinition,
        requester_priority: f32,
        backend: &dyn VoiceBackend,
        config: &MixerConfig,
    ) -> Option<VoiceHandle> {
        let kind = requester.kind();
        let cap_blocked = sound.instance_cap_reached(self.accounting.sound_count(sound.id));

        if !cap_blocked && self.accounting.has_free(kind) {
            match backend.create_voice() {
                Some(voice) => return Some(voice),
                None => log::warn!(
                    "[VoicePool] Backend refused a voice with {}/{} {:?} in use",
                    self.accounting.in_use(kind),
                    self.accounting.capacity(kind),
                    kind
                ),
            }
        }

        let mode = if cap_blocked {
            StealMode::SimilarSound
        } else {
            StealMode::Category
        };

        let mut candidates: Vec<StealCandidate> = self
            .voiced
            .values()
            .filter_map(Weak::upgrade)
            .filter(|c| c.id() != requester.id() && !c.is_disposed())
            .filter(|c| match mode {
                StealMode::Category => c.kind() == kind,
                StealMode::SimilarSound => c.sound_id() == sound.id,
            })
            .map(|c| StealCandidate {
                id: c.id(),
                priority: c.priority(),
                looping: c.is_looping(),
                play_time: c.play_time(),
            })
            .collect();

        let victim_id = select_victim(requester_priority, mode, &mut candidates, config)?;
        let victim = self.voiced.get(&victim_id).and_then(Weak::upgrade)?;
        let voice = victim.surrender_voice()?;
        self.unregister(victim_id);

        log::debug!(
            "[VoicePool] Instance {} stole voice {:?} from {} ({:?}, priority {:.1} vs {:.1})",
            requester.id(),
            voice,
            victim_id,
            mode,
            requester_priority,
            victim.priority()
        );
        Some(voice)
    }

    /// Drop registry entries whose instance is gone
    pub fn prune(&mut self) {
        let dead: Vec<InstanceId> = self
            .voiced
            .iter()
            .filter(|(_, w)| w.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.unregister(id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn candidate(id: InstanceId, priority: f32, looping: bool, play_time: f32) -> StealCandidate {
        StealCandidate {
            id,
            priority,
            looping,
            play_time,
        }
    }

    #[test]
    fn test_capacity_split() {
        let pool = PoolAccounting::new(32);
        assert_eq!(pool.capacity(VoiceKind::Spatial), 24);
        assert_eq!(pool.capacity(VoiceKind::NonSpatial), 8);

        let odd = PoolAccounting::new(7);
        assert_eq!(odd.capacity(VoiceKind::Spatial), 5);
        assert_eq!(odd.capacity(VoiceKind::NonSpatial), 2);
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut pool = PoolAccounting::new(4);

        assert!(pool.register(1, 10, VoiceKind::NonSpatial));
        assert!(!pool.register(1, 10, VoiceKind::NonSpatial));
        assert_eq!(pool.in_use(VoiceKind::NonSpatial), 1);
        assert_eq!(pool.sound_count(10), 1);
        assert!(!pool.has_free(VoiceKind::NonSpatial));

        assert!(pool.unregister(1));
        assert!(!pool.unregister(1));
        assert_eq!(pool.in_use_total(), 0);
        assert_eq!(pool.in_use(VoiceKind::NonSpatial), 0);
        assert_eq!(pool.sound_count(10), 0);
        assert_eq!(pool.registered_count(), 0);
    }

    #[test]
    fn test_total_caps_fresh_voices() {
        let mut pool = PoolAccounting::new(4);
        // A cross-kind steal left the non-spatial side over its share
        pool.register(1, 1, VoiceKind::NonSpatial);
        pool.register(2, 1, VoiceKind::NonSpatial);
        pool.register(3, 2, VoiceKind::Spatial);
        assert!(pool.has_free(VoiceKind::Spatial));

        pool.register(4, 2, VoiceKind::Spatial);
        assert_eq!(pool.in_use(VoiceKind::Spatial), 2);
        assert!(!pool.has_free(VoiceKind::Spatial));
    }

    #[test]
    fn test_looping_victim_is_sticky() {
        let config = MixerConfig::default();
        let mut candidates = [candidate(1, 50.0, true, 0.0)];

        // 70 > 50 + 30 is false
        assert_eq!(select_victim(70.0, StealMode::Category, &mut candidates, &config), None);
        assert_eq!(select_victim(81.0, StealMode::Category, &mut candidates, &config), Some(1));
    }

    #[test]
    fn test_one_shot_threshold() {
        let config = MixerConfig::default();
        let mut candidates = [candidate(1, 50.0, false, 0.0)];

        assert_eq!(select_victim(65.0, StealMode::Category, &mut candidates, &config), None);
        assert_eq!(select_victim(65.5, StealMode::Category, &mut candidates, &config), Some(1));
    }

    #[test]
    fn test_weakest_candidate_chosen() {
        let config = MixerConfig::default();
        let mut candidates = [
            candidate(1, 40.0, false, 0.0),
            candidate(2, 10.0, false, 0.0),
            candidate(3, 25.0, false, 0.0),
        ];
        assert_eq!(select_victim(100.0, StealMode::Category, &mut candidates, &config), Some(2));
    }

    #[test]
    fn test_category_scan_short_circuits() {
        let config = MixerConfig::default();
        // Weakest is a loop that cannot be beaten; the stronger one-shot
        // could be, but the category scan stops at the first failure
        let mut candidates = [candidate(1, 50.0, true, 0.0), candidate(2, 60.0, false, 0.0)];
        assert_eq!(select_victim(78.0, StealMode::Category, &mut candidates, &config), None);
    }

    #[test]
    fn test_similar_sound_scans_everything() {
        let config = MixerConfig::default();
        // Fresh weak one-shot fails, long-running stronger one is damped enough
        let mut candidates = [candidate(1, 40.0, false, 0.0), candidate(2, 80.0, false, 8.0)];

        // vs 1: 40 * 1 > 55? no. vs 2: 40 * 3 = 120 > 95? yes
        assert_eq!(select_victim(40.0, StealMode::SimilarSound, &mut candidates, &config), Some(2));
        assert_eq!(select_victim(40.0, StealMode::Category, &mut candidates, &config), None);
    }

    #[test]
    fn test_similar_sound_does_not_damp_loops() {
        let config = MixerConfig::default();
        let looping = candidate(1, 10.0, true, 100.0);
        assert_eq!(steal_damping(StealMode::SimilarSound, &looping), 1.0);
        assert_eq!(steal_damping(StealMode::Category, &candidate(2, 10.0, false, 100.0)), 1.0);

        let mut candidates = [looping];
        assert_eq!(select_victim(39.0, StealMode::SimilarSound, &mut candidates, &config), None);
    }

    #[test]
    fn test_steal_rule_randomized() {
        let config = MixerConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(0x5EA1);

        for _ in 0..5000 {
            let requester: f32 = rng.random_range(0.0..1000.0);
            let looping = rng.random_bool(0.5);
            let similar = rng.random_bool(0.5);
            let c = candidate(7, rng.random_range(0.0..1000.0), looping, rng.random_range(0.0..30.0));
            let mode = if similar {
                StealMode::SimilarSound
            } else {
                StealMode::Category
            };

            let threshold = if looping { 30.0 } else { 15.0 };
            let damping = if similar && !looping {
                (c.play_time + 1.0).sqrt()
            } else {
                1.0
            };
            let expected = requester * damping > c.priority + threshold;

            let mut candidates = [c];
            let chosen = select_victim(requester, mode, &mut candidates, &config);
            assert_eq!(chosen.is_some(), expected, "requester {} vs {:?} ({:?})", requester, c, mode);
        }
    }

    #[test]
    fn test_empty_candidates() {
        let config = MixerConfig::default();
        assert_eq!(select_victim(1000.0, StealMode::Category, &mut [], &config), None);
    }
}
