//! Priority Model
//!
//! ```text
//! priority = 1000 · volume · distance(3D only) / √concurrent
//!
//! volume   = category · master · 0.5 · definition · instance [· fade]
//! distance = max(0, 1 − (d − min) / (max − min))
//! ```
//!
//! The pre-acquisition value leaves the fade out so a sound that has not
//! faded in yet can still win a voice; the value published after the tick
//! includes it.

use crate::types::SoundCategory;
use crate::volume::VolumeSettings;

/// Scale applied to every priority
pub const PRIORITY_SCALE: f32 = 1000.0;

/// Weight of the volume term
pub const VOLUME_WEIGHT: f32 = 0.5;

/// Volume contribution to priority
#[inline]
pub fn volume_factor(
    volumes: &VolumeSettings,
    category: SoundCategory,
    definition_volume: f32,
    instance_volume: f32,
) -> f32 {
    volumes.category(category) * volumes.master * VOLUME_WEIGHT * definition_volume * instance_volume
}

/// Attenuation contribution to priority; above 1.0 inside `min_distance`
#[inline]
pub fn distance_factor(distance: f32, min_distance: f32, max_distance: f32) -> f32 {
    let span = max_distance - min_distance;
    if span <= f32::EPSILON {
        return if distance <= min_distance { 1.0 } else { 0.0 };
    }
    (1.0 - (distance - min_distance) / span).max(0.0)
}

/// Combine the factors; `distance` is `None` for non-spatial instances
#[inline]
pub fn priority(volume: f32, distance: Option<f32>, concurrent_instances: u32) -> f32 {
    let concurrent = concurrent_instances.max(1) as f32;
    PRIORITY_SCALE * volume * distance.unwrap_or(1.0) / concurrent.sqrt()
}
