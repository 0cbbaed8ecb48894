//! Shared identifiers and small value types

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};
use std::sync::atomic::{AtomicU64, Ordering};

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a playback instance
pub type InstanceId = u64;

/// Sound definition identifier (resource layer key)
pub type SoundId = u32;

/// Audio data identifier (resource layer key)
pub type AudioId = u32;

/// Scene anchor identifier
pub type AnchorId = u64;

/// Invalid instance ID
pub const INVALID_INSTANCE_ID: InstanceId = 0;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Generate unique instance ID
#[inline]
pub fn generate_instance_id() -> InstanceId {
    NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Backend voice handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceHandle(pub u32);

/// Backend sample buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferHandle(pub u32);

// ═══════════════════════════════════════════════════════════════════════════════
// VECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// 3D vector in world units
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Length with the Z component scaled by `z_weight`
    #[inline]
    pub fn weighted_length(&self, z_weight: f32) -> f32 {
        let z = self.z * z_weight;
        (self.x * self.x + self.y * self.y + z * z).sqrt()
    }

    /// Rotate around the Z axis by `angle` radians
    #[inline]
    pub fn rotate_z(&self, angle: f32) -> Self {
        if angle == 0.0 {
            return *self;
        }
        let (sin, cos) = angle.sin_cos();
        Self {
            x: self.x * cos - self.y * sin,
            y: self.x * sin + self.y * cos,
            z: self.z,
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOUND CATEGORY
// ═══════════════════════════════════════════════════════════════════════════════

/// User-facing volume category of a sound definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SoundCategory {
    /// Interface clicks and notifications
    Ui = 0,
    /// In-world effects
    #[default]
    World = 1,
    /// Dialogue
    Speech = 2,
    /// Music tracks
    Music = 3,
}

impl SoundCategory {
    /// Convert from u8 index
    #[inline]
    pub fn from_index(index: u8) -> Self {
        match index {
            0 => SoundCategory::Ui,
            1 => SoundCategory::World,
            2 => SoundCategory::Speech,
            3 => SoundCategory::Music,
            _ => SoundCategory::World,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SoundCategory::Ui => "UI",
            SoundCategory::World => "World",
            SoundCategory::Speech => "Speech",
            SoundCategory::Music => "Music",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE KIND
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool category a voice is accounted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoiceKind {
    /// Positioned in the world (3D)
    Spatial = 0,
    /// Listener-locked (2D)
    NonSpatial = 1,
}

impl VoiceKind {
    #[inline]
    pub fn from_spatial(spatial: bool) -> Self {
        if spatial {
            VoiceKind::Spatial
        } else {
            VoiceKind::NonSpatial
        }
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Playback status reported by the backend for a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum VoiceStatus {
    /// Freshly created or reset, never played
    #[default]
    NotStarted = 0,
    Playing = 1,
    Paused = 2,
    /// Ran out of queued data or was stopped
    Stopped = 3,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
