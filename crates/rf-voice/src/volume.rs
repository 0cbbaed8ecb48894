//! User volume settings

use serde::{Deserialize, Serialize};

use crate::types::SoundCategory;

/// Per-category user volumes (0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeSettings {
    pub master: f32,
    pub ui: f32,
    pub world: f32,
    pub speech: f32,
    pub music: f32,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            master: 1.0,
            ui: 1.0,
            world: 1.0,
            speech: 1.0,
            music: 1.0,
        }
    }
}

impl VolumeSettings {
    /// Volume for a category (master not applied)
    #[inline]
    pub fn category(&self, category: SoundCategory) -> f32 {
        match category {
            SoundCategory::Ui => self.ui,
            SoundCategory::World => self.world,
            SoundCategory::Speech => self.speech,
            SoundCategory::Music => self.music,
        }
    }

    pub fn set_category(&mut self, category: SoundCategory, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        match category {
            SoundCategory::Ui => self.ui = volume,
            SoundCategory::World => self.world = volume,
            SoundCategory::Speech => self.speech = volume,
            SoundCategory::Music => self.music = volume,
        }
    }
}
