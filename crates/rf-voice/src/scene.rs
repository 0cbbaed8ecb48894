//! Scene Anchors and Listener
//!
//! Instances never own the anchor they follow. They hold an [`AnchorId`]
//! and poll its state each tick, so an anchor destroyed mid-playback is
//! noticed on the next tick instead of being dereferenced.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{AnchorId, Vec3};

/// Anchor transform as seen by the audio system
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnchorState {
    pub position: Vec3,
    /// Orientation around the Z axis (radians)
    pub angle: f32,
    pub velocity: Vec3,
    pub destroyed: bool,
}

impl AnchorState {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// World position of a local offset
    #[inline]
    pub fn transform(&self, offset: Vec3) -> Vec3 {
        self.position + offset.rotate_z(self.angle)
    }
}

/// Anchor lookup
pub trait SceneAnchors: Send + Sync {
    fn anchor(&self, id: AnchorId) -> Option<AnchorState>;
}

/// Anchor table owned by the scene side
#[derive(Default)]
pub struct AnchorTable {
    anchors: RwLock<HashMap<AnchorId, AnchorState>>,
}

impl AnchorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: AnchorId, state: AnchorState) {
        self.anchors.write().insert(id, state);
    }

    /// Move an anchor; ignored for unknown ids
    pub fn set_transform(&self, id: AnchorId, position: Vec3, angle: f32, velocity: Vec3) {
        if let Some(anchor) = self.anchors.write().get_mut(&id) {
            anchor.position = position;
            anchor.angle = angle;
            anchor.velocity = velocity;
        }
    }

    /// Flag as destroyed (kept so late pollers still see the flag)
    pub fn destroy(&self, id: AnchorId) {
        if let Some(anchor) = self.anchors.write().get_mut(&id) {
            anchor.destroyed = true;
        }
    }

    pub fn remove(&self, id: AnchorId) {
        self.anchors.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }
}

impl SceneAnchors for AnchorTable {
    fn anchor(&self, id: AnchorId) -> Option<AnchorState> {
        self.anchors.read().get(&id).copied()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LISTENER
// ═══════════════════════════════════════════════════════════════════════════════

/// Listener transform
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Listener {
    pub position: Vec3,
    pub angle: f32,
    pub velocity: Vec3,
}

impl Listener {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTACHMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Where an instance is placed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Attachment {
    /// 2D, locked to the listener
    NonSpatial,
    /// Fixed world position
    Fixed(Vec3),
    /// Follows a scene anchor at a local offset
    Anchor { id: AnchorId, offset: Vec3 },
    /// Follows the listener at a local offset
    Listener { offset: Vec3 },
}

impl Attachment {
    #[inline]
    pub fn is_spatial(&self) -> bool {
        !matches!(self, Attachment::NonSpatial)
    }

    #[inline]
    pub fn anchor_id(&self) -> Option<AnchorId> {
        match self {
            Attachment::Anchor { id, .. } => Some(*id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_listener_relative(&self) -> bool {
        matches!(self, Attachment::NonSpatial | Attachment::Listener { .. })
    }
}

/// Voice-space placement for one tick
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Placement {
    /// Position written to the voice (listener-relative when `relative`)
    pub position: Vec3,
    pub velocity: Vec3,
    pub relative: bool,
    /// Weighted distance to the listener
    pub distance: f32,
}

/// Resolve an attachment against the current anchor and listener state.
///
/// `local` is the instance's own position offset. Returns `None` when the
/// anchor is gone; the caller decides what to fall back to.
pub fn resolve_placement(
    attachment: &Attachment,
    anchor: Option<&AnchorState>,
    listener: &Listener,
    local: Vec3,
    local_velocity: Vec3,
    z_weight: f32,
) -> Option<Placement> {
    match attachment {
        Attachment::NonSpatial => Some(Placement {
            position: local,
            velocity: Vec3::ZERO,
            relative: true,
            distance: 0.0,
        }),
        Attachment::Fixed(position) => {
            let world = *position + local;
            Some(Placement {
                position: world,
                velocity: local_velocity,
                relative: false,
                distance: (world - listener.position).weighted_length(z_weight),
            })
        }
        Attachment::Anchor { offset, .. } => {
            let anchor = anchor.filter(|a| !a.destroyed)?;
            let world = anchor.transform(*offset + local);
            Some(Placement {
                position: world,
                velocity: anchor.velocity + local_velocity,
                relative: false,
                distance: (world - listener.position).weighted_length(z_weight),
            })
        }
        Attachment::Listener { offset } => {
            let relative = *offset + local;
            Some(Placement {
                position: relative,
                velocity: local_velocity,
                relative: true,
                distance: relative.weighted_length(z_weight),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_anchor_table_lifecycle() {
        let table = AnchorTable::new();
        table.insert(1, AnchorState::at(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(table.len(), 1);

        table.set_transform(1, Vec3::new(5.0, 0.0, 0.0), 0.0, Vec3::ZERO);
        assert_eq!(table.anchor(1).unwrap().position.x, 5.0);

        table.destroy(1);
        assert!(table.anchor(1).unwrap().destroyed);

        table.remove(1);
        assert!(table.anchor(1).is_none());
    }

    #[test]
    fn test_fixed_placement_uses_weighted_distance() {
        let listener = Listener::at(Vec3::ZERO);
        let placement = resolve_placement(
            &Attachment::Fixed(Vec3::new(3.0, 0.0, 16.0)),
            None,
            &listener,
            Vec3::ZERO,
            Vec3::ZERO,
            0.25,
        )
        .unwrap();

        assert!(!placement.relative);
        assert_relative_eq!(placement.distance, 5.0);
    }

    #[test]
    fn test_anchor_placement_applies_rotation() {
        let anchor = AnchorState {
            position: Vec3::new(10.0, 0.0, 0.0),
            angle: std::f32::consts::PI,
            velocity: Vec3::new(1.0, 0.0, 0.0),
            destroyed: false,
        };
        let placement = resolve_placement(
            &Attachment::Anchor { id: 1, offset: Vec3::new(2.0, 0.0, 0.0) },
            Some(&anchor),
            &Listener::default(),
            Vec3::ZERO,
            Vec3::ZERO,
            0.25,
        )
        .unwrap();

        assert_relative_eq!(placement.position.x, 8.0, epsilon = 1e-5);
        assert_relative_eq!(placement.distance, 8.0, epsilon = 1e-5);
        assert_eq!(placement.velocity.x, 1.0);
    }

    #[test]
    fn test_destroyed_anchor_does_not_resolve() {
        let anchor = AnchorState {
            destroyed: true,
            ..Default::default()
        };
        let attachment = Attachment::Anchor { id: 1, offset: Vec3::ZERO };
        let listener = Listener::default();

        assert!(resolve_placement(&attachment, Some(&anchor), &listener, Vec3::ZERO, Vec3::ZERO, 0.25).is_none());
        assert!(resolve_placement(&attachment, None, &listener, Vec3::ZERO, Vec3::ZERO, 0.25).is_none());
    }

    #[test]
    fn test_listener_attachment_is_relative() {
        let listener = Listener::at(Vec3::new(100.0, 100.0, 0.0));
        let placement = resolve_placement(
            &Attachment::Listener { offset: Vec3::new(0.0, 4.0, 0.0) },
            None,
            &listener,
            Vec3::ZERO,
            Vec3::ZERO,
            0.25,
        )
        .unwrap();

        assert!(placement.relative);
        assert_relative_eq!(placement.distance, 4.0);
    }
}
