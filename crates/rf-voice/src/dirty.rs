//! Dirty flags for lazy voice parameter sync
//!
//! Mutators set bits; the per-tick reconciliation writes each flagged
//! category to the voice and clears the bit only after that write.

/// Set of voice parameter categories awaiting a push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyFlags(u16);

impl DirtyFlags {
    pub const NONE: DirtyFlags = DirtyFlags(0);
    pub const POSITION: DirtyFlags = DirtyFlags(1 << 0);
    pub const VELOCITY: DirtyFlags = DirtyFlags(1 << 1);
    pub const RELATIVE: DirtyFlags = DirtyFlags(1 << 2);
    pub const MAX_DISTANCE: DirtyFlags = DirtyFlags(1 << 3);
    pub const REF_DISTANCE: DirtyFlags = DirtyFlags(1 << 4);
    pub const LOOP: DirtyFlags = DirtyFlags(1 << 5);
    pub const VOLUME: DirtyFlags = DirtyFlags(1 << 6);
    pub const PITCH: DirtyFlags = DirtyFlags(1 << 7);
    pub const PAUSE: DirtyFlags = DirtyFlags(1 << 8);
    pub const ALL: DirtyFlags = DirtyFlags((1 << 9) - 1);

    #[inline]
    pub fn insert(&mut self, flags: DirtyFlags) {
        self.0 |= flags.0;
    }

    #[inline]
    pub fn remove(&mut self, flags: DirtyFlags) {
        self.0 &= !flags.0;
    }

    /// True if every bit of `flags` is set
    #[inline]
    pub fn contains(&self, flags: DirtyFlags) -> bool {
        self.0 & flags.0 == flags.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn bits(&self) -> u16 {
        self.0
    }
}

impl std::ops::BitOr for DirtyFlags {
    type Output = DirtyFlags;

    fn bitor(self, rhs: DirtyFlags) -> DirtyFlags {
        DirtyFlags(self.0 | rhs.0)
    }
}
