//! Fade/Pause Controller
//!
//! Two independent ramps feed the voice gain:
//! - [`Fade`]: the primary multiplier, moved toward its target at
//!   `1 / max(min_fade, duration)` per second
//! - [`PauseFade`]: a short 0..1 ramp that runs ahead of the hardware
//!   pause and behind the hardware resume
//!
//! Both step on simulation time (frame delta × time speed).

/// Primary fade multiplier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    current: f32,
    target: f32,
    duration: f32,
}

impl Default for Fade {
    fn default() -> Self {
        Self {
            current: 1.0,
            target: 1.0,
            duration: 0.0,
        }
    }
}

impl Fade {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn current(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn is_fading(&self) -> bool {
        self.current != self.target
    }

    /// Heading for silence
    #[inline]
    pub fn is_fading_to_zero(&self) -> bool {
        self.target <= 0.0
    }

    pub fn fade_to(&mut self, target: f32, duration: f32) {
        self.target = target.clamp(0.0, 1.0);
        self.duration = duration.max(0.0);
    }

    pub fn fade_in(&mut self, duration: f32) {
        self.fade_to(1.0, duration);
    }

    pub fn fade_out(&mut self, duration: f32) {
        self.fade_to(0.0, duration);
    }

    /// Restart from silence toward full volume
    pub fn begin_fade_in(&mut self, duration: f32) {
        self.current = 0.0;
        self.fade_to(1.0, duration);
    }

    /// Freeze at the current value
    pub fn stop_fade(&mut self) {
        self.target = self.current;
    }

    /// Advance by `dt` seconds. Returns true if the value changed.
    pub fn step(&mut self, dt: f32, min_duration: f32) -> bool {
        if self.current == self.target {
            return false;
        }

        let rate = 1.0 / self.duration.max(min_duration);
        let delta = rate * dt;
        let remaining = self.target - self.current;

        if remaining.abs() <= delta {
            self.current = self.target;
        } else {
            self.current += delta.copysign(remaining);
        }
        true
    }
}

/// Pause ramp
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PauseFade {
    value: f32,
}

impl Default for PauseFade {
    fn default() -> Self {
        Self { value: 1.0 }
    }
}

impl PauseFade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from silence (instances created paused)
    pub fn silent() -> Self {
        Self { value: 0.0 }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Reached exactly zero: the voice may be paused
    #[inline]
    pub fn is_silent(&self) -> bool {
        self.value == 0.0
    }

    /// Above zero: the voice may be resumed
    #[inline]
    pub fn is_audible(&self) -> bool {
        self.value > 0.0
    }

    /// Ramp toward 0 when `paused`, toward 1 otherwise, over `duration`
    /// seconds. Returns true if the value changed.
    pub fn step(&mut self, paused: bool, dt: f32, duration: f32) -> bool {
        let target = if paused { 0.0 } else { 1.0 };
        if self.value == target {
            return false;
        }
        if duration <= 0.0 {
            self.value = target;
            return true;
        }

        let delta = dt / duration;
        if (target - self.value).abs() <= delta {
            self.value = target;
        } else if paused {
            self.value -= delta;
        } else {
            self.value += delta;
        }
        true
    }
}

/// Silence timer run after a fade-out reaches zero
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SilenceGrace {
    elapsed: f32,
}

impl SilenceGrace {
    /// Accumulate `dt`; true once at least `threshold` seconds accrued
    #[inline]
    pub fn accumulate(&mut self, dt: f32, threshold: f32) -> bool {
        self.elapsed += dt;
        self.elapsed >= threshold
    }

    #[inline]
    pub fn reset(&mut self) {
        self.elapsed = 0.0;
    }

    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
