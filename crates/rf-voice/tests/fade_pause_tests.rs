//! Fade and Pause Integration Tests
//!
//! Gain ramps observed through the backend call log:
//! - The hardware pause lands only after the ramp reaches silence
//! - Resume happens before the ramp climbs back
//! - Fade-out grace timing and reversal

use std::collections::HashMap;
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use rf_voice::{
    AnchorTable, AudioData, BackendCall, DisposeReason, InstanceState, MixerConfig, PcmDecoder,
    PcmFormat, PlaybackInstance, SimBackend, SoundDefinition, SoundLibrary, VoiceBackend, VoiceMixer,
    VoiceStatus,
};

const DT: f32 = 1.0 / 64.0;

struct Rig {
    backend: Arc<SimBackend>,
    mixer: VoiceMixer,
}

fn rig() -> Rig {
    let backend = Arc::new(SimBackend::new(32));
    let library = Arc::new(SoundLibrary::new());
    let tone = AudioData::pcm16(&[800i16; 8000], PcmFormat::new(8000, 1), false);
    library.load_buffered(1, tone, backend.as_ref(), &PcmDecoder).unwrap();
    library.register_sound(SoundDefinition::new(1, "tone", 1));

    let mixer = VoiceMixer::new(
        MixerConfig::default(),
        backend.clone(),
        Arc::new(PcmDecoder),
        library,
        Arc::new(AnchorTable::new()),
    )
    .unwrap();
    Rig { backend, mixer }
}

fn tick(rig: &mut Rig) {
    rig.backend.advance(DT as f64);
    rig.mixer.update(DT);
}

fn looping_tone(rig: &mut Rig) -> Arc<PlaybackInstance> {
    let instance = rig.mixer.play_2d(1);
    instance.set_looping(true);
    tick(rig);
    instance
}

/// Every Pause follows a zero gain, every Play follows an audible one
fn assert_click_free(calls: &[BackendCall]) {
    let mut gains: HashMap<_, f32> = HashMap::new();
    for call in calls {
        match *call {
            BackendCall::SetGain(voice, gain) => {
                gains.insert(voice, gain);
            }
            BackendCall::Pause(voice) => {
                assert_eq!(gains.get(&voice).copied(), Some(0.0), "paused while audible");
            }
            BackendCall::Play(voice) => {
                let gain = gains.get(&voice).copied().unwrap_or(0.0);
                assert!(gain > 0.0, "resumed at silence");
            }
            _ => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PAUSE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_pause_waits_for_silence() {
    let mut rig = rig();
    let instance = looping_tone(&mut rig);
    let voice = instance.voice().unwrap();

    instance.set_paused(true);
    // 0.2 s ramp at 64 ticks per second
    for _ in 0..12 {
        tick(&mut rig);
        assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Playing);
        assert!(instance.pause_fade_value() > 0.0);
    }
    tick(&mut rig);

    assert_eq!(instance.pause_fade_value(), 0.0);
    assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Paused);
    assert_eq!(rig.backend.voice_gain(voice), Some(0.0));
    assert_eq!(instance.state(), InstanceState::VoicedPaused);
    assert_click_free(&rig.backend.calls());
}

#[test]
fn test_resume_before_ramp_up() {
    let mut rig = rig();
    let instance = looping_tone(&mut rig);
    let voice = instance.voice().unwrap();

    instance.set_paused(true);
    for _ in 0..20 {
        tick(&mut rig);
    }
    let play_time = instance.play_time();

    // Paused instances do not age
    tick(&mut rig);
    assert_eq!(instance.play_time(), play_time);

    instance.set_paused(false);
    tick(&mut rig);
    assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Playing);
    assert!(instance.pause_fade_value() > 0.0 && instance.pause_fade_value() < 1.0);

    for _ in 0..13 {
        tick(&mut rig);
    }
    assert_eq!(instance.pause_fade_value(), 1.0);
    assert_click_free(&rig.backend.calls());
}

#[test]
fn test_paused_before_first_tick_defers_start() {
    let mut rig = rig();
    let instance = rig.mixer.play_2d(1);
    instance.set_paused(true);
    tick(&mut rig);

    assert!(instance.voice().is_some());
    assert_eq!(instance.state(), InstanceState::VoicedInitial);
    assert!(!rig.backend.calls().iter().any(|c| matches!(c, BackendCall::Play(_))));

    instance.set_paused(false);
    tick(&mut rig);
    assert_eq!(instance.state(), InstanceState::VoicedPlaying);
}

#[test]
fn test_pause_toggling_stays_click_free() {
    let mut rng = ChaCha8Rng::seed_from_u64(0xFADE);
    let mut rig = rig();
    let instances: Vec<_> = (0..4).map(|_| looping_tone(&mut rig)).collect();

    for _ in 0..2000 {
        for instance in &instances {
            if rng.random_bool(0.05) {
                instance.set_paused(!instance.is_paused());
            }
        }
        tick(&mut rig);
    }

    assert!(instances.iter().all(|i| !i.is_disposed()));
    assert_click_free(&rig.backend.calls());
}

// ═══════════════════════════════════════════════════════════════════════════════
// FADE-OUT GRACE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_fade_out_disposes_after_grace() {
    let mut rig = rig();
    let instance = looping_tone(&mut rig);

    // Floored to 50 ms: silent on the 4th tick, then 50 ms of grace
    instance.fade_out(0.0);
    for _ in 0..6 {
        tick(&mut rig);
        assert!(!instance.is_disposed());
    }
    assert_eq!(instance.fade_value(), 0.0);

    tick(&mut rig);
    assert_eq!(instance.dispose_reason(), Some(DisposeReason::FadedOut));
    assert_eq!(rig.backend.active_voices(), 0);
}

#[test]
fn test_fade_reversal_resets_grace() {
    let mut rig = rig();
    let instance = looping_tone(&mut rig);

    instance.fade_out(0.0);
    for _ in 0..5 {
        tick(&mut rig);
    }
    instance.fade_in(0.0);
    tick(&mut rig);
    assert!(instance.fade_value() > 0.0);

    // The grace timer starts over from the next silent tick
    instance.fade_out(0.0);
    for _ in 0..3 {
        tick(&mut rig);
        assert!(!instance.is_disposed());
    }
    tick(&mut rig);
    assert_eq!(instance.dispose_reason(), Some(DisposeReason::FadedOut));
}

#[test]
fn test_fade_to_partial_level_holds() {
    let mut rig = rig();
    let instance = looping_tone(&mut rig);
    let voice = instance.voice().unwrap();

    instance.fade_to(0.5, 0.25);
    for _ in 0..32 {
        tick(&mut rig);
    }

    assert!(!instance.is_disposed());
    assert_eq!(instance.fade_value(), 0.5);
    let gain = rig.backend.voice_gain(voice).unwrap();
    assert!((gain - 0.5).abs() < 1e-6);
}
