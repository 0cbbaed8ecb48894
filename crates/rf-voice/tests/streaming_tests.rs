//! Streaming Integration Tests
//!
//! Streamed instances driven by the tick plus explicit feeder passes:
//! - End of stream drains queued buffers before disposal
//! - Seamless loops with hardware looping suppressed
//! - Underrun recovery
//! - Immediate stop and voice stealing release the buffer ring
//! - The background service thread

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rf_voice::{
    AnchorTable, AudioData, BackendCall, DisposeReason, InstanceState, MixerConfig, PcmDecoder,
    PcmFormat, SimBackend, SoundDefinition, SoundLibrary, StopRequest, VoiceBackend, VoiceMixer,
    VoiceStatus,
};

const RATE: u32 = 1000;
const DT: f32 = 0.05;

struct Rig {
    backend: Arc<SimBackend>,
    library: Arc<SoundLibrary>,
    mixer: VoiceMixer,
}

fn rig(total_voices: usize) -> Rig {
    let config = MixerConfig {
        total_voices,
        stream_chunk_frames: 256,
        stream_service_interval_ms: 1,
        ..Default::default()
    };
    let backend = Arc::new(SimBackend::new(64));
    let library = Arc::new(SoundLibrary::new());
    let mixer = VoiceMixer::new(
        config,
        backend.clone(),
        Arc::new(PcmDecoder),
        library.clone(),
        Arc::new(AnchorTable::new()),
    )
    .unwrap();
    Rig {
        backend,
        library,
        mixer,
    }
}

/// Streamed mono ramp of `frames` frames as sound 1
fn register_stream(rig: &Rig, frames: usize) {
    let samples: Vec<i16> = (0..frames).map(|i| (i % 1000) as i16 + 1).collect();
    rig.library
        .register_audio(1, AudioData::pcm16(&samples, PcmFormat::new(RATE, 1), true));
    rig.library
        .register_sound(SoundDefinition::new(1, "stream", 1).with_volume(0.1));
}

/// Advance audio, tick, then feed
fn step(rig: &mut Rig) {
    rig.backend.advance(DT as f64);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
}

#[test]
fn test_first_tick_hands_off_to_feeder() {
    let mut rig = rig(8);
    register_stream(&rig, 1000);
    let instance = rig.mixer.play_2d(1);

    rig.mixer.update(DT);
    assert_eq!(instance.state(), InstanceState::VoicedInitial);
    assert!(instance.is_streaming());
    assert_eq!(rig.mixer.stats().streaming, 1);

    rig.mixer.service_streaming();
    let voice = instance.voice().unwrap();
    assert_eq!(instance.state(), InstanceState::VoicedPlaying);
    assert_eq!(rig.backend.queued_buffers(voice), 3);
}

#[test]
fn test_end_of_stream_drains_then_disposes() {
    let mut rig = rig(8);
    register_stream(&rig, 1000);
    let instance = rig.mixer.play_2d(1);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
    let voice = instance.voice().unwrap();

    let mut saw_request_while_playing = false;
    for _ in 0..60 {
        step(&mut rig);
        if instance.is_disposed() {
            break;
        }
        if instance.stop_request() == StopRequest::EndOfStream {
            saw_request_while_playing |= rig.backend.voice_status(voice) == VoiceStatus::Playing;
        }
    }

    assert!(saw_request_while_playing);
    assert_eq!(instance.dispose_reason(), Some(DisposeReason::Finished));
    // 1000 frames at 1 kHz
    assert!(instance.play_time() > 0.95);

    let uploaded: usize = rig
        .backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            BackendCall::UploadBuffer(_, frames) => Some(*frames),
            _ => None,
        })
        .sum();
    assert_eq!(uploaded, 1000);
    assert_eq!(rig.backend.live_buffers(), 0);
    assert_eq!(rig.backend.active_voices(), 0);
}

#[test]
fn test_looping_stream_runs_without_gaps() {
    let mut rig = rig(8);
    register_stream(&rig, 300);
    let instance = rig.mixer.play_2d(1);
    instance.set_looping(true);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
    let voice = instance.voice().unwrap();

    for _ in 0..100 {
        step(&mut rig);
        assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Playing);
    }

    assert!(!instance.is_disposed());
    assert_eq!(instance.stop_request(), StopRequest::None);
    // Loop emulated by the feeder, never by the voice
    assert_eq!(rig.backend.voice_looping(voice), Some(false));

    let empty_uploads = rig
        .backend
        .calls()
        .iter()
        .filter(|c| matches!(c, BackendCall::UploadBuffer(_, 0)))
        .count();
    assert_eq!(empty_uploads, 0);
}

#[test]
fn test_underrun_restarts_instead_of_disposing() {
    let mut rig = rig(8);
    register_stream(&rig, 5000);
    let instance = rig.mixer.play_2d(1);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
    let voice = instance.voice().unwrap();

    // Starve the voice: 768 frames queued, 1 s consumed
    rig.backend.advance(1.0);
    rig.mixer.update(DT);
    assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Stopped);
    assert!(!instance.is_disposed());

    rig.mixer.service_streaming();
    assert_eq!(rig.backend.voice_status(voice), VoiceStatus::Playing);
    rig.mixer.update(DT);
    assert_eq!(instance.state(), InstanceState::VoicedPlaying);
}

#[test]
fn test_stop_releases_ring() {
    let mut rig = rig(8);
    register_stream(&rig, 5000);
    let instance = rig.mixer.play_2d(1);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
    assert_eq!(rig.backend.live_buffers(), 3);

    instance.stop();
    assert_eq!(instance.stop_request(), StopRequest::Immediate);
    rig.mixer.service_streaming();
    rig.mixer.update(DT);

    assert_eq!(instance.dispose_reason(), Some(DisposeReason::Stopped));
    assert_eq!(rig.backend.live_buffers(), 0);
    assert_eq!(rig.mixer.stats().streaming, 0);
}

#[test]
fn test_stop_at_end_drains_queue() {
    let mut rig = rig(8);
    register_stream(&rig, 5000);
    let instance = rig.mixer.play_2d(1);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();

    instance.stop_at_end();
    assert_eq!(instance.stop_request(), StopRequest::EndOfStream);

    // 768 queued frames drain in under a second without refills
    for _ in 0..20 {
        step(&mut rig);
    }
    assert_eq!(instance.dispose_reason(), Some(DisposeReason::Finished));
}

#[test]
fn test_stolen_stream_gives_up_buffers() {
    let mut rig = rig(4);
    register_stream(&rig, 5000);
    let tone = AudioData::pcm16(&[500i16; 2000], PcmFormat::new(RATE, 1), false);
    rig.library
        .load_buffered(2, tone, rig.backend.as_ref(), &PcmDecoder)
        .unwrap();
    rig.library.register_sound(SoundDefinition::new(2, "alert", 2));

    let stream = rig.mixer.play_2d(1);
    rig.mixer.update(DT);
    rig.mixer.service_streaming();
    let voice = stream.voice().unwrap();
    assert_eq!(rig.backend.live_buffers(), 4);

    // 500 beats the quiet stream's 50 + 15
    let alert = rig.mixer.play_2d(2);
    step(&mut rig);

    assert_eq!(alert.voice(), Some(voice));
    assert_eq!(stream.voice(), None);
    assert_eq!(rig.backend.live_buffers(), 1);
    assert_eq!(rig.backend.queued_buffers(voice), 1);

    step(&mut rig);
    assert_eq!(stream.dispose_reason(), Some(DisposeReason::VoiceUnavailable));
}

#[test]
fn test_service_thread_keeps_stream_fed() {
    let mut rig = rig(8);
    register_stream(&rig, 300);
    let service = rig.mixer.spawn_streaming_service().unwrap();

    let instance = rig.mixer.play_2d(1);
    instance.set_looping(true);

    for _ in 0..40 {
        rig.backend.advance(0.01);
        rig.mixer.update(0.01);
        thread::sleep(Duration::from_millis(2));
    }
    assert!(!instance.is_disposed());
    assert!(instance.voice().is_some());

    rig.mixer.shutdown();
    drop(service);

    assert_eq!(rig.backend.live_buffers(), 0);
    assert_eq!(rig.backend.active_voices(), 0);
}
