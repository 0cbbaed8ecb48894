//! Voice Contention Simulator
//!
//! Drives a `VoiceMixer` against the in-memory backend with a seeded,
//! synthetic workload: moving anchors firing one-shots, UI blips, looping
//! ambience and streamed music. Useful for watching stealing and fade
//! behaviour under load with `RUST_LOG=debug`.
//!
//! Usage:
//!   rf-voice-sim --voices 16 --ticks 3600
//!   rf-voice-sim --config mixer.json --stats-json
//!   rf-voice-sim --fast --requests 8

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use rf_voice::{
    AnchorId, AnchorState, AnchorTable, AudioData, AudioId, DefaultDecoder, Listener, MixerConfig,
    MixerStats, PcmFormat, SimBackend, SoundCategory, SoundDefinition, SoundId, SoundLibrary, Vec3,
    VoiceMixer,
};

const SAMPLE_RATE: u32 = 22050;
const ANCHOR_COUNT: AnchorId = 12;
const ARENA_RADIUS: f32 = 40.0;

#[derive(Parser)]
#[command(name = "rf-voice-sim", about = "Headless voice contention simulator")]
struct Args {
    /// Hardware voice capacity (overrides the config file)
    #[arg(short, long)]
    voices: Option<usize>,

    /// Ticks to simulate
    #[arg(short, long, default_value_t = 1800)]
    ticks: u32,

    /// Ticks per second
    #[arg(long, default_value_t = 60.0)]
    tick_rate: f32,

    /// Maximum new requests per tick
    #[arg(short, long, default_value_t = 3)]
    requests: u32,

    /// Mixer configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workload seed
    #[arg(long, default_value_t = 0x5EED)]
    seed: u64,

    /// Print final statistics as JSON
    #[arg(long)]
    stats_json: bool,

    /// Feed streams inline instead of on the service thread, without sleeping
    #[arg(long)]
    fast: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKLOAD
// ═══════════════════════════════════════════════════════════════════════════════

const FOOTSTEP: SoundId = 1;
const IMPACT: SoundId = 2;
const UI_BLIP: SoundId = 3;
const AMBIENCE: SoundId = 4;
const MUSIC: SoundId = 5;
const BARK: SoundId = 6;

/// Mono sine tone with a short linear attack and release
fn sine(freq: f32, secs: f32, amplitude: f32) -> Vec<i16> {
    let frames = (secs * SAMPLE_RATE as f32) as usize;
    let edge = (SAMPLE_RATE as usize / 200).max(1);

    (0..frames)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = (i.min(frames - i) as f32 / edge as f32).min(1.0);
            let sample = (TAU * freq * t).sin() * amplitude * envelope;
            (sample * i16::MAX as f32) as i16
        })
        .collect()
}

fn tone(freq: f32, secs: f32, streamed: bool) -> AudioData {
    AudioData::pcm16(&sine(freq, secs, 0.5), PcmFormat::new(SAMPLE_RATE, 1), streamed)
}

fn load_library(library: &SoundLibrary, backend: &SimBackend) -> Result<()> {
    let decoder = DefaultDecoder;
    let buffered: [(AudioId, f32, f32); 4] = [
        (1, 180.0, 0.25),
        (2, 90.0, 0.8),
        (3, 1200.0, 0.1),
        (4, 60.0, 4.0),
    ];
    for (id, freq, secs) in buffered {
        library
            .load_buffered(id, tone(freq, secs, false), backend, &decoder)
            .with_context(|| format!("Failed to load audio {}", id))?;
    }
    library.register_audio(5, tone(220.0, 12.0, true));
    library.register_audio(6, tone(440.0, 1.5, true));

    library.register_sound(
        SoundDefinition::new(FOOTSTEP, "footstep", 1)
            .with_distances(2.0, 30.0)
            .with_volume(0.6)
            .with_max_instances(6),
    );
    library.register_sound(
        SoundDefinition::new(IMPACT, "impact", 2)
            .with_distances(4.0, 60.0)
            .with_max_instances(3),
    );
    library.register_sound(
        SoundDefinition::new(UI_BLIP, "ui_blip", 3)
            .with_category(SoundCategory::Ui)
            .with_volume(0.4)
            .with_max_instances(2),
    );
    library.register_sound(
        SoundDefinition::new(AMBIENCE, "ambience", 4)
            .with_distances(8.0, 50.0)
            .with_volume(0.3),
    );
    library.register_sound(
        SoundDefinition::new(MUSIC, "music", 5)
            .with_category(SoundCategory::Music)
            .with_volume(0.5)
            .with_max_instances(1),
    );
    library.register_sound(
        SoundDefinition::new(BARK, "bark", 6)
            .with_category(SoundCategory::Speech)
            .with_distances(3.0, 40.0)
            .with_max_instances(2)
            .with_fade_out(1.2, 0.2),
    );
    Ok(())
}

/// Anchors circling the listener at different radii and speeds
fn move_anchors(anchors: &AnchorTable, time: f32) {
    for id in 0..ANCHOR_COUNT {
        let phase = id as f32 * 0.7;
        let radius = ARENA_RADIUS * (0.2 + 0.8 * ((id % 4) as f32 / 3.0));
        let speed = 0.2 + (id % 3) as f32 * 0.15;
        let angle = phase + time * speed;

        let position = Vec3::new(radius * angle.cos(), radius * angle.sin(), (id % 2) as f32 * 3.0);
        let velocity = Vec3::new(-radius * speed * angle.sin(), radius * speed * angle.cos(), 0.0);
        anchors.set_transform(id, position, angle, velocity);
    }
}

fn spawn_requests(mixer: &mut VoiceMixer, rng: &mut ChaCha8Rng, max_requests: u32, music_playing: bool) {
    for _ in 0..rng.random_range(0..=max_requests) {
        let anchor = rng.random_range(0..ANCHOR_COUNT);
        match rng.random_range(0..100) {
            0..45 => {
                mixer.play_attached(FOOTSTEP, anchor, Vec3::ZERO);
            }
            45..60 => {
                let instance = mixer.play_attached(IMPACT, anchor, Vec3::new(0.0, 0.0, 1.0));
                instance.set_pitch(rng.random_range(0.8..1.2));
            }
            60..75 => {
                mixer.play_2d(UI_BLIP).set_pan(rng.random_range(-1.0..1.0));
            }
            75..85 => {
                let position = Vec3::new(
                    rng.random_range(-ARENA_RADIUS..ARENA_RADIUS),
                    rng.random_range(-ARENA_RADIUS..ARENA_RADIUS),
                    0.0,
                );
                let instance = mixer.play_at(AMBIENCE, position);
                instance.set_looping(true);
                instance.begin_fade_in(1.0);
            }
            85..95 => {
                mixer.play_attached(BARK, anchor, Vec3::new(0.0, 0.0, 1.8));
            }
            _ if !music_playing => {
                let music = mixer.play_2d(MUSIC);
                music.set_looping(true);
                music.begin_fade_in(2.0);
            }
            _ => {}
        }
    }
}

/// Fade out a random ambience bed now and then
fn retire_ambience(mixer: &VoiceMixer, rng: &mut ChaCha8Rng) {
    if !rng.random_bool(0.02) {
        return;
    }
    let beds: Vec<_> = mixer
        .instances()
        .iter()
        .filter(|i| i.sound_id() == AMBIENCE && i.fade_target() > 0.0)
        .collect();
    if beds.is_empty() {
        return;
    }
    beds[rng.random_range(0..beds.len())].fade_out(1.5);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPORT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default, Serialize)]
struct Report {
    ticks: u32,
    requests: usize,
    peak_voiced: usize,
    peak_instances: usize,
    final_stats: MixerStats,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if !(args.tick_rate > 0.0 && args.tick_rate.is_finite()) {
        bail!("tick rate must be positive: {}", args.tick_rate);
    }

    let mut config = match &args.config {
        Some(path) => MixerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => MixerConfig::default(),
    };
    if let Some(voices) = args.voices {
        config.total_voices = voices;
    }

    let backend = Arc::new(SimBackend::new(config.total_voices));
    let library = Arc::new(SoundLibrary::new());
    let anchors = Arc::new(AnchorTable::new());
    load_library(&library, &backend)?;
    for id in 0..ANCHOR_COUNT {
        anchors.insert(id, AnchorState::at(Vec3::ZERO));
    }

    let mut mixer = VoiceMixer::new(
        config,
        backend.clone(),
        Arc::new(DefaultDecoder),
        library.clone(),
        anchors.clone(),
    )
    .context("Failed to create mixer")?;
    mixer.set_listener(Listener::at(Vec3::ZERO));

    let service = if args.fast {
        None
    } else {
        Some(mixer.spawn_streaming_service()?)
    };

    log::info!(
        "[Sim] {} ticks at {} Hz, {} voices, seed {:#x}",
        args.ticks,
        args.tick_rate,
        mixer.config().total_voices,
        args.seed
    );

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let dt = 1.0 / args.tick_rate;
    let mut report = Report {
        ticks: args.ticks,
        ..Default::default()
    };

    for tick in 0..args.ticks {
        let time = tick as f32 * dt;
        move_anchors(&anchors, time);

        let before = mixer.instances().len();
        let music_playing = mixer.instances().iter().any(|i| i.sound_id() == MUSIC);
        spawn_requests(&mut mixer, &mut rng, args.requests, music_playing);
        report.requests += mixer.instances().len() - before;
        retire_ambience(&mixer, &mut rng);

        backend.advance(dt as f64);
        mixer.update(dt);
        if args.fast {
            mixer.service_streaming();
        } else {
            thread::sleep(Duration::from_secs_f32(dt));
        }

        let stats = mixer.stats();
        report.peak_voiced = report.peak_voiced.max(stats.voiced);
        report.peak_instances = report.peak_instances.max(stats.instances);

        if tick % args.tick_rate.max(1.0) as u32 == 0 {
            log::debug!(
                "[Sim] t={:.1}s instances={} voiced={} ({} spatial / {} non-spatial) streaming={}",
                time,
                stats.instances,
                stats.voiced,
                stats.voices_in_use_spatial,
                stats.voices_in_use_non_spatial,
                stats.streaming
            );
        }
    }

    report.final_stats = mixer.stats();
    mixer.shutdown();
    drop(service);

    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Simulated {} ticks ({} requests)", report.ticks, report.requests);
        println!(
            "  peak voiced {} / {} voices, peak instances {}",
            report.peak_voiced, report.final_stats.total_voices, report.peak_instances
        );
        println!(
            "  final: {} instances, {} voiced, {} streaming, {} live buffers",
            report.final_stats.instances,
            report.final_stats.voiced,
            report.final_stats.streaming,
            backend.live_buffers()
        );
    }

    Ok(())
}
