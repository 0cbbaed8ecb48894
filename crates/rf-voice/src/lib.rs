//! FluxForge Voice Manager
//!
//! Arbitrates a small, fixed pool of backend voices among any number of
//! playback requests:
//! - Priority model from volume, distance and concurrency
//! - Voice stealing with sticky thresholds for loops
//! - Lazy per-tick parameter sync through dirty flags
//! - Click-free fades and pause ramps
//! - Streamed sources fed through a ring of buffers on a service thread
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     VOICE MANAGER ARCHITECTURE                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   Game Thread                         Streaming Thread           │
//! │   ┌─────────────────┐                ┌─────────────────┐        │
//! │   │ VoiceMixer      │                │ StreamingService│        │
//! │   │ .play_*()       │                │                 │        │
//! │   │ .update(dt)     │──enqueue──────▶│ feed every N ms │        │
//! │   └────────┬────────┘   stream       └────────┬────────┘        │
//! │            │                                  │                 │
//! │            ▼                                  ▼                 │
//! │   ┌─────────────────────────────────────────────────────────┐   │
//! │   │ PlaybackInstance                                         │   │
//! │   │  params (fade, pause, dirty)  │  slot (voice, cursor)    │   │
//! │   └───────────────┬───────────────┴──────────┬──────────────┘   │
//! │                   │ acquire / steal          │ queue buffers    │
//! │                   ▼                          ▼                  │
//! │   ┌─────────────────────┐          ┌─────────────────────┐      │
//! │   │ VoicePool           │          │ VoiceBackend        │      │
//! │   │ 3/4 spatial split   │─────────▶│ voices + buffers    │      │
//! │   └─────────────────────┘          └─────────────────────┘      │
//! │                                                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rf_voice::{MixerConfig, VoiceMixer, SoundDefinition, SoundLibrary};
//!
//! let mut mixer = VoiceMixer::new(MixerConfig::default(), backend, decoder, library, anchors)?;
//! let _service = mixer.spawn_streaming_service()?;
//!
//! let footstep = mixer.play_attached(FOOTSTEP, player_anchor, Vec3::ZERO);
//! footstep.fade_in(0.1);
//!
//! // Every frame
//! mixer.update(dt);
//! ```

pub mod backend;
pub mod config;
pub mod decoder;
pub mod dirty;
pub mod error;
pub mod fade;
pub mod instance;
pub mod mixer;
pub mod pool;
pub mod priority;
pub mod resource;
pub mod scene;
pub mod sim;
pub mod streaming;
pub mod types;
pub mod volume;

// Re-exports
pub use backend::VoiceBackend;
pub use config::MixerConfig;
#[cfg(feature = "symphonia")]
pub use decoder::SymphoniaDecoder;
pub use decoder::{DecodeStream, DecodedChunk, DefaultDecoder, PcmChunk, PcmDecoder, StreamDecoder};
pub use dirty::DirtyFlags;
pub use error::{DisposeReason, VoiceError, VoiceResult};
pub use fade::{Fade, PauseFade, SilenceGrace};
pub use instance::{InstanceState, PlaybackInstance};
pub use mixer::{MixerCore, MixerStats, VoiceMixer};
pub use pool::{PoolAccounting, StealCandidate, StealMode, VoicePool, select_victim};
pub use resource::{AudioData, AudioEncoding, PcmFormat, SoundDefinition, SoundLibrary, SoundResources};
pub use scene::{AnchorState, AnchorTable, Attachment, Listener, SceneAnchors};
pub use sim::{BackendCall, SimBackend};
pub use streaming::{StopRequest, StreamCursor, StreamingService};
pub use types::{
    AnchorId, AudioId, BufferHandle, InstanceId, SoundCategory, SoundId, Vec3, VoiceHandle,
    VoiceKind, VoiceStatus,
};
pub use volume::VolumeSettings;
