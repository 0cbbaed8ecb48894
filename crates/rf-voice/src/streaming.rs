//! Streaming Feeder
//!
//! Streamed sources are decoded incrementally into a small ring of backend
//! buffers that is kept ahead of playback:
//!
//! ```text
//!   NotStarted ──prime ring──► Playing ──refill processed──► Playing
//!                                  │                            │
//!                        ran dry   │                 end of     │
//!                      (no stop    ▼                 stream     ▼
//!                       request)  Stopped ──restart──►   stop request
//!                                                        (drain, stop)
//! ```
//!
//! Looping is emulated here rather than by the backend: when the decoder
//! runs out the stream is reopened and decoding continues into the same
//! buffer, so the loop point has no gap.
//!
//! The tick only hands a fresh voice over. Feeding itself runs on the
//! [`StreamingService`] thread or through an explicit
//! `VoiceMixer::service_streaming` call, always under the instance's slot
//! lock.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::VoiceBackend;
use crate::decoder::{DecodeStream, PcmChunk, StreamDecoder};
use crate::error::{VoiceError, VoiceResult};
use crate::mixer::MixerCore;
use crate::resource::AudioData;
use crate::types::{BufferHandle, InstanceId, VoiceHandle, VoiceStatus};

// ═══════════════════════════════════════════════════════════════════════════════
// STOP REQUEST
// ═══════════════════════════════════════════════════════════════════════════════

/// Pending stop for a streaming instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopRequest {
    #[default]
    None,
    /// Stop feeding; let queued buffers drain
    EndOfStream,
    /// Stop now regardless of queued data
    Immediate,
}

impl StopRequest {
    #[inline]
    pub fn is_pending(&self) -> bool {
        *self != StopRequest::None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VOICE SLOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-instance state shared by the tick and the streaming service.
///
/// Everything that touches the voice handle, the decoder or the buffer
/// ring lives here, behind one lock.
#[derive(Default)]
pub(crate) struct VoiceSlot {
    pub voice: Option<VoiceHandle>,
    pub cursor: Option<StreamCursor>,
    pub stop_request: StopRequest,
    /// The tick saw a fresh voice and handed it to the feeder
    pub start_requested: bool,
    /// Audio to stream once the start request is served
    pub audio: Option<Arc<AudioData>>,
}

/// Inputs for one feeder pass
pub(crate) struct FeedContext<'a> {
    pub instance: InstanceId,
    pub backend: &'a dyn VoiceBackend,
    pub decoder: &'a dyn StreamDecoder,
    pub looping: bool,
    pub buffer_count: usize,
    pub chunk_frames: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAM CURSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Open decode stream plus the buffer ring it feeds
pub struct StreamCursor {
    decoder: Option<Box<dyn DecodeStream>>,
    buffers: Vec<BufferHandle>,
    audio: Arc<AudioData>,
}

/// Result of filling one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Fill {
    /// Buffer was uploaded and queued
    pub submitted: bool,
    /// Decoder has nothing more to give
    pub exhausted: bool,
}

impl StreamCursor {
    pub(crate) fn new(
        audio: Arc<AudioData>,
        decoder: Option<Box<dyn DecodeStream>>,
        buffers: Vec<BufferHandle>,
    ) -> Self {
        Self {
            decoder,
            buffers,
            audio,
        }
    }

    #[inline]
    pub fn buffers(&self) -> &[BufferHandle] {
        &self.buffers
    }

    #[inline]
    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn close_decoder(&mut self) {
        self.decoder = None;
    }

    /// Delete the ring. The voice must already be stopped and reset.
    pub fn release(self, backend: &dyn VoiceBackend) {
        for buffer in self.buffers {
            backend.delete_buffer(buffer);
        }
    }

    /// Decode up to `chunk_frames` into `pcm`. Returns true once the
    /// source is exhausted (never true while looping non-empty data).
    pub(crate) fn decode_into(
        &mut self,
        pcm: &mut PcmChunk,
        looping: bool,
        chunk_frames: usize,
        decoder: &dyn StreamDecoder,
    ) -> VoiceResult<bool> {
        let mut empty_restarts = 0;

        while pcm.frames() < chunk_frames {
            let Some(stream) = self.decoder.as_mut() else {
                return Ok(true);
            };

            let chunk = stream.decode_chunk(chunk_frames - pcm.frames())?;
            let produced = !chunk.pcm.is_empty();
            pcm.append(chunk.pcm);

            if produced {
                empty_restarts = 0;
            }
            if produced && !chunk.end_of_stream {
                continue;
            }

            if !looping {
                self.decoder = None;
                return Ok(true);
            }

            // A freshly reopened stream that yields nothing: the data is empty
            if !produced {
                empty_restarts += 1;
                if empty_restarts > 1 {
                    self.decoder = None;
                    return Ok(true);
                }
            }
            self.decoder = Some(decoder.open_stream(&self.audio)?);
        }

        Ok(false)
    }

    /// Decode the next chunk into `buffer` and queue it on `voice`.
    /// Zero-length chunks are never submitted.
    pub(crate) fn fill(&mut self, voice: VoiceHandle, buffer: BufferHandle, ctx: &FeedContext<'_>) -> Fill {
        let mut pcm = PcmChunk::empty(self.audio.format);

        let exhausted = match self.decode_into(&mut pcm, ctx.looping, ctx.chunk_frames, ctx.decoder) {
            Ok(exhausted) => exhausted,
            Err(e) => {
                log::warn!("[Streaming] Instance {} decode failed: {}", ctx.instance, e);
                self.decoder = None;
                true
            }
        };

        if pcm.is_empty() {
            return Fill {
                submitted: false,
                exhausted,
            };
        }

        if let Err(e) = ctx.backend.upload_buffer(buffer, &pcm) {
            log::warn!("[Streaming] Instance {} buffer upload failed: {}", ctx.instance, e);
            self.decoder = None;
            return Fill {
                submitted: false,
                exhausted: true,
            };
        }

        ctx.backend.queue_buffer(voice, buffer);
        Fill {
            submitted: true,
            exhausted,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEEDER
// ═══════════════════════════════════════════════════════════════════════════════

/// One feeder pass over a slot. Returns false once the stream is done
/// (nothing left to feed and the voice has stopped).
pub(crate) fn feed(slot: &mut VoiceSlot, ctx: &FeedContext<'_>) -> bool {
    let Some(voice) = slot.voice else {
        // Waiting for (re)acquisition
        return true;
    };

    match ctx.backend.voice_status(voice) {
        VoiceStatus::NotStarted => {
            if slot.start_requested && !slot.stop_request.is_pending() {
                slot.start_requested = false;
                start(slot, voice, ctx);
            }
            true
        }
        VoiceStatus::Playing | VoiceStatus::Paused => {
            refill(slot, voice, ctx);
            true
        }
        VoiceStatus::Stopped => {
            if slot.stop_request.is_pending() || slot.cursor.is_none() {
                return false;
            }
            // Stopped with no request: the feeder fell behind
            log::debug!("[Streaming] Instance {} underrun, restarting", ctx.instance);
            let submitted = refill(slot, voice, ctx);
            if submitted > 0 {
                ctx.backend.play(voice);
            }
            true
        }
    }
}

/// Allocate the ring, open the decoder, prime and start playback
fn start(slot: &mut VoiceSlot, voice: VoiceHandle, ctx: &FeedContext<'_>) {
    let Some(audio) = slot.audio.clone() else {
        slot.stop_request = StopRequest::EndOfStream;
        ctx.backend.play(voice);
        return;
    };

    let mut buffers = Vec::with_capacity(ctx.buffer_count);
    for _ in 0..ctx.buffer_count {
        match ctx.backend.create_buffer() {
            Some(buffer) => buffers.push(buffer),
            None => {
                log::warn!(
                    "[Streaming] Instance {} got {}/{} buffers",
                    ctx.instance,
                    buffers.len(),
                    ctx.buffer_count
                );
                break;
            }
        }
    }

    let decoder = match ctx.decoder.open_stream(&audio) {
        Ok(stream) => Some(stream),
        Err(e) => {
            log::warn!("[Streaming] Instance {} failed to open stream: {}", ctx.instance, e);
            None
        }
    };

    let mut cursor = StreamCursor::new(audio, decoder, buffers);
    let mut queued = 0;
    let ring: Vec<BufferHandle> = cursor.buffers().to_vec();
    for buffer in ring {
        let fill = cursor.fill(voice, buffer, ctx);
        if fill.submitted {
            queued += 1;
        }
        if fill.exhausted {
            slot.stop_request = StopRequest::EndOfStream;
            log::debug!("[Streaming] Instance {} reached end of stream while priming", ctx.instance);
            break;
        }
    }
    if queued == 0 {
        slot.stop_request = StopRequest::EndOfStream;
    }

    slot.cursor = Some(cursor);
    ctx.backend.play(voice);
    log::debug!("[Streaming] Instance {} started with {} buffers queued", ctx.instance, queued);
}

/// Refill every processed buffer. Returns the number resubmitted.
fn refill(slot: &mut VoiceSlot, voice: VoiceHandle, ctx: &FeedContext<'_>) -> usize {
    if slot.stop_request.is_pending() {
        return 0;
    }
    let Some(cursor) = slot.cursor.as_mut() else {
        return 0;
    };

    let mut submitted = 0;
    let processed = ctx.backend.processed_buffers(voice);
    for _ in 0..processed {
        let Some(buffer) = ctx.backend.unqueue_buffer(voice) else {
            break;
        };
        let fill = cursor.fill(voice, buffer, ctx);
        if fill.submitted {
            submitted += 1;
        }
        if fill.exhausted {
            slot.stop_request = StopRequest::EndOfStream;
            log::debug!("[Streaming] Instance {} reached end of stream", ctx.instance);
            break;
        }
    }
    submitted
}

// ═══════════════════════════════════════════════════════════════════════════════
// STREAMING SERVICE
// ═══════════════════════════════════════════════════════════════════════════════

/// Background thread that feeds every active stream on a fixed period,
/// independent of the tick rate.
pub struct StreamingService {
    shutdown: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl StreamingService {
    pub(crate) fn spawn(core: Arc<MixerCore>, interval: Duration) -> VoiceResult<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let worker = thread::Builder::new()
            .name("rf-voice-streaming".into())
            .spawn(move || Self::service_loop(core, shutdown_rx, interval))
            .map_err(|e| VoiceError::Spawn(e.to_string()))?;

        log::info!("[Streaming] Service started ({}ms period)", interval.as_millis());
        Ok(Self {
            shutdown: Some(shutdown_tx),
            worker: Some(worker),
        })
    }

    fn service_loop(core: Arc<MixerCore>, shutdown: Receiver<()>, interval: Duration) {
        loop {
            match shutdown.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    core.service_streaming();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Stop and join the thread
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[Streaming] Service thread panicked");
            }
            log::info!("[Streaming] Service stopped");
        }
    }
}

impl Drop for StreamingService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
