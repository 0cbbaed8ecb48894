//! Decoder Collaborator
//!
//! Turns an [`AudioData`] payload into PCM chunks on demand. A stream is
//! opened per playback (and reopened on loop), decoded a chunk at a time,
//! and closed by dropping it.
//!
//! Two decoders ship with the crate:
//! - [`PcmDecoder`]: raw interleaved little-endian 16-bit PCM
//! - `SymphoniaDecoder` (feature `symphonia`): any container symphonia probes

use std::sync::Arc;

use crate::error::{VoiceError, VoiceResult};
use crate::resource::{AudioData, AudioEncoding, PcmFormat};

// ═══════════════════════════════════════════════════════════════════════════════
// PCM CHUNK
// ═══════════════════════════════════════════════════════════════════════════════

/// Interleaved 16-bit PCM block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PcmChunk {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl PcmChunk {
    pub fn empty(format: PcmFormat) -> Self {
        Self {
            samples: Vec::new(),
            channels: format.channels,
            sample_rate: format.sample_rate,
        }
    }

    /// Number of frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration at the chunk's own sample rate
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Append another chunk, adopting its format when this one is empty
    pub fn append(&mut self, other: PcmChunk) {
        if self.samples.is_empty() {
            self.channels = other.channels;
            self.sample_rate = other.sample_rate;
        }
        self.samples.extend(other.samples);
    }
}

/// One decode step
#[derive(Debug, Clone, Default)]
pub struct DecodedChunk {
    pub pcm: PcmChunk,
    /// The stream has no data beyond this chunk
    pub end_of_stream: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// An open decode stream; dropping it closes the stream
pub trait DecodeStream: Send {
    /// Decode up to `max_frames` frames
    fn decode_chunk(&mut self, max_frames: usize) -> VoiceResult<DecodedChunk>;

    /// Whether the stream can still produce data
    fn is_valid(&self) -> bool;
}

/// Opens decode streams over audio data
pub trait StreamDecoder: Send + Sync {
    fn open_stream(&self, data: &AudioData) -> VoiceResult<Box<dyn DecodeStream>>;
}

/// Decode a whole payload into one chunk
pub fn decode_all(decoder: &dyn StreamDecoder, data: &AudioData) -> VoiceResult<PcmChunk> {
    const BLOCK_FRAMES: usize = 16384;

    let mut stream = decoder.open_stream(data)?;
    let mut out = PcmChunk::empty(data.format);
    loop {
        let decoded = stream.decode_chunk(BLOCK_FRAMES)?;
        let produced = !decoded.pcm.is_empty();
        out.append(decoded.pcm);
        if decoded.end_of_stream || !produced {
            break;
        }
    }
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW PCM
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoder for raw interleaved little-endian i16 payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct PcmDecoder;

struct PcmStream {
    payload: Arc<[u8]>,
    format: PcmFormat,
    position: usize,
}

impl PcmStream {
    #[inline]
    fn frame_bytes(&self) -> usize {
        self.format.channels as usize * 2
    }

    #[inline]
    fn remaining_frames(&self) -> usize {
        (self.payload.len() - self.position) / self.frame_bytes()
    }
}

impl DecodeStream for PcmStream {
    fn decode_chunk(&mut self, max_frames: usize) -> VoiceResult<DecodedChunk> {
        let frames = self.remaining_frames().min(max_frames);
        let end = self.position + frames * self.frame_bytes();

        let samples = self.payload[self.position..end]
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        self.position = end;

        Ok(DecodedChunk {
            pcm: PcmChunk {
                samples,
                channels: self.format.channels,
                sample_rate: self.format.sample_rate,
            },
            end_of_stream: self.remaining_frames() == 0,
        })
    }

    fn is_valid(&self) -> bool {
        self.remaining_frames() > 0
    }
}

impl PcmDecoder {
    fn open(&self, data: &AudioData) -> VoiceResult<Box<dyn DecodeStream>> {
        if data.format.channels == 0 {
            return Err(VoiceError::Decoder("PCM data with zero channels".into()));
        }
        Ok(Box::new(PcmStream {
            payload: Arc::clone(&data.payload),
            format: data.format,
            position: 0,
        }))
    }
}

impl StreamDecoder for PcmDecoder {
    fn open_stream(&self, data: &AudioData) -> VoiceResult<Box<dyn DecodeStream>> {
        match data.encoding {
            AudioEncoding::Pcm16 => self.open(data),
            AudioEncoding::Compressed => Err(VoiceError::UnsupportedEncoding(
                "PcmDecoder only reads raw PCM".into(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYMPHONIA
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(feature = "symphonia")]
mod compressed {
    use std::sync::Arc;

    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::{FormatOptions, FormatReader};
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    use super::{DecodeStream, DecodedChunk, PcmChunk};
    use crate::error::{VoiceError, VoiceResult};

    /// Decoder for compressed payloads (wav, flac, ogg/vorbis, mp3)
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SymphoniaDecoder;

    pub(super) struct SymphoniaStream {
        format: Box<dyn FormatReader>,
        decoder: Box<dyn Decoder>,
        track_id: u32,
        pending: Vec<i16>,
        channels: u16,
        sample_rate: u32,
        finished: bool,
    }

    fn decoder_error(e: SymphoniaError) -> VoiceError {
        VoiceError::Decoder(e.to_string())
    }

    impl SymphoniaStream {
        pub(super) fn open(payload: Arc<[u8]>) -> VoiceResult<Self> {
            let source = std::io::Cursor::new(payload);
            let mss = MediaSourceStream::new(Box::new(source), Default::default());

            let probed = symphonia::default::get_probe()
                .format(
                    &Hint::new(),
                    mss,
                    &FormatOptions::default(),
                    &MetadataOptions::default(),
                )
                .map_err(decoder_error)?;
            let format = probed.format;

            let (track_id, params) = {
                let track = format
                    .tracks()
                    .iter()
                    .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
                    .ok_or_else(|| VoiceError::Decoder("no decodable track".into()))?;
                (track.id, track.codec_params.clone())
            };

            let decoder = symphonia::default::get_codecs()
                .make(&params, &DecoderOptions::default())
                .map_err(decoder_error)?;

            Ok(Self {
                format,
                decoder,
                track_id,
                pending: Vec::new(),
                channels: params.channels.map(|c| c.count() as u16).unwrap_or(2),
                sample_rate: params.sample_rate.unwrap_or(48000),
                finished: false,
            })
        }

        fn pull_packet(&mut self) -> VoiceResult<()> {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.finished = true;
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.finished = true;
                    return Ok(());
                }
                Err(e) => return Err(decoder_error(e)),
            };

            if packet.track_id() != self.track_id {
                return Ok(());
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    self.channels = spec.channels.count() as u16;
                    self.sample_rate = spec.rate;

                    let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    self.pending.extend_from_slice(buffer.samples());
                    Ok(())
                }
                // Corrupt packet: skip it
                Err(SymphoniaError::DecodeError(msg)) => {
                    log::debug!("[Decoder] Skipping corrupt packet: {}", msg);
                    Ok(())
                }
                Err(e) => Err(decoder_error(e)),
            }
        }
    }

    impl DecodeStream for SymphoniaStream {
        fn decode_chunk(&mut self, max_frames: usize) -> VoiceResult<DecodedChunk> {
            let channels = self.channels.max(1) as usize;
            while self.pending.len() < max_frames * channels && !self.finished {
                self.pull_packet()?;
            }

            let channels = self.channels.max(1) as usize;
            let take = (max_frames * channels).min(self.pending.len()) / channels * channels;
            let samples: Vec<i16> = self.pending.drain(..take).collect();

            Ok(DecodedChunk {
                pcm: PcmChunk {
                    samples,
                    channels: self.channels,
                    sample_rate: self.sample_rate,
                },
                end_of_stream: self.finished && self.pending.len() < channels,
            })
        }

        fn is_valid(&self) -> bool {
            !self.finished || !self.pending.is_empty()
        }
    }
}

#[cfg(feature = "symphonia")]
pub use compressed::SymphoniaDecoder;

#[cfg(feature = "symphonia")]
impl StreamDecoder for SymphoniaDecoder {
    fn open_stream(&self, data: &AudioData) -> VoiceResult<Box<dyn DecodeStream>> {
        Ok(Box::new(compressed::SymphoniaStream::open(Arc::clone(
            &data.payload,
        ))?))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEFAULT DECODER
// ═══════════════════════════════════════════════════════════════════════════════

/// Dispatches on [`AudioEncoding`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl StreamDecoder for DefaultDecoder {
    fn open_stream(&self, data: &AudioData) -> VoiceResult<Box<dyn DecodeStream>> {
        match data.encoding {
            AudioEncoding::Pcm16 => PcmDecoder.open(data),
            #[cfg(feature = "symphonia")]
            AudioEncoding::Compressed => SymphoniaDecoder.open_stream(data),
            #[cfg(not(feature = "symphonia"))]
            AudioEncoding::Compressed => Err(VoiceError::UnsupportedEncoding(
                "built without the symphonia feature".into(),
            )),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
