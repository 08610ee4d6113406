//! Decode stage.
//!
//! Uses Symphonia to:
//! - probe the container behind a [`ByteSource`]
//! - pick the best audio stream and open its decoder
//! - run the packet → frame loop, handing each frame to a callback
//!
//! [`start_decoding`] wires a session, the [`Resampler`] and a [`PlaybackBuffer`]
//! together on a background worker. That worker is the single producer of the buffer.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Track};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::PlaybackBuffer;
use crate::error::{EngineError, Result};
use crate::format::AudioFormat;
use crate::registry::registry;
use crate::resample::Resampler;
use crate::source::ByteSource;

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
}

/// How a decode loop ended without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Input exhausted.
    EndOfStream,
    /// Cancelled, either through the token or by the frame callback.
    Cancelled,
}

/// Tuning for a background decode.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Length to assume when the container does not report one.
    pub duration_hint: Option<Duration>,
    /// Truncate playback to at most this long.
    pub duration_limit: Option<Duration>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            duration_hint: None,
            duration_limit: None,
        }
    }
}

/// An opened container plus the decoder for its selected audio stream.
pub struct DecodeSession {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    codec_params: CodecParameters,
    cancel: Arc<AtomicBool>,
}

impl DecodeSession {
    /// Probe `source` and prepare a decoder for its best audio stream.
    pub fn open(source: ByteSource, hint: &Hint) -> Result<Self> {
        let registry = registry();
        let mss = MediaSourceStream::new(Box::new(source), Default::default());

        let probed = registry
            .probe()
            .format(
                hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(EngineError::Probe)?;
        let format = probed.format;

        let track = select_audio_track(format.tracks(), format.default_track())
            .ok_or(EngineError::NoAudioStream)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = registry
            .codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(EngineError::DecoderOpen)?;

        tracing::debug!(
            track_id,
            codec = codec_name_from_params(&codec_params).as_deref().unwrap_or("unknown"),
            rate_hz = codec_params.sample_rate.unwrap_or(0),
            "decode session opened"
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            codec_params,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag checked once per loop iteration; setting it ends [`run`](Self::run).
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Total length reported by the container, if any.
    pub fn duration(&self) -> Option<Duration> {
        duration_from_codec_params(&self.codec_params)
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            codec: codec_name_from_params(&self.codec_params),
            bit_depth: self
                .codec_params
                .bits_per_sample
                .or(self.codec_params.bits_per_coded_sample)
                .and_then(|v| u16::try_from(v).ok()),
            sample_rate: self.codec_params.sample_rate,
            channels: self.codec_params.channels.map(|c| c.count()),
        }
    }

    /// Decode until the input ends, the token is set, or `on_frame` returns `Ok(false)`.
    ///
    /// Packets of other streams and empty frames are skipped. Any read or decode error
    /// ends the loop with [`EngineError::Decode`]; nothing is retried.
    pub fn run<F>(&mut self, mut on_frame: F) -> Result<DecodeOutcome>
    where
        F: FnMut(AudioBufferRef<'_>) -> Result<bool>,
    {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(DecodeOutcome::Cancelled);
            }

            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodeOutcome::EndOfStream);
                }
                Err(SymphoniaError::ResetRequired) => {
                    tracing::debug!("stream reset requested; treating as end of stream");
                    return Ok(DecodeOutcome::EndOfStream);
                }
                Err(e) => return Err(EngineError::Decode(e)),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(DecodeOutcome::EndOfStream);
                }
                Err(e) => return Err(EngineError::Decode(e)),
            };
            if decoded.frames() == 0 {
                continue;
            }

            if !on_frame(decoded)? {
                self.cancel.store(true, Ordering::Relaxed);
                return Ok(DecodeOutcome::Cancelled);
            }
        }
    }
}

/// Start a background decode of `source` into a new buffer in `format`.
///
/// Returns immediately. Failures on the worker (probe, decoder, conversion, mid-stream
/// errors) end in [`PlaybackBuffer::abort_with_error`]. Returns `None` only if the
/// worker thread could not be spawned.
pub fn start_decoding(
    source: ByteSource,
    hint: Hint,
    format: AudioFormat,
    options: DecodeOptions,
) -> Option<Arc<PlaybackBuffer>> {
    let buffer = Arc::new(PlaybackBuffer::new(format));
    let producer = buffer.clone();
    let name = source.name().to_string();

    let spawned = thread::Builder::new()
        .name("decode".into())
        .spawn(move || {
            if let Err(e) = decode_into_buffer(source, &hint, &producer, &options) {
                tracing::warn!(source = %name, "decode failed: {e}");
                producer.abort_with_error();
            }
        });

    match spawned {
        Ok(_) => Some(buffer),
        Err(e) => {
            tracing::error!("cannot spawn decode worker: {e}");
            None
        }
    }
}

/// Body of the decode worker.
fn decode_into_buffer(
    source: ByteSource,
    hint: &Hint,
    buffer: &PlaybackBuffer,
    options: &DecodeOptions,
) -> Result<()> {
    let mut session = DecodeSession::open(source, hint)?;

    let total = session
        .duration()
        .or(options.duration_hint)
        .ok_or(EngineError::UnknownDuration)?;
    let duration = options
        .duration_limit
        .map_or(total, |limit| total.min(limit));
    buffer.set_duration(duration)?;

    let info = session.source_info();
    tracing::info!(
        codec = info.codec.as_deref().unwrap_or("unknown"),
        bit_depth = ?info.bit_depth,
        duration_ms = duration.as_millis() as u64,
        "decode started"
    );

    let format = *buffer.format();
    let mut resampler: Option<Resampler> = None;
    let outcome = session.run(|frame| {
        let spec = *frame.spec();
        if let Some(mut old) = resampler.take_if(|r| r.source_spec() != spec) {
            tracing::debug!(rate_hz = spec.rate, "source layout changed; rebuilding resampler");
            let tail = old.flush()?;
            buffer.write_decoded_audio(tail.bytes());
        }
        if resampler.is_none() {
            resampler = Some(Resampler::new(spec, format, options.chunk_frames)?);
        }
        let Some(rs) = resampler.as_mut() else {
            return Err(EngineError::Conversion("resampler unavailable".into()));
        };

        let out = rs.convert(frame)?;
        Ok(buffer.write_decoded_audio(out.bytes()) && !buffer.is_full())
    })?;

    if buffer.is_aborted() {
        tracing::debug!("decode cancelled");
        return Ok(());
    }

    if outcome == DecodeOutcome::EndOfStream {
        if let Some(rs) = resampler.as_mut() {
            let tail = rs.flush()?;
            buffer.write_decoded_audio(tail.bytes());
        }
    }
    buffer.decoded_eof();

    tracing::info!(
        written_bytes = buffer.write_pos(),
        capacity_bytes = buffer.capacity(),
        "decode finished"
    );
    Ok(())
}

/// Pick the stream to decode.
///
/// The container's default track wins if it is decodable; otherwise the decodable track
/// with the most channels (first one on ties).
fn select_audio_track<'a>(tracks: &'a [Track], default: Option<&'a Track>) -> Option<&'a Track> {
    if let Some(track) = default.filter(|t| is_decodable(t)) {
        return Some(track);
    }
    let channels = |t: &Track| t.codec_params.channels.map_or(0, |c| c.count());
    tracks
        .iter()
        .filter(|t| is_decodable(t))
        .fold(None, |best: Option<&Track>, t| match best {
            Some(b) if channels(b) >= channels(t) => Some(b),
            _ => Some(t),
        })
}

fn is_decodable(track: &Track) -> bool {
    track.codec_params.codec != CODEC_TYPE_NULL
        && track.codec_params.sample_rate.is_some_and(|r| r > 0)
}

/// Best-effort duration from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_from_codec_params(codec_params: &CodecParameters) -> Option<Duration> {
    let frames = codec_params.n_frames? as u128;
    let rate = codec_params.sample_rate? as u128;
    if rate == 0 {
        return None;
    }
    let nanos = frames * 1_000_000_000 / rate;
    Some(Duration::from_nanos(u64::try_from(nanos).ok()?))
}

/// Best-effort codec label used for logs and status.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
