//! Conversion of decoded frames into the fixed output format.
//!
//! Each decoded frame goes through three steps:
//! 1. interleave to `f32` (any source sample format)
//! 2. map channels to the output channel count
//! 3. resample with Rubato when the source and output rates differ
//!
//! The result is quantised into a scratch byte buffer owned by the [`Resampler`]. The
//! scratch buffer grows to the largest output ever requested and never shrinks. Results
//! are handed out as [`Converted`], which borrows the resampler, so a previous result
//! cannot be used after the next `convert()` call.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler as RubatoResampler, SincInterpolationParameters,
    SincInterpolationType, WindowFunction, calculate_cutoff,
};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer, SignalSpec};

use crate::error::{EngineError, Result};
use crate::format::AudioFormat;

/// View of one conversion result, valid until the next call on the resampler.
#[derive(Debug)]
pub struct Converted<'a> {
    bytes: &'a [u8],
    frames: usize,
    generation: u64,
}

impl<'a> Converted<'a> {
    /// PCM bytes in the output format.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Output frames produced by this call.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Monotonic call counter of the resampler that produced this view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }
}

/// Converts decoded frames of one source layout into `AudioFormat` bytes.
pub struct Resampler {
    src_spec: SignalSpec,
    dst: AudioFormat,
    samples: Option<SampleBuffer<f32>>,
    mapped: Vec<f32>,
    rate: Option<RateStage>,
    scratch: Vec<u8>,
    generation: u64,
}

impl Resampler {
    /// Build a converter for frames described by `src_spec`.
    ///
    /// `chunk_frames` is the Rubato input chunk size; it only matters when the rates
    /// differ.
    pub fn new(src_spec: SignalSpec, dst: AudioFormat, chunk_frames: usize) -> Result<Self> {
        let rate = if src_spec.rate == dst.sample_rate {
            tracing::info!(rate_hz = dst.sample_rate, "resample skipped");
            None
        } else {
            tracing::info!(
                from_hz = src_spec.rate,
                to_hz = dst.sample_rate,
                channels = dst.channels,
                "resampling"
            );
            Some(RateStage::new(
                src_spec.rate,
                dst.sample_rate,
                dst.channels as usize,
                chunk_frames,
            )?)
        };

        Ok(Self {
            src_spec,
            dst,
            samples: None,
            mapped: Vec::new(),
            rate,
            scratch: Vec::new(),
            generation: 0,
        })
    }

    /// Source layout this converter was built for.
    pub fn source_spec(&self) -> SignalSpec {
        self.src_spec
    }

    /// Bytes currently reserved for output.
    pub fn scratch_capacity(&self) -> usize {
        self.scratch.len()
    }

    /// Upper bound on output frames for `input_frames` more source frames.
    pub fn max_output_frames(&self, input_frames: usize) -> usize {
        match &self.rate {
            Some(stage) => stage.max_output_frames(input_frames),
            None => input_frames,
        }
    }

    /// Convert one decoded frame.
    ///
    /// May return an empty result while the resampler is still collecting a full input
    /// chunk. Errors are fatal for the track.
    pub fn convert(&mut self, frame: AudioBufferRef<'_>) -> Result<Converted<'_>> {
        let spec = *frame.spec();
        if spec != self.src_spec {
            return Err(EngineError::Conversion(format!(
                "source layout changed from {}Hz/{}ch to {}Hz/{}ch",
                self.src_spec.rate,
                self.src_spec.channels.count(),
                spec.rate,
                spec.channels.count()
            )));
        }

        let frames = frame.frames();
        if frames == 0 {
            return Ok(self.empty());
        }
        self.reserve_output(frames);

        let src_channels = spec.channels.count();
        let needed = frames * src_channels;
        if self.samples.as_ref().is_none_or(|sb| sb.capacity() < needed) {
            let capacity = frame.capacity().max(frames) as u64;
            self.samples = Some(SampleBuffer::new(capacity, spec));
        }
        let Some(samples) = self.samples.as_mut() else {
            return Err(EngineError::Conversion("sample buffer unavailable".into()));
        };
        samples.copy_interleaved_ref(frame);

        map_channels(
            samples.samples(),
            src_channels,
            self.dst.channels as usize,
            &mut self.mapped,
        );

        let pcm: &[f32] = match &mut self.rate {
            Some(stage) => stage.process(&self.mapped)?,
            None => &self.mapped,
        };
        Ok(encode_into(
            &self.dst,
            pcm,
            &mut self.scratch,
            &mut self.generation,
        ))
    }

    /// Drain input still held by the rate stage at end of stream.
    pub fn flush(&mut self) -> Result<Converted<'_>> {
        let pending = self.rate.as_ref().map_or(0, |s| s.pending_frames());
        if pending == 0 {
            return Ok(self.empty());
        }
        self.reserve_output(0);
        let pcm: &[f32] = match &mut self.rate {
            Some(stage) => stage.flush()?,
            None => &[],
        };
        Ok(encode_into(
            &self.dst,
            pcm,
            &mut self.scratch,
            &mut self.generation,
        ))
    }

    fn empty(&mut self) -> Converted<'_> {
        self.generation += 1;
        Converted {
            bytes: &[],
            frames: 0,
            generation: self.generation,
        }
    }

    /// Grow the scratch buffer to hold the largest possible output of the next call.
    fn reserve_output(&mut self, input_frames: usize) {
        let max_frames = self.max_output_frames(input_frames).max(
            self.rate
                .as_ref()
                .map_or(0, |s| s.max_flush_frames()),
        );
        let max_bytes = max_frames * self.dst.bytes_per_frame();
        if self.scratch.len() < max_bytes {
            tracing::debug!(
                from_bytes = self.scratch.len(),
                to_bytes = max_bytes,
                "resampler scratch grown"
            );
            self.scratch.resize(max_bytes, 0);
        }
    }
}

/// Quantise `pcm` into `scratch` and bump the generation.
fn encode_into<'a>(
    dst: &AudioFormat,
    pcm: &[f32],
    scratch: &'a mut Vec<u8>,
    generation: &mut u64,
) -> Converted<'a> {
    let bps = dst.bytes_per_sample();
    let channels = (dst.channels as usize).max(1);
    let frames = pcm.len() / channels;
    let len = frames * channels * bps;
    if scratch.len() < len {
        scratch.resize(len, 0);
    }
    for (sample, out) in pcm.iter().zip(scratch[..len].chunks_exact_mut(bps)) {
        dst.encode_sample(*sample, out);
    }
    *generation += 1;
    Converted {
        bytes: &scratch[..len],
        frames,
        generation: *generation,
    }
}

/// Map interleaved `src` with `src_channels` onto `dst_channels` into `out`.
///
/// - mono → N: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: best-effort "clamp to available channels"
fn map_channels(src: &[f32], src_channels: usize, dst_channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if src_channels == 0 || dst_channels == 0 {
        return;
    }
    out.reserve(src.len() / src_channels * dst_channels);
    for frame in src.chunks_exact(src_channels) {
        for ch in 0..dst_channels {
            let v = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[ch.min(src_channels - 1)],
            };
            out.push(v);
        }
    }
}

/// Rubato sinc resampler fed in fixed input chunks.
struct RateStage {
    inner: Box<dyn RubatoResampler<f32>>,
    channels: usize,
    chunk_frames: usize,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl RateStage {
    fn new(src_rate: u32, dst_rate: u32, channels: usize, chunk_frames: usize) -> Result<Self> {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| EngineError::Conversion(format!("resampler init: {e}")))?;

        Ok(Self {
            inner: Box::new(inner),
            channels,
            chunk_frames,
            pending: Vec::new(),
            out: Vec::new(),
        })
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels
    }

    fn max_output_frames(&self, input_frames: usize) -> usize {
        let chunks = (self.pending_frames() + input_frames) / self.chunk_frames;
        chunks * self.inner.output_frames_max()
    }

    fn max_flush_frames(&self) -> usize {
        if self.pending.is_empty() {
            0
        } else {
            self.inner.output_frames_max()
        }
    }

    /// Append `input` and resample every complete chunk; the remainder waits.
    fn process(&mut self, input: &[f32]) -> Result<&[f32]> {
        self.pending.extend_from_slice(input);
        let ch = self.channels;
        let chunks = self.pending_frames() / self.chunk_frames;
        if chunks == 0 {
            return Ok(&[]);
        }

        let max_out = chunks * self.inner.output_frames_max();
        if self.out.len() < max_out * ch {
            self.out.resize(max_out * ch, 0.0);
        }
        let used = chunks * self.chunk_frames;
        let out_frames = self.out.len() / ch;

        let produced = {
            let input_adapter = InterleavedSlice::new(&self.pending[..used * ch], ch, used)
                .map_err(|e| EngineError::Conversion(format!("interleaved slice (input): {e}")))?;
            let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, ch, out_frames)
                .map_err(|e| EngineError::Conversion(format!("interleaved slice (output): {e}")))?;

            let mut indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            };
            let mut produced = 0;
            for chunk in 0..chunks {
                indexing.input_offset = chunk * self.chunk_frames;
                indexing.output_offset = produced;
                let (_nbr_in, nbr_out) = self
                    .inner
                    .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                    .map_err(|e| EngineError::Conversion(format!("resampler process: {e}")))?;
                produced += nbr_out;
            }
            produced
        };

        self.pending.drain(..used * ch);
        Ok(&self.out[..produced * ch])
    }

    /// Resample the partial chunk left at end of stream.
    fn flush(&mut self) -> Result<&[f32]> {
        let ch = self.channels;
        let tail_frames = self.pending_frames();
        if tail_frames == 0 {
            return Ok(&[]);
        }

        let max_out = self.inner.output_frames_max();
        if self.out.len() < max_out * ch {
            self.out.resize(max_out * ch, 0.0);
        }
        let out_frames = self.out.len() / ch;

        let produced = {
            let input_adapter =
                InterleavedSlice::new(&self.pending[..tail_frames * ch], ch, tail_frames)
                    .map_err(|e| EngineError::Conversion(format!("interleaved slice (tail input): {e}")))?;
            let mut output_adapter = InterleavedSlice::new_mut(&mut self.out, ch, out_frames)
                .map_err(|e| EngineError::Conversion(format!("interleaved slice (tail output): {e}")))?;
            let indexing = Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: Some(tail_frames),
            };
            let (_nbr_in, nbr_out) = self
                .inner
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| EngineError::Conversion(format!("resampler tail process: {e}")))?;
            nbr_out
        };

        self.pending.clear();
        Ok(&self.out[..produced * ch])
    }
}
