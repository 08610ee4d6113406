//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream and provides the real-time audio callback.
//! The callback:
//! - reads whole frames from the effect chain without blocking or locking
//! - decodes the bytes per [`AudioFormat`] and applies the volume
//! - converts to the device sample format
//! - fills silence on underrun and posts "idle" once the chain is finished

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::Sender;

use crate::effects::EffectChain;
use crate::format::AudioFormat;
use crate::status::PlaybackCounters;

/// Fires at most once per output session when the stream runs dry for good.
pub struct IdleSignal {
    session: u64,
    fired: AtomicBool,
    notify: Sender<u64>,
}

impl IdleSignal {
    pub fn new(session: u64, notify: Sender<u64>) -> Self {
        Self {
            session,
            fired: AtomicBool::new(false),
            notify,
        }
    }

    /// Post idle for this session. Returns `false` if it was already posted.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.notify.send(self.session);
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Shared handles the output callback works with.
#[derive(Clone)]
pub struct StreamContext {
    pub chain: Arc<dyn EffectChain>,
    /// Linear gain stored as `f32` bits.
    pub volume: Arc<AtomicU32>,
    pub counters: Arc<PlaybackCounters>,
    pub idle: Arc<IdleSignal>,
    /// Maximum number of frames to pull from the chain per read.
    pub refill_max_frames: usize,
}

/// Build a CPAL output stream that plays `ctx.chain`.
///
/// The chain must produce audio in the format derived from this device config.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    ctx: StreamContext,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, ctx),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, ctx),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, ctx),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, ctx),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Type-specialized stream builder for CPAL sample formats.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ctx: StreamContext,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let format = ctx.chain.format();
    if config.channels != format.channels {
        return Err(anyhow!(
            "stream has {} channels but audio has {}",
            config.channels,
            format.channels
        ));
    }

    let mut renderer = Renderer::new(ctx, format);
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| renderer.render(data),
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Callback state; everything it needs is allocated before the stream starts.
struct Renderer {
    ctx: StreamContext,
    format: AudioFormat,
    scratch: Vec<u8>,
}

impl Renderer {
    fn new(ctx: StreamContext, format: AudioFormat) -> Self {
        let frames = ctx.refill_max_frames.max(1);
        let scratch = vec![0u8; frames * format.bytes_per_frame()];
        Self {
            ctx,
            format,
            scratch,
        }
    }

    fn render<T>(&mut self, data: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let channels = usize::from(self.format.channels).max(1);
        let bps = self.format.bytes_per_sample();
        let bpf = self.format.bytes_per_frame();
        let volume = f32::from_bits(self.ctx.volume.load(Ordering::Relaxed));

        let frames = data.len() / channels;
        let max_frames = self.scratch.len() / bpf.max(1);
        let mut filled = 0usize;

        while filled < frames && max_frames > 0 {
            let want = (frames - filled).min(max_frames);
            let got = self.ctx.chain.read(&mut self.scratch[..want * bpf]) / bpf;
            let out = &mut data[filled * channels..(filled + got) * channels];
            for (dst, src) in out.iter_mut().zip(self.scratch.chunks_exact(bps)) {
                *dst = T::from_sample(self.format.decode_sample(src) * volume);
            }
            filled += got;
            if got < want {
                break;
            }
        }

        if filled < frames {
            data[filled * channels..].fill(T::EQUILIBRIUM);
            if self.ctx.chain.is_finished() {
                self.ctx.idle.fire();
            } else {
                self.ctx.counters.underrun_events.fetch_add(1, Ordering::Relaxed);
                self.ctx
                    .counters
                    .underrun_frames
                    .fetch_add((frames - filled) as u64, Ordering::Relaxed);
            }
        }

        if filled > 0 {
            self.ctx
                .counters
                .played_frames
                .fetch_add(filled as u64, Ordering::Relaxed);
        }
    }
}
