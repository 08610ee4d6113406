//! Streams consumed by the output callback.
//!
//! The hardware callback never talks to a [`PlaybackBuffer`] directly; it reads through an
//! [`EffectChain`] built by the embedder's [`ChainFactory`]. Fade and tempo DSP live outside
//! this crate. [`PassthroughChain`] is the stand-in used when nothing is plugged in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crate::buffer::PlaybackBuffer;
use crate::format::AudioFormat;

/// Readable, seekable PCM stream in a fixed [`AudioFormat`].
pub trait AudioStream: Send + Sync {
    fn format(&self) -> AudioFormat;

    /// Non-blocking read of whole frames; returns bytes copied.
    fn read(&self, dst: &mut [u8]) -> usize;

    /// Block until the first bytes exist. `false` means none ever will.
    fn wait_for_data(&self) -> bool;

    fn seek_to(&self, position: Duration);

    fn position(&self) -> Duration;

    fn duration(&self) -> Duration;

    /// No more bytes will ever be returned by `read`.
    fn is_finished(&self) -> bool;
}

/// Decorator stack applied on top of the raw buffer.
pub trait EffectChain: AudioStream {
    /// Start fading out; the stream finishes once `window` has been played.
    fn fade_out(&self, window: Duration);

    fn set_tempo(&self, coefficient: f32);

    fn tempo(&self) -> f32;

    /// Progress of the running fade in `0.0..=1.0`, `None` when not fading.
    fn fade_progress(&self) -> Option<f32>;
}

/// Builds the effect chain for each newly started buffer.
pub type ChainFactory = Arc<dyn Fn(Arc<PlaybackBuffer>) -> Arc<dyn EffectChain> + Send + Sync>;

impl AudioStream for PlaybackBuffer {
    fn format(&self) -> AudioFormat {
        *PlaybackBuffer::format(self)
    }

    fn read(&self, dst: &mut [u8]) -> usize {
        PlaybackBuffer::read(self, dst)
    }

    fn wait_for_data(&self) -> bool {
        PlaybackBuffer::wait_for_data(self)
    }

    fn seek_to(&self, position: Duration) {
        PlaybackBuffer::seek_to(self, position)
    }

    fn position(&self) -> Duration {
        PlaybackBuffer::position(self)
    }

    fn duration(&self) -> Duration {
        PlaybackBuffer::duration(self)
    }

    fn is_finished(&self) -> bool {
        PlaybackBuffer::is_finished(self)
    }
}

const NO_FADE: usize = usize::MAX;

/// Chain without DSP.
///
/// Samples pass through untouched. A fade-out only bounds the stream: reads stop at the
/// byte offset where the fade window ends.
pub struct PassthroughChain {
    inner: Arc<PlaybackBuffer>,
    fade_start: AtomicUsize,
    fade_end: AtomicUsize,
    tempo_bits: AtomicU32,
}

impl PassthroughChain {
    pub fn new(inner: Arc<PlaybackBuffer>) -> Self {
        Self {
            inner,
            fade_start: AtomicUsize::new(NO_FADE),
            fade_end: AtomicUsize::new(NO_FADE),
            tempo_bits: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Factory producing a passthrough chain for every buffer.
    pub fn factory() -> ChainFactory {
        Arc::new(|buffer| Arc::new(PassthroughChain::new(buffer)) as Arc<dyn EffectChain>)
    }

    fn fade_end(&self) -> Option<usize> {
        match self.fade_end.load(Ordering::Acquire) {
            NO_FADE => None,
            end => Some(end),
        }
    }
}

impl AudioStream for PassthroughChain {
    fn format(&self) -> AudioFormat {
        *self.inner.format()
    }

    fn read(&self, dst: &mut [u8]) -> usize {
        let Some(end) = self.fade_end() else {
            return self.inner.read(dst);
        };
        let remaining = end.saturating_sub(self.inner.read_pos());
        let take = remaining.min(dst.len());
        self.inner.read(&mut dst[..take])
    }

    fn wait_for_data(&self) -> bool {
        self.inner.wait_for_data()
    }

    fn seek_to(&self, position: Duration) {
        self.inner.seek_to(position)
    }

    fn position(&self) -> Duration {
        self.inner.position()
    }

    fn duration(&self) -> Duration {
        self.inner.duration()
    }

    fn is_finished(&self) -> bool {
        match self.fade_end() {
            Some(end) if self.inner.read_pos() >= end => true,
            _ => self.inner.is_finished(),
        }
    }
}

impl EffectChain for PassthroughChain {
    fn fade_out(&self, window: Duration) {
        if self.fade_end().is_some() {
            return;
        }
        let start = self.inner.read_pos();
        let len = self.inner.format().bytes_for_duration(window);
        self.fade_start.store(start, Ordering::Release);
        self.fade_end
            .store(start.saturating_add(len).min(NO_FADE - 1), Ordering::Release);
        tracing::debug!(window_ms = window.as_millis() as u64, "fade out started");
    }

    fn set_tempo(&self, coefficient: f32) {
        self.tempo_bits.store(coefficient.to_bits(), Ordering::Relaxed);
    }

    fn tempo(&self) -> f32 {
        f32::from_bits(self.tempo_bits.load(Ordering::Relaxed))
    }

    fn fade_progress(&self) -> Option<f32> {
        let end = self.fade_end()?;
        let start = self.fade_start.load(Ordering::Acquire);
        if end <= start {
            return Some(1.0);
        }
        let done = self.inner.read_pos().saturating_sub(start);
        Some((done as f32 / (end - start) as f32).min(1.0))
    }
}
