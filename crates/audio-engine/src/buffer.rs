//! Per-track PCM buffer shared by the decode worker and the output callback.
//!
//! The buffer is sized once to the whole track (`set_duration`) rather than being a
//! small streaming ring, so the consumer can seek anywhere that has been decoded.
//!
//! ## Threading
//! - exactly one producer (the decode worker) advances `write_pos`
//! - exactly one consumer (the output callback) advances `read_pos`; seeks also store it
//! - the hot `write_decoded_audio` / `read` path touches atomics only
//! - the mutex + condvar guard nothing but the "first data arrived" handshake and the
//!   one-time allocation, so the real-time reader never takes a lock
//!
//! ## Invariants
//! `0 <= read_pos <= limit <= capacity` and `write_pos <= capacity`. `limit` starts equal
//! to `capacity` and is lowered at most once, to `write_pos`, when decoding ends early.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::format::AudioFormat;

/// Bounded producer/consumer buffer for one track.
pub struct PlaybackBuffer {
    format: AudioFormat,
    data: OnceLock<Box<[AtomicU8]>>,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
    limit: AtomicUsize,
    eof: AtomicBool,
    should_abort: AtomicBool,
    has_error: AtomicBool,
    first_data_signalled: AtomicBool,
    handshake: Mutex<Handshake>,
    cv: Condvar,
}

/// State guarded by the handshake mutex.
#[derive(Default)]
struct Handshake {
    /// Byte offset requested before the buffer was sized.
    pending_seek: usize,
    data_ready: bool,
    finished: bool,
}

impl PlaybackBuffer {
    /// Create an unsized buffer for audio in `format`.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            data: OnceLock::new(),
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            limit: AtomicUsize::new(0),
            eof: AtomicBool::new(false),
            should_abort: AtomicBool::new(false),
            has_error: AtomicBool::new(false),
            first_data_signalled: AtomicBool::new(false),
            handshake: Mutex::new(Handshake::default()),
            cv: Condvar::new(),
        }
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn handshake(&self) -> MutexGuard<'_, Handshake> {
        self.handshake.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate storage for `duration` of audio. Callable exactly once.
    ///
    /// A seek requested before this call is clamped into the new capacity and becomes
    /// the initial read position.
    pub fn set_duration(&self, duration: Duration) -> Result<()> {
        let mut hs = self.handshake();
        if self.data.get().is_some() {
            return Err(EngineError::DurationAlreadySet);
        }

        let capacity = self.format.bytes_for_duration(duration);
        let storage: Box<[AtomicU8]> = (0..capacity).map(|_| AtomicU8::new(0)).collect();
        if self.data.set(storage).is_err() {
            return Err(EngineError::DurationAlreadySet);
        }
        self.limit.store(capacity, Ordering::Release);
        let start = hs.pending_seek.min(capacity);
        hs.pending_seek = start;
        self.read_pos.store(start, Ordering::Release);

        tracing::debug!(
            capacity_bytes = capacity,
            duration_ms = duration.as_millis() as u64,
            start_bytes = start,
            "playback buffer sized"
        );
        Ok(())
    }

    /// Append decoded PCM. Producer side.
    ///
    /// Copies `min(data.len(), capacity - write_pos)` bytes; anything beyond capacity is
    /// dropped silently. Returns `false` only when the buffer has been aborted, which tells
    /// the producer to stop.
    pub fn write_decoded_audio(&self, data: &[u8]) -> bool {
        if self.should_abort.load(Ordering::Acquire) {
            return false;
        }
        let Some(storage) = self.data.get() else {
            return true;
        };

        let wp = self.write_pos.load(Ordering::Relaxed);
        let n = data.len().min(storage.len() - wp);
        if n == 0 {
            return true;
        }
        for (dst, src) in storage[wp..wp + n].iter().zip(&data[..n]) {
            dst.store(*src, Ordering::Relaxed);
        }
        self.write_pos.store(wp + n, Ordering::Release);

        if !self.first_data_signalled.swap(true, Ordering::AcqRel) {
            let mut hs = self.handshake();
            hs.data_ready = true;
            drop(hs);
            self.cv.notify_all();
        }
        true
    }

    /// Producer reached the end of its input.
    ///
    /// Lowers `limit` to the bytes actually written so consumers stop expecting more, and
    /// wakes anyone still waiting for first data. Only the first call has an effect.
    pub fn decoded_eof(&self) {
        if self.eof.swap(true, Ordering::AcqRel) {
            return;
        }
        let written = self.write_pos.load(Ordering::Acquire);
        let previous = self.limit.fetch_min(written, Ordering::AcqRel);
        self.read_pos.fetch_min(written, Ordering::AcqRel);
        if written < previous {
            tracing::debug!(
                written_bytes = written,
                capacity_bytes = previous,
                "decode ended before buffer filled"
            );
        }

        let mut hs = self.handshake();
        hs.finished = true;
        drop(hs);
        self.cv.notify_all();
    }

    /// Read whole frames into `dst`. Consumer side; never blocks.
    ///
    /// Returns the number of bytes copied, bounded by what has been written and by
    /// `limit`. Returns 0 on underrun, at the end, or before the buffer is sized.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let Some(storage) = self.data.get() else {
            return 0;
        };
        let bpf = self.format.bytes_per_frame();
        if bpf == 0 {
            return 0;
        }

        let rp = self.read_pos.load(Ordering::Acquire);
        let end = self
            .limit
            .load(Ordering::Acquire)
            .min(self.write_pos.load(Ordering::Acquire));
        let max = dst.len() - dst.len() % bpf;
        let mut n = end.saturating_sub(rp).min(max);
        n -= n % bpf;
        if n == 0 {
            return 0;
        }

        for (dst, src) in dst[..n].iter_mut().zip(&storage[rp..rp + n]) {
            *dst = src.load(Ordering::Relaxed);
        }
        // A concurrent seek wins over this advance.
        let _ = self
            .read_pos
            .compare_exchange(rp, rp + n, Ordering::AcqRel, Ordering::Acquire);
        n
    }

    /// Block until the producer has written something, finished, or been aborted.
    ///
    /// Returns `false` if the buffer failed, was aborted, or ended without any data.
    pub fn wait_for_data(&self) -> bool {
        let mut hs = self.handshake();
        while !hs.data_ready && !hs.finished {
            hs = self.cv.wait(hs).unwrap_or_else(PoisonError::into_inner);
        }
        drop(hs);

        !self.has_error.load(Ordering::Acquire)
            && !self.should_abort.load(Ordering::Acquire)
            && self.write_pos.load(Ordering::Acquire) > 0
    }

    /// Position playback at `frame`.
    ///
    /// Before the buffer is sized the offset is remembered and applied by `set_duration`;
    /// afterwards it is clamped to `limit` and applied immediately.
    pub fn seek_to_frame(&self, frame: u64) {
        let offset = self.format.bytes_for_frames(frame);
        if self.data.get().is_none() {
            let mut hs = self.handshake();
            if self.data.get().is_none() {
                hs.pending_seek = offset;
                return;
            }
        }
        let clamped = offset.min(self.limit.load(Ordering::Acquire));
        self.read_pos.store(clamped, Ordering::Release);
    }

    pub fn seek_to(&self, position: Duration) {
        self.seek_to_frame(self.format.frames_for_duration(position));
    }

    /// Ask the producer to stop and release any waiter.
    pub fn abort(&self) {
        self.should_abort.store(true, Ordering::Release);
        let mut hs = self.handshake();
        hs.finished = true;
        drop(hs);
        self.cv.notify_all();
    }

    /// Like [`abort`](Self::abort), but also records a failure.
    pub fn abort_with_error(&self) {
        self.has_error.store(true, Ordering::Release);
        self.abort();
    }

    /// Allocated size in bytes (0 until `set_duration`).
    pub fn capacity(&self) -> usize {
        self.data.get().map_or(0, |d| d.len())
    }

    pub fn is_sized(&self) -> bool {
        self.data.get().is_some()
    }

    pub fn write_pos(&self) -> usize {
        self.write_pos.load(Ordering::Acquire)
    }

    pub fn read_pos(&self) -> usize {
        self.read_pos.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Current playback position.
    pub fn position(&self) -> Duration {
        self.format.duration_for_bytes(self.read_pos())
    }

    /// Playable length (shrinks if decoding ended early).
    pub fn duration(&self) -> Duration {
        self.format.duration_for_bytes(self.limit())
    }

    /// Producer has filled the whole capacity.
    pub fn is_full(&self) -> bool {
        self.is_sized() && self.write_pos() >= self.capacity()
    }

    /// Consumer has nothing left to read, now or later.
    pub fn is_finished(&self) -> bool {
        if self.is_aborted() {
            return true;
        }
        if !self.is_sized() {
            return false;
        }
        let limit = self.limit();
        let producer_done = self.eof.load(Ordering::Acquire) || self.write_pos() >= limit;
        producer_done && self.read_pos() >= limit
    }

    pub fn is_aborted(&self) -> bool {
        self.should_abort.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::Acquire)
    }
}
