use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::effects::EffectChain;
use crate::format::{AudioFormat, SampleFormat};
use crate::player::State;

/// Counters written by the real-time callback.
#[derive(Debug, Default)]
pub struct PlaybackCounters {
    /// Frames delivered to the device this session.
    pub played_frames: AtomicU64,
    /// Total frames emitted as silence due to underruns.
    pub underrun_frames: AtomicU64,
    /// Number of underrun incidents observed by the callback.
    pub underrun_events: AtomicU64,
}

impl PlaybackCounters {
    pub fn reset(&self) {
        self.played_frames.store(0, Ordering::Relaxed);
        self.underrun_frames.store(0, Ordering::Relaxed);
        self.underrun_events.store(0, Ordering::Relaxed);
    }
}

/// Shared playback status updated by the control and output threads.
#[derive(Default)]
pub struct PlayerStatus {
    pub state: State,
    /// Title of the track currently loaded.
    pub now_playing: Option<String>,
    /// Selected output device name.
    pub device: Option<String>,
    /// Device format every buffer is decoded into.
    pub format: Option<AudioFormat>,
    /// Configured output callback buffer size in frames.
    pub buffer_size_frames: Option<u32>,
    pub volume: f32,
    pub tempo: f32,
    /// Chain of the running session, for position and fade progress.
    pub chain: Option<Arc<dyn EffectChain>>,
    pub counters: Arc<PlaybackCounters>,
}

/// Point-in-time copy of [`PlayerStatus`].
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub state: State,
    pub now_playing: Option<String>,
    pub device: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
    pub sample_format: Option<String>,
    pub buffer_size_frames: Option<u32>,
    /// Time the device has been fed this session.
    pub elapsed_ms: Option<u64>,
    /// Read position inside the track.
    pub position_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub volume: f32,
    pub tempo: f32,
    pub fade_progress: Option<f32>,
    pub underrun_frames: u64,
    pub underrun_events: u64,
}

impl PlayerStatus {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self {
            volume: 1.0,
            tempo: 1.0,
            ..Self::default()
        }))
    }

    pub fn lock(status: &Mutex<Self>) -> MutexGuard<'_, Self> {
        status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let sample_rate = self.format.map(|f| f.sample_rate);
        let elapsed_ms = match sample_rate {
            Some(sr) if sr > 0 && self.chain.is_some() => {
                let frames = self.counters.played_frames.load(Ordering::Relaxed);
                Some(frames.saturating_mul(1000) / sr as u64)
            }
            _ => None,
        };
        let chain = self.chain.as_ref();
        StatusSnapshot {
            state: self.state,
            now_playing: self.now_playing.clone(),
            device: self.device.clone(),
            sample_rate,
            channels: self.format.map(|f| f.channels),
            sample_format: self.format.map(|f| match f.sample_format {
                SampleFormat::Signed16 => "S16".to_string(),
                SampleFormat::Float32 => "F32".to_string(),
            }),
            buffer_size_frames: self.buffer_size_frames,
            elapsed_ms,
            position_ms: chain.map(|c| c.position().as_millis() as u64),
            duration_ms: chain.map(|c| c.duration().as_millis() as u64),
            volume: self.volume,
            tempo: self.tempo,
            fade_progress: chain.and_then(|c| c.fade_progress()),
            underrun_frames: self.counters.underrun_frames.load(Ordering::Relaxed),
            underrun_events: self.counters.underrun_events.load(Ordering::Relaxed),
        }
    }

    /// Clear track-specific fields when a session ends.
    pub fn clear_playback(&mut self) {
        self.now_playing = None;
        self.chain = None;
    }
}
