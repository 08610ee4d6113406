use std::time::Duration;

/// Engine tuning shared by the decode, output and control stages.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled from the chain per callback refill.
    pub refill_max_frames: usize,
    /// Fade window used when stopping.
    pub stop_fade: Duration,
    /// Fade window used when skipping to another track.
    pub skip_fade: Duration,
    /// Preferred device sample rate; `None` takes the highest supported.
    pub target_rate: Option<u32>,
    /// Output device name substring; `None` uses the host default.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    /// Defaults tuned for low-risk playback across common devices.
    fn default() -> Self {
        Self {
            chunk_frames: 1024,
            refill_max_frames: 4096,
            stop_fade: Duration::from_millis(500),
            skip_fade: Duration::from_millis(250),
            target_rate: Some(48_000),
            device: None,
        }
    }
}
