use std::path::PathBuf;
use std::time::Duration;

use audio_engine::EngineConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "player", version)]
pub struct Args {
    /// Audio files to play, in order
    #[arg(required_unless_present = "list_devices")]
    pub paths: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Playback callback refill cap (frames)
    #[arg(long, default_value_t = 4096)]
    pub refill_max_frames: usize,

    /// Fade-out length when stopping, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub stop_fade_ms: u64,

    /// Fade-out length when skipping, in milliseconds
    #[arg(long, default_value_t = 250)]
    pub skip_fade_ms: u64,

    /// Preferred output sample rate in Hz (0 = highest the device supports)
    #[arg(long, default_value_t = 48_000)]
    pub rate: u32,

    /// Initial volume, 0.0 to 1.0
    #[arg(long, default_value_t = 1.0)]
    pub volume: f32,
}

impl Args {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            chunk_frames: self.chunk_frames.max(1),
            refill_max_frames: self.refill_max_frames.max(1),
            stop_fade: Duration::from_millis(self.stop_fade_ms),
            skip_fade: Duration::from_millis(self.skip_fade_ms),
            target_rate: (self.rate > 0).then_some(self.rate),
            device: self.device.clone(),
        }
    }
}

/// One line typed at the prompt.
#[derive(Debug, PartialEq)]
pub enum Input {
    TogglePause,
    Next,
    Prev,
    Stop,
    Play,
    Seek(Duration),
    Tempo(f32),
    Volume(f32),
    Status,
    Quit,
}

/// Parse an interactive command; `None` for anything unrecognised.
pub fn parse_input(line: &str) -> Option<Input> {
    let mut words = line.split_whitespace();
    let cmd = words.next()?;
    let arg = words.next();
    let input = match (cmd, arg) {
        ("p", None) => Input::TogglePause,
        ("n", None) => Input::Next,
        ("b", None) => Input::Prev,
        ("s", None) => Input::Stop,
        ("g", None) => Input::Play,
        ("i", None) => Input::Status,
        ("q", None) => Input::Quit,
        ("seek", Some(v)) => {
            let secs: f64 = v.parse().ok()?;
            Input::Seek(Duration::try_from_secs_f64(secs).ok()?)
        }
        ("tempo", Some(v)) => Input::Tempo(v.parse().ok()?),
        ("vol", Some(v)) => Input::Volume(v.parse().ok()?),
        _ => return None,
    };
    Some(input)
}
