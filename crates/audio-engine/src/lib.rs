//! Desktop audio playback engine.
//!
//! Decodes compressed files with Symphonia, converts them to the output device format,
//! stores the PCM in a seekable per-track [`PlaybackBuffer`](buffer::PlaybackBuffer) and
//! drives a CPAL output stream from a small state machine ([`player`]).

pub mod buffer;
pub mod config;
pub mod decode;
pub mod device;
pub mod effects;
pub mod error;
pub mod format;
pub mod output;
pub mod playback;
pub mod player;
pub mod playlist;
pub mod registry;
pub mod resample;
pub mod source;
pub mod status;
pub mod track;

pub use buffer::PlaybackBuffer;
pub use config::EngineConfig;
pub use effects::{AudioStream, ChainFactory, EffectChain, PassthroughChain};
pub use error::{EngineError, Result};
pub use format::{AudioFormat, ByteOrder, SampleFormat};
pub use output::{BackendFactory, CpalBackend, OutputBackend, OutputStream};
pub use player::{Player, PlayerEvent, State};
pub use playlist::{Playlist, TrackList};
pub use track::{FileTrack, Track};
