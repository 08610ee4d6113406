//! Error types for the decode/output path.
//!
//! None of these cross a thread boundary as a panic: the decode worker turns them
//! into [`PlaybackBuffer::abort_with_error`](crate::buffer::PlaybackBuffer::abort_with_error)
//! and the output thread turns them into a "track failed" notice for the player.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while opening, decoding or converting a track.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The byte source could not be opened.
    #[error("cannot open {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The container could not be probed.
    #[error("cannot probe container: {0}")]
    Probe(#[source] symphonia::core::errors::Error),

    /// The container holds no decodable audio stream.
    #[error("no decodable audio stream")]
    NoAudioStream,

    /// The decoder for the selected stream could not be created.
    #[error("cannot open decoder: {0}")]
    DecoderOpen(#[source] symphonia::core::errors::Error),

    /// Reading or decoding failed mid-stream.
    #[error("decode failed: {0}")]
    Decode(#[source] symphonia::core::errors::Error),

    /// The resampler produced no usable output.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// Neither the container nor the caller knows how long the track is.
    #[error("track duration is unknown")]
    UnknownDuration,

    /// `set_duration` was called on a buffer that is already sized.
    #[error("buffer duration already set")]
    DurationAlreadySet,

    /// The producer finished or failed without writing a single byte.
    #[error("no audio data was produced")]
    NoInitialData,

    /// The output device refused to open or start.
    #[error("output device error: {0}")]
    Device(String),
}

/// Convenience result alias for the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
