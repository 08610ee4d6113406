//! Playable items.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use symphonia::core::probe::Hint;

use crate::buffer::PlaybackBuffer;
use crate::decode::{self, DecodeOptions};
use crate::format::AudioFormat;
use crate::source::ByteSource;

/// Something the player can start.
///
/// Tracks are shared between the playlist, the control thread and the output thread, so
/// every method takes `&self`.
pub trait Track: Send + Sync {
    fn title(&self) -> String;

    /// Begin decoding into a fresh buffer in `format`.
    ///
    /// Returns `None` if decoding cannot even be started. Later failures show up on the
    /// returned buffer.
    fn start_decoding(&self, format: &AudioFormat) -> Option<Arc<PlaybackBuffer>>;

    fn duration_limit(&self) -> Option<Duration>;

    fn set_duration_limit(&self, limit: Option<Duration>);

    fn mark_unplayable(&self);

    fn is_playable(&self) -> bool;
}

/// A track backed by a file on disk.
pub struct FileTrack {
    path: PathBuf,
    title: String,
    chunk_frames: usize,
    duration_hint: Option<Duration>,
    limit: Mutex<Option<Duration>>,
    unplayable: AtomicBool,
}

impl FileTrack {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            title,
            chunk_frames: DecodeOptions::default().chunk_frames,
            duration_hint: None,
            limit: Mutex::new(None),
            unplayable: AtomicBool::new(false),
        }
    }

    pub fn with_chunk_frames(mut self, chunk_frames: usize) -> Self {
        self.chunk_frames = chunk_frames;
        self
    }

    /// Length to assume when the container does not report one.
    pub fn with_duration_hint(mut self, hint: Duration) -> Self {
        self.duration_hint = Some(hint);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Track for FileTrack {
    fn title(&self) -> String {
        self.title.clone()
    }

    fn start_decoding(&self, format: &AudioFormat) -> Option<Arc<PlaybackBuffer>> {
        let source = match ByteSource::open(&self.path) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(title = %self.title, "{e}");
                return None;
            }
        };

        let mut hint = Hint::new();
        if let Some(ext) = self.path.extension().and_then(|s| s.to_str()) {
            hint.with_extension(ext);
        }

        let options = DecodeOptions {
            chunk_frames: self.chunk_frames,
            duration_hint: self.duration_hint,
            duration_limit: self.duration_limit(),
        };
        decode::start_decoding(source, hint, *format, options)
    }

    fn duration_limit(&self) -> Option<Duration> {
        *self.limit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_duration_limit(&self, limit: Option<Duration>) {
        *self.limit.lock().unwrap_or_else(PoisonError::into_inner) = limit;
    }

    fn mark_unplayable(&self) {
        if !self.unplayable.swap(true, Ordering::Relaxed) {
            tracing::info!(path = ?self.path, "track marked unplayable");
        }
    }

    fn is_playable(&self) -> bool {
        !self.unplayable.load(Ordering::Relaxed)
    }
}
