//! Track ordering consumed by the player.

use std::sync::Arc;
use std::time::Duration;

use crate::track::Track;

/// Source of current / next / previous tracks.
///
/// `next_item` and `prev_item` move the cursor and return the new current track, or
/// `None` (cursor unchanged) when there is nothing in that direction.
pub trait Playlist: Send {
    fn current_item(&self) -> Option<Arc<dyn Track>>;

    fn next_item(&mut self) -> Option<Arc<dyn Track>>;

    fn prev_item(&mut self) -> Option<Arc<dyn Track>>;

    fn has_next(&self) -> bool;

    fn has_prev(&self) -> bool;

    /// Called once the output device is actually playing `track`.
    fn track_started(&mut self, _track: &Arc<dyn Track>) {}

    /// Called when the player lets go of `track`, with how long it was audible.
    fn track_finished(&mut self, _track: &Arc<dyn Track>, _played: Duration) {}
}

/// In-memory playlist.
///
/// Stepping skips tracks that have been marked unplayable.
#[derive(Default)]
pub struct TrackList {
    tracks: Vec<Arc<dyn Track>>,
    cursor: usize,
}

impl TrackList {
    pub fn new(tracks: Vec<Arc<dyn Track>>) -> Self {
        Self { tracks, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    fn next_index(&self) -> Option<usize> {
        (self.cursor + 1..self.tracks.len()).find(|&i| self.tracks[i].is_playable())
    }

    fn prev_index(&self) -> Option<usize> {
        (0..self.cursor.min(self.tracks.len()))
            .rev()
            .find(|&i| self.tracks[i].is_playable())
    }

    fn move_to(&mut self, index: Option<usize>) -> Option<Arc<dyn Track>> {
        self.cursor = index?;
        self.current_item()
    }
}

impl Playlist for TrackList {
    fn current_item(&self) -> Option<Arc<dyn Track>> {
        self.tracks.get(self.cursor).cloned()
    }

    fn next_item(&mut self) -> Option<Arc<dyn Track>> {
        self.move_to(self.next_index())
    }

    fn prev_item(&mut self) -> Option<Arc<dyn Track>> {
        self.move_to(self.prev_index())
    }

    fn has_next(&self) -> bool {
        self.next_index().is_some()
    }

    fn has_prev(&self) -> bool {
        self.prev_index().is_some()
    }

    fn track_finished(&mut self, track: &Arc<dyn Track>, played: Duration) {
        tracing::debug!(
            title = %track.title(),
            played_ms = played.as_millis() as u64,
            "track finished"
        );
    }
}
