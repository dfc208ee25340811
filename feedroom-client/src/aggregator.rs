//! Track aggregation
//!
//! Remote tracks for one participant arrive one at a time, in no particular
//! order, and may be delivered more than once. The aggregator folds those
//! events into a single `MediaStream` per feed.

use crate::track::{MediaStream, MediaTrack};
use crate::types::MediaLine;
use tracing::{debug, trace};

/// What the owner of the stream has to do after an event was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The stream changed and still holds at least one track
    Refresh,
    /// Nothing changed (duplicate add, or removal of an unknown track)
    Unchanged,
    /// The last track was removed; the owning feed must go away
    Emptied,
}

/// Folds (track, mid, added) events into an aggregated stream
#[derive(Debug, Default)]
pub struct TrackAggregator {
    stream: Option<MediaStream>,
}

impl TrackAggregator {
    #[must_use]
    pub const fn new() -> Self {
        Self { stream: None }
    }

    /// The aggregated stream, once it holds at least one track.
    #[must_use]
    pub fn stream(&self) -> Option<&MediaStream> {
        self.stream.as_ref().filter(|s| !s.is_empty())
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.stream.as_ref().map_or(0, MediaStream::track_count)
    }

    /// Apply one track event.
    pub fn apply(&mut self, track: &MediaTrack, mid: &MediaLine, added: bool) -> TrackOutcome {
        if added {
            self.add(track, mid)
        } else {
            self.remove(track, mid)
        }
    }

    fn add(&mut self, track: &MediaTrack, mid: &MediaLine) -> TrackOutcome {
        let stream = self.stream.get_or_insert_with(|| {
            let stream = MediaStream::new();
            debug!(stream_id = stream.id(), "Created aggregated stream");
            stream
        });

        if stream.insert_track(track.clone()) {
            debug!(
                track_id = %track.id(),
                kind = ?track.kind(),
                mid = %mid,
                tracks = stream.track_count(),
                "Track added"
            );
            TrackOutcome::Refresh
        } else {
            trace!(track_id = %track.id(), mid = %mid, "Duplicate track delivery ignored");
            TrackOutcome::Unchanged
        }
    }

    fn remove(&mut self, track: &MediaTrack, mid: &MediaLine) -> TrackOutcome {
        let Some(stream) = self.stream.as_ref() else {
            return TrackOutcome::Unchanged;
        };
        if stream.remove_track(track.id()).is_none() {
            return TrackOutcome::Unchanged;
        }

        debug!(
            track_id = %track.id(),
            mid = %mid,
            tracks = stream.track_count(),
            "Track removed"
        );
        if stream.is_empty() {
            TrackOutcome::Emptied
        } else {
            TrackOutcome::Refresh
        }
    }

    /// Stop every remaining track and drop the stream.
    pub fn stop_all(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop_all();
        }
    }
}
