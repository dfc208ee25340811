//! Remote feed records

use crate::aggregator::{TrackAggregator, TrackOutcome};
use crate::gateway::PluginHandle;
use crate::track::{MediaStream, MediaTrack};
use crate::types::{FeedId, MediaLine};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Lifecycle state of a remote feed
///
/// `Removed` is never stored: a removed feed is dropped from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedState {
    Discovered,
    SubscriptionPending,
    Attached,
    Active,
    Removed,
}

/// One remote participant known to the registry
pub struct Feed {
    id: FeedId,
    display: Option<String>,
    media_lines: Vec<MediaLine>,
    state: FeedState,
    tag: u64,
    handle: Option<Arc<dyn PluginHandle>>,
    tracks: TrackAggregator,
    discovered_at: DateTime<Utc>,
}

impl Feed {
    pub(crate) fn new(
        id: FeedId,
        display: Option<String>,
        media_lines: Vec<MediaLine>,
        tag: u64,
    ) -> Self {
        Self {
            id,
            display,
            media_lines,
            state: FeedState::Discovered,
            tag,
            handle: None,
            tracks: TrackAggregator::new(),
            discovered_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &FeedId {
        &self.id
    }

    #[must_use]
    pub fn display(&self) -> Option<&str> {
        self.display.as_deref()
    }

    #[must_use]
    pub fn media_lines(&self) -> &[MediaLine] {
        &self.media_lines
    }

    #[must_use]
    pub fn state(&self) -> FeedState {
        self.state
    }

    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[must_use]
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == FeedState::Active
    }

    /// The aggregated stream, only once it holds a track.
    #[must_use]
    pub fn stream(&self) -> Option<&MediaStream> {
        self.tracks.stream()
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.tracks.track_count()
    }

    pub(crate) fn handle(&self) -> Option<&Arc<dyn PluginHandle>> {
        self.handle.as_ref()
    }

    pub(crate) fn set_handle(&mut self, handle: Arc<dyn PluginHandle>) {
        self.handle = Some(handle);
    }

    pub(crate) fn take_handle(&mut self) -> Option<Arc<dyn PluginHandle>> {
        self.handle.take()
    }

    pub(crate) fn set_state(&mut self, state: FeedState) {
        self.state = state;
    }

    /// Apply a track event; a feed holding tracks is always `Active`.
    pub(crate) fn apply_track(&mut self, track: &MediaTrack, mid: &MediaLine, added: bool) -> TrackOutcome {
        let outcome = self.tracks.apply(track, mid, added);
        if outcome == TrackOutcome::Refresh {
            self.state = FeedState::Active;
        }
        outcome
    }

    pub(crate) fn stop_tracks(&mut self) {
        self.tracks.stop_all();
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("id", &self.id)
            .field("display", &self.display)
            .field("state", &self.state)
            .field("tag", &self.tag)
            .field("tracks", &self.tracks.track_count())
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}
