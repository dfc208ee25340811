//! Media tracks and streams
//!
//! `MediaTrack` is a cheap, cloneable handle to one captured or received track.
//! Clones share the same underlying state, so stopping a track through any
//! clone is observed by all of them.
//!
//! `MediaStream` is an ordered container of tracks. Its identity is the
//! allocation it points at: two `MediaStream` values are "the same stream"
//! when [`MediaStream::same_stream`] returns true.

use crate::types::TrackId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    /// Parse the `type` field of a roster stream entry. Data channels and
    /// anything else are not media.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

struct TrackInner {
    id: TrackId,
    kind: TrackKind,
    label: Option<String>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

/// Handle to a single media track
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(id: impl Into<TrackId>, kind: TrackKind) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: None,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn with_label(id: impl Into<TrackId>, kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: id.into(),
                kind,
                label: Some(label.into()),
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> &TrackId {
        &self.inner.id
    }

    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    #[must_use]
    pub fn is_audio(&self) -> bool {
        self.inner.kind == TrackKind::Audio
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        self.inner.kind == TrackKind::Video
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    /// Stop the track. Stopping twice is harmless.
    pub fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            debug!(track_id = %self.inner.id, kind = ?self.inner.kind, "Track stopped");
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct StreamInner {
    id: String,
    tracks: RwLock<Vec<MediaTrack>>,
}

/// A renderable container of tracks
///
/// Readers (the view, render sinks) only get the read accessors. Adding and
/// removing tracks is reserved to the track aggregator.
#[derive(Clone)]
pub struct MediaStream {
    inner: Arc<StreamInner>,
}

impl MediaStream {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                id: nanoid::nanoid!(12),
                tracks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Build a stream that already holds `tracks`, e.g. a local capture.
    #[must_use]
    pub fn from_tracks(tracks: Vec<MediaTrack>) -> Self {
        let stream = Self::new();
        *stream.inner.tracks.write() = tracks;
        stream
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Reference equality: true when both values point at the same stream.
    #[must_use]
    pub fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().clone()
    }

    #[must_use]
    pub fn audio_tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().iter().filter(|t| t.is_audio()).cloned().collect()
    }

    #[must_use]
    pub fn video_tracks(&self) -> Vec<MediaTrack> {
        self.inner.tracks.read().iter().filter(|t| t.is_video()).cloned().collect()
    }

    #[must_use]
    pub fn track_count(&self) -> usize {
        self.inner.tracks.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.tracks.read().is_empty()
    }

    #[must_use]
    pub fn contains(&self, id: &TrackId) -> bool {
        self.inner.tracks.read().iter().any(|t| t.id() == id)
    }

    /// Insert `track` unless a track with the same id is already present.
    pub(crate) fn insert_track(&self, track: MediaTrack) -> bool {
        let mut tracks = self.inner.tracks.write();
        if tracks.iter().any(|t| t.id() == track.id()) {
            return false;
        }
        tracks.push(track);
        true
    }

    /// Remove the track with `id`, returning it if it was present.
    pub(crate) fn remove_track(&self, id: &TrackId) -> Option<MediaTrack> {
        let mut tracks = self.inner.tracks.write();
        let idx = tracks.iter().position(|t| t.id() == id)?;
        Some(tracks.remove(idx))
    }

    /// Stop every track in the stream.
    pub fn stop_all(&self) {
        for track in self.inner.tracks.read().iter() {
            track.stop();
        }
    }

    /// Flip `enabled` on every track of `kind`; returns how many were touched.
    pub fn set_kind_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        let tracks = self.inner.tracks.read();
        let mut touched = 0;
        for track in tracks.iter().filter(|t| t.kind() == kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        touched
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &*self.inner.tracks.read())
            .finish()
    }
}
