//! View projection
//!
//! A read-only snapshot of what should be on screen, derived from the feed
//! registry after every change and published through a `watch` channel.

use crate::registry::FeedRegistry;
use crate::track::MediaStream;
use crate::types::FeedId;

/// One renderable remote participant
#[derive(Debug, Clone)]
pub struct RemoteFeedView {
    pub feed_id: FeedId,
    pub display: Option<String>,
    pub stream: MediaStream,
}

/// Everything the rendering layer needs
#[derive(Debug, Clone, Default)]
pub struct RoomView {
    /// Local capture bound to the preview, if capture succeeded
    pub local: Option<MediaStream>,
    /// Active remote feeds in discovery order
    pub feeds: Vec<RemoteFeedView>,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    /// View-layer mute over every remote stream
    pub remote_audio_muted: bool,
}

impl RoomView {
    #[must_use]
    pub fn feed(&self, feed_id: &FeedId) -> Option<&RemoteFeedView> {
        self.feeds.iter().find(|f| &f.feed_id == feed_id)
    }

    #[must_use]
    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.feeds.iter().map(|f| f.feed_id.clone()).collect()
    }
}

/// Active feeds of `registry`, in discovery order.
#[must_use]
pub fn project(registry: &FeedRegistry) -> Vec<RemoteFeedView> {
    registry
        .feeds()
        .filter(|feed| feed.is_active())
        .filter_map(|feed| {
            feed.stream().map(|stream| RemoteFeedView {
                feed_id: feed.id().clone(),
                display: feed.display().map(str::to_string),
                stream: stream.clone(),
            })
        })
        .collect()
}

/// Something that can render a stream (a video element, a file writer, ...)
pub trait RenderSink: Send {
    fn attach_stream(&mut self, stream: &MediaStream);
}

impl<S: RenderSink + ?Sized> RenderSink for Box<S> {
    fn attach_stream(&mut self, stream: &MediaStream) {
        (**self).attach_stream(stream);
    }
}

/// Binds streams to a sink, skipping rebinds of the stream already attached
pub struct SinkBinding<S> {
    sink: S,
    bound: Option<MediaStream>,
}

impl<S: RenderSink> SinkBinding<S> {
    pub fn new(sink: S) -> Self {
        Self { sink, bound: None }
    }

    /// Attach `stream` unless it is the one already bound. Returns true when
    /// the sink was (re)bound.
    pub fn bind(&mut self, stream: &MediaStream) -> bool {
        if self.bound.as_ref().is_some_and(|b| b.same_stream(stream)) {
            return false;
        }
        self.sink.attach_stream(stream);
        self.bound = Some(stream.clone());
        true
    }

    #[must_use]
    pub fn bound(&self) -> Option<&MediaStream> {
        self.bound.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
