//! Feed registry
//!
//! The registry is the only writer of remote feed state. It owns one [`Feed`]
//! per remote publisher and drives each feed through its lifecycle:
//!
//! ```text
//! (absent) -> Discovered -> SubscriptionPending -> Attached -> Active
//!                 \________________\___________________\________\__> Removed
//! ```
//!
//! Removed feeds are dropped from the map; a later announcement of the same
//! id starts a fresh feed. Every operation is idempotent with respect to
//! feeds that are already present (subscribe) or already gone (remove), so
//! re-entrant or duplicated gateway events cannot double-count or leak.

use crate::aggregator::TrackOutcome;
use crate::config::ClientConfig;
use crate::error::{GatewayError, ReleaseFailure, RemovalCause};
use crate::feed::{Feed, FeedState};
use crate::gateway::{EventSink, Gateway, GatewayEvent, NegotiationMedia, PluginHandle, RoomRole};
use crate::message::{Jsep, RoomMessage, RoomRequest, VideoRoomEvent};
use crate::track::MediaTrack;
use crate::types::{FeedId, MediaLine, RoomId};
use chrono::Utc;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Tag used for the publisher handle; subscriptions are numbered from 1.
pub(crate) const PUBLISHER_TAG: u64 = 0;

/// Result of a full teardown
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Feeds that were present and have been removed
    pub feeds_removed: usize,
    /// Whether a publish handle was released
    pub publisher_released: bool,
    /// Release calls that failed (already logged)
    pub failures: Vec<ReleaseFailure>,
}

/// Registry of remote feeds keyed by feed id, in discovery order
pub struct FeedRegistry {
    room: RoomId,
    config: Arc<ClientConfig>,
    gateway: Arc<dyn Gateway>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    local_identity: Option<FeedId>,
    feeds: IndexMap<FeedId, Feed>,
    next_tag: u64,
    dirty: bool,
}

impl FeedRegistry {
    pub fn new(
        room: RoomId,
        config: Arc<ClientConfig>,
        gateway: Arc<dyn Gateway>,
        events: mpsc::UnboundedSender<GatewayEvent>,
    ) -> Self {
        Self {
            room,
            config,
            gateway,
            events,
            local_identity: None,
            feeds: IndexMap::new(),
            next_tag: PUBLISHER_TAG,
            dirty: false,
        }
    }

    #[must_use]
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub(crate) fn set_room(&mut self, room: RoomId) {
        self.room = room;
    }

    /// Record our own publisher id. Set at most once: a different id later
    /// is rejected.
    pub fn set_local_identity(&mut self, id: FeedId) -> bool {
        if let Some(current) = &self.local_identity {
            if *current == id {
                return true;
            }
            warn!(
                local_id = %current,
                rejected_id = %id,
                "Local identity already assigned, ignoring new id"
            );
            return false;
        }

        info!(local_id = %id, room = %self.room, "Local identity assigned");
        self.local_identity = Some(id);
        true
    }

    #[must_use]
    pub fn local_identity(&self) -> Option<&FeedId> {
        self.local_identity.as_ref()
    }

    #[must_use]
    pub fn contains(&self, feed_id: &FeedId) -> bool {
        self.feeds.contains_key(feed_id)
    }

    /// Current state of a feed; `None` when the feed is unknown or removed.
    #[must_use]
    pub fn state(&self, feed_id: &FeedId) -> Option<FeedState> {
        self.feeds.get(feed_id).map(Feed::state)
    }

    #[must_use]
    pub fn get(&self, feed_id: &FeedId) -> Option<&Feed> {
        self.feeds.get(feed_id)
    }

    /// Feeds in discovery order
    pub fn feeds(&self) -> impl Iterator<Item = &Feed> {
        self.feeds.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Whether an event tagged `tag` belongs to the current subscription of
    /// `feed_id`.
    #[must_use]
    pub fn is_current(&self, feed_id: &FeedId, tag: u64) -> bool {
        self.feeds.get(feed_id).is_some_and(|f| f.tag() == tag)
    }

    /// Return and clear the "view needs refresh" flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Subscribe to `feed_id` unless it is already known or is our own feed.
    ///
    /// Returns true when a new subscription was requested.
    pub async fn ensure_subscribed(
        &mut self,
        feed_id: &FeedId,
        hints: Vec<MediaLine>,
        display: Option<String>,
    ) -> bool {
        if self.local_identity.as_ref() == Some(feed_id) {
            debug!(feed_id = %feed_id, "Skipping own feed");
            return false;
        }
        if let Some(feed) = self.feeds.get(feed_id) {
            trace!(feed_id = %feed_id, state = ?feed.state(), "Feed already known");
            return false;
        }

        self.next_tag += 1;
        let tag = self.next_tag;
        let mut feed = Feed::new(feed_id.clone(), display, hints, tag);
        info!(
            feed_id = %feed_id,
            display = feed.display().unwrap_or_default(),
            mids = ?feed.media_lines(),
            "Publisher discovered"
        );
        feed.set_state(FeedState::SubscriptionPending);
        self.feeds.insert(feed_id.clone(), feed);

        let role = RoomRole::Subscriber(feed_id.clone());
        let sink = EventSink::new(role.clone(), tag, self.events.clone());
        let attached = self
            .gateway
            .attach(role.clone(), &self.config.ice_servers, sink)
            .await;
        let handle = match attached {
            Ok(handle) => handle,
            Err(e) => {
                warn!(feed_id = %feed_id, error = %e, "Subscriber attach failed");
                self.remove(feed_id, RemovalCause::AttachFailed(e)).await;
                return false;
            }
        };

        let Some(feed) = self.feeds.get_mut(feed_id) else {
            release_handle(role, handle).await;
            return false;
        };
        feed.set_handle(Arc::clone(&handle));
        let mids = self.config.subscribe_by_mid.then_some(feed.media_lines());
        let request = RoomRequest::join_as_subscriber(self.room.clone(), feed_id.clone(), mids);

        if let Err(e) = handle.send(request, None).await {
            warn!(feed_id = %feed_id, error = %e, "Subscriber join failed");
            self.remove(feed_id, RemovalCause::NegotiationFailed(e)).await;
            return false;
        }

        debug!(feed_id = %feed_id, handle_id = handle.id(), tag, "Subscription requested");
        true
    }

    /// Handle a message delivered on a feed's subscriber handle.
    pub async fn on_subscriber_message(&mut self, feed_id: &FeedId, msg: &RoomMessage, jsep: Option<Jsep>) {
        let Some(state) = self.state(feed_id) else {
            debug!(feed_id = %feed_id, "Message for unknown feed ignored");
            return;
        };

        if let Some(code) = msg.error_code {
            if self.config.is_terminal_error(code) {
                warn!(
                    feed_id = %feed_id,
                    code,
                    error = msg.error.as_deref().unwrap_or_default(),
                    "Subscription ended by gateway"
                );
                self.remove(feed_id, RemovalCause::TerminalError(code)).await;
                return;
            }
            warn!(
                feed_id = %feed_id,
                code,
                error = msg.error.as_deref().unwrap_or_default(),
                "Subscriber error"
            );
        }

        if msg.is(&VideoRoomEvent::Event) && msg.departed_feed().is_some() {
            self.remove(feed_id, RemovalCause::Departed).await;
            return;
        }

        if msg.is(&VideoRoomEvent::Attached)
            && matches!(state, FeedState::Discovered | FeedState::SubscriptionPending)
        {
            if let Some(feed) = self.feeds.get_mut(feed_id) {
                feed.set_state(FeedState::Attached);
            }
            info!(feed_id = %feed_id, "Subscriber attached");
        }

        if let Some(offer) = jsep.filter(Jsep::is_offer) {
            self.answer_offer(feed_id, offer).await;
        }
    }

    async fn answer_offer(&mut self, feed_id: &FeedId, offer: Jsep) {
        let Some(handle) = self.feeds.get(feed_id).and_then(|f| f.handle().cloned()) else {
            debug!(feed_id = %feed_id, "Offer for feed without handle ignored");
            return;
        };

        match negotiate_subscription(handle.as_ref(), self.room.clone(), offer).await {
            Ok(()) => debug!(feed_id = %feed_id, "Subscriber answer sent"),
            Err(e) => {
                warn!(feed_id = %feed_id, error = %e, "Subscriber negotiation failed");
                self.remove(feed_id, RemovalCause::NegotiationFailed(e)).await;
            }
        }
    }

    /// Route a remote track event to the feed's aggregator.
    pub async fn on_track_event(&mut self, feed_id: &FeedId, track: MediaTrack, mid: &MediaLine, added: bool) {
        let Some(feed) = self.feeds.get_mut(feed_id) else {
            if added {
                debug!(feed_id = %feed_id, track_id = %track.id(), "Track for unknown feed, stopping it");
                track.stop();
            }
            return;
        };

        match feed.apply_track(&track, mid, added) {
            TrackOutcome::Refresh => {
                if added {
                    info!(
                        feed_id = %feed_id,
                        kind = ?track.kind(),
                        mid = %mid,
                        tracks = feed.track_count(),
                        "Remote track added"
                    );
                }
                self.dirty = true;
            }
            TrackOutcome::Unchanged => {}
            TrackOutcome::Emptied => {
                self.remove(feed_id, RemovalCause::LastTrackRemoved).await;
            }
        }
    }

    /// Remove a feed: stop its tracks, release its handle, forget it.
    ///
    /// Returns false when the feed was not present.
    pub async fn remove(&mut self, feed_id: &FeedId, cause: RemovalCause) -> bool {
        self.remove_entry(feed_id, cause).await.is_some()
    }

    async fn remove_entry(&mut self, feed_id: &FeedId, cause: RemovalCause) -> Option<Vec<ReleaseFailure>> {
        let Some(mut feed) = self.feeds.shift_remove(feed_id) else {
            trace!(feed_id = %feed_id, cause = %cause, "Feed already removed");
            return None;
        };
        self.dirty = true;

        feed.set_state(FeedState::Removed);
        feed.stop_tracks();
        let failures = match feed.take_handle() {
            Some(handle) => release_handle(RoomRole::Subscriber(feed_id.clone()), handle).await,
            None => Vec::new(),
        };

        let lifetime = Utc::now() - feed.discovered_at();
        info!(
            feed_id = %feed_id,
            cause = %cause,
            lifetime_ms = lifetime.num_milliseconds(),
            remaining = self.feeds.len(),
            "Feed removed"
        );
        Some(failures)
    }

    /// Remove every feed, then release the publish handle if one is given.
    ///
    /// Always completes; individual release failures are collected in the
    /// report.
    pub async fn teardown_all(&mut self, publisher: Option<Arc<dyn PluginHandle>>) -> TeardownReport {
        let mut report = TeardownReport::default();

        let ids: Vec<FeedId> = self.feeds.keys().cloned().collect();
        for id in ids {
            if let Some(failures) = self.remove_entry(&id, RemovalCause::Teardown).await {
                report.feeds_removed += 1;
                report.failures.extend(failures);
            }
        }

        if let Some(handle) = publisher {
            report.failures.extend(release_handle(RoomRole::Publisher, handle).await);
            report.publisher_released = true;
        }

        info!(
            feeds_removed = report.feeds_removed,
            publisher_released = report.publisher_released,
            failures = report.failures.len(),
            "Teardown complete"
        );
        report
    }
}

async fn negotiate_subscription(
    handle: &dyn PluginHandle,
    room: RoomId,
    offer: Jsep,
) -> Result<(), GatewayError> {
    let answer = handle
        .create_answer(offer, NegotiationMedia::receive_only())
        .await?;
    handle.send(RoomRequest::Start { room }, Some(answer)).await
}

/// Hang up and detach `handle`. Both calls are always attempted; failures
/// are logged and returned.
pub(crate) async fn release_handle(role: RoomRole, handle: Arc<dyn PluginHandle>) -> Vec<ReleaseFailure> {
    let mut failures = Vec::new();

    if let Err(e) = handle.hangup().await {
        warn!(role = %role, handle_id = handle.id(), error = %e, "Hangup failed");
        failures.push(ReleaseFailure {
            role: role.clone(),
            source: e,
        });
    }
    if let Err(e) = handle.detach().await {
        warn!(role = %role, handle_id = handle.id(), error = %e, "Detach failed");
        failures.push(ReleaseFailure { role, source: e });
    }

    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGateway;
    use crate::track::TrackKind;

    fn registry_with(gateway: &Arc<MockGateway>) -> (FeedRegistry, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = FeedRegistry::new(
            RoomId::from(1234),
            Arc::new(ClientConfig::default()),
            Arc::clone(gateway) as Arc<dyn Gateway>,
            tx,
        );
        (registry, rx)
    }

    fn mids() -> Vec<MediaLine> {
        vec!["0".to_string(), "1".to_string()]
    }

    fn feed(n: u64) -> FeedId {
        FeedId::from(n)
    }

    fn sub(n: u64) -> RoomRole {
        RoomRole::Subscriber(feed(n))
    }

    #[tokio::test]
    async fn test_subscribe_sends_subscriber_join() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);

        assert!(registry.ensure_subscribed(&feed(9), mids(), None).await);
        assert_eq!(registry.state(&feed(9)), Some(FeedState::SubscriptionPending));

        let handle = gateway.handle(&sub(9)).unwrap();
        assert_eq!(
            handle.sent()[0].0,
            RoomRequest::join_as_subscriber(RoomId::from(1234), feed(9), None)
        );
    }

    #[tokio::test]
    async fn test_repeated_subscribe_creates_one_feed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);

        for _ in 0..5 {
            registry.ensure_subscribed(&feed(9), mids(), None).await;
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(gateway.handles_for(&sub(9)).len(), 1);
    }

    #[tokio::test]
    async fn test_own_feed_never_subscribed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);

        registry.set_local_identity(feed(7));
        assert!(!registry.ensure_subscribed(&feed(7), mids(), None).await);
        assert!(registry.is_empty());
        assert_eq!(gateway.attach_count(), 0);
    }

    #[tokio::test]
    async fn test_local_identity_set_once() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);

        assert!(registry.set_local_identity(feed(7)));
        assert!(registry.set_local_identity(feed(7)));
        assert!(!registry.set_local_identity(feed(8)));
        assert_eq!(registry.local_identity(), Some(&feed(7)));
    }

    #[tokio::test]
    async fn test_attach_failure_leaves_no_feed() {
        let gateway = MockGateway::new();
        gateway.fail_attach_for(sub(9));
        let (mut registry, _rx) = registry_with(&gateway);

        assert!(!registry.ensure_subscribed(&feed(9), mids(), None).await);
        assert!(!registry.contains(&feed(9)));

        // other feeds are unaffected
        assert!(registry.ensure_subscribed(&feed(12), mids(), None).await);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_attached_then_offer_sends_start() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;

        let attached = RoomMessage {
            videoroom: Some(VideoRoomEvent::Attached),
            ..RoomMessage::default()
        };
        registry
            .on_subscriber_message(&feed(9), &attached, Some(Jsep::offer("v=0")))
            .await;

        assert_eq!(registry.state(&feed(9)), Some(FeedState::Attached));
        let handle = gateway.handle(&sub(9)).unwrap();
        assert_eq!(handle.sent_verbs(), vec!["join", "start"]);
        let sent = handle.sent();
        let (_, answer) = &sent[1];
        assert!(answer.as_ref().is_some_and(Jsep::is_answer));
    }

    #[tokio::test]
    async fn test_negotiation_failure_removes_feed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;
        let handle = gateway.handle(&sub(9)).unwrap();
        handle.fail_negotiation(true);

        registry
            .on_subscriber_message(&feed(9), &RoomMessage::default(), Some(Jsep::offer("v=0")))
            .await;

        assert!(!registry.contains(&feed(9)));
        assert_eq!(handle.hangups(), 1);
    }

    #[tokio::test]
    async fn test_terminal_error_removes_feed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;

        let msg = RoomMessage {
            videoroom: Some(VideoRoomEvent::Event),
            error_code: Some(428),
            error: Some("No such feed".to_string()),
            ..RoomMessage::default()
        };
        registry.on_subscriber_message(&feed(9), &msg, None).await;
        assert!(!registry.contains(&feed(9)));
    }

    #[tokio::test]
    async fn test_non_terminal_error_keeps_feed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;

        let msg = RoomMessage {
            videoroom: Some(VideoRoomEvent::Event),
            error_code: Some(499),
            ..RoomMessage::default()
        };
        registry.on_subscriber_message(&feed(9), &msg, None).await;
        assert!(registry.contains(&feed(9)));
    }

    #[tokio::test]
    async fn test_track_lifecycle() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;

        let video = MediaTrack::new("v9", TrackKind::Video);
        let audio = MediaTrack::new("a9", TrackKind::Audio);

        registry.on_track_event(&feed(9), video.clone(), &"0".to_string(), true).await;
        registry.on_track_event(&feed(9), audio.clone(), &"1".to_string(), true).await;
        assert_eq!(registry.state(&feed(9)), Some(FeedState::Active));
        assert_eq!(registry.get(&feed(9)).unwrap().track_count(), 2);
        assert!(registry.take_dirty());

        registry.on_track_event(&feed(9), video.clone(), &"0".to_string(), false).await;
        assert_eq!(registry.state(&feed(9)), Some(FeedState::Active));
        assert_eq!(registry.get(&feed(9)).unwrap().track_count(), 1);

        registry.on_track_event(&feed(9), audio.clone(), &"1".to_string(), false).await;
        assert_eq!(registry.state(&feed(9)), None);
        assert_eq!(gateway.handle(&sub(9)).unwrap().detaches(), 1);
    }

    #[tokio::test]
    async fn test_track_for_unknown_feed_is_stopped() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);

        let stray = MediaTrack::new("stray", TrackKind::Video);
        registry.on_track_event(&feed(99), stray.clone(), &"0".to_string(), true).await;
        assert!(stray.is_stopped());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(12), mids(), None).await;
        let track = MediaTrack::new("v12", TrackKind::Video);
        registry.on_track_event(&feed(12), track.clone(), &"0".to_string(), true).await;

        assert!(registry.remove(&feed(12), RemovalCause::Departed).await);
        assert!(!registry.remove(&feed(12), RemovalCause::Departed).await);
        assert!(!registry.remove(&feed(404), RemovalCause::Departed).await);

        let handle = gateway.handle(&sub(12)).unwrap();
        assert_eq!(handle.hangups(), 1);
        assert_eq!(handle.detaches(), 1);
        assert!(track.is_stopped());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_rejoin_creates_fresh_feed() {
        let gateway = MockGateway::new();
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;
        let first_tag = registry.get(&feed(9)).unwrap().tag();
        registry.remove(&feed(9), RemovalCause::Departed).await;

        assert!(registry.ensure_subscribed(&feed(9), mids(), None).await);
        let second_tag = registry.get(&feed(9)).unwrap().tag();
        assert_ne!(first_tag, second_tag);
        assert!(!registry.is_current(&feed(9), first_tag));
        assert_eq!(gateway.handles_for(&sub(9)).len(), 2);
    }

    #[tokio::test]
    async fn test_teardown_survives_release_failures() {
        let gateway = MockGateway::new();
        gateway.fail_release_for(sub(9));
        let (mut registry, _rx) = registry_with(&gateway);
        registry.ensure_subscribed(&feed(9), mids(), None).await;
        registry.ensure_subscribed(&feed(12), mids(), None).await;

        let report = registry.teardown_all(None).await;

        assert!(registry.is_empty());
        assert_eq!(report.feeds_removed, 2);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(gateway.handle(&sub(12)).unwrap().detaches(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_by_mid_sends_streams() {
        let gateway = MockGateway::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            subscribe_by_mid: true,
            ..ClientConfig::default()
        };
        let mut registry = FeedRegistry::new(
            RoomId::from(1234),
            Arc::new(config),
            Arc::clone(&gateway) as Arc<dyn Gateway>,
            tx,
        );

        registry
            .ensure_subscribed(&feed(9), vec!["3".to_string()], None)
            .await;
        let RoomRequest::Join(join) = gateway.handle(&sub(9)).unwrap().sent()[0].0.clone() else {
            panic!("expected join");
        };
        assert_eq!(join.streams.unwrap()[0].mid, "3");
    }
}
