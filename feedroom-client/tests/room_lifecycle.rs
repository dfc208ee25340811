// Integration tests for the room session
//
// Drives a session through the mock gateway the way a real gateway would:
// events are injected on the sinks handed to `attach` and applied by
// draining the session's event queue.

use feedroom_client::mock::{MockDevices, MockGateway};
use feedroom_client::{
    ClientConfig, FeedId, FeedState, Gateway, Jsep, MediaDevices, MediaStream, MediaTrack,
    PublisherInfo, PublisherStream, RenderSink, RoomId, RoomMessage, RoomRole, SessionController,
    StartOutcome, TrackKind, VideoRoomEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default)]
struct RecordingSink {
    attached: Arc<Mutex<Vec<String>>>,
}

impl RenderSink for RecordingSink {
    fn attach_stream(&mut self, stream: &MediaStream) {
        self.attached.lock().push(stream.id().to_string());
    }
}

struct Room {
    gateway: Arc<MockGateway>,
    devices: Arc<MockDevices>,
    preview: RecordingSink,
    session: SessionController,
}

async fn started_room(config: ClientConfig) -> Room {
    let gateway = MockGateway::new();
    let devices = MockDevices::granting();
    let preview = RecordingSink::default();
    let mut session = SessionController::new(
        config,
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        Arc::clone(&devices) as Arc<dyn MediaDevices>,
    )
    .with_preview(Box::new(preview.clone()));

    let outcome = session.start(RoomId::from(1234)).await.unwrap();
    assert_eq!(outcome, StartOutcome::Publishing);

    Room {
        gateway,
        devices,
        preview,
        session,
    }
}

fn sub(n: u64) -> RoomRole {
    RoomRole::Subscriber(FeedId::from(n))
}

fn event(videoroom: VideoRoomEvent) -> RoomMessage {
    RoomMessage {
        videoroom: Some(videoroom),
        ..RoomMessage::default()
    }
}

impl Room {
    fn publisher_says(&self, body: RoomMessage, jsep: Option<Jsep>) {
        self.gateway
            .sink(&RoomRole::Publisher)
            .unwrap()
            .message(body, jsep);
    }

    fn subscriber_says(&self, feed: u64, body: RoomMessage, jsep: Option<Jsep>) {
        self.gateway.sink(&sub(feed)).unwrap().message(body, jsep);
    }

    fn track(&self, feed: u64, track: &MediaTrack, mid: &str, added: bool) {
        self.gateway
            .sink(&sub(feed))
            .unwrap()
            .remote_track(track.clone(), mid, added);
    }

    async fn join(&mut self, local: u64, roster: Vec<PublisherInfo>) {
        let mut body = event(VideoRoomEvent::Joined);
        body.id = Some(FeedId::from(local));
        body.publishers = Some(roster);
        self.publisher_says(body, None);
        self.session.drain_pending().await;
    }

    /// Walk a discovered feed through attach, offer and its first tracks.
    async fn activate(&mut self, feed: u64) -> (MediaTrack, MediaTrack) {
        self.subscriber_says(feed, event(VideoRoomEvent::Attached), Some(Jsep::offer("v=0")));
        let audio = MediaTrack::new(format!("a{feed}"), TrackKind::Audio);
        let video = MediaTrack::new(format!("v{feed}"), TrackKind::Video);
        self.track(feed, &audio, "0", true);
        self.track(feed, &video, "1", true);
        self.session.drain_pending().await;
        (audio, video)
    }
}

#[tokio::test]
async fn test_full_room_lifecycle() {
    let mut room = started_room(ClientConfig::default()).await;
    assert_eq!(room.preview.attached.lock().len(), 1);

    room.join(7, vec![PublisherInfo::new(9), PublisherInfo::new(12)])
        .await;
    assert_eq!(room.session.registry().len(), 2);
    assert!(room.session.view().feeds.is_empty());

    let (audio9, _video9) = room.activate(9).await;
    let handle9 = room.gateway.handle(&sub(9)).unwrap();
    assert_eq!(handle9.sent_verbs(), vec!["join", "start"]);
    assert!(handle9.sent()[1].1.as_ref().is_some_and(Jsep::is_answer));

    let view = room.session.view();
    assert_eq!(view.feed_ids(), vec![FeedId::from(9)]);
    assert_eq!(view.feed(&FeedId::from(9)).unwrap().stream.track_count(), 2);

    // a third publisher appears later, then 9 leaves
    let mut update = event(VideoRoomEvent::Event);
    update.publishers = Some(vec![PublisherInfo::new(15)]);
    room.publisher_says(update, None);
    let mut leaving = event(VideoRoomEvent::Event);
    leaving.leaving = Some(FeedId::from(9));
    room.publisher_says(leaving, None);
    room.session.drain_pending().await;

    assert!(!room.session.registry().contains(&FeedId::from(9)));
    assert_eq!(
        room.session.registry().state(&FeedId::from(15)),
        Some(FeedState::SubscriptionPending)
    );
    assert!(audio9.is_stopped());
    assert_eq!(handle9.hangups(), 1);
    assert_eq!(handle9.detaches(), 1);
    assert!(room.session.view().feeds.is_empty());

    let report = room.session.stop().await;
    assert_eq!(report.feeds_removed, 2);
    assert!(report.failures.is_empty());
    assert!(room.gateway.is_destroyed());
    assert!(room.devices.captured()[0]
        .tracks()
        .iter()
        .all(MediaTrack::is_stopped));
}

#[tokio::test]
async fn test_self_ack_does_not_remove_feeds() {
    let mut room = started_room(ClientConfig::default()).await;
    room.join(7, vec![PublisherInfo::new(9)]).await;
    room.activate(9).await;

    let mut ack = event(VideoRoomEvent::Event);
    ack.unpublished = Some(FeedId::from("ok"));
    room.publisher_says(ack.clone(), None);
    room.subscriber_says(9, ack, None);
    room.session.drain_pending().await;

    assert_eq!(room.session.registry().state(&FeedId::from(9)), Some(FeedState::Active));
}

#[tokio::test]
async fn test_terminal_error_removes_only_that_feed() {
    let mut room = started_room(ClientConfig::default()).await;
    room.join(7, vec![PublisherInfo::new(9), PublisherInfo::new(12)])
        .await;
    room.activate(9).await;

    let mut busy = RoomMessage {
        error_code: Some(433),
        error: Some("not yet".to_string()),
        ..RoomMessage::default()
    };
    room.subscriber_says(12, busy.clone(), None);
    room.session.drain_pending().await;
    assert!(room.session.registry().contains(&FeedId::from(12)));

    busy.error_code = Some(428);
    room.subscriber_says(12, busy, None);
    room.session.drain_pending().await;

    assert!(!room.session.registry().contains(&FeedId::from(12)));
    assert_eq!(room.session.view().feed_ids(), vec![FeedId::from(9)]);
}

#[tokio::test]
async fn test_last_track_removed_releases_feed() {
    let mut room = started_room(ClientConfig::default()).await;
    room.join(7, vec![PublisherInfo::new(9)]).await;
    let (audio, video) = room.activate(9).await;
    let stream_before = room.session.view().feeds[0].stream.clone();

    room.track(9, &audio, "0", false);
    room.session.drain_pending().await;
    let view = room.session.view();
    assert!(view.feeds[0].stream.same_stream(&stream_before));
    assert_eq!(view.feeds[0].stream.track_count(), 1);

    room.track(9, &video, "1", false);
    room.session.drain_pending().await;
    assert!(room.session.registry().is_empty());
    assert!(room.session.view().feeds.is_empty());
    assert_eq!(room.gateway.handle(&sub(9)).unwrap().detaches(), 1);
}

#[tokio::test]
async fn test_rejoin_after_departure_gets_fresh_subscription() {
    let mut room = started_room(ClientConfig::default()).await;
    room.join(7, vec![PublisherInfo::new(9)]).await;
    room.activate(9).await;

    let mut leaving = event(VideoRoomEvent::Event);
    leaving.leaving = Some(FeedId::from(9));
    room.publisher_says(leaving, None);
    let mut back = event(VideoRoomEvent::Event);
    back.publishers = Some(vec![PublisherInfo::new(9)]);
    room.publisher_says(back, None);
    room.session.drain_pending().await;

    assert_eq!(room.gateway.handles_for(&sub(9)).len(), 2);
    assert_eq!(
        room.session.registry().state(&FeedId::from(9)),
        Some(FeedState::SubscriptionPending)
    );
}

#[tokio::test]
async fn test_subscribe_by_mid_uses_publisher_streams() {
    let config = ClientConfig {
        subscribe_by_mid: true,
        ..ClientConfig::default()
    };
    let mut room = started_room(config).await;

    let mut publisher = PublisherInfo::new(9);
    publisher.streams = vec![
        PublisherStream {
            kind: "audio".to_string(),
            mid: Some("2".to_string()),
        },
        PublisherStream {
            kind: "data".to_string(),
            mid: Some("3".to_string()),
        },
    ];
    room.join(7, vec![publisher, PublisherInfo::new(12)]).await;

    let join9 = serde_json::to_value(&room.gateway.handle(&sub(9)).unwrap().sent()[0].0).unwrap();
    assert_eq!(join9["streams"], serde_json::json!([{"feed": 9, "mid": "2"}]));

    let join12 = serde_json::to_value(&room.gateway.handle(&sub(12)).unwrap().sent()[0].0).unwrap();
    assert_eq!(
        join12["streams"],
        serde_json::json!([{"feed": 12, "mid": "0"}, {"feed": 12, "mid": "1"}])
    );
}

#[tokio::test]
async fn test_reannouncing_attached_feed_keeps_one_subscription() {
    let mut room = started_room(ClientConfig::default()).await;
    room.join(7, vec![PublisherInfo::new(9)]).await;

    room.subscriber_says(9, event(VideoRoomEvent::Attached), None);
    room.session.drain_pending().await;
    assert_eq!(room.session.registry().state(&FeedId::from(9)), Some(FeedState::Attached));

    let mut again = event(VideoRoomEvent::Event);
    again.publishers = Some(vec![PublisherInfo::new(9)]);
    room.publisher_says(again, None);
    room.session.drain_pending().await;

    assert_eq!(room.gateway.handles_for(&sub(9)).len(), 1);
    assert_eq!(room.session.registry().len(), 1);
    assert_eq!(room.session.registry().state(&FeedId::from(9)), Some(FeedState::Attached));
}

#[tokio::test]
async fn test_stop_completes_when_a_feed_release_fails() {
    let mut room = started_room(ClientConfig::default()).await;
    room.gateway.fail_release_for(sub(9));
    room.join(7, vec![PublisherInfo::new(9), PublisherInfo::new(12)])
        .await;

    let report = room.session.stop().await;

    assert_eq!(report.feeds_removed, 2);
    assert!(report.publisher_released);
    // hangup and detach of feed 9 both failed
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.role == sub(9)));
    assert!(!room.session.has_publisher());
    assert!(room.session.registry().is_empty());

    let publisher = room.gateway.handle(&RoomRole::Publisher).unwrap();
    assert_eq!(publisher.hangups(), 1);
    assert_eq!(publisher.detaches(), 1);
    assert_eq!(room.gateway.handle(&sub(12)).unwrap().detaches(), 1);
    assert!(room.gateway.is_destroyed());
}
