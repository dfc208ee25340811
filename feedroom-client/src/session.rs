//! Session controller
//!
//! Owns the publish handle and the feed registry, and runs the single event
//! loop every gateway callback and user command is funnelled through:
//!
//! - `start` attaches the publisher, joins the room and publishes local media
//! - publisher messages update the roster: new publishers are subscribed,
//!   departed ones removed
//! - subscriber messages and remote tracks are routed to the registry
//! - `stop` tears everything down exactly once

use crate::capture::MediaDevices;
use crate::config::ClientConfig;
use crate::error::{CaptureError, GatewayError, RemovalCause, Result, SessionError};
use crate::gateway::{
    EventSink, Gateway, GatewayEvent, HandleEvent, NegotiationMedia, PluginHandle, RoomRole,
};
use crate::message::{Jsep, PublisherInfo, RoomEvent, RoomMessage, RoomRequest};
use crate::registry::{release_handle, FeedRegistry, TeardownReport, PUBLISHER_TAG};
use crate::track::{MediaStream, TrackKind};
use crate::types::{FeedId, RoomId};
use crate::view::{project, RenderSink, RoomView, SinkBinding};
use rand::RngExt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the user command channel
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Starting,
    Started,
    Stopped,
}

/// Why the session ended up receive-only
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOnlyReason {
    Capture(CaptureError),
    Publish(GatewayError),
}

/// Result of [`SessionController::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Local media is being published
    Publishing,
    /// Joined, but nothing is published
    ReceiveOnly(ReceiveOnlyReason),
    /// `start` had already run on this session
    AlreadyStarted,
}

/// User actions accepted by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    ToggleAudio,
    ToggleVideo,
    ToggleRemoteAudio,
    Stop,
}

/// The feed lifecycle controller for one room session
pub struct SessionController {
    config: Arc<ClientConfig>,
    gateway: Arc<dyn Gateway>,
    devices: Arc<dyn MediaDevices>,
    state: SessionState,
    display_name: String,
    publisher: Option<Arc<dyn PluginHandle>>,
    local_stream: Option<MediaStream>,
    preview: Option<SinkBinding<Box<dyn RenderSink>>>,
    registry: FeedRegistry,
    remote_audio_muted: bool,
    events_rx: Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    view_tx: watch::Sender<RoomView>,
}

impl SessionController {
    pub fn new(
        config: ClientConfig,
        gateway: Arc<dyn Gateway>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let config = Arc::new(config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (view_tx, _) = watch::channel(RoomView::default());
        let display_name = format!(
            "{}-{}",
            config.display_prefix,
            rand::rng().random_range(0..1000)
        );
        let registry = FeedRegistry::new(
            config.room.clone(),
            Arc::clone(&config),
            Arc::clone(&gateway),
            events_tx.clone(),
        );

        Self {
            config,
            gateway,
            devices,
            state: SessionState::NotStarted,
            display_name,
            publisher: None,
            local_stream: None,
            preview: None,
            registry,
            remote_audio_muted: false,
            events_rx: Some(events_rx),
            events_tx,
            view_tx,
        }
    }

    /// Render the local capture into `sink` once it is available.
    #[must_use]
    pub fn with_preview(mut self, sink: Box<dyn RenderSink>) -> Self {
        self.preview = Some(SinkBinding::new(sink));
        self
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[must_use]
    pub fn local_identity(&self) -> Option<&FeedId> {
        self.registry.local_identity()
    }

    #[must_use]
    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    #[must_use]
    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// Subscribe to view updates.
    #[must_use]
    pub fn subscribe_view(&self) -> watch::Receiver<RoomView> {
        self.view_tx.subscribe()
    }

    /// Current view snapshot
    #[must_use]
    pub fn view(&self) -> RoomView {
        self.view_tx.borrow().clone()
    }

    /// Join `room` and publish local media. Runs at most once per session.
    pub async fn start(&mut self, room: RoomId) -> Result<StartOutcome> {
        match self.state {
            SessionState::NotStarted => {}
            SessionState::Stopped => return Err(SessionError::Stopped),
            SessionState::Starting | SessionState::Started => {
                debug!(room = %room, "Session already started");
                return Ok(StartOutcome::AlreadyStarted);
            }
        }
        self.state = SessionState::Starting;
        self.registry.set_room(room.clone());
        info!(room = %room, display = %self.display_name, "Joining room");

        let sink = EventSink::new(RoomRole::Publisher, PUBLISHER_TAG, self.events_tx.clone());
        let attached = self
            .gateway
            .attach(RoomRole::Publisher, &self.config.ice_servers, sink)
            .await;
        let publisher = match attached {
            Ok(handle) => handle,
            Err(e) => {
                error!(room = %room, error = %e, "Publisher attach failed");
                self.state = SessionState::Stopped;
                return Err(SessionError::PublisherAttach(e));
            }
        };

        let join = RoomRequest::join_as_publisher(room.clone(), self.display_name.clone());
        if let Err(e) = publisher.send(join, None).await {
            error!(room = %room, error = %e, "Publisher join failed");
            release_handle(RoomRole::Publisher, publisher).await;
            self.state = SessionState::Stopped;
            return Err(SessionError::PublisherJoin(e));
        }
        self.publisher = Some(Arc::clone(&publisher));

        let outcome = match self.devices.get_user_media(&self.config.capture).await {
            Ok(stream) => {
                if let Some(preview) = self.preview.as_mut() {
                    preview.bind(&stream);
                }
                self.local_stream = Some(stream);
                match publish_local(publisher.as_ref()).await {
                    Ok(()) => {
                        info!(room = %room, "Publishing local media");
                        StartOutcome::Publishing
                    }
                    Err(e) => {
                        warn!(room = %room, error = %e, "Publishing failed, continuing receive-only");
                        StartOutcome::ReceiveOnly(ReceiveOnlyReason::Publish(e))
                    }
                }
            }
            Err(e) => {
                warn!(room = %room, error = %e, "Local capture unavailable, continuing receive-only");
                StartOutcome::ReceiveOnly(ReceiveOnlyReason::Capture(e))
            }
        };

        self.state = SessionState::Started;
        self.publish_view();
        Ok(outcome)
    }

    /// Apply a room membership change reported on the publisher handle.
    pub async fn on_room_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Joined { id, publishers } => {
                self.registry.set_local_identity(id);
                info!(
                    room = %self.registry.room(),
                    local_id = ?self.registry.local_identity(),
                    publishers = publishers.len(),
                    "Joined room"
                );
                self.subscribe_all(publishers).await;
            }
            RoomEvent::RosterUpdate { publishers, departed } => {
                self.subscribe_all(publishers).await;
                if let Some(feed_id) = departed {
                    info!(feed_id = %feed_id, "Publisher departed");
                    self.registry.remove(&feed_id, RemovalCause::Departed).await;
                }
            }
            RoomEvent::Error { code, reason } => {
                error!(code = ?code, reason = %reason, "Room error on publisher handle");
            }
        }
        self.refresh_view();
    }

    async fn subscribe_all(&mut self, publishers: Vec<PublisherInfo>) {
        for publisher in publishers {
            let hints = publisher.media_lines(&self.config.fallback_mids);
            self.registry
                .ensure_subscribed(&publisher.id, hints, publisher.display)
                .await;
        }
    }

    /// Forward the gateway's answer to our publish offer.
    pub async fn on_remote_answer(&mut self, jsep: Jsep) {
        let Some(publisher) = self.publisher.as_ref() else {
            debug!("Remote answer without publisher ignored");
            return;
        };
        if let Err(e) = publisher.handle_remote_jsep(jsep).await {
            warn!(error = %e, "Failed to apply remote answer");
        }
    }

    /// Dispatch one event from a gateway handle.
    pub async fn handle_event(&mut self, event: GatewayEvent) {
        if self.state == SessionState::Stopped {
            trace!(role = %event.role, "Session stopped, dropping event");
            return;
        }

        match event.role {
            RoomRole::Publisher => self.handle_publisher_event(event.event).await,
            RoomRole::Subscriber(feed_id) => {
                if !self.registry.is_current(&feed_id, event.tag) {
                    if let HandleEvent::RemoteTrack { track, added: true, .. } = &event.event {
                        track.stop();
                    }
                    trace!(feed_id = %feed_id, tag = event.tag, "Stale subscriber event dropped");
                    return;
                }
                self.handle_subscriber_event(&feed_id, event.event).await;
            }
        }
        self.refresh_view();
    }

    async fn handle_publisher_event(&mut self, event: HandleEvent) {
        match event {
            HandleEvent::Message { body, jsep } => self.on_publisher_message(&body, jsep).await,
            HandleEvent::RemoteTrack { track, .. } => {
                trace!(track_id = %track.id(), "Ignoring remote track on publisher handle");
            }
            HandleEvent::Cleanup => debug!("Publisher peer connection closed"),
            HandleEvent::WebrtcState(up) => debug!(up, "Publisher WebRTC state"),
            HandleEvent::IceState(state) => debug!(state = ?state, "Publisher ICE state"),
        }
    }

    async fn on_publisher_message(&mut self, body: &RoomMessage, jsep: Option<Jsep>) {
        if let Some(event) = RoomEvent::from_message(body) {
            self.on_room_event(event).await;
        }
        if let Some(answer) = jsep.filter(Jsep::is_answer) {
            self.on_remote_answer(answer).await;
        }
    }

    async fn handle_subscriber_event(&mut self, feed_id: &FeedId, event: HandleEvent) {
        match event {
            HandleEvent::Message { body, jsep } => {
                self.registry.on_subscriber_message(feed_id, &body, jsep).await;
            }
            HandleEvent::RemoteTrack { track, mid, added } => {
                self.registry.on_track_event(feed_id, track, &mid, added).await;
            }
            HandleEvent::Cleanup => {
                self.registry.remove(feed_id, RemovalCause::HandleCleanup).await;
            }
            HandleEvent::WebrtcState(up) => debug!(feed_id = %feed_id, up, "Subscriber WebRTC state"),
            HandleEvent::IceState(state) => {
                debug!(feed_id = %feed_id, state = ?state, "Subscriber ICE state");
            }
        }
    }

    /// Process every event already queued, without waiting for more.
    pub async fn drain_pending(&mut self) -> usize {
        let mut processed = 0;
        while let Some(event) = self.events_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_event(event).await;
            processed += 1;
        }
        processed
    }

    /// Flip the local microphone. Returns whether audio is now enabled.
    pub fn toggle_local_audio(&mut self) -> bool {
        self.toggle_local(TrackKind::Audio)
    }

    /// Flip the local camera. Returns whether video is now enabled.
    pub fn toggle_local_video(&mut self) -> bool {
        self.toggle_local(TrackKind::Video)
    }

    fn toggle_local(&mut self, kind: TrackKind) -> bool {
        let Some(stream) = self.local_stream.as_ref() else {
            debug!(kind = ?kind, "No local capture to toggle");
            return false;
        };
        let enabled = !kind_enabled(stream, kind);
        stream.set_kind_enabled(kind, enabled);
        info!(kind = ?kind, enabled, "Local track toggled");
        self.publish_view();
        enabled
    }

    /// Flip the view-layer mute over all remote audio. Returns whether remote
    /// audio is now muted.
    pub fn toggle_remote_audio(&mut self) -> bool {
        self.remote_audio_muted = !self.remote_audio_muted;
        info!(muted = self.remote_audio_muted, "Remote audio toggled");
        self.publish_view();
        self.remote_audio_muted
    }

    /// Release every feed, the publish handle and local capture. Runs once;
    /// later calls return an empty report.
    pub async fn stop(&mut self) -> TeardownReport {
        if self.state == SessionState::Stopped {
            return TeardownReport::default();
        }
        self.state = SessionState::Stopped;

        let report = self.registry.teardown_all(self.publisher.take()).await;
        if let Some(stream) = self.local_stream.take() {
            stream.stop_all();
        }
        if let Err(e) = self.gateway.destroy().await {
            warn!(error = %e, "Gateway destroy failed");
        }

        self.publish_view();
        info!(
            room = %self.registry.room(),
            failures = report.failures.len(),
            "Session stopped"
        );
        report
    }

    /// Run the event loop until `Stop`, cancellation, or every command
    /// sender is dropped; then stop the session.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        cancel: CancellationToken,
    ) -> TeardownReport {
        let Some(mut events) = self.events_rx.take() else {
            error!("Session event loop already ran");
            return self.stop().await;
        };

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Session cancelled");
                    break;
                }
                Some(event) = events.recv() => self.handle_event(event).await,
                command = commands.recv() => match command {
                    Some(SessionCommand::ToggleAudio) => {
                        self.toggle_local_audio();
                    }
                    Some(SessionCommand::ToggleVideo) => {
                        self.toggle_local_video();
                    }
                    Some(SessionCommand::ToggleRemoteAudio) => {
                        self.toggle_remote_audio();
                    }
                    Some(SessionCommand::Stop) | None => break,
                },
            }
        }

        self.stop().await
    }

    /// Start the session on the current runtime and return a handle to it.
    pub fn spawn(mut self, room: RoomId) -> SessionHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let view = self.subscribe_view();

        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.start(room).await {
                error!(error = %e, "Session failed to start");
                return self.stop().await;
            }
            self.run(rx, loop_cancel).await
        });

        SessionHandle {
            commands: tx,
            view,
            cancel,
            task: Arc::new(parking_lot::Mutex::new(Some(task))),
        }
    }

    fn refresh_view(&mut self) {
        if self.registry.take_dirty() {
            self.publish_view();
        }
    }

    fn publish_view(&self) {
        let local = self.local_stream.clone();
        let view = RoomView {
            audio_enabled: local.as_ref().is_some_and(|s| kind_enabled(s, TrackKind::Audio)),
            video_enabled: local.as_ref().is_some_and(|s| kind_enabled(s, TrackKind::Video)),
            local,
            feeds: project(&self.registry),
            remote_audio_muted: self.remote_audio_muted,
        };
        trace!(feeds = view.feeds.len(), "View refreshed");
        self.view_tx.send_replace(view);
    }
}

fn kind_enabled(stream: &MediaStream, kind: TrackKind) -> bool {
    stream
        .tracks()
        .iter()
        .any(|t| t.kind() == kind && t.is_enabled())
}

async fn publish_local(publisher: &dyn PluginHandle) -> std::result::Result<(), GatewayError> {
    let offer = publisher.create_offer(NegotiationMedia::send_only()).await?;
    publisher.send(RoomRequest::Publish, Some(offer)).await
}

/// Cloneable front for a spawned session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    view: watch::Receiver<RoomView>,
    cancel: CancellationToken,
    task: Arc<parking_lot::Mutex<Option<tokio::task::JoinHandle<TeardownReport>>>>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub async fn toggle_audio(&self) -> Result<()> {
        self.send(SessionCommand::ToggleAudio).await
    }

    pub async fn toggle_video(&self) -> Result<()> {
        self.send(SessionCommand::ToggleVideo).await
    }

    pub async fn toggle_remote_audio(&self) -> Result<()> {
        self.send(SessionCommand::ToggleRemoteAudio).await
    }

    /// Watch the room view.
    #[must_use]
    pub fn view(&self) -> watch::Receiver<RoomView> {
        self.view.clone()
    }

    /// Ask the session to stop and wait for its teardown. Only the first
    /// caller gets the report.
    pub async fn stop(&self) -> Option<TeardownReport> {
        if self.send(SessionCommand::Stop).await.is_err() {
            self.cancel.cancel();
        }
        let task = self.task.lock().take()?;
        match task.await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Session task failed");
                None
            }
        }
    }

    /// Cancel the session without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
