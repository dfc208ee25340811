// In-memory gateway and capture devices for tests and transcript replay

use crate::capture::MediaDevices;
use crate::config::{CaptureConfig, IceServer};
use crate::error::{CaptureError, GatewayError};
use crate::gateway::{EventSink, Gateway, NegotiationMedia, PluginHandle, RoomRole};
use crate::message::{Jsep, RoomRequest};
use crate::track::{MediaStream, MediaTrack, TrackKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Plugin handle that records every call made on it
#[derive(Debug)]
pub struct MockHandle {
    id: u64,
    role: RoomRole,
    sent: Mutex<Vec<(RoomRequest, Option<Jsep>)>>,
    remote_jseps: Mutex<Vec<Jsep>>,
    hangups: AtomicUsize,
    detaches: AtomicUsize,
    fail_release: AtomicBool,
    fail_negotiation: AtomicBool,
    fail_send: AtomicBool,
}

impl MockHandle {
    fn new(id: u64, role: RoomRole) -> Self {
        Self {
            id,
            role,
            sent: Mutex::new(Vec::new()),
            remote_jseps: Mutex::new(Vec::new()),
            hangups: AtomicUsize::new(0),
            detaches: AtomicUsize::new(0),
            fail_release: AtomicBool::new(false),
            fail_negotiation: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn role(&self) -> &RoomRole {
        &self.role
    }

    /// Requests sent so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<(RoomRequest, Option<Jsep>)> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_verbs(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|(r, _)| r.verb()).collect()
    }

    #[must_use]
    pub fn remote_jseps(&self) -> Vec<Jsep> {
        self.remote_jseps.lock().clone()
    }

    #[must_use]
    pub fn hangups(&self) -> usize {
        self.hangups.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    pub fn fail_negotiation(&self, fail: bool) {
        self.fail_negotiation.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PluginHandle for MockHandle {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send(&self, request: RoomRequest, jsep: Option<Jsep>) -> Result<(), GatewayError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(GatewayError::Request {
                verb: request.verb(),
                reason: "mock send failure".to_string(),
            });
        }
        self.sent.lock().push((request, jsep));
        Ok(())
    }

    async fn create_offer(&self, _media: NegotiationMedia) -> Result<Jsep, GatewayError> {
        if self.fail_negotiation.load(Ordering::SeqCst) {
            return Err(GatewayError::Negotiation("mock offer failure".to_string()));
        }
        Ok(Jsep::offer(format!("v=0 offer handle={}", self.id)))
    }

    async fn create_answer(&self, _offer: Jsep, media: NegotiationMedia) -> Result<Jsep, GatewayError> {
        if self.fail_negotiation.load(Ordering::SeqCst) {
            return Err(GatewayError::Negotiation("mock answer failure".to_string()));
        }
        if media.audio_send || media.video_send {
            return Err(GatewayError::Negotiation("subscriber must not send media".to_string()));
        }
        Ok(Jsep::answer(format!("v=0 answer handle={}", self.id)))
    }

    async fn handle_remote_jsep(&self, jsep: Jsep) -> Result<(), GatewayError> {
        self.remote_jseps.lock().push(jsep);
        Ok(())
    }

    async fn hangup(&self) -> Result<(), GatewayError> {
        self.hangups.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(GatewayError::Release("handle already invalid".to_string()));
        }
        Ok(())
    }

    async fn detach(&self) -> Result<(), GatewayError> {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(GatewayError::Release("handle already invalid".to_string()));
        }
        Ok(())
    }
}

/// Gateway that hands out [`MockHandle`]s
#[derive(Debug, Default)]
pub struct MockGateway {
    next_id: AtomicU64,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    sinks: Mutex<HashMap<RoomRole, EventSink>>,
    ice_servers: Mutex<HashMap<RoomRole, Vec<IceServer>>>,
    failing_attach: Mutex<HashSet<RoomRole>>,
    failing_release: Mutex<HashSet<RoomRole>>,
    destroyed: AtomicBool,
}

impl MockGateway {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every future attach for `role` fail.
    pub fn fail_attach_for(&self, role: RoomRole) {
        self.failing_attach.lock().insert(role);
    }

    /// Make hangup/detach fail on every future handle for `role`.
    pub fn fail_release_for(&self, role: RoomRole) {
        self.failing_release.lock().insert(role);
    }

    /// Every handle attached so far for `role`, oldest first
    #[must_use]
    pub fn handles_for(&self, role: &RoomRole) -> Vec<Arc<MockHandle>> {
        self.handles
            .lock()
            .iter()
            .filter(|h| h.role() == role)
            .cloned()
            .collect()
    }

    /// The most recent handle attached for `role`
    #[must_use]
    pub fn handle(&self, role: &RoomRole) -> Option<Arc<MockHandle>> {
        self.handles_for(role).pop()
    }

    #[must_use]
    pub fn attach_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// The event sink of the most recent attach for `role`, to inject events
    /// the way a real gateway would
    #[must_use]
    pub fn sink(&self, role: &RoomRole) -> Option<EventSink> {
        self.sinks.lock().get(role).cloned()
    }

    /// ICE servers passed to the most recent attach for `role`
    #[must_use]
    pub fn ice_servers_for(&self, role: &RoomRole) -> Option<Vec<IceServer>> {
        self.ice_servers.lock().get(role).cloned()
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for MockGateway {
    async fn attach(
        &self,
        role: RoomRole,
        ice_servers: &[IceServer],
        sink: EventSink,
    ) -> Result<Arc<dyn PluginHandle>, GatewayError> {
        if self.failing_attach.lock().contains(&role) {
            return Err(GatewayError::Attach(format!("mock attach failure for {role}")));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(MockHandle::new(id, role.clone()));
        if self.failing_release.lock().contains(&role) {
            handle.fail_release(true);
        }
        self.handles.lock().push(Arc::clone(&handle));
        self.ice_servers.lock().insert(role.clone(), ice_servers.to_vec());
        self.sinks.lock().insert(role, sink);
        Ok(handle as Arc<dyn PluginHandle>)
    }

    async fn destroy(&self) -> Result<(), GatewayError> {
        self.destroyed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Capture devices returning a fixed result
#[derive(Debug)]
pub struct MockDevices {
    result: Mutex<Result<(), CaptureError>>,
    last_constraints: Mutex<Option<CaptureConfig>>,
    captured: Mutex<Vec<MediaStream>>,
}

impl MockDevices {
    /// Devices that grant one audio and one video track
    #[must_use]
    pub fn granting() -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Ok(())),
            last_constraints: Mutex::new(None),
            captured: Mutex::new(Vec::new()),
        })
    }

    /// Devices that always fail with `error`
    #[must_use]
    pub fn failing(error: CaptureError) -> Arc<Self> {
        Arc::new(Self {
            result: Mutex::new(Err(error)),
            last_constraints: Mutex::new(None),
            captured: Mutex::new(Vec::new()),
        })
    }

    #[must_use]
    pub fn last_constraints(&self) -> Option<CaptureConfig> {
        *self.last_constraints.lock()
    }

    /// Streams handed out so far
    #[must_use]
    pub fn captured(&self) -> Vec<MediaStream> {
        self.captured.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn get_user_media(&self, constraints: &CaptureConfig) -> Result<MediaStream, CaptureError> {
        *self.last_constraints.lock() = Some(*constraints);
        self.result.lock().clone()?;

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::with_label("local-audio", TrackKind::Audio, "microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::with_label("local-video", TrackKind::Video, "camera"));
        }
        let stream = MediaStream::from_tracks(tracks);
        self.captured.lock().push(stream.clone());
        Ok(stream)
    }
}
