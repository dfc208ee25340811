//! Media gateway seam
//!
//! The gateway client library (session setup, SDP, ICE, transport) lives
//! outside this crate. It is consumed through two traits:
//!
//! - [`Gateway`] attaches plugin handles for the publisher or a subscriber role
//! - [`PluginHandle`] sends requests and drives offer/answer on one handle
//!
//! Asynchronous deliveries (messages, remote tracks, cleanup) come back
//! through the [`EventSink`] handed to `attach`. They all end up on one
//! channel consumed by the session's event loop.

use crate::config::IceServer;
use crate::error::GatewayError;
use crate::message::{Jsep, RoomMessage, RoomRequest};
use crate::track::MediaTrack;
use crate::types::{FeedId, MediaLine};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Which side of the room a handle serves
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomRole {
    Publisher,
    Subscriber(FeedId),
}

impl fmt::Display for RoomRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publisher => write!(f, "publisher"),
            Self::Subscriber(feed) => write!(f, "subscriber({feed})"),
        }
    }
}

/// Media the local side offers or accepts during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiationMedia {
    pub audio_send: bool,
    pub video_send: bool,
    pub audio_recv: bool,
    pub video_recv: bool,
}

impl NegotiationMedia {
    /// Publisher offer: send audio and video, receive nothing.
    #[must_use]
    pub const fn send_only() -> Self {
        Self {
            audio_send: true,
            video_send: true,
            audio_recv: false,
            video_recv: false,
        }
    }

    /// Subscriber answer: receive only, never send media back.
    #[must_use]
    pub const fn receive_only() -> Self {
        Self {
            audio_send: false,
            video_send: false,
            audio_recv: true,
            video_recv: true,
        }
    }
}

/// One attached plugin handle
#[async_trait]
pub trait PluginHandle: Send + Sync {
    /// Gateway-assigned handle identifier, for logging
    fn id(&self) -> u64;

    async fn send(&self, request: RoomRequest, jsep: Option<Jsep>) -> Result<(), GatewayError>;

    async fn create_offer(&self, media: NegotiationMedia) -> Result<Jsep, GatewayError>;

    async fn create_answer(&self, offer: Jsep, media: NegotiationMedia) -> Result<Jsep, GatewayError>;

    async fn handle_remote_jsep(&self, jsep: Jsep) -> Result<(), GatewayError>;

    /// Close the peer connection. Must tolerate an already-broken handle by
    /// returning an error rather than panicking.
    async fn hangup(&self) -> Result<(), GatewayError>;

    /// Release the handle on the gateway.
    async fn detach(&self) -> Result<(), GatewayError>;
}

/// The gateway connection
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Attach a handle for `role`. Its peer connection gathers candidates
    /// against `ice_servers`.
    async fn attach(
        &self,
        role: RoomRole,
        ice_servers: &[IceServer],
        sink: EventSink,
    ) -> Result<Arc<dyn PluginHandle>, GatewayError>;

    /// Tear down the gateway session itself.
    async fn destroy(&self) -> Result<(), GatewayError>;
}

/// ICE connection state as reported by a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Something a handle reported asynchronously
#[derive(Debug, Clone)]
pub enum HandleEvent {
    Message {
        body: RoomMessage,
        jsep: Option<Jsep>,
    },
    RemoteTrack {
        track: MediaTrack,
        mid: MediaLine,
        added: bool,
    },
    /// The handle's peer connection went away
    Cleanup,
    WebrtcState(bool),
    IceState(IceState),
}

/// A handle event tagged with the role and subscription tag of the handle
/// that produced it
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub role: RoomRole,
    /// Distinguishes successive subscriptions to the same feed, so late events
    /// from a released handle are not applied to its replacement
    pub tag: u64,
    pub event: HandleEvent,
}

/// Where a handle delivers its asynchronous events
///
/// Sends never block; if the session loop has gone away the event is dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    role: RoomRole,
    tag: u64,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl EventSink {
    #[must_use]
    pub fn new(role: RoomRole, tag: u64, tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self { role, tag, tx }
    }

    #[must_use]
    pub fn tag(&self) -> u64 {
        self.tag
    }

    #[must_use]
    pub fn role(&self) -> &RoomRole {
        &self.role
    }

    pub fn message(&self, body: RoomMessage, jsep: Option<Jsep>) {
        self.emit(HandleEvent::Message { body, jsep });
    }

    pub fn remote_track(&self, track: MediaTrack, mid: impl Into<MediaLine>, added: bool) {
        self.emit(HandleEvent::RemoteTrack {
            track,
            mid: mid.into(),
            added,
        });
    }

    pub fn cleanup(&self) {
        self.emit(HandleEvent::Cleanup);
    }

    pub fn webrtc_state(&self, up: bool) {
        self.emit(HandleEvent::WebrtcState(up));
    }

    pub fn ice_state(&self, state: IceState) {
        self.emit(HandleEvent::IceState(state));
    }

    fn emit(&self, event: HandleEvent) {
        let event = GatewayEvent {
            role: self.role.clone(),
            tag: self.tag,
            event,
        };
        if self.tx.send(event).is_err() {
            trace!(role = %self.role, "Session loop gone, dropping handle event");
        }
    }
}
