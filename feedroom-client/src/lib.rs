//! Feedroom client
//!
//! Client-side feed lifecycle controller for a videoroom on a selective
//! forwarding gateway. One session publishes local media on a publish handle
//! and opens one receive-only subscription per remote publisher, aggregating
//! each subscription's tracks into a single renderable stream.
//!
//! ## Architecture
//!
//! - **`SessionController`**: owns the publish handle and runs the event loop
//! - **`FeedRegistry`**: the only writer of remote feed state
//! - **`TrackAggregator`**: folds track add/remove events into one stream per feed
//! - **`RoomView`**: read-only projection published to the rendering layer
//! - **`Gateway`** / **`PluginHandle`**: the seam to the media gateway
//!
//! Every gateway callback is delivered as a [`GatewayEvent`] on one channel
//! and applied by the session loop, so feed state has a single writer.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use feedroom_client::{ClientConfig, RoomId, SessionController};
//!
//! let session = SessionController::new(ClientConfig::default(), gateway, devices);
//! let handle = session.spawn(RoomId::from(1234));
//! handle.toggle_audio().await?;
//! let report = handle.stop().await;
//! ```

mod aggregator;
mod capture;
mod config;
mod error;
mod feed;
mod gateway;
mod message;
pub mod mock;
mod registry;
mod session;
mod track;
mod types;
mod view;

pub use aggregator::{TrackAggregator, TrackOutcome};
pub use capture::MediaDevices;
pub use config::{CaptureConfig, ClientConfig, IceServer};
pub use error::{CaptureError, GatewayError, ReleaseFailure, RemovalCause, Result, SessionError};
pub use feed::{Feed, FeedState};
pub use gateway::{
    EventSink, Gateway, GatewayEvent, HandleEvent, IceState, NegotiationMedia, PluginHandle,
    RoomRole,
};
pub use message::{
    Jsep, JsepType, JoinRequest, ParticipantType, PublisherInfo, PublisherStream, RoomEvent,
    RoomMessage, RoomRequest, SubscribeStream, VideoRoomEvent,
};
pub use registry::{FeedRegistry, TeardownReport};
pub use session::{
    ReceiveOnlyReason, SessionCommand, SessionController, SessionHandle, SessionState,
    StartOutcome,
};
pub use track::{MediaStream, MediaTrack, TrackKind};
pub use types::{FeedId, MediaLine, RoomId, TrackId};
pub use view::{project, RemoteFeedView, RenderSink, RoomView, SinkBinding};
