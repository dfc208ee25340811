//! Videoroom wire messages
//!
//! Requests we send on a plugin handle, and the event bodies the gateway
//! delivers back. Only the fields this client acts on are modelled; unknown
//! fields are ignored.

use crate::track::TrackKind;
use crate::types::{FeedId, MediaLine, RoomId};
use serde::{Deserialize, Serialize};

/// Session description exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    pub sdp: String,
}

impl Jsep {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn is_offer(&self) -> bool {
        self.kind == JsepType::Offer
    }

    #[must_use]
    pub fn is_answer(&self) -> bool {
        self.kind == JsepType::Answer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
}

/// Participant type used when joining a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantType {
    Publisher,
    Subscriber,
}

/// One `{feed, mid}` entry of a subscriber join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeStream {
    pub feed: FeedId,
    pub mid: MediaLine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub room: RoomId,
    pub ptype: ParticipantType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<FeedId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streams: Option<Vec<SubscribeStream>>,
}

/// Request body sent through a plugin handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum RoomRequest {
    Join(JoinRequest),
    Publish,
    Start { room: RoomId },
}

impl RoomRequest {
    #[must_use]
    pub fn join_as_publisher(room: RoomId, display: String) -> Self {
        Self::Join(JoinRequest {
            room,
            ptype: ParticipantType::Publisher,
            display: Some(display),
            feed: None,
            streams: None,
        })
    }

    /// Subscriber join. With `mids` the newer multistream form is used,
    /// otherwise the single-feed form.
    #[must_use]
    pub fn join_as_subscriber(room: RoomId, feed: FeedId, mids: Option<&[MediaLine]>) -> Self {
        let streams = mids.map(|mids| {
            mids.iter()
                .map(|mid| SubscribeStream {
                    feed: feed.clone(),
                    mid: mid.clone(),
                })
                .collect()
        });
        Self::Join(JoinRequest {
            room,
            ptype: ParticipantType::Subscriber,
            display: None,
            feed: Some(feed),
            streams,
        })
    }

    /// The `request` verb, for logging
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Publish => "publish",
            Self::Start { .. } => "start",
        }
    }
}

/// One stream entry of a roster publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherStream {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<MediaLine>,
}

/// One entry of the room roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublisherInfo {
    pub id: FeedId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default)]
    pub streams: Vec<PublisherStream>,
}

impl PublisherInfo {
    pub fn new(id: impl Into<FeedId>) -> Self {
        Self {
            id: id.into(),
            display: None,
            streams: Vec::new(),
        }
    }

    /// Media lines of the publisher's audio and video streams, or `fallback`
    /// when it reported none.
    #[must_use]
    pub fn media_lines(&self, fallback: &[MediaLine]) -> Vec<MediaLine> {
        let mids: Vec<MediaLine> = self
            .streams
            .iter()
            .filter(|s| TrackKind::from_wire(&s.kind).is_some())
            .filter_map(|s| s.mid.clone())
            .filter(|m| !m.is_empty())
            .collect();
        if mids.is_empty() {
            fallback.to_vec()
        } else {
            mids
        }
    }
}

/// The `videoroom` discriminator of an event body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoRoomEvent {
    Joined,
    Event,
    Attached,
    Destroyed,
    Updated,
    Talking,
    #[serde(rename = "stopped-talking")]
    StoppedTalking,
    #[serde(other)]
    Other,
}

/// Event body delivered on a plugin handle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub videoroom: Option<VideoRoomEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FeedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publishers: Option<Vec<PublisherInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpublished: Option<FeedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaving: Option<FeedId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Value the gateway uses in `unpublished`/`leaving` to acknowledge our own
/// request rather than announce a departure.
const SELF_ACK: &str = "ok";

impl RoomMessage {
    /// The feed that unpublished or left, if this message announces one.
    #[must_use]
    pub fn departed_feed(&self) -> Option<&FeedId> {
        let departure = |id: &&FeedId| id.as_str() != SELF_ACK;
        self.unpublished
            .as_ref()
            .filter(departure)
            .or_else(|| self.leaving.as_ref().filter(departure))
    }

    #[must_use]
    pub fn is(&self, kind: &VideoRoomEvent) -> bool {
        self.videoroom.as_ref() == Some(kind)
    }
}

/// Room membership change derived from a publisher-handle message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Join confirmation with our own id and the current roster
    Joined {
        id: FeedId,
        publishers: Vec<PublisherInfo>,
    },
    /// New publishers and/or a departure
    RosterUpdate {
        publishers: Vec<PublisherInfo>,
        departed: Option<FeedId>,
    },
    /// The gateway reported an error on the publisher handle
    Error { code: Option<u16>, reason: String },
}

impl RoomEvent {
    /// Interpret a publisher-handle message. Messages that carry no roster
    /// information yield `None`.
    #[must_use]
    pub fn from_message(msg: &RoomMessage) -> Option<Self> {
        if msg.error_code.is_some() || msg.error.is_some() {
            return Some(Self::Error {
                code: msg.error_code,
                reason: msg.error.clone().unwrap_or_default(),
            });
        }
        match msg.videoroom {
            Some(VideoRoomEvent::Joined) => {
                let id = msg.id.clone()?;
                Some(Self::Joined {
                    id,
                    publishers: msg.publishers.clone().unwrap_or_default(),
                })
            }
            Some(VideoRoomEvent::Event) => {
                let publishers = msg.publishers.clone().unwrap_or_default();
                let departed = msg.departed_feed().cloned();
                if publishers.is_empty() && departed.is_none() {
                    None
                } else {
                    Some(Self::RosterUpdate {
                        publishers,
                        departed,
                    })
                }
            }
            _ => None,
        }
    }
}
