//! Transcript replay
//!
//! Drives a session over the in-memory gateway from a recorded signaling
//! transcript, one JSON object per line:
//!
//! ```text
//! {"event": "message", "body": {"videoroom": "joined", "id": 7, "publishers": [{"id": 9}]}}
//! {"feed": 9, "event": "message", "body": {"videoroom": "attached"}, "jsep": {"type": "offer", "sdp": "..."}}
//! {"feed": 9, "event": "track", "id": "a9", "kind": "audio", "mid": "0", "added": true}
//! {"feed": 9, "event": "cleanup"}
//! {"event": "toggle_audio"}
//! ```
//!
//! Entries without `feed` are delivered on the publish handle. Blank lines
//! and lines starting with `#` are skipped.

use anyhow::Context;
use feedroom_client::mock::{MockDevices, MockGateway};
use feedroom_client::{
    ClientConfig, FeedId, Gateway, Jsep, MediaDevices, MediaTrack, RoomMessage, RoomRole,
    SessionController, StartOutcome, TeardownReport, TrackKind,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct TranscriptEntry {
    #[serde(default)]
    feed: Option<FeedId>,
    #[serde(flatten)]
    event: TranscriptEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum TranscriptEvent {
    Message {
        body: RoomMessage,
        #[serde(default)]
        jsep: Option<Jsep>,
    },
    Track {
        id: String,
        kind: TrackKind,
        mid: String,
        added: bool,
    },
    Cleanup,
    ToggleAudio,
    ToggleVideo,
    ToggleRemoteAudio,
}

/// What a replay did
#[derive(Debug)]
pub struct ReplaySummary {
    pub start: StartOutcome,
    pub applied: usize,
    pub skipped: usize,
    /// Feeds on screen after the last entry
    pub final_feeds: Vec<FeedId>,
    pub teardown: TeardownReport,
}

/// Replay the transcript at `path` against a fresh session.
pub async fn replay_file(path: &Path, config: ClientConfig) -> anyhow::Result<ReplaySummary> {
    let transcript = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading transcript {}", path.display()))?;
    replay(&transcript, config).await
}

pub async fn replay(transcript: &str, config: ClientConfig) -> anyhow::Result<ReplaySummary> {
    let gateway = MockGateway::new();
    let devices = MockDevices::granting();
    let room = config.room.clone();
    let mut session = SessionController::new(
        config,
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        devices as Arc<dyn MediaDevices>,
    );

    let start = session.start(room).await?;
    info!(outcome = ?start, display = session.display_name(), "Session started");

    let mut applied = 0;
    let mut skipped = 0;
    // Tracks are shared handles; a removal must refer to the track that was added.
    let mut tracks: std::collections::HashMap<String, MediaTrack> = std::collections::HashMap::new();

    for (index, line) in transcript.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let entry: TranscriptEntry = serde_json::from_str(line)
            .with_context(|| format!("transcript line {line_no} is not a valid entry"))?;

        let role = entry
            .feed
            .clone()
            .map_or(RoomRole::Publisher, RoomRole::Subscriber);

        match entry.event {
            TranscriptEvent::ToggleAudio => {
                session.toggle_local_audio();
            }
            TranscriptEvent::ToggleVideo => {
                session.toggle_local_video();
            }
            TranscriptEvent::ToggleRemoteAudio => {
                session.toggle_remote_audio();
            }
            event => {
                let Some(sink) = gateway.sink(&role) else {
                    warn!(line = line_no, role = %role, "No handle attached for entry, skipping");
                    skipped += 1;
                    continue;
                };
                match event {
                    TranscriptEvent::Message { body, jsep } => sink.message(body, jsep),
                    TranscriptEvent::Track { id, kind, mid, added } => {
                        let track = tracks
                            .entry(id.clone())
                            .or_insert_with(|| MediaTrack::new(id, kind))
                            .clone();
                        sink.remote_track(track, mid, added);
                    }
                    TranscriptEvent::Cleanup => sink.cleanup(),
                    TranscriptEvent::ToggleAudio
                    | TranscriptEvent::ToggleVideo
                    | TranscriptEvent::ToggleRemoteAudio => {}
                }
            }
        }

        session.drain_pending().await;
        applied += 1;

        let view = session.view();
        debug!(
            line = line_no,
            feeds = ?view.feed_ids(),
            audio = view.audio_enabled,
            video = view.video_enabled,
            remote_muted = view.remote_audio_muted,
            "View after entry"
        );
    }

    let final_feeds = session.view().feed_ids();
    info!(applied, skipped, feeds = ?final_feeds, "Transcript replayed");

    let teardown = session.stop().await;
    Ok(ReplaySummary {
        start,
        applied,
        skipped,
        final_feeds,
        teardown,
    })
}
