//! Local capture seam

use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::track::MediaStream;
use async_trait::async_trait;

/// Access to the local camera and microphone
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a local stream matching `constraints`.
    async fn get_user_media(&self, constraints: &CaptureConfig) -> Result<MediaStream, CaptureError>;
}
