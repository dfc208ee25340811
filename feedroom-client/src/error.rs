use thiserror::Error;

use crate::gateway::RoomRole;

/// Failures reported by the media gateway collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("attach failed: {0}")]
    Attach(String),

    #[error("request '{verb}' failed: {reason}")]
    Request { verb: &'static str, reason: String },

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("release failed: {0}")]
    Release(String),

    #[error("gateway connection closed")]
    Closed,
}

/// Failures acquiring local capture
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture permission denied")]
    Denied,

    #[error("capture device unavailable: {0}")]
    Unavailable(String),
}

/// Session-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("publisher attach failed: {0}")]
    PublisherAttach(#[source] GatewayError),

    #[error("publisher join failed: {0}")]
    PublisherJoin(#[source] GatewayError),

    #[error("session already stopped")]
    Stopped,
}

/// Why a feed left the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalCause {
    Departed,
    TerminalError(u16),
    LastTrackRemoved,
    HandleCleanup,
    AttachFailed(GatewayError),
    NegotiationFailed(GatewayError),
    Teardown,
}

impl std::fmt::Display for RemovalCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Departed => write!(f, "departed"),
            Self::TerminalError(code) => write!(f, "terminal error {code}"),
            Self::LastTrackRemoved => write!(f, "last track removed"),
            Self::HandleCleanup => write!(f, "handle cleanup"),
            Self::AttachFailed(e) => write!(f, "attach failed: {e}"),
            Self::NegotiationFailed(e) => write!(f, "negotiation failed: {e}"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

/// A release call that failed during teardown; logged, never propagated
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("releasing {role} handle failed: {source}")]
pub struct ReleaseFailure {
    pub role: RoomRole,
    #[source]
    pub source: GatewayError,
}

pub type Result<T> = std::result::Result<T, SessionError>;
