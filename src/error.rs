use thiserror::Error;

/// Failure taxonomy for the sync core. Only `Request` is meant to reach the
/// user; every other kind degrades an enhancement and is logged where it
/// occurs.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport-level failure or drop. Retried by the connection manager,
    /// never surfaced.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A REST fetch or mutation failed. The mirror stays at its last
    /// reconciled state.
    #[error("request failed: {detail}")]
    Request { status: Option<u16>, detail: String },

    /// OS-level push was refused for this session.
    #[error("notification permission denied")]
    PermissionDenied,

    /// Both the synthesized tone and the fallback sample failed to play.
    #[error("audio playback unavailable: {0}")]
    AudioUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn request(status: Option<u16>, detail: impl Into<String>) -> Self {
        Self::Request {
            status,
            detail: detail.into(),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
