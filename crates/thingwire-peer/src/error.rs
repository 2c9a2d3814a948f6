use std::time::Duration;

use crate::status::StatusCode;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] thingwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] thingwire_frame::FrameError),

    /// Value encoding or table access error.
    #[error("codec error: {0}")]
    Codec(#[from] thingwire_codec::CodecError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading a configuration file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The request could not be handed to the transport.
    #[error("failed to send request {request_id}: {source}")]
    SendFailed {
        request_id: u32,
        #[source]
        source: thingwire_frame::FrameError,
    },

    /// No response arrived before the deadline.
    #[error("request {request_id} timed out after {timeout:?}")]
    Timeout { request_id: u32, timeout: Duration },

    /// The server answered with a non-success status.
    #[error("request failed with status {0}")]
    Status(StatusCode),

    /// The client is offline and cannot send.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Every tasker slot is in use.
    #[error("max tasks exceeded ({max} slots)")]
    MaxTasksExceeded { max: usize },

    /// No task with this id exists.
    #[error("task {0} not found")]
    TaskNotFound(usize),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PeerError {
    /// The application status code this error is reported as.
    pub fn status(&self) -> StatusCode {
        match self {
            PeerError::Status(code) => *code,
            PeerError::Timeout { .. } => StatusCode::GatewayTimeout,
            PeerError::SendFailed { .. } | PeerError::Transport(_) => {
                StatusCode::PreconditionFailed
            }
            PeerError::Frame(err) if err.is_not_connected() => StatusCode::PreconditionFailed,
            PeerError::Frame(thingwire_frame::FrameError::MessageTooLarge { .. }) => {
                StatusCode::EntityTooLarge
            }
            PeerError::ServiceUnavailable(_) => StatusCode::ServiceUnavailable,
            PeerError::Codec(_) | PeerError::InvalidConfig(_) => StatusCode::BadRequest,
            PeerError::Frame(_)
            | PeerError::Json(_)
            | PeerError::Io(_)
            | PeerError::MaxTasksExceeded { .. }
            | PeerError::TaskNotFound(_) => StatusCode::InternalServerError,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
