/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Writing to the underlying connection failed.
    #[error("write failed: {0}")]
    WriteFailed(std::io::Error),

    /// Reading from the underlying connection failed.
    #[error("read failed: {0}")]
    ReadFailed(std::io::Error),

    /// An I/O error occurred on the transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation did not complete in time.
    #[error("transport operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The remote end closed the connection.
    #[error("connection closed")]
    Closed,

    /// The byte stream carried something that is not a valid frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

impl TransportError {
    /// Whether this error means "not connected" (as opposed to a failed
    /// write on a live connection).
    pub fn is_not_connected(&self) -> bool {
        matches!(self, TransportError::NotConnected | TransportError::Closed)
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
