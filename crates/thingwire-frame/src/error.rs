use thingwire_codec::CodecError;
use thingwire_transport::TransportError;

/// Errors that can occur during message encoding, decoding, chunking or
/// reassembly.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A value inside the message could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The transport rejected a send.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The header carries a code with no known body layout.
    #[error("unhandled message code 0x{0:02x}")]
    UnknownCode(u8),

    /// A constructor was given a code of the wrong kind.
    #[error("code 0x{code:02x} is not a valid {expected} code")]
    InvalidCode { code: u8, expected: &'static str },

    /// A multipart chunk number is zero or beyond the declared count.
    #[error("chunk {chunk_id} out of range (chunk count {chunk_count})")]
    ChunkOutOfRange { chunk_id: u16, chunk_count: u16 },

    /// A message would exceed the maximum reassembled size.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Splitting a body would need more chunks than the 2-byte count allows.
    #[error("message needs {count} chunks (max 65535)")]
    TooManyChunks { count: usize },

    /// The chunk size cannot carry payload after the headers, or does not
    /// fit the 2-byte sub-header field.
    #[error("chunk size {chunk_size} is unusable ({overhead} bytes of headers per chunk)")]
    InvalidChunkSize { chunk_size: usize, overhead: usize },

    /// A message without a multipart body was handed to the reassembler.
    #[error("message {request_id} is not a multipart chunk")]
    NotMultipart { request_id: u32 },

    /// The offline store has no room for another frame.
    #[error("offline store full ({queued} of {max} bytes queued, frame is {size})")]
    OfflineStoreFull {
        size: usize,
        queued: usize,
        max: usize,
    },
}

impl FrameError {
    /// Whether this error means the transport is not connected.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, FrameError::Transport(err) if err.is_not_connected())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
