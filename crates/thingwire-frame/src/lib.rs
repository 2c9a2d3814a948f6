//! Message envelope, chunking, and reassembly for the thingwire protocol.
//!
//! Every physical frame starts with a 15-byte header:
//! - a 1-byte protocol version and a 1-byte message code
//! - 4-byte big-endian request, endpoint, and session ids
//! - a 1-byte multipart flag
//!
//! Messages larger than the configured chunk size are split by
//! [`MessageWriter`] and put back together by [`MessageReader`]. Requests
//! that cannot be sent while the transport is down can be parked in an
//! [`OfflineStore`] and replayed later.

pub mod body;
pub mod codec;
pub mod codes;
pub mod error;
pub mod multipart;
pub mod offline;
pub mod reader;
pub mod writer;

pub use body::{
    AuthBody, BindBody, Body, GatewayInfo, Header, MultipartBody, RequestBody, ResponseBody,
    DEFAULT_GATEWAY_TYPE,
};
pub use codec::{
    FrameConfig, Message, RequestIdGenerator, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
    HEADER_SIZE, MULTIPART_HEADER_SIZE, PROTOCOL_VERSION, SESSION_ID_OFFSET,
};
pub use codes::{Characteristic, EntityType, MsgCode};
pub use error::{FrameError, Result};
pub use multipart::{MultipartStore, DEFAULT_STALE_AFTER};
pub use offline::{MemoryOfflineStore, OfflineStore, DEFAULT_OFFLINE_QUEUE_SIZE};
pub use reader::MessageReader;
pub use writer::{MessageWriter, SendOutcome};
