//! Transport collaborator interfaces for thingwire.
//!
//! The SDK core never speaks WebSocket or negotiates TLS
//! itself. It consumes two narrow interfaces instead:
//! - [`ByteStream`]: a connect/read/write/close byte pipe
//! - [`Transport`]: a framed message pipe (binary/text messages plus
//!   ping/pong) with a short-timeout receive poll
//!
//! This is the lowest layer of thingwire. [`StreamTransport`] builds a
//! length-framed [`Transport`] on any [`ByteStream`] such as
//! [`TcpByteStream`]. [`MemoryTransport`] is an in-process implementation
//! used to drive the higher layers in tests and loopback setups.

pub mod error;
pub mod framed;
pub mod memory;
pub mod tcp;
pub mod traits;

pub use error::{Result, TransportError};
pub use framed::{StreamTransport, DEFAULT_MAX_FRAME, FRAME_HEADER_SIZE};
pub use memory::{MemoryPeer, MemoryTransport, SentMessage};
pub use tcp::TcpByteStream;
pub use traits::{ByteStream, Transport, TransportEvent};
