//! Value codecs for the thingwire binary protocol.
//!
//! Everything on the wire is built from three layers:
//! - [`TwStream`]: a growable byte buffer with a read cursor
//! - [`Primitive`]: a type-tagged scalar, blob, or nested table
//! - [`InfoTable`]: a [`DataShape`] (column schema) plus rows of primitives
//!
//! Multi-byte numbers are always big-endian. Strings carry a 1-byte length
//! when they are at most 127 bytes long, otherwise a 4-byte length with the
//! high bit of the first byte set.

pub mod base_type;
pub mod error;
pub mod infotable;
pub mod primitive;
pub mod stream;

pub use base_type::{BaseType, TypeFamily};
pub use error::{CodecError, Result};
pub use infotable::{DataShape, DataShapeAspect, DataShapeEntry, InfoTable, InfoTableRow};
pub use primitive::{
    encoded_string_len, string_from_stream, string_to_stream, Location, Primitive, Value,
    MAX_NESTING_DEPTH, MAX_STRING_LEN,
};
pub use stream::{TwStream, STREAM_BLOCK_SIZE};
