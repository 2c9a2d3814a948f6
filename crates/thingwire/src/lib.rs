//! Device-side core of a binary IoT protocol.
//!
//! thingwire frames typed property and service traffic into a compact
//! binary envelope, chunks large messages, correlates responses with
//! blocking requests, and exposes a small client API for devices.
//!
//! # Crate Structure
//!
//! - [`transport`]: Message and byte-stream transport traits, plus an in-memory pair
//! - [`codec`]: Stream buffer, primitives, data shapes, and info tables
//! - [`frame`]: Message envelope, bodies, chunking, and multipart reassembly
//! - [`peer`]: Request correlation, callbacks, tasker, and [`peer::Client`] (behind `peer` feature)
//! - [`logging`]: `tracing-subscriber` setup (behind `logging` feature)

/// Re-export transport types.
pub mod transport {
    pub use thingwire_transport::*;
}

/// Re-export codec types.
pub mod codec {
    pub use thingwire_codec::*;
}

/// Re-export frame types.
pub mod frame {
    pub use thingwire_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use thingwire_peer::*;
}

#[cfg(feature = "logging")]
pub mod logging;
