use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;

/// A raw, connection-oriented byte pipe.
///
/// This is the surface a WebSocket or TLS implementation sits on. Reads and
/// writes carry their own timeout so callers can poll without blocking
/// indefinitely.
pub trait ByteStream: Send {
    /// Open the connection.
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()>;

    /// Read up to `buf.len()` bytes. Returns `Ok(0)` when nothing arrived
    /// before `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;

    /// Whether the connection is currently open.
    fn is_connected(&self) -> bool;

    /// Close the connection. Closing an already-closed stream is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Something that happened on a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection was established.
    Connected,
    /// The connection was closed, with an optional reason.
    Closed(Option<String>),
    /// A ping was received.
    Ping(Bytes),
    /// A pong was received.
    Pong(Bytes),
    /// A text message was received.
    Text(String),
    /// A binary message was received.
    Binary(Bytes),
}

/// A framed, message-oriented transport.
///
/// Each `send_message` call produces exactly one message on the far side;
/// `receive` hands back at most one event per call.
pub trait Transport: Send {
    /// Establish the connection.
    fn connect(&mut self, timeout: Duration) -> Result<()>;

    /// Close the connection with a reason.
    fn disconnect(&mut self, reason: &str) -> Result<()>;

    /// Whether the transport is currently connected.
    fn is_connected(&self) -> bool;

    /// Send one complete message.
    fn send_message(&mut self, data: &[u8], is_text: bool) -> Result<()>;

    /// Send a ping control frame.
    fn send_ping(&mut self, payload: &[u8]) -> Result<()>;

    /// Send a pong control frame.
    fn send_pong(&mut self, payload: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for the next event.
    fn receive(&mut self, timeout: Duration) -> Result<Option<TransportEvent>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self, timeout: Duration) -> Result<()> {
        (**self).connect(timeout)
    }

    fn disconnect(&mut self, reason: &str) -> Result<()> {
        (**self).disconnect(reason)
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn send_message(&mut self, data: &[u8], is_text: bool) -> Result<()> {
        (**self).send_message(data, is_text)
    }

    fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send_ping(payload)
    }

    fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        (**self).send_pong(payload)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        (**self).receive(timeout)
    }
}
