use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, Transport, TransportEvent};

/// Frame header: opcode (1) + length (4) = 5 bytes.
pub const FRAME_HEADER_SIZE: usize = 5;

/// Default maximum frame payload: 16 MiB.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 8 * 1024;
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// A [`Transport`] that carries length-prefixed frames over any
/// [`ByteStream`].
///
/// Wire format:
/// ```text
/// ┌──────────┬─────────────┬──────────────────┐
/// │ Opcode   │ Length      │ Payload          │
/// │ (1B)     │ (4B BE)     │ (Length bytes)   │
/// └──────────┴─────────────┴──────────────────┘
/// ```
///
/// Opcodes follow the WebSocket numbering (text, binary, close, ping, pong)
/// so a WebSocket layer can replace this one without touching the peer.
pub struct StreamTransport<S: ByteStream> {
    stream: S,
    host: String,
    port: u16,
    max_frame: usize,
    write_timeout: Duration,
    buf: BytesMut,
}

impl<S: ByteStream> StreamTransport<S> {
    /// Wrap `stream`; `connect` will dial `host:port`.
    pub fn new(stream: S, host: impl Into<String>, port: u16) -> Self {
        Self {
            stream,
            host: host.into(),
            port,
            max_frame: DEFAULT_MAX_FRAME,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
        }
    }

    /// Set the largest frame payload accepted in either direction.
    pub fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    /// Set the timeout applied to each write on the underlying stream.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consume the transport, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn write_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<()> {
        if !self.stream.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if payload.len() > self.max_frame {
            return Err(TransportError::MalformedFrame(format!(
                "outgoing frame of {} bytes exceeds {}",
                payload.len(),
                self.max_frame
            )));
        }

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u8(opcode);
        frame.put_u32(payload.len() as u32);
        frame.put_slice(payload);

        let mut written = 0;
        while written < frame.len() {
            let n = self.stream.write(&frame[written..], self.write_timeout)?;
            if n == 0 {
                return Err(TransportError::WriteFailed(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "byte stream accepted no data",
                )));
            }
            written += n;
        }
        trace!(opcode, len = payload.len(), "frame sent");
        Ok(())
    }

    /// Pull one complete frame out of the read buffer, if there is one.
    fn decode_next(&mut self) -> Result<Option<TransportEvent>> {
        if self.buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let opcode = self.buf[0];
        let len =
            u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;
        if len > self.max_frame {
            return Err(TransportError::MalformedFrame(format!(
                "incoming frame of {len} bytes exceeds {}",
                self.max_frame
            )));
        }
        if self.buf.len() < FRAME_HEADER_SIZE + len {
            self.buf.reserve(FRAME_HEADER_SIZE + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_SIZE);
        let payload = self.buf.split_to(len).freeze();
        trace!(opcode, len, "frame received");

        let event = match opcode {
            OP_TEXT => TransportEvent::Text(utf8(payload)?),
            OP_BINARY => TransportEvent::Binary(payload),
            OP_PING => TransportEvent::Ping(payload),
            OP_PONG => TransportEvent::Pong(payload),
            OP_CLOSE => {
                let reason = if payload.is_empty() {
                    None
                } else {
                    Some(utf8(payload)?)
                };
                debug!(?reason, "close frame received");
                self.stream.close()?;
                self.buf.clear();
                TransportEvent::Closed(reason)
            }
            other => {
                return Err(TransportError::MalformedFrame(format!(
                    "unknown opcode {other:#04x}"
                )))
            }
        };
        Ok(Some(event))
    }
}

fn utf8(payload: Bytes) -> Result<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|err| TransportError::MalformedFrame(format!("text frame is not UTF-8: {err}")))
}

impl<S: ByteStream> Transport for StreamTransport<S> {
    fn connect(&mut self, timeout: Duration) -> Result<()> {
        self.buf.clear();
        self.stream.connect(&self.host, self.port, timeout)
    }

    fn disconnect(&mut self, reason: &str) -> Result<()> {
        if !self.stream.is_connected() {
            return Ok(());
        }
        if let Err(err) = self.write_frame(OP_CLOSE, reason.as_bytes()) {
            warn!(error = %err, "close frame not delivered");
        }
        self.buf.clear();
        self.stream.close()
    }

    fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    fn send_message(&mut self, data: &[u8], is_text: bool) -> Result<()> {
        let opcode = if is_text { OP_TEXT } else { OP_BINARY };
        self.write_frame(opcode, data)
    }

    fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(OP_PING, payload)
    }

    fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(OP_PONG, payload)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(event) = self.decode_next()? {
                return Ok(Some(event));
            }
            if !self.stream.is_connected() {
                return Err(TransportError::NotConnected);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let n = self.stream.read(&mut chunk, remaining)?;
            if n == 0 && Instant::now() >= deadline {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<S: ByteStream> std::fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("connected", &self.stream.is_connected())
            .field("buffered", &self.buf.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Scripted stream: reads hand out `incoming` in pieces of at most
    /// `read_limit` bytes, writes are captured.
    #[derive(Default)]
    struct ScriptedStream {
        connected: bool,
        incoming: VecDeque<u8>,
        read_limit: usize,
        written: Vec<u8>,
        dialed: Option<(String, u16)>,
    }

    impl ScriptedStream {
        fn connected(incoming: &[u8], read_limit: usize) -> Self {
            Self {
                connected: true,
                incoming: incoming.iter().copied().collect(),
                read_limit,
                ..Self::default()
            }
        }
    }

    impl ByteStream for ScriptedStream {
        fn connect(&mut self, host: &str, port: u16, _timeout: Duration) -> Result<()> {
            self.dialed = Some((host.to_string(), port));
            self.connected = true;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let n = buf.len().min(self.read_limit).min(self.incoming.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.incoming.pop_front().unwrap();
            }
            Ok(n)
        }

        fn write(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize> {
            // Accept at most 3 bytes per call to exercise the write loop.
            let n = buf.len().min(3);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn close(&mut self) -> Result<()> {
            self.connected = false;
            Ok(())
        }
    }

    fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![opcode];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn connect_dials_configured_address() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "gw.local", 8443);
        assert!(!transport.is_connected());
        transport.connect(Duration::from_secs(1)).unwrap();
        assert!(transport.is_connected());
        assert_eq!(
            transport.get_ref().dialed,
            Some(("gw.local".to_string(), 8443))
        );
    }

    #[test]
    fn sends_are_length_prefixed() {
        let mut transport = StreamTransport::new(ScriptedStream::connected(&[], 1), "h", 1);
        transport.send_message(b"abc", false).unwrap();
        transport.send_message(b"hi", true).unwrap();
        transport.send_ping(b"p").unwrap();

        let mut expected = frame(OP_BINARY, b"abc");
        expected.extend(frame(OP_TEXT, b"hi"));
        expected.extend(frame(OP_PING, b"p"));
        assert_eq!(transport.into_inner().written, expected);
    }

    #[test]
    fn frames_split_across_reads_are_reassembled() {
        let mut wire = frame(OP_BINARY, b"hello world");
        wire.extend(frame(OP_TEXT, b"text"));
        wire.extend(frame(OP_PONG, b""));
        let mut transport = StreamTransport::new(ScriptedStream::connected(&wire, 2), "h", 1);

        assert_eq!(
            transport.receive(Duration::from_millis(50)).unwrap(),
            Some(TransportEvent::Binary(Bytes::from_static(b"hello world")))
        );
        assert_eq!(
            transport.receive(Duration::from_millis(50)).unwrap(),
            Some(TransportEvent::Text("text".to_string()))
        );
        assert_eq!(
            transport.receive(Duration::from_millis(50)).unwrap(),
            Some(TransportEvent::Pong(Bytes::new()))
        );
        assert_eq!(transport.receive(Duration::from_millis(5)).unwrap(), None);
    }

    #[test]
    fn close_frame_closes_the_stream() {
        let wire = frame(OP_CLOSE, b"server shutdown");
        let mut transport = StreamTransport::new(ScriptedStream::connected(&wire, 64), "h", 1);
        assert_eq!(
            transport.receive(Duration::from_millis(50)).unwrap(),
            Some(TransportEvent::Closed(Some("server shutdown".to_string())))
        );
        assert!(!transport.is_connected());
        assert!(transport.receive(Duration::ZERO).unwrap_err().is_not_connected());
    }

    #[test]
    fn oversized_and_unknown_frames_are_rejected() {
        let stream = ScriptedStream::connected(&frame(OP_BINARY, &[0; 32]), 64);
        let mut transport = StreamTransport::new(stream, "h", 1).with_max_frame(16);
        assert!(matches!(
            transport.receive(Duration::from_millis(50)),
            Err(TransportError::MalformedFrame(_))
        ));
        assert!(matches!(
            transport.send_message(&[0; 17], false),
            Err(TransportError::MalformedFrame(_))
        ));

        let stream = ScriptedStream::connected(&frame(0x7, b"x"), 64);
        let mut transport = StreamTransport::new(stream, "h", 1);
        assert!(matches!(
            transport.receive(Duration::from_millis(50)),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn disconnect_sends_close_reason() {
        let mut transport = StreamTransport::new(ScriptedStream::connected(&[], 1), "h", 1);
        transport.disconnect("bye").unwrap();
        assert!(!transport.is_connected());
        assert_eq!(transport.into_inner().written, frame(OP_CLOSE, b"bye"));
    }

    #[test]
    fn unconnected_sends_fail() {
        let mut transport = StreamTransport::new(ScriptedStream::default(), "h", 1);
        assert!(transport.send_message(b"x", false).unwrap_err().is_not_connected());
        transport.disconnect("noop").expect("disconnecting twice is a no-op");
    }
}
