use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::ByteStream;

// `set_read_timeout(Some(ZERO))` is rejected by the standard library.
const MIN_IO_TIMEOUT: Duration = Duration::from_millis(1);

/// A [`ByteStream`] over a plain TCP connection.
///
/// TLS and WebSocket layers are expected to wrap this (or their own stream)
/// outside the SDK core.
#[derive(Debug, Default)]
pub struct TcpByteStream {
    stream: Option<TcpStream>,
    addr: Option<String>,
}

impl TcpByteStream {
    /// Create an unconnected stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-connected `TcpStream`.
    pub fn from_stream(stream: TcpStream) -> Self {
        let addr = stream.peer_addr().ok().map(|a| a.to_string());
        Self {
            stream: Some(stream),
            addr,
        }
    }

    /// Address of the connected peer, if any.
    pub fn peer_addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

impl ByteStream for TcpByteStream {
    fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let addr = format!("{host}:{port}");
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout.max(MIN_IO_TIMEOUT)) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!(%addr, "tcp stream connected");
                    self.stream = Some(stream);
                    self.addr = Some(addr);
                    return Ok(());
                }
                Err(err) => {
                    debug!(%candidate, error = %err, "tcp connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(ErrorKind::NotFound, "no addresses resolved")
            }),
        })
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))?;
        loop {
            match stream.read(buf) {
                Ok(0) if !buf.is_empty() => {
                    debug!("tcp stream closed by peer");
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Ok(0)
                }
                Err(err) => return Err(TransportError::ReadFailed(err)),
            }
        }
    }

    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_write_timeout(Some(timeout.max(MIN_IO_TIMEOUT)))?;
        loop {
            match stream.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(TransportError::Timeout(timeout))
                }
                Err(err) => return Err(TransportError::WriteFailed(err)),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            match stream.shutdown(Shutdown::Both) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotConnected => {}
                Err(err) => return Err(TransportError::Io(err)),
            }
            debug!(addr = ?self.addr, "tcp stream closed");
        }
        Ok(())
    }
}
