use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent};

type Responder = Box<dyn FnMut(&SentMessage) -> Vec<TransportEvent> + Send>;

/// A message captured by [`MemoryTransport::send_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub data: Bytes,
    pub is_text: bool,
}

#[derive(Default)]
struct Shared {
    connected: bool,
    refuse_connect: bool,
    fail_sends: bool,
    fail_receives: bool,
    auto_pong: bool,
    inbound: VecDeque<TransportEvent>,
    sent: Vec<SentMessage>,
    pings: Vec<Bytes>,
    pongs: Vec<Bytes>,
    connects: usize,
    disconnect_reasons: Vec<String>,
    responder: Option<Responder>,
}

struct Channel {
    state: Mutex<Shared>,
    ready: Condvar,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process [`Transport`] whose far side is a [`MemoryPeer`] handle.
///
/// Everything sent is recorded on the peer; everything the peer pushes is
/// handed out by `receive`. An optional responder closure turns each sent
/// message into inbound events, which lets a single thread exercise a full
/// request/response exchange.
pub struct MemoryTransport {
    channel: Arc<Channel>,
}

/// The controlling side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    channel: Arc<Channel>,
}

impl MemoryTransport {
    /// Create a connected-on-demand transport and its controlling peer.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let channel = Arc::new(Channel {
            state: Mutex::new(Shared::default()),
            ready: Condvar::new(),
        });
        (
            MemoryTransport {
                channel: Arc::clone(&channel),
            },
            MemoryPeer { channel },
        )
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, _timeout: Duration) -> Result<()> {
        let mut state = self.channel.lock();
        if state.refuse_connect {
            return Err(TransportError::Connect {
                addr: "memory".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "memory peer refused connection",
                ),
            });
        }
        state.connected = true;
        state.connects += 1;
        debug!(connects = state.connects, "memory transport connected");
        Ok(())
    }

    fn disconnect(&mut self, reason: &str) -> Result<()> {
        let mut state = self.channel.lock();
        state.connected = false;
        state.disconnect_reasons.push(reason.to_string());
        debug!(reason, "memory transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel.lock().connected
    }

    fn send_message(&mut self, data: &[u8], is_text: bool) -> Result<()> {
        let mut state = self.channel.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.fail_sends {
            return Err(TransportError::WriteFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "memory peer rejected write",
            )));
        }
        let sent = SentMessage {
            data: Bytes::copy_from_slice(data),
            is_text,
        };
        trace!(len = data.len(), is_text, "memory transport send");
        if let Some(responder) = state.responder.as_mut() {
            let replies = responder(&sent);
            state.inbound.extend(replies);
        }
        state.sent.push(sent);
        drop(state);
        self.channel.ready.notify_all();
        Ok(())
    }

    fn send_ping(&mut self, payload: &[u8]) -> Result<()> {
        let mut state = self.channel.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let payload = Bytes::copy_from_slice(payload);
        if state.auto_pong {
            state.inbound.push_back(TransportEvent::Pong(payload.clone()));
        }
        state.pings.push(payload);
        drop(state);
        self.channel.ready.notify_all();
        Ok(())
    }

    fn send_pong(&mut self, payload: &[u8]) -> Result<()> {
        let mut state = self.channel.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.pongs.push(Bytes::copy_from_slice(payload));
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        let state = self.channel.lock();
        if state.fail_receives {
            return Err(TransportError::ReadFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "memory peer reset the read side",
            )));
        }
        let (mut state, _) = self
            .channel
            .ready
            .wait_timeout_while(state, timeout, |s| s.inbound.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        Ok(state.inbound.pop_front())
    }
}

impl MemoryPeer {
    /// Queue an inbound event.
    pub fn push_event(&self, event: TransportEvent) {
        self.channel.lock().inbound.push_back(event);
        self.channel.ready.notify_all();
    }

    /// Queue an inbound binary message.
    pub fn push_binary(&self, data: impl Into<Bytes>) {
        self.push_event(TransportEvent::Binary(data.into()));
    }

    /// Force the connected flag (simulates a dropped or restored link).
    pub fn set_connected(&self, connected: bool) {
        self.channel.lock().connected = connected;
    }

    /// Whether the transport side currently considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.channel.lock().connected
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_refuse_connect(&self, refuse: bool) {
        self.channel.lock().refuse_connect = refuse;
    }

    /// Make subsequent sends fail with a write error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.channel.lock().fail_sends = fail;
    }

    /// Make subsequent receives fail with a read error.
    pub fn set_fail_receives(&self, fail: bool) {
        self.channel.lock().fail_receives = fail;
    }

    /// Answer every ping with a pong carrying the same payload.
    pub fn set_auto_pong(&self, enabled: bool) {
        self.channel.lock().auto_pong = enabled;
    }

    /// Install a closure that produces inbound events for each sent message.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&SentMessage) -> Vec<TransportEvent> + Send + 'static,
    {
        self.channel.lock().responder = Some(Box::new(responder));
    }

    /// Remove the responder.
    pub fn clear_responder(&self) {
        self.channel.lock().responder = None;
    }

    /// Drain every message sent so far.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.channel.lock().sent)
    }

    /// Number of messages sent and not yet drained.
    pub fn sent_count(&self) -> usize {
        self.channel.lock().sent.len()
    }

    /// Payloads of every ping sent.
    pub fn pings(&self) -> Vec<Bytes> {
        self.channel.lock().pings.clone()
    }

    /// Payloads of every pong sent.
    pub fn pongs(&self) -> Vec<Bytes> {
        self.channel.lock().pongs.clone()
    }

    /// Number of successful `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.channel.lock().connects
    }

    /// Reasons passed to `disconnect`, oldest first.
    pub fn disconnect_reasons(&self) -> Vec<String> {
        self.channel.lock().disconnect_reasons.clone()
    }

    /// Number of queued inbound events.
    pub fn pending_inbound(&self) -> usize {
        self.channel.lock().inbound.len()
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.channel.lock();
        f.debug_struct("MemoryTransport")
            .field("connected", &state.connected)
            .field("inbound", &state.inbound.len())
            .field("sent", &state.sent.len())
            .finish()
    }
}
