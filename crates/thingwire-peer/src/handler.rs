use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thingwire_frame::{
    Body, FrameConfig, Message, MessageReader, MessageWriter, MsgCode, OfflineStore,
    RequestIdGenerator, SendOutcome, DEFAULT_STALE_AFTER,
};
use thingwire_transport::{Transport, TransportEvent};
use tracing::{debug, info, trace, warn};

use crate::callbacks::{status_response, RequestHandler};
use crate::error::{PeerError, Result};
use crate::pending::{PendingResponses, ResponseOutcome};
use crate::status::StatusCode;

/// How long each receive call waits while a blocking request is pending.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub type ConnectCallback = dyn FnMut() + Send;
pub type CloseCallback = dyn FnMut(Option<&str>) + Send;
/// Ping or pong callback. Receives the control frame payload.
pub type ControlCallback = dyn FnMut(&[u8]) + Send;

/// Owns the transport and correlates outgoing requests with responses.
///
/// Inbound traffic is only read while someone drives the handler, either
/// through [`send_and_wait`](Self::send_and_wait) or [`poll`](Self::poll).
/// Inbound requests are answered from inside that call.
pub struct MessageHandler<T: Transport> {
    transport: T,
    writer: MessageWriter,
    reader: MessageReader,
    pending: PendingResponses,
    ids: RequestIdGenerator,
    session_id: u32,
    offline: Option<Box<dyn OfflineStore>>,
    request_handler: Option<Arc<dyn RequestHandler>>,
    on_connect: Option<Box<ConnectCallback>>,
    on_close: Option<Box<CloseCallback>>,
    on_ping: Option<Box<ControlCallback>>,
    on_pong: Option<Box<ControlCallback>>,
    pong_received: bool,
    poll_interval: Duration,
}

impl<T: Transport> MessageHandler<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, FrameConfig::default(), DEFAULT_STALE_AFTER)
    }

    /// Create a handler with explicit chunking limits and multipart expiry.
    pub fn with_config(transport: T, config: FrameConfig, stale_after: Duration) -> Self {
        Self {
            transport,
            reader: MessageReader::with_config(&config, stale_after),
            writer: MessageWriter::with_config(config),
            pending: PendingResponses::new(),
            ids: RequestIdGenerator::new(),
            session_id: 0,
            offline: None,
            request_handler: None,
            on_connect: None,
            on_close: None,
            on_ping: None,
            on_pong: None,
            pong_received: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Queue unsendable requests in `store` while the transport is down.
    pub fn with_offline_store(mut self, store: Box<dyn OfflineStore>) -> Self {
        self.offline = Some(store);
        self
    }

    pub fn set_offline_store(&mut self, store: Option<Box<dyn OfflineStore>>) {
        self.offline = store;
    }

    pub fn offline_store(&self) -> Option<&dyn OfflineStore> {
        self.offline.as_deref()
    }

    pub fn has_offline_store(&self) -> bool {
        self.offline.is_some()
    }

    /// Handler answering inbound requests. Without one, every request gets
    /// a 404.
    pub fn set_request_handler(&mut self, handler: Arc<dyn RequestHandler>) {
        self.request_handler = Some(handler);
    }

    pub fn set_connect_callback(&mut self, callback: Option<Box<ConnectCallback>>) {
        self.on_connect = callback;
    }

    pub fn set_close_callback(&mut self, callback: Option<Box<CloseCallback>>) {
        self.on_close = callback;
    }

    pub fn set_ping_callback(&mut self, callback: Option<Box<ControlCallback>>) {
        self.on_ping = callback;
    }

    pub fn set_pong_callback(&mut self, callback: Option<Box<ControlCallback>>) {
        self.on_pong = callback;
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn writer(&self) -> &MessageWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut MessageWriter {
        &mut self.writer
    }

    pub fn reader(&self) -> &MessageReader {
        &self.reader
    }

    pub fn pending(&self) -> &PendingResponses {
        &self.pending
    }

    /// Session id assigned by the server on successful authentication.
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u32) {
        self.session_id = session_id;
    }

    pub fn next_request_id(&self) -> u32 {
        self.ids.next_id()
    }

    /// Whether a pong arrived since the last call. Clears the flag.
    pub fn take_pong_received(&mut self) -> bool {
        std::mem::take(&mut self.pong_received)
    }

    /// Send a message without waiting for a reply.
    pub fn send(&mut self, msg: &Message) -> Result<SendOutcome> {
        let offline = match self.offline.as_mut() {
            Some(store) => Some(store.as_mut() as &mut dyn OfflineStore),
            None => None,
        };
        Ok(self
            .writer
            .send(&mut self.transport, msg, self.session_id, offline)?)
    }

    /// Send whatever the offline store holds. Returns the number of frames
    /// sent.
    pub fn flush_offline(&mut self) -> usize {
        let Some(store) = self.offline.as_mut() else {
            return 0;
        };
        if store.is_empty() || !self.transport.is_connected() {
            return 0;
        }
        self.writer
            .replay_offline(&mut self.transport, self.session_id, store.as_mut())
    }

    /// Send `msg` and block until its response arrives or `timeout` passes.
    ///
    /// The message gets a fresh request id if it has none. The waiter is
    /// registered before the first frame goes out, so a response delivered
    /// during the send itself is not lost. A request parked in the offline
    /// store returns immediately with
    /// [`MsgCode::WROTE_TO_OFFLINE_MSG_STORE`]. A failed receive ends the
    /// wait with the transport error.
    pub fn send_and_wait(
        &mut self,
        msg: &mut Message,
        timeout: Duration,
    ) -> Result<ResponseOutcome> {
        let request_id = self.ids.assign(msg);
        let deadline = Instant::now() + timeout;
        self.pending.register(request_id, deadline);

        match self.send(msg) {
            Ok(SendOutcome::Sent) => {}
            Ok(SendOutcome::StoredOffline) => {
                self.pending.unregister(request_id);
                return Ok(ResponseOutcome {
                    code: MsgCode::WROTE_TO_OFFLINE_MSG_STORE,
                    content: None,
                    session_id: self.session_id,
                });
            }
            Err(err) => {
                self.pending.unregister(request_id);
                warn!(request_id, code = %msg.code, error = %err, "error sending message");
                let source = match err {
                    PeerError::Frame(source) => source,
                    other => return Err(other),
                };
                return Err(PeerError::SendFailed { request_id, source });
            }
        }

        loop {
            if let Some(outcome) = self.pending.take_completed(request_id) {
                self.pending.unregister(request_id);
                if msg.code == MsgCode::AUTH && outcome.code == MsgCode::SUCCESS {
                    self.session_id = outcome.session_id;
                    info!(session_id = self.session_id, "authenticated");
                }
                debug!(request_id, code = %outcome.code, "response received");
                return Ok(outcome);
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.poll_interval.min(deadline - now);
            if let Err(err) = self.poll(wait) {
                warn!(request_id, error = %err, "receive failed while waiting for response");
                self.pending.unregister(request_id);
                self.pending.cleanup_expired(Instant::now());
                return Err(err);
            }
        }

        self.pending.unregister(request_id);
        self.pending.cleanup_expired(Instant::now());
        warn!(request_id, ?timeout, "timed out waiting for response");
        Err(PeerError::Timeout {
            request_id,
            timeout,
        })
    }

    /// Wait up to `timeout` for one transport event and dispatch it.
    /// Returns whether an event was handled.
    pub fn poll(&mut self, timeout: Duration) -> Result<bool> {
        match self.transport.receive(timeout)? {
            Some(event) => {
                self.dispatch_event(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn dispatch_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Binary(data) => self.handle_binary(&data),
            TransportEvent::Ping(payload) => {
                trace!(len = payload.len(), "ping received");
                if let Err(err) = self.transport.send_pong(&payload) {
                    warn!(error = %err, "failed to answer ping");
                }
                if let Some(callback) = self.on_ping.as_mut() {
                    callback(&payload[..]);
                }
            }
            TransportEvent::Pong(payload) => {
                trace!(len = payload.len(), "pong received");
                self.pong_received = true;
                if let Some(callback) = self.on_pong.as_mut() {
                    callback(&payload[..]);
                }
            }
            TransportEvent::Connected => {
                info!("transport connected");
                if let Some(callback) = self.on_connect.as_mut() {
                    callback();
                }
            }
            TransportEvent::Closed(reason) => {
                info!(reason = reason.as_deref().unwrap_or(""), "transport closed");
                if let Some(callback) = self.on_close.as_mut() {
                    callback(reason.as_deref());
                }
            }
            TransportEvent::Text(text) => {
                debug!(len = text.len(), "ignoring text message");
            }
        }
    }

    fn handle_binary(&mut self, data: &Bytes) {
        let msg = match self.reader.read(data) {
            Ok(Some(msg)) => msg,
            Ok(None) => return,
            Err(err) => {
                debug!(error = %err, "dropping unreadable message");
                return;
            }
        };

        if msg.code.is_response() {
            let content = match msg.body {
                Body::Response(body) => body.content,
                _ => None,
            };
            self.pending
                .complete(msg.request_id, msg.code, content, msg.session_id);
        } else if msg.code.is_request() {
            let mut response = match &self.request_handler {
                Some(handler) => handler.handle_request(&msg),
                None => {
                    info!(request_id = msg.request_id, "no request handler, returning 404");
                    status_response(StatusCode::NotFound, msg.request_id, None)
                }
            };
            response.request_id = msg.request_id;
            if let Err(err) = self.send(&response) {
                warn!(request_id = msg.request_id, error = %err, "failed to send response");
            }
        } else {
            debug!(request_id = msg.request_id, code = %msg.code, "ignoring unsolicited message");
        }
    }

    /// Drop expired pending responses. Returns how many were removed.
    pub fn cleanup_old_messages(&self) -> usize {
        self.pending.cleanup_expired(Instant::now())
    }

    /// Drop incomplete multipart messages that have gone stale.
    pub fn remove_stale_multipart(&self) -> usize {
        self.reader.remove_stale()
    }
}

impl<T: Transport> std::fmt::Debug for MessageHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("connected", &self.transport.is_connected())
            .field("session_id", &self.session_id)
            .field("pending", &self.pending.len())
            .field("offline", &self.offline.as_ref().map(|s| s.len()))
            .field("writer", &self.writer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use thingwire_codec::InfoTable;
    use thingwire_frame::{
        Characteristic, EntityType, MemoryOfflineStore, RequestBody, ResponseBody,
    };
    use thingwire_transport::{MemoryPeer, MemoryTransport, SentMessage};

    use super::*;

    fn connected() -> (MessageHandler<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        peer.set_connected(true);
        (MessageHandler::new(transport), peer)
    }

    fn get_request(property: &str) -> Message {
        let mut msg = Message::request(MsgCode::GET).unwrap();
        msg.body = Body::Request(RequestBody::new(
            EntityType::THING,
            "pump-1",
            Characteristic::PROPERTIES,
            property,
        ));
        msg
    }

    fn reply_to(sent: &SentMessage, code: MsgCode, content: Option<InfoTable>) -> Bytes {
        let request = Message::decode(&sent.data).unwrap();
        let mut resp = Message::response(code, request.request_id).unwrap();
        resp.session_id = 77;
        resp.body = Body::Response(ResponseBody {
            reason: None,
            content,
        });
        resp.to_bytes().unwrap()
    }

    #[test]
    fn send_and_wait_returns_matching_response() {
        let (mut handler, peer) = connected();
        peer.set_responder(|sent| {
            let content = InfoTable::from_number("result", 12.5);
            vec![TransportEvent::Binary(reply_to(
                sent,
                MsgCode::SUCCESS,
                Some(content),
            ))]
        });

        let mut msg = get_request("Temperature");
        let outcome = handler
            .send_and_wait(&mut msg, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.code, MsgCode::SUCCESS);
        assert_eq!(outcome.content.unwrap().number("result", 0).unwrap(), 12.5);
        assert_ne!(msg.request_id, 0);
        assert!(handler.pending().is_empty());
    }

    #[test]
    fn unrelated_responses_do_not_satisfy_waiter() {
        let (mut handler, peer) = connected();
        peer.set_responder(|sent| {
            let request = Message::decode(&sent.data).unwrap();
            let stray = Message::response(MsgCode::NOT_FOUND, request.request_id + 100)
                .unwrap()
                .to_bytes()
                .unwrap();
            vec![
                TransportEvent::Binary(stray),
                TransportEvent::Binary(reply_to(sent, MsgCode::SUCCESS, None)),
            ]
        });

        let mut msg = get_request("Pressure");
        let outcome = handler
            .send_and_wait(&mut msg, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.code, MsgCode::SUCCESS);
    }

    #[test]
    fn timeout_leaves_no_registration() {
        let (mut handler, _peer) = connected();
        let mut msg = get_request("Silent");
        let started = Instant::now();
        let err = handler
            .send_and_wait(&mut msg, Duration::from_millis(30))
            .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert!(matches!(err, PeerError::Timeout { .. }));
        assert_eq!(err.status(), StatusCode::GatewayTimeout);
        assert!(handler.pending().is_empty());
    }

    #[test]
    fn read_failure_is_reported_as_transport_error() {
        let (mut handler, peer) = connected();
        peer.set_fail_receives(true);
        let mut msg = get_request("Temperature");
        let started = Instant::now();
        let err = handler
            .send_and_wait(&mut msg, Duration::from_secs(5))
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            err,
            PeerError::Transport(thingwire_transport::TransportError::ReadFailed(_))
        ));
        assert_eq!(err.status(), StatusCode::PreconditionFailed);
        assert!(handler.pending().is_empty());
        assert_eq!(peer.sent_count(), 1);
    }

    #[test]
    fn send_failure_unregisters() {
        let (mut handler, peer) = connected();
        peer.set_fail_sends(true);
        let mut msg = get_request("Anything");
        let err = handler
            .send_and_wait(&mut msg, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, PeerError::SendFailed { .. }));
        assert_eq!(err.status(), StatusCode::PreconditionFailed);
        assert!(handler.pending().is_empty());
    }

    #[test]
    fn auth_success_captures_session_id() {
        let (mut handler, peer) = connected();
        peer.set_responder(|sent| vec![TransportEvent::Binary(reply_to(sent, MsgCode::SUCCESS, None))]);

        let mut auth = Message::auth("appKey", "k");
        handler
            .send_and_wait(&mut auth, Duration::from_secs(1))
            .unwrap();
        assert_eq!(handler.session_id(), 77);
    }

    #[test]
    fn offline_request_is_queued_and_reported() {
        let (transport, peer) = MemoryTransport::pair();
        let mut handler = MessageHandler::new(transport)
            .with_offline_store(Box::new(MemoryOfflineStore::new(4096)));

        let mut msg = get_request("Queued");
        let outcome = handler
            .send_and_wait(&mut msg, Duration::from_secs(1))
            .unwrap();
        assert_eq!(outcome.code, MsgCode::WROTE_TO_OFFLINE_MSG_STORE);
        assert_eq!(handler.offline_store().map(|s| s.len()), Some(1));
        assert!(handler.pending().is_empty());

        peer.set_connected(true);
        handler.set_session_id(9);
        assert_eq!(handler.flush_offline(), 1);
        let sent = peer.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(Message::decode(&sent[0].data).unwrap().session_id, 9);
    }

    #[test]
    fn inbound_request_without_handler_gets_404() {
        let (mut handler, peer) = connected();
        let mut req = get_request("Unknown");
        req.request_id = 41;
        peer.push_binary(req.to_bytes().unwrap());

        assert!(handler.poll(Duration::from_millis(10)).unwrap());
        let sent = peer.take_sent();
        assert_eq!(sent.len(), 1);
        let resp = Message::decode(&sent[0].data).unwrap();
        assert_eq!(resp.code, MsgCode::NOT_FOUND);
        assert_eq!(resp.request_id, 41);
    }

    #[test]
    fn inbound_request_goes_to_handler() {
        struct Echo;
        impl RequestHandler for Echo {
            fn handle_request(&self, msg: &Message) -> Message {
                status_response(
                    StatusCode::Ok,
                    msg.request_id,
                    Some(InfoTable::from_string("result", "pong")),
                )
            }
        }

        let (mut handler, peer) = connected();
        handler.set_request_handler(Arc::new(Echo));
        let mut req = get_request("Echo");
        req.request_id = 5;
        peer.push_binary(req.to_bytes().unwrap());
        handler.poll(Duration::from_millis(10)).unwrap();

        let sent = peer.take_sent();
        let resp = Message::decode(&sent[0].data).unwrap();
        assert_eq!(resp.code, MsgCode::SUCCESS);
        let content = resp.response_body().unwrap().content.as_ref().unwrap();
        assert_eq!(content.string("result", 0).unwrap(), "pong");
    }

    #[test]
    fn ping_is_answered_and_callbacks_fire() {
        let (mut handler, peer) = connected();
        let pings = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&pings);
        handler.set_ping_callback(Some(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        })));

        peer.push_event(TransportEvent::Ping(Bytes::from_static(b"hi")));
        peer.push_event(TransportEvent::Pong(Bytes::new()));
        handler.poll(Duration::from_millis(10)).unwrap();
        handler.poll(Duration::from_millis(10)).unwrap();

        assert_eq!(peer.pongs(), vec![Bytes::from_static(b"hi")]);
        assert_eq!(pings.load(Ordering::SeqCst), 1);
        assert!(handler.take_pong_received());
        assert!(!handler.take_pong_received());
    }

    #[test]
    fn poll_times_out_quietly() {
        let (mut handler, _peer) = connected();
        assert!(!handler.poll(Duration::from_millis(5)).unwrap());
        assert_eq!(handler.cleanup_old_messages(), 0);
        assert_eq!(handler.remove_stale_multipart(), 0);
    }
}
