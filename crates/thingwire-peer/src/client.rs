use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use thingwire_codec::{BaseType, InfoTable, Primitive};
use thingwire_frame::{
    Body, Characteristic, EntityType, GatewayInfo, MemoryOfflineStore, Message, MsgCode,
    OfflineStore, RequestBody,
};
use thingwire_transport::Transport;
use tracing::{debug, error, info, trace, warn};

use crate::callbacks::{
    BindCallbackId, CallbackRegistry, CallbackResult, PropertyAccess, PropertyDef,
    RequestHandler, ServiceDef, METADATA_SERVICE,
};
use crate::config::ClientConfig;
use crate::control::{ControlSchedule, DutyTransition};
use crate::error::{PeerError, Result};
use crate::handler::MessageHandler;
use crate::pending::ResponseOutcome;
use crate::property::PropertyList;
use crate::status::StatusCode;
use crate::tasker::{TaskId, Tasker};

/// Service that receives pushed property values.
pub const PUSH_PROPERTIES_SERVICE: &str = "UpdateSubscribedPropertyValues";
/// Interval of the maintenance task installed by [`Client::register_tasks`].
pub const TASKER_INTERVAL: Duration = Duration::from_millis(5);
/// Column holding the `GetMetadata` result.
const METADATA_RESULT: &str = "result";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Application-facing client: connection lifecycle, thing binding,
/// property and service calls, and periodic maintenance.
///
/// Every blocking call holds the handler lock from send to response, so
/// calls from several threads are serialized. Callbacks run while that lock
/// is held and must not call back into the client.
pub struct Client<T: Transport> {
    config: Mutex<ClientConfig>,
    handler: Mutex<MessageHandler<T>>,
    callbacks: Arc<CallbackRegistry>,
    bound: Mutex<Vec<String>>,
    control: Mutex<ControlSchedule>,
    authenticated: AtomicBool,
    manually_disconnected: AtomicBool,
}

impl<T: Transport> Client<T> {
    /// Create a client over `transport`. Nothing is sent until
    /// [`connect`](Self::connect).
    ///
    /// An in-memory offline store is installed when
    /// `config.offline_queue_size` is nonzero.
    pub fn new(config: ClientConfig, transport: T) -> Result<Self> {
        config.validate()?;
        let callbacks = Arc::new(CallbackRegistry::new());
        let mut handler =
            MessageHandler::with_config(transport, config.frame_config(), config.stale_cleanup_rate);
        handler.set_request_handler(Arc::clone(&callbacks) as Arc<dyn RequestHandler>);
        if config.offline_queue_size > 0 {
            handler.set_offline_store(Some(Box::new(MemoryOfflineStore::new(
                config.offline_queue_size,
            ))));
        }
        debug!(host = %config.host, port = config.port, "client created");
        Ok(Self {
            config: Mutex::new(config),
            handler: Mutex::new(handler),
            callbacks,
            bound: Mutex::new(Vec::new()),
            control: Mutex::new(ControlSchedule::new()),
            authenticated: AtomicBool::new(false),
            manually_disconnected: AtomicBool::new(true),
        })
    }

    /// Replace the offline store.
    pub fn with_offline_store(self, store: Box<dyn OfflineStore>) -> Self {
        lock(&self.handler).set_offline_store(Some(store));
        self
    }

    /// Send nothing while offline; requests fail with `ServiceUnavailable`.
    pub fn without_offline_store(self) -> Self {
        lock(&self.handler).set_offline_store(None);
        self
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> ClientConfig {
        lock(&self.config).clone()
    }

    pub fn set_ping_rate(&self, rate: Duration) {
        lock(&self.config).ping_rate = rate;
    }

    /// Stay connected `duty_cycle` percent of every `period`. A zero period
    /// disables duty cycling.
    pub fn set_duty_cycle(&self, duty_cycle: u8, period: Duration) {
        let mut config = lock(&self.config);
        config.duty_cycle = duty_cycle.min(100);
        config.duty_cycle_period = period;
    }

    pub fn set_connect_timeout(&self, timeout: Duration) {
        lock(&self.config).connect_timeout = timeout;
    }

    /// Attempts per [`connect`](Self::connect). `-1` retries forever.
    pub fn set_connect_retries(&self, retries: i32) {
        lock(&self.config).connect_retries = retries;
    }

    /// Exclusive access to the message handler and its transport.
    pub fn lock_handler(&self) -> MutexGuard<'_, MessageHandler<T>> {
        lock(&self.handler)
    }

    fn try_lock_handler(&self) -> Option<MutexGuard<'_, MessageHandler<T>>> {
        match self.handler.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn session_id(&self) -> u32 {
        lock(&self.handler).session_id()
    }

    /// Names recorded by [`bind_thing`](Self::bind_thing), in bind order.
    pub fn bound_things(&self) -> Vec<String> {
        lock(&self.bound).clone()
    }

    // --- connection ---

    /// Connect, authenticate, and bind every recorded thing, retrying with
    /// the configured timeout, retry count, and delay.
    pub fn connect(&self) -> Result<()> {
        let config = self.config();
        self.connect_with(config.connect_timeout, config.connect_retries)
    }

    /// Like [`connect`](Self::connect) with an explicit timeout and number
    /// of attempts. `-1` retries forever; `0` makes a single attempt.
    pub fn connect_with(&self, timeout: Duration, retries: i32) -> Result<()> {
        let delay = self.config().connect_retry_delay;
        let mut remaining = retries;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.connect_once(timeout) {
                Ok(()) => {
                    info!(attempt, "connected");
                    return Ok(());
                }
                Err(err) => err,
            };
            if remaining > 0 {
                remaining -= 1;
            }
            if remaining == 0 {
                error!(attempt, error = %err, "connect failed");
                return Err(err);
            }
            warn!(attempt, error = %err, "connect attempt failed, retrying");
            std::thread::sleep(delay);
        }
    }

    fn connect_once(&self, timeout: Duration) -> Result<()> {
        lock(&self.handler).transport_mut().connect(timeout)?;
        self.manually_disconnected.store(false, Ordering::SeqCst);
        self.authenticate()?;
        self.bind_all(false)
    }

    /// Unbind everything, then close the transport. Automatic reconnects
    /// stay off until the next [`connect`](Self::connect).
    pub fn disconnect(&self, reason: &str) -> Result<()> {
        if let Err(err) = self.bind_all(true) {
            debug!(error = %err, "unbind before disconnect failed");
        }
        self.manually_disconnected.store(true, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
        info!(reason, "disconnecting");
        lock(&self.handler).transport_mut().disconnect(reason)?;
        Ok(())
    }

    /// Transport connected and authenticated.
    pub fn is_connected(&self) -> bool {
        lock(&self.handler).transport().is_connected() && self.authenticated.load(Ordering::SeqCst)
    }

    /// Send the application key and record the session id. Queued offline
    /// requests are flushed on success.
    pub fn authenticate(&self) -> Result<()> {
        let config = self.config();
        let mut msg = Message::auth("appKey", config.app_key.as_str());
        let mut handler = lock(&self.handler);
        let outcome = handler.send_and_wait(&mut msg, config.message_timeout)?;
        if outcome.code != MsgCode::SUCCESS {
            warn!(code = %outcome.code, "authentication rejected");
            return Err(PeerError::Status(StatusCode::from_msg_code(outcome.code)));
        }
        self.authenticated.store(true, Ordering::SeqCst);
        let flushed = handler.flush_offline();
        if flushed > 0 {
            info!(flushed, "offline messages sent");
        }
        Ok(())
    }

    // --- binding ---

    /// Record `name` as bound and serve its `GetMetadata` service. BIND is
    /// sent only while connected; otherwise it goes out with the next
    /// [`connect`](Self::connect).
    pub fn bind_thing(&self, name: &str) -> Result<()> {
        {
            let mut bound = lock(&self.bound);
            if !bound.iter().any(|b| b == name) {
                bound.push(name.to_string());
            }
        }
        self.register_metadata_service(name);

        if !self.is_connected() {
            debug!(entity = name, "bind deferred until connected");
            return Ok(());
        }
        let mut msg = self.bind_message(&[name.to_string()], false);
        let result = self.send_control(&mut msg);
        if let Err(err) = &result {
            error!(entity = name, error = %err, "error sending bind message");
        }
        self.callbacks.notify_bind(name, true);
        result
    }

    /// Drop `name`'s callbacks and binding, and send UNBIND when connected.
    pub fn unbind_thing(&self, name: &str) -> Result<()> {
        self.callbacks.unregister_entity(name);
        lock(&self.bound).retain(|b| b != name);

        let result = if self.is_connected() {
            let mut msg = self.bind_message(&[name.to_string()], true);
            self.send_control(&mut msg)
        } else {
            Ok(())
        };
        if let Err(err) = &result {
            error!(entity = name, error = %err, "error sending unbind message");
        }
        self.callbacks.notify_bind(name, false);
        result
    }

    /// Send one BIND (or UNBIND) carrying every recorded thing and fire the
    /// bind-event callbacks for each.
    pub fn bind_all(&self, unbind: bool) -> Result<()> {
        let names = self.bound_things();
        if names.is_empty() {
            return Ok(());
        }
        let mut msg = self.bind_message(&names, unbind);
        let result = self.send_control(&mut msg);
        for name in &names {
            self.callbacks.notify_bind(name, !unbind);
        }
        result
    }

    fn bind_message(&self, names: &[String], unbind: bool) -> Message {
        let config = self.config();
        let mut msg = Message::bind(None, unbind);
        if let Some(body) = msg.bind_body_mut() {
            for name in names {
                body.add_name(name.as_str());
            }
            if let Some(gateway) = config.gateway_name {
                body.gateway = Some(GatewayInfo {
                    name: gateway,
                    gateway_type: config.gateway_type,
                });
            }
        }
        msg
    }

    fn send_control(&self, msg: &mut Message) -> Result<()> {
        let timeout = self.config().message_timeout;
        let outcome = lock(&self.handler).send_and_wait(msg, timeout)?;
        into_content(outcome).map(|_| ())
    }

    fn register_metadata_service(&self, name: &str) {
        if self.callbacks.contains(
            EntityType::THING,
            name,
            Characteristic::SERVICES,
            METADATA_SERVICE,
        ) {
            return;
        }
        let registry = Arc::downgrade(&self.callbacks);
        self.callbacks.register_service(
            EntityType::THING,
            name,
            ServiceDef::new(METADATA_SERVICE, BaseType::Json),
            move |entity, _, _| {
                let Some(registry) = registry.upgrade() else {
                    return Err(StatusCode::InternalServerError);
                };
                let doc = registry.metadata(entity).to_string();
                let value = Primitive::typed_string(BaseType::Json, doc)
                    .map_err(|_| StatusCode::InternalServerError)?;
                Ok(Some(InfoTable::from_primitive(METADATA_RESULT, value)))
            },
        );
    }

    // --- registration ---

    pub fn register_property<F>(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        def: PropertyDef,
        callback: F,
    ) where
        F: Fn(&str, &str, PropertyAccess<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks
            .register_property(entity_type, entity_name, def, callback);
    }

    pub fn register_service<F>(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        def: ServiceDef,
        callback: F,
    ) where
        F: Fn(&str, &str, Option<&InfoTable>) -> CallbackResult + Send + Sync + 'static,
    {
        self.callbacks
            .register_service(entity_type, entity_name, def, callback);
    }

    /// Remove every property and service callback of a thing.
    pub fn unregister_thing(&self, entity_name: &str) -> usize {
        self.callbacks.unregister_entity(entity_name)
    }

    pub fn register_default_request_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> Message + Send + Sync + 'static,
    {
        self.callbacks.set_default_handler(handler);
    }

    /// Called with `(entity, bound)` whenever a thing is bound or unbound.
    /// `None` subscribes to every thing.
    pub fn register_bind_event_callback<F>(&self, entity_name: Option<&str>, callback: F) -> BindCallbackId
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        self.callbacks.register_bind_callback(entity_name, callback)
    }

    pub fn unregister_bind_event_callback(&self, id: BindCallbackId) -> bool {
        self.callbacks.unregister_bind_callback(id)
    }

    pub fn register_connect_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        lock(&self.handler).set_connect_callback(Some(Box::new(callback)));
    }

    pub fn register_close_callback<F>(&self, callback: F)
    where
        F: FnMut(Option<&str>) + Send + 'static,
    {
        lock(&self.handler).set_close_callback(Some(Box::new(callback)));
    }

    pub fn register_ping_callback<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        lock(&self.handler).set_ping_callback(Some(Box::new(callback)));
    }

    /// Take over pong handling. Missing pongs no longer disconnect.
    pub fn register_pong_callback<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        lock(&self.control).set_handle_pongs(false);
        lock(&self.handler).set_pong_callback(Some(Box::new(callback)));
    }

    // --- requests ---

    /// Send a request and wait for its response content.
    ///
    /// While offline, `force_connect` reconnects first; without it the
    /// request is queued in the offline store, or fails with
    /// `ServiceUnavailable` when there is none. A queued request is reported
    /// as `PeerError::Status(StatusCode::WroteToOfflineStore)`.
    pub fn make_request(
        &self,
        method: MsgCode,
        body: RequestBody,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<Option<InfoTable>> {
        if !self.is_connected() {
            if force_connect {
                if let Err(err) = self.connect() {
                    error!(error = %err, "error trying to force a reconnect");
                    return Err(PeerError::ServiceUnavailable(format!(
                        "reconnect failed: {err}"
                    )));
                }
            } else if !lock(&self.handler).has_offline_store() {
                info!(entity = %body.entity_name, "offline and force_connect is false");
                return Err(PeerError::ServiceUnavailable(
                    "offline and force_connect is false".to_string(),
                ));
            }
        }

        let timeout = timeout.unwrap_or_else(|| self.config().message_timeout);
        let mut msg = Message::request(method)?;
        msg.body = Body::Request(body);
        let outcome = lock(&self.handler).send_and_wait(&mut msg, timeout)?;
        into_content(outcome)
    }

    /// Read a property. Returns `None` when the response carries no value.
    pub fn read_property(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        property: &str,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<Option<Primitive>> {
        let body = RequestBody::new(entity_type, entity_name, Characteristic::PROPERTIES, property);
        let content = self.make_request(MsgCode::GET, body, timeout, force_connect)?;
        Ok(content.and_then(|table| table.primitive(property, 0).ok().cloned()))
    }

    pub fn write_property(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        property: &str,
        value: Primitive,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<()> {
        let body = RequestBody::new(entity_type, entity_name, Characteristic::PROPERTIES, property)
            .with_params(InfoTable::from_primitive(property, value));
        self.make_request(MsgCode::PUT, body, timeout, force_connect)
            .map(|_| ())
    }

    /// Push a batch of property values through
    /// `UpdateSubscribedPropertyValues`.
    pub fn push_properties(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        properties: &PropertyList,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<()> {
        if entity_name.is_empty() {
            return Err(PeerError::Status(StatusCode::BadRequest));
        }
        let values = InfoTable::from_primitive("values", Primitive::infotable(properties.to_infotable()));
        self.invoke_service(
            entity_type,
            entity_name,
            PUSH_PROPERTIES_SERVICE,
            Some(values),
            timeout,
            force_connect,
        )
        .map(|_| ())
    }

    pub fn invoke_service(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        service: &str,
        params: Option<InfoTable>,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<Option<InfoTable>> {
        let mut body = RequestBody::new(entity_type, entity_name, Characteristic::SERVICES, service);
        body.params = params;
        self.make_request(MsgCode::POST, body, timeout, force_connect)
    }

    pub fn fire_event(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        event: &str,
        params: Option<InfoTable>,
        timeout: Option<Duration>,
        force_connect: bool,
    ) -> Result<()> {
        let mut body = RequestBody::new(entity_type, entity_name, Characteristic::EVENTS, event);
        body.params = params;
        self.make_request(MsgCode::POST, body, timeout, force_connect)
            .map(|_| ())
    }

    // --- maintenance ---

    pub fn send_ping(&self, content: &[u8]) -> Result<()> {
        lock(&self.handler).transport_mut().send_ping(content)?;
        Ok(())
    }

    /// Drop expired pending responses.
    pub fn cleanup_old_messages(&self) -> usize {
        lock(&self.handler).cleanup_old_messages()
    }

    /// One maintenance pass: keep-alive, stale-message sweep, duty cycle,
    /// auto-reconnect, and a short receive. The pass is skipped when a
    /// blocking call holds the handler as it starts. Keep-alive and sweep
    /// share one handler guard taken without blocking.
    pub fn tasker_function(&self, now_ms: u64) {
        let Some(mut handler) = self.try_lock_handler() else {
            trace!("handler busy, maintenance pass skipped");
            return;
        };
        let config = self.config();
        let connected =
            handler.transport().is_connected() && self.authenticated.load(Ordering::SeqCst);
        let pong = handler.take_pong_received();

        let actions = {
            let mut control = lock(&self.control);
            if pong {
                control.record_pong();
            }
            control.plan(now_ms, connected, &config)
        };

        if actions.send_ping {
            if let Err(err) = handler.transport_mut().send_ping(&[]) {
                warn!(error = %err, "failed to send keep-alive ping");
            }
        }
        if actions.pong_timeout {
            warn!("did not receive pong in time");
            self.manually_disconnected.store(false, Ordering::SeqCst);
            self.authenticated.store(false, Ordering::SeqCst);
            if let Err(err) = handler.transport_mut().disconnect("Pong timeout") {
                debug!(error = %err, "disconnect after pong timeout failed");
            }
        }
        if actions.cleanup {
            let expired = handler.cleanup_old_messages();
            let stale = handler.remove_stale_multipart();
            if expired + stale > 0 {
                debug!(expired, stale, "stale messages removed");
            }
        }
        drop(handler);

        match actions.duty_cycle {
            Some(DutyTransition::Off) => {
                info!("entering duty cycle off state");
                if let Err(err) = self.disconnect("Duty cycle off time") {
                    warn!(error = %err, "duty cycle disconnect failed");
                }
            }
            Some(DutyTransition::On) => {
                info!("entering duty cycle on state");
                if let Err(err) = self.connect() {
                    warn!(error = %err, "duty cycle connect failed");
                }
            }
            None => {}
        }

        let Some(transport_up) = self
            .try_lock_handler()
            .map(|handler| handler.transport().is_connected())
        else {
            return;
        };
        if !transport_up {
            self.authenticated.store(false, Ordering::SeqCst);
            if config.auto_reconnect && !self.manually_disconnected.load(Ordering::SeqCst) {
                if let Err(err) = self.connect_with(config.connect_timeout, 1) {
                    debug!(error = %err, "auto-reconnect failed");
                }
            }
        }

        if !self.manually_disconnected.load(Ordering::SeqCst) {
            if let Some(mut handler) = self.try_lock_handler() {
                if let Err(err) = handler.poll(Duration::from_millis(1)) {
                    debug!(error = %err, "receive failed");
                }
            }
        }
    }
}

impl<T: Transport + 'static> Client<T> {
    /// Install [`tasker_function`](Self::tasker_function) as a periodic
    /// task. The task holds only a weak reference to the client.
    pub fn register_tasks(self: &Arc<Self>, tasker: &Tasker) -> Result<TaskId> {
        let client = Arc::downgrade(self);
        tasker.create_task(TASKER_INTERVAL, move |now| {
            if let Some(client) = client.upgrade() {
                client.tasker_function(now);
            }
        })
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &*lock(&self.config))
            .field("bound", &*lock(&self.bound))
            .field("authenticated", &self.authenticated.load(Ordering::Relaxed))
            .field(
                "manually_disconnected",
                &self.manually_disconnected.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Content of a successful response, or its status as an error.
fn into_content(outcome: ResponseOutcome) -> Result<Option<InfoTable>> {
    match StatusCode::from_msg_code(outcome.code) {
        StatusCode::Ok => Ok(outcome.content),
        status => Err(PeerError::Status(status)),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use thingwire_frame::ResponseBody;
    use thingwire_transport::{MemoryPeer, MemoryTransport, SentMessage, TransportEvent};

    use super::*;

    fn ok_reply(sent: &SentMessage) -> Vec<TransportEvent> {
        let request = Message::decode(&sent.data).unwrap();
        let mut resp = Message::response(MsgCode::SUCCESS, request.request_id).unwrap();
        resp.session_id = 1234;
        resp.body = Body::Response(ResponseBody::default());
        vec![TransportEvent::Binary(resp.to_bytes().unwrap())]
    }

    fn client() -> (Client<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = MemoryTransport::pair();
        peer.set_responder(ok_reply);
        let config = ClientConfig {
            connect_retry_delay: Duration::from_millis(1),
            message_timeout: Duration::from_millis(200),
            ..ClientConfig::new("localhost", 8080, "app-key")
        };
        (Client::new(config, transport).unwrap(), peer)
    }

    fn decode_all(peer: &MemoryPeer) -> Vec<Message> {
        peer.take_sent()
            .iter()
            .map(|s| Message::decode(&s.data).unwrap())
            .collect()
    }

    #[test]
    fn connect_authenticates_and_binds() {
        let (client, peer) = client();
        client.bind_thing("pump-1").unwrap();
        assert_eq!(peer.sent_count(), 0);

        client.connect().unwrap();
        assert!(client.is_connected());
        assert_eq!(client.session_id(), 1234);

        let sent = decode_all(&peer);
        assert_eq!(sent[0].code, MsgCode::AUTH);
        assert_eq!(sent[0].auth_body().unwrap().value, "app-key");
        assert_eq!(sent[1].code, MsgCode::BIND);
        assert_eq!(sent[1].bind_body().unwrap().names, ["pump-1"]);
        assert_eq!(sent[1].session_id, 1234);
    }

    #[test]
    fn connect_gives_up_after_retries() {
        let (client, peer) = client();
        peer.set_refuse_connect(true);
        assert!(client.connect_with(Duration::from_millis(10), 2).is_err());
        assert!(!client.is_connected());
        assert_eq!(peer.connect_count(), 0);
    }

    #[test]
    fn disconnect_unbinds_then_closes() {
        let (client, peer) = client();
        client.bind_thing("pump-1").unwrap();
        client.connect().unwrap();
        peer.take_sent();

        client.disconnect("done").unwrap();
        let sent = decode_all(&peer);
        assert_eq!(sent[0].code, MsgCode::UNBIND);
        assert_eq!(peer.disconnect_reasons(), ["done"]);
        assert!(!client.is_connected());
    }

    #[test]
    fn offline_request_without_store_is_unavailable() {
        let (client, _peer) = client();
        let client = client.without_offline_store();
        let err = client
            .read_property(EntityType::THING, "pump-1", "Speed", None, false)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::ServiceUnavailable);
    }

    #[test]
    fn offline_request_with_store_is_queued() {
        let (client, peer) = client();
        let err = client
            .fire_event(EntityType::THING, "pump-1", "Overheat", None, None, false)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::WroteToOfflineStore);
        assert_eq!(peer.sent_count(), 0);

        client.connect().unwrap();
        let sent = decode_all(&peer);
        assert_eq!(sent[0].code, MsgCode::AUTH);
        assert_eq!(sent[1].code, MsgCode::POST);
        assert_eq!(sent[1].session_id, 1234);
    }

    #[test]
    fn force_connect_reconnects_first() {
        let (client, peer) = client();
        client
            .invoke_service(EntityType::THING, "pump-1", "Reset", None, None, true)
            .unwrap();
        assert_eq!(peer.connect_count(), 1);
        let sent = decode_all(&peer);
        assert_eq!(sent.last().unwrap().code, MsgCode::POST);
    }

    #[test]
    fn error_status_is_returned() {
        let (client, peer) = client();
        client.connect().unwrap();
        peer.set_responder(|sent| {
            let request = Message::decode(&sent.data).unwrap();
            let resp = Message::response(MsgCode::NOT_FOUND, request.request_id).unwrap();
            vec![TransportEvent::Binary(resp.to_bytes().unwrap())]
        });
        let err = client
            .write_property(
                EntityType::THING,
                "pump-1",
                "Speed",
                Primitive::number(3.0),
                None,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, PeerError::Status(StatusCode::NotFound)));
    }

    #[test]
    fn bind_callbacks_fire_on_bind_and_unbind() {
        let (client, _peer) = client();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&events);
        client.register_bind_event_callback(None, move |name, bound| {
            seen.lock().unwrap().push((name.to_string(), bound));
        });

        client.connect().unwrap();
        client.bind_thing("a").unwrap();
        client.unbind_thing("a").unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![("a".to_string(), true), ("a".to_string(), false)]
        );
        assert!(client.bound_things().is_empty());
    }

    #[test]
    fn metadata_service_is_served() {
        let (client, peer) = client();
        client.register_property(
            EntityType::THING,
            "pump-1",
            PropertyDef::new("Speed", BaseType::Number),
            |_, _, _| Ok(None),
        );
        client.bind_thing("pump-1").unwrap();
        client.connect().unwrap();
        peer.take_sent();

        let mut req = Message::request(MsgCode::POST).unwrap();
        req.request_id = 900;
        req.body = Body::Request(RequestBody::new(
            EntityType::THING,
            "pump-1",
            Characteristic::SERVICES,
            METADATA_SERVICE,
        ));
        peer.push_binary(req.to_bytes().unwrap());
        client.lock_handler().poll(Duration::from_millis(20)).unwrap();

        let sent = decode_all(&peer);
        let resp = sent.iter().find(|m| m.request_id == 900).unwrap();
        assert_eq!(resp.code, MsgCode::SUCCESS);
        let content = resp.response_body().unwrap().content.as_ref().unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(content.string(METADATA_RESULT, 0).unwrap()).unwrap();
        assert_eq!(doc["name"], "pump-1");
        assert!(doc["propertyDefinitions"]["Speed"].is_object());
        assert!(doc["serviceDefinitions"][METADATA_SERVICE].is_object());
    }

    #[test]
    fn duty_cycle_is_clamped() {
        let (client, _peer) = client();
        client.set_duty_cycle(250, Duration::from_secs(60));
        let config = client.config();
        assert_eq!(config.duty_cycle, 100);
        assert_eq!(config.duty_cycle_period, Duration::from_secs(60));
    }

    #[test]
    fn tasker_pings_and_disconnects_on_missing_pong() {
        let (client, peer) = client();
        client.set_ping_rate(Duration::from_secs(60));
        client.connect().unwrap();
        let config = client.config();

        client.tasker_function(1_000);
        assert_eq!(peer.pings().len(), 1);

        let timeout_ms = u64::try_from(config.message_timeout.as_millis()).unwrap();
        client.tasker_function(1_000 + timeout_ms + 1);
        assert!(peer
            .disconnect_reasons()
            .iter()
            .any(|r| r == "Pong timeout"));
    }

    #[test]
    fn tasker_pass_is_skipped_while_handler_is_held() {
        let (client, peer) = client();
        client.connect().unwrap();

        let held = client.lock_handler();
        client.tasker_function(1_000);
        assert!(peer.pings().is_empty());
        drop(held);

        client.tasker_function(1_000);
        assert_eq!(peer.pings().len(), 1);
    }

    #[test]
    fn tasker_keeps_connection_when_pong_arrives() {
        let (client, peer) = client();
        peer.set_auto_pong(true);
        client.connect().unwrap();

        client.tasker_function(1_000);
        assert_eq!(peer.pings(), vec![Bytes::new()]);
        client.tasker_function(1_001);
        client.tasker_function(5_000);
        assert!(peer.disconnect_reasons().is_empty());
        assert!(client.is_connected());
    }
}
