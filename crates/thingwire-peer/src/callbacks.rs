use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{json, Map, Value};
use thingwire_codec::{BaseType, DataShape, DataShapeEntry, InfoTable, Primitive};
use thingwire_frame::{
    Body, Characteristic, EntityType, Message, MsgCode, RequestBody, ResponseBody, PROTOCOL_VERSION,
};
use tracing::{debug, info, warn};

use crate::status::StatusCode;

/// Name of the metadata service registered for every bound thing.
pub const METADATA_SERVICE: &str = "GetMetadata";

/// Answers requests the server sends to this device.
///
/// Exactly one response must be returned for every request.
pub trait RequestHandler: Send + Sync {
    fn handle_request(&self, msg: &Message) -> Message;
}

/// What a property callback is asked to do.
#[derive(Debug, Clone, Copy)]
pub enum PropertyAccess<'a> {
    /// Return the current value.
    Read,
    /// Apply the new value carried in the table.
    Write(&'a InfoTable),
}

/// Result of a property or service callback: content on success, or the
/// status to answer with.
pub type CallbackResult = std::result::Result<Option<InfoTable>, StatusCode>;

pub type PropertyCallback =
    dyn Fn(&str, &str, PropertyAccess<'_>) -> CallbackResult + Send + Sync;
pub type ServiceCallback = dyn Fn(&str, &str, Option<&InfoTable>) -> CallbackResult + Send + Sync;
pub type DefaultRequestCallback = dyn Fn(&Message) -> Message + Send + Sync;
pub type BindEventCallback = dyn Fn(&str, bool) + Send + Sync;

/// Handle returned when registering a bind-event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindCallbackId(u64);

/// Definition of a property published in the thing's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDef {
    pub name: String,
    pub base_type: BaseType,
    pub description: String,
    /// `ALWAYS`, `VALUE`, `NEVER`, ...
    pub push_type: String,
    pub push_threshold: f64,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, base_type: BaseType) -> Self {
        Self {
            name: name.into(),
            base_type,
            description: String::new(),
            push_type: "ALWAYS".to_string(),
            push_threshold: 0.0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_push(mut self, push_type: impl Into<String>, threshold: f64) -> Self {
        self.push_type = push_type.into();
        self.push_threshold = threshold;
        self
    }

    fn to_json(&self) -> Value {
        let cache_time = if self.push_type == "NEVER" { -1 } else { 0 };
        json!({
            "name": self.name,
            "description": self.description,
            "baseType": self.base_type.name(),
            "aspects": {
                "pushType": self.push_type,
                "cacheTime": cache_time,
                "pushThreshold": self.push_threshold,
            },
        })
    }
}

/// Definition of a service published in the thing's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    pub name: String,
    pub description: String,
    pub inputs: Option<DataShape>,
    pub output_type: BaseType,
    pub output_shape: Option<DataShape>,
}

impl ServiceDef {
    pub fn new(name: impl Into<String>, output_type: BaseType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            inputs: None,
            output_type,
            output_shape: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_inputs(mut self, inputs: DataShape) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_output_shape(mut self, shape: DataShape) -> Self {
        self.output_shape = Some(shape);
        self
    }

    fn to_json(&self) -> Value {
        let mut inputs = Map::new();
        if let Some(shape) = &self.inputs {
            inputs.insert("fieldDefinitions".into(), fields_json(shape));
        }
        let mut outputs = Map::new();
        outputs.insert("name".into(), json!("result"));
        outputs.insert("baseType".into(), json!(self.output_type.name()));
        if let Some(name) = self.output_shape.as_ref().and_then(DataShape::name) {
            outputs.insert("aspects".into(), json!({ "dataShape": name }));
        }
        outputs.insert(
            "fieldDefinitions".into(),
            self.output_shape
                .as_ref()
                .map_or_else(|| json!({}), fields_json),
        );
        json!({
            "name": self.name,
            "description": self.description,
            "Inputs": inputs,
            "Outputs": outputs,
        })
    }
}

fn fields_json(shape: &DataShape) -> Value {
    let fields: Map<String, Value> = shape
        .entries()
        .iter()
        .map(|entry| (entry.name.clone(), entry_json(entry)))
        .collect();
    Value::Object(fields)
}

fn entry_json(entry: &DataShapeEntry) -> Value {
    let aspects: Map<String, Value> = entry
        .aspects
        .iter()
        .filter_map(|aspect| aspect_json(&aspect.value).map(|v| (aspect.name.clone(), v)))
        .collect();
    json!({
        "name": entry.name,
        "description": entry.description,
        "baseType": entry.base_type.name(),
        "aspects": aspects,
    })
}

fn aspect_json(value: &Primitive) -> Option<Value> {
    if let Some(n) = value.as_integer() {
        return Some(json!(n));
    }
    if let Some(n) = value.as_number() {
        return Some(json!(n));
    }
    if let Some(b) = value.as_bool() {
        return Some(json!(b));
    }
    value.as_str().map(|s| json!(s))
}

#[derive(Clone)]
enum Callback {
    Property(PropertyDef, Arc<PropertyCallback>),
    Service(ServiceDef, Arc<ServiceCallback>),
}

#[derive(Clone)]
struct Registration {
    entity_type: EntityType,
    entity_name: String,
    callback: Callback,
}

impl Registration {
    fn characteristic(&self) -> Characteristic {
        match self.callback {
            Callback::Property(..) => Characteristic::PROPERTIES,
            Callback::Service(..) => Characteristic::SERVICES,
        }
    }

    fn name(&self) -> &str {
        match &self.callback {
            Callback::Property(def, _) => &def.name,
            Callback::Service(def, _) => &def.name,
        }
    }

    fn matches(&self, entity_type: EntityType, entity: &str, ch: Characteristic, name: &str) -> bool {
        self.entity_type == entity_type
            && self.characteristic() == ch
            && self.entity_name == entity
            && self.name() == name
    }
}

struct BindRegistration {
    id: BindCallbackId,
    entity_name: Option<String>,
    callback: Arc<BindEventCallback>,
}

/// Property, service, and bind-event callbacks for one client.
///
/// Callbacks are cloned out of the registry before they run, so a callback
/// may register or unregister others.
#[derive(Default)]
pub struct CallbackRegistry {
    entries: Mutex<Vec<Registration>>,
    default_handler: Mutex<Option<Arc<DefaultRequestCallback>>>,
    bind_callbacks: Mutex<Vec<BindRegistration>>,
    next_bind_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_property<F>(
        &self,
        entity_type: EntityType,
        entity_name: impl Into<String>,
        def: PropertyDef,
        callback: F,
    ) where
        F: Fn(&str, &str, PropertyAccess<'_>) -> CallbackResult + Send + Sync + 'static,
    {
        let entity_name = entity_name.into();
        debug!(entity = %entity_name, property = %def.name, "property callback registered");
        lock(&self.entries).push(Registration {
            entity_type,
            entity_name,
            callback: Callback::Property(def, Arc::new(callback)),
        });
    }

    pub fn register_service<F>(
        &self,
        entity_type: EntityType,
        entity_name: impl Into<String>,
        def: ServiceDef,
        callback: F,
    ) where
        F: Fn(&str, &str, Option<&InfoTable>) -> CallbackResult + Send + Sync + 'static,
    {
        let entity_name = entity_name.into();
        debug!(entity = %entity_name, service = %def.name, "service callback registered");
        lock(&self.entries).push(Registration {
            entity_type,
            entity_name,
            callback: Callback::Service(def, Arc::new(callback)),
        });
    }

    /// Whether a callback is registered for this exact characteristic.
    pub fn contains(
        &self,
        entity_type: EntityType,
        entity_name: &str,
        characteristic: Characteristic,
        name: &str,
    ) -> bool {
        lock(&self.entries)
            .iter()
            .any(|r| r.matches(entity_type, entity_name, characteristic, name))
    }

    /// Remove every property and service callback of an entity.
    pub fn unregister_entity(&self, entity_name: &str) -> usize {
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|r| r.entity_name != entity_name);
        before - entries.len()
    }

    /// Handler for requests no property or service callback claims.
    pub fn set_default_handler<F>(&self, handler: F)
    where
        F: Fn(&Message) -> Message + Send + Sync + 'static,
    {
        *lock(&self.default_handler) = Some(Arc::new(handler));
    }

    /// Register a bind-event callback for one entity, or for all entities
    /// when `entity_name` is `None`.
    pub fn register_bind_callback<F>(&self, entity_name: Option<&str>, callback: F) -> BindCallbackId
    where
        F: Fn(&str, bool) + Send + Sync + 'static,
    {
        let id = BindCallbackId(self.next_bind_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.bind_callbacks).push(BindRegistration {
            id,
            entity_name: entity_name.map(str::to_string),
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unregister_bind_callback(&self, id: BindCallbackId) -> bool {
        let mut callbacks = lock(&self.bind_callbacks);
        let before = callbacks.len();
        callbacks.retain(|c| c.id != id);
        callbacks.len() != before
    }

    /// Tell bind-event callbacks that `entity_name` was bound or unbound.
    pub fn notify_bind(&self, entity_name: &str, bound: bool) {
        let targets: Vec<Arc<BindEventCallback>> = lock(&self.bind_callbacks)
            .iter()
            .filter(|c| c.entity_name.as_deref().is_none_or(|name| name == entity_name))
            .map(|c| Arc::clone(&c.callback))
            .collect();
        for callback in targets {
            callback(entity_name, bound);
        }
    }

    /// Metadata document for `entity_name`: its property and service
    /// definitions, as served by the `GetMetadata` service.
    pub fn metadata(&self, entity_name: &str) -> Value {
        let entries = lock(&self.entries);
        let mut properties = Map::new();
        let mut services = Map::new();
        for reg in entries.iter().filter(|r| r.entity_name == entity_name) {
            match &reg.callback {
                Callback::Property(def, _) => {
                    properties.insert(def.name.clone(), def.to_json());
                }
                Callback::Service(def, _) => {
                    services.insert(def.name.clone(), def.to_json());
                }
            }
        }
        json!({
            "name": entity_name,
            "description": "",
            "isSystemObject": false,
            "propertyDefinitions": properties,
            "serviceDefinitions": services,
        })
    }

    fn find(&self, body: &RequestBody) -> Option<Callback> {
        lock(&self.entries)
            .iter()
            .find(|r| {
                r.matches(
                    body.entity_type,
                    &body.entity_name,
                    body.characteristic,
                    &body.characteristic_name,
                )
            })
            .map(|r| r.callback.clone())
    }

    fn fallback(&self, msg: &Message) -> Message {
        let handler = lock(&self.default_handler).clone();
        match handler {
            Some(handler) => {
                let mut resp = handler(msg);
                resp.request_id = msg.request_id;
                resp
            }
            None => {
                info!(request_id = msg.request_id, "no handler found, returning 404");
                status_response(StatusCode::NotFound, msg.request_id, None)
            }
        }
    }
}

/// A response carrying `status`. Status codes always map to response codes.
pub(crate) fn status_response(
    status: StatusCode,
    request_id: u32,
    content: Option<InfoTable>,
) -> Message {
    Message {
        version: PROTOCOL_VERSION,
        code: status.to_msg_code(),
        request_id,
        endpoint_id: 0,
        session_id: 0,
        multipart: false,
        body: Body::Response(ResponseBody {
            reason: None,
            content,
        }),
    }
}

fn reply(result: CallbackResult, request_id: u32) -> Message {
    match result {
        Ok(content) => status_response(StatusCode::Ok, request_id, content),
        Err(status) => status_response(status, request_id, None),
    }
}

impl RequestHandler for CallbackRegistry {
    fn handle_request(&self, msg: &Message) -> Message {
        let Some(body) = msg.request_body() else {
            warn!(request_id = msg.request_id, kind = msg.body.kind(), "request without a request body");
            return status_response(StatusCode::BadRequest, msg.request_id, None);
        };

        match self.find(body) {
            Some(Callback::Property(def, callback)) => {
                if msg.code == MsgCode::PUT {
                    let Some(params) = &body.params else {
                        warn!(
                            entity = %body.entity_name,
                            property = %def.name,
                            "missing params in property write"
                        );
                        return status_response(StatusCode::BadRequest, msg.request_id, None);
                    };
                    let result = callback(&body.entity_name, &def.name, PropertyAccess::Write(params));
                    // Writes answer with the status only.
                    reply(result.map(|_| None), msg.request_id)
                } else {
                    let result = callback(&body.entity_name, &def.name, PropertyAccess::Read);
                    reply(result, msg.request_id)
                }
            }
            Some(Callback::Service(def, callback)) => {
                let result = callback(&body.entity_name, &def.name, body.params.as_ref());
                reply(result, msg.request_id)
            }
            None => self.fallback(msg),
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &lock(&self.entries).len())
            .field("bind_callbacks", &lock(&self.bind_callbacks).len())
            .field("has_default_handler", &lock(&self.default_handler).is_some())
            .finish()
    }
}
