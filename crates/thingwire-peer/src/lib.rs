//! Client layer for the thingwire protocol.
//!
//! [`MessageHandler`] owns the transport and matches responses to blocking
//! requests by id. [`CallbackRegistry`] answers inbound requests from
//! registered property and service callbacks. [`Client`] ties these
//! together with connection management, thing binding, and the periodic
//! [`Client::tasker_function`] driven by a [`Tasker`].

pub mod callbacks;
pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod handler;
pub mod pending;
pub mod property;
pub mod status;
pub mod tasker;

pub use callbacks::{
    BindCallbackId, BindEventCallback, CallbackRegistry, CallbackResult, DefaultRequestCallback,
    PropertyAccess, PropertyCallback, PropertyDef, RequestHandler, ServiceCallback, ServiceDef,
    METADATA_SERVICE,
};
pub use client::{Client, PUSH_PROPERTIES_SERVICE, TASKER_INTERVAL};
pub use config::{ClientConfig, DEFAULT_MESSAGE_TIMEOUT, DEFAULT_PING_RATE, DEFAULT_RESOURCE};
pub use control::{duty_cycle_split, ControlActions, ControlSchedule, DutyTransition};
pub use error::{PeerError, Result};
pub use handler::{
    CloseCallback, ConnectCallback, ControlCallback, MessageHandler, DEFAULT_POLL_INTERVAL,
};
pub use pending::{PendingResponses, ResponseOutcome};
pub use property::{Property, PropertyList, PUSH_QUALITY};
pub use status::StatusCode;
pub use tasker::{now_millis, TaskFn, TaskId, Tasker, MAX_TASKS};
