//! Message, entity and characteristic codes.
//!
//! Codes below [`MsgCode::SUCCESS`] are requests or control messages; codes at
//! or above it are response statuses.

use std::fmt;

/// The second byte of every message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MsgCode(pub u8);

impl MsgCode {
    pub const GET: MsgCode = MsgCode(0x01);
    pub const PUT: MsgCode = MsgCode(0x02);
    pub const POST: MsgCode = MsgCode(0x03);
    pub const DEL: MsgCode = MsgCode(0x04);
    pub const BIND: MsgCode = MsgCode(0x0A);
    pub const UNBIND: MsgCode = MsgCode(0x0B);
    pub const AUTH: MsgCode = MsgCode(0x14);
    pub const KEEP_ALIVE: MsgCode = MsgCode(0x1F);

    pub const SUCCESS: MsgCode = MsgCode(0x40);
    pub const BAD_REQUEST: MsgCode = MsgCode(0x80);
    pub const UNAUTHORIZED: MsgCode = MsgCode(0x81);
    pub const BAD_OPTION: MsgCode = MsgCode(0x82);
    pub const FORBIDDEN: MsgCode = MsgCode(0x83);
    pub const NOT_FOUND: MsgCode = MsgCode(0x84);
    pub const METHOD_NOT_ALLOWED: MsgCode = MsgCode(0x85);
    pub const NOT_ACCEPTABLE: MsgCode = MsgCode(0x86);
    pub const PRECONDITION_FAILED: MsgCode = MsgCode(0x8C);
    pub const ENTITY_TOO_LARGE: MsgCode = MsgCode(0x8D);
    pub const UNSUPPORTED_CONTENT_FORMAT: MsgCode = MsgCode(0x8F);
    pub const INTERNAL_SERVER_ERROR: MsgCode = MsgCode(0xA0);
    pub const NOT_IMPLEMENTED: MsgCode = MsgCode(0xA1);
    pub const BAD_GATEWAY: MsgCode = MsgCode(0xA2);
    pub const SERVICE_UNAVAILABLE: MsgCode = MsgCode(0xA3);
    pub const GATEWAY_TIMEOUT: MsgCode = MsgCode(0xA4);
    pub const WROTE_TO_OFFLINE_MSG_STORE: MsgCode = MsgCode(0xA5);
    pub const UNKNOWN: MsgCode = MsgCode(0xFF);

    /// GET, PUT, POST or DEL.
    pub fn is_request(self) -> bool {
        matches!(self, Self::GET | Self::PUT | Self::POST | Self::DEL)
    }

    /// Any code at or above [`MsgCode::SUCCESS`].
    pub fn is_response(self) -> bool {
        self >= Self::SUCCESS
    }

    /// BIND or UNBIND.
    pub fn is_bind(self) -> bool {
        matches!(self, Self::BIND | Self::UNBIND)
    }

    /// Returns a human-readable name for the code.
    pub fn name(self) -> &'static str {
        match self {
            Self::GET => "GET",
            Self::PUT => "PUT",
            Self::POST => "POST",
            Self::DEL => "DEL",
            Self::BIND => "BIND",
            Self::UNBIND => "UNBIND",
            Self::AUTH => "AUTH",
            Self::KEEP_ALIVE => "KEEP_ALIVE",
            Self::SUCCESS => "SUCCESS",
            Self::BAD_REQUEST => "BAD_REQUEST",
            Self::UNAUTHORIZED => "UNAUTHORIZED",
            Self::BAD_OPTION => "BAD_OPTION",
            Self::FORBIDDEN => "FORBIDDEN",
            Self::NOT_FOUND => "NOT_FOUND",
            Self::METHOD_NOT_ALLOWED => "METHOD_NOT_ALLOWED",
            Self::NOT_ACCEPTABLE => "NOT_ACCEPTABLE",
            Self::PRECONDITION_FAILED => "PRECONDITION_FAILED",
            Self::ENTITY_TOO_LARGE => "ENTITY_TOO_LARGE",
            Self::UNSUPPORTED_CONTENT_FORMAT => "UNSUPPORTED_CONTENT_FORMAT",
            Self::INTERNAL_SERVER_ERROR => "INTERNAL_SERVER_ERROR",
            Self::NOT_IMPLEMENTED => "NOT_IMPLEMENTED",
            Self::BAD_GATEWAY => "BAD_GATEWAY",
            Self::SERVICE_UNAVAILABLE => "SERVICE_UNAVAILABLE",
            Self::GATEWAY_TIMEOUT => "GATEWAY_TIMEOUT",
            Self::WROTE_TO_OFFLINE_MSG_STORE => "WROTE_TO_OFFLINE_MSG_STORE",
            Self::UNKNOWN => "UNKNOWN",
            _ => "UNASSIGNED",
        }
    }
}

impl fmt::Display for MsgCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.0)
    }
}

/// Kind of entity a request is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EntityType(pub u8);

impl EntityType {
    pub const UNDEFINED: EntityType = EntityType(0x00);
    pub const THING: EntityType = EntityType(0x0A);
    pub const THINGSHAPE: EntityType = EntityType(0x0B);
    pub const DATASHAPE: EntityType = EntityType(0x0C);
    pub const THINGTEMPLATE: EntityType = EntityType(0x0D);
    pub const RESOURCE: EntityType = EntityType(0x0E);
    pub const SUBSYSTEM: EntityType = EntityType(0x0F);

    pub fn name(self) -> &'static str {
        match self {
            Self::UNDEFINED => "UNDEFINED",
            Self::THING => "THING",
            Self::THINGSHAPE => "THINGSHAPE",
            Self::DATASHAPE => "DATASHAPE",
            Self::THINGTEMPLATE => "THINGTEMPLATE",
            Self::RESOURCE => "RESOURCE",
            Self::SUBSYSTEM => "SUBSYSTEM",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which part of an entity a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Characteristic(pub u8);

impl Characteristic {
    pub const PROPERTIES: Characteristic = Characteristic(0);
    pub const SERVICES: Characteristic = Characteristic(1);
    pub const EVENTS: Characteristic = Characteristic(2);

    pub fn name(self) -> &'static str {
        match self {
            Self::PROPERTIES => "PROPERTIES",
            Self::SERVICES => "SERVICES",
            Self::EVENTS => "EVENTS",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
