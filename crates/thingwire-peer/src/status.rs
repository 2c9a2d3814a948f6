use std::fmt;

use thingwire_frame::MsgCode;

/// Application-level result of an API call.
///
/// Every response status on the wire maps to exactly one variant; anything
/// else becomes [`StatusCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    BadRequest,
    Unauthorized,
    BadOption,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    PreconditionFailed,
    EntityTooLarge,
    UnsupportedContentFormat,
    InternalServerError,
    NotImplemented,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// The request was queued in the offline store instead of being sent.
    WroteToOfflineStore,
    Unknown,
}

impl StatusCode {
    /// Translate a wire message code.
    pub fn from_msg_code(code: MsgCode) -> Self {
        match code {
            MsgCode::SUCCESS => Self::Ok,
            MsgCode::BAD_REQUEST => Self::BadRequest,
            MsgCode::UNAUTHORIZED => Self::Unauthorized,
            MsgCode::BAD_OPTION => Self::BadOption,
            MsgCode::FORBIDDEN => Self::Forbidden,
            MsgCode::NOT_FOUND => Self::NotFound,
            MsgCode::METHOD_NOT_ALLOWED => Self::MethodNotAllowed,
            MsgCode::NOT_ACCEPTABLE => Self::NotAcceptable,
            MsgCode::PRECONDITION_FAILED => Self::PreconditionFailed,
            MsgCode::ENTITY_TOO_LARGE => Self::EntityTooLarge,
            MsgCode::UNSUPPORTED_CONTENT_FORMAT => Self::UnsupportedContentFormat,
            MsgCode::INTERNAL_SERVER_ERROR => Self::InternalServerError,
            MsgCode::NOT_IMPLEMENTED => Self::NotImplemented,
            MsgCode::BAD_GATEWAY => Self::BadGateway,
            MsgCode::SERVICE_UNAVAILABLE => Self::ServiceUnavailable,
            MsgCode::GATEWAY_TIMEOUT => Self::GatewayTimeout,
            MsgCode::WROTE_TO_OFFLINE_MSG_STORE => Self::WroteToOfflineStore,
            _ => Self::Unknown,
        }
    }

    /// The response code a request callback answers with.
    pub fn to_msg_code(self) -> MsgCode {
        match self {
            Self::Ok => MsgCode::SUCCESS,
            Self::BadRequest => MsgCode::BAD_REQUEST,
            Self::Unauthorized => MsgCode::UNAUTHORIZED,
            Self::BadOption => MsgCode::BAD_OPTION,
            Self::Forbidden => MsgCode::FORBIDDEN,
            Self::NotFound => MsgCode::NOT_FOUND,
            Self::MethodNotAllowed => MsgCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable => MsgCode::NOT_ACCEPTABLE,
            Self::PreconditionFailed => MsgCode::PRECONDITION_FAILED,
            Self::EntityTooLarge => MsgCode::ENTITY_TOO_LARGE,
            Self::UnsupportedContentFormat => MsgCode::UNSUPPORTED_CONTENT_FORMAT,
            Self::InternalServerError => MsgCode::INTERNAL_SERVER_ERROR,
            Self::NotImplemented => MsgCode::NOT_IMPLEMENTED,
            Self::BadGateway => MsgCode::BAD_GATEWAY,
            Self::ServiceUnavailable => MsgCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout => MsgCode::GATEWAY_TIMEOUT,
            Self::WroteToOfflineStore => MsgCode::WROTE_TO_OFFLINE_MSG_STORE,
            Self::Unknown => MsgCode::UNKNOWN,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadOption => "BAD_OPTION",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::NotAcceptable => "NOT_ACCEPTABLE",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::EntityTooLarge => "ENTITY_TOO_LARGE",
            Self::UnsupportedContentFormat => "UNSUPPORTED_CONTENT_FORMAT",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::BadGateway => "BAD_GATEWAY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::GatewayTimeout => "GATEWAY_TIMEOUT",
            Self::WroteToOfflineStore => "WROTE_TO_OFFLINE_STORE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
