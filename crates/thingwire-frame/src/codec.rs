use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use thingwire_codec::TwStream;

use crate::body::{AuthBody, BindBody, Body, MultipartBody, RequestBody, ResponseBody};
use crate::codes::MsgCode;
use crate::error::{FrameError, Result};

/// Message header: version (1) + code (1) + request id (4) + endpoint id (4)
/// + session id (4) + multipart flag (1) = 15 bytes.
pub const HEADER_SIZE: usize = 15;

/// Multipart sub-header: chunk id (2) + chunk count (2) + chunk size (2).
pub const MULTIPART_HEADER_SIZE: usize = 6;

/// Protocol version carried in every header.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Default physical frame size.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Default maximum reassembled message size.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16384;

/// Offset of the session id inside an encoded header.
pub const SESSION_ID_OFFSET: usize = 10;

/// A protocol message: fixed header plus a typed body.
///
/// Wire format:
/// ```text
/// ┌─────────┬──────┬────────────┬─────────────┬────────────┬───────────┬──────────┐
/// │ Version │ Code │ Request id │ Endpoint id │ Session id │ Multipart │ Body     │
/// │ (1B)    │ (1B) │ (4B BE)    │ (4B BE)     │ (4B BE)    │ (1B)      │          │
/// └─────────┴──────┴────────────┴─────────────┴────────────┴───────────┴──────────┘
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub version: u8,
    pub code: MsgCode,
    /// Zero means "assign the next id" (see [`RequestIdGenerator::assign`]).
    pub request_id: u32,
    pub endpoint_id: u32,
    pub session_id: u32,
    pub multipart: bool,
    pub body: Body,
}

impl Message {
    fn with_body(code: MsgCode, request_id: u32, body: Body) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            code,
            request_id,
            endpoint_id: 0,
            session_id: 0,
            multipart: false,
            body,
        }
    }

    /// A request message with an empty body and an unassigned id.
    pub fn request(code: MsgCode) -> Result<Self> {
        if !code.is_request() {
            return Err(FrameError::InvalidCode {
                code: code.0,
                expected: "request",
            });
        }
        Ok(Self::with_body(code, 0, Body::Request(RequestBody::default())))
    }

    /// A response to the request with id `request_id`.
    pub fn response(code: MsgCode, request_id: u32) -> Result<Self> {
        if !code.is_response() {
            return Err(FrameError::InvalidCode {
                code: code.0,
                expected: "response",
            });
        }
        Ok(Self::with_body(
            code,
            request_id,
            Body::Response(ResponseBody::default()),
        ))
    }

    /// A BIND (or UNBIND) message, optionally carrying one entity name.
    pub fn bind(name: Option<String>, unbind: bool) -> Self {
        let code = if unbind { MsgCode::UNBIND } else { MsgCode::BIND };
        Self::with_body(code, 0, Body::Bind(BindBody::new(name)))
    }

    /// An AUTH message carrying one claim.
    pub fn auth(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_body(MsgCode::AUTH, 0, Body::Auth(AuthBody::new(name, value)))
    }

    pub fn request_body(&self) -> Option<&RequestBody> {
        match &self.body {
            Body::Request(b) => Some(b),
            _ => None,
        }
    }

    pub fn request_body_mut(&mut self) -> Option<&mut RequestBody> {
        match &mut self.body {
            Body::Request(b) => Some(b),
            _ => None,
        }
    }

    pub fn response_body(&self) -> Option<&ResponseBody> {
        match &self.body {
            Body::Response(b) => Some(b),
            _ => None,
        }
    }

    pub fn response_body_mut(&mut self) -> Option<&mut ResponseBody> {
        match &mut self.body {
            Body::Response(b) => Some(b),
            _ => None,
        }
    }

    pub fn bind_body(&self) -> Option<&BindBody> {
        match &self.body {
            Body::Bind(b) => Some(b),
            _ => None,
        }
    }

    pub fn bind_body_mut(&mut self) -> Option<&mut BindBody> {
        match &mut self.body {
            Body::Bind(b) => Some(b),
            _ => None,
        }
    }

    pub fn auth_body(&self) -> Option<&AuthBody> {
        match &self.body {
            Body::Auth(b) => Some(b),
            _ => None,
        }
    }

    pub fn multipart_body(&self) -> Option<&MultipartBody> {
        match &self.body {
            Body::Multipart(b) => Some(b),
            _ => None,
        }
    }

    /// Header plus body size of the unchunked message.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.body.encoded_len()
    }

    /// Write the 15-byte header with an explicit session id and multipart flag.
    pub fn put_header(&self, session_id: u32, multipart: bool, dst: &mut BytesMut) {
        dst.put_u8(self.version);
        dst.put_u8(self.code.0);
        dst.put_u32(self.request_id);
        dst.put_u32(self.endpoint_id);
        dst.put_u32(session_id);
        dst.put_u8(u8::from(multipart));
    }

    /// Encode as a single frame, exactly as stored in the message.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut body = TwStream::new();
        self.body.to_stream(&mut body)?;
        let mut dst = BytesMut::with_capacity(HEADER_SIZE + body.len());
        self.put_header(self.session_id, self.multipart, &mut dst);
        dst.put_slice(body.data());
        Ok(dst.freeze())
    }

    /// Decode one physical frame.
    ///
    /// The body layout is chosen from the code: requests and responses become
    /// multipart chunks when the multipart flag is set.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut s = TwStream::from_slice(data);
        let version = s.read_u8()?;
        let code = MsgCode(s.read_u8()?);
        let request_id = s.read_u32()?;
        let endpoint_id = s.read_u32()?;
        let session_id = s.read_u32()?;
        let multipart = s.read_u8()? != 0;

        let body = if code.is_request() {
            if multipart {
                Body::Multipart(MultipartBody::from_stream(&mut s, true)?)
            } else {
                Body::Request(RequestBody::from_stream(&mut s)?)
            }
        } else if code == MsgCode::AUTH {
            Body::Auth(AuthBody::from_stream(&mut s)?)
        } else if code.is_bind() {
            Body::Bind(BindBody::from_stream(&mut s)?)
        } else if code.is_response() {
            if multipart {
                Body::Multipart(MultipartBody::from_stream(&mut s, false)?)
            } else {
                Body::Response(ResponseBody::from_stream(&mut s)?)
            }
        } else {
            return Err(FrameError::UnknownCode(code.0));
        };

        Ok(Self {
            version,
            code,
            request_id,
            endpoint_id,
            session_id,
            multipart,
            body,
        })
    }
}

/// Source of request ids for one client context.
///
/// Ids start at 1 and skip 0 on wrap-around, since 0 means "unassigned".
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: AtomicU32,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u32 {
        loop {
            let id = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Give `msg` a fresh id if it has none. Returns the id in use.
    pub fn assign(&self, msg: &mut Message) -> u32 {
        if msg.request_id == 0 {
            msg.request_id = self.next_id();
        }
        msg.request_id
    }
}

/// Size limits for chunking and reassembly.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest physical frame, headers included. Default: 8192.
    pub chunk_size: usize,
    /// Largest reassembled multipart message. Default: 16384.
    pub max_message_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use thingwire_codec::InfoTable;

    use super::*;
    use crate::codes::{Characteristic, EntityType};

    #[test]
    fn header_layout() {
        let mut msg = Message::response(MsgCode::SUCCESS, 0x0102_0304).unwrap();
        msg.endpoint_id = 7;
        msg.session_id = 0xAABB_CCDD;
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(
            &bytes[..HEADER_SIZE],
            &[
                0x01, 0x40, 0x01, 0x02, 0x03, 0x04, 0, 0, 0, 7, 0xAA, 0xBB, 0xCC, 0xDD, 0x00
            ]
        );
        assert_eq!(bytes.len(), msg.encoded_len());
    }

    #[test]
    fn request_roundtrip() {
        let mut msg = Message::request(MsgCode::POST).unwrap();
        msg.request_id = 9;
        *msg.request_body_mut().unwrap() =
            RequestBody::new(EntityType::THING, "Pump", Characteristic::SERVICES, "Run")
                .with_params(InfoTable::from_string("mode", "fast"));
        let back = Message::decode(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn decode_dispatches_on_code() {
        let auth = Message::auth("appKey", "k");
        assert!(Message::decode(&auth.to_bytes().unwrap())
            .unwrap()
            .auth_body()
            .is_some());

        let unbind = Message::bind(Some("Pump".into()), true);
        let back = Message::decode(&unbind.to_bytes().unwrap()).unwrap();
        assert_eq!(back.code, MsgCode::UNBIND);
        assert_eq!(back.bind_body().unwrap().names, vec!["Pump".to_string()]);

        let resp = Message::response(MsgCode::NOT_FOUND, 3).unwrap();
        assert!(Message::decode(&resp.to_bytes().unwrap())
            .unwrap()
            .response_body()
            .is_some());
    }

    #[test]
    fn decode_multipart_flag_yields_chunk() {
        let mut frame = BytesMut::new();
        let msg = Message::response(MsgCode::SUCCESS, 5).unwrap();
        msg.put_header(0, true, &mut frame);
        frame.put_slice(&[0, 1, 0, 2, 0x20, 0x00, 0xDE, 0xAD]);
        let back = Message::decode(&frame).unwrap();
        let chunk = back.multipart_body().unwrap();
        assert_eq!((chunk.chunk_id, chunk.chunk_count), (1, 2));
        assert_eq!(chunk.data.as_ref(), &[0xDE, 0xAD]);
    }

    #[test]
    fn unknown_code_is_rejected() {
        let mut frame = vec![0x01, 0x1F];
        frame.extend_from_slice(&[0; 13]);
        assert!(matches!(
            Message::decode(&frame),
            Err(FrameError::UnknownCode(0x1F))
        ));
    }

    #[test]
    fn truncated_header_is_rejected() {
        assert!(matches!(
            Message::decode(&[0x01, 0x40, 0x00]),
            Err(FrameError::Codec(_))
        ));
    }

    #[test]
    fn constructors_validate_codes() {
        assert!(Message::request(MsgCode::SUCCESS).is_err());
        assert!(Message::response(MsgCode::GET, 1).is_err());
        assert_eq!(Message::bind(None, false).code, MsgCode::BIND);
    }

    #[test]
    fn id_generator_assigns_only_unset_ids() {
        let ids = RequestIdGenerator::new();
        let mut a = Message::request(MsgCode::GET).unwrap();
        let mut b = Message::response(MsgCode::SUCCESS, 77).unwrap();
        assert_eq!(ids.assign(&mut a), 1);
        assert_eq!(ids.assign(&mut a), 1);
        assert_eq!(ids.assign(&mut b), 77);
        assert_eq!(ids.next_id(), 2);
    }

    #[test]
    fn id_generator_skips_zero_on_wrap() {
        let ids = RequestIdGenerator {
            last: AtomicU32::new(u32::MAX - 1),
        };
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 1);
    }
}
