//! Message bodies.
//!
//! Each body type knows its exact encoded size so the writer can decide on
//! chunking before serializing anything.

use bytes::Bytes;
use thingwire_codec::{
    encoded_string_len, string_from_stream, string_to_stream, BaseType, CodecError, InfoTable,
    TwStream,
};

use crate::codes::{Characteristic, EntityType};
use crate::error::Result;

/// Gateway type sent with bind messages when a gateway name is configured.
pub const DEFAULT_GATEWAY_TYPE: &str = "SDKGateway";

/// A name/value header carried by a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Body of a GET, PUT, POST or DEL message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestBody {
    pub entity_type: EntityType,
    pub entity_name: String,
    pub characteristic: Characteristic,
    pub characteristic_name: String,
    pub headers: Vec<Header>,
    pub params: Option<InfoTable>,
}

impl RequestBody {
    pub fn new(
        entity_type: EntityType,
        entity_name: impl Into<String>,
        characteristic: Characteristic,
        characteristic_name: impl Into<String>,
    ) -> Self {
        Self {
            entity_type,
            entity_name: entity_name.into(),
            characteristic,
            characteristic_name: characteristic_name.into(),
            headers: Vec::new(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: InfoTable) -> Self {
        self.params = Some(params);
        self
    }

    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push(Header {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Size of the `[entityType][entityName]` prefix.
    pub fn entity_header_len(&self) -> usize {
        1 + encoded_string_len(&self.entity_name)
    }

    pub fn encoded_len(&self) -> usize {
        self.entity_header_len()
            + 1
            + encoded_string_len(&self.characteristic_name)
            + 1
            + self
                .headers
                .iter()
                .map(|h| encoded_string_len(&h.name) + encoded_string_len(&h.value))
                .sum::<usize>()
            + 1
            + self.params.as_ref().map_or(0, InfoTable::encoded_len)
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        let header_count = u8::try_from(self.headers.len()).map_err(|_| {
            CodecError::TooManyEntries {
                count: self.headers.len(),
                max: usize::from(u8::MAX),
            }
        })?;
        stream.add_bytes(&[self.entity_type.0]);
        string_to_stream(&self.entity_name, stream)?;
        stream.add_bytes(&[self.characteristic.0]);
        string_to_stream(&self.characteristic_name, stream)?;
        stream.add_bytes(&[header_count]);
        for header in &self.headers {
            string_to_stream(&header.name, stream)?;
            string_to_stream(&header.value, stream)?;
        }
        match &self.params {
            Some(table) => {
                stream.add_bytes(&[BaseType::InfoTable.as_byte()]);
                table.to_stream(stream)?;
            }
            None => stream.add_bytes(&[BaseType::Nothing.as_byte()]),
        }
        Ok(())
    }

    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        let entity_type = EntityType(stream.read_u8()?);
        let entity_name = string_from_stream(stream)?;
        let characteristic = Characteristic(stream.read_u8()?);
        let characteristic_name = string_from_stream(stream)?;
        let header_count = stream.read_u8()?;
        let mut headers = Vec::with_capacity(usize::from(header_count));
        for _ in 0..header_count {
            let name = string_from_stream(stream)?;
            let value = string_from_stream(stream)?;
            headers.push(Header { name, value });
        }
        let params = if stream.read_u8()? == BaseType::InfoTable.as_byte() {
            Some(InfoTable::from_stream(stream)?)
        } else {
            None
        };
        Ok(Self {
            entity_type,
            entity_name,
            characteristic,
            characteristic_name,
            headers,
            params,
        })
    }
}

/// Body of a response message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponseBody {
    pub reason: Option<String>,
    pub content: Option<InfoTable>,
}

impl ResponseBody {
    pub fn with_content(content: InfoTable) -> Self {
        Self {
            reason: None,
            content: Some(content),
        }
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            content: None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.reason.as_deref().map_or(0, encoded_string_len)
            + 1
            + self.content.as_ref().map_or(0, InfoTable::encoded_len)
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        match &self.reason {
            Some(reason) => {
                stream.add_bytes(&[1]);
                string_to_stream(reason, stream)?;
            }
            None => stream.add_bytes(&[0]),
        }
        match &self.content {
            Some(table) => {
                stream.add_bytes(&[BaseType::InfoTable.as_byte()]);
                table.to_stream(stream)?;
            }
            None => stream.add_bytes(&[BaseType::Nothing.as_byte()]),
        }
        Ok(())
    }

    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        let reason = if stream.read_u8()? != 0 {
            Some(string_from_stream(stream)?)
        } else {
            None
        };
        let content = if stream.read_u8()? == BaseType::InfoTable.as_byte() {
            Some(InfoTable::from_stream(stream)?)
        } else {
            None
        };
        Ok(Self { reason, content })
    }
}

/// Body of an AUTH message: a single claim.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct AuthBody {
    pub name: String,
    pub value: String,
}

impl AuthBody {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + encoded_string_len(&self.name) + encoded_string_len(&self.value)
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        stream.add_bytes(&[1]);
        string_to_stream(&self.name, stream)?;
        string_to_stream(&self.value, stream)?;
        Ok(())
    }

    /// A claim count of zero yields an empty claim.
    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        if stream.read_u8()? == 0 {
            return Ok(Self::default());
        }
        let name = string_from_stream(stream)?;
        let value = string_from_stream(stream)?;
        Ok(Self { name, value })
    }
}

impl std::fmt::Debug for AuthBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthBody")
            .field("name", &self.name)
            .field("value", &format_args!("<redacted:{} bytes>", self.value.len()))
            .finish()
    }
}

/// Gateway identity attached to a bind message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayInfo {
    pub name: String,
    pub gateway_type: String,
}

/// Body of a BIND or UNBIND message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BindBody {
    pub gateway: Option<GatewayInfo>,
    pub names: Vec<String>,
}

impl BindBody {
    pub fn new(name: Option<String>) -> Self {
        Self {
            gateway: None,
            names: name.into_iter().collect(),
        }
    }

    pub fn add_name(&mut self, name: impl Into<String>) {
        self.names.push(name.into());
    }

    /// Attach a gateway with the default gateway type.
    pub fn with_gateway(mut self, name: impl Into<String>) -> Self {
        self.gateway = Some(GatewayInfo {
            name: name.into(),
            gateway_type: DEFAULT_GATEWAY_TYPE.to_string(),
        });
        self
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.gateway.as_ref().map_or(0, |g| {
            encoded_string_len(&g.name) + encoded_string_len(&g.gateway_type)
        }) + 2
            + self.names.iter().map(|n| encoded_string_len(n)).sum::<usize>()
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        let count = u16::try_from(self.names.len()).map_err(|_| CodecError::TooManyEntries {
            count: self.names.len(),
            max: usize::from(u16::MAX),
        })?;
        match &self.gateway {
            Some(gateway) => {
                stream.add_bytes(&[1]);
                string_to_stream(&gateway.name, stream)?;
                string_to_stream(&gateway.gateway_type, stream)?;
            }
            None => stream.add_bytes(&[0]),
        }
        stream.add_bytes(&count.to_be_bytes());
        for name in &self.names {
            string_to_stream(name, stream)?;
        }
        Ok(())
    }

    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        let gateway = if stream.read_u8()? != 0 {
            let name = string_from_stream(stream)?;
            let gateway_type = string_from_stream(stream)?;
            Some(GatewayInfo { name, gateway_type })
        } else {
            None
        };
        let count = stream.read_u16()?;
        let mut names = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            names.push(string_from_stream(stream)?);
        }
        Ok(Self { gateway, names })
    }
}

/// One physical chunk of a multipart message.
///
/// Request chunks carry the entity type and name after the sub-header; the
/// first chunk gets them from the start of the request body itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartBody {
    pub chunk_id: u16,
    pub chunk_count: u16,
    pub chunk_size: u16,
    pub entity: Option<(EntityType, String)>,
    pub data: Bytes,
}

impl MultipartBody {
    pub fn encoded_len(&self) -> usize {
        6 + self
            .entity
            .as_ref()
            .map_or(0, |(_, name)| 1 + encoded_string_len(name))
            + self.data.len()
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        stream.add_bytes(&self.chunk_id.to_be_bytes());
        stream.add_bytes(&self.chunk_count.to_be_bytes());
        stream.add_bytes(&self.chunk_size.to_be_bytes());
        if let Some((entity_type, name)) = &self.entity {
            stream.add_bytes(&[entity_type.0]);
            string_to_stream(name, stream)?;
        }
        stream.add_bytes(&self.data);
        Ok(())
    }

    /// Parse a chunk; the data is everything left in the stream.
    pub fn from_stream(stream: &mut TwStream, is_request: bool) -> Result<Self> {
        let chunk_id = stream.read_u16()?;
        let chunk_count = stream.read_u16()?;
        let chunk_size = stream.read_u16()?;
        let entity = if is_request {
            let entity_type = EntityType(stream.read_u8()?);
            Some((entity_type, string_from_stream(stream)?))
        } else {
            None
        };
        Ok(Self {
            chunk_id,
            chunk_count,
            chunk_size,
            entity,
            data: stream.read_remaining(),
        })
    }
}

/// The type-specific part of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Request(RequestBody),
    Response(ResponseBody),
    Bind(BindBody),
    Auth(AuthBody),
    Multipart(MultipartBody),
}

impl Body {
    pub fn encoded_len(&self) -> usize {
        match self {
            Body::Request(b) => b.encoded_len(),
            Body::Response(b) => b.encoded_len(),
            Body::Bind(b) => b.encoded_len(),
            Body::Auth(b) => b.encoded_len(),
            Body::Multipart(b) => b.encoded_len(),
        }
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        match self {
            Body::Request(b) => b.to_stream(stream),
            Body::Response(b) => b.to_stream(stream),
            Body::Bind(b) => b.to_stream(stream),
            Body::Auth(b) => b.to_stream(stream),
            Body::Multipart(b) => b.to_stream(stream),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Body::Request(_) => "request",
            Body::Response(_) => "response",
            Body::Bind(_) => "bind",
            Body::Auth(_) => "auth",
            Body::Multipart(_) => "multipart",
        }
    }
}
