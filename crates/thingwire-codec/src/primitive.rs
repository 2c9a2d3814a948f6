use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::base_type::{BaseType, TypeFamily};
use crate::error::{CodecError, Result};
use crate::infotable::InfoTable;
use crate::stream::TwStream;

/// Largest string length the 4-byte long-form prefix can carry.
pub const MAX_STRING_LEN: usize = 0x7FFF_FFFF;

/// How many variants and nested tables a decoded value may sit inside.
pub const MAX_NESTING_DEPTH: usize = 32;

const SHORT_STRING_MAX: usize = 127;
const LONG_FORM_FLAG: u32 = 0x8000_0000;

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
}

/// Payload of a [`Primitive`], one variant per wire encoding family.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nothing,
    String(String),
    Number(f64),
    Integer(i32),
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Datetime(i64),
    Location(Location),
    Blob(Bytes),
    Variant(Box<Primitive>),
    InfoTable(Box<InfoTable>),
}

/// A type-tagged value.
///
/// The logical [`BaseType`] and the [`Value`] variant always agree on the
/// wire family: a `ThingName` primitive carries a `Value::String`, an `Image`
/// carries a `Value::Blob`, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    base_type: BaseType,
    value: Value,
}

impl Primitive {
    pub fn nothing() -> Self {
        Self {
            base_type: BaseType::Nothing,
            value: Value::Nothing,
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Self {
            base_type: BaseType::String,
            value: Value::String(s.into()),
        }
    }

    /// A string-family value with a specific logical type (`Json`,
    /// `ThingName`, ...).
    pub fn typed_string(base_type: BaseType, s: impl Into<String>) -> Result<Self> {
        if base_type.family() != TypeFamily::String {
            return Err(CodecError::TypeMismatch {
                expected: BaseType::String,
                found: base_type,
            });
        }
        Ok(Self {
            base_type,
            value: Value::String(s.into()),
        })
    }

    pub fn number(n: f64) -> Self {
        Self {
            base_type: BaseType::Number,
            value: Value::Number(n),
        }
    }

    pub fn integer(n: i32) -> Self {
        Self {
            base_type: BaseType::Integer,
            value: Value::Integer(n),
        }
    }

    pub fn boolean(b: bool) -> Self {
        Self {
            base_type: BaseType::Boolean,
            value: Value::Boolean(b),
        }
    }

    /// A datetime from milliseconds since the Unix epoch.
    pub fn datetime(millis: i64) -> Self {
        Self {
            base_type: BaseType::Datetime,
            value: Value::Datetime(millis),
        }
    }

    /// A datetime holding the current wall-clock time.
    pub fn current_time() -> Self {
        Self::datetime(now_millis())
    }

    pub fn location(location: Location) -> Self {
        Self {
            base_type: BaseType::Location,
            value: Value::Location(location),
        }
    }

    pub fn blob(data: impl Into<Bytes>) -> Self {
        Self {
            base_type: BaseType::Blob,
            value: Value::Blob(data.into()),
        }
    }

    pub fn image(data: impl Into<Bytes>) -> Self {
        Self {
            base_type: BaseType::Image,
            value: Value::Blob(data.into()),
        }
    }

    /// Wrap another primitive one level deep.
    /// Wrap a value with its own type tag. Wrapping a variant again keeps
    /// the single level of indirection the wire allows.
    pub fn variant(inner: Primitive) -> Self {
        let inner = match inner {
            Primitive {
                value: Value::Variant(wrapped),
                ..
            } => *wrapped,
            other => other,
        };
        Self {
            base_type: BaseType::Variant,
            value: Value::Variant(Box::new(inner)),
        }
    }

    pub fn infotable(table: InfoTable) -> Self {
        Self {
            base_type: BaseType::InfoTable,
            value: Value::InfoTable(Box::new(table)),
        }
    }

    pub fn base_type(&self) -> BaseType {
        self.base_type
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Bytes produced by [`Primitive::to_stream`], including the type tag.
    pub fn encoded_len(&self) -> usize {
        1 + self.value_len()
    }

    /// Bytes produced by the payload alone.
    pub fn value_len(&self) -> usize {
        match &self.value {
            Value::Nothing => 0,
            Value::String(s) => encoded_string_len(s),
            Value::Number(_) | Value::Datetime(_) => 8,
            Value::Integer(_) => 4,
            Value::Boolean(_) => 1,
            Value::Location(_) => 24,
            Value::Blob(b) => 4 + b.len(),
            Value::Variant(inner) => inner.encoded_len(),
            Value::InfoTable(table) => table.encoded_len(),
        }
    }

    /// Write the type tag followed by the payload.
    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        stream.add_bytes(&[self.base_type.as_byte()]);
        self.value_to_stream(stream)
    }

    /// Write the payload only, for contexts where the type is implied.
    pub fn value_to_stream(&self, stream: &mut TwStream) -> Result<()> {
        match &self.value {
            Value::Nothing => {}
            Value::String(s) => string_to_stream(s, stream)?,
            Value::Number(n) => stream.add_bytes(&n.to_be_bytes()),
            Value::Integer(n) => stream.add_bytes(&n.to_be_bytes()),
            Value::Boolean(b) => stream.add_bytes(&[u8::from(*b)]),
            Value::Datetime(ms) => stream.add_bytes(&ms.to_be_bytes()),
            Value::Location(loc) => {
                stream.add_bytes(&loc.longitude.to_be_bytes());
                stream.add_bytes(&loc.latitude.to_be_bytes());
                stream.add_bytes(&loc.elevation.to_be_bytes());
            }
            Value::Blob(data) => {
                let len = u32::try_from(data.len()).map_err(|_| CodecError::LengthOverflow {
                    len: data.len(),
                    max: u32::MAX as usize,
                })?;
                stream.add_bytes(&len.to_be_bytes());
                stream.add_bytes(data);
            }
            Value::Variant(inner) => inner.to_stream(stream)?,
            Value::InfoTable(table) => table.to_stream(stream)?,
        }
        Ok(())
    }

    /// Read a type tag and then the payload it announces.
    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        Self::from_stream_at(stream, 0)
    }

    /// Read a payload whose type is already known from context.
    pub fn from_stream_typed(stream: &mut TwStream, base_type: BaseType) -> Result<Self> {
        Self::from_stream_typed_at(stream, base_type, 0)
    }

    pub(crate) fn from_stream_at(stream: &mut TwStream, depth: usize) -> Result<Self> {
        let base_type = read_tag(stream)?;
        Self::from_stream_typed_at(stream, base_type, depth)
    }

    /// `depth` counts the variants and tables enclosing this value.
    pub(crate) fn from_stream_typed_at(
        stream: &mut TwStream,
        base_type: BaseType,
        depth: usize,
    ) -> Result<Self> {
        let value = match base_type.family() {
            TypeFamily::Nothing => Value::Nothing,
            TypeFamily::String => Value::String(string_from_stream(stream)?),
            TypeFamily::Number => Value::Number(f64::from_be_bytes(stream.read_array()?)),
            TypeFamily::Integer => Value::Integer(i32::from_be_bytes(stream.read_array()?)),
            TypeFamily::Boolean => Value::Boolean(stream.read_u8()? != 0),
            TypeFamily::Datetime => Value::Datetime(i64::from_be_bytes(stream.read_array()?)),
            TypeFamily::Location => Value::Location(Location {
                longitude: f64::from_be_bytes(stream.read_array()?),
                latitude: f64::from_be_bytes(stream.read_array()?),
                elevation: f64::from_be_bytes(stream.read_array()?),
            }),
            TypeFamily::Blob => {
                let len = stream.read_u32()? as usize;
                Value::Blob(Bytes::copy_from_slice(stream.read_slice(len)?))
            }
            TypeFamily::Variant => {
                // A variant is a single level of indirection.
                let inner = read_tag(stream)?;
                if inner.family() == TypeFamily::Variant {
                    return Err(CodecError::NestedVariant);
                }
                let depth = enter(depth)?;
                Value::Variant(Box::new(Self::from_stream_typed_at(stream, inner, depth)?))
            }
            TypeFamily::InfoTable => {
                Value::InfoTable(Box::new(InfoTable::from_stream_at(stream, depth)?))
            }
            TypeFamily::Unsupported => return Err(CodecError::UnsupportedType(base_type)),
        };
        Ok(Self { base_type, value })
    }

    /// An independent deep copy produced by a stream round trip.
    pub fn full_copy(&self) -> Result<Self> {
        let mut stream = TwStream::new();
        self.to_stream(&mut stream)?;
        Self::from_stream(&mut stream)
    }

    /// Move the value out, leaving `Nothing` behind.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::nothing())
    }

    /// The owned string payload, if this is a string-family value.
    pub fn into_string(self) -> Option<String> {
        match self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self.value, Value::Nothing)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.value {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self.value {
            Value::Integer(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.value {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<i64> {
        match self.value {
            Value::Datetime(ms) => Some(ms),
            _ => None,
        }
    }

    pub fn as_location(&self) -> Option<Location> {
        match self.value {
            Value::Location(loc) => Some(loc),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Bytes> {
        match &self.value {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_variant(&self) -> Option<&Primitive> {
        match &self.value {
            Value::Variant(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn as_infotable(&self) -> Option<&InfoTable> {
        match &self.value {
            Value::InfoTable(table) => Some(table),
            _ => None,
        }
    }

    /// Take the nested table out, if this is an info table value.
    pub fn into_infotable(self) -> Option<InfoTable> {
        match self.value {
            Value::InfoTable(table) => Some(*table),
            _ => None,
        }
    }
}

impl Default for Primitive {
    fn default() -> Self {
        Self::nothing()
    }
}

impl From<&str> for Primitive {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Primitive {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<f64> for Primitive {
    fn from(n: f64) -> Self {
        Self::number(n)
    }
}

impl From<i32> for Primitive {
    fn from(n: i32) -> Self {
        Self::integer(n)
    }
}

impl From<bool> for Primitive {
    fn from(b: bool) -> Self {
        Self::boolean(b)
    }
}

impl From<Location> for Primitive {
    fn from(loc: Location) -> Self {
        Self::location(loc)
    }
}

impl From<InfoTable> for Primitive {
    fn from(table: InfoTable) -> Self {
        Self::infotable(table)
    }
}

/// Encoded size of a length-prefixed string.
pub fn encoded_string_len(s: &str) -> usize {
    let len = s.len();
    if len <= SHORT_STRING_MAX {
        1 + len
    } else {
        4 + len
    }
}

/// Write a length-prefixed string.
pub fn string_to_stream(s: &str, stream: &mut TwStream) -> Result<()> {
    let len = s.len();
    if len > MAX_STRING_LEN {
        return Err(CodecError::LengthOverflow {
            len,
            max: MAX_STRING_LEN,
        });
    }
    if len <= SHORT_STRING_MAX {
        stream.add_bytes(&[len as u8]);
    } else {
        stream.add_bytes(&(len as u32 | LONG_FORM_FLAG).to_be_bytes());
    }
    stream.add_bytes(s.as_bytes());
    Ok(())
}

/// Read a length-prefixed string.
pub fn string_from_stream(stream: &mut TwStream) -> Result<String> {
    let first = stream.read_u8()?;
    let len = if first & 0x80 == 0 {
        usize::from(first)
    } else {
        let rest: [u8; 3] = stream.read_array()?;
        u32::from_be_bytes([first & 0x7F, rest[0], rest[1], rest[2]]) as usize
    };
    let bytes = stream.read_slice(len)?.to_vec();
    Ok(String::from_utf8(bytes)?)
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn read_tag(stream: &mut TwStream) -> Result<BaseType> {
    let tag = stream.read_u8()?;
    BaseType::from_byte(tag).ok_or(CodecError::UnknownType(tag))
}

/// Step one nesting level down, failing past [`MAX_NESTING_DEPTH`].
pub(crate) fn enter(depth: usize) -> Result<usize> {
    let next = depth + 1;
    if next > MAX_NESTING_DEPTH {
        return Err(CodecError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    Ok(next)
}
