use crate::base_type::BaseType;

/// Errors that can occur while encoding or decoding protocol values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The stream ended before a complete value could be read.
    #[error("stream truncated (needed {needed} bytes, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// The type tag does not name any known base type.
    #[error("unknown base type tag 0x{0:02x}")]
    UnknownType(u8),

    /// The base type is known but has no wire encoding.
    #[error("base type {0} is not supported on the wire")]
    UnsupportedType(BaseType),

    /// A string value was not valid UTF-8.
    #[error("invalid UTF-8 in string value: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A length does not fit its size prefix.
    #[error("length {len} exceeds the {max} byte limit")]
    LengthOverflow { len: usize, max: usize },

    /// A counted list does not fit its 2-byte count prefix.
    #[error("too many entries ({count}, max {max})")]
    TooManyEntries { count: usize, max: usize },

    /// The named column is not part of the data shape.
    #[error("column '{0}' not found in data shape")]
    ColumnNotFound(String),

    /// The requested row does not exist.
    #[error("row {row} out of range ({rows} rows)")]
    RowOutOfRange { row: usize, rows: usize },

    /// A value has a different type than the caller asked for.
    #[error("type mismatch (expected {expected}, found {found})")]
    TypeMismatch { expected: BaseType, found: BaseType },

    /// A variant wrapped another variant.
    #[error("variant value may not contain another variant")]
    NestedVariant,

    /// Tables and variants are nested deeper than the decoder allows.
    #[error("value nesting exceeds {max} levels")]
    NestingTooDeep { max: usize },

    /// A base type name could not be parsed.
    #[error("unknown base type name '{0}'")]
    UnknownTypeName(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
