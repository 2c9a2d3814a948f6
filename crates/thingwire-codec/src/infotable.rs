use bytes::Bytes;
use tracing::{trace, warn};

use crate::base_type::BaseType;
use crate::error::{CodecError, Result};
use crate::primitive::{
    encoded_string_len, enter, string_from_stream, string_to_stream, Location, Primitive,
};
use crate::stream::TwStream;

const ENTRY_MARKER: u8 = 0x01;
const END_MARKER: u8 = 0x00;

/// A named metadata value attached to a column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct DataShapeAspect {
    pub name: String,
    pub value: Primitive,
}

impl DataShapeAspect {
    pub fn new(name: impl Into<String>, value: Primitive) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    fn encoded_len(&self) -> usize {
        encoded_string_len(&self.name) + self.value.encoded_len()
    }
}

/// One column of a [`DataShape`].
#[derive(Debug, Clone, PartialEq)]
pub struct DataShapeEntry {
    pub name: String,
    pub description: String,
    pub base_type: BaseType,
    pub aspects: Vec<DataShapeAspect>,
}

impl DataShapeEntry {
    pub fn new(name: impl Into<String>, description: impl Into<String>, base_type: BaseType) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            base_type,
            aspects: Vec::new(),
        }
    }

    pub fn add_aspect(&mut self, name: impl Into<String>, value: Primitive) {
        self.aspects.push(DataShapeAspect::new(name, value));
    }

    /// Builder form of [`DataShapeEntry::add_aspect`].
    pub fn with_aspect(mut self, name: impl Into<String>, value: Primitive) -> Self {
        self.add_aspect(name, value);
        self
    }

    /// Encoded size, including the leading entry marker.
    pub fn encoded_len(&self) -> usize {
        1 + encoded_string_len(&self.name)
            + encoded_string_len(&self.description)
            + 1
            + 2
            + self.aspects.iter().map(DataShapeAspect::encoded_len).sum::<usize>()
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        let count = count_u16(self.aspects.len())?;
        stream.add_bytes(&[ENTRY_MARKER]);
        string_to_stream(&self.name, stream)?;
        string_to_stream(&self.description, stream)?;
        stream.add_bytes(&[self.base_type.as_byte()]);
        stream.add_bytes(&count.to_be_bytes());
        for aspect in &self.aspects {
            string_to_stream(&aspect.name, stream)?;
            aspect.value.to_stream(stream)?;
        }
        Ok(())
    }

    /// Read one entry, or `None` when the end marker is found.
    pub fn from_stream(stream: &mut TwStream) -> Result<Option<Self>> {
        Self::from_stream_at(stream, 0)
    }

    fn from_stream_at(stream: &mut TwStream, depth: usize) -> Result<Option<Self>> {
        if stream.read_u8()? == END_MARKER {
            return Ok(None);
        }
        let name = string_from_stream(stream)?;
        let description = string_from_stream(stream)?;
        let tag = stream.read_u8()?;
        let base_type = BaseType::from_byte(tag).ok_or(CodecError::UnknownType(tag))?;
        let count = stream.read_u16()?;
        let mut aspects = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let aspect_name = string_from_stream(stream)?;
            let value = Primitive::from_stream_at(stream, depth)?;
            aspects.push(DataShapeAspect::new(aspect_name, value));
        }
        Ok(Some(Self {
            name,
            description,
            base_type,
            aspects,
        }))
    }
}

/// Ordered column definitions of an [`InfoTable`].
///
/// The optional name is local metadata and does not travel on the wire.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataShape {
    name: Option<String>,
    entries: Vec<DataShapeEntry>,
}

impl DataShape {
    pub fn new(first: DataShapeEntry) -> Self {
        Self {
            name: None,
            entries: vec![first],
        }
    }

    pub fn add_entry(&mut self, entry: DataShapeEntry) {
        self.entries.push(entry);
    }

    /// Builder form of [`DataShape::add_entry`].
    pub fn with_entry(mut self, entry: DataShapeEntry) -> Self {
        self.add_entry(entry);
        self
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = Some(name.into());
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn entries(&self) -> &[DataShapeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the column called `name`.
    pub fn entry_index(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn encoded_len(&self) -> usize {
        self.entries.iter().map(DataShapeEntry::encoded_len).sum::<usize>() + 1
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        for entry in &self.entries {
            entry.to_stream(stream)?;
        }
        stream.add_bytes(&[END_MARKER]);
        Ok(())
    }

    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        Self::from_stream_at(stream, 0)
    }

    fn from_stream_at(stream: &mut TwStream, depth: usize) -> Result<Self> {
        let mut entries = Vec::new();
        while let Some(entry) = DataShapeEntry::from_stream_at(stream, depth)? {
            entries.push(entry);
        }
        Ok(Self {
            name: None,
            entries,
        })
    }
}

/// One row of values, positionally matching the table's [`DataShape`].
#[derive(Debug, Clone, PartialEq)]
pub struct InfoTableRow {
    fields: Vec<Primitive>,
}

impl InfoTableRow {
    pub fn new(first: Primitive) -> Self {
        Self {
            fields: vec![first],
        }
    }

    pub fn from_fields(fields: Vec<Primitive>) -> Self {
        Self { fields }
    }

    pub fn add_entry(&mut self, value: Primitive) {
        self.fields.push(value);
    }

    /// Builder form of [`InfoTableRow::add_entry`].
    pub fn with_entry(mut self, value: Primitive) -> Self {
        self.add_entry(value);
        self
    }

    pub fn entry(&self, index: usize) -> Option<&Primitive> {
        self.fields.get(index)
    }

    pub fn entries(&self) -> &[Primitive] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Encoded size, including the leading row marker.
    pub fn encoded_len(&self) -> usize {
        1 + 2 + self.fields.iter().map(Primitive::encoded_len).sum::<usize>()
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        let count = count_u16(self.fields.len())?;
        stream.add_bytes(&[ENTRY_MARKER]);
        stream.add_bytes(&count.to_be_bytes());
        for field in &self.fields {
            field.to_stream(stream)?;
        }
        Ok(())
    }

    /// Read one row, or `None` when the end marker is found.
    pub fn from_stream(stream: &mut TwStream) -> Result<Option<Self>> {
        Self::from_stream_at(stream, 0)
    }

    fn from_stream_at(stream: &mut TwStream, depth: usize) -> Result<Option<Self>> {
        if stream.read_u8()? == END_MARKER {
            trace!("no more rows in stream");
            return Ok(None);
        }
        let count = stream.read_u16()?;
        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            fields.push(Primitive::from_stream_at(stream, depth)?);
        }
        Ok(Some(Self { fields }))
    }
}

/// The protocol's tabular value: a [`DataShape`] plus rows.
///
/// Tables are plain owned data. Handing one to another thread is a move;
/// [`InfoTable::zero_copy`] does the same through a `&mut` borrow and leaves
/// an empty table behind.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InfoTable {
    shape: DataShape,
    rows: Vec<InfoTableRow>,
}

impl InfoTable {
    pub fn new(shape: DataShape) -> Self {
        Self {
            shape,
            rows: Vec::new(),
        }
    }

    /// A one-column, one-row table holding `value`.
    pub fn from_primitive(name: &str, value: Primitive) -> Self {
        let shape = DataShape::new(DataShapeEntry::new(name, "", value.base_type()));
        let mut table = Self::new(shape);
        table.add_row(InfoTableRow::new(value));
        table
    }

    pub fn from_string(name: &str, value: impl Into<String>) -> Self {
        Self::from_primitive(name, Primitive::string(value))
    }

    pub fn from_number(name: &str, value: f64) -> Self {
        Self::from_primitive(name, Primitive::number(value))
    }

    pub fn from_integer(name: &str, value: i32) -> Self {
        Self::from_primitive(name, Primitive::integer(value))
    }

    pub fn from_boolean(name: &str, value: bool) -> Self {
        Self::from_primitive(name, Primitive::boolean(value))
    }

    pub fn from_datetime(name: &str, millis: i64) -> Self {
        Self::from_primitive(name, Primitive::datetime(millis))
    }

    pub fn from_location(name: &str, value: Location) -> Self {
        Self::from_primitive(name, Primitive::location(value))
    }

    pub fn from_blob(name: &str, data: impl Into<Bytes>, is_image: bool) -> Self {
        let value = if is_image {
            Primitive::image(data)
        } else {
            Primitive::blob(data)
        };
        Self::from_primitive(name, value)
    }

    pub fn add_row(&mut self, row: InfoTableRow) {
        self.rows.push(row);
    }

    pub fn row(&self, index: usize) -> Option<&InfoTableRow> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[InfoTableRow] {
        &self.rows
    }

    pub fn shape(&self) -> &DataShape {
        &self.shape
    }

    pub fn shape_mut(&mut self) -> &mut DataShape {
        &mut self.shape
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn encoded_len(&self) -> usize {
        self.shape.encoded_len() + self.rows.iter().map(InfoTableRow::encoded_len).sum::<usize>() + 1
    }

    pub fn to_stream(&self, stream: &mut TwStream) -> Result<()> {
        self.shape.to_stream(stream)?;
        for row in &self.rows {
            row.to_stream(stream)?;
        }
        stream.add_bytes(&[END_MARKER]);
        Ok(())
    }

    pub fn from_stream(stream: &mut TwStream) -> Result<Self> {
        Self::from_stream_at(stream, 0)
    }

    /// Values inside the table are decoded one level below `depth`.
    pub(crate) fn from_stream_at(stream: &mut TwStream, depth: usize) -> Result<Self> {
        let depth = enter(depth)?;
        let shape = DataShape::from_stream_at(stream, depth)?;
        let mut rows = Vec::new();
        while let Some(row) = InfoTableRow::from_stream_at(stream, depth)? {
            rows.push(row);
        }
        Ok(Self { shape, rows })
    }

    /// An independent deep copy produced by a stream round trip.
    pub fn full_copy(&self) -> Result<Self> {
        let mut stream = TwStream::new();
        self.to_stream(&mut stream)?;
        Self::from_stream(&mut stream)
    }

    /// Move the contents out, leaving an empty table behind.
    pub fn zero_copy(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Change detection used for property pushes.
    ///
    /// Two tables differ when their encoded size, column names or types, or
    /// row counts differ. Row values are not compared.
    pub fn differs_from(&self, other: &InfoTable) -> bool {
        if self.encoded_len() != other.encoded_len() {
            return true;
        }
        if self.shape.len() != other.shape.len() {
            return true;
        }
        let columns_differ = self
            .shape
            .entries()
            .iter()
            .zip(other.shape.entries())
            .any(|(a, b)| a.name != b.name || a.base_type != b.base_type);
        columns_differ || self.rows.len() != other.rows.len()
    }

    /// The value in column `name` of row `row`.
    pub fn primitive(&self, name: &str, row: usize) -> Result<&Primitive> {
        let Some(index) = self.shape.entry_index(name) else {
            warn!(column = name, "column not found in data shape");
            return Err(CodecError::ColumnNotFound(name.to_string()));
        };
        let Some(row_data) = self.rows.get(row) else {
            warn!(row, rows = self.rows.len(), "row not found in info table");
            return Err(CodecError::RowOutOfRange {
                row,
                rows: self.rows.len(),
            });
        };
        row_data
            .entry(index)
            .ok_or_else(|| CodecError::ColumnNotFound(name.to_string()))
    }

    pub fn string(&self, name: &str, row: usize) -> Result<&str> {
        let p = self.primitive(name, row)?;
        p.as_str().ok_or_else(|| mismatch(BaseType::String, p))
    }

    pub fn number(&self, name: &str, row: usize) -> Result<f64> {
        let p = self.primitive(name, row)?;
        p.as_number().ok_or_else(|| mismatch(BaseType::Number, p))
    }

    pub fn integer(&self, name: &str, row: usize) -> Result<i32> {
        let p = self.primitive(name, row)?;
        p.as_integer().ok_or_else(|| mismatch(BaseType::Integer, p))
    }

    pub fn boolean(&self, name: &str, row: usize) -> Result<bool> {
        let p = self.primitive(name, row)?;
        p.as_bool().ok_or_else(|| mismatch(BaseType::Boolean, p))
    }

    pub fn datetime(&self, name: &str, row: usize) -> Result<i64> {
        let p = self.primitive(name, row)?;
        p.as_datetime().ok_or_else(|| mismatch(BaseType::Datetime, p))
    }

    pub fn location(&self, name: &str, row: usize) -> Result<Location> {
        let p = self.primitive(name, row)?;
        p.as_location().ok_or_else(|| mismatch(BaseType::Location, p))
    }

    pub fn blob(&self, name: &str, row: usize) -> Result<&Bytes> {
        let p = self.primitive(name, row)?;
        p.as_blob().ok_or_else(|| mismatch(BaseType::Blob, p))
    }

    pub fn infotable(&self, name: &str, row: usize) -> Result<&InfoTable> {
        let p = self.primitive(name, row)?;
        p.as_infotable().ok_or_else(|| mismatch(BaseType::InfoTable, p))
    }
}

fn mismatch(expected: BaseType, found: &Primitive) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: found.base_type(),
    }
}

fn count_u16(count: usize) -> Result<u16> {
    u16::try_from(count).map_err(|_| CodecError::TooManyEntries {
        count,
        max: usize::from(u16::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(table: &InfoTable) -> TwStream {
        let mut s = TwStream::new();
        table.to_stream(&mut s).unwrap();
        assert_eq!(s.len(), table.encoded_len());
        s
    }

    fn sample() -> InfoTable {
        let shape = DataShape::new(
            DataShapeEntry::new("name", "property name", BaseType::String)
                .with_aspect("isPrimaryKey", Primitive::boolean(true)),
        )
        .with_entry(DataShapeEntry::new("value", "", BaseType::Number))
        .with_entry(DataShapeEntry::new("seen", "", BaseType::Datetime));

        let mut table = InfoTable::new(shape);
        table.add_row(
            InfoTableRow::new(Primitive::string("temp"))
                .with_entry(Primitive::number(21.5))
                .with_entry(Primitive::datetime(1_000)),
        );
        table.add_row(
            InfoTableRow::new(Primitive::string("humidity"))
                .with_entry(Primitive::number(40.0))
                .with_entry(Primitive::datetime(2_000)),
        );
        table
    }

    #[test]
    fn single_cell_table_roundtrip() {
        let table = InfoTable::from_string("x", "ok");
        let mut s = encode(&table);
        let back = InfoTable::from_stream(&mut s).unwrap();

        assert_eq!(back.shape().len(), 1);
        assert_eq!(back.shape().entries()[0].name, "x");
        assert_eq!(back.shape().entries()[0].base_type, BaseType::String);
        assert_eq!(back.len(), 1);
        assert_eq!(back.string("x", 0).unwrap(), "ok");
        assert_eq!(back, table);
    }

    #[test]
    fn single_cell_wire_layout() {
        let s = encode(&InfoTable::from_string("x", "ok"));
        assert_eq!(
            s.data(),
            &[
                0x01, 0x01, b'x', 0x00, 0x00, 0x00, 0x00, // entry: marker, "x", "", STRING, 0 aspects
                0x00, // end of shape
                0x01, 0x00, 0x01, 0x00, 0x02, b'o', b'k', // row: marker, 1 field, "ok"
                0x00, // end of rows
            ]
        );
    }

    #[test]
    fn multi_row_roundtrip_with_aspects() {
        let table = sample();
        let mut s = encode(&table);
        let back = InfoTable::from_stream(&mut s).unwrap();
        assert_eq!(s.remaining(), 0);
        assert_eq!(back, table);
        assert_eq!(
            back.shape().entries()[0].aspects[0].value.as_bool(),
            Some(true)
        );
        assert_eq!(back.number("value", 1).unwrap(), 40.0);
        assert_eq!(back.datetime("seen", 0).unwrap(), 1_000);
    }

    #[test]
    fn empty_table_is_two_markers() {
        let table = InfoTable::default();
        assert_eq!(encode(&table).data(), &[0x00, 0x00]);
    }

    #[test]
    fn getters_report_missing_and_mismatched() {
        let table = sample();
        assert!(matches!(
            table.primitive("nope", 0),
            Err(CodecError::ColumnNotFound(_))
        ));
        assert!(matches!(
            table.primitive("name", 5),
            Err(CodecError::RowOutOfRange { row: 5, rows: 2 })
        ));
        assert!(matches!(
            table.integer("name", 0),
            Err(CodecError::TypeMismatch {
                expected: BaseType::Integer,
                found: BaseType::String
            })
        ));
    }

    #[test]
    fn typed_constructors_and_getters() {
        assert_eq!(InfoTable::from_integer("n", -3).integer("n", 0).unwrap(), -3);
        assert!(InfoTable::from_boolean("b", true).boolean("b", 0).unwrap());
        let loc = Location {
            longitude: 1.0,
            latitude: 2.0,
            elevation: 3.0,
        };
        assert_eq!(InfoTable::from_location("l", loc).location("l", 0).unwrap(), loc);
        let img = InfoTable::from_blob("img", vec![1, 2, 3], true);
        assert_eq!(img.shape().entries()[0].base_type, BaseType::Image);
        assert_eq!(img.blob("img", 0).unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn nested_table_getter() {
        let outer = InfoTable::from_primitive("values", Primitive::infotable(sample()));
        let mut s = encode(&outer);
        let back = InfoTable::from_stream(&mut s).unwrap();
        assert_eq!(back.infotable("values", 0).unwrap().len(), 2);
    }

    #[test]
    fn zero_copy_leaves_source_empty() {
        let mut table = sample();
        let moved = table.zero_copy();
        assert_eq!(moved.len(), 2);
        assert!(table.is_empty());
        assert!(table.shape().is_empty());
        assert_eq!(encode(&table).len(), 2);
    }

    #[test]
    fn full_copy_is_independent_and_equal() {
        let table = sample();
        let mut copy = table.full_copy().unwrap();
        assert_eq!(copy, table);
        copy.add_row(InfoTableRow::new(Primitive::string("extra")));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn differs_from_tracks_layout_not_values() {
        let a = InfoTable::from_number("v", 1.0);
        let b = InfoTable::from_number("v", 2.0);
        assert!(!a.differs_from(&b));

        let renamed = InfoTable::from_number("w", 1.0);
        assert!(renamed.differs_from(&a));

        let retyped = InfoTable::from_integer("v", 1);
        assert!(retyped.differs_from(&a));

        let mut more_rows = a.clone();
        more_rows.add_row(InfoTableRow::new(Primitive::number(3.0)));
        assert!(more_rows.differs_from(&a));
    }

    #[test]
    fn shape_name_and_index() {
        let mut table = sample();
        table.shape_mut().set_name("PropertyUpdate");
        assert_eq!(table.shape().name(), Some("PropertyUpdate"));
        assert_eq!(table.shape().entry_index("seen"), Some(2));
        assert_eq!(table.shape().entry_index("missing"), None);
    }

    #[test]
    fn unknown_entry_type_fails() {
        let mut s = TwStream::from_slice(&[0x01, 0x01, b'x', 0x00, 0x13, 0x00, 0x00, 0x00, 0x00]);
        assert!(matches!(
            InfoTable::from_stream(&mut s),
            Err(CodecError::UnknownType(0x13))
        ));
    }

    #[test]
    fn truncated_table_fails() {
        let s = encode(&sample());
        let cut = &s.data()[..s.len() - 4];
        let mut s = TwStream::from_slice(cut);
        assert!(InfoTable::from_stream(&mut s).is_err());
    }
}
