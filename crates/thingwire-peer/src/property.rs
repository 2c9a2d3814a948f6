use thingwire_codec::{BaseType, DataShape, DataShapeEntry, InfoTable, InfoTableRow, Primitive};

use crate::tasker::now_millis;

/// Quality reported for every pushed value.
pub const PUSH_QUALITY: &str = "GOOD";

/// One property value to push, with the time it was sampled.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: Primitive,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Property {
    /// A property sampled now.
    pub fn new(name: impl Into<String>, value: Primitive) -> Self {
        Self::with_timestamp(name, value, i64::try_from(now_millis()).unwrap_or(i64::MAX))
    }

    pub fn with_timestamp(name: impl Into<String>, value: Primitive, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }
}

/// Ordered batch of property values for a single push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyList {
    properties: Vec<Property>,
}

impl PropertyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value. `timestamp` defaults to now.
    pub fn add(&mut self, name: impl Into<String>, value: Primitive, timestamp: Option<i64>) {
        let property = match timestamp {
            Some(ts) => Property::with_timestamp(name, value, ts),
            None => Property::new(name, value),
        };
        self.properties.push(property);
    }

    pub fn push(&mut self, property: Property) {
        self.properties.push(property);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// The `name`/`value`/`time`/`quality` table the server expects.
    pub fn to_infotable(&self) -> InfoTable {
        let shape = DataShape::new(DataShapeEntry::new("name", "", BaseType::String))
            .with_entry(DataShapeEntry::new("value", "", BaseType::Variant))
            .with_entry(DataShapeEntry::new("time", "", BaseType::Datetime))
            .with_entry(DataShapeEntry::new("quality", "", BaseType::String));
        let mut table = InfoTable::new(shape);
        for property in &self.properties {
            table.add_row(
                InfoTableRow::new(Primitive::string(property.name.as_str()))
                    .with_entry(Primitive::variant(property.value.clone()))
                    .with_entry(Primitive::datetime(property.timestamp))
                    .with_entry(Primitive::string(PUSH_QUALITY)),
            );
        }
        table
    }
}

impl FromIterator<Property> for PropertyList {
    fn from_iter<I: IntoIterator<Item = Property>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}
