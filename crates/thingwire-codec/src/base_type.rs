use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Logical value types, with their wire tag as the discriminant.
///
/// Many logical types share one wire encoding; [`BaseType::family`] gives the
/// encoding to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaseType {
    Nothing = 0xFF,
    String = 0,
    Number = 1,
    Boolean = 2,
    Datetime = 3,
    Timespan = 4,
    InfoTable = 5,
    Location = 6,
    Xml = 7,
    Json = 8,
    Query = 9,
    Image = 10,
    Hyperlink = 11,
    ImageLink = 12,
    Password = 13,
    Html = 14,
    Text = 15,
    Tags = 16,
    Schedule = 17,
    Variant = 18,
    Guid = 20,
    Blob = 21,
    Integer = 22,
    PropertyName = 50,
    ServiceName = 51,
    EventName = 52,
    ThingName = 100,
    ThingShapeName = 101,
    ThingTemplateName = 102,
    DataShapeName = 104,
    MashupName = 105,
    MenuName = 106,
    BaseTypeName = 107,
    UserName = 108,
    GroupName = 109,
    CategoryName = 110,
    StateDefinitionName = 111,
    StyleDefinitionName = 112,
    ModelTagVocabularyName = 113,
    DataTagVocabularyName = 114,
    NetworkName = 115,
    MediaEntityName = 116,
    ApplicationKeyName = 117,
    LocalizationTableName = 118,
    OrganizationName = 119,
    DashboardName = 120,
}

/// Wire encoding shared by a group of [`BaseType`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Nothing,
    /// Length-prefixed UTF-8 (1 or 4 byte prefix).
    String,
    /// 8-byte big-endian IEEE-754 double.
    Number,
    /// 4-byte big-endian signed integer.
    Integer,
    /// Single byte, non-zero is true.
    Boolean,
    /// 8-byte big-endian milliseconds since the Unix epoch.
    Datetime,
    /// Three 8-byte doubles: longitude, latitude, elevation.
    Location,
    /// 4-byte big-endian length, then raw bytes.
    Blob,
    /// A nested type-tagged primitive.
    Variant,
    /// A self-delimiting data shape plus rows.
    InfoTable,
    /// Known type with no wire encoding (timespan, schedule).
    Unsupported,
}

const ALL: [BaseType; 46] = [
    BaseType::String,
    BaseType::Number,
    BaseType::Boolean,
    BaseType::Datetime,
    BaseType::Timespan,
    BaseType::InfoTable,
    BaseType::Location,
    BaseType::Xml,
    BaseType::Json,
    BaseType::Query,
    BaseType::Image,
    BaseType::Hyperlink,
    BaseType::ImageLink,
    BaseType::Password,
    BaseType::Html,
    BaseType::Text,
    BaseType::Tags,
    BaseType::Schedule,
    BaseType::Variant,
    BaseType::Guid,
    BaseType::Blob,
    BaseType::Integer,
    BaseType::PropertyName,
    BaseType::ServiceName,
    BaseType::EventName,
    BaseType::ThingName,
    BaseType::ThingShapeName,
    BaseType::ThingTemplateName,
    BaseType::DataShapeName,
    BaseType::MashupName,
    BaseType::MenuName,
    BaseType::BaseTypeName,
    BaseType::UserName,
    BaseType::GroupName,
    BaseType::CategoryName,
    BaseType::StateDefinitionName,
    BaseType::StyleDefinitionName,
    BaseType::ModelTagVocabularyName,
    BaseType::DataTagVocabularyName,
    BaseType::NetworkName,
    BaseType::MediaEntityName,
    BaseType::ApplicationKeyName,
    BaseType::LocalizationTableName,
    BaseType::OrganizationName,
    BaseType::DashboardName,
    BaseType::Nothing,
];

impl BaseType {
    /// The wire tag byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Look up a base type by its wire tag.
    pub fn from_byte(byte: u8) -> Option<BaseType> {
        ALL.iter().copied().find(|t| t.as_byte() == byte)
    }

    /// The wire encoding used for values of this type.
    pub fn family(self) -> TypeFamily {
        use BaseType::*;
        match self {
            Nothing => TypeFamily::Nothing,
            Number => TypeFamily::Number,
            Integer => TypeFamily::Integer,
            Boolean => TypeFamily::Boolean,
            Datetime => TypeFamily::Datetime,
            Location => TypeFamily::Location,
            Blob | Image => TypeFamily::Blob,
            Variant => TypeFamily::Variant,
            InfoTable => TypeFamily::InfoTable,
            Timespan | Schedule => TypeFamily::Unsupported,
            String | Xml | Json | Query | Hyperlink | ImageLink | Password | Html | Text | Tags
            | Guid | PropertyName | ServiceName | EventName | ThingName | ThingShapeName
            | ThingTemplateName | DataShapeName | MashupName | MenuName | BaseTypeName
            | UserName | GroupName | CategoryName | StateDefinitionName | StyleDefinitionName
            | ModelTagVocabularyName | DataTagVocabularyName | NetworkName | MediaEntityName
            | ApplicationKeyName | LocalizationTableName | OrganizationName | DashboardName => {
                TypeFamily::String
            }
        }
    }

    /// The platform name of this type (`"STRING"`, `"INFOTABLE"`, ...).
    pub fn name(self) -> &'static str {
        use BaseType::*;
        match self {
            Nothing => "NOTHING",
            String => "STRING",
            Number => "NUMBER",
            Boolean => "BOOLEAN",
            Datetime => "DATETIME",
            Timespan => "TIMESPAN",
            InfoTable => "INFOTABLE",
            Location => "LOCATION",
            Xml => "XML",
            Json => "JSON",
            Query => "QUERY",
            Image => "IMAGE",
            Hyperlink => "HYPERLINK",
            ImageLink => "IMAGELINK",
            Password => "PASSWORD",
            Html => "HTML",
            Text => "TEXT",
            Tags => "TAGS",
            Schedule => "SCHEDULE",
            Variant => "VARIANT",
            Guid => "GUID",
            Blob => "BLOB",
            Integer => "INTEGER",
            PropertyName => "PROPERTYNAME",
            ServiceName => "SERVICENAME",
            EventName => "EVENTNAME",
            ThingName => "THINGNAME",
            ThingShapeName => "THINGSHAPENAME",
            ThingTemplateName => "THINGTEMPLATENAME",
            DataShapeName => "DATASHAPENAME",
            MashupName => "MASHUPNAME",
            MenuName => "MENUNAME",
            BaseTypeName => "BASETYPENAME",
            UserName => "USERNAME",
            GroupName => "GROUPNAME",
            CategoryName => "CATEGORYNAME",
            StateDefinitionName => "STATEDEFINITIONNAME",
            StyleDefinitionName => "STYLEDEFINITIONNAME",
            ModelTagVocabularyName => "MODELTAGVOCABULARYNAME",
            DataTagVocabularyName => "DATATAGVOCABULARYNAME",
            NetworkName => "NETWORKNAME",
            MediaEntityName => "MEDIAENTITYNAME",
            ApplicationKeyName => "APPLICATIONKEYNAME",
            LocalizationTableName => "LOCALIZATIONTABLENAME",
            OrganizationName => "ORGANIZATIONNAME",
            DashboardName => "DASHBOARDNAME",
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BaseType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CodecError::UnknownTypeName(s.to_string()))
    }
}
