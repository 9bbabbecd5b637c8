//! Type mapping - logical datatypes to backing column types
//!
//! | datatype            | column                                 |
//! |---------------------|----------------------------------------|
//! | bool                | `BOOLEAN`                              |
//! | float / numeric     | `DOUBLE`                               |
//! | date / datetime     | `DATE` / `DATETIME`                    |
//! | int / integer       | `INT`                                  |
//! | string              | `TINYTEXT` / `TEXT` / `LONGTEXT` by length |
//! | string, primary key | `VARCHAR(len)`                         |
//! | array               | `TEXT` (serialized)                    |
//! | object              | `BLOB`                                 |
//! | anything else       | `TEXT`                                 |

use crate::schema::{Datatype, PropertyDefinition, DEFAULT_STRING_LEN};
use std::fmt;

/// Longest string stored in a short text column
pub const SHORT_TEXT_MAX: u32 = 255;

/// Longest string stored in a medium text column
pub const MEDIUM_TEXT_MAX: u32 = 65_535;

/// Backing column type for a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    Double,
    Date,
    DateTime,
    Int,
    /// Short text, up to 255 characters
    TinyText,
    /// Medium text, up to 65535 characters
    Text,
    LongText,
    /// Fixed-width key column
    Varchar(u32),
    Blob,
}

impl ColumnType {
    /// SQL spelling used in CREATE TABLE and compared against live columns
    pub fn sql(&self) -> String {
        match self {
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::TinyText => "TINYTEXT".to_string(),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::LongText => "LONGTEXT".to_string(),
            ColumnType::Varchar(len) => format!("VARCHAR({len})"),
            ColumnType::Blob => "BLOB".to_string(),
        }
    }

    /// Whether a live column type (as reported by introspection) is this type
    pub fn matches(&self, live: &str) -> bool {
        let normalized: String = live.split_whitespace().collect::<String>().to_uppercase();
        normalized == self.sql()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

/// Map a property to its column type. Total: every datatype has a column.
pub fn map_type(prop: &PropertyDefinition) -> ColumnType {
    match &prop.datatype {
        Datatype::Bool => ColumnType::Boolean,
        Datatype::Float => ColumnType::Double,
        Datatype::Date => ColumnType::Date,
        Datatype::DateTime => ColumnType::DateTime,
        Datatype::Int => ColumnType::Int,
        Datatype::String if prop.is_primary => {
            ColumnType::Varchar(prop.len.unwrap_or(DEFAULT_STRING_LEN))
        }
        Datatype::String => string_tier(prop.len.unwrap_or(DEFAULT_STRING_LEN)),
        Datatype::Array => ColumnType::Text,
        Datatype::Object => ColumnType::Blob,
        Datatype::Relationship | Datatype::Other(_) => ColumnType::Text,
    }
}

fn string_tier(len: u32) -> ColumnType {
    if len <= SHORT_TEXT_MAX {
        ColumnType::TinyText
    } else if len <= MEDIUM_TEXT_MAX {
        ColumnType::Text
    } else {
        ColumnType::LongText
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prop(datatype: &str) -> PropertyDefinition {
        PropertyDefinition::new("field", Datatype::from(datatype.to_string()))
    }

    #[test]
    fn test_scalar_types() {
        assert_eq!(map_type(&prop("bool")), ColumnType::Boolean);
        assert_eq!(map_type(&prop("float")), ColumnType::Double);
        assert_eq!(map_type(&prop("numeric")), ColumnType::Double);
        assert_eq!(map_type(&prop("date")), ColumnType::Date);
        assert_eq!(map_type(&prop("datetime")), ColumnType::DateTime);
        assert_eq!(map_type(&prop("int")), ColumnType::Int);
        assert_eq!(map_type(&prop("integer")), ColumnType::Int);
        assert_eq!(map_type(&prop("array")), ColumnType::Text);
        assert_eq!(map_type(&prop("object")), ColumnType::Blob);
    }

    #[test]
    fn test_unknown_falls_back_to_text() {
        assert_eq!(map_type(&prop("geometry")), ColumnType::Text);
        assert_eq!(map_type(&prop("")), ColumnType::Text);
    }

    #[test]
    fn test_string_tiers_at_boundaries() {
        let tier = |len| map_type(&prop("string").with_len(len));
        assert_eq!(tier(1), ColumnType::TinyText);
        assert_eq!(tier(255), ColumnType::TinyText);
        assert_eq!(tier(256), ColumnType::Text);
        assert_eq!(tier(65_535), ColumnType::Text);
        assert_eq!(tier(65_536), ColumnType::LongText);
        assert_eq!(map_type(&prop("string")), ColumnType::TinyText);
    }

    #[test]
    fn test_primary_string_overrides_tier() {
        let key = prop("string").with_len(16).primary();
        assert_eq!(map_type(&key), ColumnType::Varchar(16));
        let wide = prop("string").with_len(100_000).primary();
        assert_eq!(map_type(&wide), ColumnType::Varchar(100_000));
    }

    #[test]
    fn test_live_type_matching() {
        assert!(ColumnType::Varchar(16).matches("varchar(16)"));
        assert!(ColumnType::Varchar(16).matches("VARCHAR( 16 )"));
        assert!(ColumnType::TinyText.matches("tinytext"));
        assert!(!ColumnType::TinyText.matches("TEXT"));
    }
}
