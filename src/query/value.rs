//! Conversions between JSON field values and SQL values

use super::statement::SqlValue;
use crate::schema::{Datatype, PropertyDefinition, DEFAULT_KEY_WIDTH};
use rusqlite::types::ValueRef;
use serde_json::{Number, Value};

/// Whether a field value counts as "not supplied".
///
/// `0`, `false` and `"0"` are real values and are not empty.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Convert a field value to the value stored in its column
pub fn to_sql_value(prop: &PropertyDefinition, value: &Value) -> SqlValue {
    if value.is_null() {
        return SqlValue::Null;
    }
    match &prop.datatype {
        Datatype::Bool => match truthy(value) {
            Some(b) => SqlValue::Integer(b as i64),
            None => scalar(value),
        },
        Datatype::Int => match value {
            Value::Number(n) => n
                .as_i64()
                .map(SqlValue::Integer)
                .unwrap_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default())),
            Value::String(s) => parse_number(s),
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            other => scalar(other),
        },
        Datatype::Float => match value {
            Value::Number(n) => SqlValue::Real(n.as_f64().unwrap_or_default()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Real)
                .unwrap_or_else(|_| SqlValue::Text(s.clone())),
            other => scalar(other),
        },
        // Structured values are stored as JSON text. A string is taken as
        // already serialized.
        Datatype::Array | Datatype::Object => match value {
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        },
        _ => scalar(value),
    }
}

/// Plain scalar conversion with no datatype coercion
pub fn scalar(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .unwrap_or_else(|| SqlValue::Real(n.as_f64().unwrap_or_default())),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Every element of a list operand as a string scalar
pub fn string_elements(value: &Value) -> Vec<SqlValue> {
    let as_text = |v: &Value| match v {
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Null => SqlValue::Null,
        other => SqlValue::Text(other.to_string()),
    };
    match value {
        Value::Array(items) => items.iter().map(as_text).collect(),
        other => vec![as_text(other)],
    }
}

fn truthy(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_number(s: &str) -> SqlValue {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        SqlValue::Integer(i)
    } else if let Ok(f) = trimmed.parse::<f64>() {
        SqlValue::Real(f)
    } else {
        SqlValue::Text(s.to_string())
    }
}

/// Raw column value as JSON, no datatype knowledge
pub fn column_value(raw: ValueRef<'_>) -> Value {
    match raw {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Turn a stored column value back into the field's logical value
pub fn hydrate(prop: &PropertyDefinition, stored: Value) -> Value {
    match (&prop.datatype, stored) {
        (_, Value::Null) => Value::Null,
        (Datatype::Bool, Value::Number(n)) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        (Datatype::Bool, Value::String(s)) => match truthy(&Value::String(s.clone())) {
            Some(b) => Value::Bool(b),
            None => Value::String(s),
        },
        // REAL columns hand back 2.0 for a stored 2
        (Datatype::Float, Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => Value::Number(n),
        },
        (Datatype::Array | Datatype::Object, Value::String(s)) => {
            serde_json::from_str(&s).unwrap_or(Value::String(s))
        }
        (_, other) => other,
    }
}

/// Key value as a string, if the value can serve as one
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Random lowercase hex key of exactly `width` characters.
///
/// A width of zero falls back to the default key width.
pub fn generate_key(width: u32) -> String {
    let width = match width {
        0 => DEFAULT_KEY_WIDTH as usize,
        w => w as usize,
    };
    let mut key = String::with_capacity(width + 32);
    while key.len() < width {
        key.push_str(&uuid::Uuid::new_v4().simple().to_string());
    }
    key.truncate(width);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prop(datatype: &str) -> PropertyDefinition {
        PropertyDefinition::new("f", Datatype::from(datatype.to_string()))
    }

    #[test]
    fn test_emptiness() {
        assert!(is_empty(&Value::Null));
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(!is_empty(&json!(0)));
        assert!(!is_empty(&json!(false)));
        assert!(!is_empty(&json!("0")));
        assert!(!is_empty(&json!(" ")));
    }

    #[test]
    fn test_storage_coercion() {
        assert_eq!(to_sql_value(&prop("bool"), &json!(true)), SqlValue::Integer(1));
        assert_eq!(to_sql_value(&prop("bool"), &json!("off")), SqlValue::Integer(0));
        assert_eq!(to_sql_value(&prop("int"), &json!("42")), SqlValue::Integer(42));
        assert_eq!(to_sql_value(&prop("float"), &json!("2.5")), SqlValue::Real(2.5));
        assert_eq!(
            to_sql_value(&prop("int"), &json!("n/a")),
            SqlValue::Text("n/a".to_string())
        );
        assert_eq!(
            to_sql_value(&prop("array"), &json!(["a", "b"])),
            SqlValue::Text(r#"["a","b"]"#.to_string())
        );
        assert_eq!(to_sql_value(&prop("string"), &Value::Null), SqlValue::Null);
    }

    #[test]
    fn test_hydrate_restores_logical_values() {
        assert_eq!(hydrate(&prop("bool"), json!(1)), json!(true));
        assert_eq!(hydrate(&prop("bool"), json!(0)), json!(false));
        assert_eq!(hydrate(&prop("array"), json!(r#"["a","b"]"#)), json!(["a", "b"]));
        assert_eq!(hydrate(&prop("object"), json!("not json")), json!("not json"));
        assert_eq!(hydrate(&prop("string"), json!("x")), json!("x"));
    }

    #[test]
    fn test_hydrate_integral_floats() {
        assert_eq!(hydrate(&prop("float"), json!(2.0)), json!(2));
        assert_eq!(hydrate(&prop("float"), json!(-40.0)), json!(-40));
        assert_eq!(hydrate(&prop("float"), json!(2.5)), json!(2.5));
        assert_eq!(hydrate(&prop("float"), json!(1e300)), json!(1e300));
    }

    #[test]
    fn test_generated_keys() {
        let key = generate_key(16);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(generate_key(0).len(), 32);
        assert_eq!(generate_key(40).len(), 40);
        assert_ne!(generate_key(32), generate_key(32));
    }
}
