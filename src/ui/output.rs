use crate::ui::{theme, Icons};
use crate::ColumnMismatch;
use owo_colors::OwoColorize;
use serde_json::Value;

pub fn header(text: &str) {
    println!("{} {}", Icons::DATABASE, text.style(theme().header.clone()));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn info(label: &str, value: &str) {
    println!(
        "{} {}: {}",
        Icons::INFO.style(theme().info.clone()),
        label.style(theme().label.clone()),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", title.style(theme().header.clone()));
}

pub fn muted(text: &str) -> String {
    text.style(theme().muted.clone()).to_string()
}

pub fn key(text: &str) -> String {
    text.style(theme().key.clone()).to_string()
}

/// One `label: value` line of a record
pub fn field(label: &str, value: &Value) {
    println!("  {} {}", format!("{label}:").style(theme().label.clone()), styled_value(value));
}

pub fn table_created(table: &str) {
    println!("{} {}", Icons::NEW.style(theme().success.clone()), table);
}

pub fn column_added(column: &str) {
    println!("{} {}", Icons::COLUMN.style(theme().warn.clone()), column);
}

pub fn mismatch(mismatch: &ColumnMismatch) {
    warn(&mismatch.to_string());
}

pub fn deleted(type_name: &str, key_value: &str) {
    println!("{} {} {}", Icons::DEL.style(theme().error.clone()), type_name, key(key_value));
}

/// Plain-text rendering of a field value. Lists are comma-joined.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

fn styled_value(value: &Value) -> String {
    match value {
        Value::Null => muted("null"),
        Value::Array(items) if items.is_empty() => muted("none"),
        other => display_value(other),
    }
}
