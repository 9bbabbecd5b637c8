use crate::relationship::SelectOption;
use crate::schema::EntityDefinition;
use crate::storage::Record;
use crate::ui::output::display_value;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
struct PropertyRow {
    #[tabled(rename = "Property")]
    name: String,
    #[tabled(rename = "Datatype")]
    datatype: String,
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Required")]
    required: String,
    #[tabled(rename = "Default")]
    default: String,
    #[tabled(rename = "Relationship")]
    relationship: String,
}

/// One row per declared property
pub fn definition_table(def: &EntityDefinition) -> String {
    let rows: Vec<PropertyRow> = def
        .properties()
        .iter()
        .map(|prop| PropertyRow {
            name: if prop.is_primary {
                format!("{} (key)", prop.name)
            } else {
                prop.name.clone()
            },
            datatype: prop.datatype.as_str().to_string(),
            column: if prop.is_db_backed() {
                crate::map_type(prop).sql()
            } else {
                "-".to_string()
            },
            field: prop.field_kind.as_str().to_string(),
            required: if prop.required { "yes" } else { "" }.to_string(),
            default: prop
                .default_value
                .as_ref()
                .map(display_value)
                .unwrap_or_default(),
            relationship: prop.relationship.clone().unwrap_or_default(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Records as rows, one column per field in `fields`
pub fn records_table(fields: &[&str], records: &[Record]) -> String {
    let mut builder = Builder::default();
    builder.push_record(fields.iter().map(|f| f.to_string()));
    for record in records {
        builder.push_record(
            fields
                .iter()
                .map(|f| record.get(*f).map(display_value).unwrap_or_default()),
        );
    }
    builder.build().with(Style::rounded()).to_string()
}

pub fn options_table(options: &[SelectOption]) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Key".to_string(), "Label".to_string()]);
    for option in options {
        builder.push_record([option.key.clone(), option.label.clone()]);
    }
    builder.build().with(Style::rounded()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_table_renders_lists() {
        let mut record = Record::new();
        record.insert("id".to_string(), json!("u1"));
        record.insert("movies".to_string(), json!(["m1", "m2"]));

        let table = records_table(&["id", "movies"], &[record]);
        assert!(table.contains("u1"));
        assert!(table.contains("m1, m2"));
        assert!(table.contains("movies"));
    }

    #[test]
    fn test_empty_stats_table() {
        assert!(stats_table(&[]).is_empty());
        assert!(stats_table(&[("Tables created", "2")]).contains("Tables created"));
    }
}
