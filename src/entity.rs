//! Entity - an active-record instance of a declared type
//!
//! An entity holds one record's field values keyed by property name. It is
//! always driven by its definition: loading selects the declared columns,
//! saving validates against the declared rules, and every relationship
//! property is read and written through the relationship resolver.

use crate::query::value::{hydrate, key_string};
use crate::query::{generate_key, is_empty, Combinator, QueryBuilder, SearchParam};
use crate::relationship::{RelationshipResolver, SelectOption};
use crate::schema::{Datatype, EntityDefinition, FieldKind, PropertyDefinition, RelationshipDefinition, Role, SchemaStore};
use crate::storage::{self, Database, Record};
use crate::{Error, Result, ValidationErrors};
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A relationship property with its endpoint resolved once
#[derive(Debug, Clone)]
struct Binding {
    field: String,
    relationship: Arc<RelationshipDefinition>,
    role: Role,
}

impl Binding {
    fn single_valued(&self) -> bool {
        RelationshipResolver::is_single_valued(&self.relationship, self.role)
    }
}

pub struct Entity<'a> {
    schema: &'a SchemaStore,
    definition: Arc<EntityDefinition>,
    bindings: Vec<Binding>,
    values: Map<String, Value>,
    labels: HashMap<String, Vec<SelectOption>>,
}

impl<'a> Entity<'a> {
    /// A blank instance: declared defaults, relationships unlinked
    pub fn new(schema: &'a SchemaStore, type_name: &str) -> Result<Self> {
        let definition = schema.get_entity_definition(type_name)?;
        let resolver = RelationshipResolver::new(schema);

        let mut bindings = Vec::new();
        for prop in definition.relationship_properties() {
            let Some(name) = prop.relationship.as_deref() else {
                continue;
            };
            let relationship = schema.get_relationship_definition(name)?;
            resolver.validate(&relationship)?;
            let role = resolver.resolve_endpoint(&relationship, &definition.name)?;
            bindings.push(Binding {
                field: prop.name.clone(),
                relationship,
                role,
            });
        }

        let mut entity = Self {
            schema,
            definition,
            bindings,
            values: Map::new(),
            labels: HashMap::new(),
        };
        entity.reset();
        Ok(entity)
    }

    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    pub fn type_name(&self) -> &str {
        &self.definition.name
    }

    /// Primary key of the loaded record, if any
    pub fn key(&self) -> Option<String> {
        self.values
            .get(&self.definition.primary().name)
            .and_then(key_string)
    }

    fn reset(&mut self) {
        self.labels.clear();
        self.values = self
            .definition
            .properties()
            .iter()
            .map(|prop| (prop.name.clone(), self.blank_value(prop)))
            .collect();
    }

    fn blank_value(&self, prop: &PropertyDefinition) -> Value {
        match self.binding(&prop.name) {
            Some(binding) if binding.single_valued() => Value::Null,
            Some(_) => Value::Array(Vec::new()),
            None => prop.default_value.clone().unwrap_or(Value::Null),
        }
    }

    fn binding(&self, field: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.field == field)
    }

    /// Load the record with primary key `key`
    pub fn load(&mut self, db: &Database, key: &str) -> Result<()> {
        db.with_connection(|conn| self.load_with(conn, key))
    }

    /// Load on an existing connection or transaction
    pub fn load_with(&mut self, conn: &Connection, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyRequired(self.definition.name.clone()));
        }

        let params = [SearchParam::new(self.definition.primary().name.clone(), Value::String(key.to_string()))];
        let stmt = QueryBuilder::build_select(&self.definition, &params, Combinator::And)?;
        let row = storage::query(conn, &stmt)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::RecordNotFound {
                entity: self.definition.name.clone(),
                key: key.to_string(),
            })?;

        self.reset();
        self.populate_row(row);
        self.load_relationships(conn, key)?;
        tracing::debug!("Loaded {} {}", self.definition.name, key);
        Ok(())
    }

    /// Fill db-backed fields from a selected row
    fn populate_row(&mut self, mut row: Record) {
        for prop in self.definition.db_properties() {
            let stored = row.remove(&prop.name).unwrap_or(Value::Null);
            self.values.insert(prop.name.clone(), hydrate(prop, stored));
        }
    }

    fn load_relationships(&mut self, conn: &Connection, key: &str) -> Result<()> {
        let resolver = RelationshipResolver::new(self.schema);
        for binding in &self.bindings {
            let linked = resolver.linked_records(conn, &binding.relationship, binding.role, key)?;
            let value = if binding.single_valued() {
                linked
                    .first()
                    .map_or(Value::Null, |option| Value::String(option.key.clone()))
            } else {
                Value::Array(linked.iter().map(|o| Value::String(o.key.clone())).collect())
            };
            self.values.insert(binding.field.clone(), value);
            self.labels.insert(binding.field.clone(), linked);
        }
        Ok(())
    }

    /// Copy the declared fields of `data` onto this instance; other keys are ignored
    pub fn populate_from_hash(&mut self, data: &Map<String, Value>) {
        for (name, value) in data {
            if self.definition.property(name).is_some() {
                self.values.insert(name.clone(), value.clone());
            }
        }
    }

    pub fn get(&self, field: &str) -> Result<&Value> {
        self.definition.require_property(field)?;
        Ok(self.values.get(field).unwrap_or(&Value::Null))
    }

    pub fn set(&mut self, field: &str, value: Value) -> Result<()> {
        self.definition.require_property(field)?;
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    /// Key/label pairs of the records linked through a relationship field
    pub fn linked_labels(&self, field: &str) -> Result<&[SelectOption]> {
        let prop = self.definition.require_property(field)?;
        Ok(self.labels.get(&prop.name).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Every declared field. Relationship fields hold linked keys, never nested records.
    pub fn to_record(&self) -> Record {
        self.definition
            .properties()
            .iter()
            .map(|prop| {
                let value = self.values.get(&prop.name).cloned().unwrap_or(Value::Null);
                (prop.name.clone(), value)
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.to_record())
    }

    /// Check `data` against the declared rules, collecting every failure
    pub fn validate(&self, data: &Map<String, Value>) -> ValidationErrors {
        let mut errors = ValidationErrors::new(&self.definition.name);
        for prop in self.definition.properties().iter().filter(|p| !p.is_primary) {
            let value = data.get(&prop.name);
            match value {
                Some(value) if !is_empty(value) => {
                    if let Some(message) = check_value(prop, value) {
                        errors.push(&prop.name, message);
                    }
                }
                _ if prop.required => {
                    errors.push(&prop.name, format!("Please fill in the '{}' field", prop.display_label()));
                }
                _ => {}
            }
        }
        errors
    }

    /// Insert or update from `data`, sync relationships, then reload.
    ///
    /// A non-empty primary key in `data` selects an update of that record;
    /// otherwise a new record is inserted under a fresh key. Everything runs
    /// in one transaction. Returns the record's key.
    pub fn save(&mut self, db: &Database, data: &Map<String, Value>) -> Result<String> {
        db.with_transaction(|tx| self.save_with(tx, data))
    }

    /// Save on an existing connection or transaction
    pub fn save_with(&mut self, conn: &Connection, data: &Map<String, Value>) -> Result<String> {
        let primary = self.definition.primary().clone();
        let mut record: Map<String, Value> = data
            .iter()
            .filter(|(name, _)| self.definition.property(name).is_some())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let key = match data.get(&primary.name).and_then(key_string) {
            None => {
                self.check(&record)?;
                let key = generate_key(primary.key_width());
                record.insert(primary.name.clone(), Value::String(key.clone()));
                storage::execute(conn, &QueryBuilder::build_insert(&self.definition, &record)?)?;
                tracing::debug!("Inserted {} {}", self.definition.name, key);
                key
            }
            Some(key) => {
                // Stored values stand in for fields the caller left out
                self.load_with(conn, &key)?;
                let mut merged = self.values.clone();
                merged.extend(record.clone());
                self.check(&merged)?;
                if let Some(stmt) = QueryBuilder::build_update(&self.definition, &key, &record)? {
                    storage::execute(conn, &stmt)?;
                }
                tracing::debug!("Updated {} {}", self.definition.name, key);
                key
            }
        };

        let resolver = RelationshipResolver::new(self.schema);
        for binding in &self.bindings {
            let Some(value) = record.get(&binding.field) else {
                continue;
            };
            resolver.link(conn, &binding.relationship, binding.role, &key, &related_keys(value))?;
        }

        self.load_with(conn, &key)?;
        Ok(key)
    }

    fn check(&self, data: &Map<String, Value>) -> Result<()> {
        let errors = self.validate(data);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Delete the loaded record. Junction rows pointing at it are soft-deleted.
    pub fn delete(&mut self, db: &Database) -> Result<()> {
        db.with_transaction(|tx| self.delete_with(tx))
    }

    pub fn delete_with(&mut self, conn: &Connection) -> Result<()> {
        let key = self
            .key()
            .ok_or_else(|| Error::KeyRequired(self.definition.name.clone()))?;

        let resolver = RelationshipResolver::new(self.schema);
        for binding in self.bindings.iter().filter(|b| !b.single_valued()) {
            resolver.link(conn, &binding.relationship, binding.role, &key, &[])?;
        }

        let removed = storage::execute(conn, &QueryBuilder::build_delete(&self.definition, &key))?;
        if removed == 0 {
            return Err(Error::RecordNotFound {
                entity: self.definition.name.clone(),
                key,
            });
        }
        tracing::debug!("Deleted {} {}", self.definition.name, key);
        self.reset();
        Ok(())
    }
}

/// Keys named by a relationship field value: a list of keys, a map keyed by
/// related key, or a single key
fn related_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(key_string).collect(),
        Value::Object(map) => map.keys().filter(|k| !k.is_empty()).cloned().collect(),
        other => key_string(other).into_iter().collect(),
    }
}

/// Type and field-kind checks for a supplied, non-empty value
fn check_value(prop: &PropertyDefinition, value: &Value) -> Option<String> {
    let label = prop.display_label();
    let as_text = || match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };

    match prop.datatype {
        Datatype::Int if !(value.is_i64() || value.is_u64() || as_text().parse::<i64>().is_ok()) => {
            return Some(format!("'{label}' must be a whole number"));
        }
        Datatype::Float if !(value.is_number() || as_text().parse::<f64>().is_ok()) => {
            return Some(format!("'{label}' must be a number"));
        }
        Datatype::Bool
            if !(value.is_boolean()
                || value.is_number()
                || matches!(
                    as_text().to_lowercase().as_str(),
                    "1" | "0" | "true" | "false" | "on" | "off" | "yes" | "no"
                )) =>
        {
            return Some(format!("'{label}' must be true or false"));
        }
        _ => {}
    }

    match prop.field_kind {
        FieldKind::Email if !as_text().contains('@') => {
            Some(format!("'{label}' must be an email address"))
        }
        FieldKind::Select if !prop.options.is_empty() && !prop.options.contains(&as_text()) => {
            Some(format!("'{label}' must be one of: {}", prop.options.join(", ")))
        }
        _ => None,
    }
}
