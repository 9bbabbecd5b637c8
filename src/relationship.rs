//! Relationship resolution
//!
//! A relationship is declared once and read from either side. The resolver
//! works out which endpoint a type occupies, builds the joins that reach the
//! other side, and rewrites link sets.
//!
//! Many-to-many links live in a junction table and are soft-deleted: relinking
//! marks every active row for the record `deleted = 1` and inserts the new set.
//! One-to-many links are a foreign key column on the many side (`endpoint_a`).

use crate::query::{
    generate_key, junction_table, QueryBuilder, Select, SqlValue, Statement, DELETED_COLUMN,
    JUNCTION_KEY_WIDTH,
};
use crate::schema::{Endpoint, EntityDefinition, RelationshipDefinition, RelationshipKind, Role, SchemaStore};
use crate::storage::{self, Record};
use crate::{Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const KEY_COLUMN: &str = "option_key";
const LABEL_COLUMN: &str = "option_label";

/// A linkable record: its key and display label
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectOption {
    pub key: String,
    pub label: String,
}

/// Join from one endpoint's table to the other endpoint's records
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub statement: Statement,
    /// Alias the other endpoint's table is joined under
    pub alias: String,
}

pub struct RelationshipResolver<'a> {
    schema: &'a SchemaStore,
}

impl<'a> RelationshipResolver<'a> {
    pub fn new(schema: &'a SchemaStore) -> Self {
        Self { schema }
    }

    /// Which endpoint `type_name` occupies. A self-referential relationship
    /// reads from `endpoint1`.
    pub fn resolve_endpoint(&self, def: &RelationshipDefinition, type_name: &str) -> Result<Role> {
        if def.endpoint1.entity == type_name {
            Ok(Role::Endpoint1)
        } else if def.endpoint_a.entity == type_name {
            Ok(Role::EndpointA)
        } else {
            Err(Error::AmbiguousRelationship {
                relationship: def.name.clone(),
                entity: type_name.to_string(),
            })
        }
    }

    /// Check both endpoints against their entity definitions.
    ///
    /// Every endpoint key must be its entity's primary property, except the
    /// foreign key on the many side of a one-to-many.
    pub fn validate(&self, def: &RelationshipDefinition) -> Result<()> {
        self.endpoint_definition(def, Role::Endpoint1)?;
        self.endpoint_definition(def, Role::EndpointA)?;
        Ok(())
    }

    pub fn other_endpoint(def: &RelationshipDefinition, role: Role) -> &Endpoint {
        def.endpoint(role.other())
    }

    /// Whether a record on `role` links to at most one record on the other side
    pub fn is_single_valued(def: &RelationshipDefinition, role: Role) -> bool {
        def.kind == RelationshipKind::OneToMany && role == Role::EndpointA
    }

    /// Join appended to a SELECT over the `from` endpoint's table.
    ///
    /// Many-to-many joins the junction rows whose from-side key is
    /// `key_value` and that are not deleted, then the other endpoint's table.
    /// One-to-many joins the two tables directly on the foreign key.
    pub fn build_join_clause(
        &self,
        def: &RelationshipDefinition,
        from: Role,
        key_value: &str,
    ) -> Result<JoinClause> {
        let from_def = self.endpoint_definition(def, from)?;
        let other_def = self.endpoint_definition(def, from.other())?;
        let alias = def.join_alias(from.other());

        let statement = match def.kind {
            RelationshipKind::ManyToMany => {
                let table = junction_table(def)?;
                let junction = def.junction_alias();
                let other = def.endpoint(from.other());

                let mut stmt = Statement::new(format!(
                    "LEFT JOIN {table} {junction} ON {junction}.{} = ",
                    def.junction_column(from)
                ));
                stmt.push_param(SqlValue::Text(key_value.to_string()));
                stmt.push_sql(&format!(
                    " AND {junction}.{DELETED_COLUMN} = 0 LEFT JOIN {} {alias} ON {junction}.{} = {alias}.{}",
                    other_def.table,
                    def.junction_column(from.other()),
                    other.key
                ));
                stmt
            }
            RelationshipKind::OneToMany => {
                let one = &def.endpoint1;
                let many = &def.endpoint_a;
                let condition = match from {
                    Role::Endpoint1 => format!("{alias}.{} = {}.{}", many.key, from_def.table, one.key),
                    Role::EndpointA => format!("{alias}.{} = {}.{}", one.key, from_def.table, many.key),
                };
                Statement::new(format!("LEFT JOIN {} {alias} ON {condition}", other_def.table))
            }
        };

        Ok(JoinClause { statement, alias })
    }

    /// Records on the other side currently linked to `key`, ordered by label
    pub fn linked_records(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        from: Role,
        key: &str,
    ) -> Result<Vec<SelectOption>> {
        let from_def = self.endpoint_definition(def, from)?;
        let other_def = self.endpoint_definition(def, from.other())?;
        let join = self.build_join_clause(def, from, key)?;

        let other_key = format!("{}.{}", join.alias, other_def.primary().name);
        let mut filter = Statement::new(format!("{}.{} = ", from_def.table, from_def.primary().name));
        filter.push_param(SqlValue::Text(key.to_string()));
        filter.push_sql(&format!(" AND {other_key} IS NOT NULL"));

        let stmt = Select::from(&from_def)
            .field(format!("{other_key} AS {KEY_COLUMN}"))
            .field(format!(
                "{} AS {LABEL_COLUMN}",
                label_expr(&join.alias, Self::other_endpoint(def, from), &other_def)
            ))
            .join(join.statement)
            .filter(filter)
            .order_by(LABEL_COLUMN)
            .build();

        Ok(storage::query(conn, &stmt)?.iter().map(to_option).collect())
    }

    /// Every record of the other endpoint, as key/label pairs ordered by label
    pub fn options_for_select(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        from: Role,
    ) -> Result<Vec<SelectOption>> {
        let other_def = self.endpoint_definition(def, from.other())?;

        let stmt = Select::from(&other_def)
            .field(format!("{}.{} AS {KEY_COLUMN}", other_def.table, other_def.primary().name))
            .field(format!(
                "{} AS {LABEL_COLUMN}",
                label_expr(&other_def.table, Self::other_endpoint(def, from), &other_def)
            ))
            .order_by(LABEL_COLUMN)
            .build();

        Ok(storage::query(conn, &stmt)?.iter().map(to_option).collect())
    }

    /// Replace the link set of record `from_key` with `related_keys`.
    ///
    /// Runs its statements on `conn` without a transaction of its own; callers
    /// wrap it so a failure part way through rolls back. Returns the number of
    /// links written.
    pub fn link(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        from: Role,
        from_key: &str,
        related_keys: &[String],
    ) -> Result<usize> {
        self.validate(def)?;
        if def.is_self_referential() && related_keys.iter().any(|k| k == from_key) {
            return Err(Error::SelfReferentialAmbiguity {
                relationship: def.name.clone(),
                key: from_key.to_string(),
            });
        }

        let mut keys: Vec<&str> = Vec::with_capacity(related_keys.len());
        for key in related_keys.iter().map(String::as_str).filter(|k| !k.is_empty()) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let linked = match def.kind {
            RelationshipKind::ManyToMany => self.link_junction(conn, def, from, from_key, &keys)?,
            RelationshipKind::OneToMany => self.link_foreign_key(conn, def, from, from_key, &keys)?,
        };
        tracing::debug!(
            "Linked {} {} to {} record(s) via {}",
            def.endpoint(from).entity,
            from_key,
            linked,
            def.name
        );
        Ok(linked)
    }

    fn link_junction(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        from: Role,
        from_key: &str,
        keys: &[&str],
    ) -> Result<usize> {
        let table = junction_table(def)?;
        let from_col = def.junction_column(from);
        let other_col = def.junction_column(from.other());

        let mut clear = Statement::new(format!(
            "UPDATE {table} SET {DELETED_COLUMN} = 1 WHERE {from_col} = "
        ));
        clear.push_param(SqlValue::Text(from_key.to_string()));
        clear.push_sql(&format!(" AND {DELETED_COLUMN} = 0"));
        storage::execute(conn, &clear)?;

        for (linked, key) in keys.iter().enumerate() {
            let mut insert = Statement::new(format!(
                "INSERT INTO {table} (id, {from_col}, {other_col}, {DELETED_COLUMN}) VALUES ("
            ));
            insert.push_param(SqlValue::Text(generate_key(JUNCTION_KEY_WIDTH)));
            insert.push_sql(", ");
            insert.push_param(SqlValue::Text(from_key.to_string()));
            insert.push_sql(", ");
            insert.push_param(SqlValue::Text(key.to_string()));
            insert.push_sql(", 0)");

            storage::execute(conn, &insert).map_err(|e| Error::PartialLink {
                relationship: def.name.clone(),
                linked,
                requested: keys.len(),
                reason: e.to_string(),
            })?;
        }
        Ok(keys.len())
    }

    fn link_foreign_key(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        from: Role,
        from_key: &str,
        keys: &[&str],
    ) -> Result<usize> {
        let many_def = self.endpoint_definition(def, Role::EndpointA)?;
        let fk = &def.endpoint_a.key;
        let many_pk = &many_def.primary().name;

        match from {
            // The many side points at zero or one record
            Role::EndpointA => {
                if keys.len() > 1 {
                    return Err(Error::PartialLink {
                        relationship: def.name.clone(),
                        linked: 0,
                        requested: keys.len(),
                        reason: format!("a {} links to at most one {}", many_def.name, def.endpoint1.entity),
                    });
                }
                let target = keys.first().map_or(SqlValue::Null, |k| SqlValue::Text(k.to_string()));
                let mut stmt = Statement::new(format!("UPDATE {} SET {fk} = ", many_def.table));
                stmt.push_param(target);
                stmt.push_sql(&format!(" WHERE {}.{many_pk} = ", many_def.table));
                stmt.push_param(SqlValue::Text(from_key.to_string()));
                storage::execute(conn, &stmt)?;
                Ok(keys.len())
            }
            Role::Endpoint1 => {
                let mut detach = Statement::new(format!(
                    "UPDATE {} SET {fk} = NULL WHERE {}.{fk} = ",
                    many_def.table, many_def.table
                ));
                detach.push_param(SqlValue::Text(from_key.to_string()));
                storage::execute(conn, &detach)?;

                for (linked, key) in keys.iter().enumerate() {
                    let mut attach = Statement::new(format!("UPDATE {} SET {fk} = ", many_def.table));
                    attach.push_param(SqlValue::Text(from_key.to_string()));
                    attach.push_sql(&format!(" WHERE {}.{many_pk} = ", many_def.table));
                    attach.push_param(SqlValue::Text(key.to_string()));

                    let changed = storage::execute(conn, &attach).map_err(|e| Error::PartialLink {
                        relationship: def.name.clone(),
                        linked,
                        requested: keys.len(),
                        reason: e.to_string(),
                    })?;
                    if changed == 0 {
                        return Err(Error::PartialLink {
                            relationship: def.name.clone(),
                            linked,
                            requested: keys.len(),
                            reason: format!("there is no {} record with a key of '{key}'", many_def.name),
                        });
                    }
                }
                Ok(keys.len())
            }
        }
    }

    /// Entity definition behind an endpoint, with its key checked
    fn endpoint_definition(&self, def: &RelationshipDefinition, role: Role) -> Result<Arc<EntityDefinition>> {
        let endpoint = def.endpoint(role);
        let entity = self.schema.get_entity_definition(&endpoint.entity)?;
        entity.require_property(&endpoint.key)?;
        let foreign_key = def.kind == RelationshipKind::OneToMany && role == Role::EndpointA;
        if !foreign_key && entity.primary().name != endpoint.key {
            return Err(Error::InvalidSchema {
                name: def.name.clone(),
                reason: format!(
                    "{} key '{}' must be the primary property of {}",
                    role, endpoint.key, entity.name
                ),
            });
        }
        Ok(entity)
    }
}

/// Width of each endpoint's key column in a junction table
pub fn junction_widths(schema: &SchemaStore, def: &RelationshipDefinition) -> Result<(u32, u32)> {
    let width = |endpoint: &Endpoint| -> Result<u32> {
        let entity = schema.get_entity_definition(&endpoint.entity)?;
        Ok(entity.require_property(&endpoint.key)?.key_width())
    };
    Ok((width(&def.endpoint1)?, width(&def.endpoint_a)?))
}

/// DDL for a many-to-many junction table sized to its endpoints' keys
pub fn junction_table_statement(schema: &SchemaStore, def: &RelationshipDefinition) -> Result<Statement> {
    RelationshipResolver::new(schema).validate(def)?;
    let (width1, width_a) = junction_widths(schema, def)?;
    QueryBuilder::build_create_junction_table(def, width1, width_a)
}

/// Label expression: display fields joined with a space, or the key when none are declared
fn label_expr(qualifier: &str, endpoint: &Endpoint, entity: &EntityDefinition) -> String {
    let fields: Vec<String> = if endpoint.display.is_empty() {
        vec![format!("{qualifier}.{}", entity.primary().name)]
    } else {
        endpoint
            .display
            .iter()
            .map(|field| format!("{qualifier}.{field}"))
            .collect()
    };
    format!("concat_ws(' ', {})", fields.join(", "))
}

fn to_option(record: &Record) -> SelectOption {
    let text = |name: &str| match record.get(name) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    SelectOption {
        key: text(KEY_COLUMN),
        label: text(LABEL_COLUMN),
    }
}
