//! SQL generation from entity and relationship definitions
//!
//! Identifiers come from validated definitions and are emitted as-is; every
//! value travels as a bound parameter.

use super::statement::{SqlValue, Statement};
use super::value::{is_empty, string_elements, to_sql_value};
use crate::schema::{Datatype, EntityDefinition, PropertyDefinition, RelationshipDefinition, Role};
use crate::types::{map_type, ColumnType};
use crate::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Width of junction row ids
pub const JUNCTION_KEY_WIDTH: u32 = 32;

/// Soft-delete flag on junction rows
pub const DELETED_COLUMN: &str = "deleted";

/// Comparison used by a search parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Like,
    In,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Like => "LIKE",
            Operator::In => "IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_sql())
    }
}

/// How WHERE conditions are joined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combinator {
    #[default]
    And,
    Or,
}

impl Combinator {
    fn separator(&self) -> &'static str {
        match self {
            Combinator::And => " AND ",
            Combinator::Or => " OR ",
        }
    }
}

/// One (column, value, operator) search triple.
///
/// With no operator, equality is used, or `IN` for array columns and list values.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParam {
    pub column: String,
    pub value: Value,
    pub operator: Option<Operator>,
}

impl SearchParam {
    pub fn new(column: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            value,
            operator: None,
        }
    }

    pub fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = Some(operator);
        self
    }

    /// One equality parameter per entry of a field map
    pub fn from_map(fields: &Map<String, Value>) -> Vec<Self> {
        fields
            .iter()
            .map(|(column, value)| Self::new(column.clone(), value.clone()))
            .collect()
    }
}

/// Builds the canonical CRUD and DDL statements for a definition
pub struct QueryBuilder;

impl QueryBuilder {
    pub fn build_create_table(def: &EntityDefinition) -> Statement {
        let columns: Vec<String> = def
            .db_properties()
            .map(|prop| {
                let mut clause = format!("{} {}", prop.name, map_type(prop));
                if prop.is_primary {
                    clause.push_str(" PRIMARY KEY UNIQUE NOT NULL");
                }
                clause
            })
            .collect();
        Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            def.table,
            columns.join(", ")
        ))
    }

    /// Insert every db-backed column, applying defaults and required checks
    pub fn build_insert(def: &EntityDefinition, data: &Map<String, Value>) -> Result<Statement> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for prop in def.db_properties() {
            columns.push(prop.name.as_str());
            values.push(write_value(def, prop, data.get(&prop.name))?);
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        let mut stmt = Statement::new(format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            def.table,
            columns.join(", ")
        ));
        stmt.params = values;
        Ok(stmt)
    }

    /// Update the supplied columns of the record with primary key `key`.
    ///
    /// Returns `None` when `data` names no updatable column.
    pub fn build_update(
        def: &EntityDefinition,
        key: &str,
        data: &Map<String, Value>,
    ) -> Result<Option<Statement>> {
        let mut stmt = Statement::new(format!("UPDATE {} SET ", def.table));
        let mut assigned = 0;
        for prop in def.db_properties().filter(|p| !p.is_primary) {
            let Some(value) = data.get(&prop.name) else {
                continue;
            };
            if assigned > 0 {
                stmt.push_sql(", ");
            }
            stmt.push_sql(&format!("{} = ", prop.name));
            stmt.push_param(write_value(def, prop, Some(value))?);
            assigned += 1;
        }
        if assigned == 0 {
            return Ok(None);
        }

        stmt.push_sql(" WHERE ");
        stmt.append(primary_key_condition(def, key));
        Ok(Some(stmt))
    }

    pub fn build_delete(def: &EntityDefinition, key: &str) -> Statement {
        let mut stmt = Statement::new(format!("DELETE FROM {} WHERE ", def.table));
        stmt.append(primary_key_condition(def, key));
        stmt
    }

    /// Table-qualified conditions joined with `combinator`.
    ///
    /// Parameters naming non-db properties are skipped. An empty result means
    /// "no filter".
    pub fn build_where_clause(
        def: &EntityDefinition,
        params: &[SearchParam],
        combinator: Combinator,
    ) -> Result<Statement> {
        let mut stmt = Statement::default();
        for param in params {
            let prop = def.require_property(&param.column)?;
            if !prop.is_db_backed() {
                tracing::warn!(
                    "Skipping search on {}.{}: not stored in the database",
                    def.name,
                    prop.name
                );
                continue;
            }
            if !stmt.is_empty() {
                stmt.push_sql(combinator.separator());
            }
            stmt.append(condition(def, prop, param));
        }
        Ok(stmt)
    }

    pub fn build_select(
        def: &EntityDefinition,
        params: &[SearchParam],
        combinator: Combinator,
    ) -> Result<Statement> {
        let filter = Self::build_where_clause(def, params, combinator)?;
        Ok(Select::from(def).filter(filter).build())
    }

    /// Render a value the way it would appear in a WHERE operand
    pub fn format_value(prop: &PropertyDefinition, value: &Value) -> String {
        if prop.datatype == Datatype::Array || value.is_array() {
            let items: Vec<String> = string_elements(value).iter().map(SqlValue::literal).collect();
            format!("({})", items.join(", "))
        } else {
            to_sql_value(prop, value).literal()
        }
    }

    /// Expected junction columns: surrogate id, one key per endpoint, soft-delete flag
    pub fn junction_columns(
        rel: &RelationshipDefinition,
        width1: u32,
        width_a: u32,
    ) -> Vec<(String, ColumnType)> {
        vec![
            ("id".to_string(), ColumnType::Varchar(JUNCTION_KEY_WIDTH)),
            (rel.junction_column(Role::Endpoint1), ColumnType::Varchar(width1)),
            (rel.junction_column(Role::EndpointA), ColumnType::Varchar(width_a)),
            (DELETED_COLUMN.to_string(), ColumnType::Boolean),
        ]
    }

    pub fn build_create_junction_table(
        rel: &RelationshipDefinition,
        width1: u32,
        width_a: u32,
    ) -> Result<Statement> {
        let table = junction_table(rel)?;
        let columns: Vec<String> = Self::junction_columns(rel, width1, width_a)
            .into_iter()
            .map(|(name, column_type)| match name.as_str() {
                "id" => format!("{name} {column_type} PRIMARY KEY UNIQUE NOT NULL"),
                DELETED_COLUMN => format!("{name} {column_type} NOT NULL DEFAULT 0"),
                _ => format!("{name} {column_type} NOT NULL"),
            })
            .collect();
        Ok(Statement::new(format!(
            "CREATE TABLE IF NOT EXISTS {table} ({})",
            columns.join(", ")
        )))
    }

    /// Lookup indexes on both endpoint key columns of a junction table
    pub fn build_junction_indexes(rel: &RelationshipDefinition) -> Result<Vec<Statement>> {
        let table = junction_table(rel)?;
        Ok([Role::Endpoint1, Role::EndpointA]
            .into_iter()
            .map(|role| {
                let column = rel.junction_column(role);
                Statement::new(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})"
                ))
            })
            .collect())
    }
}

/// Junction table of a many-to-many relationship
pub fn junction_table(rel: &RelationshipDefinition) -> Result<&str> {
    rel.table.as_deref().ok_or_else(|| Error::InvalidSchema {
        name: rel.name.clone(),
        reason: format!("{} relationships have no junction table", rel.kind),
    })
}

/// SELECT with explicit fields, joins, filter and ordering
#[derive(Debug, Clone)]
pub struct Select {
    table: String,
    fields: Vec<String>,
    joins: Vec<Statement>,
    filter: Option<Statement>,
    order_by: Vec<String>,
}

impl Select {
    pub fn from(def: &EntityDefinition) -> Self {
        Self::from_table(&def.table)
    }

    pub fn from_table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            fields: Vec::new(),
            joins: Vec::new(),
            filter: None,
            order_by: Vec::new(),
        }
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    pub fn join(mut self, join: Statement) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a filter, AND-ed with any existing one. Empty filters are ignored.
    pub fn filter(mut self, filter: Statement) -> Self {
        if filter.is_empty() {
            return self;
        }
        self.filter = Some(match self.filter.take() {
            None => filter,
            Some(existing) => {
                let mut combined = Statement::new("(");
                combined.append(existing);
                combined.push_sql(") AND (");
                combined.append(filter);
                combined.push_sql(")");
                combined
            }
        });
        self
    }

    pub fn order_by(mut self, expr: impl Into<String>) -> Self {
        self.order_by.push(expr.into());
        self
    }

    pub fn build(self) -> Statement {
        let fields = if self.fields.is_empty() {
            format!("{}.*", self.table)
        } else {
            self.fields.join(", ")
        };
        let mut stmt = Statement::new(format!("SELECT {fields} FROM {}", self.table));
        for join in self.joins {
            stmt.push_sql(" ");
            stmt.append(join);
        }
        if let Some(filter) = self.filter {
            stmt.push_sql(" WHERE ");
            stmt.append(filter);
        }
        if !self.order_by.is_empty() {
            stmt.push_sql(&format!(" ORDER BY {}", self.order_by.join(", ")));
        }
        stmt
    }
}

fn primary_key_condition(def: &EntityDefinition, key: &str) -> Statement {
    let mut stmt = Statement::new(format!("{}.{} = ", def.table, def.primary().name));
    stmt.push_param(SqlValue::Text(key.to_string()));
    stmt
}

fn condition(def: &EntityDefinition, prop: &PropertyDefinition, param: &SearchParam) -> Statement {
    let operator = param.operator.unwrap_or(
        if prop.datatype == Datatype::Array || param.value.is_array() {
            Operator::In
        } else {
            Operator::Eq
        },
    );

    let mut stmt = Statement::new(format!("{}.{}", def.table, prop.name));
    match operator {
        Operator::In => {
            stmt.push_sql(" IN (");
            for (i, item) in string_elements(&param.value).into_iter().enumerate() {
                if i > 0 {
                    stmt.push_sql(", ");
                }
                stmt.push_param(item);
            }
            stmt.push_sql(")");
        }
        Operator::Eq if param.value.is_null() => {
            stmt.push_sql(" IS NULL");
        }
        Operator::NotEq if param.value.is_null() => {
            stmt.push_sql(" IS NOT NULL");
        }
        op => {
            stmt.push_sql(&format!(" {op} "));
            stmt.push_param(to_sql_value(prop, &param.value));
        }
    }
    stmt
}

/// Value written for one column: supplied, defaulted, or rejected
fn write_value(
    def: &EntityDefinition,
    prop: &PropertyDefinition,
    supplied: Option<&Value>,
) -> Result<SqlValue> {
    match supplied {
        Some(value) if !is_empty(value) => return Ok(to_sql_value(prop, value)),
        Some(value) if !prop.required => return Ok(to_sql_value(prop, value)),
        _ => {}
    }

    match prop.default_value.as_ref().filter(|d| !is_empty(d)) {
        Some(default) => Ok(to_sql_value(prop, default)),
        None if prop.required => Err(Error::MissingRequiredField {
            entity: def.name.clone(),
            field: prop.name.clone(),
        }),
        None => Ok(SqlValue::Null),
    }
}
