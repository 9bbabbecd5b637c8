//! Schema synchronization - reconcile declarations with the live database
//!
//! Missing tables are created and missing columns are added. Columns whose
//! live type differs from the declared one are never rewritten: they are
//! reported, and the mismatch policy decides whether that is fatal.

use crate::query::{QueryBuilder, Statement, DELETED_COLUMN};
use crate::relationship::{junction_table_statement, junction_widths};
use crate::schema::{EntityDefinition, RelationshipDefinition, RelationshipKind, SchemaStore};
use crate::storage::{self, Database};
use crate::types::{map_type, ColumnType};
use crate::{ColumnMismatch, Error, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do when a live column's type diverges from its declaration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MismatchPolicy {
    /// Log each mismatch and carry on
    #[default]
    Warn,
    /// Abort the sync and roll back
    Fail,
}

impl MismatchPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchPolicy::Warn => "warn",
            MismatchPolicy::Fail => "fail",
        }
    }
}

impl FromStr for MismatchPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "warn" => Ok(MismatchPolicy::Warn),
            "fail" => Ok(MismatchPolicy::Fail),
            _ => Err(Error::Parse(format!("Unknown mismatch policy: {s}"))),
        }
    }
}

impl fmt::Display for MismatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of one synchronization run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tables created
    pub created: Vec<String>,
    /// Columns added, as `table.column`
    pub added: Vec<String>,
    /// Tables that already matched their declaration
    pub verified: Vec<String>,
    pub mismatches: Vec<ColumnMismatch>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn changed(&self) -> bool {
        !self.created.is_empty() || !self.added.is_empty()
    }
}

struct ExpectedColumn {
    name: String,
    column_type: ColumnType,
    /// Column cannot be added after the fact
    primary: bool,
    default: Option<&'static str>,
}

pub struct SchemaSynchronizer<'a> {
    schema: &'a SchemaStore,
    policy: MismatchPolicy,
}

impl<'a> SchemaSynchronizer<'a> {
    pub fn new(schema: &'a SchemaStore, policy: MismatchPolicy) -> Self {
        Self { schema, policy }
    }

    /// Synchronize every declared entity and relationship in one transaction
    pub fn sync(&self, db: &Database) -> Result<SyncReport> {
        db.with_transaction(|tx| self.sync_with(tx))
    }

    pub fn sync_with(&self, conn: &Connection) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        for name in self.schema.entity_names()? {
            let def = self.schema.get_entity_definition(&name)?;
            self.sync_entity(conn, &def, &mut report)?;
        }
        for name in self.schema.relationship_names()? {
            let def = self.schema.get_relationship_definition(&name)?;
            self.sync_relationship(conn, &def, &mut report)?;
        }

        if !report.mismatches.is_empty() {
            match self.policy {
                MismatchPolicy::Warn => {
                    for mismatch in &report.mismatches {
                        tracing::warn!("Schema mismatch: {}", mismatch);
                    }
                }
                MismatchPolicy::Fail => return Err(Error::SchemaMismatch(report.mismatches)),
            }
        }

        tracing::info!(
            "Schema sync: {} created, {} columns added, {} verified, {} mismatches",
            report.created.len(),
            report.added.len(),
            report.verified.len(),
            report.mismatches.len()
        );
        Ok(report)
    }

    fn sync_entity(&self, conn: &Connection, def: &EntityDefinition, report: &mut SyncReport) -> Result<()> {
        if !storage::table_exists(conn, &def.table)? {
            storage::execute(conn, &QueryBuilder::build_create_table(def))?;
            tracing::info!("Created table {}", def.table);
            report.created.push(def.table.clone());
            return Ok(());
        }

        let expected: Vec<ExpectedColumn> = def
            .db_properties()
            .map(|prop| ExpectedColumn {
                name: prop.name.clone(),
                column_type: map_type(prop),
                primary: prop.is_primary,
                default: None,
            })
            .collect();
        self.verify_table(conn, &def.table, &expected, report)
    }

    fn sync_relationship(
        &self,
        conn: &Connection,
        def: &RelationshipDefinition,
        report: &mut SyncReport,
    ) -> Result<()> {
        let (table, statement) = match (def.kind, def.table.as_deref()) {
            (RelationshipKind::ManyToMany, Some(table)) => (table, junction_table_statement(self.schema, def)?),
            // One-to-many links live in a column the many side already declares
            _ => return Ok(()),
        };

        if !storage::table_exists(conn, table)? {
            storage::execute(conn, &statement)?;
            for index in QueryBuilder::build_junction_indexes(def)? {
                storage::execute(conn, &index)?;
            }
            tracing::info!("Created junction table {}", table);
            report.created.push(table.to_string());
            return Ok(());
        }

        let (width1, width_a) = junction_widths(self.schema, def)?;
        let expected: Vec<ExpectedColumn> = QueryBuilder::junction_columns(def, width1, width_a)
            .into_iter()
            .map(|(name, column_type)| ExpectedColumn {
                primary: name == "id",
                default: (name == DELETED_COLUMN).then_some("NOT NULL DEFAULT 0"),
                name,
                column_type,
            })
            .collect();
        self.verify_table(conn, table, &expected, report)
    }

    fn verify_table(
        &self,
        conn: &Connection,
        table: &str,
        expected: &[ExpectedColumn],
        report: &mut SyncReport,
    ) -> Result<()> {
        let live = storage::describe_table(conn, table)?;
        let mut clean = true;

        for column in expected {
            let expected_type = column.column_type.sql();
            match live.iter().find(|c| c.name.eq_ignore_ascii_case(&column.name)) {
                Some(found) if column.column_type.matches(&found.declared_type) => {}
                Some(found) => {
                    clean = false;
                    report.mismatches.push(ColumnMismatch {
                        table: table.to_string(),
                        column: column.name.clone(),
                        expected: expected_type,
                        actual: Some(found.declared_type.clone()),
                    });
                }
                None if column.primary => {
                    clean = false;
                    report.mismatches.push(ColumnMismatch {
                        table: table.to_string(),
                        column: column.name.clone(),
                        expected: expected_type,
                        actual: None,
                    });
                }
                None => {
                    let mut clause = format!("ALTER TABLE {table} ADD COLUMN {} {expected_type}", column.name);
                    if let Some(default) = column.default {
                        clause.push(' ');
                        clause.push_str(default);
                    }
                    storage::execute(conn, &Statement::new(clause))?;
                    tracing::info!("Added column {}.{}", table, column.name);
                    report.added.push(format!("{table}.{}", column.name));
                }
            }
        }

        if clean {
            report.verified.push(table.to_string());
        }
        Ok(())
    }
}
