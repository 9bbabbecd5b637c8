//! # propdb - Metadata-driven persistence engine
//!
//! Declarative property definitions describe each entity's fields, types and
//! relationships. The engine turns those declarations into SQL, hydrates and
//! persists entity instances, and resolves relationships in both directions.
//!
//! propdb provides:
//! - A cached schema store fed by TOML declarations
//! - A total datatype → column type mapping
//! - A parameter-binding query builder for the canonical CRUD statements
//! - Bidirectional relationship resolution, including soft-deleting junction tables
//! - An active-record `Entity` and an `Engine` facade for list/detail/save
//! - Schema synchronization against a live SQLite database

pub mod schema;
pub mod types;
pub mod query;
pub mod relationship;
pub mod entity;
pub mod storage;
pub mod sync;
pub mod api;
pub mod config;
pub mod ui;

use std::fmt;

// Re-exports for convenient access
pub use schema::{
    Datatype, EntityDefinition, FieldKind, PropertyDefinition, RelationshipDefinition,
    RelationshipKind, Role, SchemaStore, Source,
};
pub use types::{ColumnType, map_type};
pub use query::{QueryBuilder, Statement};
pub use relationship::RelationshipResolver;
pub use entity::Entity;
pub use storage::Database;
pub use sync::{MismatchPolicy, SchemaSynchronizer};
pub use api::Engine;

/// Result type alias for propdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for propdb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("No declaration found for '{0}'")]
    SchemaNotFound(String),

    #[error("Invalid declaration for '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },

    #[error("'{property}' is not a property of {entity}")]
    UnknownProperty { entity: String, property: String },

    #[error("There is no {entity} record with a key of '{key}'")]
    RecordNotFound { entity: String, key: String },

    #[error("No key specified for {0}")]
    KeyRequired(String),

    #[error("Cannot write {entity}: '{field}' is empty and has no default")]
    MissingRequiredField { entity: String, field: String },

    #[error("{0}")]
    Validation(ValidationErrors),

    #[error("Relationship {relationship} does not relate type '{entity}'")]
    AmbiguousRelationship { relationship: String, entity: String },

    #[error("Relationship {relationship} cannot link record '{key}' to itself")]
    SelfReferentialAmbiguity { relationship: String, key: String },

    #[error("Relationship {relationship} linked {linked} of {requested} records before failing: {reason}")]
    PartialLink {
        relationship: String,
        linked: usize,
        requested: usize,
        reason: String,
    },

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Schema mismatch: {}", format_mismatches(.0))]
    SchemaMismatch(Vec<ColumnMismatch>),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single failed validation check.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every validation failure found for one save attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ValidationErrors {
    pub entity: String,
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            errors: Vec::new(),
        }
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Names of the fields that failed, in declaration order
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed validation", self.entity)?;
        for error in &self.errors {
            write!(f, "; {}", error.message)?;
        }
        Ok(())
    }
}

/// A live column whose type diverges from what the declaration expects
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ColumnMismatch {
    pub table: String,
    pub column: String,
    pub expected: String,
    /// `None` when the column is missing from the live table
    pub actual: Option<String>,
}

impl fmt::Display for ColumnMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(
                f,
                "{}.{} is {} but should be {}",
                self.table, self.column, actual, self.expected
            ),
            None => write!(f, "{}.{} is missing (expected {})", self.table, self.column, self.expected),
        }
    }
}

fn format_mismatches(mismatches: &[ColumnMismatch]) -> String {
    mismatches
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
