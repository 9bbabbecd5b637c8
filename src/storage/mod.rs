//! Storage Layer - pooled SQLite access
//!
//! Entity tables and junction tables are generated from definitions; this
//! layer only executes statements and introspects live tables.

pub mod pool;
pub mod sqlite;

pub use pool::{ConnectionPool, PooledConnection};
pub use sqlite::{
    count_rows, describe_table, execute, query, table_exists, table_names, ColumnInfo, Database,
    Record,
};
