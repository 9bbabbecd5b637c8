//! Query building - definitions in, bound SQL statements out

pub mod builder;
pub mod statement;
pub mod value;

pub use builder::{
    junction_table, Combinator, Operator, QueryBuilder, SearchParam, Select, DELETED_COLUMN,
    JUNCTION_KEY_WIDTH,
};
pub use statement::{quote, SqlValue, Statement};
pub use value::{generate_key, hydrate, is_empty};
