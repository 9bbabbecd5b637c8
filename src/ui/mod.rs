pub mod icons;
pub mod output;
pub mod table;
pub mod theme;

pub use icons::Icons;
pub use output::{
    column_added, deleted, display_value, error, field, header, info, key, mismatch, muted,
    section, success, table_created, warn,
};
pub use table::{definition_table, options_table, records_table, stats_table, TableBuilder};
pub use theme::{theme, Theme};
