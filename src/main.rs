//! propdb CLI - drive the persistence engine from declarations on disk

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use propdb::config::{self, EngineConfig};
use propdb::query::Combinator;
use propdb::storage::Record;
use propdb::sync::SyncReport;
use propdb::{ui, Engine, Error, MismatchPolicy};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "propdb")]
#[command(version)]
#[command(about = "Metadata-driven persistence over SQLite")]
#[command(long_about = r#"
propdb reads entity and relationship declarations and persists records for them:
  • Creates and verifies tables from the declarations
  • Saves records with validation, linking related records
  • Lists records with their relationships resolved

Example usage:
  propdb init
  propdb sync
  propdb save Users --data '{"username": "ada", "movies": ["m1"]}'
  propdb list Users --where username=ada
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database file (or :memory:), overriding the config
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Schema directory, overriding the config
    #[arg(short, long, global = true)]
    schema_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create the schema directories
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Create missing tables and columns, and report type mismatches
    Sync {
        /// Treat type mismatches as errors
        #[arg(long)]
        strict: bool,
    },

    /// Show the declared properties of a type
    Describe {
        type_name: String,
    },

    /// List records of a type
    List {
        type_name: String,

        /// Filter as field=value, repeatable
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,

        /// Match any filter instead of all of them
        #[arg(long)]
        any: bool,
    },

    /// Show one record
    Detail {
        type_name: String,
        key: String,
    },

    /// Insert a record, or update one when the data carries its key
    Save {
        type_name: String,

        /// Field values as a JSON object
        #[arg(long)]
        data: String,
    },

    /// Delete a record and unlink its relationships
    Delete {
        type_name: String,
        key: String,
    },

    /// List the choices for a select or relationship field
    Options {
        type_name: String,
        field: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins when set
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let mut config = config::load_config(Some(&config_path))?.unwrap_or_default();
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    if let Some(schema_dir) = &cli.schema_dir {
        config.schema_dir = schema_dir.clone();
    }

    if let Commands::Init { force } = cli.command {
        return init(&config_path, &config, force, cli.format);
    }

    if !config.is_in_memory() {
        config::ensure_db_dir(std::path::Path::new(&config.database))?;
    }
    tracing::debug!("Database: {}, schema: {}", config.database, config.schema_dir.display());

    let mut engine = Engine::open(&config).context("failed to open the database")?;
    let format = cli.format;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),

        Commands::Sync { strict } => {
            if strict {
                engine = engine.with_policy(MismatchPolicy::Fail);
            }
            let report = engine.sync()?;
            emit(format, "sync", &report, || print_sync_report(&report))?;
        }

        Commands::Describe { type_name } => {
            let def = engine.describe(&type_name)?;
            let properties: Vec<Value> = def
                .properties()
                .iter()
                .map(|prop| {
                    json!({
                        "name": prop.name,
                        "datatype": prop.datatype.as_str(),
                        "column": prop.is_db_backed().then(|| propdb::map_type(prop).sql()),
                        "required": prop.required,
                        "primary": prop.is_primary,
                        "relationship": prop.relationship,
                    })
                })
                .collect();
            let data = json!({ "name": def.name, "table": def.table, "properties": properties });
            emit(format, "describe", &data, || {
                ui::header(&format!("{} ({})", def.name, def.table));
                println!("{}", ui::definition_table(&def));
            })?;
        }

        Commands::List { type_name, filters, any } => {
            let filter = parse_filters(&filters)?;
            let combinator = if any { Combinator::Or } else { Combinator::And };
            let records = engine.find(&type_name, &filter, combinator)?;
            let def = engine.describe(&type_name)?;
            emit(format, "list", &records, || {
                if records.is_empty() {
                    println!("{}", ui::muted(&format!("No {type_name} records")));
                    return;
                }
                let fields: Vec<&str> = def.properties().iter().map(|p| p.name.as_str()).collect();
                println!("{}", ui::records_table(&fields, &records));
                println!("{}", ui::muted(&format!("{} record(s)", records.len())));
            })?;
        }

        Commands::Detail { type_name, key } => {
            let record = engine.detail(&type_name, &key)?;
            emit(format, "detail", &record, || print_record(&type_name, &key, &record))?;
        }

        Commands::Save { type_name, data } => {
            let data: Map<String, Value> =
                serde_json::from_str(&data).context("--data must be a JSON object")?;
            let record = match engine.save(&type_name, &data) {
                Ok(record) => record,
                Err(Error::Validation(errors)) if format == OutputFormat::Text => {
                    for error in &errors.errors {
                        ui::error(&format!("{}: {}", error.field, error.message));
                    }
                    anyhow::bail!("{} failed validation", errors.entity);
                }
                Err(e) => return Err(e.into()),
            };
            let def = engine.describe(&type_name)?;
            let key = record
                .get(&def.primary().name)
                .map(ui::display_value)
                .unwrap_or_default();
            emit(format, "save", &record, || {
                ui::success(&format!("Saved {type_name} {}", ui::key(&key)));
                print_record(&type_name, &key, &record);
            })?;
        }

        Commands::Delete { type_name, key } => {
            engine.delete(&type_name, &key)?;
            let data = json!({ "type": type_name, "key": key });
            emit(format, "delete", &data, || ui::deleted(&type_name, &key))?;
        }

        Commands::Options { type_name, field } => {
            let options = engine.options(&type_name, &field)?;
            emit(format, "options", &options, || {
                if options.is_empty() {
                    println!("{}", ui::muted(&format!("{type_name}.{field} has no choices")));
                } else {
                    println!("{}", ui::options_table(&options));
                }
            })?;
        }
    }

    Ok(())
}

fn init(path: &std::path::Path, config: &EngineConfig, force: bool, format: OutputFormat) -> anyhow::Result<()> {
    config::write_config(path, config, force)?;
    for sub in ["entities", "relationships"] {
        std::fs::create_dir_all(config.schema_dir.join(sub))?;
    }
    emit(format, "init", config, || {
        ui::success(&format!("Wrote {}", path.display()));
        ui::info("Database", &config.database);
        ui::info("Schema", &config.schema_dir.display().to_string());
    })
}

/// Print `data` as JSON, or run the human renderer
fn emit<T: Serialize>(format: OutputFormat, command: &str, data: &T, human: impl FnOnce()) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let envelope = json!({ "status": "ok", "command": command, "data": data });
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => human(),
    }
    Ok(())
}

fn parse_filters(filters: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut map = Map::new();
    for filter in filters {
        let (field, value) = filter
            .split_once('=')
            .with_context(|| format!("filter '{filter}' is not field=value"))?;
        map.insert(field.trim().to_string(), Value::String(value.to_string()));
    }
    Ok(map)
}

fn print_record(type_name: &str, key: &str, record: &Record) {
    ui::section(&format!(" {type_name} {key} "));
    for (name, value) in record {
        ui::field(name, value);
    }
}

fn print_sync_report(report: &SyncReport) {
    ui::header("Schema sync");
    for table in &report.created {
        ui::table_created(table);
    }
    for column in &report.added {
        ui::column_added(column);
    }
    for mismatch in &report.mismatches {
        ui::mismatch(mismatch);
    }

    let created = report.created.len().to_string();
    let added = report.added.len().to_string();
    let verified = report.verified.len().to_string();
    let mismatches = report.mismatches.len().to_string();
    println!(
        "{}",
        ui::stats_table(&[
            ("Tables created", &created),
            ("Columns added", &added),
            ("Tables verified", &verified),
            ("Mismatches", &mismatches),
        ])
    );

    if report.is_clean() {
        ui::success("Schema in sync");
    } else {
        ui::warn("Schema has type mismatches");
    }
}
