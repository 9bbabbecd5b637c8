//! Engine - the list / detail / save surface over one schema and one database

use crate::config::EngineConfig;
use crate::entity::Entity;
use crate::query::value::key_string;
use crate::query::{Combinator, QueryBuilder, SearchParam, Select};
use crate::relationship::{RelationshipResolver, SelectOption};
use crate::schema::{DirectorySource, EntityDefinition, SchemaStore};
use crate::storage::{self, Database, Record};
use crate::sync::{MismatchPolicy, SchemaSynchronizer, SyncReport};
use crate::Result;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

pub struct Engine {
    schema: SchemaStore,
    db: Database,
    policy: MismatchPolicy,
}

impl Engine {
    pub fn new(schema: SchemaStore, db: Database) -> Self {
        Self {
            schema,
            db,
            policy: MismatchPolicy::default(),
        }
    }

    /// Open the database and schema directory named by `config`
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let db = if config.is_in_memory() {
            Database::open_in_memory()?
        } else {
            Database::open(Path::new(&config.database), config.pool_size, config.busy_timeout())?
        };
        let schema = SchemaStore::new(DirectorySource::new(&config.schema_dir));
        Ok(Self::new(schema, db).with_policy(config.on_mismatch))
    }

    pub fn with_policy(mut self, policy: MismatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Create or verify every declared table
    pub fn sync(&self) -> Result<SyncReport> {
        SchemaSynchronizer::new(&self.schema, self.policy).sync(&self.db)
    }

    pub fn describe(&self, type_name: &str) -> Result<Arc<EntityDefinition>> {
        self.schema.get_entity_definition(type_name)
    }

    /// Every record of a type, ordered by primary key
    pub fn list(&self, type_name: &str) -> Result<Vec<Record>> {
        self.find(type_name, &Map::new(), Combinator::And)
    }

    /// Records whose fields match `filter`
    pub fn find(&self, type_name: &str, filter: &Map<String, Value>, combinator: Combinator) -> Result<Vec<Record>> {
        let def = self.schema.get_entity_definition(type_name)?;
        let primary = &def.primary().name;
        let where_clause = QueryBuilder::build_where_clause(&def, &SearchParam::from_map(filter), combinator)?;
        let stmt = Select::from(&def)
            .field(format!("{}.{primary}", def.table))
            .filter(where_clause)
            .order_by(format!("{}.{primary}", def.table))
            .build();

        self.db.with_connection(|conn| {
            let mut records = Vec::new();
            for row in storage::query(conn, &stmt)? {
                let Some(key) = row.get(primary).and_then(key_string) else {
                    continue;
                };
                let mut entity = Entity::new(&self.schema, type_name)?;
                entity.load_with(conn, &key)?;
                records.push(entity.to_record());
            }
            Ok(records)
        })
    }

    pub fn detail(&self, type_name: &str, key: &str) -> Result<Record> {
        let mut entity = Entity::new(&self.schema, type_name)?;
        entity.load(&self.db, key)?;
        Ok(entity.to_record())
    }

    /// Insert or update, returning the stored record
    pub fn save(&self, type_name: &str, data: &Map<String, Value>) -> Result<Record> {
        let mut entity = Entity::new(&self.schema, type_name)?;
        entity.save(&self.db, data)?;
        Ok(entity.to_record())
    }

    pub fn delete(&self, type_name: &str, key: &str) -> Result<()> {
        self.db.with_transaction(|tx| {
            let mut entity = Entity::new(&self.schema, type_name)?;
            entity.load_with(tx, key)?;
            entity.delete_with(tx)
        })
    }

    /// Choices for a field: linkable records for a relationship field, the
    /// declared options for a select field, nothing otherwise
    pub fn options(&self, type_name: &str, field: &str) -> Result<Vec<SelectOption>> {
        let def = self.schema.get_entity_definition(type_name)?;
        let prop = def.require_property(field)?;

        match prop.relationship.as_deref() {
            Some(relationship) if prop.is_relationship() => {
                let rel = self.schema.get_relationship_definition(relationship)?;
                let resolver = RelationshipResolver::new(&self.schema);
                let from = resolver.resolve_endpoint(&rel, &def.name)?;
                self.db
                    .with_connection(|conn| resolver.options_for_select(conn, &rel, from))
            }
            _ => Ok(prop
                .options
                .iter()
                .map(|option| SelectOption {
                    key: option.clone(),
                    label: option.clone(),
                })
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticManifest;
    use crate::Error;
    use serde_json::json;

    const TEAMS: &str = r#"
        name = "Teams"
        [[properties]]
        name = "id"
        datatype = "string"
        len = 8
        is_primary = true
        [[properties]]
        name = "name"
        datatype = "string"
        required = true
        [[properties]]
        name = "league"
        datatype = "string"
        fieldtype = "select"
        options = ["east", "west"]
        [[properties]]
        name = "budget"
        datatype = "float"
    "#;

    fn engine() -> Engine {
        let schema = SchemaStore::new(StaticManifest::new().with_entity("Teams", TEAMS));
        let engine = Engine::new(schema, Database::open_in_memory().unwrap());
        engine.sync().unwrap();
        engine
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_save_detail_list_delete() {
        let engine = engine();
        let saved = engine.save("Teams", &data(json!({"name": "Owls", "league": "east"}))).unwrap();
        let key = saved["id"].as_str().unwrap().to_string();
        assert_eq!(key.len(), 8);

        engine.save("Teams", &data(json!({"name": "Bats", "league": "west"}))).unwrap();
        assert_eq!(engine.detail("Teams", &key).unwrap()["name"], json!("Owls"));
        assert_eq!(engine.list("Teams").unwrap().len(), 2);

        let west = engine
            .find("Teams", &data(json!({"league": "west"})), Combinator::And)
            .unwrap();
        assert_eq!(west.len(), 1);
        assert_eq!(west[0]["name"], json!("Bats"));

        engine.delete("Teams", &key).unwrap();
        assert!(matches!(engine.detail("Teams", &key), Err(Error::RecordNotFound { .. })));
        assert!(matches!(engine.delete("Teams", &key), Err(Error::RecordNotFound { .. })));
    }

    #[test]
    fn test_float_fields_round_trip() {
        let engine = engine();
        for budget in [json!(2), json!(2.5), json!(-7)] {
            let saved = engine.save("Teams", &data(json!({"name": "Owls", "budget": budget}))).unwrap();
            let key = saved["id"].as_str().unwrap();
            assert_eq!(engine.detail("Teams", key).unwrap()["budget"], budget);
        }
    }

    #[test]
    fn test_select_field_options() {
        let engine = engine();
        let options = engine.options("Teams", "league").unwrap();
        let keys: Vec<_> = options.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["east", "west"]);
        assert!(engine.options("Teams", "name").unwrap().is_empty());
        assert!(matches!(
            engine.options("Teams", "coach"),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_engine_over_schema_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            database: dir.path().join("data").join("app.db").to_string_lossy().to_string(),
            schema_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("schema"),
            pool_size: 2,
            ..EngineConfig::default()
        };
        crate::config::ensure_db_dir(Path::new(&config.database)).unwrap();
        let engine = Engine::open(&config).unwrap();

        let report = engine.sync().unwrap();
        for table in ["Blogs", "Movies", "Users", "Users_Movies"] {
            assert!(report.created.iter().any(|t| t == table), "{table} not created");
        }
        assert!(report.is_clean());
        assert!(!engine.sync().unwrap().changed());

        let heat = engine
            .save("Movies", &data(json!({"title": "Heat", "year": "1995", "genres": ["drama", "thriller"]})))
            .unwrap();
        let heat_key = heat["id"].as_str().unwrap().to_string();
        assert_eq!(heat["year"], json!(1995));
        assert_eq!(heat["genres"], json!(["drama", "thriller"]));

        let ada = engine
            .save(
                "Users",
                &data(json!({
                    "username": "ada",
                    "email": "ada@example.com",
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "movies": [heat_key],
                })),
            )
            .unwrap();
        let ada_key = ada["id"].as_str().unwrap().to_string();
        assert_eq!(ada["user_type"], json!("user"));
        assert_eq!(ada["movies"], json!([heat_key]));

        let blog = engine
            .save("Blogs", &data(json!({"subject": "Engines", "author": ada_key})))
            .unwrap();
        assert_eq!(blog["author"], json!(ada_key));

        let ada = engine.detail("Users", &ada_key).unwrap();
        assert_eq!(ada["blogs"], json!([blog["id"]]));
        assert_eq!(engine.detail("Movies", &heat_key).unwrap()["fans"], json!([ada_key]));

        let authors = engine.options("Blogs", "author").unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].label, "ada");

        let rejected = engine.save("Users", &data(json!({"username": "", "email": "nobody"})));
        match rejected {
            Err(Error::Validation(errors)) => assert_eq!(errors.fields(), vec!["username", "email"]),
            other => panic!("expected validation errors, got {other:?}"),
        }
        assert_eq!(engine.list("Users").unwrap().len(), 1);
    }

    fn shipped_schema_engine() -> Engine {
        let config = EngineConfig {
            database: crate::config::MEMORY_DATABASE.to_string(),
            schema_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("schema"),
            ..EngineConfig::default()
        };
        let engine = Engine::open(&config).unwrap();
        engine.sync().unwrap();
        engine
    }

    #[test]
    fn test_delete_detaches_one_to_many_children() {
        let engine = shipped_schema_engine();
        let ada = engine
            .save("Users", &data(json!({"username": "ada", "email": "ada@example.com"})))
            .unwrap();
        let ada_key = ada["id"].as_str().unwrap().to_string();
        let blog = engine
            .save("Blogs", &data(json!({"subject": "Engines", "author": ada_key})))
            .unwrap();
        let blog_key = blog["id"].as_str().unwrap().to_string();

        engine.delete("Users", &ada_key).unwrap();

        let user_id: Option<String> = engine
            .database()
            .with_connection(|conn| {
                Ok(conn.query_row("SELECT user_id FROM Blogs WHERE id = ?1", [&blog_key], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(user_id, None);
        let blog = engine.detail("Blogs", &blog_key).unwrap();
        assert_eq!(blog["author"], Value::Null);
        assert_eq!(blog["subject"], json!("Engines"));
    }

    #[test]
    fn test_unknown_type() {
        let engine = engine();
        assert!(matches!(engine.list("Players"), Err(Error::SchemaNotFound(_))));
    }
}
