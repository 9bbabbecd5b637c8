//! Schema store - loads declarations on first use and caches them
//!
//! The cache lives as long as the store. Reads take a shared lock; only the
//! first load of a name (or an explicit clear) takes the write lock.

use super::definition::{EntityDefinition, PropertyDefinition, RelationshipDefinition};
use super::source::DeclarationSource;
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

type Cache<T> = RwLock<HashMap<String, Arc<T>>>;

pub struct SchemaStore {
    source: Box<dyn DeclarationSource>,
    entities: Cache<EntityDefinition>,
    relationships: Cache<RelationshipDefinition>,
}

impl SchemaStore {
    pub fn new(source: impl DeclarationSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            entities: RwLock::new(HashMap::new()),
            relationships: RwLock::new(HashMap::new()),
        }
    }

    /// Entity definition for a type, loaded on first request
    pub fn get_entity_definition(&self, name: &str) -> Result<Arc<EntityDefinition>> {
        if let Some(def) = cached(&self.entities, name) {
            return Ok(def);
        }

        let text = self
            .source
            .entity_declaration(name)?
            .ok_or_else(|| Error::SchemaNotFound(name.to_string()))?;
        let def = EntityDefinition::from_toml(name, &text)?;
        tracing::debug!("Loaded entity definition {} ({} properties)", name, def.properties().len());
        Ok(insert(&self.entities, name, def))
    }

    /// Relationship definition by name, loaded on first request
    pub fn get_relationship_definition(&self, name: &str) -> Result<Arc<RelationshipDefinition>> {
        if let Some(def) = cached(&self.relationships, name) {
            return Ok(def);
        }

        let text = self
            .source
            .relationship_declaration(name)?
            .ok_or_else(|| Error::SchemaNotFound(name.to_string()))?;
        let def = RelationshipDefinition::from_toml(name, &text)?;
        tracing::debug!("Loaded relationship definition {} ({})", name, def.kind);
        Ok(insert(&self.relationships, name, def))
    }

    /// Names of the properties whose `attribute` equals `value`.
    ///
    /// Unknown types and attributes yield an empty list.
    pub fn search_properties(&self, name: &str, attribute: &str, value: &Value) -> Vec<String> {
        let Ok(def) = self.get_entity_definition(name) else {
            return Vec::new();
        };
        def.properties()
            .iter()
            .filter(|p| p.attribute(attribute).as_ref() == Some(value))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn get_primary_property(&self, name: &str) -> Result<PropertyDefinition> {
        Ok(self.get_entity_definition(name)?.primary().clone())
    }

    /// Override one attribute of a cached property definition.
    ///
    /// The override lasts until the cache is cleared.
    pub fn set_property_attribute(
        &self,
        entity: &str,
        property: &str,
        attribute: &str,
        value: Value,
    ) -> Result<()> {
        let mut def = (*self.get_entity_definition(entity)?).clone();
        def.property_mut(property)
            .ok_or_else(|| Error::UnknownProperty {
                entity: entity.to_string(),
                property: property.to_string(),
            })?
            .set_attribute(attribute, value)?;
        let def = def.revalidate()?;

        self.entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.to_string(), Arc::new(def));
        Ok(())
    }

    pub fn entity_names(&self) -> Result<Vec<String>> {
        self.source.entity_names()
    }

    pub fn relationship_names(&self) -> Result<Vec<String>> {
        self.source.relationship_names()
    }

    /// Drop every cached definition
    pub fn clear_cache(&self) {
        self.entities.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.relationships.write().unwrap_or_else(PoisonError::into_inner).clear();
        tracing::debug!("Schema cache cleared");
    }

    /// Number of cached entity and relationship definitions
    pub fn cached_count(&self) -> (usize, usize) {
        (
            self.entities.read().unwrap_or_else(PoisonError::into_inner).len(),
            self.relationships.read().unwrap_or_else(PoisonError::into_inner).len(),
        )
    }
}

fn cached<T>(cache: &Cache<T>, name: &str) -> Option<Arc<T>> {
    cache
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// First writer wins so concurrent loaders share one definition
fn insert<T>(cache: &Cache<T>, name: &str, def: T) -> Arc<T> {
    cache
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(def))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StaticManifest;

    const USERS: &str = r#"
        name = "Users"

        [[properties]]
        name = "id"
        datatype = "string"
        len = 16
        is_primary = true

        [[properties]]
        name = "email"
        datatype = "string"
        fieldtype = "email"
        required = true

        [[properties]]
        name = "password_hash"
        datatype = "string"
        fieldtype = "password"
        required = true
    "#;

    fn store() -> SchemaStore {
        SchemaStore::new(StaticManifest::new().with_entity("Users", USERS))
    }

    #[test]
    fn test_load_is_cached() {
        let store = store();
        assert_eq!(store.cached_count(), (0, 0));

        let first = store.get_entity_definition("Users").unwrap();
        let second = store.get_entity_definition("Users").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached_count(), (1, 0));

        store.clear_cache();
        assert_eq!(store.cached_count(), (0, 0));
    }

    #[test]
    fn test_missing_declaration() {
        let store = store();
        assert!(matches!(
            store.get_entity_definition("Blogs"),
            Err(Error::SchemaNotFound(name)) if name == "Blogs"
        ));
        assert!(matches!(
            store.get_relationship_definition("Users_Blogs"),
            Err(Error::SchemaNotFound(_))
        ));
    }

    #[test]
    fn test_search_properties() {
        let store = store();
        assert_eq!(
            store.search_properties("Users", "required", &Value::Bool(true)),
            vec!["email", "password_hash"]
        );
        assert_eq!(
            store.search_properties("Users", "fieldtype", &Value::String("password".into())),
            vec!["password_hash"]
        );
        assert!(store.search_properties("Users", "no_such_attr", &Value::Bool(true)).is_empty());
        assert!(store.search_properties("Nope", "required", &Value::Bool(true)).is_empty());
    }

    #[test]
    fn test_primary_property() {
        let store = store();
        let primary = store.get_primary_property("Users").unwrap();
        assert_eq!(primary.name, "id");
        assert_eq!(primary.len, Some(16));
    }

    #[test]
    fn test_attribute_override_survives_until_clear() {
        let store = store();
        store
            .set_property_attribute("Users", "password_hash", "required", Value::Bool(false))
            .unwrap();
        let def = store.get_entity_definition("Users").unwrap();
        assert!(!def.property("password_hash").unwrap().required);

        store.clear_cache();
        let def = store.get_entity_definition("Users").unwrap();
        assert!(def.property("password_hash").unwrap().required);
    }
}
