//! Declaration sources
//!
//! A source hands out raw declaration text by name. Parsing and caching are
//! the store's job, so a source never holds parsed state.

use super::definition::check_identifier;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where entity and relationship declarations come from
pub trait DeclarationSource: Send + Sync {
    /// Raw declaration text for an entity type, `None` if it is not declared
    fn entity_declaration(&self, name: &str) -> Result<Option<String>>;

    /// Raw declaration text for a relationship, `None` if it is not declared
    fn relationship_declaration(&self, name: &str) -> Result<Option<String>>;

    /// Every declared entity type, sorted
    fn entity_names(&self) -> Result<Vec<String>>;

    /// Every declared relationship, sorted
    fn relationship_names(&self) -> Result<Vec<String>>;
}

/// Declarations registered explicitly at startup
#[derive(Debug, Default, Clone)]
pub struct StaticManifest {
    entities: BTreeMap<String, String>,
    relationships: BTreeMap<String, String>,
}

impl StaticManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, name: impl Into<String>, declaration: impl Into<String>) -> Self {
        self.register_entity(name, declaration);
        self
    }

    pub fn with_relationship(mut self, name: impl Into<String>, declaration: impl Into<String>) -> Self {
        self.register_relationship(name, declaration);
        self
    }

    pub fn register_entity(&mut self, name: impl Into<String>, declaration: impl Into<String>) {
        self.entities.insert(name.into(), declaration.into());
    }

    pub fn register_relationship(&mut self, name: impl Into<String>, declaration: impl Into<String>) {
        self.relationships.insert(name.into(), declaration.into());
    }
}

impl DeclarationSource for StaticManifest {
    fn entity_declaration(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entities.get(name).cloned())
    }

    fn relationship_declaration(&self, name: &str) -> Result<Option<String>> {
        Ok(self.relationships.get(name).cloned())
    }

    fn entity_names(&self) -> Result<Vec<String>> {
        Ok(self.entities.keys().cloned().collect())
    }

    fn relationship_names(&self) -> Result<Vec<String>> {
        Ok(self.relationships.keys().cloned().collect())
    }
}

/// Declarations stored as `<root>/entities/<Type>.toml` and `<root>/relationships/<Name>.toml`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub const ENTITY_DIR: &'static str = "entities";
    pub const RELATIONSHIP_DIR: &'static str = "relationships";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names are plain identifiers, so a lookup never leaves `<root>/<dir>`
    fn read(&self, dir: &str, name: &str) -> Result<Option<String>> {
        check_identifier(name, "declaration name", name)?;
        let path = self.root.join(dir).join(format!("{name}.toml"));
        if !path.is_file() {
            return Ok(None);
        }
        tracing::debug!("Reading declaration {}", path.display());
        Ok(Some(std::fs::read_to_string(path)?))
    }

    fn names(&self, dir: &str) -> Result<Vec<String>> {
        let pattern = self.root.join(dir).join("*.toml");
        let pattern = pattern.to_string_lossy();
        let mut names: Vec<String> = glob::glob(&pattern)
            .map_err(|e| Error::Parse(format!("bad declaration path {pattern}: {e}")))?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        names.sort();
        Ok(names)
    }
}

impl DeclarationSource for DirectorySource {
    fn entity_declaration(&self, name: &str) -> Result<Option<String>> {
        self.read(Self::ENTITY_DIR, name)
    }

    fn relationship_declaration(&self, name: &str) -> Result<Option<String>> {
        self.read(Self::RELATIONSHIP_DIR, name)
    }

    fn entity_names(&self) -> Result<Vec<String>> {
        self.names(Self::ENTITY_DIR)
    }

    fn relationship_names(&self) -> Result<Vec<String>> {
        self.names(Self::RELATIONSHIP_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_manifest_lookup() {
        let manifest = StaticManifest::new()
            .with_entity("Movies", "name = \"Movies\"")
            .with_entity("Users", "name = \"Users\"");

        assert!(manifest.entity_declaration("Movies").unwrap().is_some());
        assert!(manifest.entity_declaration("Blogs").unwrap().is_none());
        assert_eq!(manifest.entity_names().unwrap(), vec!["Movies", "Users"]);
        assert!(manifest.relationship_names().unwrap().is_empty());
    }

    #[test]
    fn test_directory_source_lists_toml_files() {
        let dir = tempfile::tempdir().unwrap();
        let entities = dir.path().join(DirectorySource::ENTITY_DIR);
        std::fs::create_dir_all(&entities).unwrap();
        std::fs::write(entities.join("Users.toml"), "name = \"Users\"").unwrap();
        std::fs::write(entities.join("Movies.toml"), "name = \"Movies\"").unwrap();
        std::fs::write(entities.join("notes.txt"), "ignored").unwrap();

        let source = DirectorySource::new(dir.path());
        assert_eq!(source.entity_names().unwrap(), vec!["Movies", "Users"]);
        assert_eq!(
            source.entity_declaration("Users").unwrap().as_deref(),
            Some("name = \"Users\"")
        );
        assert!(source.relationship_declaration("Users_Movies").unwrap().is_none());
        assert!(source.relationship_names().unwrap().is_empty());
    }

    #[test]
    fn test_directory_source_stays_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("schema");
        std::fs::create_dir_all(root.join(DirectorySource::ENTITY_DIR)).unwrap();
        std::fs::write(dir.path().join("secret.toml"), "name = \"secret\"\nbroken line here").unwrap();

        let store = crate::SchemaStore::new(DirectorySource::new(&root));
        for name in ["../../secret", "..", "entities/Users", ""] {
            match store.get_entity_definition(name) {
                Err(Error::InvalidSchema { reason, .. }) => assert!(reason.contains("not a valid identifier")),
                other => panic!("{name:?} should be rejected, got {other:?}"),
            }
        }
        let source = DirectorySource::new(&root);
        assert!(source.relationship_declaration("../../secret").is_err());
    }
}
