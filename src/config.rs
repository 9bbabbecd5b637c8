use crate::sync::MismatchPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database path that selects a private in-memory database
pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// SQLite file, or `:memory:`
    pub database: String,
    /// Directory holding `entities/` and `relationships/` declarations
    pub schema_dir: PathBuf,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
    pub on_mismatch: MismatchPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database: "propdb.db".to_string(),
            schema_dir: PathBuf::from("schema"),
            pool_size: 4,
            busy_timeout_ms: 5000,
            on_mismatch: MismatchPolicy::Warn,
        }
    }
}

impl EngineConfig {
    pub fn is_in_memory(&self) -> bool {
        self.database == MEMORY_DATABASE
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Resolve relative paths against `base` (the config file's directory)
    pub fn relative_to(mut self, base: &Path) -> Self {
        if !self.is_in_memory() && Path::new(&self.database).is_relative() {
            self.database = base.join(&self.database).to_string_lossy().to_string();
        }
        if self.schema_dir.is_relative() {
            self.schema_dir = base.join(&self.schema_dir);
        }
        self
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("propdb.toml")
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<EngineConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: EngineConfig = toml::from_str(&contents)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(Some(config.relative_to(base)))
}

pub fn write_config(path: &Path, config: &EngineConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("propdb.toml"))).unwrap().is_none());
    }

    #[test]
    fn test_partial_config_takes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propdb.toml");
        std::fs::write(&path, "database = \":memory:\"\non_mismatch = \"fail\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap().unwrap();
        assert!(config.is_in_memory());
        assert_eq!(config.on_mismatch, MismatchPolicy::Fail);
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.busy_timeout(), Duration::from_millis(5000));
        assert_eq!(config.schema_dir, dir.path().join("schema"));
    }

    #[test]
    fn test_write_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("propdb.toml");
        let config = EngineConfig::default();

        write_config(&path, &config, false).unwrap();
        assert!(write_config(&path, &config, false).is_err());
        write_config(&path, &config, true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        assert_eq!(loaded.pool_size, config.pool_size);
        assert_eq!(loaded.database, dir.path().join("propdb.db").to_string_lossy());
    }
}
