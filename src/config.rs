//! Store configuration
//!
//! Plain serde struct with defaults for every field, optionally loaded from
//! YAML. Nothing here is read from the environment or the filesystem unless
//! the caller asks for it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// YAML could not be deserialized
    #[error("Invalid configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration file could not be read
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Field values that deserialize but cannot work
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix prepended to every table name
    pub table_prefix: String,
    /// Base IRI for relative IRIs in queries that declare no BASE
    pub base_iri: Option<String>,
    /// Extra prefixes available to every query
    pub prefixes: BTreeMap<String, String>,
    /// Capacity of the lexical value -> dictionary id cache
    pub dictionary_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_prefix: "arc_".to_string(),
            base_iri: None,
            prefixes: BTreeMap::new(),
            dictionary_cache_size: 4096,
        }
    }
}

impl StoreConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: StoreConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_yaml_str(&content)?;
        info!("Store configuration loaded from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    pub fn with_base_iri(mut self, base: impl Into<String>) -> Self {
        self.base_iri = Some(base.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.prefixes.insert(prefix.into(), iri.into());
        self
    }

    /// Table names derived from the prefix
    pub fn tables(&self) -> TableNames {
        TableNames {
            triple: format!("{}triple", self.table_prefix),
            id2val: format!("{}id2val", self.table_prefix),
        }
    }

    pub(crate) fn validate(&self) -> ConfigResult<()> {
        let valid_prefix = self
            .table_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_prefix {
            return Err(ConfigError::Invalid(format!(
                "table_prefix {:?} may only contain ASCII letters, digits and '_'",
                self.table_prefix
            )));
        }
        if self.dictionary_cache_size == 0 {
            return Err(ConfigError::Invalid(
                "dictionary_cache_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Physical table names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    /// Triple table: one row per stored statement
    pub triple: String,
    /// Term dictionary: id <-> lexical value
    pub id2val: String,
}
