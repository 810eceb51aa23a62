//! Configuration for a [`Database`](crate::Database) handle
//!
//! Loaded from a `quarry.toml` file, a TOML string, or `QUARRY_*` environment
//! variables.

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use quarry_core::{QuarryError, Result, STORAGE_DATE_FORMAT};
use quarry_types::Dialect;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "quarry.toml";

const DEFAULT_CHUNK_SIZE: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dialect: Dialect,
    /// SQLite file path, or `:memory:`
    pub path: String,
    /// Attribute encryption key; `base64:` prefixed values are decoded first
    pub encryption_key: Option<String>,
    /// Date-time format used when entities are serialized
    pub date_format: String,
    /// Page size used by `cursor()`
    pub chunk_size: u64,
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            path: ":memory:".to_string(),
            encryption_key: None,
            date_format: STORAGE_DATE_FORMAT.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            log_queries: false,
        }
    }
}

impl DatabaseConfig {
    /// In-memory SQLite with defaults.
    pub fn memory() -> Self {
        Self {
            dialect: Dialect::SQLite,
            ..Self::default()
        }
    }

    pub fn with_encryption_key(mut self, key: impl Into<String>) -> Self {
        self.encryption_key = Some(key.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| QuarryError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load [`CONFIG_FILE`] or any other TOML file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            QuarryError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reads `QUARRY_DIALECT`, `QUARRY_DATABASE`, `QUARRY_ENCRYPTION_KEY`,
    /// `QUARRY_DATE_FORMAT`, `QUARRY_CHUNK_SIZE` and `QUARRY_LOG_QUERIES`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DatabaseConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(dialect) = lookup("QUARRY_DIALECT") {
            config.dialect = dialect
                .parse()
                .map_err(|_| QuarryError::Configuration(format!("unknown dialect `{dialect}`")))?;
        }
        if let Some(path) = lookup("QUARRY_DATABASE") {
            config.path = path;
        }
        config.encryption_key = lookup("QUARRY_ENCRYPTION_KEY").filter(|k| !k.is_empty());
        if let Some(format) = lookup("QUARRY_DATE_FORMAT") {
            config.date_format = format;
        }
        if let Some(size) = lookup("QUARRY_CHUNK_SIZE") {
            config.chunk_size = size.parse().map_err(|_| {
                QuarryError::Configuration(format!("QUARRY_CHUNK_SIZE is not a number: `{size}`"))
            })?;
        }
        if let Some(flag) = lookup("QUARRY_LOG_QUERIES") {
            config.log_queries = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(QuarryError::Configuration("chunk_size must be positive".into()));
        }
        self.key_bytes().map(|_| ())
    }

    /// Raw encryption key bytes, if a key is configured.
    pub(crate) fn key_bytes(&self) -> Result<Option<Vec<u8>>> {
        let Some(key) = self.encryption_key.as_deref() else {
            return Ok(None);
        };
        let bytes = match key.strip_prefix("base64:") {
            Some(encoded) => BASE64
                .decode(encoded)
                .map_err(|e| QuarryError::Configuration(format!("encryption key is not base64: {e}")))?,
            None => key.as_bytes().to_vec(),
        };
        if bytes.is_empty() {
            return Err(QuarryError::Configuration("encryption key is empty".into()));
        }
        Ok(Some(bytes))
    }
}
