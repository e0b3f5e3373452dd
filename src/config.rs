//! Connection configuration
//!
//! Names the driver, the database and optionally the schema version the
//! caller expects. Can be built in code or loaded from JSON.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Driver name (default: "memory")
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Database identifier, required
    #[serde(default)]
    pub database: String,

    /// Expected schema version; any version is accepted when absent
    #[serde(default)]
    pub version: Option<u32>,
}

fn default_driver() -> String {
    "memory".to_string()
}

impl ConnectionConfig {
    /// Config for `database` on the default driver
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            driver: default_driver(),
            database: database.into(),
            version: None,
        }
    }

    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Parses and validates a JSON config
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DbError::configuration(format!("invalid connection config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON config file
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.driver.trim().is_empty() {
            return Err(DbError::configuration("driver name must not be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(DbError::configuration("database name is required"));
        }
        if self.version == Some(0) {
            return Err(DbError::configuration("schema version must be positive"));
        }
        Ok(())
    }
}
