//! Storage drivers
//!
//! A driver turns a `ConnectionConfig` into a storage engine. Drivers are
//! collected in a `DriverRegistry` built once by the host application.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::ConnectionConfig;
use crate::engine::{MemoryEngine, StorageEngine};
use crate::error::{DbError, DbResult};
use crate::lock_unpoisoned;
use crate::observability::Logger;
use crate::schema::DatabaseSchema;

use super::connection::Connection;

/// Source of storage engines for one driver name
pub trait Driver: Send + Sync {
    /// Name matched against `ConnectionConfig::driver`
    fn name(&self) -> &str;

    /// Opens the engine for `config.database`
    fn open(&self, config: &ConnectionConfig) -> DbResult<Arc<dyn StorageEngine>>;
}

/// Named in-process databases
#[derive(Default)]
pub struct MemoryDriver {
    databases: Mutex<HashMap<String, Arc<MemoryEngine>>>,
}

impl MemoryDriver {
    pub const NAME: &'static str = "memory";

    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a database from `schema`, replacing one of the same name
    pub fn register_database(&self, schema: DatabaseSchema) -> DbResult<Arc<MemoryEngine>> {
        let name = schema.name.clone();
        let engine = Arc::new(MemoryEngine::new(schema)?);
        lock_unpoisoned(&self.databases).insert(name.clone(), Arc::clone(&engine));
        Logger::info("DATABASE_REGISTERED", &[("database", &name), ("driver", Self::NAME)]);
        Ok(engine)
    }

    /// The engine behind database `name`
    pub fn engine(&self, name: &str) -> Option<Arc<MemoryEngine>> {
        lock_unpoisoned(&self.databases).get(name).cloned()
    }
}

impl Driver for MemoryDriver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open(&self, config: &ConnectionConfig) -> DbResult<Arc<dyn StorageEngine>> {
        let engine = self.engine(&config.database).ok_or_else(|| {
            DbError::configuration(format!("unknown database '{}'", config.database))
        })?;
        Ok(engine)
    }
}

/// Drivers by name
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `driver`, replacing one registered under the same name
    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(driver.name().to_string(), driver);
        self
    }

    pub fn get(&self, name: &str) -> DbResult<Arc<dyn Driver>> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::UnsupportedOperation(format!("no driver named '{}'", name)))
    }

    /// Validates `config`, opens its engine and connects to it
    pub fn connect(&self, config: ConnectionConfig) -> DbResult<Connection> {
        config.validate()?;
        let engine = self.get(&config.driver)?.open(&config)?;
        Connection::open(engine, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableSchema;

    fn registry() -> (DriverRegistry, Arc<MemoryDriver>) {
        let driver = Arc::new(MemoryDriver::new());
        driver
            .register_database(
                DatabaseSchema::new("app")
                    .with_version(2)
                    .with_table(TableSchema::new("user", "userId")),
            )
            .unwrap();
        let mut registry = DriverRegistry::new();
        registry.register(driver.clone());
        (registry, driver)
    }

    #[test]
    fn test_connect_through_registry() {
        let (registry, _) = registry();
        let connection = registry.connect(ConnectionConfig::new("app")).unwrap();
        assert!(connection.is_connected());
        assert!(registry
            .connect(ConnectionConfig::new("app").with_version(2))
            .is_ok());
    }

    #[test]
    fn test_unknown_driver_is_unsupported() {
        let (registry, _) = registry();
        let err = registry
            .connect(ConnectionConfig::new("app").with_driver("indexeddb"))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_UNSUPPORTED_OPERATION");
    }

    #[test]
    fn test_unknown_database_and_version_mismatch() {
        let (registry, _) = registry();
        let err = registry.connect(ConnectionConfig::new("other")).unwrap_err();
        assert_eq!(err.code(), "AERO_CONFIGURATION_ERROR");

        let err = registry
            .connect(ConnectionConfig::new("app").with_version(3))
            .unwrap_err();
        assert_eq!(err.code(), "AERO_CONFIGURATION_ERROR");
    }

    #[test]
    fn test_invalid_config_rejected_before_lookup() {
        let (registry, _) = registry();
        let err = registry.connect(ConnectionConfig::new("")).unwrap_err();
        assert_eq!(err.code(), "AERO_CONFIGURATION_ERROR");
    }
}
