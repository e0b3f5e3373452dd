//! Schema type definitions

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, DbResult};

/// A secondary index over one column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    /// Index name (unique within its table)
    pub name: String,
    /// Indexed column
    pub column: String,
    /// Whether two records may share a value
    #[serde(default)]
    pub unique: bool,
}

impl IndexSchema {
    /// Create a non-unique index
    pub fn new(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            unique: false,
        }
    }

    /// Create a non-unique index named after its column
    pub fn on(column: impl Into<String>) -> Self {
        let column = column.into();
        Self::new(column.clone(), column)
    }

    /// Marks the index unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table (object store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name (unique within the database)
    pub name: String,
    /// Field holding the primary key
    pub key_path: String,
    /// Whether missing keys are generated on insert
    #[serde(default)]
    pub auto_increment: bool,
    /// Declared secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Returns true if `field` is the primary key path
    pub fn is_key_path(&self, field: &str) -> bool {
        self.key_path == field
    }

    /// Looks up an index by name
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Finds the index that can serve a filter on `field`.
    ///
    /// An index named after the field wins over other indexes on the same
    /// column; otherwise the first declared index on the column is used.
    pub fn index_for_field(&self, field: &str) -> Option<&IndexSchema> {
        self.indexes
            .iter()
            .find(|i| i.name == field && i.column == field)
            .or_else(|| self.indexes.iter().find(|i| i.column == field))
    }

    fn validate(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::configuration("table name must not be empty"));
        }
        if self.key_path.is_empty() {
            return Err(DbError::configuration(format!(
                "table '{}' must declare a key path",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for index in &self.indexes {
            if index.name.is_empty() || index.column.is_empty() {
                return Err(DbError::configuration(format!(
                    "table '{}' declares an index without name or column",
                    self.name
                )));
            }
            if !seen.insert(index.name.as_str()) {
                return Err(DbError::configuration(format!(
                    "table '{}' declares index '{}' twice",
                    self.name, index.name
                )));
            }
        }
        Ok(())
    }
}

/// The full set of tables of one database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Database name
    pub name: String,
    /// Schema version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Tables keyed by name
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

fn default_version() -> u32 {
    1
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            tables: BTreeMap::new(),
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Adds a table, replacing any previous table of the same name
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Parses a schema from JSON and validates it
    pub fn from_json_str(json: &str) -> DbResult<Self> {
        let schema: Self = serde_json::from_str(json)
            .map_err(|e| DbError::configuration(format!("invalid schema: {}", e)))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Looks up a table
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// All table names in ascending order
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Checks names, key paths and index declarations
    pub fn validate(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::configuration("database name must not be empty"));
        }
        for (name, table) in &self.tables {
            if name != &table.name {
                return Err(DbError::configuration(format!(
                    "table registered as '{}' is named '{}'",
                    name, table.name
                )));
            }
            table.validate()?;
        }
        Ok(())
    }
}
