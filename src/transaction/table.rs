//! Table handle bound to one transaction

use serde_json::Value;

use crate::engine::{Cursor, EngineError, KeyRange, KeyValue, ScanTarget};
use crate::error::{DbError, DbResult};
use crate::schema::TableSchema;

use super::transaction::Transaction;

/// Access to one table inside a transaction
///
/// Every engine failure is wrapped with the table name and the transaction
/// mode so callers can tell where it came from.
#[derive(Clone)]
pub struct TableHandle {
    transaction: Transaction,
    schema: TableSchema,
}

impl TableHandle {
    pub(crate) fn new(transaction: Transaction, schema: TableSchema) -> Self {
        Self {
            transaction,
            schema,
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Opens a cursor over `range` of the primary key or a named index
    pub async fn open_range_scan(
        &self,
        target: ScanTarget,
        range: KeyRange,
    ) -> DbResult<Box<dyn Cursor>> {
        let what = match &target {
            ScanTarget::PrimaryKey => "key range scan".to_string(),
            ScanTarget::Index(name) => format!("range scan of index '{}'", name),
        };
        self.transaction
            .native()
            .open_scan(self.name(), target, range)
            .await
            .map_err(|e| self.wrap(&what, e))
    }

    /// Opens a cursor over the whole table in primary-key order
    pub async fn open_full_scan(&self) -> DbResult<Box<dyn Cursor>> {
        self.transaction
            .native()
            .open_scan(self.name(), ScanTarget::PrimaryKey, KeyRange::unbounded())
            .await
            .map_err(|e| self.wrap("full scan", e))
    }

    /// Drains a scan into memory
    pub async fn collect(&self, target: ScanTarget, range: KeyRange) -> DbResult<Vec<Value>> {
        self.collect_where(target, range, |_| true).await
    }

    /// Drains a scan, keeping records accepted by `keep`
    pub async fn collect_where<F>(
        &self,
        target: ScanTarget,
        range: KeyRange,
        keep: F,
    ) -> DbResult<Vec<Value>>
    where
        F: Fn(&Value) -> bool + Send,
    {
        let mut cursor = self.open_range_scan(target, range).await?;
        let mut rows = Vec::new();
        while let Some(record) = cursor
            .next_record()
            .await
            .map_err(|e| self.wrap("cursor advance", e))?
        {
            if keep(&record) {
                rows.push(record);
            }
        }
        Ok(rows)
    }

    /// Point lookup by primary key
    pub async fn get(&self, key: &Value) -> DbResult<Option<Value>> {
        let key = self.key(key)?;
        self.transaction
            .native()
            .get(self.name(), key)
            .await
            .map_err(|e| self.wrap("get", e))
    }

    /// Inserts or replaces a record, returning its primary key
    pub async fn put(&self, record: Value) -> DbResult<Value> {
        self.transaction
            .native()
            .put(self.name(), record)
            .await
            .map_err(|e| self.wrap("put", e))
    }

    /// Inserts a new record, returning its primary key
    pub async fn add(&self, record: Value) -> DbResult<Value> {
        self.transaction
            .native()
            .add(self.name(), record)
            .await
            .map_err(|e| self.wrap("add", e))
    }

    pub async fn delete(&self, key: &Value) -> DbResult<()> {
        let key = self.key(key)?;
        self.transaction
            .native()
            .delete(self.name(), key)
            .await
            .map_err(|e| self.wrap("delete", e))
    }

    fn key(&self, key: &Value) -> DbResult<KeyValue> {
        KeyValue::try_from_json(key).map_err(|e| self.wrap("key conversion", e))
    }

    fn wrap(&self, what: &str, source: EngineError) -> DbError {
        DbError::storage(
            format!(
                "{} on '{}' ({} transaction)",
                what,
                self.name(),
                self.transaction.mode()
            ),
            source,
        )
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("table", &self.schema.name)
            .field("transaction", &self.transaction.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::{MemoryEngine, StorageEngine, TransactionMode};
    use crate::schema::{DatabaseSchema, IndexSchema};
    use serde_json::json;

    fn engine() -> Arc<dyn StorageEngine> {
        let schema = DatabaseSchema::new("test").with_table(
            TableSchema::new("user", "userId").with_index(IndexSchema::on("age")),
        );
        Arc::new(MemoryEngine::new(schema).unwrap())
    }

    #[tokio::test]
    async fn test_writes_and_scans_through_handle() {
        let tx = Transaction::open(engine(), vec!["user".into()], TransactionMode::ReadWrite)
            .unwrap();
        let users = tx.get_table("user").unwrap();
        for (id, age) in [(3, 40), (1, 20), (2, 30)] {
            users.put(json!({"userId": id, "age": age})).await.unwrap();
        }

        let all = users
            .collect(ScanTarget::PrimaryKey, KeyRange::unbounded())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(|r| r["userId"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

        let older = users
            .collect(
                ScanTarget::Index("age".into()),
                KeyRange::lower_bound(KeyValue::from_number(25.0).unwrap(), true),
            )
            .await
            .unwrap();
        assert_eq!(older.len(), 2);

        users.delete(&json!(2)).await.unwrap();
        assert_eq!(users.get(&json!(2)).await.unwrap(), None);
        assert!(users.get(&json!(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_readonly_write_error_names_table_and_mode() {
        let tx = Transaction::open(engine(), vec!["user".into()], TransactionMode::ReadOnly)
            .unwrap();
        let users = tx.get_table("user").unwrap();
        let err = users.put(json!({"userId": 1})).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'user'"));
        assert!(message.contains("readonly"));
    }

    #[tokio::test]
    async fn test_invalid_key_is_rejected() {
        let tx = Transaction::open(engine(), vec!["user".into()], TransactionMode::ReadOnly)
            .unwrap();
        let users = tx.get_table("user").unwrap();
        assert!(users.get(&json!(true)).await.is_err());
    }
}
