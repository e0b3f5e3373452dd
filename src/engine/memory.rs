//! In-memory storage engine
//!
//! Tables are `BTreeMap`s keyed by `KeyValue`, so primary-key scans come back
//! in ascending key order. Secondary indexes map index keys to the sorted list
//! of primary keys holding them, which gives index scans ascending index-key
//! order with ties broken by primary key.
//!
//! Each native transaction works on a private copy of the tables in its
//! scope and journals every write. Commit replays the journal onto the
//! committed tables, so transactions writing different keys of one table
//! both persist; abort drops the copy.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future;
use serde_json::Value;

use crate::error::DbResult;
use crate::lock_unpoisoned as lock;
use crate::schema::{DatabaseSchema, TableSchema};

use super::errors::{EngineError, EngineResult};
use super::key::{KeyRange, KeyValue};
use super::{
    Cursor, EngineFuture, EventSink, NativeEvent, NativeTransaction, ScanTarget, StorageEngine,
    TransactionMode,
};

/// Largest key the auto-increment generator hands out
const MAX_GENERATED_KEY: i64 = 1 << 53;

fn index_key(record: &Value, column: &str) -> Option<KeyValue> {
    record.get(column).and_then(KeyValue::from_json)
}

/// Index key -> primary keys, both kept ascending
#[derive(Debug, Clone, Default)]
struct IndexTree {
    tree: BTreeMap<KeyValue, Vec<KeyValue>>,
}

impl IndexTree {
    fn insert(&mut self, key: KeyValue, primary: KeyValue) {
        let primaries = self.tree.entry(key).or_default();
        if let Err(pos) = primaries.binary_search(&primary) {
            primaries.insert(pos, primary);
        }
    }

    fn remove(&mut self, key: &KeyValue, primary: &KeyValue) {
        if let Some(primaries) = self.tree.get_mut(key) {
            if let Ok(pos) = primaries.binary_search(primary) {
                primaries.remove(pos);
            }
            if primaries.is_empty() {
                self.tree.remove(key);
            }
        }
    }

    fn lookup_eq(&self, key: &KeyValue) -> &[KeyValue] {
        self.tree.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn range(&self, range: &KeyRange) -> Vec<KeyValue> {
        self.tree
            .range(range.as_bounds())
            .flat_map(|(_, primaries)| primaries.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone)]
struct TableData {
    records: BTreeMap<KeyValue, Value>,
    indexes: HashMap<String, IndexTree>,
    next_key: i64,
}

impl TableData {
    fn new(schema: &TableSchema) -> Self {
        Self {
            records: BTreeMap::new(),
            indexes: schema
                .indexes
                .iter()
                .map(|i| (i.name.clone(), IndexTree::default()))
                .collect(),
            next_key: 1,
        }
    }

    fn scan(
        &self,
        schema: &TableSchema,
        target: &ScanTarget,
        range: &KeyRange,
    ) -> EngineResult<Vec<Value>> {
        if let ScanTarget::Index(name) = target {
            if schema.index(name).is_none() {
                return Err(EngineError::NotFound(format!(
                    "index '{}' on table '{}'",
                    name, schema.name
                )));
            }
        }
        if !range.is_satisfiable() {
            return Ok(Vec::new());
        }

        match target {
            ScanTarget::PrimaryKey => Ok(self
                .records
                .range(range.as_bounds())
                .map(|(_, record)| record.clone())
                .collect()),
            ScanTarget::Index(name) => {
                let primaries = self
                    .indexes
                    .get(name)
                    .map(|tree| tree.range(range))
                    .unwrap_or_default();
                Ok(primaries
                    .iter()
                    .filter_map(|pk| self.records.get(pk).cloned())
                    .collect())
            }
        }
    }

    /// Stores `record` and returns it as stored (with a generated key)
    fn write(
        &mut self,
        schema: &TableSchema,
        mut record: Value,
        overwrite: bool,
    ) -> EngineResult<Value> {
        let fields = record.as_object_mut().ok_or_else(|| {
            EngineError::Data(format!("records stored in '{}' must be objects", schema.name))
        })?;

        let key = match fields.get(&schema.key_path) {
            Some(value) => KeyValue::try_from_json(value)?,
            None if schema.auto_increment => {
                let generated = self.next_key;
                if generated > MAX_GENERATED_KEY {
                    return Err(EngineError::Constraint(format!(
                        "key generator of '{}' is exhausted",
                        schema.name
                    )));
                }
                fields.insert(schema.key_path.clone(), Value::from(generated));
                KeyValue::from_number(generated as f64).ok_or_else(|| {
                    EngineError::Internal("generated key is not a number".into())
                })?
            }
            None => {
                return Err(EngineError::Data(format!(
                    "record for '{}' has no key at '{}'",
                    schema.name, schema.key_path
                )))
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(EngineError::Constraint(format!(
                "key already exists in '{}'",
                schema.name
            )));
        }

        for index in schema.indexes.iter().filter(|i| i.unique) {
            let Some(ik) = index_key(&record, &index.column) else {
                continue;
            };
            let taken = self
                .indexes
                .get(&index.name)
                .map(|tree| tree.lookup_eq(&ik).iter().any(|pk| pk != &key))
                .unwrap_or(false);
            if taken {
                return Err(EngineError::Constraint(format!(
                    "unique index '{}' on '{}' already holds {}",
                    index.name,
                    schema.name,
                    record.get(&index.column).unwrap_or(&Value::Null)
                )));
            }
        }

        if let Some(old) = self.records.get(&key) {
            for index in &schema.indexes {
                if let (Some(ik), Some(tree)) = (
                    index_key(old, &index.column),
                    self.indexes.get_mut(&index.name),
                ) {
                    tree.remove(&ik, &key);
                }
            }
        }
        for index in &schema.indexes {
            if let (Some(ik), Some(tree)) = (
                index_key(&record, &index.column),
                self.indexes.get_mut(&index.name),
            ) {
                tree.insert(ik, key.clone());
            }
        }

        if schema.auto_increment {
            if let Some(n) = key.as_number() {
                self.advance_generator(n);
            }
        }

        self.records.insert(key, record.clone());
        Ok(record)
    }

    /// Explicit numeric keys push the generator past them
    fn advance_generator(&mut self, key: f64) {
        if key < self.next_key as f64 {
            return;
        }
        self.next_key = if key >= MAX_GENERATED_KEY as f64 {
            MAX_GENERATED_KEY + 1
        } else {
            key.floor() as i64 + 1
        };
    }

    fn remove(&mut self, schema: &TableSchema, key: &KeyValue) {
        if let Some(old) = self.records.remove(key) {
            for index in &schema.indexes {
                if let (Some(ik), Some(tree)) = (
                    index_key(&old, &index.column),
                    self.indexes.get_mut(&index.name),
                ) {
                    tree.remove(&ik, key);
                }
            }
        }
    }
}

/// In-process ordered key-value store
pub struct MemoryEngine {
    schema: Arc<DatabaseSchema>,
    tables: Arc<Mutex<HashMap<String, TableData>>>,
    opened: AtomicUsize,
}

impl MemoryEngine {
    /// Creates an empty store for `schema`
    pub fn new(schema: DatabaseSchema) -> DbResult<Self> {
        schema.validate()?;
        let tables = schema
            .tables
            .values()
            .map(|t| (t.name.clone(), TableData::new(t)))
            .collect();
        Ok(Self {
            schema: Arc::new(schema),
            tables: Arc::new(Mutex::new(tables)),
            opened: AtomicUsize::new(0),
        })
    }

    /// Number of native transactions opened so far
    pub fn native_transactions_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of committed records in `table`
    pub fn committed_len(&self, table: &str) -> usize {
        lock(&self.tables)
            .get(table)
            .map(|t| t.records.len())
            .unwrap_or(0)
    }
}

impl StorageEngine for MemoryEngine {
    fn schema(&self) -> &DatabaseSchema {
        &self.schema
    }

    fn begin_native_transaction(
        &self,
        tables: &[String],
        mode: TransactionMode,
    ) -> EngineResult<Box<dyn NativeTransaction>> {
        let scope = if mode == TransactionMode::SchemaChange {
            self.schema.table_names()
        } else {
            if tables.is_empty() {
                return Err(EngineError::Data(
                    "transaction scope must name at least one table".into(),
                ));
            }
            if let Some(missing) = tables.iter().find(|t| self.schema.table(t).is_none()) {
                return Err(EngineError::NotFound(format!("table '{}'", missing)));
            }
            tables.to_vec()
        };

        let working = {
            let committed = lock(&self.tables);
            scope
                .iter()
                .filter_map(|name| committed.get(name).map(|d| (name.clone(), d.clone())))
                .collect()
        };
        self.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryTransaction {
            mode,
            schema: Arc::clone(&self.schema),
            committed: Arc::clone(&self.tables),
            state: Mutex::new(TxState {
                working,
                journal: Vec::new(),
                finished: false,
                sink: None,
                pending: None,
            }),
        }))
    }
}

/// One successful write, replayed onto the committed tables at commit
#[derive(Debug)]
enum JournalEntry {
    Put {
        table: String,
        record: Value,
        overwrite: bool,
    },
    Delete {
        table: String,
        key: KeyValue,
    },
}

impl JournalEntry {
    fn table(&self) -> &str {
        match self {
            JournalEntry::Put { table, .. } | JournalEntry::Delete { table, .. } => table,
        }
    }
}

struct TxState {
    working: HashMap<String, TableData>,
    journal: Vec<JournalEntry>,
    finished: bool,
    sink: Option<EventSink>,
    pending: Option<NativeEvent>,
}

struct MemoryTransaction {
    mode: TransactionMode,
    schema: Arc<DatabaseSchema>,
    committed: Arc<Mutex<HashMap<String, TableData>>>,
    state: Mutex<TxState>,
}

impl MemoryTransaction {
    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&TableSchema, &mut TableData) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let schema = self
            .schema
            .table(table)
            .ok_or_else(|| EngineError::NotFound(format!("table '{}'", table)))?;
        let mut state = lock(&self.state);
        if state.finished {
            return Err(EngineError::TransactionInactive);
        }
        let data = state.working.get_mut(table).ok_or_else(|| {
            EngineError::NotFound(format!(
                "table '{}' is outside the transaction scope",
                table
            ))
        })?;
        f(schema, data)
    }

    fn write(&self, table: &str, record: Value, overwrite: bool) -> EngineResult<Value> {
        if !self.mode.is_writable() {
            return Err(EngineError::ReadOnly(table.to_string()));
        }
        let written = self.with_table(table, |schema, data| {
            let stored = data.write(schema, record, overwrite)?;
            let key = stored.get(&schema.key_path).cloned().unwrap_or(Value::Null);
            Ok((key, stored))
        });
        match written {
            Ok((key, stored)) => {
                lock(&self.state).journal.push(JournalEntry::Put {
                    table: table.to_string(),
                    record: stored,
                    overwrite,
                });
                Ok(key)
            }
            Err(err @ EngineError::Constraint(_)) => {
                self.finish(NativeEvent::Error(err.clone()));
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Applies `journal` to copies of the committed tables and swaps them in.
    ///
    /// Nothing is written when an entry fails.
    fn replay(&self, journal: Vec<JournalEntry>) -> EngineResult<()> {
        let mut committed = lock(&self.committed);
        let mut staged: HashMap<String, TableData> = HashMap::new();
        for entry in journal {
            let schema = self
                .schema
                .table(entry.table())
                .ok_or_else(|| EngineError::NotFound(format!("table '{}'", entry.table())))?;
            let data = match staged.entry(entry.table().to_string()) {
                Entry::Occupied(slot) => slot.into_mut(),
                Entry::Vacant(slot) => slot.insert(
                    committed
                        .get(&schema.name)
                        .cloned()
                        .unwrap_or_else(|| TableData::new(schema)),
                ),
            };
            match entry {
                JournalEntry::Put {
                    record, overwrite, ..
                } => {
                    data.write(schema, record, overwrite)?;
                }
                JournalEntry::Delete { key, .. } => data.remove(schema, &key),
            }
        }
        committed.extend(staged);
        Ok(())
    }

    /// Moves the transaction to its terminal state and delivers the event.
    ///
    /// Only the first call has any effect. A commit whose journal conflicts
    /// with the committed tables turns into an error event.
    fn finish(&self, event: NativeEvent) {
        let (sink, event) = {
            let mut state = lock(&self.state);
            if state.finished {
                return;
            }
            state.finished = true;

            let journal = std::mem::take(&mut state.journal);
            let event = if event == NativeEvent::Complete && self.mode.is_writable() {
                match self.replay(journal) {
                    Ok(()) => event,
                    Err(err) => NativeEvent::Error(err),
                }
            } else {
                event
            };
            state.working.clear();

            match state.sink.take() {
                Some(sink) => (sink, event),
                None => {
                    state.pending = Some(event);
                    return;
                }
            }
        };
        sink(event);
    }
}

impl NativeTransaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn open_scan(
        &self,
        table: &str,
        target: ScanTarget,
        range: KeyRange,
    ) -> EngineFuture<'_, Box<dyn Cursor>> {
        let result = self
            .with_table(table, |schema, data| data.scan(schema, &target, &range))
            .map(|rows| Box::new(MemoryCursor { rows: rows.into() }) as Box<dyn Cursor>);
        Box::pin(future::ready(result))
    }

    fn get(&self, table: &str, key: KeyValue) -> EngineFuture<'_, Option<Value>> {
        let result = self.with_table(table, |_, data| Ok(data.records.get(&key).cloned()));
        Box::pin(future::ready(result))
    }

    fn put(&self, table: &str, record: Value) -> EngineFuture<'_, Value> {
        Box::pin(future::ready(self.write(table, record, true)))
    }

    fn add(&self, table: &str, record: Value) -> EngineFuture<'_, Value> {
        Box::pin(future::ready(self.write(table, record, false)))
    }

    fn delete(&self, table: &str, key: KeyValue) -> EngineFuture<'_, ()> {
        let result = if self.mode.is_writable() {
            self.with_table(table, |schema, data| {
                data.remove(schema, &key);
                Ok(())
            })
            .map(|()| {
                lock(&self.state).journal.push(JournalEntry::Delete {
                    table: table.to_string(),
                    key,
                });
            })
        } else {
            Err(EngineError::ReadOnly(table.to_string()))
        };
        Box::pin(future::ready(result))
    }

    fn commit(&self) {
        self.finish(NativeEvent::Complete);
    }

    fn abort(&self) {
        self.finish(NativeEvent::Abort);
    }

    fn on_event(&self, sink: EventSink) {
        let pending = {
            let mut state = lock(&self.state);
            match state.pending.take() {
                Some(event) => Some((sink, event)),
                None => {
                    state.sink = Some(sink);
                    None
                }
            }
        };
        if let Some((sink, event)) = pending {
            sink(event);
        }
    }
}

struct MemoryCursor {
    rows: VecDeque<Value>,
}

impl Cursor for MemoryCursor {
    fn next_record(&mut self) -> EngineFuture<'_, Option<Value>> {
        Box::pin(future::ready(Ok(self.rows.pop_front())))
    }
}
