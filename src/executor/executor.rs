//! Query engine
//!
//! Resolves declarative queries inside a transaction obtained from the
//! connection. When the connection already has an active transaction that
//! can serve the request it is reused and left open; otherwise the engine
//! opens one, commits it once the work succeeded (rolls it back when the
//! work failed) and returns after the terminal event.

use std::future::Future;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::connection::{settle, Connection, TransactionRequest};
use crate::error::{DbError, DbResult};
use crate::observability::Logger;
use crate::planner::{Filter, Query, QueryPlanner, ResolutionPlan};
use crate::transaction::{Transaction, TransactionMode};

use super::combinator::{Combinator, JoinOptions};
use super::filters::PredicateFilter;
use super::result::{QueryResult, ResultSet};
use super::updater::Updater;

/// Completion callback of `QueryEngine::submit`
pub type QueryCallback = Box<dyn FnOnce(DbResult<QueryResult>) + Send + 'static>;

/// Declarative reads and writes over one connection
#[derive(Clone, Debug)]
pub struct QueryEngine {
    connection: Connection,
}

impl QueryEngine {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Resolves `query`, joining its target when the query is compound
    pub async fn run(&self, query: &Query) -> DbResult<QueryResult> {
        self.within(TransactionMode::ReadOnly, query.tables(), |tx| async move {
            Self::resolve_query(&tx, query).await
        })
        .await
    }

    /// Rows of `table` matching `filter` (every row when `None`)
    pub async fn find(&self, table: &str, filter: Option<Filter>) -> DbResult<QueryResult> {
        self.run(&Query::new(table).filter(filter.unwrap_or_default()))
            .await
    }

    /// First row of `table` matching `filter`
    pub async fn find_one(&self, table: &str, filter: Option<Filter>) -> DbResult<Option<Value>> {
        let result = self.find(table, filter).await?;
        Ok(result.into_rows().into_iter().next())
    }

    pub async fn find_all(&self, table: &str) -> DbResult<QueryResult> {
        self.find(table, None).await
    }

    /// Every row of `table`, each with the `target` rows matching on
    /// `column` (or `target_column` in the target table)
    pub async fn join(
        &self,
        table: &str,
        target: &str,
        column: &str,
        target_column: Option<&str>,
    ) -> DbResult<QueryResult> {
        self.run(&Query::new(table).join(target, column, target_column))
            .await
    }

    /// Runs `query` on the current runtime and hands the result to
    /// `callback`.
    pub fn submit(
        &self,
        query: Query,
        callback: Option<QueryCallback>,
    ) -> DbResult<JoinHandle<()>> {
        let callback = callback.ok_or(DbError::CallbackRequired)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DbError::UnsupportedOperation(format!("submit outside an async runtime: {}", e))
        })?;
        let engine = self.clone();
        Ok(runtime.spawn(async move {
            let result = engine.run(&query).await;
            callback(result);
        }))
    }

    /// Adds `records` to `table`, returning their primary keys
    pub async fn insert(&self, table: &str, records: Vec<Value>) -> DbResult<Vec<Value>> {
        self.within(TransactionMode::ReadWrite, vec![table.to_string()], |tx| async move {
            let handle = tx.get_table(table)?;
            let mut keys = Vec::with_capacity(records.len());
            for record in records {
                keys.push(handle.add(record).await?);
            }
            Ok(keys)
        })
        .await
    }

    /// Applies `update` to every row matched by `query` and writes the rows
    /// back. Returns the number of rows written.
    pub async fn update(&self, query: &Query, update: &Value) -> DbResult<usize> {
        Self::reject_compound(query, "update")?;
        self.within(TransactionMode::ReadWrite, query.tables(), |tx| async move {
            let (mut rows, _) = Self::resolve(&tx, &query.table, &query.filter).await?;
            Updater::apply(&mut rows, update)?;
            let handle = tx.get_table(&query.table)?;
            let written = rows.len();
            for row in rows {
                handle.put(row).await?;
            }
            Ok(written)
        })
        .await
    }

    /// Deletes every row matched by `query`. Returns the number of rows.
    pub async fn remove(&self, query: &Query) -> DbResult<usize> {
        Self::reject_compound(query, "remove")?;
        self.within(TransactionMode::ReadWrite, query.tables(), |tx| async move {
            let (rows, _) = Self::resolve(&tx, &query.table, &query.filter).await?;
            let handle = tx.get_table(&query.table)?;
            let key_path = handle.schema().key_path.clone();
            let mut removed = 0;
            for key in rows.iter().filter_map(|row| row.get(&key_path)) {
                handle.delete(key).await?;
                removed += 1;
            }
            Ok(removed)
        })
        .await
    }

    pub async fn count(&self, query: &Query) -> DbResult<usize> {
        Ok(self.run(query).await?.len())
    }

    fn reject_compound(query: &Query, operation: &str) -> DbResult<()> {
        if query.is_compound() {
            return Err(DbError::UnsupportedOperation(format!(
                "{} of a joined query",
                operation
            )));
        }
        Ok(())
    }

    /// Runs `work` in the current transaction when it can serve `mode` and
    /// `tables`, otherwise in a transaction of its own.
    async fn within<T, F, Fut>(
        &self,
        mode: TransactionMode,
        tables: Vec<String>,
        work: F,
    ) -> DbResult<T>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let previous = self.connection.current_transaction().map(|tx| tx.id());
        let tx = self
            .connection
            .begin_transaction(TransactionRequest::new(mode).with_tables(tables))?;
        let owned = previous != Some(tx.id());

        let outcome = work(tx.clone()).await;
        if owned {
            settle(&tx, outcome).await
        } else {
            outcome
        }
    }

    async fn resolve_query(tx: &Transaction, query: &Query) -> DbResult<QueryResult> {
        let (rows, plan) = Self::resolve(tx, &query.table, &query.filter).await?;
        let rows = match &query.join {
            Some(join) => {
                let (targets, _) = Self::resolve(tx, &join.target, &query.filter).await?;
                Combinator::join(
                    rows,
                    &targets,
                    &join.source_column,
                    &join.target_column,
                    &JoinOptions::new(join.array_agg.as_str()),
                )
            }
            None => rows,
        };
        Ok(QueryResult::resolved(rows, &plan))
    }

    /// Rows of `table` matching `filter`, with the plan that produced them
    async fn resolve(
        tx: &Transaction,
        table: &str,
        filter: &Filter,
    ) -> DbResult<(Vec<Value>, ResolutionPlan)> {
        let handle = tx.get_table(table)?;
        let plan = QueryPlanner::new(handle.schema()).plan(filter);
        Logger::trace(
            "QUERY_PLAN",
            &[
                ("filter", &filter.to_string()),
                ("strategy", &plan.describe()),
                ("table", table),
            ],
        );

        let (target, range) = plan.scan();
        let rows = if plan.filters_rows() {
            handle
                .collect_where(target, range, |record| PredicateFilter::check(record, filter))
                .await
        } else {
            handle.collect(target, range).await
        };
        let rows = rows.map_err(|e| {
            let e = e.within(format!("filter {}", filter));
            Logger::error("QUERY_FAILED", &[("error", &e.to_string()), ("table", table)]);
            e
        })?;
        Ok((rows, plan))
    }
}
