//! Transaction Coordination Tests
//!
//! One active transaction per connection:
//! - Compatible requests reuse the active transaction
//! - Weaker or wider requests are refused
//! - Terminal events fire handlers once, in order, then free the connection
//! - Queries issued inside an explicit transaction join it

use std::sync::{Arc, Mutex};

use aeroquery::transaction::{TransactionEvent, TransactionHandlers};
use aeroquery::{
    Connection, ConnectionConfig, DatabaseSchema, DbError, DriverRegistry, Filter, MemoryDriver,
    MemoryEngine, QueryEngine, TableSchema, TransactionEventKind, TransactionMode,
    TransactionRequest, TransactionState,
};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup() -> (Connection, Arc<MemoryEngine>) {
    let schema = DatabaseSchema::new("app")
        .with_table(TableSchema::new("user", "userId"))
        .with_table(TableSchema::new("session", "sessionId"));
    let store = Arc::new(MemoryEngine::new(schema).unwrap());
    let connection = Connection::open(store.clone(), ConnectionConfig::new("app")).unwrap();
    (connection, store)
}

type EventLog = Arc<Mutex<Vec<String>>>;

fn recorder(
    log: &EventLog,
    tag: &'static str,
) -> impl FnOnce(&TransactionEvent) + Send + 'static {
    let log = Arc::clone(log);
    move |event: &TransactionEvent| {
        log.lock().unwrap().push(format!("{}:{}", tag, event.kind()))
    }
}

// =============================================================================
// Reuse Tests
// =============================================================================

/// A second readwrite begin over the same tables returns the same transaction.
#[test]
fn test_second_begin_reuses_active_transaction() {
    let (connection, store) = setup();
    let first = connection
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user", "session"]))
        .unwrap();
    let second = connection
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user"]))
        .unwrap();
    let third = connection
        .begin_transaction(TransactionRequest::readwrite())
        .unwrap();

    assert_eq!(first.id(), second.id());
    assert_eq!(first.id(), third.id());
    assert_eq!(store.native_transactions_opened(), 1);
}

#[test]
fn test_schema_change_serves_every_request() {
    let (connection, store) = setup();
    let tx = connection
        .begin_transaction(TransactionRequest::schema_change())
        .unwrap();
    let reused = connection
        .begin_transaction(TransactionRequest::readwrite().with_tables(["session"]))
        .unwrap();
    assert_eq!(tx.id(), reused.id());
    assert!(tx.get_table("session").is_ok());
    assert_eq!(store.native_transactions_opened(), 1);
}

#[test]
fn test_readonly_cannot_be_promoted() {
    let (connection, _) = setup();
    let _tx = connection
        .begin_transaction(TransactionRequest::readonly())
        .unwrap();
    for request in [TransactionRequest::readwrite(), TransactionRequest::schema_change()] {
        let err = connection.begin_transaction(request).unwrap_err();
        assert!(matches!(err, DbError::ModeConflict { .. }));
    }
}

#[test]
fn test_request_outside_active_scope_refused() {
    let (connection, _) = setup();
    let _tx = connection
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user"]))
        .unwrap();
    let err = connection
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user", "session"]))
        .unwrap_err();
    assert_eq!(err.code(), "AERO_TABLE_NOT_IN_TRANSACTION");
}

#[test]
fn test_get_table_outside_whitelist() {
    let (connection, _) = setup();
    let tx = connection
        .begin_transaction(TransactionRequest::readonly().with_tables(["user"]))
        .unwrap();
    let err = tx.get_table("session").unwrap_err();
    assert!(matches!(
        err,
        DbError::TableNotAccessible { ref table, mode: TransactionMode::ReadOnly } if table == "session"
    ));
}

// =============================================================================
// Terminal Event Tests
// =============================================================================

#[test]
fn test_handlers_fire_once_in_registration_order() {
    let (connection, _) = setup();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let tx = connection
        .begin_transaction(
            TransactionRequest::readwrite()
                .on_complete(recorder(&log, "first"))
                .on_abort(recorder(&log, "never")),
        )
        .unwrap();
    let _second = tx.on_complete(recorder(&log, "second"));
    connection
        .begin_transaction(
            TransactionRequest::readonly()
                .with_handlers(TransactionHandlers::new().on_complete(recorder(&log, "third"))),
        )
        .unwrap();

    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    assert!(tx.commit().is_err());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:complete", "second:complete", "third:complete"]
    );
}

#[test]
fn test_terminal_event_frees_the_connection() {
    let (connection, store) = setup();
    for finish in ["commit", "rollback"] {
        let tx = connection
            .begin_transaction(TransactionRequest::readwrite())
            .unwrap();
        assert!(connection.has_transaction(Some(TransactionMode::ReadWrite)));
        match finish {
            "commit" => tx.commit().unwrap(),
            _ => tx.rollback().unwrap(),
        }
        assert!(tx.state().is_terminal());
        assert!(!connection.has_transaction(None));
        assert!(connection.current_transaction().is_none());
    }
    assert_eq!(store.native_transactions_opened(), 2);
}

#[tokio::test]
async fn test_constraint_violation_reaches_error_state() {
    let (connection, store) = setup();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let tx = connection
        .begin_transaction(
            TransactionRequest::readwrite()
                .with_tables(["user"])
                .on_error(recorder(&log, "error"))
                .on_complete(recorder(&log, "complete")),
        )
        .unwrap();
    let users = tx.get_table("user").unwrap();
    users.add(json!({"userId": 1})).await.unwrap();
    let err = users.add(json!({"userId": 1})).await.unwrap_err();
    assert_eq!(err.code(), "AERO_STORAGE_ENGINE");

    assert_eq!(tx.state(), TransactionState::Error);
    assert_eq!(*log.lock().unwrap(), vec!["error:error"]);
    assert!(!connection.has_transaction(None));
    assert_eq!(store.committed_len("user"), 0);
}

#[test]
fn test_cancelled_subscription_does_not_fire() {
    let (connection, _) = setup();
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let tx = connection
        .begin_transaction(TransactionRequest::readonly())
        .unwrap();
    let keep = tx.on(TransactionEventKind::Abort, recorder(&log, "kept"));
    let dropped = tx.on(TransactionEventKind::Abort, recorder(&log, "dropped"));
    assert!(dropped.cancel());
    assert!(keep.is_registered());

    tx.rollback().unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["kept:abort"]);
}

// =============================================================================
// run_transaction Tests
// =============================================================================

#[tokio::test]
async fn test_run_transaction_resolves_after_commit() {
    let (connection, store) = setup();
    connection
        .run_transaction(TransactionMode::ReadWrite, |tx| async move {
            tx.get_table("user")?.add(json!({"userId": 1})).await?;
            tx.get_table("session")?
                .add(json!({"sessionId": 7, "userId": 1}))
                .await?;
            Ok::<_, DbError>(())
        })
        .await
        .unwrap();
    assert_eq!(store.committed_len("user"), 1);
    assert_eq!(store.committed_len("session"), 1);
}

#[tokio::test]
async fn test_run_transaction_reports_abort() {
    let (connection, store) = setup();
    let err = connection
        .run_transaction(TransactionMode::ReadWrite, |tx| async move {
            tx.get_table("user")?.add(json!({"userId": 1})).await?;
            tx.rollback()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AERO_TRANSACTION_ABORTED");
    assert_eq!(store.committed_len("user"), 0);
}

#[tokio::test]
async fn test_nested_run_transaction_refused() {
    let (connection, _) = setup();
    let _tx = connection
        .begin_transaction(TransactionRequest::readwrite())
        .unwrap();
    let err = connection
        .run_transaction(TransactionMode::ReadWrite, |_| async { Ok::<_, DbError>(()) })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "AERO_NESTED_TRANSACTION");
}

// =============================================================================
// Query Engine Reuse Tests
// =============================================================================

/// Queries issued while a transaction is active join it and leave it open.
#[tokio::test]
async fn test_queries_join_explicit_transaction() {
    let (connection, store) = setup();
    let engine = QueryEngine::new(connection.clone());
    let tx = connection
        .begin_transaction(TransactionRequest::readwrite())
        .unwrap();

    engine
        .insert("user", vec![json!({"userId": 1}), json!({"userId": 2})])
        .await
        .unwrap();
    let seen = engine.find_all("user").await.unwrap();
    assert_eq!(seen.rows.len(), 2);
    assert!(tx.is_active());
    assert_eq!(store.committed_len("user"), 0);

    tx.commit().unwrap();
    assert_eq!(store.committed_len("user"), 2);
    assert_eq!(store.native_transactions_opened(), 1);

    let after = engine
        .find("user", Some(Filter::new().with("userId", json!(2))))
        .await
        .unwrap();
    assert!(after.by_key);
    assert_eq!(after.rows.len(), 1);
}

/// Two connections over one store each commit a row; both rows persist.
#[tokio::test]
async fn test_commits_from_two_connections_both_persist() {
    let (first, store) = setup();
    let second = Connection::open(store.clone(), ConnectionConfig::new("app")).unwrap();

    let ta = first
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user"]))
        .unwrap();
    let tb = second
        .begin_transaction(TransactionRequest::readwrite().with_tables(["user"]))
        .unwrap();
    ta.get_table("user").unwrap().add(json!({"userId": 1})).await.unwrap();
    tb.get_table("user").unwrap().add(json!({"userId": 2})).await.unwrap();
    ta.commit().unwrap();
    tb.commit().unwrap();

    assert_eq!(ta.state(), TransactionState::Committed);
    assert_eq!(tb.state(), TransactionState::Committed);
    assert_eq!(store.committed_len("user"), 2);
}

// =============================================================================
// Driver Tests
// =============================================================================

#[test]
fn test_registry_connects_named_database() {
    let driver = Arc::new(MemoryDriver::new());
    driver
        .register_database(DatabaseSchema::new("app").with_table(TableSchema::new("user", "userId")))
        .unwrap();
    let mut registry = DriverRegistry::new();
    registry.register(driver.clone());

    let config = ConnectionConfig::from_json_str(r#"{"database": "app", "version": 1}"#).unwrap();
    let connection = registry.connect(config).unwrap();
    let tx = connection
        .begin_transaction(TransactionRequest::readonly())
        .unwrap();
    assert!(tx.get_table("user").is_ok());
    assert_eq!(driver.engine("app").unwrap().native_transactions_opened(), 1);
}
