//! End-to-end tests through the client proxies.

use std::time::Duration;

use dbrelay_client::{ClientConfig, ClientError, ConnectionState, TransactionState};
use dbrelay_common::{IsolationLevel, Value};
use dbrelay_server::config::ServerConfig;
use dbrelay_test::{TestGateway, MEMORY_DB, SQLITE};

async fn gateway() -> TestGateway {
    TestGateway::start().await.expect("gateway should start")
}

/// Waits until the gateway has no open transactions.
async fn wait_for_no_transactions(gateway: &TestGateway) {
    for _ in 0..50 {
        if gateway.registry().stats().transactions == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("transactions still open: {:?}", gateway.registry().stats());
}

#[tokio::test]
async fn test_open_and_close() {
    let gateway = gateway().await;
    let client = gateway.client();

    let mut conn = gateway.open(&client).await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Open);
    assert!(conn.connection_id().is_some());
    assert!(conn.client_identifier().is_some_and(|id| id.starts_with("127.0.0.1")));
    assert_eq!(gateway.registry().len(), 1);

    conn.close().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(gateway.registry().is_empty());
    assert!(client.pool().is_empty());

    // A closed connection can be closed again.
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_open_twice_fails() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    assert!(matches!(
        conn.open().await,
        Err(ClientError::InvalidOperation(_))
    ));
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_provider() {
    let gateway = gateway().await;
    let client = gateway.client();

    let err = client
        .open(gateway.connection_string(), "oracle", MEMORY_DB)
        .await
        .unwrap_err();
    match err {
        ClientError::Remote(remote) => {
            assert_eq!(remote.class_name(), "InvalidOperation");
            assert!(remote.message().contains("oracle"));
            assert_eq!(remote.try_get::<String>("ProviderName").as_deref(), Some("oracle"));
        }
        other => panic!("expected a remote fault, got {:?}", other),
    }
    assert!(gateway.registry().is_empty());
    assert!(client.pool().is_empty());
}

#[tokio::test]
async fn test_invalid_server_connection_string() {
    let gateway = gateway().await;
    let client = gateway.client();

    let err = client
        .open(gateway.connection_string(), SQLITE, "Mode=ReadOnly")
        .await
        .unwrap_err();
    assert!(matches!(&err, ClientError::Remote(r) if r.class_name() == "Argument"));
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_commands_and_readers() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    let cmd = conn
        .command("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, photo BLOB)")
        .await
        .unwrap();
    cmd.execute_non_query().await.unwrap();

    let mut insert = conn
        .command("INSERT INTO users (id, name, photo) VALUES (@id, @name, @photo)")
        .await
        .unwrap();
    for (id, name) in [(1i64, "ada"), (2, "grace"), (3, "edsger")] {
        insert.parameters_mut().clear();
        insert
            .parameters_mut()
            .add_value("@id", id)
            .add_value("@name", name)
            .add_value("@photo", vec![id as u8; 4]);
        assert_eq!(insert.execute_non_query().await.unwrap(), 1);
    }

    let select = conn
        .command("SELECT id, name, photo FROM users ORDER BY id")
        .await
        .unwrap();
    let mut reader = select.execute_reader().await.unwrap();
    let mut names = Vec::new();
    while reader.read().await.unwrap() {
        assert_eq!(reader.field_count(), 3);
        assert_eq!(reader.data_type_name(0).unwrap(), "INTEGER");
        names.push(reader.get_by_name::<String>("name").unwrap().unwrap());

        let mut window = [0u8; 2];
        assert_eq!(reader.get_bytes(2, 2, &mut window, 0, 8).unwrap(), 2);
    }
    assert_eq!(names, ["ada", "grace", "edsger"]);

    let count = conn.command("SELECT COUNT(*) FROM users").await.unwrap();
    let scalar = count.execute_scalar().await.unwrap();
    assert_eq!(scalar.as_ref().and_then(Value::get::<i64>), Some(3));

    let empty = conn
        .command("SELECT name FROM users WHERE id = 99")
        .await
        .unwrap();
    assert!(empty.execute_scalar().await.unwrap().is_none());

    assert_eq!(gateway.registry().stats().commands, 4);
    select.destroy().await.unwrap();
    assert_eq!(gateway.registry().stats().commands, 3);

    conn.close().await.unwrap();
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_positional_and_null_parameters() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    conn.command("CREATE TABLE t (a INTEGER, b TEXT)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();

    let mut insert = conn.command("INSERT INTO t VALUES (?, ?)").await.unwrap();
    insert.parameters_mut().push(10i64).add_null("");
    // An empty-named NULL is positional as well.
    assert_eq!(insert.parameters().len(), 2);
    insert.execute_non_query().await.unwrap();

    let select = conn.command("SELECT a, b FROM t").await.unwrap();
    let mut reader = select.execute_reader().await.unwrap();
    assert!(reader.read().await.unwrap());
    assert_eq!(reader.get::<i64>(0).unwrap(), Some(10));
    assert!(reader.is_null(1).unwrap());
    assert_eq!(reader.data_type_name(1).unwrap(), "NULL");
    assert!(!reader.read().await.unwrap());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_commit() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    conn.command("CREATE TABLE t (id INTEGER)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();

    let txn = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();
    assert_eq!(gateway.registry().stats().transactions, 1);

    let mut insert = conn.command("INSERT INTO t VALUES (1)").await.unwrap();
    insert.set_transaction(Some(&txn));
    assert_eq!(insert.transaction_id(), Some(txn.id()));
    insert.execute_non_query().await.unwrap();

    txn.commit().await.unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(gateway.registry().stats().transactions, 0);

    assert!(matches!(
        txn.commit().await,
        Err(ClientError::TransactionFinished)
    ));
    assert!(matches!(
        txn.rollback().await,
        Err(ClientError::TransactionFinished)
    ));
    // Commands enlisted in a finished transaction refuse to run.
    assert!(matches!(
        insert.execute_non_query().await,
        Err(ClientError::TransactionFinished)
    ));

    let count = conn.command("SELECT COUNT(*) FROM t").await.unwrap();
    let value = count.execute_scalar().await.unwrap();
    assert_eq!(value.as_ref().and_then(Value::get::<i64>), Some(1));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_transaction_rollback_and_drop() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    conn.command("CREATE TABLE t (id INTEGER)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();
    let mut insert = conn.command("INSERT INTO t VALUES (1)").await.unwrap();
    let count = conn.command("SELECT COUNT(*) FROM t").await.unwrap();

    let txn = conn
        .begin_transaction(IsolationLevel::Serializable)
        .await
        .unwrap();
    insert.set_transaction(Some(&txn));
    insert.execute_non_query().await.unwrap();
    txn.rollback().await.unwrap();
    assert_eq!(txn.state(), TransactionState::RolledBack);

    let value = count.execute_scalar().await.unwrap();
    assert_eq!(value.as_ref().and_then(Value::get::<i64>), Some(0));

    {
        let txn = conn
            .begin_transaction(IsolationLevel::ReadCommitted)
            .await
            .unwrap();
        insert.set_transaction(Some(&txn));
        insert.execute_non_query().await.unwrap();
    }
    insert.set_transaction(None);
    wait_for_no_transactions(&gateway).await;

    let value = count.execute_scalar().await.unwrap();
    assert_eq!(value.as_ref().and_then(Value::get::<i64>), Some(0));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_native_fault_carries_properties() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    let cmd = conn.command("INSERT INTO missing VALUES (1)").await.unwrap();
    let err = cmd.execute_non_query().await.unwrap_err();
    let ClientError::Remote(remote) = err else {
        panic!("expected a remote fault, got {:?}", err);
    };

    assert_eq!(remote.class_name(), "SqliteError");
    assert!(remote.message().contains("missing"));
    assert_eq!(remote.property_name(0), Some("ErrorCode"));
    assert_eq!(remote.try_get::<i32>("ErrorCode"), Some(1));
    assert!(remote.property_index("ExtendedCode").is_some());

    // The session survives the fault.
    let ok = conn.command("SELECT 1").await.unwrap();
    assert!(ok.execute_scalar().await.unwrap().is_some());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_fault_on_execute_reader() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    let cmd = conn.command("SELECT * FROM missing").await.unwrap();
    let err = cmd.execute_reader().await.unwrap_err();
    assert!(matches!(&err, ClientError::Remote(r) if r.class_name() == "SqliteError"));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_and_buffered_results_match() {
    let gateway = gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let db = format!("Data Source={}", dir.path().join("rows.db").display());

    let streaming = gateway.client();
    let buffered = gateway.client_with(ClientConfig::default().buffered(true));

    let mut writer = streaming
        .open(gateway.connection_string(), SQLITE, db.clone())
        .await
        .unwrap();
    writer
        .command("CREATE TABLE t (id INTEGER, label TEXT, score REAL, raw BLOB)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();
    let mut insert = writer
        .command("INSERT INTO t VALUES (@id, @label, @score, @raw)")
        .await
        .unwrap();
    for i in 0..25i64 {
        insert.parameters_mut().clear();
        insert
            .parameters_mut()
            .add_value("@id", i)
            .add_value("@label", format!("row-{}", i))
            .add_value("@score", i as f64 / 4.0);
        if i % 3 == 0 {
            insert.parameters_mut().add_null("@raw");
        } else {
            insert.parameters_mut().add_value("@raw", vec![i as u8, 0xff]);
        }
        insert.execute_non_query().await.unwrap();
    }

    let mut reader_conn = buffered
        .open(gateway.connection_string(), SQLITE, db)
        .await
        .unwrap();

    let query = "SELECT id, label, score, raw FROM t WHERE id >= @min ORDER BY id";
    let mut a = writer.command(query).await.unwrap();
    a.parameters_mut().add_value("@min", 5i64);
    let mut b = reader_conn.command(query).await.unwrap();
    b.parameters_mut().add_value("@min", 5i64);

    let mut left = a.execute_reader().await.unwrap();
    let mut right = b.execute_reader().await.unwrap();
    let mut rows = 0;
    loop {
        let more = left.read().await.unwrap();
        assert_eq!(more, right.read().await.unwrap());
        if !more {
            break;
        }
        rows += 1;
        for i in 0..4 {
            assert_eq!(left.name(i).unwrap(), right.name(i).unwrap());
            assert_eq!(left.data_type_name(i).unwrap(), right.data_type_name(i).unwrap());
            assert_eq!(left.is_null(i).unwrap(), right.is_null(i).unwrap());
        }
        assert_eq!(left.get::<i64>(0).unwrap(), right.get::<i64>(0).unwrap());
        assert_eq!(left.get_string(1).unwrap(), right.get_string(1).unwrap());
        assert_eq!(left.get::<f64>(2).unwrap(), right.get::<f64>(2).unwrap());
        assert_eq!(left.get::<Vec<u8>>(3).unwrap(), right.get::<Vec<u8>>(3).unwrap());
    }
    assert_eq!(rows, 20);

    writer.close().await.unwrap();
    reader_conn.close().await.unwrap();
}

const COUNT_TO_5000: &str =
    "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5000) SELECT x FROM n";

#[tokio::test]
async fn test_open_reader_does_not_block_other_commands() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();
    conn.command("CREATE TABLE t (id INTEGER)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();

    let numbers = conn.command(COUNT_TO_5000).await.unwrap();
    let mut reader = numbers.execute_reader().await.unwrap();
    assert!(reader.read().await.unwrap());
    assert_eq!(reader.get::<i64>(0).unwrap(), Some(1));

    let others = async {
        let select = conn.command("SELECT 1").await.unwrap();
        assert_eq!(select.execute_non_query().await.unwrap(), -1);

        let txn = conn.begin_transaction(IsolationLevel::ReadCommitted).await.unwrap();
        let mut insert = conn.command("INSERT INTO t VALUES (1)").await.unwrap();
        insert.set_transaction(Some(&txn));
        assert_eq!(insert.execute_non_query().await.unwrap(), 1);
        txn.commit().await.unwrap();
    };
    tokio::time::timeout(Duration::from_secs(5), others)
        .await
        .expect("other commands blocked by an open reader");

    let mut rows = 1;
    while reader.read().await.unwrap() {
        rows += 1;
    }
    assert_eq!(rows, 5000);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_dropped_reader_releases_command() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    let numbers = conn.command(COUNT_TO_5000).await.unwrap();
    let mut reader = numbers.execute_reader().await.unwrap();
    assert!(reader.read().await.unwrap());
    drop(reader);

    // The gateway holds the command until its stream stops producing rows,
    // so a second execution only starts once the first one was cancelled.
    let mut reader = tokio::time::timeout(Duration::from_secs(5), numbers.execute_reader())
        .await
        .expect("command still held by the cancelled stream")
        .unwrap();
    assert!(reader.read().await.unwrap());
    assert_eq!(reader.get::<i64>(0).unwrap(), Some(1));
    reader.close();

    let scalar = numbers.execute_scalar().await.unwrap();
    assert_eq!(scalar.as_ref().and_then(Value::get::<i64>), Some(1));

    conn.close().await.unwrap();
    assert!(gateway.registry().is_empty());
}

#[tokio::test]
async fn test_statement_batches() {
    let gateway = gateway().await;
    let client = gateway.client();
    let mut conn = gateway.open(&client).await.unwrap();

    let ddl = conn
        .command("CREATE TABLE a (x INTEGER); CREATE TABLE b (y INTEGER)")
        .await
        .unwrap();
    ddl.execute_non_query().await.unwrap();

    let tables = conn
        .command("SELECT count(*) FROM sqlite_master WHERE type = 'table'")
        .await
        .unwrap();
    let count = tables.execute_scalar().await.unwrap();
    assert_eq!(count.as_ref().and_then(Value::get::<i64>), Some(2));

    let mut fill = conn
        .command("INSERT INTO a VALUES (@v); INSERT INTO b VALUES (@v)")
        .await
        .unwrap();
    fill.parameters_mut().add_value("@v", 7i64);
    assert_eq!(fill.execute_non_query().await.unwrap(), 2);

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_connections_share_a_channel() {
    let gateway = gateway().await;
    let client = gateway.client();
    let address = gateway.addr().to_string();

    let mut first = gateway.open(&client).await.unwrap();
    let mut second = gateway.open(&client).await.unwrap();
    assert_ne!(first.connection_id(), second.connection_id());
    assert_eq!(client.pool().len(), 1);
    assert_eq!(client.pool().ref_count(&address), 2);

    first.close().await.unwrap();
    assert_eq!(client.pool().ref_count(&address), 1);

    // The channel stays usable for the remaining connection.
    let cmd = second.command("SELECT 42").await.unwrap();
    let value = cmd.execute_scalar().await.unwrap();
    assert_eq!(value.as_ref().and_then(Value::get::<i64>), Some(42));

    second.close().await.unwrap();
    assert!(client.pool().is_empty());
}

#[tokio::test]
async fn test_dropped_connection_is_closed() {
    let gateway = gateway().await;
    let client = gateway.client();

    let conn = gateway.open(&client).await.unwrap();
    assert_eq!(gateway.registry().len(), 1);
    drop(conn);

    for _ in 0..50 {
        if gateway.registry().is_empty() && client.pool().is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("dropped connection was not closed");
}

#[tokio::test]
async fn test_remote_transaction_tagging() {
    let dir = tempfile::tempdir().unwrap();
    let db = format!("Data Source={}", dir.path().join("tags.db").display());
    let config = ServerConfig::builder()
        .remote_transaction_table("REMOTE_TRANSACTIONS")
        .build();
    let gateway = TestGateway::start_with(config).await.unwrap();
    let client = gateway.client();

    let mut conn = client
        .open(
            format!("{};ClientIdentifier=worker-7", gateway.connection_string()),
            SQLITE,
            db,
        )
        .await
        .unwrap();
    assert_eq!(conn.client_identifier(), Some("worker-7"));

    conn.command("CREATE TABLE REMOTE_TRANSACTIONS (REMOTE_ID TEXT)")
        .await
        .unwrap()
        .execute_non_query()
        .await
        .unwrap();

    let txn = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();
    txn.commit().await.unwrap();

    let cmd = conn
        .command("SELECT REMOTE_ID FROM REMOTE_TRANSACTIONS")
        .await
        .unwrap();
    let value = cmd.execute_scalar().await.unwrap();
    assert_eq!(value.as_ref().and_then(Value::get::<String>).as_deref(), Some("worker-7"));

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let gateway = gateway().await;
    let client = gateway.client();
    let registry = gateway.registry().clone();

    let conn = gateway.open(&client).await.unwrap();
    let _txn = conn
        .begin_transaction(IsolationLevel::ReadCommitted)
        .await
        .unwrap();
    assert_eq!(registry.len(), 1);

    gateway.stop().await;
    assert!(registry.is_empty());
}
