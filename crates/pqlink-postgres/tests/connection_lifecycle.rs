use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pqlink_postgres::{
    Error, ISOLATION_LEVEL_AUTOCOMMIT, ISOLATION_LEVEL_READ_COMMITTED,
    ISOLATION_LEVEL_REPEATABLE_READ, ISOLATION_LEVEL_SERIALIZABLE, MemoryServer, PgConfig,
    PgConnection, ServerError, SslMode, TransactionStatus, Value,
};
use pqlink_core::DatabaseErrorKind;

fn connect(server: &MemoryServer) -> Arc<PgConnection> {
    match PgConnection::connect(server, "host=localhost dbname=test") {
        Ok(conn) => conn,
        Err(e) => panic!("unexpected connect error: {e}"),
    }
}

fn operational_message(err: &Error) -> &str {
    match err {
        Error::Operational(e) => &e.message,
        other => panic!("expected operational error, got {other:?}"),
    }
}

// ==================== connect ====================

#[test]
fn connect_runs_setup_and_records_session_facts() {
    let server = MemoryServer::new()
        .with_protocol_version(3)
        .with_server_version(150_004);
    let conn = connect(&server);

    assert_eq!(
        server.statements(),
        vec![
            "SET DATESTYLE TO 'ISO'".to_string(),
            "SHOW client_encoding".to_string(),
        ]
    );
    assert_eq!(conn.encoding(), "UTF8");
    assert_eq!(conn.protocol_version(), 3);
    assert_eq!(conn.server_version(), 150_004);
    assert_eq!(conn.isolation_level(), ISOLATION_LEVEL_READ_COMMITTED);
    assert_eq!(conn.transaction_status(), TransactionStatus::Ready);
    assert!(conn.backend_pid() > 0);
    assert!(!conn.closed());
}

#[test]
fn connect_caches_server_encoding_and_protocol() {
    let server = MemoryServer::new()
        .with_encoding("LATIN1")
        .with_protocol_version(2);
    let conn = connect(&server);
    assert_eq!(conn.encoding(), "LATIN1");
    assert_eq!(conn.protocol_version(), 2);
}

#[test]
fn connect_with_config() {
    let server = MemoryServer::new();
    let config = PgConfig::new("db.internal", "app", "orders")
        .password("secret")
        .ssl_mode(SslMode::Require);
    let conn = PgConnection::connect_config(&server, &config).unwrap();
    assert_eq!(conn.encoding(), "UTF8");
    assert_eq!(server.connects(), 1);
}

#[test]
fn unreachable_server_yields_no_connection() {
    let server = MemoryServer::new();
    server.set_unreachable(true);
    let err = PgConnection::connect(&server, "dbname=test").unwrap_err();
    assert_eq!(operational_message(&err), "PQconnectdb() failed");
    assert!(err.is_connection_error());
}

#[test]
fn refused_connection_carries_server_text() {
    let server = MemoryServer::new();
    server.refuse_connections("FATAL:  password authentication failed for user \"app\"\n");
    let err = PgConnection::connect(&server, "user=app").unwrap_err();
    assert_eq!(
        operational_message(&err),
        "FATAL:  password authentication failed for user \"app\""
    );
    assert_eq!(server.finished(), 1);
}

#[test]
fn failed_datestyle_releases_link() {
    let server = MemoryServer::new();
    server.fail_on(
        "SET DATESTYLE",
        ServerError::error("22023", "invalid value for parameter \"DateStyle\""),
    );
    let err = PgConnection::connect(&server, "").unwrap_err();
    assert_eq!(operational_message(&err), "can't set datestyle to ISO");
    assert_eq!(server.finished(), 1);
    assert_eq!(server.count_statements("SHOW"), 0);
}

#[test]
fn failed_encoding_query_releases_link() {
    let server = MemoryServer::new();
    server.fail_on(
        "SHOW client_encoding",
        ServerError::error("42704", "unrecognized configuration parameter"),
    );
    let err = PgConnection::connect(&server, "").unwrap_err();
    assert_eq!(operational_message(&err), "can't fetch client_encoding");
    assert_eq!(server.finished(), 1);
}

#[test]
fn nonblocking_failure_is_fatal() {
    let server = MemoryServer::new();
    server.fail_nonblocking(true);
    let err = PgConnection::connect(&server, "").unwrap_err();
    assert_eq!(operational_message(&err), "PQsetnonblocking() failed");
    assert_eq!(server.finished(), 1);
}

// ==================== close ====================

#[test]
fn close_is_idempotent_and_orphans_cursors() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    let first = conn.cursor().unwrap();
    let second = conn.cursor().unwrap();
    drop(conn.cursor().unwrap());

    first.execute("SELECT 1", ()).unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Begin);

    conn.close();
    conn.close();

    assert!(conn.closed());
    assert_eq!(server.finished(), 1);
    assert_eq!(server.count_statements("ROLLBACK"), 1);
    for cursor in [&first, &second] {
        assert!(cursor.is_orphaned());
        assert!(cursor.connection().is_none());
    }
    // Orphaned cursors keep their last result for inspection.
    assert_eq!(first.rowcount(), 0);
}

#[test]
fn close_ignores_rollback_failure() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"INSERT INTO t VALUES (1)").unwrap();
    server.disconnect_on("ROLLBACK");

    conn.close();
    assert!(conn.closed());
    assert_eq!(server.finished(), 1);
}

#[test]
fn close_without_transaction_sends_nothing() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.clear_statements();
    conn.close();
    assert!(server.statements().is_empty());
}

#[test]
fn cursors_racing_with_close_fail_cleanly() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(1));
    let conn = connect(&server);

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let cursor = conn.cursor().unwrap();
            thread::spawn(move || {
                let mut executed = 0_usize;
                loop {
                    match cursor.execute("SELECT %s", [Value::Int(1)]) {
                        Ok(()) => executed += 1,
                        Err(e) => {
                            assert!(matches!(e, Error::Interface(_)), "{e:?}");
                            return executed;
                        }
                    }
                }
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(20));
    conn.close();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(server.finished(), 1);
    assert_eq!(server.max_in_flight(), 1);
}

// ==================== transactions ====================

#[test]
fn commit_and_rollback_without_transaction_are_noops() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.clear_statements();

    conn.commit().unwrap();
    conn.rollback().unwrap();
    assert!(server.statements().is_empty());
}

#[test]
fn rollback_ends_transaction() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"UPDATE t SET a = 2").unwrap();
    conn.rollback().unwrap();

    assert_eq!(conn.transaction_status(), TransactionStatus::Ready);
    assert_eq!(server.count_statements("ROLLBACK"), 1);

    conn.execute(b"UPDATE t SET a = 3").unwrap();
    assert_eq!(server.count_statements("BEGIN"), 2);
}

#[test]
fn isolation_switch_between_levels_aborts_once() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"SELECT 1").unwrap();

    conn.set_isolation_level(ISOLATION_LEVEL_SERIALIZABLE).unwrap();
    assert_eq!(server.count_statements("ROLLBACK"), 1);
    assert_eq!(conn.isolation_level(), ISOLATION_LEVEL_SERIALIZABLE);
    assert_eq!(conn.transaction_status(), TransactionStatus::Ready);

    server.clear_statements();
    conn.execute(b"SELECT 2").unwrap();
    assert_eq!(
        server.statements()[0],
        "BEGIN; SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
    );
}

#[test]
fn isolation_switch_to_same_level_keeps_transaction() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"SELECT 1").unwrap();

    conn.set_isolation_level(ISOLATION_LEVEL_READ_COMMITTED).unwrap();
    assert_eq!(server.count_statements("ROLLBACK"), 0);
    assert_eq!(conn.transaction_status(), TransactionStatus::Begin);
}

#[test]
fn leaving_autocommit_never_aborts() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.set_isolation_level(ISOLATION_LEVEL_AUTOCOMMIT).unwrap();
    conn.execute(b"INSERT INTO t VALUES (1)").unwrap();

    conn.set_isolation_level(ISOLATION_LEVEL_REPEATABLE_READ).unwrap();
    assert_eq!(server.count_statements("ROLLBACK"), 0);
    assert_eq!(conn.isolation_level(), ISOLATION_LEVEL_REPEATABLE_READ);
}

#[test]
fn level_changes_even_if_abort_fails() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"SELECT 1").unwrap();
    server.fail_on("ROLLBACK", ServerError::error("XX000", "cache lookup failed"));

    let err = conn.set_isolation_level(ISOLATION_LEVEL_SERIALIZABLE).unwrap_err();
    assert!(matches!(err, Error::Database(_)));
    assert_eq!(conn.isolation_level(), ISOLATION_LEVEL_SERIALIZABLE);
    assert_eq!(conn.transaction_status(), TransactionStatus::Ready);
}

#[test]
fn concurrent_commit_and_rollback_are_serialized() {
    let server = MemoryServer::new().with_latency(Duration::from_millis(2));
    let conn = connect(&server);

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let conn = Arc::clone(&conn);
            thread::spawn(move || {
                for _ in 0..5 {
                    conn.execute(b"UPDATE counters SET n = n + 1").unwrap();
                    if i % 2 == 0 {
                        conn.commit().unwrap();
                    } else {
                        conn.rollback().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(server.max_in_flight(), 1);
    assert_eq!(server.count_statements("UPDATE counters"), 40);
    assert_eq!(conn.transaction_status(), TransactionStatus::Ready);
}

// ==================== errors ====================

#[test]
fn server_errors_are_classified() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.fail_on(
        "INSERT INTO users",
        ServerError::error("23505", "duplicate key value violates unique constraint"),
    );
    server.fail_on(
        "SELEC ",
        ServerError::error("42601", "syntax error at or near \"SELEC\""),
    );

    match conn.execute(b"INSERT INTO users VALUES (1)") {
        Err(Error::Database(e)) => {
            assert_eq!(e.kind, DatabaseErrorKind::Integrity);
            assert_eq!(e.sqlstate.as_deref(), Some("23505"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        conn.execute(b"SELEC 1"),
        Err(Error::Programming(_))
    ));
}

#[test]
fn lost_link_is_operational() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.disconnect_on("SELECT");

    let err = conn.execute(b"SELECT 1").unwrap_err();
    assert_eq!(
        operational_message(&err),
        "server closed the connection unexpectedly"
    );
    assert!(err.is_connection_error());
}

// ==================== notices ====================

#[test]
fn routine_notices_are_logged_in_order() {
    let server = MemoryServer::new();
    server.notice_on("VACUUM", "WARNING:  skipping \"pg_authid\"");
    server.notice_on("VACUUM", "NOTICE:  vacuuming \"public.t\"");
    let conn = connect(&server);
    conn.set_isolation_level(ISOLATION_LEVEL_AUTOCOMMIT).unwrap();

    conn.execute(b"VACUUM").unwrap();
    assert_eq!(
        conn.notices(),
        vec![
            "WARNING:  skipping \"pg_authid\"".to_string(),
            "NOTICE:  vacuuming \"public.t\"".to_string(),
        ]
    );

    conn.clear_notices();
    assert!(conn.notices().is_empty());
}

#[test]
fn error_notice_fails_the_statement() {
    let server = MemoryServer::new();
    server.notice_on("COPY", "ERROR:  missing data for column \"b\"\n");
    let conn = connect(&server);

    let err = conn.execute(b"COPY t FROM STDIN").unwrap_err();
    match &err {
        Error::Database(e) => assert_eq!(e.message, "ERROR:  missing data for column \"b\""),
        other => panic!("unexpected {other:?}"),
    }
    assert!(conn.notices().is_empty());

    // The condition is consumed by the statement it arrived with.
    conn.execute(b"SELECT 1").unwrap();
}

// ==================== notifications ====================

#[test]
fn notifications_arrive_through_poll() {
    let server = MemoryServer::new();
    let listener = connect(&server);
    let sender = connect(&server);
    listener.set_isolation_level(ISOLATION_LEVEL_AUTOCOMMIT).unwrap();
    sender.set_isolation_level(ISOLATION_LEVEL_AUTOCOMMIT).unwrap();

    listener.execute(b"LISTEN jobs").unwrap();
    sender.execute(b"NOTIFY jobs, 'job 17'").unwrap();
    sender.execute(b"NOTIFY other, 'ignored'").unwrap();

    assert_eq!(listener.poll().unwrap(), 1);
    let notifies = listener.take_notifies();
    assert_eq!(notifies.len(), 1);
    assert_eq!(notifies[0].pid, sender.backend_pid());
    assert_eq!(notifies[0].channel, "jobs");
    assert_eq!(notifies[0].payload, "job 17");
    assert!(listener.notifies().is_empty());
    assert_eq!(listener.poll().unwrap(), 0);
}

#[test]
fn notifications_are_collected_after_statements() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"LISTEN events").unwrap();

    server.notify("events", "first");
    server.notify("events", "second");
    conn.execute(b"SELECT 1").unwrap();

    let payloads: Vec<String> = conn.notifies().into_iter().map(|n| n.payload).collect();
    assert_eq!(payloads, vec!["first".to_string(), "second".to_string()]);
}

// ==================== client encoding ====================

#[test]
fn encoding_change_aborts_then_sets() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.execute(b"SELECT 1").unwrap();
    server.clear_statements();

    conn.set_client_encoding("latin-1").unwrap();
    assert_eq!(conn.encoding(), "LATIN1");
    assert_eq!(
        server.statements(),
        vec![
            "ROLLBACK".to_string(),
            "SET client_encoding = 'latin-1'".to_string(),
        ]
    );

    let cursor = conn.cursor().unwrap();
    assert_eq!(
        cursor.mogrify("SELECT %s", [Value::from("café")]).unwrap(),
        b"SELECT 'caf\xe9'".to_vec()
    );
}

#[test]
fn refused_encoding_keeps_server_answer() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.set_client_encoding("WIN1252").unwrap();

    let err = conn.set_client_encoding("LATIN5").unwrap_err();
    assert_eq!(operational_message(&err), "can't set encoding to 'LATIN5'");
    assert_eq!(err.sqlstate(), Some("22023"));
    assert_eq!(conn.encoding(), "WIN1252");
    assert_eq!(server.count_statements("SHOW client_encoding"), 2);
}

#[test]
fn refused_encoding_without_answer_keeps_previous() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.fail_on(
        "SET client_encoding",
        ServerError::error("55000", "cannot change client_encoding now"),
    );
    server.fail_on(
        "SHOW client_encoding",
        ServerError::error("55000", "cannot show client_encoding now"),
    );

    assert!(conn.set_client_encoding("SQL_ASCII").is_err());
    assert_eq!(conn.encoding(), "UTF8");
}

#[test]
fn encoding_name_is_checked_before_io() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    server.clear_statements();

    let injection = conn.set_client_encoding("UTF8'; DROP TABLE t; --").unwrap_err();
    assert!(matches!(injection, Error::Programming(_)));
    let too_long = conn.set_client_encoding(&"U".repeat(25)).unwrap_err();
    assert!(matches!(too_long, Error::Programming(_)));
    let unknown = conn.set_client_encoding("KLINGON").unwrap_err();
    assert!(matches!(unknown, Error::Encoding(_)));

    assert!(server.statements().is_empty());
    assert_eq!(conn.encoding(), "UTF8");
}

#[test]
fn connect_keeps_server_encodings_without_codec() {
    for name in ["MULE_INTERNAL", "EUC_TW", "JOHAB", "X_UNHEARD_OF"] {
        let server = MemoryServer::new().with_encoding(name);
        let conn = connect(&server);
        assert_eq!(conn.encoding(), name);
        assert!(!conn.client_encoding().has_codec());

        let cursor = conn.cursor().unwrap();
        assert_eq!(
            cursor.mogrify("SELECT %s", [Value::from("ascii")]).unwrap(),
            b"SELECT 'ascii'".to_vec()
        );
        server.clear_statements();
        let err = cursor.execute("SELECT %s", [Value::from("\u{e9}")]).unwrap_err();
        assert!(matches!(err, Error::Encoding(_)), "{name}");
        assert!(server.statements().is_empty());
    }
}

#[test]
fn connect_to_double_byte_server_encodings() {
    let server = MemoryServer::new().with_encoding("UHC");
    let conn = connect(&server);
    let cursor = conn.cursor().unwrap();
    assert_eq!(
        cursor.mogrify("SELECT %s", [Value::from("\u{ac02}")]).unwrap(),
        b"SELECT '\x81\x41'".to_vec()
    );

    let server = MemoryServer::new().with_encoding("EUC_CN");
    let conn = connect(&server);
    assert_eq!(conn.encoding(), "EUC_CN");
    let cursor = conn.cursor().unwrap();
    assert_eq!(
        cursor.mogrify("SELECT %s", [Value::from("\u{4e2d}")]).unwrap(),
        b"SELECT '\xd6\xd0'".to_vec()
    );
}

#[test]
fn switching_to_encoding_without_codec() {
    let server = MemoryServer::new();
    let conn = connect(&server);
    conn.set_client_encoding("johab").unwrap();
    assert_eq!(conn.encoding(), "JOHAB");

    let cursor = conn.cursor().unwrap();
    let err = cursor.mogrify("SELECT %s", [Value::from("\u{d55c}")]).unwrap_err();
    assert!(matches!(err, Error::Encoding(_)));
}
