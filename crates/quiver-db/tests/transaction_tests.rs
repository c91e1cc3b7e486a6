//! Transactional and one-shot execution through the pool

use anyhow::Result;
use quiver_db::test_support::MemoryDatabase;
use quiver_db::{Connection, ConnectionPool, DbError, DbResult, PoolConfig, QueryOutput};
use quiver_query::{NodePattern, Params, QueryBuilder, QueryError};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn pool_with(config: PoolConfig) -> Result<(MemoryDatabase, ConnectionPool<MemoryDatabase>)> {
    let db = MemoryDatabase::new();
    let pool = ConnectionPool::new(db.clone(), config).await?;
    Ok((db, pool))
}

/// Two writes where the second hits `CREATE (:Broken)`.
async fn two_writes(pool: &ConnectionPool<MemoryDatabase>) -> DbResult<()> {
    pool.with_transaction(|conn| {
        Box::pin(async move {
            conn.run("CREATE (:Note)").await?;
            conn.run("CREATE (:Broken)").await?;
            Ok(())
        })
    })
    .await
}

// ============================================================================
// with_transaction
// ============================================================================

#[tokio::test]
async fn test_commit_path() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(2)).await?;

    let rows = pool
        .with_transaction(|conn| {
            Box::pin(async move {
                conn.run("CREATE (:Note)").await?;
                let output = conn
                    .execute("MATCH (n:Note) RETURN n", &Params::new())
                    .await?;
                Ok(output.len())
            })
        })
        .await?;

    assert_eq!(rows, 0);
    assert_eq!(
        db.statements(),
        ["BEGIN", "CREATE (:Note)", "MATCH (n:Note) RETURN n", "COMMIT"]
    );
    let status = pool.status();
    assert_eq!((status.available, status.active), (1, 0));
    Ok(())
}

#[tokio::test]
async fn test_failed_write_rolls_back_and_reports_original_error() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(2)).await?;
    db.fail_statement("CREATE (:Broken)", "constraint violated");

    let err = two_writes(&pool).await.unwrap_err();

    match &err {
        DbError::TransactionFailed { source, .. } => {
            assert_eq!(**source, DbError::Engine("constraint violated".into()));
        }
        other => panic!("expected TransactionFailed, got {:?}", other),
    }
    assert_eq!(
        db.statements(),
        ["BEGIN", "CREATE (:Note)", "CREATE (:Broken)", "ROLLBACK"]
    );

    // Returned exactly once
    let status = pool.status();
    assert_eq!((status.available, status.active), (1, 0));
    Ok(())
}

#[tokio::test]
async fn test_rollback_error_does_not_mask_cause() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    db.fail_statement("CREATE (:Broken)", "constraint violated");
    db.fail_statement("ROLLBACK", "connection reset");

    let err = two_writes(&pool).await.unwrap_err();

    assert_eq!(
        err.root_cause(),
        &DbError::Engine("constraint violated".into())
    );
    assert!(err.to_string().contains("constraint violated"));
    assert_eq!(pool.status().available, 1);
    Ok(())
}

#[tokio::test]
async fn test_begin_failure_skips_body() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    db.fail_statement("BEGIN", "read-only database");
    let ran = Arc::new(AtomicBool::new(false));

    let flag = ran.clone();
    let err = pool
        .with_transaction(move |conn| {
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
                conn.run("CREATE (:Note)").await
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        DbError::TransactionFailed { reason, .. } if reason == "BEGIN failed"
    ));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(db.statements(), ["BEGIN"]);
    assert_eq!(pool.status().available, 1);
    Ok(())
}

#[tokio::test]
async fn test_commit_failure_rolls_back() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    db.fail_statement("COMMIT", "serialization failure");

    let err = pool
        .with_transaction(|conn| Box::pin(async move { conn.run("CREATE (:Note)").await }))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        DbError::TransactionFailed { reason, .. } if reason == "COMMIT failed"
    ));
    assert_eq!(
        db.statements(),
        ["BEGIN", "CREATE (:Note)", "COMMIT", "ROLLBACK"]
    );
    assert_eq!(pool.status().available, 1);
    Ok(())
}

#[tokio::test]
async fn test_transaction_pins_one_connection() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(3).with_min_connections(3)).await?;

    pool.with_transaction(|conn| {
        Box::pin(async move {
            conn.run("CREATE (:A)").await?;
            conn.run("CREATE (:B)").await?;
            conn.run("CREATE (:C)").await
        })
    })
    .await?;

    let log = db.log();
    assert_eq!(log.len(), 5);
    assert!(log.iter().all(|s| s.connection == log[0].connection));
    Ok(())
}

async fn write_note(pool: &ConnectionPool<MemoryDatabase>, statement: &'static str) -> DbResult<()> {
    pool.with_transaction(move |conn| {
        Box::pin(async move {
            conn.run(statement).await?;
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        })
    })
    .await
}

#[tokio::test(start_paused = true)]
async fn test_transactions_serialize_on_single_connection() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;

    let (a, b) = tokio::join!(
        write_note(&pool, "CREATE (:A)"),
        write_note(&pool, "CREATE (:B)")
    );
    a?;
    b?;

    assert_eq!(
        db.statements(),
        ["BEGIN", "CREATE (:A)", "COMMIT", "BEGIN", "CREATE (:B)", "COMMIT"]
    );
    assert_eq!(db.opened(), 1);
    Ok(())
}

// ============================================================================
// with_connection / execute
// ============================================================================

#[tokio::test]
async fn test_with_connection_returns_connection_on_error() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    db.fail_statement("MATCH", "syntax error");

    let err = pool
        .with_connection(|conn| Box::pin(async move { conn.run("MATCH (n RETURN n").await }))
        .await
        .unwrap_err();

    // Not wrapped: no transaction was involved
    assert_eq!(err, DbError::Engine("syntax error".into()));
    assert_eq!(pool.status().available, 1);
    Ok(())
}

#[tokio::test]
async fn test_execute_fragment_sends_hoisted_parameters() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    let fragment = QueryBuilder::new()
        .matching([NodePattern::new("u").label("User").property("id", json!(42))])
        .returning(["u.name"])
        .build()?;
    db.respond_with(
        fragment.text(),
        QueryOutput::new(vec!["u.name".into()], vec![vec![json!("ada")]]),
    );

    let output = pool.execute(&fragment).await?;

    assert_eq!(output.column("u.name"), Some(vec![&json!("ada")]));
    let log = db.log();
    assert_eq!(log[0].text, "MATCH (u:User {id: $p1}) RETURN u.name");
    assert_eq!(log[0].parameters["p1"], json!(42));
    assert_eq!(pool.status().available, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalid_structure_never_checks_out() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    let structure = QueryBuilder::new()
        .matching([NodePattern::new("u")])
        .returning(["u"])
        .delete(["u"])
        .into_structure();

    let err = pool.execute_structure(&structure).await.unwrap_err();

    assert!(matches!(
        err,
        DbError::Query(QueryError::CompilationFailed { .. })
    ));
    assert_eq!(db.opened(), 0);
    assert!(db.statements().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_execute_structure_runs_compiled_text() -> Result<()> {
    let (db, pool) = pool_with(PoolConfig::new(1)).await?;
    let structure = QueryBuilder::new()
        .matching([NodePattern::new("n").label("Note")])
        .returning(["n.title"])
        .into_structure();

    pool.execute_structure(&structure).await?;

    assert_eq!(db.statements(), ["MATCH (n:Note) RETURN n.title"]);
    Ok(())
}
