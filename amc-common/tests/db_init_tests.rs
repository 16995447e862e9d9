//! Tests for cache database initialization

use amc_common::db::init::{current_schema_version, init_database, SCHEMA_VERSION};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("cache.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("cache.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        "INSERT INTO response_cache (fingerprint, stage, model, payload, inserted_at)
         VALUES ('v1:abc', 'extraction', 'm', '{}', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM response_cache")
        .fetch_one(&pool2.unwrap())
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows survive re-initialization");
}

#[tokio::test]
async fn test_cache_tables_exist() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("cache.db")).await.unwrap();

    for table in ["execution_records", "response_cache", "schema_version"] {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(exists, 1, "table {} missing", table);
    }

    assert_eq!(current_schema_version(&pool).await.unwrap(), Some(SCHEMA_VERSION));
}

#[tokio::test]
async fn test_wal_mode_enabled() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("cache.db")).await.unwrap();

    let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[tokio::test]
async fn test_outcome_column_is_constrained() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("cache.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO execution_records (identity, fingerprint, outcome, summary, final_stage, recorded_at)
         VALUES ('a', 'f', 'maybe', '{}', 'done', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(result.is_err());
}
