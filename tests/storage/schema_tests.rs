//! Schema registry tests: table creation and live-table verification.

use signup_server::storage::schema::{introspect, MEMBERS, RATE_LIMITS};
use signup_server::storage::{ensure_table, StorageError};
use sqlx::SqlitePool;

pub async fn test_ensure_table_creates_table(pool: &SqlitePool) {
    ensure_table(pool, &MEMBERS)
        .await
        .expect("ensure_table should succeed");

    let columns = introspect(pool, "members").await.unwrap();
    let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["joined", "email", "name", "shirt_size", "paid_on"]);
    assert_eq!(columns[0].1, "DATE");
    assert_eq!(columns[1].1, "TEXT");
}

pub async fn test_ensure_table_idempotent(pool: &SqlitePool) {
    ensure_table(pool, &RATE_LIMITS).await.unwrap();
    ensure_table(pool, &RATE_LIMITS)
        .await
        .expect("second ensure_table should succeed");
}

pub async fn test_introspect_missing_table(pool: &SqlitePool) {
    let columns = introspect(pool, "no_such_table").await.unwrap();
    assert!(columns.is_empty());
}

pub async fn test_column_count_mismatch(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE members (joined DATE, email TEXT PRIMARY KEY, name TEXT, shirt_size TEXT)",
    )
    .execute(pool)
    .await
    .unwrap();

    let result = ensure_table(pool, &MEMBERS).await;
    assert!(
        matches!(result, Err(StorageError::SchemaMismatch { table: "members", .. })),
        "missing column should be a schema mismatch, got {:?}",
        result
    );
}

pub async fn test_column_name_mismatch(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE rate_limits (minute INTEGER PRIMARY KEY, joins INTEGER, check_count INTEGER)",
    )
    .execute(pool)
    .await
    .unwrap();

    let result = ensure_table(pool, &RATE_LIMITS).await;
    assert!(matches!(result, Err(StorageError::SchemaMismatch { .. })));
}

pub async fn test_column_affinity_mismatch(pool: &SqlitePool) {
    sqlx::query(
        "CREATE TABLE members (joined TEXT, email TEXT PRIMARY KEY, name TEXT, \
         shirt_size TEXT, paid_on DATE)",
    )
    .execute(pool)
    .await
    .unwrap();

    let result = ensure_table(pool, &MEMBERS).await;
    assert!(matches!(result, Err(StorageError::SchemaMismatch { .. })));
}

pub async fn test_constraints_not_verified(pool: &SqlitePool) {
    // Same names and affinities, but no primary key on email.
    sqlx::query(
        "CREATE TABLE members (joined DATE, email TEXT, name TEXT, shirt_size TEXT, paid_on DATE)",
    )
    .execute(pool)
    .await
    .unwrap();

    ensure_table(pool, &MEMBERS)
        .await
        .expect("constraint differences are not checked");
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all schema registry tests, each against a fresh pool.
#[macro_export]
macro_rules! run_schema_tests {
    ($pool:expr) => {
        use $crate::storage::schema_tests::*;

        test_ensure_table_creates_table(&$pool.await).await;
        println!("  test_ensure_table_creates_table: PASSED");

        test_ensure_table_idempotent(&$pool.await).await;
        println!("  test_ensure_table_idempotent: PASSED");

        test_introspect_missing_table(&$pool.await).await;
        println!("  test_introspect_missing_table: PASSED");

        test_column_count_mismatch(&$pool.await).await;
        println!("  test_column_count_mismatch: PASSED");

        test_column_name_mismatch(&$pool.await).await;
        println!("  test_column_name_mismatch: PASSED");

        test_column_affinity_mismatch(&$pool.await).await;
        println!("  test_column_affinity_mismatch: PASSED");

        test_constraints_not_verified(&$pool.await).await;
        println!("  test_constraints_not_verified: PASSED");
    };
}
