//! Rate limiter tests: counting, quota boundary, pruning and atomicity.

use signup_server::storage::{
    Action, Entity, MinuteBucket, RateCounter, RateLimiter, StorageError, Table,
};
use sqlx::SqlitePool;

use super::at_minute;

fn bucket(minute: i64) -> MinuteBucket {
    MinuteBucket::containing(at_minute(minute))
}

pub async fn test_first_action_creates_counter(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    assert!(limiter.try_action_at(Action::Join, 5, at_minute(1000)).await.unwrap());

    let counter = limiter.counter(bucket(1000)).await.unwrap().unwrap();
    assert_eq!(counter.minute.epoch_seconds(), 60_000);
    assert_eq!((counter.joins, counter.checks), (1, 0));
}

pub async fn test_join_scenario(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    assert!(limiter.try_action_at(Action::Join, 5, at_minute(1000)).await.unwrap());
    assert!(limiter.try_action_at(Action::Join, 5, at_minute(1000)).await.unwrap());
    let counter = limiter.counter(bucket(1000)).await.unwrap().unwrap();
    assert_eq!((counter.joins, counter.checks), (2, 0));

    let mut results = Vec::new();
    for _ in 0..5 {
        results.push(limiter.try_action_at(Action::Join, 5, at_minute(1000)).await.unwrap());
    }
    assert_eq!(results, [true, true, true, false, false]);

    let counter = limiter.counter(bucket(1000)).await.unwrap().unwrap();
    assert_eq!(counter.joins, 7);
}

pub async fn test_quota_boundary_inclusive(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    for call in 1..=3 {
        assert!(
            limiter.try_action_at(Action::Check, 3, at_minute(42)).await.unwrap(),
            "call {} should be permitted",
            call
        );
    }
    assert!(!limiter.try_action_at(Action::Check, 3, at_minute(42)).await.unwrap());
}

pub async fn test_zero_quota_denies(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();
    assert!(!limiter.try_action_at(Action::Join, 0, at_minute(7)).await.unwrap());
}

pub async fn test_actions_counted_independently(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    for _ in 0..4 {
        limiter.try_action_at(Action::Join, 3, at_minute(500)).await.unwrap();
    }
    assert!(!limiter.try_action_at(Action::Join, 3, at_minute(500)).await.unwrap());
    assert!(limiter.try_action_at(Action::Check, 3, at_minute(500)).await.unwrap());

    let counter = limiter.counter(bucket(500)).await.unwrap().unwrap();
    assert_eq!((counter.joins, counter.checks), (5, 1));
}

pub async fn test_new_minute_resets_quota(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    limiter.try_action_at(Action::Join, 1, at_minute(10)).await.unwrap();
    assert!(!limiter.try_action_at(Action::Join, 1, at_minute(10)).await.unwrap());
    assert!(limiter.try_action_at(Action::Join, 1, at_minute(11)).await.unwrap());
}

pub async fn test_prunes_older_minutes(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    limiter.try_action_at(Action::Join, 5, at_minute(100)).await.unwrap();
    limiter.try_action_at(Action::Check, 5, at_minute(101)).await.unwrap();
    limiter.try_action_at(Action::Check, 5, at_minute(103)).await.unwrap();

    assert!(limiter.counter(bucket(100)).await.unwrap().is_none());
    assert!(limiter.counter(bucket(101)).await.unwrap().is_none());

    let counters = limiter.counters().await.unwrap();
    assert_eq!(
        counters,
        vec![RateCounter {
            minute: bucket(103),
            joins: 0,
            checks: 1,
        }]
    );
}

pub async fn test_future_minute_survives(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();

    // Another process with a clock running ahead wrote minute 205 first.
    limiter.try_action_at(Action::Join, 5, at_minute(205)).await.unwrap();
    limiter.try_action_at(Action::Join, 5, at_minute(200)).await.unwrap();

    let minutes: Vec<i64> = limiter
        .counters()
        .await
        .unwrap()
        .iter()
        .map(|c| c.minute.epoch_seconds())
        .collect();
    assert_eq!(minutes, [200 * 60, 205 * 60]);

    limiter.try_action_at(Action::Join, 5, at_minute(205)).await.unwrap();
    let counters = limiter.counters().await.unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].joins, 2);
}

pub async fn test_direct_insert_unsupported(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();
    let counter = RateCounter {
        minute: bucket(1),
        joins: 0,
        checks: 0,
    };

    let result = limiter.insert(&counter).await;
    assert!(matches!(result, Err(StorageError::UnsupportedOperation { .. })));

    let table: Table<RateCounter> = Table::open(pool.clone()).await.unwrap();
    let result = table.insert(&counter).await;
    assert!(matches!(
        result,
        Err(StorageError::UnsupportedOperation { table: "rate_limits", .. })
    ));

    assert!(counter.to_record().is_ok());
    assert!(limiter.counters().await.unwrap().is_empty());
}

pub async fn test_failed_prune_rolls_back(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();
    limiter.try_action_at(Action::Join, 5, at_minute(300)).await.unwrap();

    sqlx::query(
        "CREATE TRIGGER fail_prune BEFORE DELETE ON rate_limits \
         BEGIN SELECT RAISE(ABORT, 'prune failed'); END",
    )
    .execute(pool)
    .await
    .unwrap();

    let result = limiter.try_action_at(Action::Join, 5, at_minute(301)).await;
    assert!(
        matches!(result, Err(StorageError::Database(_))),
        "failed transaction must not report a permit, got {:?}",
        result
    );

    // The upsert for minute 301 ran before the failing delete; neither stuck.
    assert!(limiter.counter(bucket(301)).await.unwrap().is_none());
    let old = limiter.counter(bucket(300)).await.unwrap().unwrap();
    assert_eq!(old.joins, 1);

    sqlx::query("DROP TRIGGER fail_prune").execute(pool).await.unwrap();
    assert!(limiter.try_action_at(Action::Join, 5, at_minute(301)).await.unwrap());
    assert!(limiter.counter(bucket(300)).await.unwrap().is_none());
}

pub async fn test_missing_table_is_error(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();
    sqlx::query("DROP TABLE rate_limits").execute(pool).await.unwrap();

    let result = limiter.try_action_at(Action::Check, 100, at_minute(1)).await;
    assert!(matches!(
        result,
        Err(StorageError::SchemaMismatch { table: "rate_limits", .. })
    ));
}

pub async fn test_drifted_table_rejected_by_open_limiter(pool: &SqlitePool) {
    let limiter = RateLimiter::open(pool.clone()).await.unwrap();
    limiter.try_action_at(Action::Join, 5, at_minute(50)).await.unwrap();

    sqlx::query("ALTER TABLE rate_limits ADD COLUMN extra TEXT")
        .execute(pool)
        .await
        .unwrap();

    let result = limiter.try_action_at(Action::Join, 5, at_minute(50)).await;
    assert!(
        matches!(result, Err(StorageError::SchemaMismatch { table: "rate_limits", .. })),
        "drifted table must not be counted against, got {:?}",
        result
    );
    assert!(matches!(
        limiter.counters().await,
        Err(StorageError::SchemaMismatch { .. })
    ));
    assert!(matches!(
        limiter.counter(bucket(50)).await,
        Err(StorageError::SchemaMismatch { .. })
    ));

    // Rejected inside the transaction: nothing was incremented, and the
    // connection went back to the pool outside any transaction.
    let joins: i64 = sqlx::query_scalar("SELECT join_count FROM rate_limits WHERE minute = ?")
        .bind(bucket(50).epoch_seconds())
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(joins, 1);
    sqlx::query("BEGIN IMMEDIATE").execute(pool).await.unwrap();
    sqlx::query("ROLLBACK").execute(pool).await.unwrap();
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all rate limiter tests, each against a fresh pool.
#[macro_export]
macro_rules! run_rate_limit_tests {
    ($pool:expr) => {
        use $crate::storage::rate_limit_tests::*;

        test_first_action_creates_counter(&$pool.await).await;
        println!("  test_first_action_creates_counter: PASSED");

        test_join_scenario(&$pool.await).await;
        println!("  test_join_scenario: PASSED");

        test_quota_boundary_inclusive(&$pool.await).await;
        println!("  test_quota_boundary_inclusive: PASSED");

        test_zero_quota_denies(&$pool.await).await;
        println!("  test_zero_quota_denies: PASSED");

        test_actions_counted_independently(&$pool.await).await;
        println!("  test_actions_counted_independently: PASSED");

        test_new_minute_resets_quota(&$pool.await).await;
        println!("  test_new_minute_resets_quota: PASSED");

        test_prunes_older_minutes(&$pool.await).await;
        println!("  test_prunes_older_minutes: PASSED");

        test_future_minute_survives(&$pool.await).await;
        println!("  test_future_minute_survives: PASSED");

        test_direct_insert_unsupported(&$pool.await).await;
        println!("  test_direct_insert_unsupported: PASSED");

        test_failed_prune_rolls_back(&$pool.await).await;
        println!("  test_failed_prune_rolls_back: PASSED");

        test_missing_table_is_error(&$pool.await).await;
        println!("  test_missing_table_is_error: PASSED");

        test_drifted_table_rejected_by_open_limiter(&$pool.await).await;
        println!("  test_drifted_table_rejected_by_open_limiter: PASSED");
    };
}
