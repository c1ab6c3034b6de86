//! Per-minute action quotas.
//!
//! Every action increments a counter in the row for the current minute. The
//! increment, the pruning of older minutes and the read-back of the new count
//! run inside one `BEGIN IMMEDIATE` transaction, so concurrent callers in
//! other tasks or other processes never lose an update. The table layout is
//! verified inside the same transaction before the upsert.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sea_query::{Expr, Func, OnConflict, Order, Query, SimpleExpr, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};

use super::error::{Result, StorageError, ValidationError};
use super::record::{Entity, Record, Table};
use super::schema::{verify_table, EntitySchema, RateLimits, RATE_LIMITS};

/// Kind of rate-limited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Join,
    Check,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Join => "join",
            Action::Check => "check",
        }
    }

    /// Counter column this action increments.
    const fn column(self) -> RateLimits {
        match self {
            Action::Join => RateLimits::JoinCount,
            Action::Check => RateLimits::CheckCount,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "join" => Ok(Action::Join),
            "check" => Ok(Action::Check),
            other => Err(ValidationError::UnknownAction(other.to_string())),
        }
    }
}

/// Start of a wall-clock minute, as seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MinuteBucket(i64);

impl MinuteBucket {
    /// The minute containing `instant`.
    pub fn containing(instant: DateTime<Utc>) -> Self {
        Self::from_epoch_seconds(instant.timestamp())
    }

    pub const fn from_epoch_seconds(seconds: i64) -> Self {
        Self(seconds - seconds.rem_euclid(60))
    }

    pub const fn epoch_seconds(self) -> i64 {
        self.0
    }
}

/// Counter row for one minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCounter {
    pub minute: MinuteBucket,
    pub joins: i64,
    pub checks: i64,
}

impl RateCounter {
    pub const fn count(&self, action: Action) -> i64 {
        match action {
            Action::Join => self.joins,
            Action::Check => self.checks,
        }
    }
}

impl Entity for RateCounter {
    const SCHEMA: &'static EntitySchema = &RATE_LIMITS;

    fn to_record(&self) -> std::result::Result<Record, ValidationError> {
        Record::new(
            Self::SCHEMA,
            [
                ("minute", self.minute.epoch_seconds().into()),
                ("join_count", self.joins.into()),
                ("check_count", self.checks.into()),
            ],
        )
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            minute: MinuteBucket(row.try_get("minute")?),
            joins: row.try_get("join_count")?,
            checks: row.try_get("check_count")?,
        })
    }
}

/// Atomic per-minute action counters.
#[derive(Clone)]
pub struct RateLimiter {
    table: Table<RateCounter>,
}

impl RateLimiter {
    /// Create (if absent) and verify the counters table.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        Ok(Self {
            table: Table::open(pool).await?,
        })
    }

    /// Record `action` now and report whether the caller is within quota.
    pub async fn try_action(&self, action: Action, max_per_minute: u32) -> Result<bool> {
        self.try_action_at(action, max_per_minute, Utc::now()).await
    }

    /// Record `action` at `now` and report whether the caller is within quota.
    ///
    /// Permitted iff the post-increment count for the minute is at most
    /// `max_per_minute`. A storage failure is returned as an error, never as
    /// a permit.
    pub async fn try_action_at(
        &self,
        action: Action,
        max_per_minute: u32,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let minute = MinuteBucket::containing(now);

        // BEGIN IMMEDIATE acquires the write lock upfront, so the upsert,
        // prune and read-back are serialized against every other writer.
        let mut conn = self.table.pool().acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let counter = match Self::record_action(&mut conn, action, minute).await {
            Ok(counter) => counter,
            Err(e) => {
                Self::abort(conn).await;
                return Err(e);
            }
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            Self::abort(conn).await;
            return Err(e.into());
        }

        let count = counter.count(action);
        let permitted = count <= i64::from(max_per_minute);
        if permitted {
            debug!(action = %action, minute = minute.epoch_seconds(), count, "Action permitted");
        } else {
            info!(
                action = %action,
                minute = minute.epoch_seconds(),
                count,
                max_per_minute,
                "Action rate limited"
            );
        }
        Ok(permitted)
    }

    /// Roll back an open transaction. A connection that cannot be rolled
    /// back is detached and closed instead of going back to the pool.
    async fn abort(mut conn: PoolConnection<Sqlite>) {
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!(error = %e, "Rollback failed, discarding connection");
            drop(conn.detach());
        }
    }

    /// Verify, upsert, prune and read back within an already-started
    /// transaction.
    async fn record_action(
        conn: &mut SqliteConnection,
        action: Action,
        minute: MinuteBucket,
    ) -> Result<RateCounter> {
        verify_table(&mut *conn, &RATE_LIMITS).await?;

        let (joins, checks) = match action {
            Action::Join => (1i64, 0i64),
            Action::Check => (0, 1),
        };
        let incremented = Expr::expr(SimpleExpr::FunctionCall(Func::coalesce([
            Expr::col((RateLimits::Table, action.column())).into(),
            Expr::val(0i64).into(),
        ])))
        .add(1i64);

        let (sql, values) = Query::insert()
            .into_table(RateLimits::Table)
            .columns([
                RateLimits::Minute,
                RateLimits::JoinCount,
                RateLimits::CheckCount,
            ])
            .values_panic([minute.epoch_seconds().into(), joins.into(), checks.into()])
            .on_conflict(
                OnConflict::column(RateLimits::Minute)
                    .value(action.column(), incremented)
                    .to_owned(),
            )
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        // Only strictly older minutes: a row from a clock running ahead survives.
        let (sql, values) = Query::delete()
            .from_table(RateLimits::Table)
            .and_where(Expr::col(RateLimits::Minute).lt(minute.epoch_seconds()))
            .build_sqlx(SqliteQueryBuilder);
        let pruned = sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if pruned > 0 {
            debug!(pruned, minute = minute.epoch_seconds(), "Pruned stale rate limit rows");
        }

        let (sql, values) = Self::select_counters()
            .and_where(Expr::col(RateLimits::Minute).eq(minute.epoch_seconds()))
            .build_sqlx(SqliteQueryBuilder);
        let row = sqlx::query_with(&sql, values).fetch_one(&mut *conn).await?;
        RateCounter::from_row(&row)
    }

    fn select_counters() -> sea_query::SelectStatement {
        Query::select()
            .columns([
                RateLimits::Minute,
                RateLimits::JoinCount,
                RateLimits::CheckCount,
            ])
            .from(RateLimits::Table)
            .to_owned()
    }

    /// Counter row for `minute`, if one exists.
    pub async fn counter(&self, minute: MinuteBucket) -> Result<Option<RateCounter>> {
        let (sql, values) = Self::select_counters()
            .and_where(Expr::col(RateLimits::Minute).eq(minute.epoch_seconds()))
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.table.acquire().await?;
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(RateCounter::from_row).transpose()
    }

    /// All counter rows, oldest minute first.
    pub async fn counters(&self) -> Result<Vec<RateCounter>> {
        let (sql, values) = Self::select_counters()
            .order_by(RateLimits::Minute, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.table.acquire().await?;
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        rows.iter().map(RateCounter::from_row).collect()
    }

    /// Direct insertion is never allowed; counters change only via
    /// [`RateLimiter::try_action`].
    pub async fn insert(&self, counter: &RateCounter) -> Result<()> {
        warn!(
            minute = counter.minute.epoch_seconds(),
            "Rejected direct insert into rate limit counters"
        );
        Err(StorageError::UnsupportedOperation {
            table: RATE_LIMITS.table,
            operation: "direct insert",
        })
    }
}
