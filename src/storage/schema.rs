//! Database schema definitions.
//!
//! Each table is declared twice over: once as an [`EntitySchema`] (the
//! ordered column list that creates and verifies the live table) and once as
//! a sea-query [`Iden`] enum used for type-safe query building. The two are
//! kept in step by the tests at the bottom of this file.

use sea_query::Iden;
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use tracing::{debug, error, info};

use super::error::{Result, StorageError};

/// Declared storage type category of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Date,
    DateTime,
    Text,
    Integer,
}

impl Affinity {
    /// Type name as written in DDL and reported by `pragma_table_info`.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Affinity::Date => "DATE",
            Affinity::DateTime => "DATETIME",
            Affinity::Text => "TEXT",
            Affinity::Integer => "INTEGER",
        }
    }

    /// Whether a type name read back from the store is this affinity.
    pub fn matches(self, declared: &str) -> bool {
        declared.trim().eq_ignore_ascii_case(self.as_sql())
    }
}

/// Column constraint modifier.
///
/// Only used when creating a table; never re-verified against a live table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    None,
    PrimaryKey,
}

impl Constraint {
    pub const fn as_sql(self) -> &'static str {
        match self {
            Constraint::None => "",
            Constraint::PrimaryKey => "PRIMARY KEY",
        }
    }
}

/// Definition of a column in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub affinity: Affinity,
    pub constraint: Constraint,
}

impl Column {
    pub const fn new(name: &'static str, affinity: Affinity) -> Self {
        Self {
            name,
            affinity,
            constraint: Constraint::None,
        }
    }

    pub const fn primary_key(name: &'static str, affinity: Affinity) -> Self {
        Self {
            name,
            affinity,
            constraint: Constraint::PrimaryKey,
        }
    }

    fn definition(&self) -> String {
        match self.constraint {
            Constraint::None => format!("\"{}\" {}", self.name, self.affinity.as_sql()),
            constraint => format!(
                "\"{}\" {} {}",
                self.name,
                self.affinity.as_sql(),
                constraint.as_sql()
            ),
        }
    }
}

/// Which write paths a table accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    /// Rows may be written through the generic row mapper.
    Direct,
    /// Rows are only written by the owning store's upsert.
    UpsertOnly,
}

/// Ordered column set backing one entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitySchema {
    pub table: &'static str,
    pub columns: &'static [Column],
    pub insert_policy: InsertPolicy,
}

impl EntitySchema {
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// DDL for this table. Identifiers come only from the static declaration.
    pub fn create_table_sql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(Column::definition)
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", self.table, columns)
    }

    /// Compare introspected `(name, type)` pairs against the declaration.
    pub fn verify(&self, live: &[(String, String)]) -> Result<()> {
        if live.len() != self.columns.len() {
            return Err(StorageError::SchemaMismatch {
                table: self.table,
                detail: format!(
                    "expected {} columns, found {}",
                    self.columns.len(),
                    live.len()
                ),
            });
        }

        for (index, (column, (name, declared))) in self.columns.iter().zip(live).enumerate() {
            if column.name != name || !column.affinity.matches(declared) {
                return Err(StorageError::SchemaMismatch {
                    table: self.table,
                    detail: format!(
                        "column {}: expected {} {}, found {} {}",
                        index,
                        column.name,
                        column.affinity.as_sql(),
                        name,
                        declared
                    ),
                });
            }
        }

        Ok(())
    }
}

/// Members table schema.
#[derive(Iden)]
pub enum Members {
    Table,
    #[iden = "joined"]
    Joined,
    #[iden = "email"]
    Email,
    #[iden = "name"]
    Name,
    #[iden = "shirt_size"]
    ShirtSize,
    #[iden = "paid_on"]
    PaidOn,
}

/// Rate limit counters table schema.
#[derive(Iden)]
pub enum RateLimits {
    Table,
    #[iden = "minute"]
    Minute,
    #[iden = "join_count"]
    JoinCount,
    #[iden = "check_count"]
    CheckCount,
}

/// Signed-up members. Email is the primary key.
pub const MEMBERS: EntitySchema = EntitySchema {
    table: "members",
    columns: &[
        Column::new("joined", Affinity::Date),
        Column::primary_key("email", Affinity::Text),
        Column::new("name", Affinity::Text),
        Column::new("shirt_size", Affinity::Text),
        Column::new("paid_on", Affinity::Date),
    ],
    insert_policy: InsertPolicy::Direct,
};

/// One row per observed minute, keyed by the minute's epoch seconds.
pub const RATE_LIMITS: EntitySchema = EntitySchema {
    table: "rate_limits",
    columns: &[
        Column::primary_key("minute", Affinity::Integer),
        Column::new("join_count", Affinity::Integer),
        Column::new("check_count", Affinity::Integer),
    ],
    insert_policy: InsertPolicy::UpsertOnly,
};

/// Read the live column names and declared types of `table`, in column order.
///
/// Returns an empty list if the table does not exist. Accepts a pool or a
/// connection already inside a transaction.
pub async fn introspect<'c, X>(executor: X, table: &str) -> Result<Vec<(String, String)>>
where
    X: Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
        .bind(table)
        .fetch_all(executor)
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: String = row.try_get("name")?;
        let declared: String = row.try_get("type")?;
        columns.push((name, declared));
    }
    Ok(columns)
}

/// Verify the live table against `schema` without creating anything.
///
/// Run before every read or write that depends on the column layout.
pub async fn verify_table<'c, X>(executor: X, schema: &EntitySchema) -> Result<()>
where
    X: Executor<'c, Database = Sqlite>,
{
    let live = introspect(executor, schema.table).await?;
    if let Err(e) = schema.verify(&live) {
        error!(table = schema.table, error = %e, "Live table does not match schema");
        return Err(e);
    }
    debug!(table = schema.table, columns = live.len(), "Table schema verified");
    Ok(())
}

/// Create the table if absent, then verify the live table matches `schema`.
///
/// Idempotent. Column names and affinities are checked in declared order;
/// constraints are not.
pub async fn ensure_table(pool: &SqlitePool, schema: &EntitySchema) -> Result<()> {
    sqlx::query(&schema.create_table_sql())
        .execute(pool)
        .await?;

    verify_table(pool, schema).await?;
    info!(table = schema.table, "Table ready");
    Ok(())
}
