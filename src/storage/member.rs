//! Signed-up members.

use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder, Value};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use super::error::{Result, StorageError, ValidationError};
use super::record::{Entity, Record, Table};
use super::schema::{EntitySchema, Members, MEMBERS};

/// Errors from a member signup.
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    /// A member with this email already exists. Expected and recoverable.
    #[error("Email already registered: {email}")]
    DuplicateEmail { email: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A single member.
///
/// Timestamps are stored as RFC 3339 text in `DATE` columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub joined: DateTime<Utc>,
    pub email: String,
    pub name: String,
    pub shirt_size: String,
    pub paid_on: Option<DateTime<Utc>>,
}

impl Member {
    /// A member who has just joined and not yet paid.
    pub fn new(
        email: impl Into<String>,
        name: impl Into<String>,
        shirt_size: impl Into<String>,
        joined: DateTime<Utc>,
    ) -> Self {
        Self {
            joined,
            email: email.into(),
            name: name.into(),
            shirt_size: shirt_size.into(),
            paid_on: None,
        }
    }
}

fn timestamp_value(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &'static str, value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp { column, value })
}

impl Entity for Member {
    const SCHEMA: &'static EntitySchema = &MEMBERS;

    fn to_record(&self) -> std::result::Result<Record, ValidationError> {
        Record::new(
            Self::SCHEMA,
            [
                ("joined", Value::from(timestamp_value(&self.joined))),
                ("email", Value::from(self.email.as_str())),
                ("name", Value::from(self.name.as_str())),
                ("shirt_size", Value::from(self.shirt_size.as_str())),
                ("paid_on", Value::from(self.paid_on.as_ref().map(timestamp_value))),
            ],
        )
    }

    fn from_row(row: &SqliteRow) -> Result<Self> {
        let paid_on: Option<String> = row.try_get("paid_on")?;
        Ok(Self {
            joined: parse_timestamp("joined", row.try_get("joined")?)?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            shirt_size: row.try_get("shirt_size")?,
            paid_on: paid_on.map(|v| parse_timestamp("paid_on", v)).transpose()?,
        })
    }
}

/// Member records, keyed by email.
#[derive(Clone)]
pub struct MemberStore {
    table: Table<Member>,
}

impl MemberStore {
    /// Create (if absent) and verify the members table.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        Ok(Self {
            table: Table::open(pool).await?,
        })
    }

    /// Persist a new member.
    ///
    /// A second signup with the same email fails with
    /// [`JoinError::DuplicateEmail`] and leaves the first record untouched.
    pub async fn join(
        &self,
        email: &str,
        name: &str,
        shirt_size: &str,
        joined_at: DateTime<Utc>,
    ) -> std::result::Result<(), JoinError> {
        let member = Member::new(email, name, shirt_size, joined_at);
        match self.table.insert(&member).await {
            Ok(()) => {
                debug!(email = %member.email, "Member joined");
                Ok(())
            }
            Err(StorageError::UniqueConstraintViolation { .. }) => Err(JoinError::DuplicateEmail {
                email: member.email,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(&self, email: &str) -> Result<Option<Member>> {
        let (sql, values) = Query::select()
            .columns([
                Members::Joined,
                Members::Email,
                Members::Name,
                Members::ShirtSize,
                Members::PaidOn,
            ])
            .from(Members::Table)
            .and_where(Expr::col(Members::Email).eq(email))
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.table.acquire().await?;
        let row = sqlx::query_with(&sql, values)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(Member::from_row).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let (sql, values) = Query::select()
            .expr(Expr::col(Members::Email).count())
            .from(Members::Table)
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.table.acquire().await?;
        let row = sqlx::query_with(&sql, values).fetch_one(&mut *conn).await?;
        Ok(row.try_get(0)?)
    }

    pub async fn all(&self) -> Result<Vec<Member>> {
        self.table.all().await
    }
}
