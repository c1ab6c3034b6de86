//! Generic row mapping for entities declared with an [`EntitySchema`].
//!
//! A [`Record`] is an in-memory row whose field names are exactly the
//! schema's column names. Values are held in declared column order and only
//! ever reach SQL as bound parameters.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use sea_query::{Alias, Query, SimpleExpr, SqliteQueryBuilder, Value};
use sea_query_binder::SqlxBinder;
use sqlx::sqlite::SqliteRow;
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;

use super::error::{Result, StorageError, ValidationError};
use super::schema::{ensure_table, verify_table, EntitySchema, InsertPolicy};

/// A single row for a declared table.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    schema: &'static EntitySchema,
    values: Vec<Value>,
}

impl Record {
    /// Build a record from named field values.
    ///
    /// The set of field names must equal the schema's column names: a missing
    /// column, an unknown field, or a field given twice is rejected.
    pub fn new<K, I>(
        schema: &'static EntitySchema,
        fields: I,
    ) -> std::result::Result<Self, ValidationError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut provided: BTreeMap<String, Value> = BTreeMap::new();
        for (name, value) in fields {
            let name = name.into();
            if provided.contains_key(&name) {
                return Err(ValidationError::DuplicateField {
                    table: schema.table,
                    field: name,
                });
            }
            provided.insert(name, value);
        }

        let missing: Vec<String> = schema
            .column_names()
            .filter(|column| !provided.contains_key(*column))
            .map(String::from)
            .collect();
        let unexpected: Vec<String> = provided
            .keys()
            .filter(|field| !schema.column_names().any(|column| column == field.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(ValidationError::FieldSet {
                table: schema.table,
                missing,
                unexpected,
            });
        }

        let values = schema
            .columns
            .iter()
            .filter_map(|column| provided.remove(column.name))
            .collect();

        Ok(Self { schema, values })
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// Field values in declared column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.schema
            .column_names()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }
}

/// Insert one record and commit.
///
/// The live table is re-verified on the connection used for the insert.
/// Fails with [`StorageError::SchemaMismatch`] if it has drifted, with
/// [`StorageError::UniqueConstraintViolation`] on a duplicate key, and with
/// [`StorageError::UnsupportedOperation`] for tables that only accept writes
/// through their own store.
pub async fn insert_record(pool: &SqlitePool, record: &Record) -> Result<()> {
    let schema = record.schema();
    if schema.insert_policy == InsertPolicy::UpsertOnly {
        return Err(StorageError::UnsupportedOperation {
            table: schema.table,
            operation: "direct insert",
        });
    }

    let mut conn = pool.acquire().await?;
    verify_table(&mut *conn, schema).await?;

    let (sql, values) = Query::insert()
        .into_table(Alias::new(schema.table))
        .columns(schema.column_names().map(Alias::new))
        .values(record.values().iter().cloned().map(SimpleExpr::Value))?
        .build_sqlx(SqliteQueryBuilder);

    sqlx::query_with(&sql, values)
        .execute(&mut *conn)
        .await
        .map_err(|e| StorageError::from_write(schema.table, e))?;

    debug!(table = schema.table, "Inserted row");
    Ok(())
}

/// A typed row backed by a declared schema.
pub trait Entity: Sized {
    const SCHEMA: &'static EntitySchema;

    fn to_record(&self) -> std::result::Result<Record, ValidationError>;

    fn from_row(row: &SqliteRow) -> Result<Self>;
}

/// Handle to a verified table holding entities of type `E`.
///
/// Obtaining one runs [`ensure_table`], so a live table that does not match
/// `E::SCHEMA` never yields a handle. Every later read or write through the
/// handle verifies the table again before touching it.
pub struct Table<E: Entity> {
    pool: SqlitePool,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Table<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Entity> Table<E> {
    /// Create (if absent) and verify the backing table.
    pub async fn open(pool: SqlitePool) -> Result<Self> {
        ensure_table(&pool, E::SCHEMA).await?;
        Ok(Self {
            pool,
            _marker: PhantomData,
        })
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Acquire a connection after verifying the live table on it.
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        verify_table(&mut *conn, E::SCHEMA).await?;
        Ok(conn)
    }

    pub async fn insert(&self, entity: &E) -> Result<()> {
        let record = entity.to_record()?;
        insert_record(&self.pool, &record).await
    }

    /// Every row currently in the table.
    pub async fn all(&self) -> Result<Vec<E>> {
        let (sql, values) = Query::select()
            .columns(E::SCHEMA.column_names().map(Alias::new))
            .from(Alias::new(E::SCHEMA.table))
            .build_sqlx(SqliteQueryBuilder);

        let mut conn = self.acquire().await?;
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        rows.iter().map(E::from_row).collect()
    }
}
