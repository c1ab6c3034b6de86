//! Storage error taxonomy.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Malformed input to a storage operation.
///
/// Always surfaced to the immediate caller; nothing is defaulted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Field set does not match table {table}: missing {missing:?}, unexpected {unexpected:?}")]
    FieldSet {
        table: &'static str,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Field {field} given more than once for table {table}")]
    DuplicateField { table: &'static str, field: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Missing form field: {0}")]
    MissingFormField(String),

    #[error("Unexpected form field: {0}")]
    UnexpectedFormField(String),

    #[error("Form field given more than once: {0}")]
    DuplicateFormField(String),
}

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The live table is not what the declared schema expects. Fatal.
    #[error("Table {table} does not match its declared schema: {detail}")]
    SchemaMismatch { table: &'static str, detail: String },

    #[error("Unique constraint violated on {table}: {message}")]
    UniqueConstraintViolation { table: &'static str, message: String },

    /// Programmer error: the operation is never valid for this table.
    #[error("Unsupported operation on {table}: {operation}")]
    UnsupportedOperation {
        table: &'static str,
        operation: &'static str,
    },

    #[error("Invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },

    #[error("Query build error: {0}")]
    QueryBuild(#[from] sea_query::error::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Map a failed write, singling out uniqueness violations.
    pub(crate) fn from_write(table: &'static str, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::UniqueConstraintViolation {
                    table,
                    message: db_err.message().to_string(),
                }
            }
            other => StorageError::Database(other),
        }
    }
}
