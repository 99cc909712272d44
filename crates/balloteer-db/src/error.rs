//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] errors with context about which operation or column failed.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A JSONB column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored number does not fit the domain type, or the reverse.
    #[error("Value out of range for {column}: {value}")]
    OutOfRange {
        /// The column being converted.
        column: &'static str,
        /// The offending value, as text.
        value: String,
    },

    /// A write referenced a community row that does not exist.
    #[error("Community {0} has no row")]
    MissingCommunity(i64),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Build an [`DbError::OutOfRange`] for `column`.
    pub fn out_of_range(column: &'static str, value: impl ToString) -> Self {
        Self::OutOfRange {
            column,
            value: value.to_string(),
        }
    }
}
