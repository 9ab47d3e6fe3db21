//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors with additional context about which
//! operation failed.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored enum column held text no variant matches.
    #[error("Invalid stored value: {0}")]
    InvalidValue(#[from] suzerain_types::ParseEnumError),

    /// A counter did not fit the column or domain integer type.
    #[error("Value out of range for {field}: {value}")]
    OutOfRange {
        /// Which column or field overflowed.
        field: &'static str,
        /// The offending value, rendered.
        value: String,
    },

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Convert a domain counter to a `BIGINT` bind value.
    pub(crate) fn to_i64(field: &'static str, value: u64) -> Result<i64, Self> {
        i64::try_from(value).map_err(|_err| Self::OutOfRange {
            field,
            value: value.to_string(),
        })
    }

    /// Convert a `BIGINT` column back to a domain counter.
    pub(crate) fn to_u64(field: &'static str, value: i64) -> Result<u64, Self> {
        u64::try_from(value).map_err(|_err| Self::OutOfRange {
            field,
            value: value.to_string(),
        })
    }

    /// Convert a turn count to an `INTEGER` bind value.
    pub(crate) fn to_i32(field: &'static str, value: u32) -> Result<i32, Self> {
        i32::try_from(value).map_err(|_err| Self::OutOfRange {
            field,
            value: value.to_string(),
        })
    }

    /// Convert an `INTEGER` column back to a turn count.
    pub(crate) fn to_u32(field: &'static str, value: i32) -> Result<u32, Self> {
        u32::try_from(value).map_err(|_err| Self::OutOfRange {
            field,
            value: value.to_string(),
        })
    }
}
