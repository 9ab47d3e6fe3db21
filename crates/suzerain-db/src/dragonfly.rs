//! `Dragonfly` (Redis-compatible) projection storage.
//!
//! `Dragonfly` holds the low-latency projection of each active session. The
//! projection is one hash per session; every field is written on its own so
//! that a crash between writes leaves the hash partially fresh rather than
//! torn mid-value.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Fields |
//! |---------|------|--------|
//! | `session:{id}:projection` | Hash | `cycle`, `phase`, `players`, `updated_at` |
//!
//! This module only moves strings. Encoding and decoding of field values
//! lives with the engine that owns the projection.

use std::collections::HashMap;

use fred::prelude::*;

use crate::error::DbError;

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
///
/// Wraps a [`fred::prelude::Client`] and exposes the hash operations the
/// session projection needs.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Read every field of the hash at `key`.
    ///
    /// A missing key yields an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, DbError> {
        let fields: HashMap<String, String> = self.client.hgetall(key).await?;
        Ok(fields)
    }

    /// Set one field of the hash at `key`, creating the hash if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn write_field(&self, key: &str, field: &str, value: &str) -> Result<(), DbError> {
        let _: i64 = self.client.hset(key, (field, value)).await?;
        Ok(())
    }

    /// Delete the key (and every field under it).
    ///
    /// Deleting a key that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn delete_key(&self, key: &str) -> Result<(), DbError> {
        let removed: u32 = self.client.del(key).await?;
        tracing::trace!(key, removed, "Deleted Dragonfly key");
        Ok(())
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the quit command fails.
    pub async fn close(&self) -> Result<(), DbError> {
        self.client.quit().await?;
        tracing::info!("Dragonfly connection closed");
        Ok(())
    }

    /// Return a reference to the underlying [`Client`].
    pub const fn client(&self) -> &Client {
        &self.client
    }
}
