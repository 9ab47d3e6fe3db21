//! Error types for the engine binary.

/// Top-level error for the engine binary.
///
/// Each variant wraps a subsystem failure that stops startup; `main`
/// propagates them with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: suzerain_core::config::ConfigError,
    },

    /// `PostgreSQL` or `Dragonfly` setup failed.
    #[error("database error: {source}")]
    Database {
        /// The underlying data-layer error.
        #[from]
        source: suzerain_db::DbError,
    },

    /// Resuming sessions failed.
    #[error("session error: {source}")]
    Session {
        /// The underlying session error.
        #[from]
        source: suzerain_core::SessionError,
    },

    /// NATS connection failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },
}
