//! Data layer for the Suzerain cycle engine (`Dragonfly` + `PostgreSQL`).
//!
//! `PostgreSQL` is the durable store and the source of truth. `Dragonfly`
//! holds a per-session projection for low-latency reads; it may be lost or
//! fall behind at any time and is rebuilt from `PostgreSQL`.
//!
//! # Architecture
//!
//! ```text
//! Cycle Scheduler
//!     |
//!     +-- Critical writes -----> PostgreSQL (PostgresPool)
//!     |     |-- SessionStore   (sessions, player states, replenishment)
//!     |     +-- ActionStore    (queued actions, claim/complete/fail)
//!     |
//!     +-- Best-effort mirror --> Dragonfly (DragonflyPool)
//!           +-- session:{id}:projection (hash)
//! ```
//!
//! # Modules
//!
//! - [`dragonfly`] -- `Dragonfly` projection hash operations
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`session_store`] -- Session and player-state queries
//! - [`action_store`] -- Action queue queries and status transitions
//! - [`error`] -- Shared error types

pub mod action_store;
pub mod dragonfly;
pub mod error;
pub mod postgres;
pub mod session_store;

// Re-export primary types for convenience.
pub use action_store::{ActionRow, ActionStore};
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use session_store::{PlayerRow, SessionRow, SessionStore};
