//! Store and event-bus seams.
//!
//! The engine talks to its backends only through these traits:
//!
//! - [`DurableStore`] -- the authoritative record of sessions, player
//!   states, and actions. Every write on the tick's critical path goes here
//!   first.
//! - [`EphemeralStore`] -- a key/field hash holding the per-session
//!   projection. Best effort: it may be empty, stale, or unreachable.
//! - [`EventBus`] -- fire-and-forget lifecycle notifications.
//!
//! Production implementations live in the engine binary (`PostgreSQL`,
//! `Dragonfly`, NATS); [`crate::memory`] provides in-process ones.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suzerain_types::{
    Action, ActionId, ActionOutcome, LifecycleEvent, Phase, PlayerState, Session, SessionId,
};

/// Which backend a [`StoreError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// The durable store.
    Durable,
    /// The ephemeral projection store.
    Ephemeral,
}

impl core::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Durable => f.write_str("durable"),
            Self::Ephemeral => f.write_str("ephemeral"),
        }
    }
}

/// Errors returned by store implementations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("{store} store unavailable: {message}")]
    Unavailable {
        /// Backend that failed.
        store: StoreKind,
        /// Backend error text.
        message: String,
    },

    /// The call did not finish within the configured bound.
    #[error("{store} store timed out after {ms}ms")]
    Timeout {
        /// Backend that timed out.
        store: StoreKind,
        /// The bound that was exceeded.
        ms: u64,
    },

    /// The backend returned data the domain types reject.
    #[error("corrupt stored data: {message}")]
    Corrupt {
        /// What failed to decode.
        message: String,
    },
}

impl StoreError {
    /// Shorthand for a durable-store outage.
    pub fn durable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            store: StoreKind::Durable,
            message: message.into(),
        }
    }

    /// Shorthand for an ephemeral-store outage.
    pub fn ephemeral(message: impl Into<String>) -> Self {
        Self::Unavailable {
            store: StoreKind::Ephemeral,
            message: message.into(),
        }
    }
}

/// The authoritative store.
///
/// Every method is scoped by session or action identity, so schedulers for
/// different sessions never contend on the same rows.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist a new session with its initial player states, atomically.
    async fn insert_session(
        &self,
        session: &Session,
        players: &[PlayerState],
    ) -> Result<(), StoreError>;

    /// Fetch a session record.
    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError>;

    /// Record the cycle and phase an `IN_PROGRESS` session has reached.
    ///
    /// Returns `false` if the session is missing or no longer in progress.
    async fn update_session_progress(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark a session `COMPLETED`.
    ///
    /// Returns `true` only for the call that performed the transition.
    async fn complete_session(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// One page of `IN_PROGRESS` session IDs, ascending, strictly after
    /// `after`.
    async fn list_in_progress(
        &self,
        after: Option<SessionId>,
        limit: u32,
    ) -> Result<Vec<SessionId>, StoreError>;

    /// All player states of a session.
    async fn get_players(&self, session_id: SessionId) -> Result<Vec<PlayerState>, StoreError>;

    /// Overwrite one player's state.
    async fn save_player(
        &self,
        session_id: SessionId,
        player: &PlayerState,
    ) -> Result<(), StoreError>;

    /// Credit `allotment` turns to every player of a session, clamped at
    /// `max_turns`, returning the updated states.
    ///
    /// Sessions that are missing or no longer in progress are left alone
    /// and yield an empty list.
    async fn replenish_turns(
        &self,
        session_id: SessionId,
        allotment: u32,
        max_turns: u32,
    ) -> Result<Vec<PlayerState>, StoreError>;

    /// Queue an action (the submission seam).
    async fn insert_action(&self, action: &Action) -> Result<(), StoreError>;

    /// `pending` actions for one session, cycle, and phase.
    ///
    /// Implementations should return them in dispatch order, but callers
    /// sort anyway.
    async fn pending_actions(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
    ) -> Result<Vec<Action>, StoreError>;

    /// `pending -> processing`. Returns `false` if the action was not
    /// pending.
    async fn claim_action(&self, action_id: ActionId) -> Result<bool, StoreError>;

    /// `processing -> completed`, attaching the outcome.
    ///
    /// `player` is the acting player's state with the outcome already
    /// merged. It is saved in the same atomic write as the status change,
    /// so a completed action never exists without its effect. Nothing is
    /// written when the action is not `processing`.
    async fn complete_action(
        &self,
        action_id: ActionId,
        outcome: &ActionOutcome,
        player: Option<&PlayerState>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `processing -> failed`, attaching the error description.
    async fn fail_action(
        &self,
        action_id: ActionId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `processing -> failed` for every action of one session, cycle, and
    /// phase still left `processing`, returning their IDs.
    ///
    /// Only the session's own scheduler moves actions through `processing`,
    /// so anything found here was abandoned by an aborted tick.
    async fn fail_interrupted(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActionId>, StoreError>;

    /// Fetch one action.
    async fn get_action(&self, action_id: ActionId) -> Result<Option<Action>, StoreError>;
}

/// A key/field hash store for projections.
#[async_trait]
pub trait EphemeralStore: Send + Sync {
    /// Every field under `key`; empty if the key does not exist.
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Set one field under `key`.
    async fn write_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Remove `key` and all its fields. Missing keys are not an error.
    async fn delete_key(&self, key: &str) -> Result<(), StoreError>;
}

/// Fire-and-forget lifecycle notifications.
///
/// Publishing never fails from the caller's point of view; implementations
/// log delivery problems themselves.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event.
    async fn publish(&self, event: &LifecycleEvent);
}
