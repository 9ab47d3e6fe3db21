//! Store trait implementations over the data layer.
//!
//! [`PgDurableStore`] maps each [`DurableStore`] call onto
//! [`SessionStore`]/[`ActionStore`] queries; [`DragonflyProjectionStore`]
//! maps [`EphemeralStore`] onto `Dragonfly` hash commands. Both translate
//! [`DbError`] into [`StoreError`] so the core never sees the data layer's
//! types.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suzerain_core::store::{DurableStore, EphemeralStore, StoreError, StoreKind};
use suzerain_db::{ActionStore, DbError, DragonflyPool, PostgresPool, SessionStore};
use suzerain_types::{
    Action, ActionId, ActionOutcome, Phase, PlayerState, Session, SessionId,
};

/// Translate a data-layer error for the given store.
///
/// Decode failures (bad enum text, out-of-range integers, unparseable JSON)
/// mean the stored data is wrong rather than the backend being down.
fn store_error(store: StoreKind, error: DbError) -> StoreError {
    match error {
        DbError::InvalidValue(_) | DbError::OutOfRange { .. } | DbError::Serialization(_) => {
            StoreError::Corrupt {
                message: error.to_string(),
            }
        }
        DbError::Postgres(_)
        | DbError::Migration(_)
        | DbError::Dragonfly(_)
        | DbError::Config(_) => StoreError::Unavailable {
            store,
            message: error.to_string(),
        },
    }
}

fn durable(error: DbError) -> StoreError {
    store_error(StoreKind::Durable, error)
}

fn ephemeral(error: DbError) -> StoreError {
    store_error(StoreKind::Ephemeral, error)
}

/// [`DurableStore`] backed by `PostgreSQL`.
pub struct PgDurableStore {
    pool: PostgresPool,
}

impl PgDurableStore {
    /// Wrap a connected, migrated pool.
    pub const fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }

    fn sessions(&self) -> SessionStore<'_> {
        SessionStore::new(self.pool.pool())
    }

    fn actions(&self) -> ActionStore<'_> {
        ActionStore::new(self.pool.pool())
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn insert_session(
        &self,
        session: &Session,
        players: &[PlayerState],
    ) -> Result<(), StoreError> {
        self.sessions().insert(session, players).await.map_err(durable)
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Option<Session>, StoreError> {
        self.sessions().get(session_id).await.map_err(durable)
    }

    async fn update_session_progress(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.sessions()
            .update_progress(session_id, cycle, phase, at)
            .await
            .map_err(durable)
    }

    async fn complete_session(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.sessions().complete(session_id, at).await.map_err(durable)
    }

    async fn list_in_progress(
        &self,
        after: Option<SessionId>,
        limit: u32,
    ) -> Result<Vec<SessionId>, StoreError> {
        self.sessions()
            .list_in_progress(after, limit)
            .await
            .map_err(durable)
    }

    async fn get_players(&self, session_id: SessionId) -> Result<Vec<PlayerState>, StoreError> {
        self.sessions().players(session_id).await.map_err(durable)
    }

    async fn save_player(
        &self,
        session_id: SessionId,
        player: &PlayerState,
    ) -> Result<(), StoreError> {
        self.sessions()
            .save_player(session_id, player)
            .await
            .map_err(durable)
    }

    async fn replenish_turns(
        &self,
        session_id: SessionId,
        allotment: u32,
        max_turns: u32,
    ) -> Result<Vec<PlayerState>, StoreError> {
        self.sessions()
            .replenish_turns(session_id, allotment, max_turns)
            .await
            .map_err(durable)
    }

    async fn insert_action(&self, action: &Action) -> Result<(), StoreError> {
        self.actions().insert(action).await.map_err(durable)
    }

    async fn pending_actions(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
    ) -> Result<Vec<Action>, StoreError> {
        self.actions()
            .pending(session_id, cycle, phase)
            .await
            .map_err(durable)
    }

    async fn claim_action(&self, action_id: ActionId) -> Result<bool, StoreError> {
        self.actions().claim(action_id).await.map_err(durable)
    }

    async fn complete_action(
        &self,
        action_id: ActionId,
        outcome: &ActionOutcome,
        player: Option<&PlayerState>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.actions()
            .complete(action_id, outcome, player, at)
            .await
            .map_err(durable)
    }

    async fn fail_action(
        &self,
        action_id: ActionId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.actions().fail(action_id, error, at).await.map_err(durable)
    }

    async fn fail_interrupted(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActionId>, StoreError> {
        self.actions()
            .fail_interrupted(session_id, cycle, phase, error, at)
            .await
            .map_err(durable)
    }

    async fn get_action(&self, action_id: ActionId) -> Result<Option<Action>, StoreError> {
        self.actions().get(action_id).await.map_err(durable)
    }
}

/// [`EphemeralStore`] backed by `Dragonfly` hashes.
pub struct DragonflyProjectionStore {
    pool: DragonflyPool,
}

impl DragonflyProjectionStore {
    /// Wrap a connected client.
    pub const fn new(pool: DragonflyPool) -> Self {
        Self { pool }
    }

    /// Close the connection.
    pub async fn close(&self) {
        if let Err(e) = self.pool.close().await {
            tracing::warn!(error = %e, "Dragonfly close failed");
        }
    }
}

#[async_trait]
impl EphemeralStore for DragonflyProjectionStore {
    async fn read_fields(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.pool.read_fields(key).await.map_err(ephemeral)
    }

    async fn write_field(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.pool.write_field(key, field, value).await.map_err(ephemeral)
    }

    async fn delete_key(&self, key: &str) -> Result<(), StoreError> {
        self.pool.delete_key(key).await.map_err(ephemeral)
    }
}
