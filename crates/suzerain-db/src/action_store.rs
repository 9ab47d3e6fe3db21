//! Queued action persistence.
//!
//! Actions arrive from the submission service as `pending` rows and move
//! forward exactly once: `pending -> processing -> completed | failed`.
//! Each transition is a conditional `UPDATE` on the current status, so two
//! executors racing on the same row cannot both win.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use suzerain_types::{
    Action, ActionId, ActionOutcome, ActionParameters, ActionStatus, ActionType, Phase, PlayerId,
    PlayerState, SessionId,
};
use uuid::Uuid;

use crate::error::DbError;
use crate::session_store::upsert_player;

/// Operations on the `game_actions` table.
pub struct ActionStore<'a> {
    pool: &'a PgPool,
}

impl<'a> ActionStore<'a> {
    /// Create a new action store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a queued action.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization or the insert fails.
    pub async fn insert(&self, action: &Action) -> Result<(), DbError> {
        let parameters = serde_json::to_value(&action.parameters)?;
        let result = action
            .result
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r"INSERT INTO game_actions (id, session_id, player_id, cycle, phase, action_type, parameters, status, created_at, completed_at, result, error)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(action.id.into_inner())
        .bind(action.session_id.into_inner())
        .bind(action.player_id.into_inner())
        .bind(DbError::to_i64("cycle", action.cycle)?)
        .bind(action.phase.as_str())
        .bind(action.action_type.as_str())
        .bind(parameters)
        .bind(action.status.as_str())
        .bind(action.created_at)
        .bind(action.completed_at)
        .bind(result)
        .bind(action.error.as_deref())
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the `pending` actions for one session, cycle, and phase in
    /// dispatch order (`created_at`, then `id`).
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row cannot be decoded.
    pub async fn pending(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
    ) -> Result<Vec<Action>, DbError> {
        let rows = sqlx::query_as::<_, ActionRow>(
            r"SELECT id, session_id, player_id, cycle, phase, action_type, parameters, status, created_at, completed_at, result, error
              FROM game_actions
              WHERE session_id = $1 AND cycle = $2 AND phase = $3 AND status = 'pending'
              ORDER BY created_at, id",
        )
        .bind(session_id.into_inner())
        .bind(DbError::to_i64("cycle", cycle)?)
        .bind(phase.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(ActionRow::into_action).collect()
    }

    /// Fetch one action by ID.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the row cannot be decoded.
    pub async fn get(&self, action_id: ActionId) -> Result<Option<Action>, DbError> {
        let row = sqlx::query_as::<_, ActionRow>(
            r"SELECT id, session_id, player_id, cycle, phase, action_type, parameters, status, created_at, completed_at, result, error
              FROM game_actions
              WHERE id = $1",
        )
        .bind(action_id.into_inner())
        .fetch_optional(self.pool)
        .await?;

        row.map(ActionRow::into_action).transpose()
    }

    /// Move an action from `pending` to `processing`.
    ///
    /// Returns `false` if the action was not `pending` (someone else
    /// claimed it, or it never existed).
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn claim(&self, action_id: ActionId) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE game_actions SET status = 'processing'
              WHERE id = $1 AND status = 'pending'",
        )
        .bind(action_id.into_inner())
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Move a `processing` action to `completed` with its result payload,
    /// saving the acting player's merged state in the same transaction.
    ///
    /// Returns `false`, and writes nothing, if the action was not
    /// `processing`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if serialization, either write, or the commit
    /// fails. The transaction is rolled back in that case.
    pub async fn complete(
        &self,
        action_id: ActionId,
        outcome: &ActionOutcome,
        player: Option<&PlayerState>,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let payload = serde_json::to_value(outcome)?;
        let mut tx = self.pool.begin().await?;

        let session_id = sqlx::query_scalar::<_, Uuid>(
            r"UPDATE game_actions
              SET status = 'completed', result = $2, completed_at = $3
              WHERE id = $1 AND status = 'processing'
              RETURNING session_id",
        )
        .bind(action_id.into_inner())
        .bind(payload)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(session_id) = session_id else {
            tx.rollback().await?;
            return Ok(false);
        };
        if let Some(player) = player {
            upsert_player(&mut *tx, SessionId::from(session_id), player).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    /// Move a `processing` action to `failed` with an error description.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn fail(
        &self,
        action_id: ActionId,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE game_actions
              SET status = 'failed', error = $2, completed_at = $3
              WHERE id = $1 AND status = 'processing'",
        )
        .bind(action_id.into_inner())
        .bind(error)
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Fail every action of one session, cycle, and phase still left
    /// `processing`, returning their IDs in dispatch order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the cycle does not fit the column or the
    /// update fails.
    pub async fn fail_interrupted(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActionId>, DbError> {
        let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r"UPDATE game_actions
              SET status = 'failed', error = $4, completed_at = $5
              WHERE session_id = $1 AND cycle = $2 AND phase = $3 AND status = 'processing'
              RETURNING id, created_at",
        )
        .bind(session_id.into_inner())
        .bind(DbError::to_i64("cycle", cycle)?)
        .bind(phase.as_str())
        .bind(error)
        .bind(at)
        .fetch_all(self.pool)
        .await?;

        let mut failed: Vec<(DateTime<Utc>, Uuid)> =
            rows.into_iter().map(|(id, created_at)| (created_at, id)).collect();
        failed.sort_unstable();
        Ok(failed.into_iter().map(|(_, id)| ActionId::from(id)).collect())
    }
}

/// A row from the `game_actions` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActionRow {
    /// Action ID.
    pub id: Uuid,
    /// Owning session.
    pub session_id: Uuid,
    /// Acting player.
    pub player_id: Uuid,
    /// Target cycle.
    pub cycle: i64,
    /// Target phase text.
    pub phase: String,
    /// Action type text.
    pub action_type: String,
    /// Typed parameters as JSON.
    pub parameters: serde_json::Value,
    /// Status text.
    pub status: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Terminal transition time.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result payload.
    pub result: Option<serde_json::Value>,
    /// Failure description.
    pub error: Option<String>,
}

impl ActionRow {
    /// Decode into the domain [`Action`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any column holds a value the domain rejects.
    pub fn into_action(self) -> Result<Action, DbError> {
        let parameters: ActionParameters = serde_json::from_value(self.parameters)?;
        let result = self
            .result
            .map(serde_json::from_value::<ActionOutcome>)
            .transpose()?;

        Ok(Action {
            id: ActionId::from(self.id),
            session_id: SessionId::from(self.session_id),
            player_id: PlayerId::from(self.player_id),
            cycle: DbError::to_u64("cycle", self.cycle)?,
            phase: self.phase.parse::<Phase>()?,
            action_type: self.action_type.parse::<ActionType>()?,
            parameters,
            status: self.status.parse::<ActionStatus>()?,
            created_at: self.created_at,
            completed_at: self.completed_at,
            result,
            error: self.error,
        })
    }
}
