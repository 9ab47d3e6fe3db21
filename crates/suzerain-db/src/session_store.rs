//! Session and player-state persistence.
//!
//! The `game_sessions` row carries the cycle counter and phase marker the
//! scheduler advances; `player_states` holds one row per participant. Both
//! are authoritative: the `Dragonfly` projection is rebuilt from them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use suzerain_types::{
    Phase, PlayerId, PlayerState, ResourceLedger, Session, SessionId, SessionStatus,
};
use uuid::Uuid;

use crate::error::DbError;

/// Operations on the `game_sessions` and `player_states` tables.
pub struct SessionStore<'a> {
    pool: &'a PgPool,
}

impl<'a> SessionStore<'a> {
    /// Create a new session store bound to a connection pool.
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a session together with its initial player states.
    ///
    /// Runs in one transaction so a session is never visible without its
    /// players.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the insert fails (including a
    /// duplicate session ID).
    pub async fn insert(&self, session: &Session, players: &[PlayerState]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let player_ids: Vec<Uuid> = session.players.iter().map(|p| p.into_inner()).collect();
        sqlx::query(
            r"INSERT INTO game_sessions (id, status, started_at, current_cycle, total_cycles, player_ids, current_phase, updated_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(session.id.into_inner())
        .bind(session.status.as_str())
        .bind(session.started_at)
        .bind(DbError::to_i64("current_cycle", session.current_cycle)?)
        .bind(DbError::to_i64("total_cycles", session.total_cycles)?)
        .bind(&player_ids)
        .bind(session.current_phase.as_str())
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;

        for player in players {
            let row = PlayerColumns::encode(player)?;
            sqlx::query(
                r"INSERT INTO player_states (session_id, player_id, remaining_turns, resources, territories, units, achievements, last_action_at)
                  VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(session.id.into_inner())
            .bind(player.player_id.into_inner())
            .bind(row.remaining_turns)
            .bind(row.resources)
            .bind(row.territories)
            .bind(row.units)
            .bind(row.achievements)
            .bind(player.last_action_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            session_id = %session.id,
            players = players.len(),
            "Inserted session"
        );
        Ok(())
    }

    /// Fetch a session by ID.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails, or
    /// [`DbError::InvalidValue`]/[`DbError::OutOfRange`] if the row holds
    /// values the domain types reject.
    pub async fn get(&self, session_id: SessionId) -> Result<Option<Session>, DbError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r"SELECT id, status, started_at, current_cycle, total_cycles, player_ids, current_phase, updated_at
              FROM game_sessions
              WHERE id = $1",
        )
        .bind(session_id.into_inner())
        .fetch_optional(self.pool)
        .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Record the cycle and phase a running session has reached.
    ///
    /// Only sessions still `IN_PROGRESS` are touched. Returns `false` when
    /// the session is missing or already completed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn update_progress(
        &self,
        session_id: SessionId,
        cycle: u64,
        phase: Phase,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE game_sessions
              SET current_cycle = $2, current_phase = $3, updated_at = $4
              WHERE id = $1 AND status = 'IN_PROGRESS'",
        )
        .bind(session_id.into_inner())
        .bind(DbError::to_i64("current_cycle", cycle)?)
        .bind(phase.as_str())
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a session `COMPLETED`.
    ///
    /// Returns `true` only for the call that performed the transition;
    /// completing an already-completed session is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the update fails.
    pub async fn complete(
        &self,
        session_id: SessionId,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r"UPDATE game_sessions
              SET status = 'COMPLETED', ended_at = $2, updated_at = $2
              WHERE id = $1 AND status <> 'COMPLETED'",
        )
        .bind(session_id.into_inner())
        .bind(at)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// List `IN_PROGRESS` session IDs in ID order, starting after `after`.
    ///
    /// Keyset pagination: pass the last ID of the previous page to get the
    /// next one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Postgres`] if the query fails.
    pub async fn list_in_progress(
        &self,
        after: Option<SessionId>,
        limit: u32,
    ) -> Result<Vec<SessionId>, DbError> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            r"SELECT id FROM game_sessions
              WHERE status = 'IN_PROGRESS' AND ($1::UUID IS NULL OR id > $1)
              ORDER BY id
              LIMIT $2",
        )
        .bind(after.map(SessionId::into_inner))
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        Ok(ids.into_iter().map(|(id,)| SessionId::from(id)).collect())
    }

    /// Fetch every player state for a session, ordered by player ID.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a row cannot be decoded.
    pub async fn players(&self, session_id: SessionId) -> Result<Vec<PlayerState>, DbError> {
        let rows = sqlx::query_as::<_, PlayerRow>(
            r"SELECT player_id, remaining_turns, resources, territories, units, achievements, last_action_at
              FROM player_states
              WHERE session_id = $1
              ORDER BY player_id",
        )
        .bind(session_id.into_inner())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(PlayerRow::into_player).collect()
    }

    /// Write one player's full state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if encoding or the upsert fails.
    pub async fn save_player(
        &self,
        session_id: SessionId,
        player: &PlayerState,
    ) -> Result<(), DbError> {
        upsert_player(self.pool, session_id, player).await
    }

    /// Credit `allotment` turns to every player of a session, clamped at
    /// `max_turns`, and return the updated states.
    ///
    /// The clamp runs in SQL so concurrent writers cannot push a player past
    /// the cap.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails or a row cannot be decoded.
    pub async fn replenish_turns(
        &self,
        session_id: SessionId,
        allotment: u32,
        max_turns: u32,
    ) -> Result<Vec<PlayerState>, DbError> {
        let rows = sqlx::query_as::<_, PlayerRow>(
            r"UPDATE player_states
              SET remaining_turns = LEAST(remaining_turns::BIGINT + $2, $3)::INTEGER
              WHERE session_id = $1
                AND EXISTS (
                    SELECT 1 FROM game_sessions
                    WHERE id = $1 AND status = 'IN_PROGRESS'
                )
              RETURNING player_id, remaining_turns, resources, territories, units, achievements, last_action_at",
        )
        .bind(session_id.into_inner())
        .bind(i64::from(allotment))
        .bind(i64::from(max_turns))
        .fetch_all(self.pool)
        .await?;

        let mut players = rows
            .into_iter()
            .map(PlayerRow::into_player)
            .collect::<Result<Vec<_>, _>>()?;
        players.sort_by_key(|p| p.player_id);

        tracing::debug!(
            session_id = %session_id,
            players = players.len(),
            allotment,
            max_turns,
            "Replenished turns"
        );
        Ok(players)
    }
}

/// A row from the `game_sessions` table.
///
/// Uses runtime types rather than compile-time checked types to
/// avoid requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    /// Session ID.
    pub id: Uuid,
    /// Status text (`PENDING`, `IN_PROGRESS`, `COMPLETED`).
    pub status: String,
    /// Start timestamp.
    pub started_at: DateTime<Utc>,
    /// Next cycle to run.
    pub current_cycle: i64,
    /// Cycle budget.
    pub total_cycles: i64,
    /// Participants in join order.
    pub player_ids: Vec<Uuid>,
    /// Phase text.
    pub current_phase: String,
    /// Last progress timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SessionRow {
    /// Decode into the domain [`Session`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a text or counter column is out of domain.
    pub fn into_session(self) -> Result<Session, DbError> {
        Ok(Session {
            id: SessionId::from(self.id),
            status: self.status.parse::<SessionStatus>()?,
            started_at: self.started_at,
            current_cycle: DbError::to_u64("current_cycle", self.current_cycle)?,
            total_cycles: DbError::to_u64("total_cycles", self.total_cycles)?,
            players: self.player_ids.into_iter().map(PlayerId::from).collect(),
            current_phase: self.current_phase.parse::<Phase>()?,
            updated_at: self.updated_at,
        })
    }
}

/// A row from the `player_states` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PlayerRow {
    /// Player ID.
    pub player_id: Uuid,
    /// Turns left.
    pub remaining_turns: i32,
    /// Resource ledger as JSON.
    pub resources: serde_json::Value,
    /// Territory list as JSON.
    pub territories: serde_json::Value,
    /// Unit counts as JSON.
    pub units: serde_json::Value,
    /// Achievement list as JSON.
    pub achievements: serde_json::Value,
    /// Last completed action time.
    pub last_action_at: Option<DateTime<Utc>>,
}

impl PlayerRow {
    /// Decode into the domain [`PlayerState`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a JSON column does not match its shape or the
    /// turn count is negative.
    pub fn into_player(self) -> Result<PlayerState, DbError> {
        let resources: ResourceLedger = serde_json::from_value(self.resources)?;
        let territories: BTreeSet<String> = serde_json::from_value(self.territories)?;
        let units: BTreeMap<String, u64> = serde_json::from_value(self.units)?;
        let achievements: BTreeSet<String> = serde_json::from_value(self.achievements)?;

        Ok(PlayerState {
            player_id: PlayerId::from(self.player_id),
            remaining_turns: DbError::to_u32("remaining_turns", self.remaining_turns)?,
            resources,
            territories,
            units,
            achievements,
            last_action_at: self.last_action_at,
        })
    }
}

/// Upsert one player's row on any executor, so callers can include it in
/// a wider transaction.
pub(crate) async fn upsert_player<'e, E>(
    executor: E,
    session_id: SessionId,
    player: &PlayerState,
) -> Result<(), DbError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let row = PlayerColumns::encode(player)?;
    sqlx::query(
        r"INSERT INTO player_states (session_id, player_id, remaining_turns, resources, territories, units, achievements, last_action_at)
          VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
          ON CONFLICT (session_id, player_id) DO UPDATE SET
              remaining_turns = EXCLUDED.remaining_turns,
              resources = EXCLUDED.resources,
              territories = EXCLUDED.territories,
              units = EXCLUDED.units,
              achievements = EXCLUDED.achievements,
              last_action_at = EXCLUDED.last_action_at",
    )
    .bind(session_id.into_inner())
    .bind(player.player_id.into_inner())
    .bind(row.remaining_turns)
    .bind(row.resources)
    .bind(row.territories)
    .bind(row.units)
    .bind(row.achievements)
    .bind(player.last_action_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Bind-ready column values for one player.
struct PlayerColumns {
    remaining_turns: i32,
    resources: serde_json::Value,
    territories: serde_json::Value,
    units: serde_json::Value,
    achievements: serde_json::Value,
}

impl PlayerColumns {
    fn encode(player: &PlayerState) -> Result<Self, DbError> {
        Ok(Self {
            remaining_turns: DbError::to_i32("remaining_turns", player.remaining_turns)?,
            resources: serde_json::to_value(player.resources)?,
            territories: serde_json::to_value(&player.territories)?,
            units: serde_json::to_value(&player.units)?,
            achievements: serde_json::to_value(&player.achievements)?,
        })
    }
}
