//! Session lifecycle: start, end, resume.
//!
//! The [`SessionManager`] owns the [`SchedulerRegistry`]. Starting a
//! session persists it durably, seeds its projection, and registers a
//! scheduler; ending one stops that scheduler, then completes the session
//! durably and drops its projection.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use suzerain_types::{
    LifecycleEvent, PlayerId, PlayerState, Session, SessionId, SessionProjection, SessionStatus,
};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::scheduler::{CycleScheduler, SchedulerRegistry};
use crate::store::StoreError;
use crate::sync::{self, SessionSlot};

/// Errors from session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The distinct participant count is outside the configured bounds.
    #[error("a session needs {min}..={max} distinct players, got {count}")]
    InvalidParticipantCount {
        /// Distinct players supplied.
        count: usize,
        /// Configured minimum.
        min: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No session with this ID exists.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// A durable-store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Mark a session completed, drop its projection, and announce it.
///
/// `SessionComplete` is published only by the call that performs the
/// transition. The projection is deleted on every call so a retry can clean
/// up after a cache outage. Returns whether this call performed the
/// transition.
///
/// # Errors
///
/// Returns [`StoreError`] if the durable update fails; nothing else has
/// happened in that case.
pub(crate) async fn finalize_session(
    ctx: &Context,
    session_id: SessionId,
) -> Result<bool, StoreError> {
    let now = Utc::now();
    let transitioned = sync::durable(ctx, ctx.durable.complete_session(session_id, now)).await?;
    sync::drop_projection(ctx, session_id).await;

    if transitioned {
        ctx.events
            .publish(&LifecycleEvent::SessionComplete {
                session_id,
                timestamp: now,
            })
            .await;
        info!(session_id = %session_id, "Session completed");
    } else {
        debug!(session_id = %session_id, "Session already completed");
    }
    Ok(transitioned)
}

/// Creates, resumes, and terminates sessions.
pub struct SessionManager {
    ctx: Context,
    registry: Arc<SchedulerRegistry>,
}

impl SessionManager {
    /// A manager with an empty scheduler registry.
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            registry: Arc::new(SchedulerRegistry::new()),
        }
    }

    /// The registry of running schedulers.
    pub const fn registry(&self) -> &Arc<SchedulerRegistry> {
        &self.registry
    }

    /// The shared context.
    pub const fn context(&self) -> &Context {
        &self.ctx
    }

    /// Start a session for the given players.
    ///
    /// Duplicate IDs collapse (first appearance wins the ordering). Every
    /// participant starts with the configured resources and a full turn
    /// allowance. The session is persisted before anything else happens; the
    /// initial projection write is best effort.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidParticipantCount`] if the distinct player
    ///   count is outside `session.min_players..=session.max_players`.
    /// - [`SessionError::Store`] if the durable insert fails. No scheduler is
    ///   started in that case.
    pub async fn start_session(&self, player_ids: &[PlayerId]) -> Result<SessionId, SessionError> {
        let mut seen = HashSet::with_capacity(player_ids.len());
        let players: Vec<PlayerId> = player_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();

        let bounds = &self.ctx.config.session;
        if players.len() < bounds.min_players || players.len() > bounds.max_players {
            return Err(SessionError::InvalidParticipantCount {
                count: players.len(),
                min: bounds.min_players,
                max: bounds.max_players,
            });
        }

        let session = Session::start(players, self.ctx.config.cycle.total_cycles, Utc::now());
        let resources = self.ctx.config.starting.resources;
        let max_turns = self.ctx.config.turns.max_turns;
        let states: Vec<PlayerState> = session
            .players
            .iter()
            .map(|id| PlayerState::new(*id, resources, max_turns))
            .collect();

        sync::durable(&self.ctx, self.ctx.durable.insert_session(&session, &states)).await?;

        let slot = self.registry.slot(session.id).await;
        {
            let mut guard = slot.lock().await;
            let projection = SessionProjection::from_durable(&session, states);
            if sync::write_projection(&self.ctx, &mut guard, session.id, &projection).await {
                guard.projection_stale = false;
            }
        }
        self.launch(&session, slot).await;

        info!(
            session_id = %session.id,
            players = session.players.len(),
            total_cycles = session.total_cycles,
            "Session started"
        );
        Ok(session.id)
    }

    /// End a session.
    ///
    /// Stops its scheduler (an in-flight tick finishes first), marks it
    /// completed, deletes its projection, and publishes `SessionComplete`
    /// if this call performed the transition. Calling it again is a no-op.
    ///
    /// The session's slot is held from before the durable completion until
    /// the projection is gone, so a concurrent replenishment either lands
    /// first or finds the session completed.
    ///
    /// # Errors
    ///
    /// - [`SessionError::SessionNotFound`] for an unknown ID.
    /// - [`SessionError::Store`] if a durable call fails; the call can be
    ///   retried.
    pub async fn end_session(&self, session_id: SessionId) -> Result<(), SessionError> {
        if sync::durable(&self.ctx, self.ctx.durable.get_session(session_id))
            .await?
            .is_none()
        {
            return Err(SessionError::SessionNotFound(session_id));
        }

        let slot = self.registry.slot(session_id).await;
        if self.registry.stop(session_id).await {
            debug!(session_id = %session_id, "Scheduler stopped for session end");
        }

        let _guard = slot.lock().await;
        finalize_session(&self.ctx, session_id).await?;
        self.registry.release(session_id, &slot).await;
        Ok(())
    }

    /// Start schedulers for every `IN_PROGRESS` session in the durable
    /// store that does not already have one.
    ///
    /// Resumed sessions get a stale slot, so their projections are rebuilt
    /// from the durable store on the first tick. Returns the number of schedulers started.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if listing sessions fails. Sessions
    /// resumed before the failure keep running.
    pub async fn resume_in_progress(&self) -> Result<usize, SessionError> {
        let limit = self.ctx.config.turns.batch_size;
        let mut after = None;
        let mut resumed: usize = 0;

        loop {
            let page =
                sync::durable(&self.ctx, self.ctx.durable.list_in_progress(after, limit)).await?;
            let Some(last) = page.last().copied() else {
                break;
            };

            for session_id in page.iter().copied() {
                if self.registry.is_running(session_id).await {
                    continue;
                }
                match sync::durable(&self.ctx, self.ctx.durable.get_session(session_id)).await {
                    Ok(Some(session)) if session.status == SessionStatus::InProgress => {
                        let slot = self.registry.slot(session_id).await;
                        if self.launch(&session, slot).await {
                            resumed = resumed.saturating_add(1);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            session_id = %session_id,
                            error = %e,
                            "Could not load session to resume"
                        );
                    }
                }
            }

            if page.len() < usize::try_from(limit).unwrap_or(usize::MAX) {
                break;
            }
            after = Some(last);
        }

        info!(resumed, "Resumed in-progress sessions");
        Ok(resumed)
    }

    /// Stop every scheduler without ending any session.
    pub async fn shutdown(&self) {
        let active = self.registry.active().await.len();
        self.registry.stop_all().await;
        info!(stopped = active, "All schedulers stopped");
    }

    /// The durable session record.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] or [`SessionError::Store`].
    pub async fn session(&self, session_id: SessionId) -> Result<Session, SessionError> {
        sync::durable(&self.ctx, self.ctx.durable.get_session(session_id))
            .await?
            .ok_or(SessionError::SessionNotFound(session_id))
    }

    /// The session's projection, from the cache when it is readable and
    /// from the durable store otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SessionNotFound`] or [`SessionError::Store`].
    pub async fn projection(
        &self,
        session_id: SessionId,
    ) -> Result<SessionProjection, SessionError> {
        if let Some(projection) = sync::read_projection(&self.ctx, session_id).await {
            return Ok(projection);
        }
        let session = self.session(session_id).await?;
        let players = sync::durable(&self.ctx, self.ctx.durable.get_players(session_id)).await?;
        Ok(SessionProjection::from_durable(&session, players))
    }

    async fn launch(&self, session: &Session, slot: Arc<SessionSlot>) -> bool {
        let scheduler =
            CycleScheduler::new(self.ctx.clone(), session.id, session.total_cycles, slot);
        let started = self.registry.spawn(scheduler).await;
        if !started {
            warn!(session_id = %session.id, "Scheduler already running; not starting another");
        }
        started
    }
}
