//! Turn replenishment: the daily top-up of every player's turn allowance.
//!
//! Runs on its own schedule, independent of any session's scheduler. Each
//! run walks the `IN_PROGRESS` sessions one page of `turns.batch_size` at a
//! time, yielding to the runtime between pages. For each session it credits
//! `turns.daily_allotment` to every player, clamped at `turns.max_turns`,
//! in the durable store, then mirrors the new player states into the
//! projection. The session's registered slot is held throughout, so a
//! replenishment never interleaves with a tick or with the completion of
//! the same session.
//!
//! A failure on one session is logged and the run moves on; only a failure
//! to list sessions ends the run early.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use suzerain_types::{PlayerId, PlayerState, SessionId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::scheduler::SchedulerRegistry;
use crate::store::StoreError;
use crate::sync::{self, FIELD_PLAYERS, FIELD_UPDATED_AT};

/// Totals from one replenishment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplenishReport {
    /// Sessions whose players were credited.
    pub sessions: usize,
    /// Player states updated across those sessions.
    pub players: usize,
    /// Sessions skipped because a store call failed.
    pub failed: usize,
}

/// The periodic turn-replenishment job.
pub struct TurnReplenisher {
    ctx: Context,
    registry: Arc<SchedulerRegistry>,
}

impl TurnReplenisher {
    /// A replenisher that coordinates with the schedulers in `registry`.
    pub const fn new(ctx: Context, registry: Arc<SchedulerRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// One pass over every `IN_PROGRESS` session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if a page of session IDs cannot be listed.
    /// Per-session failures are counted in the report instead.
    pub async fn run_once(&self) -> Result<ReplenishReport, StoreError> {
        let batch_size = self.ctx.config.turns.batch_size;
        let page_len = usize::try_from(batch_size).unwrap_or(usize::MAX);
        let mut report = ReplenishReport::default();
        let mut after = None;

        loop {
            let page =
                sync::durable(&self.ctx, self.ctx.durable.list_in_progress(after, batch_size))
                    .await?;
            let Some(last) = page.last().copied() else {
                break;
            };

            for session_id in page.iter().copied() {
                match self.replenish_session(session_id).await {
                    Ok(0) => {}
                    Ok(players) => {
                        report.sessions = report.sessions.saturating_add(1);
                        report.players = report.players.saturating_add(players);
                    }
                    Err(e) => {
                        report.failed = report.failed.saturating_add(1);
                        warn!(
                            session_id = %session_id,
                            error = %e,
                            "Replenishment skipped session"
                        );
                    }
                }
            }

            if page.len() < page_len {
                break;
            }
            after = Some(last);
            tokio::task::yield_now().await;
        }

        info!(
            sessions = report.sessions,
            players = report.players,
            failed = report.failed,
            "Turn replenishment complete"
        );
        Ok(report)
    }

    async fn replenish_session(&self, session_id: SessionId) -> Result<usize, StoreError> {
        let turns = &self.ctx.config.turns;
        let slot = self.registry.slot(session_id).await;
        let mut guard = slot.lock().await;

        let players = sync::durable(
            &self.ctx,
            self.ctx
                .durable
                .replenish_turns(session_id, turns.daily_allotment, turns.max_turns),
        )
        .await?;
        if players.is_empty() {
            return Ok(0);
        }

        let count = players.len();
        let by_id: BTreeMap<PlayerId, PlayerState> =
            players.into_iter().map(|p| (p.player_id, p)).collect();
        match sync::encode_players(&by_id) {
            Ok(encoded) => {
                let mirrored =
                    sync::write_field(&self.ctx, &mut guard, session_id, FIELD_PLAYERS, &encoded)
                        .await;
                if mirrored {
                    let now = Utc::now().to_rfc3339();
                    sync::write_field(&self.ctx, &mut guard, session_id, FIELD_UPDATED_AT, &now)
                        .await;
                }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Player encode failed; marking stale");
                guard.projection_stale = true;
            }
        }

        debug!(session_id = %session_id, players = count, "Turns replenished");
        Ok(count)
    }

    /// Run [`Self::run_once`] every `turns.replenish_interval_secs` until
    /// `stop` flips to `true` (or its sender is dropped).
    ///
    /// The first run happens one interval after spawning.
    pub fn spawn(self, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.ctx.config.turns.replenish_interval();
            let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
            let mut ticker = tokio::time::interval_at(first, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                interval_secs = self.ctx.config.turns.replenish_interval_secs,
                "Turn replenisher started"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.run_once().await {
                    error!(error = %e, "Turn replenishment run aborted");
                }
            }

            info!("Turn replenisher stopped");
        })
    }
}
