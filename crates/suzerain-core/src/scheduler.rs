//! Cycle scheduler: one periodic driver per session.
//!
//! Each tick:
//!
//! 1. Reads the session's projection from the cache, rebuilding it from the
//!    durable store when it is missing, undecodable, or marked stale.
//! 2. Stops the session if its cycle index has reached the budget.
//! 3. Runs the remaining phases of the current cycle in order (all four,
//!    unless a previous tick aborted part-way), recording each phase in the
//!    durable store before processing it.
//! 4. Advances the cycle index (durable first, then cache) and publishes
//!    [`LifecycleEvent::CycleComplete`] with the new index. Reaching the
//!    budget here ends the session straight away.
//!
//! Ticks never overlap: the loop awaits a tick to completion before it
//! waits for the next interval, and a tick that overruns the interval
//! delays the next one instead of queueing a burst. A stop request is only
//! observed between ticks, so an in-flight tick always finishes.
//!
//! A tick that fails on a durable write is logged at `error` and leaves the
//! cycle where it was; the next tick retries it. Completing the session
//! once the budget is spent is retried the same way: the loop only exits
//! after the durable completion has landed.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use suzerain_types::{Cycle, LifecycleEvent, Phase, SessionId, SessionStatus};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::phase::process_phase;
use crate::session::finalize_session;
use crate::store::StoreError;
use crate::sync::{self, FIELD_CYCLE, FIELD_PHASE, FIELD_UPDATED_AT, SessionSlot, SlotState};

/// Errors that abort a tick.
#[derive(Debug, thiserror::Error)]
pub enum TickError {
    /// A durable read or write failed (or timed out).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The durable store has no record of the session.
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    /// The cycle counter cannot be incremented.
    #[error("cycle counter overflow for session {0}")]
    CycleOverflow(SessionId),
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The phases ran and the cycle index advanced.
    Advanced {
        /// The new cycle index.
        cycle: u64,
        /// What ran during the cycle that just finished.
        report: Cycle,
    },
    /// The cycle index had already reached the budget; nothing ran.
    BudgetReached,
    /// The session is no longer in progress; nothing more will run.
    Ended,
}

/// Run one tick for a session.
///
/// `budget` is the session's total cycle count. The caller must hold the
/// session's [`SessionSlot`] for the duration and pass its state in.
///
/// # Errors
///
/// Returns [`TickError`] if a durable-store call fails, the session is
/// unknown, or the cycle counter would overflow. Nothing is advanced in
/// that case.
pub async fn run_tick(
    ctx: &Context,
    session_id: SessionId,
    budget: u64,
    slot: &mut SlotState,
) -> Result<TickOutcome, TickError> {
    let cached = if slot.projection_stale {
        None
    } else {
        sync::read_projection(ctx, session_id).await
    };
    let mut projection = match cached {
        Some(projection) => projection,
        None => match sync::rebuild_projection(ctx, slot, session_id).await? {
            None => return Err(TickError::SessionNotFound(session_id)),
            Some(rebuilt) if rebuilt.session.status == SessionStatus::Completed => {
                return Ok(TickOutcome::Ended);
            }
            Some(rebuilt) => rebuilt.projection,
        },
    };

    if projection.cycle >= budget {
        return Ok(TickOutcome::BudgetReached);
    }

    let number = projection.cycle;
    let resume_from = projection.phase;
    let mut report = Cycle::begin(number, Utc::now());

    for phase in Phase::ALL.into_iter().skip_while(|p| *p != resume_from) {
        let now = Utc::now();
        let live = sync::durable(
            ctx,
            ctx.durable
                .update_session_progress(session_id, number, phase, now),
        )
        .await?;
        if !live {
            info!(session_id = %session_id, "Session no longer in progress; stopping");
            return Ok(TickOutcome::Ended);
        }
        projection.phase = phase;
        projection.updated_at = now;
        sync::write_field(ctx, slot, session_id, FIELD_PHASE, phase.as_str()).await;

        process_phase(ctx, session_id, &mut report, phase, &mut projection, slot).await?;
    }

    let next = number
        .checked_add(1)
        .ok_or(TickError::CycleOverflow(session_id))?;
    let now = Utc::now();
    let live = sync::durable(
        ctx,
        ctx.durable
            .update_session_progress(session_id, next, Phase::Preparation, now),
    )
    .await?;
    if !live {
        info!(session_id = %session_id, "Session no longer in progress; stopping");
        return Ok(TickOutcome::Ended);
    }

    projection.cycle = next;
    projection.phase = Phase::Preparation;
    projection.updated_at = now;
    let _ = sync::write_field(ctx, slot, session_id, FIELD_CYCLE, &next.to_string()).await
        && sync::write_field(ctx, slot, session_id, FIELD_PHASE, Phase::Preparation.as_str())
            .await
        && sync::write_field(ctx, slot, session_id, FIELD_UPDATED_AT, &now.to_rfc3339()).await;

    ctx.events
        .publish(&LifecycleEvent::CycleComplete {
            session_id,
            cycle_number: next,
            timestamp: now,
        })
        .await;

    info!(
        session_id = %session_id,
        cycle = next,
        completed = report.completed.len(),
        failed = report.failed.len(),
        "Cycle complete"
    );
    Ok(TickOutcome::Advanced {
        cycle: next,
        report,
    })
}

// ---------------------------------------------------------------------------
// Scheduler task
// ---------------------------------------------------------------------------

/// Lifecycle of a [`CycleScheduler`].
///
/// `Idle -> Running -> Stopped`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Built but not started.
    Idle,
    /// The periodic loop is live.
    Running,
    /// The loop has exited and will not run again.
    Stopped,
}

/// The periodic driver for one session.
pub struct CycleScheduler {
    ctx: Context,
    session_id: SessionId,
    budget: u64,
    slot: Arc<SessionSlot>,
    registration: Option<(Arc<SchedulerRegistry>, u64)>,
}

impl CycleScheduler {
    /// A scheduler for `session_id` that stops once `budget` cycles have
    /// run. `slot` must be the session's one shared slot.
    pub const fn new(
        ctx: Context,
        session_id: SessionId,
        budget: u64,
        slot: Arc<SessionSlot>,
    ) -> Self {
        Self {
            ctx,
            session_id,
            budget,
            slot,
            registration: None,
        }
    }

    /// The session this scheduler drives.
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Spawn the periodic loop. Consumes the scheduler, so it cannot be
    /// started twice.
    ///
    /// The handle reports [`SchedulerState::Idle`] until the spawned task
    /// first runs.
    pub fn start(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let session_id = self.session_id;
        let serial = self.registration.as_ref().map_or(0, |(_, serial)| *serial);
        let join = tokio::spawn(self.run(stop_rx, state_tx));
        SchedulerHandle {
            session_id,
            serial,
            stop_tx,
            state_rx,
            join,
        }
    }

    async fn run(
        self,
        mut stop_rx: watch::Receiver<bool>,
        state_tx: watch::Sender<SchedulerState>,
    ) {
        state_tx.send_replace(SchedulerState::Running);
        let period = self.ctx.config.cycle.interval();
        let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
        let mut ticker = tokio::time::interval_at(first, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            session_id = %self.session_id,
            interval_ms = self.ctx.config.cycle.interval_ms,
            budget = self.budget,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            let outcome = {
                let mut guard = self.slot.lock().await;
                run_tick(&self.ctx, self.session_id, self.budget, &mut guard).await
            };

            match outcome {
                Ok(TickOutcome::Advanced { cycle, .. }) if cycle >= self.budget => {
                    if self.finish().await {
                        break;
                    }
                }
                Ok(TickOutcome::Advanced { cycle, .. }) => {
                    debug!(session_id = %self.session_id, cycle, "Tick advanced");
                }
                Ok(TickOutcome::BudgetReached) => {
                    if self.finish().await {
                        break;
                    }
                }
                Ok(TickOutcome::Ended) => break,
                Err(e @ TickError::SessionNotFound(_)) => {
                    error!(session_id = %self.session_id, error = %e, "Scheduler stopping");
                    break;
                }
                Err(e) => {
                    error!(
                        session_id = %self.session_id,
                        error = %e,
                        "Tick aborted; the same cycle will be retried next tick"
                    );
                }
            }
        }

        state_tx.send_replace(SchedulerState::Stopped);
        if let Some((registry, serial)) = &self.registration {
            registry.forget(self.session_id, *serial).await;
        }
        info!(session_id = %self.session_id, "Scheduler stopped");
    }

    /// Terminate the session after its budget is spent.
    ///
    /// Returns whether the session is now completed. On a failure the
    /// durable status stays `IN_PROGRESS`; the next tick reports the budget
    /// as reached and this runs again.
    async fn finish(&self) -> bool {
        let _guard = self.slot.lock().await;
        match finalize_session(&self.ctx, self.session_id).await {
            Ok(_) => {
                if let Some((registry, _)) = &self.registration {
                    registry.release(self.session_id, &self.slot).await;
                }
                info!(session_id = %self.session_id, "Cycle budget reached; session completed");
                true
            }
            Err(e) => {
                error!(
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to complete session after budget was reached; retrying next tick"
                );
                false
            }
        }
    }
}

/// Control handle for a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    session_id: SessionId,
    serial: u64,
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<SchedulerState>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// The session this handle controls.
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Ask the loop to stop and wait for it. An in-flight tick completes
    /// first.
    pub async fn stop(self) {
        self.stop_tx.send_replace(true);
        if let Err(e) = self.join.await {
            warn!(session_id = %self.session_id, error = %e, "Scheduler task ended abnormally");
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Entries {
    running: HashMap<SessionId, SchedulerHandle>,
    slots: HashMap<SessionId, Arc<SessionSlot>>,
    next_serial: u64,
}

/// Running schedulers and the per-session slots every writer shares.
///
/// A session's slot stays registered from the first time anyone asks for
/// it until the session has been completed in the durable store, whether or
/// not a scheduler is running. Every writer of a live session therefore
/// locks the same slot, and a slot handed out after completion can only
/// observe a completed session.
#[derive(Default)]
pub struct SchedulerRegistry {
    entries: Mutex<Entries>,
}

impl SchedulerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The session's shared slot, registering a stale one if it has none.
    pub async fn slot(&self, session_id: SessionId) -> Arc<SessionSlot> {
        let mut entries = self.entries.lock().await;
        Arc::clone(
            entries
                .slots
                .entry(session_id)
                .or_insert_with(|| Arc::new(SessionSlot::stale())),
        )
    }

    /// Start `scheduler` and record it.
    ///
    /// The scheduler adopts the session's registered slot when there is
    /// one. Returns `false` (and does not start it) if the session already
    /// has a running scheduler.
    pub async fn spawn(self: &Arc<Self>, mut scheduler: CycleScheduler) -> bool {
        let mut entries = self.entries.lock().await;
        let session_id = scheduler.session_id;
        if entries.running.contains_key(&session_id) {
            return false;
        }
        scheduler.slot = Arc::clone(
            entries
                .slots
                .entry(session_id)
                .or_insert_with(|| Arc::clone(&scheduler.slot)),
        );
        let serial = entries.next_serial;
        entries.next_serial = serial.wrapping_add(1);
        scheduler.registration = Some((Arc::clone(self), serial));
        let handle = scheduler.start();
        entries.running.insert(session_id, handle);
        true
    }

    /// Stop a session's scheduler and wait for its in-flight tick. The
    /// session's slot stays registered.
    ///
    /// Returns `false` if no scheduler was running.
    pub async fn stop(&self, session_id: SessionId) -> bool {
        let handle = self.entries.lock().await.running.remove(&session_id);
        match handle {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every scheduler.
    pub async fn stop_all(&self) {
        let drained: Vec<SchedulerHandle> = self
            .entries
            .lock()
            .await
            .running
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.stop().await;
        }
    }

    /// Drop the handle a finished scheduler left behind, if it is still the
    /// one registered for the session.
    async fn forget(&self, session_id: SessionId, serial: u64) {
        let mut entries = self.entries.lock().await;
        if entries
            .running
            .get(&session_id)
            .is_some_and(|handle| handle.serial == serial)
        {
            entries.running.remove(&session_id);
        }
    }

    /// Unregister a completed session's slot, if it is still the one
    /// registered. Call with the slot locked, after the durable completion.
    pub(crate) async fn release(&self, session_id: SessionId, slot: &Arc<SessionSlot>) {
        let mut entries = self.entries.lock().await;
        if entries
            .slots
            .get(&session_id)
            .is_some_and(|registered| Arc::ptr_eq(registered, slot))
        {
            entries.slots.remove(&session_id);
        }
    }

    /// Whether the session has a running scheduler.
    pub async fn is_running(&self, session_id: SessionId) -> bool {
        self.entries.lock().await.running.contains_key(&session_id)
    }

    /// Sessions with a running scheduler.
    pub async fn active(&self) -> Vec<SessionId> {
        self.entries.lock().await.running.keys().copied().collect()
    }
}
