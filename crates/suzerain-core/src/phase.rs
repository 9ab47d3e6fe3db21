//! Phase processor: run one phase of one cycle.

use chrono::Utc;
use suzerain_types::{Action, Cycle, LifecycleEvent, Phase, SessionId, SessionProjection};
use tracing::{debug, warn};

use crate::context::Context;
use crate::executor::{self, Disposition};
use crate::store::StoreError;
use crate::sync::{self, SlotState};

/// Recorded on actions an aborted tick left `processing`.
pub const INTERRUPTED: &str = "interrupted before a result was recorded";

/// Dispatch every pending action of `phase` in `cycle`, then publish
/// [`LifecycleEvent::PhaseComplete`].
///
/// Actions an earlier, aborted run of this phase left `processing` are
/// failed first. The rest run one at a time in `(created_at, id)` order.
/// Individual action failures do not stop the phase, and a phase with
/// nothing to do still publishes its completion.
///
/// # Errors
///
/// Returns [`StoreError`] if the pending-action query or any durable write
/// made by the executor fails. The completion event is not published in
/// that case.
pub async fn process_phase(
    ctx: &Context,
    session_id: SessionId,
    cycle: &mut Cycle,
    phase: Phase,
    projection: &mut SessionProjection,
    slot: &mut SlotState,
) -> Result<(), StoreError> {
    cycle.phase = phase;

    let interrupted = sync::durable(
        ctx,
        ctx.durable
            .fail_interrupted(session_id, cycle.number, phase, INTERRUPTED, Utc::now()),
    )
    .await?;
    if !interrupted.is_empty() {
        warn!(
            session_id = %session_id,
            cycle = cycle.number,
            phase = %phase,
            count = interrupted.len(),
            "Failed actions stranded by an aborted tick"
        );
    }
    for action_id in interrupted {
        cycle.queue(action_id);
        cycle.finish(action_id, false);
    }

    let mut pending = sync::durable(
        ctx,
        ctx.durable.pending_actions(session_id, cycle.number, phase),
    )
    .await?;
    pending.sort_by_key(Action::dispatch_key);

    let dispatched = pending.len();
    for action in &pending {
        cycle.queue(action.id);
        match executor::execute(ctx, action, projection, slot).await? {
            Disposition::Completed => cycle.finish(action.id, true),
            Disposition::Failed => cycle.finish(action.id, false),
            Disposition::Skipped => cycle.release(action.id),
        }
    }

    ctx.events
        .publish(&LifecycleEvent::PhaseComplete {
            session_id,
            cycle: cycle.number,
            phase,
            timestamp: Utc::now(),
        })
        .await;

    debug!(
        session_id = %session_id,
        cycle = cycle.number,
        phase = %phase,
        dispatched,
        "Phase complete"
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use suzerain_types::{
        ActionParameters, ActionStatus, PlayerId, PlayerState, ResourceLedger, Session,
    };

    use super::*;
    use crate::config::SuzerainConfig;
    use crate::context::MemoryBackends;
    use crate::rules::StubRules;

    async fn seeded() -> (MemoryBackends, Session, SessionProjection) {
        let backends = MemoryBackends::new(Arc::new(StubRules::new()), SuzerainConfig::default());
        let players: Vec<PlayerState> = (0..2)
            .map(|_| PlayerState::new(PlayerId::new(), ResourceLedger::default(), 75))
            .collect();
        let session = Session::start(
            players.iter().map(|p| p.player_id).collect(),
            10,
            Utc::now(),
        );
        backends
            .context
            .durable
            .insert_session(&session, &players)
            .await
            .ok();
        let projection = SessionProjection::from_durable(&session, players);
        (backends, session, projection)
    }

    #[tokio::test]
    async fn empty_phase_still_publishes() {
        let (backends, session, mut projection) = seeded().await;
        let mut cycle = Cycle::begin(0, Utc::now());
        let mut slot = SlotState::default();

        let result = process_phase(
            &backends.context,
            session.id,
            &mut cycle,
            Phase::Resolution,
            &mut projection,
            &mut slot,
        )
        .await;
        assert!(result.is_ok());

        let events = backends.events.events().await;
        assert!(matches!(
            events.as_slice(),
            [LifecycleEvent::PhaseComplete {
                phase: Phase::Resolution,
                cycle: 0,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn dispatch_follows_time_then_id() {
        let (backends, session, mut projection) = seeded().await;
        let player = session.players.first().copied().unwrap_or_default();
        let base = Utc::now();

        // Inserted out of order; two share a timestamp.
        let late = Action::new(session.id, player, 0, Phase::Action, ActionParameters::Pass)
            .submitted_at(base + Duration::seconds(2));
        let tie_a = Action::new(session.id, player, 0, Phase::Action, ActionParameters::Pass)
            .submitted_at(base);
        let tie_b = Action::new(session.id, player, 0, Phase::Action, ActionParameters::Pass)
            .submitted_at(base);
        let other_phase =
            Action::new(session.id, player, 0, Phase::Preparation, ActionParameters::Pass);
        for action in [&late, &tie_b, &other_phase, &tie_a] {
            backends.context.durable.insert_action(action).await.ok();
        }

        let mut cycle = Cycle::begin(0, Utc::now());
        let mut slot = SlotState::default();
        process_phase(
            &backends.context,
            session.id,
            &mut cycle,
            Phase::Action,
            &mut projection,
            &mut slot,
        )
        .await
        .ok();

        let (first, second) = if tie_a.id < tie_b.id {
            (tie_a.id, tie_b.id)
        } else {
            (tie_b.id, tie_a.id)
        };
        assert_eq!(backends.durable.claim_order().await, vec![first, second, late.id]);
        assert_eq!(cycle.completed, vec![first, second, late.id]);
        assert!(cycle.pending.is_empty());
    }

    #[tokio::test]
    async fn stranded_processing_actions_are_failed_before_dispatch() {
        let (backends, session, mut projection) = seeded().await;
        let player = session.players.first().copied().unwrap_or_default();
        let stranded = Action::new(session.id, player, 0, Phase::Action, ActionParameters::Pass);
        let queued = Action::new(session.id, player, 0, Phase::Action, ActionParameters::Pass);
        for action in [&stranded, &queued] {
            backends.context.durable.insert_action(action).await.ok();
        }
        backends.context.durable.claim_action(stranded.id).await.ok();

        let mut cycle = Cycle::begin(0, Utc::now());
        let mut slot = SlotState::default();
        let result = process_phase(
            &backends.context,
            session.id,
            &mut cycle,
            Phase::Action,
            &mut projection,
            &mut slot,
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(cycle.failed, vec![stranded.id]);
        assert_eq!(cycle.completed, vec![queued.id]);

        let stored = backends
            .context
            .durable
            .get_action(stranded.id)
            .await
            .ok()
            .flatten();
        assert_eq!(stored.as_ref().map(|a| a.status), Some(ActionStatus::Failed));
        assert_eq!(stored.and_then(|a| a.error).as_deref(), Some(INTERRUPTED));
    }
}
