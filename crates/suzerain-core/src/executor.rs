//! Action executor: one action from `pending` to a terminal status.
//!
//! Side effects, strictly ordered:
//!
//! 1. Claim the action (`pending -> processing`) in the durable store. A
//!    lost claim means someone else owns it; the action is skipped.
//! 2. Hand it to the [`GameRules`] collaborator, bounded by
//!    `cycle.rules_timeout_ms`.
//! 3. On success, merge the outcome's delta into a copy of the acting
//!    player's state and stamp `completed` together with that state in one
//!    durable write. Only then is the in-memory projection updated and
//!    mirrored into the cache.
//! 4. On failure (including a timeout), stamp `failed` with the
//!    description. The projection is left alone.
//!
//! Rules failures never leave this module. Durable-store errors do: the
//! scheduler must abort the tick rather than advance past an action whose
//! status it could not record. Such an error also marks the projection
//! stale, and an action it strands in `processing` is failed when the phase
//! is next run.
//!
//! [`GameRules`]: crate::rules::GameRules

use chrono::Utc;
use suzerain_types::{Action, SessionProjection};
use tracing::{debug, warn};

use crate::context::Context;
use crate::rules::ActionExecutionFailure;
use crate::store::StoreError;
use crate::sync::{self, SlotState};

/// Description recorded when the rules collaborator fails without saying why.
const UNDESCRIBED_FAILURE: &str = "action failed without a description";

/// How an executed action ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Resolved and merged into the player's state.
    Completed,
    /// Resolution failed; the failure is recorded on the action.
    Failed,
    /// Not executed: the claim was lost or the status moved underneath us.
    Skipped,
}

/// Execute one action.
///
/// `projection` is the session's in-memory projection for this tick; the
/// acting player's entry is replaced once the durable write has landed.
///
/// # Errors
///
/// Returns [`StoreError`] if a durable-store write fails. Rules failures
/// are not errors; they produce [`Disposition::Failed`].
pub async fn execute(
    ctx: &Context,
    action: &Action,
    projection: &mut SessionProjection,
    slot: &mut SlotState,
) -> Result<Disposition, StoreError> {
    let result = run(ctx, action, projection, slot).await;
    if let Err(e) = &result {
        warn!(action_id = %action.id, error = %e, "Action write failed; marking projection stale");
        slot.projection_stale = true;
    }
    result
}

async fn run(
    ctx: &Context,
    action: &Action,
    projection: &mut SessionProjection,
    slot: &mut SlotState,
) -> Result<Disposition, StoreError> {
    let claimed = sync::durable(ctx, ctx.durable.claim_action(action.id)).await?;
    if !claimed {
        debug!(action_id = %action.id, "Action already claimed; skipping");
        return Ok(Disposition::Skipped);
    }

    match resolve_bounded(ctx, action).await {
        Ok(outcome) => {
            let now = Utc::now();
            let merged = projection.players.get(&action.player_id).map(|player| {
                let mut player = player.clone();
                player.apply(&outcome.delta, now);
                player
            });
            if merged.is_none() {
                warn!(
                    action_id = %action.id,
                    player_id = %action.player_id,
                    "Completed action for a player outside the session; nothing to merge"
                );
            }

            let stamped = sync::durable(
                ctx,
                ctx.durable
                    .complete_action(action.id, &outcome, merged.as_ref(), now),
            )
            .await?;
            if !stamped {
                warn!(action_id = %action.id, "Action left processing before completion");
                return Ok(Disposition::Skipped);
            }

            if let Some(player) = merged {
                projection.players.insert(player.player_id, player);
                projection.updated_at = now;
                sync::write_players(ctx, slot, action.session_id, projection).await;
            }

            debug!(
                action_id = %action.id,
                player_id = %action.player_id,
                action_type = %action.action_type,
                summary = outcome.summary.as_str(),
                "Action completed"
            );
            Ok(Disposition::Completed)
        }
        Err(failure) => {
            let description = if failure.message.is_empty() {
                UNDESCRIBED_FAILURE
            } else {
                failure.message.as_str()
            };
            let stamped = sync::durable(
                ctx,
                ctx.durable.fail_action(action.id, description, Utc::now()),
            )
            .await?;
            if !stamped {
                warn!(action_id = %action.id, "Action left processing before failure was recorded");
                return Ok(Disposition::Skipped);
            }
            debug!(
                action_id = %action.id,
                player_id = %action.player_id,
                error = description,
                "Action failed"
            );
            Ok(Disposition::Failed)
        }
    }
}

async fn resolve_bounded(
    ctx: &Context,
    action: &Action,
) -> Result<suzerain_types::ActionOutcome, ActionExecutionFailure> {
    let limit = ctx.config.cycle.rules_timeout();
    tokio::time::timeout(limit, ctx.rules.resolve(action))
        .await
        .unwrap_or_else(|_elapsed| {
            Err(ActionExecutionFailure::new(format!(
                "rules call exceeded {}ms",
                ctx.config.cycle.rules_timeout_ms
            )))
        })
}
