//! Game-rules seam and the stub implementation.
//!
//! The executor hands each claimed [`Action`] to a [`GameRules`]
//! implementation and gets back either an [`ActionOutcome`] (whose
//! [`PlayerDelta`] is merged into the player's state) or an
//! [`ActionExecutionFailure`] (recorded on the action). Combat, economy,
//! and diplomacy formulas live behind this trait, outside the engine.
//!
//! [`StubRules`] spells out only what the typed parameters make obvious,
//! which is enough to drive sessions end-to-end before real rules exist.

use async_trait::async_trait;
use suzerain_types::{Action, ActionOutcome, ActionParameters, PlayerDelta};

/// Turns every action costs under [`StubRules`].
const STUB_TURN_COST: u32 = 1;

/// A rules failure for one action.
///
/// Never escapes the executor: it becomes the action's `failed` status and
/// error description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionExecutionFailure {
    /// Description stored on the failed action.
    pub message: String,
}

impl ActionExecutionFailure {
    /// Build a failure from any description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Resolves an action into an outcome.
#[async_trait]
pub trait GameRules: Send + Sync {
    /// Resolve one action.
    ///
    /// # Errors
    ///
    /// Returns [`ActionExecutionFailure`] when the action cannot take effect.
    async fn resolve(&self, action: &Action) -> Result<ActionOutcome, ActionExecutionFailure>;
}

/// Rules that charge one turn per action and apply the resource movements
/// spelled out by the parameters.
///
/// - `Gather` credits the requested amount.
/// - `Trade` debits the given resource and credits the received one.
/// - `Recruit` adds the requested units.
/// - Everything else only costs the turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubRules;

impl StubRules {
    /// Create the stub rules.
    pub const fn new() -> Self {
        Self
    }

    fn delta_for(parameters: &ActionParameters) -> PlayerDelta {
        let mut delta = PlayerDelta {
            turns_consumed: STUB_TURN_COST,
            ..PlayerDelta::default()
        };
        match parameters {
            ActionParameters::Gather { resource, amount } => {
                delta.resources.insert(*resource, i64::from(*amount));
            }
            ActionParameters::Trade {
                give,
                give_amount,
                receive,
                receive_amount,
            } => {
                let debit = i64::from(*give_amount).saturating_neg();
                let credit = i64::from(*receive_amount);
                if give == receive {
                    delta.resources.insert(*give, debit.saturating_add(credit));
                } else {
                    delta.resources.insert(*give, debit);
                    delta.resources.insert(*receive, credit);
                }
            }
            ActionParameters::Recruit { unit, count } => {
                delta.units.insert(unit.clone(), i64::from(*count));
            }
            ActionParameters::Build { .. }
            | ActionParameters::Move { .. }
            | ActionParameters::Attack { .. }
            | ActionParameters::Research { .. }
            | ActionParameters::Diplomacy { .. }
            | ActionParameters::Pass => {}
        }
        delta
    }
}

#[async_trait]
impl GameRules for StubRules {
    async fn resolve(&self, action: &Action) -> Result<ActionOutcome, ActionExecutionFailure> {
        Ok(ActionOutcome {
            delta: Self::delta_for(&action.parameters),
            summary: format!("{} resolved", action.action_type),
            details: serde_json::Value::Null,
        })
    }
}

/// Adapts a plain closure into a [`GameRules`] implementation.
pub struct RulesFn<F>(pub F);

impl<F> RulesFn<F>
where
    F: Fn(&Action) -> Result<ActionOutcome, ActionExecutionFailure> + Send + Sync,
{
    /// Wrap `resolve` as a rules collaborator.
    pub const fn new(resolve: F) -> Self {
        Self(resolve)
    }
}

#[async_trait]
impl<F> GameRules for RulesFn<F>
where
    F: Fn(&Action) -> Result<ActionOutcome, ActionExecutionFailure> + Send + Sync,
{
    async fn resolve(&self, action: &Action) -> Result<ActionOutcome, ActionExecutionFailure> {
        (self.0)(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use suzerain_types::{Phase, PlayerId, ResourceKind, SessionId};

    fn action(parameters: ActionParameters) -> Action {
        Action::new(SessionId::new(), PlayerId::new(), 0, Phase::Action, parameters)
    }

    #[tokio::test]
    async fn stub_gather_credits_amount_and_costs_a_turn() {
        let outcome = StubRules::new()
            .resolve(&action(ActionParameters::Gather {
                resource: ResourceKind::Stone,
                amount: 25,
            }))
            .await;
        let Ok(outcome) = outcome else {
            panic!("stub rules never fail");
        };
        assert_eq!(outcome.delta.turns_consumed, 1);
        assert_eq!(outcome.delta.resources.get(&ResourceKind::Stone), Some(&25));
        assert_eq!(outcome.summary, "gather resolved");
    }

    #[tokio::test]
    async fn stub_trade_moves_both_resources() {
        let outcome = StubRules::new()
            .resolve(&action(ActionParameters::Trade {
                give: ResourceKind::Gold,
                give_amount: 100,
                receive: ResourceKind::Iron,
                receive_amount: 20,
            }))
            .await
            .unwrap_or_default();
        assert_eq!(outcome.delta.resources.get(&ResourceKind::Gold), Some(&-100));
        assert_eq!(outcome.delta.resources.get(&ResourceKind::Iron), Some(&20));
    }

    #[tokio::test]
    async fn stub_pass_only_costs_a_turn() {
        let outcome = StubRules::new()
            .resolve(&action(ActionParameters::Pass))
            .await
            .unwrap_or_default();
        assert_eq!(outcome.delta.turns_consumed, 1);
        assert!(outcome.delta.resources.is_empty());
        assert!(outcome.delta.units.is_empty());
    }

    #[tokio::test]
    async fn closure_rules_can_fail() {
        let rules =
            RulesFn::new(|_: &Action| Err(ActionExecutionFailure::new("siege engines missing")));
        let result = rules.resolve(&action(ActionParameters::Pass)).await;
        assert_eq!(
            result.err().map(|e| e.to_string()),
            Some(String::from("siege engines missing"))
        );
    }
}
